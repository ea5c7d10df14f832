pub mod ble;
pub mod forward;
pub mod replay;

use std::error::Error;

use hwportal_domain::notification::RawNotification;

/// Yields raw notifications until the portal goes away.
#[allow(async_fn_in_trait)]
pub trait NotificationSource {
    /// `Ok(None)` once the source is exhausted or disconnected.
    async fn next_notification(&mut self) -> Result<Option<RawNotification>, Box<dyn Error>>;
}
