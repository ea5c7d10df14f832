pub mod jsonl;
pub mod noop;

use std::error::Error;

use async_trait::async_trait;

use hwportal_domain::notification::RawNotification;

/// Somewhere to keep raw notifications for later replay.
#[async_trait]
pub trait EventSink: Send {
    async fn save(&mut self, notifications: &[RawNotification]) -> Result<(), Box<dyn Error>>;
    async fn close(mut self: Box<Self>) -> Result<(), Box<dyn Error>>;
}
