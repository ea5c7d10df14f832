use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::Channel;

/// One GATT notification as delivered by the transport.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct RawNotification {
    pub date_time: DateTime<Utc>,
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
}

impl RawNotification {
    #[must_use]
    pub fn new(
        date_time: DateTime<Utc>,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) -> RawNotification {
        RawNotification {
            date_time,
            characteristic,
            payload,
        }
    }

    #[must_use]
    pub fn on_channel(
        date_time: DateTime<Utc>,
        channel: Channel,
        payload: &[u8],
    ) -> RawNotification {
        RawNotification::new(date_time, channel.characteristic(), payload.to_vec())
    }

    #[must_use]
    pub fn channel(&self) -> Option<Channel> {
        Channel::from_uuid(self.characteristic)
    }

    #[must_use]
    pub fn payload_hex(&self) -> String {
        self.payload.iter().map(|b| format!("{b:02x}")).collect()
    }
}
