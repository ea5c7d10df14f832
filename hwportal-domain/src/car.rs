use serde::{Deserialize, Serialize};

use crate::protocol::UID_LEN;

/// NFC uid a car reports when placed on the portal.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CarUid(pub [u8; UID_LEN]);

impl CarUid {
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<CarUid> {
        <[u8; UID_LEN]>::try_from(bytes).ok().map(CarUid)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; UID_LEN] {
        &self.0
    }

    /// First three octets, enough to tell cars apart in narrow columns.
    #[must_use]
    pub fn short(&self) -> String {
        join_hex(&self.0[..3])
    }
}

impl std::fmt::Display for CarUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", join_hex(&self.0))
    }
}

fn join_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}
