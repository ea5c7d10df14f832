//! GATT layout of the portal and the logical channels multiplexed over it.
//!
//! Every characteristic lives under `af0a6ec7-XXXX-YYYY-84a0-91559fc6f0de`,
//! where `YYYY` selects the service (`000a` auth, `000b` data, `000c` control)
//! and `XXXX` the characteristic within it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Advertised local name of the portal.
pub const PORTAL_NAME: &str = "HWiD";

pub const SERVICE_AUTH: Uuid = Uuid::from_u128(0xaf0a6ec7_0001_000a_84a0_91559fc6f0de);
pub const SERVICE_DATA: Uuid = Uuid::from_u128(0xaf0a6ec7_0001_000b_84a0_91559fc6f0de);
pub const SERVICE_CONTROL: Uuid = Uuid::from_u128(0xaf0a6ec7_0001_000c_84a0_91559fc6f0de);

pub const CHAR_AUTH_COMMAND: Uuid = Uuid::from_u128(0xaf0a6ec7_0002_000a_84a0_91559fc6f0de);
/// Device certificate, read once after connecting.
pub const CHAR_AUTH_KEY: Uuid = Uuid::from_u128(0xaf0a6ec7_0003_000a_84a0_91559fc6f0de);
pub const CHAR_AUTH_RESPONSE: Uuid = Uuid::from_u128(0xaf0a6ec7_0004_000a_84a0_91559fc6f0de);

pub const CHAR_DATA_COMMAND: Uuid = Uuid::from_u128(0xaf0a6ec7_0002_000b_84a0_91559fc6f0de);
pub const CHAR_DATA_FAST: Uuid = Uuid::from_u128(0xaf0a6ec7_0003_000b_84a0_91559fc6f0de);

pub const CHAR_FIRMWARE_VERSION: Uuid = Uuid::from_u128(0xaf0a6ec7_0002_000c_84a0_91559fc6f0de);
/// Car serial number while a car is on the portal.
pub const CHAR_SERIAL_NUMBER: Uuid = Uuid::from_u128(0xaf0a6ec7_0003_000c_84a0_91559fc6f0de);
/// Full NDEF record read from the car's tag.
pub const CHAR_EVENT_1: Uuid = Uuid::from_u128(0xaf0a6ec7_0004_000c_84a0_91559fc6f0de);
/// Car placed (`0x04` + uid) or removed (empty).
pub const CHAR_EVENT_2: Uuid = Uuid::from_u128(0xaf0a6ec7_0005_000c_84a0_91559fc6f0de);
/// Speed of a pass through the sensor, little-endian `f32`.
pub const CHAR_EVENT_3: Uuid = Uuid::from_u128(0xaf0a6ec7_0006_000c_84a0_91559fc6f0de);
pub const CHAR_CONTROL: Uuid = Uuid::from_u128(0xaf0a6ec7_0007_000c_84a0_91559fc6f0de);
pub const CHAR_COMMAND: Uuid = Uuid::from_u128(0xaf0a6ec7_0008_000c_84a0_91559fc6f0de);

/// Characteristics that indicate; all of them are subscribed on connect.
pub const NOTIFY_CHARACTERISTICS: [Uuid; 9] = [
    CHAR_AUTH_COMMAND,
    CHAR_AUTH_RESPONSE,
    CHAR_DATA_COMMAND,
    CHAR_SERIAL_NUMBER,
    CHAR_EVENT_1,
    CHAR_EVENT_2,
    CHAR_EVENT_3,
    CHAR_CONTROL,
    CHAR_COMMAND,
];

/// Raw speed floats are in 1:64 scale units.
pub const SPEED_SCALE: f32 = 64.0;

/// First byte of a car-detect payload.
pub const CAR_DETECT_TAG: u8 = 0x04;

pub const UID_LEN: usize = 6;

pub const SPEED_PAYLOAD_LEN: usize = 4;

/// Logical channel a notification belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    CarDetect,
    Speed,
    Serial,
    Ndef,
    ControlRegister,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::CarDetect,
        Channel::Speed,
        Channel::Serial,
        Channel::Ndef,
        Channel::ControlRegister,
    ];

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Channel> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.characteristic() == uuid)
    }

    #[must_use]
    pub fn characteristic(self) -> Uuid {
        use Channel::{CarDetect, ControlRegister, Ndef, Serial, Speed};
        match self {
            CarDetect => CHAR_EVENT_2,
            Speed => CHAR_EVENT_3,
            Serial => CHAR_SERIAL_NUMBER,
            Ndef => CHAR_EVENT_1,
            ControlRegister => CHAR_CONTROL,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Channel::{CarDetect, ControlRegister, Ndef, Serial, Speed};
        let name = match self {
            CarDetect => "car-detect",
            Speed => "speed",
            Serial => "serial",
            Ndef => "ndef",
            ControlRegister => "control-register",
        };
        write!(f, "{name}")
    }
}

/// Human readable name for any portal characteristic.
#[must_use]
pub fn characteristic_name(uuid: Uuid) -> &'static str {
    const NAMES: [(Uuid, &str); 12] = [
        (CHAR_AUTH_COMMAND, "Auth Command"),
        (CHAR_AUTH_KEY, "Auth Key"),
        (CHAR_AUTH_RESPONSE, "Auth Response"),
        (CHAR_DATA_COMMAND, "Data Command"),
        (CHAR_DATA_FAST, "Data Fast"),
        (CHAR_FIRMWARE_VERSION, "Firmware Version"),
        (CHAR_SERIAL_NUMBER, "Serial Number"),
        (CHAR_EVENT_1, "Event Channel 1"),
        (CHAR_EVENT_2, "Event Channel 2"),
        (CHAR_EVENT_3, "Event Channel 3"),
        (CHAR_CONTROL, "Control Register"),
        (CHAR_COMMAND, "Command"),
    ];
    NAMES
        .iter()
        .find(|(candidate, _)| *candidate == uuid)
        .map_or("Unknown", |(_, name)| *name)
}

#[cfg(test)]
mod test {
    use uuid::Uuid;

    use super::{CHAR_AUTH_RESPONSE, CHAR_EVENT_2, Channel, characteristic_name};

    #[test]
    fn channels_round_trip_through_their_characteristic() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_uuid(channel.characteristic()), Some(channel));
        }
    }

    #[test]
    fn event_2_is_car_detect() {
        let uuid = Uuid::parse_str("af0a6ec7-0005-000c-84a0-91559fc6f0de").unwrap();
        assert_eq!(uuid, CHAR_EVENT_2);
        assert_eq!(Channel::from_uuid(uuid), Some(Channel::CarDetect));
    }

    #[test]
    fn auth_characteristics_have_no_channel() {
        assert_eq!(Channel::from_uuid(CHAR_AUTH_RESPONSE), None);
        assert_eq!(characteristic_name(CHAR_AUTH_RESPONSE), "Auth Response");
        assert_eq!(characteristic_name(Uuid::nil()), "Unknown");
    }
}
