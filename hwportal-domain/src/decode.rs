//! Fixed-offset decoding of portal notifications into [`PortalEvent`]s.
//!
//! | channel | payload | event |
//! |---------|---------|-------|
//! | car-detect | `04` + 6 byte uid | `CarDetected` |
//! | car-detect | empty | `CarRemoved` |
//! | speed | 4 byte little-endian `f32` | `SpeedSample` (×64) |
//! | serial | ASCII, NUL padded | `SerialNumber` |
//! | serial | empty | `CarRemoved` |
//! | ndef | NDEF record | `NdefPayload` |
//! | ndef | empty | `CarRemoved` |
//! | control-register | anything | `ControlRegister` |

use crate::{
    car::CarUid,
    event::PortalEvent,
    ndef::NdefRecord,
    protocol::{CAR_DETECT_TAG, Channel, SPEED_PAYLOAD_LEN, SPEED_SCALE, UID_LEN},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{channel} payload must be {expected} bytes, got {actual}")]
    UnexpectedLength {
        channel: Channel,
        expected: usize,
        actual: usize,
    },
    #[error("car-detect payload must start with {expected:#04x}, got {actual:#04x}")]
    UnexpectedTag { expected: u8, actual: u8 },
    #[error("serial payload is not ASCII")]
    NotAscii,
}

pub fn decode(channel: Channel, payload: &[u8]) -> Result<PortalEvent, DecodeError> {
    match channel {
        Channel::CarDetect => decode_car_detect(payload),
        Channel::Speed => decode_speed(payload),
        Channel::Serial => decode_serial(payload),
        Channel::Ndef => Ok(decode_ndef(payload)),
        Channel::ControlRegister => Ok(PortalEvent::ControlRegister {
            raw: payload.to_vec(),
        }),
    }
}

#[must_use]
pub fn scale_speed(raw: f32) -> f32 {
    raw * SPEED_SCALE
}

fn decode_car_detect(payload: &[u8]) -> Result<PortalEvent, DecodeError> {
    let Some((&tag, uid)) = payload.split_first() else {
        return Ok(PortalEvent::CarRemoved);
    };
    if tag != CAR_DETECT_TAG {
        return Err(DecodeError::UnexpectedTag {
            expected: CAR_DETECT_TAG,
            actual: tag,
        });
    }
    CarUid::from_slice(uid)
        .map(|uid| PortalEvent::CarDetected { uid })
        .ok_or(DecodeError::UnexpectedLength {
            channel: Channel::CarDetect,
            expected: 1 + UID_LEN,
            actual: payload.len(),
        })
}

fn decode_speed(payload: &[u8]) -> Result<PortalEvent, DecodeError> {
    let bytes: [u8; SPEED_PAYLOAD_LEN] =
        payload
            .try_into()
            .map_err(|_| DecodeError::UnexpectedLength {
                channel: Channel::Speed,
                expected: SPEED_PAYLOAD_LEN,
                actual: payload.len(),
            })?;
    Ok(PortalEvent::SpeedSample {
        value: scale_speed(f32::from_le_bytes(bytes)),
    })
}

fn decode_serial(payload: &[u8]) -> Result<PortalEvent, DecodeError> {
    let end = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let text = &payload[..end];
    if text.is_empty() {
        return Ok(PortalEvent::CarRemoved);
    }
    if !text.is_ascii() {
        return Err(DecodeError::NotAscii);
    }
    Ok(PortalEvent::SerialNumber {
        text: text.iter().map(|&b| char::from(b)).collect(),
    })
}

fn decode_ndef(payload: &[u8]) -> PortalEvent {
    if payload.is_empty() {
        return PortalEvent::CarRemoved;
    }
    PortalEvent::NdefPayload {
        raw: payload.to_vec(),
        record: NdefRecord::parse(payload),
    }
}
