use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{car::CarUid, ndef::NdefRecord};

/// Typed event decoded from a single notification.
#[derive(Serialize, PartialEq, Debug, Clone)]
pub enum PortalEvent {
    CarDetected { uid: CarUid },
    CarRemoved,
    /// Speed of one pass, in scale speed units.
    SpeedSample { value: f32 },
    SerialNumber { text: String },
    NdefPayload { raw: Vec<u8>, record: NdefRecord },
    ControlRegister { raw: Vec<u8> },
}

impl std::fmt::Display for PortalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use PortalEvent::{
            CarDetected, CarRemoved, ControlRegister, NdefPayload, SerialNumber, SpeedSample,
        };
        match self {
            CarDetected { uid } => write!(f, "car detected {uid}"),
            CarRemoved => write!(f, "car removed"),
            SpeedSample { value } => write!(f, "speed {value:.1}"),
            SerialNumber { text } => write!(f, "serial {text}"),
            NdefPayload { raw, record } => match &record.car_id {
                Some(car_id) => write!(f, "ndef {} bytes, car id {car_id}", raw.len()),
                None => write!(f, "ndef {} bytes", raw.len()),
            },
            ControlRegister { raw } => {
                write!(f, "control register")?;
                for b in raw {
                    write!(f, " {b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// A decoded event stamped with the arrival time of its notification.
#[derive(Serialize, PartialEq, Debug, Clone)]
pub struct EventRecord {
    pub date_time: DateTime<Utc>,
    pub event: PortalEvent,
}

impl EventRecord {
    #[must_use]
    pub fn new(date_time: DateTime<Utc>, event: PortalEvent) -> EventRecord {
        EventRecord { date_time, event }
    }
}
