use std::{cell::RefCell, rc::Rc};

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::{
    decode::{DecodeError, decode},
    event::EventRecord,
    notification::RawNotification,
    protocol::Channel,
};

/// Receives decoded events in arrival order.
pub trait Listener {
    fn on_event(&mut self, record: &EventRecord);

    fn on_decode_error(&mut self, _failure: &DecodeFailure) {}
}

impl<T: Listener> Listener for Rc<RefCell<T>> {
    fn on_event(&mut self, record: &EventRecord) {
        self.borrow_mut().on_event(record);
    }

    fn on_decode_error(&mut self, failure: &DecodeFailure) {
        self.borrow_mut().on_decode_error(failure);
    }
}

/// A notification that arrived on a known channel but could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    pub date_time: DateTime<Utc>,
    pub channel: Channel,
    pub payload: Vec<u8>,
    pub error: DecodeError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Delivered(EventRecord),
    Rejected(DecodeFailure),
    /// The notification was on a characteristic that carries no channel.
    Ignored,
}

/// Decodes notifications and fans them out to listeners in registration order.
#[derive(Default)]
pub struct Dispatcher {
    listeners: Vec<Box<dyn Listener>>,
}

impl Dispatcher {
    pub fn register(&mut self, listener: Box<dyn Listener>) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Box<dyn Listener>) -> Dispatcher {
        self.register(listener);
        self
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn dispatch(&mut self, notification: &RawNotification) -> Dispatch {
        let Some(channel) = notification.channel() else {
            trace!(
                "[Dispatcher] ignoring notification on {}",
                notification.characteristic
            );
            return Dispatch::Ignored;
        };
        match decode(channel, &notification.payload) {
            Ok(event) => {
                debug!("[Dispatcher] {channel}: {event}");
                let record = EventRecord::new(notification.date_time, event);
                for listener in &mut self.listeners {
                    listener.on_event(&record);
                }
                Dispatch::Delivered(record)
            }
            Err(error) => {
                warn!(
                    "[Dispatcher] dropping {channel} notification {}: {error}",
                    notification.payload_hex()
                );
                let failure = DecodeFailure {
                    date_time: notification.date_time,
                    channel,
                    payload: notification.payload.clone(),
                    error,
                };
                for listener in &mut self.listeners {
                    listener.on_decode_error(&failure);
                }
                Dispatch::Rejected(failure)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use crate::{
        event::{EventRecord, PortalEvent},
        notification::RawNotification,
        protocol::Channel,
    };

    use super::{DecodeFailure, Dispatch, Dispatcher, Listener};

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Listener for Recorder {
        fn on_event(&mut self, record: &EventRecord) {
            self.log
                .borrow_mut()
                .push(format!("{}: {}", self.name, record.event));
        }

        fn on_decode_error(&mut self, failure: &DecodeFailure) {
            self.log
                .borrow_mut()
                .push(format!("{}: error on {}", self.name, failure.channel));
        }
    }

    fn notification(second: i64, channel: Channel, payload: &[u8]) -> RawNotification {
        RawNotification::on_channel(Utc.timestamp_opt(second, 0).unwrap(), channel, payload)
    }

    #[test]
    fn listeners_are_called_in_registration_order() {
        let log = Rc::new(RefCell::new(vec![]));
        let mut dispatcher = Dispatcher::default()
            .with_listener(Box::new(Recorder {
                name: "first",
                log: log.clone(),
            }))
            .with_listener(Box::new(Recorder {
                name: "second",
                log: log.clone(),
            }));

        dispatcher.dispatch(&notification(1, Channel::CarDetect, &[]));
        dispatcher.dispatch(&notification(2, Channel::Speed, &1.0f32.to_le_bytes()));

        assert_eq!(
            *log.borrow(),
            vec![
                "first: car removed",
                "second: car removed",
                "first: speed 64.0",
                "second: speed 64.0",
            ]
        );
    }

    #[test]
    fn decode_failures_do_not_stop_the_stream() {
        let log = Rc::new(RefCell::new(vec![]));
        let mut dispatcher = Dispatcher::default().with_listener(Box::new(Recorder {
            name: "l",
            log: log.clone(),
        }));

        let rejected = dispatcher.dispatch(&notification(1, Channel::Speed, &[1, 2]));
        assert!(matches!(
            rejected,
            Dispatch::Rejected(ref failure) if failure.channel == Channel::Speed
        ));
        dispatcher.dispatch(&notification(2, Channel::Speed, &2.0f32.to_le_bytes()));

        assert_eq!(*log.borrow(), vec!["l: error on speed", "l: speed 128.0"]);
    }

    #[test]
    fn unknown_characteristics_are_ignored() {
        let log = Rc::new(RefCell::new(vec![]));
        let mut dispatcher = Dispatcher::default().with_listener(Box::new(Recorder {
            name: "l",
            log: log.clone(),
        }));
        let raw = RawNotification::new(Utc.timestamp_opt(0, 0).unwrap(), Uuid::nil(), vec![1]);
        assert_eq!(dispatcher.dispatch(&raw), Dispatch::Ignored);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn delivered_record_carries_notification_time() {
        let mut dispatcher = Dispatcher::default();
        let raw = notification(42, Channel::CarDetect, &[]);
        assert_eq!(
            dispatcher.dispatch(&raw),
            Dispatch::Delivered(EventRecord::new(raw.date_time, PortalEvent::CarRemoved))
        );
    }

    #[test]
    fn shared_listeners_see_events() {
        let log = Rc::new(RefCell::new(vec![]));
        let shared = Rc::new(RefCell::new(Recorder {
            name: "shared",
            log: log.clone(),
        }));
        let mut dispatcher = Dispatcher::default().with_listener(Box::new(shared.clone()));
        dispatcher.dispatch(&notification(1, Channel::CarDetect, &[]));
        assert_eq!(shared.borrow().log.borrow().len(), 1);
    }
}
