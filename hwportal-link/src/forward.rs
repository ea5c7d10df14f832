use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use hwportal_domain::{dispatch::Listener, event::EventRecord};

/// Hands decoded events to another task.
pub struct ForwardListener {
    sender: UnboundedSender<EventRecord>,
}

impl ForwardListener {
    #[must_use]
    pub fn new(sender: UnboundedSender<EventRecord>) -> ForwardListener {
        ForwardListener { sender }
    }
}

impl Listener for ForwardListener {
    fn on_event(&mut self, record: &EventRecord) {
        if self.sender.send(record.clone()).is_err() {
            trace!("[ForwardListener] receiver gone, dropping {}", record.event);
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;

    use hwportal_domain::{
        dispatch::Dispatcher, event::PortalEvent, notification::RawNotification, protocol::Channel,
    };

    use super::ForwardListener;

    #[tokio::test]
    async fn forwards_delivered_events() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut dispatcher =
            Dispatcher::default().with_listener(Box::new(ForwardListener::new(sender)));
        let at = Utc.timestamp_opt(7, 0).unwrap();
        dispatcher.dispatch(&RawNotification::on_channel(at, Channel::CarDetect, &[]));
        drop(dispatcher);

        let record = receiver.recv().await.unwrap();
        assert_eq!(record.date_time, at);
        assert_eq!(record.event, PortalEvent::CarRemoved);
        assert!(receiver.recv().await.is_none());
    }
}
