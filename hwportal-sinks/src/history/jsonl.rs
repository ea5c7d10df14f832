use std::{error::Error, io::Write};

use async_trait::async_trait;
use tracing::trace;

use hwportal_domain::notification::RawNotification;

use super::EventSink;

/// Writes one JSON object per notification, one per line.
pub struct JsonLinesEventSink<'a> {
    writer: Box<dyn Write + Send + 'a>,
    written: usize,
}

impl<'a> JsonLinesEventSink<'a> {
    pub fn create_from_writer(writer: Box<dyn Write + Send + 'a>) -> JsonLinesEventSink<'a> {
        JsonLinesEventSink { writer, written: 0 }
    }

    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }
}

#[async_trait]
impl EventSink for JsonLinesEventSink<'_> {
    async fn save(&mut self, notifications: &[RawNotification]) -> Result<(), Box<dyn Error>> {
        let w = &mut self.writer;
        for notification in notifications {
            serde_json::to_writer(&mut *w, notification)?;
            writeln!(w)?;
        }
        w.flush()?;
        self.written += notifications.len();
        trace!("[JsonLinesEventSink] {} notifications written", self.written);
        Ok(())
    }
    async fn close(mut self: Box<Self>) -> Result<(), Box<dyn Error>> {
        Ok(self.writer.flush()?)
    }
}
