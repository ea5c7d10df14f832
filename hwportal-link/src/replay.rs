use std::{error::Error, path::Path};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines},
    time::{self, Instant},
};
use tracing::{debug, trace};

use hwportal_domain::notification::RawNotification;

use crate::NotificationSource;

/// Plays back a JSON-lines capture as if it came from a portal.
///
/// `next_notification` is cancel safe: a notification waiting out its
/// recorded gap is kept and returned by the next call.
pub struct ReplayPortal<R> {
    lines: Lines<R>,
    line_number: usize,
    paced: bool,
    previous: Option<DateTime<Utc>>,
    shift: Option<TimeDelta>,
    pending: Option<(RawNotification, Option<Instant>)>,
}

impl ReplayPortal<BufReader<File>> {
    pub async fn open(path: &Path) -> Result<ReplayPortal<BufReader<File>>, Box<dyn Error>> {
        debug!("[ReplayPortal] opening {}", path.display());
        let file = File::open(path).await?;
        Ok(ReplayPortal::from_reader(BufReader::new(file)))
    }
}

impl<R: AsyncBufRead + Unpin> ReplayPortal<R> {
    pub fn from_reader(reader: R) -> ReplayPortal<R> {
        ReplayPortal {
            lines: reader.lines(),
            line_number: 0,
            paced: false,
            previous: None,
            shift: None,
            pending: None,
        }
    }

    /// Wait out the recorded gap between notifications before yielding each one.
    /// Paced notifications are re-stamped so the first one arrives "now" and
    /// the recorded gaps between them are kept.
    #[must_use]
    pub fn paced(mut self, paced: bool) -> ReplayPortal<R> {
        self.paced = paced;
        self
    }

    async fn read(&mut self) -> Result<Option<RawNotification>, Box<dyn Error>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let notification: RawNotification = serde_json::from_str(&line)
                .map_err(|e| format!("capture line {}: {e}", self.line_number))?;
            trace!("[ReplayPortal] line {}", self.line_number);
            return Ok(Some(notification));
        }
        debug!("[ReplayPortal] end of capture after {} lines", self.line_number);
        Ok(None)
    }

    /// When a paced notification is due, re-stamped onto the wall clock.
    fn schedule(&mut self, notification: &mut RawNotification) -> Option<Instant> {
        if !self.paced {
            return None;
        }
        let recorded = notification.date_time;
        let due = self.previous.map(|previous| {
            Instant::now() + (recorded - previous).to_std().unwrap_or_default()
        });
        self.previous = Some(recorded);
        let shift = *self.shift.get_or_insert_with(|| Utc::now() - recorded);
        notification.date_time = recorded + shift;
        due
    }
}

impl<R: AsyncBufRead + Unpin> NotificationSource for ReplayPortal<R> {
    async fn next_notification(&mut self) -> Result<Option<RawNotification>, Box<dyn Error>> {
        if self.pending.is_none() {
            let Some(mut notification) = self.read().await? else {
                return Ok(None);
            };
            let due = self.schedule(&mut notification);
            self.pending = Some((notification, due));
        }
        if let Some((_, Some(due))) = &self.pending {
            time::sleep_until(*due).await;
        }
        Ok(self.pending.take().map(|(notification, _)| notification))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone, Utc};
    use tokio::time;

    use hwportal_domain::{notification::RawNotification, protocol::Channel};

    use crate::NotificationSource;

    use super::ReplayPortal;

    const SPEED_EVERY_SECOND: &str = concat!(
        "{\"date_time\":\"2024-05-01T10:00:00Z\",",
        "\"characteristic\":\"af0a6ec7-0006-000c-84a0-91559fc6f0de\",\"payload\":[0,0,192,63]}\n",
        "{\"date_time\":\"2024-05-01T10:00:01Z\",",
        "\"characteristic\":\"af0a6ec7-0006-000c-84a0-91559fc6f0de\",\"payload\":[0,0,192,63]}\n",
        "{\"date_time\":\"2024-05-01T10:00:02.500Z\",",
        "\"characteristic\":\"af0a6ec7-0006-000c-84a0-91559fc6f0de\",\"payload\":[0,0,192,63]}\n",
    );

    #[tokio::test]
    async fn replays_each_line_in_order() {
        let capture = concat!(
            "{\"date_time\":\"1970-01-01T00:00:01Z\",\"characteristic\":\"af0a6ec7-0005-000c-84a0-91559fc6f0de\",\"payload\":[]}\n",
            "\n",
            "{\"date_time\":\"1970-01-01T00:00:02Z\",\"characteristic\":\"af0a6ec7-0006-000c-84a0-91559fc6f0de\",\"payload\":[0,0,192,63]}\n",
        );
        let mut replay = ReplayPortal::from_reader(capture.as_bytes());

        let first = replay.next_notification().await.unwrap().unwrap();
        assert_eq!(
            first,
            RawNotification::on_channel(Utc.timestamp_opt(1, 0).unwrap(), Channel::CarDetect, &[])
        );
        let second = replay.next_notification().await.unwrap().unwrap();
        assert_eq!(second.channel(), Some(Channel::Speed));
        assert_eq!(second.payload, vec![0, 0, 192, 63]);
        assert!(replay.next_notification().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_lines_report_their_position() {
        let mut replay = ReplayPortal::from_reader("\nnot json\n".as_bytes());
        let error = replay.next_notification().await.unwrap_err();
        assert!(error.to_string().starts_with("capture line 2:"));
    }

    #[tokio::test(start_paused = true)]
    async fn paced_replay_survives_redraw_ticks() {
        let mut replay = ReplayPortal::from_reader(SPEED_EVERY_SECOND.as_bytes()).paced(true);
        let mut received = Vec::new();
        for _ in 0..100 {
            tokio::select! {
                next = replay.next_notification() => match next.unwrap() {
                    Some(notification) => received.push(notification),
                    None => break,
                },
                _ = time::sleep(Duration::from_millis(100)) => {}
            }
        }
        assert_eq!(received.len(), 3);
        assert_eq!(
            received[1].date_time - received[0].date_time,
            TimeDelta::seconds(1)
        );
        assert_eq!(
            received[2].date_time - received[1].date_time,
            TimeDelta::milliseconds(1500)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn paced_replay_waits_for_the_recorded_gap() {
        let mut replay = ReplayPortal::from_reader(SPEED_EVERY_SECOND.as_bytes()).paced(true);
        let start = time::Instant::now();
        replay.next_notification().await.unwrap().unwrap();
        replay.next_notification().await.unwrap().unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(1) && waited < Duration::from_millis(1100));
    }

    #[tokio::test]
    async fn paced_replay_is_stamped_near_now() {
        let mut replay = ReplayPortal::from_reader(SPEED_EVERY_SECOND.as_bytes()).paced(true);
        let first = replay.next_notification().await.unwrap().unwrap();
        assert!((Utc::now() - first.date_time) < TimeDelta::seconds(5));
    }
}
