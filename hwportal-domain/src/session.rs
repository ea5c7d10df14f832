//! Per-car statistics built from the event stream.
//!
//! The tracker follows the car currently on the portal: the one named by the
//! most recent `CarDetected` not yet followed by `CarRemoved`. Speed samples
//! are credited to that car, or to the unknown bucket when no car is on the
//! portal. Sessions are never dropped, so removed cars stay queryable.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::{
    car::CarUid,
    dispatch::Listener,
    event::{EventRecord, PortalEvent},
    ndef::CarIdentity,
};

/// Number of passes kept for the "recent passes" view.
pub const RECENT_PASSES: usize = 10;

#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Debug, Clone, Copy)]
pub enum SessionKey {
    Car(CarUid),
    /// Speed samples that arrived with no car on the portal.
    Unknown,
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKey::Car(uid) => write!(f, "{uid}"),
            SessionKey::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct Pass {
    pub date_time: DateTime<Utc>,
    pub speed: f32,
    /// Time since the previous pass of the same session.
    pub lap_time: Option<Duration>,
}

#[derive(PartialEq, Debug, Clone)]
pub struct CarSession {
    pub key: SessionKey,
    pub serial: Option<String>,
    pub identity: Option<CarIdentity>,
    pub passes: Vec<Pass>,
    pub best_speed: Option<f32>,
    pub best_lap: Option<Duration>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl CarSession {
    #[must_use]
    pub fn new(key: SessionKey, date_time: DateTime<Utc>) -> CarSession {
        CarSession {
            key,
            serial: None,
            identity: None,
            passes: vec![],
            best_speed: None,
            best_lap: None,
            first_seen: date_time,
            last_seen: date_time,
        }
    }

    pub fn record_pass(&mut self, date_time: DateTime<Utc>, speed: f32) -> &Pass {
        let lap_time = self.passes.last().map(|previous| date_time - previous.date_time);
        self.best_speed = Some(self.best_speed.map_or(speed, |best| best.max(speed)));
        if let Some(lap_time) = lap_time {
            self.best_lap = Some(self.best_lap.map_or(lap_time, |best| best.min(lap_time)));
        }
        self.last_seen = date_time;
        self.passes.push(Pass {
            date_time,
            speed,
            lap_time,
        });
        &self.passes[self.passes.len() - 1]
    }

    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn lap_times(&self) -> impl Iterator<Item = Duration> + '_ {
        self.passes.iter().filter_map(|pass| pass.lap_time)
    }

    #[must_use]
    pub fn last_speed(&self) -> Option<f32> {
        self.passes.last().map(|pass| pass.speed)
    }

    #[must_use]
    pub fn average_lap(&self) -> Option<Duration> {
        let laps: Vec<Duration> = self.lap_times().collect();
        let count = i32::try_from(laps.len()).ok().filter(|&n| n > 0)?;
        let total = laps.into_iter().fold(Duration::zero(), |acc, lap| acc + lap);
        Some(total / count)
    }

    #[must_use]
    pub fn average_speed(&self) -> Option<f32> {
        if self.passes.is_empty() {
            return None;
        }
        let total: f32 = self.passes.iter().map(|pass| pass.speed).sum();
        Some(total / self.passes.len() as f32)
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct RecentPass {
    pub key: SessionKey,
    pub pass: Pass,
}

#[derive(Default)]
pub struct SessionTracker {
    sessions: Vec<CarSession>,
    index: HashMap<CarUid, usize>,
    unknown: Option<CarSession>,
    current: Option<CarUid>,
    recent: VecDeque<RecentPass>,
    total_passes: usize,
}

impl SessionTracker {
    pub fn handle(&mut self, record: &EventRecord) {
        let date_time = record.date_time;
        match &record.event {
            PortalEvent::CarDetected { uid } => self.car_detected(*uid, date_time),
            PortalEvent::CarRemoved => {
                if let Some(uid) = self.current.take() {
                    debug!("[SessionTracker] {uid} left the portal");
                }
            }
            PortalEvent::SerialNumber { text } => {
                if let Some(session) = self.current_mut() {
                    session.serial = Some(text.clone());
                }
            }
            PortalEvent::NdefPayload { record, .. } => {
                if let (Some(identity), Some(session)) = (record.identity, self.current_mut()) {
                    session.identity = Some(identity);
                }
            }
            PortalEvent::SpeedSample { value } => self.speed_sample(*value, date_time),
            PortalEvent::ControlRegister { .. } => {}
        }
    }

    fn car_detected(&mut self, uid: CarUid, date_time: DateTime<Utc>) {
        let index = *self.index.entry(uid).or_insert_with(|| {
            debug!("[SessionTracker] new car {uid}");
            self.sessions
                .push(CarSession::new(SessionKey::Car(uid), date_time));
            self.sessions.len() - 1
        });
        self.sessions[index].last_seen = date_time;
        self.current = Some(uid);
    }

    fn speed_sample(&mut self, speed: f32, date_time: DateTime<Utc>) {
        let session = match self.current.and_then(|uid| self.index.get(&uid).copied()) {
            Some(index) => &mut self.sessions[index],
            None => {
                debug!("[SessionTracker] speed {speed:.1} with no car on the portal");
                self.unknown
                    .get_or_insert_with(|| CarSession::new(SessionKey::Unknown, date_time))
            }
        };
        let key = session.key;
        let pass = session.record_pass(date_time, speed).clone();
        self.total_passes += 1;
        if self.recent.len() == RECENT_PASSES {
            self.recent.pop_front();
        }
        self.recent.push_back(RecentPass { key, pass });
    }

    fn current_mut(&mut self) -> Option<&mut CarSession> {
        let index = self.index.get(&self.current?).copied()?;
        self.sessions.get_mut(index)
    }

    #[must_use]
    pub fn current(&self) -> Option<&CarSession> {
        let index = self.index.get(&self.current?).copied()?;
        self.sessions.get(index)
    }

    /// Key that the next speed sample would be credited to.
    #[must_use]
    pub fn current_key(&self) -> SessionKey {
        self.current.map_or(SessionKey::Unknown, SessionKey::Car)
    }

    #[must_use]
    pub fn session(&self, uid: &CarUid) -> Option<&CarSession> {
        self.index.get(uid).and_then(|&index| self.sessions.get(index))
    }

    /// Car sessions in the order the cars were first seen.
    #[must_use]
    pub fn sessions(&self) -> &[CarSession] {
        &self.sessions
    }

    #[must_use]
    pub fn unknown(&self) -> Option<&CarSession> {
        self.unknown.as_ref()
    }

    /// The last [`RECENT_PASSES`] passes across every session, oldest first.
    pub fn recent_passes(&self) -> impl DoubleEndedIterator<Item = &RecentPass> {
        self.recent.iter()
    }

    #[must_use]
    pub fn total_passes(&self) -> usize {
        self.total_passes
    }
}

impl Listener for SessionTracker {
    fn on_event(&mut self, record: &EventRecord) {
        self.handle(record);
    }
}

#[cfg(test)]
mod test {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::{
        car::CarUid,
        event::{EventRecord, PortalEvent},
        ndef::{CarIdentity, NdefRecord},
    };

    use super::{RECENT_PASSES, SessionKey, SessionTracker};

    const U1: CarUid = CarUid([1, 1, 1, 1, 1, 1]);
    const U2: CarUid = CarUid([2, 2, 2, 2, 2, 2]);

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn feed(tracker: &mut SessionTracker, millis: i64, event: PortalEvent) {
        tracker.handle(&EventRecord::new(at(millis), event));
    }

    #[test]
    fn starting_state() {
        let tracker = SessionTracker::default();
        assert!(tracker.current().is_none());
        assert!(tracker.sessions().is_empty());
        assert_eq!(tracker.current_key(), SessionKey::Unknown);
        assert_eq!(tracker.total_passes(), 0);
    }

    #[test]
    fn best_speed_survives_removal() {
        let mut tracker = SessionTracker::default();
        feed(&mut tracker, 0, PortalEvent::CarDetected { uid: U1 });
        feed(&mut tracker, 1000, PortalEvent::SpeedSample { value: 30.0 });
        feed(&mut tracker, 2000, PortalEvent::SpeedSample { value: 50.0 });
        feed(&mut tracker, 3000, PortalEvent::CarRemoved);

        assert!(tracker.current().is_none());
        let session = tracker.session(&U1).unwrap();
        assert_eq!(session.best_speed, Some(50.0));
        let speeds: Vec<f32> = session.passes.iter().map(|pass| pass.speed).collect();
        assert_eq!(speeds, vec![30.0, 50.0]);
    }

    #[test]
    fn lap_times_are_gaps_between_passes() {
        let mut tracker = SessionTracker::default();
        feed(&mut tracker, 0, PortalEvent::CarDetected { uid: U1 });
        feed(&mut tracker, 10_000, PortalEvent::SpeedSample { value: 40.0 });
        feed(&mut tracker, 14_200, PortalEvent::SpeedSample { value: 42.0 });
        feed(&mut tracker, 18_100, PortalEvent::SpeedSample { value: 44.0 });

        let session = tracker.current().unwrap();
        assert_eq!(session.passes[0].lap_time, None);
        assert_eq!(
            session.lap_times().collect::<Vec<_>>(),
            vec![Duration::milliseconds(4200), Duration::milliseconds(3900)]
        );
        assert_eq!(session.best_lap, Some(Duration::milliseconds(3900)));
        assert_eq!(session.average_lap(), Some(Duration::milliseconds(4050)));
        assert_eq!(session.average_speed(), Some(42.0));
        assert_eq!(session.last_speed(), Some(44.0));
    }

    #[test]
    fn first_pass_has_no_best_lap() {
        let mut tracker = SessionTracker::default();
        feed(&mut tracker, 0, PortalEvent::CarDetected { uid: U1 });
        feed(&mut tracker, 500, PortalEvent::SpeedSample { value: 40.0 });
        assert_eq!(tracker.current().unwrap().best_lap, None);
        assert_eq!(tracker.current().unwrap().average_lap(), None);
    }

    #[test]
    fn speed_without_a_car_goes_to_unknown() {
        let mut tracker = SessionTracker::default();
        feed(&mut tracker, 0, PortalEvent::SpeedSample { value: 12.0 });
        let unknown = tracker.unknown().unwrap();
        assert_eq!(unknown.key, SessionKey::Unknown);
        assert_eq!(unknown.pass_count(), 1);
        assert!(tracker.sessions().is_empty());
        assert_eq!(tracker.total_passes(), 1);
    }

    #[test]
    fn repeated_removal_is_harmless() {
        let mut tracker = SessionTracker::default();
        feed(&mut tracker, 0, PortalEvent::CarRemoved);
        feed(&mut tracker, 1, PortalEvent::CarRemoved);
        assert!(tracker.current().is_none());
        assert!(tracker.sessions().is_empty());
        assert!(tracker.unknown().is_none());
    }

    #[test]
    fn returning_car_resumes_its_session() {
        let mut tracker = SessionTracker::default();
        feed(&mut tracker, 0, PortalEvent::CarDetected { uid: U1 });
        feed(&mut tracker, 1000, PortalEvent::SpeedSample { value: 10.0 });
        feed(&mut tracker, 2000, PortalEvent::CarDetected { uid: U2 });
        feed(&mut tracker, 3000, PortalEvent::SpeedSample { value: 20.0 });
        feed(&mut tracker, 4000, PortalEvent::CarDetected { uid: U1 });
        feed(&mut tracker, 5000, PortalEvent::SpeedSample { value: 30.0 });

        let keys: Vec<SessionKey> = tracker.sessions().iter().map(|s| s.key).collect();
        assert_eq!(keys, vec![SessionKey::Car(U1), SessionKey::Car(U2)]);
        let first = tracker.session(&U1).unwrap();
        assert_eq!(first.pass_count(), 2);
        assert_eq!(first.best_lap, Some(Duration::seconds(4)));
        assert_eq!(first.last_seen, at(5000));
        assert_eq!(tracker.session(&U2).unwrap().pass_count(), 1);
    }

    #[test]
    fn serial_and_identity_attach_to_current_car() {
        let mut tracker = SessionTracker::default();
        feed(&mut tracker, 0, PortalEvent::SerialNumber { text: "lost".into() });
        feed(&mut tracker, 1, PortalEvent::CarDetected { uid: U1 });
        feed(&mut tracker, 2, PortalEvent::SerialNumber { text: "HW123".into() });
        let identity = CarIdentity {
            version: 2,
            model_id: 7,
            flags: 0,
            uid: U1,
        };
        let record = NdefRecord {
            identity: Some(identity),
            ..NdefRecord::default()
        };
        feed(&mut tracker, 3, PortalEvent::NdefPayload { raw: vec![], record });

        let session = tracker.session(&U1).unwrap();
        assert_eq!(session.serial.as_deref(), Some("HW123"));
        assert_eq!(session.identity, Some(identity));
    }

    #[test]
    fn recent_passes_are_capped() {
        let mut tracker = SessionTracker::default();
        feed(&mut tracker, 0, PortalEvent::CarDetected { uid: U1 });
        for i in 0..15 {
            feed(&mut tracker, 1000 * (i + 1), PortalEvent::SpeedSample { value: i as f32 });
        }
        assert_eq!(tracker.total_passes(), 15);
        let recent: Vec<f32> = tracker.recent_passes().map(|r| r.pass.speed).collect();
        assert_eq!(recent.len(), RECENT_PASSES);
        assert_eq!(recent.first(), Some(&5.0));
        assert_eq!(recent.last(), Some(&14.0));
    }
}
