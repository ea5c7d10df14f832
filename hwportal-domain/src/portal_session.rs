use chrono::{DateTime, Utc};

use crate::{
    dispatch::{DecodeFailure, Listener},
    event::EventRecord,
    race::{RaceGame, RaceInput, RaceState},
    session::SessionTracker,
};

/// Everything known about one connection to a portal.
#[derive(Default)]
pub struct PortalSession {
    pub tracker: SessionTracker,
    pub race: RaceGame,
    decode_failures: usize,
    last_failure: Option<DecodeFailure>,
}

impl PortalSession {
    #[must_use]
    pub fn new(race: RaceGame) -> PortalSession {
        PortalSession {
            race,
            ..PortalSession::default()
        }
    }

    pub fn race_input(&mut self, input: RaceInput, now: DateTime<Utc>) -> RaceState {
        self.race.input(input, now)
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> RaceState {
        self.race.tick(now)
    }

    #[must_use]
    pub fn decode_failures(&self) -> usize {
        self.decode_failures
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<&DecodeFailure> {
        self.last_failure.as_ref()
    }
}

impl Listener for PortalSession {
    fn on_event(&mut self, record: &EventRecord) {
        self.tracker.handle(record);
        self.race.on_event(record, self.tracker.current_key());
    }

    fn on_decode_error(&mut self, failure: &DecodeFailure) {
        self.decode_failures += 1;
        self.last_failure = Some(failure.clone());
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::{
        car::CarUid,
        dispatch::Dispatcher,
        notification::RawNotification,
        protocol::Channel,
        race::{RaceGame, RaceInput, RaceState},
        session::SessionKey,
    };

    use super::PortalSession;

    const UID: [u8; 6] = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55];

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn speed(millis: i64, value: f32) -> RawNotification {
        RawNotification::on_channel(at(millis), Channel::Speed, &(value / 64.0).to_le_bytes())
    }

    #[test]
    fn race_credits_the_car_on_the_portal() {
        let session = Rc::new(RefCell::new(PortalSession::new(RaceGame::new(
            Duration::seconds(1),
        ))));
        let mut dispatcher = Dispatcher::default().with_listener(Box::new(session.clone()));

        {
            let mut session = session.borrow_mut();
            session.race_input(RaceInput::Start, at(0));
            session.race_input(RaceInput::SubmitName("Ada".into()), at(0));
            session.race_input(RaceInput::ConfirmSetup { laps: 1 }, at(0));
            assert_eq!(session.tick(at(1000)), RaceState::Racing);
        }

        let mut detect = vec![0x04];
        detect.extend_from_slice(&UID);
        dispatcher.dispatch(&RawNotification::on_channel(at(1500), Channel::CarDetect, &detect));
        dispatcher.dispatch(&speed(2000, 40.0));
        dispatcher.dispatch(&speed(6000, 42.0));

        let session = session.borrow();
        assert_eq!(session.race.state(), RaceState::Leaderboard);
        let result = session.race.last_result().unwrap();
        assert_eq!(result.car, SessionKey::Car(CarUid(UID)));
        assert_eq!(result.best_lap, Duration::seconds(4));
        assert_eq!(session.tracker.total_passes(), 2);
    }

    #[test]
    fn decode_failures_are_counted() {
        let session = Rc::new(RefCell::new(PortalSession::default()));
        let mut dispatcher = Dispatcher::default().with_listener(Box::new(session.clone()));
        dispatcher.dispatch(&RawNotification::on_channel(at(0), Channel::Speed, &[1]));
        dispatcher.dispatch(&speed(1000, 30.0));

        let session = session.borrow();
        assert_eq!(session.decode_failures(), 1);
        assert_eq!(session.last_failure().map(|f| f.channel), Some(Channel::Speed));
        assert_eq!(session.tracker.total_passes(), 1);
    }
}
