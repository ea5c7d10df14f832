//! Lap race game.
//!
//! ```text
//! Menu --Start--> NameEntry --SubmitName--> Setup --ConfirmSetup--> Countdown
//!   ^                                                                  |
//!   |                                                            tick (elapsed)
//!   |                                                                  v
//! Leaderboard <--(immediate)-- Finished <--target laps reached-- Racing
//!   |
//!   +--Acknowledge--> Menu
//! ```
//!
//! During a race every pass through the portal is a crossing of the timing
//! line: the first one starts the clock and each later one completes a lap.
//! Inputs and events that do not apply to the current state are ignored.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, trace};

use crate::{
    event::{EventRecord, PortalEvent},
    session::SessionKey,
};

pub const DEFAULT_COUNTDOWN_SECS: i64 = 3;
pub const LAP_PRESETS: [u32; 4] = [5, 10, 15, 20];
pub const DEFAULT_LAPS: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RaceState {
    Menu,
    NameEntry,
    Setup,
    Countdown,
    Racing,
    Finished,
    Leaderboard,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RaceInput {
    Start,
    SubmitName(String),
    ConfirmSetup { laps: u32 },
    Acknowledge,
    Cancel,
    ClearLeaderboard,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RaceResult {
    pub player: String,
    pub car: SessionKey,
    pub lap_times: Vec<Duration>,
    pub total: Duration,
    pub best_lap: Duration,
    /// 1-based
    pub best_lap_number: usize,
    pub worst_lap: Duration,
    pub worst_lap_number: usize,
    pub average_lap: Duration,
    pub finished_at: DateTime<Utc>,
}

impl RaceResult {
    /// `None` when no lap was completed.
    #[must_use]
    pub fn new(
        player: String,
        car: SessionKey,
        lap_times: Vec<Duration>,
        finished_at: DateTime<Utc>,
    ) -> Option<RaceResult> {
        let count = i32::try_from(lap_times.len()).ok().filter(|&n| n > 0)?;
        let total = lap_times.iter().fold(Duration::zero(), |acc, &lap| acc + lap);
        // first occurrence wins on ties
        let (best_index, best_lap) = lap_times
            .iter()
            .copied()
            .enumerate()
            .reduce(|best, lap| if lap.1 < best.1 { lap } else { best })?;
        let (worst_index, worst_lap) = lap_times
            .iter()
            .copied()
            .enumerate()
            .reduce(|worst, lap| if lap.1 > worst.1 { lap } else { worst })?;
        Some(RaceResult {
            player,
            car,
            total,
            best_lap,
            best_lap_number: best_index + 1,
            worst_lap,
            worst_lap_number: worst_index + 1,
            average_lap: total / count,
            lap_times,
            finished_at,
        })
    }
}

/// Results ranked by best lap, ties going to whoever finished first.
#[derive(Default, Debug)]
pub struct Leaderboard {
    results: Vec<RaceResult>,
}

impl Leaderboard {
    pub fn record(&mut self, result: RaceResult) -> usize {
        let key = (result.best_lap, result.finished_at);
        let position = self
            .results
            .partition_point(|r| (r.best_lap, r.finished_at) <= key);
        self.results.insert(position, result);
        position
    }

    #[must_use]
    pub fn ranked(&self) -> &[RaceResult] {
        &self.results
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Timing state of the race in progress.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveRace {
    pub started_at: DateTime<Utc>,
    pub last_crossing: Option<DateTime<Utc>>,
    pub lap_times: Vec<Duration>,
    pub last_speed: Option<f32>,
    pub car: SessionKey,
}

impl ActiveRace {
    fn new(started_at: DateTime<Utc>) -> ActiveRace {
        ActiveRace {
            started_at,
            last_crossing: None,
            lap_times: vec![],
            last_speed: None,
            car: SessionKey::Unknown,
        }
    }

    #[must_use]
    pub fn laps_completed(&self) -> usize {
        self.lap_times.len()
    }

    #[must_use]
    pub fn best_lap(&self) -> Option<Duration> {
        self.lap_times.iter().min().copied()
    }
}

pub struct RaceGame {
    state: RaceState,
    countdown: Duration,
    countdown_started: Option<DateTime<Utc>>,
    player: Option<String>,
    target_laps: u32,
    race: Option<ActiveRace>,
    last_result: Option<RaceResult>,
    leaderboard: Leaderboard,
}

impl Default for RaceGame {
    fn default() -> RaceGame {
        RaceGame::new(Duration::seconds(DEFAULT_COUNTDOWN_SECS))
    }
}

impl RaceGame {
    #[must_use]
    pub fn new(countdown: Duration) -> RaceGame {
        RaceGame {
            state: RaceState::Menu,
            countdown,
            countdown_started: None,
            player: None,
            target_laps: DEFAULT_LAPS,
            race: None,
            last_result: None,
            leaderboard: Leaderboard::default(),
        }
    }

    pub fn input(&mut self, input: RaceInput, now: DateTime<Utc>) -> RaceState {
        match (self.state, input) {
            (RaceState::Menu, RaceInput::Start) => self.state = RaceState::NameEntry,
            (RaceState::NameEntry, RaceInput::SubmitName(name)) => {
                let name = name.trim();
                if name.is_empty() {
                    trace!("[RaceGame] blank name, still waiting");
                } else {
                    self.player = Some(name.to_string());
                    self.state = RaceState::Setup;
                }
            }
            (RaceState::NameEntry | RaceState::Setup, RaceInput::Cancel) => {
                self.state = RaceState::Menu;
            }
            (RaceState::Setup, RaceInput::ConfirmSetup { laps }) if laps > 0 => {
                self.target_laps = laps;
                self.countdown_started = Some(now);
                self.state = RaceState::Countdown;
            }
            (RaceState::Leaderboard, RaceInput::Acknowledge) => self.state = RaceState::Menu,
            (RaceState::Leaderboard, RaceInput::ClearLeaderboard) => self.leaderboard.clear(),
            (state, input) => trace!("[RaceGame] ignoring {input:?} in {state:?}"),
        }
        self.state
    }

    /// Advances the countdown; call regularly from the event loop.
    pub fn tick(&mut self, now: DateTime<Utc>) -> RaceState {
        if self.state == RaceState::Countdown
            && self.countdown_remaining(now) == Some(Duration::zero())
        {
            info!("[RaceGame] go! {} laps", self.target_laps);
            self.countdown_started = None;
            self.race = Some(ActiveRace::new(now));
            self.state = RaceState::Racing;
        }
        self.state
    }

    /// Feeds a portal event; `current` is the session the tracker credits
    /// passes to at this moment.
    pub fn on_event(&mut self, record: &EventRecord, current: SessionKey) -> RaceState {
        let PortalEvent::SpeedSample { value } = record.event else {
            return self.state;
        };
        if self.state != RaceState::Racing {
            return self.state;
        }
        let Some(race) = self.race.as_mut() else {
            return self.state;
        };
        race.last_speed = Some(value);
        race.car = current;
        if let Some(previous) = race.last_crossing {
            race.lap_times.push(record.date_time - previous);
        }
        race.last_crossing = Some(record.date_time);
        if race.lap_times.len() >= self.target_laps as usize {
            self.finish(record.date_time);
        }
        self.state
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        let Some(race) = self.race.take() else {
            return;
        };
        self.state = RaceState::Finished;
        let player = self.player.clone().unwrap_or_else(|| "Player".to_string());
        if let Some(result) = RaceResult::new(player, race.car, race.lap_times, now) {
            let position = self.leaderboard.record(result.clone());
            info!(
                "[RaceGame] {} finished in {}ms, best lap {}ms, ranked {}",
                result.player,
                result.total.num_milliseconds(),
                result.best_lap.num_milliseconds(),
                position + 1
            );
            self.last_result = Some(result);
        }
        self.state = RaceState::Leaderboard;
    }

    #[must_use]
    pub fn state(&self) -> RaceState {
        self.state
    }

    /// Time left before the race starts, `None` outside the countdown.
    #[must_use]
    pub fn countdown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started = self.countdown_started?;
        Some((self.countdown - (now - started)).max(Duration::zero()))
    }

    #[must_use]
    pub fn player(&self) -> Option<&str> {
        self.player.as_deref()
    }

    #[must_use]
    pub fn target_laps(&self) -> u32 {
        self.target_laps
    }

    #[must_use]
    pub fn race(&self) -> Option<&ActiveRace> {
        self.race.as_ref()
    }

    #[must_use]
    pub fn last_result(&self) -> Option<&RaceResult> {
        self.last_result.as_ref()
    }

    #[must_use]
    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }
}
