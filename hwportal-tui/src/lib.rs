use std::{
    error::Error,
    fs::File,
    io::{self, Stdout},
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crossterm::{
    event::{self, Event, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use tokio::{fs, io::BufReader};

use hwportal_domain::{
    chrono_extra::{Seconds, Truncate},
    notification::RawNotification,
};
use hwportal_link::{
    NotificationSource,
    ble::{BlePortal, DeviceInfo, Target},
    replay::ReplayPortal,
};

/// How often the screen is redrawn when nothing arrives from the portal.
pub const TICK: Duration = Duration::from_millis(100);

pub type Term = Terminal<CrosstermBackend<Stdout>>;

#[derive(clap::Args, Debug)]
pub struct PortalArgs {
    /// connect to the portal with this address instead of the first one advertising as HWiD
    #[arg(short, long)]
    pub address: Option<String>,

    /// replay a JSON-lines capture (in real time) instead of connecting
    #[arg(short, long, conflicts_with = "address")]
    pub replay: Option<PathBuf>,

    /// seconds to scan for the portal before giving up
    #[arg(short, long, default_value_t = 10)]
    pub scan_timeout: u64,

    /// write logs to this file (RUST_LOG sets the level)
    #[arg(short, long)]
    pub log: Option<PathBuf>,
}

/// Either a live portal or a capture being replayed.
pub enum PortalSource {
    Ble(BlePortal),
    Replay(ReplayPortal<BufReader<fs::File>>),
}

impl PortalSource {
    pub async fn open(args: &PortalArgs) -> Result<PortalSource, Box<dyn Error>> {
        match &args.replay {
            Some(path) => Ok(PortalSource::Replay(ReplayPortal::open(path).await?.paced(true))),
            None => {
                let target = Target {
                    address: args.address.clone(),
                    scan_timeout: Duration::from_secs(args.scan_timeout),
                };
                Ok(PortalSource::Ble(BlePortal::connect(&target).await?))
            }
        }
    }

    #[must_use]
    pub fn info(&self) -> Option<&DeviceInfo> {
        match self {
            PortalSource::Ble(portal) => Some(portal.info()),
            PortalSource::Replay(_) => None,
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self.info() {
            Some(info) => format!(
                "{} {} (fw {})",
                info.name.as_deref().unwrap_or("portal"),
                info.address,
                info.firmware_version.as_deref().unwrap_or("?")
            ),
            None => "replay".to_string(),
        }
    }

    pub async fn close(self) -> Result<(), Box<dyn Error>> {
        match self {
            PortalSource::Ble(portal) => portal.disconnect().await,
            PortalSource::Replay(_) => Ok(()),
        }
    }
}

impl NotificationSource for PortalSource {
    async fn next_notification(&mut self) -> Result<Option<RawNotification>, Box<dyn Error>> {
        match self {
            PortalSource::Ble(portal) => portal.next_notification().await,
            PortalSource::Replay(replay) => replay.next_notification().await,
        }
    }
}

/// Logs go to a file, never to the terminal the UI is drawn on.
pub fn init_logging(path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let file = File::create(path).with_context(|| format!("unable to create {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

pub fn setup_terminal() -> Result<Term> {
    let mut stdout = io::stdout();
    enable_raw_mode().context("failed to enable raw mode")?;
    execute!(stdout, EnterAlternateScreen).context("unable to enter alternate screen")?;
    Terminal::new(CrosstermBackend::new(stdout)).context("creating terminal failed")
}

pub fn restore_terminal(terminal: &mut Term) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("unable to switch to main screen")?;
    terminal.show_cursor().context("unable to show cursor")
}

/// A pending key press, without blocking.
pub fn read_key() -> Result<Option<KeyEvent>> {
    while event::poll(Duration::ZERO).context("event poll failed")? {
        if let Event::Key(key) = event::read().context("event read failed")?
            && key.kind == KeyEventKind::Press
        {
            return Ok(Some(key));
        }
    }
    Ok(None)
}

#[must_use]
pub fn runtime(start: DateTime<Utc>, now: DateTime<Utc>) -> String {
    humantime::format_duration(
        (now - start)
            .truncate_to_seconds()
            .to_std()
            .unwrap_or_default(),
    )
    .to_string()
}

#[must_use]
pub fn lap(duration: Option<chrono::Duration>) -> String {
    duration.map_or("-".to_string(), |d| format!("{:.2}s", d.as_secs_f64()))
}

#[must_use]
pub fn speed(value: Option<f32>) -> String {
    value.map_or("-".to_string(), |v| format!("{v:.1}"))
}

/// A stable color per car so the same car reads the same everywhere.
#[must_use]
pub fn car_style(uid_byte: u8) -> Style {
    Style::default().fg(Color::Indexed(uid_byte))
}
