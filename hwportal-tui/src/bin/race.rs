use std::{cell::RefCell, error::Error, rc::Rc};

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use crossterm::event::KeyCode;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table},
};
use tokio::time;
use tracing::info;

use hwportal_domain::{
    chrono_extra::Seconds,
    dispatch::Dispatcher,
    portal_session::PortalSession,
    race::{DEFAULT_COUNTDOWN_SECS, DEFAULT_LAPS, LAP_PRESETS, RaceGame, RaceInput, RaceState},
};
use hwportal_link::NotificationSource;
use hwportal_tui::{
    PortalArgs, PortalSource, TICK, Term, init_logging, lap, read_key, restore_terminal, runtime,
    setup_terminal, speed,
};

const MAX_NAME_LEN: usize = 16;
const LEADERBOARD_ROWS: usize = 10;

/// Lap race against the clock on a portal.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    portal: PortalArgs,

    /// seconds of countdown before the race starts
    #[arg(short, long, default_value_t = DEFAULT_COUNTDOWN_SECS)]
    countdown: i64,

    /// laps preselected on the setup screen
    #[arg(short = 'n', long, default_value_t = DEFAULT_LAPS)]
    laps: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.portal.log.as_deref())?;
    let game = RaceGame::new(Duration::seconds(args.countdown.max(0)));
    let mut source = PortalSource::open(&args.portal).await?;
    let mut terminal = setup_terminal().context("setup failed")?;
    let result = run(&mut terminal, &mut source, game, Controls::new(args.laps)).await;
    restore_terminal(&mut terminal).context("restore terminal failed")?;
    source.close().await?;
    result
}

#[derive(Debug, PartialEq)]
enum Action {
    Continue,
    Quit,
    Input(RaceInput),
}

/// Keyboard state that lives outside the game: the name being typed and
/// the lap count being chosen.
struct Controls {
    name: String,
    laps: u32,
}

impl Controls {
    fn new(laps: u32) -> Controls {
        Controls {
            name: String::new(),
            laps: laps.max(1),
        }
    }

    fn on_key(&mut self, state: RaceState, code: KeyCode) -> Action {
        match (state, code) {
            (RaceState::NameEntry, KeyCode::Enter) => {
                Action::Input(RaceInput::SubmitName(self.name.clone()))
            }
            (RaceState::NameEntry, KeyCode::Esc) => Action::Input(RaceInput::Cancel),
            (RaceState::NameEntry, KeyCode::Backspace) => {
                self.name.pop();
                Action::Continue
            }
            (RaceState::NameEntry, KeyCode::Char(c)) => {
                if self.name.chars().count() < MAX_NAME_LEN && !c.is_control() {
                    self.name.push(c);
                }
                Action::Continue
            }
            (_, KeyCode::Char('q')) | (RaceState::Menu, KeyCode::Esc) => Action::Quit,
            (RaceState::Menu, KeyCode::Enter | KeyCode::Char('s')) => {
                Action::Input(RaceInput::Start)
            }
            (RaceState::Setup, KeyCode::Left | KeyCode::Down) => {
                self.laps = LAP_PRESETS
                    .iter()
                    .rev()
                    .find(|&&preset| preset < self.laps)
                    .copied()
                    .unwrap_or(self.laps);
                Action::Continue
            }
            (RaceState::Setup, KeyCode::Right | KeyCode::Up) => {
                self.laps = LAP_PRESETS
                    .iter()
                    .find(|&&preset| preset > self.laps)
                    .copied()
                    .unwrap_or(self.laps);
                Action::Continue
            }
            (RaceState::Setup, KeyCode::Enter) => {
                Action::Input(RaceInput::ConfirmSetup { laps: self.laps })
            }
            (RaceState::Setup, KeyCode::Esc) => Action::Input(RaceInput::Cancel),
            (RaceState::Leaderboard, KeyCode::Enter) => Action::Input(RaceInput::Acknowledge),
            (RaceState::Leaderboard, KeyCode::Char('c')) => {
                Action::Input(RaceInput::ClearLeaderboard)
            }
            _ => Action::Continue,
        }
    }
}

async fn run(
    terminal: &mut Term,
    source: &mut PortalSource,
    game: RaceGame,
    mut controls: Controls,
) -> Result<(), Box<dyn Error>> {
    let session = Rc::new(RefCell::new(PortalSession::new(game)));
    let mut dispatcher = Dispatcher::default().with_listener(Box::new(session.clone()));
    let start = Utc::now();
    let describe = source.describe();
    let mut connected = true;

    loop {
        let now = Utc::now();
        session.borrow_mut().tick(now);
        terminal.draw(|f| {
            let status = if connected { "connected" } else { "disconnected" };
            let header = Paragraph::new(format!(
                "{describe} [{status}]\nRun time: {}",
                runtime(start, now)
            ))
            .block(Block::default().title("Portal").borders(Borders::ALL));
            render(f, &session.borrow(), &controls, header, now);
        })?;

        tokio::select! {
            next = source.next_notification(), if connected => match next? {
                Some(notification) => {
                    dispatcher.dispatch(&notification);
                }
                None => connected = false,
            },
            _ = time::sleep(TICK) => {}
        }

        while let Some(key) = read_key()? {
            let state = session.borrow().race.state();
            match controls.on_key(state, key.code) {
                Action::Continue => {}
                Action::Quit => return Ok(()),
                Action::Input(input) => {
                    let next = session.borrow_mut().race_input(input, Utc::now());
                    if next != state {
                        info!("[Race] {state:?} -> {next:?}");
                    }
                }
            }
        }
    }
}

fn render(
    f: &mut Frame,
    session: &PortalSession,
    controls: &Controls,
    header: Paragraph,
    now: DateTime<Utc>,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(8),
            Constraint::Length(3),
        ])
        .split(f.area());
    f.render_widget(header, rows[0]);

    let game = &session.race;
    let hint = match game.state() {
        RaceState::Menu => "Enter: start a race   q: quit",
        RaceState::NameEntry => "type your name   Enter: confirm   Esc: back",
        RaceState::Setup => "Left/Right: laps   Enter: start countdown   Esc: back",
        // Finished settles into Leaderboard within the same input, so it is never drawn.
        RaceState::Countdown | RaceState::Racing | RaceState::Finished => "q: quit",
        RaceState::Leaderboard => "Enter: back to menu   c: clear leaderboard   q: quit",
    };
    f.render_widget(
        Paragraph::new(hint).block(Block::default().borders(Borders::ALL)),
        rows[2],
    );

    let body = rows[1];
    match game.state() {
        RaceState::Menu => {
            let parts = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(5), Constraint::Min(3)])
                .split(body);
            let title = Paragraph::new(vec![
                Line::from("HOT LAPS").style(Style::default().add_modifier(Modifier::BOLD)),
                Line::from(""),
                Line::from("Put a car on the portal and press Enter"),
            ])
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
            f.render_widget(title, parts[0]);
            f.render_widget(leaderboard(game, "Leaderboard"), parts[1]);
        }
        RaceState::NameEntry => {
            let prompt = Paragraph::new(format!("Driver name: {}_", controls.name))
                .block(Block::default().title("Who is racing?").borders(Borders::ALL));
            f.render_widget(prompt, body);
        }
        RaceState::Setup => {
            let presets: Vec<Span> = LAP_PRESETS
                .iter()
                .map(|&preset| {
                    let style = if preset == controls.laps {
                        Style::default().add_modifier(Modifier::REVERSED)
                    } else {
                        Style::default()
                    };
                    Span::styled(format!(" {preset} "), style)
                })
                .collect();
            let setup = Paragraph::new(vec![
                Line::from(format!("Driver: {}", game.player().unwrap_or("-"))),
                Line::from(""),
                Line::from(format!("Laps: {}", controls.laps)),
                Line::from(presets),
            ])
            .block(Block::default().title("Race setup").borders(Borders::ALL));
            f.render_widget(setup, body);
        }
        RaceState::Countdown => {
            let remaining = game.countdown_remaining(now).unwrap_or_else(Duration::zero);
            let seconds = (remaining.num_milliseconds() + 999) / 1000;
            let countdown = Paragraph::new(vec![
                Line::from(""),
                Line::from(seconds.to_string())
                    .style(Style::default().add_modifier(Modifier::BOLD)),
                Line::from(""),
                Line::from(format!(
                    "{} laps, get ready {}",
                    game.target_laps(),
                    game.player().unwrap_or("")
                )),
            ])
            .alignment(Alignment::Center)
            .block(Block::default().title("Countdown").borders(Borders::ALL));
            f.render_widget(countdown, body);
        }
        RaceState::Racing | RaceState::Finished => render_race(f, session, body, now),
        RaceState::Leaderboard => {
            let parts = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(6), Constraint::Min(3)])
                .split(body);
            f.render_widget(last_result(game), parts[0]);
            f.render_widget(leaderboard(game, "Leaderboard"), parts[1]);
        }
    }
}

fn render_race(f: &mut Frame, session: &PortalSession, area: Rect, now: DateTime<Utc>) {
    let game = &session.race;
    let Some(race) = game.race() else {
        return;
    };
    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(5)])
        .split(area);

    let done = race.laps_completed();
    let target = game.target_laps();
    let ratio = if target == 0 {
        0.0
    } else {
        (done as f64 / f64::from(target)).min(1.0)
    };
    let gauge = Gauge::default()
        .block(Block::default().title(format!("Lap {done}/{target}")).borders(Borders::ALL))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio);
    f.render_widget(gauge, parts[0]);

    let current_lap = match race.last_crossing {
        Some(crossing) => lap(Some(now - crossing)),
        None => "waiting for the first pass".to_string(),
    };
    let mut lines = vec![
        Line::from(format!("Driver:      {}", game.player().unwrap_or("-"))),
        Line::from(format!("Car:         {}", session.tracker.current_key())),
        Line::from(format!("Current lap: {current_lap}")),
        Line::from(format!("Last lap:    {}", lap(race.lap_times.last().copied()))),
        Line::from(format!("Best lap:    {}", lap(race.best_lap()))),
        Line::from(format!("Speed:       {}", speed(race.last_speed))),
        Line::from(""),
    ];
    let best = race.best_lap();
    for (number, time) in race.lap_times.iter().enumerate().rev() {
        let style = if Some(*time) == best {
            Style::default().fg(Color::Green)
        } else {
            Style::default()
        };
        lines.push(Line::styled(
            format!("  lap {:>2}  {:.2}s", number + 1, time.as_secs_f64()),
            style,
        ));
    }
    f.render_widget(
        Paragraph::new(lines).block(Block::default().title("Racing").borders(Borders::ALL)),
        parts[1],
    );
}

fn last_result(game: &RaceGame) -> Paragraph<'static> {
    let block = Block::default().title("Result").borders(Borders::ALL);
    let Some(result) = game.last_result() else {
        return Paragraph::new("No race finished yet").block(block);
    };
    Paragraph::new(vec![
        Line::from(format!("{} on {}", result.player, result.car)),
        Line::from(format!(
            "Total {}   average {}",
            lap(Some(result.total)),
            lap(Some(result.average_lap))
        )),
        Line::from(format!(
            "Best lap {} ({})   worst lap {} ({})",
            result.best_lap_number,
            lap(Some(result.best_lap)),
            result.worst_lap_number,
            lap(Some(result.worst_lap))
        )),
    ])
    .block(block)
}

fn leaderboard(game: &RaceGame, title: &'static str) -> Table<'static> {
    let latest = game.last_result();
    let rows: Vec<Row> = game
        .leaderboard()
        .ranked()
        .iter()
        .take(LEADERBOARD_ROWS)
        .enumerate()
        .map(|(rank, result)| {
            let style = if Some(result) == latest {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(format!("{}", rank + 1)),
                Cell::from(result.player.clone()),
                Cell::from(result.car.to_string()),
                Cell::from(result.lap_times.len().to_string()),
                Cell::from(lap(Some(result.best_lap))),
                Cell::from(lap(Some(result.total))),
            ])
            .style(style)
        })
        .collect();
    Table::new(
        rows,
        &[
            Constraint::Length(4),
            Constraint::Length(17),
            Constraint::Length(18),
            Constraint::Length(5),
            Constraint::Length(9),
            Constraint::Length(9),
        ],
    )
    .block(Block::default().title(title).borders(Borders::ALL))
    .header(
        Row::new(vec!["#", "Driver", "Car", "Laps", "Best", "Total"])
            .style(Style::default().fg(Color::Yellow)),
    )
}
