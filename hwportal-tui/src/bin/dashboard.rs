use std::{cell::RefCell, error::Error, rc::Rc};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use crossterm::event::KeyCode;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table},
};
use tokio::time;

use hwportal_domain::{
    dispatch::Dispatcher,
    portal_session::PortalSession,
    session::{CarSession, SessionKey},
};
use hwportal_link::NotificationSource;
use hwportal_tui::{
    PortalArgs, PortalSource, TICK, Term, car_style, init_logging, lap, read_key, restore_terminal,
    runtime, setup_terminal, speed,
};

/// Live view of every car that has been on the portal.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    portal: PortalArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.portal.log.as_deref())?;
    let mut source = PortalSource::open(&args.portal).await?;
    let mut terminal = setup_terminal().context("setup failed")?;
    let result = run(&mut terminal, &mut source).await;
    restore_terminal(&mut terminal).context("restore terminal failed")?;
    source.close().await?;
    result
}

async fn run(terminal: &mut Term, source: &mut PortalSource) -> Result<(), Box<dyn Error>> {
    let session = Rc::new(RefCell::new(PortalSession::default()));
    let mut dispatcher = Dispatcher::default().with_listener(Box::new(session.clone()));
    let start = Utc::now();
    let describe = source.describe();
    let mut connected = true;

    loop {
        terminal.draw(|f| {
            let now = Utc::now();
            let status = if connected { "connected" } else { "disconnected" };
            let header = Paragraph::new(format!(
                "{describe} [{status}]\nNow: {now}, Total Run time: {}  (press 'q' to quit)",
                runtime(start, now)
            ))
            .block(Block::default().title("Portal").borders(Borders::ALL));
            render(f, &session.borrow(), header, now);
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

        if let Some(key) = read_key()?
            && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
        {
            break;
        }
    }
    Ok(())
}

fn render(f: &mut Frame, session: &PortalSession, header: Paragraph, now: DateTime<Utc>) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(9),
            Constraint::Min(5),
        ])
        .split(f.area());
    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[1]);

    f.render_widget(header, rows[0]);
    f.render_widget(current_car(session, now), middle[0]);
    f.render_widget(recent_passes(session), middle[1]);
    f.render_widget(sessions_table(session), rows[2]);
}

fn key_style(key: &SessionKey) -> Style {
    match key {
        SessionKey::Car(uid) => car_style(uid.as_bytes()[5]),
        SessionKey::Unknown => Style::default().fg(Color::DarkGray),
    }
}

fn current_car(session: &PortalSession, now: DateTime<Utc>) -> Paragraph<'static> {
    let block = Block::default().title("On the portal").borders(Borders::ALL);
    let Some(car) = session.tracker.current() else {
        return Paragraph::new("No car on the portal").block(block);
    };
    let model = car
        .identity
        .map_or("-".to_string(), |identity| format!("{:#010x}", identity.model_id));
    let since = (now - car.last_seen).to_std().unwrap_or_default();
    let lines = vec![
        Line::styled(car.key.to_string(), key_style(&car.key).add_modifier(Modifier::BOLD)),
        Line::from(format!("Serial:     {}", car.serial.as_deref().unwrap_or("-"))),
        Line::from(format!("Model:      {model}")),
        Line::from(format!("Passes:     {}", car.pass_count())),
        Line::from(format!(
            "Speed:      {} (best {})",
            speed(car.last_speed()),
            speed(car.best_speed)
        )),
        Line::from(format!(
            "Lap:        best {} avg {}",
            lap(car.best_lap),
            lap(car.average_lap())
        )),
        Line::from(format!("Last seen:  {}s ago", since.as_secs())),
    ];
    Paragraph::new(lines).block(block)
}

fn recent_passes(session: &PortalSession) -> List<'static> {
    let items: Vec<ListItem> = session
        .tracker
        .recent_passes()
        .rev()
        .map(|recent| {
            ListItem::new(format!(
                "{} {:<17} {:>7} {:>7}",
                recent.pass.date_time.format("%H:%M:%S"),
                recent.key.to_string(),
                speed(Some(recent.pass.speed)),
                lap(recent.pass.lap_time)
            ))
            .style(key_style(&recent.key))
        })
        .collect();
    List::new(items).block(
        Block::default()
            .title(format!("Recent passes ({} total)", session.tracker.total_passes()))
            .borders(Borders::ALL),
    )
}

fn sessions_table(session: &PortalSession) -> Table<'static> {
    let tracker = &session.tracker;
    let current = tracker.current_key();
    let rows: Vec<Row> = tracker
        .sessions()
        .iter()
        .chain(tracker.unknown())
        .map(|car: &CarSession| {
            let mut style = key_style(&car.key);
            if car.key == current && current != SessionKey::Unknown {
                style = style.add_modifier(Modifier::REVERSED);
            }
            Row::new(vec![
                Cell::from(car.key.to_string()),
                Cell::from(car.serial.clone().unwrap_or_default()),
                Cell::from(car.pass_count().to_string()),
                Cell::from(speed(car.best_speed)),
                Cell::from(speed(car.average_speed())),
                Cell::from(lap(car.best_lap)),
                Cell::from(lap(car.average_lap())),
            ])
            .style(style)
        })
        .collect();
    let failures = session.decode_failures();
    let title = if failures == 0 {
        "Cars".to_string()
    } else {
        format!("Cars ({failures} undecodable notifications)")
    };
    Table::new(
        rows,
        &[
            Constraint::Length(18),
            Constraint::Length(16),
            Constraint::Length(7),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(9),
            Constraint::Length(9),
        ],
    )
    .block(Block::default().title(title).borders(Borders::ALL))
    .header(
        Row::new(vec!["Car", "Serial", "Passes", "Best", "Avg", "Best Lap", "Avg Lap"])
            .style(Style::default().fg(Color::Yellow)),
    )
}
