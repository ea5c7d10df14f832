use std::{cell::RefCell, error::Error, fs::File, path::PathBuf, rc::Rc, time::Duration};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info};

use hwportal_domain::{
    chrono_extra::{Seconds, Truncate},
    dispatch::{Dispatch, Dispatcher},
    notification::RawNotification,
    portal_session::PortalSession,
    protocol::characteristic_name,
    session::CarSession,
};
use hwportal_link::{
    NotificationSource,
    ble::{self, Advertisement, BlePortal, GattCharacteristic, Target},
    replay::ReplayPortal,
};
use hwportal_sinks::history::{EventSink, jsonl::JsonLinesEventSink, noop::NoopEventSink};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// connect to the portal with this address instead of the first one advertising as HWiD
    #[arg(short, long)]
    address: Option<String>,

    /// replay a JSON-lines capture instead of connecting
    #[arg(short, long, conflicts_with = "address")]
    replay: Option<PathBuf>,

    /// path to a JSON-lines file to capture raw notifications to
    #[arg(short, long)]
    capture: Option<PathBuf>,

    /// seconds to scan for the portal before giving up
    #[arg(short, long, default_value_t = 10)]
    scan_timeout: u64,

    /// list nearby Bluetooth devices and exit
    #[arg(short, long, conflicts_with_all = ["address", "replay", "capture"])]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber with env filter support (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.list {
        let heard = ble::scan(Duration::from_secs(args.scan_timeout)).await?;
        print_advertisements(&heard);
        return Ok(());
    }
    let sink = sink(&args)?;
    match &args.replay {
        Some(path) => {
            let mut replay = ReplayPortal::open(path).await?;
            monitor(&mut replay, sink).await
        }
        None => {
            let target = Target {
                address: args.address.clone(),
                scan_timeout: Duration::from_secs(args.scan_timeout),
            };
            let mut portal = BlePortal::connect(&target).await?;
            print_device_info(&portal);
            let result = monitor(&mut portal, sink).await;
            portal.disconnect().await?;
            result
        }
    }
}

fn sink(args: &Args) -> Result<Box<dyn EventSink>, Box<dyn Error>> {
    match &args.capture {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("unable to create {}", path.display()))?;
            info!("capturing notifications to {}", path.display());
            Ok(Box::new(JsonLinesEventSink::create_from_writer(Box::new(file))))
        }
        None => Ok(Box::<NoopEventSink>::default()),
    }
}

async fn monitor<S: NotificationSource>(
    source: &mut S,
    sink: Box<dyn EventSink>,
) -> Result<(), Box<dyn Error>> {
    let start = Utc::now();
    let session = Rc::new(RefCell::new(PortalSession::default()));

    let (capture_tx, capture_rx) = mpsc::unbounded_channel();
    let capturing: JoinHandle<usize> = tokio::spawn(capture(sink, capture_rx));
    let mut dispatcher = Dispatcher::default().with_listener(Box::new(session.clone()));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break Ok(());
            }
            next = source.next_notification() => match next {
                Ok(Some(notification)) => {
                    if capture_tx.send(notification.clone()).is_err() {
                        error!("capture task stopped, notifications are no longer saved");
                    }
                    let outcome = dispatcher.dispatch(&notification);
                    println!("{}", outcome_line(&notification, &outcome));
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        }
    };

    drop(capture_tx);
    let captured = capturing.await?;

    print_summary(&session.borrow(), start, Utc::now(), captured);
    result
}

async fn capture(
    mut sink: Box<dyn EventSink>,
    mut notifications: mpsc::UnboundedReceiver<RawNotification>,
) -> usize {
    let mut saved = 0;
    while let Some(first) = notifications.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = notifications.try_recv() {
            batch.push(next);
        }
        match sink.save(&batch).await {
            Ok(()) => saved += batch.len(),
            Err(e) => error!("unable to save {} notifications: {e}", batch.len()),
        }
    }
    if let Err(e) = sink.close().await {
        error!("unable to close capture: {e}");
    }
    saved
}

/// One line per notification, including the ones that decode to nothing.
fn outcome_line(notification: &RawNotification, outcome: &Dispatch) -> String {
    let at = notification.date_time.format("%H:%M:%S%.3f");
    match outcome {
        Dispatch::Delivered(record) => format!("{at} {}", record.event),
        Dispatch::Rejected(failure) => format!(
            "{at} {} rejected ({}): {}",
            failure.channel,
            failure.error,
            notification.payload_hex()
        ),
        Dispatch::Ignored => format!(
            "{at} {}: {}",
            characteristic_name(notification.characteristic),
            notification.payload_hex()
        ),
    }
}

fn print_advertisements(heard: &[Advertisement]) {
    println!("\n{:<20} {:<24} {:>5}", "Address", "Name", "RSSI");
    println!("{}", "-".repeat(51));
    for advertisement in heard {
        println!(
            "{:<20} {:<24} {:>5}{}",
            advertisement.address,
            advertisement.name.as_deref().unwrap_or("-"),
            advertisement
                .rssi
                .map_or("-".to_string(), |rssi| rssi.to_string()),
            if advertisement.is_portal() { "  <- portal" } else { "" }
        );
    }
    println!("\n{} devices", heard.len());
}

fn print_device_info(portal: &BlePortal) {
    let info = portal.info();
    println!("\n=== Portal {} ===", info.address);
    println!("{:<18} {}", "Name", info.name.as_deref().unwrap_or("-"));
    println!(
        "{:<18} {}",
        "Firmware",
        info.firmware_version.as_deref().unwrap_or("-")
    );
    println!(
        "{:<18} {}",
        "Serial",
        info.serial_number.as_deref().unwrap_or("-")
    );
    match &info.device_key {
        Some(key) => println!("{:<18} {} bytes", "Device key", key.len()),
        None => println!("{:<18} -", "Device key"),
    }
    print_characteristics(&portal.characteristics());
    println!();
}

fn print_characteristics(characteristics: &[GattCharacteristic]) {
    println!("\n{:<18} {:<38} {}", "Characteristic", "UUID", "Properties");
    for c in characteristics {
        println!(
            "{:<18} {:<38} {}",
            characteristic_name(c.uuid),
            c.uuid,
            c.properties
        );
    }
}

fn print_summary(
    session: &PortalSession,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    captured: usize,
) {
    use humantime::format_duration;

    let runtime = format_duration(
        (now - start)
            .truncate_to_seconds()
            .to_std()
            .unwrap_or_default(),
    );
    println!("\n=== Session Summary at {} (Runtime: {}) ===", now, runtime);

    let tracker = &session.tracker;
    let sessions: Vec<&CarSession> = tracker.sessions().iter().chain(tracker.unknown()).collect();
    if !sessions.is_empty() {
        println!(
            "\n{:<18} {:<16} {:>6} {:>8} {:>8} {:>8}",
            "Car", "Serial", "Passes", "Best", "Avg Lap", "Best Lap"
        );
        println!("{}", "-".repeat(69));
        for car in sessions {
            println!(
                "{:<18} {:<16} {:>6} {:>8} {:>8} {:>8}",
                car.key.to_string(),
                car.serial.as_deref().unwrap_or("-"),
                car.pass_count(),
                car.best_speed.map_or("-".to_string(), |speed| format!("{speed:.1}")),
                lap(car.average_lap()),
                lap(car.best_lap),
            );
        }
    }

    println!(
        "\nTotal passes: {}, decode failures: {}, captured: {}",
        tracker.total_passes(),
        session.decode_failures(),
        captured
    );
}

fn lap(duration: Option<chrono::Duration>) -> String {
    duration.map_or("-".to_string(), |d| format!("{:.2}s", d.as_secs_f64()))
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};

    use hwportal_domain::{
        dispatch::Dispatcher,
        notification::RawNotification,
        protocol::{CHAR_AUTH_RESPONSE, Channel},
    };

    use super::outcome_line;

    fn line(notification: RawNotification) -> String {
        let outcome = Dispatcher::default().dispatch(&notification);
        outcome_line(&notification, &outcome)
    }

    #[test]
    fn decoded_events_are_printed() {
        let at = Utc.timestamp_millis_opt(3_250).unwrap();
        let speed = RawNotification::on_channel(at, Channel::Speed, &2.0f32.to_le_bytes());
        assert_eq!(line(speed), "00:00:03.250 speed 128.0");
    }

    #[test]
    fn rejected_payloads_show_the_error_and_bytes() {
        let at = Utc.timestamp_opt(1, 0).unwrap();
        let short = RawNotification::on_channel(at, Channel::Speed, &[0xde, 0xad, 0x01]);
        assert_eq!(
            line(short),
            "00:00:01.000 speed rejected (speed payload must be 4 bytes, got 3): dead01"
        );
    }

    #[test]
    fn other_characteristics_show_their_name_and_bytes() {
        let at = Utc.timestamp_opt(1, 0).unwrap();
        let auth = RawNotification::new(at, CHAR_AUTH_RESPONSE, vec![0x01, 0xff]);
        assert_eq!(line(auth), "00:00:01.000 Auth Response: 01ff");
    }
}
