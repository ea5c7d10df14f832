use std::{error::Error, fmt::Display, pin::Pin, time::Duration};

use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::time;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use hwportal_domain::{
    notification::RawNotification,
    protocol::{
        CHAR_AUTH_KEY, CHAR_FIRMWARE_VERSION, CHAR_SERIAL_NUMBER, NOTIFY_CHARACTERISTICS,
        PORTAL_NAME, characteristic_name,
    },
};

use crate::NotificationSource;

const SCAN_POLL: Duration = Duration::from_millis(500);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVER_TIMEOUT: Duration = Duration::from_secs(15);

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// What the portal reports about itself right after connecting.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub address: String,
    pub name: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub device_key: Option<Vec<u8>>,
}

/// Which portal to connect to.
#[derive(Debug, Clone)]
pub struct Target {
    /// Match on address (or platform id) instead of advertised name.
    pub address: Option<String>,
    pub scan_timeout: Duration,
}

impl Default for Target {
    fn default() -> Target {
        Target {
            address: None,
            scan_timeout: Duration::from_secs(10),
        }
    }
}

/// A device heard while scanning.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

impl Advertisement {
    #[must_use]
    pub fn is_portal(&self) -> bool {
        is_portal_name(self.name.as_deref())
    }
}

/// One entry of the portal's GATT table.
#[derive(Debug, Clone)]
pub struct GattCharacteristic {
    pub service: Uuid,
    pub uuid: Uuid,
    pub properties: String,
}

/// Lists every device advertising within `duration`, strongest signal first.
pub async fn scan(duration: Duration) -> Result<Vec<Advertisement>, Box<dyn Error>> {
    let adapter = adapter().await?;
    info!("[BlePortal] scanning for {}s", duration.as_secs());
    adapter.start_scan(ScanFilter::default()).await?;
    time::sleep(duration).await;
    let mut heard = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let properties = peripheral.properties().await?;
        heard.push(Advertisement {
            address: peripheral.address().to_string(),
            name: properties.as_ref().and_then(|p| p.local_name.clone()),
            rssi: properties.and_then(|p| p.rssi),
        });
    }
    adapter.stop_scan().await?;
    heard.sort_by_key(|advertisement| std::cmp::Reverse(advertisement.rssi));
    Ok(heard)
}

/// A live, subscribed connection to a portal.
pub struct BlePortal {
    peripheral: Peripheral,
    notifications: Notifications,
    info: DeviceInfo,
}

impl BlePortal {
    pub async fn connect(target: &Target) -> Result<BlePortal, Box<dyn Error>> {
        let adapter = adapter().await?;
        let peripheral = find(&adapter, target).await?;

        info!("[BlePortal] connecting to {}", peripheral.address());
        time::timeout(CONNECT_TIMEOUT, peripheral.connect())
            .await
            .map_err(|_| "connect timed out")??;

        let setup = async {
            time::timeout(DISCOVER_TIMEOUT, peripheral.discover_services())
                .await
                .map_err(|_| "service discovery timed out")??;
            let info = read_info(&peripheral).await;
            let notifications = subscribe(&peripheral).await?;
            Ok::<_, Box<dyn Error>>((info, notifications))
        }
        .await;
        let (info, notifications) = disconnect_on_error(setup, peripheral.disconnect()).await?;
        Ok(BlePortal {
            peripheral,
            notifications,
            info,
        })
    }

    #[must_use]
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Every characteristic discovered on the portal, in service order.
    #[must_use]
    pub fn characteristics(&self) -> Vec<GattCharacteristic> {
        self.peripheral
            .services()
            .into_iter()
            .flat_map(|service| service.characteristics)
            .map(|c| GattCharacteristic {
                service: c.service_uuid,
                uuid: c.uuid,
                properties: property_names(c.properties),
            })
            .collect()
    }

    pub async fn disconnect(self) -> Result<(), Box<dyn Error>> {
        info!("[BlePortal] disconnecting from {}", self.info.address);
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

impl NotificationSource for BlePortal {
    async fn next_notification(&mut self) -> Result<Option<RawNotification>, Box<dyn Error>> {
        let Some(notification) = self.notifications.next().await else {
            warn!("[BlePortal] notification stream ended");
            return Ok(None);
        };
        trace!(
            "[BlePortal] {} bytes on {}",
            notification.value.len(),
            characteristic_name(notification.uuid)
        );
        Ok(Some(RawNotification::new(
            Utc::now(),
            notification.uuid,
            notification.value,
        )))
    }
}

/// Connecting can fail halfway; release the link before reporting the error.
async fn disconnect_on_error<T, E: Display>(
    result: Result<T, Box<dyn Error>>,
    disconnect: impl Future<Output = Result<(), E>>,
) -> Result<T, Box<dyn Error>> {
    match result {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("[BlePortal] setup failed: {e}");
            if let Err(e) = disconnect.await {
                warn!("[BlePortal] disconnect after failed setup: {e}");
            }
            Err(e)
        }
    }
}

async fn adapter() -> Result<Adapter, Box<dyn Error>> {
    let manager = Manager::new().await?;
    Ok(manager
        .adapters()
        .await?
        .pop()
        .ok_or("No Bluetooth adapters found")?)
}

fn is_portal_name(name: Option<&str>) -> bool {
    name.is_some_and(|name| name.to_lowercase().contains(&PORTAL_NAME.to_lowercase()))
}

fn is_target(address: &str, id: &str, name: Option<&str>, target: &Target) -> bool {
    match &target.address {
        Some(wanted) => address.eq_ignore_ascii_case(wanted) || id.contains(wanted.as_str()),
        None => is_portal_name(name),
    }
}

async fn find(adapter: &Adapter, target: &Target) -> Result<Peripheral, Box<dyn Error>> {
    trace!("[BlePortal] scanning for {:?}", target);
    adapter.start_scan(ScanFilter::default()).await?;
    let deadline = time::Instant::now() + target.scan_timeout;
    let found = loop {
        time::sleep(SCAN_POLL).await;
        let mut found = None;
        for peripheral in adapter.peripherals().await? {
            let name = peripheral
                .properties()
                .await?
                .and_then(|properties| properties.local_name);
            let address = peripheral.address().to_string();
            let id = format!("{:?}", peripheral.id());
            if is_target(&address, &id, name.as_deref(), target) {
                debug!("[BlePortal] found {:?} at {address}", name);
                found = Some(peripheral);
                break;
            }
        }
        if found.is_some() || time::Instant::now() >= deadline {
            break found;
        }
    };
    adapter.stop_scan().await?;
    found.ok_or_else(|| {
        format!(
            "no {PORTAL_NAME} portal found within {}s",
            target.scan_timeout.as_secs()
        )
        .into()
    })
}

fn characteristic(peripheral: &Peripheral, uuid: Uuid) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
}

async fn read_value(peripheral: &Peripheral, uuid: Uuid) -> Option<Vec<u8>> {
    let Some(characteristic) = characteristic(peripheral, uuid) else {
        warn!("[BlePortal] {} not found", characteristic_name(uuid));
        return None;
    };
    match peripheral.read(&characteristic).await {
        Ok(value) => {
            trace!("[BlePortal] read {} bytes from {}", value.len(), characteristic_name(uuid));
            Some(value)
        }
        Err(e) => {
            warn!("[BlePortal] reading {} failed: {e}", characteristic_name(uuid));
            None
        }
    }
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

async fn read_info(peripheral: &Peripheral) -> DeviceInfo {
    let name = match peripheral.properties().await {
        Ok(properties) => properties.and_then(|properties| properties.local_name),
        Err(e) => {
            warn!("[BlePortal] reading properties failed: {e}");
            None
        }
    };
    let info = DeviceInfo {
        address: peripheral.address().to_string(),
        name,
        firmware_version: read_value(peripheral, CHAR_FIRMWARE_VERSION)
            .await
            .map(|v| text(&v)),
        serial_number: read_value(peripheral, CHAR_SERIAL_NUMBER)
            .await
            .map(|v| text(&v)),
        device_key: read_value(peripheral, CHAR_AUTH_KEY).await,
    };
    debug!("[BlePortal] {info:?}");
    info
}

/// The portal indicates rather than notifies on most of its event characteristics.
fn subscribable(properties: CharPropFlags) -> bool {
    properties.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
}

fn property_names(properties: CharPropFlags) -> String {
    const NAMES: [(CharPropFlags, &str); 8] = [
        (CharPropFlags::BROADCAST, "broadcast"),
        (CharPropFlags::READ, "read"),
        (CharPropFlags::WRITE_WITHOUT_RESPONSE, "write-without-response"),
        (CharPropFlags::WRITE, "write"),
        (CharPropFlags::NOTIFY, "notify"),
        (CharPropFlags::INDICATE, "indicate"),
        (CharPropFlags::AUTHENTICATED_SIGNED_WRITES, "authenticated-signed-writes"),
        (CharPropFlags::EXTENDED_PROPERTIES, "extended-properties"),
    ];
    NAMES
        .iter()
        .filter(|(flag, _)| properties.contains(*flag))
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

async fn subscribe(peripheral: &Peripheral) -> Result<Notifications, Box<dyn Error>> {
    let mut subscribed = 0;
    for uuid in NOTIFY_CHARACTERISTICS {
        match characteristic(peripheral, uuid) {
            Some(c) if subscribable(c.properties) => {
                peripheral.subscribe(&c).await?;
                trace!("[BlePortal] subscribed to {}", characteristic_name(uuid));
                subscribed += 1;
            }
            Some(_) => warn!(
                "[BlePortal] {} neither notifies nor indicates",
                characteristic_name(uuid)
            ),
            None => warn!("[BlePortal] {} not found", characteristic_name(uuid)),
        }
    }
    if subscribed == 0 {
        return Err("portal exposes none of the event characteristics".into());
    }
    Ok(peripheral.notifications().await?)
}
