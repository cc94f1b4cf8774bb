//! `LampTransport` over the bluest BLE stack.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, ConnectionEvent, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::transport::{LampTransport, LinkEvent};
use crate::error::{LampError, Result};
use crate::utils::{extract_mac_address, normalize_address};

pub struct BluestTransport {
    adapter: Adapter,
    address: String,
    lookup_timeout: Duration,
    device: Mutex<Option<Device>>,
    characteristics: Mutex<HashMap<Uuid, Characteristic>>,
    subscription: Mutex<Option<CancellationToken>>,
}

impl BluestTransport {
    /// Opens the default adapter and prepares a transport for `address`.
    pub async fn with_default_adapter(address: &str, lookup_timeout: Duration) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| LampError::Transport("No Bluetooth adapter found".into()))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self::new(adapter, address, lookup_timeout))
    }

    pub fn new(adapter: Adapter, address: &str, lookup_timeout: Duration) -> Self {
        Self {
            adapter,
            address: normalize_address(address),
            lookup_timeout,
            device: Mutex::new(None),
            characteristics: Mutex::new(HashMap::new()),
            subscription: Mutex::new(None),
        }
    }

    fn matches(&self, device: &Device) -> bool {
        let id = device.id().to_string();
        extract_mac_address(&id).as_deref() == Some(self.address.as_str()) || id == self.address
    }

    /// Finds the lamp among connected devices first, then by scanning.
    async fn find_device(&self) -> Result<Device> {
        for device in self.adapter.connected_devices().await? {
            if self.matches(&device) {
                debug!("Found {} among connected devices", self.address);
                return Ok(device);
            }
        }

        info!("Scanning for {}", self.address);
        let mut scan_stream = self.adapter.scan(&[]).await?;
        let search = async {
            while let Some(discovered) = scan_stream.next().await {
                debug!("Found device - Device: {:?}, RSSI: {:?}", discovered.device, discovered.rssi);
                if self.matches(&discovered.device) {
                    return Some(discovered.device);
                }
            }
            None
        };

        match timeout(self.lookup_timeout, search).await {
            Ok(Some(device)) => Ok(device),
            Ok(None) => Err(LampError::Transport("Bluetooth scan stream has ended".into())),
            Err(_) => Err(LampError::Timeout {
                operation: "device lookup",
                after: self.lookup_timeout,
            }),
        }
    }

    async fn current_device(&self) -> Result<Device> {
        self.device.lock().await.clone().ok_or(LampError::NotConnected)
    }
}

#[async_trait]
impl LampTransport for BluestTransport {
    async fn open(&self) -> Result<Vec<Uuid>> {
        let device = {
            let mut cached = self.device.lock().await;
            match cached.as_ref() {
                Some(device) => device.clone(),
                None => {
                    let device = self.find_device().await?;
                    *cached = Some(device.clone());
                    device
                }
            }
        };

        if !device.is_connected().await {
            info!("Initiating connection to {}...", device.id());
            self.adapter.connect_device(&device).await?;
        }

        info!("Connection successful, discovering services...");
        let mut found = HashMap::new();
        for service in device.services().await? {
            for characteristic in service.characteristics().await? {
                found.insert(characteristic.uuid(), characteristic);
            }
        }

        let uuids = found.keys().copied().collect();
        *self.characteristics.lock().await = found;
        Ok(uuids)
    }

    async fn subscribe(&self, characteristic: Uuid, events: UnboundedSender<LinkEvent>) -> Result<()> {
        let notify_char = self
            .characteristics
            .lock()
            .await
            .get(&characteristic)
            .cloned()
            .ok_or(LampError::CharacteristicsNotFound { write: true, notify: false })?;
        let device = self.current_device().await?;
        let adapter = self.adapter.clone();

        let cancel_token = CancellationToken::new();
        if let Some(previous) = self.subscription.lock().await.replace(cancel_token.clone()) {
            previous.cancel();
        }

        info!("Subscribing to notifications...");
        tokio::spawn(async move {
            let mut notification_stream = match notify_char.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to subscribe to notifications: {}", e);
                    let _ = events.send(LinkEvent::Disconnected);
                    return;
                }
            };
            let mut connection_events = match adapter.device_connection_events(&device).await {
                Ok(stream) => Some(stream),
                Err(e) => {
                    debug!("Connection events unavailable: {}", e);
                    None
                }
            };

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    result = notification_stream.next() => match result {
                        Some(Ok(value)) => {
                            if events.send(LinkEvent::Notification(value)).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("Error in notification stream: {}", e);
                            let _ = events.send(LinkEvent::Disconnected);
                            break;
                        }
                        None => {
                            let _ = events.send(LinkEvent::Disconnected);
                            break;
                        }
                    },
                    Some(event) = async {
                        match connection_events.as_mut() {
                            Some(stream) => stream.next().await,
                            None => std::future::pending().await,
                        }
                    } => {
                        if matches!(event, ConnectionEvent::Disconnected) {
                            let _ = events.send(LinkEvent::Disconnected);
                            break;
                        }
                    }
                }
            }
            debug!("Notification subscription task finished");
        });

        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        if let Some(token) = self.subscription.lock().await.take() {
            token.cancel();
        }
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let write_char = self
            .characteristics
            .lock()
            .await
            .get(&characteristic)
            .cloned()
            .ok_or(LampError::CharacteristicsNotFound { write: false, notify: true })?;
        write_char.write(data).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.characteristics.lock().await.clear();
        let device = self.device.lock().await.clone();
        if let Some(device) = device {
            if device.is_connected().await {
                info!("Disconnecting from device {}", device.id());
                self.adapter.disconnect_device(&device).await?;
                info!("Successfully disconnected");
            }
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.device.lock().await.as_ref() {
            Some(device) => device.is_connected().await,
            None => false,
        }
    }
}
