//! Bluetooth connection handling for the lamp
//! This module owns the link to one lamp: connecting, serialized writes,
//! disconnecting, and routing notifications into the device state.

use std::sync::{Arc, Mutex, Weak};

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};

use crate::config::timing_config::{ConnectionSettings, ProtocolTiming};
use crate::core::bluetooth::commands::LampCommand;
use crate::core::bluetooth::constants::{UUID_LAMP_NOTIFY_CHAR, UUID_LAMP_WRITE_CHAR};
use crate::core::bluetooth::notification::{Notification, NotificationHandler, to_hex};
use crate::core::bluetooth::transport::{LampTransport, LinkEvent};
use crate::core::bluetooth::types::{ConnectionState, LampCharacteristics, Mode};
use crate::core::device::{DeviceStateMachine, StateEvent};
use crate::error::{LampError, Result};
use crate::utils::lock;

/// Why the notification pump asked for the link to come down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkDown {
    /// The lamp announced it is shutting down
    Shutdown,
    /// The transport reported the link gone
    Lost,
}

#[derive(Default)]
struct Link {
    characteristics: Option<LampCharacteristics>,
    last_write: Option<Instant>,
    /// Bumped on every successful connect so stale link-down reports are ignored
    generation: u64,
}

/// Connection manager for one lamp
pub struct ConnectionManager<T: LampTransport> {
    address: String,
    transport: Arc<T>,
    device: Arc<DeviceStateMachine>,
    notification_handler: NotificationHandler,
    timing: ProtocolTiming,
    settings: ConnectionSettings,
    /// Serializes connect, write and disconnect
    link: tokio::sync::Mutex<Link>,
    state: Mutex<ConnectionState>,
    pump: Mutex<Option<JoinHandle<()>>>,
    self_ref: Weak<Self>,
}

impl<T: LampTransport> ConnectionManager<T> {
    pub fn new(
        address: impl Into<String>,
        transport: Arc<T>,
        device: Arc<DeviceStateMachine>,
        timing: ProtocolTiming,
        settings: ConnectionSettings,
    ) -> Arc<Self> {
        let notification_handler = NotificationHandler::new(device.clone());
        Arc::new_cyclic(|self_ref| Self {
            address: address.into(),
            transport,
            device,
            notification_handler,
            timing,
            settings,
            link: tokio::sync::Mutex::new(Link::default()),
            state: Mutex::new(ConnectionState::Disconnected),
            pump: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn device(&self) -> &Arc<DeviceStateMachine> {
        &self.device
    }

    pub fn timing(&self) -> &ProtocolTiming {
        &self.timing
    }

    pub fn connection_state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Checks if the lamp is currently connected.
    pub async fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected && self.transport.is_connected().await
    }

    /// Connects to the lamp. Succeeds immediately when already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        self.connect_locked(&mut link).await
    }

    /// Writes one command, reconnecting once first if the link is down.
    pub async fn write(&self, command: &LampCommand) -> Result<()> {
        let mut link = self.link.lock().await;
        self.connect_locked(&mut link).await?;
        self.send_frame_locked(&mut link, command).await
    }

    /// Requests white and RGB status, reconnecting first if needed.
    pub async fn request_status(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        self.connect_locked(&mut link).await?;
        self.request_status_locked(&mut link).await
    }

    /// Disconnects from the lamp. Calling it while disconnected is harmless.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        info!("Disconnecting from {}", self.address);
        self.teardown_locked(&mut link).await;
    }

    async fn connect_locked(&self, link: &mut Link) -> Result<()> {
        if link.characteristics.is_some() {
            if self.transport.is_connected().await {
                return Ok(());
            }
            warn!("Link to {} dropped silently, reconnecting", self.address);
            self.teardown_locked(link).await;
        }

        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {}", self.address);
        match self.establish(link).await {
            Ok(()) => {
                info!("Connected to {}", self.address);
                Ok(())
            }
            Err(e) => {
                error!("Connecting to {} failed: {}", self.address, e);
                self.teardown_locked(link).await;
                Err(e)
            }
        }
    }

    async fn establish(&self, link: &mut Link) -> Result<()> {
        let connect_timeout = self.settings.connect_timeout();
        let found = timeout(connect_timeout, self.transport.open())
            .await
            .map_err(|_| LampError::Timeout {
                operation: "connect",
                after: connect_timeout,
            })??;

        let write = found.contains(&UUID_LAMP_WRITE_CHAR);
        let notify = found.contains(&UUID_LAMP_NOTIFY_CHAR);
        if !write || !notify {
            for uuid in &found {
                debug!("Available characteristic: {}", uuid);
            }
            return Err(LampError::CharacteristicsNotFound { write, notify });
        }
        let characteristics = LampCharacteristics {
            write: UUID_LAMP_WRITE_CHAR,
            notify: UUID_LAMP_NOTIFY_CHAR,
        };
        debug!("Found characteristics - write: {}, notify: {}", characteristics.write, characteristics.notify);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.transport.subscribe(characteristics.notify, events_tx).await?;
        link.generation += 1;
        link.characteristics = Some(characteristics);
        self.spawn_pump(events_rx, link.generation);
        self.set_state(ConnectionState::Connected);

        self.request_status_locked(link).await
    }

    async fn request_status_locked(&self, link: &mut Link) -> Result<()> {
        debug!("Requesting status from {}", self.address);
        self.send_frame_locked(link, &LampCommand::StatusRequest(Mode::White)).await?;
        sleep(self.timing.status_delay()).await;
        self.send_frame_locked(link, &LampCommand::StatusRequest(Mode::Rgb)).await
    }

    async fn send_frame_locked(&self, link: &mut Link, command: &LampCommand) -> Result<()> {
        let characteristics = link.characteristics.ok_or(LampError::NotConnected)?;

        let min_interval = self.timing.min_command_interval();
        if let Some(last) = link.last_write {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }

        let frame = command.to_bytes();
        debug!("Writing to {}: {:?} [{}]", self.address, command, to_hex(&frame));
        let write_timeout = self.settings.write_timeout();
        let result = match timeout(write_timeout, self.transport.write(characteristics.write, &frame)).await {
            Ok(result) => result,
            Err(_) => Err(LampError::Timeout {
                operation: "write",
                after: write_timeout,
            }),
        };
        link.last_write = Some(Instant::now());

        if let Err(e) = result {
            warn!("Write to {} failed: {}", self.address, e);
            self.teardown_locked(link).await;
            return Err(e);
        }
        Ok(())
    }

    /// Unsubscribes and closes (errors logged only), then resets connection and device state.
    /// Closes the link and resets the device state; true if the state changed.
    async fn teardown_locked(&self, link: &mut Link) -> bool {
        if link.characteristics.take().is_some() {
            if let Err(e) = self.transport.unsubscribe().await {
                debug!("Error stopping notifications on {}: {}", self.address, e);
            }
        }
        if let Err(e) = self.transport.close().await {
            debug!("Error during disconnect from {}: {}", self.address, e);
        }
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        self.set_state(ConnectionState::Disconnected);
        self.device.apply(StateEvent::LinkDown)
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    fn spawn_pump(&self, mut events: UnboundedReceiver<LinkEvent>, generation: u64) {
        let handler = self.notification_handler.clone();
        let manager = self.self_ref.clone();

        let handle = tokio::spawn(async move {
            info!("Listening for lamp notifications...");
            while let Some(event) = events.recv().await {
                let reason = match event {
                    LinkEvent::Notification(data) => match handler.handle(&data) {
                        Notification::Shutdown => LinkDown::Shutdown,
                        _ => continue,
                    },
                    LinkEvent::Disconnected => LinkDown::Lost,
                };
                // the teardown aborts this task, so hand it to a fresh one
                let manager = manager.clone();
                tokio::spawn(async move {
                    if let Some(manager) = manager.upgrade() {
                        manager.handle_link_down(generation, reason).await;
                    }
                });
                break;
            }
            info!("Notification stream ended");
        });

        if let Some(previous) = lock(&self.pump).replace(handle) {
            previous.abort();
        }
    }

    async fn handle_link_down(&self, generation: u64, reason: LinkDown) {
        let mut link = self.link.lock().await;
        if link.generation != generation || link.characteristics.is_none() {
            debug!("Ignoring stale {:?} for {}", reason, self.address);
            return;
        }

        match reason {
            LinkDown::Shutdown => info!("{} is shutting down, disconnecting", self.address),
            LinkDown::Lost => warn!("Lost connection to {}", self.address),
        }
        let changed = self.teardown_locked(&mut link).await;
        drop(link);

        // observers already heard about a changed state
        if reason == LinkDown::Lost && !changed {
            self.device.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::core::device::UpdateCallback;
    use crate::testing::{MockTransport, white_on_notification};

    fn manager(transport: Arc<MockTransport>) -> Arc<ConnectionManager<MockTransport>> {
        ConnectionManager::new(
            "AA:BB:CC:DD:EE:FF",
            transport,
            Arc::new(DeviceStateMachine::new()),
            ProtocolTiming::default(),
            ConnectionSettings::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn connect_subscribes_and_requests_status() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(transport.clone());

        manager.connect().await.unwrap();
        assert_eq!(manager.connection_state(), ConnectionState::Connected);
        assert_eq!(transport.subscribe_count(), 1);
        assert_eq!(
            transport.written_commands(),
            vec![
                LampCommand::StatusRequest(Mode::White).to_bytes(),
                LampCommand::StatusRequest(Mode::Rgb).to_bytes(),
            ]
        );

        // already connected: no second subscription
        manager.connect().await.unwrap();
        assert_eq!(transport.subscribe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_characteristic_fails_and_disconnects() {
        let transport = Arc::new(MockTransport::new());
        transport.set_characteristics(vec![UUID_LAMP_WRITE_CHAR]);
        let manager = manager(transport.clone());

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(
            err,
            LampError::CharacteristicsNotFound { write: true, notify: false }
        ));
        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
        assert!(transport.close_count() >= 1);
        assert!(transport.written_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_bounded() {
        let transport = Arc::new(MockTransport::new());
        transport.set_open_delay(Duration::from_secs(600));
        let manager = manager(transport.clone());

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, LampError::Timeout { operation: "connect", .. }));
        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn write_reconnects_once_when_disconnected() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(transport.clone());

        manager.write(&LampCommand::SetMode(Mode::Rgb)).await.unwrap();
        assert_eq!(manager.connection_state(), ConnectionState::Connected);
        assert_eq!(transport.open_count(), 1);
        assert_eq!(
            transport.written_commands().last(),
            Some(&LampCommand::SetMode(Mode::Rgb).to_bytes())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn write_fails_when_reconnect_fails() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_opens(1);
        let manager = manager(transport.clone());

        assert!(manager.write(&LampCommand::SetMode(Mode::Rgb)).await.is_err());
        assert!(transport.written_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_disconnects() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();

        transport.fail_writes(1);
        let err = manager.write(&LampCommand::Off(Mode::White)).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
        assert_eq!(transport.unsubscribe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_spaced_by_min_interval() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();

        let start = Instant::now();
        manager.write(&LampCommand::Off(Mode::White)).await.unwrap();
        manager.write(&LampCommand::Off(Mode::Rgb)).await.unwrap();
        assert!(start.elapsed() >= ProtocolTiming::default().min_command_interval());
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_reach_device_state() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();

        transport.push_notification(white_on_notification(50));
        sleep(Duration::from_millis(10)).await;

        let state = manager.device().snapshot();
        assert_eq!(state.power(), Some(true));
        assert_eq!(state.white_brightness, Some(127));
        assert!(manager.device().last_raw_notification().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent_and_keeps_mode() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();
        manager
            .device()
            .apply(StateEvent::Issued(crate::core::device::IssuedCommand::ModeActivated(Mode::Rgb)));

        manager.disconnect().await;
        manager.disconnect().await;

        let state = manager.device().snapshot();
        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
        assert_eq!(state.power(), None);
        assert_eq!(state.mode, Mode::Rgb);
        assert_eq!(transport.unsubscribe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_resets_and_fires_callbacks() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let callback: UpdateCallback = Arc::new(move |_: &crate::core::device::DeviceState| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.device().register_callback(callback);

        transport.drop_link();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_of_a_lit_lamp_fires_callbacks_once() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();
        transport.push_notification(white_on_notification(80));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.device().snapshot().power(), Some(true));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let callback: UpdateCallback = Arc::new(move |_: &crate::core::device::DeviceState| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.device().register_callback(callback);

        transport.drop_link();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(manager.device().snapshot().power(), None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_notification_tears_down_link() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();

        let mut shutdown = vec![0u8; 10];
        shutdown[8] = 0;
        transport.push_notification(shutdown);
        sleep(Duration::from_millis(10)).await;

        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
        assert_eq!(transport.unsubscribe_count(), 1);
    }
}
