//! Per-lamp bundle and the registry that owns them
//! A `Lamp` ties one connection, its controller, the simulation scheduler and
//! the therapy tracker together; `LampRegistry` maps addresses to lamps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::config::LampConfig;
use crate::config::timing_config::ConnectionSettings;
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::transport::LampTransport;
use crate::core::bluetooth::types::{ConnectionState, Effect, Mode, Rgb};
use crate::core::controller::LampController;
use crate::core::device::{DeviceState, DeviceStateMachine, UpdateCallback};
use crate::core::simulation::{SimulationOutcome, SimulationScheduler, SunriseProfile};
use crate::core::therapy::TherapyTracker;
use crate::error::Result;
use crate::utils::{lock, normalize_address};

struct PollTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Lamp<T: LampTransport> {
    address: String,
    controller: Arc<LampController<T>>,
    scheduler: SimulationScheduler<T>,
    therapy: Arc<Mutex<TherapyTracker>>,
    /// Feeds the therapy tracker and wakes the status poller
    state_callback: UpdateCallback,
    state_changed: Arc<Notify>,
    poll_settings: ConnectionSettings,
    poller: tokio::sync::Mutex<Option<PollTask>>,
}

impl<T: LampTransport> Lamp<T> {
    pub fn new(address: &str, transport: Arc<T>, config: &LampConfig) -> Self {
        let address = normalize_address(address);
        let device = Arc::new(DeviceStateMachine::new());
        let connection = ConnectionManager::new(
            address.clone(),
            transport,
            device.clone(),
            config.timing.clone(),
            config.connection.clone(),
        );
        let controller = Arc::new(LampController::new(connection));
        let scheduler = SimulationScheduler::new(controller.clone(), config.simulation.clone());

        let therapy = Arc::new(Mutex::new(TherapyTracker::new(config.therapy.clone())));
        let state_changed = Arc::new(Notify::new());
        let tracker = therapy.clone();
        let changed = state_changed.clone();
        let state_callback: UpdateCallback = Arc::new(move |state: &DeviceState| {
            lock(&tracker).track(state);
            changed.notify_one();
        });
        device.register_callback(state_callback.clone());

        Self {
            address,
            controller,
            scheduler,
            therapy,
            state_callback,
            state_changed,
            poll_settings: config.connection.clone(),
            poller: tokio::sync::Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn controller(&self) -> &Arc<LampController<T>> {
        &self.controller
    }

    pub fn scheduler(&self) -> &SimulationScheduler<T> {
        &self.scheduler
    }

    /// Locks the therapy tracker for reading or adjusting the goal.
    pub fn therapy(&self) -> MutexGuard<'_, TherapyTracker> {
        lock(&self.therapy)
    }

    fn connection(&self) -> &Arc<ConnectionManager<T>> {
        self.controller.connection()
    }

    // Connection

    pub async fn connect(&self) -> Result<()> {
        self.controller.connect().await
    }

    pub async fn disconnect(&self) {
        self.controller.disconnect().await
    }

    pub async fn update(&self) -> Result<()> {
        self.controller.update().await
    }

    pub async fn is_connected(&self) -> bool {
        self.controller.is_connected().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection().connection_state()
    }

    /// Starts refreshing status in the background: often while lit, rarely
    /// while off, and with a reconnect attempt while unreachable. Changes made
    /// on the lamp itself only show up through these refreshes.
    pub async fn start_polling(&self) {
        let mut poller = self.poller.lock().await;
        if poller.is_some() {
            return;
        }

        info!("Starting status polling for {}", self.address);
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(poll_status(
            self.address.clone(),
            self.controller.clone(),
            self.poll_settings.clone(),
            self.state_changed.clone(),
            cancel_token.clone(),
        ));
        *poller = Some(PollTask { cancel_token, handle });
    }

    /// Stops the status poller and waits for it to exit.
    pub async fn stop_polling(&self) {
        if let Some(PollTask { cancel_token, handle }) = self.poller.lock().await.take() {
            cancel_token.cancel();
            match handle.await {
                Ok(()) => debug!("Status polling for {} stopped", self.address),
                Err(e) if e.is_cancelled() => debug!("Status polling task was cancelled"),
                Err(e) => error!("Status polling task finished with an unexpected join error: {:?}", e),
            }
        }
    }

    pub async fn is_polling(&self) -> bool {
        self.poller.lock().await.is_some()
    }

    // Control

    pub async fn turn_on(&self) -> Result<()> {
        self.controller.turn_on().await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.controller.turn_off().await
    }

    pub async fn set_color(&self, rgb: Rgb) -> Result<()> {
        self.controller.set_color(rgb).await
    }

    pub async fn set_color_brightness(&self, level: u8) -> Result<()> {
        self.controller.set_color_brightness(level).await
    }

    pub async fn set_color_with_brightness(&self, rgb: Rgb, level: u8) -> Result<()> {
        self.controller.set_color_with_brightness(rgb, level).await
    }

    pub async fn set_white(&self, level: u8) -> Result<()> {
        self.controller.set_white(level).await
    }

    pub async fn set_effect(&self, name: &str) -> Result<()> {
        self.controller.set_effect(name).await
    }

    pub async fn set_timer(&self, minutes: u8) -> Result<()> {
        self.controller.set_timer(minutes).await
    }

    pub async fn send_raw(&self, hex: &str) -> Result<()> {
        self.controller.send_raw(hex).await
    }

    // Simulation

    pub async fn start_sunrise(&self, duration_minutes: u32, profile: SunriseProfile) {
        self.scheduler.start_sunrise(duration_minutes, profile).await
    }

    pub async fn start_sunset(&self, duration_minutes: u32, end_brightness_pct: u8) {
        self.scheduler.start_sunset(duration_minutes, end_brightness_pct).await
    }

    pub async fn stop_simulation(&self) {
        self.scheduler.stop().await
    }

    pub fn simulation_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn simulation_progress_pct(&self) -> u8 {
        self.scheduler.progress_pct()
    }

    pub async fn join_simulation(&self) -> Option<SimulationOutcome> {
        self.scheduler.join().await
    }

    // State

    pub fn state(&self) -> DeviceState {
        self.controller.state()
    }

    pub fn power(&self) -> Option<bool> {
        self.state().power()
    }

    pub fn mode(&self) -> Mode {
        self.state().mode
    }

    pub fn rgb_color(&self) -> Rgb {
        self.state().rgb_color
    }

    pub fn white_brightness(&self) -> Option<u8> {
        self.state().white_brightness
    }

    pub fn color_brightness(&self) -> Option<u8> {
        self.state().color_brightness
    }

    /// Brightness of the current mode, 0-255
    pub fn brightness(&self) -> Option<u8> {
        self.state().brightness()
    }

    pub fn effect(&self) -> Effect {
        self.state().effect
    }

    pub fn timer_minutes(&self) -> Option<u8> {
        self.state().timer_minutes()
    }

    pub fn last_raw_notification(&self) -> Option<String> {
        self.connection().device().last_raw_notification()
    }

    pub fn register_callback(&self, callback: UpdateCallback) -> bool {
        self.connection().device().register_callback(callback)
    }

    pub fn unregister_callback(&self, callback: &UpdateCallback) -> bool {
        self.connection().device().unregister_callback(callback)
    }

    /// Stops polling and any simulation, disconnects and detaches the therapy tracker.
    pub async fn shutdown(&self) {
        self.stop_polling().await;
        self.scheduler.stop().await;
        self.controller.disconnect().await;
        self.connection().device().unregister_callback(&self.state_callback);
    }
}

fn poll_ticker(period: std::time::Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Refreshes status on an interval picked from the lamp's state, re-picked
/// after every state change.
async fn poll_status<T: LampTransport>(
    address: String,
    controller: Arc<LampController<T>>,
    settings: ConnectionSettings,
    state_changed: Arc<Notify>,
    cancel_token: CancellationToken,
) {
    let mut period = settings.poll_interval(&controller.state());
    let mut ticker = poll_ticker(period);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = state_changed.notified() => {}
            _ = ticker.tick() => {
                debug!("Periodic refresh for {}", address);
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    result = controller.update() => {
                        if let Err(e) = result {
                            debug!("Update failed for {}: {}", address, e);
                        }
                    }
                }
            }
        }

        let next = settings.poll_interval(&controller.state());
        if next != period {
            debug!(
                "Adaptive polling for {}: {}s -> {}s",
                address,
                period.as_secs(),
                next.as_secs()
            );
            period = next;
            ticker = poll_ticker(period);
        }
    }
}

/// Lamps by normalised address
pub struct LampRegistry<T: LampTransport> {
    config: LampConfig,
    lamps: Mutex<HashMap<String, Arc<Lamp<T>>>>,
}

impl<T: LampTransport> LampRegistry<T> {
    pub fn new(config: LampConfig) -> Self {
        Self {
            config,
            lamps: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LampConfig {
        &self.config
    }

    /// Returns the lamp at `address`, creating it over `transport` when absent.
    pub fn get_or_insert(&self, address: &str, transport: impl FnOnce() -> Arc<T>) -> Arc<Lamp<T>> {
        let key = normalize_address(address);
        let mut lamps = lock(&self.lamps);
        lamps
            .entry(key)
            .or_insert_with_key(|key| {
                info!("Adding lamp {}", key);
                Arc::new(Lamp::new(key, transport(), &self.config))
            })
            .clone()
    }

    pub fn get(&self, address: &str) -> Option<Arc<Lamp<T>>> {
        lock(&self.lamps).get(&normalize_address(address)).cloned()
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = lock(&self.lamps).keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        lock(&self.lamps).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes a lamp, stopping its simulation and closing its link.
    pub async fn remove(&self, address: &str) -> Option<Arc<Lamp<T>>> {
        let lamp = lock(&self.lamps).remove(&normalize_address(address))?;
        info!("Removing lamp {}", lamp.address());
        lamp.shutdown().await;
        Some(lamp)
    }

    /// Shuts every lamp down and empties the registry.
    pub async fn clear(&self) {
        let lamps: Vec<Arc<Lamp<T>>> = lock(&self.lamps).drain().map(|(_, lamp)| lamp).collect();
        for lamp in lamps {
            lamp.shutdown().await;
        }
    }
}
