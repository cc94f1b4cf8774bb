//! Lamp control operations
//! This module turns user intents (colour, white level, effect, power) into the
//! ordered command sequences the lamp firmware expects, with the pauses it needs
//! between dependent frames.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::config::timing_config::ProtocolTiming;
use crate::core::bluetooth::commands::LampCommand;
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::transport::LampTransport;
use crate::core::bluetooth::types::{Effect, Mode, Rgb};
use crate::core::device::{DeviceState, IssuedCommand, StateEvent, level_to_pct};
use crate::error::{LampError, Result};
use crate::utils::parse_hex_command;

pub struct LampController<T: LampTransport> {
    connection: Arc<ConnectionManager<T>>,
    /// One operation at a time per lamp
    sequence: Mutex<()>,
}

impl<T: LampTransport> LampController<T> {
    pub fn new(connection: Arc<ConnectionManager<T>>) -> Self {
        Self {
            connection,
            sequence: Mutex::new(()),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager<T>> {
        &self.connection
    }

    pub fn state(&self) -> DeviceState {
        self.connection.device().snapshot()
    }

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Refreshes the state by asking the lamp for both status reports.
    pub async fn update(&self) -> Result<()> {
        let _guard = self.sequence.lock().await;
        self.connection.request_status().await
    }

    /// Sets an RGB colour, switching the lamp into colour mode first if needed.
    pub async fn set_color(&self, rgb: Rgb) -> Result<()> {
        let _guard = self.sequence.lock().await;
        debug!("Setting color R={}, G={}, B={} for {}", rgb.0, rgb.1, rgb.2, self.address());
        self.issue(IssuedCommand::ModeSelected(Mode::Rgb));
        self.issue(IssuedCommand::Color(rgb));

        self.ensure_color_mode().await?;
        self.send("set-rgb", LampCommand::Color(rgb)).await?;
        self.pause(self.timing().command_delay()).await;
        self.refresh().await
    }

    /// Sets colour-mode brightness (0-255). Powers the lamp on instead when
    /// colour mode is not lit, since brightness is ignored on an inactive mode.
    pub async fn set_color_brightness(&self, level: u8) -> Result<()> {
        let _guard = self.sequence.lock().await;
        debug!("Setting color brightness to {} for {}", level, self.address());
        self.issue(IssuedCommand::ModeSelected(Mode::Rgb));
        self.issue(IssuedCommand::ColorBrightness(level));

        let state = self.state();
        if !state.is_on() || !state.color_active {
            return self.turn_on_locked().await;
        }

        self.send("set-brightness", LampCommand::Brightness(Mode::Rgb, level_to_pct(level)))
            .await?;
        self.pause(self.timing().mode_change_delay()).await;
        self.refresh().await
    }

    /// Sets white-panel intensity (0-255), activating white mode if needed.
    pub async fn set_white(&self, level: u8) -> Result<()> {
        let _guard = self.sequence.lock().await;
        debug!("Setting white intensity to {} for {}", level, self.address());
        self.issue(IssuedCommand::ModeSelected(Mode::White));
        self.issue(IssuedCommand::WhiteBrightness(level));

        if !self.state().white_active {
            debug!("Activating white mode");
            self.send("set-mode", LampCommand::SetMode(Mode::White)).await?;
            self.pause(self.timing().command_delay()).await;
            self.issue(IssuedCommand::ModeActivated(Mode::White));
        }

        self.send("set-brightness", LampCommand::Brightness(Mode::White, level_to_pct(level)))
            .await?;
        self.pause(self.timing().command_delay()).await;
        self.refresh().await
    }

    /// Selects an effect by name. Unknown names fall back to "Off".
    pub async fn set_effect(&self, name: &str) -> Result<()> {
        let _guard = self.sequence.lock().await;
        let effect = Effect::resolve(name);
        debug!("Setting effect to '{}' for {}", effect, self.address());
        self.issue(IssuedCommand::ModeSelected(Mode::Rgb));
        self.issue(IssuedCommand::Effect(effect));

        let state = self.state();
        if !state.is_on() || !state.color_active {
            return self.turn_on_locked().await;
        }

        self.send("set-effect", LampCommand::Effect(effect)).await?;
        self.pause(self.timing().effect_delay()).await;
        self.refresh().await
    }

    /// Sets colour and colour brightness in one sequence.
    pub async fn set_color_with_brightness(&self, rgb: Rgb, level: u8) -> Result<()> {
        let _guard = self.sequence.lock().await;
        debug!(
            "Setting color ({}, {}, {}) at {} for {}",
            rgb.0,
            rgb.1,
            rgb.2,
            level,
            self.address()
        );
        self.issue(IssuedCommand::ModeSelected(Mode::Rgb));
        self.issue(IssuedCommand::Color(rgb));
        self.issue(IssuedCommand::ColorBrightness(level));

        self.ensure_color_mode().await?;
        self.send("set-rgb", LampCommand::Color(rgb)).await?;
        self.pause(self.timing().command_delay()).await;
        self.send("set-brightness", LampCommand::Brightness(Mode::Rgb, level_to_pct(level)))
            .await?;
        self.pause(self.timing().mode_change_delay()).await;
        self.refresh().await
    }

    /// Powers the lamp on in its remembered mode.
    pub async fn turn_on(&self) -> Result<()> {
        let _guard = self.sequence.lock().await;
        self.turn_on_locked().await
    }

    /// Switches both panels off and confirms with a status request.
    pub async fn turn_off(&self) -> Result<()> {
        let _guard = self.sequence.lock().await;
        info!("Turning off {}", self.address());

        // both panels, whichever one is lit
        self.send("turn-off-white", LampCommand::Off(Mode::White)).await?;
        self.pause(self.timing().turn_off_step_delay()).await;
        self.send("turn-off-rgb", LampCommand::Off(Mode::Rgb)).await?;
        self.issue(IssuedCommand::PoweredOff);
        self.pause(self.timing().turn_off_delay()).await;
        self.refresh().await
    }

    /// Starts the sleep timer. Experimental: the firmware's argument format
    /// for this opcode is unconfirmed.
    pub async fn set_timer(&self, minutes: u8) -> Result<()> {
        let _guard = self.sequence.lock().await;
        if self.state().mode != Mode::Rgb {
            return Err(LampError::InvalidArgument(
                "timer is only available in RGB mode".into(),
            ));
        }
        info!("Setting timer to {} minutes on {} (experimental)", minutes, self.address());

        self.send("set-timer", LampCommand::Timer(minutes)).await?;
        self.pause(self.timing().command_delay()).await;
        self.refresh().await
    }

    /// Frames and sends a raw hex command such as `"3E 1E"` (opcode first).
    pub async fn send_raw(&self, hex: &str) -> Result<()> {
        let bytes = parse_hex_command(hex)?;
        let Some((&opcode, args)) = bytes.split_first() else {
            return Err(LampError::Protocol("raw command is empty".into()));
        };

        let _guard = self.sequence.lock().await;
        info!("Sending raw command {:02X} {:02X?} to {}", opcode, args, self.address());
        self.send("raw", LampCommand::Raw { opcode, args: args.to_vec() }).await?;
        self.pause(self.timing().command_delay()).await;
        self.refresh().await
    }

    async fn turn_on_locked(&self) -> Result<()> {
        // values to restore if the lamp comes up from fully off
        let before = self.state();
        info!(
            "Turning on {} (mode={:?}, is_on={})",
            self.address(),
            before.mode,
            before.is_on()
        );
        let mode_change = self.timing().mode_change_delay();

        self.connection
            .connect()
            .await
            .map_err(|e| LampError::aborted("connect", e))?;

        match before.mode {
            Mode::White => {
                self.send("set-mode", LampCommand::SetMode(Mode::White)).await?;
                self.pause(mode_change).await;
                self.issue(IssuedCommand::ModeActivated(Mode::White));
            }
            Mode::Rgb => {
                self.send("set-mode", LampCommand::SetMode(Mode::Rgb)).await?;
                self.pause(mode_change).await;
                self.issue(IssuedCommand::ModeActivated(Mode::Rgb));

                if !before.is_on() {
                    debug!("Restoring previous colour settings");
                    self.pause(mode_change).await;
                    self.send("set-effect", LampCommand::Effect(before.effect)).await?;
                    self.pause(self.timing().effect_delay()).await;

                    self.pause(mode_change).await;
                    if before.rgb_color != (0, 0, 0) {
                        self.send("set-rgb", LampCommand::Color(before.rgb_color)).await?;
                        self.pause(self.timing().command_delay()).await;
                    }

                    self.pause(mode_change).await;
                    if let Some(level) = before.color_brightness.filter(|level| *level > 0) {
                        self.send(
                            "set-brightness",
                            LampCommand::Brightness(Mode::Rgb, level_to_pct(level)),
                        )
                        .await?;
                        self.pause(mode_change).await;
                    }
                }
            }
        }

        self.pause(mode_change).await;
        self.refresh().await
    }

    /// Activates colour mode with effects cleared unless it is already lit.
    async fn ensure_color_mode(&self) -> Result<()> {
        if self.state().color_active {
            return Ok(());
        }

        debug!("Activating RGB mode");
        self.send("set-mode", LampCommand::SetMode(Mode::Rgb)).await?;
        self.pause(self.timing().command_delay()).await;
        self.issue(IssuedCommand::ModeActivated(Mode::Rgb));
        self.issue(IssuedCommand::Effect(Effect::OFF));
        self.send("set-effect", LampCommand::Effect(Effect::OFF)).await?;
        self.pause(self.timing().command_delay()).await;
        Ok(())
    }

    async fn send(&self, step: &'static str, command: LampCommand) -> Result<()> {
        self.connection
            .write(&command)
            .await
            .map_err(|e| LampError::aborted(step, e))
    }

    async fn refresh(&self) -> Result<()> {
        self.connection
            .request_status()
            .await
            .map_err(|e| LampError::aborted("request-status", e))
    }

    async fn pause(&self, delay: Duration) {
        sleep(delay).await;
    }

    fn issue(&self, command: IssuedCommand) {
        self.connection.device().apply(StateEvent::Issued(command));
    }

    fn timing(&self) -> &ProtocolTiming {
        self.connection.timing()
    }

    fn address(&self) -> &str {
        self.connection.address()
    }
}
