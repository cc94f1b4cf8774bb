//! Device state tracking
//! This module holds what we believe the lamp is doing and the rules for
//! changing that belief, both from commands we send (optimistic) and from
//! notifications the lamp pushes (authoritative).

use std::sync::{Arc, Mutex};

use log::debug;
use serde::Serialize;

use crate::core::bluetooth::notification::Notification;
use crate::core::bluetooth::types::{Effect, Mode, Rgb};
use crate::utils::lock;

/// Callback invoked with the new state whenever an observable field changes
pub type UpdateCallback = Arc<dyn Fn(&DeviceState) + Send + Sync>;

/// Represents the believed state of the lamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    /// Set once the lamp has reported any status since the last connect
    pub available: bool,
    pub white_active: bool,
    pub color_active: bool,
    /// Whichever mode was most recently activated or selected
    pub mode: Mode,
    pub rgb_color: Rgb,
    /// 0-255
    pub white_brightness: Option<u8>,
    /// 0-255
    pub color_brightness: Option<u8>,
    pub effect: Effect,
    pub timer_active: bool,
    pub timer_minutes: u8,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            available: false,
            white_active: false,
            color_active: false,
            mode: Mode::White,
            rgb_color: (255, 255, 255),
            white_brightness: None,
            color_brightness: None,
            effect: Effect::OFF,
            timer_active: false,
            timer_minutes: 0,
        }
    }
}

/// A command whose effect is applied before the lamp confirms it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuedCommand {
    /// Remember the mode the next activation should use
    ModeSelected(Mode),
    /// The mode-activate frame went out
    ModeActivated(Mode),
    Color(Rgb),
    ColorBrightness(u8),
    WhiteBrightness(u8),
    Effect(Effect),
    PoweredOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    Issued(IssuedCommand),
    Notified(Notification),
    /// Explicit disconnect or link loss
    LinkDown,
}

/// Percent (0-100) to the 0-255 scale kept in the state
pub fn pct_to_level(pct: u8) -> u8 {
    (pct.min(100) as u32 * 255 / 100) as u8
}

/// 0-255 level to a rounded percent
pub fn level_to_pct(level: u8) -> u8 {
    ((level as f64 / 255.0) * 100.0).round().clamp(0.0, 100.0) as u8
}

impl DeviceState {
    /// `None` until the lamp has reported, then whether either mode is lit.
    pub fn power(&self) -> Option<bool> {
        self.available.then_some(self.white_active || self.color_active)
    }

    pub fn is_on(&self) -> bool {
        self.power() == Some(true)
    }

    /// Remaining timer minutes while the timer runs
    pub fn timer_minutes(&self) -> Option<u8> {
        self.timer_active.then_some(self.timer_minutes)
    }

    /// Brightness of the current mode, 0-255
    pub fn brightness(&self) -> Option<u8> {
        match self.mode {
            Mode::White => self.white_brightness,
            Mode::Rgb => self.color_brightness,
        }
    }

    /// Pure transition: returns the next state and whether anything observable changed.
    pub fn apply(&self, event: &StateEvent) -> (DeviceState, bool) {
        let mut next = self.clone();
        match event {
            StateEvent::Issued(command) => next.apply_issued(*command),
            StateEvent::Notified(notification) => next.apply_notification(notification),
            StateEvent::LinkDown => {
                next.available = false;
                next.white_active = false;
                next.color_active = false;
            }
        }
        let changed = next != *self;
        (next, changed)
    }

    fn apply_issued(&mut self, command: IssuedCommand) {
        match command {
            IssuedCommand::ModeSelected(mode) => self.mode = mode,
            IssuedCommand::ModeActivated(mode) => {
                self.mode = mode;
                self.white_active = mode == Mode::White;
                self.color_active = mode == Mode::Rgb;
                self.available = true;
            }
            IssuedCommand::Color(rgb) => self.rgb_color = rgb,
            IssuedCommand::ColorBrightness(level) => self.color_brightness = Some(level),
            IssuedCommand::WhiteBrightness(level) => self.white_brightness = Some(level),
            IssuedCommand::Effect(effect) => self.effect = effect,
            IssuedCommand::PoweredOff => {
                self.white_active = false;
                self.color_active = false;
            }
        }
    }

    fn apply_notification(&mut self, notification: &Notification) {
        match notification {
            Notification::White(status) => {
                self.white_active = status.on;
                self.white_brightness = status.brightness_pct.map(pct_to_level);
                if status.on {
                    self.mode = Mode::White;
                }
            }
            Notification::Rgb(status) => {
                self.color_active = status.on;
                if let Some(details) = status.details {
                    self.color_brightness = Some(pct_to_level(details.brightness_pct));
                    self.rgb_color = details.rgb;
                    self.effect = details.effect;
                    self.timer_active = details.timer.active;
                    self.timer_minutes = details.timer.minutes;
                }
                if status.on {
                    self.mode = Mode::Rgb;
                }
            }
            Notification::DeviceOff => {
                self.white_active = false;
                self.color_active = false;
            }
            // nothing to learn about the lamp from these
            Notification::Shutdown | Notification::Unknown(_) | Notification::Malformed { .. } => {
                return;
            }
        }
        self.available = true;
    }
}

/// Shared owner of one lamp's state plus its observers
#[derive(Default)]
pub struct DeviceStateMachine {
    state: Mutex<DeviceState>,
    callbacks: Mutex<Vec<UpdateCallback>>,
    last_raw_notification: Mutex<Option<String>>,
}

impl DeviceStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DeviceState {
        lock(&self.state).clone()
    }

    /// Applies an event and notifies observers if the state changed.
    pub fn apply(&self, event: StateEvent) -> bool {
        let updated = {
            let mut state = lock(&self.state);
            let (next, changed) = state.apply(&event);
            *state = next;
            changed.then(|| state.clone())
        };

        match updated {
            Some(state) => {
                debug!("State changed by {:?}", event);
                self.dispatch(&state);
                true
            }
            None => false,
        }
    }

    /// Fires every observer with the current state, changed or not.
    pub fn notify_all(&self) {
        let state = self.snapshot();
        self.dispatch(&state);
    }

    /// Registers a callback. Registering the same callback twice is a no-op.
    pub fn register_callback(&self, callback: UpdateCallback) -> bool {
        let mut callbacks = lock(&self.callbacks);
        if callbacks.iter().any(|existing| same_callback(existing, &callback)) {
            return false;
        }
        callbacks.push(callback);
        true
    }

    /// Removes a callback; unknown callbacks are ignored.
    pub fn unregister_callback(&self, callback: &UpdateCallback) -> bool {
        let mut callbacks = lock(&self.callbacks);
        let before = callbacks.len();
        callbacks.retain(|existing| !same_callback(existing, callback));
        callbacks.len() != before
    }

    pub fn callback_count(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub(crate) fn record_raw(&self, hex: String) {
        *lock(&self.last_raw_notification) = Some(hex);
    }

    /// Hex of the last buffer received from the lamp
    pub fn last_raw_notification(&self) -> Option<String> {
        lock(&self.last_raw_notification).clone()
    }

    fn dispatch(&self, state: &DeviceState) {
        // run callbacks without holding the lock so they may (un)register
        let callbacks: Vec<UpdateCallback> = lock(&self.callbacks).clone();
        for callback in callbacks {
            callback(state);
        }
    }
}

fn same_callback(a: &UpdateCallback, b: &UpdateCallback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
