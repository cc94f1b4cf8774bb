//! Light therapy tracking
//! Records how long the lamp ran bright and cool enough to count as therapy
//! light and measures it against a daily goal.

use chrono::{DateTime, Datelike, Duration, Local};
use log::debug;
use serde::Serialize;

use crate::config::therapy_config::TherapySettings;
use crate::core::bluetooth::constants::DAYLIGHT_KELVIN;
use crate::core::bluetooth::types::Mode;
use crate::core::device::{DeviceState, level_to_pct};
use crate::core::simulation::rgb_to_kelvin;

/// One stretch of light exposure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TherapySession {
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub color_temp_kelvin: u32,
    pub brightness_pct: u8,
}

impl TherapySession {
    fn new(start_time: DateTime<Local>, color_temp_kelvin: u32, brightness_pct: u8) -> Self {
        Self {
            start_time,
            end_time: None,
            color_temp_kelvin,
            brightness_pct,
        }
    }

    /// Minutes from start to end, or to `now` while still open
    pub fn duration_minutes_at(&self, now: DateTime<Local>) -> f64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_milliseconds().max(0) as f64 / 60_000.0
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration_minutes_at(Local::now())
    }

    /// Bright and cool enough to count as therapy light
    pub fn is_qualifying(&self, settings: &TherapySettings) -> bool {
        self.color_temp_kelvin >= settings.min_kelvin && self.brightness_pct >= settings.min_brightness_pct
    }
}

#[derive(Debug, Clone, Default)]
pub struct TherapyTracker {
    settings: TherapySettings,
    sessions: Vec<TherapySession>,
    current: Option<TherapySession>,
}

impl TherapyTracker {
    pub fn new(settings: TherapySettings) -> Self {
        Self {
            settings,
            sessions: Vec::new(),
            current: None,
        }
    }

    pub fn settings(&self) -> &TherapySettings {
        &self.settings
    }

    pub fn daily_goal_minutes(&self) -> u32 {
        self.settings.daily_goal_minutes
    }

    pub fn set_daily_goal_minutes(&mut self, minutes: u32) {
        self.settings.daily_goal_minutes = minutes;
    }

    /// Closed sessions kept in history
    pub fn sessions(&self) -> &[TherapySession] {
        &self.sessions
    }

    pub fn current_session(&self) -> Option<&TherapySession> {
        self.current.as_ref()
    }

    pub fn start_session(&mut self, color_temp_kelvin: u32, brightness_pct: u8) {
        self.start_session_at(color_temp_kelvin, brightness_pct, Local::now());
    }

    /// Opens a session at `now`, closing any open one first.
    pub fn start_session_at(&mut self, color_temp_kelvin: u32, brightness_pct: u8, now: DateTime<Local>) {
        if self.current.is_some() {
            self.end_session_at(now);
        }
        debug!("Started therapy session: {}K @ {}%", color_temp_kelvin, brightness_pct);
        self.current = Some(TherapySession::new(now, color_temp_kelvin, brightness_pct));
    }

    /// Changes the open session's light; no-op without one.
    pub fn update_session(&mut self, color_temp_kelvin: Option<u32>, brightness_pct: Option<u8>) {
        let Some(session) = self.current.as_mut() else {
            return;
        };
        if let Some(kelvin) = color_temp_kelvin {
            session.color_temp_kelvin = kelvin;
        }
        if let Some(pct) = brightness_pct {
            session.brightness_pct = pct;
        }
    }

    pub fn end_session(&mut self) -> Option<TherapySession> {
        self.end_session_at(Local::now())
    }

    /// Closes the open session. It is kept in history only when it qualifies
    /// and lasted at least a minute; either way it is returned.
    pub fn end_session_at(&mut self, now: DateTime<Local>) -> Option<TherapySession> {
        let mut session = self.current.take()?;
        session.end_time = Some(now);

        let minutes = session.duration_minutes_at(now);
        if session.is_qualifying(&self.settings) && minutes >= 1.0 {
            debug!("Ended therapy session: {:.1} minutes", minutes);
            self.sessions.push(session.clone());
        } else {
            debug!("Discarded therapy session: {:.1} minutes, {}K @ {}%", minutes, session.color_temp_kelvin, session.brightness_pct);
        }
        Some(session)
    }

    pub fn today_minutes(&self) -> f64 {
        self.today_minutes_at(Local::now())
    }

    /// Qualifying minutes of sessions started on `now`'s calendar day, open one included.
    pub fn today_minutes_at(&self, now: DateTime<Local>) -> f64 {
        let today = now.date_naive();
        self.qualifying_minutes(now, |session| session.start_time.date_naive() == today)
    }

    pub fn week_minutes(&self) -> f64 {
        self.week_minutes_at(Local::now())
    }

    /// Qualifying minutes since Monday 00:00 of `now`'s week, open session included.
    pub fn week_minutes_at(&self, now: DateTime<Local>) -> f64 {
        let today = now.date_naive();
        let week_start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        self.qualifying_minutes(now, |session| session.start_time.date_naive() >= week_start)
    }

    pub fn goal_reached(&self) -> bool {
        self.goal_reached_at(Local::now())
    }

    pub fn goal_reached_at(&self, now: DateTime<Local>) -> bool {
        self.today_minutes_at(now) >= self.settings.daily_goal_minutes as f64
    }

    pub fn goal_progress_pct(&self) -> u8 {
        self.goal_progress_pct_at(Local::now())
    }

    pub fn goal_progress_pct_at(&self, now: DateTime<Local>) -> u8 {
        if self.settings.daily_goal_minutes == 0 {
            return 100;
        }
        let pct = self.today_minutes_at(now) / self.settings.daily_goal_minutes as f64 * 100.0;
        pct.round().min(100.0) as u8
    }

    pub fn cleanup_old_sessions(&mut self) {
        self.cleanup_old_sessions_at(Local::now());
    }

    /// Drops closed sessions that started before the retention window.
    pub fn cleanup_old_sessions_at(&mut self, now: DateTime<Local>) {
        let cutoff = now - Duration::days(self.settings.retention_days);
        let before = self.sessions.len();
        self.sessions.retain(|session| session.start_time > cutoff);
        if self.sessions.len() != before {
            debug!("Removed {} old therapy sessions", before - self.sessions.len());
        }
    }

    pub fn track(&mut self, state: &DeviceState) {
        self.track_at(state, Local::now());
    }

    /// Follows the lamp: lit opens or updates a session, dark or unknown closes it.
    pub fn track_at(&mut self, state: &DeviceState, now: DateTime<Local>) {
        if !state.is_on() {
            self.end_session_at(now);
            return;
        }

        let (kelvin, pct) = light_of(state);
        if self.current.is_some() {
            self.update_session(Some(kelvin), Some(pct));
        } else {
            self.start_session_at(kelvin, pct, now);
        }
    }

    fn qualifying_minutes(&self, now: DateTime<Local>, in_range: impl Fn(&TherapySession) -> bool) -> f64 {
        self.sessions
            .iter()
            .chain(self.current.iter())
            .filter(|session| in_range(session) && session.is_qualifying(&self.settings))
            .map(|session| session.duration_minutes_at(now))
            .sum()
    }
}

/// Colour temperature and brightness percent the lamp is currently emitting
fn light_of(state: &DeviceState) -> (u32, u8) {
    match state.mode {
        Mode::White => (DAYLIGHT_KELVIN, level_to_pct(state.white_brightness.unwrap_or(u8::MAX))),
        Mode::Rgb => (
            rgb_to_kelvin(state.rgb_color),
            level_to_pct(state.color_brightness.unwrap_or(u8::MAX)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
        // October 2026: the 12th is a Monday
        Local.with_ymd_and_hms(2026, 10, day, hour, minute, 0).single().unwrap()
    }

    fn tracker() -> TherapyTracker {
        TherapyTracker::new(TherapySettings::default())
    }

    #[test]
    fn qualification_boundary() {
        let settings = TherapySettings::default();
        let session = |kelvin, pct| TherapySession::new(at(14, 9, 0), kelvin, pct);
        assert!(session(5000, 80).is_qualifying(&settings));
        assert!(!session(4999, 80).is_qualifying(&settings));
        assert!(!session(5000, 79).is_qualifying(&settings));
    }

    #[test]
    fn goal_reached_with_long_session() {
        let mut tracker = tracker();
        tracker.start_session_at(5300, 100, at(14, 8, 0));
        tracker.end_session_at(at(14, 8, 35));

        let now = at(14, 12, 0);
        assert_eq!(tracker.today_minutes_at(now), 35.0);
        assert!(tracker.goal_reached_at(now));
        assert_eq!(tracker.goal_progress_pct_at(now), 100);
    }

    #[test]
    fn short_or_dim_sessions_are_discarded() {
        let mut tracker = tracker();
        tracker.start_session_at(5300, 100, at(14, 8, 0));
        let short = tracker.end_session_at(at(14, 8, 0) + Duration::seconds(30)).unwrap();
        assert_eq!(short.end_time, Some(at(14, 8, 0) + Duration::seconds(30)));

        tracker.start_session_at(2700, 100, at(14, 9, 0));
        tracker.end_session_at(at(14, 9, 20));

        assert!(tracker.sessions().is_empty());
        assert!(tracker.current_session().is_none());
        assert!(tracker.end_session_at(at(14, 10, 0)).is_none());
    }

    #[test]
    fn starting_closes_the_open_session() {
        let mut tracker = tracker();
        tracker.start_session_at(5300, 100, at(14, 8, 0));
        tracker.start_session_at(6000, 90, at(14, 8, 10));

        assert_eq!(tracker.sessions().len(), 1);
        assert_eq!(tracker.sessions()[0].end_time, Some(at(14, 8, 10)));
        assert_eq!(tracker.current_session().unwrap().color_temp_kelvin, 6000);
    }

    #[test]
    fn open_session_counts_toward_today() {
        let mut tracker = tracker();
        tracker.start_session_at(5300, 100, at(14, 8, 0));
        assert_eq!(tracker.today_minutes_at(at(14, 8, 15)), 15.0);
        assert_eq!(tracker.goal_progress_pct_at(at(14, 8, 15)), 50);

        tracker.update_session(Some(4000), None);
        assert_eq!(tracker.today_minutes_at(at(14, 8, 15)), 0.0);
    }

    #[test]
    fn week_starts_on_monday() {
        let mut tracker = tracker();
        // Sunday before, Monday and Wednesday of the same week
        for day in [11, 12, 14] {
            tracker.start_session_at(5300, 100, at(day, 7, 0));
            tracker.end_session_at(at(day, 7, 10));
        }

        let now = at(15, 20, 0);
        assert_eq!(tracker.week_minutes_at(now), 20.0);
        assert_eq!(tracker.today_minutes_at(now), 0.0);
    }

    #[test]
    fn cleanup_keeps_recent_and_open_sessions() {
        let mut tracker = tracker();
        tracker.start_session_at(5300, 100, at(1, 7, 0));
        tracker.end_session_at(at(1, 7, 30));
        tracker.start_session_at(5300, 100, at(10, 7, 0));
        tracker.end_session_at(at(10, 7, 30));
        tracker.start_session_at(5300, 100, at(14, 7, 0));

        tracker.cleanup_old_sessions_at(at(14, 12, 0));
        assert_eq!(tracker.sessions().len(), 1);
        assert_eq!(tracker.sessions()[0].start_time, at(10, 7, 0));
        assert!(tracker.current_session().is_some());
    }

    #[test]
    fn tracking_follows_lamp_power() {
        let mut tracker = tracker();
        let mut state = DeviceState {
            available: true,
            white_active: true,
            white_brightness: Some(255),
            ..DeviceState::default()
        };

        tracker.track_at(&state, at(14, 7, 0));
        let session = tracker.current_session().unwrap();
        assert_eq!((session.color_temp_kelvin, session.brightness_pct), (DAYLIGHT_KELVIN, 100));

        state.white_brightness = Some(204);
        tracker.track_at(&state, at(14, 7, 10));
        assert_eq!(tracker.current_session().unwrap().brightness_pct, 80);
        assert_eq!(tracker.current_session().unwrap().start_time, at(14, 7, 0));

        state.white_active = false;
        tracker.track_at(&state, at(14, 7, 40));
        assert!(tracker.current_session().is_none());
        assert_eq!(tracker.today_minutes_at(at(14, 8, 0)), 40.0);
    }

    #[test]
    fn rgb_light_uses_estimated_temperature() {
        let state = DeviceState {
            available: true,
            color_active: true,
            mode: Mode::Rgb,
            rgb_color: (255, 166, 87),
            color_brightness: Some(255),
            ..DeviceState::default()
        };
        assert_eq!(light_of(&state), (2700, 100));
    }
}
