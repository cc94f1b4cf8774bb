//! Sunrise and sunset simulation
//! A background task walks the lamp from one colour temperature and brightness
//! to another, one step per minute, retrying steps that fail on a flaky link.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::therapy_config::SimulationSettings;
use crate::core::bluetooth::transport::LampTransport;
use crate::core::bluetooth::types::Rgb;
use crate::core::controller::LampController;
use crate::core::device::pct_to_level;
use crate::error::{LampError, Result};
use crate::utils::lock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SunriseProfile {
    /// Very slow, warm start
    Gentle,
    #[default]
    Natural,
    /// Fast, cool light for alertness
    Energize,
    /// Ends at daylight colour temperature
    Therapy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunriseConfig {
    pub start_kelvin: u32,
    pub end_kelvin: u32,
    pub start_brightness_pct: u8,
    pub end_brightness_pct: u8,
    pub description: &'static str,
}

impl SunriseProfile {
    pub const ALL: [SunriseProfile; 4] = [Self::Gentle, Self::Natural, Self::Energize, Self::Therapy];

    pub fn name(self) -> &'static str {
        match self {
            Self::Gentle => "gentle",
            Self::Natural => "natural",
            Self::Energize => "energize",
            Self::Therapy => "therapy",
        }
    }

    pub fn config(self) -> SunriseConfig {
        match self {
            Self::Gentle => SunriseConfig {
                start_kelvin: 2200,
                end_kelvin: 3500,
                start_brightness_pct: 5,
                end_brightness_pct: 60,
                description: "Very gentle wake-up with warm light",
            },
            Self::Natural => SunriseConfig {
                start_kelvin: 2700,
                end_kelvin: 5000,
                start_brightness_pct: 10,
                end_brightness_pct: 100,
                description: "Natural sunrise simulation",
            },
            Self::Energize => SunriseConfig {
                start_kelvin: 3500,
                end_kelvin: 6500,
                start_brightness_pct: 20,
                end_brightness_pct: 100,
                description: "Fast energizing wake-up",
            },
            Self::Therapy => SunriseConfig {
                start_kelvin: 2700,
                end_kelvin: 5300,
                start_brightness_pct: 10,
                end_brightness_pct: 100,
                description: "Optimized for light therapy",
            },
        }
    }
}

impl fmt::Display for SunriseProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SunriseProfile {
    type Err = LampError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|profile| profile.name() == wanted)
            .ok_or_else(|| LampError::InvalidArgument(format!("unknown sunrise profile: {}", s)))
    }
}

/// Approximates the RGB colour of a black body at `kelvin` (Tanner Helland).
pub fn kelvin_to_rgb(kelvin: u32) -> Rgb {
    let temperature = kelvin.clamp(1000, 40000) as f64 / 100.0;

    let red = if temperature <= 66.0 {
        255.0
    } else {
        329.698727446 * (temperature - 60.0).powf(-0.1332047592)
    };
    let green = if temperature <= 66.0 {
        99.4708025861 * temperature.ln() - 161.1195681661
    } else {
        288.1221695283 * (temperature - 60.0).powf(-0.0755148492)
    };
    let blue = if temperature >= 66.0 {
        255.0
    } else if temperature <= 19.0 {
        0.0
    } else {
        138.5177312231 * (temperature - 10.0).ln() - 305.0447927307
    };

    (channel(red), channel(green), channel(blue))
}

fn channel(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

/// Nearest colour temperature (1000-10000 K, 100 K steps) for an RGB colour.
pub fn rgb_to_kelvin(rgb: Rgb) -> u32 {
    let distance = |candidate: Rgb| {
        let d = |a: u8, b: u8| (a as i32 - b as i32).pow(2);
        d(candidate.0, rgb.0) + d(candidate.1, rgb.1) + d(candidate.2, rgb.2)
    };
    (10..=100)
        .map(|hundreds| hundreds * 100)
        .min_by_key(|kelvin| distance(kelvin_to_rgb(*kelvin)))
        .unwrap_or(1000)
}

/// What one simulation step asks of the lamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Light { kelvin: u32, brightness_pct: u8 },
    TurnOff,
}

/// Targets of one simulation, one per minute plus the final one.
/// Each step is computed when it is reached, so long durations cost nothing up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationPlan {
    Sunrise {
        steps: u32,
        config: SunriseConfig,
    },
    /// Fixed colour temperature; steps at or below zero turn the lamp off
    Sunset {
        steps: u32,
        start_brightness_pct: u8,
        end_brightness_pct: u8,
        kelvin: u32,
    },
}

impl SimulationPlan {
    pub fn sunrise(duration_minutes: u32, config: &SunriseConfig) -> Self {
        Self::Sunrise {
            steps: duration_minutes.max(1),
            config: *config,
        }
    }

    pub fn sunset(
        duration_minutes: u32,
        start_brightness_pct: u8,
        end_brightness_pct: u8,
        kelvin: u32,
    ) -> Self {
        Self::Sunset {
            steps: duration_minutes.max(1),
            start_brightness_pct,
            end_brightness_pct,
            kelvin,
        }
    }

    /// Intervals between the first and the last action
    pub fn steps(&self) -> u32 {
        match self {
            Self::Sunrise { steps, .. } | Self::Sunset { steps, .. } => *steps,
        }
    }

    /// Action for step `i`, `0..=steps()`
    pub fn action(&self, i: u32) -> StepAction {
        let i = i.min(self.steps()) as f64;
        let steps = self.steps() as f64;

        match *self {
            Self::Sunrise { config, .. } => {
                let kelvin_step = (config.end_kelvin as f64 - config.start_kelvin as f64) / steps;
                let brightness_step =
                    (config.end_brightness_pct as f64 - config.start_brightness_pct as f64) / steps;
                StepAction::Light {
                    kelvin: (config.start_kelvin as f64 + kelvin_step * i) as u32,
                    brightness_pct: (config.start_brightness_pct as f64 + brightness_step * i) as u8,
                }
            }
            Self::Sunset {
                start_brightness_pct,
                end_brightness_pct,
                kelvin,
                ..
            } => {
                let brightness_step =
                    (start_brightness_pct as f64 - end_brightness_pct as f64) / steps;
                let brightness_pct = (start_brightness_pct as f64 - brightness_step * i) as i32;
                if brightness_pct <= 0 {
                    StepAction::TurnOff
                } else {
                    StepAction::Light {
                        kelvin,
                        brightness_pct: brightness_pct.min(100) as u8,
                    }
                }
            }
        }
    }
}

/// How a simulation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SimulationOutcome {
    Completed,
    Stopped,
    /// Gave up after too many failed steps in a row
    Failed { step: u32, consecutive_failures: u32 },
}

#[derive(Default)]
struct Progress {
    running: AtomicBool,
    current_step: AtomicU32,
    total_steps: AtomicU32,
}

impl Progress {
    fn started(total_steps: u32) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(true),
            current_step: AtomicU32::new(0),
            total_steps: AtomicU32::new(total_steps),
        })
    }

    fn reset(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.current_step.store(0, Ordering::SeqCst);
        self.total_steps.store(0, Ordering::SeqCst);
    }
}

struct SimulationTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<SimulationOutcome>,
}

/// Runs at most one sunrise or sunset at a time for one lamp
pub struct SimulationScheduler<T: LampTransport> {
    controller: Arc<LampController<T>>,
    settings: SimulationSettings,
    /// Counters of the latest run; every run gets its own
    progress: std::sync::Mutex<Arc<Progress>>,
    outcome: Arc<watch::Sender<Option<SimulationOutcome>>>,
    task: Mutex<Option<SimulationTask>>,
}

impl<T: LampTransport> SimulationScheduler<T> {
    pub fn new(controller: Arc<LampController<T>>, settings: SimulationSettings) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            controller,
            settings,
            progress: std::sync::Mutex::new(Arc::new(Progress::default())),
            outcome: Arc::new(outcome),
            task: Mutex::new(None),
        }
    }

    fn progress(&self) -> Arc<Progress> {
        lock(&self.progress).clone()
    }

    pub fn is_running(&self) -> bool {
        self.progress().running.load(Ordering::SeqCst)
    }

    /// Percent of steps done, 0 when idle
    pub fn progress_pct(&self) -> u8 {
        let progress = self.progress();
        let total = progress.total_steps.load(Ordering::SeqCst);
        if !progress.running.load(Ordering::SeqCst) || total == 0 {
            return 0;
        }
        let current = progress.current_step.load(Ordering::SeqCst);
        (current.min(total) as u64 * 100 / total as u64) as u8
    }

    /// Outcome of the most recent simulation, `None` while one runs or before the first.
    pub fn last_outcome(&self) -> Option<SimulationOutcome> {
        *self.outcome.borrow()
    }

    /// Starts a sunrise, replacing any running simulation.
    pub async fn start_sunrise(&self, duration_minutes: u32, profile: SunriseProfile) {
        let config = profile.config();
        info!(
            "Starting sunrise: {} min, profile={} ({})",
            duration_minutes, profile, config.description
        );
        let plan = SimulationPlan::sunrise(duration_minutes, &config);
        self.start("sunrise", duration_minutes, plan).await;
    }

    /// Starts a sunset from the lamp's current brightness, replacing any running simulation.
    pub async fn start_sunset(&self, duration_minutes: u32, end_brightness_pct: u8) {
        let state = self.controller.state();
        let current = state.color_brightness.or(state.white_brightness).unwrap_or(255);
        let start_brightness_pct = (current as u32 * 100 / 255) as u8;
        info!(
            "Starting sunset: {} min, {}% -> {}%",
            duration_minutes, start_brightness_pct, end_brightness_pct
        );
        let plan = SimulationPlan::sunset(
            duration_minutes,
            start_brightness_pct,
            end_brightness_pct.min(100),
            self.settings.sunset_kelvin,
        );
        self.start("sunset", duration_minutes, plan).await;
    }

    /// Stops the running simulation and waits until its task has exited.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        self.stop_locked(&mut task).await;
    }

    async fn stop_locked(&self, task: &mut Option<SimulationTask>) {
        let progress = self.progress();
        progress.running.store(false, Ordering::SeqCst);

        if let Some(SimulationTask { cancel_token, handle }) = task.take() {
            cancel_token.cancel();
            debug!("Waiting for simulation task to finish...");
            match handle.await {
                Ok(outcome) => debug!("Simulation task finished: {:?}", outcome),
                Err(e) if e.is_cancelled() => debug!("Simulation task was cancelled"),
                Err(e) => error!("Simulation task finished with an unexpected join error: {:?}", e),
            }
        }
        progress.reset();
    }

    /// Waits for the running simulation to end and returns how it ended.
    pub async fn join(&self) -> Option<SimulationOutcome> {
        if !self.is_running() {
            return self.last_outcome();
        }
        let mut outcome = self.outcome.subscribe();
        let finished = match outcome.wait_for(Option::is_some).await {
            Ok(value) => *value,
            Err(_) => None,
        };
        finished
    }

    /// Replaces the running simulation. The task slot stays locked from the
    /// stop of the old run to the spawn of the new one.
    async fn start(&self, kind: &'static str, duration_minutes: u32, plan: SimulationPlan) {
        let mut task = self.task.lock().await;
        self.stop_locked(&mut task).await;

        let steps = plan.steps();
        let interval = Duration::from_secs_f64(duration_minutes as f64 * 60.0 / steps as f64);
        self.outcome.send_replace(None);
        let progress = Progress::started(steps);
        *lock(&self.progress) = progress.clone();

        let cancel_token = CancellationToken::new();
        let run = SimulationRun {
            kind,
            controller: self.controller.clone(),
            settings: self.settings.clone(),
            progress,
            cancel_token: cancel_token.clone(),
        };
        let outcome = self.outcome.clone();
        let handle = tokio::spawn(async move {
            let result = run.execute(plan, interval).await;
            outcome.send_replace(Some(result));
            run.progress.reset();
            result
        });

        *task = Some(SimulationTask { cancel_token, handle });
    }
}

/// Everything the background task needs, detached from the scheduler
struct SimulationRun<T: LampTransport> {
    kind: &'static str,
    controller: Arc<LampController<T>>,
    settings: SimulationSettings,
    progress: Arc<Progress>,
    cancel_token: CancellationToken,
}

impl<T: LampTransport> SimulationRun<T> {
    fn cancelled(&self) -> bool {
        self.cancel_token.is_cancelled() || !self.progress.running.load(Ordering::SeqCst)
    }

    async fn execute(&self, plan: SimulationPlan, interval: Duration) -> SimulationOutcome {
        let last = plan.steps();
        let mut consecutive_failures = 0;

        for i in 0..=last {
            if self.cancelled() {
                debug!("{} simulation cancelled", self.kind);
                return SimulationOutcome::Stopped;
            }
            let action = plan.action(i);
            self.progress.current_step.store(i, Ordering::SeqCst);
            debug!("{} step {}/{}: {:?}", self.kind, i as u64 + 1, last as u64 + 1, action);

            match self.apply_with_retry(action).await {
                None => return SimulationOutcome::Stopped,
                Some(true) => consecutive_failures = 0,
                Some(false) => {
                    consecutive_failures += 1;
                    warn!(
                        "{} step {} failed, continuing... ({} consecutive failures)",
                        self.kind,
                        i as u64 + 1,
                        consecutive_failures
                    );
                    if consecutive_failures >= self.settings.max_consecutive_failures {
                        error!(
                            "Too many consecutive failures ({}), stopping {}",
                            consecutive_failures, self.kind
                        );
                        return SimulationOutcome::Failed {
                            step: i,
                            consecutive_failures,
                        };
                    }
                }
            }

            if i < last && !self.pause(interval).await {
                return SimulationOutcome::Stopped;
            }
        }

        info!("{} simulation completed", self.kind);
        SimulationOutcome::Completed
    }

    /// Applies one step, reconnecting before each attempt if needed.
    /// Returns `None` when cancelled, otherwise whether the step went through.
    async fn apply_with_retry(&self, action: StepAction) -> Option<bool> {
        let attempts = self.settings.retry_attempts.max(1);

        for attempt in 1..=attempts {
            let result = tokio::select! {
                _ = self.cancel_token.cancelled() => return None,
                result = self.attempt(action) => result,
            };
            match result {
                Ok(()) => return Some(true),
                Err(e) => warn!("Action failed (attempt {}/{}): {}", attempt, attempts, e),
            }

            if attempt < attempts && !self.pause(self.settings.retry_delay()).await {
                return None;
            }
        }
        Some(false)
    }

    async fn attempt(&self, action: StepAction) -> Result<()> {
        if !self.controller.is_connected().await {
            debug!("Not connected, attempting reconnect...");
            self.controller.connect().await?;
        }

        match action {
            StepAction::Light { kelvin, brightness_pct } => {
                self.controller
                    .set_color_with_brightness(kelvin_to_rgb(kelvin), pct_to_level(brightness_pct))
                    .await
            }
            StepAction::TurnOff => self.controller.turn_off().await,
        }
    }

    /// Sleeps unless cancelled first; false means cancelled.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel_token.cancelled() => false,
            _ = sleep(delay) => !self.cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::timing_config::{ConnectionSettings, ProtocolTiming};
    use crate::core::bluetooth::commands::LampCommand;
    use crate::core::bluetooth::connection::ConnectionManager;
    use crate::core::bluetooth::constants::{CMD_COLOR, CMD_OFF};
    use crate::core::bluetooth::types::Mode;
    use crate::core::device::{DeviceStateMachine, IssuedCommand, StateEvent};
    use crate::testing::MockTransport;

    async fn scheduler() -> (Arc<MockTransport>, SimulationScheduler<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let connection = ConnectionManager::new(
            "AA:BB:CC:DD:EE:FF",
            transport.clone(),
            Arc::new(DeviceStateMachine::new()),
            ProtocolTiming::default(),
            ConnectionSettings::default(),
        );
        let controller = Arc::new(LampController::new(connection));
        controller.connect().await.unwrap();
        transport.clear_written();
        (transport, SimulationScheduler::new(controller, SimulationSettings::default()))
    }

    #[test]
    fn kelvin_reference_colours() {
        assert_eq!(kelvin_to_rgb(2700), (255, 166, 87));
        assert_eq!(kelvin_to_rgb(5300), (255, 233, 215));
        assert_eq!(kelvin_to_rgb(6600), (255, 255, 255));
        assert_eq!(kelvin_to_rgb(10000), (201, 218, 255));
        assert_eq!(kelvin_to_rgb(100), kelvin_to_rgb(1000));
    }

    #[test]
    fn rgb_to_kelvin_finds_nearest() {
        assert_eq!(rgb_to_kelvin(kelvin_to_rgb(5300)), 5300);
        assert_eq!(rgb_to_kelvin((255, 255, 255)), 6600);
        assert_eq!(rgb_to_kelvin((255, 0, 0)), 1000);
    }

    #[test]
    fn profile_parsing() {
        assert_eq!("Therapy".parse::<SunriseProfile>().unwrap(), SunriseProfile::Therapy);
        assert_eq!(" gentle ".parse::<SunriseProfile>().unwrap(), SunriseProfile::Gentle);
        assert!("dawn".parse::<SunriseProfile>().is_err());
        assert_eq!(SunriseProfile::default(), SunriseProfile::Natural);
    }

    #[test]
    fn sunrise_plan_is_monotonic() {
        for profile in SunriseProfile::ALL {
            let config = profile.config();
            for minutes in [0, 1, 7, 15, 30] {
                let plan = SimulationPlan::sunrise(minutes, &config);
                assert_eq!(plan.steps(), minutes.max(1));

                let values: Vec<(u32, u8)> = (0..=plan.steps())
                    .map(|i| match plan.action(i) {
                        StepAction::Light { kelvin, brightness_pct } => (kelvin, brightness_pct),
                        StepAction::TurnOff => panic!("sunrise never turns off"),
                    })
                    .collect();
                assert!(values.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 <= w[1].1));
                assert_eq!(values[0], (config.start_kelvin, config.start_brightness_pct));
                // truncation may land one unit short of the profile end
                let (kelvin, brightness) = *values.last().unwrap();
                assert!(config.end_kelvin - kelvin <= 1);
                assert!(config.end_brightness_pct - brightness <= 1);
            }
        }
    }

    #[test]
    fn sunset_plan_ends_in_turn_off() {
        let plan = SimulationPlan::sunset(10, 78, 0, 2700);
        assert_eq!(plan.steps(), 10);
        assert_eq!(plan.action(0), StepAction::Light { kelvin: 2700, brightness_pct: 78 });
        assert_eq!(plan.action(10), StepAction::TurnOff);
        assert!((0..10).all(|i| matches!(plan.action(i), StepAction::Light { .. })));

        let plan = SimulationPlan::sunset(4, 100, 20, 2700);
        assert_eq!(plan.action(4), StepAction::Light { kelvin: 2700, brightness_pct: 20 });
    }

    #[test]
    fn longest_plan_is_computed_per_step() {
        let config = SunriseProfile::Energize.config();
        let plan = SimulationPlan::sunrise(u32::MAX, &config);
        assert_eq!(plan.steps(), u32::MAX);
        assert_eq!(
            plan.action(0),
            StepAction::Light {
                kelvin: config.start_kelvin,
                brightness_pct: config.start_brightness_pct
            }
        );
        match plan.action(u32::MAX) {
            StepAction::Light { kelvin, brightness_pct } => {
                assert!(config.end_kelvin - kelvin <= 1);
                assert!(config.end_brightness_pct - brightness_pct <= 1);
            }
            StepAction::TurnOff => panic!("sunrise never turns off"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn very_long_sunrise_starts_and_stops() {
        let (transport, scheduler) = scheduler().await;
        scheduler.start_sunrise(u32::MAX, SunriseProfile::Natural).await;
        sleep(Duration::from_secs(5)).await;
        assert!(scheduler.is_running());
        assert_eq!(scheduler.progress_pct(), 0);
        assert!(transport.written_opcodes().contains(&CMD_COLOR));

        scheduler.stop().await;
        assert_eq!(scheduler.last_outcome(), Some(SimulationOutcome::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn sunset_from_color_brightness_turns_off_at_the_end() {
        let (transport, scheduler) = scheduler().await;
        scheduler
            .controller
            .connection()
            .device()
            .apply(StateEvent::Issued(IssuedCommand::ColorBrightness(200)));

        scheduler.start_sunset(10, 0).await;
        assert!(scheduler.is_running());
        assert_eq!(scheduler.join().await, Some(SimulationOutcome::Completed));
        assert!(!scheduler.is_running());

        let opcodes = transport.written_opcodes();
        let colours = opcodes.iter().filter(|op| **op == CMD_COLOR).count();
        assert_eq!(colours, 10);
        let last_colour = opcodes.iter().rposition(|op| *op == CMD_COLOR).unwrap();
        let first_off = opcodes.iter().position(|op| *op == CMD_OFF).unwrap();
        assert!(last_colour < first_off);
        assert!(
            transport
                .written_commands()
                .contains(&LampCommand::Brightness(Mode::Rgb, 78).to_bytes())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sunrise_reports_progress_while_running() {
        let (_transport, scheduler) = scheduler().await;
        scheduler.start_sunrise(10, SunriseProfile::Therapy).await;
        sleep(Duration::from_secs(150)).await;

        let progress = scheduler.progress_pct();
        assert!(progress > 0 && progress < 100, "progress {}", progress);

        scheduler.stop().await;
        assert_eq!(scheduler.progress_pct(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_all_lamp_traffic() {
        let (transport, scheduler) = scheduler().await;
        scheduler.start_sunrise(10, SunriseProfile::Natural).await;
        sleep(Duration::from_secs(90)).await;

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.last_outcome(), Some(SimulationOutcome::Stopped));

        let written = transport.written_commands().len();
        sleep(Duration::from_secs(3600)).await;
        assert_eq!(transport.written_commands().len(), written);

        // idempotent
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_right_after_start_sends_nothing_later() {
        let (transport, scheduler) = scheduler().await;
        scheduler.start_sunrise(5, SunriseProfile::Gentle).await;
        scheduler.stop().await;

        let written = transport.written_commands().len();
        sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.written_commands().len(), written);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn starting_again_replaces_running_simulation() {
        let (_transport, scheduler) = scheduler().await;
        scheduler.start_sunrise(30, SunriseProfile::Natural).await;
        sleep(Duration::from_secs(61)).await;

        scheduler.start_sunset(1, 50).await;
        assert!(scheduler.is_running());
        assert_eq!(scheduler.join().await, Some(SimulationOutcome::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_starts_leave_one_simulation() {
        let (transport, scheduler) = scheduler().await;
        scheduler.start_sunrise(30, SunriseProfile::Natural).await;
        sleep(Duration::from_secs(5)).await;

        tokio::join!(
            scheduler.start_sunrise(30, SunriseProfile::Natural),
            scheduler.start_sunrise(30, SunriseProfile::Energize),
        );
        assert!(scheduler.is_running());
        sleep(Duration::from_secs(90)).await;
        assert!(scheduler.is_running());

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        transport.clear_written();
        sleep(Duration::from_secs(600)).await;
        assert!(transport.written_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_run_does_not_clear_the_new_one() {
        let (_transport, scheduler) = scheduler().await;
        scheduler.start_sunrise(30, SunriseProfile::Gentle).await;
        sleep(Duration::from_secs(61)).await;

        scheduler.start_sunrise(30, SunriseProfile::Therapy).await;
        sleep(Duration::from_secs(150)).await;
        assert!(scheduler.is_running());
        let progress = scheduler.progress_pct();
        assert!(progress > 0 && progress < 100, "progress {}", progress);
        assert_eq!(scheduler.last_outcome(), None);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failures_abort_the_simulation() {
        let (transport, scheduler) = scheduler().await;
        transport.fail_writes(usize::MAX);

        scheduler.start_sunrise(10, SunriseProfile::Energize).await;
        assert_eq!(
            scheduler.join().await,
            Some(SimulationOutcome::Failed { step: 4, consecutive_failures: 5 })
        );
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let (transport, scheduler) = scheduler().await;
        transport.fail_writes(1);

        scheduler.start_sunrise(1, SunriseProfile::Natural).await;
        assert_eq!(scheduler.join().await, Some(SimulationOutcome::Completed));
        assert!(transport.open_count() >= 2);
    }
}
