use crate::domain::models::Session;
use crate::domain::timer::{AlarmSettings, SessionTimer, TimerEffect, TimerSnapshot, ToggleOutcome};
use crate::infrastructure::error::InfraError;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("unsupported on this platform")]
    Unsupported,
    #[error("{0}")]
    Failed(String),
}

/// Screen wake lock and audible alarm. Both are best effort.
pub trait TimerPlatform: Send + Sync {
    fn acquire_wake_lock(&self) -> Result<(), PlatformError>;
    fn release_wake_lock(&self) -> Result<(), PlatformError>;
    fn start_alarm(&self, max_seconds: u32) -> Result<(), PlatformError>;
    fn stop_alarm(&self) -> Result<(), PlatformError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPlatform;

impl TimerPlatform for NoopPlatform {
    fn acquire_wake_lock(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn release_wake_lock(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn start_alarm(&self, _max_seconds: u32) -> Result<(), PlatformError> {
        Ok(())
    }

    fn stop_alarm(&self) -> Result<(), PlatformError> {
        Ok(())
    }
}

struct RunnerState {
    timer: SessionTimer,
    tick_task: Option<JoinHandle<()>>,
    generation: u64,
}

struct Shared<P> {
    state: Mutex<RunnerState>,
    platform: Arc<P>,
    period: Duration,
    runtime: Handle,
    snapshots: watch::Sender<TimerSnapshot>,
}

/// Drives a `SessionTimer` from one periodic tokio task and carries out the
/// side effects its transitions ask for.
pub struct TimerRunner<P>
where
    P: TimerPlatform + 'static,
{
    shared: Arc<Shared<P>>,
}

impl<P> TimerRunner<P>
where
    P: TimerPlatform + 'static,
{
    /// Must be called from within a tokio runtime.
    pub fn new(
        session: Session,
        settings: AlarmSettings,
        period: Duration,
        platform: Arc<P>,
    ) -> Result<Self, InfraError> {
        if period.is_zero() {
            return Err(InfraError::InvalidConfig(
                "timer tick period must be > 0".to_string(),
            ));
        }
        let runtime = Handle::try_current()
            .map_err(|error| InfraError::Runtime(format!("timer needs a tokio runtime: {error}")))?;
        let timer = SessionTimer::new(session, settings);
        let (snapshots, _) = watch::channel(timer.snapshot());
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RunnerState {
                    timer,
                    tick_task: None,
                    generation: 0,
                }),
                platform,
                period,
                runtime,
                snapshots,
            }),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.shared.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> Result<TimerSnapshot, InfraError> {
        Ok(self.shared.lock()?.timer.snapshot())
    }

    pub fn select_task(&self, index: usize) -> Result<TimerSnapshot, InfraError> {
        self.transition(|timer| timer.select_task(index).map_err(InfraError::from))
    }

    pub fn toggle_play_pause(&self) -> Result<ToggleOutcome, InfraError> {
        let mut outcome = ToggleOutcome::TaskSelectionRequired;
        self.transition(|timer| {
            let (result, effects) = timer.toggle_play_pause();
            outcome = result;
            Ok(effects)
        })?;
        Ok(outcome)
    }

    pub fn start(&self) -> Result<TimerSnapshot, InfraError> {
        self.transition(|timer| Ok(timer.start()))
    }

    pub fn pause(&self) -> Result<TimerSnapshot, InfraError> {
        self.transition(|timer| Ok(timer.pause()))
    }

    pub fn stop(&self) -> Result<TimerSnapshot, InfraError> {
        self.transition(|timer| Ok(timer.stop()))
    }

    pub fn on_visibility_regained(&self) -> Result<(), InfraError> {
        let mut state = self.shared.lock()?;
        let effects = state.timer.on_visibility_regained();
        Shared::apply(&self.shared, &mut state, effects);
        Ok(())
    }

    fn transition<F>(&self, step: F) -> Result<TimerSnapshot, InfraError>
    where
        F: FnOnce(&mut SessionTimer) -> Result<Vec<TimerEffect>, InfraError>,
    {
        let mut state = self.shared.lock()?;
        let effects = step(&mut state.timer)?;
        Shared::apply(&self.shared, &mut state, effects);
        let snapshot = state.timer.snapshot();
        self.shared.snapshots.send_replace(snapshot.clone());
        Ok(snapshot)
    }
}

impl<P> Drop for TimerRunner<P>
where
    P: TimerPlatform + 'static,
{
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            // leaves no wake lock held and no alarm playing behind the runner
            let effects = state.timer.pause();
            Shared::apply(&self.shared, &mut state, effects);
            Shared::<P>::cancel_ticker(&mut state);
        }
    }
}

impl<P> Shared<P>
where
    P: TimerPlatform + 'static,
{
    fn lock(&self) -> Result<MutexGuard<'_, RunnerState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::Runtime(format!("timer state lock poisoned: {error}")))
    }

    fn apply(shared: &Arc<Self>, state: &mut RunnerState, effects: Vec<TimerEffect>) {
        for effect in effects {
            match effect {
                TimerEffect::StartTicking => Self::spawn_ticker(shared, state),
                TimerEffect::StopTicking => Self::cancel_ticker(state),
                TimerEffect::AcquireWakeLock => {
                    if let Err(error) = shared.platform.acquire_wake_lock() {
                        tracing::debug!(%error, "wake lock unavailable");
                    }
                }
                TimerEffect::ReleaseWakeLock => {
                    if let Err(error) = shared.platform.release_wake_lock() {
                        tracing::debug!(%error, "wake lock release failed");
                    }
                }
                TimerEffect::StartAlarm { max_seconds } => {
                    if let Err(error) = shared.platform.start_alarm(max_seconds) {
                        tracing::warn!(%error, "alarm playback failed");
                    }
                }
                TimerEffect::StopAlarm => {
                    if let Err(error) = shared.platform.stop_alarm() {
                        tracing::warn!(%error, "alarm stop failed");
                    }
                }
            }
        }
    }

    fn cancel_ticker(state: &mut RunnerState) {
        state.generation = state.generation.wrapping_add(1);
        if let Some(handle) = state.tick_task.take() {
            handle.abort();
        }
    }

    fn spawn_ticker(shared: &Arc<Self>, state: &mut RunnerState) {
        Self::cancel_ticker(state);
        let generation = state.generation;
        let period = shared.period;
        let weak = Arc::downgrade(shared);

        let task = shared.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let Ok(mut state) = shared.state.lock() else {
                    return;
                };
                // a pause, stop or reselect since spawning retires this task
                if state.generation != generation {
                    return;
                }
                let effects = state.timer.tick();
                Self::apply(&shared, &mut state, effects);
                shared.snapshots.send_replace(state.timer.snapshot());
            }
        });
        state.tick_task = Some(task);
    }
}
