//! Three-level countdown/countup state machine: session clock, selected task
//! clock, current subtask clock.
//!
//! The machine is pure. Every transition returns the side effects the caller
//! has to carry out (tick source, wake lock, alarm); `tick()` is driven by
//! whoever owns the tick source.

use crate::domain::models::{Session, Task};
use serde::Serialize;
use thiserror::Error;

const DEFAULT_WARNING_THRESHOLD_SECONDS: u32 = 3;
const DEFAULT_MAX_ALARM_SECONDS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("task index {0} is out of range")]
    TaskNotFound(usize),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    TaskSelected,
    Running,
    Paused,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::TaskSelected => "task_selected",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEffect {
    StartTicking,
    StopTicking,
    AcquireWakeLock,
    ReleaseWakeLock,
    StartAlarm { max_seconds: u32 },
    StopAlarm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started,
    Paused,
    TaskSelectionRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmSettings {
    pub warning_threshold_seconds: u32,
    pub max_alarm_seconds: u32,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            warning_threshold_seconds: DEFAULT_WARNING_THRESHOLD_SECONDS,
            max_alarm_seconds: DEFAULT_MAX_ALARM_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    pub session_seconds: i64,
    pub task_seconds: i64,
    pub subtask_seconds: i64,
    pub selected_task_index: Option<usize>,
    pub selected_task_name: Option<String>,
    pub current_subtask_index: usize,
    pub warning: bool,
    pub alarm_active: bool,
    pub ticks: u64,
}

#[derive(Debug, Clone)]
pub struct SessionTimer {
    session: Session,
    settings: AlarmSettings,
    phase: TimerPhase,
    session_seconds: i64,
    task_seconds: i64,
    subtask_seconds: i64,
    selected_task: Option<usize>,
    current_subtask: usize,
    warning: bool,
    alarm_ticks_left: u32,
    ticks: u64,
}

impl SessionTimer {
    pub fn new(session: Session, settings: AlarmSettings) -> Self {
        let session_seconds = i64::from(session.countdown_seconds());
        Self {
            session,
            settings,
            phase: TimerPhase::Idle,
            session_seconds,
            task_seconds: 0,
            subtask_seconds: 0,
            selected_task: None,
            current_subtask: 0,
            warning: false,
            alarm_ticks_left: 0,
            ticks: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    pub fn session_seconds(&self) -> i64 {
        self.session_seconds
    }

    pub fn task_seconds(&self) -> i64 {
        self.task_seconds
    }

    pub fn subtask_seconds(&self) -> i64 {
        self.subtask_seconds
    }

    pub fn current_subtask_index(&self) -> usize {
        self.current_subtask
    }

    pub fn selected_task_index(&self) -> Option<usize> {
        self.selected_task
    }

    pub fn alarm_active(&self) -> bool {
        self.alarm_ticks_left > 0
    }

    pub fn warning(&self) -> bool {
        self.warning
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            phase: self.phase,
            session_seconds: self.session_seconds,
            task_seconds: self.task_seconds,
            subtask_seconds: self.subtask_seconds,
            selected_task_index: self.selected_task,
            selected_task_name: self.selected_task().map(|task| task.name.clone()),
            current_subtask_index: self.current_subtask,
            warning: self.warning,
            alarm_active: self.alarm_active(),
            ticks: self.ticks,
        }
    }

    /// Selecting while running restarts the tick source with fresh task clocks.
    pub fn select_task(&mut self, index: usize) -> Result<Vec<TimerEffect>, TimerError> {
        if index >= self.session.tasks.len() {
            return Err(TimerError::TaskNotFound(index));
        }

        let was_running = self.is_running();
        let mut effects = Vec::new();
        if was_running {
            effects.extend(self.pause());
        }

        self.selected_task = Some(index);
        self.reset_task_clocks();

        if was_running {
            effects.extend(self.start());
        } else if self.phase == TimerPhase::Idle {
            self.phase = TimerPhase::TaskSelected;
        }
        Ok(effects)
    }

    pub fn toggle_play_pause(&mut self) -> (ToggleOutcome, Vec<TimerEffect>) {
        if !self.session.tasks.is_empty() && self.selected_task.is_none() {
            return (ToggleOutcome::TaskSelectionRequired, Vec::new());
        }
        if self.is_running() {
            (ToggleOutcome::Paused, self.pause())
        } else {
            (ToggleOutcome::Started, self.start())
        }
    }

    pub fn start(&mut self) -> Vec<TimerEffect> {
        if self.is_running() {
            return Vec::new();
        }
        self.phase = TimerPhase::Running;
        vec![TimerEffect::StartTicking, TimerEffect::AcquireWakeLock]
    }

    pub fn pause(&mut self) -> Vec<TimerEffect> {
        if !self.is_running() {
            return Vec::new();
        }
        self.phase = TimerPhase::Paused;
        let mut effects = vec![TimerEffect::StopTicking, TimerEffect::ReleaseWakeLock];
        // warning only holds while a clock is running
        effects.extend(self.update_alarm(false));
        effects
    }

    pub fn stop(&mut self) -> Vec<TimerEffect> {
        let mut effects = Vec::new();
        if self.is_running() {
            effects.push(TimerEffect::StopTicking);
        }
        effects.push(TimerEffect::ReleaseWakeLock);
        if self.alarm_active() {
            effects.push(TimerEffect::StopAlarm);
        }
        self.alarm_ticks_left = 0;
        self.warning = false;

        self.session_seconds = i64::from(self.session.countdown_seconds());
        if self.selected_task.is_some() {
            self.reset_task_clocks();
            self.phase = TimerPhase::TaskSelected;
        } else {
            self.task_seconds = 0;
            self.subtask_seconds = 0;
            self.current_subtask = 0;
            self.phase = TimerPhase::Idle;
        }
        effects
    }

    pub fn on_visibility_regained(&self) -> Vec<TimerEffect> {
        if self.is_running() {
            vec![TimerEffect::AcquireWakeLock]
        } else {
            Vec::new()
        }
    }

    /// One time unit. Order: session clock, task/subtask clocks, alarm.
    pub fn tick(&mut self) -> Vec<TimerEffect> {
        if !self.is_running() {
            return Vec::new();
        }
        self.ticks = self.ticks.saturating_add(1);

        if self.session.countdown_seconds() > 0 {
            self.session_seconds -= 1;
        } else {
            self.session_seconds += 1;
        }

        if let Some(task) = self.selected_task().cloned() {
            self.tick_task(&task);
        }

        let warning = self.in_warning();
        self.update_alarm(warning)
    }

    fn tick_task(&mut self, task: &Task) {
        if task.effective_duration_seconds() == 0 {
            self.task_seconds += 1;
            return;
        }

        let subtasks = task.active_subtasks();
        if subtasks.is_empty() {
            self.task_seconds -= 1;
            return;
        }

        let last = subtasks.len() - 1;
        if self.current_subtask >= last && self.subtask_seconds <= 0 {
            // every subtask is spent: the task clock overruns on its own
            self.task_seconds -= 1;
            return;
        }

        self.subtask_seconds = (self.subtask_seconds - 1).max(0);
        if self.subtask_seconds == 0 && self.current_subtask < last {
            self.current_subtask += 1;
            self.subtask_seconds = i64::from(subtasks[self.current_subtask].duration_seconds);
        }

        let later: i64 = subtasks[self.current_subtask + 1..]
            .iter()
            .map(|subtask| i64::from(subtask.duration_seconds))
            .sum();
        self.task_seconds = self.subtask_seconds + later;
    }

    fn in_warning(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let threshold = i64::from(self.settings.warning_threshold_seconds);
        let session_warning =
            self.session.countdown_seconds() > 0 && self.session_seconds <= threshold;
        let task_warning = self
            .selected_task()
            .map(|task| task.effective_duration_seconds() > 0 && self.task_seconds <= threshold)
            .unwrap_or(false);
        session_warning || task_warning
    }

    fn update_alarm(&mut self, warning: bool) -> Vec<TimerEffect> {
        let mut effects = Vec::new();
        match (self.warning, warning) {
            (false, true) => {
                if self.settings.max_alarm_seconds > 0 {
                    self.alarm_ticks_left = self.settings.max_alarm_seconds;
                    effects.push(TimerEffect::StartAlarm {
                        max_seconds: self.settings.max_alarm_seconds,
                    });
                }
            }
            (true, true) => {
                if self.alarm_ticks_left > 0 {
                    self.alarm_ticks_left -= 1;
                    if self.alarm_ticks_left == 0 {
                        effects.push(TimerEffect::StopAlarm);
                    }
                }
            }
            (true, false) => {
                if self.alarm_ticks_left > 0 {
                    self.alarm_ticks_left = 0;
                    effects.push(TimerEffect::StopAlarm);
                }
            }
            (false, false) => {}
        }
        self.warning = warning;
        effects
    }

    fn selected_task(&self) -> Option<&Task> {
        self.selected_task
            .and_then(|index| self.session.tasks.get(index))
    }

    fn reset_task_clocks(&mut self) {
        let Some(task) = self.selected_task() else {
            return;
        };
        let task_seconds = i64::from(task.effective_duration_seconds());
        let subtask_seconds = task
            .active_subtasks()
            .first()
            .map(|subtask| i64::from(subtask.duration_seconds))
            .unwrap_or(0);
        self.task_seconds = task_seconds;
        self.subtask_seconds = subtask_seconds;
        self.current_subtask = 0;
    }
}
