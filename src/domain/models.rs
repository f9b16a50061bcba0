use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const COPY_SUFFIX: &str = " (copy)";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub duration_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
}

impl Subtask {
    pub fn new(name: impl Into<String>, duration_seconds: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            duration_seconds,
            order: None,
        }
    }

    pub fn validate(&self, position: usize) -> Result<(), String> {
        validate_non_empty(&self.name, &format!("subtask[{position}].name"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub has_subtasks: bool,
    pub duration_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

impl Task {
    pub fn simple(name: impl Into<String>, duration_seconds: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            has_subtasks: false,
            duration_seconds,
            order: None,
            subtasks: Vec::new(),
        }
    }

    /// Builds a task whose stored duration already equals the sum of its subtasks.
    pub fn with_subtasks(name: impl Into<String>, subtasks: Vec<Subtask>) -> Self {
        let mut task = Self {
            id: None,
            name: name.into(),
            has_subtasks: true,
            duration_seconds: 0,
            order: None,
            subtasks,
        };
        task.duration_seconds = task.effective_duration_seconds();
        task
    }

    /// Subtasks that drive timing. Stored subtasks of a task without
    /// `has_subtasks` are ignored.
    pub fn active_subtasks(&self) -> &[Subtask] {
        if self.has_subtasks {
            &self.subtasks
        } else {
            &[]
        }
    }

    pub fn effective_duration_seconds(&self) -> u32 {
        let subtasks = self.active_subtasks();
        if subtasks.is_empty() {
            return self.duration_seconds;
        }
        subtasks
            .iter()
            .fold(0u32, |acc, subtask| acc.saturating_add(subtask.duration_seconds))
    }

    pub fn validate(&self, position: usize) -> Result<(), String> {
        validate_non_empty(&self.name, &format!("task[{position}].name"))?;
        if self.has_subtasks {
            if self.subtasks.is_empty() {
                return Err(format!(
                    "task[{position}].subtasks must not be empty when has_subtasks"
                ));
            }
            for (index, subtask) in self.subtasks.iter().enumerate() {
                subtask.validate(index)?;
            }
        }
        // a zero duration marks an untimed task whose clock counts up
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_timed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_seconds: Option<u32>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_system_generated: bool,
    /// Stable handle for sessions that never reached the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_key: Option<String>,
}

impl Session {
    pub fn new(name: impl Into<String>, total_duration_seconds: Option<u32>, tasks: Vec<Task>) -> Self {
        let total = total_duration_seconds.filter(|value| *value > 0);
        Self {
            id: None,
            name: name.into(),
            description: None,
            is_timed: total.is_some(),
            total_duration_seconds: total,
            tasks,
            is_system_generated: false,
            local_key: None,
        }
    }

    pub fn is_local_only(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_hideable_template(&self) -> bool {
        self.id.is_some() && self.is_system_generated
    }

    pub fn computed_total_seconds(&self) -> u32 {
        self.tasks
            .iter()
            .fold(0u32, |acc, task| acc.saturating_add(task.effective_duration_seconds()))
    }

    /// Explicit total when configured, otherwise the sum of effective task durations.
    pub fn planned_total_seconds(&self) -> u32 {
        self.total_duration_seconds
            .filter(|value| *value > 0)
            .unwrap_or_else(|| self.computed_total_seconds())
    }

    /// Initial value of the session clock; zero means the clock counts up.
    pub fn countdown_seconds(&self) -> u32 {
        if !self.is_timed {
            return 0;
        }
        self.total_duration_seconds.unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "session.name")?;
        for (index, task) in self.tasks.iter().enumerate() {
            task.validate(index)?;
        }
        Ok(())
    }

    pub fn ensure_local_key(&mut self) -> &str {
        self.local_key
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .as_str()
    }

    /// Deep copy that is never synced nor a template. Nested server ids are
    /// cleared so the copy is created fresh.
    pub fn duplicate(&self) -> Session {
        let mut copy = self.clone();
        copy.id = None;
        copy.is_system_generated = false;
        copy.name.push_str(COPY_SUFFIX);
        copy.local_key = Some(Uuid::new_v4().to_string());
        for task in &mut copy.tasks {
            task.id = None;
            for subtask in &mut task.subtasks {
                subtask.id = None;
            }
        }
        copy
    }

    /// Identity for local-only sessions: the local key when both sides carry
    /// one, exact serialized equality otherwise.
    pub fn same_local_identity(&self, other: &Session) -> bool {
        match (self.local_key.as_deref(), other.local_key.as_deref()) {
            (Some(left), Some(right)) => left == right,
            _ => structurally_equal(self, other),
        }
    }

    pub fn matches_search(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&query)
            || self
                .tasks
                .iter()
                .any(|task| task.name.to_lowercase().contains(&query))
    }
}

pub fn structurally_equal(left: &Session, right: &Session) -> bool {
    match (serde_json::to_string(left), serde_json::to_string(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

/// `HH:MM:SS`, prefixed with `-` once a countdown overruns.
pub fn format_clock(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let value = seconds.unsigned_abs();
    let hours = value / 3600;
    let minutes = (value % 3600) / 60;
    let secs = value % 60;
    format!("{sign}{hours:02}:{minutes:02}:{secs:02}")
}

pub fn format_duration_human(seconds: u32) -> String {
    if seconds == 0 {
        return "0s".to_string();
    }
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 {
        parts.push(format!("{secs}s"));
    }
    parts.join(" ")
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
