use crate::domain::models::{Session, Subtask, Task};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration_seconds: u32,
    #[serde(default)]
    pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration_seconds: u32,
    #[serde(default)]
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtasks: Option<Vec<SubtaskDto>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_predefined: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u32>,
    #[serde(default)]
    pub tasks: Option<Vec<TaskDto>>,
}

pub fn to_dto(session: &Session) -> SessionDto {
    SessionDto {
        id: session.id,
        title: session.name.clone(),
        description: session.description.clone(),
        is_predefined: Some(session.is_system_generated),
        duration_seconds: Some(session.total_duration_seconds.unwrap_or(0)),
        total_duration: None,
        tasks: Some(
            session
                .tasks
                .iter()
                .enumerate()
                .map(|(index, task)| encode_task(task, index))
                .collect(),
        ),
    }
}

fn encode_task(task: &Task, index: usize) -> TaskDto {
    let subtasks = task.active_subtasks();
    TaskDto {
        id: task.id,
        title: task.name.clone(),
        duration_seconds: task.effective_duration_seconds(),
        order: position(index),
        subtasks: (!subtasks.is_empty()).then(|| {
            subtasks
                .iter()
                .enumerate()
                .map(|(sub_index, subtask)| SubtaskDto {
                    id: subtask.id,
                    title: subtask.name.clone(),
                    duration_seconds: subtask.duration_seconds,
                    order: subtask
                        .order
                        .filter(|order| *order > 0)
                        .unwrap_or_else(|| position(sub_index)),
                })
                .collect()
        }),
    }
}

fn position(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX - 1).saturating_add(1)
}

pub fn from_dto(dto: SessionDto) -> Session {
    let tasks = dto
        .tasks
        .unwrap_or_default()
        .into_iter()
        .map(|task| {
            let subtasks = task
                .subtasks
                .unwrap_or_default()
                .into_iter()
                .map(|subtask| Subtask {
                    id: subtask.id,
                    name: subtask.title,
                    duration_seconds: subtask.duration_seconds,
                    order: Some(subtask.order),
                })
                .collect::<Vec<_>>();
            Task {
                id: task.id,
                name: task.title,
                has_subtasks: !subtasks.is_empty(),
                duration_seconds: task.duration_seconds,
                order: Some(task.order),
                subtasks,
            }
        })
        .collect::<Vec<_>>();

    let mut session = Session {
        id: dto.id,
        name: dto.title,
        description: dto.description,
        is_timed: false,
        total_duration_seconds: None,
        tasks,
        is_system_generated: dto.is_predefined.unwrap_or(false),
        local_key: None,
    };
    let total = dto
        .total_duration
        .or(dto.duration_seconds)
        .filter(|value| *value > 0)
        .unwrap_or_else(|| session.computed_total_seconds());
    session.is_timed = total > 0;
    session.total_duration_seconds = (total > 0).then_some(total);
    session
}
