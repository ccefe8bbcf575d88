use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::ApiDb;

/// Upper bound on rows returned by a list call.
pub const TASK_LIST_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Doing,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown task status '{0}'")]
pub struct InvalidTaskStatus(String);

impl std::str::FromStr for TaskStatus {
    type Err = InvalidTaskStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "todo" => Ok(Self::Todo),
            "doing" => Ok(Self::Doing),
            "done" => Ok(Self::Done),
            other => Err(InvalidTaskStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn create(user_id: &str, title: String, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("task_{}", Uuid::new_v4().simple()),
            user_id: user_id.to_string(),
            title,
            status: TaskStatus::Todo,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error("db error: {0}")]
    Db(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Task>, TaskStoreError>;

    async fn insert(&self, task: Task) -> Result<Task, TaskStoreError>;

    /// Updates the status of a task owned by `user_id`. Returns `None` when no
    /// row matches both the id and the owner.
    async fn patch_status(
        &self,
        id: &str,
        user_id: &str,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, TaskStoreError>;
}

pub fn memory() -> Arc<dyn TaskStore> {
    Arc::new(MemoryTaskStore::default())
}

pub fn postgres(db: Arc<ApiDb>) -> Arc<dyn TaskStore> {
    Arc::new(PostgresTaskStore { db })
}

#[derive(Default)]
struct MemoryTaskStore {
    inner: Mutex<HashMap<String, Task>>,
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Task>, TaskStoreError> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .values()
            .filter(|task| task.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        tasks.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(tasks)
    }

    async fn insert(&self, task: Task) -> Result<Task, TaskStoreError> {
        let mut inner = self.inner.lock().await;
        inner.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn patch_status(
        &self,
        id: &str,
        user_id: &str,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, TaskStoreError> {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.get_mut(id) else {
            return Ok(None);
        };
        if task.user_id != user_id {
            return Ok(None);
        }
        task.status = status;
        task.updated_at = now;
        Ok(Some(task.clone()))
    }
}

struct PostgresTaskStore {
    db: Arc<ApiDb>,
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Task>, TaskStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let rows = client
            .query(
                r#"
                SELECT id, user_id, title, status, created_at, updated_at
                  FROM tasks
                 WHERE user_id = $1
                 ORDER BY updated_at DESC
                 LIMIT $2
                "#,
                &[&user_id, &limit],
            )
            .await
            .map_err(|error| TaskStoreError::Db(error.to_string()))?;
        rows.iter()
            .map(map_task_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(TaskStoreError::Db)
    }

    async fn insert(&self, task: Task) -> Result<Task, TaskStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let status = task.status.as_str();
        client
            .execute(
                r#"
                INSERT INTO tasks (id, user_id, title, status, created_at, updated_at)
                VALUES ($1,$2,$3,$4,$5,$6)
                "#,
                &[
                    &task.id,
                    &task.user_id,
                    &task.title,
                    &status,
                    &task.created_at,
                    &task.updated_at,
                ],
            )
            .await
            .map_err(|error| TaskStoreError::Db(error.to_string()))?;
        Ok(task)
    }

    async fn patch_status(
        &self,
        id: &str,
        user_id: &str,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, TaskStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let status_text = status.as_str();
        let row = client
            .query_opt(
                r#"
                UPDATE tasks
                   SET status = $3, updated_at = $4
                 WHERE id = $1 AND user_id = $2
                RETURNING id, user_id, title, status, created_at, updated_at
                "#,
                &[&id, &user_id, &status_text, &now],
            )
            .await
            .map_err(|error| TaskStoreError::Db(error.to_string()))?;
        row.as_ref()
            .map(map_task_row)
            .transpose()
            .map_err(TaskStoreError::Db)
    }
}

fn map_task_row(row: &tokio_postgres::Row) -> Result<Task, String> {
    let status_raw: String = row.try_get("status").map_err(|e| e.to_string())?;
    let status = status_raw
        .parse::<TaskStatus>()
        .map_err(|error| error.to_string())?;
    Ok(Task {
        id: row.try_get("id").map_err(|e| e.to_string())?,
        user_id: row.try_get("user_id").map_err(|e| e.to_string())?,
        title: row.try_get("title").map_err(|e| e.to_string())?,
        status,
        created_at: row.try_get("created_at").map_err(|e| e.to_string())?,
        updated_at: row.try_get("updated_at").map_err(|e| e.to_string())?,
    })
}
