use crate::db::{Db, DbError, TaskRow};
use chrono::{DateTime, Utc};
use kt_protocol::{Task, TaskFields, TaskStatus};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("El título es obligatorio")]
    MissingTitle,
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Task rules keyed by the acting user.
pub trait TaskService: Send + Sync {
    /// Create a task owned by `creator`. `title` must be present and non-blank.
    fn create(&self, fields: TaskFields, creator: i64) -> Result<Task, TaskError>;
    fn list_for_user(&self, user_id: i64) -> Result<Vec<Task>, TaskError>;
    /// `None` when the task is missing or `user_id` neither created nor is
    /// assigned to it.
    fn get_for_user(&self, id: i64, user_id: i64) -> Result<Option<Task>, TaskError>;
    /// Apply the present fields. `None` when the task is missing or
    /// `user_id` is not its creator.
    fn update(&self, id: i64, patch: TaskFields, user_id: i64) -> Result<Option<Task>, TaskError>;
    /// `false` when the task is missing or `user_id` is not its creator.
    fn delete(&self, id: i64, user_id: i64) -> Result<bool, TaskError>;
}

pub struct SqliteTaskService {
    db: Arc<Db>,
}

impl SqliteTaskService {
    pub fn new(db: Arc<Db>) -> Self {
        SqliteTaskService { db }
    }
}

impl TaskService for SqliteTaskService {
    fn create(&self, fields: TaskFields, creator: i64) -> Result<Task, TaskError> {
        let title = fields
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(TaskError::MissingTitle)?
            .to_owned();
        let now = Utc::now();
        let status = fields.status.unwrap_or_default();
        // Clients that only know the single-assignee field still get an assignment.
        let assignees = match (&fields.assigned_users, fields.assigned_to) {
            (Some(users), _) => dedup(users),
            (None, Some(single)) => vec![single],
            (None, None) => Vec::new(),
        };
        let row = TaskRow {
            title,
            description: fields.description,
            status,
            category: fields.category,
            assigned_to: fields.assigned_to,
            due_date: fields.due_date,
            completed_at: (status == TaskStatus::Completed).then_some(now),
        };
        let id = self.db.insert_task(&row, creator, &assignees, now)?;
        info!(task_id = id, created_by = creator, assignees = assignees.len(), "task created");
        self.db
            .task_by_id(id)?
            .ok_or(TaskError::Db(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows)))
    }

    fn list_for_user(&self, user_id: i64) -> Result<Vec<Task>, TaskError> {
        Ok(self.db.tasks_visible_to(user_id)?)
    }

    fn get_for_user(&self, id: i64, user_id: i64) -> Result<Option<Task>, TaskError> {
        Ok(self.db.task_by_id(id)?.filter(|t| t.is_visible_to(user_id)))
    }

    fn update(&self, id: i64, patch: TaskFields, user_id: i64) -> Result<Option<Task>, TaskError> {
        let Some(current) = self.db.task_by_id(id)? else {
            return Ok(None);
        };
        if current.created_by != user_id {
            return Ok(None);
        }
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(TaskError::MissingTitle);
        }

        let now = Utc::now();
        let status = patch.status.unwrap_or(current.status);
        let completed_at = completion_stamp(current.status, current.completed_at, status, now);
        let row = TaskRow {
            title: patch.title.map_or(current.title, |t| t.trim().to_owned()),
            description: patch.description.or(current.description),
            status,
            category: patch.category.or(current.category),
            assigned_to: patch.assigned_to.or(current.assigned_to),
            due_date: patch.due_date.or(current.due_date),
            completed_at,
        };
        let assignees = patch.assigned_users.as_deref().map(dedup);
        if !self.db.update_task(id, &row, assignees.as_deref(), now)? {
            return Ok(None);
        }
        info!(task_id = id, user_id, status = status.as_str(), "task updated");
        Ok(self.db.task_by_id(id)?)
    }

    fn delete(&self, id: i64, user_id: i64) -> Result<bool, TaskError> {
        match self.db.task_by_id(id)? {
            Some(task) if task.created_by == user_id => {
                let deleted = self.db.delete_task(id)?;
                if deleted {
                    info!(task_id = id, user_id, "task deleted");
                }
                Ok(deleted)
            }
            _ => Ok(false),
        }
    }
}

/// `completedAt` after a status change: stamped on entry into COMPLETED,
/// kept while it stays COMPLETED, cleared on any other status.
fn completion_stamp(
    old: TaskStatus,
    old_stamp: Option<DateTime<Utc>>,
    new: TaskStatus,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match (old, new) {
        (TaskStatus::Completed, TaskStatus::Completed) => old_stamp.or(Some(now)),
        (_, TaskStatus::Completed) => Some(now),
        _ => None,
    }
}

fn dedup(ids: &[i64]) -> Vec<i64> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SqliteTaskService {
        SqliteTaskService::new(Arc::new(Db::open_in_memory().unwrap()))
    }

    fn fields(title: &str) -> TaskFields {
        TaskFields {
            title: Some(title.to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn create_defaults_to_pending_and_records_creator() {
        let svc = service();
        let task = svc.create(fields("Buy milk"), 1).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.created_by, 1);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn create_requires_title() {
        let svc = service();
        assert!(matches!(
            svc.create(TaskFields::default(), 1),
            Err(TaskError::MissingTitle)
        ));
        assert!(matches!(svc.create(fields("   "), 1), Err(TaskError::MissingTitle)));
    }

    #[test]
    fn create_dedups_assignees_and_falls_back_to_legacy_field() {
        let svc = service();
        let mut f = fields("a");
        f.assigned_users = Some(vec![2, 3, 2]);
        assert_eq!(svc.create(f, 1).unwrap().assigned_users, vec![2, 3]);

        let mut legacy = fields("b");
        legacy.assigned_to = Some(4);
        let task = svc.create(legacy, 1).unwrap();
        assert_eq!(task.assigned_to, Some(4));
        assert_eq!(task.assigned_users, vec![4]);
    }

    #[test]
    fn get_is_limited_to_creator_and_assignees() {
        let svc = service();
        let mut f = fields("shared");
        f.assigned_users = Some(vec![2]);
        let task = svc.create(f, 1).unwrap();
        assert!(svc.get_for_user(task.id, 1).unwrap().is_some());
        assert!(svc.get_for_user(task.id, 2).unwrap().is_some());
        assert!(svc.get_for_user(task.id, 3).unwrap().is_none());
        assert!(svc.get_for_user(999, 1).unwrap().is_none());
    }

    #[test]
    fn update_is_partial() {
        let svc = service();
        let mut f = fields("orig");
        f.description = Some("keep me".to_owned());
        f.category = Some("home".to_owned());
        let task = svc.create(f, 1).unwrap();

        let patch = TaskFields {
            category: Some("work".to_owned()),
            ..Default::default()
        };
        let updated = svc.update(task.id, patch, 1).unwrap().unwrap();
        assert_eq!(updated.title, "orig");
        assert_eq!(updated.description.as_deref(), Some("keep me"));
        assert_eq!(updated.category.as_deref(), Some("work"));
        assert!(updated.updated_at >= task.updated_at);
    }

    #[test]
    fn completed_at_follows_status_transitions() {
        let svc = service();
        let task = svc.create(fields("t"), 1).unwrap();

        let done = TaskFields {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        };
        let completed = svc.update(task.id, done.clone(), 1).unwrap().unwrap();
        let stamp = completed.completed_at.expect("stamped on completion");

        let again = svc.update(task.id, done, 1).unwrap().unwrap();
        assert_eq!(again.completed_at, Some(stamp));

        let title_only = svc.update(task.id, fields("renamed"), 1).unwrap().unwrap();
        assert_eq!(title_only.completed_at, Some(stamp));

        let reopen = TaskFields {
            status: Some(TaskStatus::Pending),
            ..Default::default()
        };
        let reopened = svc.update(task.id, reopen, 1).unwrap().unwrap();
        assert!(reopened.completed_at.is_none());
    }

    #[test]
    fn only_creator_may_update_or_delete() {
        let svc = service();
        let mut f = fields("t");
        f.assigned_users = Some(vec![2]);
        let task = svc.create(f, 1).unwrap();

        assert!(svc.update(task.id, fields("hijack"), 2).unwrap().is_none());
        assert!(!svc.delete(task.id, 2).unwrap());
        assert!(svc.get_for_user(task.id, 1).unwrap().is_some());

        assert!(svc.delete(task.id, 1).unwrap());
        assert!(svc.get_for_user(task.id, 1).unwrap().is_none());
        assert!(!svc.delete(task.id, 1).unwrap());
    }

    #[test]
    fn update_replaces_assignees_when_given() {
        let svc = service();
        let mut f = fields("t");
        f.assigned_users = Some(vec![2, 3]);
        let task = svc.create(f, 1).unwrap();
        let patch = TaskFields {
            assigned_users: Some(vec![4]),
            ..Default::default()
        };
        let updated = svc.update(task.id, patch, 1).unwrap().unwrap();
        assert_eq!(updated.assigned_users, vec![4]);
        assert!(svc.get_for_user(task.id, 2).unwrap().is_none());
    }
}
