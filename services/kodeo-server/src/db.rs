use chrono::{DateTime, NaiveDate, Utc};
use kt_protocol::{Task, TaskStatus, UserSummary};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("storage/schema.sql");
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Integrity: {0}")]
    IntegrityCheckFailed(String),
    #[error("database lock poisoned")]
    Poisoned,
}
pub type DbResult<T> = Result<T, DbError>;

/// A stored user, including the password hash. Never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// The client-editable columns of a task row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub category: Option<String>,
    pub assigned_to: Option<i64>,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// SQLite store for users, tasks and task assignments.
///
/// The connection sits behind a mutex so one `Db` can be shared across
/// connection workers.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &Path) -> DbResult<Self> {
        let c = Connection::open(path)?;
        c.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        let d = Self::from_connection(c)?;
        d.integrity_check()?;
        Ok(d)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    pub fn integrity_check(&self) -> DbResult<()> {
        let r: String = self
            .lock()?
            .pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if r != "ok" {
            return Err(DbError::IntegrityCheckFailed(r));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub fn insert_user(&self, user: &NewUser) -> DbResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users \
             (username, email, password_hash, first_name, last_name, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.username,
                user.email,
                user.password_hash,
                user.first_name,
                user.last_name,
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn user_by_username(&self, username: &str) -> DbResult<Option<UserRecord>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT id, username, email, password_hash, first_name, last_name \
                 FROM users WHERE username = ?1",
                params![username],
                |r| {
                    Ok(UserRecord {
                        id: r.get(0)?,
                        username: r.get(1)?,
                        email: r.get(2)?,
                        password_hash: r.get(3)?,
                        first_name: r.get(4)?,
                        last_name: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn username_taken(&self, username: &str) -> DbResult<bool> {
        self.exists("SELECT 1 FROM users WHERE username = ?1", username)
    }

    pub fn email_taken(&self, email: &str) -> DbResult<bool> {
        self.exists("SELECT 1 FROM users WHERE email = ?1", email)
    }

    fn exists(&self, sql: &str, arg: &str) -> DbResult<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row(sql, params![arg], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_users(&self) -> DbResult<Vec<UserSummary>> {
        let conn = self.lock()?;
        let mut s = conn.prepare(
            "SELECT id, username, email, first_name, last_name FROM users ORDER BY username",
        )?;
        let rows = s.query_map([], |r| {
            Ok(UserSummary {
                id: r.get(0)?,
                username: r.get(1)?,
                email: r.get(2)?,
                first_name: r.get(3)?,
                last_name: r.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Insert a task and its assignments atomically. Returns the new id.
    pub fn insert_task(
        &self,
        row: &TaskRow,
        created_by: i64,
        assignees: &[i64],
        now: DateTime<Utc>,
    ) -> DbResult<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO tasks (title, description, status, category, created_by, assigned_to, \
             due_date, created_at_ms, updated_at_ms, completed_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)",
            params![
                row.title,
                row.description,
                row.status.as_str(),
                row.category,
                created_by,
                row.assigned_to,
                row.due_date.map(|d| d.format(DATE_FORMAT).to_string()),
                now.timestamp_millis(),
                row.completed_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        let id = tx.last_insert_rowid();
        write_assignments(&tx, id, assignees)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn task_by_id(&self, id: i64) -> DbResult<Option<Task>> {
        let conn = self.lock()?;
        load_task(&conn, id)
    }

    /// Tasks the user created, holds the legacy `assigned_to` slot on, or is
    /// assigned to. Newest first.
    pub fn tasks_visible_to(&self, user_id: i64) -> DbResult<Vec<Task>> {
        let conn = self.lock()?;
        let ids = {
            let mut s = conn.prepare(
                "SELECT DISTINCT t.id, t.created_at_ms FROM tasks t \
                 LEFT JOIN task_assignments ta ON ta.task_id = t.id \
                 WHERE t.created_by = ?1 OR t.assigned_to = ?1 OR ta.user_id = ?1 \
                 ORDER BY t.created_at_ms DESC, t.id DESC",
            )?;
            let rows = s.query_map(params![user_id], |r| r.get::<_, i64>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = load_task(&conn, id)? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Overwrite the editable columns. `assignees == None` keeps the current
    /// assignment set. Returns `false` when the task does not exist.
    pub fn update_task(
        &self,
        id: i64,
        row: &TaskRow,
        assignees: Option<&[i64]>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE tasks SET title = ?2, description = ?3, status = ?4, \
             category = ?5, assigned_to = ?6, due_date = ?7, updated_at_ms = ?8, \
             completed_at_ms = ?9 WHERE id = ?1",
            params![
                id,
                row.title,
                row.description,
                row.status.as_str(),
                row.category,
                row.assigned_to,
                row.due_date.map(|d| d.format(DATE_FORMAT).to_string()),
                now.timestamp_millis(),
                row.completed_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        if let Some(assignees) = assignees {
            tx.execute("DELETE FROM task_assignments WHERE task_id = ?1", params![id])?;
            write_assignments(&tx, id, assignees)?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Delete a task; its assignments go with it. Returns `false` when absent.
    pub fn delete_task(&self, id: i64) -> DbResult<bool> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }
}

fn write_assignments(conn: &Connection, task_id: i64, assignees: &[i64]) -> DbResult<()> {
    let mut s = conn.prepare(
        "INSERT OR IGNORE INTO task_assignments (task_id, user_id) VALUES (?1, ?2)",
    )?;
    for user_id in assignees {
        s.execute(params![task_id, user_id])?;
    }
    Ok(())
}

fn load_task(conn: &Connection, id: i64) -> DbResult<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT t.id, t.title, t.description, t.status, t.category, t.created_by, u.username, \
             t.assigned_to, t.due_date, t.created_at_ms, t.updated_at_ms, t.completed_at_ms \
             FROM tasks t LEFT JOIN users u ON u.id = t.created_by WHERE t.id = ?1",
            params![id],
            task_from_row,
        )
        .optional()?;
    let Some(mut task) = task else {
        return Ok(None);
    };

    let mut s = conn.prepare(
        "SELECT ta.user_id, u.username FROM task_assignments ta \
         LEFT JOIN users u ON u.id = ta.user_id WHERE ta.task_id = ?1 ORDER BY ta.rowid",
    )?;
    let rows = s.query_map(params![id], |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, Option<String>>(1)?))
    })?;
    for row in rows {
        let (user_id, username) = row?;
        task.assigned_users.push(user_id);
        task.assigned_users_names.push(username.unwrap_or_default());
    }
    Ok(Some(task))
}

fn task_from_row(r: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = r.get(3)?;
    let status = TaskStatus::try_from(status.as_str())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
    let due_date = r
        .get::<_, Option<String>>(8)?
        .map(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    Ok(Task {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        status,
        category: r.get(4)?,
        created_by: r.get(5)?,
        created_by_username: r.get(6)?,
        assigned_to: r.get(7)?,
        assigned_users: Vec::new(),
        assigned_users_names: Vec::new(),
        due_date,
        created_at: millis(r, 9)?,
        updated_at: millis(r, 10)?,
        completed_at: r
            .get::<_, Option<i64>>(11)?
            .map(|ms| to_datetime(11, ms))
            .transpose()?,
    })
}

fn millis(r: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    to_datetime(idx, r.get(idx)?)
}

fn to_datetime(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}
