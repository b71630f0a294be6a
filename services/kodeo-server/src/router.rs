//! Maps parsed requests onto the auth, user and task collaborators.
//!
//! | Method | Path               | Auth   |
//! |--------|--------------------|--------|
//! | OPTIONS| any                | none   |
//! | POST   | /api/auth/register | none   |
//! | POST   | /api/auth/login    | none   |
//! | GET    | /api/users         | bearer |
//! | GET    | /api/tasks         | bearer |
//! | POST   | /api/tasks         | bearer |
//! | GET    | /api/tasks/{id}    | bearer |
//! | PUT    | /api/tasks/{id}    | bearer |
//! | DELETE | /api/tasks/{id}    | bearer |
//!
//! Every outcome, including failures, is an [`OutgoingResponse`] carrying
//! the CORS headers.

use crate::auth::{Authenticator, UserDirectory, extract_bearer};
use crate::http::response::{
    self, HttpResult, bad_request, forbidden, internal_error, method_not_allowed, not_found,
    unauthorized,
};
use crate::http::{IncomingRequest, OutgoingResponse};
use crate::notify::Dispatcher;
use crate::tasks::{TaskError, TaskService};
use kt_protocol::{EventType, LoginRequest, RegisterRequest, Task, TaskFields};
use serde::de::DeserializeOwned;
use std::sync::Arc;

const AUTH_PREFIX: &str = "/api/auth/";
const USERS_PATH: &str = "/api/users";
const TASKS_PATH: &str = "/api/tasks";

const ROUTE_NOT_FOUND: &str = "Ruta no encontrada";
const AUTH_ENDPOINT_NOT_FOUND: &str = "Endpoint no encontrado";
const INVALID_TOKEN: &str = "Token inválido o no proporcionado";
const TASK_NOT_FOUND: &str = "Tarea no encontrada";
const NOT_ALLOWED_OR_MISSING: &str = "No autorizado o tarea no encontrada";

pub struct Router {
    auth: Arc<dyn Authenticator>,
    users: Arc<dyn UserDirectory>,
    tasks: Arc<dyn TaskService>,
    notifier: Option<Dispatcher>,
}

impl Router {
    /// `notifier == None` runs without the UDP side; task mutations then
    /// notify nobody.
    pub fn new(
        auth: Arc<dyn Authenticator>,
        users: Arc<dyn UserDirectory>,
        tasks: Arc<dyn TaskService>,
        notifier: Option<Dispatcher>,
    ) -> Self {
        Router {
            auth,
            users,
            tasks,
            notifier,
        }
    }

    pub async fn handle(&self, req: &IncomingRequest) -> OutgoingResponse {
        let resp = match self.route(req).await {
            Ok(resp) | Err(resp) => resp,
        };
        with_cors(resp)
    }

    async fn route(&self, req: &IncomingRequest) -> HttpResult {
        let method = req.method.as_str();
        let path = req.path.as_str();

        if method == "OPTIONS" {
            return Ok(response::empty(200));
        }
        if let Some(endpoint) = path.strip_prefix(AUTH_PREFIX) {
            return self.auth_route(method, endpoint, req);
        }
        if path == USERS_PATH {
            self.authenticate(req)?;
            return match method {
                "GET" => self.list_users(),
                _ => Err(method_not_allowed()),
            };
        }
        if path == TASKS_PATH {
            let user_id = self.authenticate(req)?;
            return match method {
                "GET" => self.list_tasks(user_id),
                "POST" => self.create_task(req, user_id).await,
                _ => Err(method_not_allowed()),
            };
        }
        if let Some(rest) = path
            .strip_prefix(TASKS_PATH)
            .and_then(|p| p.strip_prefix('/'))
        {
            let user_id = self.authenticate(req)?;
            let task_id: i64 = rest.parse().map_err(|_| not_found(ROUTE_NOT_FOUND))?;
            return match method {
                "GET" => self.get_task(task_id, user_id),
                "PUT" => self.update_task(req, task_id, user_id).await,
                "DELETE" => self.delete_task(task_id, user_id).await,
                _ => Err(method_not_allowed()),
            };
        }
        Err(not_found(ROUTE_NOT_FOUND))
    }

    fn authenticate(&self, req: &IncomingRequest) -> HttpResult<i64> {
        req.header("authorization")
            .and_then(extract_bearer)
            .and_then(|token| self.auth.validate(token))
            .ok_or_else(|| unauthorized(INVALID_TOKEN))
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    fn auth_route(&self, method: &str, endpoint: &str, req: &IncomingRequest) -> HttpResult {
        if method != "POST" {
            return Err(method_not_allowed());
        }
        match endpoint {
            "register" => {
                let body: RegisterRequest = parse_json(req)?;
                let result = self.auth.register(body);
                let status = if result.success { 201 } else { 400 };
                Ok(response::json(status, &result))
            }
            "login" => {
                let body: LoginRequest = parse_json(req)?;
                let result = self.auth.login(body);
                let status = if result.success { 200 } else { 401 };
                Ok(response::json(status, &result))
            }
            _ => Err(not_found(AUTH_ENDPOINT_NOT_FOUND)),
        }
    }

    fn list_users(&self) -> HttpResult {
        let users = self.users.list_users().map_err(internal_error)?;
        Ok(response::json(200, &users))
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    fn list_tasks(&self, user_id: i64) -> HttpResult {
        let tasks = self.tasks.list_for_user(user_id).map_err(task_error)?;
        Ok(response::json(200, &tasks))
    }

    fn get_task(&self, task_id: i64, user_id: i64) -> HttpResult {
        let task = self
            .tasks
            .get_for_user(task_id, user_id)
            .map_err(task_error)?
            .ok_or_else(|| not_found(TASK_NOT_FOUND))?;
        Ok(response::json(200, &task))
    }

    async fn create_task(&self, req: &IncomingRequest, user_id: i64) -> HttpResult {
        let fields: TaskFields = parse_json(req)?;
        let task = self.tasks.create(fields, user_id).map_err(task_error)?;
        self.announce(&task, user_id, EventType::TaskCreated).await;
        Ok(response::json(201, &task))
    }

    async fn update_task(&self, req: &IncomingRequest, task_id: i64, user_id: i64) -> HttpResult {
        let patch: TaskFields = parse_json(req)?;
        let task = self
            .tasks
            .update(task_id, patch, user_id)
            .map_err(task_error)?
            .ok_or_else(|| forbidden(NOT_ALLOWED_OR_MISSING))?;
        self.announce(&task, user_id, EventType::TaskUpdated).await;
        Ok(response::json(200, &task))
    }

    async fn delete_task(&self, task_id: i64, user_id: i64) -> HttpResult {
        if !self.tasks.delete(task_id, user_id).map_err(task_error)? {
            return Err(forbidden(NOT_ALLOWED_OR_MISSING));
        }
        if let Some(notifier) = &self.notifier {
            notifier.notify(user_id, EventType::TaskDeleted, None).await;
        }
        Ok(response::empty(204))
    }

    /// `task_assigned` to every assignee other than `actor`, then
    /// `actor_event` to the actor.
    async fn announce(&self, task: &Task, actor: i64, actor_event: EventType) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        for &assignee in task.assigned_users.iter().filter(|&&id| id != actor) {
            notifier
                .notify(assignee, EventType::TaskAssigned, Some(task))
                .await;
        }
        notifier.notify(actor, actor_event, Some(task)).await;
    }
}

fn parse_json<T: DeserializeOwned>(req: &IncomingRequest) -> HttpResult<T> {
    serde_json::from_slice(req.body_bytes())
        .map_err(|e| bad_request(format!("JSON inválido: {e}")))
}

fn task_error(err: TaskError) -> OutgoingResponse {
    match err {
        TaskError::MissingTitle => bad_request(err.to_string()),
        TaskError::Db(e) => internal_error(e),
    }
}

pub fn with_cors(resp: OutgoingResponse) -> OutgoingResponse {
    resp.header("Access-Control-Allow-Origin", "*")
        .header(
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, DELETE, OPTIONS",
        )
        .header(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization",
        )
}
