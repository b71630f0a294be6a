use crate::db::{Db, DbResult, NewUser};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{Duration, Utc};
use kt_protocol::{AuthResponse, LoginRequest, RegisterRequest, UserSummary};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

const SALT_LEN: usize = 16;
const SIGNATURE_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const DEFAULT_TOKEN_TTL_HOURS: u32 = 24;

/// Account registration, login and bearer-token validation.
pub trait Authenticator: Send + Sync {
    fn register(&self, req: RegisterRequest) -> AuthResponse;
    fn login(&self, req: LoginRequest) -> AuthResponse;
    /// The user id a token was issued to, or `None` if it is malformed,
    /// forged or expired.
    fn validate(&self, token: &str) -> Option<i64>;
}

/// Read-only view of the user table.
pub trait UserDirectory: Send + Sync {
    fn list_users(&self) -> DbResult<Vec<UserSummary>>;
}

impl UserDirectory for Db {
    fn list_users(&self) -> DbResult<Vec<UserSummary>> {
        Db::list_users(self)
    }
}

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}

/// Stateless signed tokens: `base64("{user_id}:{username}:{expiry_ms}:{sig}")`
/// where `sig` is a truncated base64 SHA-256 over the secret and the payload.
pub struct TokenAuthenticator {
    db: Arc<Db>,
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenAuthenticator {
    pub fn new(db: Arc<Db>, secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        TokenAuthenticator {
            db,
            secret: secret.into(),
            ttl,
        }
    }

    /// Tokens issued by this instance stop validating when the process exits.
    pub fn with_random_secret(db: Arc<Db>, ttl: Duration) -> Self {
        let mut secret = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        Self::new(db, secret, ttl)
    }

    pub fn issue_token(&self, user_id: i64, username: &str) -> String {
        let expiry_ms = (Utc::now() + self.ttl).timestamp_millis();
        self.token_with_expiry(user_id, username, expiry_ms)
    }

    fn token_with_expiry(&self, user_id: i64, username: &str, expiry_ms: i64) -> String {
        let payload = format!("{user_id}:{username}:{expiry_ms}");
        let sig = self.sign(&payload);
        STANDARD.encode(format!("{payload}:{sig}"))
    }

    fn sign(&self, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(payload.as_bytes());
        let mut sig = STANDARD.encode(hasher.finalize());
        sig.truncate(SIGNATURE_LEN);
        sig
    }

    fn try_register(&self, req: RegisterRequest) -> DbResult<AuthResponse> {
        let username = req.username.unwrap_or_default().trim().to_owned();
        let email = req.email.unwrap_or_default().trim().to_owned();
        let password = req.password.unwrap_or_default();

        if username.is_empty() || email.is_empty() {
            return Ok(AuthResponse::failure("Usuario y email son obligatorios"));
        }
        if self.db.username_taken(&username)? {
            return Ok(AuthResponse::failure("El nombre de usuario ya existe"));
        }
        if self.db.email_taken(&email)? {
            return Ok(AuthResponse::failure("El email ya está registrado"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Ok(AuthResponse::failure(
                "La contraseña debe tener al menos 6 caracteres",
            ));
        }

        let user_id = self.db.insert_user(&NewUser {
            username: username.clone(),
            email,
            password_hash: hash_password(&password),
            first_name: req.first_name,
            last_name: req.last_name,
        })?;
        info!(user_id, username = %username, "user registered");
        Ok(AuthResponse {
            success: true,
            message: "Usuario registrado correctamente".to_owned(),
            user_id: Some(user_id),
            ..Default::default()
        })
    }

    fn try_login(&self, req: LoginRequest) -> DbResult<AuthResponse> {
        let username = req.username.unwrap_or_default();
        let password = req.password.unwrap_or_default();

        let Some(user) = self.db.user_by_username(username.trim())? else {
            return Ok(AuthResponse::failure("Usuario no encontrado"));
        };
        if !verify_password(&password, &user.password_hash) {
            return Ok(AuthResponse::failure("Contraseña incorrecta"));
        }

        let token = self.issue_token(user.id, &user.username);
        info!(user_id = user.id, "login succeeded");
        Ok(AuthResponse {
            success: true,
            message: "Login exitoso".to_owned(),
            token: Some(token),
            user_id: Some(user.id),
            username: Some(user.username),
            first_name: user.first_name,
            last_name: user.last_name,
        })
    }
}

impl Authenticator for TokenAuthenticator {
    fn register(&self, req: RegisterRequest) -> AuthResponse {
        self.try_register(req).unwrap_or_else(|e| {
            warn!(error = %e, "register failed");
            AuthResponse::failure(format!("Error al registrar usuario: {e}"))
        })
    }

    fn login(&self, req: LoginRequest) -> AuthResponse {
        self.try_login(req).unwrap_or_else(|e| {
            warn!(error = %e, "login failed");
            AuthResponse::failure(format!("Error al iniciar sesión: {e}"))
        })
    }

    fn validate(&self, token: &str) -> Option<i64> {
        let decoded = STANDARD.decode(token).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;

        // The username may itself contain ':'; id and expiry/sig are anchored
        // at the ends.
        let (user_id, rest) = decoded.split_once(':')?;
        let (rest, sig) = rest.rsplit_once(':')?;
        let (username, expiry) = rest.rsplit_once(':')?;
        let user_id: i64 = user_id.parse().ok()?;
        let expiry_ms: i64 = expiry.parse().ok()?;

        if Utc::now().timestamp_millis() > expiry_ms {
            return None;
        }
        let expected = self.sign(&format!("{user_id}:{username}:{expiry_ms}"));
        constant_time_eq(sig.as_bytes(), expected.as_bytes()).then_some(user_id)
    }
}

/// `base64(salt || sha256(salt || password))` with a fresh 16-byte salt.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let digest = salted_digest(&salt, password);
    let mut combined = Vec::with_capacity(SALT_LEN + digest.len());
    combined.extend_from_slice(&salt);
    combined.extend_from_slice(&digest);
    STANDARD.encode(combined)
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(combined) = STANDARD.decode(stored) else {
        return false;
    };
    if combined.len() <= SALT_LEN {
        return false;
    }
    let (salt, expected) = combined.split_at(SALT_LEN);
    constant_time_eq(&salted_digest(salt, password), expected)
}

fn salted_digest(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
