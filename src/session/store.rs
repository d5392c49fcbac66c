use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("authentication is not configured")]
    AuthDisabled,
    #[error("invalid username or password")]
    InvalidCredentials,
}

/// In-memory login sessions keyed by an opaque token.
pub struct SessionStore {
    config: Arc<Config>,
    max_age: Duration,
    sessions: RwLock<HashMap<Uuid, Instant>>,
}

impl SessionStore {
    pub fn new(config: Arc<Config>) -> Self {
        let max_age = Duration::from_secs(config.settings().session_max_age_secs);
        Self { config, max_age, sessions: RwLock::new(HashMap::new()) }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Uuid, SessionError> {
        let s = self.config.settings();
        let (Some(user), Some(pass)) = (s.username.filter(|u| !u.is_empty()), s.password.filter(|p| !p.is_empty()))
        else {
            return Err(SessionError::AuthDisabled);
        };
        // evaluate both so timing does not reveal which one was wrong
        let user_ok = constant_time_eq(username.as_bytes(), user.as_bytes());
        let pass_ok = constant_time_eq(password.as_bytes(), pass.as_bytes());
        if !(user_ok & pass_ok) {
            return Err(SessionError::InvalidCredentials);
        }

        let token = Uuid::new_v4();
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        sessions.retain(|_, created| now.duration_since(*created) < self.max_age);
        sessions.insert(token, now);
        Ok(token)
    }

    pub async fn validate(&self, token: Uuid) -> bool {
        match self.sessions.read().await.get(&token) {
            Some(created) => created.elapsed() < self.max_age,
            None => false,
        }
    }

    pub async fn logout(&self, token: Uuid) -> bool {
        self.sessions.write().await.remove(&token).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
