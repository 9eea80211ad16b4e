//! Sessions and users.
//!
//! A user record lives under `users/{id}`; each live session token maps to a
//! copy under `users_by_session/{token}`. Both are written in one
//! transaction at sign-in.

use crate::error::{Result, StoreError};
use crate::kv::{KvStore, Transaction};
use crate::model::User;
use crate::types::{Key, Stamp};
use std::sync::Arc;
use tracing::debug;

const USERS: &str = "users";
const USERS_BY_SESSION: &str = "users_by_session";

pub struct Identity {
    kv: Arc<KvStore>,
}

impl Identity {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Store `user` and bind `session` to it.
    pub fn sign_in(&self, user: &User, session: &str) -> Result<Stamp> {
        if user.id.is_empty() {
            return Err(StoreError::ValidationFailed("user id is required".into()));
        }
        if session.is_empty() {
            return Err(StoreError::ValidationFailed("session token is required".into()));
        }

        let value = rmp_serde::to_vec_named(user)?;
        let tx = Transaction::new()
            .set(user_key(&user.id), value.clone())
            .set(session_key(session), value);
        let stamp = self
            .kv
            .transact(tx)?
            .stamp()
            .ok_or_else(|| StoreError::WriteConflict(format!("user {}", user.id)))?;

        debug!(user = %user.id, "signed in");
        Ok(stamp)
    }

    /// Drop a session. Returns false if it did not exist.
    pub fn sign_out(&self, session: &str) -> Result<bool> {
        let key = session_key(session);
        if self.kv.get(&key)?.is_none() {
            return Ok(false);
        }
        self.kv.transact(Transaction::new().delete(key))?;
        Ok(true)
    }

    pub fn user_by_session(&self, session: &str) -> Result<Option<User>> {
        self.read(&session_key(session))
    }

    pub fn user_by_id(&self, id: &str) -> Result<Option<User>> {
        self.read(&user_key(id))
    }

    /// Resolve the caller. A missing or unknown token is `Unauthorized`.
    pub fn authenticate(&self, session: Option<&str>) -> Result<User> {
        match session.filter(|token| !token.is_empty()) {
            Some(token) => self
                .user_by_session(token)?
                .ok_or(StoreError::Unauthorized),
            None => Err(StoreError::Unauthorized),
        }
    }

    fn read(&self, key: &Key) -> Result<Option<User>> {
        match self.kv.get(key)? {
            Some(entry) => Ok(Some(rmp_serde::from_slice(&entry.value)?)),
            None => Ok(None),
        }
    }
}

fn user_key(id: &str) -> Key {
    Key::new([USERS, id])
}

fn session_key(session: &str) -> Key {
    Key::new([USERS_BY_SESSION, session])
}
