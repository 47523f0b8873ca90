//! Account registration, login and session tokens

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::store::{NewPlayer, PlayerRecord, PlayerStore, StoreError};

const MIN_USERNAME_LEN: usize = 4;

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Username must be at least 4 characters and contain a digit")]
    InvalidUsername,

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Username already taken")]
    UsernameTaken,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UsernameTaken => AuthError::UsernameTaken,
            other => AuthError::Store(other),
        }
    }
}

/// A single line of at least four characters, at least one of them a digit
pub fn validate_username(username: &str) -> bool {
    !username.chars().any(is_line_break)
        && username.chars().count() >= MIN_USERNAME_LEN
        && username.chars().any(|c| c.is_ascii_digit())
}

fn is_line_break(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

/// Hex sha256 of `username:password`
pub fn hash_password(username: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Logged-in account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: u64,
    pub account_id: u64,
    pub username: String,
}

/// Active sessions, one per account
#[derive(Default)]
pub struct SessionRegistry {
    by_token: DashMap<u64, Session>,
    by_account: DashMap<u64, u64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `account_id`, reusing the active one if present
    pub fn open(&self, account_id: u64, username: &str) -> u64 {
        match self.by_account.entry(account_id) {
            Entry::Occupied(existing) => *existing.get(),
            Entry::Vacant(slot) => {
                let token = loop {
                    let candidate: u64 = rand::random();
                    if candidate != 0 && !self.by_token.contains_key(&candidate) {
                        break candidate;
                    }
                };
                self.by_token.insert(
                    token,
                    Session {
                        token,
                        account_id,
                        username: username.to_string(),
                    },
                );
                slot.insert(token);
                token
            }
        }
    }

    pub fn get(&self, token: u64) -> Option<Session> {
        self.by_token.get(&token).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }
}

/// Registration and login against the player store
pub struct AuthService {
    store: PlayerStore,
    sessions: SessionRegistry,
}

impl AuthService {
    pub fn new(store: PlayerStore) -> Self {
        Self {
            store,
            sessions: SessionRegistry::new(),
        }
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<PlayerRecord, AuthError> {
        if !validate_username(username) {
            return Err(AuthError::InvalidUsername);
        }
        if password.is_empty() {
            return Err(AuthError::EmptyPassword);
        }
        if self.store.find_by_username(username).await?.is_some() {
            return Err(AuthError::UsernameTaken);
        }

        let record = self
            .store
            .create_player(NewPlayer::new(username, hash_password(username, password)))
            .await?;
        info!(account_id = record.id, username, "Player registered");
        Ok(record)
    }

    /// Session token for valid credentials. Repeated logins return the same token.
    pub async fn login(&self, username: &str, password: &str) -> Result<u64, AuthError> {
        let record = self
            .store
            .find_by_username(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if record.password != hash_password(username, password) {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(self.sessions.open(record.id, &record.username))
    }

    pub fn session(&self, token: u64) -> Option<Session> {
        self.sessions.get(token)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}
