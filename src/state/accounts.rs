//! Account Store — persistent set of user records keyed by username.
//!
//! Grounded on `original_source/user.c` (`loadUsersFromJson`) and
//! `original_source/file.c` (`save_user`, line-oriented `save_users.txt`).
//! This store standardizes on JSON for writes but accepts either encoding
//! on load, per the decision recorded in `SPEC_FULL.md` §4.1.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A user's role. Only `Admin` is privileged, and only for `@shutdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

/// Immutable-by-convention account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
    pub role: Role,
}

/// Result of [`AccountStore::authenticate`].
#[derive(Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(Account),
    BadCredentials,
    NotFound,
}

/// Result of [`AccountStore::create`].
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("username already exists")]
    AlreadyExists,
    #[error("failed to persist account store: {0}")]
    Io(#[from] std::io::Error),
}

struct Inner {
    by_username: HashMap<String, Account>,
}

/// Persistent set of [`Account`] records keyed by username.
pub struct AccountStore {
    inner: Mutex<Inner>,
    path: PathBuf,
}

impl AccountStore {
    /// Load accounts from `path`, tolerating a missing file (empty store)
    /// and skipping malformed lines/entries with a log line.
    pub fn load(path: &Path) -> Self {
        let by_username = match std::fs::read(path) {
            Ok(bytes) => parse_accounts(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read account store");
                HashMap::new()
            }
        };

        tracing::info!(count = by_username.len(), "loaded account store");
        Self {
            inner: Mutex::new(Inner { by_username }),
            path: path.to_path_buf(),
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(&self, username: &str) -> Option<Account> {
        self.inner.lock().by_username.get(username).cloned()
    }

    /// Create a new account. Fails loudly if the name is already taken, or
    /// if the store cannot be persisted — in the latter case the account is
    /// rolled back out of memory too, so a failed `create` never leaves a
    /// session able to reconnect as an account only the in-memory table
    /// knows about.
    pub fn create(&self, username: &str, password: &str, role: Role) -> Result<Account, CreateError> {
        let account = {
            let mut inner = self.inner.lock();
            if inner.by_username.contains_key(username) {
                return Err(CreateError::AlreadyExists);
            }
            let account = Account {
                username: username.to_string(),
                password: password.to_string(),
                role,
            };
            inner.by_username.insert(username.to_string(), account.clone());
            account
        };

        if let Err(e) = self.flush() {
            self.inner.lock().by_username.remove(username);
            return Err(CreateError::Io(e));
        }
        Ok(account)
    }

    /// Literal password comparison, per the spec's non-goal of no hashing.
    pub fn authenticate(&self, username: &str, password: &str) -> AuthOutcome {
        match self.lookup(username) {
            Some(account) if account.password == password => AuthOutcome::Authenticated(account),
            Some(_) => AuthOutcome::BadCredentials,
            None => AuthOutcome::NotFound,
        }
    }

    /// Snapshot of all accounts.
    pub fn list(&self) -> Vec<Account> {
        self.inner.lock().by_username.values().cloned().collect()
    }

    /// Write the current contents to the persistence medium as JSON.
    pub fn flush(&self) -> std::io::Result<()> {
        let accounts: Vec<Account> = self.list();
        let bytes = serde_json::to_vec_pretty(&accounts)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(&self.path, bytes)
    }
}

/// Parse either JSON (`[{"username":...,"password":...,"role":...}, ...]`)
/// or the legacy line format (`<username> <password> <ROLE>`), preferring
/// JSON and falling back to lines on parse failure.
fn parse_accounts(bytes: &[u8]) -> HashMap<String, Account> {
    if let Ok(accounts) = serde_json::from_slice::<Vec<Account>>(bytes) {
        return accounts.into_iter().map(|a| (a.username.clone(), a)).collect();
    }

    let text = String::from_utf8_lossy(bytes);
    let mut map = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(username), Some(password), role) =
            (parts.next(), parts.next(), parts.next())
        else {
            tracing::warn!(line = lineno + 1, "skipping malformed account line");
            continue;
        };
        let role = match role {
            Some("ADMIN") => Role::Admin,
            Some("USER") | None => Role::User,
            Some(other) => {
                tracing::warn!(line = lineno + 1, role = other, "unknown role, defaulting to USER");
                Role::User
            }
        };
        map.insert(
            username.to_string(),
            Account {
                username: username.to_string(),
                password: password.to_string(),
                role,
            },
        );
    }
    map
}
