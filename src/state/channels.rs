//! Channel Registry — owns channels and their memberships.
//!
//! Grounded on `original_source/Channel.c`. The lock order mandated by
//! the spec (Registry → Channel, never held across a socket write) is
//! enforced by construction here: every registry method takes the
//! registry mutex, does whatever bookkeeping it needs on the `HashMap`
//! itself, and only reaches into a `Channel`'s own mutex while still
//! holding the registry lock for the span of that one operation — never
//! releases and reacquires mid-operation the way the original C did
//! (its `isChannelFull` → `addLast` gap is exactly the TOCTOU race
//! `spec.md` §9 calls out).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::state::sessions::SessionId;

/// A channel's capacity. `Unlimited` is Hub's permanent capacity and may
/// also be chosen for user-created channels by omitting a capacity
/// argument; `0` is not a synonym for unlimited and is rejected as an
/// invalid capacity (`spec.md` §4.4: capacity is `>= 1` or the unlimited
/// sentinel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Limited(u32),
    Unlimited,
}

impl Capacity {
    /// Parse the on-disk / protocol representation, where `-1` means
    /// unlimited (grounded on `Channel.c`'s `maxSize == -1` convention).
    pub fn from_i64(value: i64) -> Option<Self> {
        if value == -1 {
            Some(Capacity::Unlimited)
        } else if value >= 1 {
            u32::try_from(value).ok().map(Capacity::Limited)
        } else {
            None
        }
    }

    /// The on-disk / protocol representation.
    pub fn to_i64(self) -> i64 {
        match self {
            Capacity::Unlimited => -1,
            Capacity::Limited(n) => n as i64,
        }
    }
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capacity::Unlimited => write!(f, "-1"),
            Capacity::Limited(n) => write!(f, "{n}"),
        }
    }
}

pub const HUB: &str = "Hub";

/// A named, capacity-bounded group of sessions.
///
/// Membership holds [`SessionId`]s rather than direct session references,
/// so a destroyed session can never leave a stale pointer in a channel
/// (`spec.md` §9, "Cyclic references between Session and Channel").
pub struct Channel {
    pub name: String,
    pub capacity: Capacity,
    members: Mutex<Vec<SessionId>>,
}

impl Channel {
    fn new(name: impl Into<String>, capacity: Capacity) -> Self {
        Self {
            name: name.into(),
            capacity,
            members: Mutex::new(Vec::new()),
        }
    }

    /// Current member count.
    pub fn size(&self) -> usize {
        self.members.lock().len()
    }

    /// `true` once `size() == capacity`. Hub, being unlimited, is never full.
    pub fn is_full(&self) -> bool {
        match self.capacity {
            Capacity::Unlimited => false,
            Capacity::Limited(cap) => self.size() as u32 >= cap,
        }
    }

    /// Snapshot of current members, safe to iterate after releasing locks.
    pub fn members(&self) -> Vec<SessionId> {
        self.members.lock().clone()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum JoinError {
    Full,
    AlreadyMember,
    NotFound,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LeaveError {
    NotInAnyChannel,
    CannotLeaveHub,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CreateError {
    NameTaken,
    InvalidName,
    InvalidCapacity,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RemoveError {
    HubProtected,
    NotFound,
}

struct Inner {
    channels: HashMap<String, Arc<Channel>>,
    /// Which channel each session currently belongs to, by session id.
    membership: HashMap<SessionId, String>,
}

/// Owns all [`Channel`]s and the single source of truth for which channel
/// each session belongs to.
pub struct ChannelRegistry {
    inner: Mutex<Inner>,
}

impl ChannelRegistry {
    /// Construct a fresh registry containing only the mandatory Hub.
    pub fn new() -> Self {
        let mut channels = HashMap::new();
        channels.insert(HUB.to_string(), Arc::new(Channel::new(HUB, Capacity::Unlimited)));
        Self {
            inner: Mutex::new(Inner {
                channels,
                membership: HashMap::new(),
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.inner.lock().channels.get(name).cloned()
    }

    /// Create a channel and, if `founder` is given, atomically place it as
    /// the first member within the same critical section.
    pub fn create(
        &self,
        name: &str,
        capacity: Capacity,
        founder: Option<SessionId>,
    ) -> Result<Arc<Channel>, CreateError> {
        if name.is_empty() || name.contains(' ') || name.contains('\n') {
            return Err(CreateError::InvalidName);
        }
        // Capacity::from_i64 already rejects 0 before a protocol `@create`
        // reaches here; this guard only matters to a caller that builds a
        // `Capacity::Limited(0)` directly, since the variant is public.
        if let Capacity::Limited(0) = capacity {
            return Err(CreateError::InvalidCapacity);
        }

        let mut inner = self.inner.lock();
        if inner.channels.contains_key(name) || name == HUB {
            return Err(CreateError::NameTaken);
        }

        let channel = Arc::new(Channel::new(name, capacity));
        inner.channels.insert(name.to_string(), channel.clone());

        if let Some(session) = founder {
            if let Some(previous) = inner.membership.get(&session).cloned() {
                if let Some(prev_channel) = inner.channels.get(&previous) {
                    prev_channel.members.lock().retain(|s| *s != session);
                }
            }
            channel.members.lock().push(session);
            inner.membership.insert(session, name.to_string());
        }

        Ok(channel)
    }

    /// Admin-only removal path; Hub can never be removed.
    pub fn remove(&self, name: &str) -> Result<(), RemoveError> {
        if name == HUB {
            return Err(RemoveError::HubProtected);
        }
        let mut inner = self.inner.lock();
        if inner.channels.remove(name).is_none() {
            return Err(RemoveError::NotFound);
        }
        inner.membership.retain(|_, channel_name| channel_name != name);
        Ok(())
    }

    /// Move `session` into `channel_name`, first removing it from whichever
    /// channel it currently occupies, all within one critical section so
    /// an observer never sees the session absent from every channel or
    /// present in two.
    pub fn join(&self, channel_name: &str, session: SessionId) -> Result<(), JoinError> {
        let mut inner = self.inner.lock();
        let target = inner
            .channels
            .get(channel_name)
            .cloned()
            .ok_or(JoinError::NotFound)?;

        if inner.membership.get(&session).map(String::as_str) == Some(channel_name) {
            return Err(JoinError::AlreadyMember);
        }
        if target.is_full() {
            return Err(JoinError::Full);
        }

        if let Some(previous) = inner.membership.get(&session).cloned() {
            if let Some(prev_channel) = inner.channels.get(&previous) {
                prev_channel.members.lock().retain(|s| *s != session);
            }
        }

        target.members.lock().push(session);
        inner.membership.insert(session, channel_name.to_string());
        Ok(())
    }

    /// Return the session to Hub. Forbidden while already in Hub.
    pub fn leave(&self, session: SessionId) -> Result<String, LeaveError> {
        let mut inner = self.inner.lock();
        let previous = inner
            .membership
            .get(&session)
            .cloned()
            .ok_or(LeaveError::NotInAnyChannel)?;
        if previous == HUB {
            return Err(LeaveError::CannotLeaveHub);
        }

        if let Some(prev_channel) = inner.channels.get(&previous) {
            prev_channel.members.lock().retain(|s| *s != session);
        }
        if let Some(hub) = inner.channels.get(HUB) {
            hub.members.lock().push(session);
        }
        inner.membership.insert(session, HUB.to_string());
        Ok(previous)
    }

    /// Remove the session from whichever channel it is in, with no
    /// automatic return to Hub. Used from the connection teardown path.
    pub fn disconnect(&self, session: SessionId) -> Option<String> {
        let mut inner = self.inner.lock();
        let previous = inner.membership.remove(&session)?;
        if let Some(channel) = inner.channels.get(&previous) {
            channel.members.lock().retain(|s| *s != session);
        }
        Some(previous)
    }

    pub fn members_of(&self, name: &str) -> Vec<SessionId> {
        self.inner
            .lock()
            .channels
            .get(name)
            .map(|c| c.members())
            .unwrap_or_default()
    }

    /// Snapshot of `(name, size, capacity)` for every channel.
    pub fn list_channels(&self) -> Vec<(String, usize, Capacity)> {
        self.inner
            .lock()
            .channels
            .values()
            .map(|c| (c.name.clone(), c.size(), c.capacity))
            .collect()
    }

    /// Persist `{name, capacity}` for every channel except Hub.
    pub fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
        let inner = self.inner.lock();
        let mut lines = Vec::new();
        for channel in inner.channels.values() {
            if channel.name == HUB {
                continue;
            }
            lines.push(format!("{} {}", channel.name, channel.capacity.to_i64()));
        }
        std::fs::write(path, lines.join("\n"))
    }

    /// Recreate empty channels from a previously saved definitions file.
    /// Missing file is not an error.
    pub fn load_definitions(path: &std::path::Path) -> Vec<(String, Capacity)> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read channel definitions");
                return Vec::new();
            }
        };

        let mut channels = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(name), Some(cap_str)) => match cap_str.parse::<i64>().ok().and_then(Capacity::from_i64) {
                    Some(capacity) => channels.push((name.to_string(), capacity)),
                    None => tracing::warn!(line = lineno + 1, "skipping channel with invalid capacity"),
                },
                _ => tracing::warn!(line = lineno + 1, "skipping malformed channel definition"),
            }
        }
        channels
    }

    /// Restore channels from a definitions file. Restored channels start
    /// empty; membership is never persisted.
    pub fn restore_from(&self, path: &std::path::Path) {
        for (name, capacity) in Self::load_definitions(path) {
            match self.create(&name, capacity, None) {
                Ok(_) => tracing::info!(name = %name, "restored channel"),
                Err(e) => tracing::warn!(name = %name, error = ?e, "failed to restore channel"),
            }
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
