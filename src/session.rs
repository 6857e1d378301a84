use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{require, Result};

/// Bound applied to every bytes-to-be-written channel in the relay path
/// (public-socket → control writer, control reader → backend writer).
/// Reaching this depth is what "queued above the high-water mark" (§4.6)
/// means in this implementation: the bounded `mpsc::Sender::send` future
/// simply doesn't resolve until the reader on the other end drains it,
/// which is what pauses the upstream reader.
pub const CHANNEL_CAPACITY: usize = 64;

/// A session id in its textual UUID form: 36 ASCII characters, five
/// hyphen-delimited groups (§6). Validation is intentionally shallow —
/// length and hyphen count only, not full version/variant bit checking —
/// because the wire format treats ids as opaque tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = crate::error::TunnelError;

    fn from_str(s: &str) -> Result<Self> {
        require(s.len() == 36, "session id must be 36 characters")?;
        require(
            s.chars().filter(|&c| c == '-').count() == 4,
            "session id must contain four hyphens",
        )?;
        let uuid = Uuid::parse_str(s)
            .map_err(|e| crate::error::TunnelError::Protocol(format!("bad session id: {e}")))?;
        Ok(Self(uuid))
    }
}

/// One live session's handle, as held by the side that does *not* own the
/// socket directly but needs to forward bytes to whoever does: the
/// control-reader task looks a `SessionId` up in a `SessionTable` and
/// pushes the frame body onto `sender`, which the owning socket's writer
/// task is draining.
///
/// `kill` reaches the connection task that owns the actual read half. It's
/// the same kill-channel shape the redirector/starter control loops use at
/// whole-session granularity, sized down to one id: sending on it is how a
/// peer-initiated CLOSE stops a blocked `read_half.read()` that would
/// otherwise keep running under an id the table no longer knows about.
pub struct SessionHandle {
    pub sender: mpsc::Sender<Vec<u8>>,
    pub port: u16,
    pub kill: mpsc::Sender<()>,
}

/// The redirector-side or starter-side session table (§3 "Session").
///
/// Both sides have the identical shape — `SessionId -> SessionHandle` — so
/// one type serves both; only who calls `insert_fresh` vs `insert_if_absent`
/// differs (the redirector mints ids, the starter only ever receives them).
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, SessionHandle>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a fresh, collision-free id and inserts `handle` under it
    /// (redirector: "assign a fresh id ... rejecting collisions").
    pub fn insert_fresh(&mut self, handle: SessionHandle) -> SessionId {
        loop {
            let id = SessionId::new();
            if let std::collections::hash_map::Entry::Vacant(entry) = self.sessions.entry(id) {
                entry.insert(handle);
                return id;
            }
        }
    }

    /// Inserts `handle` under `id` only if no entry exists yet (starter:
    /// "created ... lazily on first DATA frame for an unknown id").
    /// Returns `false` if `id` was already present.
    pub fn insert_if_absent(&mut self, id: SessionId, handle: SessionHandle) -> bool {
        match self.sessions.entry(id) {
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(handle);
                true
            }
            std::collections::hash_map::Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionHandle> {
        self.sessions.get(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.remove(id)
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
