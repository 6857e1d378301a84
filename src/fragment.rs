use std::collections::HashMap;

use crate::error::{Result, TunnelError};
use crate::session::SessionId;

/// Result of feeding one SHRED fragment into a session's reassembly buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Not all fragments have arrived yet.
    Pending,
    /// The final fragment arrived; `body` is the concatenation in index
    /// order, ready to be delivered as if it were a single DATA payload.
    Complete(Vec<u8>),
}

/// Per-session reassembly state (§3 "Fragment buffer", §4.5).
struct FragmentBuffer {
    total: u32,
    parts: HashMap<u32, Vec<u8>>,
}

impl FragmentBuffer {
    fn new(total: u32) -> Self {
        Self {
            total,
            parts: HashMap::new(),
        }
    }
}

/// Owns the fragment buffers for every session currently reassembling a
/// SHRED sequence. Lives alongside a side's session table; entries are
/// created lazily on first SHRED for an id and removed once reassembly
/// completes, the session closes, or a protocol error is detected.
#[derive(Default)]
pub struct FragmentTable {
    buffers: HashMap<SessionId, FragmentBuffer>,
}

impl FragmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment into session `id`'s buffer.
    ///
    /// Edge cases handled per §4.5:
    /// - duplicate `index`: overwritten with the newest body.
    /// - `index` of 0 or `index > total`: discarded, buffer untouched.
    /// - `total` disagreeing with a prior fragment for the same id: the
    ///   whole buffer is dropped and `Err` is returned so the caller can
    ///   close the session (a genuine protocol error, not a retryable one).
    pub fn ingest(
        &mut self,
        id: SessionId,
        index: u32,
        total: u32,
        body: Vec<u8>,
    ) -> Result<FragmentOutcome> {
        if index == 0 || index > total {
            tracing::warn!(%id, index, total, "discarding out-of-range SHRED fragment");
            return Ok(FragmentOutcome::Pending);
        }

        let buffer = self
            .buffers
            .entry(id)
            .or_insert_with(|| FragmentBuffer::new(total));

        if buffer.total != total {
            self.buffers.remove(&id);
            return Err(TunnelError::Protocol(format!(
                "session {id} sent SHRED fragments with disagreeing totals"
            )));
        }

        buffer.parts.insert(index, body);

        if buffer.parts.len() == buffer.total as usize {
            let buffer = self.buffers.remove(&id).expect("just inserted");
            let mut joined = Vec::new();
            for i in 1..=buffer.total {
                joined.extend(buffer.parts.get(&i).expect("complete set has every index"));
            }
            return Ok(FragmentOutcome::Complete(joined));
        }

        Ok(FragmentOutcome::Pending)
    }

    /// Discard any in-progress reassembly for `id` (session closed mid-flight).
    pub fn discard(&mut self, id: SessionId) {
        self.buffers.remove(&id);
    }
}
