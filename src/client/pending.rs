//! The per-client pending-call table (spec.md §3, §4.4).
//!
//! Maps a caller-unique `returnCode` to a one-shot continuation. Replaces
//! the source's practice of registering a self-removing listener per call
//! (spec.md §9 design note) with an explicit map plus a `tokio::sync::oneshot`
//! per entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dusa_collection_utils::core::types::rwarc::LockWithTimeout;
use tokio::sync::oneshot;

use crate::error::SamError;
use crate::packet::Packet;

pub struct PendingCalls {
    calls: LockWithTimeout<HashMap<u64, oneshot::Sender<Packet>>>,
    last_issued: AtomicU64,
}

impl PendingCalls {
    pub fn new() -> Self {
        PendingCalls { calls: LockWithTimeout::new(HashMap::new()), last_issued: AtomicU64::new(0) }
    }

    /// A millisecond timestamp, bumped by one whenever two calls land in
    /// the same millisecond, guaranteeing uniqueness within this client's
    /// connection lifetime (spec.md §4.4 step 1).
    pub fn next_return_code(&self) -> u64 {
        let now_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        loop {
            let last = self.last_issued.load(Ordering::SeqCst);
            let candidate = if now_millis > last { now_millis } else { last + 1 };
            if self
                .last_issued
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    /// Registers a fresh one-shot continuation under `code`, returning the
    /// receiving half the caller awaits.
    pub async fn register(&self, code: u64) -> Result<oneshot::Receiver<Packet>, SamError> {
        let (tx, rx) = oneshot::channel();
        let mut calls = self.calls.try_write().await?;
        calls.insert(code, tx);
        Ok(rx)
    }

    /// Resolves the pending call for `code` with `packet`, if still
    /// present. Returns `false` for an unknown code — a late reply for an
    /// already-cancelled call, which spec.md §5 requires be dropped
    /// silently.
    pub async fn resolve(&self, code: u64, packet: Packet) -> Result<bool, SamError> {
        let sender = {
            let mut calls = self.calls.try_write().await?;
            calls.remove(&code)
        };
        Ok(sender.map(|tx| tx.send(packet).is_ok()).unwrap_or(false))
    }

    /// Tears down the entry for `code` without resolving it (timeout
    /// path); any reply arriving after this silently finds nothing.
    pub async fn cancel(&self, code: u64) -> Result<(), SamError> {
        let mut calls = self.calls.try_write().await?;
        calls.remove(&code);
        Ok(())
    }

    pub async fn len(&self) -> Result<usize, SamError> {
        let calls = self.calls.try_read().await?;
        Ok(calls.len())
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        PendingCalls::new()
    }
}
