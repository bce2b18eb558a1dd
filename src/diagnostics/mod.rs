//! In-flight operation registry with phase annotations, plus an HTTP
//! introspection endpoint.
//!
//! Every node-graph operation that may block on a backend call or a lock
//! registers on entry and deregisters on exit via an RAII [`OpGuard`]. The
//! tracker is nil-safe (spec: "a null tracker produces no-op handles"): a
//! [`Diagnostics`] constructed with `enabled: false` never stores anything,
//! so call sites never need to branch on whether tracking is configured.
//!
//! The snapshot endpoint is a plain `axum::Router` returning
//! `Json(json!({...}))`, the same shape as any other health route.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

struct OpInfo {
    kind: &'static str,
    method: &'static str,
    detail: String,
    phase: Mutex<String>,
    started: Instant,
}

#[derive(Debug, Serialize)]
pub struct OpSnapshot {
    pub id: u64,
    pub kind: &'static str,
    pub method: &'static str,
    pub detail: String,
    pub phase: String,
    pub elapsed_ms: u128,
}

/// Per-mount in-flight operation registry. Per-mount rather than a process
/// global so multiple mounts in one process (the test harness) never
/// cross-talk.
pub struct Diagnostics {
    enabled: bool,
    next_id: AtomicU64,
    ops: Mutex<HashMap<u64, OpInfo>>,
}

impl Diagnostics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            next_id: AtomicU64::new(1),
            ops: Mutex::new(HashMap::new()),
        }
    }

    /// Register an operation and return a guard that deregisters on drop
    /// (covering early returns via `?` as well as normal completion).
    pub fn register(&self, kind: &'static str, method: &'static str, detail: impl Into<String>) -> OpGuard<'_> {
        if !self.enabled {
            return OpGuard { tracker: self, id: 0, active: false };
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let info = OpInfo {
            kind,
            method,
            detail: detail.into(),
            phase: Mutex::new("started".to_string()),
            started: Instant::now(),
        };
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).insert(id, info);
        OpGuard { tracker: self, id, active: true }
    }

    fn set_phase(&self, id: u64, phase: &str) {
        let guard = self.ops.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(info) = guard.get(&id) {
            *info.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase.to_string();
        }
    }

    fn deregister(&self, id: u64) {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    pub fn snapshot(&self) -> Vec<OpSnapshot> {
        let guard = self.ops.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<OpSnapshot> = guard
            .iter()
            .map(|(id, info)| OpSnapshot {
                id: *id,
                kind: info.kind,
                method: info.method,
                detail: info.detail.clone(),
                phase: info.phase.lock().unwrap_or_else(|e| e.into_inner()).clone(),
                elapsed_ms: info.started.elapsed().as_millis(),
            })
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    /// Log (at `warn!`) any operation whose elapsed time is within `margin`
    /// of `deadline`. Used by the test watchdog.
    pub fn warn_near_deadline(&self, deadline: Duration, margin: Duration) {
        for op in self.snapshot() {
            let elapsed = Duration::from_millis(op.elapsed_ms as u64);
            if elapsed + margin >= deadline {
                let backtrace = std::backtrace::Backtrace::force_capture();
                tracing::warn!(
                    op.id,
                    op.kind,
                    op.method,
                    op.detail = %op.detail,
                    op.phase = %op.phase,
                    elapsed_ms = op.elapsed_ms,
                    %backtrace,
                    "operation approaching deadline"
                );
            }
        }
    }
}

/// RAII handle returned by [`Diagnostics::register`]. `active: false` is the
/// no-op state for a disabled tracker — `set_phase` and `Drop` both check it
/// rather than making call sites branch.
pub struct OpGuard<'a> {
    tracker: &'a Diagnostics,
    id: u64,
    active: bool,
}

impl OpGuard<'_> {
    pub fn set_phase(&self, phase: &str) {
        if self.active {
            self.tracker.set_phase(self.id, phase);
        }
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            self.tracker.deregister(self.id);
        }
    }
}

pub fn router(diagnostics: std::sync::Arc<Diagnostics>) -> Router {
    Router::new().route("/", get(snapshot_handler)).with_state(diagnostics)
}

async fn snapshot_handler(State(diagnostics): State<std::sync::Arc<Diagnostics>>) -> Json<Value> {
    Json(json!({ "operations": diagnostics.snapshot() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_tracker_records_and_clears() {
        let d = Diagnostics::new(true);
        {
            let guard = d.register("conversation", "send", "local-id abcd1234");
            guard.set_phase("HTTP POST");
            assert_eq!(d.snapshot().len(), 1);
            assert_eq!(d.snapshot()[0].phase, "HTTP POST");
        }
        assert!(d.snapshot().is_empty());
    }

    #[test]
    fn disabled_tracker_is_a_pure_no_op() {
        let d = Diagnostics::new(false);
        let guard = d.register("conversation", "send", "x");
        guard.set_phase("whatever");
        assert!(d.snapshot().is_empty());
        drop(guard);
        assert!(d.snapshot().is_empty());
    }

    #[test]
    fn snapshot_sorted_by_id() {
        let d = Diagnostics::new(true);
        let _g1 = d.register("a", "m1", "d1");
        let _g2 = d.register("b", "m2", "d2");
        let snap = d.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap[0].id < snap[1].id);
    }
}
