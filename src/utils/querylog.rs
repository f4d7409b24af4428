//! Timing record of every executed query.
//!
//! Records are written as JSON to the `rdb::query` logger target at TRACE. A [`Capture`] keeps
//! the records emitted on its own thread, so tests can inspect them without racing the global
//! logger.

use log::{Level, log_enabled, trace};
use serde::Serialize;
use std::cell::RefCell;
use std::marker::PhantomData;

/// Logger target of query timing lines.
pub const TARGET: &str = "rdb::query";

thread_local! {
    static CAPTURED: RefCell<Option<Vec<QueryLine>>> = const { RefCell::new(None) };
}

/// One executed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryLine {
    pub op: &'static str,
    pub collection: String,
    pub duration_ms: u128,
    pub results: usize,
}

impl QueryLine {
    pub fn emit(self) {
        if log_enabled!(target: TARGET, Level::Trace) {
            if let Ok(json) = serde_json::to_string(&self) {
                trace!(target: TARGET, "{json}");
            }
        }
        CAPTURED.with(|c| {
            if let Some(lines) = c.borrow_mut().as_mut() {
                lines.push(self);
            }
        });
    }
}

/// Collects the query lines emitted on the current thread until dropped.
pub struct Capture {
    _thread_bound: PhantomData<*const ()>,
}

/// Starts collecting query lines on the current thread, discarding earlier ones.
#[must_use]
pub fn capture() -> Capture {
    CAPTURED.with(|c| *c.borrow_mut() = Some(Vec::new()));
    Capture { _thread_bound: PhantomData }
}

impl Capture {
    /// Lines collected since the capture started or since the previous call.
    #[must_use]
    pub fn take(&self) -> Vec<QueryLine> {
        CAPTURED.with(|c| c.borrow_mut().as_mut().map(std::mem::take).unwrap_or_default())
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        CAPTURED.with(|c| *c.borrow_mut() = None);
    }
}
