//! Cooperative cancellation with a reason payload.
//!
//! A [`CancellationToken`] is a single-fire stop signal. Firing it is
//! idempotent: the first reason wins and later calls are no-ops. Child tokens
//! fire whenever their parent fires, which is how a coordinator tears down
//! every sub-pipe it owns from one place.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken as RawToken;

/// Why a producer is being torn down.
///
/// Only [`SiblingFailed`](CancelReason::SiblingFailed) and
/// [`DownstreamRejected`](CancelReason::DownstreamRejected) mark an error
/// path; every other reason is a normal stop and must not be reported as a
/// failure.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CancelReason {
    /// The caller asked for the stop, optionally saying why
    Requested(Option<String>),
    /// switch-map replaced this inner with a newer one
    Superseded,
    /// The owning operator completed and no longer needs the source
    Finished,
    /// Another source won a race
    Lost,
    /// A sibling sub-pipe failed and the coordinator is failing fast
    SiblingFailed,
    /// Writing downstream failed
    DownstreamRejected,
}

impl CancelReason {
    /// Plain caller-initiated stop.
    pub fn requested() -> Self {
        CancelReason::Requested(None)
    }

    /// Whether this teardown carries an error downstream.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CancelReason::SiblingFailed | CancelReason::DownstreamRejected
        )
    }

    /// Short static label, used for log fields and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            CancelReason::Requested(_) => "requested",
            CancelReason::Superseded => "superseded",
            CancelReason::Finished => "finished",
            CancelReason::Lost => "lost",
            CancelReason::SiblingFailed => "sibling_failed",
            CancelReason::DownstreamRejected => "downstream_rejected",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested(Some(why)) => write!(f, "requested: {}", why),
            other => f.write_str(other.label()),
        }
    }
}

/// A propagating, single-fire stop signal.
///
/// Clones share state. [`child_token`](Self::child_token) creates a token
/// that fires when either it or any ancestor fires; the child reports the
/// ancestor's reason unless it was fired first on its own.
#[derive(Clone, Default)]
pub struct CancellationToken {
    raw: RawToken,
    reason: Arc<OnceLock<CancelReason>>,
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    /// Create a token that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a token that fires together with this one.
    pub fn child_token(&self) -> Self {
        Self {
            raw: self.raw.child_token(),
            reason: Arc::new(OnceLock::new()),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Fire the token. Returns `false` when it had already fired.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        if self.raw.is_cancelled() {
            return false;
        }
        let first = self.reason.set(reason).is_ok();
        self.raw.cancel();
        first
    }

    /// Whether the token (or an ancestor) has fired.
    pub fn is_cancelled(&self) -> bool {
        self.raw.is_cancelled()
    }

    /// The reason the token fired with, if it has fired.
    pub fn reason(&self) -> Option<CancelReason> {
        if let Some(reason) = self.reason.get() {
            return Some(reason.clone());
        }
        if !self.raw.is_cancelled() {
            return None;
        }
        match &self.parent {
            Some(parent) => parent.reason(),
            None => Some(CancelReason::requested()),
        }
    }

    /// Wait until the token fires and return its reason.
    pub async fn cancelled(&self) -> CancelReason {
        self.raw.cancelled().await;
        self.reason().unwrap_or_else(CancelReason::requested)
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("is_cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
