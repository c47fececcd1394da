use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::InstanceId;

/// Misuse of a hook primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("hook called outside of a component's state derivation")]
    InvalidContext,
    #[error("hook #{index} changed from `{expected}` to `{found}` between renders")]
    OrderChanged {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("component called {found} hooks, but {expected} on its first render")]
    CountChanged { expected: usize, found: usize },
}

/// Failure that aborts a render pass. Nothing from the failed pass is committed.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("hook called outside of a component's state derivation")]
    InvalidContext,
    #[error("state derivation of `{component}` failed: {source:#}")]
    StateDerivation {
        component: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("reconciliation failed: {0}")]
    Reconciliation(String),
}

impl RenderError {
    pub(crate) fn reconciliation(msg: impl Into<String>) -> Self {
        Self::Reconciliation(msg.into())
    }
}

impl From<HookError> for RenderError {
    fn from(e: HookError) -> Self {
        match e {
            HookError::InvalidContext => RenderError::InvalidContext,
            other => RenderError::Reconciliation(other.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectPhase {
    Effect,
    Cleanup,
}

impl fmt::Display for EffectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectPhase::Effect => f.write_str("effect"),
            EffectPhase::Cleanup => f.write_str("cleanup"),
        }
    }
}

/// A queued effect or cleanup failed. Reported, never propagated: the pass
/// that queued it has already committed.
#[derive(Debug, Clone, Error)]
#[error("{phase} of hook #{hook_index} in `{component}` failed: {message}")]
pub struct EffectError {
    pub instance: InstanceId,
    pub component: String,
    pub hook_index: usize,
    pub phase: EffectPhase,
    pub message: String,
}

/// Turns a `catch_unwind` payload into a readable message.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}
