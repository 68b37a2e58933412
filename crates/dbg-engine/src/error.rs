//! Error taxonomy (spec §7).
//!
//! Protocol command handlers surface these to the client as an error code
//! plus a one-line message. Callback handlers never surface errors to the
//! client: they log via `tracing::warn!` and continue the engine.

use thiserror::Error;

/// Why a function-eval could not run to completion (spec §4.4, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalFailReason {
    OptimizedCode,
    GcUnsafePoint,
    StackOverflow,
    AppDomainMismatch,
    FunctionNotIl,
    BadStartingPoint,
    Timeout,
    /// `EVAL_NOFUNCEVAL` is set on the evaluation context.
    Disabled,
    /// Aborted by a cross-thread-dependency notification or process exit.
    Aborted,
}

impl std::fmt::Display for EvalFailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvalFailReason::OptimizedCode => "cannot evaluate in optimized code",
            EvalFailReason::GcUnsafePoint => "cannot evaluate at a GC-unsafe point",
            EvalFailReason::StackOverflow => "cannot evaluate during a stack overflow",
            EvalFailReason::AppDomainMismatch => "cannot evaluate across app domains",
            EvalFailReason::FunctionNotIl => "starting frame is not IL",
            EvalFailReason::BadStartingPoint => "no valid starting frame for evaluation",
            EvalFailReason::Timeout => "evaluation timed out",
            EvalFailReason::Disabled => "function evaluation is disabled",
            EvalFailReason::Aborted => "evaluation was aborted",
        };
        write!(f, "{s}")
    }
}

/// Passthrough of a native-engine status code (spec §7 `EngineError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineErrorCode(pub i32);

impl std::fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

/// Errors returned by controller/breakpoint-manager/evaluator operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DebuggerError {
    /// A referenced id or name is unknown (variable ref, breakpoint id,
    /// thread id).
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation was issued when the process is not in the required
    /// state (e.g. `Continue` when no process is running).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A breakpoint could not be bound; this is reported to the user as
    /// `verified=false`, not surfaced as a hard error (spec §7).
    #[error("breakpoint did not resolve")]
    ResolveFailed,

    /// Native engine status code passthrough.
    #[error("engine error {0}")]
    EngineError(EngineErrorCode),

    /// Malformed expression in the evaluator's restricted grammar.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The debuggee process exited while the operation was in flight.
    #[error("process exited during operation")]
    ProcessGone,
}

impl DebuggerError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(what: impl Into<String>) -> Self {
        Self::InvalidState(what.into())
    }
}

/// `EvalFailed` is kept distinct from [`DebuggerError`] because it always
/// carries a reason and because the evaluator's call sites want to match
/// on the reason directly (spec §4.4 failure cases).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("eval failed: {0}")]
pub struct EvalFailed(pub EvalFailReason);

/// Unifies the two error families for call sites (e.g. the evaluator) that
/// can fail either way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Eval(#[from] EvalFailed),
    #[error(transparent)]
    Debugger(#[from] DebuggerError),
}

pub type Result<T> = std::result::Result<T, DebuggerError>;
pub type EvalResult<T> = std::result::Result<T, EvalError>;
