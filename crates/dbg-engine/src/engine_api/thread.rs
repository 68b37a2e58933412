use crate::engine_api::{FunctionEval, NativeFrame, NativeStepper, NativeValue};
use crate::error::Result;
use crate::ids::ThreadId;

/// Per-thread operations (spec §6 `GetThread`, `GetActiveFrame`,
/// `CreateStepper`, `CreateEval`).
pub trait NativeThread: Send {
    fn id(&self) -> ThreadId;

    /// The thread's current exception object, if one is in flight. Used by
    /// the evaluator's `$exception` expression prefix (spec §4.4).
    fn current_exception(&self) -> Result<Option<Box<dyn NativeValue>>>;

    /// `true` once a thread has reported an unhandled exception (spec §3
    /// `StopState.unhandledExceptionThreads`).
    fn is_suspended(&self) -> bool;

    /// Walk this thread's native call stack, innermost frame first, as the
    /// engine's stackwalker yields them. [`crate::frames::walk_frames`]
    /// stitches runs of native/internal frames within that order but does
    /// not reorder the stack itself, so implementations must preserve
    /// innermost-to-outermost order.
    fn frames(&self) -> Result<Vec<Box<dyn NativeFrame>>>;

    /// Create a stepper bound to this thread (spec §4.6 "Step setup").
    fn create_stepper(&self) -> Result<Box<dyn NativeStepper>>;

    /// Create an eval object bound to this thread (spec §4.4 step 1).
    fn create_eval(&self) -> Result<Box<dyn FunctionEval>>;

    /// Intercept the current exception on this thread's leaf frame and
    /// continue unwinding from there (spec §7 "exception on another
    /// thread with a pending eval: intercept and continue").
    fn intercept_current_exception(&self) -> Result<()>;
}
