use crate::ids::{ModuleId, ThreadId};

/// Which filter-relevant point an exception notification represents
/// (spec §4.3 "Exception matching"). The three booleans the original
/// engine reports (`handled`, `userHandled`, `frameOwnedByUserCode`)
/// always resolve to exactly one of these three points for a given
/// notification, so the dispatch logic matches directly against the
/// stage instead of re-deriving it from booleans at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionStage {
    /// First-chance notification: any throw, regardless of handler.
    Thrown,
    /// The exception is about to leave user code unhandled (it may still
    /// be caught by non-user code above).
    UserUnhandled,
    /// The exception reached the top of the stack without being caught.
    Unhandled,
}

/// `ICorDebugManagedCallback`'s 40+ methods collapsed into one tagged enum
/// delivered over a channel and dispatched in a worker loop (spec §9
/// design note). Variants not named here (e.g. `LoadClass`/`UnloadClass`
/// beyond the JMC-relevant ones, `Unload*`, `ControlCallback`,
/// `FunctionRemapOpportunity`) fall through to the controller's default
/// "ignore + Continue" arm.
#[derive(Debug, Clone)]
pub enum ManagedCallbackEvent {
    CreateProcess,
    ExitProcess,
    CreateThread(ThreadId),
    ExitThread(ThreadId),
    LoadModule(ModuleId),
    UnloadModule(ModuleId),
    /// A native breakpoint fired; the controller looks the handle up in
    /// the breakpoint manager by identity, so only an opaque id crosses
    /// the channel.
    Breakpoint {
        thread: ThreadId,
        native_breakpoint_id: u64,
    },
    StepComplete(ThreadId),
    Exception {
        thread: ThreadId,
        category: ExceptionCategory,
        stage: ExceptionStage,
        type_name: String,
        message: Option<String>,
    },
    EvalComplete {
        thread: ThreadId,
        result: Option<u64>,
    },
    EvalException {
        thread: ThreadId,
        reason: String,
    },
    NameChange(ThreadId),
    BreakpointSetError {
        id: crate::ids::BreakpointId,
        error_code: i32,
    },
    MdaNotification {
        thread: ThreadId,
        name: String,
        description: String,
    },
    /// `System.Diagnostics.Debugger.CrossThreadDependencyNotification`
    /// (spec §4.6 "LoadModule" enabling it, §4.4 "Abort-on-cross-thread-
    /// dependency" consuming it).
    CustomNotification(ThreadId),
    /// Engine acknowledged an async `Stop` request (spec §4.6 `Pause`).
    Break(ThreadId),
}

/// Which exception subsystem reported the notification (spec §3
/// `ExceptionBreakpoint.category`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCategory {
    Clr,
    Mda,
}
