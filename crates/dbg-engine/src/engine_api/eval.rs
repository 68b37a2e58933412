use crate::engine_api::{MethodToken, TypeToken};
use crate::error::Result;

/// What a queued function-eval should do once it is issued to the engine
/// (spec §4.4 step 4, §6 `CallParameterizedFunction`,
/// `NewParameterizedObjectNoConstructor`, `NewStringWithLength`,
/// `NewParameterizedArray`, `CreateValue`).
#[derive(Debug, Clone)]
pub enum EvalCall {
    /// Invoke a method (property getter, user call, `RunClassConstructor`, …).
    CallFunction {
        method: MethodToken,
        type_args: Vec<TypeToken>,
        args: Vec<EvalArg>,
    },
    /// Allocate an instance without running any constructor (spec §4.4
    /// "Class-constructor forcing", "resolve the first components as a
    /// type name … construct an uninstantiated instance").
    NewObjectNoConstructor { ty: TypeToken },
    /// Allocate a string of the given length and contents.
    NewString { contents: String },
    /// Allocate a 1-element array of `element_type` (spec §4.4 literal
    /// construction, array case).
    NewArray { element_type: TypeToken, length: u32 },
    /// Allocate a primitive/value-type value without invoking a constructor.
    CreateValue { ty: TypeToken },
}

/// An argument to a queued call; literal arguments are boxed at the call
/// site, reference arguments carry an opaque handle assigned by the
/// engine binding.
#[derive(Debug, Clone)]
pub enum EvalArg {
    /// Opaque handle to a value already living in the debuggee.
    ValueHandle(u64),
}

/// The engine's reentrant function-evaluation facility (spec §4.4).
///
/// A single eval object is created per call; [`crate::eval::queue`] owns
/// the single-pending-eval-per-thread invariant and the promise rendezvous,
/// this trait only issues the call.
pub trait FunctionEval: Send + Sync {
    /// Create an eval object bound to the given thread and issue `call`
    /// on it. Returns immediately; the result arrives later via an
    /// `EvalComplete`/`EvalException` callback (spec §4.4 steps 1 and 4).
    fn issue(&self, thread: crate::ids::ThreadId, call: EvalCall) -> Result<()>;

    /// Abort an in-flight eval (spec §4.4 "Abort-on-cross-thread-dependency").
    fn abort(&self, thread: crate::ids::ThreadId) -> Result<()>;
}
