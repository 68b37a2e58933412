//! Trait boundary to the native debugging engine (spec §6).
//!
//! The real engine is an external, COM-style object graph
//! (`ICorDebugProcess`, `ICorDebugThread`, `ICorDebugILFrame`,
//! `ICorDebugValue`, `ICorDebugFunctionBreakpoint`, `ICorDebugStepper`,
//! a metadata-import object, a symbol reader, and a managed-callback sink).
//! None of that is implemented here — this module only states the traits
//! the controller, breakpoint manager, evaluator and frame walker program
//! against, so that [`crate::testutil::fake`] (a small in-memory stand-in)
//! and a real binding can both satisfy them.

mod breakpoint;
mod callback;
mod eval;
mod frame;
mod launcher;
mod metadata;
mod process;
mod stepper;
mod thread;
mod value;

pub use breakpoint::NativeBreakpoint;
pub use callback::{ExceptionCategory, ExceptionStage, ManagedCallbackEvent};
pub use eval::{EvalArg, EvalCall, FunctionEval};
pub use frame::{FrameKind, NativeFrame};
pub use launcher::{EngineLauncher, EngineSession};
pub use metadata::{
    FieldInfo, MetadataReader, MethodInfo, PropertyInfo, SequencePoint, SymbolReader, TypeInfo,
    HIDDEN_LINE,
};
pub use process::{LoadedModuleInfo, NativeProcess};
pub use stepper::{InterceptMask, NativeStepper, StepKind, UnmappedStopMask};
pub use thread::NativeThread;
pub use value::{NativeValue, ValueKind};

/// A handle to a method/function in the native engine (spec §3 `CodeLocation.methodToken`).
pub type MethodToken = u32;
/// A handle to a type in the native engine's metadata.
pub type TypeToken = u32;
/// Module version id, a GUID-shaped value (spec GLOSSARY "MVID").
pub type Mvid = [u8; 16];
