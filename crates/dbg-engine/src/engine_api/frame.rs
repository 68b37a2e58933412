use crate::engine_api::{MethodToken, NativeValue};
use crate::error::Result;
use crate::ids::ModuleId;

/// Classification of a single entry yielded by the engine's stack walker
/// (spec §4.2). `GetFrame` returning `S_FALSE` in the original maps to
/// `FrameKind::Native`; a runtime-unwindable frame is filtered by the
/// walker before it ever becomes a [`NativeFrame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Managed,
    /// Runtime-inserted marker frame, named by type (e.g.
    /// `"[Managed to Native Transition]"`).
    Internal(&'static str),
    Native,
}

/// One frame as yielded by the native stack walker, before stitching
/// (spec §4.2). The frame's "address" is its stack-range start, used to
/// order stitched internal/native frames.
pub trait NativeFrame: Send {
    fn kind(&self) -> FrameKind;

    /// Stack-range start, used only to order a chain of buffered
    /// internal/native frames amongst themselves once it closes
    /// (`crate::frames::walk_frames`); it does not order the whole stack.
    fn stack_address(&self) -> u64;

    /// `None` for native/internal frames, or frames with no symbol.
    fn function_name(&self) -> Option<String>;

    /// Present only for managed frames.
    fn method_token(&self) -> Option<MethodToken>;

    /// Present only for managed frames.
    fn module_id(&self) -> Option<ModuleId>;

    /// Current IL offset within the method, for managed frames.
    fn il_offset(&self) -> Option<u32>;

    /// `true` if this frame can be used as an evaluation starting point
    /// (i.e. it executes IL, not native code) — spec §4.4 `FunctionNotIL`.
    fn is_il_frame(&self) -> bool {
        matches!(self.kind(), FrameKind::Managed)
    }

    /// Read a local variable's current value by slot index, as resolved
    /// by the symbol reader (spec §6 `GetNamedLocalVariableAndScope`).
    /// Only meaningful for managed frames.
    fn local_variable(&self, index: u32) -> Result<Box<dyn NativeValue>> {
        let _ = index;
        Err(crate::error::DebuggerError::invalid_state("frame has no local variables"))
    }
}
