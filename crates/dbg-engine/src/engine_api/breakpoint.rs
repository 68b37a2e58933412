use crate::engine_api::MethodToken;
use crate::error::Result;

/// A handle to a native breakpoint object (either a line/offset breakpoint
/// or a function-entry breakpoint), spec §4.3.
pub trait NativeBreakpoint: Send {
    fn activate(&self, active: bool) -> Result<()>;
    fn is_active(&self) -> Result<bool>;
    /// The function and IL offset this breakpoint is bound to, as reported
    /// by a `Breakpoint` callback hit (spec §4.3 "Hit identification").
    fn function_and_offset(&self) -> Result<(MethodToken, u32)>;
    /// Opaque identity matching the `native_breakpoint_id` a `Breakpoint`
    /// callback reports for this object, so the controller can look its
    /// binding up by value rather than by pointer.
    fn native_id(&self) -> u64;
}
