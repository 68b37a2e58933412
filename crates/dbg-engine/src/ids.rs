//! Opaque identifiers shared across the controller, breakpoint manager,
//! evaluator and frame walker.

use serde::{Deserialize, Serialize};

/// Identifies a thread in the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub u32);

/// Depth of a frame within one thread's call stack. `0` is the innermost
/// (currently executing) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameLevel(pub u32);

/// A stable token handed to clients that encodes `(thread, level)`.
///
/// Encoding keeps the id stable across one stop event without the client
/// needing to understand its internal shape; decoding is only ever done by
/// this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(u64);

impl FrameId {
    pub fn encode(thread: ThreadId, level: FrameLevel) -> Self {
        Self(((thread.0 as u64) << 32) | level.0 as u64)
    }

    pub fn decode(self) -> (ThreadId, FrameLevel) {
        (ThreadId((self.0 >> 32) as u32), FrameLevel(self.0 as u32))
    }

    pub fn thread(self) -> ThreadId {
        self.decode().0
    }

    pub fn level(self) -> FrameLevel {
        self.decode().1
    }
}

/// Identifier shared by every breakpoint kind (line, function, exception).
/// A single counter assigns these, starting at 1 (spec §4.3).
pub type BreakpointId = u32;

/// Identifier of a loaded module, keyed by base address (spec §3: "one
/// instance per address").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u64);

/// Identifier of a variable handle (`varobj`), scoped to one stop event.
pub type VariableRefId = u64;
