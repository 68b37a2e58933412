//! Abstract protocol events the controller emits (spec §6): a
//! front-end-agnostic record of "what just happened", consumed by both
//! line-oriented protocol adapters.

use crate::ids::{BreakpointId, FrameId, ModuleId, ThreadId};

/// A resolved source location attached to a `Stopped`/`Breakpoint` event
/// (spec §6 "frame-location subrecord").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Why execution stopped (spec §3 `StopState`, §6 `Stopped`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Step,
    Breakpoint,
    Exception,
    Pause,
    Entry,
}

/// A module-load/unload event's reason (spec §6 `Module`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleChangeReason {
    New,
    Removed,
}

/// Events the controller hands to a protocol adapter (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    Initialized,
    Stopped {
        thread: ThreadId,
        reason: StopReason,
        location: Option<EventLocation>,
        breakpoint: Option<BreakpointId>,
    },
    Continued {
        thread: ThreadId,
    },
    Thread {
        thread: ThreadId,
        started: bool,
    },
    Module {
        module: ModuleId,
        path: String,
        reason: ModuleChangeReason,
    },
    Output {
        category: String,
        text: String,
    },
    Breakpoint {
        id: BreakpointId,
        verified: bool,
    },
    Exited {
        exit_code: i32,
    },
    Terminated,
}

impl ProtocolEvent {
    /// Build a `Stopped` event tied to a specific frame for display
    /// purposes (spec §6); convenience used by the controller's callback
    /// dispatch.
    pub fn stopped_at(
        thread: ThreadId,
        _frame: FrameId,
        reason: StopReason,
        location: Option<EventLocation>,
        breakpoint: Option<BreakpointId>,
    ) -> Self {
        ProtocolEvent::Stopped {
            thread,
            reason,
            location,
            breakpoint,
        }
    }
}
