//! Frame walker: stitches the native stack walk's managed/internal/native
//! frames into the ordered sequence clients see (spec §4.2).
//!
//! The native walker yields frames in innermost-to-outermost order but
//! does not itself merge adjacent runtime-inserted "internal" frames
//! (security, class-init, function-eval) with the managed frame they
//! decorate; that merge is this module's job, mirroring the original's
//! `ManagedCallback::StackFrame`/`ComputeStackTrace` pairing of a "saved
//! managed context" with whatever internal/native frames follow it before
//! the next managed frame arrives.

use crate::engine_api::{FrameKind, NativeFrame};
use crate::error::{DebuggerError, Result};
use crate::ids::{FrameId, FrameLevel, ThreadId};

/// A single entry in a stitched stack trace (spec §3 `StackFrame`-shaped
/// client-visible record, derived from [`NativeFrame`]).
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub id: FrameId,
    pub kind: FrameKind,
    pub function_name: Option<String>,
    pub module_id: Option<crate::ids::ModuleId>,
    pub method_token: Option<u32>,
    pub il_offset: Option<u32>,
}

fn encode_frame(thread: ThreadId, level: u32, frame: &dyn NativeFrame) -> StackFrame {
    StackFrame {
        id: FrameId::encode(thread, FrameLevel(level)),
        kind: frame.kind(),
        function_name: frame.function_name(),
        module_id: frame.module_id(),
        method_token: frame.method_token(),
        il_offset: frame.il_offset(),
    }
}

/// Flush buffered internal frames, sorted ascending by stack address, and
/// clear the buffer. Mirrors `StitchInternalFrames`; `UnwindNativeFrames`
/// never contributes synthetic native frames of its own (it is a no-op in
/// the original), so this buffer is the only source of frames a "chain" of
/// native/internal frames ultimately emits.
fn flush_pending<'a>(out: &mut Vec<StackFrame>, thread: ThreadId, pending: &mut Vec<&'a Box<dyn NativeFrame>>) {
    pending.sort_by_key(|f| f.stack_address());
    for frame in pending.drain(..) {
        let level = out.len() as u32;
        out.push(encode_frame(thread, level, frame.as_ref()));
    }
}

/// Walk a raw, unstitched sequence of native frames (innermost first) into
/// the client-visible stack trace (spec §4.2).
///
/// Two pieces of state drive the stitch, named after the original's
/// equivalents:
/// - `chain_open` (`ctxUnmanagedChainValid`): whether we are mid-run of
///   non-managed frames following a native frame, which belong to the
///   preceding managed frame's transition rather than being their own
///   top-level entries.
/// - `pending` (`iFrameCache`): internal frames seen while the chain is
///   open, buffered rather than emitted immediately so they can be flushed
///   in address order once the chain closes.
///
/// A native frame opens the chain and is never itself emitted (`GetFrame`
/// returning nothing for it is exactly what `UnwindNativeFrames` is a
/// no-op over). An internal frame is buffered while the chain is open, or
/// emitted directly (after flushing whatever is already pending) when it
/// is not. A managed frame always flushes first, then is emitted itself.
/// Anything still pending at the end of the stack is flushed last.
pub fn walk_frames(thread: ThreadId, raw: &[Box<dyn NativeFrame>]) -> Vec<StackFrame> {
    let mut out = Vec::with_capacity(raw.len());
    let mut pending: Vec<&Box<dyn NativeFrame>> = Vec::new();
    let mut chain_open = false;

    for frame in raw {
        match frame.kind() {
            FrameKind::Native => chain_open = true,
            FrameKind::Internal(_) if chain_open => pending.push(frame),
            FrameKind::Internal(_) => {
                flush_pending(&mut out, thread, &mut pending);
                chain_open = false;
                let level = out.len() as u32;
                out.push(encode_frame(thread, level, frame.as_ref()));
            }
            FrameKind::Managed => {
                flush_pending(&mut out, thread, &mut pending);
                chain_open = false;
                let level = out.len() as u32;
                out.push(encode_frame(thread, level, frame.as_ref()));
            }
        }
    }
    flush_pending(&mut out, thread, &mut pending);
    out
}

/// `GetStackTrace`: slice a stitched trace by `(start_frame, levels)`
/// (spec §4.2). `levels == 0` means "to the end of the stack" (spec §3
/// `GetStackTrace` "levels"), mirroring the infinite-upper-bound flush at
/// end of stack.
pub fn slice_stack_trace(frames: &[StackFrame], start_frame: u32, levels: u32) -> &[StackFrame] {
    let start = (start_frame as usize).min(frames.len());
    let end = if levels == 0 {
        frames.len()
    } else {
        (start + levels as usize).min(frames.len())
    };
    &frames[start..end]
}

/// `GetFrameAt`: look one frame up by its encoded id (spec §4.2).
pub fn frame_at(frames: &[StackFrame], id: FrameId) -> Result<&StackFrame> {
    frames
        .iter()
        .find(|f| f.id == id)
        .ok_or_else(|| DebuggerError::not_found("frame"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_api::MethodToken;
    use crate::ids::ModuleId;

    struct FixedFrame {
        kind: FrameKind,
        address: u64,
        function_name: Option<String>,
        method_token: Option<MethodToken>,
        module_id: Option<ModuleId>,
        il_offset: Option<u32>,
    }

    impl NativeFrame for FixedFrame {
        fn kind(&self) -> FrameKind {
            self.kind.clone()
        }
        fn stack_address(&self) -> u64 {
            self.address
        }
        fn function_name(&self) -> Option<String> {
            self.function_name.clone()
        }
        fn method_token(&self) -> Option<MethodToken> {
            self.method_token
        }
        fn module_id(&self) -> Option<ModuleId> {
            self.module_id
        }
        fn il_offset(&self) -> Option<u32> {
            self.il_offset
        }
    }

    fn sample_frames() -> Vec<Box<dyn NativeFrame>> {
        vec![
            Box::new(FixedFrame {
                kind: FrameKind::Managed,
                address: 0x2000,
                function_name: Some("Inner".into()),
                method_token: Some(2),
                module_id: Some(ModuleId(1)),
                il_offset: Some(4),
            }),
            Box::new(FixedFrame {
                kind: FrameKind::Internal("[Managed to Native Transition]"),
                address: 0x1500,
                function_name: None,
                method_token: None,
                module_id: None,
                il_offset: None,
            }),
            Box::new(FixedFrame {
                kind: FrameKind::Managed,
                address: 0x1000,
                function_name: Some("Main".into()),
                method_token: Some(1),
                module_id: Some(ModuleId(1)),
                il_offset: Some(0),
            }),
        ]
    }

    #[test]
    fn walk_preserves_raw_order_when_no_chain_is_open() {
        // No `Native` frame precedes the internal frame here, so it is
        // emitted in place rather than buffered: the raw stackwalk order
        // (innermost first) passes through unchanged.
        let stitched = walk_frames(ThreadId(1), &sample_frames());
        assert_eq!(stitched.len(), 3);
        assert_eq!(stitched[0].function_name.as_deref(), Some("Inner"));
        assert_eq!(stitched[1].kind, FrameKind::Internal("[Managed to Native Transition]"));
        assert_eq!(stitched[2].function_name.as_deref(), Some("Main"));
    }

    fn chained_frames() -> Vec<Box<dyn NativeFrame>> {
        vec![
            Box::new(FixedFrame {
                kind: FrameKind::Managed,
                address: 0x4000,
                function_name: Some("Leaf".into()),
                method_token: Some(3),
                module_id: Some(ModuleId(1)),
                il_offset: Some(8),
            }),
            Box::new(FixedFrame {
                kind: FrameKind::Native,
                address: 0x3500,
                function_name: None,
                method_token: None,
                module_id: None,
                il_offset: None,
            }),
            Box::new(FixedFrame {
                kind: FrameKind::Internal("[Native to Managed Transition]"),
                address: 0x3000,
                function_name: None,
                method_token: None,
                module_id: None,
                il_offset: None,
            }),
            Box::new(FixedFrame {
                kind: FrameKind::Internal("[Managed to Native Transition]"),
                address: 0x1000,
                function_name: None,
                method_token: None,
                module_id: None,
                il_offset: None,
            }),
            Box::new(FixedFrame {
                kind: FrameKind::Managed,
                address: 0x0500,
                function_name: Some("Main".into()),
                method_token: Some(1),
                module_id: Some(ModuleId(1)),
                il_offset: Some(0),
            }),
        ]
    }

    #[test]
    fn walk_buffers_internal_frames_behind_a_native_frame_and_flushes_by_address() {
        let stitched = walk_frames(ThreadId(1), &chained_frames());

        // The native frame itself never appears; the two internal frames
        // it opened a chain for are flushed in ascending address order
        // once the next managed frame closes the chain.
        assert_eq!(stitched.len(), 4);
        assert_eq!(stitched[0].function_name.as_deref(), Some("Leaf"));
        assert_eq!(stitched[1].kind, FrameKind::Internal("[Managed to Native Transition]"));
        assert_eq!(stitched[2].kind, FrameKind::Internal("[Native to Managed Transition]"));
        assert_eq!(stitched[3].function_name.as_deref(), Some("Main"));
        assert!(stitched.iter().all(|f| f.kind != FrameKind::Native));
    }

    #[test]
    fn frame_ids_encode_level_within_thread() {
        let stitched = walk_frames(ThreadId(9), &sample_frames());
        for (level, frame) in stitched.iter().enumerate() {
            assert_eq!(frame.id.thread(), ThreadId(9));
            assert_eq!(frame.id.level(), FrameLevel(level as u32));
        }
    }

    #[test]
    fn slice_zero_levels_means_to_end_of_stack() {
        let stitched = walk_frames(ThreadId(1), &sample_frames());
        let sliced = slice_stack_trace(&stitched, 1, 0);
        assert_eq!(sliced.len(), 2);
    }

    #[test]
    fn slice_clamps_past_stack_end() {
        let stitched = walk_frames(ThreadId(1), &sample_frames());
        let sliced = slice_stack_trace(&stitched, 2, 10);
        assert_eq!(sliced.len(), 1);
    }

    #[test]
    fn frame_at_looks_up_by_id() {
        let stitched = walk_frames(ThreadId(3), &sample_frames());
        let id = stitched[1].id;
        let found = frame_at(&stitched, id).unwrap();
        assert_eq!(found.kind, FrameKind::Internal("[Managed to Native Transition]"));
    }

    #[test]
    fn frame_at_missing_id_errors() {
        let stitched = walk_frames(ThreadId(3), &sample_frames());
        let bogus = FrameId::encode(ThreadId(99), FrameLevel(0));
        assert!(frame_at(&stitched, bogus).is_err());
    }
}
