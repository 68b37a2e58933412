//! Function-eval queue: the single-pending-eval-per-thread invariant and
//! the promise rendezvous between the command handler that issues an eval
//! and the callback that reports its completion (spec §4.4 steps 1-4,
//! §5 "blocking-wait suspension points").
//!
//! Three invariants (spec §4.4):
//! - I1: at most one eval may be pending per thread at a time.
//! - I2: every pending eval is resolved exactly once, by completion,
//!   failure, or abort — never left dangling.
//! - I3: a cross-thread-dependency notification or process exit aborts
//!   every pending eval immediately.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{EvalError, EvalFailReason, EvalFailed};
use crate::ids::ThreadId;

/// The value produced by a completed eval: an opaque handle the evaluator
/// looks up in the engine binding's value table, or `None` for a `void`
/// result (spec §4.4 step 4).
#[derive(Debug, Clone, Copy)]
pub struct EvalOutcome {
    pub result: Option<u64>,
}

/// Tracks at most one in-flight eval per thread (spec §5 `evalMutex`).
pub struct FunctionEvalQueue {
    pending: Mutex<HashMap<ThreadId, oneshot::Sender<Result<EvalOutcome, EvalError>>>>,
}

impl Default for FunctionEvalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionEvalQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pending eval for `thread`, returning the receiving end of
    /// its rendezvous. Fails I1 if one is already pending.
    pub fn begin(&self, thread: ThreadId) -> Result<oneshot::Receiver<Result<EvalOutcome, EvalError>>, EvalError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&thread) {
            return Err(EvalError::Eval(EvalFailed(EvalFailReason::BadStartingPoint)));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(thread, tx);
        Ok(rx)
    }

    /// Resolve a pending eval with its engine-reported value (spec §4.4
    /// step 4, `EvalComplete`).
    pub fn complete(&self, thread: ThreadId, result: Option<u64>) {
        if let Some(tx) = self.pending.lock().remove(&thread) {
            let _ = tx.send(Ok(EvalOutcome { result }));
        }
    }

    /// Resolve a pending eval with a failure reason (`EvalException`, or
    /// any of the synchronous rejection cases in spec §4.4).
    pub fn fail(&self, thread: ThreadId, reason: EvalFailReason) {
        if let Some(tx) = self.pending.lock().remove(&thread) {
            let _ = tx.send(Err(EvalError::Eval(EvalFailed(reason))));
        }
    }

    /// I3: abort every pending eval (process exit, cross-thread-dependency
    /// notification, or `Disconnect`).
    pub fn abort_all(&self) {
        let mut pending = self.pending.lock();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(EvalError::Eval(EvalFailed(EvalFailReason::Aborted))));
        }
    }

    pub fn abort_thread(&self, thread: ThreadId) {
        if let Some(tx) = self.pending.lock().remove(&thread) {
            let _ = tx.send(Err(EvalError::Eval(EvalFailed(EvalFailReason::Aborted))));
        }
    }

    pub fn is_pending(&self, thread: ThreadId) -> bool {
        self.pending.lock().contains_key(&thread)
    }

    /// Whether any thread has an eval in flight (spec §4.6 `Continue`:
    /// "resumes only if no eval is pending and the queue is empty").
    pub fn any_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_resolves_the_waiting_receiver() {
        let queue = FunctionEvalQueue::new();
        let rx = queue.begin(ThreadId(1)).unwrap();
        queue.complete(ThreadId(1), Some(42));
        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome.result, Some(42));
    }

    #[tokio::test]
    async fn second_begin_on_same_thread_rejected() {
        let queue = FunctionEvalQueue::new();
        let _rx = queue.begin(ThreadId(1)).unwrap();
        assert!(queue.begin(ThreadId(1)).is_err());
    }

    #[tokio::test]
    async fn abort_all_fails_every_pending_eval() {
        let queue = FunctionEvalQueue::new();
        let rx1 = queue.begin(ThreadId(1)).unwrap();
        let rx2 = queue.begin(ThreadId(2)).unwrap();
        queue.abort_all();
        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_err());
        assert!(!queue.is_pending(ThreadId(1)));
    }

    #[tokio::test]
    async fn any_pending_tracks_the_pending_set() {
        let queue = FunctionEvalQueue::new();
        assert!(!queue.any_pending());
        let _rx = queue.begin(ThreadId(1)).unwrap();
        assert!(queue.any_pending());
        queue.complete(ThreadId(1), None);
        assert!(!queue.any_pending());
    }

    #[tokio::test]
    async fn fail_reports_the_given_reason() {
        let queue = FunctionEvalQueue::new();
        let rx = queue.begin(ThreadId(1)).unwrap();
        queue.fail(ThreadId(1), EvalFailReason::StackOverflow);
        match rx.await.unwrap() {
            Err(EvalError::Eval(EvalFailed(EvalFailReason::StackOverflow))) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
