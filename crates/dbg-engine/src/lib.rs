//! Core state engine for a managed-runtime debugger: the controller,
//! breakpoint manager, evaluator and frame walker that sit behind a
//! protocol adapter (spec §1).
//!
//! This crate owns no transport and no process-spawning of its own; it
//! drives an external native debugging engine through the trait boundary
//! in [`engine_api`] and reports what happens through [`protocol_events`].

pub mod breakpoints;
pub mod controller;
pub mod engine_api;
pub mod entrypoint;
pub mod error;
pub mod eval;
pub mod frames;
pub mod ids;
pub mod modules;
pub mod protocol_events;
pub mod typeprint;
pub mod variables;

#[cfg(test)]
pub mod testutil;

pub use breakpoints::Breakpoints;
pub use controller::{Controller, DisconnectAction, Lifecycle, PROCESS_WIDE_THREAD};
pub use error::{DebuggerError, Result};
pub use modules::Modules;
pub use protocol_events::ProtocolEvent;
pub use variables::Variables;
