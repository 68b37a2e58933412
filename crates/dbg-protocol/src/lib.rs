//! Protocol adapters over [`dbg_engine::Controller`] (spec §6 "ADDED").
//!
//! Neither adapter here claims to be a complete or faithful MI/DAP
//! implementation: each is a minimal line-oriented translator that makes
//! the controller reachable over stdio, grounded in the command/framing
//! vocabulary of its respective wire format.

pub mod adapter;
pub mod json;
pub mod mi;

pub use adapter::ProtocolAdapter;
