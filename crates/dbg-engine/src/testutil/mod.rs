//! In-memory stand-in for the native engine, used by this crate's own
//! unit tests. Never compiled outside `#[cfg(test)]`.

pub mod fake;
