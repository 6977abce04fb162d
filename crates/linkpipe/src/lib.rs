//! Public facade crate for `linkpipe`.
//!
//! This crate contains no HTML parsing or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `linkpipe-core`.

pub use linkpipe_core::*;
