//! Human-readable renderings of graph state.
pub mod trace;

pub use trace::format_trace;
