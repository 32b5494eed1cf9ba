//! Trace storage, averaging and derived views.
pub mod averaging;
pub mod markers;
pub mod peaks;
pub mod tdr;
pub mod trace;
pub mod trace_model;
pub mod transforms;
