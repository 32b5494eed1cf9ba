//! # Rust VNA Core Library
//!
//! Measurement-processing core of a two-port vector network analyzer. Raw
//! S-parameter datapoints from an instrument are averaged, acquired as
//! calibration standards, corrected with a 12-term error model and committed to
//! frequency-sorted traces. Views derive magnitude, phase, VSWR and time-domain
//! series from those traces; markers and a peak search read from them.
//!
//! ## Crate Structure
//!
//! - **`vna`**: The application root [`vna::Vna`] that owns all state and runs the
//!   per-datapoint pipeline, plus the thread-safe [`vna::SharedVna`] handle.
//! - **`config`**: Layered configuration (defaults, TOML file, `RUST_VNA_*`
//!   environment variables). See [`config::Settings`].
//! - **`sweep`**: Sweep settings, device limits and the calibration fingerprint.
//! - **`measurement_types`**: Samples, datapoints and the four live S-parameters.
//! - **`data`**: Trace store, averaging, markers, peak search, TDR and view
//!   transforms.
//! - **`calibration`**: Standard acquisition, error-term solving and correction.
//! - **`events`**: Change notifications and the [`events::EventBus`].
//! - **`hardware`**: Simulated analyzer for running without an instrument.
//! - **`error`**: The crate-wide [`error::VnaError`].
//! - **`logging`**: `tracing` subscriber setup.

pub mod calibration;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod hardware;
pub mod logging;
pub mod measurement_types;
pub mod sweep;
pub mod vna;

pub use error::{AppResult, VnaError};
pub use events::{EventBus, VnaEvent};
pub use measurement_types::{LiveParameter, Sample, VnaDatapoint};
pub use vna::{SharedVna, Vna};
