//! Instrument backends.
//!
//! Only a simulated analyzer ships with the core; real drivers deliver
//! [`VnaDatapoint`](crate::measurement_types::VnaDatapoint)s through
//! [`Vna::deliver`](crate::vna::Vna::deliver) in the same way.

pub mod mock;

pub use mock::{Dut, MockErrorModel, MockVna};
