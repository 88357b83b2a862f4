//! Deterministic device engine for tests and demos.
//!
//! Records every call made on each opened handle and lets the caller
//! decide when asynchronous operations complete.

pub mod device;
pub mod engine;

pub use device::{CompletionMode, DeviceOp, SimulatedDevice};
pub use engine::SimulatedEngine;
