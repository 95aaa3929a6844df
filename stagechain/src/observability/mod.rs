//! Observability utilities.
//!
//! The crate itself only emits `tracing` events and spans. Binaries and
//! tests call [`init_tracing`] once to install a subscriber.

mod subscriber;

pub use subscriber::{init_tracing, LogFormat};
