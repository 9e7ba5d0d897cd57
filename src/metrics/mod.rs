//! Metrics export.
//!
//! Check results can be pushed to a Prometheus Push Gateway in addition to the
//! plugin output.
//!
//! # Submodules
//!
//! - `prom` - Prometheus metrics integration

pub mod prom;
