//! Domain-level types shared across chanvcs modules.
//!
//! - `ChanvcsError`: error taxonomy for every core operation

pub mod error;

pub use error::{ChanvcsError, Result};
