//! Pieces shared by every courier crate: the logging bootstrap and the
//! span-scoped logging macros.

pub mod logging;

pub use tracing;
