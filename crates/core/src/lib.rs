pub mod config;
pub mod logging;
pub mod random;

pub use config::*;
pub use logging::*;
pub use random::*;

pub use intg_errors::{HarnessError, HarnessResult};
