pub mod entities;
pub mod expconf;
pub mod metrics;
pub mod value_objects;

// SQLx 实现（仅在启用 sqlx-support feature 时编译）
#[cfg(feature = "sqlx-support")]
pub mod sqlx_impls;

pub use entities::*;
pub use expconf::*;
pub use metrics::*;
pub use value_objects::*;
pub use intg_errors::{HarnessError, HarnessResult};
