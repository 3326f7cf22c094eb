pub mod archive;
pub mod database;
pub mod fixtures;

pub use archive::*;
pub use database::*;
pub use fixtures::*;
