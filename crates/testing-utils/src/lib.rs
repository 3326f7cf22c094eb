//! # Harness Testing Utils
//!
//! Shared helpers for the harness's own integration tests.
//!
//! - **Postgres server**: reuses `INTEGRATION_POSTGRES_URL` when set, otherwise
//!   starts a throwaway Postgres 16 container
//! - **Mocks**: an in-process lock strategy and a deterministic random source
//! - **Builders**: fixture option structs with chained overrides
//! - **Helpers**: catalog queries for asserting on databases and sessions
//!
//! ```toml
//! [dev-dependencies]
//! intg-testing-utils = { path = "crates/testing-utils" }
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;
