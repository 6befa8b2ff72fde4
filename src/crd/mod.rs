//! Custom resource types
//!
//! - `canary` - the KULTA Canary descriptor driving a target/primary pair
//! - `cloneset` - typed mirror of the OpenKruise CloneSet workload

pub mod canary;
pub mod cloneset;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "canary_test.rs"]
mod canary_tests;
