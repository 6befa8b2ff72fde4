//! Workload lifecycle core for KULTA canary analysis
//!
//! Creates and maintains `<target>-primary` shadow workloads, classifies the
//! rollout state of both halves of the pair, detects drift and promotes a
//! vetted target revision into the primary. Deciding *when* to promote is left
//! to the analysis loop that drives these operations.

pub mod config;
pub mod controller;
pub mod crd;
pub mod server;
