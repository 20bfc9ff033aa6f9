//! artifact-sync core
//!
//! Tenant-partitioned store of deployed gateway artifacts, the synchronizer
//! that keeps it and the execution engine in line with the control plane,
//! and the query gateway that answers from it.

pub mod adapter;
pub mod config;
pub mod feed;
pub mod http;
pub mod models;
pub mod observe;
pub mod output;
pub mod query;
pub mod store;
pub mod sync;
pub mod utils;
