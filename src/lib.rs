//! kuberecovery - a Kubernetes operator that captures the final state of
//! deleted cluster resources as Snapshots, retains them for a bounded time
//! and recreates them on demand.

#![deny(missing_docs)]

pub mod capture;
pub mod controller;
pub mod crd;
pub mod discovery;
pub mod error;
pub mod pool;
pub mod retention;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
