//! gtctl-baremetal: runs a GreptimeDB cluster as local processes.
//!
//! # Architecture
//!
//! ```text
//! BareMetalDeployer (Deployer)
//!   └── Cluster                 runtime dir, lock, state machine
//!         ├── ArtifactManager   etcd + greptime binaries
//!         └── Component × 4     etcd → metasrv → datanode × N → frontend × N
//!               └── ProcessRunner   spawn, monitor, SIGTERM → SIGKILL
//! ```
//!
//! One [`CancellationToken`](tokio_util::sync::CancellationToken) governs a
//! cluster. Cancelling it (operator signal, readiness failure, a replica
//! dying) stops every replica; [`Cluster::wait`] returns once they are gone.

pub mod cluster;
pub mod component;
pub mod deployer;
pub mod error;
pub mod lock;
pub mod runner;
pub mod signal;

pub use cluster::{Cluster, ClusterOptions, ClusterState, CreateOptions, DeleteOptions, WaitOptions};
pub use deployer::BareMetalDeployer;
pub use error::{BareMetalError, BareMetalResult};
pub use runner::{DEFAULT_GRACE_PERIOD, ProcessExit, ProcessRecord, ProcessRunner, is_process_alive};
pub use signal::install_signal_handler;
