//! gtctl-health: readiness checks for managed processes.
//!
//! ```text
//! poll_until(PollPolicy, CancellationToken, check)
//!   ├── all_healthy()   GET /health == 200 on every replica
//!   └── check_leader()  etcdctl endpoint status, IS LEADER == true
//! ```
//!
//! Every poll is bounded (timeout or attempt budget) and cancellable.

pub mod checker;
pub mod leader;
pub mod poll;

pub use checker::{DEFAULT_PROBE_TIMEOUT, HEALTH_PATH, ProbeResult, all_healthy, http_probe};
pub use leader::{LeaderStatus, check_leader, table_has_leader};
pub use poll::{PollError, PollPolicy, poll_until};
