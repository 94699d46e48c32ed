//! etcd leader detection.
//!
//! A freshly started etcd member answers on its client port before it has
//! elected a leader, so readiness is judged from
//! `etcdctl endpoint status --write-out=table` instead of a port probe:
//!
//! ```text
//! +----------------+------------------+---------+---------+-----------+ ...
//! |    ENDPOINT    |        ID        | VERSION | DB SIZE | IS LEADER | ...
//! +----------------+------------------+---------+---------+-----------+ ...
//! | 127.0.0.1:2379 | 8e9e05c52164694d |   3.5.7 |   20 kB |      true | ...
//! +----------------+------------------+---------+---------+-----------+ ...
//! ```

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::poll::{PollError, PollPolicy, poll_until};

const LEADER_COLUMN: &str = "IS LEADER";

/// Outcome of a successful leader check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderStatus {
    /// A row reported `IS LEADER = true`.
    Elected { attempts: u32 },
    /// No `etcdctl` was available; the check was not performed.
    Skipped,
}

/// Whether an `endpoint status` table has a row whose `IS LEADER` cell is
/// `true`.
pub fn table_has_leader(table: &str) -> bool {
    let mut rows = table
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('|'))
        .map(|line| {
            line.trim_matches('|')
                .split('|')
                .map(str::trim)
                .collect::<Vec<_>>()
        });

    let Some(header) = rows.next() else {
        return false;
    };
    let Some(column) = header
        .iter()
        .position(|cell| cell.eq_ignore_ascii_case(LEADER_COLUMN))
    else {
        return false;
    };

    rows.any(|row| row.get(column).is_some_and(|cell| *cell == "true"))
}

async fn endpoint_status(etcdctl: &Path, endpoint: &str) -> Option<String> {
    let output = Command::new(etcdctl)
        .arg(format!("--endpoints={endpoint}"))
        .args(["endpoint", "status", "--write-out=table"])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(out) => {
            debug!(
                status = %out.status,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "etcdctl endpoint status failed"
            );
            None
        }
        Err(e) => {
            debug!(error = %e, etcdctl = %etcdctl.display(), "failed to run etcdctl");
            None
        }
    }
}

/// Poll `etcdctl` until `endpoint` reports an elected leader.
///
/// A missing `etcdctl` is not an error: the check is skipped with a warning.
pub async fn check_leader(
    etcdctl: &Path,
    endpoint: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<LeaderStatus, PollError> {
    if !etcdctl.is_file() {
        warn!(
            etcdctl = %etcdctl.display(),
            "etcdctl not found, skipping leader check"
        );
        return Ok(LeaderStatus::Skipped);
    }

    let attempts = poll_until(policy, cancel, || async {
        endpoint_status(etcdctl, endpoint)
            .await
            .is_some_and(|table| table_has_leader(&table))
    })
    .await?;

    info!(%endpoint, attempts, "etcd leader elected");
    Ok(LeaderStatus::Elected { attempts })
}
