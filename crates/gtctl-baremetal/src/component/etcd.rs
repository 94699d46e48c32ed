use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gtctl_core::addr::dial_addr;
use gtctl_core::config::log_level;
use gtctl_core::{ComponentKind, EtcdConfig, ValidationError};
use gtctl_health::{LeaderStatus, PollError, check_leader};
use tracing::info;

use super::{Component, ComponentContext, component_log_dir, delete_replicas, flag, spawn_replicas};
use crate::error::{BareMetalError, BareMetalResult};
use crate::runner::ProcessRecord;

const MEMBER_NAME: &str = "etcd";

/// Single-member etcd cluster used as the metadata store.
#[derive(Debug, Clone)]
pub struct Etcd {
    config: EtcdConfig,
    ctx: ComponentContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdArgs {
    pub data_dir: PathBuf,
    pub client_addr: String,
    pub peer_addr: String,
    pub log_level: String,
}

impl EtcdArgs {
    pub fn render(&self) -> Vec<String> {
        let client_url = format!("http://{}", self.client_addr);
        let peer_url = format!("http://{}", self.peer_addr);
        vec![
            flag("name", MEMBER_NAME),
            flag("data-dir", self.data_dir.display()),
            flag("listen-client-urls", &client_url),
            flag("advertise-client-urls", &client_url),
            flag("listen-peer-urls", &peer_url),
            flag("initial-advertise-peer-urls", &peer_url),
            flag("initial-cluster", format!("{MEMBER_NAME}={peer_url}")),
            flag("log-level", &self.log_level),
        ]
    }
}

impl Etcd {
    pub fn new(config: EtcdConfig, ctx: ComponentContext) -> Self {
        Self { config, ctx }
    }

    fn client_addr(&self) -> BareMetalResult<&str> {
        self.config
            .client_addr
            .as_deref()
            .ok_or_else(|| missing("clientAddr"))
    }

    pub fn args(&self) -> BareMetalResult<EtcdArgs> {
        let peer_addr = self
            .config
            .peer_addr
            .as_deref()
            .ok_or_else(|| missing("peerAddr"))?;
        Ok(EtcdArgs {
            data_dir: self.ctx.layout.replica_dirs(ComponentKind::Etcd, 0).data_dir,
            client_addr: self.client_addr()?.to_string(),
            peer_addr: peer_addr.to_string(),
            log_level: log_level(self.config.log_level.as_deref()).to_string(),
        })
    }
}

fn missing(field: &'static str) -> BareMetalError {
    ValidationError::MissingAddress {
        component: MEMBER_NAME,
        field,
    }
    .into()
}

#[async_trait]
impl Component for Etcd {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Etcd
    }

    fn replicas(&self) -> u32 {
        1
    }

    fn build_args(&self, _index: u32) -> BareMetalResult<Vec<String>> {
        Ok(self.args()?.render())
    }

    async fn start(&self, binary: &Path) -> BareMetalResult<Vec<ProcessRecord>> {
        let records = spawn_replicas(self, &self.ctx, binary)?;

        let etcdctl = binary.with_file_name("etcdctl");
        let endpoint = dial_addr(self.client_addr()?);
        let log_dir = component_log_dir(&self.ctx.layout, ComponentKind::Etcd);
        match check_leader(
            &etcdctl,
            &endpoint,
            &self.ctx.leader,
            self.ctx.runner.cancel_token(),
        )
        .await
        {
            Ok(LeaderStatus::Elected { attempts }) => {
                info!(%endpoint, attempts, "etcd is ready");
                Ok(records)
            }
            Ok(LeaderStatus::Skipped) => Ok(records),
            Err(PollError::Cancelled { .. }) => {
                Err(self.ctx.runner.cancellation_error(MEMBER_NAME))
            }
            Err(PollError::Exhausted { attempts } | PollError::Timeout { attempts, .. }) => {
                Err(BareMetalError::LeaderNotFound { attempts, log_dir })
            }
        }
    }

    /// etcd serves no `/health` endpoint here; its readiness gate is the
    /// leader check in [`Etcd::start`].
    async fn is_running(&self) -> bool {
        true
    }

    async fn delete(&self, retain_logs: bool) -> BareMetalResult<()> {
        delete_replicas(ComponentKind::Etcd, 1, &self.ctx.layout, retain_logs)
    }
}
