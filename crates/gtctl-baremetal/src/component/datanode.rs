use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gtctl_core::config::log_level;
use gtctl_core::{ComponentKind, DatanodeConfig, ValidationError};

use super::{
    Component, ComponentContext, GreptimeArgs, delete_replicas, flag, health_targets, probe_all,
    replica_addr, spawn_replicas, wait_for_health,
};
use crate::error::{BareMetalError, BareMetalResult};
use crate::runner::ProcessRecord;

/// Storage nodes. Replica `i` runs with node id `i` and ports offset by `i`.
#[derive(Debug, Clone)]
pub struct Datanode {
    config: DatanodeConfig,
    metasrv_addr: String,
    ctx: ComponentContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatanodeArgs {
    pub common: GreptimeArgs,
    pub node_id: u32,
    pub metasrv_addr: String,
    pub rpc_addr: Option<String>,
    pub http_addr: String,
    pub data_home: PathBuf,
}

impl DatanodeArgs {
    pub fn render(&self) -> Vec<String> {
        let mut flags = vec![
            flag("node-id", self.node_id),
            flag("metasrv-addrs", &self.metasrv_addr),
        ];
        if let Some(rpc_addr) = &self.rpc_addr {
            flags.push(flag("rpc-addr", rpc_addr));
        }
        flags.push(flag("http-addr", &self.http_addr));
        flags.push(flag("data-home", self.data_home.display()));
        self.common.render(flags)
    }
}

impl Datanode {
    pub fn new(config: DatanodeConfig, metasrv_addr: String, ctx: ComponentContext) -> Self {
        Self {
            config,
            metasrv_addr,
            ctx,
        }
    }

    fn required<'a>(value: &'a Option<String>, field: &'static str) -> BareMetalResult<&'a str> {
        value.as_deref().ok_or_else(|| {
            BareMetalError::from(ValidationError::MissingAddress {
                component: "datanode",
                field,
            })
        })
    }

    pub fn args(&self, index: u32) -> BareMetalResult<DatanodeArgs> {
        let rpc_addr = match self.config.rpc_addr.as_deref() {
            Some(base) => Some(replica_addr(base, index)?),
            None => None,
        };
        let http_addr = Self::required(&self.config.http_addr, "httpAddr")?;
        let dirs = self.ctx.layout.replica_dirs(ComponentKind::Datanode, index);
        Ok(DatanodeArgs {
            common: GreptimeArgs {
                log_level: log_level(self.config.log_level.as_deref()).to_string(),
                log_dir: dirs.log_dir,
                subcommand: "datanode",
                config_file: self.config.config.clone(),
            },
            node_id: index,
            metasrv_addr: self.metasrv_addr.clone(),
            rpc_addr,
            http_addr: replica_addr(http_addr, index)?,
            data_home: dirs.data_dir,
        })
    }

    fn health_targets(&self) -> BareMetalResult<Vec<String>> {
        health_targets(
            Self::required(&self.config.http_addr, "httpAddr")?,
            self.config.replicas,
        )
    }
}

#[async_trait]
impl Component for Datanode {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Datanode
    }

    fn replicas(&self) -> u32 {
        self.config.replicas
    }

    fn build_args(&self, index: u32) -> BareMetalResult<Vec<String>> {
        Ok(self.args(index)?.render())
    }

    async fn start(&self, binary: &Path) -> BareMetalResult<Vec<ProcessRecord>> {
        let targets = self.health_targets()?;
        let records = spawn_replicas(self, &self.ctx, binary)?;
        wait_for_health(ComponentKind::Datanode, &targets, &self.ctx).await?;
        Ok(records)
    }

    async fn is_running(&self) -> bool {
        match self.health_targets() {
            Ok(targets) => probe_all(&targets).await,
            Err(_) => false,
        }
    }

    async fn delete(&self, retain_logs: bool) -> BareMetalResult<()> {
        delete_replicas(
            ComponentKind::Datanode,
            self.config.replicas,
            &self.ctx.layout,
            retain_logs,
        )
    }
}
