use std::path::Path;

use async_trait::async_trait;
use gtctl_core::config::log_level;
use gtctl_core::{ComponentKind, MetaSrvConfig, ValidationError};

use super::{
    Component, ComponentContext, GreptimeArgs, delete_replicas, flag, health_targets, probe_all,
    spawn_replicas, wait_for_health,
};
use crate::error::{BareMetalError, BareMetalResult};
use crate::runner::ProcessRecord;

/// The metadata server. Stores cluster state in etcd.
#[derive(Debug, Clone)]
pub struct MetaSrv {
    config: MetaSrvConfig,
    store_addr: String,
    ctx: ComponentContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaSrvArgs {
    pub common: GreptimeArgs,
    pub store_addr: String,
    pub server_addr: String,
    pub bind_addr: String,
    pub http_addr: String,
}

impl MetaSrvArgs {
    pub fn render(&self) -> Vec<String> {
        self.common.render(vec![
            flag("store-addr", &self.store_addr),
            flag("server-addr", &self.server_addr),
            flag("bind-addr", &self.bind_addr),
            flag("http-addr", &self.http_addr),
        ])
    }
}

impl MetaSrv {
    /// `store_addr` is the etcd client address metasrv connects to.
    pub fn new(config: MetaSrvConfig, store_addr: String, ctx: ComponentContext) -> Self {
        Self {
            config,
            store_addr,
            ctx,
        }
    }

    fn required<'a>(value: &'a Option<String>, field: &'static str) -> BareMetalResult<&'a str> {
        value.as_deref().ok_or_else(|| {
            BareMetalError::from(ValidationError::MissingAddress {
                component: "metasrv",
                field,
            })
        })
    }

    pub fn args(&self) -> BareMetalResult<MetaSrvArgs> {
        let server_addr = Self::required(&self.config.server_addr, "serverAddr")?;
        let http_addr = Self::required(&self.config.http_addr, "httpAddr")?;
        let dirs = self.ctx.layout.replica_dirs(ComponentKind::MetaSrv, 0);
        Ok(MetaSrvArgs {
            common: GreptimeArgs {
                log_level: log_level(self.config.log_level.as_deref()).to_string(),
                log_dir: dirs.log_dir,
                subcommand: "metasrv",
                config_file: self.config.config.clone(),
            },
            store_addr: self.store_addr.clone(),
            server_addr: server_addr.to_string(),
            bind_addr: server_addr.to_string(),
            http_addr: http_addr.to_string(),
        })
    }

    fn health_targets(&self) -> BareMetalResult<Vec<String>> {
        health_targets(Self::required(&self.config.http_addr, "httpAddr")?, 1)
    }
}

#[async_trait]
impl Component for MetaSrv {
    fn kind(&self) -> ComponentKind {
        ComponentKind::MetaSrv
    }

    fn replicas(&self) -> u32 {
        1
    }

    fn build_args(&self, _index: u32) -> BareMetalResult<Vec<String>> {
        Ok(self.args()?.render())
    }

    async fn start(&self, binary: &Path) -> BareMetalResult<Vec<ProcessRecord>> {
        let targets = self.health_targets()?;
        let records = spawn_replicas(self, &self.ctx, binary)?;
        wait_for_health(ComponentKind::MetaSrv, &targets, &self.ctx).await?;
        Ok(records)
    }

    async fn is_running(&self) -> bool {
        match self.health_targets() {
            Ok(targets) => probe_all(&targets).await,
            Err(_) => false,
        }
    }

    async fn delete(&self, retain_logs: bool) -> BareMetalResult<()> {
        delete_replicas(ComponentKind::MetaSrv, 1, &self.ctx.layout, retain_logs)
    }
}
