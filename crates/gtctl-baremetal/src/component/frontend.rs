use std::path::Path;

use async_trait::async_trait;
use gtctl_core::config::log_level;
use gtctl_core::{ComponentKind, FrontendConfig, ValidationError};

use super::{
    Component, ComponentContext, GreptimeArgs, delete_replicas, flag, health_targets, probe_all,
    replica_addr, spawn_replicas, wait_for_health,
};
use crate::error::{BareMetalError, BareMetalResult};
use crate::runner::ProcessRecord;

/// Query frontends. Protocol listeners are optional; only the ones
/// configured are passed on.
#[derive(Debug, Clone)]
pub struct Frontend {
    config: FrontendConfig,
    metasrv_addr: String,
    ctx: ComponentContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendArgs {
    pub common: GreptimeArgs,
    pub metasrv_addr: String,
    pub http_addr: String,
    pub rpc_addr: Option<String>,
    pub mysql_addr: Option<String>,
    pub postgres_addr: Option<String>,
}

impl FrontendArgs {
    pub fn render(&self) -> Vec<String> {
        let mut flags = vec![
            flag("metasrv-addrs", &self.metasrv_addr),
            flag("http-addr", &self.http_addr),
        ];
        let optional = [
            ("rpc-addr", &self.rpc_addr),
            ("mysql-addr", &self.mysql_addr),
            ("postgres-addr", &self.postgres_addr),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                flags.push(flag(name, value));
            }
        }
        self.common.render(flags)
    }
}

impl Frontend {
    pub fn new(config: FrontendConfig, metasrv_addr: String, ctx: ComponentContext) -> Self {
        Self {
            config,
            metasrv_addr,
            ctx,
        }
    }

    fn http_addr(&self) -> BareMetalResult<&str> {
        self.config.http_addr.as_deref().ok_or_else(|| {
            BareMetalError::from(ValidationError::MissingAddress {
                component: "frontend",
                field: "httpAddr",
            })
        })
    }

    pub fn args(&self, index: u32) -> BareMetalResult<FrontendArgs> {
        let offset = |addr: &Option<String>| -> BareMetalResult<Option<String>> {
            addr.as_deref()
                .map(|base| replica_addr(base, index))
                .transpose()
        };
        let dirs = self.ctx.layout.replica_dirs(ComponentKind::Frontend, index);
        Ok(FrontendArgs {
            common: GreptimeArgs {
                log_level: log_level(self.config.log_level.as_deref()).to_string(),
                log_dir: dirs.log_dir,
                subcommand: "frontend",
                config_file: self.config.config.clone(),
            },
            metasrv_addr: self.metasrv_addr.clone(),
            http_addr: replica_addr(self.http_addr()?, index)?,
            rpc_addr: offset(&self.config.grpc_addr)?,
            mysql_addr: offset(&self.config.mysql_addr)?,
            postgres_addr: offset(&self.config.postgres_addr)?,
        })
    }

    fn health_targets(&self) -> BareMetalResult<Vec<String>> {
        health_targets(self.http_addr()?, self.config.replicas)
    }
}

#[async_trait]
impl Component for Frontend {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Frontend
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
        wait_for_health(ComponentKind::Frontend, &targets, &self.ctx).await?;
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
            ComponentKind::Frontend,
            self.config.replicas,
            &self.ctx.layout,
            retain_logs,
        )
    }
}
