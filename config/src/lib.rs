//! # Configuration Module
//!
//! Layered settings for the rollup service.
//!
//! ## Sources, in ascending precedence
//!
//! 1. Built-in defaults (suitable for the docker-compose dev stack)
//! 2. An optional YAML file (`--config` / `EDUPULSE_CONFIG_FILE`)
//! 3. `EDUPULSE_`-prefixed environment variables (`__` as section separator,
//!    e.g. `EDUPULSE_ENDPOINTS__TASK_SERVICE`)
//!
//! Durations are plain seconds in the file/env and exposed as
//! [`std::time::Duration`] accessors.

use color_eyre::Result;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    net::SocketAddr,
    path::Path,
    time::Duration,
};
use url::Url;

/// Base URLs of the sibling platform services the collector fans out to.
/// Each field defaults independently so a deployment can override a single
/// service without restating the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub user_service: Url,
    pub task_service: Url,
    pub point_service: Url,
    pub badge_service: Url,
    /// Token-minting service; one token is issued per run and reused across
    /// all fan-out requests of that run.
    pub auth_service: Url,
    /// School/class directory that lists the tenant ids per-tenant snapshots
    /// are produced for.
    pub school_service: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            user_service: dev_url("http://user-service:3001"),
            task_service: dev_url("http://task-service:3002"),
            point_service: dev_url("http://point-service:3003"),
            badge_service: dev_url("http://badge-service:3004"),
            auth_service: dev_url("http://auth-service:3000"),
            school_service: dev_url("http://school-service:3005"),
        }
    }
}

fn dev_url(raw: &str) -> Url {
    Url::parse(raw).expect("static dev endpoint must parse")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoints: Endpoints,
    /// Per-upstream-call timeout, seconds.
    pub source_timeout_secs: u64,
    /// Wall-clock budget for a whole rollup run, seconds. A run exceeding it
    /// is marked failed, never left processing.
    pub run_budget_secs: u64,
    /// 6-field cron expression (sec min hour day month dow) for recurring
    /// full rollups. Invalid expressions are reported and replaced with the
    /// hourly default at registration time.
    pub rollup_cron: String,
    /// Address the HTTP API binds to.
    pub bind_addr: SocketAddr,
    /// How many recent jobs the listing endpoint returns by default.
    pub job_list_limit: usize,
}

pub const HOURLY_CRON: &str = "0 0 * * * *";

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            source_timeout_secs: 10,
            run_budget_secs: 120,
            rollup_cron: HOURLY_CRON.to_string(),
            bind_addr: "0.0.0.0:8086".parse().expect("static bind addr must parse"),
            job_list_limit: 50,
        }
    }
}

impl Settings {
    /// Loads settings from defaults, an optional YAML file, and the
    /// environment.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).format(config::FileFormat::Yaml));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("EDUPULSE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: Self = builder.build()?.try_deserialize()?;
        tracing::debug!(bind = %cfg.bind_addr, cron = %cfg.rollup_cron, "settings loaded");
        Ok(cfg)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.source_timeout(), Duration::from_secs(10));
        assert_eq!(settings.run_budget(), Duration::from_secs(120));
        assert_eq!(settings.rollup_cron, HOURLY_CRON);
        assert_eq!(settings.endpoints.task_service.port(), Some(3002));
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let settings = Settings::load(None).expect("defaults must load");
        assert_eq!(settings.bind_addr, Settings::default().bind_addr);
    }
}
