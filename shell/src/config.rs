use std::{fs, path::Path};

use anyhow::{Context, Result};
use cadence_animation::{PoolRegistry, SchedulerConfig, Timeline, TimelineConfig};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::EventLoopConfig;

/// The configuration file of a shell.
///
/// ```toml
/// [scheduler]
/// share_pool = true
///
/// [event_loop]
/// idle_poll_ms = 50
///
/// [timelines.fade]
/// duration_ms = 400
/// delay_ms = 100
/// ```
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShellConfig {
    pub scheduler: SchedulerConfig,
    pub event_loop: EventLoopConfig,
    /// In file order.
    pub timelines: IndexMap<String, TimelineConfig>,
}

impl ShellConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let toml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        Self::from_toml_str(&toml)
            .with_context(|| format!("Failed to load configuration {}", path.display()))
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        toml::from_str(toml).context("Failed to parse TOML configuration")
    }

    /// Creates the timeline named `name`.
    pub fn timeline(&self, registry: &PoolRegistry, name: &str) -> Result<Timeline> {
        let config = self
            .timelines
            .get(name)
            .with_context(|| format!("No timeline named `{name}` configured"))?;
        Timeline::from_config(registry, config)
            .with_context(|| format!("Invalid configuration of timeline `{name}`"))
    }

    /// Creates all configured timelines, in file order.
    pub fn build_timelines(&self, registry: &PoolRegistry) -> Result<IndexMap<String, Timeline>> {
        self.timelines
            .keys()
            .map(|name| {
                self.timeline(registry, name)
                    .map(|timeline| (name.clone(), timeline))
            })
            .collect()
    }
}
