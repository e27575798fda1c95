//! Decides which [`TimeoutPool`] a timeline registers its timers in.
//!
//! By default all timelines share one pool, so that any number of running animations occupy a
//! single slot of the host event loop. Sharing can be turned off, in which case every request gets
//! its own pool; the registry still tracks them so a host can drive all of them through the
//! registry's [`EventSource`] implementation.
//!
//! The decision is taken once, when the registry is created.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use log::{debug, info};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::{Clock, EventSource, MonotonicClock, TimeoutPool, timeout_pool::WeakTimeoutPool};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Share one timeout pool between all timelines.
    pub share_pool: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { share_pool: true }
    }
}

impl SchedulerConfig {
    /// The environment variable that is read by [`from_env`](Self::from_env).
    pub const ENV_VAR: &'static str = "CADENCE_TIMELINE";

    /// Reads the configuration from [`ENV_VAR`](Self::ENV_VAR). The value `no-pool` disables pool
    /// sharing, everything else keeps the default.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(Self::ENV_VAR).ok().as_deref())
    }

    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some("no-pool") => Self { share_pool: false },
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    shared: OnceLock<TimeoutPool>,
    /// Per-instance pools handed out while sharing is disabled.
    instances: Mutex<Vec<WeakTimeoutPool>>,
}

impl PoolRegistry {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RegistryInner {
                config,
                clock,
                shared: OnceLock::new(),
                instances: Mutex::default(),
            }
            .into(),
        }
    }

    /// The process wide registry.
    ///
    /// Created on first use from [`SchedulerConfig::from_env`] with a [`MonotonicClock`].
    pub fn global() -> &'static PoolRegistry {
        static GLOBAL: OnceLock<PoolRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = SchedulerConfig::from_env();
            info!("Timeline pool sharing: {}", config.share_pool);
            PoolRegistry::new(config, Arc::new(MonotonicClock::new()))
        })
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.config
    }

    pub fn is_shared(&self) -> bool {
        self.inner.config.share_pool
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// The pool a new timeline should register its timers in.
    pub fn pool(&self) -> TimeoutPool {
        if self.is_shared() {
            return self
                .inner
                .shared
                .get_or_init(|| {
                    debug!("Creating the shared timeout pool");
                    TimeoutPool::with_clock(self.inner.clock.clone())
                })
                .clone();
        }

        let pool = TimeoutPool::with_clock(self.inner.clock.clone());
        let mut instances = self.inner.instances.lock();
        instances.retain(|weak| weak.upgrade().is_some());
        instances.push(pool.downgrade());
        pool
    }

    /// All pools that were handed out and are still alive.
    pub fn pools(&self) -> Vec<TimeoutPool> {
        if self.is_shared() {
            return self.inner.shared.get().cloned().into_iter().collect();
        }
        let mut instances = self.inner.instances.lock();
        instances.retain(|weak| weak.upgrade().is_some());
        instances.iter().filter_map(|weak| weak.upgrade()).collect()
    }
}

impl EventSource for PoolRegistry {
    fn next_wakeup(&self) -> Option<Duration> {
        self.pools().iter().filter_map(|p| p.next_wakeup()).min()
    }

    fn is_ready(&self) -> bool {
        // Every pool needs to mark its ready entries, so no short circuiting.
        self.pools()
            .iter()
            .fold(false, |ready, pool| pool.is_ready() | ready)
    }

    fn dispatch(&self) {
        for pool in self.pools() {
            pool.dispatch();
        }
    }
}
