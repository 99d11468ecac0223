//! Cluster-singleton leader election via a KV lease.
//!
//! One instance holds the `scheduler:leader` key with a 30 s TTL and renews
//! it every 10 s through a check-and-extend script. A failed renewal demotes
//! the instance to follower, which then attempts re-election every 15 s.
//! Leader-only tasks must consult [`LeaderElector::is_leader`] at every
//! dispatch; losing leadership mid-task forces a voluntary abort at the next
//! check-point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use vorion_common::adapters::CoordinationStore;
use vorion_common::error::Result;

const LEADER_KEY: &str = "scheduler:leader";

#[derive(Debug, Clone)]
pub struct LeaderConfig {
    pub lease_ttl_secs: u64,
    pub heartbeat_interval: Duration,
    pub retry_interval: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 30,
            heartbeat_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(15),
        }
    }
}

pub type LeadershipCallback = Arc<dyn Fn() + Send + Sync>;

pub struct LeaderElector {
    store: Arc<dyn CoordinationStore>,
    config: LeaderConfig,
    identity: String,
    is_leader: AtomicBool,
    shutdown: Notify,
    on_became_leader: Option<LeadershipCallback>,
}

impl LeaderElector {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self::with_config(store, LeaderConfig::default())
    }

    pub fn with_config(store: Arc<dyn CoordinationStore>, config: LeaderConfig) -> Self {
        Self {
            store,
            config,
            identity: Self::instance_identity(),
            is_leader: AtomicBool::new(false),
            shutdown: Notify::new(),
            on_became_leader: None,
        }
    }

    pub fn with_leadership_callback(mut self, callback: LeadershipCallback) -> Self {
        self.on_became_leader = Some(callback);
        self
    }

    /// `hostname-pid-random8` uniquely identifies this instance across
    /// restarts of the same process slot.
    fn instance_identity() -> String {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        let suffix = format!("{:08x}", rand::thread_rng().gen::<u32>());
        format!("{}-{}-{}", host, std::process::id(), suffix)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// One election attempt. Returns whether this instance is now leader.
    pub async fn try_acquire(&self) -> Result<bool> {
        let acquired = self
            .store
            .set_if_absent(LEADER_KEY, &self.identity, self.config.lease_ttl_secs)
            .await?;
        if acquired {
            let was_leader = self.is_leader.swap(true, Ordering::SeqCst);
            if !was_leader {
                tracing::info!(identity = %self.identity, "became scheduler leader");
                if let Some(callback) = &self.on_became_leader {
                    callback();
                }
            }
        }
        Ok(acquired)
    }

    /// Renew the lease. A failed renewal (value changed or KV error)
    /// demotes this instance to follower.
    pub async fn heartbeat(&self) -> bool {
        let renewed = match self
            .store
            .extend_if_equals(LEADER_KEY, &self.identity, self.config.lease_ttl_secs)
            .await
        {
            Ok(renewed) => renewed,
            Err(e) => {
                tracing::warn!(error = %e, "leader heartbeat failed");
                false
            }
        };
        if !renewed && self.is_leader.swap(false, Ordering::SeqCst) {
            tracing::warn!(identity = %self.identity, "lost scheduler leadership");
        }
        renewed
    }

    /// Graceful resignation on shutdown.
    pub async fn resign(&self) -> Result<bool> {
        self.is_leader.store(false, Ordering::SeqCst);
        let released = self
            .store
            .delete_if_equals(LEADER_KEY, &self.identity)
            .await?;
        if released {
            tracing::info!(identity = %self.identity, "resigned scheduler leadership");
        }
        Ok(released)
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Run the election loop: heartbeat while leader, periodically retry
    /// while follower, resign on shutdown.
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let interval = if self.is_leader() {
                    self.config.heartbeat_interval
                } else {
                    // Follower: attempt election now, then wait out the
                    // retry interval.
                    if let Err(e) = self.try_acquire().await {
                        tracing::warn!(error = %e, "leader election attempt failed");
                    }
                    if self.is_leader() {
                        self.config.heartbeat_interval
                    } else {
                        self.config.retry_interval
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if self.is_leader() {
                            self.heartbeat().await;
                        }
                    }
                    _ = self.shutdown.notified() => {
                        if let Err(e) = self.resign().await {
                            tracing::warn!(error = %e, "failed to resign leadership");
                        }
                        return;
                    }
                }
            }
        })
    }
}
