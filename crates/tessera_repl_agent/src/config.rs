//! Configuration for the replication agent.

use crate::cron::CronSchedule;
use crate::error::{ReplicationError, ReplicationResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// How the agent decides when to run a replication cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlaveMode {
    /// Polls continuously over a persistent connection.
    Realtime {
        /// Pause between cycles.
        check_timeout: Duration,
        /// Maximum age of the persistent connection before it is reopened.
        connection_ttl: Duration,
    },
    /// Runs when a cron schedule matches.
    Cron {
        /// Five-field cron expression.
        schedule: String,
        /// Sleep between schedule checks.
        tick: Duration,
    },
}

impl SlaveMode {
    /// Realtime mode polling every `check_timeout`, with a ten minute
    /// connection TTL.
    pub fn realtime(check_timeout: Duration) -> Self {
        Self::Realtime {
            check_timeout,
            connection_ttl: Duration::from_secs(600),
        }
    }

    /// Cron mode checking `schedule` once a minute.
    pub fn cron(schedule: impl Into<String>) -> Self {
        Self::Cron {
            schedule: schedule.into(),
            tick: Duration::from_secs(60),
        }
    }
}

impl Default for SlaveMode {
    fn default() -> Self {
        Self::realtime(Duration::from_secs(1))
    }
}

/// Configuration for a slave replicating from one master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveConfig {
    /// Master host name or address.
    pub master_host: String,
    /// Master replication port.
    pub master_port: u16,
    /// Identity presented to the master.
    pub slave_id: Uuid,
    /// Shared secret for replication tokens, if the master requires them.
    pub auth_secret: Option<Vec<u8>>,
    /// Maximum pages applied by one local transaction.
    pub max_pages_per_transaction: u32,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Scheduling mode.
    pub mode: SlaveMode,
}

impl SlaveConfig {
    /// Creates a configuration for the master at `host:port`.
    pub fn new(master_host: impl Into<String>, master_port: u16) -> Self {
        Self {
            master_host: master_host.into(),
            master_port,
            slave_id: Uuid::new_v4(),
            auth_secret: None,
            max_pages_per_transaction: 1024,
            connect_timeout: Duration::from_secs(10),
            mode: SlaveMode::default(),
        }
    }

    /// Sets the scheduling mode.
    pub fn with_mode(mut self, mode: SlaveMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the slave identity.
    pub fn with_slave_id(mut self, slave_id: Uuid) -> Self {
        self.slave_id = slave_id;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the maximum pages per local transaction.
    pub fn with_max_pages_per_transaction(mut self, pages: u32) -> Self {
        self.max_pages_per_transaction = pages;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the master address as `host:port`.
    pub fn master_addr(&self) -> String {
        format!("{}:{}", self.master_host, self.master_port)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::InvalidConfig`] describing the first bad
    /// value.
    pub fn validate(&self) -> ReplicationResult<()> {
        if self.master_host.is_empty() {
            return Err(ReplicationError::InvalidConfig("master host is empty".into()));
        }
        if self.max_pages_per_transaction == 0 {
            return Err(ReplicationError::InvalidConfig(
                "max_pages_per_transaction must be at least 1".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ReplicationError::InvalidConfig(
                "connect_timeout must be positive".into(),
            ));
        }
        if self.auth_secret.as_ref().is_some_and(Vec::is_empty) {
            return Err(ReplicationError::InvalidConfig(
                "auth secret is empty".into(),
            ));
        }
        match &self.mode {
            SlaveMode::Realtime {
                check_timeout,
                connection_ttl,
            } => {
                if check_timeout.is_zero() || connection_ttl.is_zero() {
                    return Err(ReplicationError::InvalidConfig(
                        "realtime check_timeout and connection_ttl must be positive".into(),
                    ));
                }
            }
            SlaveMode::Cron { schedule, tick } => {
                CronSchedule::parse(schedule)?;
                if tick.is_zero() {
                    return Err(ReplicationError::InvalidConfig(
                        "cron tick must be positive".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let slave_id = Uuid::new_v4();
        let config = SlaveConfig::new("master.local", 7470)
            .with_slave_id(slave_id)
            .with_auth(b"secret".to_vec())
            .with_max_pages_per_transaction(32)
            .with_mode(SlaveMode::cron("*/5 * * * *"));

        assert_eq!(config.master_addr(), "master.local:7470");
        assert_eq!(config.slave_id, slave_id);
        assert_eq!(config.max_pages_per_transaction, 32);
        assert!(matches!(config.mode, SlaveMode::Cron { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation() {
        let base = SlaveConfig::new("localhost", 7470);
        assert!(base.validate().is_ok());
        assert!(SlaveConfig::new("", 7470).validate().is_err());
        assert!(base
            .clone()
            .with_max_pages_per_transaction(0)
            .validate()
            .is_err());
        assert!(base
            .clone()
            .with_mode(SlaveMode::cron("not a schedule"))
            .validate()
            .is_err());
        assert!(base
            .with_mode(SlaveMode::realtime(Duration::ZERO))
            .validate()
            .is_err());
    }
}
