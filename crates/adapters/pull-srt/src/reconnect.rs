//! Bounded reconnect policy

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Decision taken after a connection loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Tear everything down and run the full connect sequence again
    Retry {
        /// 1-based attempt number since the last successful start
        attempt: u32,
        /// Advisory delay before the attempt
        delay: Duration,
    },
    /// Ceiling exceeded; the session must move to `Error`
    GiveUp {
        /// Attempts counted when giving up
        attempts: u32,
    },
}

/// Counts reconnect attempts since the session last reached `Playing`
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempts: u32,
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            attempts: 0,
            config,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Count a connection loss and decide what to do about it
    pub fn on_connection_lost(&mut self) -> ReconnectAction {
        self.attempts = self.attempts.saturating_add(1);

        if self.attempts > self.config.max_attempts {
            ReconnectAction::GiveUp {
                attempts: self.attempts,
            }
        } else {
            ReconnectAction::Retry {
                attempt: self.attempts,
                delay: self.config.delay_for_attempt(self.attempts),
            }
        }
    }

    /// Clear the counter; only a successful transition into `Playing` does this
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
