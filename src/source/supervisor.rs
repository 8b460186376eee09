//! Bounded-retry reconnection policy for network sources
//!
//! The supervisor only counts and decides; the capture worker performs the
//! close/wait/reopen it asks for. The counter tracks consecutive failures and
//! is reset by any successful read.

use std::time::Duration;

use crate::config::NetworkSourceConfig;

/// What the worker should do after a read failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Close, wait `delay`, reopen with identical parameters
    Reconnect { attempt: u32, delay: Duration },
    /// Retry budget exhausted (or reconnects disabled)
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    enabled: bool,
    max_attempts: u32,
    cooldown: Duration,
    attempts_since_last_success: u32,
    state: ConnectionState,
}

impl ConnectionSupervisor {
    pub fn new(enabled: bool, max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            enabled,
            max_attempts,
            cooldown,
            attempts_since_last_success: 0,
            state: ConnectionState::Connected,
        }
    }

    pub fn from_config(config: &NetworkSourceConfig) -> Self {
        Self::new(
            config.reconnect_enabled,
            config.max_reconnect_attempts,
            config.cooldown(),
        )
    }

    /// A unit was read successfully
    pub fn on_read_success(&mut self) {
        self.attempts_since_last_success = 0;
        self.state = ConnectionState::Connected;
    }

    /// A read (or a reopen) failed; decide the next step
    pub fn on_failure(&mut self) -> SupervisorAction {
        if !self.enabled || self.attempts_since_last_success >= self.max_attempts {
            self.state = ConnectionState::Terminated;
            return SupervisorAction::GiveUp {
                attempts: self.attempts_since_last_success,
            };
        }

        self.attempts_since_last_success += 1;
        self.state = ConnectionState::Reconnecting;
        SupervisorAction::Reconnect {
            attempt: self.attempts_since_last_success,
            delay: self.cooldown,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts_since_last_success
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}
