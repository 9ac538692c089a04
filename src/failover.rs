use std::collections::VecDeque;
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::config::{FailoverConfig, HostSpec};

/// Mutable failover state: host rotation order, the current backoff delay
/// and the count of consecutive failed connect attempts.
///
/// When `randomize` is set, the host list is shuffled once here, at
/// construction; rotation afterwards is deterministic round-robin so every
/// host gets a fair turn.
pub(crate) struct FailoverState {
    hosts: VecDeque<HostSpec>,
    pub(crate) delay: Duration,
    pub(crate) attempts: u32,
}

impl FailoverState {
    pub(crate) fn new(config: &FailoverConfig) -> Self {
        let mut hosts = config.hosts.clone();
        if config.randomize {
            hosts.shuffle(&mut rand::thread_rng());
        }
        Self {
            hosts: hosts.into(),
            delay: config.initial_reconnect_delay,
            attempts: 0,
        }
    }

    /// The broker the next connect attempt should target.
    pub(crate) fn current(&self) -> Option<&HostSpec> {
        self.hosts.front()
    }

    /// Round-robin rotation: the failed front host moves to the back and
    /// the next candidate becomes current.
    pub(crate) fn rotate(&mut self) {
        if let Some(front) = self.hosts.pop_front() {
            self.hosts.push_back(front);
        }
    }

    /// Grow the reconnect delay per the backoff policy, clamped to the
    /// configured maximum. A no-op when exponential backoff is disabled.
    pub(crate) fn grow_delay(&mut self, config: &FailoverConfig) {
        if config.use_exponential_back_off {
            self.delay = self
                .delay
                .mul_f64(config.back_off_multiplier)
                .min(config.max_reconnect_delay);
        }
    }

    /// True once the attempt budget is spent; a budget of 0 never exhausts.
    pub(crate) fn exhausted(&self, config: &FailoverConfig) -> bool {
        config.max_reconnect_attempts != 0 && self.attempts > config.max_reconnect_attempts
    }
}
