// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-runtime re-armable round timeout.
//!
//! The "infinite" disarmed state is a nullable deadline: while disarmed no expiry ever fires,
//! arming replaces any prior deadline, and callers are expected to re-arm only after they've
//! appended and broadcast a block (§4.2, §9).

use std::time::Duration;

use tokio::time::Instant;

pub struct RoundTimer {
    deadline: Option<Instant>,
}

impl RoundTimer {
    /// Starts disarmed: no expiry fires until the first `arm`.
    pub fn disarmed() -> Self {
        Self { deadline: None }
    }

    pub fn arm(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves at the current deadline, or never if disarmed. Intended for use as one arm of a
    /// `tokio::select!` alongside the committee stream and the command channel.
    pub async fn expired(&mut self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn disarmed_timer_never_expires() {
        let mut timer = RoundTimer::disarmed();
        assert!(!timer.is_armed());
        tokio::select! {
            _ = timer.expired() => panic!("disarmed timer must never fire"),
            _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
        }
    }

    #[tokio::test(start_paused = true)]
    async fn armed_timer_fires_after_duration() {
        let mut timer = RoundTimer::disarmed();
        timer.arm(Duration::from_millis(100));
        assert!(timer.is_armed());
        tokio::select! {
            _ = timer.expired() => {}
            _ = tokio::time::sleep(Duration::from_secs(5)) => panic!("timer should have fired first"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_prior_deadline() {
        let mut timer = RoundTimer::disarmed();
        timer.arm(Duration::from_secs(10));
        timer.arm(Duration::from_millis(50));
        tokio::select! {
            _ = timer.expired() => {}
            _ = tokio::time::sleep(Duration::from_secs(1)) => panic!("should use the latest deadline"),
        }
    }
}
