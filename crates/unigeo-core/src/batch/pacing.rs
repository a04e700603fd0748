//! Pacing between poll attempts
//!
//! By default polls are issued back to back and the network round-trip is
//! the only pacing. A fixed or exponential delay can be configured.

use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use serde::{Deserialize, Serialize};

/// Delay policy between consecutive poll attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollPacing {
    /// Poll again as soon as the previous response arrives
    #[default]
    Immediate,
    /// Sleep a fixed interval between attempts
    Fixed { interval_ms: u64 },
    /// Exponential backoff between attempts
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        multiplier: f64,
        /// Whether to randomize delays to spread concurrent pollers
        jitter: bool,
    },
}

impl PollPacing {
    /// Create the stateful pacer for one poll loop
    pub fn pacer(&self) -> Pacer {
        match self {
            PollPacing::Immediate => Pacer::Immediate,
            PollPacing::Fixed { interval_ms } => Pacer::Fixed(Duration::from_millis(*interval_ms)),
            PollPacing::Exponential {
                initial_ms,
                max_ms,
                multiplier,
                jitter,
            } => {
                let mut backoff = ExponentialBackoff {
                    initial_interval: Duration::from_millis(*initial_ms),
                    current_interval: Duration::from_millis(*initial_ms),
                    max_interval: Duration::from_millis(*max_ms),
                    multiplier: *multiplier,
                    // Attempt budgets bound the loop, not elapsed time.
                    max_elapsed_time: None,
                    ..Default::default()
                };
                if !jitter {
                    backoff.randomization_factor = 0.0;
                }
                Pacer::Exponential(backoff)
            }
        }
    }
}

/// Per-loop pacing state
#[derive(Debug)]
pub enum Pacer {
    Immediate,
    Fixed(Duration),
    Exponential(ExponentialBackoff),
}

impl Pacer {
    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Option<Duration> {
        match self {
            Pacer::Immediate => None,
            Pacer::Fixed(interval) => Some(*interval),
            Pacer::Exponential(backoff) => backoff.next_backoff(),
        }
    }

    /// Sleep for the next delay, if any
    pub async fn pause(&mut self) {
        if let Some(delay) = self.next_delay() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_immediate() {
        let mut pacer = PollPacing::default().pacer();
        assert_eq!(pacer.next_delay(), None);
        assert_eq!(pacer.next_delay(), None);
    }

    #[test]
    fn test_fixed_interval() {
        let mut pacer = PollPacing::Fixed { interval_ms: 250 }.pacer();
        assert_eq!(pacer.next_delay(), Some(Duration::from_millis(250)));
        assert_eq!(pacer.next_delay(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_exponential_without_jitter_grows_to_cap() {
        let mut pacer = PollPacing::Exponential {
            initial_ms: 100,
            max_ms: 400,
            multiplier: 2.0,
            jitter: false,
        }
        .pacer();

        assert_eq!(pacer.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(pacer.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(pacer.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(pacer.next_delay(), Some(Duration::from_millis(400)));
    }

    #[test]
    fn test_pacing_deserializes_from_tagged_yaml() {
        let pacing: PollPacing = serde_yaml::from_str("kind: fixed\ninterval_ms: 500\n").unwrap();
        assert_eq!(pacing, PollPacing::Fixed { interval_ms: 500 });
    }
}
