//! Circuit breaker for the LLM client.
//!
//! Tracks call outcomes over a rolling window. When the failure rate
//! crosses the threshold the breaker OPENs and short-circuits calls for
//! a cooldown period, then lets a single HALF-OPEN probe through; the
//! probe's outcome decides between closing again and another cooldown.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failure rate in `[0, 1]` that trips the breaker.
    pub failure_rate: f64,
    /// Number of most-recent outcomes considered.
    pub window: usize,
    /// How long the breaker stays OPEN before probing.
    pub cooldown: Duration,
    /// Minimum outcomes in the window before the rate is meaningful.
    pub min_samples: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.5,
            window: 20,
            cooldown: Duration::from_secs(30),
            min_samples: 5,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum State {
    Closed { outcomes: VecDeque<bool> },
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// Thread-safe circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::Closed {
                outcomes: VecDeque::new(),
            }),
        }
    }

    /// Whether a call may proceed right now.
    ///
    /// An OPEN breaker whose cooldown has elapsed moves to HALF-OPEN and
    /// admits exactly one probe; concurrent callers are rejected until
    /// the probe reports back.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            State::Closed { .. } => true,
            State::Open { until } => {
                if Instant::now() >= *until {
                    *state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    false
                } else {
                    *probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a call outcome.
    pub fn record(&self, success: bool) {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            State::Closed { outcomes } => {
                outcomes.push_back(success);
                while outcomes.len() > self.config.window {
                    outcomes.pop_front();
                }
                if outcomes.len() >= self.config.min_samples {
                    let failures = outcomes.iter().filter(|ok| !**ok).count();
                    let rate = failures as f64 / outcomes.len() as f64;
                    if rate >= self.config.failure_rate {
                        tracing::warn!(
                            failures,
                            total = outcomes.len(),
                            "circuit breaker opened"
                        );
                        *state = State::Open {
                            until: Instant::now() + self.config.cooldown,
                        };
                    }
                }
            }
            State::HalfOpen { .. } => {
                if success {
                    tracing::info!("circuit breaker closed after successful probe");
                    *state = State::Closed {
                        outcomes: VecDeque::new(),
                    };
                } else {
                    tracing::warn!("circuit breaker probe failed; reopening");
                    *state = State::Open {
                        until: Instant::now() + self.config.cooldown,
                    };
                }
            }
            // A late record while OPEN (e.g. an in-flight call that
            // started before the trip) carries no new information.
            State::Open { .. } => {}
        }
    }

    /// Current state, for logs and tests.
    pub fn status(&self) -> BreakerStatus {
        match &*self.state.lock().unwrap() {
            State::Closed { .. } => BreakerStatus::Closed,
            State::Open { .. } => BreakerStatus::Open,
            State::HalfOpen { .. } => BreakerStatus::HalfOpen,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
