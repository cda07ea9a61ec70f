//! Circuit breaker to stop hammering a failing backend.
//!
//! When calls to a provider fail repeatedly, the circuit opens and
//! subsequent calls fail immediately without contacting the backend.
//! After the cooldown exactly one trial call is let through; everyone else
//! keeps failing fast until that trial reports back.
//!
//! Timestamps come from `tokio::time::Instant` so a paused test clock
//! drives the cooldown.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::duration_str;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial call is allowed
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Internal state of one circuit.
#[derive(Debug, Clone)]
enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// Failing fast until the cooldown elapses
    Open {
        opened_at: Instant,
        opened_at_utc: DateTime<Utc>,
        failures: u32,
    },

    /// Cooldown elapsed, one trial call in flight since `trial_started`
    HalfOpen { failures: u32, trial_started: Instant },
}

/// Public state label of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

impl From<&CircuitState> for CircuitSnapshot {
    fn from(state: &CircuitState) -> Self {
        match state {
            CircuitState::Closed { failures } => Self {
                state: CircuitStatus::Closed,
                consecutive_failures: *failures,
                opened_at: None,
            },
            CircuitState::Open {
                opened_at_utc,
                failures,
                ..
            } => Self {
                state: CircuitStatus::Open,
                consecutive_failures: *failures,
                opened_at: Some(*opened_at_utc),
            },
            CircuitState::HalfOpen { failures, .. } => Self {
                state: CircuitStatus::HalfOpen,
                consecutive_failures: *failures,
                opened_at: None,
            },
        }
    }
}

/// Circuit breaker guarding backend calls.
///
/// Each provider has its own circuit so one unhealthy backend does not
/// block the others.
pub struct CircuitBreaker {
    states: RwLock<BTreeMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(BTreeMap::new()),
            config,
        }
    }

    /// The configuration this breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check if the circuit is open for a provider.
    ///
    /// Returns false while closed. Once an open circuit's cooldown has
    /// passed, the first caller moves it to half-open and gets false: that
    /// caller holds the trial permit. Every other caller gets true until the
    /// trial is recorded as a success or failure. A trial that has not
    /// reported back within another cooldown is treated as abandoned and
    /// the permit goes to the next caller.
    pub fn is_open(&self, provider: &str) -> bool {
        if matches!(
            self.states.read().get(provider),
            None | Some(CircuitState::Closed { .. })
        ) {
            return false;
        }

        let mut states = self.states.write();
        let Some(state) = states.get_mut(provider) else {
            return false;
        };

        match state.clone() {
            CircuitState::Closed { .. } => false,
            CircuitState::Open {
                opened_at,
                failures,
                ..
            } => {
                if opened_at.elapsed() < self.config.cooldown {
                    return true;
                }
                *state = CircuitState::HalfOpen {
                    failures,
                    trial_started: Instant::now(),
                };
                tracing::info!(provider, "Circuit half-open, allowing a trial call");
                false
            }
            CircuitState::HalfOpen {
                failures,
                trial_started,
            } => {
                if trial_started.elapsed() < self.config.cooldown {
                    return true;
                }
                *state = CircuitState::HalfOpen {
                    failures,
                    trial_started: Instant::now(),
                };
                tracing::warn!(provider, "Trial call never reported back, allowing another");
                false
            }
        }
    }

    /// Record a successful backend call.
    pub fn record_success(&self, provider: &str) {
        let mut states = self.states.write();
        match states.get(provider).cloned() {
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(provider.to_string(), CircuitState::Closed { failures: 0 });
                tracing::info!(provider, "Circuit closed after successful trial call");
            }
            Some(CircuitState::Open {
                opened_at,
                opened_at_utc,
                ..
            }) => {
                // A call that started before the circuit opened; stay open until the cooldown.
                states.insert(
                    provider.to_string(),
                    CircuitState::Open {
                        opened_at,
                        opened_at_utc,
                        failures: 0,
                    },
                );
            }
            Some(CircuitState::Closed { failures }) if failures > 0 => {
                states.insert(provider.to_string(), CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    /// Record a failed backend call.
    pub fn record_failure(&self, provider: &str) {
        let mut states = self.states.write();
        let current = states
            .get(provider)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 });

        let next = match current {
            CircuitState::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    tracing::warn!(provider, failures, "Circuit opened after repeated failures");
                    open(failures)
                } else {
                    CircuitState::Closed { failures }
                }
            }
            CircuitState::HalfOpen { failures, .. } => {
                tracing::warn!(provider, "Circuit reopened after failed trial call");
                open(failures + 1)
            }
            CircuitState::Open {
                opened_at,
                opened_at_utc,
                failures,
            } => CircuitState::Open {
                opened_at,
                opened_at_utc,
                failures: failures + 1,
            },
        };

        states.insert(provider.to_string(), next);
    }

    /// Current state of a provider's circuit.
    pub fn state(&self, provider: &str) -> CircuitSnapshot {
        self.states
            .read()
            .get(provider)
            .map(CircuitSnapshot::from)
            .unwrap_or(CircuitSnapshot {
                state: CircuitStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
            })
    }

    /// States of every circuit that has seen traffic.
    pub fn states(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.states
            .read()
            .iter()
            .map(|(provider, state)| (provider.clone(), CircuitSnapshot::from(state)))
            .collect()
    }

    /// Force every circuit closed with zero failures.
    pub fn reset(&self) {
        self.states.write().clear();
        tracing::info!("Circuit breaker reset");
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

fn open(failures: u32) -> CircuitState {
    CircuitState::Open {
        opened_at: Instant::now(),
        opened_at_utc: Utc::now(),
        failures,
    }
}
