use crate::domain::errors::ServiceError;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: usize,
    half_open_successes: usize,
    opened_at: Option<Instant>,
}

/// Per-provider circuit breaker. After `failure_threshold` consecutive
/// failures the circuit opens and calls fail fast with `upstream_failure`
/// until `cooldown` elapses; it then half-opens and closes again after
/// `success_threshold` consecutive successes.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: usize,
    success_threshold: usize,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: 5,
            success_threshold: 2,
            cooldown,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub async fn run<T, F>(&self, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == State::Open {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    info!("circuit [{}] open -> half-open", self.name);
                    inner.state = State::HalfOpen;
                    inner.half_open_successes = 0;
                } else {
                    return Err(ServiceError::UpstreamFailure {
                        last_error: format!(
                            "circuit [{}] open, retry in {:?}",
                            self.name,
                            self.cooldown.saturating_sub(elapsed)
                        ),
                    });
                }
            }
        }

        match fut.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(e)
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.success_threshold {
                    info!("circuit [{}] half-open -> closed", self.name);
                    inner.state = State::Closed;
                    inner.consecutive_failures = 0;
                }
            }
            _ => inner.consecutive_failures = 0,
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::HalfOpen => {
                warn!("circuit [{}] half-open -> open (probe failed)", self.name);
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
            }
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        "circuit [{}] closed -> open after {} failures",
                        self.name, inner.consecutive_failures
                    );
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            State::Open => {}
        }
    }

    #[cfg(test)]
    async fn is_open(&self) -> bool {
        self.inner.lock().await.state == State::Open
    }
}
