use std::thread;
use std::time::Duration;

use dearmind_contracts::error::error_chain_text;
use dearmind_contracts::GenerationOutcome;

/// Fixed-delay retry budget for one generator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Image generation: three attempts, one second apart.
    pub fn image_generation() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }

    /// Classification, letter and chat calls are never retried.
    pub fn single_attempt() -> Self {
        Self::fixed(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}

#[derive(Debug)]
enum AttemptState<T> {
    Attempting { attempt: u32 },
    Succeeded(T),
    ExhaustedFailed { last_error: anyhow::Error, attempts: u32 },
}

/// Runs a fallible call under a [`RetryPolicy`] and folds every attempt into one
/// [`GenerationOutcome`]. Only the last error survives.
#[derive(Debug, Clone, Copy)]
pub struct RetryingInvoker {
    policy: RetryPolicy,
    label: &'static str,
}

impl RetryingInvoker {
    pub fn new(label: &'static str, policy: RetryPolicy) -> Self {
        Self { policy, label }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// `call` receives the 1-based attempt number. `on_retry` runs before each
    /// sleep with the attempt that just failed and its error.
    pub fn invoke<T>(
        &self,
        mut call: impl FnMut(u32) -> anyhow::Result<T>,
        mut on_retry: impl FnMut(u32, &anyhow::Error),
    ) -> GenerationOutcome<T> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut state = AttemptState::Attempting { attempt: 1 };
        loop {
            state = match state {
                AttemptState::Attempting { attempt } => match call(attempt) {
                    Ok(value) => AttemptState::Succeeded(value),
                    Err(err) if attempt >= max_attempts => AttemptState::ExhaustedFailed {
                        last_error: err,
                        attempts: attempt,
                    },
                    Err(err) => {
                        tracing::warn!(
                            target: "dearmind::invoker",
                            call = self.label,
                            attempt,
                            max_attempts,
                            "attempt failed, retrying: {}",
                            error_chain_text(&err, 512)
                        );
                        on_retry(attempt, &err);
                        if !self.policy.delay.is_zero() {
                            thread::sleep(self.policy.delay);
                        }
                        AttemptState::Attempting {
                            attempt: attempt + 1,
                        }
                    }
                },
                AttemptState::Succeeded(value) => return GenerationOutcome::Success(value),
                AttemptState::ExhaustedFailed {
                    last_error,
                    attempts,
                } => {
                    return GenerationOutcome::Failure {
                        last_error,
                        attempts,
                    }
                }
            };
        }
    }
}
