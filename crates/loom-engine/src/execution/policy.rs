use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use loom_core::ExecutionError;
use loom_settings::{ExecutionSettings, StrategyKind};

pub type RetryPredicate = Arc<dyn Fn(&ExecutionError, u32) -> bool + Send + Sync>;
pub type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;
pub type CleanContextPredicate = Arc<dyn Fn(&ExecutionError) -> bool + Send + Sync>;

/// Exponential backoff with jitter and a cap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter_factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(10),
            jitter_factor: 0.2,
        }
    }
}

impl Backoff {
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `max`, then `± jitter_factor`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let exp_ms = self.base.as_millis() as f64 * 2.0_f64.powi(exponent);
        let capped = exp_ms.min(self.max.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// How one unit of model-issued work is run: attempt bound, retry
/// predicate, delay function, context-reset predicate and per-attempt
/// timeout. Interpreted by [`execute`](super::execute).
#[derive(Clone)]
pub struct ExecutionPolicy {
    pub name: String,
    pub max_attempts: u32,
    pub enable_retry: bool,
    pub timeout: Option<Duration>,
    pub should_retry: RetryPredicate,
    pub retry_delay: DelayFn,
    pub should_clean_context: CleanContextPredicate,
}

impl fmt::Debug for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPolicy")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("enable_retry", &self.enable_retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::direct()
    }
}

impl ExecutionPolicy {
    /// One attempt, no retries.
    pub fn direct() -> Self {
        Self {
            name: "direct".into(),
            max_attempts: 1,
            enable_retry: false,
            timeout: None,
            should_retry: Arc::new(|_: &ExecutionError, _: u32| true),
            retry_delay: Arc::new(|_: u32| Duration::ZERO),
            should_clean_context: Arc::new(|_: &ExecutionError| false),
        }
    }

    /// Retry every failure up to `max_attempts` total attempts.
    pub fn retrying(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            name: "retry".into(),
            max_attempts,
            enable_retry: true,
            retry_delay: Arc::new(move |attempt: u32| backoff.delay(attempt)),
            ..Self::direct()
        }
    }

    /// Retry only reference errors and timeouts, resetting the runner's
    /// working context before each retry.
    pub fn reference_aware(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            name: "reference_aware".into(),
            should_retry: Arc::new(|e: &ExecutionError, _: u32| e.is_reference_error() || e.is_timeout()),
            should_clean_context: Arc::new(|e: &ExecutionError| e.is_reference_error() || e.is_timeout()),
            ..Self::retrying(max_attempts, backoff)
        }
    }

    /// Build the configured policy. `retry` and `referenceAware` imply
    /// retries are enabled; `direct` honours `enableRetry`.
    pub fn from_settings(settings: &ExecutionSettings) -> Self {
        let backoff = Backoff {
            base: Duration::from_millis(settings.base_delay_ms),
            max: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: settings.jitter_factor,
        };
        let attempts = settings.max_attempts.max(1);
        let mut policy = match settings.strategy {
            StrategyKind::Direct => Self {
                max_attempts: attempts,
                enable_retry: settings.enable_retry,
                retry_delay: Arc::new(move |attempt: u32| backoff.delay(attempt)),
                ..Self::direct()
            },
            StrategyKind::Retry => Self::retrying(attempts, backoff),
            StrategyKind::ReferenceAware => Self::reference_aware(attempts, backoff),
        };
        if settings.clean_context_on_retry && settings.strategy != StrategyKind::ReferenceAware {
            policy.should_clean_context = Arc::new(|_: &ExecutionError| true);
        }
        policy.timeout = settings.timeout_ms.map(Duration::from_millis);
        policy
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_predicate(
        mut self,
        predicate: impl Fn(&ExecutionError, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_delay(mut self, delay: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.retry_delay = Arc::new(delay);
        self
    }

    pub fn with_clean_context(
        mut self,
        predicate: impl Fn(&ExecutionError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_clean_context = Arc::new(predicate);
        self
    }

    /// Attempts actually allowed: `max_attempts` when retries are enabled,
    /// otherwise one.
    pub fn effective_attempts(&self) -> u32 {
        if self.enable_retry {
            self.max_attempts.max(1)
        } else {
            1
        }
    }
}
