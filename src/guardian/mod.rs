//! Loop guardian: resource ceilings, retry temperature, and repeat detection.
//!
//! The guardian is owned by a single orchestrator and lent mutably to the
//! task runner for the length of one build, so its counters only ever move
//! forward until [`LoopGuardian::reset`] is called.
//!
//! # Example
//!
//! ```
//! use conductor::guardian::{GuardianConfig, LoopGuardian};
//!
//! let guardian = LoopGuardian::new(GuardianConfig::default());
//! assert!((guardian.escalated_temperature(0) - 0.7).abs() < 1e-9);
//! assert!((guardian.escalated_temperature(9) - 1.3).abs() < 1e-9);
//! assert!(!guardian.should_terminate());
//! ```

pub mod normalize;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Number of recent digests a new output is compared against.
pub const LOOP_WINDOW: usize = 3;

/// Iterations that must pass before loop detection engages.
pub const MIN_ITERATIONS_FOR_LOOP_CHECK: u32 = 3;

/// Digests kept for auditing beyond the comparison window.
pub const HASH_HISTORY_LIMIT: usize = 20;

/// Temperature added at each retry tier; retries past the last tier reuse it.
pub const ESCALATION_STEPS: [f64; 3] = [0.0, 0.3, 0.6];

/// Default completion marker.
pub const DEFAULT_COMPLETION_PROMISE: &str = "LOOP_COMPLETE";

/// Guardian limits and tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    /// Main-loop iterations before the run is failed.
    pub max_iterations: u32,
    /// Wall time budget in minutes.
    pub max_time_minutes: f64,
    /// Temperature for the first attempt.
    pub base_temperature: f64,
    /// Marker a generator emits to signal it has nothing left to do.
    pub completion_promise: String,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_time_minutes: 60.0,
            base_temperature: 0.7,
            completion_promise: DEFAULT_COMPLETION_PROMISE.to_string(),
        }
    }
}

impl GuardianConfig {
    /// Create a configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the iteration ceiling.
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the wall time budget.
    #[must_use]
    pub fn with_max_time_minutes(mut self, minutes: f64) -> Self {
        self.max_time_minutes = minutes;
        self
    }

    /// Set the first-attempt temperature.
    #[must_use]
    pub fn with_base_temperature(mut self, temperature: f64) -> Self {
        self.base_temperature = temperature;
        self
    }

    /// Set the completion marker.
    #[must_use]
    pub fn with_completion_promise(mut self, promise: impl Into<String>) -> Self {
        self.completion_promise = promise.into();
        self
    }
}

/// Which ceiling ended the run.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationReason {
    /// `iteration_count` reached `max_iterations`.
    IterationCeiling { count: u32, max: u32 },
    /// Elapsed monotonic time reached `max_time_minutes`.
    TimeCeiling { elapsed_secs: f64, max_minutes: f64 },
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IterationCeiling { count, max } => {
                write!(f, "iteration ceiling reached ({count}/{max})")
            }
            Self::TimeCeiling {
                elapsed_secs,
                max_minutes,
            } => write!(
                f,
                "time ceiling reached ({:.1} min elapsed, limit {max_minutes} min)",
                elapsed_secs / 60.0
            ),
        }
    }
}

/// Serializable view of guardian counters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GuardianSnapshot {
    pub iteration_count: u32,
    pub retry_count: u32,
    /// Seconds elapsed on the monotonic clock when the snapshot was taken.
    pub elapsed_secs: f64,
    pub hash_history: Vec<String>,
}

/// Counter and guardrail component for the orchestration loop.
#[derive(Debug, Clone)]
pub struct LoopGuardian {
    config: GuardianConfig,
    start_time: Instant,
    iteration_count: u32,
    retry_count: u32,
    hash_history: VecDeque<String>,
}

impl LoopGuardian {
    /// Create a guardian whose clock starts now.
    #[must_use]
    pub fn new(config: GuardianConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            iteration_count: 0,
            retry_count: 0,
            hash_history: VecDeque::with_capacity(HASH_HISTORY_LIMIT),
        }
    }

    /// The configuration this guardian enforces.
    #[must_use]
    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    #[must_use]
    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Monotonic time since construction, reset, or restore.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Recorded digests, oldest first.
    pub fn hash_history(&self) -> impl Iterator<Item = &str> {
        self.hash_history.iter().map(String::as_str)
    }

    /// Whether any ceiling has been reached.
    #[must_use]
    pub fn should_terminate(&self) -> bool {
        self.termination_reason().is_some()
    }

    /// The ceiling that has been reached, if any.
    ///
    /// The iteration ceiling is checked first. A zero iteration ceiling or a
    /// non-positive time budget trips immediately.
    #[must_use]
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        if self.iteration_count >= self.config.max_iterations {
            return Some(TerminationReason::IterationCeiling {
                count: self.iteration_count,
                max: self.config.max_iterations,
            });
        }

        let elapsed_secs = self.elapsed().as_secs_f64();
        if elapsed_secs >= self.config.max_time_minutes * 60.0 {
            return Some(TerminationReason::TimeCeiling {
                elapsed_secs,
                max_minutes: self.config.max_time_minutes,
            });
        }

        None
    }

    /// Temperature for the given retry index: `base + [0.0, 0.3, 0.6][min(r, 2)]`.
    #[must_use]
    pub fn escalated_temperature(&self, retry_count: u32) -> f64 {
        let tier = (retry_count as usize).min(ESCALATION_STEPS.len() - 1);
        let temperature = self.config.base_temperature + ESCALATION_STEPS[tier];
        debug!(retry_count, tier, temperature, "escalated temperature");
        temperature
    }

    /// Whether `output` contains the configured completion marker.
    #[must_use]
    pub fn check_completion_promise(&self, output: &str) -> bool {
        output.contains(&self.config.completion_promise)
    }

    /// Record `output` and report whether it repeats a recent attempt.
    ///
    /// Returns `false` without recording anything until three iterations have
    /// run. After that, digests are recorded until the comparison window is
    /// full; from then on a digest matching any of the last three is reported
    /// as a loop and is not appended, so repeated identical calls are always
    /// judged against the history as it stood before the call.
    pub fn detect_loop(&mut self, output: &str) -> bool {
        if self.iteration_count < MIN_ITERATIONS_FOR_LOOP_CHECK {
            return false;
        }

        let digest = normalize::digest(output);
        let window_start = self.hash_history.len().saturating_sub(LOOP_WINDOW);
        let window_full = self.hash_history.len() >= LOOP_WINDOW;

        if window_full
            && self
                .hash_history
                .iter()
                .skip(window_start)
                .any(|seen| *seen == digest)
        {
            warn!(digest = %&digest[..12], "repeated output detected");
            return true;
        }

        self.hash_history.push_back(digest);
        while self.hash_history.len() > HASH_HISTORY_LIMIT {
            self.hash_history.pop_front();
        }
        false
    }

    pub fn increment_iteration(&mut self) {
        self.iteration_count = self.iteration_count.saturating_add(1);
    }

    pub fn increment_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Zero all counters, clear history, and restart the clock.
    pub fn reset(&mut self) {
        self.start_time = Instant::now();
        self.iteration_count = 0;
        self.retry_count = 0;
        self.hash_history.clear();
    }

    /// Capture counters for persistence.
    #[must_use]
    pub fn snapshot(&self) -> GuardianSnapshot {
        GuardianSnapshot {
            iteration_count: self.iteration_count,
            retry_count: self.retry_count,
            elapsed_secs: self.elapsed().as_secs_f64(),
            hash_history: self.hash_history.iter().cloned().collect(),
        }
    }

    /// Restore counters from a snapshot, rebasing the clock so the recorded
    /// elapsed time carries over.
    pub fn restore(&mut self, snapshot: &GuardianSnapshot) {
        let elapsed = if snapshot.elapsed_secs.is_finite() && snapshot.elapsed_secs > 0.0 {
            Duration::from_secs_f64(snapshot.elapsed_secs)
        } else {
            Duration::ZERO
        };
        let now = Instant::now();
        self.start_time = now.checked_sub(elapsed).unwrap_or(now);
        self.iteration_count = snapshot.iteration_count;
        self.retry_count = snapshot.retry_count;
        self.hash_history = snapshot
            .hash_history
            .iter()
            .rev()
            .take(HASH_HISTORY_LIMIT)
            .rev()
            .cloned()
            .collect();
    }
}
