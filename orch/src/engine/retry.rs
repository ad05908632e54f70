//! Retry controller policy
//!
//! The engine owns the attempt loop (it must persist between attempts); this
//! module holds the decisions it consults: the backoff schedule, the
//! error-like predicate, progress detection and when to stop.

use rand::Rng;
use tracing::debug;

use crate::domain::ActionResult;

/// Attempt budget and backoff schedule for one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries_per_step: u32,
    pub base_backoff_ms: u64,
    /// Add up to 25% random delay on top of the exponential schedule
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries_per_step: 2,
            base_backoff_ms: 500,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries_per_step.saturating_add(1)
    }

    /// Deterministic delay before retry `n` (0-based): `base * 2^n`
    pub fn backoff_ms(&self, n: u32) -> u64 {
        let factor = 2u64.checked_pow(n).unwrap_or(u64::MAX);
        self.base_backoff_ms.saturating_mul(factor)
    }

    /// Milliseconds to sleep before 1-based `attempt_number`; zero for the first attempt
    pub fn delay_ms_before(&self, attempt_number: u32) -> u64 {
        if attempt_number <= 1 {
            return 0;
        }
        let base = self.backoff_ms(attempt_number - 2);
        let ms = if self.jitter && base > 0 {
            let extra = rand::rng().random_range(0..=base / 4);
            base.saturating_add(extra)
        } else {
            base
        };
        debug!(attempt_number, backoff_ms = ms, "delay_ms_before: called");
        ms
    }
}

/// Whether a result should be treated as a failed attempt
pub fn is_error_like(result: &ActionResult) -> bool {
    result.status >= 400
        || result.has_truthy("error")
        || result.ok_flag() == Some(false)
        || result.exit_code().is_some_and(|code| code != 0)
}

/// Compare consecutive attempts; `None` for `prev` means first attempt
///
/// Only the immediately preceding attempt is considered, so oscillation
/// between two distinct failures keeps counting as progress.
pub fn made_progress(prev: Option<&ActionResult>, curr: &ActionResult) -> bool {
    let Some(prev) = prev else {
        return true;
    };

    if curr.status < prev.status {
        return true;
    }

    if let (Some(p), Some(c)) = (prev.exit_code(), curr.exit_code())
        && ((p != 0 && c == 0) || (c >= 0 && c < p))
    {
        return true;
    }

    if prev.has_truthy("error") && !curr.has_truthy("error") {
        return true;
    }

    if prev.ok_flag() == Some(false) && curr.ok_flag() == Some(true) {
        return true;
    }

    let prev_text = failure_text(prev);
    !prev_text.is_empty() && prev_text != failure_text(curr)
}

fn failure_text(result: &ActionResult) -> String {
    let stderr = result.text("stderr");
    if stderr.is_empty() { result.text("error") } else { stderr }
}

/// What the engine should do after recording an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Result is not error-like
    Succeeded,
    /// Attempt budget used up
    Exhausted,
    /// Still failing and nothing changed since the previous attempt
    Stalled,
    /// Sleep and try again
    Retry,
}

impl RetryDecision {
    pub fn is_final(&self) -> bool {
        !matches!(self, RetryDecision::Retry)
    }
}

pub fn decide(policy: &RetryPolicy, attempt_number: u32, prev: Option<&ActionResult>, curr: &ActionResult) -> RetryDecision {
    let decision = if !is_error_like(curr) {
        RetryDecision::Succeeded
    } else if attempt_number > 1 && !made_progress(prev, curr) {
        RetryDecision::Stalled
    } else if attempt_number >= policy.max_attempts() {
        RetryDecision::Exhausted
    } else {
        RetryDecision::Retry
    };
    debug!(attempt_number, ?decision, "decide: called");
    decision
}
