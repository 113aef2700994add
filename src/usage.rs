use std::time::Duration;

use crate::types::UsageSummary;

/// Merges usage reports into a single [`UsageSummary`].
///
/// Vendors report running totals, so every field is last-write-wins: a later
/// report overwrites the fields it carries and leaves the others untouched.
/// Nothing is ever summed or estimated.
///
/// # Examples
///
/// ```
/// use unillm::types::UsageSummary;
/// use unillm::usage::UsageAccumulator;
///
/// let mut acc = UsageAccumulator::new();
/// acc.apply(&UsageSummary { prompt_tokens: Some(10), ..Default::default() });
/// acc.apply(&UsageSummary { completion_tokens: Some(4), total_tokens: Some(14), ..Default::default() });
/// let usage = acc.snapshot();
/// assert_eq!(usage.prompt_tokens, Some(10));
/// assert_eq!(usage.total_tokens, Some(14));
/// ```
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    summary: UsageSummary,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites every field set in `update`.
    pub fn apply(&mut self, update: &UsageSummary) {
        overwrite(&mut self.summary.prompt_tokens, update.prompt_tokens);
        overwrite(&mut self.summary.completion_tokens, update.completion_tokens);
        overwrite(&mut self.summary.total_tokens, update.total_tokens);
        overwrite(&mut self.summary.reasoning_tokens, update.reasoning_tokens);
        overwrite(&mut self.summary.cached_tokens, update.cached_tokens);
        overwrite(&mut self.summary.cost, update.cost);
        overwrite(&mut self.summary.latency, update.latency);
    }

    /// Current view of the merged usage.
    pub fn snapshot(&self) -> UsageSummary {
        self.summary.clone()
    }

    /// Consumes the accumulator, stamping the wall-clock latency of the call.
    pub fn finish(mut self, latency: Option<Duration>) -> UsageSummary {
        overwrite(&mut self.summary.latency, latency);
        self.summary
    }
}

fn overwrite<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(prompt: u64, completion: u64) -> UsageSummary {
        UsageSummary {
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
            total_tokens: Some(prompt + completion),
            ..Default::default()
        }
    }

    #[test]
    fn repeated_identical_updates_are_idempotent() {
        let mut once = UsageAccumulator::new();
        once.apply(&partial(12, 3));

        let mut twice = UsageAccumulator::new();
        twice.apply(&partial(12, 3));
        twice.apply(&partial(12, 3));

        assert_eq!(once.finish(None), twice.finish(None));
    }

    #[test]
    fn later_running_totals_replace_earlier_ones() {
        let mut acc = UsageAccumulator::new();
        acc.apply(&partial(12, 3));
        acc.apply(&partial(12, 9));
        let usage = acc.finish(None);
        assert_eq!(usage.completion_tokens, Some(9));
        assert_eq!(usage.total_tokens, Some(21));
    }

    #[test]
    fn unset_fields_do_not_clear_previous_values() {
        let mut acc = UsageAccumulator::new();
        acc.apply(&UsageSummary {
            prompt_tokens: Some(40),
            cached_tokens: Some(32),
            ..Default::default()
        });
        acc.apply(&UsageSummary {
            completion_tokens: Some(2),
            ..Default::default()
        });
        let usage = acc.snapshot();
        assert_eq!(usage.prompt_tokens, Some(40));
        assert_eq!(usage.cached_tokens, Some(32));
        assert_eq!(usage.completion_tokens, Some(2));
    }

    #[test]
    fn no_reports_leave_summary_empty() {
        let usage = UsageAccumulator::new().finish(None);
        assert!(usage.is_empty());
    }

    #[test]
    fn finish_stamps_latency() {
        let mut acc = UsageAccumulator::new();
        acc.apply(&partial(1, 1));
        let usage = acc.finish(Some(Duration::from_millis(250)));
        assert_eq!(usage.latency, Some(Duration::from_millis(250)));
    }
}
