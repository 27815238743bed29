//! Progress milestones reported by the worker loop.
//!
//! The backend does not report fine-grained progress over HTTP, so the
//! polling phase interpolates between [`PROGRESS_SUBMITTED`] and
//! [`PROGRESS_POLL_CEILING`] based on how many polling attempts have been
//! used.

/// Work on the job has started.
pub const PROGRESS_STARTED: u8 = 10;

/// The template has been loaded.
pub const PROGRESS_TEMPLATE_LOADED: u8 = 20;

/// Parameters have been injected.
pub const PROGRESS_INJECTED: u8 = 30;

/// The workflow has been accepted by the backend.
pub const PROGRESS_SUBMITTED: u8 = 50;

/// Interpolated polling progress never exceeds this value.
pub const PROGRESS_POLL_CEILING: u8 = 89;

/// Polling finished; outputs are being extracted.
pub const PROGRESS_EXTRACTING: u8 = 90;

/// The job completed.
pub const PROGRESS_DONE: u8 = 100;

/// Width of the interpolated polling band.
const POLL_BAND: u64 = 40;

/// Progress to report after polling attempt `attempt` of `max_attempts`.
///
/// `50 + (attempt / max_attempts) * 40` in integer arithmetic, clamped
/// to `[50, 89]`.
pub fn poll_progress(attempt: u32, max_attempts: u32) -> u8 {
    if max_attempts == 0 {
        return PROGRESS_SUBMITTED;
    }
    let band = (attempt as u64 * POLL_BAND) / max_attempts as u64;
    let value = (PROGRESS_SUBMITTED as u64 + band).min(PROGRESS_POLL_CEILING as u64);
    value as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_starts_just_above_submitted() {
        assert_eq!(poll_progress(1, 120), 50);
        assert_eq!(poll_progress(3, 120), 51);
    }

    #[test]
    fn halfway_is_seventy() {
        assert_eq!(poll_progress(60, 120), 70);
    }

    #[test]
    fn last_attempt_is_clamped_below_extracting() {
        assert_eq!(poll_progress(120, 120), PROGRESS_POLL_CEILING);
        assert_eq!(poll_progress(500, 120), PROGRESS_POLL_CEILING);
    }

    #[test]
    fn sequence_is_non_decreasing() {
        let values: Vec<u8> = (1..=120).map(|a| poll_progress(a, 120)).collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert!(values.iter().all(|v| (50..90).contains(v)));
    }

    #[test]
    fn zero_max_attempts_does_not_divide_by_zero() {
        assert_eq!(poll_progress(1, 0), PROGRESS_SUBMITTED);
    }
}
