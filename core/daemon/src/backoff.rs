use std::cmp;
use std::time::Duration;

const BACKOFF_STEP_SECS: u64 = 1;
const BACKOFF_MAX_SECS: u64 = 10;

/// Delay schedule between attempts to reach the mpv socket.
///
/// mpv is started and quit independently of the daemon, so failures are
/// routine; the delay grows linearly and is capped so a newly started player
/// is picked up within a few seconds.
#[derive(Debug, Default)]
pub struct ReconnectBackoff {
    failures: u32,
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed attempt and returns how long to wait before the next one.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        compute_delay(self.failures)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

fn compute_delay(failures: u32) -> Duration {
    let secs = BACKOFF_STEP_SECS.saturating_mul(u64::from(failures));
    Duration::from_secs(cmp::min(secs, BACKOFF_MAX_SECS))
}
