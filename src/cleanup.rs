//! Best-effort release of resources that may stay locked for a moment after
//! the external program exits. Exhausted retries are reported, never raised.

use std::{fs, io::ErrorKind, path::Path, thread, time::Duration};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub backoff: Duration,
    /// Doubles the wait after every failed attempt when set.
    pub exponential: bool,
}

impl RetryPolicy {
    pub const fn fixed(attempts: usize, backoff_ms: u64) -> Self {
        Self {
            attempts,
            backoff: Duration::from_millis(backoff_ms),
            exponential: false,
        }
    }

    pub const fn exponential(attempts: usize, base_ms: u64) -> Self {
        Self {
            attempts,
            backoff: Duration::from_millis(base_ms),
            exponential: true,
        }
    }

    pub fn backoff_for(&self, attempt: usize) -> Duration {
        if !self.exponential {
            return self.backoff;
        }
        let shift = attempt.saturating_sub(1).min(6) as u32;
        self.backoff.saturating_mul(1_u32 << shift)
    }
}

/// Clearing a stale working directory before a run.
pub const STALE_DIR_POLICY: RetryPolicy = RetryPolicy::fixed(5, 500);
/// Removing the working directory after a run.
pub const FINAL_CLEANUP_POLICY: RetryPolicy = RetryPolicy::fixed(8, 500);
/// Killing a process that outlived its timeout.
pub const KILL_POLICY: RetryPolicy = RetryPolicy::exponential(4, 50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released { attempts: usize },
    Abandoned { attempts: usize, last_error: String },
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released { .. })
    }
}

/// Error kinds worth another attempt; anything else ends the retry loop at once.
pub fn is_retryable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::PermissionDenied
            | ErrorKind::ResourceBusy
            | ErrorKind::DirectoryNotEmpty
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::Other
    )
}

/// Runs `attempt` until it succeeds, a non-retryable error occurs, or the
/// policy is exhausted. `on_failure` sees every failed attempt (1-based).
pub fn release_with_retry(
    policy: RetryPolicy,
    mut attempt: impl FnMut() -> Result<(), (ErrorKind, String)>,
    mut on_failure: impl FnMut(usize, &str),
) -> ReleaseOutcome {
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();
    for n in 1..=attempts {
        match attempt() {
            Ok(()) => return ReleaseOutcome::Released { attempts: n },
            Err((kind, message)) => {
                on_failure(n, &message);
                last_error = message;
                if !is_retryable(kind) {
                    return ReleaseOutcome::Abandoned {
                        attempts: n,
                        last_error,
                    };
                }
                if n < attempts {
                    thread::sleep(policy.backoff_for(n));
                }
            }
        }
    }
    ReleaseOutcome::Abandoned {
        attempts,
        last_error,
    }
}

/// Removes a directory tree; a directory that is already gone counts as released.
pub fn remove_dir_with_retry(
    path: &Path,
    policy: RetryPolicy,
    on_failure: impl FnMut(usize, &str),
) -> ReleaseOutcome {
    release_with_retry(
        policy,
        || match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err((
                e.kind(),
                format!("Could not remove '{}': {e}", path.display()),
            )),
        },
        on_failure,
    )
}
