//! Pause, continue and abort flags shared between the caller and the batch
//! thread.

use std::{
    sync::{
        Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

const WAIT_SLICE: Duration = Duration::from_millis(100);

/// What a stream reader does after it saw a blocking prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Continuation {
    /// Auto-continue is enabled for the whole batch.
    AutoContinue,
    /// The caller asked to continue every prompt of the current gene.
    ContinueAll,
    /// Nobody can answer the prompt, so it is answered automatically.
    NoChannelFallback,
    /// Block until the caller releases this prompt.
    WaitForSignal,
}

impl Continuation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoContinue => "auto-continue",
            Self::ContinueAll => "continue-all",
            Self::NoChannelFallback => "no-channel fallback",
            Self::WaitForSignal => "wait for signal",
        }
    }
}

/// Precedence: auto-continue, then continue-all, then the no-channel escape,
/// then waiting for an explicit signal.
pub fn decide_continuation(
    auto_continue: bool,
    continue_all: bool,
    has_channel: bool,
) -> Continuation {
    if auto_continue {
        Continuation::AutoContinue
    } else if continue_all {
        Continuation::ContinueAll
    } else if !has_channel {
        Continuation::NoChannelFallback
    } else {
        Continuation::WaitForSignal
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Continue,
    ContinueAll,
    Aborted,
    /// The run ended while the prompt was pending.
    Released,
}

#[derive(Debug, Default)]
struct SignalState {
    paused: bool,
    continue_one: bool,
    continue_all: bool,
    aborted: bool,
}

/// Signals shared between the batch thread, its stream readers and the caller.
/// `continue_all` is scoped to one gene and cleared at every gene boundary.
#[derive(Debug, Default)]
pub struct BatchSignals {
    state: Mutex<SignalState>,
    changed: Condvar,
    has_channel: bool,
}

impl BatchSignals {
    /// Signals without a continuation channel: prompts never wait for the caller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals for a caller that answers prompts through [`Self::request_continue`].
    pub fn with_continue_channel() -> Self {
        Self {
            has_channel: true,
            ..Self::default()
        }
    }

    pub fn has_continue_channel(&self) -> bool {
        self.has_channel
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut SignalState)) {
        let mut state = self.lock();
        f(&mut state);
        self.changed.notify_all();
    }

    pub fn pause(&self) {
        self.update(|s| s.paused = true);
    }

    pub fn resume(&self) {
        self.update(|s| s.paused = false);
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn request_continue(&self) {
        self.update(|s| s.continue_one = true);
    }

    pub fn set_continue_all(&self) {
        self.update(|s| s.continue_all = true);
    }

    pub fn clear_continue_all(&self) {
        self.update(|s| {
            s.continue_all = false;
            s.continue_one = false;
        });
    }

    pub fn continue_all_active(&self) -> bool {
        self.lock().continue_all
    }

    /// Stops the batch and releases every pause and prompt gate.
    pub fn abort(&self) {
        self.update(|s| {
            s.aborted = true;
            s.paused = false;
        });
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    /// Blocks while paused. Returns `false` when the batch was aborted.
    pub fn wait_while_paused(&self) -> bool {
        let mut state = self.lock();
        while state.paused && !state.aborted {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        !state.aborted
    }

    /// Blocks until this prompt may continue. A pending continue-one request
    /// is consumed; `release` lets the runner free a reader whose process ended.
    pub fn wait_for_continue(&self, release: &AtomicBool) -> WaitOutcome {
        let mut state = self.lock();
        loop {
            if state.aborted {
                return WaitOutcome::Aborted;
            }
            if state.continue_all {
                return WaitOutcome::ContinueAll;
            }
            if state.continue_one {
                state.continue_one = false;
                return WaitOutcome::Continue;
            }
            if release.load(Ordering::SeqCst) {
                return WaitOutcome::Released;
            }
            state = self
                .changed
                .wait_timeout(state, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wakes waiters so they re-check their release flag.
    pub fn notify(&self) {
        self.changed.notify_all();
    }
}
