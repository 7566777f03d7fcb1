//! Async fragment runner.
//!
//! Declares the placeholder, arms the optional deadline, then invokes the
//! producer callback with a nested context and a `Completion` handle.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use render_core::{FragmentId, RenderError};
use tokio::runtime::Handle;

use crate::context::{RenderContext, Shared};
use crate::options::FragmentOptions;
use crate::scheduler::DeadlineTimer;

/// Producer callback for an async fragment.
///
/// Returning `Err` (or panicking) before completing fails the fragment.
pub type FragmentCallback =
    Box<dyn FnOnce(RenderContext, Completion) -> anyhow::Result<()> + Send + 'static>;

const WAITING: u8 = 0;
const RUNNING: u8 = 1;
const DROPPED_WHILE_RUNNING: u8 = 2;
const RETURNED: u8 = 3;

/// Tracks whether the callback is still on the stack.
///
/// An unused `Completion` dropped while the callback runs is reported by the
/// runner once the callback returns; otherwise the handle reports itself.
/// Both sides move through one state word so exactly one of them does.
#[derive(Debug, Default)]
struct Invocation(AtomicU8);

impl Invocation {
    fn enter(&self) {
        self.0.store(RUNNING, Ordering::SeqCst);
    }

    /// Returns `true` if the runner takes over reporting the drop.
    fn defer_drop(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, DROPPED_WHILE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Returns `true` if the handle was dropped unused during the call.
    fn leave(&self) -> bool {
        self.0.swap(RETURNED, Ordering::SeqCst) == DROPPED_WHILE_RUNNING
    }
}

/// One-shot handle that settles an async fragment.
///
/// Consuming methods make double completion impossible for one handle; the
/// scheduler additionally ignores completions arriving after a timeout.
/// Dropping the handle without completing fails the fragment as abandoned.
pub struct Completion {
    shared: Arc<Shared>,
    fragment: FragmentId,
    invocation: Arc<Invocation>,
    used: bool,
}

impl Completion {
    /// Fragment this handle settles.
    pub fn fragment(&self) -> FragmentId {
        self.fragment
    }

    /// Resolve with whatever was written through the nested context.
    pub fn done(self) {
        self.finish(Ok(None));
    }

    /// Resolve with explicit content, replacing anything written through the
    /// nested context.
    pub fn done_with(self, content: impl Into<String>) {
        self.finish(Ok(Some(content.into())));
    }

    /// Fail the fragment.
    pub fn fail(self, err: impl Into<anyhow::Error>) {
        let error = RenderError::failed(self.fragment, err);
        self.finish(Err(error));
    }

    /// Settle from a producer result: `Ok(Some(_))` is explicit content,
    /// `Ok(None)` keeps the nested writes.
    pub fn complete(self, result: anyhow::Result<Option<String>>) {
        match result {
            Ok(content) => self.finish(Ok(content)),
            Err(err) => self.fail(err),
        }
    }

    fn finish(mut self, result: Result<Option<String>, RenderError>) {
        self.used = true;
        self.shared.settle(self.fragment, result);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.used || self.invocation.defer_drop() {
            return;
        }

        let fragment = self.fragment;
        let error = if std::thread::panicking() {
            RenderError::FragmentException {
                fragment,
                message: "task panicked before completing".to_string(),
            }
        } else {
            RenderError::FragmentAbandoned { fragment }
        };
        self.shared.settle(fragment, Err(error));
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("fragment", &self.fragment)
            .field("used", &self.used)
            .finish()
    }
}

/// Declare a fragment under `parent` and run its callback.
///
/// With a tokio runtime available the callback is spawned onto it rather
/// than run inline; without one it runs before this returns.
pub(crate) fn run_fragment(
    parent: &RenderContext,
    options: FragmentOptions,
    callback: FragmentCallback,
) {
    let shared = Arc::clone(&parent.shared);
    let fallback = options
        .fallback
        .clone()
        .unwrap_or_else(|| shared.config.fallback.clone());

    let declared =
        shared.update(|s| s.declare(parent.sequence, options.name.as_deref(), fallback));
    let Some((fragment, children)) = declared else {
        return;
    };

    let nested = RenderContext::nested(Arc::clone(&shared), children);
    let invocation = Arc::new(Invocation::default());
    let completion = Completion {
        shared: Arc::clone(&shared),
        fragment,
        invocation: Arc::clone(&invocation),
        used: false,
    };

    let runtime = Handle::try_current().ok();
    if let Some(after) = options.timeout.or_else(|| shared.config.default_timeout()) {
        arm_timeout(runtime.as_ref(), &shared, fragment, after);
    }

    match runtime {
        Some(handle) => {
            handle.spawn(async move {
                invoke(&shared, fragment, &invocation, callback, nested, completion);
            });
        }
        None => invoke(&shared, fragment, &invocation, callback, nested, completion),
    }
}

/// Arm a deadline on the runtime, or on a sleeper thread when there is none.
fn arm_timeout(
    runtime: Option<&Handle>,
    shared: &Arc<Shared>,
    fragment: FragmentId,
    after: Duration,
) {
    let timer_shared = Arc::clone(shared);
    let expire = move || {
        timer_shared.settle(fragment, Err(RenderError::FragmentTimeout { fragment, after }));
    };

    let timer = match runtime {
        Some(handle) => {
            let task = handle.spawn(async move {
                tokio::time::sleep(after).await;
                expire();
            });
            DeadlineTimer::Task(task.abort_handle())
        }
        None => {
            let (wake, sleeper) = mpsc::channel::<()>();
            let spawned = std::thread::Builder::new()
                .name(format!("render-deadline-{}", fragment.0))
                .spawn(move || {
                    if let Err(mpsc::RecvTimeoutError::Timeout) = sleeper.recv_timeout(after) {
                        expire();
                    }
                });
            if let Err(err) = spawned {
                tracing::warn!(%fragment, %err, "could not start deadline thread, fragment has no timeout");
                return;
            }
            DeadlineTimer::Thread(wake)
        }
    };
    shared.update(|s| s.arm_timer(fragment, timer));
}

fn invoke(
    shared: &Arc<Shared>,
    fragment: FragmentId,
    invocation: &Invocation,
    callback: FragmentCallback,
    nested: RenderContext,
    completion: Completion,
) {
    invocation.enter();
    let result = panic::catch_unwind(AssertUnwindSafe(move || callback(nested, completion)));
    let dropped_unused = invocation.leave();

    let failure = match result {
        Ok(Ok(())) => dropped_unused.then_some(RenderError::FragmentAbandoned { fragment }),
        Ok(Err(err)) => Some(RenderError::FragmentException {
            fragment,
            message: format!("{:#}", err),
        }),
        Err(payload) => Some(RenderError::FragmentException {
            fragment,
            message: panic_message(payload.as_ref()),
        }),
    };

    if let Some(error) = failure {
        tracing::debug!(%fragment, %error, "fragment callback did not complete");
        shared.settle(fragment, Err(error));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_from_str_and_string() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "callback panicked");
    }

    #[test]
    fn test_drop_during_call_is_reported_by_runner() {
        let invocation = Invocation::default();
        invocation.enter();
        assert!(invocation.defer_drop());
        assert!(invocation.leave());
    }

    #[test]
    fn test_drop_after_call_is_reported_by_handle() {
        let invocation = Invocation::default();
        invocation.enter();
        assert!(!invocation.leave());
        assert!(!invocation.defer_drop());
    }

    #[test]
    fn test_drop_before_call_is_reported_by_handle() {
        let invocation = Invocation::default();
        assert!(!invocation.defer_drop());
    }

    #[test]
    fn test_concurrent_drop_is_reported_exactly_once() {
        for _ in 0..1_000 {
            let invocation = Arc::new(Invocation::default());
            invocation.enter();

            let other = Arc::clone(&invocation);
            let dropper = std::thread::spawn(move || !other.defer_drop());
            let runner_reports = invocation.leave();
            let handle_reports = dropper.join().unwrap();

            assert!(runner_reports != handle_reports);
        }
    }
}
