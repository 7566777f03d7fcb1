//! Render context façade.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context as _;
use render_core::{
    EventEmitter, EventKind, FragmentId, RenderConfig, RenderError, RenderEvent, RenderId,
    RenderPhase, TimingContext,
};
use render_streaming::{MemorySink, OutputSink, SequenceId};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::options::FragmentOptions;
use crate::runner::{run_fragment, Completion};
use crate::scheduler::FragmentScheduler;

/// State owned by the root of a render and viewed by every nested context.
pub(crate) struct Shared {
    pub(crate) config: RenderConfig,
    scheduler: Mutex<FragmentScheduler>,
    events: EventEmitter,
    done: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, FragmentScheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one scheduler step, then deliver the events it queued.
    pub(crate) fn update<R>(
        self: &Arc<Self>,
        step: impl FnOnce(&mut FragmentScheduler) -> R,
    ) -> R {
        let result = {
            let mut scheduler = self.lock();
            step(&mut *scheduler)
        };
        self.pump();
        result
    }

    pub(crate) fn settle(
        self: &Arc<Self>,
        fragment: FragmentId,
        result: Result<Option<String>, RenderError>,
    ) {
        self.update(|s| s.settle(fragment, result));
    }

    /// Deliver queued events outside the lock.
    ///
    /// Only one caller delivers at a time so events keep their queue order;
    /// events queued by re-entrant calls from handlers are picked up by the
    /// loop already running.
    ///
    /// With a tokio runtime current, `End` is delivered from a spawned task,
    /// so handlers subscribed in the same synchronous block as the final
    /// `end_render` or completion still see it.
    fn pump(self: &Arc<Self>) {
        let claimed = self.lock().begin_dispatch();
        if !claimed {
            return;
        }
        let _guard = DispatchGuard(self.as_ref());

        loop {
            let batch = {
                let mut scheduler = self.lock();
                let batch = scheduler.drain_events();
                if batch.is_empty() {
                    scheduler.end_dispatch();
                    return;
                }
                batch
            };

            for event in &batch {
                if matches!(event, RenderEvent::End) {
                    self.announce_end();
                } else {
                    self.events.emit(event);
                }
            }
        }
    }

    fn announce_end(self: &Arc<Self>) {
        let finish = |shared: &Shared| {
            shared.events.emit(&RenderEvent::End);
            shared.done.send_replace(true);
        };
        match Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(self);
                handle.spawn(async move { finish(&shared) });
            }
            Err(_) => finish(self.as_ref()),
        }
    }
}

/// Releases the dispatch claim if a handler panics mid-delivery.
struct DispatchGuard<'a>(&'a Shared);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().end_dispatch();
        }
    }
}

/// Final state of a completed render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    /// Assembled output when rendering to an in-memory sink.
    pub output: Option<String>,
    /// Every error reported during the render.
    pub errors: Vec<RenderError>,
}

/// Handle to a render, or to one async fragment within it.
///
/// The root context and every nested context handed to a fragment callback
/// share the same API. Mutating calls return `&Self` for chaining:
///
/// ```ignore
/// let ctx = RenderContext::in_memory(RenderConfig::default());
/// ctx.begin_render()
///     .write("1")
///     .begin_async_fragment(|nested, done| {
///         nested.write("2");
///         done.done();
///         Ok(())
///     })
///     .write("3")
///     .end_render();
/// ```
#[derive(Clone)]
pub struct RenderContext {
    pub(crate) shared: Arc<Shared>,
    pub(crate) sequence: SequenceId,
}

impl RenderContext {
    /// Create a root context writing to `sink`.
    pub fn new(config: RenderConfig, sink: impl OutputSink + 'static) -> Self {
        let id = RenderId::generate();
        let scheduler = FragmentScheduler::new(id, &config, Box::new(sink));
        let (done, _) = watch::channel(false);
        tracing::debug!(render = %id, "render created");

        Self {
            shared: Arc::new(Shared {
                config,
                scheduler: Mutex::new(scheduler),
                events: EventEmitter::new(),
                done,
            }),
            sequence: SequenceId::ROOT,
        }
    }

    /// Create a root context accumulating output in memory.
    pub fn in_memory(config: RenderConfig) -> Self {
        Self::new(config, MemorySink::new())
    }

    pub(crate) fn nested(shared: Arc<Shared>, sequence: SequenceId) -> Self {
        Self { shared, sequence }
    }

    /// Render this context belongs to.
    pub fn id(&self) -> RenderId {
        self.shared.lock().render_id()
    }

    /// Whether this is the root context rather than a fragment's.
    pub fn is_root(&self) -> bool {
        self.sequence.is_root()
    }

    /// Configuration of this render.
    pub fn config(&self) -> &RenderConfig {
        &self.shared.config
    }

    /// Marker for the start of a render. Does nothing.
    pub fn begin_render(&self) -> &Self {
        self
    }

    /// Append literal content at this context's insertion point.
    pub fn write(&self, content: impl Into<String>) -> &Self {
        let content = content.into();
        self.shared.update(|s| s.write(self.sequence, content));
        self
    }

    /// Reserve a slot for async output and hand it to `callback`.
    ///
    /// The callback receives a nested context writing into the slot and the
    /// `Completion` that settles it. Output order follows declaration order
    /// no matter when the fragment completes.
    ///
    /// Inside a tokio runtime the callback is spawned and never runs inline
    /// with the caller. Without a runtime it runs before this returns.
    pub fn begin_async_fragment<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(RenderContext, Completion) -> anyhow::Result<()> + Send + 'static,
    {
        self.begin_async_fragment_with(FragmentOptions::default(), callback)
    }

    /// Like `begin_async_fragment`, failing the fragment if it has not
    /// completed within `timeout`.
    pub fn begin_async_fragment_timeout<F>(&self, timeout: Duration, callback: F) -> &Self
    where
        F: FnOnce(RenderContext, Completion) -> anyhow::Result<()> + Send + 'static,
    {
        self.begin_async_fragment_with(FragmentOptions::new().with_timeout(timeout), callback)
    }

    /// Like `begin_async_fragment`, with explicit options.
    pub fn begin_async_fragment_with<F>(&self, options: FragmentOptions, callback: F) -> &Self
    where
        F: FnOnce(RenderContext, Completion) -> anyhow::Result<()> + Send + 'static,
    {
        run_fragment(self, options, Box::new(callback));
        self
    }

    /// Reserve a slot filled by a future.
    ///
    /// `Ok(Some(content))` resolves with explicit content, `Ok(None)` with
    /// whatever the task wrote through its context, `Err` fails the fragment.
    /// Requires a tokio runtime.
    pub fn begin_async_task<F, Fut>(&self, options: FragmentOptions, task: F) -> &Self
    where
        F: FnOnce(RenderContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
    {
        self.begin_async_fragment_with(options, move |nested, done| {
            let handle =
                Handle::try_current().context("async fragment tasks need a tokio runtime")?;
            handle.spawn(async move {
                let result = task(nested).await;
                done.complete(result);
            });
            Ok(())
        })
    }

    /// Declare that no more top-level writes will arrive.
    ///
    /// `end` fires once every fragment has settled. Does nothing on a
    /// nested context.
    pub fn end_render(&self) -> &Self {
        if self.is_root() {
            self.shared.update(|s| s.end());
        } else {
            tracing::debug!("end_render on a nested context, ignoring");
        }
        self
    }

    /// Subscribe to a render event channel.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> &Self
    where
        F: Fn(&RenderEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(kind, Arc::new(handler));
        self
    }

    /// Subscribe to fragment and sink errors.
    pub fn on_error<F>(&self, handler: F) -> &Self
    where
        F: Fn(&RenderError) + Send + Sync + 'static,
    {
        self.on(EventKind::Error, move |event| {
            if let RenderEvent::Error(error) = event {
                handler(error);
            }
        })
    }

    /// Subscribe to render completion.
    pub fn on_end<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::End, move |_| handler())
    }

    /// Assembled output. `None` before `end`, or when the sink streams its output elsewhere.
    pub fn get_output(&self) -> Option<String> {
        self.shared.lock().output().map(str::to_string)
    }

    /// Errors reported so far.
    pub fn errors(&self) -> Vec<RenderError> {
        self.shared.lock().errors().to_vec()
    }

    /// Fragments not yet settled, across the whole render.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> RenderPhase {
        self.shared.lock().phase()
    }

    /// Snapshot of the render's timing marks.
    pub fn timing(&self) -> TimingContext {
        self.shared.lock().timing().clone()
    }

    /// Wait for `end`. Resolves immediately if the render already ended.
    pub fn finished(&self) -> impl Future<Output = RenderOutcome> + Send + 'static {
        let shared = Arc::clone(&self.shared);
        let mut done = shared.done.subscribe();

        async move {
            let _ = done.wait_for(|ended| *ended).await;
            let scheduler = shared.lock();
            RenderOutcome {
                output: scheduler.output().map(str::to_string),
                errors: scheduler.errors().to_vec(),
            }
        }
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("sequence", &self.sequence)
            .field("scheduler", &*self.shared.lock())
            .finish()
    }
}
