//! Fragment scheduler: pending tracking and document-order flushing.

use std::collections::HashMap;
use std::sync::mpsc;

use render_core::{
    FallbackStrategy, FragmentId, FragmentOutcome, RenderConfig, RenderError, RenderEvent,
    RenderId, RenderPhase, TimingContext,
};
use render_streaming::{
    FlushController, OutputSink, PlaceholderState, Segment, SegmentArena, SequenceId,
};
use tokio::task::AbortHandle;

use crate::fallback::apply_fallback;

/// A fragment's armed deadline.
#[derive(Debug)]
pub enum DeadlineTimer {
    /// Sleeping tokio task.
    Task(AbortHandle),
    /// Sleeping thread, used when no tokio runtime is available. Dropping
    /// the sender wakes it without firing.
    Thread(mpsc::Sender<()>),
}

impl DeadlineTimer {
    /// Stop the deadline from firing.
    pub fn cancel(self) {
        match self {
            Self::Task(handle) => handle.abort(),
            Self::Thread(wake) => drop(wake),
        }
    }
}

/// Owns the segment tree of one render and everything shared across it.
///
/// Every method is one atomic step: callers hold the render's lock for the
/// duration of a call and deliver the queued events afterwards.
pub struct FragmentScheduler {
    render: RenderId,
    arena: SegmentArena,
    flush: FlushController,
    sink: Box<dyn OutputSink>,
    pending: usize,
    errors: Vec<RenderError>,
    phase: RenderPhase,
    next_fragment: u64,
    fallbacks: HashMap<FragmentId, FallbackStrategy>,
    timers: HashMap<FragmentId, DeadlineTimer>,
    timing: TimingContext,
    output: Option<String>,
    sink_failed: bool,
    outbox: Vec<RenderEvent>,
    dispatching: bool,
}

impl FragmentScheduler {
    /// Create a scheduler writing to `sink`.
    pub fn new(render: RenderId, config: &RenderConfig, sink: Box<dyn OutputSink>) -> Self {
        Self {
            render,
            arena: SegmentArena::new(),
            flush: FlushController::new(config.flush),
            sink,
            pending: 0,
            errors: Vec::new(),
            phase: RenderPhase::Building,
            next_fragment: 1,
            fallbacks: HashMap::new(),
            timers: HashMap::new(),
            timing: TimingContext::new(),
            output: None,
            sink_failed: false,
            outbox: Vec::new(),
            dispatching: false,
        }
    }

    /// Append a literal to a sequence.
    pub fn write(&mut self, seq: SequenceId, content: String) {
        if !self.accepts(seq, "write") {
            return;
        }
        self.arena.push_literal(seq, content);
        self.flush();
    }

    /// Append a placeholder to a sequence and count it as pending.
    ///
    /// Returns the new fragment and the sequence its context writes into,
    /// or `None` if the sequence no longer accepts declarations.
    pub fn declare(
        &mut self,
        seq: SequenceId,
        name: Option<&str>,
        fallback: FallbackStrategy,
    ) -> Option<(FragmentId, SequenceId)> {
        if !self.accepts(seq, "begin_async_fragment") {
            return None;
        }

        let fragment = FragmentId(self.next_fragment);
        self.next_fragment += 1;

        let children = self.arena.push_placeholder(seq, fragment);
        self.pending += 1;
        self.fallbacks.insert(fragment, fallback);

        tracing::debug!(
            render = %self.render,
            %fragment,
            name = name.unwrap_or(""),
            pending = self.pending,
            "fragment declared"
        );
        self.outbox.push(RenderEvent::Declared { fragment });

        Some((fragment, children))
    }

    /// Attach a deadline to a fragment. Cancelled when the fragment settles.
    pub fn arm_timer(&mut self, fragment: FragmentId, timer: DeadlineTimer) {
        let pending = self
            .arena
            .placeholder(fragment)
            .is_some_and(|p| !p.state.is_terminal());

        if pending {
            self.timers.insert(fragment, timer);
        } else {
            timer.cancel();
        }
    }

    /// Apply a fragment's outcome. Only the first outcome for a fragment counts.
    ///
    /// Returns `false` if the fragment had already settled.
    pub fn settle(
        &mut self,
        fragment: FragmentId,
        result: Result<Option<String>, RenderError>,
    ) -> bool {
        let (state, content, error) = match result {
            Ok(content) => (PlaceholderState::Resolved, content, None),
            Err(error) => {
                let state = if error.is_timeout() {
                    PlaceholderState::TimedOut
                } else {
                    PlaceholderState::Failed
                };
                let content = self
                    .fallbacks
                    .get(&fragment)
                    .and_then(|strategy| apply_fallback(strategy, &error));
                (state, content, Some(error))
            }
        };

        let applied = self
            .arena
            .placeholder_mut(fragment)
            .is_some_and(|p| p.settle(state, content));
        if !applied {
            tracing::debug!(render = %self.render, %fragment, "late completion ignored");
            return false;
        }

        self.pending -= 1;
        self.fallbacks.remove(&fragment);
        if let Some(timer) = self.timers.remove(&fragment) {
            timer.cancel();
        }

        let outcome = match state {
            PlaceholderState::TimedOut => FragmentOutcome::TimedOut,
            PlaceholderState::Failed => FragmentOutcome::Failed,
            _ => FragmentOutcome::Resolved,
        };
        tracing::debug!(
            render = %self.render,
            %fragment,
            ?outcome,
            pending = self.pending,
            "fragment settled"
        );

        if let Some(error) = error {
            tracing::warn!(render = %self.render, %fragment, %error, "fragment failed");
            self.record_error(error);
        }
        self.outbox.push(RenderEvent::Settled { fragment, outcome });

        self.flush();
        self.maybe_finish();
        true
    }

    /// Mark the end of top-level writes.
    pub fn end(&mut self) {
        if self.phase != RenderPhase::Building {
            tracing::warn!(render = %self.render, "end_render called more than once, ignoring");
            return;
        }
        self.phase = RenderPhase::Ended;
        tracing::debug!(render = %self.render, pending = self.pending, "render ended");
        self.maybe_finish();
    }

    fn accepts(&self, seq: SequenceId, op: &str) -> bool {
        if seq.is_root() && !self.phase.accepts_writes() {
            tracing::warn!(render = %self.render, op, "top-level {op} after end_render, ignoring");
            return false;
        }
        if !self.arena.is_open(seq) {
            let fragment = self.arena.sequence(seq).owner();
            tracing::warn!(
                render = %self.render,
                ?fragment,
                op,
                "{op} on a fragment that already completed, ignoring"
            );
            return false;
        }
        true
    }

    /// Emit the contiguous ready prefix of the tree to the sink.
    fn flush(&mut self) {
        let mut ready = Vec::new();
        collect_ready(&mut self.arena, SequenceId::ROOT, &mut ready);

        let mut bytes = 0;
        for chunk in &ready {
            bytes += self.push_to_sink(chunk);
        }
        if !self.sink_failed {
            match self.flush.end_pass(self.sink.as_mut()) {
                Ok(n) => bytes += n,
                Err(err) => self.fail_sink(err.into()),
            }
        }
        self.note_flushed(bytes);
    }

    fn push_to_sink(&mut self, chunk: &str) -> usize {
        if self.sink_failed {
            return 0;
        }
        match self.flush.push(chunk, self.sink.as_mut()) {
            Ok(n) => n,
            Err(err) => {
                self.fail_sink(err.into());
                0
            }
        }
    }

    fn note_flushed(&mut self, bytes: usize) {
        if bytes > 0 {
            self.timing.mark_once("first_flush");
            self.outbox.push(RenderEvent::Flush { bytes });
        }
    }

    /// Finish the sink and announce `end` once nothing is pending.
    fn maybe_finish(&mut self) {
        if self.phase != RenderPhase::Ended || self.pending > 0 {
            return;
        }

        if !self.sink_failed {
            match self.flush.drain(self.sink.as_mut()) {
                Ok(n) => self.note_flushed(n),
                Err(err) => self.fail_sink(err.into()),
            }
        }
        if let Err(err) = self.sink.finish() {
            if !self.sink_failed {
                self.fail_sink(err.into());
            }
        }

        self.output = self.sink.output();
        self.phase = RenderPhase::Flushed;
        self.timing.mark("end");
        tracing::debug!(
            render = %self.render,
            bytes = self.flush.total_written(),
            errors = self.errors.len(),
            "render finished"
        );
        self.outbox.push(RenderEvent::End);
    }

    /// Later chunks are dropped once the sink has failed.
    fn fail_sink(&mut self, error: RenderError) {
        tracing::warn!(render = %self.render, %error, "output sink failed");
        self.sink_failed = true;
        self.record_error(error);
    }

    fn record_error(&mut self, error: RenderError) {
        self.errors.push(error.clone());
        self.outbox.push(RenderEvent::Error(error));
    }

    /// Take the events queued since the last call.
    pub fn drain_events(&mut self) -> Vec<RenderEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Claim the right to deliver events. Returns `false` if another caller holds it.
    pub(crate) fn begin_dispatch(&mut self) -> bool {
        !std::mem::replace(&mut self.dispatching, true)
    }

    /// Release the dispatch claim.
    pub(crate) fn end_dispatch(&mut self) {
        self.dispatching = false;
    }

    /// Render this scheduler belongs to.
    pub fn render_id(&self) -> RenderId {
        self.render
    }

    /// Fragments not yet settled, across the whole tree.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Errors recorded so far.
    pub fn errors(&self) -> &[RenderError] {
        &self.errors
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    /// Assembled output, once flushed to an in-memory sink.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Timing marks of this render.
    pub fn timing(&self) -> &TimingContext {
        &self.timing
    }

    /// The segment tree.
    pub fn arena(&self) -> &SegmentArena {
        &self.arena
    }
}

impl std::fmt::Debug for FragmentScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentScheduler")
            .field("render", &self.render)
            .field("pending", &self.pending)
            .field("phase", &self.phase)
            .field("errors", &self.errors.len())
            .finish()
    }
}

/// Walk a sequence from its cursor, collecting ready content in order.
///
/// Resolved placeholders without direct content are expanded in place.
/// Returns `true` if the sequence is drained.
fn collect_ready(arena: &mut SegmentArena, seq: SequenceId, ready: &mut Vec<String>) -> bool {
    loop {
        let nested = match arena.sequence_mut(seq).current_mut() {
            None => return true,
            Some(Segment::Literal(text)) => {
                ready.push(std::mem::take(text));
                None
            }
            Some(Segment::Placeholder(p)) => match p.state {
                PlaceholderState::Pending => return false,
                PlaceholderState::Resolved if p.content.is_none() => Some(p.children),
                _ => {
                    ready.extend(p.content.take());
                    None
                }
            },
        };

        if let Some(children) = nested {
            if !collect_ready(arena, children, ready) {
                return false;
            }
        }
        arena.sequence_mut(seq).advance();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use render_core::FlushPolicy;
    use render_streaming::MemorySink;

    use super::*;

    fn scheduler() -> FragmentScheduler {
        FragmentScheduler::new(
            RenderId(1),
            &RenderConfig::default(),
            Box::new(MemorySink::new()),
        )
    }

    fn declare(s: &mut FragmentScheduler, seq: SequenceId) -> (FragmentId, SequenceId) {
        s.declare(seq, None, FallbackStrategy::Skip).unwrap()
    }

    fn flushed_bytes(events: &[RenderEvent]) -> usize {
        events
            .iter()
            .map(|e| match e {
                RenderEvent::Flush { bytes } => *bytes,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_sync_writes() {
        let mut s = scheduler();
        for c in ["1", "2", "3", "4"] {
            s.write(SequenceId::ROOT, c.to_string());
        }
        s.end();

        assert_eq!(s.phase(), RenderPhase::Flushed);
        assert_eq!(s.output(), Some("1234"));
        assert_eq!(s.drain_events().last(), Some(&RenderEvent::End));
    }

    #[test]
    fn test_resolution_in_reverse_order() {
        let mut s = scheduler();
        s.write(SequenceId::ROOT, "1".into());
        let (slow, slow_seq) = declare(&mut s, SequenceId::ROOT);
        s.write(SequenceId::ROOT, "3".into());
        let (fast, fast_seq) = declare(&mut s, SequenceId::ROOT);
        s.end();
        assert_eq!(s.pending(), 2);
        s.drain_events();

        s.write(fast_seq, "4".into());
        assert!(s.settle(fast, Ok(None)));
        // Nothing behind the slow fragment may flush yet.
        assert_eq!(flushed_bytes(&s.drain_events()), 0);

        s.write(slow_seq, "2".into());
        assert!(s.settle(slow, Ok(None)));

        assert_eq!(s.pending(), 0);
        assert_eq!(s.output(), Some("1234"));
    }

    #[test]
    fn test_flush_stops_at_pending_placeholder() {
        let mut s = scheduler();
        s.write(SequenceId::ROOT, "ab".into());
        let (fragment, _) = declare(&mut s, SequenceId::ROOT);
        s.write(SequenceId::ROOT, "cd".into());

        let events = s.drain_events();
        assert_eq!(flushed_bytes(&events), 2);
        assert_eq!(s.arena().sequence(SequenceId::ROOT).cursor(), 1);

        s.settle(fragment, Ok(Some("X".into())));
        assert_eq!(flushed_bytes(&s.drain_events()), 3);
        assert!(s.arena().sequence(SequenceId::ROOT).is_drained());
    }

    #[test]
    fn test_direct_content_overrides_nested_writes() {
        let mut s = scheduler();
        let (fragment, nested) = declare(&mut s, SequenceId::ROOT);
        s.write(nested, "ignored".into());
        s.settle(fragment, Ok(Some("2".into())));
        s.end();

        assert_eq!(s.output(), Some("2"));
    }

    #[test]
    fn test_failure_discards_partial_writes() {
        let mut s = scheduler();
        s.write(SequenceId::ROOT, "1".into());
        let (fragment, nested) = declare(&mut s, SequenceId::ROOT);
        s.write(nested, "partial".into());
        s.write(SequenceId::ROOT, "3".into());
        s.end();

        let error = RenderError::failed(fragment, anyhow::anyhow!("boom"));
        assert!(s.settle(fragment, Err(error.clone())));

        assert_eq!(s.output(), Some("13"));
        assert_eq!(s.errors(), &[error.clone()]);
        let events = s.drain_events();
        assert!(events.contains(&RenderEvent::Error(error)));
        assert!(events.contains(&RenderEvent::Settled {
            fragment,
            outcome: FragmentOutcome::Failed,
        }));
    }

    #[test]
    fn test_late_completion_after_timeout_is_ignored() {
        let mut s = scheduler();
        s.write(SequenceId::ROOT, "1".into());
        let (fragment, _) = declare(&mut s, SequenceId::ROOT);
        s.write(SequenceId::ROOT, "3".into());
        s.end();

        let timeout = RenderError::FragmentTimeout {
            fragment,
            after: Duration::from_millis(100),
        };
        assert!(s.settle(fragment, Err(timeout)));
        s.drain_events();

        assert!(!s.settle(fragment, Ok(Some("2".into()))));
        assert!(s.drain_events().is_empty());
        assert_eq!(s.errors().len(), 1);
        assert_eq!(s.pending(), 0);
        assert_eq!(s.output(), Some("13"));
        assert_eq!(
            s.arena().placeholder(fragment).unwrap().state,
            PlaceholderState::TimedOut
        );
    }

    #[test]
    fn test_fallback_content_for_failed_fragment() {
        let mut s = scheduler();
        s.write(SequenceId::ROOT, "1".into());
        let (fragment, _) = s
            .declare(SequenceId::ROOT, Some("reviews"), FallbackStrategy::content("?"))
            .unwrap();
        s.write(SequenceId::ROOT, "3".into());
        s.end();

        s.settle(fragment, Err(RenderError::FragmentAbandoned { fragment }));
        assert_eq!(s.output(), Some("1?3"));
    }

    #[test]
    fn test_nested_fragments_flush_before_later_siblings() {
        let mut s = scheduler();
        s.write(SequenceId::ROOT, "1".into());
        let (outer, outer_seq) = declare(&mut s, SequenceId::ROOT);
        s.write(SequenceId::ROOT, "3".into());
        s.end();

        s.write(outer_seq, "2a".into());
        let (inner, inner_seq) = declare(&mut s, outer_seq);
        s.write(outer_seq, "2c".into());
        assert!(s.settle(outer, Ok(None)));

        // Outer is resolved but its inner fragment still blocks the cursor.
        assert_eq!(s.pending(), 1);
        assert_eq!(s.phase(), RenderPhase::Ended);

        s.write(inner_seq, "2b".into());
        s.settle(inner, Ok(None));
        assert_eq!(s.output(), Some("12a2b2c3"));
    }

    #[test]
    fn test_end_waits_for_pending() {
        let mut s = scheduler();
        let (fragment, _) = declare(&mut s, SequenceId::ROOT);
        s.end();
        assert_eq!(s.phase(), RenderPhase::Ended);
        assert!(!s.drain_events().contains(&RenderEvent::End));

        s.settle(fragment, Ok(None));
        assert_eq!(s.phase(), RenderPhase::Flushed);
        assert!(s.drain_events().contains(&RenderEvent::End));
    }

    #[test]
    fn test_end_is_signalled_once() {
        let mut s = scheduler();
        s.end();
        s.end();
        let ends = s
            .drain_events()
            .into_iter()
            .filter(|e| *e == RenderEvent::End)
            .count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn test_writes_after_end_are_ignored() {
        let mut s = scheduler();
        s.write(SequenceId::ROOT, "1".into());
        s.end();
        s.write(SequenceId::ROOT, "2".into());
        assert!(s.declare(SequenceId::ROOT, None, FallbackStrategy::Skip).is_none());
        assert_eq!(s.output(), Some("1"));
    }

    #[test]
    fn test_writes_to_settled_fragment_are_ignored() {
        let mut s = scheduler();
        let (fragment, nested) = declare(&mut s, SequenceId::ROOT);
        s.write(nested, "a".into());
        s.settle(fragment, Ok(None));
        s.write(nested, "b".into());
        assert!(s.declare(nested, None, FallbackStrategy::Skip).is_none());
        s.end();

        assert_eq!(s.output(), Some("a"));
    }

    #[test]
    fn test_per_pass_policy_coalesces_writes() {
        let config = RenderConfig::default().with_flush(FlushPolicy::PerPass);
        let mut s = FragmentScheduler::new(RenderId(2), &config, Box::new(MemorySink::new()));

        let (fragment, nested) = declare(&mut s, SequenceId::ROOT);
        s.write(SequenceId::ROOT, "b".into());
        s.write(nested, "a".into());
        s.drain_events();

        s.settle(fragment, Ok(None));
        let flushes: Vec<_> = s
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, RenderEvent::Flush { .. }))
            .collect();
        assert_eq!(flushes, vec![RenderEvent::Flush { bytes: 2 }]);
    }

    #[test]
    fn test_threshold_policy_drains_on_finish() {
        let config =
            RenderConfig::default().with_flush(FlushPolicy::Threshold { bytes: 1024 });
        let mut s = FragmentScheduler::new(RenderId(3), &config, Box::new(MemorySink::new()));
        s.write(SequenceId::ROOT, "small".into());
        assert_eq!(flushed_bytes(&s.drain_events()), 0);

        s.end();
        assert_eq!(flushed_bytes(&s.drain_events()), 5);
        assert_eq!(s.output(), Some("small"));
        assert!(s.timing().time_to_first_flush().is_some());
    }

    #[test]
    fn test_sink_failure_is_isolated() {
        use render_core::SinkError;

        struct BrokenSink;
        impl OutputSink for BrokenSink {
            fn write(&mut self, _chunk: &str) -> Result<(), SinkError> {
                Err(SinkError::Closed)
            }
            fn finish(&mut self) -> Result<(), SinkError> {
                Err(SinkError::Closed)
            }
        }

        let mut s = FragmentScheduler::new(RenderId(4), &RenderConfig::default(), Box::new(BrokenSink));
        s.write(SequenceId::ROOT, "1".into());
        s.write(SequenceId::ROOT, "2".into());
        s.end();

        assert_eq!(s.errors(), &[RenderError::Sink(SinkError::Closed)]);
        assert_eq!(s.phase(), RenderPhase::Flushed);
        assert_eq!(s.output(), None);
    }

    #[test]
    fn test_dispatch_claim() {
        let mut s = scheduler();
        assert!(s.begin_dispatch());
        assert!(!s.begin_dispatch());
        s.end_dispatch();
        assert!(s.begin_dispatch());
    }
}
