//! Ordered segment sequences.
//!
//! A render owns one `SegmentArena`. Sequence 0 is the root; every
//! placeholder owns a child sequence that its fragment writes into.
//! Slots are appended at declaration time and never reordered.

use std::collections::HashMap;

use render_core::{FragmentId, FragmentOutcome};

/// Index of a sequence in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceId(usize);

impl SequenceId {
    /// The root sequence of every arena.
    pub const ROOT: SequenceId = SequenceId(0);

    /// Whether this is the root sequence.
    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

/// Resolution state of a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaceholderState {
    #[default]
    Pending,
    Resolved,
    Failed,
    TimedOut,
}

impl PlaceholderState {
    /// Whether no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl From<FragmentOutcome> for PlaceholderState {
    fn from(outcome: FragmentOutcome) -> Self {
        match outcome {
            FragmentOutcome::Resolved => Self::Resolved,
            FragmentOutcome::Failed => Self::Failed,
            FragmentOutcome::TimedOut => Self::TimedOut,
        }
    }
}

/// Slot reserved for an async fragment.
#[derive(Debug, Clone)]
pub struct Placeholder {
    /// Fragment that will resolve this slot.
    pub fragment: FragmentId,
    /// Current state.
    pub state: PlaceholderState,
    /// Sequence the fragment's nested context writes into.
    pub children: SequenceId,
    /// Content that replaces the children once terminal.
    pub content: Option<String>,
}

impl Placeholder {
    /// Move to a terminal state. Only the first transition is applied.
    ///
    /// Returns `false` if the placeholder was already terminal.
    pub fn settle(&mut self, state: PlaceholderState, content: Option<String>) -> bool {
        if self.state.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        self.content = content;
        true
    }
}

/// Atomic ordered unit of output.
#[derive(Debug, Clone)]
pub enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Ordered run of segments plus its flush cursor.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    segments: Vec<Segment>,
    cursor: usize,
    owner: Option<FragmentId>,
}

impl Sequence {
    fn owned_by(owner: Option<FragmentId>) -> Self {
        Self {
            segments: Vec::new(),
            cursor: 0,
            owner,
        }
    }

    /// Fragment whose placeholder this sequence fills, `None` for the root.
    pub fn owner(&self) -> Option<FragmentId> {
        self.owner
    }

    /// Number of segments declared so far.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether nothing has been declared.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Index of the first segment not yet flushed.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether every declared segment has been flushed.
    pub fn is_drained(&self) -> bool {
        self.cursor == self.segments.len()
    }

    /// All declared segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segment at the cursor.
    pub fn current_mut(&mut self) -> Option<&mut Segment> {
        self.segments.get_mut(self.cursor)
    }

    /// Move the cursor past the current segment.
    pub fn advance(&mut self) {
        if self.cursor < self.segments.len() {
            self.cursor += 1;
        }
    }
}

/// Arena of every sequence in one render.
#[derive(Debug, Clone)]
pub struct SegmentArena {
    sequences: Vec<Sequence>,
    placeholders: HashMap<FragmentId, (SequenceId, usize)>,
}

impl SegmentArena {
    /// Create an arena holding an empty root sequence.
    pub fn new() -> Self {
        Self {
            sequences: vec![Sequence::owned_by(None)],
            placeholders: HashMap::new(),
        }
    }

    /// Get a sequence.
    pub fn sequence(&self, id: SequenceId) -> &Sequence {
        &self.sequences[id.0]
    }

    /// Get a sequence mutably.
    pub fn sequence_mut(&mut self, id: SequenceId) -> &mut Sequence {
        &mut self.sequences[id.0]
    }

    /// Number of sequences, root included.
    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }

    /// Append a literal at the tail of a sequence.
    pub fn push_literal(&mut self, seq: SequenceId, content: impl Into<String>) {
        self.sequences[seq.0]
            .segments
            .push(Segment::Literal(content.into()));
    }

    /// Append a pending placeholder and allocate its child sequence.
    pub fn push_placeholder(&mut self, seq: SequenceId, fragment: FragmentId) -> SequenceId {
        let children = SequenceId(self.sequences.len());
        self.sequences.push(Sequence::owned_by(Some(fragment)));

        let slot = self.sequences[seq.0].segments.len();
        self.sequences[seq.0]
            .segments
            .push(Segment::Placeholder(Placeholder {
                fragment,
                state: PlaceholderState::Pending,
                children,
                content: None,
            }));
        self.placeholders.insert(fragment, (seq, slot));

        children
    }

    /// Look up a fragment's placeholder.
    pub fn placeholder(&self, fragment: FragmentId) -> Option<&Placeholder> {
        let (seq, slot) = *self.placeholders.get(&fragment)?;
        match self.sequences[seq.0].segments.get(slot)? {
            Segment::Placeholder(p) => Some(p),
            Segment::Literal(_) => None,
        }
    }

    /// Look up a fragment's placeholder mutably.
    pub fn placeholder_mut(&mut self, fragment: FragmentId) -> Option<&mut Placeholder> {
        let (seq, slot) = *self.placeholders.get(&fragment)?;
        match self.sequences[seq.0].segments.get_mut(slot)? {
            Segment::Placeholder(p) => Some(p),
            Segment::Literal(_) => None,
        }
    }

    /// Whether a sequence still accepts writes.
    ///
    /// The root is always open here; nested sequences close once their
    /// placeholder is terminal.
    pub fn is_open(&self, seq: SequenceId) -> bool {
        match self.sequences[seq.0].owner {
            None => true,
            Some(owner) => self
                .placeholder(owner)
                .is_some_and(|p| !p.state.is_terminal()),
        }
    }
}

impl Default for SegmentArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_arena_has_empty_root() {
        let arena = SegmentArena::new();
        assert_eq!(arena.sequence_count(), 1);
        assert!(arena.sequence(SequenceId::ROOT).is_empty());
        assert!(arena.sequence(SequenceId::ROOT).is_drained());
        assert!(SequenceId::ROOT.is_root());
    }

    #[test]
    fn test_push_placeholder_allocates_child_sequence() {
        let mut arena = SegmentArena::new();
        arena.push_literal(SequenceId::ROOT, "1");
        let children = arena.push_placeholder(SequenceId::ROOT, FragmentId(1));
        arena.push_literal(SequenceId::ROOT, "3");

        assert!(!children.is_root());
        assert_eq!(arena.sequence(SequenceId::ROOT).len(), 3);
        assert_eq!(arena.sequence(children).owner(), Some(FragmentId(1)));

        let placeholder = arena.placeholder(FragmentId(1)).unwrap();
        assert_eq!(placeholder.state, PlaceholderState::Pending);
        assert_eq!(placeholder.children, children);
    }

    #[test]
    fn test_settle_first_writer_wins() {
        let mut arena = SegmentArena::new();
        arena.push_placeholder(SequenceId::ROOT, FragmentId(1));

        let p = arena.placeholder_mut(FragmentId(1)).unwrap();
        assert!(p.settle(PlaceholderState::TimedOut, None));
        assert!(!p.settle(PlaceholderState::Resolved, Some("late".to_string())));
        assert_eq!(p.state, PlaceholderState::TimedOut);
        assert_eq!(p.content, None);
    }

    #[test]
    fn test_settle_rejects_pending_target() {
        let mut arena = SegmentArena::new();
        arena.push_placeholder(SequenceId::ROOT, FragmentId(1));
        let p = arena.placeholder_mut(FragmentId(1)).unwrap();
        assert!(!p.settle(PlaceholderState::Pending, None));
    }

    #[test]
    fn test_nested_sequence_closes_when_terminal() {
        let mut arena = SegmentArena::new();
        let children = arena.push_placeholder(SequenceId::ROOT, FragmentId(1));
        assert!(arena.is_open(children));

        arena
            .placeholder_mut(FragmentId(1))
            .unwrap()
            .settle(PlaceholderState::Resolved, None);
        assert!(!arena.is_open(children));
        assert!(arena.is_open(SequenceId::ROOT));
    }

    #[test]
    fn test_cursor_advance_stops_at_end() {
        let mut arena = SegmentArena::new();
        arena.push_literal(SequenceId::ROOT, "a");

        let root = arena.sequence_mut(SequenceId::ROOT);
        assert!(matches!(root.current_mut(), Some(Segment::Literal(s)) if s == "a"));
        root.advance();
        root.advance();
        assert_eq!(root.cursor(), 1);
        assert!(root.is_drained());
        assert!(root.current_mut().is_none());
    }

    #[test]
    fn test_state_from_outcome() {
        assert_eq!(
            PlaceholderState::from(FragmentOutcome::TimedOut),
            PlaceholderState::TimedOut
        );
        assert!(PlaceholderState::Failed.is_terminal());
        assert!(!PlaceholderState::Pending.is_terminal());
    }
}
