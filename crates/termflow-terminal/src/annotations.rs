use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// A position in the abstract document coordinate space: absolute line number
/// (independent of current width and of eviction) plus a column. Orders by
/// line, then column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BufferPosition {
    pub line: u64,
    pub col: u32,
}

impl BufferPosition {
    pub fn new(line: u64, col: u32) -> Self {
        Self { line, col }
    }
}

/// Half-open range `[start, end)` in document order. May span the
/// history/grid boundary; both endpoints use absolute coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: BufferPosition,
    pub end: BufferPosition,
}

impl Interval {
    /// Builds a normalized interval (start ≤ end).
    pub fn new(a: BufferPosition, b: BufferPosition) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, pos: BufferPosition) -> bool {
        self.start <= pos && pos < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnnotationId(u64);

/// A user-visible note anchored to a range of terminal content. The anchor is
/// re-anchored (never re-derived) across reflow, and the annotation dies when
/// its range is entirely evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub interval: Interval,
    pub text: String,
    pub visible: bool,
    pub focused: bool,
}

/// Ordered interval index over annotations, keyed by absolute start position.
///
/// A `BTreeMap` keyed by `(start, id)` stands in for a balanced interval
/// tree: range queries walk starts below the query end and filter on overlap,
/// which is O(log n + k) for the short, mostly-disjoint interval populations
/// a terminal produces. Overlapping annotations are allowed.
#[derive(Debug, Clone, Default)]
pub struct AnnotationIndex {
    by_start: BTreeMap<(BufferPosition, AnnotationId), Annotation>,
    starts: HashMap<AnnotationId, BufferPosition>,
    next_id: u64,
    /// Largest line span any stored interval has ever had. Never shrinks on
    /// removal; only a conservative lower bound for `query` is needed.
    max_line_span: u64,
}

impl AnnotationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }

    /// Add a note anchored to `interval`. Empty intervals are rejected.
    pub fn add(&mut self, interval: Interval, text: impl Into<String>) -> Option<AnnotationId> {
        if interval.is_empty() {
            return None;
        }
        let id = AnnotationId(self.next_id);
        self.next_id += 1;
        let annotation = Annotation {
            id,
            interval,
            text: text.into(),
            visible: true,
            focused: false,
        };
        self.insert(annotation);
        Some(id)
    }

    pub fn remove(&mut self, id: AnnotationId) -> Option<Annotation> {
        let start = self.starts.remove(&id)?;
        self.by_start.remove(&(start, id))
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        let start = self.starts.get(&id)?;
        self.by_start.get(&(*start, id))
    }

    /// All annotations intersecting `range`, ordered by start position.
    pub fn query(&self, range: Interval) -> Vec<&Annotation> {
        // Anything intersecting `range` starts within `max_line_span` lines
        // of the range start, so the walk is bounded by the longest stored
        // interval rather than the whole index.
        let min = BufferPosition::new(
            range.start.line.saturating_sub(self.max_line_span),
            0,
        );
        self.by_start
            .range((
                Bound::Included((min, AnnotationId(0))),
                Bound::Excluded((range.end, AnnotationId(0))),
            ))
            .map(|(_, a)| a)
            .filter(|a| a.interval.intersects(&range))
            .collect()
    }

    /// Annotations whose range contains the given point.
    pub fn at_point(&self, pos: BufferPosition) -> Vec<&Annotation> {
        self.query(Interval {
            start: pos,
            end: BufferPosition::new(pos.line, pos.col.saturating_add(1)),
        })
        .into_iter()
        .filter(|a| a.interval.contains(pos))
        .collect()
    }

    /// Iterate all annotations in start order.
    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.by_start.values()
    }

    /// Replace an annotation's anchor after reflow computed its new range.
    pub fn reanchor(&mut self, id: AnnotationId, interval: Interval) {
        if let Some(mut annotation) = self.remove(id) {
            if interval.is_empty() {
                tracing::debug!(?id, "annotation collapsed during re-anchor, destroying");
                return;
            }
            annotation.interval = interval;
            self.insert(annotation);
        }
    }

    /// React to scrollback eviction: everything before `first_line` is gone.
    /// Annotations entirely below the cutoff are destroyed; partially
    /// overlapping ones are clamped to start at the new first line.
    pub fn truncate_before(&mut self, first_line: u64) {
        let cutoff = BufferPosition::new(first_line, 0);
        let doomed: Vec<AnnotationId> = self
            .by_start
            .values()
            .take_while(|a| a.interval.start < cutoff)
            .map(|a| a.id)
            .collect();
        for id in doomed {
            let Some(mut annotation) = self.remove(id) else {
                continue;
            };
            if annotation.interval.end <= cutoff {
                tracing::debug!(?id, "annotation fully evicted");
                continue;
            }
            annotation.interval.start = cutoff;
            self.insert(annotation);
        }
    }

    /// Rebuild from restored annotations (snapshot decode). Ids are reissued
    /// densely; anchors are kept verbatim.
    pub(crate) fn replace(&mut self, annotations: Vec<Annotation>) {
        self.by_start.clear();
        self.starts.clear();
        self.next_id = 0;
        self.max_line_span = 0;
        for mut annotation in annotations {
            annotation.id = AnnotationId(self.next_id);
            self.next_id += 1;
            self.insert(annotation);
        }
    }

    fn insert(&mut self, annotation: Annotation) {
        let span = annotation.interval.end.line - annotation.interval.start.line;
        self.max_line_span = self.max_line_span.max(span);
        self.starts.insert(annotation.id, annotation.interval.start);
        self.by_start
            .insert((annotation.interval.start, annotation.id), annotation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(l0: u64, c0: u32, l1: u64, c1: u32) -> Interval {
        Interval::new(BufferPosition::new(l0, c0), BufferPosition::new(l1, c1))
    }

    #[test]
    fn query_orders_by_start_and_allows_overlap() {
        let mut index = AnnotationIndex::new();
        let b = index.add(span(2, 0, 3, 5), "b").unwrap();
        let a = index.add(span(1, 3, 4, 0), "a").unwrap();
        let hits = index.query(span(2, 0, 2, 1));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, a);
        assert_eq!(hits[1].id, b);
    }

    #[test]
    fn query_excludes_half_open_end() {
        let mut index = AnnotationIndex::new();
        index.add(span(1, 0, 1, 5), "note").unwrap();
        // Range starting exactly at the annotation's end does not intersect.
        assert!(index.query(span(1, 5, 2, 0)).is_empty());
        assert_eq!(index.query(span(1, 4, 2, 0)).len(), 1);
    }

    #[test]
    fn point_lookup() {
        let mut index = AnnotationIndex::new();
        let id = index.add(span(3, 2, 3, 6), "note").unwrap();
        assert_eq!(index.at_point(BufferPosition::new(3, 2))[0].id, id);
        assert!(index.at_point(BufferPosition::new(3, 6)).is_empty());
    }

    #[test]
    fn query_near_the_tail_still_finds_long_intervals() {
        let mut index = AnnotationIndex::new();
        let long = index.add(span(0, 0, 100, 0), "long").unwrap();
        index.add(span(1, 0, 1, 2), "short").unwrap();
        // The lower bound backs up by the longest stored span, so the
        // old interval is found without walking from the beginning.
        let hits = index.query(span(50, 0, 50, 5));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, long);
    }

    #[test]
    fn truncation_destroys_only_fully_evicted() {
        let mut index = AnnotationIndex::new();
        let gone = index.add(span(0, 0, 1, 0), "gone").unwrap();
        let clamped = index.add(span(0, 0, 3, 2), "clamped").unwrap();
        let kept = index.add(span(5, 1, 6, 0), "kept").unwrap();
        index.truncate_before(1);
        assert!(index.get(gone).is_none());
        assert_eq!(
            index.get(clamped).unwrap().interval.start,
            BufferPosition::new(1, 0)
        );
        assert_eq!(index.get(kept).unwrap().interval, span(5, 1, 6, 0));
    }

    #[test]
    fn empty_intervals_are_rejected() {
        let mut index = AnnotationIndex::new();
        assert!(index
            .add(span(1, 2, 1, 2), "empty")
            .is_none());
    }
}
