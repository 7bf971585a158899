//! Query, filter, and paging types shared by all store implementations.

use serde::{Deserialize, Serialize};

use chronicle_core::{AuditEvent, EventId, EventType, Severity};

/// An inclusive time window over event timestamps (Unix ms).
///
/// An unset bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    /// The unbounded range.
    pub const ALL: Self = Self {
        start: None,
        end: None,
    };

    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Organization-wide event filter.
///
/// Empty lists match everything. Within a list any value may match; across
/// fields all conditions must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    /// Acting users. `"system"` matches system-initiated events.
    pub user_ids: Vec<String>,
    pub event_types: Vec<EventType>,
    pub severities: Vec<Severity>,
    pub resource_types: Vec<String>,
    pub time_range: TimeRange,

    /// Case-insensitive (ASCII) substring searched in the action, resource,
    /// resource id, resource type, and actor.
    pub text: Option<String>,

    /// Only events that come after this position in newest-first order.
    /// Listings resume from the last event they saw, so events appended in
    /// the meantime cannot shift later pages.
    pub before: Option<EventCursor>,
}

/// A position in the newest-first event order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCursor {
    pub timestamp: i64,
    pub sequence: u64,
    pub id: EventId,
}

impl EventCursor {
    /// The position of `event`.
    pub fn at(event: &AuditEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            sequence: event.sequence,
            id: event.id,
        }
    }

    /// Whether `event` is strictly older than this position.
    pub fn admits(&self, event: &AuditEvent) -> bool {
        (event.timestamp, event.sequence, event.id) < (self.timestamp, self.sequence, self.id)
    }
}

impl EventFilter {
    /// A filter that matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether the event satisfies every condition.
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if !self.user_ids.is_empty() && !self.user_ids.iter().any(|u| u == event.actor()) {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if !self.severities.is_empty() && !self.severities.contains(&event.severity) {
            return false;
        }
        if !self.resource_types.is_empty() {
            match &event.resource_type {
                Some(rt) if self.resource_types.contains(rt) => {}
                _ => return false,
            }
        }
        if !self.time_range.contains(event.timestamp) {
            return false;
        }
        if self.before.is_some_and(|cursor| !cursor.admits(event)) {
            return false;
        }
        if let Some(needle) = self.text_needle() {
            let hit = [
                Some(event.action.as_str()),
                Some(event.resource.as_str()),
                event.resource_id.as_deref(),
                event.resource_type.as_deref(),
                Some(event.actor()),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_ascii_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }

    /// The lowercased search text, if any non-empty text was given.
    pub fn text_needle(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_ascii_lowercase)
    }
}

/// Offset-based page request for organization queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u32,
}

impl PageRequest {
    /// Largest page a store will return.
    pub const MAX_LIMIT: u32 = 1000;

    pub const DEFAULT_LIMIT: u32 = 50;

    pub fn new(offset: u64, limit: u32) -> Self {
        Self { offset, limit }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(0, limit)
    }

    /// The limit clamped to `1..=MAX_LIMIT`.
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }

    /// The request for the following page.
    pub fn next(&self) -> Self {
        Self::new(self.offset + u64::from(self.effective_limit()), self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(Self::DEFAULT_LIMIT)
    }
}

/// One page of results, with the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u32,
}

impl<T> Page<T> {
    /// Whether more matches exist past this page.
    pub fn has_more(&self) -> bool {
        self.offset + (self.items.len() as u64) < self.total
    }
}

/// Resumption point within a chain scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainCursor {
    /// From the first event.
    #[default]
    Start,

    /// Strictly after the event with this sequence number.
    After(u64),
}

impl ChainCursor {
    /// The smallest sequence number this cursor admits, or `None` when
    /// nothing can follow it.
    pub fn first_sequence(&self) -> Option<u64> {
        match self {
            ChainCursor::Start => Some(0),
            ChainCursor::After(seq) => seq.checked_add(1),
        }
    }
}

/// One page of a chain scan, in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainPage {
    pub events: Vec<AuditEvent>,

    /// Where to continue; `None` when the chain is exhausted.
    pub next: Option<ChainCursor>,
}

impl ChainPage {
    /// Build a page, setting `next` only when the page came back full and
    /// its last sequence can still be followed.
    pub fn from_events(events: Vec<AuditEvent>, limit: u32) -> Self {
        let next = match events.last() {
            Some(last) if events.len() as u64 >= u64::from(limit) && last.sequence < u64::MAX => {
                Some(ChainCursor::After(last.sequence))
            }
            _ => None,
        };
        Self { events, next }
    }
}

/// Order events newest first: timestamp, then sequence, then id, descending.
pub(crate) fn newest_first(a: &AuditEvent, b: &AuditEvent) -> std::cmp::Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then(b.sequence.cmp(&a.sequence))
        .then(b.id.cmp(&a.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::{ChainKey, EventBuilder};
    use proptest::prelude::*;

    fn event() -> AuditEvent {
        EventBuilder::new(
            ChainKey::new("org", "corr", EventType::DataModification),
            "req",
            "Update",
            "Invoice",
        )
        .user(Some("alice".into()))
        .resource_id(Some("INV-42".into()))
        .resource_type(Some("billing".into()))
        .timestamp(5_000)
        .seal()
        .unwrap()
    }

    #[test]
    fn test_empty_filter_matches() {
        assert!(EventFilter::all().matches(&event()));
    }

    #[test]
    fn test_user_filter() {
        let mut f = EventFilter::all();
        f.user_ids = vec!["bob".into()];
        assert!(!f.matches(&event()));
        f.user_ids.push("alice".into());
        assert!(f.matches(&event()));
    }

    #[test]
    fn test_system_user_filter() {
        let mut e = event();
        e.user_id = None;
        let f = EventFilter {
            user_ids: vec!["system".into()],
            ..Default::default()
        };
        assert!(f.matches(&e));
    }

    #[test]
    fn test_type_and_severity_filters() {
        let f = EventFilter {
            event_types: vec![EventType::DataModification],
            severities: vec![Severity::Medium],
            ..Default::default()
        };
        assert!(f.matches(&event()));

        let f = EventFilter {
            severities: vec![Severity::High, Severity::Critical],
            ..Default::default()
        };
        assert!(!f.matches(&event()));
    }

    #[test]
    fn test_resource_type_filter_requires_value() {
        let f = EventFilter {
            resource_types: vec!["billing".into()],
            ..Default::default()
        };
        assert!(f.matches(&event()));
        let mut e = event();
        e.resource_type = None;
        assert!(!f.matches(&e));
    }

    #[test]
    fn test_time_range_inclusive() {
        let e = event();
        for (range, expect) in [
            (TimeRange::new(Some(5_000), None), true),
            (TimeRange::new(None, Some(5_000)), true),
            (TimeRange::new(Some(5_001), None), false),
            (TimeRange::new(None, Some(4_999)), false),
        ] {
            let f = EventFilter {
                time_range: range,
                ..Default::default()
            };
            assert_eq!(f.matches(&e), expect, "{range:?}");
        }
    }

    #[test]
    fn test_text_search_case_insensitive() {
        let hit = |t: &str| {
            EventFilter {
                text: Some(t.into()),
                ..Default::default()
            }
            .matches(&event())
        };
        assert!(hit("invoice"));
        assert!(hit("inv-4"));
        assert!(hit("ALICE"));
        assert!(hit("   "));
        assert!(!hit("payroll"));
    }

    #[test]
    fn test_page_has_more() {
        let page = Page {
            items: vec![1, 2],
            total: 5,
            offset: 0,
            limit: 2,
        };
        assert!(page.has_more());
        let last = Page {
            items: vec![5],
            total: 5,
            offset: 4,
            limit: 2,
        };
        assert!(!last.has_more());
    }

    #[test]
    fn test_cursor_follows_newest_first_order() {
        let key = ChainKey::new("org", "corr", EventType::DataAccess);
        let event = |ts, sequence| {
            let mut event = EventBuilder::new(key.clone(), "r", "read", "doc")
                .timestamp(ts)
                .seal()
                .unwrap();
            event.sequence = sequence;
            event
        };
        let mut events = vec![event(10, 0), event(20, 1), event(20, 2), event(30, 3), event(20, 2)];
        events.sort_by(newest_first);

        for (i, at) in events.iter().enumerate() {
            let filter = EventFilter {
                before: Some(EventCursor::at(at)),
                ..Default::default()
            };
            let rest: Vec<_> = events.iter().filter(|e| filter.matches(e)).collect();
            let expected: Vec<_> = events[i + 1..].iter().collect();
            assert_eq!(rest, expected, "after position {i}");
        }
    }

    #[test]
    fn test_page_request_clamps() {
        assert_eq!(PageRequest::first(0).effective_limit(), 1);
        assert_eq!(PageRequest::first(50_000).effective_limit(), PageRequest::MAX_LIMIT);
        assert_eq!(PageRequest::new(10, 5).next(), PageRequest::new(15, 5));
    }

    #[test]
    fn test_cursor_first_sequence() {
        assert_eq!(ChainCursor::Start.first_sequence(), Some(0));
        assert_eq!(ChainCursor::After(4).first_sequence(), Some(5));
        assert_eq!(ChainCursor::After(u64::MAX).first_sequence(), None);
    }

    #[test]
    fn test_page_ending_at_max_sequence_has_no_next() {
        let event = |sequence| {
            let mut event = EventBuilder::new(
                ChainKey::new("org-1", "req-1", EventType::DataAccess),
                "req-1",
                "read",
                "doc",
            )
            .timestamp(1_000)
            .seal()
            .unwrap();
            event.sequence = sequence;
            event
        };

        let page = ChainPage::from_events(vec![event(3), event(4)], 2);
        assert_eq!(page.next, Some(ChainCursor::After(4)));

        let page = ChainPage::from_events(vec![event(3), event(u64::MAX)], 2);
        assert_eq!(page.next, None);
    }

    proptest! {
        #[test]
        fn prop_time_range_contains(start in -1000i64..1000, len in 0i64..1000, ts in -3000i64..3000) {
            let range = TimeRange::new(Some(start), Some(start + len));
            prop_assert_eq!(range.contains(ts), ts >= start && ts <= start + len);
            prop_assert!(TimeRange::ALL.contains(ts));
        }
    }
}
