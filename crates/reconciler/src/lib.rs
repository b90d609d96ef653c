//! Deterministic view state built from the worker's push events.
//!
//! Collections are mutated only through upserts, appends, snapshots and
//! clears. Every derived view is recomputed from the current contents on each
//! query, so the result never depends on the order in which records arrived.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use shared::{
    domain::{Entity, LlmExchange, TimelineEvent, TranscriptLine},
    protocol::WorkerEvent,
};
use tracing::debug;

mod collation;

pub use collation::locale_cmp;

/// Predicate applied to the sorted entity view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntityFilter {
    #[default]
    All,
    Kind(String),
}

impl EntityFilter {
    /// `"all"` (any case) or an empty string selects everything.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            EntityFilter::All
        } else {
            EntityFilter::Kind(raw.to_string())
        }
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            EntityFilter::All => true,
            EntityFilter::Kind(kind) => entity.kind == *kind,
        }
    }
}

/// What a single ingested event did to the view state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Status(String),
    EntitiesReplaced { count: usize },
    EntityUpserted { name: String, inserted: bool },
    EntitiesCleared,
    TranscriptReplaced { count: usize },
    TranscriptAppended { highlighted: Option<String> },
    TranscriptCleared,
    TimelineReplaced { count: usize },
    TimelineUpserted { name: String, inserted: bool },
    LlmExchangeRecorded,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    entities: IndexMap<String, Entity>,
    timeline: IndexMap<String, TimelineEvent>,
    transcript: Vec<TranscriptLine>,
    llm_log: Vec<LlmExchange>,
    filter: EntityFilter,
    highlighted: Option<String>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, event: WorkerEvent, received_at: DateTime<Utc>) -> Change {
        match event {
            WorkerEvent::Status { message } => Change::Status(message),
            WorkerEvent::InitialCheatSheet(entities) => {
                let count = self.replace_entities(entities);
                debug!(count, "reconciler: cheat sheet snapshot applied");
                Change::EntitiesReplaced { count }
            }
            WorkerEvent::UpdateCheatSheet(entity) => {
                let name = entity.name.clone();
                let inserted = self.apply_entity(entity);
                Change::EntityUpserted { name, inserted }
            }
            WorkerEvent::ClearCheatSheet => {
                self.clear_entities();
                Change::EntitiesCleared
            }
            WorkerEvent::InitialTranscript { history } => {
                let count = self.replace_transcript(history, received_at);
                debug!(count, "reconciler: transcript snapshot applied");
                Change::TranscriptReplaced { count }
            }
            WorkerEvent::NewTranscript { text } => {
                let highlighted = self.append_transcript(text, received_at).map(str::to_string);
                Change::TranscriptAppended { highlighted }
            }
            WorkerEvent::ClearTranscript => {
                self.clear_transcript();
                Change::TranscriptCleared
            }
            WorkerEvent::InitialTimelineData(events) => {
                let count = self.replace_timeline(events);
                debug!(count, "reconciler: timeline snapshot applied");
                Change::TimelineReplaced { count }
            }
            WorkerEvent::UpdateTimelineEvent(event) => {
                let name = event.name.clone();
                let inserted = self.apply_timeline_event(event);
                Change::TimelineUpserted { name, inserted }
            }
            WorkerEvent::LlmCommunication { prompt, response } => {
                self.llm_log.push(LlmExchange {
                    prompt,
                    response,
                    received_at,
                });
                Change::LlmExchangeRecorded
            }
        }
    }

    /// Upserts by name. Returns `true` if the name was new.
    pub fn apply_entity(&mut self, entity: Entity) -> bool {
        self.entities.insert(entity.name.clone(), entity).is_none()
    }

    /// Wholesale replace: afterwards the collection holds exactly `entities`
    /// (later duplicates of a name win).
    pub fn replace_entities(&mut self, entities: Vec<Entity>) -> usize {
        self.entities.clear();
        for entity in entities {
            self.apply_entity(entity);
        }
        self.drop_stale_highlight();
        self.entities.len()
    }

    pub fn clear_entities(&mut self) {
        self.entities.clear();
        self.highlighted = None;
    }

    pub fn apply_timeline_event(&mut self, event: TimelineEvent) -> bool {
        self.timeline.insert(event.name.clone(), event).is_none()
    }

    pub fn replace_timeline(&mut self, events: Vec<TimelineEvent>) -> usize {
        self.timeline.clear();
        for event in events {
            self.apply_timeline_event(event);
        }
        self.timeline.len()
    }

    /// Appends a line and re-evaluates the highlight against it. Returns the
    /// highlighted entity name, if any.
    pub fn append_transcript(
        &mut self,
        text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Option<&str> {
        let text = text.into();
        self.highlighted = self.first_mentioned_entity(&text);
        self.transcript.push(TranscriptLine { text, received_at });
        self.highlighted.as_deref()
    }

    pub fn replace_transcript(
        &mut self,
        history: Vec<String>,
        received_at: DateTime<Utc>,
    ) -> usize {
        self.transcript = history
            .into_iter()
            .map(|text| TranscriptLine { text, received_at })
            .collect();
        self.transcript.len()
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
    }

    pub fn set_filter(&mut self, filter: EntityFilter) {
        self.filter = filter;
    }

    pub fn filter(&self) -> &EntityFilter {
        &self.filter
    }

    /// Every entity sorted by name, ignoring the filter.
    pub fn sorted_entities(&self) -> Vec<&Entity> {
        let mut sorted: Vec<&Entity> = self.entities.values().collect();
        sorted.sort_by(|a, b| locale_cmp(&a.name, &b.name));
        sorted
    }

    /// Sorted by name, then filtered by the current predicate.
    pub fn entity_view(&self) -> Vec<&Entity> {
        self.sorted_entities()
            .into_iter()
            .filter(|entity| self.filter.matches(entity))
            .collect()
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    /// Distinct categories currently present, sorted.
    pub fn entity_types(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.entities.values().map(|e| e.kind.as_str()).collect();
        kinds.sort_by(|a, b| locale_cmp(a, b));
        kinds.dedup();
        kinds
    }

    /// Dated events ascending by their date string, then undated events in
    /// first-insertion order.
    pub fn timeline_view(&self) -> Vec<&TimelineEvent> {
        let mut sorted: Vec<&TimelineEvent> = self.timeline.values().collect();
        sorted.sort_by(|a, b| match (a.sort_date(), b.sort_date()) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        sorted
    }

    pub fn transcript(&self) -> &[TranscriptLine] {
        &self.transcript
    }

    pub fn llm_log(&self) -> &[LlmExchange] {
        &self.llm_log
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.highlighted.as_deref()
    }

    /// Session reset: every collection, the highlight and the LLM log.
    pub fn reset(&mut self) {
        self.entities.clear();
        self.timeline.clear();
        self.transcript.clear();
        self.llm_log.clear();
        self.highlighted = None;
    }

    fn first_mentioned_entity(&self, line: &str) -> Option<String> {
        let line = line.to_lowercase();
        self.sorted_entities()
            .into_iter()
            .find(|entity| !entity.name.is_empty() && line.contains(&entity.name.to_lowercase()))
            .map(|entity| entity.name.clone())
    }

    fn drop_stale_highlight(&mut self) {
        if let Some(name) = &self.highlighted {
            if !self.entities.contains_key(name) {
                self.highlighted = None;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
