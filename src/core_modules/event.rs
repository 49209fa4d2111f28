// THEORY:
// The `event` module holds the single data container the whole engine produces:
// the `EventInterval`. Where a `SemanticEntity` is a snapshot of *who*, an
// `EventInterval` is the record of *what happened between whom, and when*.
//
// Key architectural principles:
// 1.  **One Lifecycle**: An interval is created open (no end), is mutated only by
//     the monitor that opened it, and is closed exactly once. A second `finish`
//     or an end before the start is an `EventError`, not a silent overwrite.
// 2.  **Deterministic Matching**: Each interval carries the symmetric `pair_key` of
//     its first two participants, which is what monitors use to find the open
//     interval an end-signal belongs to.
// 3.  **Sink Boundary**: Monitors never know who consumes their output. They
//     publish through the `EventSink` trait, which the aggregator implements and
//     tests replace with a plain `Vec`.

use crate::core_modules::entity::{EntityKey, SemanticEntity};
use crate::core_modules::error::EventError;
use crate::core_modules::ids::{new_event_id, pair_key};
use serde::Serialize;

/// The kinds of symbolic events the engine detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Grasp,
    Contact,
    SupportedBy,
    Reach,
    PreGrasp,
    PickUp,
    Slide,
    Transport,
    PutDown,
}

/// A time-bounded occurrence between one or more entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventInterval {
    pub id: String,
    pub kind: EventKind,
    pub start: f64,
    end: Option<f64>,
    /// Ordered participants, typically `[self, other]`.
    pub participants: Vec<SemanticEntity>,
    pub pair_key: u64,
    /// Grasp type reported by the manipulator, only set on grasp events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grasp_type: Option<String>,
}

impl EventInterval {
    /// Opens a new interval with a fresh id.
    pub fn open(kind: EventKind, start: f64, participants: Vec<SemanticEntity>) -> Self {
        let pair_key = match participants.as_slice() {
            [] => 0,
            [only] => pair_key(only.object_id, only.object_id),
            [first, second, ..] => pair_key(first.object_id, second.object_id),
        };
        Self {
            id: new_event_id(),
            kind,
            start,
            end: None,
            participants,
            pair_key,
            grasp_type: None,
        }
    }

    /// Builds an already closed interval between `self_entity` and `other`.
    pub fn closed(
        kind: EventKind,
        self_entity: &SemanticEntity,
        other: &SemanticEntity,
        start: f64,
        end: f64,
    ) -> Result<Self, EventError> {
        let mut event = Self::open(kind, start, vec![self_entity.clone(), other.clone()]);
        event.finish(end)?;
        Ok(event)
    }

    pub fn with_grasp_type(mut self, grasp_type: &str) -> Self {
        self.grasp_type = Some(grasp_type.to_string());
        self
    }

    /// Sets the end time. Fails if the interval is already closed or `end < start`.
    pub fn finish(&mut self, end: f64) -> Result<(), EventError> {
        if self.end.is_some() {
            return Err(EventError::AlreadyFinished {
                id: self.id.clone(),
                kind: self.kind,
            });
        }
        if end < self.start {
            return Err(EventError::EndBeforeStart {
                id: self.id.clone(),
                kind: self.kind,
                start: self.start,
                end,
            });
        }
        self.end = Some(end);
        Ok(())
    }

    pub fn end(&self) -> Option<f64> {
        self.end
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn duration(&self) -> Option<f64> {
        self.end.map(|end| end - self.start)
    }

    /// The second participant, the "other" side of a relationship.
    pub fn other(&self) -> Option<&SemanticEntity> {
        self.participants.get(1)
    }

    pub fn involves(&self, key: EntityKey) -> bool {
        self.participants.iter().any(|p| p.key == key)
    }
}

/// True if an interval `[start, end]` is strictly longer than `min_duration`.
/// Zero-length and inverted intervals never pass, whatever the minimum.
pub fn exceeds_min_duration(start: f64, end: f64, min_duration: f64) -> bool {
    let duration = end - start;
    duration > 0.0 && duration > min_duration
}

/// Receiver of finished intervals.
pub trait EventSink {
    fn publish(&mut self, event: EventInterval);
}

impl EventSink for Vec<EventInterval> {
    fn publish(&mut self, event: EventInterval) {
        self.push(event);
    }
}
