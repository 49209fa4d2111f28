// THEORY:
// The `EventLog` is the last stop of every interval. Monitors publish finished
// intervals into it through `EventSink`; external callers may also open and
// close intervals of their own. It enforces the well-formedness rules of the
// episode and, once finished, hands the frozen `Episode` to an `EpisodeWriter`.
//
// Key architectural principles:
// 1.  **Disjoint Stores**: An interval is either pending (started here, still
//     open) or finished, never both. Finishing moves it from one to the other.
// 2.  **Validate At The Door**: Unfinished, inverted and duplicate-id intervals
//     are rejected with a `LogError` and never stored.
// 3.  **Single Close**: `finish` closes whatever is still pending at the episode
//     end and freezes the log. A second `finish` is an error, not a second
//     episode.

use crate::core_modules::error::LogError;
use crate::core_modules::event::{EventInterval, EventKind, EventSink};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A frozen, complete episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub episode_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub events: Vec<EventInterval>,
}

impl Episode {
    pub fn events_of(&self, kind: EventKind) -> impl Iterator<Item = &EventInterval> {
        self.events.iter().filter(move |e| e.kind == kind)
    }
}

/// Final destination of a finished episode.
pub trait EpisodeWriter {
    type Error;

    fn write(&mut self, episode: &Episode) -> Result<(), Self::Error>;
}

/// Keeps written episodes in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    pub episodes: Vec<Episode>,
}

impl EpisodeWriter for MemoryWriter {
    type Error = std::convert::Infallible;

    fn write(&mut self, episode: &Episode) -> Result<(), Self::Error> {
        self.episodes.push(episode.clone());
        Ok(())
    }
}

#[derive(Debug)]
pub struct EventLog {
    episode_id: String,
    start_time: f64,
    is_started: bool,
    is_finished: bool,
    pending: Vec<EventInterval>,
    finished: Vec<EventInterval>,
    known_ids: HashSet<String>,
}

impl EventLog {
    pub fn new(episode_id: impl Into<String>) -> Self {
        Self {
            episode_id: episode_id.into(),
            start_time: 0.0,
            is_started: false,
            is_finished: false,
            pending: Vec::new(),
            finished: Vec::new(),
            known_ids: HashSet::new(),
        }
    }

    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    pub fn start(&mut self, episode_start_time: f64) -> Result<(), LogError> {
        if self.is_finished {
            return Err(LogError::AlreadyFinished);
        }
        if !self.is_started {
            self.start_time = episode_start_time;
            self.is_started = true;
            info!(episode = %self.episode_id, start = episode_start_time, "episode started");
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    fn ensure_open(&self) -> Result<(), LogError> {
        if self.is_finished {
            Err(LogError::AlreadyFinished)
        } else if !self.is_started {
            Err(LogError::NotStarted)
        } else {
            Ok(())
        }
    }

    fn check_new_id(&self, event: &EventInterval) -> Result<(), LogError> {
        if self.known_ids.contains(&event.id) {
            Err(LogError::DuplicateId(event.id.clone()))
        } else {
            Ok(())
        }
    }

    /// Stores an interval that is already closed.
    pub fn insert_finished_event(&mut self, event: EventInterval) -> Result<(), LogError> {
        self.ensure_open()?;
        let Some(end) = event.end() else {
            return Err(LogError::Unfinished(event.id));
        };
        if end < event.start {
            return Err(LogError::EndBeforeStart {
                id: event.id,
                start: event.start,
                end,
            });
        }
        self.check_new_id(&event)?;
        self.known_ids.insert(event.id.clone());
        self.finished.push(event);
        Ok(())
    }

    /// Registers an open interval to be finished later by id.
    pub fn start_event(&mut self, event: EventInterval) -> Result<(), LogError> {
        self.ensure_open()?;
        if !event.is_open() {
            return self.insert_finished_event(event);
        }
        self.check_new_id(&event)?;
        self.known_ids.insert(event.id.clone());
        self.pending.push(event);
        Ok(())
    }

    /// Closes a pending interval and moves it to the finished store.
    pub fn finish_event(&mut self, id: &str, end_time: f64) -> Result<(), LogError> {
        self.ensure_open()?;
        let idx = self
            .pending
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| LogError::UnknownPending(id.to_string()))?;
        self.pending[idx].finish(end_time)?;
        let event = self.pending.remove(idx);
        self.finished.push(event);
        Ok(())
    }

    /// Closes all pending intervals at `episode_end_time` and freezes the log.
    pub fn finish(&mut self, episode_end_time: f64) -> Result<Episode, LogError> {
        self.ensure_open()?;
        for mut event in std::mem::take(&mut self.pending) {
            let end = episode_end_time.max(event.start);
            match event.finish(end) {
                Ok(()) => self.finished.push(event),
                Err(err) => warn!(%err, "dropping pending event at episode end"),
            }
        }
        self.is_finished = true;
        info!(
            episode = %self.episode_id,
            end = episode_end_time,
            events = self.finished.len(),
            "episode finished"
        );
        Ok(Episode {
            episode_id: self.episode_id.clone(),
            start_time: self.start_time,
            end_time: episode_end_time,
            events: self.finished.clone(),
        })
    }

    pub fn finished_events(&self) -> &[EventInterval] {
        &self.finished
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl EventSink for EventLog {
    fn publish(&mut self, event: EventInterval) {
        let (id, kind) = (event.id.clone(), event.kind);
        match self.insert_finished_event(event) {
            Ok(()) => debug!(%id, ?kind, "event logged"),
            Err(err) => warn!(%err, %id, ?kind, "event rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::entity::{EntityRegistry, SemanticEntity};

    fn entities() -> (SemanticEntity, SemanticEntity) {
        let mut registry = EntityRegistry::new();
        let a = registry.register("hand", "Hand").unwrap();
        let b = registry.register("cup", "Cup").unwrap();
        (registry.get(a).unwrap().clone(), registry.get(b).unwrap().clone())
    }

    fn started() -> EventLog {
        let mut log = EventLog::new("episode-1");
        log.start(0.0).unwrap();
        log
    }

    #[test]
    fn finished_events_are_stored_once() {
        let (hand, cup) = entities();
        let mut log = started();
        let event = EventInterval::closed(EventKind::Grasp, &hand, &cup, 1.0, 2.0).unwrap();
        let id = event.id.clone();
        log.insert_finished_event(event.clone()).unwrap();
        assert_eq!(log.insert_finished_event(event), Err(LogError::DuplicateId(id)));
        assert_eq!(log.finished_events().len(), 1);
    }

    #[test]
    fn open_events_cannot_be_inserted_as_finished() {
        let (hand, cup) = entities();
        let mut log = started();
        let event = EventInterval::open(EventKind::Contact, 1.0, vec![hand, cup]);
        assert!(matches!(log.insert_finished_event(event), Err(LogError::Unfinished(_))));
    }

    #[test]
    fn events_are_rejected_outside_the_episode() {
        let (hand, cup) = entities();
        let mut log = EventLog::new("episode-2");
        let event = EventInterval::closed(EventKind::Contact, &hand, &cup, 1.0, 2.0).unwrap();
        assert_eq!(log.insert_finished_event(event.clone()), Err(LogError::NotStarted));
        log.start(0.0).unwrap();
        log.finish(5.0).unwrap();
        assert_eq!(log.insert_finished_event(event), Err(LogError::AlreadyFinished));
        assert_eq!(log.finish(6.0), Err(LogError::AlreadyFinished));
    }

    #[test]
    fn pending_events_move_to_finished() {
        let (hand, cup) = entities();
        let mut log = started();
        let manual = EventInterval::open(EventKind::Transport, 1.0, vec![hand.clone(), cup.clone()]);
        let manual_id = manual.id.clone();
        log.start_event(manual).unwrap();
        let dangling = EventInterval::open(EventKind::Slide, 2.0, vec![hand, cup]);
        log.start_event(dangling).unwrap();

        log.finish_event(&manual_id, 3.0).unwrap();
        assert_eq!(log.finish_event(&manual_id, 4.0), Err(LogError::UnknownPending(manual_id)));
        assert_eq!(log.pending_count(), 1);

        let episode = log.finish(10.0).unwrap();
        assert_eq!(log.pending_count(), 0);
        assert_eq!(episode.events.len(), 2);
        assert_eq!(episode.events_of(EventKind::Slide).next().unwrap().end(), Some(10.0));
    }

    #[test]
    fn memory_writer_keeps_the_episode() {
        let mut log = started();
        let episode = log.finish(1.0).unwrap();
        let mut writer = MemoryWriter::default();
        writer.write(&episode).unwrap();
        assert_eq!(writer.episodes, vec![episode]);
    }
}
