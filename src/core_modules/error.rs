use thiserror::Error;

use crate::core_modules::event::EventKind;

/// Misuse of a single event interval.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error("{kind:?} event {id} is already finished")]
    AlreadyFinished { id: String, kind: EventKind },
    #[error("{kind:?} event {id} cannot end at {end} before its start at {start}")]
    EndBeforeStart {
        id: String,
        kind: EventKind,
        start: f64,
        end: f64,
    },
}

/// Failures of the entity registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("an entity with id '{0}' is already registered")]
    DuplicateId(String),
    #[error("entity id must not be empty")]
    EmptyId,
}

/// Rejections from the event log aggregator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LogError {
    #[error("event log has not been started")]
    NotStarted,
    #[error("event log is already finished")]
    AlreadyFinished,
    #[error("event {0} has no end time")]
    Unfinished(String),
    #[error("event {id} ends at {end} before it starts at {start}")]
    EndBeforeStart { id: String, start: f64, end: f64 },
    #[error("an event with id {0} was already logged")]
    DuplicateId(String),
    #[error("no pending event with id {0}")]
    UnknownPending(String),
    #[error(transparent)]
    Event(#[from] EventError),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} must be positive (got {value})")]
    NonPositive { field: &'static str, value: f64 },
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: f64 },
    #[error("{min_field} ({min}) must not exceed {max_field} ({max})")]
    InvertedRange {
        min_field: &'static str,
        min: f64,
        max_field: &'static str,
        max: f64,
    },
}
