// THEORY:
// This file is the main entry point for the `semlog_events` library crate.
// It exposes the `SemanticLogger` (and its async driver, `EpisodeRunner`) as the
// high-level interface of the event engine: feed it simulation signals and
// poses, get back a finished `Episode` of symbolic events.
//
// The behavioural monitors (`core_modules`) are public for callers that want to
// drive a single monitor directly, but the intended entry point is `pipeline`.

pub mod core_modules;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod telemetry;
