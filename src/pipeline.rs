// THEORY:
// The `pipeline` module is the top-level API of the event engine. The
// `SemanticLogger` owns every piece of state (the entity registry, one contact
// monitor per annotated object, one set of listeners per manipulator, and the
// event log) and routes each inbound signal to the monitors that care about it.
//
// Key architectural principles:
// 1.  **Single Owner**: Nothing is shared. Monitors borrow the registry for the
//     duration of one call and publish into the log through `EventSink`, so the
//     whole engine is driven by plain `&mut self` calls from one thread.
// 2.  **Time Flows Forward**: Before a signal is handled, every monitor's timers
//     are advanced to the signal's timestamp. Periodic work therefore always
//     runs with the state that was true at that moment.
// 3.  **Report Per Call**: Each call returns a `Report`, either `Quiet` or the
//     events that became final during that call, so streaming consumers never
//     have to diff the log.

use crate::core_modules::config::{LoggingToggles, SemLogConfig};
use crate::core_modules::contact_shape::ContactShapeMonitor;
use crate::core_modules::error::{ConfigError, LogError, RegistryError};
use crate::core_modules::event::EventSink;
use crate::core_modules::event_log::EventLog;
use crate::core_modules::grasp::GraspEventHandler;
use crate::core_modules::ids::new_event_id;
use crate::core_modules::pick_and_place::{PapState, PickAndPlaceListener, SupportQuery};
use crate::core_modules::reach::ReachListener;
use glam::DVec3;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::entity::{EntityKey, EntityRegistry, Pose, SemanticEntity};
pub use crate::core_modules::event::{EventInterval, EventKind};
pub use crate::core_modules::event_log::{Episode, EpisodeWriter};
pub use crate::core_modules::signal::Signal;

/// The output of one `SemanticLogger` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Quiet,
    EventsPublished(Vec<EventInterval>),
}

impl Report {
    fn from_events(events: Vec<EventInterval>) -> Self {
        if events.is_empty() {
            Report::Quiet
        } else {
            Report::EventsPublished(events)
        }
    }

    pub fn events(&self) -> &[EventInterval] {
        match self {
            Report::Quiet => &[],
            Report::EventsPublished(events) => events,
        }
    }

    pub fn into_events(self) -> Vec<EventInterval> {
        match self {
            Report::Quiet => Vec::new(),
            Report::EventsPublished(events) => events,
        }
    }
}

/// Forwards into the event log and remembers what was accepted.
struct Recorder<'a> {
    log: &'a mut EventLog,
    published: Vec<EventInterval>,
}

impl<'a> Recorder<'a> {
    fn new(log: &'a mut EventLog) -> Self {
        Self {
            log,
            published: Vec::new(),
        }
    }
}

impl EventSink for Recorder<'_> {
    fn publish(&mut self, event: EventInterval) {
        match self.log.insert_finished_event(event.clone()) {
            Ok(()) => {
                debug!(id = %event.id, kind = ?event.kind, start = event.start, end = ?event.end(), "event published");
                self.published.push(event);
            }
            Err(err) => warn!(%err, kind = ?event.kind, "event rejected by the log"),
        }
    }
}

impl SupportQuery for BTreeMap<EntityKey, ContactShapeMonitor> {
    fn is_supported_by_something(&self, key: EntityKey) -> Option<bool> {
        self.get(&key).map(ContactShapeMonitor::is_supported_by_something)
    }

    fn last_supported_by_end_time(&self, key: EntityKey) -> Option<f64> {
        self.get(&key).and_then(ContactShapeMonitor::last_supported_by_end_time)
    }
}

/// The listeners attached to one manipulator.
struct Manipulator {
    grasp: GraspEventHandler,
    reach: ReachListener,
    pick_and_place: PickAndPlaceListener,
}

impl Manipulator {
    fn new(config: &SemLogConfig, owner: &SemanticEntity) -> Self {
        let mut grasp = GraspEventHandler::new(config.grasp.clone());
        let mut reach = ReachListener::new(config.reach.clone());
        let mut pick_and_place = PickAndPlaceListener::new(config.pick_and_place.clone());
        grasp.init(owner);
        reach.init(owner);
        pick_and_place.init(owner);
        Self {
            grasp,
            reach,
            pick_and_place,
        }
    }

    fn start(&mut self, now: f64, overlapping: &[EntityKey], registry: &EntityRegistry, toggles: &LoggingToggles) {
        if toggles.log_grasp {
            self.grasp.start();
        }
        if toggles.log_reach {
            self.reach.start(now, overlapping, registry);
        }
        if toggles.log_pick_and_place {
            self.pick_and_place.start(now);
        }
    }

    fn finish(&mut self, now: f64, registry: &EntityRegistry, sink: &mut dyn EventSink) {
        self.grasp.finish(now, true, sink);
        self.reach.finish(now, true);
        self.pick_and_place.finish(now, true, registry, sink);
    }

    fn on_entity_destroyed(&mut self, key: EntityKey, time: f64, registry: &EntityRegistry, sink: &mut dyn EventSink) {
        self.grasp.on_entity_destroyed(key, time, sink);
        self.reach.on_entity_destroyed(key, time);
        self.pick_and_place.on_entity_destroyed(key, time, registry, sink);
    }

    fn open_interval_count(&self) -> usize {
        let active_phase = usize::from(self.pick_and_place.state() != PapState::None);
        self.grasp.open_event_count() + active_phase
    }
}

fn overlapping_with(overlaps: &BTreeMap<EntityKey, BTreeSet<EntityKey>>, owner: EntityKey) -> Vec<EntityKey> {
    overlaps
        .get(&owner)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default()
}

/// The main, top-level struct of the event engine.
pub struct SemanticLogger {
    config: SemLogConfig,
    registry: EntityRegistry,
    contact_shapes: BTreeMap<EntityKey, ContactShapeMonitor>,
    manipulators: BTreeMap<EntityKey, Manipulator>,
    /// Raw overlap state per shape owner, kept to replay initial overlaps.
    overlaps: BTreeMap<EntityKey, BTreeSet<EntityKey>>,
    event_log: EventLog,
    now: f64,
    is_started: bool,
    episode: Option<Episode>,
}

impl SemanticLogger {
    pub fn new(config: SemLogConfig) -> Result<Self, ConfigError> {
        Self::with_episode_id(config, new_event_id())
    }

    pub fn with_episode_id(config: SemLogConfig, episode_id: impl Into<String>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            registry: EntityRegistry::new(),
            contact_shapes: BTreeMap::new(),
            manipulators: BTreeMap::new(),
            overlaps: BTreeMap::new(),
            event_log: EventLog::new(episode_id),
            now: 0.0,
            is_started: false,
            episode: None,
        })
    }

    pub fn config(&self) -> &SemLogConfig {
        &self.config
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    pub fn is_finished(&self) -> bool {
        self.episode.is_some()
    }

    // --- 1. Scene setup ---

    pub fn register_entity(&mut self, id: &str, class: &str, pose: Pose) -> Result<EntityKey, RegistryError> {
        let key = self.registry.register_at(id, class, pose)?;
        trace!(id, class, ?key, "entity registered");
        Ok(key)
    }

    pub fn set_pose(&mut self, key: EntityKey, location: DVec3, linear_velocity: DVec3) -> bool {
        self.registry.set_pose(key, location, linear_velocity)
    }

    /// Attaches a contact/support monitor to an entity. Returns false if the
    /// entity is unknown or already has one.
    pub fn add_contact_shape(&mut self, key: EntityKey) -> bool {
        let Some(entity) = self.registry.get(key) else {
            return false;
        };
        if self.contact_shapes.contains_key(&key) || self.is_finished() {
            return false;
        }
        let mut monitor = ContactShapeMonitor::new(self.config.contact.clone(), self.config.logging.log_contact);
        monitor.init(entity, self.config.logging.log_supported_by);
        if self.is_started {
            let overlapping = overlapping_with(&self.overlaps, key);
            monitor.start(self.now, &overlapping, &self.registry, &mut self.event_log);
        }
        self.contact_shapes.insert(key, monitor);
        true
    }

    /// Attaches grasp, reach and pick-and-place listeners to a manipulator.
    pub fn add_manipulator(&mut self, key: EntityKey) -> bool {
        let Some(entity) = self.registry.get(key) else {
            return false;
        };
        if self.manipulators.contains_key(&key) || self.is_finished() {
            return false;
        }
        let mut manipulator = Manipulator::new(&self.config, entity);
        if self.is_started {
            let overlapping = overlapping_with(&self.overlaps, key);
            manipulator.start(self.now, &overlapping, &self.registry, &self.config.logging);
        }
        self.manipulators.insert(key, manipulator);
        true
    }

    // --- 2. Episode lifecycle ---

    pub fn start(&mut self, now: f64) {
        if self.is_started || self.is_finished() {
            return;
        }
        if let Err(err) = self.event_log.start(now) {
            warn!(%err, "event log refused to start");
            return;
        }
        self.now = now;
        self.is_started = true;

        let Self {
            config,
            registry,
            contact_shapes,
            manipulators,
            overlaps,
            event_log,
            ..
        } = self;
        for (key, shape) in contact_shapes.iter_mut() {
            shape.start(now, &overlapping_with(overlaps, *key), registry, event_log);
        }
        for (key, manipulator) in manipulators.iter_mut() {
            manipulator.start(now, &overlapping_with(overlaps, *key), registry, &config.logging);
        }
        debug!(
            now,
            contact_shapes = contact_shapes.len(),
            manipulators = manipulators.len(),
            "semantic logger started"
        );
    }

    /// Force-finishes every monitor at `now` and freezes the log. Calling it
    /// again returns the same episode without publishing anything new.
    pub fn finish(&mut self, now: f64) -> Result<Episode, LogError> {
        if let Some(episode) = &self.episode {
            return Ok(episode.clone());
        }
        if self.is_started {
            self.advance_to(now);
        } else {
            self.event_log.start(now)?;
        }
        let end = now.max(self.now);

        let Self {
            registry,
            contact_shapes,
            manipulators,
            event_log,
            ..
        } = self;
        for manipulator in manipulators.values_mut() {
            manipulator.finish(end, registry, event_log);
        }
        for shape in contact_shapes.values_mut() {
            shape.finish(end, true, event_log);
        }
        let episode = event_log.finish(end)?;
        self.is_started = false;
        self.episode = Some(episode.clone());
        Ok(episode)
    }

    // --- 3. Signals and time ---

    /// Advances time to the signal's timestamp and routes it.
    pub fn handle_signal(&mut self, signal: Signal) -> Report {
        if !self.is_started {
            trace!(?signal, "signal outside of a running episode");
            return Report::Quiet;
        }
        let mut published = self.advance_to(signal.time());
        published.extend(self.route(signal));
        Report::from_events(published)
    }

    /// Runs every timer that is due at `now`.
    pub fn advance(&mut self, now: f64) -> Report {
        if !self.is_started {
            return Report::Quiet;
        }
        Report::from_events(self.advance_to(now))
    }

    fn advance_to(&mut self, now: f64) -> Vec<EventInterval> {
        if now < self.now {
            warn!(now, current = self.now, "time went backwards, keeping the current time");
        } else {
            self.now = now;
        }
        let now = self.now;

        let Self {
            registry,
            contact_shapes,
            manipulators,
            event_log,
            ..
        } = self;
        let mut recorder = Recorder::new(event_log);
        for shape in contact_shapes.values_mut() {
            shape.tick(now, registry, &mut recorder);
        }
        for manipulator in manipulators.values_mut() {
            manipulator.reach.tick(now, registry);
            manipulator
                .pick_and_place
                .tick(now, registry, &*contact_shapes, &mut recorder);
        }
        recorder.published
    }

    fn route(&mut self, signal: Signal) -> Vec<EventInterval> {
        let Self {
            registry,
            contact_shapes,
            manipulators,
            overlaps,
            event_log,
            ..
        } = self;
        let mut recorder = Recorder::new(event_log);

        match signal {
            Signal::ShapeOverlapBegin { owner, other, time } => {
                overlaps.entry(owner).or_default().insert(other);
                if let Some(shape) = contact_shapes.get_mut(&owner) {
                    shape.on_overlap_begin(other, time, registry, &mut recorder);
                }
                if let Some(manipulator) = manipulators.get_mut(&owner) {
                    manipulator.reach.on_overlap_begin(other, time, registry);
                }
            }
            Signal::ShapeOverlapEnd { owner, other, time } => {
                if let Some(set) = overlaps.get_mut(&owner) {
                    set.remove(&other);
                    if set.is_empty() {
                        overlaps.remove(&owner);
                    }
                }
                if let Some(shape) = contact_shapes.get_mut(&owner) {
                    shape.on_overlap_end(other, time, &mut recorder);
                }
                if let Some(manipulator) = manipulators.get_mut(&owner) {
                    manipulator.reach.on_overlap_end(other, time);
                }
            }
            Signal::ManipulatorContactBegin { owner, other, time } => {
                if let Some(manipulator) = manipulators.get_mut(&owner) {
                    manipulator.reach.on_contact_begin(other, time);
                }
            }
            Signal::ManipulatorContactEnd { owner, other, time } => {
                if let Some(manipulator) = manipulators.get_mut(&owner) {
                    manipulator.reach.on_contact_end(other, time);
                }
            }
            Signal::ManipulatorGraspBegin {
                owner,
                other,
                time,
                grasp_type,
            } => {
                let Some(manipulator) = manipulators.get_mut(&owner) else {
                    trace!(?owner, "grasp from an unknown manipulator");
                    return recorder.published;
                };
                manipulator.grasp.on_grasp_begin(other, time, &grasp_type, registry);
                if let Some(phases) = manipulator.reach.on_grasp_begin(other, time) {
                    for interval in phases.into_intervals() {
                        recorder.publish(interval);
                    }
                }
                manipulator
                    .pick_and_place
                    .on_grasp_begin(other, time, registry, &*contact_shapes);
            }
            Signal::ManipulatorGraspEnd { owner, other, time } => {
                let Some(manipulator) = manipulators.get_mut(&owner) else {
                    trace!(?owner, "grasp end from an unknown manipulator");
                    return recorder.published;
                };
                manipulator.grasp.on_grasp_end(other, time, &mut recorder);
                manipulator
                    .reach
                    .on_grasp_end(other, time, &overlapping_with(overlaps, owner), registry);
                manipulator
                    .pick_and_place
                    .on_grasp_end(other, time, registry, &mut recorder);
            }
            Signal::Tick { .. } => {}
        }
        recorder.published
    }

    // --- 4. Entity lifecycle ---

    /// Closes every interval involving `key` at `time`, detaches its monitors
    /// and removes it from the registry.
    pub fn destroy_entity(&mut self, key: EntityKey, time: f64) -> Report {
        if !self.registry.is_alive(key) {
            return Report::Quiet;
        }
        let mut published = if self.is_started {
            self.advance_to(time)
        } else {
            Vec::new()
        };
        let time = time.max(self.now);

        let Self {
            registry,
            contact_shapes,
            manipulators,
            overlaps,
            event_log,
            ..
        } = self;
        let mut recorder = Recorder::new(event_log);
        for shape in contact_shapes.values_mut() {
            shape.on_entity_destroyed(key, time, &mut recorder);
        }
        for manipulator in manipulators.values_mut() {
            manipulator.on_entity_destroyed(key, time, registry, &mut recorder);
        }
        published.append(&mut recorder.published);

        contact_shapes.remove(&key);
        manipulators.remove(&key);
        overlaps.remove(&key);
        overlaps.retain(|_, set| {
            set.remove(&key);
            !set.is_empty()
        });
        if let Some(entity) = registry.unregister(key) {
            debug!(id = %entity.id, time, "entity destroyed");
        }
        Report::from_events(published)
    }

    /// Intervals currently held open by monitors.
    pub fn open_interval_count(&self) -> usize {
        self.contact_shapes
            .values()
            .map(ContactShapeMonitor::open_interval_count)
            .sum::<usize>()
            + self
                .manipulators
                .values()
                .map(Manipulator::open_interval_count)
                .sum::<usize>()
    }
}
