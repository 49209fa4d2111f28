// THEORY:
// The `GraspEventHandler` turns the begin/end grasp notifications of one
// manipulator into bounded Grasp intervals.
//
// Key architectural principles:
// 1.  **Small Open Set**: A manipulator can only hold a handful of objects at once,
//     so open grasps live in a `Vec` and are matched by a linear scan on the
//     grasped object's key.
// 2.  **Strict Pairing**: Every interval opened by `add_new_event` leaves the open
//     list exactly once, either through `finish_event` or through the
//     `finish_all_events` sweep at episode end. Both paths apply the same
//     minimum-duration filter; too-short grasps are dropped, never half-published.

use crate::core_modules::config::GraspConfig;
use crate::core_modules::entity::{EntityKey, EntityRegistry, SemanticEntity};
use crate::core_modules::event::{EventInterval, EventKind, EventSink, exceeds_min_duration};
use crate::core_modules::signal::{Bindings, Topic};
use tracing::{debug, error, trace};

pub struct GraspEventHandler {
    config: GraspConfig,
    owner: Option<SemanticEntity>,
    started_events: Vec<EventInterval>,
    bindings: Bindings,
    is_init: bool,
    is_started: bool,
    is_finished: bool,
}

impl GraspEventHandler {
    pub fn new(config: GraspConfig) -> Self {
        Self {
            config,
            owner: None,
            started_events: Vec::new(),
            bindings: Bindings::new(),
            is_init: false,
            is_started: false,
            is_finished: false,
        }
    }

    /// Sets the manipulator this handler logs grasps for.
    pub fn init(&mut self, owner: &SemanticEntity) -> bool {
        if self.is_init || self.is_finished {
            return false;
        }
        self.owner = Some(owner.clone());
        self.is_init = true;
        true
    }

    /// Starts listening to grasp signals.
    pub fn start(&mut self) {
        if self.is_started || !self.is_init || self.is_finished {
            return;
        }
        self.bindings.bind(Topic::ManipulatorGrasp);
        self.is_started = true;
    }

    /// Terminates the handler and publishes every remaining grasp.
    /// Safe to call repeatedly and before `start`.
    pub fn finish(&mut self, end_time: f64, forced: bool, sink: &mut dyn EventSink) {
        if self.is_finished {
            return;
        }
        debug!(forced, open = self.started_events.len(), "finishing grasp handler");
        self.finish_all_events(end_time, sink);
        self.bindings.unbind_all();
        self.is_started = false;
        self.is_init = false;
        self.is_finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn open_event_count(&self) -> usize {
        self.started_events.len()
    }

    /// Opens a new grasp between `owner` and `other`.
    pub fn add_new_event(&mut self, owner: &SemanticEntity, other: &SemanticEntity, start_time: f64, grasp_type: &str) {
        let event = EventInterval::open(EventKind::Grasp, start_time, vec![owner.clone(), other.clone()])
            .with_grasp_type(grasp_type);
        trace!(id = %event.id, other = %other.id, start_time, "grasp started");
        self.started_events.push(event);
    }

    /// Closes the open grasp with `other`. Returns false if there was none.
    pub fn finish_event(&mut self, other: EntityKey, end_time: f64, sink: &mut dyn EventSink) -> bool {
        let Some(idx) = self
            .started_events
            .iter()
            .position(|ev| ev.other().is_some_and(|o| o.key == other))
        else {
            return false;
        };
        let event = self.started_events.remove(idx);
        self.publish_if_long_enough(event, end_time, sink);
        true
    }

    /// Closes every open grasp at `end_time`.
    pub fn finish_all_events(&mut self, end_time: f64, sink: &mut dyn EventSink) {
        for event in std::mem::take(&mut self.started_events) {
            self.publish_if_long_enough(event, end_time, sink);
        }
    }

    fn publish_if_long_enough(&self, mut event: EventInterval, end_time: f64, sink: &mut dyn EventSink) {
        if !exceeds_min_duration(event.start, end_time, self.config.grasp_event_min) {
            trace!(id = %event.id, start = event.start, end_time, "dropping short grasp");
            return;
        }
        match event.finish(end_time) {
            Ok(()) => sink.publish(event),
            Err(err) => error!(%err, "grasp event could not be finished, this should not happen"),
        }
    }

    pub fn on_grasp_begin(&mut self, other: EntityKey, time: f64, grasp_type: &str, registry: &EntityRegistry) {
        if !self.bindings.is_bound(Topic::ManipulatorGrasp) {
            return;
        }
        let Some(owner) = self.owner.clone() else {
            return;
        };
        // Objects without semantic annotation are not logged.
        let Some(other_entity) = registry.get(other) else {
            return;
        };
        if self
            .started_events
            .iter()
            .any(|ev| ev.other().is_some_and(|o| o.key == other))
        {
            error!(time, other = %other_entity.id, "grasp begin for an object that is already grasped, ignoring");
            return;
        }
        self.add_new_event(&owner, other_entity, time, grasp_type);
    }

    pub fn on_grasp_end(&mut self, other: EntityKey, time: f64, sink: &mut dyn EventSink) {
        if !self.bindings.is_bound(Topic::ManipulatorGrasp) {
            return;
        }
        if !self.finish_event(other, time, sink) {
            trace!(time, "grasp end without a matching open grasp");
        }
    }

    /// Force-closes any grasp involving a destroyed entity.
    pub fn on_entity_destroyed(&mut self, key: EntityKey, time: f64, sink: &mut dyn EventSink) {
        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.started_events)
            .into_iter()
            .partition(|ev| ev.involves(key));
        self.started_events = kept;
        for event in gone {
            self.publish_if_long_enough(event, time, sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: f64 = 0.5;
    const EPS: f64 = 1e-3;

    fn setup() -> (EntityRegistry, EntityKey, EntityKey, GraspEventHandler) {
        let mut registry = EntityRegistry::new();
        let hand = registry.register("hand", "RightHand").unwrap();
        let cup = registry.register("cup", "Cup").unwrap();
        let mut handler = GraspEventHandler::new(GraspConfig { grasp_event_min: MIN });
        handler.init(registry.get(hand).unwrap());
        handler.start();
        (registry, hand, cup, handler)
    }

    #[test]
    fn grasps_shorter_than_the_minimum_are_dropped() {
        let (registry, _, cup, mut handler) = setup();
        let mut sink: Vec<EventInterval> = Vec::new();
        handler.on_grasp_begin(cup, 0.0, "pinch", &registry);
        handler.on_grasp_end(cup, MIN - EPS, &mut sink);
        assert!(sink.is_empty());
        assert_eq!(handler.open_event_count(), 0);
    }

    #[test]
    fn grasps_longer_than_the_minimum_are_published_once() {
        let (registry, hand, cup, mut handler) = setup();
        let mut sink: Vec<EventInterval> = Vec::new();
        handler.on_grasp_begin(cup, 0.0, "pinch", &registry);
        handler.on_grasp_end(cup, MIN + EPS, &mut sink);
        handler.on_grasp_end(cup, MIN + 1.0, &mut sink);
        assert_eq!(sink.len(), 1);
        let grasp = &sink[0];
        assert_eq!(grasp.kind, EventKind::Grasp);
        assert_eq!(grasp.end(), Some(MIN + EPS));
        assert_eq!(grasp.participants[0].key, hand);
        assert_eq!(grasp.grasp_type.as_deref(), Some("pinch"));
    }

    #[test]
    fn finish_sweeps_open_grasps_and_is_idempotent() {
        let (mut registry, _, cup, mut handler) = setup();
        let bowl = registry.register("bowl", "Bowl").unwrap();
        let mut sink: Vec<EventInterval> = Vec::new();
        handler.on_grasp_begin(cup, 0.0, "power", &registry);
        handler.on_grasp_begin(bowl, 4.8, "power", &registry);
        handler.finish(5.0, true, &mut sink);
        handler.finish(9.0, true, &mut sink);
        // The bowl grasp is too short to publish but is swept all the same.
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].end(), Some(5.0));
        assert_eq!(handler.open_event_count(), 0);
        assert!(handler.is_finished());
    }

    #[test]
    fn unannotated_and_duplicate_grasps_are_ignored() {
        let (mut registry, _, cup, mut handler) = setup();
        let ghost = registry.register("ghost", "Ghost").unwrap();
        registry.unregister(ghost);
        handler.on_grasp_begin(ghost, 0.0, "pinch", &registry);
        handler.on_grasp_begin(cup, 0.0, "pinch", &registry);
        handler.on_grasp_begin(cup, 0.5, "pinch", &registry);
        assert_eq!(handler.open_event_count(), 1);
    }

    #[test]
    fn destroyed_objects_close_their_grasp() {
        let (registry, _, cup, mut handler) = setup();
        let mut sink: Vec<EventInterval> = Vec::new();
        handler.on_grasp_begin(cup, 1.0, "pinch", &registry);
        handler.on_entity_destroyed(cup, 3.0, &mut sink);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].end(), Some(3.0));
        assert_eq!(handler.open_event_count(), 0);
    }

    #[test]
    fn destroyed_owner_closes_every_grasp() {
        let (mut registry, hand, cup, mut handler) = setup();
        let bowl = registry.register("bowl", "Bowl").unwrap();
        let mut sink: Vec<EventInterval> = Vec::new();
        handler.on_grasp_begin(cup, 0.0, "pinch", &registry);
        handler.on_grasp_begin(bowl, 1.0, "power", &registry);
        handler.on_entity_destroyed(bowl, 2.0, &mut sink);
        assert_eq!(handler.open_event_count(), 1);
        handler.on_entity_destroyed(hand, 4.0, &mut sink);
        assert_eq!(sink.len(), 2);
        assert!(sink.iter().all(|e| e.involves(hand)));
        assert_eq!(handler.open_event_count(), 0);
    }
}
