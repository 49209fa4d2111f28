// THEORY:
// The `PickAndPlaceListener` segments everything that happens to one grasped
// object into Slide, PickUp, Transport and PutDown intervals. It is a small
// finite-state machine that runs only while something is held.
//
// Key architectural principles:
// 1.  **Enum State, Match Dispatch**: The active phase is a `PapState` value and
//     each timer tick dispatches on it. There is no stored function pointer and
//     no way to be in two phases at once.
// 2.  **Anchored Segments**: Every phase measures against an anchor, the time and
//     location where the previous phase ended (`prev_relevant_*`). An emitted
//     interval always starts at the anchor, so consecutive intervals tile the
//     grasp without gaps or overlaps.
// 3.  **Support As A Query**: Whether the object rests on something is owned by
//     the contact layer. The listener only asks through `SupportQuery`; a `None`
//     answer means the object has no support-tracking shape and cannot be
//     segmented at all.
// 4.  **Hindsight Put-Down**: A put-down is only recognisable once the object is
//     supported again. The recent trajectory is kept in a `MovementBuffer` and
//     read backwards to find where the final descent began; the carry before
//     that point becomes the Transport.

use crate::core_modules::config::PickAndPlaceConfig;
use crate::core_modules::entity::{EntityKey, EntityRegistry, SemanticEntity};
use crate::core_modules::event::{EventInterval, EventKind, EventSink};
use crate::core_modules::movement_buffer::MovementBuffer;
use crate::core_modules::signal::{Bindings, Topic};
use crate::core_modules::timer::Timer;
use glam::DVec3;
use tracing::{debug, error, trace, warn};

/// Support information the state machine needs from the contact layer.
pub trait SupportQuery {
    /// `None` if the entity has no support-tracking shape.
    fn is_supported_by_something(&self, key: EntityKey) -> Option<bool>;
    /// When the entity last stopped being supported.
    fn last_supported_by_end_time(&self, key: EntityKey) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PapState {
    /// Nothing is grasped.
    None,
    /// Grasped and resting on a surface.
    Slide,
    /// Support was lost; waiting for the object to rise clearly.
    PickUp,
    /// Carried freely until it is supported again.
    TransportOrPutDown,
}

/// Where the final descent before a put-down started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PutDownSplit {
    /// The object was never lifted high enough over the resting point.
    NoPutDown,
    /// The descent started at `start`.
    Found { start: f64 },
    /// The descent started before the oldest buffered sample.
    Fallback { start: f64 },
}

/// Reads the movement buffer backwards from its newest sample.
///
/// A put-down happened if, within `put_down_movement_backtrack_duration` of
/// `now`, some sample lies more than `min_put_down_height` above the resting
/// location. From that sample the search keeps walking back until the object
/// is more than `max_put_down_height` higher or `max_put_down_dist_xy` away
/// horizontally; that sample marks the start of the put-down.
pub fn find_put_down_split(
    buffer: &MovementBuffer,
    now: f64,
    resting: DVec3,
    config: &PickAndPlaceConfig,
) -> PutDownSplit {
    let samples: Vec<_> = buffer.iter().rev().collect();
    let high_enough = samples
        .iter()
        .take_while(|s| now - s.time < config.put_down_movement_backtrack_duration)
        .position(|s| s.location.z - resting.z > config.min_put_down_height);
    let Some(from) = high_enough else {
        return PutDownSplit::NoPutDown;
    };

    let boundary = samples[from..].iter().find(|s| {
        s.location.z - resting.z > config.max_put_down_height
            || dist_xy(s.location, resting) > config.max_put_down_dist_xy
    });
    match (boundary, buffer.oldest()) {
        (Some(sample), _) => PutDownSplit::Found { start: sample.time },
        (None, Some(oldest)) => PutDownSplit::Fallback { start: oldest.time },
        (None, None) => PutDownSplit::NoPutDown,
    }
}

fn dist_xy(a: DVec3, b: DVec3) -> f64 {
    a.truncate().distance(b.truncate())
}

pub struct PickAndPlaceListener {
    config: PickAndPlaceConfig,
    owner: Option<SemanticEntity>,
    state: PapState,
    grasped: Option<SemanticEntity>,
    prev_relevant_time: f64,
    prev_relevant_location: DVec3,
    lift_off_location: Option<DVec3>,
    recent_movement: MovementBuffer,
    update_timer: Timer,
    bindings: Bindings,
    last_time: f64,
    is_init: bool,
    is_started: bool,
    is_finished: bool,
}

impl PickAndPlaceListener {
    pub fn new(config: PickAndPlaceConfig) -> Self {
        let recent_movement = MovementBuffer::new(
            config.recent_movement_buffer_duration,
            config.recent_movement_buffer_capacity,
        );
        Self {
            config,
            owner: None,
            state: PapState::None,
            grasped: None,
            prev_relevant_time: 0.0,
            prev_relevant_location: DVec3::ZERO,
            lift_off_location: None,
            recent_movement,
            update_timer: Timer::new(),
            bindings: Bindings::new(),
            last_time: 0.0,
            is_init: false,
            is_started: false,
            is_finished: false,
        }
    }

    pub fn init(&mut self, owner: &SemanticEntity) -> bool {
        if self.is_init || self.is_finished {
            return false;
        }
        self.owner = Some(owner.clone());
        self.is_init = true;
        true
    }

    pub fn start(&mut self, now: f64) {
        if self.is_started || !self.is_init || self.is_finished {
            return;
        }
        self.last_time = now;
        self.bindings.bind(Topic::ManipulatorGrasp);
        self.is_started = true;
    }

    /// Closes the active phase, if any, and stops. Idempotent.
    pub fn finish(&mut self, now: f64, forced: bool, registry: &EntityRegistry, sink: &mut dyn EventSink) {
        if self.is_finished {
            return;
        }
        debug!(now, forced, state = ?self.state, "finishing pick and place listener");
        self.finish_active_event(now, registry, sink);
        self.update_timer.clear();
        self.bindings.unbind_all();
        self.is_started = false;
        self.is_init = false;
        self.is_finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    pub fn state(&self) -> PapState {
        self.state
    }

    pub fn grasped(&self) -> Option<&SemanticEntity> {
        self.grasped.as_ref()
    }

    pub fn on_grasp_begin(
        &mut self,
        other: EntityKey,
        time: f64,
        registry: &EntityRegistry,
        support: &dyn SupportQuery,
    ) {
        if !self.bindings.is_bound(Topic::ManipulatorGrasp) {
            return;
        }
        if let Some(current) = &self.grasped {
            error!(time, grasped = %current.id, "grasp begin while already tracking a grasp, this should not happen");
            return;
        }
        let Some(entity) = registry.get(other) else {
            return;
        };
        let Some(location) = registry.location(other) else {
            return;
        };
        match support.is_supported_by_something(other) {
            None => {
                error!(time, other = %entity.id, "grasped object has no support tracking, cannot segment pick and place");
            }
            Some(false) => {
                debug!(time, other = %entity.id, "grasped object is not supported, ignoring");
            }
            Some(true) => {
                trace!(time, other = %entity.id, "pick and place tracking started");
                self.grasped = Some(entity.clone());
                self.state = PapState::Slide;
                self.set_anchor(time, location);
                self.lift_off_location = None;
                self.recent_movement.clear();
                self.last_time = time;
                if self.update_timer.is_paused() {
                    self.update_timer.unpause(time);
                } else {
                    self.update_timer.set(time, self.config.update_rate, true);
                }
            }
        }
    }

    pub fn on_grasp_end(&mut self, other: EntityKey, time: f64, registry: &EntityRegistry, sink: &mut dyn EventSink) {
        if !self.bindings.is_bound(Topic::ManipulatorGrasp) {
            return;
        }
        match &self.grasped {
            None => {
                trace!(time, "grasp end without a tracked pick and place");
            }
            Some(grasped) if grasped.key != other => {
                error!(time, "grasp end for a different object than the tracked one, this should not happen");
            }
            Some(_) => {
                self.finish_active_event(time, registry, sink);
                self.update_timer.pause(time);
            }
        }
    }

    /// Runs the state update when the timer is due.
    pub fn tick(&mut self, now: f64, registry: &EntityRegistry, support: &dyn SupportQuery, sink: &mut dyn EventSink) {
        if !self.is_started {
            return;
        }
        let last_seen = self.last_time;
        self.last_time = now;
        let Some(grasped) = self.grasped.clone() else {
            return;
        };

        let (Some(location), Some(supported)) = (
            registry.location(grasped.key),
            support.is_supported_by_something(grasped.key),
        ) else {
            debug!(now, other = %grasped.id, "grasped object is gone, closing its pick and place");
            self.finish_active_event(last_seen, registry, sink);
            self.update_timer.pause(now);
            return;
        };

        if !self.update_timer.fire_if_due(now) {
            return;
        }
        match self.state {
            PapState::None => error!(now, "pick and place update without a state, this should not happen"),
            PapState::Slide => self.update_slide(now, location, supported, &grasped, support, sink),
            PapState::PickUp => self.update_pick_up(now, location, supported, &grasped, sink),
            PapState::TransportOrPutDown => self.update_transport_or_put_down(now, location, supported, &grasped, sink),
        }
    }

    // --- 1. Slide ---
    fn update_slide(
        &mut self,
        now: f64,
        location: DVec3,
        supported: bool,
        grasped: &SemanticEntity,
        support: &dyn SupportQuery,
        sink: &mut dyn EventSink,
    ) {
        if supported {
            return;
        }
        let support_lost = support
            .last_supported_by_end_time(grasped.key)
            .unwrap_or(now)
            .clamp(self.prev_relevant_time, now);
        if self.is_slide(support_lost, location) {
            self.emit(EventKind::Slide, self.prev_relevant_time, support_lost, grasped, sink);
        }
        trace!(now, support_lost, "support lost, watching for pick up");
        self.set_anchor(support_lost, location);
        self.lift_off_location = None;
        self.state = PapState::PickUp;
    }

    fn is_slide(&self, end: f64, location: DVec3) -> bool {
        dist_xy(self.prev_relevant_location, location) > self.config.min_slide_dist_xy
            && end - self.prev_relevant_time > self.config.min_slide_duration
    }

    // --- 2. PickUp ---
    fn update_pick_up(
        &mut self,
        now: f64,
        location: DVec3,
        supported: bool,
        grasped: &SemanticEntity,
        sink: &mut dyn EventSink,
    ) {
        if supported {
            if self.lift_off_location.take().is_some() {
                // Lifted and set down again before moving away.
                self.emit(EventKind::PickUp, self.prev_relevant_time, now, grasped, sink);
            }
            self.set_anchor(now, location);
            self.state = PapState::Slide;
            return;
        }

        match self.lift_off_location {
            Some(lift_off) => {
                let risen = location.z - lift_off.z > self.config.max_pick_up_height;
                let moved = dist_xy(lift_off, location) > self.config.max_pick_up_dist_xy;
                if risen || moved {
                    self.emit(EventKind::PickUp, self.prev_relevant_time, now, grasped, sink);
                    self.set_anchor(now, location);
                    self.lift_off_location = None;
                    self.enter_transport();
                }
            }
            None => {
                if location.z - self.prev_relevant_location.z > self.config.min_pick_up_height {
                    trace!(now, "lift off");
                    self.lift_off_location = Some(location);
                } else if dist_xy(self.prev_relevant_location, location) > self.config.max_pick_up_dist_xy {
                    // Carried away low without a recognisable lift.
                    trace!(now, "skipping pick up");
                    self.enter_transport();
                }
            }
        }
    }

    // --- 3. TransportOrPutDown ---
    fn update_transport_or_put_down(
        &mut self,
        now: f64,
        location: DVec3,
        supported: bool,
        grasped: &SemanticEntity,
        sink: &mut dyn EventSink,
    ) {
        if !supported {
            self.recent_movement.push(now, location);
            return;
        }

        match find_put_down_split(&self.recent_movement, now, location, &self.config) {
            PutDownSplit::NoPutDown => {
                self.emit(EventKind::Transport, self.prev_relevant_time, now, grasped, sink);
            }
            PutDownSplit::Found { start } => {
                self.emit(EventKind::Transport, self.prev_relevant_time, start, grasped, sink);
                self.emit(EventKind::PutDown, start, now, grasped, sink);
            }
            PutDownSplit::Fallback { start } => {
                warn!(now, start, "put down start is older than the movement buffer, using the oldest sample");
                self.emit(EventKind::Transport, self.prev_relevant_time, start, grasped, sink);
                self.emit(EventKind::PutDown, start, now, grasped, sink);
            }
        }
        self.recent_movement.clear();
        self.set_anchor(now, location);
        self.state = PapState::Slide;
    }

    fn enter_transport(&mut self) {
        self.recent_movement.clear();
        self.state = PapState::TransportOrPutDown;
    }

    /// Publishes whatever the active phase amounts to at `end_time` and
    /// returns to `PapState::None`.
    fn finish_active_event(&mut self, end_time: f64, registry: &EntityRegistry, sink: &mut dyn EventSink) {
        let Some(grasped) = self.grasped.take() else {
            return;
        };
        let location = registry
            .location(grasped.key)
            .unwrap_or(self.prev_relevant_location);
        match self.state {
            PapState::None => {}
            PapState::Slide => {
                if self.is_slide(end_time, location) {
                    self.emit(EventKind::Slide, self.prev_relevant_time, end_time, &grasped, sink);
                }
            }
            PapState::PickUp => {
                if self.lift_off_location.is_some() {
                    self.emit(EventKind::PickUp, self.prev_relevant_time, end_time, &grasped, sink);
                }
            }
            PapState::TransportOrPutDown => {
                self.emit(EventKind::Transport, self.prev_relevant_time, end_time, &grasped, sink);
            }
        }
        self.state = PapState::None;
        self.lift_off_location = None;
        self.recent_movement.clear();
    }

    /// Force-closes the tracked phase if `key` is the owner or the grasped object.
    pub fn on_entity_destroyed(&mut self, key: EntityKey, time: f64, registry: &EntityRegistry, sink: &mut dyn EventSink) {
        if self.owner.as_ref().is_some_and(|o| o.key == key) {
            self.finish(time, true, registry, sink);
        } else if self.grasped.as_ref().is_some_and(|g| g.key == key) {
            self.finish_active_event(time, registry, sink);
            self.update_timer.pause(time);
        }
    }

    fn set_anchor(&mut self, time: f64, location: DVec3) {
        self.prev_relevant_time = time;
        self.prev_relevant_location = location;
    }

    fn emit(&self, kind: EventKind, start: f64, end: f64, grasped: &SemanticEntity, sink: &mut dyn EventSink) {
        if end <= start {
            trace!(?kind, start, end, "skipping empty interval");
            return;
        }
        let Some(owner) = self.owner.as_ref() else {
            return;
        };
        match EventInterval::closed(kind, owner, grasped, start, end) {
            Ok(event) => {
                debug!(?kind, start, end, object = %grasped.id, "pick and place event");
                sink.publish(event);
            }
            Err(err) => error!(%err, "pick and place event could not be built, this should not happen"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeSupport {
        supported: bool,
        last_end: Option<f64>,
    }

    impl SupportQuery for FakeSupport {
        fn is_supported_by_something(&self, _key: EntityKey) -> Option<bool> {
            Some(self.supported)
        }
        fn last_supported_by_end_time(&self, _key: EntityKey) -> Option<f64> {
            self.last_end
        }
    }

    struct NoSupportShape;

    impl SupportQuery for NoSupportShape {
        fn is_supported_by_something(&self, _key: EntityKey) -> Option<bool> {
            None
        }
        fn last_supported_by_end_time(&self, _key: EntityKey) -> Option<f64> {
            None
        }
    }

    fn config() -> PickAndPlaceConfig {
        PickAndPlaceConfig {
            update_rate: 1.0,
            ..PickAndPlaceConfig::default()
        }
    }

    struct Scene {
        registry: EntityRegistry,
        cup: EntityKey,
        listener: PickAndPlaceListener,
        support: FakeSupport,
        sink: Vec<EventInterval>,
    }

    impl Scene {
        fn new(config: PickAndPlaceConfig) -> Self {
            let mut registry = EntityRegistry::new();
            let hand = registry.register("hand", "RightHand").unwrap();
            let cup = registry.register("cup", "Cup").unwrap();
            let mut listener = PickAndPlaceListener::new(config);
            listener.init(registry.get(hand).unwrap());
            listener.start(0.0);
            Self {
                registry,
                cup,
                listener,
                support: FakeSupport {
                    supported: true,
                    last_end: None,
                },
                sink: Vec::new(),
            }
        }

        fn grasp(&mut self, time: f64) {
            self.listener.on_grasp_begin(self.cup, time, &self.registry, &self.support);
        }

        fn step(&mut self, time: f64, location: DVec3, supported: bool) {
            self.registry.set_pose(self.cup, location, DVec3::ZERO);
            if self.support.supported && !supported {
                self.support.last_end = Some(time);
            }
            self.support.supported = supported;
            self.listener.tick(time, &self.registry, &self.support, &mut self.sink);
        }

        fn kinds(&self) -> Vec<(EventKind, f64, f64)> {
            self.sink
                .iter()
                .map(|e| (e.kind, e.start, e.end().unwrap_or(f64::NAN)))
                .collect()
        }
    }

    #[test]
    fn lift_off_then_rise_emits_pick_up() {
        let cfg = config();
        let mut s = Scene::new(cfg.clone());
        s.grasp(0.0);
        assert_eq!(s.listener.state(), PapState::Slide);

        s.step(1.0, DVec3::ZERO, false);
        assert_eq!(s.listener.state(), PapState::PickUp);
        s.step(2.0, DVec3::new(0.0, 0.0, cfg.min_pick_up_height + 0.01), false);
        assert_eq!(s.listener.state(), PapState::PickUp);
        s.step(
            3.0,
            DVec3::new(0.0, 0.0, cfg.min_pick_up_height + 0.01 + cfg.max_pick_up_height + 0.01),
            false,
        );

        assert_eq!(s.kinds(), vec![(EventKind::PickUp, 1.0, 3.0)]);
        assert_eq!(s.listener.state(), PapState::TransportOrPutDown);
    }

    #[test]
    fn sliding_far_enough_emits_slide_up_to_support_loss() {
        let cfg = config();
        let mut s = Scene::new(cfg.clone());
        s.grasp(0.0);
        s.step(1.0, DVec3::new(1.0, 0.0, 0.0), true);
        s.step(2.0, DVec3::new(cfg.min_slide_dist_xy + 1.0, 0.0, 0.0), false);
        assert_eq!(s.kinds(), vec![(EventKind::Slide, 0.0, 2.0)]);
        assert_eq!(s.listener.state(), PapState::PickUp);
    }

    #[test]
    fn carry_and_put_down_splits_transport_from_put_down() {
        let cfg = PickAndPlaceConfig {
            update_rate: 0.25,
            recent_movement_buffer_duration: 5.0,
            put_down_movement_backtrack_duration: 5.0,
            recent_movement_buffer_capacity: 256,
            ..PickAndPlaceConfig::default()
        };
        let mut s = Scene::new(cfg);
        s.grasp(0.0);
        s.step(0.25, DVec3::ZERO, false);
        // Carried away low, straight into transport.
        s.step(0.5, DVec3::new(20.0, 0.0, 0.0), false);
        assert_eq!(s.listener.state(), PapState::TransportOrPutDown);

        let heights = [20.0, 20.0, 10.0, 8.0, 6.0, 4.0, 2.0, 1.0];
        for (i, z) in heights.iter().enumerate() {
            s.step(0.75 + i as f64 * 0.25, DVec3::new(20.0, 0.0, *z), false);
        }
        s.step(2.75, DVec3::new(20.0, 0.0, 0.0), true);

        // The descent starts at the last sample above the max put-down height.
        assert_eq!(
            s.kinds(),
            vec![(EventKind::Transport, 0.25, 1.25), (EventKind::PutDown, 1.25, 2.75)]
        );
        assert_eq!(s.listener.state(), PapState::Slide);
    }

    #[test]
    fn grasp_end_closes_transport() {
        let mut s = Scene::new(config());
        s.grasp(0.0);
        s.step(1.0, DVec3::ZERO, false);
        s.step(2.0, DVec3::new(50.0, 0.0, 0.0), false);
        assert_eq!(s.listener.state(), PapState::TransportOrPutDown);
        s.listener.on_grasp_end(s.cup, 4.0, &s.registry, &mut s.sink);
        assert_eq!(s.kinds(), vec![(EventKind::Transport, 1.0, 4.0)]);
        assert_eq!(s.listener.state(), PapState::None);
        assert!(s.listener.grasped().is_none());
    }

    #[test]
    fn grasp_end_during_slide_needs_distance_and_duration() {
        let cfg = config();
        let far = DVec3::new(cfg.min_slide_dist_xy + 1.0, 0.0, 0.0);

        let mut s = Scene::new(cfg.clone());
        s.grasp(0.0);
        s.step(1.0, far, true);
        s.listener.on_grasp_end(s.cup, 2.0, &s.registry, &mut s.sink);
        assert_eq!(s.kinds(), vec![(EventKind::Slide, 0.0, 2.0)]);
        assert_eq!(s.listener.state(), PapState::None);

        // Too short a distance.
        let mut s = Scene::new(cfg.clone());
        s.grasp(0.0);
        s.step(1.0, DVec3::new(1.0, 0.0, 0.0), true);
        s.listener.on_grasp_end(s.cup, 2.0, &s.registry, &mut s.sink);
        assert!(s.kinds().is_empty());

        // Far enough but too brief.
        let mut s = Scene::new(cfg.clone());
        s.grasp(0.0);
        s.registry.set_pose(s.cup, far, DVec3::ZERO);
        s.listener.on_grasp_end(s.cup, cfg.min_slide_duration / 2.0, &s.registry, &mut s.sink);
        assert!(s.kinds().is_empty());
        assert_eq!(s.listener.state(), PapState::None);
    }

    #[test]
    fn grasp_end_during_pick_up_emits_only_after_lift_off() {
        let cfg = config();
        let lifted = DVec3::new(0.0, 0.0, cfg.min_pick_up_height + 0.01);

        let mut s = Scene::new(cfg.clone());
        s.grasp(0.0);
        s.step(1.0, DVec3::ZERO, false);
        assert_eq!(s.listener.state(), PapState::PickUp);
        s.listener.on_grasp_end(s.cup, 1.5, &s.registry, &mut s.sink);
        assert!(s.kinds().is_empty());
        assert_eq!(s.listener.state(), PapState::None);

        let mut s = Scene::new(cfg);
        s.grasp(0.0);
        s.step(1.0, DVec3::ZERO, false);
        s.step(2.0, lifted, false);
        s.listener.on_grasp_end(s.cup, 2.5, &s.registry, &mut s.sink);
        assert_eq!(s.kinds(), vec![(EventKind::PickUp, 1.0, 2.5)]);
        assert_eq!(s.listener.state(), PapState::None);
    }

    #[test]
    fn support_after_lift_off_emits_pick_up_and_slides_again() {
        let cfg = config();
        let lifted = DVec3::new(0.0, 0.0, cfg.min_pick_up_height + 0.01);
        let mut s = Scene::new(cfg.clone());
        s.grasp(0.0);
        s.step(1.0, DVec3::ZERO, false);
        s.step(2.0, lifted, false);
        s.step(3.0, lifted, true);
        assert_eq!(s.kinds(), vec![(EventKind::PickUp, 1.0, 3.0)]);
        assert_eq!(s.listener.state(), PapState::Slide);

        // The next slide is measured from where the object came to rest.
        s.step(4.0, lifted + DVec3::new(cfg.min_slide_dist_xy + 1.0, 0.0, 0.0), true);
        s.listener.on_grasp_end(s.cup, 5.0, &s.registry, &mut s.sink);
        assert_eq!(s.sink.last().map(|e| (e.kind, e.start)), Some((EventKind::Slide, 3.0)));
    }

    #[test]
    fn support_before_lift_off_restarts_the_slide_anchor() {
        let cfg = config();
        let mut s = Scene::new(cfg.clone());
        s.grasp(0.0);
        s.step(1.0, DVec3::ZERO, false);
        s.step(2.0, DVec3::new(1.0, 0.0, 0.0), true);
        assert_eq!(s.listener.state(), PapState::Slide);
        assert!(s.kinds().is_empty());

        s.step(3.0, DVec3::new(cfg.min_slide_dist_xy + 2.0, 0.0, 0.0), true);
        s.listener.on_grasp_end(s.cup, 3.5, &s.registry, &mut s.sink);
        assert_eq!(s.kinds(), vec![(EventKind::Slide, 2.0, 3.5)]);
    }

    #[test]
    fn unsupported_or_untracked_grasps_are_ignored() {
        let mut s = Scene::new(config());
        s.support.supported = false;
        s.grasp(0.0);
        assert_eq!(s.listener.state(), PapState::None);
        s.listener.on_grasp_begin(s.cup, 0.0, &s.registry, &NoSupportShape);
        assert_eq!(s.listener.state(), PapState::None);
    }

    #[test]
    fn put_down_split_falls_back_to_the_oldest_sample() {
        let cfg = PickAndPlaceConfig::default();
        let mut buffer = MovementBuffer::new(10.0, 64);
        for i in 0..5 {
            buffer.push(i as f64 * 0.1, DVec3::new(0.0, 0.0, 5.0));
        }
        let split = find_put_down_split(&buffer, 0.5, DVec3::ZERO, &cfg);
        assert_eq!(split, PutDownSplit::Fallback { start: 0.0 });

        let low = find_put_down_split(&buffer, 0.5, DVec3::new(0.0, 0.0, 4.0), &cfg);
        assert_eq!(low, PutDownSplit::NoPutDown);
    }
}
