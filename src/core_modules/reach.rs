// THEORY:
// The `ReachListener` watches the reach area of one manipulator and explains a
// grasp after the fact: when the hand closes on an object, the listener already
// knows when the hand started moving toward it (Reach) and when it first
// touched it (PreGrasp).
//
// Key architectural principles:
// 1.  **Candidates, Not Events**: Objects inside the reach area are candidate
//     records `{first_seen_time, last_known_distance, contact_start_time}`.
//     Nothing is published until a grasp confirms one of them.
// 2.  **Distance Polling**: While candidates exist, a looping timer measures the
//     hand-to-object distance. Only changes larger than `min_dist` count. An
//     approach just updates the distance; a retreat restarts the reach clock.
// 3.  **Contact Debounce**: A contact that ends is parked; a new contact with the
//     same object within `max_pre_grasp_gap` continues it. A one-shot delay timer
//     (gap * 1.2) later discards parked contacts that were not resumed and
//     restarts the candidate's reach clock.
// 4.  **Grasp Exclusivity**: On grasp, the listener emits one `ReachAndPreGrasp`,
//     forgets every candidate and stops listening to overlaps. Grasp end
//     rebinds and rebuilds the candidate set from what currently overlaps.

use crate::core_modules::config::ReachConfig;
use crate::core_modules::entity::{EntityKey, EntityRegistry, SemanticEntity};
use crate::core_modules::event::{EventInterval, EventKind};
use crate::core_modules::signal::{Bindings, Topic};
use crate::core_modules::timer::Timer;
use tracing::{debug, error, trace};

/// Extra slack on the delayed contact-end check.
const CONTACT_END_DELAY_FACTOR: f64 = 1.2;

/// An object currently inside the reach area.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub other: SemanticEntity,
    /// When the current approach toward the object started.
    pub first_seen_time: f64,
    pub last_known_distance: f64,
    /// Set while the hand is (or was just) in contact with the object.
    pub contact_start_time: Option<f64>,
}

/// The reach and pre-grasp phases preceding one grasp.
#[derive(Debug, Clone, PartialEq)]
pub struct ReachAndPreGrasp {
    pub owner: SemanticEntity,
    pub other: SemanticEntity,
    pub reach_start: f64,
    pub contact_time: f64,
    pub grasp_time: f64,
}

impl ReachAndPreGrasp {
    /// Splits into a Reach `[reach_start, contact_time]` and a PreGrasp
    /// `[contact_time, grasp_time]` interval. Zero-length parts are skipped.
    pub fn into_intervals(self) -> Vec<EventInterval> {
        let phases = [
            (EventKind::Reach, self.reach_start, self.contact_time),
            (EventKind::PreGrasp, self.contact_time, self.grasp_time),
        ];
        phases
            .into_iter()
            .filter(|(_, start, end)| end > start)
            .filter_map(|(kind, start, end)| EventInterval::closed(kind, &self.owner, &self.other, start, end).ok())
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct EndedContact {
    other: EntityKey,
    end_time: f64,
}

pub struct ReachListener {
    config: ReachConfig,
    owner: Option<SemanticEntity>,
    candidates: Vec<CandidateRecord>,
    recently_ended_contacts: Vec<EndedContact>,
    grasped: Option<EntityKey>,
    update_timer: Timer,
    contact_delay_timer: Timer,
    bindings: Bindings,
    is_init: bool,
    is_started: bool,
    is_finished: bool,
}

impl ReachListener {
    pub fn new(config: ReachConfig) -> Self {
        Self {
            config,
            owner: None,
            candidates: Vec::new(),
            recently_ended_contacts: Vec::new(),
            grasped: None,
            update_timer: Timer::new(),
            contact_delay_timer: Timer::new(),
            bindings: Bindings::new(),
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

    /// Binds the manipulator signals and seeds candidates from `overlapping`.
    pub fn start(&mut self, now: f64, overlapping: &[EntityKey], registry: &EntityRegistry) {
        if self.is_started || !self.is_init || self.is_finished {
            return;
        }
        self.bindings.bind(Topic::ManipulatorContact);
        self.bindings.bind(Topic::ManipulatorGrasp);
        self.bindings.bind(Topic::Overlap);
        self.is_started = true;
        self.trigger_initial_overlaps(now, overlapping, registry);
    }

    /// Stops listening. The listener holds no open intervals, so nothing is published.
    pub fn finish(&mut self, now: f64, forced: bool) {
        if self.is_finished {
            return;
        }
        debug!(now, forced, candidates = self.candidates.len(), "finishing reach listener");
        self.candidates.clear();
        self.recently_ended_contacts.clear();
        self.grasped = None;
        self.update_timer.clear();
        self.contact_delay_timer.clear();
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

    pub fn candidate(&self, other: EntityKey) -> Option<&CandidateRecord> {
        self.candidates.iter().find(|c| c.other.key == other)
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn grasped(&self) -> Option<EntityKey> {
        self.grasped
    }

    /// Replays every current overlap as an overlap-begin.
    pub fn trigger_initial_overlaps(&mut self, now: f64, overlapping: &[EntityKey], registry: &EntityRegistry) {
        for &other in overlapping {
            self.on_overlap_begin(other, now, registry);
        }
    }

    pub fn on_overlap_begin(&mut self, other: EntityKey, time: f64, registry: &EntityRegistry) {
        if !self.bindings.is_bound(Topic::Overlap) || self.grasped.is_some() {
            return;
        }
        let Some(owner) = self.owner.clone() else {
            return;
        };
        if other == owner.key || self.candidate(other).is_some() {
            return;
        }
        let Some(other_entity) = registry.get(other) else {
            return;
        };
        let Some(distance) = distance_between(registry, owner.key, other) else {
            return;
        };

        trace!(time, other = %other_entity.id, distance, "reach candidate added");
        self.candidates.push(CandidateRecord {
            other: other_entity.clone(),
            first_seen_time: time,
            last_known_distance: distance,
            contact_start_time: None,
        });

        if !self.update_timer.is_active() {
            if self.update_timer.is_paused() {
                self.update_timer.unpause(time);
            } else {
                self.update_timer.set(time, self.config.update_rate, true);
            }
        }
    }

    pub fn on_overlap_end(&mut self, other: EntityKey, time: f64) {
        if !self.bindings.is_bound(Topic::Overlap) {
            return;
        }
        let before = self.candidates.len();
        self.candidates.retain(|c| c.other.key != other);
        if self.candidates.len() == before {
            return;
        }
        self.recently_ended_contacts.retain(|c| c.other != other);
        if self.recently_ended_contacts.is_empty() {
            self.contact_delay_timer.clear();
        }
        if self.candidates.is_empty() {
            self.update_timer.pause(time);
        }
    }

    /// Runs whichever timers are due at `now`.
    pub fn tick(&mut self, now: f64, registry: &EntityRegistry) {
        if !self.is_started {
            return;
        }
        self.drop_dangling(now, registry);
        if self.update_timer.fire_if_due(now) {
            self.reach_update(now, registry);
        }
        if self.contact_delay_timer.fire_if_due(now) {
            self.delayed_contact_end_check(now);
        }
    }

    fn reach_update(&mut self, now: f64, registry: &EntityRegistry) {
        let Some(owner) = self.owner.as_ref() else {
            return;
        };
        let Some(hand) = registry.location(owner.key) else {
            return;
        };
        let min_dist = self.config.min_dist;
        for candidate in &mut self.candidates {
            let Some(location) = registry.location(candidate.other.key) else {
                continue;
            };
            let current = hand.distance(location);
            let approach = candidate.last_known_distance - current;
            if approach > min_dist {
                candidate.last_known_distance = current;
            } else if -approach > min_dist {
                // Moving away restarts the reach.
                candidate.first_seen_time = now;
                candidate.last_known_distance = current;
            }
        }
    }

    pub fn on_contact_begin(&mut self, other: EntityKey, time: f64) {
        if !self.bindings.is_bound(Topic::ManipulatorContact) || self.grasped.is_some() {
            return;
        }
        if self.skip_recently_ended_contact(other, time) {
            trace!(time, "contact resumed within the pre-grasp gap");
            return;
        }
        // A contact older than the gap is over; only the new one counts.
        self.recently_ended_contacts.retain(|c| c.other != other);
        if self.recently_ended_contacts.is_empty() {
            self.contact_delay_timer.clear();
        }
        match self.candidates.iter_mut().find(|c| c.other.key == other) {
            Some(candidate) => candidate.contact_start_time = Some(time),
            None => error!(time, "contact begin with an object that is not a reach candidate, this should not happen"),
        }
    }

    pub fn on_contact_end(&mut self, other: EntityKey, time: f64) {
        if !self.bindings.is_bound(Topic::ManipulatorContact) || self.grasped.is_some() {
            return;
        }
        let in_contact = self
            .candidates
            .iter()
            .any(|c| c.other.key == other && c.contact_start_time.is_some());
        if !in_contact {
            trace!(time, "contact end for an object without an open contact");
            return;
        }
        self.recently_ended_contacts.push(EndedContact { other, end_time: time });
        if !self.contact_delay_timer.is_active() {
            self.contact_delay_timer.set(
                time,
                self.config.max_pre_grasp_gap * CONTACT_END_DELAY_FACTOR,
                false,
            );
        }
    }

    fn skip_recently_ended_contact(&mut self, other: EntityKey, time: f64) -> bool {
        let gap = self.config.max_pre_grasp_gap;
        let Some(idx) = self
            .recently_ended_contacts
            .iter()
            .position(|c| c.other == other && time - c.end_time < gap)
        else {
            return false;
        };
        self.recently_ended_contacts.remove(idx);
        if self.recently_ended_contacts.is_empty() {
            self.contact_delay_timer.clear();
        }
        true
    }

    fn delayed_contact_end_check(&mut self, now: f64) {
        let gap = self.config.max_pre_grasp_gap;
        let (expired, pending): (Vec<_>, Vec<_>) = self
            .recently_ended_contacts
            .drain(..)
            .partition(|c| now - c.end_time > gap);
        self.recently_ended_contacts = pending;

        for ended in expired {
            match self.candidates.iter_mut().find(|c| c.other.key == ended.other) {
                Some(candidate) if candidate.contact_start_time.is_some() => {
                    // The hand let go of the object; any future reach starts now.
                    candidate.contact_start_time = None;
                    candidate.first_seen_time = now;
                }
                _ => error!(now, "ended contact has no matching contact record, this should not happen"),
            }
        }

        if let Some(oldest) = self.recently_ended_contacts.iter().map(|c| c.end_time).reduce(f64::min) {
            let remaining = (oldest + gap * CONTACT_END_DELAY_FACTOR - now).max(0.0);
            self.contact_delay_timer.set(now, remaining, false);
        }
    }

    /// Emits the reach and pre-grasp phases for the grasped object.
    pub fn on_grasp_begin(&mut self, other: EntityKey, time: f64) -> Option<ReachAndPreGrasp> {
        if !self.bindings.is_bound(Topic::ManipulatorGrasp) {
            return None;
        }
        if self.grasped.is_some() {
            error!(time, "grasp begin while already grasping, this should not happen");
            return None;
        }
        let owner = self.owner.clone()?;
        let Some(candidate) = self.candidate(other).cloned() else {
            debug!(time, "grasped object was never a reach candidate");
            return None;
        };
        let Some(contact_time) = candidate.contact_start_time else {
            error!(time, other = %candidate.other.id, "grasped object is not in contact, this should not happen");
            return None;
        };

        self.grasped = Some(other);
        self.candidates.clear();
        self.recently_ended_contacts.clear();
        self.contact_delay_timer.clear();
        self.update_timer.pause(time);
        self.bindings.unbind(Topic::Overlap);

        Some(ReachAndPreGrasp {
            owner,
            other: candidate.other,
            reach_start: candidate.first_seen_time,
            contact_time,
            grasp_time: time,
        })
    }

    pub fn on_grasp_end(&mut self, other: EntityKey, time: f64, overlapping: &[EntityKey], registry: &EntityRegistry) {
        if !self.bindings.is_bound(Topic::ManipulatorGrasp) {
            return;
        }
        match self.grasped {
            None => {
                trace!(time, "grasp end without a tracked grasp");
                return;
            }
            Some(grasped) if grasped != other => {
                error!(time, "grasp end for a different object than the grasped one, this should not happen");
                return;
            }
            Some(_) => {}
        }
        self.grasped = None;
        self.bindings.bind(Topic::Overlap);
        self.trigger_initial_overlaps(time, overlapping, registry);
    }

    fn drop_dangling(&mut self, now: f64, registry: &EntityRegistry) {
        let gone: Vec<EntityKey> = self
            .candidates
            .iter()
            .map(|c| c.other.key)
            .chain(self.grasped)
            .filter(|key| !registry.is_alive(*key))
            .collect();
        for key in gone {
            self.on_entity_destroyed(key, now);
        }
    }

    /// Forgets every record of a destroyed entity.
    pub fn on_entity_destroyed(&mut self, key: EntityKey, time: f64) {
        if self.owner.as_ref().is_some_and(|o| o.key == key) {
            self.finish(time, true);
            return;
        }
        if self.grasped == Some(key) {
            self.grasped = None;
            self.bindings.bind(Topic::Overlap);
        }
        self.candidates.retain(|c| c.other.key != key);
        self.recently_ended_contacts.retain(|c| c.other != key);
        if self.recently_ended_contacts.is_empty() {
            self.contact_delay_timer.clear();
        }
        if self.candidates.is_empty() {
            self.update_timer.pause(time);
        }
    }
}

fn distance_between(registry: &EntityRegistry, a: EntityKey, b: EntityKey) -> Option<f64> {
    Some(registry.location(a)?.distance(registry.location(b)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    struct Scene {
        registry: EntityRegistry,
        hand: EntityKey,
        cup: EntityKey,
        listener: ReachListener,
    }

    fn scene() -> Scene {
        let mut registry = EntityRegistry::new();
        let hand = registry.register("hand", "RightHand").unwrap();
        let cup = registry.register("cup", "Cup").unwrap();
        registry.set_pose(hand, DVec3::new(0.0, 0.0, 100.0), DVec3::ZERO);
        registry.set_pose(cup, DVec3::new(30.0, 0.0, 100.0), DVec3::ZERO);
        let config = ReachConfig {
            update_rate: 0.1,
            min_dist: 1.0,
            max_pre_grasp_gap: 0.25,
        };
        let mut listener = ReachListener::new(config);
        listener.init(registry.get(hand).unwrap());
        listener.start(0.0, &[], &registry);
        Scene {
            registry,
            hand,
            cup,
            listener,
        }
    }

    #[test]
    fn approaching_keeps_and_retreating_restarts_the_reach_clock() {
        let mut s = scene();
        s.listener.on_overlap_begin(s.cup, 0.0, &s.registry);
        assert_eq!(s.listener.candidate(s.cup).unwrap().last_known_distance, 30.0);

        s.registry.set_pose(s.hand, DVec3::new(10.0, 0.0, 100.0), DVec3::ZERO);
        s.listener.tick(0.1, &s.registry);
        let c = s.listener.candidate(s.cup).unwrap();
        assert_eq!(c.first_seen_time, 0.0);
        assert_eq!(c.last_known_distance, 20.0);

        // Sub-threshold jitter is ignored.
        s.registry.set_pose(s.hand, DVec3::new(9.5, 0.0, 100.0), DVec3::ZERO);
        s.listener.tick(0.2, &s.registry);
        assert_eq!(s.listener.candidate(s.cup).unwrap().last_known_distance, 20.0);

        s.registry.set_pose(s.hand, DVec3::new(0.0, 0.0, 100.0), DVec3::ZERO);
        s.listener.tick(0.35, &s.registry);
        let c = s.listener.candidate(s.cup).unwrap();
        assert_eq!(c.first_seen_time, 0.35);
        assert_eq!(c.last_known_distance, 30.0);
    }

    #[test]
    fn grasp_emits_reach_and_pre_grasp() {
        let mut s = scene();
        s.listener.on_overlap_begin(s.cup, 1.0, &s.registry);
        s.listener.on_contact_begin(s.cup, 2.0);
        let phases = s.listener.on_grasp_begin(s.cup, 2.5).unwrap();
        assert_eq!((phases.reach_start, phases.contact_time, phases.grasp_time), (1.0, 2.0, 2.5));
        assert_eq!(s.listener.candidate_count(), 0);
        assert!(!s.listener.bindings().is_bound(Topic::Overlap));

        let intervals = phases.into_intervals();
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].kind, EventKind::Reach);
        assert_eq!(intervals[0].end(), Some(2.0));
        assert_eq!(intervals[1].kind, EventKind::PreGrasp);
        assert_eq!(intervals[1].start, 2.0);
        assert_eq!(intervals[0].participants[0].key, s.hand);
    }

    #[test]
    fn brief_contact_loss_is_concatenated() {
        let mut s = scene();
        s.listener.on_overlap_begin(s.cup, 0.0, &s.registry);
        s.listener.on_contact_begin(s.cup, 1.0);
        s.listener.on_contact_end(s.cup, 1.5);
        s.listener.on_contact_begin(s.cup, 1.6);
        s.listener.tick(2.0, &s.registry);
        let phases = s.listener.on_grasp_begin(s.cup, 2.0).unwrap();
        assert_eq!(phases.contact_time, 1.0);
        assert_eq!(phases.reach_start, 0.0);
    }

    #[test]
    fn long_contact_loss_restarts_the_reach() {
        let mut s = scene();
        s.listener.on_overlap_begin(s.cup, 0.0, &s.registry);
        s.listener.on_contact_begin(s.cup, 1.0);
        s.listener.on_contact_end(s.cup, 1.5);
        // Delay is 0.25 * 1.2 after the contact end.
        s.listener.tick(1.9, &s.registry);
        let c = s.listener.candidate(s.cup).unwrap();
        assert_eq!(c.contact_start_time, None);
        assert_eq!(c.first_seen_time, 1.9);
        assert!(s.listener.on_grasp_begin(s.cup, 2.0).is_none());
    }

    #[test]
    fn fresh_contact_after_the_gap_survives_the_delayed_check() {
        let mut s = scene();
        s.listener.on_overlap_begin(s.cup, 0.0, &s.registry);
        s.listener.on_contact_begin(s.cup, 1.0);
        s.listener.on_contact_end(s.cup, 1.5);
        // Too late to concatenate, so this is a new contact.
        s.listener.on_contact_begin(s.cup, 1.77);
        s.listener.tick(2.0, &s.registry);
        assert_eq!(s.listener.candidate(s.cup).unwrap().contact_start_time, Some(1.77));

        let phases = s.listener.on_grasp_begin(s.cup, 2.0).unwrap();
        assert_eq!((phases.reach_start, phases.contact_time), (0.0, 1.77));
        let kinds: Vec<EventKind> = phases.into_intervals().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Reach, EventKind::PreGrasp]);
    }

    #[test]
    fn grasp_end_rebuilds_candidates_from_overlaps() {
        let mut s = scene();
        s.listener.on_overlap_begin(s.cup, 0.0, &s.registry);
        s.listener.on_contact_begin(s.cup, 0.5);
        s.listener.on_grasp_begin(s.cup, 1.0).unwrap();
        // Overlaps are ignored while grasping.
        s.listener.on_overlap_begin(s.cup, 1.5, &s.registry);
        assert_eq!(s.listener.candidate_count(), 0);

        s.listener.on_grasp_end(s.cup, 3.0, &[s.cup], &s.registry);
        assert!(s.listener.bindings().is_bound(Topic::Overlap));
        assert_eq!(s.listener.candidate(s.cup).unwrap().first_seen_time, 3.0);
        assert_eq!(s.listener.grasped(), None);
    }

    #[test]
    fn overlap_end_drops_the_candidate() {
        let mut s = scene();
        s.listener.on_overlap_begin(s.cup, 0.0, &s.registry);
        s.listener.on_overlap_end(s.cup, 0.4);
        assert_eq!(s.listener.candidate_count(), 0);
        s.listener.on_contact_begin(s.cup, 0.5);
        assert!(s.listener.on_grasp_begin(s.cup, 0.6).is_none());
    }
}
