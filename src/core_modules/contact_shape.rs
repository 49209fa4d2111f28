// THEORY:
// The `ContactShapeMonitor` is the lowest behavioural layer: it sits on one
// semantically annotated object and listens to the raw overlap edges of that
// object's contact shape. It produces two relationships.
//
// Key architectural principles:
// 1.  **Contact Debounce**: Physics overlap edges jitter. An overlap-end does not
//     publish immediately; the contact is parked for `max_contact_gap` seconds and
//     an overlap-begin with the same object inside that window resumes it. Only a
//     contact that stays ended is published, through the minimum-duration filter.
// 2.  **Support Classification**: Every overlapping object is a SupportedBy
//     candidate. A periodic check (every `sb_update_rate` seconds, only while
//     candidates exist) promotes a candidate to "supporting" when the relative
//     vertical speed is small and the owner rests above it. Promotion opens a
//     SupportedBy interval and records its pair key.
// 3.  **Support Query**: The set of active SupportedBy pair keys is what the
//     pick-and-place layer asks about; `is_supported_by_something` is simply
//     "that set is not empty", and the end time of the last support is kept so
//     slides can be cut at the exact moment support was lost.

use crate::core_modules::config::ContactConfig;
use crate::core_modules::entity::{EntityKey, EntityRegistry, SemanticEntity};
use crate::core_modules::event::{EventInterval, EventKind, EventSink, exceeds_min_duration};
use crate::core_modules::signal::{Bindings, Topic};
use crate::core_modules::timer::Timer;
use tracing::{debug, error, trace};

/// A contact whose overlap ended but may still be continued.
#[derive(Debug, Clone)]
struct ParkedContact {
    event: EventInterval,
    end_time: f64,
}

pub struct ContactShapeMonitor {
    config: ContactConfig,
    log_contact: bool,
    log_supported_by: bool,
    owner: Option<SemanticEntity>,

    // --- Contact ---
    open_contacts: Vec<EventInterval>,
    recently_ended: Vec<ParkedContact>,

    // --- SupportedBy ---
    sb_candidates: Vec<SemanticEntity>,
    open_supported_by: Vec<EventInterval>,
    supported_by_pair_ids: Vec<u64>,
    last_supported_by_end_time: Option<f64>,
    sb_timer: Timer,

    bindings: Bindings,
    last_time: f64,
    is_init: bool,
    is_started: bool,
    is_finished: bool,
}

impl ContactShapeMonitor {
    pub fn new(config: ContactConfig, log_contact: bool) -> Self {
        Self {
            config,
            log_contact,
            log_supported_by: true,
            owner: None,
            open_contacts: Vec::new(),
            recently_ended: Vec::new(),
            sb_candidates: Vec::new(),
            open_supported_by: Vec::new(),
            supported_by_pair_ids: Vec::new(),
            last_supported_by_end_time: None,
            sb_timer: Timer::new(),
            bindings: Bindings::new(),
            last_time: 0.0,
            is_init: false,
            is_started: false,
            is_finished: false,
        }
    }

    /// Attaches the monitor to its owner. Support is always tracked; the flag
    /// only controls whether SupportedBy intervals are published.
    pub fn init(&mut self, owner: &SemanticEntity, log_supported_by: bool) -> bool {
        if self.is_init || self.is_finished {
            return false;
        }
        self.owner = Some(owner.clone());
        self.log_supported_by = log_supported_by;
        self.is_init = true;
        true
    }

    /// Starts listening and replays the objects already overlapping the shape.
    pub fn start(
        &mut self,
        now: f64,
        overlapping: &[EntityKey],
        registry: &EntityRegistry,
        sink: &mut dyn EventSink,
    ) {
        if self.is_started || !self.is_init || self.is_finished {
            return;
        }
        self.last_time = now;
        self.bindings.bind(Topic::Overlap);
        self.is_started = true;
        for &other in overlapping {
            self.on_overlap_begin(other, now, registry, sink);
        }
    }

    /// Publishes every open interval at `now` and stops. Idempotent.
    pub fn finish(&mut self, now: f64, forced: bool, sink: &mut dyn EventSink) {
        if self.is_finished {
            return;
        }
        debug!(
            forced,
            contacts = self.open_contacts.len() + self.recently_ended.len(),
            supports = self.open_supported_by.len(),
            "finishing contact shape"
        );
        for parked in std::mem::take(&mut self.recently_ended) {
            self.publish_contact(parked.event, parked.end_time, sink);
        }
        for event in std::mem::take(&mut self.open_contacts) {
            self.publish_contact(event, now, sink);
        }
        for event in std::mem::take(&mut self.open_supported_by) {
            self.publish_supported_by(event, now, sink);
        }
        if !self.supported_by_pair_ids.is_empty() {
            self.last_supported_by_end_time = Some(now);
        }
        self.supported_by_pair_ids.clear();
        self.sb_candidates.clear();
        self.sb_timer.clear();
        self.bindings.unbind_all();
        self.is_started = false;
        self.is_init = false;
        self.is_finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    pub fn owner(&self) -> Option<&SemanticEntity> {
        self.owner.as_ref()
    }

    /// True iff at least one SupportedBy relation is active.
    pub fn is_supported_by_something(&self) -> bool {
        !self.supported_by_pair_ids.is_empty()
    }

    /// When the most recent SupportedBy relation ended.
    pub fn last_supported_by_end_time(&self) -> Option<f64> {
        self.last_supported_by_end_time
    }

    /// Number of intervals not yet published (open or parked).
    pub fn open_interval_count(&self) -> usize {
        self.open_contacts.len() + self.recently_ended.len() + self.open_supported_by.len()
    }

    pub fn on_overlap_begin(
        &mut self,
        other: EntityKey,
        time: f64,
        registry: &EntityRegistry,
        sink: &mut dyn EventSink,
    ) {
        if !self.bindings.is_bound(Topic::Overlap) {
            return;
        }
        let Some(owner) = self.owner.clone() else {
            return;
        };
        if other == owner.key {
            return;
        }
        // Unannotated objects are expected and silently ignored.
        let Some(other_entity) = registry.get(other) else {
            return;
        };

        if self.log_contact {
            self.begin_contact(&owner, other_entity, time, sink);
        }

        let already_tracked = self.sb_candidates.iter().any(|c| c.key == other)
            || self
                .open_supported_by
                .iter()
                .any(|ev| ev.other().is_some_and(|o| o.key == other));
        if !already_tracked {
            self.sb_candidates.push(other_entity.clone());
            self.ensure_sb_timer(time);
        }
    }

    fn begin_contact(&mut self, owner: &SemanticEntity, other: &SemanticEntity, time: f64, sink: &mut dyn EventSink) {
        // Concatenate with a contact that ended only a moment ago.
        if let Some(idx) = self
            .recently_ended
            .iter()
            .position(|p| p.event.other().is_some_and(|o| o.key == other.key))
        {
            let parked = self.recently_ended.remove(idx);
            if time - parked.end_time < self.config.max_contact_gap {
                trace!(other = %other.id, gap = time - parked.end_time, "concatenating contact");
                self.open_contacts.push(parked.event);
                return;
            }
            self.publish_contact(parked.event, parked.end_time, sink);
        }

        if self
            .open_contacts
            .iter()
            .any(|ev| ev.other().is_some_and(|o| o.key == other.key))
        {
            error!(time, other = %other.id, "overlap begin with an object already in contact, this should not happen");
            return;
        }
        self.open_contacts
            .push(EventInterval::open(EventKind::Contact, time, vec![owner.clone(), other.clone()]));
    }

    pub fn on_overlap_end(&mut self, other: EntityKey, time: f64, sink: &mut dyn EventSink) {
        if !self.bindings.is_bound(Topic::Overlap) {
            return;
        }

        if let Some(idx) = self
            .open_contacts
            .iter()
            .position(|ev| ev.other().is_some_and(|o| o.key == other))
        {
            let event = self.open_contacts.remove(idx);
            if self.config.max_contact_gap > 0.0 {
                self.recently_ended.push(ParkedContact { event, end_time: time });
            } else {
                self.publish_contact(event, time, sink);
            }
        }

        // Just a candidate, nothing was ever opened.
        if let Some(idx) = self.sb_candidates.iter().position(|c| c.key == other) {
            self.sb_candidates.remove(idx);
        } else if let Some(idx) = self
            .open_supported_by
            .iter()
            .position(|ev| ev.other().is_some_and(|o| o.key == other))
        {
            let event = self.open_supported_by.remove(idx);
            self.end_support(event, time, sink);
        }

        if self.sb_candidates.is_empty() {
            self.sb_timer.pause(time);
        }
    }

    fn end_support(&mut self, event: EventInterval, time: f64, sink: &mut dyn EventSink) {
        self.supported_by_pair_ids.retain(|&id| id != event.pair_key);
        self.last_supported_by_end_time = Some(time);
        trace!(time, pair_key = event.pair_key, "support ended");
        self.publish_supported_by(event, time, sink);
    }

    /// Advances the monitor: drops destroyed entities, publishes contacts whose
    /// concatenation window expired and runs the SupportedBy check when due.
    pub fn tick(&mut self, now: f64, registry: &EntityRegistry, sink: &mut dyn EventSink) {
        if !self.is_started {
            return;
        }
        let last_seen = self.last_time;
        self.last_time = now;
        self.drop_dangling(last_seen, registry, sink);

        let gap = self.config.max_contact_gap;
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.recently_ended)
            .into_iter()
            .partition(|p| now - p.end_time >= gap);
        self.recently_ended = kept;
        for parked in expired {
            self.publish_contact(parked.event, parked.end_time, sink);
        }

        if self.sb_timer.fire_if_due(now) {
            self.supported_by_update_check(now, registry);
        }
    }

    fn supported_by_update_check(&mut self, now: f64, registry: &EntityRegistry) {
        let Some(owner) = self.owner.clone() else {
            return;
        };
        let Some(owner_pose) = registry.pose(owner.key) else {
            return;
        };

        let mut still_candidates = Vec::with_capacity(self.sb_candidates.len());
        for candidate in std::mem::take(&mut self.sb_candidates) {
            let Some(other_pose) = registry.pose(candidate.key) else {
                continue;
            };
            let relative_vertical_speed = (owner_pose.linear_velocity.z - other_pose.linear_velocity.z).abs();
            let rests_above = owner_pose.location.z > other_pose.location.z;
            if relative_vertical_speed < self.config.sb_max_vertical_speed && rests_above {
                let event = EventInterval::open(EventKind::SupportedBy, now, vec![owner.clone(), candidate.clone()]);
                trace!(now, supporting = %candidate.id, pair_key = event.pair_key, "support started");
                self.supported_by_pair_ids.push(event.pair_key);
                self.open_supported_by.push(event);
            } else {
                still_candidates.push(candidate);
            }
        }
        self.sb_candidates = still_candidates;

        if self.sb_candidates.is_empty() {
            self.sb_timer.pause(now);
        }
    }

    fn ensure_sb_timer(&mut self, now: f64) {
        if self.sb_timer.is_active() {
            return;
        }
        if self.sb_timer.is_paused() {
            self.sb_timer.unpause(now);
        } else {
            self.sb_timer.set(now, self.config.sb_update_rate, true);
        }
    }

    fn drop_dangling(&mut self, last_seen: f64, registry: &EntityRegistry, sink: &mut dyn EventSink) {
        let gone: Vec<EntityKey> = self
            .open_contacts
            .iter()
            .chain(self.open_supported_by.iter())
            .filter_map(|ev| ev.other().map(|o| o.key))
            .chain(self.sb_candidates.iter().map(|c| c.key))
            .filter(|key| !registry.is_alive(*key))
            .collect();
        for key in gone {
            debug!(?key, "tracked object is gone, closing its intervals");
            self.on_entity_destroyed(key, last_seen, sink);
        }
    }

    /// Closes every interval involving `key` at `time`.
    pub fn on_entity_destroyed(&mut self, key: EntityKey, time: f64, sink: &mut dyn EventSink) {
        if self.owner.as_ref().is_some_and(|o| o.key == key) {
            self.finish(time, true, sink);
            return;
        }
        self.sb_candidates.retain(|c| c.key != key);
        if let Some(idx) = self
            .open_contacts
            .iter()
            .position(|ev| ev.other().is_some_and(|o| o.key == key))
        {
            let event = self.open_contacts.remove(idx);
            self.publish_contact(event, time, sink);
        }
        if let Some(idx) = self
            .open_supported_by
            .iter()
            .position(|ev| ev.other().is_some_and(|o| o.key == key))
        {
            let event = self.open_supported_by.remove(idx);
            self.end_support(event, time, sink);
        }
        if self.sb_candidates.is_empty() {
            self.sb_timer.pause(time);
        }
    }

    fn publish_contact(&self, event: EventInterval, end_time: f64, sink: &mut dyn EventSink) {
        self.publish_filtered(event, end_time, self.config.min_contact_duration, sink);
    }

    fn publish_supported_by(&self, event: EventInterval, end_time: f64, sink: &mut dyn EventSink) {
        if self.log_supported_by {
            self.publish_filtered(event, end_time, self.config.min_supported_by_duration, sink);
        }
    }

    fn publish_filtered(&self, mut event: EventInterval, end_time: f64, min_duration: f64, sink: &mut dyn EventSink) {
        if !exceeds_min_duration(event.start, end_time, min_duration) {
            trace!(kind = ?event.kind, start = event.start, end_time, "dropping short event");
            return;
        }
        match event.finish(end_time) {
            Ok(()) => sink.publish(event),
            Err(err) => error!(%err, "contact shape event could not be finished, this should not happen"),
        }
    }
}
