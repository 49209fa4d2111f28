// THEORY:
// Inbound signals are what the simulation tells us; bindings are which of those
// signals a monitor currently wants to hear. The engine's multicast delegates
// become a plain enum plus an explicit, idempotent subscription set: binding an
// already bound topic or unbinding an unbound one is reported, never doubled.

use crate::core_modules::entity::EntityKey;
use std::collections::HashSet;

/// Signals delivered by the simulation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// A shape owned by `owner` started overlapping `other`.
    ShapeOverlapBegin { owner: EntityKey, other: EntityKey, time: f64 },
    ShapeOverlapEnd { owner: EntityKey, other: EntityKey, time: f64 },
    /// The manipulator `owner` touched `other`.
    ManipulatorContactBegin { owner: EntityKey, other: EntityKey, time: f64 },
    ManipulatorContactEnd { owner: EntityKey, other: EntityKey, time: f64 },
    ManipulatorGraspBegin {
        owner: EntityKey,
        other: EntityKey,
        time: f64,
        grasp_type: String,
    },
    ManipulatorGraspEnd { owner: EntityKey, other: EntityKey, time: f64 },
    /// Time advanced without any other signal.
    Tick { time: f64 },
}

impl Signal {
    pub fn time(&self) -> f64 {
        match self {
            Signal::ShapeOverlapBegin { time, .. }
            | Signal::ShapeOverlapEnd { time, .. }
            | Signal::ManipulatorContactBegin { time, .. }
            | Signal::ManipulatorContactEnd { time, .. }
            | Signal::ManipulatorGraspBegin { time, .. }
            | Signal::ManipulatorGraspEnd { time, .. }
            | Signal::Tick { time } => *time,
        }
    }

    pub fn topic(&self) -> Option<Topic> {
        match self {
            Signal::ShapeOverlapBegin { .. } | Signal::ShapeOverlapEnd { .. } => Some(Topic::Overlap),
            Signal::ManipulatorContactBegin { .. } | Signal::ManipulatorContactEnd { .. } => {
                Some(Topic::ManipulatorContact)
            }
            Signal::ManipulatorGraspBegin { .. } | Signal::ManipulatorGraspEnd { .. } => {
                Some(Topic::ManipulatorGrasp)
            }
            Signal::Tick { .. } => None,
        }
    }
}

/// Families of signals a monitor can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Overlap,
    ManipulatorContact,
    ManipulatorGrasp,
}

/// The set of topics a monitor is currently bound to.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    bound: HashSet<Topic>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a topic, returns false if it was already bound.
    pub fn bind(&mut self, topic: Topic) -> bool {
        self.bound.insert(topic)
    }

    /// Unbinds a topic, returns false if it was not bound.
    pub fn unbind(&mut self, topic: Topic) -> bool {
        self.bound.remove(&topic)
    }

    pub fn unbind_all(&mut self) {
        self.bound.clear();
    }

    pub fn is_bound(&self, topic: Topic) -> bool {
        self.bound.contains(&topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_unbind_are_idempotent() {
        let mut bindings = Bindings::new();
        assert!(bindings.bind(Topic::Overlap));
        assert!(!bindings.bind(Topic::Overlap));
        assert!(bindings.unbind(Topic::Overlap));
        assert!(!bindings.unbind(Topic::Overlap));
    }

    #[test]
    fn signals_map_to_their_topic() {
        let key = EntityKey { index: 0, generation: 0 };
        let mut bindings = Bindings::new();
        bindings.bind(Topic::ManipulatorGrasp);
        let overlap = Signal::ShapeOverlapBegin { owner: key, other: key, time: 1.0 };
        let grasp = Signal::ManipulatorGraspEnd { owner: key, other: key, time: 1.0 };
        assert_eq!(overlap.topic(), Some(Topic::Overlap));
        assert!(!bindings.is_bound(Topic::Overlap));
        assert!(grasp.topic().is_some_and(|t| bindings.is_bound(t)));
        assert_eq!(Signal::Tick { time: 2.0 }.topic(), None);
        assert_eq!(overlap.time(), 1.0);
    }
}
