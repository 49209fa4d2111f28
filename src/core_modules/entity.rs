// THEORY:
// The `entity` module is the identity layer of the event engine. Every monitor
// needs to answer the same two questions about the engine objects it hears
// about: "is this thing semantically annotated?" and "where is it right now?".
//
// Key architectural principles:
// 1.  **Explicit Ownership**: The `EntityRegistry` is a plain value constructed by
//     the composition root and lent to monitors as `&EntityRegistry`. Only the
//     owner registers, unregisters and updates poses; monitors only look up.
// 2.  **Checked Handles**: Entities are addressed by an `EntityKey` made of an arena
//     index plus a generation counter. When an object is destroyed its slot's
//     generation is bumped, so every outstanding key becomes a failed lookup
//     instead of a dangling reference. "Entity gone" is a `None`, never a crash.
// 3.  **Stable Identity**: The semantic `id` and `class` of an entity never change
//     while it lives. The numeric `object_id` is the input of the pairing function
//     and is never reused, even after the slot is recycled.

use crate::core_modules::error::RegistryError;
use glam::DVec3;
use serde::Serialize;
use std::collections::HashMap;

/// Generation-checked handle to a registered entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityKey {
    pub index: u32,
    pub generation: u32,
}

/// A semantically annotated simulation object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticEntity {
    /// Handle back into the registry; may go stale when the object is destroyed.
    pub key: EntityKey,
    /// Numeric object id, unique for the lifetime of the registry.
    pub object_id: u32,
    /// Opaque, stable semantic id.
    pub id: String,
    /// Semantic class name.
    pub class: String,
}

/// Kinematic state pushed by the engine layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub location: DVec3,
    pub linear_velocity: DVec3,
}

#[derive(Debug)]
struct Entry {
    entity: SemanticEntity,
    pose: Pose,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Arena of semantic entities addressed by [`EntityKey`].
#[derive(Debug, Default)]
pub struct EntityRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_id: HashMap<String, EntityKey>,
    next_object_id: u32,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new entity and returns its handle.
    pub fn register(&mut self, id: &str, class: &str) -> Result<EntityKey, RegistryError> {
        self.register_at(id, class, Pose::default())
    }

    /// Registers a new entity with an initial pose.
    pub fn register_at(&mut self, id: &str, class: &str, pose: Pose) -> Result<EntityKey, RegistryError> {
        if id.is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if self.by_id.contains_key(id) {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }

        let key = match self.free.pop() {
            Some(index) => EntityKey {
                index,
                generation: self.slots[index as usize].generation,
            },
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                EntityKey {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };

        let object_id = self.next_object_id;
        self.next_object_id += 1;

        self.slots[key.index as usize].entry = Some(Entry {
            entity: SemanticEntity {
                key,
                object_id,
                id: id.to_string(),
                class: class.to_string(),
            },
            pose,
        });
        self.by_id.insert(id.to_string(), key);
        Ok(key)
    }

    /// Removes an entity; every copy of its key stops resolving.
    pub fn unregister(&mut self, key: EntityKey) -> Option<SemanticEntity> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.by_id.remove(&entry.entity.id);
        Some(entry.entity)
    }

    fn entry(&self, key: EntityKey) -> Option<&Entry> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Resolves a handle, `None` if the entity is gone.
    pub fn get(&self, key: EntityKey) -> Option<&SemanticEntity> {
        self.entry(key).map(|e| &e.entity)
    }

    pub fn is_alive(&self, key: EntityKey) -> bool {
        self.entry(key).is_some()
    }

    /// Looks up an entity by its semantic id.
    pub fn find(&self, id: &str) -> Option<EntityKey> {
        self.by_id.get(id).copied()
    }

    pub fn pose(&self, key: EntityKey) -> Option<Pose> {
        self.entry(key).map(|e| e.pose)
    }

    pub fn location(&self, key: EntityKey) -> Option<DVec3> {
        self.entry(key).map(|e| e.pose.location)
    }

    /// Updates the kinematic state of an entity, returns false if it is gone.
    pub fn set_pose(&mut self, key: EntityKey, location: DVec3, linear_velocity: DVec3) -> bool {
        let Some(slot) = self.slots.get_mut(key.index as usize) else {
            return false;
        };
        if slot.generation != key.generation {
            return false;
        }
        match slot.entry.as_mut() {
            Some(entry) => {
                entry.pose = Pose {
                    location,
                    linear_velocity,
                };
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
