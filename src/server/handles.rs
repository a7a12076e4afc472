//! Generation-checked object table
//!
//! Console object handles travel through the driver as opaque `usize`
//! values. Instead of casting pointers, each handle packs a slot index and
//! the slot's generation. Removing an object bumps the generation, so a
//! client that races a close with a use gets `None` rather than whatever
//! object reused the slot.

use super::ServerError;

/// Low bits of a handle value hold `index + 1`; zero is never a valid handle.
const INDEX_BITS: u32 = 16;
const MAX_SLOTS: usize = (1 << INDEX_BITS) - 1;

const GENERATION_BITS: u32 = if usize::BITS - INDEX_BITS < 32 {
    usize::BITS - INDEX_BITS
} else {
    32
};
const GENERATION_MASK: u32 = u32::MAX >> (32 - GENERATION_BITS);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl ObjectId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Value placed in `IoDescriptor::object` / `ConnectionInfo`.
    pub fn to_handle(self) -> usize {
        ((self.generation as usize) << INDEX_BITS) | (self.index as usize + 1)
    }

    pub fn from_handle(handle: usize) -> Option<ObjectId> {
        let low = handle & MAX_SLOTS;
        if low == 0 {
            return None;
        }
        Some(ObjectId {
            index: (low - 1) as u32,
            generation: (handle >> INDEX_BITS) as u32,
        })
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of console objects addressed by [`ObjectId`].
#[derive(Debug)]
pub struct ObjectTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for ObjectTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Result<ObjectId, ServerError> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.slots.len() >= MAX_SLOTS {
                    return Err(ServerError::TableFull);
                }
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.len += 1;
        Ok(ObjectId {
            index,
            generation: slot.generation,
        })
    }

    fn slot(&self, id: ObjectId) -> Option<&Slot<T>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    pub fn get(&self, id: ObjectId) -> Option<&T> {
        self.slot(id).and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn get_by_handle(&self, handle: usize) -> Option<&T> {
        ObjectId::from_handle(handle).and_then(|id| self.get(id))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<T> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    ObjectId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Remove every object for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let doomed: Vec<ObjectId> = self
            .iter()
            .filter(|(_, value)| !keep(*value))
            .map(|(id, _)| id)
            .collect();
        for id in &doomed {
            self.remove(*id);
        }
        doomed.len()
    }
}
