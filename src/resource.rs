//! Resource pool: process-wide singleton store, one slot per resource type.

use std::any::{Any, TypeId};

use ahash::AHashMap;

use crate::error::{EcsError, Result};

/// One instance per resource type, addressable by `TypeId`.
///
/// Unlike a component column, a resource has no notion of "many rows" — the
/// pool stores exactly one boxed value per type and returns stable
/// references for the lifetime of the app. Adding a resource that is already
/// present is an error (`EcsError::ResourceAlreadyExists`); there is no
/// upsert path, matching the "Duplicate-registration" error kind.
#[derive(Default)]
pub struct ResourcePool {
    slots: AHashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: Any + Send + Sync>(&mut self, value: T) -> Result<()> {
        let type_id = TypeId::of::<T>();
        if self.slots.contains_key(&type_id) {
            return Err(EcsError::ResourceAlreadyExists(type_id));
        }
        self.slots.insert(type_id, Box::new(value));
        Ok(())
    }

    /// Inserts or overwrites the resource for `T`. Exists for callers that
    /// genuinely want upsert semantics (e.g. a host app syncing `Time` every
    /// frame); `add` remains the strict, spec-mandated entry point.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.slots.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.slots
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.slots
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut::<T>())
    }

    pub fn try_get<T: Any + Send + Sync>(&self) -> Result<&T> {
        self.get::<T>()
            .ok_or_else(|| EcsError::LookupMissing(std::any::type_name::<T>().to_string()))
    }

    pub fn has<T: Any + Send + Sync>(&self) -> bool {
        self.slots.contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.slots
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast::<T>().ok())
            .map(|b| *b)
    }

    /// Mutable access to `T` through a shared reference to the pool.
    ///
    /// # Safety
    /// The caller must ensure no other live reference (mutable or shared)
    /// to this resource exists for the duration of the returned borrow.
    /// The schedule upholds this by construction: it never runs two systems
    /// whose `SystemAccess` conflicts over the same resource type within
    /// the same execution group.
    pub unsafe fn get_mut_unchecked<T: Any + Send + Sync>(&self) -> Option<&mut T> {
        let boxed = self.slots.get(&TypeId::of::<T>())?;
        let shared: &T = boxed.downcast_ref::<T>()?;
        let ptr = shared as *const T as *mut T;
        Some(unsafe { &mut *ptr })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FrameCount(u32);

    #[test]
    fn add_then_get() {
        let mut pool = ResourcePool::new();
        pool.add(FrameCount(0)).unwrap();
        assert_eq!(pool.get::<FrameCount>().unwrap().0, 0);
    }

    #[test]
    fn add_twice_fails() {
        let mut pool = ResourcePool::new();
        pool.add(FrameCount(0)).unwrap();
        let err = pool.add(FrameCount(1));
        assert!(matches!(err, Err(EcsError::ResourceAlreadyExists(_))));
    }

    #[test]
    fn missing_lookup_is_an_error() {
        let pool = ResourcePool::new();
        assert!(pool.try_get::<FrameCount>().is_err());
    }

    #[test]
    fn remove_returns_value() {
        let mut pool = ResourcePool::new();
        pool.add(FrameCount(7)).unwrap();
        let removed = pool.remove::<FrameCount>().unwrap();
        assert_eq!(removed.0, 7);
        assert!(!pool.has::<FrameCount>());
    }
}
