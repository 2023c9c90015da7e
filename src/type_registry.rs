//! Type registry: assigns dense integer ids to component and resource types
//! and records their size/alignment and bundle field layouts.

use std::any::TypeId;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{EcsError, Result};

/// Dense id assigned to a registered component or resource type.
pub type TypeIndex = u32;

/// `(size, alignment)` of a registered type, plus its computed offset once
/// it is placed inside a specific archetype's column layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    pub size: u32,
    pub align: u32,
}

/// One field of a registered bundle: `(field_offset_in_bundle, field_size, component_type_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleField {
    pub field_offset: u32,
    pub field_size: u32,
    pub component_id: TypeIndex,
}

type DropFn = unsafe fn(*mut u8);

struct RegistryInner {
    type_ids: FxHashMap<TypeId, TypeIndex>,
    infos: Vec<TypeInfo>,
    drop_fns: Vec<Option<DropFn>>,
    bundles: FxHashMap<TypeId, Vec<BundleField>>,
}

/// Maps component/resource Rust types to stable dense ids.
///
/// Registration is idempotent and safe under concurrent callers: a
/// reader-writer lock guards the id list, matching the "writer lock during
/// registration, lock-free readers" discipline this crate's concurrency
/// model calls for at this layer (in practice readers still take the lock
/// in read mode, since `parking_lot::RwLock` is cheap and a fully lock-free
/// map is not worth the complexity at registry scale).
pub struct TypeRegistrar {
    inner: RwLock<RegistryInner>,
}

impl Default for TypeRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistrar {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                type_ids: FxHashMap::default(),
                infos: Vec::new(),
                drop_fns: Vec::new(),
                bundles: FxHashMap::default(),
            }),
        }
    }

    /// Registers `T`, returning its id. Idempotent: a second call with the
    /// same `T` returns the same id. `align == 0` means "compute a default":
    /// the larger of `T`'s natural alignment and a power-of-two ≤ 64 chosen
    /// from `size_of::<T>()`.
    pub fn register_component<T: 'static>(&self) -> TypeIndex {
        self.register_component_with_align::<T>(0)
    }

    pub fn register_component_with_align<T: 'static>(&self, align: u32) -> TypeIndex {
        let type_id = TypeId::of::<T>();
        if let Some(id) = self.inner.read().type_ids.get(&type_id).copied() {
            return id;
        }
        let size = std::mem::size_of::<T>() as u32;
        let natural_align = std::mem::align_of::<T>() as u32;
        let align = if align == 0 {
            default_alignment(size, natural_align)
        } else {
            align
        };
        let mut inner = self.inner.write();
        // Another writer may have registered T while we waited for the lock.
        if let Some(id) = inner.type_ids.get(&type_id).copied() {
            return id;
        }
        let id = inner.infos.len() as TypeIndex;
        inner.infos.push(TypeInfo { size, align });
        inner.drop_fns.push(None);
        inner.type_ids.insert(type_id, id);
        id
    }

    /// Registers `T` with opt-in destructor support: the registered drop
    /// glue runs when a row holding `T` is overwritten by a hole-compaction
    /// move's *source* slot being freed without a corresponding copy (i.e.
    /// when component bytes are discarded, not relocated). The core does
    /// not call this automatically; only types registered through this path
    /// carry drop glue at all.
    pub fn register_component_with_drop<T: 'static>(&self) -> TypeIndex {
        let id = self.register_component::<T>();
        if std::mem::needs_drop::<T>() {
            let mut inner = self.inner.write();
            inner.drop_fns[id as usize] = Some(drop_in_place::<T>);
        }
        id
    }

    pub fn get_type_id<T: 'static>(&self) -> Option<TypeIndex> {
        self.inner.read().type_ids.get(&TypeId::of::<T>()).copied()
    }

    pub fn get_type_info(&self, id: TypeIndex) -> Option<TypeInfo> {
        self.inner.read().infos.get(id as usize).copied()
    }

    pub fn drop_fn(&self, id: TypeIndex) -> Option<DropFn> {
        self.inner.read().drop_fns.get(id as usize).copied().flatten()
    }

    /// Registers a bundle type: each public field becomes a registered
    /// component, and the ordered `(offset, size, component_id)` triples are
    /// cached for fast copy-into-archetype-columns. Idempotent per bundle
    /// type. Fails with `TypeMisuse` if the bundle has no fields.
    pub fn register_bundle_fields<B: 'static>(
        &self,
        fields: Vec<BundleField>,
    ) -> Result<()> {
        if fields.is_empty() {
            return Err(EcsError::TypeMisuse(
                "bundle must declare at least one field".into(),
            ));
        }
        let type_id = TypeId::of::<B>();
        let mut inner = self.inner.write();
        inner.bundles.entry(type_id).or_insert(fields);
        Ok(())
    }

    pub fn get_bundle_info<B: 'static>(&self) -> Option<Vec<BundleField>> {
        self.inner.read().bundles.get(&TypeId::of::<B>()).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

unsafe fn drop_in_place<T>(ptr: *mut u8) {
    unsafe { std::ptr::drop_in_place(ptr as *mut T) }
}

fn default_alignment(size: u32, natural_align: u32) -> u32 {
    if size == 0 {
        return natural_align.max(1);
    }
    // Largest power of two that is both <= 64 and <= size.
    let mut candidate = 1u32;
    while candidate * 2 <= 64 && candidate * 2 <= size {
        candidate *= 2;
    }
    natural_align.max(candidate).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;
    struct Position {
        _x: f32,
        _y: f32,
    }

    #[test]
    fn register_is_idempotent() {
        let reg = TypeRegistrar::new();
        let a = reg.register_component::<Position>();
        let b = reg.register_component::<Position>();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_struct_registers_with_size_zero() {
        let reg = TypeRegistrar::new();
        let id = reg.register_component::<Marker>();
        let info = reg.get_type_info(id).unwrap();
        assert_eq!(info.size, 0);
    }

    #[test]
    fn distinct_types_get_distinct_ids() {
        let reg = TypeRegistrar::new();
        let a = reg.register_component::<Position>();
        let b = reg.register_component::<Marker>();
        assert_ne!(a, b);
    }

    #[test]
    fn bundle_with_no_fields_is_rejected() {
        struct EmptyBundle;
        let reg = TypeRegistrar::new();
        let err = reg.register_bundle_fields::<EmptyBundle>(Vec::new());
        assert!(matches!(err, Err(EcsError::TypeMisuse(_))));
    }
}
