// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Component and Bundle traits.
//!
//! Components are plain-old-data attached to entities; bundles group several
//! component fields so they can be added or removed atomically. Unlike the
//! archetype-scoped `register_component` this crate started from, type ids
//! now come from the process-wide `TypeRegistrar` (see `type_registry.rs`).

use std::any::TypeId;

use smallvec::{smallvec, SmallVec};

use crate::type_registry::{BundleField, TypeIndex, TypeRegistrar};

/// Maximum number of fields supported by the built-in tuple `Bundle` impls.
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// Marker trait for components. Components must be `'static` (no borrowed
/// data) and carry no drop requirements the core is obliged to honour; any
/// `'static + Send + Sync` type qualifies.
pub trait Component: 'static + Send + Sync {}

impl<T: 'static + Send + Sync> Component for T {}

/// A value whose fields are all component types, registered and written as
/// one atomic unit. The core never reads a bundle's in-memory layout: the
/// generated `write_components` destructures the value directly into the
/// destination column pointers, so real field offsets never need to match
/// `BundleField`'s (synthetic, purely informational) offsets.
pub trait Bundle: Send + Sync + 'static {
    /// `TypeId`s of this bundle's fields, in declaration order.
    fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Registers each field as a component, returning their dense ids in
    /// declaration order.
    fn register(registrar: &TypeRegistrar) -> SmallVec<[TypeIndex; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Writes each field into the matching destination pointer. `ptrs` must
    /// have one entry per field, in declaration order, each pointing at
    /// correctly sized and aligned storage for that field's type.
    ///
    /// # Safety
    /// Caller must ensure every pointer in `ptrs` is valid, writable, and
    /// aligned for its corresponding field type.
    unsafe fn write_components(self, ptrs: &[*mut u8]);
}

/// Builds the synthetic `BundleField` table described in §4.1: a
/// contiguous, declaration-order layout that exists so `get_bundle_info` has
/// something to report, not because any code copies through it.
pub fn synthetic_bundle_fields(registrar: &TypeRegistrar, ids: &[TypeIndex]) -> Vec<BundleField> {
    let mut offset = 0u32;
    ids.iter()
        .map(|&id| {
            let size = registrar.get_type_info(id).map(|info| info.size).unwrap_or(0);
            let field = BundleField {
                field_offset: offset,
                field_size: size,
                component_id: id,
            };
            offset += size;
            field
        })
        .collect()
}

// Bundles are implemented only for tuples (never blanket-implemented for
// `T: Component`, which would conflict with the tuple impls below).
macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> Bundle for ($($T,)*) {
            fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(TypeId::of::<$T>()),*]
            }

            fn register(registrar: &TypeRegistrar) -> SmallVec<[TypeIndex; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(registrar.register_component::<$T>()),*]
            }

            #[allow(non_snake_case)]
            unsafe fn write_components(self, ptrs: &[*mut u8]) {
                let ($($T,)*) = self;
                let mut i = 0;
                $(
                    unsafe { std::ptr::write(ptrs[i] as *mut $T, $T); }
                    i += 1;
                )*
                let _ = i;
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);
