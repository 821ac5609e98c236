// Enum-keyed resource slots
//
// Replaces bare index constants into parallel arrays: every key of a slot
// enum maps to exactly one filled entry, decided when the registry is built.

use anyhow::Result;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

pub trait SlotKey: Copy + std::fmt::Debug + 'static {
    /// Every key, in slot order. `ALL[k.index()] == k` must hold.
    const ALL: &'static [Self];

    fn index(self) -> usize;
}

/// Declare a fieldless enum whose variants are registry keys
macro_rules! slot_keys {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $($variant),+
        }

        impl $crate::registry::SlotKey for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn index(self) -> usize {
                self as usize
            }
        }
    };
}
pub(crate) use slot_keys;

pub struct Registry<K: SlotKey, T> {
    slots: Vec<T>,
    _key: PhantomData<K>,
}

impl<K: SlotKey, T> Registry<K, T> {
    /// Build one entry per key, in key order, stopping at the first error
    pub fn try_build(mut create: impl FnMut(K) -> Result<T>) -> Result<Self> {
        let mut slots = Vec::with_capacity(K::ALL.len());
        for &key in K::ALL {
            debug_assert_eq!(key.index(), slots.len());
            slots.push(create(key)?);
        }
        Ok(Self { slots, _key: PhantomData })
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        K::ALL.iter().copied().zip(self.slots.iter())
    }

    /// Mutable entries in reverse key order, the order resources are torn down in
    pub fn iter_rev_mut(&mut self) -> impl Iterator<Item = (K, &mut T)> {
        K::ALL.iter().copied().zip(self.slots.iter_mut()).rev()
    }
}

impl<K: SlotKey, T> Index<K> for Registry<K, T> {
    type Output = T;

    fn index(&self, key: K) -> &T {
        &self.slots[key.index()]
    }
}

impl<K: SlotKey, T> IndexMut<K> for Registry<K, T> {
    fn index_mut(&mut self, key: K) -> &mut T {
        &mut self.slots[key.index()]
    }
}
