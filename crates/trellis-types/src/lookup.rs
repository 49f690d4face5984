//! Lookup - immutable composable service registry.
//!
//! A [`Lookup`] is an ordered, immutable collection of typed instances.
//! New facts are modeled by constructing a new Lookup ([`with`] /
//! [`merge`]); existing snapshots are never mutated and are therefore
//! safely shared across threads without locking.
//!
//! # Precedence
//!
//! `find` returns the *first* instance of the requested type.
//! `merge(a, b)` keeps all of `a`'s entries ahead of `b`'s, so the earlier
//! source wins on conflict.
//!
//! # Example
//!
//! ```
//! use trellis_types::Lookup;
//!
//! #[derive(Debug, PartialEq)]
//! struct Greeting(&'static str);
//!
//! let a = Lookup::of(Greeting("hi"));
//! let b = Lookup::of(Greeting("hello")).with(42_u32);
//!
//! let merged = Lookup::merge(a, b);
//! assert_eq!(merged.find::<Greeting>().unwrap().0, "hi");
//! assert_eq!(*merged.find::<u32>().unwrap(), 42);
//! assert_eq!(merged.find_all::<Greeting>().len(), 2);
//! ```
//!
//! [`with`]: Lookup::with
//! [`merge`]: Lookup::merge

use std::any::{Any, TypeId};
use std::sync::Arc;

#[derive(Clone)]
struct Entry {
    type_id: TypeId,
    instance: Arc<dyn Any + Send + Sync>,
}

/// Immutable ordered collection of typed service instances.
#[derive(Clone, Default)]
pub struct Lookup {
    entries: Arc<[Entry]>,
}

impl Lookup {
    /// The empty lookup.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A lookup holding a single instance.
    #[must_use]
    pub fn of<T: Any + Send + Sync>(instance: T) -> Self {
        Self::empty().with(instance)
    }

    /// A new lookup with `instance` appended (lower precedence than
    /// existing entries).
    #[must_use]
    pub fn with<T: Any + Send + Sync>(&self, instance: T) -> Self {
        let mut entries: Vec<Entry> = self.entries.to_vec();
        entries.push(Entry {
            type_id: TypeId::of::<T>(),
            instance: Arc::new(instance),
        });
        Self {
            entries: entries.into(),
        }
    }

    /// Composes two lookups; `first`'s entries take precedence.
    #[must_use]
    pub fn merge(first: Self, second: Self) -> Self {
        if first.entries.is_empty() {
            return second;
        }
        if second.entries.is_empty() {
            return first;
        }
        let entries: Vec<Entry> = first
            .entries
            .iter()
            .chain(second.entries.iter())
            .cloned()
            .collect();
        Self {
            entries: entries.into(),
        }
    }

    /// The first instance of type `T`, if any.
    #[must_use]
    pub fn find<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let wanted = TypeId::of::<T>();
        self.entries
            .iter()
            .find(|e| e.type_id == wanted)
            .and_then(|e| Arc::clone(&e.instance).downcast::<T>().ok())
    }

    /// Every instance of type `T`, in precedence order.
    #[must_use]
    pub fn find_all<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        let wanted = TypeId::of::<T>();
        self.entries
            .iter()
            .filter(|e| e.type_id == wanted)
            .filter_map(|e| Arc::clone(&e.instance).downcast::<T>().ok())
            .collect()
    }

    /// Number of entries of all types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no entries exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lookup({} entries)", self.entries.len())
    }
}
