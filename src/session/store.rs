use std::any::{ Any, TypeId };
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Name of a session slot together with the type stored in it.
pub struct SessionKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SessionKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self { name, _marker: PhantomData }
    }
}

impl<T> Clone for SessionKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SessionKey<T> {}

impl<T> fmt::Debug for SessionKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.name)
    }
}

type Slot = (&'static str, TypeId);

/// Per-session values, created lazily on first access.
#[derive(Default)]
pub struct SessionStore {
    slots: HashMap<Slot, Box<dyn Any + Send + Sync>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot<T: 'static>(key: SessionKey<T>) -> Slot {
        (key.name, TypeId::of::<T>())
    }

    /// Returns the stored value, storing `default` first if the key is absent.
    /// Once a value exists, later defaults are ignored.
    pub fn get_or_init<T: Any + Send + Sync>(&mut self, key: SessionKey<T>, default: T) -> &mut T {
        self.get_or_init_with(key, || default)
    }

    pub fn get_or_init_with<T, F>(&mut self, key: SessionKey<T>, init: F) -> &mut T
        where T: Any + Send + Sync, F: FnOnce() -> T
    {
        self.slots
            .entry(Self::slot(key))
            .or_insert_with(|| Box::new(init()))
            .downcast_mut::<T>()
            .unwrap_or_else(|| unreachable!("slot {} is keyed by its type", key.name))
    }

    pub fn get<T: Any + Send + Sync>(&self, key: SessionKey<T>) -> Option<&T> {
        self.slots.get(&Self::slot(key)).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self, key: SessionKey<T>) -> Option<&mut T> {
        self.slots.get_mut(&Self::slot(key)).and_then(|v| v.downcast_mut::<T>())
    }

    pub fn contains<T: 'static>(&self, key: SessionKey<T>) -> bool {
        self.slots.contains_key(&Self::slot(key))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.keys().map(|(name, _)| name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER: SessionKey<u32> = SessionKey::new("counter");
    const LABEL: SessionKey<String> = SessionKey::new("label");

    #[test]
    fn get_or_init_is_idempotent() {
        let mut store = SessionStore::new();
        assert_eq!(*store.get_or_init(COUNTER, 7), 7);
        assert_eq!(*store.get_or_init(COUNTER, 99), 7);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn values_can_be_updated_in_place() {
        let mut store = SessionStore::new();
        *store.get_or_init(COUNTER, 0) += 5;
        store.get_or_init(LABEL, String::new()).push_str("abc");
        assert_eq!(store.get(COUNTER), Some(&5));
        assert_eq!(store.get(LABEL).map(String::as_str), Some("abc"));
    }

    #[test]
    fn absent_keys_read_as_none() {
        let mut store = SessionStore::new();
        assert!(store.get(COUNTER).is_none());
        assert!(!store.contains(COUNTER));
        assert!(store.get_mut(LABEL).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn same_name_with_another_type_is_a_separate_slot() {
        const OTHER: SessionKey<bool> = SessionKey::new("counter");
        let mut store = SessionStore::new();
        store.get_or_init(COUNTER, 1);
        assert!(!*store.get_or_init(OTHER, false));
        assert_eq!(store.get(COUNTER), Some(&1));
    }

    #[test]
    fn lazy_initializer_runs_once() {
        let mut store = SessionStore::new();
        let mut runs = 0;
        store.get_or_init_with(COUNTER, || { runs += 1; 3 });
        store.get_or_init_with(COUNTER, || { runs += 1; 4 });
        assert_eq!(runs, 1);
    }
}
