//! Compute-once cache for values derived from a message's multipart body.

use once_cell::sync::OnceCell;

use crate::core::multipart::Multipart;

/// A value computed from a [`Multipart`] on first access and cached.
///
/// The cache is only replaced by [`Derived::set`] (explicit overwrite, which
/// pins the value) or cleared by [`Derived::invalidate`] when the source
/// multipart changes. Pinned values survive invalidation.
#[derive(Clone, Debug)]
pub struct Derived<T> {
    value: OnceCell<T>,
    compute: fn(&Multipart) -> T,
    pinned: bool,
}

impl<T: Default> Derived<T> {
    pub fn new(compute: fn(&Multipart) -> T) -> Self {
        Self {
            value: OnceCell::new(),
            compute,
            pinned: false,
        }
    }

    /// Cached value, computing it from `source` if necessary.
    ///
    /// Without a source the default is cached; it is recomputed after the
    /// next [`Derived::invalidate`].
    pub fn get(&self, source: Option<&Multipart>) -> &T {
        self.value
            .get_or_init(|| source.map(self.compute).unwrap_or_default())
    }

    pub fn set(&mut self, value: T) {
        self.value = OnceCell::with_value(value);
        self.pinned = true;
    }

    pub fn invalidate(&mut self) {
        if !self.pinned {
            self.value = OnceCell::new();
        }
    }

    pub fn is_computed(&self) -> bool {
        self.value.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::multipart::{Header, MultipartPart};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn count_parts(multipart: &Multipart) -> usize {
        CALLS.fetch_add(1, Ordering::SeqCst);
        multipart.parts().len()
    }

    #[test]
    fn test_computed_once_until_invalidated() {
        let source = Multipart::from_parts(vec![MultipartPart::new(
            vec![Header::new("Content-Type", "text/plain")],
            "x",
        )]);
        let mut derived = Derived::new(count_parts);
        assert!(!derived.is_computed());

        let before = CALLS.load(Ordering::SeqCst);
        assert_eq!(*derived.get(Some(&source)), 1);
        assert_eq!(*derived.get(Some(&source)), 1);
        assert_eq!(CALLS.load(Ordering::SeqCst), before + 1);

        derived.invalidate();
        assert!(!derived.is_computed());
        assert_eq!(*derived.get(Some(&Multipart::new())), 0);
    }

    #[test]
    fn test_pinned_value_survives_invalidation() {
        let mut derived: Derived<usize> = Derived::new(|m| m.parts().len());
        derived.set(42);
        derived.invalidate();
        assert_eq!(*derived.get(Some(&Multipart::new())), 42);
    }

    #[test]
    fn test_missing_source_yields_default() {
        let derived: Derived<Option<String>> = Derived::new(|_| Some("computed".into()));
        assert_eq!(*derived.get(None), None);
    }
}
