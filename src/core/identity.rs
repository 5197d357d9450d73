//! Identity keys for registered resources.
//!
//! Resources may implement `PartialEq`/`Hash` however they like, so the tree
//! never uses them for bookkeeping.  A [`ResourceKey`] is the address of the
//! shared allocation behind an `Arc`, which is stable for as long as any
//! clone of that `Arc` is alive.  The tree keeps a clone of every registered
//! resource, so a key can't be recycled while it is in use.

use std::fmt;
use std::sync::Arc;

/// Address-based identity of an `Arc`-managed resource.
///
/// Two `Arc`s produce the same key iff they point at the same allocation,
/// including after unsizing (`Arc<Foo>` → `Arc<dyn Trait>`), because only the
/// data pointer is kept and the vtable half is dropped.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(usize);

impl ResourceKey {
    pub fn of<T: ?Sized>(object: &Arc<T>) -> Self {
        Self(Arc::as_ptr(object).cast::<()>() as usize)
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq, Hash)]
    struct Same;

    trait Marker {}
    impl Marker for Same {}

    #[test]
    fn equal_values_have_distinct_keys() {
        let a = Arc::new(Same);
        let b = Arc::new(Same);
        assert_eq!(*a, *b);
        assert_ne!(ResourceKey::of(&a), ResourceKey::of(&b));
    }

    #[test]
    fn clones_share_a_key() {
        let a = Arc::new(Same);
        let c = Arc::clone(&a);
        assert_eq!(ResourceKey::of(&a), ResourceKey::of(&c));
    }

    #[test]
    fn unsizing_keeps_identity() {
        let a = Arc::new(Same);
        let erased: Arc<dyn Marker> = a.clone();
        assert_eq!(ResourceKey::of(&a), ResourceKey::of(&erased));
    }
}
