//! Fixed-length value arrays for vertex and edge data.

use std::sync::Arc;

use crate::error::{PieError, Result};

enum Storage<T> {
    /// Snapshot shared without copying; never written.
    Shared(Arc<[T]>),
    /// Owned, mutable buffer.
    Owned(Box<[T]>),
}

/// A fixed-length, index-addressable array of values.
///
/// Edge values wrap the fragment's snapshot read-only. Vertex values are
/// copied into an owned buffer that also has slots for mirror vertices.
pub struct ArrayStore<T> {
    storage: Storage<T>,
}

impl<T> ArrayStore<T> {
    /// Wraps `snapshot` without copying. The store is read-only.
    pub fn wrap(snapshot: Arc<[T]>) -> Self {
        Self {
            storage: Storage::Shared(snapshot),
        }
    }

    /// Takes ownership of `values` as a mutable store.
    pub fn from_vec(values: Vec<T>) -> Self {
        Self {
            storage: Storage::Owned(values.into_boxed_slice()),
        }
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Returns `true` if the store has no slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the store wraps a shared snapshot.
    pub fn is_read_only(&self) -> bool {
        matches!(self.storage, Storage::Shared(_))
    }

    /// Returns the value at `index`, or `None` if out of bounds.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    /// Overwrites the value at `index`.
    ///
    /// # Errors
    /// [`PieError::ReadOnly`] on a wrapped snapshot.
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        self.as_mut_slice()?[index] = value;
        Ok(())
    }

    /// All values.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        match &self.storage {
            Storage::Shared(s) => &s[..],
            Storage::Owned(s) => &s[..],
        }
    }

    /// All values, mutably.
    ///
    /// # Errors
    /// [`PieError::ReadOnly`] on a wrapped snapshot.
    pub fn as_mut_slice(&mut self) -> Result<&mut [T]> {
        match &mut self.storage {
            Storage::Shared(_) => Err(PieError::ReadOnly),
            Storage::Owned(s) => Ok(&mut s[..]),
        }
    }
}

impl<T: Clone> ArrayStore<Option<T>> {
    /// Copies `snapshot` into a fresh array of `len` slots.
    ///
    /// Slots past the snapshot are `None`: they belong to mirror vertices whose
    /// values arrive later.
    ///
    /// # Errors
    /// [`PieError::LengthMismatch`] if `len < snapshot.len()`.
    pub fn copy_expand(snapshot: &[T], len: usize) -> Result<Self> {
        if len < snapshot.len() {
            return Err(PieError::LengthMismatch {
                snapshot: snapshot.len(),
                target: len,
            });
        }
        let mut values = Vec::with_capacity(len);
        values.extend(snapshot.iter().cloned().map(Some));
        values.resize_with(len, || None);
        Ok(Self::from_vec(values))
    }
}

impl<T> core::fmt::Debug for ArrayStore<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ArrayStore")
            .field("len", &self.len())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_shares_without_copy() {
        let snapshot: Arc<[u32]> = Arc::from(vec![1, 2, 3]);
        let mut store = ArrayStore::wrap(Arc::clone(&snapshot));
        assert!(store.is_read_only());
        assert_eq!(store.as_slice().as_ptr(), snapshot.as_ptr());
        assert!(matches!(store.set(0, 9), Err(PieError::ReadOnly)));
        assert_eq!(store.get(2), Some(&3));
        assert_eq!(store.get(3), None);
    }

    #[test]
    fn copy_expand_pads_with_none() {
        let mut store = ArrayStore::copy_expand(&[10, 20], 4).unwrap();
        assert_eq!(store.as_slice(), &[Some(10), Some(20), None, None]);
        store.set(3, Some(40)).unwrap();
        assert_eq!(store.get(3), Some(&Some(40)));
    }

    #[test]
    fn copy_expand_rejects_short_target() {
        let err = ArrayStore::copy_expand(&[1, 2, 3], 2).unwrap_err();
        assert!(matches!(err, PieError::LengthMismatch { snapshot: 3, target: 2 }));
    }
}
