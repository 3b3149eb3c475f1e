use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, Ref, RefCell, RefMut};

/// A shared, fixed capacity byte buffer used to queue one WebSocket payload to many clients
/// without copying it.
///
/// Cloning a `ByteBufferChunk` hands out another reference to the same bytes.  Contents can
/// only be changed while the buffer is neither locked nor shared, so a payload that has been
/// queued to a client can no longer change underneath it.
///
/// The reference count is not atomic: buffers belong to the single context driving the server.
#[derive(Clone, Debug)]
pub struct ByteBufferChunk {
    inner: Rc<Inner>,
}

#[derive(Debug)]
struct Inner {
    data: RefCell<Vec<u8>>,
    locked: Cell<bool>,
}

impl ByteBufferChunk {
    /// A zero filled buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::from_vec(vec![0u8; size])
    }

    /// A buffer holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// A buffer taking ownership of `data`.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            inner: Rc::new(Inner {
                data: RefCell::new(data),
                locked: Cell::new(false),
            }),
        }
    }

    /// Capacity in bytes.
    pub fn len(&self) -> usize {
        self.inner.data.borrow().len()
    }

    /// True when the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live handles to this buffer, including this one.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Prevent modification until [`unlock`](Self::unlock).
    pub fn lock(&self) {
        self.inner.locked.set(true);
    }

    /// Allow modification again.
    pub fn unlock(&self) {
        self.inner.locked.set(false);
    }

    /// Whether the buffer is locked.
    pub fn is_locked(&self) -> bool {
        self.inner.locked.get()
    }

    /// True when no other handle exists and the buffer is unlocked.
    pub fn can_modify(&self) -> bool {
        self.ref_count() == 1 && !self.is_locked()
    }

    /// Read access to the bytes.
    pub fn data(&self) -> Ref<'_, [u8]> {
        Ref::map(self.inner.data.borrow(), |d| d.as_slice())
    }

    /// Write access to the bytes, `None` while the buffer is shared or locked.
    pub fn data_mut(&self) -> Option<RefMut<'_, [u8]>> {
        if !self.can_modify() {
            return None;
        }
        self.inner
            .data
            .try_borrow_mut()
            .ok()
            .map(|d| RefMut::map(d, |d| d.as_mut_slice()))
    }

    /// Resize to `size` bytes, zero filling any growth.  Refused (returning false) while the
    /// buffer is shared or locked.
    pub fn reserve(&self, size: usize) -> bool {
        if !self.can_modify() {
            return false;
        }
        match self.inner.data.try_borrow_mut() {
            Ok(mut d) => {
                d.resize(size, 0);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn test_shared_buffer_is_frozen() {
        let buf = ByteBufferChunk::new(4);
        assert_eq!(buf.ref_count(), 1);

        buf.data_mut().unwrap().copy_from_slice(b"ping");
        assert_eq!(&*buf.data(), b"ping");

        let queued = buf.clone();
        assert_eq!(buf.ref_count(), 2);
        assert!(buf.data_mut().is_none());
        assert!(!buf.reserve(8));

        drop(queued);
        assert_eq!(buf.ref_count(), 1);
        assert!(buf.reserve(8));
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_lock() {
        let buf = ByteBufferChunk::from_slice(b"abc");
        buf.lock();
        assert!(buf.is_locked());
        assert!(buf.data_mut().is_none());
        buf.unlock();
        assert!(buf.data_mut().is_some());
    }
}
