//! The worker interconnect: a fully-connected mesh of lock-free buffers.
//!
//! Every ordered pair of workers shares one [`Buffer`] per direction, plus a
//! loopback buffer per worker, all packed into a single contiguous
//! allocation. A buffer is one cache-aligned atomic word holding the tagged
//! head of a LIFO of messages; by topology it has a single producer and a
//! single consumer, and the two only contend on that one word. The loopback
//! buffer additionally admits external injectors; insertion is a plain CAS
//! push, so extra producers only cost retries.
//!
//! The buffer's `insert` takes a *prepare* hook that sees the observed prior
//! head and chooses what to store in the new message's link. That hook is
//! what lets a sender recognise and consume a parked [`Tag::Reverse`] wakeup
//! sentinel in the same atomic step that publishes its message.

use crate::{
    loom::sync::atomic::{AtomicUsize, Ordering::*},
    tagged::{Tag, TaggedPtr},
    task::{Header, TaskRef},
};
use core::{fmt, ptr::NonNull};

/// One direction of one edge of the mesh.
///
/// Aligned and padded to two x86-64 cache lines so that the two directions
/// of an edge, written by opposite workers, never false-share.
#[repr(align(128))]
pub(crate) struct Buffer {
    head: AtomicUsize,
}

// === impl Buffer ===

impl Buffer {
    fn new() -> Self {
        Self {
            head: AtomicUsize::new(TaggedPtr::NULL.into_word()),
        }
    }

    /// Links `msg` in front of the current head.
    ///
    /// `prepare` is called with each observed prior head and returns the
    /// word to write into `msg`'s link; it may also record what it saw for
    /// action after the insert. It runs again on every CAS retry, so it must
    /// overwrite (not accumulate) anything it records.
    pub(crate) fn insert(&self, msg: TaggedPtr, mut prepare: impl FnMut(TaggedPtr) -> TaggedPtr) {
        debug_assert!(!msg.is_null());
        let mut prior = TaggedPtr::from_word(self.head.load(Relaxed));
        loop {
            let link = prepare(prior);
            unsafe { Header::set_next(msg.ptr(), link) };
            match self.head.compare_exchange_weak(
                prior.into_word(),
                msg.into_word(),
                Release,
                Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => prior = TaggedPtr::from_word(actual),
            }
        }
    }

    /// Takes the whole buffer, leaving `sentinel` in its place.
    pub(crate) fn clear(&self, sentinel: TaggedPtr) -> Batch {
        Batch {
            next: TaggedPtr::from_word(self.head.swap(sentinel.into_word(), AcqRel)),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Whatever is still parked here owns references; `Batch` releases
        // them.
        drop(self.clear(TaggedPtr::NULL));
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("head", &TaggedPtr::from_word(self.head.load(Relaxed)))
            .finish()
    }
}

/// A drained buffer: messages in LIFO order with respect to insertion.
///
/// Each yielded message carries one owned reference; anything left
/// unclaimed when the batch is dropped is released.
pub(crate) struct Batch {
    next: TaggedPtr,
}

impl Iterator for Batch {
    type Item = TaggedPtr;

    fn next(&mut self) -> Option<TaggedPtr> {
        if self.next.is_null() {
            return None;
        }
        let msg = self.next;
        self.next = unsafe { Header::link_next(msg.ptr()) };
        Some(msg)
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        for msg in self {
            drop(unsafe { TaskRef::from_raw(NonNull::new_unchecked(msg.ptr() as *mut Header)) });
        }
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch").field("next", &self.next).finish()
    }
}

/// One worker's view of one edge: an (outbound, inbound) buffer pair.
///
/// The remote endpoint of the same edge sees the same two buffers with the
/// roles swapped.
#[derive(Copy, Clone)]
pub(crate) struct Connection<'mesh> {
    outbound: &'mesh Buffer,
    inbound: &'mesh Buffer,
}

impl<'mesh> Connection<'mesh> {
    pub(crate) fn send(&self, msg: TaggedPtr, prepare: impl FnMut(TaggedPtr) -> TaggedPtr) {
        self.outbound.insert(msg, prepare);
    }

    pub(crate) fn receive(&self, sentinel: TaggedPtr) -> Batch {
        self.inbound.clear(sentinel)
    }
}

impl fmt::Debug for Connection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("outbound", &(self.outbound as *const Buffer))
            .field("inbound", &(self.inbound as *const Buffer))
            .finish()
    }
}

/// One worker's bundle of connections, indexed by destination worker.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Node<'mesh> {
    mesh: &'mesh Direct,
    index: usize,
}

impl<'mesh> Node<'mesh> {
    pub(crate) fn connection(&self, dest: usize) -> Connection<'mesh> {
        self.mesh.connection(self.index, dest)
    }

    pub(crate) fn connections(&self) -> impl Iterator<Item = Connection<'mesh>> + '_ {
        (0..self.mesh.workers()).map(|dest| self.connection(dest))
    }
}

/// The full N×N buffer pool: one buffer pair per unordered worker pair plus
/// one loopback buffer per worker, in a single allocation.
pub(crate) struct Direct {
    buffers: Box<[Buffer]>,
    count: usize,
}

// === impl Direct ===

impl Direct {
    pub(crate) fn new(count: usize) -> Self {
        assert!(count >= 1, "a mesh needs at least one worker");
        // SUM(1..count) pairs, two buffers each, plus `count` loopbacks:
        // exactly count².
        let buffers = (0..count * count).map(|_| Buffer::new()).collect();
        Self { buffers, count }
    }

    pub(crate) fn workers(&self) -> usize {
        self.count
    }

    pub(crate) fn node(&self, index: usize) -> Node<'_> {
        debug_assert!(index < self.count);
        Node { mesh: self, index }
    }

    pub(crate) fn connection(&self, src: usize, dst: usize) -> Connection<'_> {
        Connection {
            outbound: self.buffer_for_edge(src, dst),
            inbound: self.buffer_for_edge(dst, src),
        }
    }

    fn buffer_for_edge(&self, src: usize, dst: usize) -> &Buffer {
        assert!(src < self.count && dst < self.count, "worker out of range");
        if src == dst {
            // Loopbacks live after the pair region. A mesh of one worker is
            // all loopback and never reaches the pair arithmetic below.
            &self.buffers[(self.count - 1) * self.count + src]
        } else {
            let low = src.min(dst);
            let high = src.max(dst);
            // Pairs are packed row by row: row `low` starts after the
            // SUM(count-1, ..., count-low) pairs of the rows above it, which
            // telescopes to low*count - (low+3)*low/2 - 1 + high for the
            // zero-based pair of (low, high).
            let pair = low * self.count - ((low + 3) * low) / 2 - 1 + high;
            &self.buffers[pair * 2 + usize::from(src > dst)]
        }
    }
}

impl fmt::Debug for Direct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Direct").field("workers", &self.count).finish()
    }
}
