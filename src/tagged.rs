//! Tagged task pointers.
//!
//! A [`TaggedPtr`] packs a pointer to a task [`Header`] and a small [`Tag`]
//! into a single machine word, using the low bits guaranteed to be zero by
//! the header's alignment. The whole word is what the interconnect's atomic
//! buffer heads hold, so a tag travels with its pointer in one atomic
//! operation.

use crate::task::Header;
use core::fmt;

/// Discriminates what a message pointer means to its receiver.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(usize)]
pub(crate) enum Tag {
    /// Real work for the receiver.
    Normal = 0,
    /// A sentinel the *sender* must execute; parked by a worker about to
    /// sleep, consumed by the first producer that replaces it.
    Reverse = 1,
    /// Reserved.
    #[allow(dead_code)]
    Delay = 2,
}

/// A pointer to a task [`Header`] with a [`Tag`] in its low bits.
///
/// The null tagged pointer is the all-zero word, and therefore carries
/// [`Tag::Normal`].
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub(crate) struct TaggedPtr(usize);

impl TaggedPtr {
    const TAG_BITS: usize = 3;
    const TAG_MASK: usize = (1 << Self::TAG_BITS) - 1;

    pub(crate) const NULL: Self = Self(0);

    pub(crate) fn new(ptr: *const Header, tag: Tag) -> Self {
        let addr = ptr as usize;
        debug_assert_eq!(
            addr & Self::TAG_MASK,
            0,
            "task headers must be aligned to at least {} bytes",
            1 << Self::TAG_BITS,
        );
        Self(addr | tag as usize)
    }

    pub(crate) fn ptr(self) -> *const Header {
        (self.0 & !Self::TAG_MASK) as *const Header
    }

    pub(crate) fn is_null(self) -> bool {
        self.ptr().is_null()
    }

    pub(crate) fn tag(self) -> Tag {
        match self.0 & Self::TAG_MASK {
            0 => Tag::Normal,
            1 => Tag::Reverse,
            2 => Tag::Delay,
            bits => unreachable!("invalid tag bits {bits:#05b}"),
        }
    }

    pub(crate) fn from_word(word: usize) -> Self {
        Self(word)
    }

    pub(crate) fn into_word(self) -> usize {
        self.0
    }
}

impl fmt::Debug for TaggedPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedPtr")
            .field("ptr", &self.ptr())
            .field("tag", &self.tag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_normal() {
        assert!(TaggedPtr::NULL.is_null());
        assert_eq!(TaggedPtr::NULL.tag(), Tag::Normal);
        assert_eq!(TaggedPtr::NULL.into_word(), 0);
    }

    #[test]
    fn round_trip() {
        // Any 8-aligned address will do; no task is dereferenced here.
        let addr = 0xdead_b000 as *const Header;
        for tag in [Tag::Normal, Tag::Reverse, Tag::Delay] {
            let tagged = TaggedPtr::new(addr, tag);
            assert_eq!(tagged.ptr(), addr);
            assert_eq!(tagged.tag(), tag);
            assert_eq!(TaggedPtr::from_word(tagged.into_word()), tagged);
        }
    }
}
