//! Word-packed atomic bitset used for the active-vertex double buffer.
//!
//! Writers may call [`AtomicBitset::set`] concurrently on any indices; each
//! update is a single `fetch_or` on the owning word, so no update is lost.
//! Scans (`next_set_bit`, `cardinality`, `iter_ones_in`) are only meaningful
//! once writers are quiescent, which the executor's barrier guarantees.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

const WORD_BITS: usize = usize::BITS as usize;

/// A fixed-size, word-packed atomic bitset.
pub struct AtomicBitset {
    bits: usize,
    words: Box<[AtomicUsize]>,
}

impl AtomicBitset {
    /// Creates a new bitset with `bits` bits, all cleared.
    pub fn new(bits: usize) -> Self {
        let words = (0..bits.div_ceil(WORD_BITS))
            .map(|_| AtomicUsize::new(0))
            .collect();
        Self { bits, words }
    }

    /// Number of addressable bits.
    #[inline]
    pub fn len_bits(&self) -> usize {
        self.bits
    }

    /// Sets `bit` and returns `true` iff this call observed it previously cleared.
    ///
    /// # Panics
    /// Panics if `bit >= len_bits()`.
    #[inline]
    pub fn set(&self, bit: usize) -> bool {
        assert!(bit < self.bits, "bit {bit} out of range for {} bits", self.bits);
        let (word, mask) = bit_word_mask(bit);
        (self.words[word].fetch_or(mask, Ordering::Relaxed) & mask) == 0
    }

    /// Clears `bit`.
    ///
    /// # Panics
    /// Panics if `bit >= len_bits()`.
    #[inline]
    pub fn clear(&self, bit: usize) {
        assert!(bit < self.bits, "bit {bit} out of range for {} bits", self.bits);
        let (word, mask) = bit_word_mask(bit);
        self.words[word].fetch_and(!mask, Ordering::Relaxed);
    }

    /// Returns whether `bit` is set.
    ///
    /// # Panics
    /// Panics if `bit >= len_bits()`.
    #[inline]
    pub fn get(&self, bit: usize) -> bool {
        assert!(bit < self.bits, "bit {bit} out of range for {} bits", self.bits);
        let (word, mask) = bit_word_mask(bit);
        (self.words[word].load(Ordering::Relaxed) & mask) != 0
    }

    /// Returns the first set bit at or after `from`, or `None`.
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        self.next_set_bit_before(from, self.bits)
    }

    /// First set bit in `[from, end)`; never loads words past `end`.
    fn next_set_bit_before(&self, from: usize, end: usize) -> Option<usize> {
        let end = end.min(self.bits);
        if from >= end {
            return None;
        }
        let last_word = (end - 1) / WORD_BITS;
        let (mut word, _) = bit_word_mask(from);
        let offset = from % WORD_BITS;
        let mut current = self.words[word].load(Ordering::Relaxed) & (usize::MAX << offset);
        loop {
            if current != 0 {
                let bit = word * WORD_BITS + current.trailing_zeros() as usize;
                return (bit < end).then_some(bit);
            }
            word += 1;
            if word > last_word {
                return None;
            }
            current = self.words[word].load(Ordering::Relaxed);
        }
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Returns `true` if no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Relaxed) == 0)
    }

    /// Clears all bits.
    pub fn clear_all(&self) {
        for w in self.words.iter() {
            w.store(0, Ordering::Relaxed);
        }
    }

    /// Sets every bit in `[0, len_bits())`.
    pub fn set_all(&self) {
        let Some((last, head)) = self.words.split_last() else {
            return;
        };
        for w in head {
            w.store(usize::MAX, Ordering::Relaxed);
        }
        let tail = self.bits % WORD_BITS;
        let mask = if tail == 0 { usize::MAX } else { (1usize << tail) - 1 };
        last.store(mask, Ordering::Relaxed);
    }

    /// In-place union: `self <- self ∪ other`.
    ///
    /// # Panics
    /// Panics if the two bitsets have different lengths.
    pub fn union_with(&self, other: &AtomicBitset) {
        assert_eq!(self.bits, other.bits, "bitset length mismatch");
        for (dst, src) in self.words.iter().zip(other.words.iter()) {
            let bits = src.load(Ordering::Relaxed);
            if bits != 0 {
                dst.fetch_or(bits, Ordering::Relaxed);
            }
        }
    }

    /// Returns a new bitset holding `self ∪ other`.
    ///
    /// # Panics
    /// Panics if the two bitsets have different lengths.
    pub fn or_into(&self, other: &AtomicBitset) -> AtomicBitset {
        assert_eq!(self.bits, other.bits, "bitset length mismatch");
        let words = self
            .words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| AtomicUsize::new(a.load(Ordering::Relaxed) | b.load(Ordering::Relaxed)))
            .collect();
        AtomicBitset {
            bits: self.bits,
            words,
        }
    }

    /// Iterates the set bits in `[start, end)` in ascending order.
    pub fn iter_ones_in(&self, start: usize, end: usize) -> Ones<'_> {
        Ones {
            set: self,
            pos: start,
            end: end.min(self.bits),
        }
    }

    /// Iterates all set bits in ascending order.
    pub fn iter_ones(&self) -> Ones<'_> {
        self.iter_ones_in(0, self.bits)
    }
}

impl Clone for AtomicBitset {
    fn clone(&self) -> Self {
        let words = self
            .words
            .iter()
            .map(|w| AtomicUsize::new(w.load(Ordering::Relaxed)))
            .collect();
        Self {
            bits: self.bits,
            words,
        }
    }
}

impl fmt::Debug for AtomicBitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicBitset")
            .field("bits", &self.bits)
            .field("cardinality", &self.cardinality())
            .finish()
    }
}

/// Iterator over set bits, produced by [`AtomicBitset::iter_ones_in`].
pub struct Ones<'a> {
    set: &'a AtomicBitset,
    pos: usize,
    end: usize,
}

impl Iterator for Ones<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.pos >= self.end {
            return None;
        }
        match self.set.next_set_bit_before(self.pos, self.end) {
            Some(bit) => {
                self.pos = bit + 1;
                Some(bit)
            }
            None => {
                self.pos = self.end;
                None
            }
        }
    }
}

#[inline(always)]
fn bit_word_mask(bit: usize) -> (usize, usize) {
    // `usize::BITS` is a power of two, so this lowers to a shift and a mask.
    (bit / WORD_BITS, 1usize << (bit % WORD_BITS))
}
