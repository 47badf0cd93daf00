//! Fixed-capacity interleaved sample ring
//!
//! `StreamBuffer` sits between a producer that fills at its own pace and a
//! consumer that drains once per tick. Transfers are always partial: a write
//! takes what fits, a read returns what is there. Nothing blocks or grows.

use crate::{MixError, MixResult, Sample};

/// Ring buffer of interleaved samples.
///
/// `available_input() + available_output() == capacity()` holds after every
/// operation.
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    data: Box<[Sample]>,
    /// Index of the oldest buffered sample
    read_pos: usize,
    /// Number of buffered samples
    filled: usize,
}

impl StreamBuffer {
    /// Create a buffer holding `capacity` samples
    pub fn new(capacity: usize) -> MixResult<Self> {
        if capacity == 0 {
            return Err(MixError::InvalidCapacity(capacity));
        }
        Ok(Self {
            data: vec![0.0; capacity].into_boxed_slice(),
            read_pos: 0,
            filled: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Free slots
    #[inline]
    pub fn available_input(&self) -> usize {
        self.data.len() - self.filled
    }

    /// Buffered samples
    #[inline]
    pub fn available_output(&self) -> usize {
        self.filled
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.filled == self.data.len()
    }

    #[inline]
    fn write_pos(&self) -> usize {
        (self.read_pos + self.filled) % self.data.len()
    }

    /// Append as many of `samples` as fit; returns the count written
    pub fn write(&mut self, samples: &[Sample]) -> usize {
        let count = samples.len().min(self.available_input());
        if count == 0 {
            return 0;
        }

        let cap = self.data.len();
        let start = self.write_pos();
        let first = count.min(cap - start);
        self.data[start..start + first].copy_from_slice(&samples[..first]);
        if first < count {
            self.data[..count - first].copy_from_slice(&samples[first..count]);
        }

        self.filled += count;
        count
    }

    /// Drain into `out`, overwriting it; returns the count read
    pub fn read(&mut self, out: &mut [Sample]) -> usize {
        let count = self.transfer(out, |dst, src| dst.copy_from_slice(src));
        self.advance(count);
        count
    }

    /// Drain into `out`, adding to what it already holds; returns the count read
    pub fn mix(&mut self, out: &mut [Sample]) -> usize {
        let count = self.transfer(out, |dst, src| {
            for (d, s) in dst.iter_mut().zip(src) {
                *d += *s;
            }
        });
        self.advance(count);
        count
    }

    /// Copy into `out` without consuming
    pub fn peek(&self, out: &mut [Sample]) -> usize {
        self.transfer(out, |dst, src| dst.copy_from_slice(src))
    }

    /// Discard up to `count` buffered samples
    pub fn skip(&mut self, count: usize) -> usize {
        let count = count.min(self.filled);
        self.advance(count);
        count
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.filled = 0;
    }

    fn transfer(&self, out: &mut [Sample], mut op: impl FnMut(&mut [Sample], &[Sample])) -> usize {
        let count = out.len().min(self.filled);
        if count == 0 {
            return 0;
        }

        let cap = self.data.len();
        let first = count.min(cap - self.read_pos);
        op(&mut out[..first], &self.data[self.read_pos..self.read_pos + first]);
        if first < count {
            op(&mut out[first..count], &self.data[..count - first]);
        }
        count
    }

    #[inline]
    fn advance(&mut self, count: usize) {
        self.filled -= count;
        self.read_pos = if self.filled == 0 {
            0
        } else {
            (self.read_pos + count) % self.data.len()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            StreamBuffer::new(0).unwrap_err(),
            MixError::InvalidCapacity(0)
        );
    }

    #[test]
    fn test_short_write_and_read() {
        let mut buf = StreamBuffer::new(4).unwrap();
        assert_eq!(buf.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), 4);
        assert!(buf.is_full());
        assert_eq!(buf.write(&[7.0]), 0);

        let mut out = [0.0; 8];
        assert_eq!(buf.read(&mut out), 4);
        assert_eq!(&out[..4], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buf.read(&mut out), 0);
    }

    #[test]
    fn test_wraparound_round_trip() {
        let mut buf = StreamBuffer::new(8).unwrap();
        let mut scratch = [0.0; 8];

        // Move the cursors to the middle so the next transfer wraps
        assert_eq!(buf.write(&[0.0; 5]), 5);
        assert_eq!(buf.read(&mut scratch[..3]), 3);

        let input: Vec<Sample> = (0..6).map(|i| i as Sample * 0.25 - 0.5).collect();
        assert_eq!(buf.write(&input), 6);
        assert_eq!(buf.available_output(), 8);
        assert_eq!(buf.skip(2), 2);

        let mut out = vec![0.0; 6];
        assert_eq!(buf.read(&mut out), 6);
        assert_eq!(out, input, "samples must survive the wrap unchanged");
    }

    #[test]
    fn test_capacity_invariant() {
        let mut buf = StreamBuffer::new(7).unwrap();
        let mut out = [0.0; 3];
        for step in 0..20 {
            buf.write(&[step as Sample; 2]);
            if step % 3 == 0 {
                buf.read(&mut out);
            }
            assert_eq!(
                buf.available_input() + buf.available_output(),
                buf.capacity()
            );
        }
    }

    #[test]
    fn test_mix_adds_into_output() {
        let mut buf = StreamBuffer::new(4).unwrap();
        buf.write(&[0.25, 0.5]);
        let mut out = [1.0, 1.0, 1.0];
        assert_eq!(buf.mix(&mut out), 2);
        assert_eq!(out, [1.25, 1.5, 1.0]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut buf = StreamBuffer::new(4).unwrap();
        buf.write(&[0.1, 0.2]);
        let mut out = [0.0; 2];
        assert_eq!(buf.peek(&mut out), 2);
        assert_eq!(buf.available_output(), 2);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.available_input(), 4);
    }
}
