//! LSB-first bit reading over a chain of byte chunks.

use crate::error::{Corruption, PngResult};

/// Reads bits out of a sequence of byte chunks, as if they were one long
/// buffer.
///
/// Bits come out in DEFLATE order: starting with the lowest bit of each byte.
/// Each chunk is dropped as soon as the last byte has been pulled from it, so
/// feeding this an iterator of owned buffers releases them as decoding goes.
pub struct BitSource<I: Iterator> {
  current: Option<I::Item>,
  pos: usize,
  more: I,
  spare_bits: u32,
  spare_bit_count: u32,
}

impl<I> core::fmt::Debug for BitSource<I>
where
  I: Iterator,
  I::Item: AsRef<[u8]>,
{
  fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
    let spare_bit_count = self.spare_bit_count as usize;
    let spare_bits = if spare_bit_count > 0 {
      format!("{bits:0width$b}", bits = self.spare_bits, width = spare_bit_count)
    } else {
      String::new()
    };
    let current_remaining =
      self.current.as_ref().map(|c| c.as_ref().len() - self.pos).unwrap_or(0);
    f.debug_struct("BitSource")
      .field("current_remaining", &current_remaining)
      .field("spare_bits", &spare_bits)
      .field("spare_bit_count", &spare_bit_count)
      .field("more", &self.more.size_hint())
      .finish()
  }
}

impl<I> BitSource<I>
where
  I: Iterator,
  I::Item: AsRef<[u8]>,
{
  /// Makes a bit source that will read through each chunk in order.
  pub fn new<C: IntoIterator<IntoIter = I>>(chunks: C) -> Self {
    Self { current: None, pos: 0, more: chunks.into_iter(), spare_bits: 0, spare_bit_count: 0 }
  }

  /// Number of bits sitting in the accumulator right now.
  #[inline]
  #[must_use]
  pub fn available_bits(&self) -> u32 {
    self.spare_bit_count
  }

  /// Drops the active chunk and moves to the next one.
  ///
  /// Returns `false` when there are no more chunks.
  fn next_chunk(&mut self) -> bool {
    self.current = self.more.next();
    self.pos = 0;
    self.current.is_some()
  }

  fn grab_byte(&mut self) -> Option<u8> {
    loop {
      if let Some(chunk) = &self.current {
        if let Some(&b) = chunk.as_ref().get(self.pos) {
          self.pos += 1;
          return Some(b);
        }
      }
      if !self.next_chunk() {
        return None;
      }
    }
  }

  /// Pulls whole bytes until there's at least `want` bits buffered, or the
  /// input runs dry.
  fn refill(&mut self, want: u32) {
    debug_assert!(want <= 16);
    while self.spare_bit_count < want {
      match self.grab_byte() {
        Some(b) => {
          self.spare_bits |= u32::from(b) << self.spare_bit_count;
          self.spare_bit_count += 8;
        }
        None => return,
      }
    }
  }

  /// Reads `n` bits (at most 16), the first bit read is the lowest bit of the
  /// output.
  pub fn read_bits(&mut self, n: u32) -> PngResult<u32> {
    if n == 0 {
      return Ok(0);
    }
    self.refill(n);
    if self.spare_bit_count < n {
      return Err(Corruption::UnexpectedEnd.into());
    }
    let out = self.spare_bits & low_mask(n);
    self.spare_bits >>= n;
    self.spare_bit_count -= n;
    Ok(out)
  }

  /// Looks at the next `n` bits (at most 16) without using them up.
  ///
  /// If the stream has fewer than `n` bits left, the missing high bits are 0.
  /// Check [`available_bits`](Self::available_bits) to see how many of the
  /// returned bits are real. Only fails when there's no bits left at all.
  pub fn peek_bits(&mut self, n: u32) -> PngResult<u32> {
    self.refill(n);
    if self.spare_bit_count == 0 {
      return Err(Corruption::UnexpectedEnd.into());
    }
    Ok(self.spare_bits & low_mask(n))
  }

  /// Throws away `n` bits that are already buffered (no refill).
  pub fn discard_bits(&mut self, n: u32) -> PngResult<()> {
    if n > self.spare_bit_count {
      return Err(Corruption::UnexpectedEnd.into());
    }
    self.spare_bits = if n == 32 { 0 } else { self.spare_bits >> n };
    self.spare_bit_count -= n;
    Ok(())
  }

  /// Drops any partial byte so that the next read starts on a byte boundary.
  pub fn flush_to_byte_boundary(&mut self) {
    let partial = self.spare_bit_count % 8;
    self.spare_bits >>= partial;
    self.spare_bit_count -= partial;
  }

  /// Fills `dst` with whole bytes from the stream.
  ///
  /// Must be byte aligned (see
  /// [`flush_to_byte_boundary`](Self::flush_to_byte_boundary)). Bytes still in
  /// the accumulator come out first, then the rest is copied straight from
  /// the chunks.
  pub fn copy_aligned_bytes(&mut self, dst: &mut [u8]) -> PngResult<()> {
    debug_assert_eq!(self.spare_bit_count % 8, 0);
    let mut filled = 0;
    while self.spare_bit_count >= 8 && filled < dst.len() {
      dst[filled] = self.spare_bits as u8;
      self.spare_bits >>= 8;
      self.spare_bit_count -= 8;
      filled += 1;
    }
    while filled < dst.len() {
      let available: &[u8] = match &self.current {
        Some(chunk) => &chunk.as_ref()[self.pos..],
        None => &[],
      };
      if available.is_empty() {
        if !self.next_chunk() {
          return Err(Corruption::UnexpectedEnd.into());
        }
        continue;
      }
      let n = available.len().min(dst.len() - filled);
      dst[filled..filled + n].copy_from_slice(&available[..n]);
      self.pos += n;
      filled += n;
    }
    Ok(())
  }
}

#[inline]
const fn low_mask(n: u32) -> u32 {
  if n >= 32 {
    u32::MAX
  } else {
    (1 << n) - 1
  }
}

#[test]
fn test_bits_come_out_lsb_first() {
  let chunks: [&[u8]; 1] = [&[0b1010_0110, 0b0000_0001]];
  let mut bs = BitSource::new(chunks);
  assert_eq!(bs.read_bits(1).unwrap(), 0);
  assert_eq!(bs.read_bits(2).unwrap(), 0b11);
  assert_eq!(bs.read_bits(3).unwrap(), 0b100);
  // crosses into the second byte
  assert_eq!(bs.read_bits(3).unwrap(), 0b110);
  assert_eq!(bs.read_bits(7).unwrap(), 0);
  assert!(bs.read_bits(1).is_err());
}

#[test]
fn test_reads_across_chunks_and_skips_empty_ones() {
  let chunks: Vec<&[u8]> = vec![&[0xAB], &[], &[], &[0xCD, 0xEF]];
  let mut bs = BitSource::new(chunks);
  assert_eq!(bs.read_bits(16).unwrap(), 0xCDAB);
  assert_eq!(bs.read_bits(4).unwrap(), 0xF);
  assert_eq!(bs.read_bits(4).unwrap(), 0xE);
  assert!(matches!(
    bs.read_bits(1),
    Err(crate::PngError::CorruptStream(Corruption::UnexpectedEnd))
  ));
}

#[test]
fn test_peek_then_discard() {
  let chunks: [&[u8]; 1] = [&[0b1100_1010]];
  let mut bs = BitSource::new(chunks);
  // only 8 real bits, the rest of the peek is zero filled
  assert_eq!(bs.peek_bits(16).unwrap(), 0b1100_1010);
  assert_eq!(bs.available_bits(), 8);
  bs.discard_bits(3).unwrap();
  assert_eq!(bs.peek_bits(5).unwrap(), 0b11001);
  assert!(bs.discard_bits(6).is_err());
  bs.discard_bits(5).unwrap();
  assert!(bs.peek_bits(1).is_err());
}

#[test]
fn test_flush_and_copy_aligned_bytes() {
  let chunks: Vec<&[u8]> = vec![&[0xFF, 0x11], &[0x22, 0x33], &[0x44]];
  let mut bs = BitSource::new(chunks);
  assert_eq!(bs.read_bits(3).unwrap(), 0b111);
  bs.flush_to_byte_boundary();
  // pull a byte into the accumulator so that the copy has to drain it first
  assert_eq!(bs.peek_bits(16).unwrap(), 0x2211);
  let mut dst = [0_u8; 4];
  bs.copy_aligned_bytes(&mut dst).unwrap();
  assert_eq!(dst, [0x11, 0x22, 0x33, 0x44]);
  let mut one_more = [0_u8; 1];
  assert!(bs.copy_aligned_bytes(&mut one_more).is_err());
}

#[test]
fn test_consumed_chunks_are_released() {
  use std::rc::Rc;
  let first: Rc<[u8]> = Rc::from(&[1_u8, 2][..]);
  let second: Rc<[u8]> = Rc::from(&[3_u8][..]);
  let mut bs = BitSource::new(vec![first.clone(), second.clone()]);
  assert_eq!(bs.read_bits(8).unwrap(), 1);
  assert_eq!(Rc::strong_count(&first), 2);
  assert_eq!(bs.read_bits(8).unwrap(), 2);
  assert_eq!(bs.read_bits(8).unwrap(), 3);
  // moving onto the second chunk dropped the first one
  assert_eq!(Rc::strong_count(&first), 1);
  assert_eq!(Rc::strong_count(&second), 2);
  assert!(bs.read_bits(1).is_err());
  assert_eq!(Rc::strong_count(&second), 1);
}
