//! Canonical Huffman tables, as DEFLATE uses them.

use crate::{
  bit_source::BitSource,
  error::{Corruption, PngResult},
};

/// The longest code DEFLATE allows.
pub const MAX_CODE_LENGTH: u8 = 15;

/// One symbol's code.
///
/// The `bit_pattern` is stored already bit-reversed, so that it can be
/// compared directly against bits pulled LSB-first out of a [`BitSource`].
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeEntry {
  pub(crate) bit_pattern: u16,
  pub(crate) bit_count: u16,
}
impl core::fmt::Debug for TreeEntry {
  fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
    if f.alternate() {
      write!(
        f,
        "TreeEntry {{ bit_pattern: {}, bit_count: {}, }}",
        self.bit_pattern, self.bit_count
      )
    } else if self.bit_count == 0 {
      write!(f, "TE {{ unused }}")
    } else {
      // show it in transmission order, the way RFC 1951 writes codes
      let temp = format!("{:016b}", self.bit_pattern.reverse_bits());
      write!(f, "TE {{ \"{}\" }}", &temp[..usize::from(self.bit_count)])
    }
  }
}
impl TreeEntry {
  /// Code length in bits, 0 for an unused symbol.
  #[inline]
  #[must_use]
  pub const fn bit_count(self) -> u32 {
    self.bit_count as u32
  }

  /// The code as it appears in the LSB-first stream.
  #[inline]
  #[must_use]
  pub const fn reversed_code(self) -> u16 {
    self.bit_pattern
  }

  /// The canonical code value, as RFC 1951 writes it.
  #[inline]
  #[must_use]
  pub const fn canonical_code(self) -> u16 {
    if self.bit_count == 0 {
      0
    } else {
      self.bit_pattern.reverse_bits() >> (16 - self.bit_count)
    }
  }
}

/// A decoding table for one alphabet.
#[derive(Clone, PartialEq, Eq)]
pub struct HuffmanTable {
  tree: Vec<TreeEntry>,
  /// Symbols that have a code, shortest codes first. This is the scan order
  /// for decoding.
  scan_order: Vec<u16>,
}
impl core::fmt::Debug for HuffmanTable {
  fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
    f.debug_struct("HuffmanTable")
      .field("symbols", &self.tree.len())
      .field("coded", &self.scan_order.len())
      .finish()
  }
}

/// Given the code length of every symbol, assigns the canonical codes.
///
/// This follows RFC 1951 section 3.2.2:
/// 1) Count the number of codes for each code length.
/// 2) Find the numerical value of the smallest code for each code length.
/// 3) Assign consecutive values to all codes of the same length, in symbol
///    order. Symbols with a length of zero don't get a code at all.
///
/// Each code is then stored bit-reversed, because the stream packs Huffman
/// codes starting from their most significant bit while everything else is
/// read starting from the least significant bit.
///
/// ## Failure
/// * Any length above 15.
/// * Lengths that claim more codes than can exist (over-subscribed).
pub fn build_canonical_codes(code_lengths: &[u8]) -> PngResult<HuffmanTable> {
  let mut bl_count = [0_u32; 16];
  for &len in code_lengths {
    if len > MAX_CODE_LENGTH {
      return Err(Corruption::CodeLengthTooLong.into());
    }
    bl_count[usize::from(len)] += 1;
  }
  bl_count[0] = 0;

  let mut next_code = [0_u32; 16];
  let mut code = 0_u32;
  for bits in 1..=usize::from(MAX_CODE_LENGTH) {
    code = (code + bl_count[bits - 1]) << 1;
    next_code[bits] = code;
  }

  let mut tree = vec![TreeEntry::default(); code_lengths.len()];
  for (te, &len) in tree.iter_mut().zip(code_lengths.iter()) {
    if len == 0 {
      continue;
    }
    let len = usize::from(len);
    let code = next_code[len];
    if code >> len != 0 {
      return Err(Corruption::OversubscribedCodes.into());
    }
    next_code[len] += 1;
    te.bit_pattern = (code as u16).reverse_bits() >> (16 - len);
    te.bit_count = len as u16;
  }

  let mut scan_order: Vec<u16> =
    (0..tree.len()).filter(|&s| tree[s].bit_count != 0).map(|s| s as u16).collect();
  // stable, so equal lengths stay in symbol order
  scan_order.sort_by_key(|&s| tree[usize::from(s)].bit_count);

  Ok(HuffmanTable { tree, scan_order })
}

impl HuffmanTable {
  /// Number of symbols in the alphabet (coded or not).
  #[inline]
  #[must_use]
  pub fn symbol_count(&self) -> usize {
    self.tree.len()
  }

  /// The code for a symbol, if that symbol has one.
  #[inline]
  #[must_use]
  pub fn code(&self, symbol: usize) -> Option<TreeEntry> {
    self.tree.get(symbol).copied().filter(|te| te.bit_count != 0)
  }

  /// Pulls one symbol out of the bit stream.
  ///
  /// Peeks 16 bits, then scans the coded symbols for the one whose code
  /// matches the low bits of the peek. Only that code's bits are consumed.
  ///
  /// ## Failure
  /// * No code matches (`NoSymbolMatch`).
  /// * The matching code needs bits past the end of the stream.
  pub fn decode_symbol<I>(&self, bits: &mut BitSource<I>) -> PngResult<u16>
  where
    I: Iterator,
    I::Item: AsRef<[u8]>,
  {
    let peeked = bits.peek_bits(16)?;
    for &symbol in self.scan_order.iter() {
      let te = self.tree[usize::from(symbol)];
      let mask = (1_u32 << te.bit_count) - 1;
      if peeked & mask == u32::from(te.bit_pattern) {
        bits.discard_bits(u32::from(te.bit_count))?;
        return Ok(symbol);
      }
    }
    Err(Corruption::NoSymbolMatch.into())
  }
}

#[cfg(test)]
pub(crate) mod test_support {
  /// Packs bits LSB-first, the way a DEFLATE stream is laid out.
  #[derive(Debug, Default)]
  pub(crate) struct BitWriter {
    pub(crate) bytes: Vec<u8>,
    spare: u32,
    spare_count: u32,
  }
  impl BitWriter {
    pub(crate) fn write_bits(&mut self, value: u32, count: u32) {
      for i in 0..count {
        self.spare |= ((value >> i) & 1) << self.spare_count;
        self.spare_count += 1;
        if self.spare_count == 8 {
          self.bytes.push(self.spare as u8);
          self.spare = 0;
          self.spare_count = 0;
        }
      }
    }
    /// Huffman codes go out starting from their top bit.
    pub(crate) fn write_code(&mut self, code: u32, len: u32) {
      for i in (0..len).rev() {
        self.write_bits((code >> i) & 1, 1);
      }
    }
    pub(crate) fn finish(mut self) -> Vec<u8> {
      if self.spare_count > 0 {
        self.bytes.push(self.spare as u8);
      }
      self.bytes
    }
  }

  /// xorshift, seeded from the OS
  pub(crate) struct Rng(u64);
  impl Rng {
    pub(crate) fn new() -> Self {
      let mut seed = [0_u8; 8];
      getrandom::getrandom(&mut seed).unwrap();
      Self(u64::from_le_bytes(seed) | 1)
    }
    pub(crate) fn next_u32(&mut self) -> u32 {
      self.0 ^= self.0 << 13;
      self.0 ^= self.0 >> 7;
      self.0 ^= self.0 << 17;
      (self.0 >> 32) as u32
    }
    pub(crate) fn below(&mut self, n: u32) -> u32 {
      self.next_u32() % n
    }
  }
}

#[test]
fn test_build_canonical_codes() {
  // the small example in the RFC.
  let t = build_canonical_codes(&[2, 1, 3, 3]).unwrap();
  let codes: Vec<u16> = (0..4).map(|s| t.code(s).unwrap().canonical_code()).collect();
  assert_eq!(codes, [0b10, 0b0, 0b110, 0b111]);

  // the bigger example in the RFC.
  let t = build_canonical_codes(&[3, 3, 3, 3, 3, 2, 4, 4]).unwrap();
  let codes: Vec<u16> = (0..8).map(|s| t.code(s).unwrap().canonical_code()).collect();
  assert_eq!(codes, [0b010, 0b011, 0b100, 0b101, 0b110, 0b00, 0b1110, 0b1111]);

  /* Table from the "compressed with fixed huffman codes"

      Lit Value     Bits    Codes
      ---------     ----    ----
      0 - 143       8       00110000 through
                            10111111
      144 - 255     9       110010000 through
                            111111111
      256 - 279     7       0000000 through
                            0010111
      280 - 287     8       11000000 through
                            11000111
  */
  let mut v = Vec::with_capacity(288);
  v.extend(core::iter::repeat(8).take(144));
  v.extend(core::iter::repeat(9).take(112));
  v.extend(core::iter::repeat(7).take(24));
  v.extend(core::iter::repeat(8).take(8));
  let t = build_canonical_codes(&v).unwrap();
  let canon = |s: usize| t.code(s).unwrap().canonical_code();
  assert_eq!(canon(0), 0b00110000);
  assert_eq!(canon(143), 0b10111111);
  assert_eq!(canon(144), 0b110010000);
  assert_eq!(canon(255), 0b111111111);
  assert_eq!(canon(256), 0b0000000);
  assert_eq!(canon(279), 0b0010111);
  assert_eq!(canon(280), 0b11000000);
  assert_eq!(canon(287), 0b11000111);
  // and the stored form is the reversal
  assert_eq!(t.code(280).unwrap().reversed_code(), 0b00000011);
}

#[test]
fn test_unused_symbols_get_no_code() {
  let t = build_canonical_codes(&[0, 1, 0, 1]).unwrap();
  assert_eq!(t.symbol_count(), 4);
  assert!(t.code(0).is_none());
  assert!(t.code(2).is_none());
  assert_eq!(t.code(1).unwrap().canonical_code(), 0);
  assert_eq!(t.code(3).unwrap().canonical_code(), 1);
}

#[test]
fn test_bad_length_sets_are_rejected() {
  use crate::PngError;
  assert!(matches!(
    build_canonical_codes(&[1, 1, 1]),
    Err(PngError::CorruptStream(Corruption::OversubscribedCodes))
  ));
  assert!(matches!(
    build_canonical_codes(&[16, 1]),
    Err(PngError::CorruptStream(Corruption::CodeLengthTooLong))
  ));
}

#[test]
fn test_decode_symbol_no_match() {
  use crate::PngError;
  // an incomplete code: only "00" exists
  let t = build_canonical_codes(&[2, 0, 0]).unwrap();
  let data: [&[u8]; 1] = [&[0b11]];
  let mut bs = BitSource::new(data);
  assert!(matches!(
    t.decode_symbol(&mut bs),
    Err(PngError::CorruptStream(Corruption::NoSymbolMatch))
  ));
  // and an empty table never matches
  let t = build_canonical_codes(&[0, 0]).unwrap();
  let mut bs = BitSource::new(data);
  assert!(t.decode_symbol(&mut bs).is_err());
}

#[test]
fn test_canonical_codes_decode_what_they_encode() {
  use test_support::*;
  let mut rng = Rng::new();
  for _ in 0..200 {
    let n = 2 + rng.below(287) as usize;
    let mut lengths: Vec<u8> = (0..n)
      .map(|_| if rng.below(4) == 0 { 0 } else { 1 + rng.below(15) as u8 })
      .collect();
    if lengths.iter().all(|&l| l == 0) {
      lengths[0] = 1;
    }
    // lengthen the shortest codes until the Kraft inequality holds
    let kraft = |lengths: &[u8]| -> u32 {
      lengths.iter().filter(|&&l| l != 0).map(|&l| 1_u32 << (15 - l)).sum()
    };
    while kraft(&lengths) > (1 << 15) {
      let (i, _) =
        lengths.iter().enumerate().filter(|(_, &l)| l != 0).min_by_key(|(_, &l)| l).unwrap();
      lengths[i] += 1;
    }
    let table = build_canonical_codes(&lengths).unwrap();
    let coded: Vec<usize> = (0..n).filter(|&s| lengths[s] != 0).collect();
    let message: Vec<usize> =
      (0..500).map(|_| coded[rng.below(coded.len() as u32) as usize]).collect();

    let mut w = BitWriter::default();
    // both spellings of a code put the same bits in the stream
    for (i, &s) in message.iter().enumerate() {
      let te = table.code(s).unwrap();
      if i % 2 == 0 {
        w.write_bits(u32::from(te.reversed_code()), te.bit_count());
      } else {
        w.write_code(u32::from(te.canonical_code()), te.bit_count());
      }
    }
    let bytes = w.finish();
    let mut bs = BitSource::new([bytes.as_slice()]);
    for &expected in message.iter() {
      assert_eq!(usize::from(table.decode_symbol(&mut bs).unwrap()), expected, "{lengths:?}");
    }
  }
}
