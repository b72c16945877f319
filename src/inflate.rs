//! DEFLATE (RFC 1951) decompression, plus the zlib (RFC 1950) wrapper that
//! PNG puts around it.
//!
//! All output goes into one caller-provided buffer whose size is known ahead of
//! time. Back references are resolved against that same buffer, and nothing is
//! ever written past its end.

use log::trace;

use crate::{
  bit_source::BitSource,
  error::{Corruption, PngResult, Violation},
  huffman::{build_canonical_codes, HuffmanTable},
};

/// Base match length for length symbols 257 through 285.
pub const LENGTH_BASE: [u16; 29] = [
  3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
  163, 195, 227, 258,
];

/// Extra bits after each length symbol.
pub const LENGTH_EXTRA_BITS: [u8; 29] =
  [0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0];

/// Base distance for distance symbols 0 through 29.
pub const DIST_BASE: [u16; 30] = [
  1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
  2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

/// Extra bits after each distance symbol.
pub const DIST_EXTRA_BITS: [u8; 30] = [
  0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13,
];

/// The order that the code length alphabet's own code lengths are sent in.
pub const CODE_LENGTH_ORDER: [usize; 19] =
  [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

const END_OF_BLOCK: u16 = 256;

/// Where the block-level decoder is at.
enum InflateState {
  BlockHeader,
  Stored,
  FixedHuffman,
  DynamicHuffman,
  SymbolLoop { lit_len: HuffmanTable, dist: HuffmanTable },
  Done,
}

/// Reads and checks the 2-byte zlib header.
pub fn read_zlib_header<I>(bits: &mut BitSource<I>) -> PngResult<()>
where
  I: Iterator,
  I::Item: AsRef<[u8]>,
{
  let cmf = bits.read_bits(8)?;
  let flg = bits.read_bits(8)?;
  let compression_method = cmf & 0b1111;
  let window_log = cmf >> 4;
  if compression_method != 8 || window_log > 7 || ((cmf << 8) | flg) % 31 != 0 {
    return Err(Violation::BadZlibHeader.into());
  }
  if flg & 0b10_0000 != 0 {
    return Err(Violation::PresetDictionary.into());
  }
  Ok(())
}

/// Decompresses a full zlib stream into `out`, returning how many bytes were
/// written.
///
/// The Adler32 trailer is not checked.
pub fn zlib_decompress<I>(bits: &mut BitSource<I>, out: &mut [u8]) -> PngResult<usize>
where
  I: Iterator,
  I::Item: AsRef<[u8]>,
{
  read_zlib_header(bits)?;
  inflate(bits, out)
}

/// Decompresses raw DEFLATE blocks into `out` until the final block ends,
/// returning how many bytes were written.
///
/// ## Failure
/// * Any malformed block, code, or back reference.
/// * The data would need more space than `out` has.
pub fn inflate<I>(bits: &mut BitSource<I>, out: &mut [u8]) -> PngResult<usize>
where
  I: Iterator,
  I::Item: AsRef<[u8]>,
{
  let mut pos = 0_usize;
  let mut is_final = false;
  let mut state = InflateState::BlockHeader;
  loop {
    state = match state {
      InflateState::BlockHeader => {
        is_final = bits.read_bits(1)? != 0;
        let btype = bits.read_bits(2)?;
        trace!("deflate block at output {pos}: btype={btype}, final={is_final}");
        match btype {
          0 => InflateState::Stored,
          1 => InflateState::FixedHuffman,
          2 => InflateState::DynamicHuffman,
          _ => return Err(Corruption::ReservedBlockType.into()),
        }
      }
      InflateState::Stored => {
        pos = copy_stored_block(bits, out, pos)?;
        after_block(is_final)
      }
      InflateState::FixedHuffman => {
        let (lit_len, dist) = fixed_tables()?;
        InflateState::SymbolLoop { lit_len, dist }
      }
      InflateState::DynamicHuffman => {
        let (lit_len, dist) = read_dynamic_tables(bits)?;
        InflateState::SymbolLoop { lit_len, dist }
      }
      InflateState::SymbolLoop { lit_len, dist } => {
        pos = decode_symbols(bits, out, pos, &lit_len, &dist)?;
        after_block(is_final)
      }
      InflateState::Done => return Ok(pos),
    }
  }
}

#[inline]
fn after_block(is_final: bool) -> InflateState {
  if is_final {
    InflateState::Done
  } else {
    InflateState::BlockHeader
  }
}

fn copy_stored_block<I>(bits: &mut BitSource<I>, out: &mut [u8], pos: usize) -> PngResult<usize>
where
  I: Iterator,
  I::Item: AsRef<[u8]>,
{
  bits.flush_to_byte_boundary();
  let len = bits.read_bits(16)?;
  let nlen = bits.read_bits(16)?;
  if len != (!nlen & 0xFFFF) {
    return Err(Corruption::StoredLengthMismatch.into());
  }
  let len = len as usize;
  let capacity = out.len();
  let dst = out.get_mut(pos..pos + len).ok_or(Corruption::OutputOverflow { capacity })?;
  bits.copy_aligned_bytes(dst)?;
  Ok(pos + len)
}

/// The literal/length and distance tables for BTYPE 1.
fn fixed_tables() -> PngResult<(HuffmanTable, HuffmanTable)> {
  let mut lit_len = [0_u8; 288];
  lit_len[..144].fill(8);
  lit_len[144..256].fill(9);
  lit_len[256..280].fill(7);
  lit_len[280..].fill(8);
  // 30 and 31 take up code space but never appear
  let dist = [5_u8; 32];
  Ok((build_canonical_codes(&lit_len)?, build_canonical_codes(&dist)?))
}

/// Reads the BTYPE 2 header and builds its two tables.
fn read_dynamic_tables<I>(bits: &mut BitSource<I>) -> PngResult<(HuffmanTable, HuffmanTable)>
where
  I: Iterator,
  I::Item: AsRef<[u8]>,
{
  let hlit = bits.read_bits(5)? as usize + 257;
  let hdist = bits.read_bits(5)? as usize + 1;
  let hclen = bits.read_bits(4)? as usize + 4;
  trace!("dynamic huffman header: hlit={hlit}, hdist={hdist}, hclen={hclen}");

  let mut code_length_lengths = [0_u8; 19];
  for &symbol in CODE_LENGTH_ORDER.iter().take(hclen) {
    code_length_lengths[symbol] = bits.read_bits(3)? as u8;
  }
  let code_length_table = build_canonical_codes(&code_length_lengths)?;

  let mut lengths = vec![0_u8; hlit + hdist];
  read_code_lengths(&code_length_table, bits, &mut lengths)?;
  let (lit_len, dist) = lengths.split_at(hlit);
  if lit_len[usize::from(END_OF_BLOCK)] == 0 {
    return Err(Corruption::MissingEndOfBlock.into());
  }
  Ok((build_canonical_codes(lit_len)?, build_canonical_codes(dist)?))
}

/// Fills in `lengths` using the code length alphabet (with its run-length
/// symbols).
fn read_code_lengths<I>(
  code_length_table: &HuffmanTable, bits: &mut BitSource<I>, lengths: &mut [u8],
) -> PngResult<()>
where
  I: Iterator,
  I::Item: AsRef<[u8]>,
{
  let mut acquired = 0_usize;
  while acquired < lengths.len() {
    let (value, repeat) = match code_length_table.decode_symbol(bits)? {
      literal @ 0..=15 => (literal as u8, 1),
      16 => {
        // repeat the previous length
        let previous = match acquired.checked_sub(1) {
          Some(i) => lengths[i],
          None => return Err(Corruption::BadCodeLengthRepeat.into()),
        };
        (previous, 3 + bits.read_bits(2)? as usize)
      }
      17 => (0, 3 + bits.read_bits(3)? as usize),
      18 => (0, 11 + bits.read_bits(7)? as usize),
      _ => return Err(Corruption::NoSymbolMatch.into()),
    };
    let end = acquired + repeat;
    if end > lengths.len() {
      return Err(Corruption::BadCodeLengthRepeat.into());
    }
    lengths[acquired..end].fill(value);
    acquired = end;
  }
  Ok(())
}

/// Decodes literals and back references until the end of block symbol.
fn decode_symbols<I>(
  bits: &mut BitSource<I>, out: &mut [u8], mut pos: usize, lit_len: &HuffmanTable,
  dist: &HuffmanTable,
) -> PngResult<usize>
where
  I: Iterator,
  I::Item: AsRef<[u8]>,
{
  let capacity = out.len();
  loop {
    let symbol = lit_len.decode_symbol(bits)?;
    match symbol {
      0..=255 => {
        let slot = out.get_mut(pos).ok_or(Corruption::OutputOverflow { capacity })?;
        *slot = symbol as u8;
        pos += 1;
      }
      END_OF_BLOCK => return Ok(pos),
      257..=285 => {
        let i = usize::from(symbol - 257);
        let length =
          usize::from(LENGTH_BASE[i]) + bits.read_bits(u32::from(LENGTH_EXTRA_BITS[i]))? as usize;

        let dist_symbol = dist.decode_symbol(bits)?;
        let d = usize::from(dist_symbol);
        if d >= DIST_BASE.len() {
          return Err(Corruption::InvalidDistanceSymbol(dist_symbol).into());
        }
        let distance =
          usize::from(DIST_BASE[d]) + bits.read_bits(u32::from(DIST_EXTRA_BITS[d]))? as usize;

        if distance > pos {
          return Err(Corruption::DistanceTooFar { distance, position: pos }.into());
        }
        if pos + length > capacity {
          return Err(Corruption::OutputOverflow { capacity }.into());
        }
        // byte at a time, a copy is allowed to read its own output.
        for _ in 0..length {
          out[pos] = out[pos - distance];
          pos += 1;
        }
      }
      other => return Err(Corruption::InvalidLengthSymbol(other).into()),
    }
  }
}

#[cfg(test)]
use crate::{huffman::test_support::*, PngError};

#[cfg(test)]
fn fixed_literal(w: &mut BitWriter, symbol: usize) {
  let (lit_len, _) = fixed_tables().unwrap();
  let te = lit_len.code(symbol).unwrap();
  w.write_bits(u32::from(te.reversed_code()), te.bit_count());
}

#[cfg(test)]
fn fixed_distance(w: &mut BitWriter, symbol: usize) {
  let (_, dist) = fixed_tables().unwrap();
  let te = dist.code(symbol).unwrap();
  w.write_bits(u32::from(te.reversed_code()), te.bit_count());
}

#[test]
fn test_fixed_length_and_distance_tables() {
  // symbol 257
  assert_eq!((LENGTH_BASE[0], LENGTH_EXTRA_BITS[0]), (3, 0));
  // symbol 285
  assert_eq!((LENGTH_BASE[28], LENGTH_EXTRA_BITS[28]), (258, 0));
  // symbol 284 covers up to 257, right below 285
  assert_eq!(LENGTH_BASE[27] + (1 << LENGTH_EXTRA_BITS[27]) - 2, 257);
  assert_eq!((DIST_BASE[0], DIST_EXTRA_BITS[0]), (1, 0));
  assert_eq!(u32::from(DIST_BASE[29]) + (1 << DIST_EXTRA_BITS[29]) - 1, 32_768);
  // each base picks up where the previous one's extra bits stop
  for i in 1..28 {
    assert_eq!(LENGTH_BASE[i], LENGTH_BASE[i - 1] + (1 << LENGTH_EXTRA_BITS[i - 1]), "{i}");
  }
  for i in 1..30 {
    assert_eq!(DIST_BASE[i], DIST_BASE[i - 1] + (1 << DIST_EXTRA_BITS[i - 1]), "{i}");
  }
}

#[test]
fn test_fixed_block_with_back_reference() {
  let mut w = BitWriter::default();
  w.write_bits(1, 1); // final
  w.write_bits(1, 2); // fixed
  for &b in b"abc" {
    fixed_literal(&mut w, usize::from(b));
  }
  // length 3, distance 3
  fixed_literal(&mut w, 257);
  fixed_distance(&mut w, 2);
  fixed_literal(&mut w, 256);
  let data = w.finish();
  let mut out = [0_u8; 6];
  let n = inflate(&mut BitSource::new([data.as_slice()]), &mut out).unwrap();
  assert_eq!(n, 6);
  assert_eq!(&out, b"abcabc");
}

#[test]
fn test_overlapping_copy() {
  let mut w = BitWriter::default();
  w.write_bits(1, 1);
  w.write_bits(1, 2);
  fixed_literal(&mut w, usize::from(b'z'));
  // length 5 (symbol 259), distance 1
  fixed_literal(&mut w, 259);
  fixed_distance(&mut w, 0);
  // length 11 (symbol 265 + 1 extra bit of 0), distance 2 (symbol 1)
  fixed_literal(&mut w, 265);
  w.write_bits(0, 1);
  fixed_distance(&mut w, 1);
  fixed_literal(&mut w, 256);
  let data = w.finish();
  let mut out = [0_u8; 17];
  let n = inflate(&mut BitSource::new([data.as_slice()]), &mut out).unwrap();
  assert_eq!(n, 17);
  assert_eq!(&out, &[b'z'; 17]);
}

#[test]
fn test_stored_blocks() {
  let mut w = BitWriter::default();
  // non-final stored block, "hi"
  w.write_bits(0, 1);
  w.write_bits(0, 2);
  w.write_bits(0, 5); // pad out the byte
  w.write_bits(2, 16);
  w.write_bits(!2 & 0xFFFF, 16);
  w.write_bits(u32::from(b'h'), 8);
  w.write_bits(u32::from(b'i'), 8);
  // final fixed block, "!"
  w.write_bits(1, 1);
  w.write_bits(1, 2);
  fixed_literal(&mut w, usize::from(b'!'));
  fixed_literal(&mut w, 256);
  let data = w.finish();
  // split the input so the stored copy has to cross chunks
  let chunks: Vec<&[u8]> = vec![&data[..6], &data[6..]];
  let mut out = [0_u8; 3];
  let n = inflate(&mut BitSource::new(chunks), &mut out).unwrap();
  assert_eq!(&out[..n], b"hi!");
}

#[test]
fn test_stored_length_mismatch() {
  let mut w = BitWriter::default();
  w.write_bits(1, 1);
  w.write_bits(0, 2);
  w.write_bits(0, 5);
  w.write_bits(2, 16);
  w.write_bits(2, 16);
  let data = w.finish();
  let mut out = [0_u8; 8];
  assert!(matches!(
    inflate(&mut BitSource::new([data.as_slice()]), &mut out),
    Err(PngError::CorruptStream(Corruption::StoredLengthMismatch))
  ));
}

#[test]
fn test_stored_block_past_output() {
  let mut w = BitWriter::default();
  w.write_bits(1, 1);
  w.write_bits(0, 2);
  w.write_bits(0, 5);
  w.write_bits(3, 16);
  w.write_bits(!3 & 0xFFFF, 16);
  for &b in b"xyz" {
    w.write_bits(u32::from(b), 8);
  }
  let data = w.finish();
  let mut out = [0_u8; 2];
  assert!(matches!(
    inflate(&mut BitSource::new([data.as_slice()]), &mut out),
    Err(PngError::CorruptStream(Corruption::OutputOverflow { capacity: 2 }))
  ));
  assert_eq!(out, [0, 0]);
}

#[test]
fn test_reserved_block_type() {
  let data: [&[u8]; 1] = [&[0b111]];
  let mut out = [0_u8; 8];
  assert!(matches!(
    inflate(&mut BitSource::new(data), &mut out),
    Err(PngError::CorruptStream(Corruption::ReservedBlockType))
  ));
}

#[test]
fn test_distance_before_start_of_output() {
  let mut w = BitWriter::default();
  w.write_bits(1, 1);
  w.write_bits(1, 2);
  fixed_literal(&mut w, usize::from(b'a'));
  fixed_literal(&mut w, 257);
  fixed_distance(&mut w, 3); // distance 4, only 1 byte written
  fixed_literal(&mut w, 256);
  let data = w.finish();
  let mut out = [0_u8; 8];
  assert!(matches!(
    inflate(&mut BitSource::new([data.as_slice()]), &mut out),
    Err(PngError::CorruptStream(Corruption::DistanceTooFar { distance: 4, position: 1 }))
  ));
}

#[test]
fn test_output_bound_is_never_exceeded() {
  let mut w = BitWriter::default();
  w.write_bits(1, 1);
  w.write_bits(1, 2);
  fixed_literal(&mut w, usize::from(b'a'));
  fixed_literal(&mut w, 258); // length 4
  fixed_distance(&mut w, 0);
  fixed_literal(&mut w, 256);
  let data = w.finish();

  let mut out = [0_u8; 5];
  assert_eq!(inflate(&mut BitSource::new([data.as_slice()]), &mut out).unwrap(), 5);

  let mut out = [0xEE_u8; 4];
  assert!(matches!(
    inflate(&mut BitSource::new([data.as_slice()]), &mut out),
    Err(PngError::CorruptStream(Corruption::OutputOverflow { capacity: 4 }))
  ));
  // the copy was rejected before any of it was written
  assert_eq!(out, [b'a', 0xEE, 0xEE, 0xEE]);

  let mut out = [0_u8; 0];
  assert!(matches!(
    inflate(&mut BitSource::new([data.as_slice()]), &mut out),
    Err(PngError::CorruptStream(Corruption::OutputOverflow { capacity: 0 }))
  ));
}

#[test]
fn test_truncated_stream() {
  let data = miniz_oxide::deflate::compress_to_vec(b"some bytes some bytes some bytes", 6);
  let cut = &data[..data.len() / 2];
  let mut out = [0_u8; 64];
  assert!(matches!(
    inflate(&mut BitSource::new([cut]), &mut out),
    Err(PngError::CorruptStream(_))
  ));
}

#[test]
fn test_matches_reference_compressor() {
  let mut rng = Rng::new();
  let mut data = Vec::new();
  for i in 0..20_000_u32 {
    // some runs, some text, some noise
    match (i / 1000) % 3 {
      0 => data.push((i / 7) as u8),
      1 => data.push(b"the quick brown fox "[(i % 20) as usize]),
      _ => data.push(rng.next_u32() as u8),
    }
  }
  for level in 0..=10 {
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, level);
    // random chunk boundaries
    let mut chunks: Vec<&[u8]> = Vec::new();
    let mut rest = compressed.as_slice();
    while !rest.is_empty() {
      let n = (1 + rng.below(300) as usize).min(rest.len());
      let (head, tail) = rest.split_at(n);
      chunks.push(head);
      rest = tail;
    }
    let mut out = vec![0_u8; data.len()];
    let n = inflate(&mut BitSource::new(chunks), &mut out).unwrap();
    assert_eq!(n, data.len(), "level {level}");
    assert!(out == data, "level {level}");
  }
}

#[test]
fn test_zlib_wrapper() {
  let data = b"zlib wrapped zlib wrapped zlib wrapped";
  let compressed = miniz_oxide::deflate::compress_to_vec_zlib(data, 6);
  let mut out = [0_u8; 38];
  let n = zlib_decompress(&mut BitSource::new([compressed.as_slice()]), &mut out).unwrap();
  assert_eq!(&out[..n], &data[..]);

  let mut bad = compressed.clone();
  bad[0] = 0x79; // compression method 9
  assert!(matches!(
    zlib_decompress(&mut BitSource::new([bad.as_slice()]), &mut out),
    Err(PngError::FormatViolation(Violation::BadZlibHeader))
  ));
  // 0x78 0xBB: a valid check value, but with FDICT set
  let dict: [&[u8]; 1] = [&[0x78, 0xBB, 0, 0, 0, 0]];
  assert!(matches!(
    zlib_decompress(&mut BitSource::new(dict), &mut out),
    Err(PngError::FormatViolation(Violation::PresetDictionary))
  ));
}

#[test]
fn test_random_input_never_panics() {
  let mut rng = Rng::new();
  for _ in 0..500 {
    let len = rng.below(200) as usize;
    let input: Vec<u8> = (0..len).map(|_| rng.next_u32() as u8).collect();
    let mut out = vec![0_u8; rng.below(512) as usize];
    let mut bits = BitSource::new([input.as_slice()]);
    if let Ok(n) = inflate(&mut bits, &mut out) {
      assert!(n <= out.len());
    }
  }
}
