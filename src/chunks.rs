//! Reading the PNG container: the signature, then a run of chunks.
//!
//! Each chunk is laid out as:
//! * 4 bytes big-endian data length
//! * 4 bytes ASCII chunk type
//! * `length` bytes of data
//! * 4 bytes big-endian CRC of the type and data

use std::io::{ErrorKind, Read};

use log::{debug, trace, warn};

use crate::{
  crc32::png_crc,
  error::{PngResult, Violation},
  ihdr::Ihdr,
  options::DecodeOptions,
};

/// The first 8 bytes of every PNG.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

/// Chunk lengths can't go above this.
pub const MAX_CHUNK_LEN: u32 = (1 << 31) - 1;

/// Checks if the bytes start with the PNG signature.
#[inline]
#[must_use]
pub fn is_png_signature_correct(bytes: &[u8]) -> bool {
  bytes.starts_with(&PNG_SIGNATURE)
}

/// A chunk's 4 byte type tag.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PngChunkType(pub [u8; 4]);
impl PngChunkType {
  pub const IHDR: Self = Self(*b"IHDR");
  pub const IDAT: Self = Self(*b"IDAT");
  pub const IEND: Self = Self(*b"IEND");

  /// Critical chunks have an uppercase first letter.
  #[inline]
  #[must_use]
  pub const fn is_critical(self) -> bool {
    self.0[0] & 0x20 == 0
  }
}
impl core::fmt::Debug for PngChunkType {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    use core::fmt::Write;
    for b in self.0 {
      f.write_char(if b.is_ascii_graphic() { b as char } else { '?' })?;
    }
    Ok(())
  }
}

/// One chunk with its data pulled out of the stream.
#[derive(Clone, PartialEq, Eq)]
pub struct RawChunk {
  pub chunk_type: PngChunkType,
  pub data: Vec<u8>,
  pub declared_crc: u32,
}
impl core::fmt::Debug for RawChunk {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("RawChunk")
      .field("chunk_type", &self.chunk_type)
      .field("data", &(&self.data[..self.data.len().min(12)], self.data.len()))
      .field("declared_crc", &self.declared_crc)
      .finish()
  }
}

/// Pulls chunks out of any byte source.
#[derive(Debug)]
pub struct ChunkReader<R> {
  source: R,
  verify_crc: bool,
}
impl<R: Read> ChunkReader<R> {
  /// Reads and checks the signature.
  pub fn new(mut source: R, verify_crc: bool) -> PngResult<Self> {
    let mut sig = [0_u8; 8];
    if read_fully(&mut source, &mut sig)? != sig.len() || !is_png_signature_correct(&sig) {
      return Err(Violation::BadSignature.into());
    }
    if !verify_crc {
      warn!("chunk CRC checks are disabled");
    }
    Ok(Self { source, verify_crc })
  }

  /// The next chunk, or `None` if the input ended cleanly between chunks.
  ///
  /// ## Failure
  /// * The input ends partway through a chunk.
  /// * A length above [`MAX_CHUNK_LEN`].
  /// * A CRC mismatch (when checking is on).
  pub fn next_chunk(&mut self) -> PngResult<Option<RawChunk>> {
    let mut head = [0_u8; 8];
    match read_fully(&mut self.source, &mut head)? {
      0 => return Ok(None),
      8 => (),
      _ => return Err(Violation::TruncatedChunk.into()),
    }
    let len = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let chunk_type = PngChunkType([head[4], head[5], head[6], head[7]]);
    if len > MAX_CHUNK_LEN {
      return Err(Violation::ChunkTooLong(len).into());
    }
    trace!("chunk {chunk_type:?}, {len} bytes");

    // the declared length can't be trusted for a big up front allocation
    let mut data = Vec::with_capacity((len as usize).min(1 << 16));
    let got = (&mut self.source).take(u64::from(len)).read_to_end(&mut data)?;
    if got != len as usize {
      return Err(Violation::TruncatedChunk.into());
    }

    let mut crc_bytes = [0_u8; 4];
    if read_fully(&mut self.source, &mut crc_bytes)? != crc_bytes.len() {
      return Err(Violation::TruncatedChunk.into());
    }
    let declared_crc = u32::from_be_bytes(crc_bytes);
    if self.verify_crc {
      let actual = png_crc(chunk_type.0, &data);
      if actual != declared_crc {
        let chunk_type = chunk_type.0;
        return Err(Violation::CrcMismatch { chunk_type, declared: declared_crc, actual }.into());
      }
    }
    Ok(Some(RawChunk { chunk_type, data, declared_crc }))
  }

  /// Reads the first chunk, which must be `IHDR`.
  pub fn read_ihdr(&mut self) -> PngResult<Ihdr> {
    match self.next_chunk()? {
      Some(RawChunk { chunk_type: PngChunkType::IHDR, data, .. }) => Ihdr::parse(&data),
      _ => Err(Violation::FirstChunkNotIhdr.into()),
    }
  }

  /// Checks for bytes after `IEND`.
  fn has_trailing_data(&mut self) -> bool {
    let mut probe = [0_u8; 1];
    matches!(read_fully(&mut self.source, &mut probe), Ok(1))
  }
}

/// Fills as much of `buf` as the source can, returns how much that was.
fn read_fully<R: Read>(source: &mut R, buf: &mut [u8]) -> PngResult<usize> {
  let mut filled = 0;
  while filled < buf.len() {
    match source.read(&mut buf[filled..]) {
      Ok(0) => break,
      Ok(n) => filled += n,
      Err(e) if e.kind() == ErrorKind::Interrupted => continue,
      Err(e) => return Err(e.into()),
    }
  }
  Ok(filled)
}

/// The parts of a PNG that decoding needs.
#[derive(Debug, Clone)]
pub struct PngStream {
  pub ihdr: Ihdr,
  /// The data of each `IDAT` chunk, in order. Logically these are all one
  /// zlib stream.
  pub idat: Vec<Vec<u8>>,
}
impl PngStream {
  /// Total compressed bytes over all the `IDAT` chunks.
  #[inline]
  #[must_use]
  pub fn idat_len(&self) -> usize {
    self.idat.iter().map(Vec::len).sum()
  }
}

/// Reads just far enough to get the header.
///
/// The image limits are *not* applied here, only the header checks.
pub fn read_header<R: Read>(source: R, options: &DecodeOptions) -> PngResult<Ihdr> {
  ChunkReader::new(source, options.verify_crc)?.read_ihdr()
}

/// Reads the whole container, up to `IEND`.
///
/// Chunks other than `IHDR`, `IDAT` and `IEND` are skipped.
///
/// ## Failure
/// * Any problem with the signature or chunk layout.
/// * A header this crate can't decode, or one beyond the `options` limits.
/// * No `IDAT` chunk, or no `IEND` chunk.
pub fn read_png_stream<R: Read>(source: R, options: &DecodeOptions) -> PngResult<PngStream> {
  let mut reader = ChunkReader::new(source, options.verify_crc)?;
  let ihdr = reader.read_ihdr()?;
  options.limits.check(ihdr.width, ihdr.height)?;

  let mut idat = Vec::new();
  loop {
    let chunk = reader.next_chunk()?.ok_or(Violation::MissingIend)?;
    match chunk.chunk_type {
      PngChunkType::IDAT => idat.push(chunk.data),
      PngChunkType::IEND => break,
      other => trace!("skipping {other:?} chunk (critical: {})", other.is_critical()),
    }
  }
  if reader.has_trailing_data() {
    warn!("ignoring data after the IEND chunk");
  }

  let stream = PngStream { ihdr, idat };
  if stream.idat.is_empty() {
    return Err(Violation::NoImageData.into());
  }
  debug!("{} IDAT chunks, {} compressed bytes", stream.idat.len(), stream.idat_len());
  Ok(stream)
}

#[cfg(test)]
fn chunk_bytes(chunk_type: &[u8; 4], data: &[u8]) -> Vec<u8> {
  let mut v = Vec::new();
  v.extend_from_slice(&(data.len() as u32).to_be_bytes());
  v.extend_from_slice(chunk_type);
  v.extend_from_slice(data);
  v.extend_from_slice(&png_crc(*chunk_type, data).to_be_bytes());
  v
}

#[cfg(test)]
const IHDR_1X1_RGB: [u8; 13] = [0, 0, 0, 1, 0, 0, 0, 1, 8, 2, 0, 0, 0];

#[test]
fn test_chunk_type_debug() {
  assert_eq!(format!("{:?}", PngChunkType::IDAT), "IDAT");
  assert_eq!(format!("{:?}", PngChunkType([b't', b'E', 0, b'X'])), "tE?X");
  assert!(PngChunkType::IEND.is_critical());
  assert!(!PngChunkType(*b"tEXt").is_critical());
}

#[test]
fn test_read_stream_collects_idat_in_order() {
  let mut png = PNG_SIGNATURE.to_vec();
  png.extend(chunk_bytes(b"IHDR", &IHDR_1X1_RGB));
  png.extend(chunk_bytes(b"IDAT", b"abc"));
  png.extend(chunk_bytes(b"tEXt", b"Comment\0hello"));
  png.extend(chunk_bytes(b"IDAT", b""));
  png.extend(chunk_bytes(b"IDAT", b"de"));
  png.extend(chunk_bytes(b"IEND", b""));
  let stream = read_png_stream(png.as_slice(), &DecodeOptions::default()).unwrap();
  assert_eq!((stream.ihdr.width, stream.ihdr.height), (1, 1));
  assert_eq!(stream.idat, vec![b"abc".to_vec(), vec![], b"de".to_vec()]);
  assert_eq!(stream.idat_len(), 5);
}

#[test]
fn test_container_violations() {
  fn violation(bytes: &[u8]) -> Violation {
    match read_png_stream(bytes, &DecodeOptions::default()) {
      Err(crate::PngError::FormatViolation(v)) => v,
      other => panic!("expected a format violation, got {other:?}"),
    }
  }

  assert_eq!(violation(b"GIF89a.."), Violation::BadSignature);
  assert_eq!(violation(&PNG_SIGNATURE[..5]), Violation::BadSignature);

  let mut png = PNG_SIGNATURE.to_vec();
  png.extend(chunk_bytes(b"IDAT", b"x"));
  assert_eq!(violation(&png), Violation::FirstChunkNotIhdr);

  let mut png = PNG_SIGNATURE.to_vec();
  png.extend(chunk_bytes(b"IHDR", &IHDR_1X1_RGB));
  let header_only = png.clone();
  assert_eq!(violation(&header_only), Violation::MissingIend);

  png.extend(chunk_bytes(b"IEND", b""));
  assert_eq!(violation(&png), Violation::NoImageData);

  let mut truncated = header_only.clone();
  truncated.extend(&chunk_bytes(b"IDAT", b"xyz")[..9]);
  assert_eq!(violation(&truncated), Violation::TruncatedChunk);

  let mut too_long = header_only.clone();
  too_long.extend(0x8000_0000_u32.to_be_bytes());
  too_long.extend(b"IDAT");
  assert_eq!(violation(&too_long), Violation::ChunkTooLong(0x8000_0000));
}

#[test]
fn test_crc_mismatch_can_be_ignored() {
  let mut png = PNG_SIGNATURE.to_vec();
  png.extend(chunk_bytes(b"IHDR", &IHDR_1X1_RGB));
  let mut idat = chunk_bytes(b"IDAT", b"abc");
  let last = idat.len() - 1;
  idat[last] ^= 0xFF;
  png.extend(idat);
  png.extend(chunk_bytes(b"IEND", b""));

  let err = read_png_stream(png.as_slice(), &DecodeOptions::default()).unwrap_err();
  assert!(matches!(
    err,
    crate::PngError::FormatViolation(Violation::CrcMismatch { chunk_type, .. })
      if &chunk_type == b"IDAT"
  ));
  let relaxed = DecodeOptions::default().with_verify_crc(false);
  assert!(read_png_stream(png.as_slice(), &relaxed).is_ok());
}

#[test]
fn test_read_header_stops_after_ihdr() {
  let mut png = PNG_SIGNATURE.to_vec();
  png.extend(chunk_bytes(b"IHDR", &IHDR_1X1_RGB));
  // garbage after the header doesn't matter for a header read
  png.extend(b"not a chunk");
  let ihdr = read_header(png.as_slice(), &DecodeOptions::default()).unwrap();
  assert_eq!((ihdr.width, ihdr.height), (1, 1));
}
