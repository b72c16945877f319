//! The error type for all decoding operations.

/// Shorthand for a result with a [`PngError`].
pub type PngResult<T> = Result<T, PngError>;

/// An error from decoding PNG data.
///
/// Every error is terminal for the decode call that produced it, there's no
/// partially decoded image.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PngError {
  /// The file couldn't be opened or read.
  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),

  /// The PNG is well formed, but uses something this decoder doesn't do.
  #[error("unsupported png feature: {0}")]
  UnsupportedFeature(Unsupported),

  /// The compressed image data is damaged.
  #[error("corrupt compressed stream: {0}")]
  CorruptStream(Corruption),

  /// The PNG container (or zlib wrapper) is structurally wrong.
  #[error("png format violation: {0}")]
  FormatViolation(Violation),
}
impl From<Unsupported> for PngError {
  #[inline]
  fn from(u: Unsupported) -> Self {
    Self::UnsupportedFeature(u)
  }
}
impl From<Corruption> for PngError {
  #[inline]
  fn from(c: Corruption) -> Self {
    Self::CorruptStream(c)
  }
}
impl From<Violation> for PngError {
  #[inline]
  fn from(v: Violation) -> Self {
    Self::FormatViolation(v)
  }
}

/// Things that a valid PNG can use but we reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Unsupported {
  /// Adam7 (or any other) interlacing.
  #[error("interlace method {0}")]
  Interlaced(u8),
  /// Only truecolor (2) and truecolor with alpha (6) are decoded.
  #[error("color type {0}")]
  ColorType(u8),
  /// Only 8 bits per channel are decoded.
  #[error("bit depth {0}")]
  BitDepth(u8),
  /// Only compression method 0 (zlib/deflate) exists.
  #[error("compression method {0}")]
  CompressionMethod(u8),
  /// Only filter method 0 (adaptive filtering) exists.
  #[error("filter method {0}")]
  FilterMethod(u8),
}

/// Ways that a DEFLATE stream can be broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Corruption {
  /// Ran out of compressed bits in the middle of the stream.
  #[error("compressed data ended early")]
  UnexpectedEnd,
  /// The buffered bits don't match any code in the active table.
  #[error("no huffman code matches the input bits")]
  NoSymbolMatch,
  /// A code length set that claims more codes than fit.
  #[error("huffman code lengths are over-subscribed")]
  OversubscribedCodes,
  /// A code length above 15 bits.
  #[error("huffman code length above 15 bits")]
  CodeLengthTooLong,
  /// A code-length repeat with nothing to repeat, or a run past the end.
  #[error("bad code length repeat")]
  BadCodeLengthRepeat,
  /// The block has no end-of-block code.
  #[error("literal/length table has no end-of-block code")]
  MissingEndOfBlock,
  /// Block type 3.
  #[error("reserved block type")]
  ReservedBlockType,
  /// Stored block with `NLEN != !LEN`.
  #[error("stored block length check failed")]
  StoredLengthMismatch,
  /// Literal/length symbol 286 or 287.
  #[error("invalid length symbol {0}")]
  InvalidLengthSymbol(u16),
  /// Distance symbol 30 or 31.
  #[error("invalid distance symbol {0}")]
  InvalidDistanceSymbol(u16),
  /// A back reference to before the start of the output.
  #[error("distance {distance} reaches before the start of output at {position}")]
  DistanceTooFar { distance: usize, position: usize },
  /// A write would go past the precomputed output size.
  #[error("output would exceed {capacity} bytes")]
  OutputOverflow { capacity: usize },
}

/// Structural problems with the PNG container or the zlib wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Violation {
  /// The first 8 bytes aren't the PNG signature.
  #[error("bad png signature")]
  BadSignature,
  /// The data ended partway through a chunk.
  #[error("truncated chunk")]
  TruncatedChunk,
  /// A chunk length above `2^31 - 1`.
  #[error("chunk length {0} too large")]
  ChunkTooLong(u32),
  /// The declared CRC doesn't match the chunk.
  #[error("crc mismatch in {chunk_type:?} chunk: declared {declared:#010x}, actual {actual:#010x}")]
  CrcMismatch { chunk_type: [u8; 4], declared: u32, actual: u32 },
  /// The first chunk isn't `IHDR`.
  #[error("first chunk is not IHDR")]
  FirstChunkNotIhdr,
  /// The `IHDR` isn't 13 bytes.
  #[error("IHDR has length {0}, expected 13")]
  BadIhdrLength(usize),
  /// Width or height is 0.
  #[error("image width or height is zero")]
  ZeroDimension,
  /// The data ended without an `IEND` chunk.
  #[error("missing IEND chunk")]
  MissingIend,
  /// There was no `IDAT` data at all.
  #[error("no IDAT chunks")]
  NoImageData,
  /// Bad zlib CMF/FLG header bytes.
  #[error("bad zlib header")]
  BadZlibHeader,
  /// The zlib stream wants a preset dictionary.
  #[error("zlib preset dictionaries are not allowed in png")]
  PresetDictionary,
  /// Decompression finished before filling the scanline buffer.
  #[error("image data decompressed to {actual} bytes, expected {expected}")]
  ShortImageData { expected: usize, actual: usize },
  /// A scanline's filter type byte is above 4.
  #[error("illegal filter type {0}")]
  IllegalFilterType(u8),
  /// The caller's output buffer can't hold the image.
  #[error("buffer too small: need {needed} bytes, got {actual}")]
  BufferTooSmall { needed: usize, actual: usize },
  /// The image dimensions went past the configured [`Limits`](crate::Limits).
  #[error("image {width}x{height} exceeds the configured limits")]
  LimitExceeded { width: u32, height: u32 },
  /// Width or height above `2^31 - 1`.
  #[error("image {width}x{height} is larger than png allows")]
  DimensionTooLarge { width: u32, height: u32 },
  /// Size math overflowed `usize`, or a buffer that size couldn't be
  /// allocated.
  #[error("image dimensions overflow the address space")]
  DimensionsOverflow,
  /// The `IDAT` data is too small to ever inflate to the image's size.
  #[error("{compressed} compressed bytes can't hold {expected} bytes of image data")]
  NotEnoughImageData { compressed: usize, expected: usize },
}

#[test]
fn test_error_kinds_convert() {
  let e: PngError = Corruption::UnexpectedEnd.into();
  assert!(matches!(e, PngError::CorruptStream(Corruption::UnexpectedEnd)));
  let e: PngError = Unsupported::Interlaced(1).into();
  assert!(matches!(e, PngError::UnsupportedFeature(Unsupported::Interlaced(1))));
  let e: PngError = Violation::BadSignature.into();
  assert_eq!(e.to_string(), "png format violation: bad png signature");
  let e: PngError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
  assert!(matches!(e, PngError::Io(_)));
}
