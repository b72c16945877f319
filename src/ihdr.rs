//! The image header.

use log::debug;

use crate::error::{PngResult, Unsupported, Violation};

/// Data length of an `IHDR` chunk.
pub const IHDR_LEN: usize = 13;

/// Largest width or height a PNG may declare, `2^31 - 1`.
pub const MAX_DIMENSION: u32 = 0x7FFF_FFFF;

/// The `IHDR` chunk's fields.
///
/// Once parsed with [`Ihdr::parse`] the header has already been checked to be
/// something this crate decodes: 8-bit truecolor, with or without alpha, and
/// not interlaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ihdr {
  pub width: u32,
  pub height: u32,
  pub bit_depth: u8,
  pub color_type: PngColorType,
  pub compression_method: u8,
  pub filter_method: u8,
  pub interlace_method: u8,
}
impl Ihdr {
  /// Parses and validates `IHDR` chunk data.
  ///
  /// ## Failure
  /// * Data that isn't exactly 13 bytes.
  /// * A width or height of 0, or above [`MAX_DIMENSION`].
  /// * Anything other than non-interlaced 8-bit RGB or RGBA.
  pub fn parse(data: &[u8]) -> PngResult<Self> {
    let bytes: &[u8; IHDR_LEN] =
      data.try_into().map_err(|_| Violation::BadIhdrLength(data.len()))?;
    let ihdr = Self {
      width: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
      height: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
      bit_depth: bytes[8],
      color_type: PngColorType(bytes[9]),
      compression_method: bytes[10],
      filter_method: bytes[11],
      interlace_method: bytes[12],
    };
    debug!("IHDR: {ihdr:?}");
    ihdr.validate()?;
    Ok(ihdr)
  }

  fn validate(&self) -> PngResult<()> {
    if self.width == 0 || self.height == 0 {
      return Err(Violation::ZeroDimension.into());
    }
    if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
      return Err(Violation::DimensionTooLarge { width: self.width, height: self.height }.into());
    }
    if self.interlace_method != 0 {
      return Err(Unsupported::Interlaced(self.interlace_method).into());
    }
    if self.color_type != PngColorType::RGB && self.color_type != PngColorType::RGBA {
      return Err(Unsupported::ColorType(self.color_type.0).into());
    }
    if self.bit_depth != 8 {
      return Err(Unsupported::BitDepth(self.bit_depth).into());
    }
    if self.compression_method != 0 {
      return Err(Unsupported::CompressionMethod(self.compression_method).into());
    }
    if self.filter_method != 0 {
      return Err(Unsupported::FilterMethod(self.filter_method).into());
    }
    Ok(())
  }

  /// Bytes per source pixel: 3 or 4.
  #[inline]
  #[must_use]
  pub const fn bytes_per_pixel(&self) -> usize {
    self.color_type.bytes_per_pixel()
  }

  /// Bytes in one filtered scanline, including the filter type byte.
  #[inline]
  pub fn bytes_per_scanline(&self) -> PngResult<usize> {
    (self.width as usize)
      .checked_mul(self.bytes_per_pixel())
      .and_then(|b| b.checked_add(1))
      .ok_or_else(|| Violation::DimensionsOverflow.into())
  }

  /// Size of the decompressed image data: `width * height * bpp + height`.
  ///
  /// Fails if that's more than a `Vec` can ever hold.
  pub fn scratch_len(&self) -> PngResult<usize> {
    self
      .bytes_per_scanline()?
      .checked_mul(self.height as usize)
      .filter(|&len| len <= isize::MAX as usize)
      .ok_or_else(|| Violation::DimensionsOverflow.into())
  }

  /// Size of the decoded RGBA8 output: `width * height * 4`.
  ///
  /// Fails if that's more than a `Vec` can ever hold.
  pub fn rgba_len(&self) -> PngResult<usize> {
    (self.width as usize)
      .checked_mul(self.height as usize)
      .and_then(|px| px.checked_mul(4))
      .filter(|&len| len <= isize::MAX as usize)
      .ok_or_else(|| Violation::DimensionsOverflow.into())
  }
}

/// The `IHDR` color type byte.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PngColorType(pub u8);
impl PngColorType {
  pub const RGB: Self = Self(2);
  pub const RGBA: Self = Self(6);

  /// 3 for RGB, 4 for anything with alpha.
  #[inline]
  #[must_use]
  pub const fn bytes_per_pixel(self) -> usize {
    if self.0 == Self::RGB.0 {
      3
    } else {
      4
    }
  }

  #[inline]
  #[must_use]
  pub const fn has_alpha(self) -> bool {
    self.0 == Self::RGBA.0
  }
}
impl core::fmt::Debug for PngColorType {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match *self {
      PngColorType::RGB => write!(f, "RGB"),
      PngColorType::RGBA => write!(f, "RGBA"),
      other => write!(f, "Unsupported({})", other.0),
    }
  }
}

#[cfg(test)]
fn ihdr_bytes(w: u32, h: u32, tail: [u8; 5]) -> Vec<u8> {
  let mut v = Vec::new();
  v.extend_from_slice(&w.to_be_bytes());
  v.extend_from_slice(&h.to_be_bytes());
  v.extend_from_slice(&tail);
  v
}

#[test]
fn test_parse_ihdr() {
  let ihdr = Ihdr::parse(&ihdr_bytes(3, 2, [8, 2, 0, 0, 0])).unwrap();
  assert_eq!((ihdr.width, ihdr.height), (3, 2));
  assert_eq!(ihdr.color_type, PngColorType::RGB);
  assert_eq!(ihdr.bytes_per_pixel(), 3);
  assert_eq!(ihdr.scratch_len().unwrap(), 3 * 2 * 3 + 2);
  assert_eq!(ihdr.rgba_len().unwrap(), 3 * 2 * 4);

  let ihdr = Ihdr::parse(&ihdr_bytes(5, 7, [8, 6, 0, 0, 0])).unwrap();
  assert!(ihdr.color_type.has_alpha());
  assert_eq!(ihdr.scratch_len().unwrap(), 5 * 7 * 4 + 7);
}

#[test]
fn test_unsupported_headers() {
  use crate::PngError;
  let check = |tail: [u8; 5]| Ihdr::parse(&ihdr_bytes(1, 1, tail)).unwrap_err();
  assert!(matches!(
    check([8, 2, 0, 0, 1]),
    PngError::UnsupportedFeature(Unsupported::Interlaced(1))
  ));
  assert!(matches!(
    check([8, 3, 0, 0, 0]),
    PngError::UnsupportedFeature(Unsupported::ColorType(3))
  ));
  assert!(matches!(
    check([8, 0, 0, 0, 0]),
    PngError::UnsupportedFeature(Unsupported::ColorType(0))
  ));
  assert!(matches!(
    check([16, 6, 0, 0, 0]),
    PngError::UnsupportedFeature(Unsupported::BitDepth(16))
  ));
  assert!(matches!(
    check([8, 6, 1, 0, 0]),
    PngError::UnsupportedFeature(Unsupported::CompressionMethod(1))
  ));
  assert!(matches!(
    check([8, 6, 0, 1, 0]),
    PngError::UnsupportedFeature(Unsupported::FilterMethod(1))
  ));
}

#[test]
fn test_malformed_headers() {
  use crate::PngError;
  assert!(matches!(
    Ihdr::parse(&[0; 12]),
    Err(PngError::FormatViolation(Violation::BadIhdrLength(12)))
  ));
  assert!(matches!(
    Ihdr::parse(&ihdr_bytes(0, 4, [8, 2, 0, 0, 0])),
    Err(PngError::FormatViolation(Violation::ZeroDimension))
  ));
}

#[test]
fn test_dimensions_above_the_png_maximum() {
  use crate::PngError;
  assert!(matches!(
    Ihdr::parse(&ihdr_bytes(u32::MAX, 1, [8, 6, 0, 0, 0])),
    Err(PngError::FormatViolation(Violation::DimensionTooLarge { width: u32::MAX, height: 1 }))
  ));
  assert!(matches!(
    Ihdr::parse(&ihdr_bytes(1, MAX_DIMENSION + 1, [8, 2, 0, 0, 0])),
    Err(PngError::FormatViolation(Violation::DimensionTooLarge { .. }))
  ));
  assert!(Ihdr::parse(&ihdr_bytes(MAX_DIMENSION, 1, [8, 2, 0, 0, 0])).is_ok());
}

#[test]
fn test_size_math_overflow() {
  let ihdr = Ihdr::parse(&ihdr_bytes(MAX_DIMENSION, MAX_DIMENSION, [8, 6, 0, 0, 0])).unwrap();
  assert!(ihdr.scratch_len().is_err());
  assert!(ihdr.rgba_len().is_err());
}
