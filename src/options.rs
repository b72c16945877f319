//! Knobs for a decode call.

use crate::error::{PngResult, Violation};

/// Caps on the size of image that will be decoded.
///
/// All fields default to `None` (no limit). These are checked right after the
/// header is read, before the big buffers get allocated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
  pub max_width: Option<u32>,
  pub max_height: Option<u32>,
  /// Maximum pixel count (width * height).
  pub max_pixels: Option<u64>,
}
impl Limits {
  /// Checks dimensions against the limits.
  pub fn check(&self, width: u32, height: u32) -> PngResult<()> {
    let over = self.max_width.is_some_and(|max_w| width > max_w)
      || self.max_height.is_some_and(|max_h| height > max_h)
      || self.max_pixels.is_some_and(|max_px| u64::from(width) * u64::from(height) > max_px);
    if over {
      Err(Violation::LimitExceeded { width, height }.into())
    } else {
      Ok(())
    }
  }
}

/// Options for decoding.
///
/// ```
/// # use texpng::{DecodeOptions, Limits};
/// let opts = DecodeOptions::default()
///   .with_limits(Limits { max_pixels: Some(4096 * 4096), ..Limits::default() });
/// assert!(opts.verify_crc);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
  /// Check each chunk's CRC (default `true`).
  pub verify_crc: bool,
  pub limits: Limits,
}
impl Default for DecodeOptions {
  #[inline]
  fn default() -> Self {
    Self { verify_crc: true, limits: Limits::default() }
  }
}
impl DecodeOptions {
  #[inline]
  #[must_use]
  pub const fn with_verify_crc(mut self, verify_crc: bool) -> Self {
    self.verify_crc = verify_crc;
    self
  }

  #[inline]
  #[must_use]
  pub const fn with_limits(mut self, limits: Limits) -> Self {
    self.limits = limits;
    self
  }
}

#[test]
fn test_limits_check() {
  assert!(Limits::default().check(u32::MAX, u32::MAX).is_ok());
  let limits = Limits { max_width: Some(100), max_height: Some(50), max_pixels: Some(2000) };
  assert!(limits.check(40, 50).is_ok());
  assert!(limits.check(101, 1).is_err());
  assert!(limits.check(1, 51).is_err());
  assert!(matches!(
    limits.check(41, 50),
    Err(crate::PngError::FormatViolation(Violation::LimitExceeded { width: 41, height: 50 }))
  ));
}
