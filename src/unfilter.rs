//! Undoing the scanline filters, and expanding the result to RGBA8.
//!
//! From the PNG spec:
//!
//! > Filters are applied to **bytes**, not to pixels, regardless of the bit
//! > depth or color type of the image.
//!
//! With 8-bit channels the "pixel to the left" is always `bpp` bytes back.

use crate::{
  error::{PngResult, Violation},
  ihdr::Ihdr,
};

/// Unfilters the decompressed scanlines in `scratch` (in place) and writes
/// the RGBA8 pixels into `dst`.
///
/// `scratch` must be exactly [`Ihdr::scratch_len`] bytes and `dst` must be at
/// least [`Ihdr::rgba_len`] bytes. Only the first `rgba_len` bytes of `dst`
/// are written.
///
/// ## Failure
/// * Wrongly sized buffers.
/// * A filter type above 4.
pub fn unfilter_to_rgba(ihdr: &Ihdr, scratch: &mut [u8], dst: &mut [u8]) -> PngResult<()> {
  if ihdr.width == 0 || ihdr.height == 0 {
    return Err(Violation::ZeroDimension.into());
  }
  let expected = ihdr.scratch_len()?;
  if scratch.len() != expected {
    return Err(Violation::ShortImageData { expected, actual: scratch.len() }.into());
  }
  let needed = ihdr.rgba_len()?;
  if dst.len() < needed {
    return Err(Violation::BufferTooSmall { needed, actual: dst.len() }.into());
  }
  let bpp = ihdr.bytes_per_pixel();
  let bytes_per_scanline = ihdr.bytes_per_scanline()?;
  let out_row_len = ihdr.width as usize * 4;

  let mut previous_line: &[u8] = &[];
  let lines = scratch.chunks_exact_mut(bytes_per_scanline);
  for (scanline, out_row) in lines.zip(dst[..needed].chunks_exact_mut(out_row_len)) {
    let (filter_byte, line) = match scanline.split_first_mut() {
      Some(split) => split,
      None => return Err(Violation::ShortImageData { expected, actual: 0 }.into()),
    };
    unfilter_line(*filter_byte, line, previous_line, bpp)?;
    expand_line(line, out_row, bpp);
    previous_line = line;
  }
  Ok(())
}

/// Reconstructs one line in place.
///
/// `previous` is the reconstructed line above, or empty for the first line.
pub fn unfilter_line(filter: u8, line: &mut [u8], previous: &[u8], bpp: usize) -> PngResult<()> {
  debug_assert!(previous.is_empty() || previous.len() == line.len());
  let above = |i: usize| previous.get(i).copied().unwrap_or(0);
  match filter {
    0 => (),
    1 => {
      // the first pixel has nothing to the left, which is the same as 0
      for i in bpp..line.len() {
        line[i] = reconstruct_sub(line[i], line[i - bpp]);
      }
    }
    2 => {
      for (x, b) in line.iter_mut().zip(previous.iter()) {
        *x = reconstruct_up(*x, *b);
      }
    }
    3 => {
      for i in 0..line.len() {
        let a = if i >= bpp { line[i - bpp] } else { 0 };
        line[i] = reconstruct_average(line[i], a, above(i));
      }
    }
    4 => {
      for i in 0..line.len() {
        let (a, c) = if i >= bpp { (line[i - bpp], above(i - bpp)) } else { (0, 0) };
        line[i] = reconstruct_paeth(line[i], a, above(i), c);
      }
    }
    other => return Err(Violation::IllegalFilterType(other).into()),
  }
  Ok(())
}

/// Copies a reconstructed line out as RGBA8, alpha is `0xFF` for RGB data.
fn expand_line(line: &[u8], out_row: &mut [u8], bpp: usize) {
  if bpp == 4 {
    out_row.copy_from_slice(line);
  } else {
    for (src, dst) in line.chunks_exact(bpp).zip(out_row.chunks_exact_mut(4)) {
      dst[..3].copy_from_slice(src);
      dst[3] = 0xFF;
    }
  }
}

/// Reconstruct Filter Type 1
///
/// * `fx` filtered X
/// * `ra` reconstructed `a`: the corresponding byte from the pixel to the left
///   of this pixel (0 for the leftmost pixel)
const fn reconstruct_sub(fx: u8, ra: u8) -> u8 {
  fx.wrapping_add(ra)
}

/// Reconstruct Filter Type 2
///
/// * `fx` filtered X
/// * `rb` reconstructed `b`: The byte corresponding to this byte within the
///   previous scanline.
const fn reconstruct_up(fx: u8, rb: u8) -> u8 {
  fx.wrapping_add(rb)
}

/// Reconstruct Filter Type 3
///
/// The sum of `a` and `b` can go past 255, so the average is taken in `u16`.
const fn reconstruct_average(fx: u8, ra: u8, rb: u8) -> u8 {
  fx.wrapping_add(((ra as u16 + rb as u16) / 2) as u8)
}

/// Reconstruct Filter Type 4
///
/// * `rc` reconstructed `c`: the byte above and to the left.
const fn reconstruct_paeth(fx: u8, ra: u8, rb: u8, rc: u8) -> u8 {
  fx.wrapping_add(paeth_predictor(ra, rb, rc))
}

/// The Paeth filter function computes a simple linear function of the three
/// neighboring pixels (left `a`, above `b`, upper left `c`).
///
/// The output is the "predictor" of the neighboring pixel closest to the
/// computed value. Missing neighbors at the top or left edge are 0.
pub const fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
  // i32 is wide enough that none of this can overflow
  let a_ = a as i32;
  let b_ = b as i32;
  let c_ = c as i32;
  let p = a_ + b_ - c_;
  let pa = (p - a_).abs();
  let pb = (p - b_).abs();
  let pc = (p - c_).abs();
  // ties are broken in this exact order
  if pa <= pb && pa <= pc {
    a
  } else if pb <= pc {
    b
  } else {
    c
  }
}

#[test]
fn test_sub_first_pixel_uses_zero_left() {
  let mut line = [10, 20, 30, 1, 2, 3];
  unfilter_line(1, &mut line, &[], 3).unwrap();
  assert_eq!(line, [10, 20, 30, 11, 22, 33]);
  // same as running it with an explicit zero pixel out in front
  let mut padded = [0, 0, 0, 10, 20, 30, 1, 2, 3];
  unfilter_line(1, &mut padded, &[], 3).unwrap();
  assert_eq!(&padded[3..], &line);
}

#[test]
fn test_up_first_row_uses_zero_above() {
  let mut line = [5, 6, 7, 8];
  unfilter_line(2, &mut line, &[], 4).unwrap();
  assert_eq!(line, [5, 6, 7, 8]);
  let mut line = [5, 6, 7, 255];
  unfilter_line(2, &mut line, &[1, 1, 1, 2], 4).unwrap();
  assert_eq!(line, [6, 7, 8, 1]);
}

#[test]
fn test_average_does_not_overflow() {
  let mut line = [0, 0, 0, 0];
  unfilter_line(3, &mut line, &[200, 200, 200, 200], 2).unwrap();
  // first pixel: (0 + 200) / 2; second pixel: (100 + 200) / 2
  assert_eq!(line, [100, 100, 150, 150]);
}

#[test]
fn test_paeth_predictor() {
  assert_eq!(paeth_predictor(0, 0, 0), 0);
  // p = a + b - c, nearest wins, a before b before c on ties
  assert_eq!(paeth_predictor(10, 20, 10), 20);
  assert_eq!(paeth_predictor(20, 10, 10), 20);
  assert_eq!(paeth_predictor(10, 10, 10), 10);
  assert_eq!(paeth_predictor(50, 60, 100), 50);
  assert_eq!(paeth_predictor(255, 255, 0), 255);
  // with nothing above, paeth is the same as sub
  let mut paeth = [1, 2, 3, 4, 5, 6];
  let mut sub = paeth;
  unfilter_line(4, &mut paeth, &[], 2).unwrap();
  unfilter_line(1, &mut sub, &[], 2).unwrap();
  assert_eq!(paeth, sub);
}

#[test]
fn test_illegal_filter_type() {
  let mut line = [0; 3];
  assert!(matches!(
    unfilter_line(5, &mut line, &[], 3),
    Err(crate::PngError::FormatViolation(Violation::IllegalFilterType(5)))
  ));
}

#[test]
fn test_unfilter_to_rgba() {
  use crate::ihdr::PngColorType;
  let ihdr = Ihdr {
    width: 2,
    height: 2,
    bit_depth: 8,
    color_type: PngColorType::RGB,
    compression_method: 0,
    filter_method: 0,
    interlace_method: 0,
  };
  #[rustfmt::skip]
  let mut scratch = [
    1, 10, 20, 30, 1, 1, 1,
    2, 1, 1, 1, 0, 0, 0,
  ];
  let mut dst = [0_u8; 17];
  unfilter_to_rgba(&ihdr, &mut scratch, &mut dst).unwrap();
  #[rustfmt::skip]
  assert_eq!(&dst[..16], &[
    10, 20, 30, 255, 11, 21, 31, 255,
    11, 21, 31, 255, 11, 21, 31, 255,
  ]);
  // past the image is left alone
  assert_eq!(dst[16], 0);

  let mut small = [0_u8; 15];
  let mut scratch = [0_u8; 14];
  assert!(matches!(
    unfilter_to_rgba(&ihdr, &mut scratch, &mut small),
    Err(crate::PngError::FormatViolation(Violation::BufferTooSmall { needed: 16, actual: 15 }))
  ));
}
