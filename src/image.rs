//! The decoded image type, and the top level decoding functions.

use std::{
  fs::File,
  io::{BufReader, Read},
  path::Path,
};

use log::debug;
use pixel_formats::r8g8b8a8_Srgb;

use crate::{
  bit_source::BitSource,
  chunks::{read_header, read_png_stream, PngStream},
  error::{PngResult, Violation},
  inflate::zlib_decompress,
  options::DecodeOptions,
  unfilter::unfilter_to_rgba,
};

/// A decoded image: RGBA8, row-major, top row first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Image {
  pub width: u32,
  pub height: u32,
  /// `width * height * 4` bytes.
  pub pixels: Vec<u8>,
}
impl Image {
  /// Output is always 4 bytes per pixel, whatever the source format was.
  pub const BYTES_PER_PIXEL: usize = 4;

  /// The pixel data as one `[r, g, b, a]` array per pixel.
  ///
  /// Any trailing partial pixel (if `pixels` was edited to a bad length) is
  /// left off.
  #[inline]
  #[must_use]
  pub fn rgba_pixels(&self) -> &[[u8; 4]] {
    let whole = self.pixels.len() / Self::BYTES_PER_PIXEL * Self::BYTES_PER_PIXEL;
    bytemuck::cast_slice(&self.pixels[..whole])
  }

  /// Mutable version of [`rgba_pixels`](Self::rgba_pixels).
  #[inline]
  #[must_use]
  pub fn rgba_pixels_mut(&mut self) -> &mut [[u8; 4]] {
    let whole = self.pixels.len() / Self::BYTES_PER_PIXEL * Self::BYTES_PER_PIXEL;
    bytemuck::cast_slice_mut(&mut self.pixels[..whole])
  }

  /// Gets the pixel at the position, or `None` if the position is out of
  /// bounds.
  #[must_use]
  pub fn pixel(&self, x: u32, y: u32) -> Option<r8g8b8a8_Srgb> {
    if x < self.width && y < self.height {
      let i = y as usize * self.width as usize + x as usize;
      self.rgba_pixels().get(i).map(|&[r, g, b, a]| r8g8b8a8_Srgb { r, g, b, a })
    } else {
      None
    }
  }

  /// Flips the image top to bottom, for APIs that want the bottom row first.
  pub fn vertical_flip(&mut self) {
    let row_len = self.width as usize * Self::BYTES_PER_PIXEL;
    if row_len == 0 {
      return;
    }
    let mut data: &mut [u8] = self.pixels.as_mut_slice();
    while data.len() >= 2 * row_len {
      let (low, mid) = data.split_at_mut(row_len);
      let (mid, high) = mid.split_at_mut(mid.len() - row_len);
      low.swap_with_slice(high);
      data = mid;
    }
  }

  /// Unwraps the pixel buffer.
  #[inline]
  #[must_use]
  pub fn into_pixels(self) -> Vec<u8> {
    self.pixels
  }
}

/// Releases an image's pixel memory.
///
/// Dropping the [`Image`] does the same thing, this is just the explicit
/// spelling of it.
#[inline]
pub fn destroy_image(image: Image) {
  drop(image)
}

/// The most output one byte of DEFLATE data can produce: a length 258 copy
/// every 2 bits.
const MAX_INFLATE_RATIO: usize = 1032;

/// Gets the scratch size, if the `IDAT` data could possibly fill it.
///
/// This runs before any image sized allocation, so a tiny file can't ask
/// for a huge buffer.
fn checked_scratch_len(stream: &PngStream) -> PngResult<usize> {
  let expected = stream.ihdr.scratch_len()?;
  let compressed = stream.idat_len();
  if expected / MAX_INFLATE_RATIO > compressed {
    return Err(Violation::NotEnoughImageData { compressed, expected }.into());
  }
  Ok(expected)
}

/// A zeroed buffer, with allocation failure as an error instead of an abort.
fn zeroed_buffer(len: usize) -> PngResult<Vec<u8>> {
  let mut v = Vec::new();
  v.try_reserve_exact(len).map_err(|_| Violation::DimensionsOverflow)?;
  v.resize(len, 0);
  Ok(v)
}

/// Inflates and unfilters an already parsed stream into `dst`.
fn decode_stream_into(stream: PngStream, dst: &mut [u8]) -> PngResult<(u32, u32)> {
  let scratch_len = checked_scratch_len(&stream)?;
  let PngStream { ihdr, idat } = stream;
  let needed = ihdr.rgba_len()?;
  if dst.len() < needed {
    return Err(Violation::BufferTooSmall { needed, actual: dst.len() }.into());
  }

  let mut scratch = zeroed_buffer(scratch_len)?;
  // each IDAT buffer is freed once the inflater is done with it
  let mut bits = BitSource::new(idat);
  let written = zlib_decompress(&mut bits, &mut scratch)?;
  if written != scratch.len() {
    return Err(Violation::ShortImageData { expected: scratch.len(), actual: written }.into());
  }
  unfilter_to_rgba(&ihdr, &mut scratch, dst)?;

  debug!("decoded {}x{} {:?} png", ihdr.width, ihdr.height, ihdr.color_type);
  Ok((ihdr.width, ihdr.height))
}

/// Decodes a PNG from any byte source.
pub fn decode_reader_with<R: Read>(source: R, options: &DecodeOptions) -> PngResult<Image> {
  let stream = read_png_stream(source, options)?;
  let (width, height) = (stream.ihdr.width, stream.ihdr.height);
  checked_scratch_len(&stream)?;
  let mut pixels = zeroed_buffer(stream.ihdr.rgba_len()?)?;
  decode_stream_into(stream, &mut pixels)?;
  Ok(Image { width, height, pixels })
}

/// Decodes a PNG from any byte source into a buffer you provide.
///
/// Returns the image's `(width, height)`; the pixels are in the first
/// `width * height * 4` bytes of `dst`.
pub fn decode_reader_into_with<R: Read>(
  source: R, dst: &mut [u8], options: &DecodeOptions,
) -> PngResult<(u32, u32)> {
  decode_stream_into(read_png_stream(source, options)?, dst)
}

fn open(path: &Path) -> PngResult<BufReader<File>> {
  Ok(BufReader::new(File::open(path)?))
}

/// Loads a PNG file.
///
/// ## Failure
/// * The file can't be read (`Io`).
/// * Anything that [`decode_png`] would fail on.
#[inline]
pub fn load_image<P: AsRef<Path>>(path: P) -> PngResult<Image> {
  load_image_with(path, &DecodeOptions::default())
}

pub fn load_image_with<P: AsRef<Path>>(path: P, options: &DecodeOptions) -> PngResult<Image> {
  decode_reader_with(open(path.as_ref())?, options)
}

/// Gets a PNG file's `(width, height)` without decoding the image data.
pub fn query_image_size<P: AsRef<Path>>(path: P) -> PngResult<(u32, u32)> {
  let ihdr = read_header(open(path.as_ref())?, &DecodeOptions::default())?;
  Ok((ihdr.width, ihdr.height))
}

/// Loads a PNG file into a buffer you provide.
///
/// `dst` must be at least `width * height * 4` bytes (see
/// [`query_image_size`]) or you get a `BufferTooSmall` error.
#[inline]
pub fn load_image_into<P: AsRef<Path>>(path: P, dst: &mut [u8]) -> PngResult<(u32, u32)> {
  load_image_into_with(path, dst, &DecodeOptions::default())
}

pub fn load_image_into_with<P: AsRef<Path>>(
  path: P, dst: &mut [u8], options: &DecodeOptions,
) -> PngResult<(u32, u32)> {
  decode_reader_into_with(open(path.as_ref())?, dst, options)
}

/// Decodes PNG bytes that are already in memory.
///
/// ## Failure
/// * A bad signature, chunk layout, or CRC.
/// * Interlacing, or a format other than 8-bit RGB/RGBA.
/// * Corrupt compressed data, or an illegal filter type.
#[inline]
pub fn decode_png(bytes: &[u8]) -> PngResult<Image> {
  decode_png_with(bytes, &DecodeOptions::default())
}

#[inline]
pub fn decode_png_with(bytes: &[u8], options: &DecodeOptions) -> PngResult<Image> {
  decode_reader_with(bytes, options)
}

/// Gets the `(width, height)` of PNG bytes without decoding the image data.
pub fn png_image_size(bytes: &[u8]) -> PngResult<(u32, u32)> {
  let ihdr = read_header(bytes, &DecodeOptions::default())?;
  Ok((ihdr.width, ihdr.height))
}

/// Decodes PNG bytes into a buffer you provide, returning `(width, height)`.
#[inline]
pub fn decode_png_into(bytes: &[u8], dst: &mut [u8]) -> PngResult<(u32, u32)> {
  decode_png_into_with(bytes, dst, &DecodeOptions::default())
}

#[inline]
pub fn decode_png_into_with(
  bytes: &[u8], dst: &mut [u8], options: &DecodeOptions,
) -> PngResult<(u32, u32)> {
  decode_reader_into_with(bytes, dst, options)
}

#[test]
fn test_image_pixel_access() {
  let image = Image { width: 2, height: 1, pixels: vec![1, 2, 3, 4, 5, 6, 7, 8] };
  assert_eq!(image.rgba_pixels(), &[[1, 2, 3, 4], [5, 6, 7, 8]]);
  let p = image.pixel(1, 0).unwrap();
  assert_eq!((p.r, p.g, p.b, p.a), (5, 6, 7, 8));
  assert!(image.pixel(2, 0).is_none());
  assert!(image.pixel(0, 1).is_none());
  assert_eq!(image.into_pixels().len(), 8);
}

#[test]
fn test_edit_pixels_in_place() {
  // a stray trailing byte isn't part of any pixel
  let mut image = Image { width: 2, height: 1, pixels: vec![0; 9] };
  assert_eq!(image.rgba_pixels_mut().len(), 2);
  for px in image.rgba_pixels_mut() {
    px[3] = 0xFF;
  }
  image.rgba_pixels_mut()[1][0] = 7;
  assert_eq!(image.pixels, [0, 0, 0, 255, 7, 0, 0, 255, 0]);
}

#[test]
fn test_impossible_allocation_is_an_error() {
  assert!(matches!(
    zeroed_buffer(usize::MAX),
    Err(crate::PngError::FormatViolation(Violation::DimensionsOverflow))
  ));
  assert_eq!(zeroed_buffer(3).unwrap(), [0, 0, 0]);
}

#[test]
fn test_vertical_flip() {
  let rows = |v: &[u8]| -> Vec<u8> { v.iter().flat_map(|&b| [b; 4]).collect() };
  let mut odd = Image { width: 1, height: 3, pixels: rows(&[1, 2, 3]) };
  odd.vertical_flip();
  assert_eq!(odd.pixels, rows(&[3, 2, 1]));
  let mut even = Image { width: 1, height: 4, pixels: rows(&[1, 2, 3, 4]) };
  even.vertical_flip();
  assert_eq!(even.pixels, rows(&[4, 3, 2, 1]));
  let mut one = Image { width: 1, height: 1, pixels: rows(&[9]) };
  one.vertical_flip();
  assert_eq!(one.pixels, rows(&[9]));
  destroy_image(one);
}
