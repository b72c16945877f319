#![allow(bad_style)]

mod inflate;
mod png;

fn rand_bytes(count: usize) -> Vec<u8> {
  let mut buffer = vec![0; count];
  getrandom::getrandom(&mut buffer).unwrap();
  buffer
}

fn rand_below(n: u32) -> u32 {
  let mut b = [0_u8; 4];
  getrandom::getrandom(&mut b).unwrap();
  u32::from_le_bytes(b) % n
}

/// Packs bits LSB-first, the way a DEFLATE stream is laid out.
#[derive(Debug, Default)]
struct BitWriter {
  bytes: Vec<u8>,
  spare: u32,
  spare_count: u32,
}
impl BitWriter {
  fn write_bits(&mut self, value: u32, count: u32) {
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
  fn write_code(&mut self, code: u32, len: u32) {
    for i in (0..len).rev() {
      self.write_bits((code >> i) & 1, 1);
    }
  }

  fn finish(mut self) -> Vec<u8> {
    if self.spare_count > 0 {
      self.bytes.push(self.spare as u8);
    }
    self.bytes
  }
}

/// Puts a zlib header and trailer around raw DEFLATE data.
fn zlib_wrap(deflated: &[u8], original: &[u8]) -> Vec<u8> {
  let mut v = vec![0x78, 0x01];
  v.extend_from_slice(deflated);
  let adler = miniz_oxide::mz_adler32_oxide(miniz_oxide::MZ_ADLER32_INIT, original);
  v.extend_from_slice(&adler.to_be_bytes());
  v
}

fn png_chunk(chunk_type: &[u8; 4], data: &[u8]) -> Vec<u8> {
  let mut v = Vec::new();
  v.extend_from_slice(&(data.len() as u32).to_be_bytes());
  v.extend_from_slice(chunk_type);
  v.extend_from_slice(data);
  v.extend_from_slice(&texpng::crc32::png_crc(*chunk_type, data).to_be_bytes());
  v
}

fn ihdr_data(width: u32, height: u32, color_type: u8) -> Vec<u8> {
  let mut v = Vec::new();
  v.extend_from_slice(&width.to_be_bytes());
  v.extend_from_slice(&height.to_be_bytes());
  v.extend_from_slice(&[8, color_type, 0, 0, 0]);
  v
}

/// A full PNG with the zlib stream split over one `IDAT` per entry.
fn build_png(width: u32, height: u32, color_type: u8, idat: &[&[u8]]) -> Vec<u8> {
  let mut v = texpng::PNG_SIGNATURE.to_vec();
  v.extend(png_chunk(b"IHDR", &ihdr_data(width, height, color_type)));
  for data in idat {
    v.extend(png_chunk(b"IDAT", data));
  }
  v.extend(png_chunk(b"IEND", &[]));
  v
}

/// Filters raw pixel rows the way an encoder would, with `filter_for(y)`
/// picking each row's filter type.
fn filter_rows(
  pixels: &[u8], width: usize, bpp: usize, filter_for: impl Fn(usize) -> u8,
) -> Vec<u8> {
  let stride = width * bpp;
  let mut out = Vec::new();
  let zero_row = vec![0_u8; stride];
  for (y, row) in pixels.chunks_exact(stride).enumerate() {
    let above = if y == 0 { &zero_row[..] } else { &pixels[(y - 1) * stride..y * stride] };
    let filter = filter_for(y);
    out.push(filter);
    for i in 0..stride {
      let a = if i >= bpp { row[i - bpp] } else { 0 };
      let b = above[i];
      let c = if i >= bpp { above[i - bpp] } else { 0 };
      let predicted = match filter {
        0 => 0,
        1 => a,
        2 => b,
        3 => ((u16::from(a) + u16::from(b)) / 2) as u8,
        4 => texpng::paeth_predictor(a, b, c),
        _ => unreachable!(),
      };
      out.push(row[i].wrapping_sub(predicted));
    }
  }
  out
}
