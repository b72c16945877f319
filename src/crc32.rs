//! The CRC-32 that PNG chunks are checked with (ISO 3309, same as zlib's).

const CRC_TABLE: [u32; 256] = make_crc_table();

const fn make_crc_table() -> [u32; 256] {
  let mut out = [0; 256];
  let mut n = 0;
  while n < 256 {
    let mut c = n as u32;
    let mut k = 0;
    while k < 8 {
      c = if (c & 1) != 0 { 0xEDB8_8320_u32 ^ (c >> 1) } else { c >> 1 };
      k += 1;
    }
    out[n] = c;
    n += 1;
  }
  out
}

/// A running CRC, for when the bytes arrive in pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc32(u32);
impl Default for Crc32 {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}
impl Crc32 {
  #[inline]
  #[must_use]
  pub const fn new() -> Self {
    Self(u32::MAX)
  }

  pub fn update(&mut self, bytes: &[u8]) {
    let mut crc = self.0;
    for &byte in bytes {
      let i = (crc ^ u32::from(byte)) as u8 as usize;
      crc = CRC_TABLE[i] ^ (crc >> 8);
    }
    self.0 = crc;
  }

  #[inline]
  #[must_use]
  pub const fn finish(self) -> u32 {
    self.0 ^ u32::MAX
  }
}

/// The CRC of a chunk: it covers the type bytes and the data, not the length.
#[must_use]
pub fn png_crc(chunk_type: [u8; 4], data: &[u8]) -> u32 {
  let mut crc = Crc32::new();
  crc.update(&chunk_type);
  crc.update(data);
  crc.finish()
}

#[test]
fn test_crc_check_values() {
  let mut crc = Crc32::new();
  crc.update(b"123456789");
  assert_eq!(crc.finish(), 0xCBF4_3926);
  // every png ends with these 4 bytes
  assert_eq!(png_crc(*b"IEND", &[]), 0xAE42_6082);
  // split updates are the same as one big update
  let mut split = Crc32::default();
  split.update(b"1234");
  split.update(b"");
  split.update(b"56789");
  assert_eq!(split.finish(), 0xCBF4_3926);
}
