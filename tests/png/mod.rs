use texpng::*;
use walkdir::WalkDir;

use super::{build_png, filter_rows, png_chunk, rand_below, rand_bytes, zlib_wrap, BitWriter};

/// A 2x2 RGB image with filter type None on both lines, in one dynamic block
/// that is all literals.
fn two_by_two_dynamic_png(pixels: &[u8; 12]) -> Vec<u8> {
  let mut scanlines = vec![0];
  scanlines.extend_from_slice(&pixels[..6]);
  scanlines.push(0);
  scanlines.extend_from_slice(&pixels[6..]);

  // every symbol that shows up gets a 4 bit code, which is plenty for 14
  let mut used: Vec<usize> = scanlines.iter().map(|&b| usize::from(b)).collect();
  used.push(256);
  used.sort_unstable();
  used.dedup();
  assert!(used.len() <= 16);
  let lit_len_lengths: Vec<u32> =
    (0..257).map(|s| if used.contains(&s) { 4 } else { 0 }).collect();

  let mut w = BitWriter::default();
  w.write_bits(1, 1); // final
  w.write_bits(2, 2); // dynamic
  w.write_bits(0, 5); // HLIT = 257
  w.write_bits(0, 5); // HDIST = 1
  w.write_bits(8, 4); // HCLEN = 12, far enough to reach the length 4 slot
  // code length code: "0" and "4" get 1 bit codes, 0 and 1 respectively
  for symbol in [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4] {
    w.write_bits(if symbol == 0 || symbol == 4 { 1 } else { 0 }, 3);
  }
  for &len in lit_len_lengths.iter() {
    w.write_code(u32::from(len == 4), 1);
  }
  // the one distance code is unused
  w.write_code(0, 1);
  // equal lengths, so the codes are just the rank in symbol order
  for &b in scanlines.iter() {
    let rank = used.iter().position(|&s| s == usize::from(b)).unwrap();
    w.write_code(rank as u32, 4);
  }
  w.write_code(used.len() as u32 - 1, 4);

  let zlib = zlib_wrap(&w.finish(), &scanlines);
  build_png(2, 2, 2, &[&zlib])
}

#[test]
fn test_two_by_two_dynamic_block() {
  let pixels = [10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 110, 120];
  let png = two_by_two_dynamic_png(&pixels);
  let image = decode_png(&png).unwrap();
  assert_eq!((image.width, image.height), (2, 2));
  assert_eq!(image.pixels.len(), 16);
  for (px, rgb) in image.rgba_pixels().iter().zip(pixels.chunks_exact(3)) {
    assert_eq!(&px[..3], rgb);
    assert_eq!(px[3], 0xFF);
  }
}

#[test]
fn test_all_filters_through_reference_compressor() {
  for (color_type, bpp) in [(2_u8, 3_usize), (6, 4)] {
    for level in [0, 1, 6, 9] {
      let width = 1 + rand_below(40) as usize;
      let height = 5 + rand_below(20) as usize;
      // smooth-ish data so that the predictors have something to do
      let noise = rand_bytes(width * height * bpp);
      let pixels: Vec<u8> =
        noise.iter().enumerate().map(|(i, n)| (i / bpp) as u8 ^ (n & 0b11)).collect();
      let filtered = filter_rows(&pixels, width, bpp, |y| (y % 5) as u8);
      let zlib = miniz_oxide::deflate::compress_to_vec_zlib(&filtered, level);
      // more than one IDAT
      let (a, b) = zlib.split_at(zlib.len() / 3);
      let png = build_png(width as u32, height as u32, color_type, &[a, b]);

      let image = decode_png(&png).unwrap();
      assert_eq!((image.width, image.height), (width as u32, height as u32));
      for (i, px) in image.rgba_pixels().iter().enumerate() {
        let src = &pixels[i * bpp..i * bpp + bpp];
        assert_eq!(&px[..bpp], src, "ct {color_type}, level {level}, pixel {i}");
        if bpp == 3 {
          assert_eq!(px[3], 0xFF);
        }
      }
    }
  }
}

#[test]
fn test_query_and_decode_agree_on_files() {
  let pixels = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
  let dir = std::env::temp_dir().join(format!("texpng_test_{}", std::process::id()));
  std::fs::create_dir_all(&dir).unwrap();
  let path = dir.join("two_by_two.png");
  std::fs::write(&path, two_by_two_dynamic_png(&pixels)).unwrap();

  let size = query_image_size(&path).unwrap();
  let image = load_image(&path).unwrap();
  assert_eq!(size, (image.width, image.height));

  let mut dst = vec![0xAB_u8; 20];
  assert_eq!(load_image_into(&path, &mut dst).unwrap(), size);
  assert_eq!(&dst[..16], image.pixels.as_slice());
  assert_eq!(&dst[16..], &[0xAB; 4]);

  let mut small = vec![0_u8; 15];
  assert!(matches!(
    load_image_into(&path, &mut small),
    Err(PngError::FormatViolation(Violation::BufferTooSmall { needed: 16, actual: 15 }))
  ));
  destroy_image(image);

  assert!(matches!(load_image(dir.join("not_there.png")), Err(PngError::Io(_))));
  std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_in_memory_size_matches_decode() {
  let png = two_by_two_dynamic_png(&[0; 12]);
  assert_eq!(png_image_size(&png).unwrap(), (2, 2));
  let mut dst = [0_u8; 16];
  assert_eq!(decode_png_into(&png, &mut dst).unwrap(), (2, 2));
  assert_eq!(dst, [0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255]);
}

#[test]
fn test_image_data_length_must_match() {
  // one byte short of 3x3 RGB
  let short = vec![0_u8; 3 * 3 * 3 + 3 - 1];
  let zlib = miniz_oxide::deflate::compress_to_vec_zlib(&short, 6);
  let png = build_png(3, 3, 2, &[&zlib]);
  assert!(matches!(
    decode_png(&png),
    Err(PngError::FormatViolation(Violation::ShortImageData { expected: 30, actual: 29 }))
  ));

  // one byte too many never gets written
  let long = vec![0_u8; 3 * 3 * 3 + 3 + 1];
  let zlib = miniz_oxide::deflate::compress_to_vec_zlib(&long, 6);
  let png = build_png(3, 3, 2, &[&zlib]);
  assert!(matches!(
    decode_png(&png),
    Err(PngError::CorruptStream(Corruption::OutputOverflow { capacity: 30 }))
  ));
}

#[test]
fn test_bad_filter_type_byte() {
  let mut scanlines = vec![0_u8; 2 * (1 + 4)];
  scanlines[5] = 9;
  let zlib = miniz_oxide::deflate::compress_to_vec_zlib(&scanlines, 6);
  let png = build_png(1, 2, 6, &[&zlib]);
  assert!(matches!(
    decode_png(&png),
    Err(PngError::FormatViolation(Violation::IllegalFilterType(9)))
  ));
}

#[test]
fn test_unsupported_images_are_rejected() {
  let zlib = miniz_oxide::deflate::compress_to_vec_zlib(&[0; 2], 6);
  // grayscale
  let png = build_png(1, 1, 0, &[&zlib]);
  assert!(matches!(
    decode_png(&png),
    Err(PngError::UnsupportedFeature(Unsupported::ColorType(0)))
  ));
  // interlaced RGB
  let mut ihdr = super::ihdr_data(1, 1, 2);
  ihdr[12] = 1;
  let mut png = PNG_SIGNATURE.to_vec();
  png.extend(png_chunk(b"IHDR", &ihdr));
  png.extend(png_chunk(b"IEND", &[]));
  assert!(matches!(
    decode_png(&png),
    Err(PngError::UnsupportedFeature(Unsupported::Interlaced(1)))
  ));
  // the size query is still a header check
  assert!(png_image_size(&png).is_err());
}

#[test]
fn test_crc_mismatch_and_relaxed_options() {
  let png = two_by_two_dynamic_png(&[7; 12]);
  let mut bad = png.clone();
  // flip a bit in the IEND CRC
  let last = bad.len() - 1;
  bad[last] ^= 1;
  assert!(matches!(
    decode_png(&bad),
    Err(PngError::FormatViolation(Violation::CrcMismatch { .. }))
  ));
  let relaxed = DecodeOptions::default().with_verify_crc(false);
  let image = decode_png_with(&bad, &relaxed).unwrap();
  assert_eq!(image.pixels, decode_png(&png).unwrap().pixels);
}

#[test]
fn test_limits_stop_big_images() {
  let png = two_by_two_dynamic_png(&[1; 12]);
  let tight =
    DecodeOptions::default().with_limits(Limits { max_pixels: Some(3), ..Limits::default() });
  assert!(matches!(
    decode_png_with(&png, &tight),
    Err(PngError::FormatViolation(Violation::LimitExceeded { width: 2, height: 2 }))
  ));
  let exact = DecodeOptions::default().with_limits(Limits {
    max_width: Some(2),
    max_height: Some(2),
    max_pixels: Some(4),
  });
  assert!(decode_png_with(&png, &exact).is_ok());
}

#[test]
fn test_huge_header_with_tiny_data() {
  let zlib = miniz_oxide::deflate::compress_to_vec_zlib(&[0; 8], 6);
  // more than a Vec can ever hold
  let png = build_png(0x7FFF_FFFF, 0x4000_0001, 6, &[&zlib]);
  assert!(matches!(
    decode_png(&png),
    Err(PngError::FormatViolation(Violation::DimensionsOverflow))
  ));
  let mut dst = [0_u8; 16];
  assert!(decode_png_into(&png, &mut dst).is_err());
  assert_eq!(png_image_size(&png).unwrap(), (0x7FFF_FFFF, 0x4000_0001));

  // fits in memory, but the data could never inflate that far
  let png = build_png(20_000, 20_000, 6, &[&zlib]);
  assert!(matches!(
    decode_png(&png),
    Err(PngError::FormatViolation(Violation::NotEnoughImageData { .. }))
  ));

  // past what png allows at all
  let png = build_png(0x8000_0000, 1, 2, &[&zlib]);
  assert!(matches!(
    decode_png(&png),
    Err(PngError::FormatViolation(Violation::DimensionTooLarge { .. }))
  ));
}

#[test]
fn test_decoder_no_panics() {
  // iter ALL files in the test folder, even non-png files shouldn't panic it.
  for entry in WalkDir::new("tests/").into_iter().filter_map(|e| e.ok()) {
    let v = match std::fs::read(entry.path()) {
      Ok(v) => v,
      Err(_) => continue,
    };
    let _ = decode_png(&v);
    let _ = png_image_size(&v);
  }
  // even totally random data should never panic the decoder!
  for _ in 0..50 {
    let v = rand_bytes(1024);
    let _ = decode_png(&v);
  }
  // and neither should damage to an otherwise good image
  let good = two_by_two_dynamic_png(&[200; 12]);
  let relaxed = DecodeOptions::default().with_verify_crc(false);
  for _ in 0..500 {
    let mut v = good.clone();
    let i = rand_below(v.len() as u32) as usize;
    v[i] = rand_bytes(1)[0];
    let cut = v.len() - rand_below(8) as usize;
    let _ = decode_png_with(&v[..cut], &relaxed);
  }
}
