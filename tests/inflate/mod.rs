use texpng::*;

use super::{rand_below, rand_bytes, zlib_wrap, BitWriter};

/// Random image shapes, with data that's exactly the scanline buffer size.
#[test]
fn test_output_never_passes_scratch_size() {
  for _ in 0..40 {
    let width = 1 + rand_below(64);
    let height = 1 + rand_below(64);
    let bpp = if rand_below(2) == 0 { 3 } else { 4 };
    let scratch_len = (width * height * bpp + height) as usize;

    // half noise, half runs, so every block type can come up
    let mut data = rand_bytes(scratch_len);
    for b in data.iter_mut().skip(scratch_len / 2) {
      *b &= 0b1000_0001;
    }
    let level = rand_below(11) as u8;
    let zlib = miniz_oxide::deflate::compress_to_vec_zlib(&data, level);

    let mut exact = vec![0_u8; scratch_len];
    let n = zlib_decompress(&mut BitSource::new([zlib.as_slice()]), &mut exact).unwrap();
    assert_eq!(n, scratch_len);
    assert!(exact == data, "level {level}, {width}x{height}x{bpp}");

    // with one byte less room, decoding fails instead of writing past the end
    let mut short = vec![0_u8; scratch_len - 1];
    assert!(matches!(
      zlib_decompress(&mut BitSource::new([zlib.as_slice()]), &mut short),
      Err(PngError::CorruptStream(Corruption::OutputOverflow { .. }))
    ));
  }
}

#[test]
fn test_owned_chunks_stream_through() {
  let data: Vec<u8> = (0..5000_u32).map(|i| (i % 251) as u8).collect();
  let zlib = miniz_oxide::deflate::compress_to_vec_zlib(&data, 9);
  let chunks: Vec<Vec<u8>> = zlib.chunks(7).map(<[u8]>::to_vec).collect();
  let mut out = vec![0_u8; data.len()];
  let mut bits = BitSource::new(chunks);
  assert_eq!(zlib_decompress(&mut bits, &mut out).unwrap(), data.len());
  assert!(out == data);
}

#[test]
fn test_code_length_repeat_without_previous() {
  let mut w = BitWriter::default();
  w.write_bits(1, 1);
  w.write_bits(2, 2);
  w.write_bits(0, 5);
  w.write_bits(0, 5);
  w.write_bits(0, 4); // HCLEN = 4: symbols 16, 17, 18, 0
  // only symbol 16 has a code
  for len in [1, 0, 0, 0] {
    w.write_bits(len, 3);
  }
  w.write_bits(0, 1); // a 16 with nothing before it
  w.write_bits(0, 2);
  let data = w.finish();
  let mut out = [0_u8; 4];
  assert!(matches!(
    inflate(&mut BitSource::new([data.as_slice()]), &mut out),
    Err(PngError::CorruptStream(Corruption::BadCodeLengthRepeat))
  ));
}

#[test]
fn test_dynamic_block_without_end_of_block_code() {
  let mut w = BitWriter::default();
  w.write_bits(1, 1);
  w.write_bits(2, 2);
  w.write_bits(0, 5); // HLIT = 257
  w.write_bits(0, 5); // HDIST = 1
  w.write_bits(0, 4); // HCLEN = 4
  // symbols 18 and 0 get 1 bit codes: 0 is "0", 18 is "1"
  for len in [0, 0, 1, 1] {
    w.write_bits(len, 3);
  }
  // 138 zeros, 119 zeros, then one more zero for the distance
  w.write_code(1, 1);
  w.write_bits(138 - 11, 7);
  w.write_code(1, 1);
  w.write_bits(119 - 11, 7);
  w.write_code(0, 1);
  let data = w.finish();
  let mut out = [0_u8; 4];
  assert!(matches!(
    inflate(&mut BitSource::new([data.as_slice()]), &mut out),
    Err(PngError::CorruptStream(Corruption::MissingEndOfBlock))
  ));
}

#[test]
fn test_code_length_run_past_the_end() {
  let mut w = BitWriter::default();
  w.write_bits(1, 1);
  w.write_bits(2, 2);
  w.write_bits(0, 5);
  w.write_bits(0, 5);
  w.write_bits(0, 4);
  // only 18 gets a code, "0"
  for len in [0, 0, 1, 0] {
    w.write_bits(len, 3);
  }
  // 138 + 138 > 258
  w.write_code(0, 1);
  w.write_bits(127, 7);
  w.write_code(0, 1);
  w.write_bits(127, 7);
  let data = w.finish();
  let mut out = [0_u8; 4];
  assert!(matches!(
    inflate(&mut BitSource::new([data.as_slice()]), &mut out),
    Err(PngError::CorruptStream(Corruption::BadCodeLengthRepeat))
  ));
}

#[test]
fn test_hand_wrapped_stream_matches_reference_trailer() {
  let data = b"a trailer is a trailer is a trailer";
  let raw = miniz_oxide::deflate::compress_to_vec(data, 6);
  let ours = zlib_wrap(&raw, data);
  let reference = miniz_oxide::deflate::compress_to_vec_zlib(data, 6);
  assert_eq!(ours[ours.len() - 4..], reference[reference.len() - 4..]);
  let mut out = [0_u8; 35];
  assert_eq!(zlib_decompress(&mut BitSource::new([ours.as_slice()]), &mut out).unwrap(), 35);
  assert_eq!(&out, data);
}
