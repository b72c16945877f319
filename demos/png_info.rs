//! Prints the size of each PNG given on the command line, then decodes it.
//!
//! Directories are searched recursively. Set `RUST_LOG=trace` to also see
//! each chunk and block as it's decoded.

use std::path::{Path, PathBuf};

use texpng::{load_image, query_image_size, PngResult};

fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
  let args: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
  if args.is_empty() {
    eprintln!("usage: png_info <file or dir>...");
    return;
  }
  for arg in args {
    recursive_read_dir(&arg, |p| {
      if p.extension().map_or(true, |ext| !ext.eq_ignore_ascii_case("png")) {
        return;
      }
      match process_a_png_file(p) {
        Ok(line) => println!("{}: {line}", p.display()),
        Err(e) => println!("{}: {e}", p.display()),
      }
    });
  }
}

fn process_a_png_file(path: &Path) -> PngResult<String> {
  let (w, h) = query_image_size(path)?;
  let mut image = load_image(path)?;
  debug_assert_eq!((w, h), (image.width, image.height));
  let opaque = image.rgba_pixels().iter().all(|px| px[3] == 0xFF);
  // what a bottom-up texture upload would see first
  image.vertical_flip();
  let first = image.pixel(0, 0).map(|p| [p.r, p.g, p.b, p.a]);
  Ok(format!("{w}x{h}, opaque: {opaque}, bottom left: {first:?}"))
}

fn recursive_read_dir(path: &Path, mut op: impl FnMut(&Path)) {
  let mut stack = vec![path.to_path_buf()];
  while let Some(p) = stack.pop() {
    if p.is_dir() {
      match std::fs::read_dir(&p) {
        Ok(entries) => stack.extend(entries.filter_map(|e| e.ok()).map(|e| e.path())),
        Err(e) => eprintln!("{}: {e}", p.display()),
      }
    } else {
      op(&p);
    }
  }
}
