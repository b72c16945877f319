#![forbid(unsafe_code)]
#![cfg_attr(docs_rs, feature(doc_cfg))]

//! A PNG decoder for loading textures, with its own DEFLATE implementation.
//!
//! Decodes non-interlaced 8-bit truecolor PNGs (RGB or RGBA) to RGBA8 pixels.
//!
//! ```no_run
//! let image = texpng::load_image("textures/brick.png")?;
//! assert_eq!(image.pixels.len(), image.width as usize * image.height as usize * 4);
//! # Ok::<(), texpng::PngError>(())
//! ```
//!
//! ## Decoding Stages
//!
//! If you want to run the stages yourself:
//!
//! 1) [`read_png_stream`] parses the container into an [`Ihdr`] and the list
//!    of `IDAT` chunk buffers.
//! 2) Allocate [`Ihdr::scratch_len`] bytes and call [`zlib_decompress`] with a
//!    [`BitSource`] over the `IDAT` buffers. This gives you *filtered* data.
//! 3) Call [`unfilter_to_rgba`] to get the final pixels.
//!
//! ## Logging
//!
//! The crate emits records through the [`log`] facade (chunk and block
//! details at `trace`, per-image summaries at `debug`). It never installs a
//! logger itself; the `png_info` demo uses `env_logger`.

pub mod bit_source;
pub use bit_source::*;

pub mod chunks;
pub use chunks::*;

pub mod crc32;

pub mod error;
pub use error::*;

pub mod huffman;
pub use huffman::*;

pub mod ihdr;
pub use ihdr::*;

pub mod image;
pub use image::*;

pub mod inflate;
pub use inflate::{inflate, zlib_decompress};

pub mod options;
pub use options::*;

pub mod unfilter;
pub use unfilter::*;
