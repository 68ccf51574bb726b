//! Chunked streaming compression.
//!
//! Compressed payloads are zstd frames. Nothing here reads or writes
//! deflate or zlib streams.
//!
//! Input is fed to Zstd in fixed-size chunks and every produced chunk is
//! drained straight into the caller's buffer, so working memory is two
//! staging buffers plus the codec state no matter how large the data is.
//! Codec state lives for one call and is dropped before returning.

use crate::config::CodecConfig;
use crate::error::CodecError;
use tracing::warn;
use zstd::stream::raw::{Decoder, Encoder, InBuffer, Operation, OutBuffer};

/// Worst-case compressed size for `len` input bytes.
pub fn compress_bound(len: usize) -> usize {
    zstd::zstd_safe::compress_bound(len)
}

/// Compress `src` into `dest` with the default codec settings.
pub fn compress(dest: &mut [u8], src: &[u8]) -> Result<usize, CodecError> {
    StreamCodec::default().compress(dest, src)
}

/// Decompress `src` into `dest` with the default codec settings.
pub fn decompress(dest: &mut [u8], src: &[u8]) -> Result<usize, CodecError> {
    StreamCodec::default().decompress(dest, src)
}

struct Sink<'a> {
    dest: &'a mut [u8],
    written: usize,
}

impl<'a> Sink<'a> {
    fn new(dest: &'a mut [u8]) -> Self {
        Self { dest, written: 0 }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let end = self.written + bytes.len();
        if end > self.dest.len() {
            return Err(CodecError::OutputTooSmall {
                needed_at_least: end,
            });
        }
        self.dest[self.written..end].copy_from_slice(bytes);
        self.written = end;
        Ok(())
    }
}

/// Compressor/decompressor with a fixed staging chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCodec {
    chunk_size: usize,
    level: i32,
}

impl Default for StreamCodec {
    fn default() -> Self {
        Self::new(&CodecConfig::default())
    }
}

impl StreamCodec {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            level: config.level,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Compress `src` into `dest`, returning the compressed length.
    ///
    /// `dest` must hold the worst case (see [`compress_bound`]); compression
    /// is not guaranteed to shrink the input. Empty input still produces a
    /// complete frame.
    pub fn compress(&self, dest: &mut [u8], src: &[u8]) -> Result<usize, CodecError> {
        let mut encoder = Encoder::new(self.level).map_err(|e| {
            warn!(stage = "init", error = %e, "Compression failed");
            CodecError::Init(e)
        })?;

        let mut out = vec![0u8; self.chunk_size];
        let mut sink = Sink::new(dest);

        for chunk in src.chunks(self.chunk_size) {
            let mut input = InBuffer::around(chunk);
            while input.pos() < chunk.len() {
                let produced = {
                    let mut output = OutBuffer::around(&mut out[..]);
                    encoder
                        .run(&mut input, &mut output)
                        .map_err(CodecError::Stream)?;
                    output.pos()
                };
                sink.put(&out[..produced])?;
            }
        }

        loop {
            let (remaining, produced) = {
                let mut output = OutBuffer::around(&mut out[..]);
                let remaining = encoder
                    .finish(&mut output, true)
                    .map_err(CodecError::Stream)?;
                (remaining, output.pos())
            };
            sink.put(&out[..produced])?;
            if remaining == 0 {
                break;
            }
        }

        Ok(sink.written)
    }

    /// Decompress one frame from `src` into `dest`, returning its length.
    ///
    /// Empty input decodes to nothing. Any error means `dest` holds garbage.
    pub fn decompress(&self, dest: &mut [u8], src: &[u8]) -> Result<usize, CodecError> {
        if src.is_empty() {
            return Ok(0);
        }

        let mut decoder = Decoder::new().map_err(|e| {
            warn!(stage = "init", error = %e, "Decompression failed");
            CodecError::Init(e)
        })?;

        let mut out = vec![0u8; self.chunk_size];
        let mut sink = Sink::new(dest);
        let mut complete = false;

        'feed: for chunk in src.chunks(self.chunk_size) {
            let mut input = InBuffer::around(chunk);
            loop {
                let (hint, produced) = {
                    let mut output = OutBuffer::around(&mut out[..]);
                    let hint = decoder.run(&mut input, &mut output).map_err(|e| {
                        warn!(stage = "stream", error = %e, "Decompression failed");
                        CodecError::Stream(e)
                    })?;
                    (hint, output.pos())
                };
                sink.put(&out[..produced])?;

                if hint == 0 {
                    complete = true;
                    break 'feed;
                }
                // Input used up and nothing left buffered in the codec.
                if input.pos() == chunk.len() && produced < out.len() {
                    break;
                }
            }
        }

        if !complete {
            warn!(stage = "truncated", consumed = src.len(), "Decompression failed");
            return Err(CodecError::Truncated);
        }
        Ok(sink.written)
    }

    /// Compress into a freshly sized buffer.
    pub fn compress_to_vec(&self, src: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut dest = vec![0u8; compress_bound(src.len())];
        let len = self.compress(&mut dest, src)?;
        dest.truncate(len);
        Ok(dest)
    }
}
