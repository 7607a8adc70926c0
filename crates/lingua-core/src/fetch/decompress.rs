//! Compression detection and streaming decompression of model files.
//!
//! Detection looks at the leading magic bytes first and the file suffix
//! second. Formats without a decoder in this build are rejected outright
//! so compressed bytes never reach the translation engine.

use crate::error::{LinguaError, Result};
use std::io::{Read, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Suffixes of formats that have no decoder here.
const UNSUPPORTED_SUFFIXES: &[(&str, &str)] = &[
    (".br", "brotli"),
    (".xz", "xz"),
    (".bz2", "bzip2"),
    (".lz4", "lz4"),
];

/// Compression applied to a fetched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Identity,
    Gzip,
    Zstd,
    Unsupported {
        format: &'static str,
        suffix: &'static str,
    },
}

impl Compression {
    /// Classify by file name alone.
    pub fn from_name(name: &str) -> Self {
        if name.ends_with(".gz") {
            return Compression::Gzip;
        }
        if name.ends_with(".zst") {
            return Compression::Zstd;
        }
        UNSUPPORTED_SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(*suffix))
            .map(|&(suffix, format)| Compression::Unsupported { format, suffix })
            .unwrap_or(Compression::Identity)
    }

    /// Classify by leading bytes, falling back to the file name.
    pub fn detect(name: &str, head: &[u8]) -> Self {
        if head.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else if head.starts_with(&ZSTD_MAGIC) {
            Compression::Zstd
        } else {
            Self::from_name(name)
        }
    }

    /// File suffix conventionally used for this compression.
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            Compression::Identity => None,
            Compression::Gzip => Some(".gz"),
            Compression::Zstd => Some(".zst"),
            Compression::Unsupported { suffix, .. } => Some(suffix),
        }
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, Compression::Identity)
    }
}

/// Decode `data` into `writer`, returning the number of bytes written.
///
/// Blocking; callers on the async runtime run this under `spawn_blocking`.
pub fn decompress_into<W: Write>(
    compression: Compression,
    data: &[u8],
    mut writer: W,
    file: &str,
) -> Result<u64> {
    let written = match compression {
        Compression::Identity => {
            writer.write_all(data)?;
            data.len() as u64
        }
        Compression::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            copy_decoded(&mut decoder, &mut writer, file, "gzip")?
        }
        Compression::Zstd => {
            let mut decoder = zstd::stream::read::Decoder::new(data)?;
            copy_decoded(&mut decoder, &mut writer, file, "zstd")?
        }
        Compression::Unsupported { format, .. } => {
            return Err(LinguaError::DecompressionUnsupported {
                file: file.to_string(),
                format: format.to_string(),
            });
        }
    };
    writer.flush()?;
    Ok(written)
}

fn copy_decoded<R: Read, W: Write>(
    decoder: &mut R,
    writer: &mut W,
    file: &str,
    format: &str,
) -> Result<u64> {
    std::io::copy(decoder, writer).map_err(|e| LinguaError::ModelFileFetchFailed {
        url: file.to_string(),
        message: format!("corrupt {} stream: {}", format, e),
    })
}
