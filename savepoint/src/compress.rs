//! Optional compression of backup content.
//!
//! The scheme is chosen once from configuration. Each scheme owns a file
//! extension, which is appended to the backup filename and later tells the
//! reader which decoder to use.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use crate::utils::{Result, SavepointError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Lzma,
    Xz,
    #[default]
    Zstd,
}

impl Compression {
    pub const ALL: [Compression; 6] = [
        Compression::None,
        Compression::Gzip,
        Compression::Bzip2,
        Compression::Lzma,
        Compression::Xz,
        Compression::Zstd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::Lzma => "lzma",
            Compression::Xz => "xz",
            Compression::Zstd => "zstd",
        }
    }

    /// Filename extension without the leading dot, `None` for uncompressed
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gz"),
            Compression::Bzip2 => Some("bz2"),
            Compression::Lzma => Some("lzma"),
            Compression::Xz => Some("xz"),
            Compression::Zstd => Some("zst"),
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Compression::ALL
            .into_iter()
            .find(|c| c.extension() == Some(ext))
    }

    /// Level used when none is configured
    fn default_level(self) -> i32 {
        match self {
            Compression::None => 0,
            Compression::Zstd => 3,
            _ => 6,
        }
    }

    /// Clamp a configured level into the range the encoder accepts
    fn clamp_level(self, level: i32) -> i32 {
        match self {
            Compression::None => 0,
            Compression::Gzip | Compression::Lzma | Compression::Xz => level.clamp(0, 9),
            Compression::Bzip2 => level.clamp(1, 9),
            Compression::Zstd => level.clamp(1, 22),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = SavepointError;

    fn from_str(s: &str) -> Result<Self> {
        Compression::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                SavepointError::Config(format!(
                    "unknown compression scheme '{}' (expected one of none, gzip, bzip2, lzma, xz, zstd)",
                    s
                ))
            })
    }
}

/// Encoder/decoder pair for one configured scheme
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    scheme: Compression,
    level: i32,
}

impl Compressor {
    pub fn new(scheme: Compression, level: Option<i32>) -> Self {
        let level = scheme.clamp_level(level.unwrap_or_else(|| scheme.default_level()));
        Self { scheme, level }
    }

    pub fn scheme(&self) -> Compression {
        self.scheme
    }

    pub fn extension(&self) -> Option<&'static str> {
        self.scheme.extension()
    }

    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let level = self.level;
        let encoded = match self.scheme {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level as u32));
                encoder.write_all(data).and_then(|_| encoder.finish())
            }
            Compression::Bzip2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::new(level as u32));
                encoder.write_all(data).and_then(|_| encoder.finish())
            }
            Compression::Lzma => {
                let options = xz2::stream::LzmaOptions::new_preset(level as u32)
                    .map_err(|e| self.error(e))?;
                let stream = xz2::stream::Stream::new_lzma_encoder(&options).map_err(|e| self.error(e))?;
                let mut encoder = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
                encoder.write_all(data).and_then(|_| encoder.finish())
            }
            Compression::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::new(), level as u32);
                encoder.write_all(data).and_then(|_| encoder.finish())
            }
            Compression::Zstd => zstd::encode_all(data, level),
        };
        encoded.map_err(|e| self.error(e))
    }

    /// Reverse [`Compressor::encode`] for content written with `scheme`
    pub fn decode(scheme: Compression, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let decoded = match scheme {
            Compression::None => return Ok(data.to_vec()),
            Compression::Gzip => flate2::read::GzDecoder::new(data).read_to_end(&mut out),
            Compression::Bzip2 => bzip2::read::BzDecoder::new(data).read_to_end(&mut out),
            Compression::Lzma => {
                let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX).map_err(|e| codec_error(scheme, e))?;
                xz2::read::XzDecoder::new_stream(data, stream).read_to_end(&mut out)
            }
            Compression::Xz => xz2::read::XzDecoder::new(data).read_to_end(&mut out),
            Compression::Zstd => return zstd::decode_all(data).map_err(|e| codec_error(scheme, e)),
        };
        decoded.map_err(|e| codec_error(scheme, e))?;
        Ok(out)
    }

    fn error(&self, e: impl fmt::Display) -> SavepointError {
        codec_error(self.scheme, e)
    }
}

fn codec_error(scheme: Compression, e: impl fmt::Display) -> SavepointError {
    SavepointError::Compression(format!("{}: {}", scheme, e))
}
