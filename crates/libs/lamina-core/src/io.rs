//! IO related types and functions.
//!
//! Lamina only writes binary little-endian files. Sample blocks are written
//! as `f32` or `f64` values and may be compressed as a whole.
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    io::{Read, Write},
    path::Path,
};

/// Error type when reading a file.
#[derive(Debug)]
pub struct ReadFileError {
    /// Path to the file that caused the error.
    pub path: Box<Path>,
    /// Kind of error that occurred.
    pub kind: ReadFileErrorKind,
}

impl Display for ReadFileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "error while reading file {}: ", self.path.display())?;
        match &self.kind {
            ReadFileErrorKind::Read(err) => write!(f, "{}", err),
            ReadFileErrorKind::Parse(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ReadFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ReadFileErrorKind::Read(err) => Some(err),
            ReadFileErrorKind::Parse(err) => Some(err),
        }
    }
}

impl ReadFileError {
    /// Creates a new `ReadFileError` from a `ParseError`.
    pub fn from_parse_error(path: impl AsRef<Path>, err: ParseError) -> Self {
        Self {
            path: path.as_ref().to_path_buf().into_boxed_path(),
            kind: ReadFileErrorKind::Parse(err),
        }
    }

    /// Creates a new `ReadFileError` from a `std::io::Error`.
    pub fn from_std_io_error(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        Self {
            path: path.as_ref().to_path_buf().into_boxed_path(),
            kind: ReadFileErrorKind::Read(err),
        }
    }
}

/// Kind of error that occurred while reading a file.
#[derive(Debug)]
pub enum ReadFileErrorKind {
    /// Error caused by a `std::io::Error`.
    Read(std::io::Error),
    /// The content of the file is malformed.
    Parse(ParseError),
}

/// Error type when parsing a binary file.
#[derive(Debug)]
pub struct ParseError {
    /// Byte position where the error occurred.
    pub position: u64,
    /// Kind of error that occurred.
    pub kind: ParseErrorKind,
}

impl ParseError {
    /// Creates a new parse error at the given byte position.
    pub fn new(position: u64, kind: ParseErrorKind) -> Self { Self { position, kind } }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "error while parsing byte at position {}: ", self.position)?;
        match &self.kind {
            ParseErrorKind::InvalidMagicNumber => write!(f, "invalid magic number"),
            ParseErrorKind::InvalidVersion(v) => write!(f, "unsupported version {:#08x}", v),
            ParseErrorKind::NotFinalized => write!(f, "file was never finalized"),
            ParseErrorKind::InvalidCompression(c) => write!(f, "invalid compression {}", c),
            ParseErrorKind::InvalidSampleSize(s) => write!(f, "invalid sample size {}", s),
            ParseErrorKind::NotEnoughData => write!(f, "not enough data"),
            ParseErrorKind::InvalidContent(what) => write!(f, "invalid content: {}", what),
        }
    }
}

impl std::error::Error for ParseError {}

/// All possible errors while parsing a file.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// The magic number is not valid.
    InvalidMagicNumber,
    /// The file version is not supported.
    InvalidVersion(u32),
    /// The finalized flag is not set.
    NotFinalized,
    /// The compression byte is not valid.
    InvalidCompression(u8),
    /// The sample size byte is not valid.
    InvalidSampleSize(u8),
    /// There is not enough data to parse.
    NotEnoughData,
    /// The parsed content is not expected.
    InvalidContent(&'static str),
}

/// Possible errors while writing a file.
#[derive(Debug)]
pub struct WriteFileError {
    /// The path of the file.
    pub path: Box<Path>,
    /// The kind of the error.
    pub kind: WriteFileErrorKind,
}

impl Display for WriteFileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.kind {
            WriteFileErrorKind::Write(err) => {
                write!(f, "error while writing file {}: {}", self.path.display(), err)
            },
            WriteFileErrorKind::Finalize(err) => {
                write!(
                    f,
                    "error while finalizing file {}: {}",
                    self.path.display(),
                    err
                )
            },
        }
    }
}

impl std::error::Error for WriteFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            WriteFileErrorKind::Write(err) | WriteFileErrorKind::Finalize(err) => Some(err),
        }
    }
}

impl WriteFileError {
    /// Creates a new `WriteFileError` from a `std::io::Error`.
    pub fn from_std_io_error(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        Self {
            path: path.as_ref().to_path_buf().into_boxed_path(),
            kind: WriteFileErrorKind::Write(err),
        }
    }

    /// Creates a new `WriteFileError` for a failure while moving the finished
    /// file into place.
    pub fn finalize(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        Self {
            path: path.as_ref().to_path_buf().into_boxed_path(),
            kind: WriteFileErrorKind::Finalize(err),
        }
    }
}

/// The kind of the error while writing a file.
#[derive(Debug)]
pub enum WriteFileErrorKind {
    /// The error is a `std::io::Error` raised while writing data.
    Write(std::io::Error),
    /// The data was written but the file could not be finalized.
    Finalize(std::io::Error),
}

/// Data compression scheme while storing the data.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionScheme {
    /// No compression.
    #[default]
    None = 0x00,
    /// Zlib compression.
    Zlib = 0x01,
    /// Gzip compression.
    Gzip = 0x02,
}

impl TryFrom<u8> for CompressionScheme {
    type Error = ParseErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(CompressionScheme::None),
            0x01 => Ok(CompressionScheme::Zlib),
            0x02 => Ok(CompressionScheme::Gzip),
            _ => Err(ParseErrorKind::InvalidCompression(value)),
        }
    }
}

impl Display for CompressionScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CompressionScheme::None => write!(f, "none"),
            CompressionScheme::Zlib => write!(f, "zlib"),
            CompressionScheme::Gzip => write!(f, "gzip"),
        }
    }
}

/// Floating point precision of the stored samples.
///
/// `F64` is lossless; `F32` rounds every sample to the nearest single
/// precision value (relative error below 6e-8).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplePrecision {
    /// Single precision, 4 bytes per sample.
    F32 = 4,
    /// Double precision, 8 bytes per sample.
    #[default]
    F64 = 8,
}

impl SamplePrecision {
    /// Size of a single sample in bytes.
    pub const fn sample_size(&self) -> usize { *self as usize }
}

impl TryFrom<u8> for SamplePrecision {
    type Error = ParseErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(SamplePrecision::F32),
            8 => Ok(SamplePrecision::F64),
            _ => Err(ParseErrorKind::InvalidSampleSize(value)),
        }
    }
}

/// Encodes the samples into little endian bytes of the given precision, then
/// compresses the whole block.
pub fn encode_samples(
    samples: &[f64],
    precision: SamplePrecision,
    compression: CompressionScheme,
) -> std::io::Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(samples.len() * precision.sample_size());
    match precision {
        SamplePrecision::F32 => {
            for s in samples {
                raw.write_f32::<LittleEndian>(*s as f32)?;
            }
        },
        SamplePrecision::F64 => {
            for s in samples {
                raw.write_f64::<LittleEndian>(*s)?;
            }
        },
    }

    match compression {
        CompressionScheme::None => Ok(raw),
        CompressionScheme::Zlib => {
            let mut encoder = flate2::write::ZlibEncoder::new(
                Vec::with_capacity(raw.len() / 2),
                flate2::Compression::default(),
            );
            encoder.write_all(&raw)?;
            encoder.finish()
        },
        CompressionScheme::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(
                Vec::with_capacity(raw.len() / 2),
                flate2::Compression::default(),
            );
            encoder.write_all(&raw)?;
            encoder.finish()
        },
    }
}

/// Decodes a block written by [`encode_samples`].
///
/// # Arguments
///
/// * `bytes` - The (possibly compressed) block.
/// * `count` - The number of samples expected in the block.
/// * `position` - Byte position of the block in the file, used for error
///   reporting.
pub fn decode_samples(
    bytes: &[u8],
    count: usize,
    precision: SamplePrecision,
    compression: CompressionScheme,
    position: u64,
) -> Result<Vec<f64>, ParseError> {
    let inflated;
    let raw: &[u8] = match compression {
        CompressionScheme::None => bytes,
        CompressionScheme::Zlib => {
            let mut buf = Vec::with_capacity(count * precision.sample_size());
            flate2::bufread::ZlibDecoder::new(bytes)
                .read_to_end(&mut buf)
                .map_err(|_| {
                    ParseError::new(position, ParseErrorKind::InvalidContent("zlib stream"))
                })?;
            inflated = buf;
            &inflated
        },
        CompressionScheme::Gzip => {
            let mut buf = Vec::with_capacity(count * precision.sample_size());
            flate2::bufread::GzDecoder::new(bytes)
                .read_to_end(&mut buf)
                .map_err(|_| {
                    ParseError::new(position, ParseErrorKind::InvalidContent("gzip stream"))
                })?;
            inflated = buf;
            &inflated
        },
    };

    if raw.len() < count * precision.sample_size() {
        return Err(ParseError::new(position, ParseErrorKind::NotEnoughData));
    }

    let mut reader = raw;
    (0..count)
        .map(|i| {
            let parsed = match precision {
                SamplePrecision::F32 => reader.read_f32::<LittleEndian>().map(f64::from),
                SamplePrecision::F64 => reader.read_f64::<LittleEndian>(),
            };
            parsed.map_err(|_| {
                ParseError::new(
                    position + (i * precision.sample_size()) as u64,
                    ParseErrorKind::NotEnoughData,
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<f64> {
        (0..257)
            .map(|i| (i as f64 * 0.37).sin() * 1.0e-3 + 1.0 / (1.0 + i as f64))
            .collect()
    }

    #[test]
    fn f64_blocks_are_lossless() {
        let data = samples();
        for comp in [
            CompressionScheme::None,
            CompressionScheme::Zlib,
            CompressionScheme::Gzip,
        ] {
            let bytes = encode_samples(&data, SamplePrecision::F64, comp).unwrap();
            let decoded =
                decode_samples(&bytes, data.len(), SamplePrecision::F64, comp, 0).unwrap();
            assert_eq!(decoded, data, "compression: {}", comp);
        }
    }

    #[test]
    fn f32_blocks_round_to_single_precision() {
        let data = samples();
        let bytes =
            encode_samples(&data, SamplePrecision::F32, CompressionScheme::Zlib).unwrap();
        let decoded = decode_samples(
            &bytes,
            data.len(),
            SamplePrecision::F32,
            CompressionScheme::Zlib,
            0,
        )
        .unwrap();
        for (a, b) in data.iter().zip(decoded.iter()) {
            assert_eq!(*b, *a as f32 as f64);
        }
    }

    #[test]
    fn truncated_block_is_reported() {
        let data = samples();
        let bytes = encode_samples(&data, SamplePrecision::F64, CompressionScheme::None).unwrap();
        let err = decode_samples(
            &bytes[..bytes.len() - 3],
            data.len(),
            SamplePrecision::F64,
            CompressionScheme::None,
            128,
        )
        .unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::NotEnoughData));
        assert_eq!(err.position, 128);
    }

    #[test]
    fn header_bytes_are_validated() {
        assert_eq!(CompressionScheme::try_from(1).unwrap(), CompressionScheme::Zlib);
        assert!(CompressionScheme::try_from(7).is_err());
        assert_eq!(SamplePrecision::try_from(4).unwrap(), SamplePrecision::F32);
        assert!(SamplePrecision::try_from(2).is_err());
        assert_eq!(SamplePrecision::F64.sample_size(), 8);
    }
}
