//! Binary storage of layered BSDFs.
//!
//! A file holds one layer per colour channel, all sampled on the same
//! quadrature rule and number of Fourier orders. Every `(channel, order)`
//! block can be read independently. All values are little endian.
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 4 | magic `LYRB` |
//! | 4 | 4 | version |
//! | 8 | 8 | file length |
//! | 16 | 32 | timestamp |
//! | 48 | 1 | flags, bit 0 set once finalized |
//! | 49 | 1 | sample size in bytes |
//! | 50 | 1 | compression |
//! | 51 | 1 | padding |
//! | 52 | 4 | channel count |
//! | 56 | 4 | node count `n` |
//! | 60 | 4 | Fourier order count `m` |
//! | 64 | 8 | directory offset |
//! | 72 | 8n | nodes |
//! | 72 + 8n | 8n | weights |
//!
//! The data blocks follow, then the directory. A block holds the four
//! matrices of one mode (`R_top`, `R_bottom`, `T_tb`, `T_bt`), each as
//! `[incident][exitant]` samples. The directory lists, per channel, its
//! interfaces and the offset and byte length of each of its `m` blocks.
use crate::{
    layer::{Block, Interface, Layer, LayerMode},
    microfacet::MicrofacetParams,
    quad::QuadratureNodes,
};
use base::{
    error::Error,
    io::{
        decode_samples, encode_samples, CompressionScheme, ParseError, ParseErrorKind,
        ReadFileError, SamplePrecision, WriteFileError,
    },
    optics::Ior,
    utils::{iso_timestamp_bytes, timestamp_from_bytes},
    Version,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// Magic number at the start of every file.
pub const MAGIC: &[u8; 4] = b"LYRB";

/// Version of the file layout.
pub const VERSION: Version = Version::new(0, 1, 0);

const HEADER_SIZE: u64 = 72;
const FLAG_FINALIZED: u8 = 0x01;
const OFFSET_LENGTH: u64 = 8;
const OFFSET_FLAGS: u64 = 48;
const OFFSET_DIRECTORY: u64 = 64;

const KIND_MICROFACET: u8 = 0;
const KIND_DIFFUSE: u8 = 1;
const KIND_INDEX_MATCHED: u8 = 2;

/// Directory bytes of one interface.
const INTERFACE_RECORD_SIZE: u64 = 32;
/// Directory bytes of one block position.
const BLOCK_RECORD_SIZE: u64 = 16;

/// How samples are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Size of the stored samples.
    pub precision: SamplePrecision,
    /// Compression of each block.
    pub compression: CompressionScheme,
}

/// Shape of a file: what every written channel must match.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageParams {
    /// Number of channels.
    pub channels: usize,
    /// Quadrature rule shared by all channels.
    pub quadrature: QuadratureNodes,
    /// Number of Fourier orders.
    pub orders: usize,
    /// Sample encoding.
    pub options: StorageOptions,
}

/// Offsets and sizes of the blocks of one channel, with its interfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEntry {
    /// Interfaces of the channel's layer, top to bottom.
    pub interfaces: Vec<Interface>,
    /// `(offset, byte length)` of the block of each order.
    pub blocks: Vec<(u64, u64)>,
}

/// Writer of a layered BSDF file.
///
/// Channels must be written in order, then the file is finalized with
/// [`BsdfStorage::close`]. Data goes to `<path>.partial` until then; a
/// storage dropped before being closed removes its partial file.
#[derive(Debug)]
pub struct BsdfStorage {
    path: PathBuf,
    partial: PathBuf,
    writer: Option<BufWriter<File>>,
    params: StorageParams,
    next_channel: usize,
    offset: u64,
    directory: Vec<ChannelEntry>,
    finalized: bool,
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

impl BsdfStorage {
    /// Creates a new file for the given number of channels and
    /// discretization.
    pub fn create(path: impl AsRef<Path>, params: StorageParams) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let partial = partial_path(&path);
        let file = File::create(&partial)
            .map_err(|err| WriteFileError::from_std_io_error(&partial, err))?;
        let mut storage = Self {
            path,
            partial,
            writer: Some(BufWriter::new(file)),
            params,
            next_channel: 0,
            offset: 0,
            directory: Vec::new(),
            finalized: false,
        };
        storage.write_header()?;
        log::debug!(
            "created {} for {} channels, {} nodes, {} orders",
            storage.partial.display(),
            storage.params.channels,
            storage.params.quadrature.len(),
            storage.params.orders
        );
        Ok(storage)
    }

    /// Writes a whole set of channel layers to `path` and finalizes it.
    pub fn from_layers(
        path: impl AsRef<Path>,
        layers: &[Layer],
        options: StorageOptions,
    ) -> Result<(), Error> {
        let first = layers.first().ok_or(Error::InvalidWriteOrder {
            expected: 0,
            found: None,
            channels: 0,
        })?;
        let mut storage = Self::create(
            path,
            StorageParams {
                channels: layers.len(),
                quadrature: first.quadrature().clone(),
                orders: first.order_count(),
                options,
            },
        )?;
        for (index, layer) in layers.iter().enumerate() {
            storage.write_channel(index, layer)?;
        }
        storage.close()
    }

    fn io_error(&self, err: std::io::Error) -> Error {
        WriteFileError::from_std_io_error(&self.partial, err).into()
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, Error> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(WriteFileError::from_std_io_error(
                &self.partial,
                std::io::Error::new(std::io::ErrorKind::Other, "file already closed"),
            )
            .into()),
        }
    }

    fn write_header(&mut self) -> Result<(), Error> {
        let params = self.params.clone();
        let mut header = Vec::with_capacity(HEADER_SIZE as usize + 16 * params.quadrature.len());
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&VERSION.as_u32().to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());
        header.extend_from_slice(&iso_timestamp_bytes::<32>());
        header.push(0);
        header.push(params.options.precision as u8);
        header.push(params.options.compression as u8);
        header.push(0);
        header.extend_from_slice(&(params.channels as u32).to_le_bytes());
        header.extend_from_slice(&(params.quadrature.len() as u32).to_le_bytes());
        header.extend_from_slice(&(params.orders as u32).to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());
        debug_assert_eq!(header.len() as u64, HEADER_SIZE);
        for v in params.quadrature.nodes().iter().chain(params.quadrature.weights()) {
            header.extend_from_slice(&v.to_le_bytes());
        }
        self.writer()?
            .write_all(&header)
            .map_err(|err| self.io_error(err))?;
        self.offset = header.len() as u64;
        Ok(())
    }

    /// Appends the layer of channel `index`.
    ///
    /// Channels must be written in increasing order starting at 0, and the
    /// layer must use the discretization declared at creation.
    pub fn write_channel(&mut self, index: usize, layer: &Layer) -> Result<(), Error> {
        if index != self.next_channel || index >= self.params.channels {
            return Err(Error::InvalidWriteOrder {
                expected: self.next_channel,
                found: Some(index),
                channels: self.params.channels,
            });
        }
        if layer.order_count() != self.params.orders
            || layer.quadrature().nodes() != self.params.quadrature.nodes()
        {
            return Err(Error::DiscretizationMismatch {
                expected: (self.params.quadrature.len(), self.params.orders),
                found: (layer.quadrature().len(), layer.order_count()),
            });
        }

        let options = self.params.options;
        let mut blocks = Vec::with_capacity(layer.order_count());
        for mode in layer.modes() {
            // Column major storage of (exitant, incident) is [incident][exitant].
            let samples = Block::ALL
                .iter()
                .flat_map(|&block| mode.block(block).as_slice().iter().copied())
                .collect::<Vec<_>>();
            let bytes = encode_samples(&samples, options.precision, options.compression)
                .map_err(|err| self.io_error(err))?;
            self.writer()?
                .write_all(&bytes)
                .map_err(|err| self.io_error(err))?;
            blocks.push((self.offset, bytes.len() as u64));
            self.offset += bytes.len() as u64;
        }
        self.directory.push(ChannelEntry {
            interfaces: layer.interfaces().to_vec(),
            blocks,
        });
        self.next_channel += 1;
        log::debug!(
            "wrote channel {} of {} to {}",
            index,
            self.params.channels,
            self.partial.display()
        );
        Ok(())
    }

    fn write_directory(&mut self) -> Result<u64, Error> {
        let mut dir = Vec::new();
        for entry in &self.directory {
            dir.extend_from_slice(&(entry.interfaces.len() as u32).to_le_bytes());
            for interface in &entry.interfaces {
                let (kind, values) = match interface {
                    Interface::Microfacet(p) => (KIND_MICROFACET, [p.eta.eta, p.eta.k, p.alpha]),
                    Interface::Diffuse { albedo } => (KIND_DIFFUSE, [0.0, 0.0, *albedo]),
                    Interface::IndexMatched => (KIND_INDEX_MATCHED, [1.0, 0.0, 0.0]),
                };
                dir.push(kind);
                dir.extend_from_slice(&[0u8; 7]);
                for v in values {
                    dir.extend_from_slice(&v.to_le_bytes());
                }
            }
            for (offset, len) in &entry.blocks {
                dir.extend_from_slice(&offset.to_le_bytes());
                dir.extend_from_slice(&len.to_le_bytes());
            }
        }
        let dir_offset = self.offset;
        self.writer()?
            .write_all(&dir)
            .map_err(|err| self.io_error(err))?;
        self.offset += dir.len() as u64;
        Ok(dir_offset)
    }

    /// Writes the directory, marks the file as finalized and moves it to its
    /// final path.
    ///
    /// Fails if not all channels have been written; the partial file is then
    /// removed.
    pub fn close(mut self) -> Result<(), Error> {
        if self.next_channel != self.params.channels {
            return Err(Error::InvalidWriteOrder {
                expected: self.next_channel,
                found: None,
                channels: self.params.channels,
            });
        }

        let dir_offset = self.write_directory()?;
        let length = self.offset;
        let writer = self.writer()?;
        let patched = (|| -> std::io::Result<()> {
            writer.seek(SeekFrom::Start(OFFSET_LENGTH))?;
            writer.write_u64::<LittleEndian>(length)?;
            writer.seek(SeekFrom::Start(OFFSET_DIRECTORY))?;
            writer.write_u64::<LittleEndian>(dir_offset)?;
            writer.seek(SeekFrom::Start(OFFSET_FLAGS))?;
            writer.write_u8(FLAG_FINALIZED)?;
            writer.flush()?;
            writer.get_ref().sync_all()
        })();
        patched.map_err(|err| self.io_error(err))?;
        self.writer = None;

        std::fs::rename(&self.partial, &self.path)
            .map_err(|err| WriteFileError::finalize(&self.path, err))?;
        self.finalized = true;
        log::info!(
            "wrote {} channels to {} ({} bytes)",
            self.params.channels,
            self.path.display(),
            length
        );
        Ok(())
    }
}

impl Drop for BsdfStorage {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        self.writer = None;
        if self.partial.exists() {
            log::warn!("removing unfinished file {}", self.partial.display());
            if let Err(err) = std::fs::remove_file(&self.partial) {
                log::error!("failed to remove {}: {}", self.partial.display(), err);
            }
        }
    }
}

/// Reader of a finalized layered BSDF file.
#[derive(Debug)]
pub struct BsdfFile {
    path: PathBuf,
    reader: BufReader<File>,
    version: Version,
    timestamp: String,
    params: StorageParams,
    directory_offset: u64,
    directory: Vec<ChannelEntry>,
}

impl BsdfFile {
    /// Opens a file and reads its header and directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|err| ReadFileError::from_std_io_error(&path, err))?;
        let actual_len = file
            .metadata()
            .map_err(|err| ReadFileError::from_std_io_error(&path, err))?
            .len();
        let mut reader = BufReader::new(file);
        let parse_err =
            |pos: u64, kind: ParseErrorKind| ReadFileError::from_parse_error(&path, ParseError::new(pos, kind));
        let io_err = |err: std::io::Error| -> Error {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                ReadFileError::from_parse_error(
                    &path,
                    ParseError::new(actual_len, ParseErrorKind::NotEnoughData),
                )
                .into()
            } else {
                ReadFileError::from_std_io_error(&path, err).into()
            }
        };

        let mut header = [0u8; HEADER_SIZE as usize];
        reader.read_exact(&mut header).map_err(io_err)?;
        if &header[0..4] != MAGIC {
            return Err(parse_err(0, ParseErrorKind::InvalidMagicNumber).into());
        }
        let mut cursor = &header[4..];
        let version = cursor.read_u32::<LittleEndian>().map_err(io_err)?;
        if Version::from_u32(version).major != VERSION.major
            || Version::from_u32(version).minor != VERSION.minor
        {
            return Err(parse_err(4, ParseErrorKind::InvalidVersion(version)).into());
        }
        let length = cursor.read_u64::<LittleEndian>().map_err(io_err)?;
        let timestamp = timestamp_from_bytes(&header[16..48]);
        let flags = header[48];
        if flags & FLAG_FINALIZED == 0 {
            return Err(parse_err(OFFSET_FLAGS, ParseErrorKind::NotFinalized).into());
        }
        if length > actual_len {
            return Err(parse_err(actual_len, ParseErrorKind::NotEnoughData).into());
        }
        let precision = SamplePrecision::try_from(header[49]).map_err(|kind| parse_err(49, kind))?;
        let compression =
            CompressionScheme::try_from(header[50]).map_err(|kind| parse_err(50, kind))?;
        let mut cursor = &header[52..];
        let channels = cursor.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        let n = cursor.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        let orders = cursor.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        let dir_offset = cursor.read_u64::<LittleEndian>().map_err(io_err)?;
        if n < 2 || n % 2 != 0 || orders == 0 {
            return Err(parse_err(56, ParseErrorKind::InvalidContent("discretization")).into());
        }
        if HEADER_SIZE + 16 * n as u64 > dir_offset || dir_offset > length {
            let kind = ParseErrorKind::InvalidContent("directory offset");
            return Err(parse_err(OFFSET_DIRECTORY, kind).into());
        }
        // Every count read from the file must fit in the directory before
        // anything is allocated for it.
        let dir_len = length - dir_offset;
        let channel_record = 4 + BLOCK_RECORD_SIZE * orders as u64;
        if (channels as u64).saturating_mul(channel_record) > dir_len {
            return Err(parse_err(52, ParseErrorKind::InvalidContent("channel count")).into());
        }

        let mut read_f64s = |count: usize| -> Result<Vec<f64>, Error> {
            (0..count)
                .map(|_| reader.read_f64::<LittleEndian>().map_err(io_err))
                .collect()
        };
        let nodes = read_f64s(n)?;
        let weights = read_f64s(n)?;
        if nodes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(parse_err(HEADER_SIZE, ParseErrorKind::InvalidContent("nodes")).into());
        }

        reader
            .seek(SeekFrom::Start(dir_offset))
            .map_err(io_err)?;
        let block_len = |reader: &mut BufReader<File>| -> Result<(u64, u64), Error> {
            let offset = reader.read_u64::<LittleEndian>().map_err(io_err)?;
            let len = reader.read_u64::<LittleEndian>().map_err(io_err)?;
            Ok((offset, len))
        };
        let mut directory = Vec::with_capacity(channels);
        for _ in 0..channels {
            let position = reader.stream_position().map_err(io_err)?;
            let count = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;
            let available = length.saturating_sub(position);
            if (count as u64).saturating_mul(INTERFACE_RECORD_SIZE) > available {
                let kind = ParseErrorKind::InvalidContent("interface count");
                return Err(parse_err(position, kind).into());
            }
            let mut interfaces = Vec::with_capacity(count);
            for _ in 0..count {
                let position = reader.stream_position().map_err(io_err)?;
                let kind = reader.read_u8().map_err(io_err)?;
                let mut pad = [0u8; 7];
                reader.read_exact(&mut pad).map_err(io_err)?;
                let mut values = [0.0; 3];
                for v in values.iter_mut() {
                    *v = reader.read_f64::<LittleEndian>().map_err(io_err)?;
                }
                interfaces.push(match kind {
                    KIND_MICROFACET => Interface::Microfacet(MicrofacetParams::new(
                        Ior::new(values[0], values[1]),
                        values[2],
                    )),
                    KIND_DIFFUSE => Interface::Diffuse { albedo: values[2] },
                    KIND_INDEX_MATCHED => Interface::IndexMatched,
                    _ => {
                        return Err(
                            parse_err(position, ParseErrorKind::InvalidContent("interface kind"))
                                .into(),
                        )
                    },
                });
            }
            let blocks = (0..orders)
                .map(|_| block_len(&mut reader))
                .collect::<Result<Vec<_>, Error>>()?;
            let out_of_bounds = |&&(offset, len): &&(u64, u64)| {
                let end = offset.checked_add(len);
                offset < HEADER_SIZE || end.map_or(true, |end| end > dir_offset)
            };
            if let Some(&(offset, _)) = blocks.iter().find(out_of_bounds) {
                return Err(parse_err(offset, ParseErrorKind::InvalidContent("block bounds")).into());
            }
            directory.push(ChannelEntry { interfaces, blocks });
        }

        Ok(Self {
            path,
            reader,
            version: Version::from_u32(version),
            timestamp,
            params: StorageParams {
                channels,
                quadrature: QuadratureNodes::from_parts(nodes, weights),
                orders,
                options: StorageOptions {
                    precision,
                    compression,
                },
            },
            directory_offset: dir_offset,
            directory,
        })
    }

    /// Layout version of the file.
    pub fn version(&self) -> Version { self.version }

    /// Time at which the file was created.
    pub fn timestamp(&self) -> &str { &self.timestamp }

    /// Number of channels, discretization and sample encoding.
    pub fn params(&self) -> &StorageParams { &self.params }

    /// Quadrature rule shared by all channels.
    pub fn quadrature(&self) -> &QuadratureNodes { &self.params.quadrature }

    fn out_of_range(&self, what: &'static str) -> Error {
        ReadFileError::from_parse_error(
            &self.path,
            ParseError::new(self.directory_offset, ParseErrorKind::InvalidContent(what)),
        )
        .into()
    }

    /// Directory entry of a channel, failing if the file has no such channel.
    pub fn channel(&self, channel: usize) -> Result<&ChannelEntry, Error> {
        self.directory
            .get(channel)
            .ok_or_else(|| self.out_of_range("channel index"))
    }

    /// Reads the scattering matrices of one Fourier order of one channel.
    ///
    /// Out of range channels or orders are reported as invalid content.
    pub fn read_mode(&mut self, channel: usize, order: usize) -> Result<LayerMode, Error> {
        let (offset, len) = *self
            .channel(channel)?
            .blocks
            .get(order)
            .ok_or_else(|| self.out_of_range("order index"))?;
        let path = &self.path;
        let mut bytes = vec![0u8; len as usize];
        self.reader
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.reader.read_exact(&mut bytes))
            .map_err(|err| ReadFileError::from_std_io_error(path, err))?;

        let h = self.params.quadrature.hemisphere_len();
        let size = h * h;
        let samples = decode_samples(
            &bytes,
            4 * size,
            self.params.options.precision,
            self.params.options.compression,
            offset,
        )
        .map_err(|err| ReadFileError::from_parse_error(path, err))?;
        let matrix = |k: usize| DMatrix::from_column_slice(h, h, &samples[k * size..(k + 1) * size]);
        Ok(LayerMode {
            reflection_top: matrix(0),
            reflection_bottom: matrix(1),
            transmission_tb: matrix(2),
            transmission_bt: matrix(3),
        })
    }

    /// Reads all Fourier orders of one channel back into a layer.
    pub fn read_layer(&mut self, channel: usize) -> Result<Layer, Error> {
        let interfaces = self.channel(channel)?.interfaces.clone();
        let modes = (0..self.params.orders)
            .map(|order| self.read_mode(channel, order))
            .collect::<Result<Vec<_>, Error>>()?;
        Layer::new(self.params.quadrature.clone(), modes, interfaces)
    }
}
