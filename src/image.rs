//! Input image containers.
//!
//! A framed image starts with the CRC32 of everything after it, then a fixed-size binary
//! header, then (for the compressed image only) the compression header with its section
//! table. A raw image is block data only.
use std::convert::TryFrom;
use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::error::{IoContext, Result};
use crate::{Config, Error};

const CRC_SIZE: usize = 4;
/// `size_header`, `compression_format`, `blocksize`, `sections`.
const COMPRESSION_HEADER_FIXED: usize = 12;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Layout {
    /// No CRC and no headers.
    Raw,
    /// CRC and binary header.
    Framed,
    /// CRC, binary header and compression header.
    Compressed,
}

/// Compression container header of a compressed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionHeader {
    raw: Vec<u8>,
    pub format: u16,
    pub block_size: u32,
    /// Section boundaries relative to the end of the header; block `i` spans
    /// `offsets[i]..offsets[i + 1]`.
    pub offsets: Vec<u32>,
}

impl CompressionHeader {
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        if raw.len() < COMPRESSION_HEADER_FIXED {
            return Err(Error::Truncated {
                what: "compression header",
                needed: COMPRESSION_HEADER_FIXED as u64,
                available: raw.len() as u64,
            });
        }
        let declared = u64::from(LittleEndian::read_u16(&raw[0..2]));
        let format = LittleEndian::read_u16(&raw[2..4]);
        let block_size = LittleEndian::read_u32(&raw[4..8]);
        let sections = u64::from(LittleEndian::read_u32(&raw[8..12]));
        let actual = COMPRESSION_HEADER_FIXED as u64 + 4 * sections;
        if declared != actual || raw.len() as u64 != actual {
            return Err(Error::CompressionHeaderSize { declared, actual });
        }
        if block_size == 0 {
            return Err(Error::SectionTable("block size is zero".into()));
        }

        let offsets: Vec<u32> = raw[COMPRESSION_HEADER_FIXED..]
            .chunks_exact(4)
            .map(LittleEndian::read_u32)
            .collect();
        if offsets.is_empty() {
            return Err(Error::SectionTable("no section offsets".into()));
        }
        if let Some(i) = offsets.windows(2).position(|pair| pair[1] < pair[0]) {
            return Err(Error::SectionTable(format!(
                "offset {} ({}) precedes offset {} ({})",
                i + 1,
                offsets[i + 1],
                i,
                offsets[i]
            )));
        }

        Ok(CompressionHeader {
            raw,
            format,
            block_size,
            offsets,
        })
    }

    /// Header bytes exactly as they appear in the image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn blocks(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Compressed length of block `index`.
    pub fn section_len(&self, index: usize) -> u32 {
        self.offsets[index + 1] - self.offsets[index]
    }
}

/// Everything in front of the block data of an image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePrefix {
    pub crc: Option<u32>,
    pub binary_header: Vec<u8>,
    pub compression: Option<CompressionHeader>,
}

impl ImagePrefix {
    pub fn len(&self) -> u64 {
        let crc = if self.crc.is_some() { CRC_SIZE } else { 0 };
        let compression = self.compression.as_ref().map_or(0, |c| c.as_bytes().len());
        (crc + self.binary_header.len() + compression) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        if let Some(crc) = self.crc {
            out.write_all(&crc.to_le_bytes())?;
        }
        out.write_all(&self.binary_header)?;
        if let Some(compression) = &self.compression {
            out.write_all(compression.as_bytes())?;
        }
        Ok(())
    }
}

/// An opened input image, positioned at its first data block.
pub struct Image<R> {
    reader: R,
    name: &'static str,
    pub prefix: ImagePrefix,
    /// Length of the block data following the prefix.
    pub data_len: u64,
}

impl<R: Read + Seek> Image<R> {
    pub fn open(mut reader: R, layout: Layout, config: &Config, name: &'static str) -> Result<Self> {
        let total = reader
            .seek(SeekFrom::End(0))
            .io_context(|| format!("seek in {}", name))?;
        reader
            .seek(SeekFrom::Start(0))
            .io_context(|| format!("seek in {}", name))?;

        let mut prefix = ImagePrefix::default();
        if layout != Layout::Raw {
            let fixed = (CRC_SIZE + config.binary_header_size) as u64;
            if total < fixed {
                return Err(Error::Truncated {
                    what: name,
                    needed: fixed,
                    available: total,
                });
            }
            let mut crc = [0; CRC_SIZE];
            reader
                .read_exact(&mut crc)
                .io_context(|| format!("read CRC of {}", name))?;
            prefix.crc = Some(u32::from_le_bytes(crc));
            prefix.binary_header = vec![0; config.binary_header_size];
            reader
                .read_exact(&mut prefix.binary_header)
                .io_context(|| format!("read binary header of {}", name))?;
        }
        if layout == Layout::Compressed {
            let mut size = [0; 2];
            reader
                .read_exact(&mut size)
                .io_context(|| format!("read compression header size of {}", name))?;
            let size = usize::from(u16::from_le_bytes(size));
            if size < COMPRESSION_HEADER_FIXED {
                return Err(Error::CompressionHeaderSize {
                    declared: size as u64,
                    actual: COMPRESSION_HEADER_FIXED as u64,
                });
            }
            let mut raw = vec![0; size];
            raw[..2].copy_from_slice(&(size as u16).to_le_bytes());
            reader
                .read_exact(&mut raw[2..])
                .io_context(|| format!("read compression header of {}", name))?;
            prefix.compression = Some(CompressionHeader::parse(raw)?);
        }

        let data_len = total.checked_sub(prefix.len()).ok_or(Error::Truncated {
            what: name,
            needed: prefix.len(),
            available: total,
        })?;

        if let Some(compression) = &prefix.compression {
            let end = u64::from(*compression.offsets.last().unwrap_or(&0));
            if end > data_len {
                return Err(Error::SectionTable(format!(
                    "sections end at {} but {} holds only {} bytes of data",
                    end, name, data_len
                )));
            }
        }

        let mut image = Image {
            reader,
            name,
            prefix,
            data_len,
        };
        if let Some(stored) = image.prefix.crc {
            image.check_crc(stored, config.crc_chunk_size)?;
        }
        debug!("{}: {} data bytes after a {} byte prefix", name, data_len, image.prefix.len());
        Ok(image)
    }

    /// Compares the stored CRC with the rest of the file. A mismatch is only reported, the
    /// stored value is carried into the patch unchanged.
    fn check_crc(&mut self, stored: u32, chunk_size: usize) -> Result<()> {
        let name = self.name;
        self.reader
            .seek(SeekFrom::Start(CRC_SIZE as u64))
            .io_context(|| format!("seek in {}", name))?;
        let computed = crc_of_rest(&mut self.reader, chunk_size).io_context(|| format!("read {}", name))?;
        if computed != stored {
            warn!(
                "{}: stored CRC {:#010x} does not match contents ({:#010x})",
                name, stored, computed
            );
        }
        self.reader
            .seek(SeekFrom::Start(self.prefix.len()))
            .io_context(|| format!("seek in {}", name))?;
        Ok(())
    }

    /// Reads the next `len` data bytes into `buf`, replacing its contents.
    pub fn read_block(&mut self, buf: &mut Vec<u8>, len: usize, index: usize) -> Result<()> {
        buf.clear();
        buf.resize(len, 0);
        let name = self.name;
        self.reader
            .read_exact(buf)
            .io_context(|| format!("read block {} of {}", index, name))
    }
}

/// CRC32 of everything from the current position to the end of `reader`, read in chunks of
/// `chunk_size` bytes.
pub(crate) fn crc_of_rest(reader: &mut impl Read, chunk_size: usize) -> io::Result<u32> {
    let mut hasher = crc32fast::Hasher::new();
    let mut chunk = vec![0; chunk_size.max(1)];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(hasher.finalize()),
            Ok(n) => hasher.update(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// Converts a size to the u32 used on the wire.
pub(crate) fn wire_u32(what: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::TooLarge { what, value })
}
