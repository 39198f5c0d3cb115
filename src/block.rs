//! Block segmentation.
//!
//! Old and new images are cut into blocks of the same size. Block pairs that exist in both
//! images become SKIP or MODIFY; the surplus blocks of the longer image become ADD (new is
//! longer) or REMOVE (old is longer). All per-block buffers are allocated once.
use std::cmp::{max, min};
use std::fmt;
use std::io::{Read, Seek, Write};
use std::str::FromStr;

use log::{debug, info};
use zerocopy::U32;

use crate::diff::Delta;
use crate::error::Result;
use crate::image::{wire_u32, CompressionHeader, Image, ImagePrefix, Layout};
use crate::writer::{PatchWriter, Payload};
use crate::{BlockHeader, Config, Error, PatchHeader, Token, COMPRESSION_FORMAT_NONE};

/// Kind of image pair being diffed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// User binaries: every image carries a CRC and a binary header.
    Elf,
    /// Raw kernel images without any header.
    Kernel,
    /// Uncompressed images diffed along the section table of the compressed new image.
    Compressed,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Elf => "elf",
            Mode::Kernel => "kernel",
            Mode::Compressed => "compressed",
        })
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "elf" => Ok(Mode::Elf),
            "kernel" => Ok(Mode::Kernel),
            "compressed" => Ok(Mode::Compressed),
            other => Err(format!("unknown mode `{}`, expected elf, kernel or compressed", other)),
        }
    }
}

/// The input images of one run.
pub struct Inputs<R> {
    mode: Mode,
    old: R,
    new: R,
    new_compressed: Option<R>,
}

impl<R> Inputs<R> {
    pub fn elf(old: R, new: R) -> Self {
        Inputs {
            mode: Mode::Elf,
            old,
            new,
            new_compressed: None,
        }
    }

    pub fn kernel(old: R, new: R) -> Self {
        Inputs {
            mode: Mode::Kernel,
            old,
            new,
            new_compressed: None,
        }
    }

    pub fn compressed(old: R, new: R, new_compressed: R) -> Self {
        Inputs {
            mode: Mode::Compressed,
            old,
            new,
            new_compressed: Some(new_compressed),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

/// How one image divides into blocks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Blocks {
    len: u64,
    size: usize,
    count: usize,
}

impl Blocks {
    fn new(len: u64, size: usize) -> Self {
        let size_u64 = size as u64;
        Blocks {
            len,
            size,
            count: ((len + size_u64 - 1) / size_u64) as usize,
        }
    }

    /// Length of block `index`; only the last block may be short.
    fn len_of(&self, index: usize) -> usize {
        let start = index as u64 * self.size as u64;
        min(self.size as u64, self.len - start) as usize
    }
}

/// Tally of a finished run.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub blocks_old: usize,
    pub blocks_new: usize,
    pub skipped: usize,
    pub modified: usize,
    pub added: usize,
    pub removed: usize,
    pub patch_len: u64,
    pub crc: u32,
}

/// One patch generation session: the opened inputs, the patch being written and the
/// header values derived from them.
pub struct Generator<R, W> {
    mode: Mode,
    old: Image<R>,
    new: Image<R>,
    sections: Option<CompressionHeader>,
    old_blocks: Blocks,
    new_blocks: Blocks,
    header: PatchHeader,
    writer: PatchWriter<W>,
}

impl<R: Read + Seek, W: Read + Write + Seek> Generator<R, W> {
    /// Opens and validates the inputs, then starts the patch with its header slot and the
    /// embedded new-image prefix.
    pub fn new(inputs: Inputs<R>, patch: W, config: &Config) -> Result<Self> {
        if config.block_size == 0 {
            return Err(Error::Config("block size is zero"));
        }
        let Inputs {
            mode,
            old,
            new,
            new_compressed,
        } = inputs;

        let layout = match mode {
            Mode::Kernel => Layout::Raw,
            Mode::Elf | Mode::Compressed => Layout::Framed,
        };
        let old = Image::open(old, layout, config, "old image")?;
        let new = Image::open(new, layout, config, "new image")?;

        let (prefix, block_size) = match new_compressed {
            Some(reader) => {
                let image = Image::open(reader, Layout::Compressed, config, "new compressed image")?;
                let block_size = image
                    .prefix
                    .compression
                    .as_ref()
                    .map_or(config.block_size, |c| c.block_size as usize);
                (image.prefix, block_size)
            }
            None if mode == Mode::Kernel => (ImagePrefix::default(), config.block_size),
            None => (new.prefix.clone(), config.block_size),
        };

        let old_blocks = Blocks::new(old.data_len, block_size);
        let new_blocks = Blocks::new(new.data_len, block_size);
        let sections = prefix.compression.clone();
        if let Some(sections) = &sections {
            if sections.blocks() != new_blocks.count {
                return Err(Error::BlockCount {
                    uncompressed: new_blocks.count,
                    compressed: sections.blocks(),
                    block_size,
                });
            }
        }

        let header = PatchHeader {
            old_file_compression_format: U32::new(
                sections
                    .as_ref()
                    .map_or(COMPRESSION_FORMAT_NONE, |s| u32::from(s.format)),
            ),
            blocks_newfile: U32::new(wire_u32("new block count", new_blocks.count as u64)?),
            blocks_oldfile: U32::new(wire_u32("old block count", old_blocks.count as u64)?),
            blocksize_newfile: U32::new(wire_u32("block size", block_size as u64)?),
            blocksize_oldfile: U32::new(wire_u32("block size", block_size as u64)?),
            crc_newfile_size: U32::new(if prefix.crc.is_some() { 4 } else { 0 }),
            binary_header_size: U32::new(wire_u32(
                "binary header size",
                prefix.binary_header.len() as u64,
            )?),
            comp_header_size: U32::new(wire_u32(
                "compression header size",
                sections.as_ref().map_or(0, |s| s.as_bytes().len()) as u64,
            )?),
            ..PatchHeader::default()
        };

        let writer = PatchWriter::create(patch, &prefix, config)?;
        Ok(Generator {
            mode,
            old,
            new,
            sections,
            old_blocks,
            new_blocks,
            header,
            writer,
        })
    }

    /// Number of block headers the patch will contain.
    pub fn blocks(&self) -> usize {
        max(self.old_blocks.count, self.new_blocks.count)
    }

    /// Diffs every block and finishes the patch. `on_block` sees each block header as it
    /// is written.
    pub fn run(mut self, mut on_block: impl FnMut(&BlockHeader)) -> Result<Summary> {
        let block_size = self.new_blocks.size;
        let common = min(self.old_blocks.count, self.new_blocks.count);
        let mut old_buf = Vec::with_capacity(block_size);
        let mut new_buf = Vec::with_capacity(block_size);
        let mut delta = Delta::with_capacity(block_size);
        let mut summary = Summary {
            blocks_old: self.old_blocks.count,
            blocks_new: self.new_blocks.count,
            ..Summary::default()
        };

        for index in 0..self.blocks() {
            let number = wire_u32("block index", index as u64)?;
            let written = if index < common {
                self.old
                    .read_block(&mut old_buf, self.old_blocks.len_of(index), index)?;
                self.new
                    .read_block(&mut new_buf, self.new_blocks.len_of(index), index)?;
                if old_buf == new_buf {
                    summary.skipped += 1;
                    let header = self.new_block_header(number, Token::Skip, &new_buf)?;
                    self.writer.write_block(header, Payload::None)?
                } else {
                    summary.modified += 1;
                    delta.compute(&old_buf, &new_buf);
                    let header = self.new_block_header(number, Token::Modify, &new_buf)?;
                    self.writer.write_block(
                        header,
                        Payload::Delta {
                            ctrl: delta.ctrl(),
                            diff: delta.diff(),
                            extra: delta.extra(),
                        },
                    )?
                }
            } else if self.new_blocks.count > self.old_blocks.count {
                summary.added += 1;
                self.new
                    .read_block(&mut new_buf, self.new_blocks.len_of(index), index)?;
                let header = self.new_block_header(number, Token::Add, &new_buf)?;
                self.writer.write_block(header, Payload::Literal(&new_buf))?
            } else {
                summary.removed += 1;
                self.writer
                    .write_block(BlockHeader::new(number, Token::Remove), Payload::None)?
            };

            debug!(
                "block {}: {}, {} new bytes, sections {}/{}/{}",
                index,
                written.token().map(|token| token.to_string()).unwrap_or_default(),
                written.new_block_size_u.get(),
                written.size_ctrl_block.get(),
                written.size_diff_block.get(),
                written.size_extra_block.get()
            );
            on_block(&written);
        }

        let (_, crc, patch_len) = self.writer.finish(self.header)?;
        summary.patch_len = patch_len;
        summary.crc = crc;
        info!(
            "{} patch: {} old / {} new blocks of {} bytes; {} skipped, {} modified, {} added, {} removed; {} bytes, CRC {:#010x}",
            self.mode,
            summary.blocks_old,
            summary.blocks_new,
            block_size,
            summary.skipped,
            summary.modified,
            summary.added,
            summary.removed,
            patch_len,
            crc
        );
        Ok(summary)
    }

    fn new_block_header(&self, number: u32, token: Token, data: &[u8]) -> Result<BlockHeader> {
        let mut header = BlockHeader::new(number, token);
        let compressed = self
            .sections
            .as_ref()
            .map_or(0, |s| s.section_len(number as usize));
        header.new_block_size_c = U32::new(compressed);
        header.new_block_size_u = U32::new(wire_u32("block size", data.len() as u64)?);
        header.new_block_crc = U32::new(crc32fast::hash(data));
        Ok(header)
    }
}
