use std::cmp::{max, min};
use std::convert::TryFrom;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem::size_of;

use log::{debug, trace};
use zerocopy::LayoutVerified;

use crate::compress::decompress_into;
use crate::diff::ControlTriple;
use crate::error::{IoContext, Result};
use crate::image::{crc_of_rest, CompressionHeader, ImagePrefix};
use crate::{BlockHeader, Config, Error, PatchHeader, Token, SIGNATURE};

macro_rules! read {
    ($reader: expr, $type: ty, $what: expr) => {{
        let mut buf = [0; size_of::<$type>()];
        let data: Result<$type> = $reader
            .read_exact(&mut buf)
            .io_context(|| $what)
            .and_then(|_| {
                LayoutVerified::<_, $type>::new(&buf[..])
                    .map(|data| *data)
                    .ok_or_else(|| Error::Corrupt(format!("{} is not aligned", $what)))
            });
        data
    }};
}

/// Headers of a patch file.
#[derive(Debug, Clone)]
pub struct PatchInfo {
    pub header: PatchHeader,
    /// The embedded prefix of the new image.
    pub prefix: ImagePrefix,
    pub blocks: Vec<BlockHeader>,
}

impl PatchInfo {
    /// Length of the new image data the patch reconstructs.
    pub fn new_len(&self) -> u64 {
        self.blocks
            .iter()
            .filter(|block| block.token.get() != Token::Remove as u32)
            .map(|block| u64::from(block.new_block_size_u.get()))
            .sum()
    }
}

fn read_header(patch: &mut impl Read) -> Result<PatchHeader> {
    let header = read!(patch, PatchHeader, "read patch header")?;
    if &header.signature != SIGNATURE {
        return Err(Error::Signature);
    }
    Ok(header)
}

/// Reads exactly `len` bytes into `buf`, replacing its contents. Memory grows with the data
/// actually present, not with the declared length.
fn read_section(patch: &mut impl Read, buf: &mut Vec<u8>, len: u64, what: &'static str) -> Result<()> {
    buf.clear();
    patch
        .by_ref()
        .take(len)
        .read_to_end(buf)
        .io_context(|| format!("read {}", what))?;
    if (buf.len() as u64) < len {
        return Err(Error::Truncated {
            what,
            needed: len,
            available: buf.len() as u64,
        });
    }
    Ok(())
}

fn read_prefix(patch: &mut impl Read, header: &PatchHeader) -> Result<ImagePrefix> {
    let mut prefix = ImagePrefix::default();
    match header.crc_newfile_size.get() {
        0 => {}
        4 => {
            let mut crc = [0; 4];
            patch
                .read_exact(&mut crc)
                .io_context(|| "read new image CRC")?;
            prefix.crc = Some(u32::from_le_bytes(crc));
        }
        other => return Err(Error::Corrupt(format!("new image CRC field is {} bytes", other))),
    }
    read_section(
        patch,
        &mut prefix.binary_header,
        u64::from(header.binary_header_size.get()),
        "binary header",
    )?;
    if header.comp_header_size.get() > 0 {
        let mut raw = Vec::new();
        read_section(patch, &mut raw, u64::from(header.comp_header_size.get()), "compression header")?;
        prefix.compression = Some(CompressionHeader::parse(raw)?);
    }
    Ok(prefix)
}

/// Checks that `block` is in sequence and that its token fits its position.
fn check_block(header: &PatchHeader, block: &BlockHeader, index: u32) -> Result<Token> {
    if block.block_number.get() != index {
        return Err(Error::BlockOrder {
            expected: index,
            found: block.block_number.get(),
        });
    }
    let token = block.token()?;
    let old = header.blocks_oldfile.get();
    let new = header.blocks_newfile.get();
    let allowed = match token {
        Token::Skip | Token::Modify => index < min(old, new),
        Token::Add => index >= old && index < new,
        Token::Remove => index >= new && index < old && block.payload_len() == 0,
    };
    if !allowed {
        return Err(Error::Corrupt(format!(
            "block {} has token {:?} but the images have {} old and {} new blocks",
            index, token, old, new
        )));
    }
    Ok(token)
}

/// Reads the patch header, the embedded prefix and every block header, skipping the block
/// payloads.
pub fn inspect(patch: &mut impl Read) -> Result<PatchInfo> {
    let header = read_header(patch)?;
    let prefix = read_prefix(patch, &header)?;
    let count = max(header.blocks_oldfile.get(), header.blocks_newfile.get());
    let mut blocks = Vec::new();
    for index in 0..count {
        let block = read!(patch, BlockHeader, format!("read header of block {}", index))?;
        check_block(&header, &block, index)?;
        let len = block.payload_len();
        let skipped = io::copy(&mut patch.by_ref().take(len), &mut io::sink())
            .io_context(|| format!("read block {}", index))?;
        if skipped < len {
            return Err(Error::Truncated {
                what: "block payload",
                needed: len,
                available: skipped,
            });
        }
        blocks.push(block);
    }
    Ok(PatchInfo {
        header,
        prefix,
        blocks,
    })
}

/// Rebuilds one MODIFY block from its old block and decompressed sections.
fn replay(old: &[u8], ctrl: &[u8], mut diff: &[u8], mut extra: &[u8], new: &mut Vec<u8>, new_len: usize) -> Result<()> {
    new.clear();
    if ctrl.len() % ControlTriple::SIZE != 0 {
        return Err(Error::Corrupt(format!("ctrl section of {} bytes", ctrl.len())));
    }
    let overrun = || Error::Corrupt("control triple overruns the block".into());

    let mut oldpos: i64 = 0;
    for chunk in ctrl.chunks_exact(ControlTriple::SIZE) {
        let mut buf = [0; ControlTriple::SIZE];
        buf.copy_from_slice(chunk);
        let triple = ControlTriple::from_bytes(&buf)
            .ok_or_else(|| Error::Corrupt("negative length in control triple".into()))?;
        trace!("replay {:?} at new offset {}", triple, new.len());

        let diff_len = usize::try_from(triple.diff).map_err(|_| overrun())?;
        if diff_len > new_len - new.len() || diff_len > diff.len() {
            return Err(overrun());
        }
        let (head, rest) = diff.split_at(diff_len);
        new.extend(head.iter().enumerate().map(|(i, byte)| {
            let pos = oldpos.saturating_add(i as i64);
            if pos >= 0 && pos < old.len() as i64 {
                byte.wrapping_add(old[pos as usize])
            } else {
                *byte
            }
        }));
        diff = rest;
        oldpos = oldpos.saturating_add(diff_len as i64);

        let extra_len = usize::try_from(triple.extra).map_err(|_| overrun())?;
        if extra_len > new_len - new.len() || extra_len > extra.len() {
            return Err(overrun());
        }
        let (head, rest) = extra.split_at(extra_len);
        new.extend_from_slice(head);
        extra = rest;
        oldpos = oldpos.checked_add(triple.seek).ok_or_else(overrun)?;
    }

    if new.len() != new_len || !diff.is_empty() || !extra.is_empty() {
        return Err(Error::Corrupt(format!(
            "control triples produce {} of {} bytes, leaving {} diff and {} extra bytes",
            new.len(),
            new_len,
            diff.len(),
            extra.len()
        )));
    }
    Ok(())
}

/// Applies a patch to the old image and writes the new image data (without the embedded
/// prefix) to `new`.
///
/// The whole-patch CRC is verified before anything is written; each rebuilt block is checked
/// against its own CRC before it is written.
pub fn apply(
    old: &mut (impl Read + Seek),
    new: &mut impl Write,
    patch: &mut (impl Read + Seek),
    config: &Config,
) -> Result<PatchInfo> {
    let mut stored = [0; 4];
    patch
        .seek(SeekFrom::Start(0))
        .and_then(|_| patch.read_exact(&mut stored))
        .io_context(|| "read patch CRC")?;
    let stored = u32::from_le_bytes(stored);
    let computed = crc_of_rest(patch, config.crc_chunk_size).io_context(|| "read patch")?;
    if stored != computed {
        return Err(Error::PatchCrc { stored, computed });
    }
    patch
        .seek(SeekFrom::Start(0))
        .io_context(|| "seek in patch")?;

    let header = read_header(patch)?;
    let prefix = read_prefix(patch, &header)?;

    let old_start = u64::from(header.crc_newfile_size.get()) + u64::from(header.binary_header_size.get());
    let old_total = old.seek(SeekFrom::End(0)).io_context(|| "seek in old image")?;
    let old_len = old_total.checked_sub(old_start).ok_or(Error::Truncated {
        what: "old image",
        needed: old_start,
        available: old_total,
    })?;
    let old_block_size = u64::from(header.blocksize_oldfile.get());

    let count = max(header.blocks_oldfile.get(), header.blocks_newfile.get());
    let mut old_buf = Vec::new();
    let mut new_buf = Vec::new();
    let mut ctrl = Vec::new();
    let mut diff = Vec::new();
    let mut extra = Vec::new();
    let mut section = Vec::new();
    let mut blocks = Vec::new();
    for index in 0..count {
        let block = read!(patch, BlockHeader, format!("read header of block {}", index))?;
        let token = check_block(&header, &block, index)?;
        debug!("applying block {}: {:?}", index, token);

        if token == Token::Skip || token == Token::Modify {
            let start = u64::from(index) * old_block_size;
            let len = min(old_block_size, old_len.saturating_sub(start));
            old.seek(SeekFrom::Start(old_start + start))
                .io_context(|| format!("seek to old block {}", index))?;
            read_section(old, &mut old_buf, len, "old block")?;
        }

        let new_len = block.new_block_size_u.get() as usize;
        match token {
            Token::Skip => {
                new_buf.clear();
                new_buf.extend_from_slice(&old_buf);
            }
            Token::Modify => {
                read_section(patch, &mut section, u64::from(block.size_ctrl_block.get()), "ctrl section")?;
                decompress_into(&mut ctrl, &section).io_context(|| format!("decompress ctrl of block {}", index))?;
                read_section(patch, &mut section, u64::from(block.size_diff_block.get()), "diff section")?;
                decompress_into(&mut diff, &section).io_context(|| format!("decompress diff of block {}", index))?;
                read_section(patch, &mut section, u64::from(block.size_extra_block.get()), "extra section")?;
                decompress_into(&mut extra, &section)
                    .io_context(|| format!("decompress extra of block {}", index))?;
                replay(&old_buf, &ctrl, &diff, &extra, &mut new_buf, new_len)?;
            }
            Token::Add => {
                read_section(patch, &mut section, u64::from(block.size_extra_block.get()), "extra section")?;
                decompress_into(&mut new_buf, &section).io_context(|| format!("decompress block {}", index))?;
            }
            Token::Remove => {
                blocks.push(block);
                continue;
            }
        }

        let computed = crc32fast::hash(&new_buf);
        if new_buf.len() != new_len || computed != block.new_block_crc.get() {
            return Err(Error::BlockCrc {
                index,
                stored: block.new_block_crc.get(),
                computed,
            });
        }
        new.write_all(&new_buf)
            .io_context(|| format!("write block {}", index))?;
        blocks.push(block);
    }

    let mut trailing = [0; 1];
    if patch.read(&mut trailing).io_context(|| "read patch")? != 0 {
        return Err(Error::Corrupt("trailing bytes after the last block".into()));
    }
    Ok(PatchInfo {
        header,
        prefix,
        blocks,
    })
}
