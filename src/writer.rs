//! Patch assembly.
//!
//! The patch header is reserved up front and written last. Blocks are appended strictly in
//! index order: each block's sections are compressed into a scratch buffer first, so its
//! header goes out with final sizes and the output never has to be rewound per block.
use std::io::{Read, Seek, SeekFrom, Write};

use zerocopy::{AsBytes, U32};

use crate::compress::compress_into;
use crate::error::{IoContext, Result};
use crate::image::{crc_of_rest, wire_u32, ImagePrefix};
use crate::{BlockHeader, Config, Error, PatchHeader};

/// Size of the `crc_patchfile` field, which the whole-patch CRC skips.
const CRC_FIELD: u64 = 4;

/// What follows a block header.
pub enum Payload<'a> {
    None,
    /// Uncompressed ctrl, diff and extra streams of a MODIFY block.
    Delta {
        ctrl: &'a [u8],
        diff: &'a [u8],
        extra: &'a [u8],
    },
    /// Uncompressed contents of an ADD block.
    Literal(&'a [u8]),
}

pub struct PatchWriter<W> {
    out: W,
    config: Config,
    payload: Vec<u8>,
    next_block: u32,
    /// Bytes written so far; the output may extend past this from earlier contents.
    len: u64,
}

impl<W: Read + Write + Seek> PatchWriter<W> {
    /// Reserves the patch header and writes the embedded new-image prefix after it.
    ///
    /// The patch is written from offset 0. Anything `out` already holds beyond the finished
    /// patch is left in place and excluded from the length and CRC returned by [`finish`].
    ///
    /// [`finish`]: PatchWriter::finish
    pub fn create(mut out: W, prefix: &ImagePrefix, config: &Config) -> Result<Self> {
        out.seek(SeekFrom::Start(0))
            .and_then(|_| out.write_all(&[0; PatchHeader::SIZE]))
            .and_then(|_| prefix.write_to(&mut out))
            .io_context(|| "write patch prefix")?;
        Ok(PatchWriter {
            out,
            config: *config,
            payload: Vec::with_capacity(config.block_size),
            next_block: 0,
            len: PatchHeader::SIZE as u64 + prefix.len(),
        })
    }

    /// Appends one block. Section sizes in `header` are filled in from `payload`; the
    /// completed header is returned.
    pub fn write_block(&mut self, mut header: BlockHeader, payload: Payload<'_>) -> Result<BlockHeader> {
        let index = header.block_number.get();
        if index != self.next_block {
            return Err(Error::BlockOrder {
                expected: self.next_block,
                found: index,
            });
        }

        self.payload.clear();
        let level = self.config.compression_level;
        let (ctrl, diff, extra) = match payload {
            Payload::None => (0, 0, 0),
            Payload::Delta { ctrl, diff, extra } => {
                let what = || format!("compress block {}", index);
                let ctrl = compress_into(&mut self.payload, ctrl, level).io_context(what)?;
                let diff = compress_into(&mut self.payload, diff, level).io_context(what)?;
                let extra = compress_into(&mut self.payload, extra, level).io_context(what)?;
                (ctrl, diff, extra)
            }
            Payload::Literal(data) => {
                let extra = compress_into(&mut self.payload, data, level)
                    .io_context(|| format!("compress block {}", index))?;
                (0, 0, extra)
            }
        };
        header.size_ctrl_block = U32::new(wire_u32("ctrl section size", ctrl as u64)?);
        header.size_diff_block = U32::new(wire_u32("diff section size", diff as u64)?);
        header.size_extra_block = U32::new(wire_u32("extra section size", extra as u64)?);

        self.out
            .write_all(header.as_bytes())
            .and_then(|_| self.out.write_all(&self.payload))
            .io_context(|| format!("write block {}", index))?;
        self.next_block += 1;
        self.len += (BlockHeader::SIZE + self.payload.len()) as u64;
        Ok(header)
    }

    /// Writes the final patch header, then checksums everything after its CRC field and
    /// stores the result. Returns the output, the CRC and the patch length.
    pub fn finish(mut self, mut header: PatchHeader) -> Result<(W, u32, u64)> {
        let signature = self.config.signature;
        if signature.len() != header.signature.len() {
            return Err(Error::SignatureSize {
                expected: header.signature.len(),
                actual: signature.len(),
            });
        }
        header.signature.copy_from_slice(signature);
        header.crc_patchfile = U32::new(0);

        let len = self.len;
        self.out
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.out.write_all(header.as_bytes()))
            .and_then(|_| self.out.flush())
            .io_context(|| "write patch header")?;

        self.out
            .seek(SeekFrom::Start(CRC_FIELD))
            .io_context(|| "seek in patch file")?;
        let crc = crc_of_rest(&mut Read::take(&mut self.out, len - CRC_FIELD), self.config.crc_chunk_size)
            .io_context(|| "read back patch file")?;
        self.out
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.out.write_all(&crc.to_le_bytes()))
            .and_then(|_| self.out.flush())
            .io_context(|| "write patch CRC")?;
        Ok((self.out, crc, len))
    }
}
