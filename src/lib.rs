//! Block-wise bsdiff patch generation for firmware-over-the-air updates.
//!
//! The old and new images are cut into blocks of at most [`Config::block_size`] bytes and
//! each block pair is diffed on its own, so memory stays proportional to one block no matter
//! how large the images are. The resulting patch is meant to be applied on the device one
//! block at a time; [`apply`] is a host-side implementation of that contract.
use std::convert::TryFrom;
use std::fmt;

use byteorder::LittleEndian;
use zerocopy::{AsBytes, FromBytes, Unaligned, U32};

pub use block::{Generator, Inputs, Mode, Summary};
pub use config::Config;
pub use diff::{ControlTriple, Delta};
pub use error::{Error, Result};
pub use image::{CompressionHeader, ImagePrefix};
pub use patch::{apply, inspect, PatchInfo};
pub use qsufsort::SuffixSorter;
pub use search::search;
pub use writer::{PatchWriter, Payload};

pub mod block;
pub mod compress;
pub mod config;
mod diff;
mod error;
pub mod image;
mod patch;
mod qsufsort;
mod search;
mod writer;

/// Signature stored in every patch header.
pub const SIGNATURE: &[u8; 8] = b"BLCKDIFF";

/// `old_file_compression_format` value for images without a compression container.
pub const COMPRESSION_FORMAT_NONE: u32 = 0;

#[derive(Debug, Copy, Clone, Default, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct PatchHeader {
    /// CRC32 over every patch byte that follows this field.
    pub crc_patchfile: U32<LittleEndian>,
    pub signature: [u8; 8],
    pub old_file_compression_format: U32<LittleEndian>,
    pub blocks_newfile: U32<LittleEndian>,
    pub blocks_oldfile: U32<LittleEndian>,
    pub blocksize_newfile: U32<LittleEndian>,
    pub blocksize_oldfile: U32<LittleEndian>,
    pub crc_newfile_size: U32<LittleEndian>,
    pub binary_header_size: U32<LittleEndian>,
    pub comp_header_size: U32<LittleEndian>,
}

impl PatchHeader {
    pub const SIZE: usize = std::mem::size_of::<PatchHeader>();

    /// Length of the embedded new-image prefix (CRC, binary header, compression header).
    pub fn prefix_len(&self) -> u64 {
        u64::from(self.crc_newfile_size.get())
            + u64::from(self.binary_header_size.get())
            + u64::from(self.comp_header_size.get())
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct BlockHeader {
    pub block_number: U32<LittleEndian>,
    pub token: U32<LittleEndian>,
    pub new_block_size_c: U32<LittleEndian>,
    pub new_block_size_u: U32<LittleEndian>,
    pub new_block_crc: U32<LittleEndian>,
    pub size_ctrl_block: U32<LittleEndian>,
    pub size_diff_block: U32<LittleEndian>,
    pub size_extra_block: U32<LittleEndian>,
}

impl BlockHeader {
    pub const SIZE: usize = std::mem::size_of::<BlockHeader>();

    pub fn new(index: u32, token: Token) -> Self {
        BlockHeader {
            block_number: U32::new(index),
            token: U32::new(token as u32),
            ..Default::default()
        }
    }

    /// Number of payload bytes following this header.
    pub fn payload_len(&self) -> u64 {
        u64::from(self.size_ctrl_block.get())
            + u64::from(self.size_diff_block.get())
            + u64::from(self.size_extra_block.get())
    }

    pub fn token(&self) -> Result<Token> {
        Token::try_from(self.token.get())
    }
}

/// How the applier reconstructs one block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum Token {
    /// Old block is copied unchanged.
    Skip = 0,
    /// Old block is patched with ctrl/diff/extra sections.
    Modify = 1,
    /// New block is stored compressed; there is no old counterpart.
    Add = 2,
    /// Old block has no new counterpart.
    Remove = 3,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Token::Skip => "SKIP",
            Token::Modify => "MODIFY",
            Token::Add => "ADD",
            Token::Remove => "REMOVE",
        })
    }
}

impl TryFrom<u32> for Token {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Token::Skip),
            1 => Ok(Token::Modify),
            2 => Ok(Token::Add),
            3 => Ok(Token::Remove),
            other => Err(Error::UnknownToken(other)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_sizes() {
        assert_eq!(PatchHeader::SIZE, 44);
        assert_eq!(BlockHeader::SIZE, 32);
    }

    #[test]
    fn block_header_is_little_endian() {
        let mut header = BlockHeader::new(2, Token::Add);
        header.size_extra_block = U32::new(0x0102_0304);
        let bytes = header.as_bytes();
        assert_eq!(&bytes[0..4], &[2, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[2, 0, 0, 0]);
        assert_eq!(&bytes[28..32], &[4, 3, 2, 1]);
        assert_eq!(header.payload_len(), 0x0102_0304);
    }

    #[test]
    fn tokens() {
        for token in &[Token::Skip, Token::Modify, Token::Add, Token::Remove] {
            assert_eq!(Token::try_from(*token as u32).unwrap(), *token);
        }
        assert!(matches!(Token::try_from(4), Err(Error::UnknownToken(4))));
        assert_eq!(Token::Remove.to_string(), "REMOVE");
    }
}
