//! Build-time configuration.
//!
//! These values are baked into the tool and the device-side applier alike, so they are not
//! exposed as command line flags. The library takes a [`Config`] so that tests can run with
//! small blocks.

/// Size of one diffing unit for images without a compression container.
pub const BLOCK_SIZE: usize = 4096;

/// Chunk size used when checksumming the finished patch.
pub const CRC_CHUNK_SIZE: usize = 4096;

/// Length of the binary header that follows the CRC field of an image.
pub const BINARY_HEADER_SIZE: usize = 32;

/// gzip level used for every patch section.
pub const COMPRESSION_LEVEL: u32 = 6;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    /// Block size for images without a compression container; compressed images use the
    /// block size of their container.
    pub block_size: usize,
    pub crc_chunk_size: usize,
    pub binary_header_size: usize,
    pub compression_level: u32,
    /// Written into every patch header; must be exactly as long as the header field.
    pub signature: &'static [u8],
}

impl Default for Config {
    fn default() -> Self {
        Config {
            block_size: BLOCK_SIZE,
            crc_chunk_size: CRC_CHUNK_SIZE,
            binary_header_size: BINARY_HEADER_SIZE,
            compression_level: COMPRESSION_LEVEL,
            signature: crate::SIGNATURE,
        }
    }
}
