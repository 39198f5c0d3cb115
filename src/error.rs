use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to {what}")]
    Io {
        what: String,
        #[source]
        source: io::Error,
    },

    #[error("{what} is truncated: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: u64,
        available: u64,
    },

    #[error("compression header declares {declared} bytes but its section table needs {actual}")]
    CompressionHeaderSize { declared: u64, actual: u64 },

    #[error("new image splits into {uncompressed} blocks of {block_size} bytes but the compressed image has {compressed} sections")]
    BlockCount {
        uncompressed: usize,
        compressed: usize,
        block_size: usize,
    },

    #[error("invalid compression section table: {0}")]
    SectionTable(String),

    #[error("signature must be {expected} bytes, got {actual}")]
    SignatureSize { expected: usize, actual: usize },

    #[error("not a block diff patch (bad signature)")]
    Signature,

    #[error("{what} ({value}) does not fit the patch format")]
    TooLarge { what: &'static str, value: u64 },

    #[error("block {found} written out of order, expected block {expected}")]
    BlockOrder { expected: u32, found: u32 },

    #[error("patch CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    PatchCrc { stored: u32, computed: u32 },

    #[error("block {index} CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    BlockCrc { index: u32, stored: u32, computed: u32 },

    #[error("unknown block token {0}")]
    UnknownToken(u32),

    #[error("invalid configuration: {0}")]
    Config(&'static str),

    #[error("corrupt patch: {0}")]
    Corrupt(String),
}

/// Attaches a description of the failed operation to an I/O error.
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, what: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<F, S>(self, what: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| Error::Io {
            what: what().into(),
            source,
        })
    }
}
