//! gzip framing for patch sections.
use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Appends the gzip stream of `data` to `out` and returns the number of bytes appended.
///
/// An empty input still produces a complete (header-only) stream, so the applier can open
/// every section the same way.
pub fn compress_into(out: &mut Vec<u8>, data: &[u8], level: u32) -> io::Result<usize> {
    let start = out.len();
    let mut encoder = GzEncoder::new(&mut *out, Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()?;
    Ok(out.len() - start)
}

/// Decompresses one whole gzip section into `out`, replacing its contents.
pub fn decompress_into(out: &mut Vec<u8>, section: &[u8]) -> io::Result<()> {
    out.clear();
    GzDecoder::new(section).read_to_end(out)?;
    Ok(())
}
