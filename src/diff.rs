use byteorder::{ByteOrder, LittleEndian};
use log::trace;

use crate::qsufsort::SuffixSorter;
use crate::search::search;

/// A fresh match must beat the current alignment by more than this many bytes to be taken.
const FUZZ: isize = 8;

/// One replay instruction: add `diff` old bytes to diff bytes, append `extra` literal bytes,
/// then move the old cursor by `seek`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ControlTriple {
	pub diff: u64,
	pub extra: u64,
	pub seek: i64,
}

impl ControlTriple {
	pub const SIZE: usize = 24;

	pub fn to_bytes(&self) -> [u8; Self::SIZE] {
		let mut buf = [0; Self::SIZE];
		LittleEndian::write_u64(&mut buf[0..8], offtout(self.diff as i64));
		LittleEndian::write_u64(&mut buf[8..16], offtout(self.extra as i64));
		LittleEndian::write_u64(&mut buf[16..24], offtout(self.seek));
		buf
	}

	/// Decodes a triple; returns `None` if a length field is negative.
	pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Option<Self> {
		let diff = offtin(LittleEndian::read_u64(&buf[0..8]));
		let extra = offtin(LittleEndian::read_u64(&buf[8..16]));
		let seek = offtin(LittleEndian::read_u64(&buf[16..24]));
		if diff < 0 || extra < 0 {
			return None;
		}
		Some(ControlTriple {
			diff: diff as u64,
			extra: extra as u64,
			seek,
		})
	}
}

/// Sign-magnitude encoding: bit 63 carries the sign, the rest the magnitude.
fn offtout(x: i64) -> u64 {
	if x < 0 {
		x.unsigned_abs() | 1 << 63
	} else {
		x as u64
	}
}

fn offtin(x: u64) -> i64 {
	let magnitude = (x & !(1 << 63)) as i64;
	if x & 1 << 63 != 0 {
		-magnitude
	} else {
		magnitude
	}
}

/// Delta of one old/new block pair, split into the uncompressed ctrl, diff and extra
/// streams. The buffers are kept between blocks.
pub struct Delta {
	sorter: SuffixSorter,
	ctrl: Vec<u8>,
	diff: Vec<u8>,
	extra: Vec<u8>,
}

impl Delta {
	pub fn with_capacity(block_size: usize) -> Self {
		Delta {
			sorter: SuffixSorter::with_capacity(block_size),
			ctrl: Vec::new(),
			diff: Vec::with_capacity(block_size),
			extra: Vec::with_capacity(block_size),
		}
	}

	pub fn ctrl(&self) -> &[u8] {
		&self.ctrl
	}

	pub fn diff(&self) -> &[u8] {
		&self.diff
	}

	pub fn extra(&self) -> &[u8] {
		&self.extra
	}

	/// Decodes the ctrl stream; `None` stands for a triple that does not decode.
	#[cfg(test)]
	pub(crate) fn triples(&self) -> impl Iterator<Item = Option<ControlTriple>> + '_ {
		self.ctrl.chunks_exact(ControlTriple::SIZE).map(|chunk| {
			let mut buf = [0; ControlTriple::SIZE];
			buf.copy_from_slice(chunk);
			ControlTriple::from_bytes(&buf)
		})
	}

	/// Computes the streams that turn `old` into `new`.
	pub fn compute(&mut self, old: &[u8], new: &[u8]) {
		self.ctrl.clear();
		self.diff.clear();
		self.extra.clear();
		if new.is_empty() {
			return;
		}

		let sorted = self.sorter.sort(old);
		let old_len = old.len() as isize;
		let new_len = new.len() as isize;
		// whether the bytes at these positions agree, treating positions outside `old` as a miss
		let agrees = |old_pos: isize, new_pos: isize| {
			old_pos >= 0 && old_pos < old_len && old[old_pos as usize] == new[new_pos as usize]
		};

		let mut scan = 0;
		let mut len = 0;
		let mut pos = 0;
		let mut lastoffset = 0;
		let mut lastscan = 0;
		let mut lastpos = 0;
		while scan < new_len {
			let mut oldscore: isize = 0;
			scan += len;
			let mut scsc = scan;
			while scan < new_len {
				let (found_len, found_pos) = search(sorted, old, &new[scan as usize..], 0, old.len());
				len = found_len as isize;
				pos = found_pos as isize;

				while scsc < scan + len {
					if agrees(scsc + lastoffset, scsc) {
						oldscore += 1;
					}
					scsc += 1;
				}

				if (len == oldscore && len != 0) || len > oldscore + FUZZ {
					break;
				}

				if agrees(scan + lastoffset, scan) {
					oldscore -= 1;
				}

				scan += 1;
			}

			if len != oldscore || scan == new_len {
				let mut s = 0;
				let mut s_f = 0;
				let mut lenf = 0;
				let mut i = 0;
				while (lastscan + i < scan) && (lastpos + i < old_len) {
					if old[(lastpos + i) as usize] == new[(lastscan + i) as usize] {
						s += 1;
					}
					i += 1;
					if s * 2 - i > s_f * 2 - lenf {
						s_f = s;
						lenf = i;
					}
				}

				let mut lenb = 0;
				if scan < new_len {
					let mut s = 0;
					let mut s_b = 0;
					i = 1;
					while (scan >= lastscan + i) && (pos >= i) {
						if old[(pos - i) as usize] == new[(scan - i) as usize] {
							s += 1;
						}
						if s * 2 - i > s_b * 2 - lenb {
							s_b = s;
							lenb = i;
						}
						i += 1;
					}
				}

				if lastscan + lenf > scan - lenb {
					let overlap = (lastscan + lenf) - (scan - lenb);
					let mut s = 0;
					let mut s_s = 0;
					let mut lens = 0;
					for i in 0..overlap {
						if new[(lastscan + lenf - overlap + i) as usize]
							== old[(lastpos + lenf - overlap + i) as usize]
						{
							s += 1;
						}
						if new[(scan - lenb + i) as usize] == old[(pos - lenb + i) as usize] {
							s -= 1;
						}
						if s > s_s {
							s_s = s;
							lens = i + 1;
						}
					}
					lenf += lens - overlap;
					lenb -= lens;
				}

				let extra_len = (scan - lenb) - (lastscan + lenf);
				debug_assert!(lenf >= 0 && extra_len >= 0);
				let triple = ControlTriple {
					diff: lenf as u64,
					extra: extra_len as u64,
					seek: ((pos - lenb) - (lastpos + lenf)) as i64,
				};
				trace!("ctrl {:?} at new offset {}", triple, lastscan);
				self.ctrl.extend_from_slice(&triple.to_bytes());
				self.diff.extend(
					new[lastscan as usize..(lastscan + lenf) as usize]
						.iter()
						.zip(&old[lastpos as usize..(lastpos + lenf) as usize])
						.map(|(new, old)| new.wrapping_sub(*old)),
				);
				self.extra
					.extend_from_slice(&new[(lastscan + lenf) as usize..(scan - lenb) as usize]);

				lastscan = scan - lenb;
				lastpos = pos - lenb;
				lastoffset = pos - scan;
			}
		}
	}
}
