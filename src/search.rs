use std::cmp::Ordering;

/// Length of the common prefix of `a` and `b`.
pub(crate) fn match_len(a: &[u8], b: &[u8]) -> usize {
	a.iter().zip(b.iter()).take_while(|(old, new)| old == new).count()
}

/// Compares lexicographically the common part of these slices, i.e. takes the smallest length
/// and compares within that.
fn r_memcmp(a: &[u8], b: &[u8]) -> Ordering {
	let len = a.len().min(b.len());
	a[..len].cmp(&b[..len])
}

/// Finds the longest prefix of `new` that occurs in `old`.
///
/// `sorted` is the suffix array of `old` and `[st, en]` the inclusive range of it to
/// search; pass `0` and `old.len()` to search everything. Returns the match length and its
/// offset in `old`.
pub fn search(sorted: &[isize], old: &[u8], new: &[u8], mut st: usize, mut en: usize) -> (usize, usize) {
	while en - st >= 2 {
		let x = st + (en - st) / 2;
		if r_memcmp(&old[sorted[x] as usize..], new) == Ordering::Less {
			st = x;
		} else {
			en = x;
		}
	}

	let x = match_len(&old[sorted[st] as usize..], new);
	let y = match_len(&old[sorted[en] as usize..], new);
	if x > y {
		(x, sorted[st] as usize)
	} else {
		(y, sorted[en] as usize)
	}
}
