//! Larsson–Sadakane suffix sorting.
//!
//! `sa` receives the ranking of all `n + 1` suffixes of the input, the empty suffix at
//! offset `n` first. While sorting, a negative entry `-k` in `sa` marks a run of `k`
//! suffixes whose order is already final; `rank` holds for every suffix the index of the
//! last entry of its group.

/// Groups shorter than this are refined by direct selection instead of partitioning.
const SMALL_GROUP: usize = 16;

enum Task {
	Split { start: usize, len: usize },
	/// Assign the group `[lo, hi)` produced by a partition its final rank.
	Settle { lo: usize, hi: usize },
}

/// Reusable suffix sorting workspace, sized once for the largest block.
pub struct SuffixSorter {
	sa: Vec<isize>,
	rank: Vec<isize>,
	tasks: Vec<Task>,
}

impl SuffixSorter {
	pub fn with_capacity(block_size: usize) -> Self {
		SuffixSorter {
			sa: Vec::with_capacity(block_size + 1),
			rank: Vec::with_capacity(block_size + 1),
			tasks: Vec::new(),
		}
	}

	/// Sorts the suffixes of `old` and returns the suffix array (length `old.len() + 1`).
	pub fn sort(&mut self, old: &[u8]) -> &[isize] {
		self.sa.clear();
		self.sa.resize(old.len() + 1, 0);
		self.rank.clear();
		self.rank.resize(old.len() + 1, 0);
		sort_into(&mut self.sa, &mut self.rank, old, &mut self.tasks);
		&self.sa
	}
}

/// Sorts the suffixes of `old` into `sa`, using `rank` as scratch space. Both slices must
/// hold `old.len() + 1` entries.
#[cfg(test)]
pub(crate) fn qsufsort(sa: &mut [isize], rank: &mut [isize], old: &[u8]) {
	sort_into(sa, rank, old, &mut Vec::new());
}

fn sort_into(sa: &mut [isize], rank: &mut [isize], old: &[u8], tasks: &mut Vec<Task>) {
	let n = old.len();
	assert_eq!(sa.len(), n + 1, "suffix array must hold the sentinel suffix");
	assert_eq!(rank.len(), n + 1, "rank array must hold the sentinel suffix");

	let mut buckets = [0isize; 256];
	for &byte in old {
		buckets[byte as usize] += 1;
	}
	for i in 1..256 {
		buckets[i] += buckets[i - 1];
	}
	for i in (1..256).rev() {
		buckets[i] = buckets[i - 1];
	}
	buckets[0] = 0;
	// buckets[c] is now the number of bytes smaller than c

	for (i, &byte) in old.iter().enumerate() {
		buckets[byte as usize] += 1;
		sa[buckets[byte as usize] as usize] = i as isize;
	}
	sa[0] = n as isize;
	for (i, &byte) in old.iter().enumerate() {
		rank[i] = buckets[byte as usize];
	}
	rank[n] = 0;
	for i in 1..256 {
		if buckets[i] == buckets[i - 1] + 1 {
			sa[buckets[i] as usize] = -1;
		}
	}
	sa[0] = -1;

	let end = n as isize + 1;
	let mut h = 1;
	while sa[0] != -end {
		let mut len = 0isize;
		let mut i = 0isize;
		while i < end {
			let entry = sa[i as usize];
			if entry < 0 {
				len -= entry;
				i -= entry;
			} else {
				if len != 0 {
					sa[(i - len) as usize] = -len;
				}
				len = rank[entry as usize] + 1 - i;
				split(sa, rank, i as usize, len as usize, h, tasks);
				i += len;
				len = 0;
			}
		}
		if len != 0 {
			sa[(i - len) as usize] = -len;
		}
		h += h;
	}

	for i in 0..=n {
		sa[rank[i] as usize] = i as isize;
	}
}

/// Refines the group `sa[start..start + len]` by the rank `h` positions further on.
///
/// Runs the partition recursion off an explicit stack. Left parts are finished before their
/// middle group is settled and before the right part is started, so ranks are updated in
/// the same order as the recursive formulation.
fn split(sa: &mut [isize], rank: &mut [isize], start: usize, len: usize, h: usize, tasks: &mut Vec<Task>) {
	tasks.clear();
	tasks.push(Task::Split { start, len });
	while let Some(task) = tasks.pop() {
		match task {
			Task::Split { start, len } if len < SMALL_GROUP => select_groups(sa, rank, start, len, h),
			Task::Split { start, len } => {
				let (lo, hi) = partition(sa, rank, start, len, h);
				if start + len > hi {
					tasks.push(Task::Split { start: hi, len: start + len - hi });
				}
				tasks.push(Task::Settle { lo, hi });
				if lo > start {
					tasks.push(Task::Split { start, len: lo - start });
				}
			}
			Task::Settle { lo, hi } => {
				for i in lo..hi {
					rank[sa[i] as usize] = hi as isize - 1;
				}
				if lo == hi - 1 {
					sa[lo] = -1;
				}
			}
		}
	}
}

#[inline]
fn key(sa: &[isize], rank: &[isize], k: usize, h: usize) -> isize {
	rank[sa[k] as usize + h]
}

/// Repeatedly moves the entries with the smallest key to the front of the range and closes
/// them off as a group.
fn select_groups(sa: &mut [isize], rank: &mut [isize], start: usize, len: usize, h: usize) {
	let end = start + len;
	let mut k = start;
	while k < end {
		let mut j = 1;
		let mut x = key(sa, rank, k, h);
		for i in 1..end - k {
			let v = key(sa, rank, k + i, h);
			if v < x {
				x = v;
				j = 0;
			}
			if v == x {
				sa.swap(k + j, k + i);
				j += 1;
			}
		}
		for i in 0..j {
			rank[sa[k + i] as usize] = (k + j - 1) as isize;
		}
		if j == 1 {
			sa[k] = -1;
		}
		k += j;
	}
}

/// Three-way partition around the key of the middle entry. Returns the bounds of the
/// "equal" run.
fn partition(sa: &mut [isize], rank: &[isize], start: usize, len: usize, h: usize) -> (usize, usize) {
	let x = key(sa, rank, start + len / 2, h);
	let mut less = 0;
	let mut equal = 0;
	for k in start..start + len {
		let v = key(sa, rank, k, h);
		if v < x {
			less += 1;
		}
		if v == x {
			equal += 1;
		}
	}
	let lo = start + less;
	let hi = lo + equal;

	let mut i = start;
	let mut j = 0;
	let mut k = 0;
	while i < lo {
		let v = key(sa, rank, i, h);
		if v < x {
			i += 1;
		} else if v == x {
			sa.swap(i, lo + j);
			j += 1;
		} else {
			sa.swap(i, hi + k);
			k += 1;
		}
	}
	while lo + j < hi {
		if key(sa, rank, lo + j, h) == x {
			j += 1;
		} else {
			sa.swap(lo + j, hi + k);
			k += 1;
		}
	}
	(lo, hi)
}
