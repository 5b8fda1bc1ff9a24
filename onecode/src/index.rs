//! Object and group index (spec.md §4.6): per-object byte offsets and
//! per-group starting object numbers, plus `goto_object`/`goto_group`.
//!
//! Random access reads the underlying file through [`sync_file::ReadAt`]
//! rather than `Seek` + `Read`, the same convention the teacher crate uses
//! for its stream directory lookups — an index lookup must not disturb a
//! shared file position that a concurrent peer may be relying on.

use crate::error::OneError;
use sync_file::ReadAt;

/// Object-offset table plus group-start table, built while writing and
/// consulted while reading.
#[derive(Clone, Debug, Default)]
pub struct Index {
    /// `object_offsets[i]` is the byte offset of object `i`'s defining line.
    object_offsets: Vec<i64>,
    /// `group_starts[i]` is the object number at which group `i` begins;
    /// a trailing sentinel equal to the final object count is appended at
    /// close (spec.md §3 "Relationships and invariants").
    group_starts: Vec<i64>,
}

impl Index {
    pub fn new() -> Self {
        Index::default()
    }

    /// Records the current object's defining-line offset. Called once per
    /// object-type line written.
    pub fn record_object(&mut self, offset: i64) {
        self.object_offsets.push(offset);
    }

    /// Records a group boundary: the object number at which the new group
    /// begins (i.e. the object count *before* this group-line's own
    /// object, if any, is counted).
    pub fn record_group_start(&mut self, object_count_so_far: i64) {
        self.group_starts.push(object_count_so_far);
    }

    pub fn object_count(&self) -> i64 {
        self.object_offsets.len() as i64
    }

    pub fn group_count(&self) -> i64 {
        self.group_starts.len() as i64
    }

    /// The object-index as an `INT_LIST`, ready for `&`-line emission.
    pub fn object_offsets(&self) -> &[i64] {
        &self.object_offsets
    }

    /// The group-index as an `INT_LIST` with its trailing sentinel
    /// (`final object count`) appended, ready for `*`-line emission.
    pub fn group_index_with_sentinel(&self) -> Vec<i64> {
        let mut v = self.group_starts.clone();
        v.push(self.object_count());
        v
    }

    /// Appends `other`'s entries to this index, shifting `other`'s byte
    /// offsets by `byte_delta` (the length of this index's data written so
    /// far) and its group-start object numbers by this index's current
    /// object count. Used when a threaded write concatenates a slave
    /// peer's temp file onto the master's output (spec.md §4.7).
    pub(crate) fn merge_shifted(&mut self, other: &Index, byte_delta: i64) {
        let object_base = self.object_count();
        for &off in &other.object_offsets {
            self.object_offsets.push(off + byte_delta);
        }
        for &g in &other.group_starts {
            self.group_starts.push(g + object_base);
        }
    }

    pub fn from_parts(object_offsets: Vec<i64>, group_starts_with_sentinel: Vec<i64>) -> Self {
        let group_starts = if group_starts_with_sentinel.is_empty() {
            Vec::new()
        } else {
            group_starts_with_sentinel[..group_starts_with_sentinel.len() - 1].to_vec()
        };
        Index {
            object_offsets,
            group_starts,
        }
    }

    /// `gotoObject(i)` (spec.md §4.6): bounds-checks `i` against the given
    /// object count and returns the byte offset to seek to.
    pub fn goto_object(&self, i: i64) -> anyhow::Result<i64> {
        if i < 0 || i as usize >= self.object_offsets.len() {
            anyhow::bail!(OneError::Protocol(format!(
                "goto_object({i}): out of range (0..{})",
                self.object_offsets.len()
            )));
        }
        Ok(self.object_offsets[i as usize])
    }

    /// `gotoGroup(i)`: returns `(seek offset, group size in objects)`, the
    /// size being `groupIndex[i+1] - groupIndex[i]`.
    pub fn goto_group(&self, i: i64) -> anyhow::Result<(i64, i64)> {
        let sentineled = self.group_index_with_sentinel();
        if i < 0 || (i as usize) + 1 >= sentineled.len() {
            anyhow::bail!(OneError::Protocol(format!(
                "goto_group({i}): out of range (0..{})",
                sentineled.len().saturating_sub(1)
            )));
        }
        let start_obj = sentineled[i as usize];
        let size = sentineled[i as usize + 1] - start_obj;
        let offset = self.goto_object(start_obj)?;
        Ok((offset, size))
    }
}

/// Reads `len` bytes at `offset` from a random-access file handle without
/// touching any shared cursor — the mechanism `goto_object`/`goto_group`
/// rely on when multiple reader peers share one open file.
pub fn read_at_exact<F: ReadAt>(file: &F, offset: u64, len: usize) -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            anyhow::bail!(OneError::Resource(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read while resolving a goto_object/goto_group offset",
            )));
        }
        filled += n;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_e_goto_object() {
        let mut idx = Index::new();
        for i in 0..100i64 {
            idx.record_object(i * 10);
        }
        assert_eq!(idx.object_count(), 100);
        assert_eq!(idx.goto_object(42).unwrap(), 420);
        assert!(idx.goto_object(100).is_err());
    }

    #[test]
    fn scenario_f_goto_group() {
        // g "A", S, S, S, g "B", S, S — groups start at object 0 and 3.
        let mut idx = Index::new();
        idx.record_group_start(0);
        for i in 0..3 {
            idx.record_object(i);
        }
        idx.record_group_start(3);
        for i in 3..5 {
            idx.record_object(i);
        }
        assert_eq!(idx.goto_group(0).unwrap().1, 3);
        assert_eq!(idx.goto_group(1).unwrap().1, 2);
        assert!(idx.goto_group(2).is_err());
    }

    #[test]
    fn roundtrips_through_from_parts() {
        let mut idx = Index::new();
        idx.record_object(0);
        idx.record_object(10);
        idx.record_group_start(0);
        idx.record_object(20);

        let offsets = idx.object_offsets().to_vec();
        let groups = idx.group_index_with_sentinel();
        let rebuilt = Index::from_parts(offsets, groups);
        assert_eq!(rebuilt.object_count(), idx.object_count());
        assert_eq!(rebuilt.goto_group(0).unwrap(), idx.goto_group(0).unwrap());
    }
}
