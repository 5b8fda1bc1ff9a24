//! Per-line-type runtime state, matching `VGPlib.h`'s `Counts`/`LineInfo`
//! structs field-for-field (spec.md §3, §4.4, §4.5).

use crate::codec::Codec;
use crate::field::FieldType;
use crate::schema::LineTypeSpec;

/// `{count, max, total, groupCount, groupTotal}` — "max"/"total" are
/// meaningful only for list-bearing line-types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub count: i64,
    pub max: i64,
    pub total: i64,
    pub group_count: i64,
    pub group_total: i64,
}

impl Counts {
    /// Combines another peer's counts into this one, for a threaded
    /// writer's close-time merge (spec.md §4.7 "finalize combines counts
    /// before footer emission"): line/list totals add, `max`-shaped fields
    /// take the larger of the two.
    pub(crate) fn merge(&mut self, other: &Counts) {
        self.count += other.count;
        self.total += other.total;
        self.max = self.max.max(other.max);
        self.group_count = self.group_count.max(other.group_count);
        self.group_total = self.group_total.max(other.group_total);
    }
}

/// Runtime bookkeeping for one line-type symbol within an open file: running
/// counts, the header-declared counts to check on finalize, the default list
/// buffer, codec handles, and the group-accounting snapshot fields
/// (`oCount`/`oTotal`/`gCount`/`gTotal` in the original).
///
/// `Clone` exists so a threaded reader peer can adopt the master's trained
/// codecs (spec.md §4.7) without retraining them itself.
#[derive(Clone)]
pub struct LineInfo {
    pub spec: LineTypeSpec,

    pub accum: Counts,
    pub given: Counts,

    /// Snapshot of `accum` at the start of the current group (or, before the
    /// first group-line, unused — `o_count`/`o_total` hold the orphan prefix
    /// instead).
    g_count: i64,
    g_total: i64,
    /// Counts accumulated before the first group-line was seen, preserved so
    /// a threaded write's orphan prefix survives the master/slave merge.
    pub o_count: i64,
    pub o_total: i64,

    /// The default list buffer for this line-type; read-line fills it when
    /// the caller passes no buffer of its own, write-line reads from it the
    /// same way.
    buffer: Vec<u8>,
    is_user_buf: bool,

    pub field_codec: Option<Codec>,
    pub list_codec: Option<Codec>,
    pub is_use_field_codec: bool,
    pub is_use_list_codec: bool,
    /// True exactly when the list field is `INT_LIST` — difference-encoding
    /// applies only there.
    pub is_int_list_diff: bool,

    /// Bytes queued for this thread's local codec since the last merge into
    /// the master (`fieldTack`/`listTack` in the original).
    field_tack: Vec<u8>,
    list_tack: Vec<u8>,
}

impl LineInfo {
    pub fn new(spec: LineTypeSpec) -> Self {
        let list_field_type = spec.list_field.map(|i| spec.fields[i]);
        let is_int_list_diff = matches!(list_field_type, Some(FieldType::IntList));

        let field_codec = if spec.compressed {
            Some(Codec::new_huffman())
        } else {
            None
        };
        let list_codec = match list_field_type {
            Some(FieldType::Dna) => Some(Codec::Dna),
            Some(_) => Some(Codec::new_huffman()),
            None => None,
        };

        LineInfo {
            spec,
            accum: Counts::default(),
            given: Counts::default(),
            g_count: 0,
            g_total: 0,
            o_count: 0,
            o_total: 0,
            buffer: Vec::new(),
            is_user_buf: false,
            field_codec,
            list_codec,
            is_use_field_codec: false,
            is_use_list_codec: false,
            is_int_list_diff,
            field_tack: Vec::new(),
            list_tack: Vec::new(),
        }
    }

    pub fn symbol(&self) -> char {
        self.spec.symbol
    }

    pub fn has_list(&self) -> bool {
        self.spec.list_field.is_some()
    }

    /// Records one read or written line, updating `accum` per spec.md §4.5:
    /// count always increments; for list-bearing types, `total` accumulates
    /// and `max` tracks the largest list length seen.
    pub fn record_line(&mut self, list_len: Option<i64>) {
        self.accum.count += 1;
        if let Some(len) = list_len {
            self.accum.total += len;
            if len > self.accum.max {
                self.accum.max = len;
            }
        }
    }

    /// Called for every user line-type whenever the file's `groupType` line
    /// is written/read (or at finalize, for the final open group), per
    /// spec.md §4.5's propagation rule. `in_group` is the FileState's
    /// "has at least one group-line been seen yet" flag, evaluated *before*
    /// this call.
    pub fn on_group_boundary(&mut self, in_group: bool) {
        if in_group {
            let dcount = self.accum.count - self.g_count;
            let dtotal = self.accum.total - self.g_total;
            if dcount > self.accum.group_count {
                self.accum.group_count = dcount;
            }
            if dtotal > self.accum.group_total {
                self.accum.group_total = dtotal;
            }
        } else {
            self.o_count = self.accum.count;
            self.o_total = self.accum.total;
        }
        self.g_count = self.accum.count;
        self.g_total = self.accum.total;
    }

    /// Folds another peer's accumulated counts into this one (threaded
    /// write close-time merge, spec.md §4.7).
    pub(crate) fn merge_accum_from(&mut self, other: &Counts) {
        self.accum.merge(other);
    }

    /// True once `accum == given` for every field that the header declared
    /// (spec.md §8 invariant, checked at finalize).
    pub fn matches_given(&self) -> bool {
        self.accum == self.given
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// Hands a caller-owned buffer to this line-type; it replaces (but does
    /// not free) whatever buffer was installed. The caller is responsible
    /// for the buffer's lifetime — `release_user_buffer` hands it back
    /// untouched (spec.md §6's "user-owned buffers are left untouched on
    /// close").
    pub fn set_user_buffer(&mut self, buf: Vec<u8>) -> Vec<u8> {
        let old = std::mem::replace(&mut self.buffer, buf);
        self.is_user_buf = true;
        old
    }

    /// Detaches the current user buffer, reverting to an internally-owned
    /// empty one, and returns the detached buffer to its owner.
    pub fn release_user_buffer(&mut self) -> Option<Vec<u8>> {
        if !self.is_user_buf {
            return None;
        }
        self.is_user_buf = false;
        Some(std::mem::take(&mut self.buffer))
    }

    pub fn is_user_buf(&self) -> bool {
        self.is_user_buf
    }

    /// Queues `bytes` for local (per-thread) field-codec training.
    pub fn push_field_tack(&mut self, bytes: &[u8]) {
        self.field_tack.extend_from_slice(bytes);
    }

    /// Queues `bytes` for local (per-thread) list-codec training.
    pub fn push_list_tack(&mut self, bytes: &[u8]) {
        self.list_tack.extend_from_slice(bytes);
    }

    pub fn field_tack_len(&self) -> usize {
        self.field_tack.len()
    }

    pub fn list_tack_len(&self) -> usize {
        self.list_tack.len()
    }

    /// Drains the locally-queued field training bytes, for merging into a
    /// master codec's histogram.
    pub fn take_field_tack(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.field_tack)
    }

    /// Drains the locally-queued list training bytes, for merging into a
    /// master codec's histogram.
    pub fn take_list_tack(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.list_tack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::schema::LineTypeSpec;

    fn spec(symbol: char, fields: Vec<FieldType>) -> LineTypeSpec {
        // Mirrors the private constructor in schema.rs; re-derive the
        // list_field index the same way since LineTypeSpec's fields are
        // public but its constructor is private to the module.
        let list_field = fields.iter().position(|f| f.is_list());
        LineTypeSpec {
            symbol,
            fields,
            list_field,
            comment: None,
            compressed: false,
        }
    }

    #[test]
    fn record_line_tracks_count_total_max() {
        let mut li = LineInfo::new(spec('S', vec![FieldType::Dna]));
        li.record_line(Some(4));
        li.record_line(Some(3));
        assert_eq!(li.accum.count, 2);
        assert_eq!(li.accum.total, 7);
        assert_eq!(li.accum.max, 4);
    }

    #[test]
    fn group_boundary_matches_scenario_f() {
        // spec.md §8 Scenario F: g "A", S, S, S, g "B", S, S.
        let mut s = LineInfo::new(spec('S', vec![FieldType::Int]));
        // Before first group-line: orphan prefix (none here).
        s.on_group_boundary(false);
        for _ in 0..3 {
            s.record_line(None);
        }
        // Second group-line "B" closes group A.
        s.on_group_boundary(true);
        for _ in 0..2 {
            s.record_line(None);
        }
        // Finalize closes group B.
        s.on_group_boundary(true);
        assert_eq!(s.accum.group_count, 3);
    }

    #[test]
    fn dna_list_gets_shared_dna_codec() {
        let li = LineInfo::new(spec('S', vec![FieldType::Dna]));
        assert!(li.list_codec.as_ref().unwrap().is_dna());
    }

    #[test]
    fn user_buffer_round_trips_untouched() {
        let mut li = LineInfo::new(spec('Q', vec![FieldType::String]));
        let handed = vec![1u8, 2, 3];
        li.set_user_buffer(handed.clone());
        assert!(li.is_user_buf());
        let back = li.release_user_buffer().unwrap();
        assert_eq!(back, handed);
        assert!(!li.is_user_buf());
    }
}
