//! Integration tests driving the public API only, covering the scenarios
//! this format's round-trip laws and invariants are checked against.

use onecode::{FieldValue, FileOpenOptions, FileState, FileWriteOptions, Schema};

fn temp_path(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("onecode-roundtrip-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

const SEQ_SCHEMA: &str = "\
P 3 seq
D S 1 3 DNA
D Q 1 6 STRING
";

/// Scenario A: write the three canonical lines to an ASCII file, reopen,
/// and check the field tuples survive exactly.
#[test]
fn scenario_a_ascii_seq_roundtrip() {
    let path = temp_path("scenario_a.1seq");
    let schema = Schema::from_text(SEQ_SCHEMA).unwrap();

    let mut w = FileState::open_write_new(
        &path,
        schema.clone(),
        "seq",
        FileWriteOptions {
            binary: false,
            ..Default::default()
        },
    )
    .unwrap();
    w.write_line('S', &[FieldValue::Dna(b"acgt".to_vec())]).unwrap();
    w.write_line('S', &[FieldValue::Dna(b"ggt".to_vec())]).unwrap();
    w.write_line('Q', &[FieldValue::Str(b"!!!".to_vec())]).unwrap();
    w.close().unwrap();

    let mut r = FileState::open_read(&path, schema, FileOpenOptions::default()).unwrap();
    let (sym1, f1) = r.read_line().unwrap().unwrap();
    assert_eq!(sym1, 'S');
    assert_eq!(f1[0], FieldValue::Dna(b"acgt".to_vec()));
    let (sym2, f2) = r.read_line().unwrap().unwrap();
    assert_eq!(sym2, 'S');
    assert_eq!(f2[0], FieldValue::Dna(b"ggt".to_vec()));
    let (sym3, f3) = r.read_line().unwrap().unwrap();
    assert_eq!(sym3, 'Q');
    assert_eq!(f3[0], FieldValue::Str(b"!!!".to_vec()));
    assert!(r.read_line().unwrap().is_none());
}

/// Scenario B: the same three lines through a binary file must decode to
/// byte-identical field tuples, with the accumulated counts the spec names.
#[test]
fn scenario_b_binary_equivalence() {
    let path = temp_path("scenario_b.1seq");
    let schema = Schema::from_text(SEQ_SCHEMA).unwrap();

    let mut w = FileState::open_write_new(&path, schema.clone(), "seq", FileWriteOptions::default()).unwrap();
    w.write_line('S', &[FieldValue::Dna(b"acgt".to_vec())]).unwrap();
    w.write_line('S', &[FieldValue::Dna(b"ggt".to_vec())]).unwrap();
    w.write_line('Q', &[FieldValue::Str(b"!!!".to_vec())]).unwrap();
    w.close().unwrap();

    let mut r = FileState::open_read(&path, schema, FileOpenOptions::default()).unwrap();
    let (_, f1) = r.read_line().unwrap().unwrap();
    assert_eq!(f1[0], FieldValue::Dna(b"acgt".to_vec()));
    let (_, f2) = r.read_line().unwrap().unwrap();
    assert_eq!(f2[0], FieldValue::Dna(b"ggt".to_vec()));
    let (_, f3) = r.read_line().unwrap().unwrap();
    assert_eq!(f3[0], FieldValue::Str(b"!!!".to_vec()));

    let s = r.line_info('S').unwrap();
    assert_eq!(s.accum.max, 4);
    assert_eq!(s.accum.total, 7);
    assert_eq!(s.accum.count, 2);
    let q = r.line_info('Q').unwrap();
    assert_eq!(q.accum.count, 1);
}

/// Scenario C: an INT_LIST round-trips exactly through the binary codec's
/// difference-and-strip compaction.
#[test]
fn scenario_c_int_list_compaction_edge() {
    let path = temp_path("scenario_c.1tst");
    let schema = Schema::from_text("P 3 tst\nD X 1 8 INT_LIST\n").unwrap();

    let xs = vec![1000i64, 1002, 1005, 999];
    let mut w = FileState::open_write_new(&path, schema.clone(), "tst", FileWriteOptions::default()).unwrap();
    w.write_line('X', &[FieldValue::IntList(xs.clone())]).unwrap();
    w.close().unwrap();

    let mut r = FileState::open_read(&path, schema, FileOpenOptions::default()).unwrap();
    let (sym, fields) = r.read_line().unwrap().unwrap();
    assert_eq!(sym, 'X');
    assert_eq!(fields[0], FieldValue::IntList(xs));
}

/// Scenario E: `goto_object` seeks directly to the i-th object line.
#[test]
fn scenario_e_goto_object() {
    let path = temp_path("scenario_e.1obj");
    let schema = Schema::from_text("P 3 obj\nO S 1 6 STRING\n").unwrap();

    let mut w = FileState::open_write_new(&path, schema.clone(), "obj", FileWriteOptions::default()).unwrap();
    for i in 0..100 {
        w.write_line('S', &[FieldValue::Str(format!("s{i}").into_bytes())]).unwrap();
    }
    w.close().unwrap();

    let mut r = FileState::open_read(&path, schema, FileOpenOptions::default()).unwrap();
    r.goto_object(42).unwrap();
    let (sym, fields) = r.read_line().unwrap().unwrap();
    assert_eq!(sym, 'S');
    assert_eq!(fields[0], FieldValue::Str(b"s42".to_vec()));
}

/// Scenario F: group counts and `goto_group` sizes match the written
/// `g "A", S, S, S, g "B", S, S` sequence.
#[test]
fn scenario_f_group_counts() {
    let path = temp_path("scenario_f.1grp");
    let schema = Schema::from_text("P 3 grp\nG g 1 6 STRING\nO S 0\n").unwrap();

    let mut w = FileState::open_write_new(&path, schema.clone(), "grp", FileWriteOptions::default()).unwrap();
    w.write_line('g', &[FieldValue::Str(b"A".to_vec())]).unwrap();
    for _ in 0..3 {
        w.write_line('S', &[]).unwrap();
    }
    w.write_line('g', &[FieldValue::Str(b"B".to_vec())]).unwrap();
    for _ in 0..2 {
        w.write_line('S', &[]).unwrap();
    }
    w.finalize().unwrap();
    assert_eq!(w.line_info('S').unwrap().accum.group_count, 3);
    w.close().unwrap();

    let mut r = FileState::open_read(&path, schema, FileOpenOptions::default()).unwrap();
    assert_eq!(r.goto_group(0).unwrap(), 3);
    assert_eq!(r.goto_group(1).unwrap(), 2);
    assert!(r.goto_group(2).is_err());
}

/// Parallel write invariant: a threaded write's body is the serial
/// concatenation of master output then slave outputs in order, and the
/// merged counts/index equal the serial case — driven by real OS threads,
/// one per peer, via `split_peers`.
#[test]
fn threaded_write_matches_serial_concatenation() {
    use onecode::{ThreadedReader, ThreadedWriter};

    let path = temp_path("threaded.1tst");
    let schema = Schema::from_text("P 3 tst\nO X 1 8 INT_LIST\n").unwrap();

    let mut w = ThreadedWriter::open(
        &path,
        schema.clone(),
        "tst",
        FileWriteOptions {
            thread_count: 2,
            binary: true,
            codec_training_size: 1_000,
        },
    )
    .unwrap();
    let payloads: Vec<Vec<i64>> = vec![vec![1, 2], vec![3, 4, 5]];
    std::thread::scope(|scope| {
        for (mut peer, payload) in w.split_peers().into_iter().zip(payloads.iter()) {
            let payload = payload.clone();
            scope.spawn(move || {
                peer.write_line('X', &[FieldValue::IntList(payload)]).unwrap();
            });
        }
    });
    w.close().unwrap();

    let mut reader = ThreadedReader::open(&path, schema, FileOpenOptions::default()).unwrap();
    let serial = reader.peer_mut(0).unwrap();
    let (_, f1) = serial.read_line().unwrap().unwrap();
    assert_eq!(f1[0], FieldValue::IntList(vec![1, 2]));
    let (_, f2) = serial.read_line().unwrap().unwrap();
    assert_eq!(f2[0], FieldValue::IntList(vec![3, 4, 5]));
    assert_eq!(serial.object_count(), 2);
}
