//! Parallel writer and reader peer groups (spec.md §4.7, §5).
//!
//! A writer group is one master [`FileState`] plus `N - 1` slaves writing to
//! hidden temporary files; at close, the master appends each slave's temp
//! file verbatim, in ascending peer index order, then writes its own
//! footer over the merged counts and index. A reader group is `N`
//! independent file handles on the same path, each adopting the master's
//! schema/codecs/index instead of re-deriving them (see
//! [`FileState::open_read_peer`]).
//!
//! Codec training is the one thing peers cannot do independently (each
//! peer's own bytes would train a different codec than its neighbors'):
//! each slave accumulates its own scalar/list bytes locally, scaled to
//! `codec_training_size / (3 * NTHREADS)` (spec.md §4.4), and only takes
//! `field_lock`/`list_lock` to fold that local batch into the master's
//! shared trainer once its own threshold is crossed — not on every write.
//! After a fold (or not), it copies the master's current codec snapshot
//! back onto itself so its own encoding matches its neighbors'.
//!
//! [`ThreadedWriter::split_peers`] hands out one [`WriterPeer`] per peer,
//! each independently writable, so real OS threads (e.g. under
//! `std::thread::scope`) can each drive their own peer concurrently —
//! [`ThreadedWriter::write_line`] remains for single-threaded callers that
//! want to address peers by index from one thread.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sync_file::RandomAccessFile;
use tracing::trace_span;

use crate::error::OneError;
use crate::field::FieldValue;
use crate::file_state::{FileOpenOptions, FileState, FileWriteOptions, PeerRole};
use crate::schema::Schema;

/// A master + slave group of writer peers (spec.md §4.7). The master is
/// shared behind a mutex since slave peers must occasionally reach into
/// it to merge codec training, even when every peer is driven from its
/// own OS thread via [`split_peers`](Self::split_peers).
pub struct ThreadedWriter {
    master: Arc<Mutex<FileState<RandomAccessFile>>>,
    slaves: Vec<FileState<RandomAccessFile>>,
    slave_paths: Vec<PathBuf>,
    field_lock: Arc<Mutex<()>>,
    list_lock: Arc<Mutex<()>>,
    local_training_size: u64,
    closed: bool,
}

impl ThreadedWriter {
    /// Opens `path` for writing with `options.thread_count` peers. Peer 0
    /// (the master) writes directly to `path`; peers `1..N` write to
    /// hidden temp files under [`std::env::temp_dir`], named after this
    /// process id and peer index, and are appended to the master's output
    /// at [`close`](Self::close).
    pub fn open(
        path: &Path,
        schema: Schema,
        type_name: &str,
        options: FileWriteOptions,
    ) -> anyhow::Result<Self> {
        let span = trace_span!("ThreadedWriter::open", path = %path.display(), peers = options.thread_count);
        let _enter = span.enter();

        let peer_count = options.thread_count.max(1);
        let mut master = FileState::open_write_new(path, schema.clone(), type_name, options.clone())?;
        master.set_peer_role(PeerRole::Master { peer_count });

        let pid = std::process::id();
        let mut slaves = Vec::with_capacity(peer_count - 1);
        let mut slave_paths = Vec::with_capacity(peer_count - 1);
        for index in 1..peer_count {
            let temp_path = std::env::temp_dir().join(format!("onecode-{pid}-{index}.tmp"));
            let mut slave = FileState::open_write_new(&temp_path, schema.clone(), type_name, options.clone())?;
            slave.set_peer_role(PeerRole::Slave { index });
            slaves.push(slave);
            slave_paths.push(temp_path);
        }

        let local_training_size = (options.codec_training_size / (3 * peer_count as u64)).max(1);

        Ok(ThreadedWriter {
            master: Arc::new(Mutex::new(master)),
            slaves,
            slave_paths,
            field_lock: Arc::new(Mutex::new(())),
            list_lock: Arc::new(Mutex::new(())),
            local_training_size,
            closed: false,
        })
    }

    pub fn peer_count(&self) -> usize {
        1 + self.slaves.len()
    }

    /// Writes one line on peer `index` (`0` is the master), from whatever
    /// thread is calling. For genuine concurrent writes from separate
    /// threads, use [`split_peers`](Self::split_peers) instead so each
    /// thread owns its own peer handle.
    pub fn write_line(&mut self, index: usize, symbol: char, fields: &[FieldValue]) -> anyhow::Result<()> {
        if index == 0 {
            return self.master.lock().unwrap().write_line(symbol, fields);
        }
        let slave = self
            .slaves
            .get_mut(index - 1)
            .ok_or_else(|| OneError::Protocol(format!("no writer peer with index {index}")))?;

        fold_into_master(
            slave,
            &self.master,
            &self.field_lock,
            &self.list_lock,
            self.local_training_size,
            symbol,
            fields,
        )
    }

    /// Splits the group into one [`WriterPeer`] per peer (master first,
    /// then slaves in index order), each usable from its own thread —
    /// e.g. inside `std::thread::scope`, one `scope.spawn` per peer
    /// (spec.md §5: "each thread operates exclusively on its own peer").
    pub fn split_peers(&mut self) -> Vec<WriterPeer<'_>> {
        let mut peers = Vec::with_capacity(1 + self.slaves.len());
        peers.push(WriterPeer::Master(self.master.clone()));
        for slave in &mut self.slaves {
            peers.push(WriterPeer::Slave {
                slave,
                master: self.master.clone(),
                field_lock: self.field_lock.clone(),
                list_lock: self.list_lock.clone(),
                local_training_size: self.local_training_size,
            });
        }
        peers
    }

    /// Finalizes every peer, appends each slave's temp file onto the
    /// master's output in ascending index order — shifting the slave's
    /// recorded object offsets and group starts so they remain valid once
    /// concatenated — then closes the master (finalize + footer write +
    /// release). Removes the temp files on success.
    pub fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        for slave in &mut self.slaves {
            slave.close()?;
        }
        for (slave, path) in self.slaves.iter().zip(self.slave_paths.iter()) {
            let accum = slave.accum_snapshot();
            let index = slave.index_snapshot();
            let bytes = slave.read_all_bytes()?;
            let mut master = self.master.lock().unwrap();
            let byte_delta = master.len_bytes()? as i64;
            master.merge_peer_counts_and_index(&accum, &index, byte_delta);
            master.append_raw(&bytes)?;
            drop(master);
            let _ = std::fs::remove_file(path);
        }
        self.master.lock().unwrap().close()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for ThreadedWriter {
    /// Best-effort cleanup if a caller abandons the group without calling
    /// `close` (spec.md §5: "a caller abandoning a write by not calling
    /// close leaks temp files" — this reimplementation tries not to).
    fn drop(&mut self) {
        for path in &self.slave_paths {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// One writer peer, borrowed out of a [`ThreadedWriter`] by
/// [`ThreadedWriter::split_peers`] so it can be handed to its own thread.
pub enum WriterPeer<'a> {
    /// The master peer; writes straight to the shared `FileState` under a
    /// brief lock (the master never needs to merge into itself).
    Master(Arc<Mutex<FileState<RandomAccessFile>>>),
    /// A slave peer; writes to its own temp file and occasionally folds
    /// its locally-accumulated training bytes into the master.
    Slave {
        slave: &'a mut FileState<RandomAccessFile>,
        master: Arc<Mutex<FileState<RandomAccessFile>>>,
        field_lock: Arc<Mutex<()>>,
        list_lock: Arc<Mutex<()>>,
        local_training_size: u64,
    },
}

impl<'a> WriterPeer<'a> {
    pub fn write_line(&mut self, symbol: char, fields: &[FieldValue]) -> anyhow::Result<()> {
        match self {
            WriterPeer::Master(master) => master.lock().unwrap().write_line(symbol, fields),
            WriterPeer::Slave {
                slave,
                master,
                field_lock,
                list_lock,
                local_training_size,
            } => fold_into_master(slave, master, field_lock, list_lock, *local_training_size, symbol, fields),
        }
    }
}

/// Shared slave-write body for [`ThreadedWriter::write_line`] and
/// [`WriterPeer::write_line`]: accumulate locally, fold into the master
/// under lock only once the local threshold is crossed, sync the codec
/// snapshot back, then write.
fn fold_into_master(
    slave: &mut FileState<RandomAccessFile>,
    master: &Mutex<FileState<RandomAccessFile>>,
    field_lock: &Mutex<()>,
    list_lock: &Mutex<()>,
    local_training_size: u64,
    symbol: char,
    fields: &[FieldValue],
) -> anyhow::Result<()> {
    if let Some(bytes) = slave.local_field_bytes(symbol, fields, local_training_size) {
        let _guard = field_lock.lock().unwrap();
        master.lock().unwrap().merge_field_bytes(symbol, bytes)?;
    }
    if let Some(bytes) = slave.local_list_bytes(symbol, fields, local_training_size) {
        let _guard = list_lock.lock().unwrap();
        master.lock().unwrap().merge_list_bytes(symbol, bytes)?;
    }
    let snapshot = master.lock().unwrap().codec_snapshot(symbol);
    if let Some(snapshot) = snapshot {
        slave.apply_codec_snapshot(symbol, &snapshot);
    }
    slave.write_line_trained(symbol, fields)
}

/// A group of independent reader peers sharing one master's schema,
/// trained codecs, and index (spec.md §4.7).
pub struct ThreadedReader {
    peers: Vec<FileState<RandomAccessFile>>,
}

impl ThreadedReader {
    /// Opens `path` for reading with `thread_count` independent peers.
    /// Peer 0 reads the header and footer normally; peers `1..N` open
    /// their own file handle and adopt peer 0's schema/codecs/index
    /// instead of re-deriving them.
    pub fn open(path: &Path, schema: Schema, options: FileOpenOptions) -> anyhow::Result<Self> {
        let thread_count = options.thread_count.max(1);
        let master = FileState::open_read(path, schema, options.clone())?;
        let shared = master.snapshot_for_peers();

        let mut peers = Vec::with_capacity(thread_count);
        peers.push(master);
        for _ in 1..thread_count {
            let file = RandomAccessFile::from(std::fs::File::open(path)?);
            peers.push(FileState::open_read_peer(file, &shared, &options));
        }
        Ok(ThreadedReader { peers })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer(&self, index: usize) -> Option<&FileState<RandomAccessFile>> {
        self.peers.get(index)
    }

    pub fn peer_mut(&mut self, index: usize) -> Option<&mut FileState<RandomAccessFile>> {
        self.peers.get_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    const SCHEMA: &str = "\
P 3 xyz
O S 1 8 INT_LIST
";

    fn schema() -> Schema {
        Schema::from_text(SCHEMA).unwrap()
    }

    #[test]
    fn single_peer_group_roundtrips_like_a_serial_file() {
        let dir = std::env::temp_dir().join(format!("onecode-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("single.1xyz");

        let mut writer = ThreadedWriter::open(
            &path,
            schema(),
            "xyz",
            FileWriteOptions {
                thread_count: 1,
                binary: true,
                codec_training_size: 1_000,
            },
        )
        .unwrap();
        writer
            .write_line(0, 'S', &[FieldValue::IntList(vec![1, 2, 3])])
            .unwrap();
        writer.close().unwrap();

        let reader = ThreadedReader::open(&path, schema(), FileOpenOptions::default()).unwrap();
        assert_eq!(reader.peer_count(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn slave_temp_files_are_appended_in_order() {
        let dir = std::env::temp_dir().join(format!("onecode-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("multi.1xyz");

        let mut writer = ThreadedWriter::open(
            &path,
            schema(),
            "xyz",
            FileWriteOptions {
                thread_count: 2,
                binary: true,
                codec_training_size: 1_000,
            },
        )
        .unwrap();
        writer
            .write_line(0, 'S', &[FieldValue::IntList(vec![1])])
            .unwrap();
        writer
            .write_line(1, 'S', &[FieldValue::IntList(vec![2, 3])])
            .unwrap();
        writer.close().unwrap();

        let mut reader = ThreadedReader::open(&path, schema(), FileOpenOptions::default()).unwrap();
        let master = reader.peer_mut(0).unwrap();
        let (sym1, fields1) = master.read_line().unwrap().unwrap();
        assert_eq!(sym1, 'S');
        assert_eq!(fields1[0], FieldValue::IntList(vec![1]));
        let (sym2, fields2) = master.read_line().unwrap().unwrap();
        assert_eq!(sym2, 'S');
        assert_eq!(fields2[0], FieldValue::IntList(vec![2, 3]));
        assert_eq!(master.object_count(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn split_peers_write_concurrently_from_real_threads() {
        let dir = std::env::temp_dir().join(format!("onecode-test3-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("concurrent.1xyz");

        let mut writer = ThreadedWriter::open(
            &path,
            schema(),
            "xyz",
            FileWriteOptions {
                thread_count: 3,
                binary: true,
                codec_training_size: 1_000,
            },
        )
        .unwrap();

        std::thread::scope(|scope| {
            for (i, mut peer) in writer.split_peers().into_iter().enumerate() {
                scope.spawn(move || {
                    peer.write_line('S', &[FieldValue::IntList(vec![i as i64])]).unwrap();
                });
            }
        });
        writer.close().unwrap();

        let mut reader = ThreadedReader::open(&path, schema(), FileOpenOptions::default()).unwrap();
        let master = reader.peer_mut(0).unwrap();
        let mut seen = Vec::new();
        while let Some((sym, fields)) = master.read_line().unwrap() {
            assert_eq!(sym, 'S');
            if let FieldValue::IntList(v) = &fields[0] {
                seen.push(v[0]);
            }
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(master.object_count(), 3);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
