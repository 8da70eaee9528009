//! Index storage: a `Storage`/`Session`/`Lock` capability surface over file-
//! or memory-backed segment data, plus the generation-counted
//! table-of-contents (TOC) tying a schema to its segment list.
//!
//! Grounded on Whoosh's `storage.py` (`Storage`/`Session`/`Lock` base
//! classes, `FileStorage`/`RamStorage`, save/load TOC by generation) for the
//! capability surface, and the teacher's `io_helper::open_mmap_file` for the
//! on-disk segment read path.

use crate::io_helper::{open_mmap_file, ArcInputStream};
use crate::schema::Schema;
use crate::scoring::FieldStats;
use crate::Error;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DEFAULT_INDEX_NAME: &str = "MAIN";

/// One flushed segment's bookkeeping: how many documents it holds and, per
/// field, the corpus statistics a weighting model needs at search time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub name: String,
    pub doc_count: u32,
    pub field_stats: BTreeMap<u16, FieldStats>,
}

/// The schema plus the list of live segments, versioned by a generation
/// counter so a reader can always open a consistent snapshot even while a
/// writer is producing the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toc {
    pub schema: Schema,
    pub segments: Vec<SegmentMeta>,
    pub generation: u64,
}

impl Toc {
    pub fn empty(schema: Schema) -> Self {
        Self { schema, segments: Vec::new(), generation: 0 }
    }

    pub fn next_generation(&self, segments: Vec<SegmentMeta>) -> Self {
        Self { schema: self.schema.clone(), segments, generation: self.generation + 1 }
    }
}

/// A named, acquire/release lock. Implementations need not provide
/// cross-process fairness guarantees beyond what their backing storage does.
pub trait Lock {
    fn acquire(&mut self) -> Result<bool, Error>;
    fn release(&mut self) -> Result<(), Error>;
}

/// A no-op lock for storage backends with no shared state to protect.
pub struct NullLock;
impl Lock for NullLock {
    fn acquire(&mut self) -> Result<bool, Error> {
        Ok(true)
    }
    fn release(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// An open transaction against a `Storage`: a document-id counter plus
/// whether writes are permitted.
pub struct Session {
    pub indexname: String,
    writable: bool,
    next_id: u32,
}

impl Session {
    pub fn is_writable(&self) -> bool {
        self.writable
    }
    pub fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// The source of an index's segment data: a directory of files, an
/// in-memory map, or (in principle) anything else that can hold named
/// byte blobs and a TOC.
pub trait Storage {
    type LockImpl: Lock;

    fn open(&self, indexname: &str, writable: bool) -> Result<Session, Error>;
    fn save_toc(&self, session: &Session, toc: &Toc) -> Result<(), Error>;
    fn load_toc(&self, session: &Session, generation: Option<u64>) -> Result<Toc, Error>;
    fn latest_generation(&self, indexname: &str) -> Result<Option<u64>, Error>;
    fn lock(&self, name: &str) -> Self::LockImpl;

    fn create_segment_writer(&self, indexname: &str, segment: &str, suffix: &str) -> Result<Box<dyn Write + '_>, Error>;
    fn open_segment(&self, indexname: &str, segment: &str, suffix: &str) -> Result<ArcInputStream, Error>;

    fn create_index(&self, schema: Schema, indexname: &str) -> Result<Toc, Error> {
        let toc = Toc::empty(schema);
        let session = self.open(indexname, true)?;
        self.save_toc(&session, &toc)?;
        Ok(toc)
    }

    fn open_index(&self, indexname: &str) -> Result<Toc, Error> {
        if self.latest_generation(indexname)?.is_none() {
            return Err(Error::TocNotFound);
        }
        let session = self.open(indexname, false)?;
        self.load_toc(&session, None)
    }
}

fn toc_file_name(indexname: &str, generation: u64) -> String {
    format!("_{}_{}.toc", indexname, generation)
}

/// Filesystem-backed storage: one directory per `Storage`, with segment
/// files named `<indexname>.<segment>.<suffix>` and TOCs named
/// `_<indexname>_<generation>.toc`.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn segment_path(&self, indexname: &str, segment: &str, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.{}", indexname, segment, suffix))
    }
}

/// A lock implemented by exclusively creating a marker file; released by
/// deleting it. Good enough for single-process coordination; it does not
/// implement POSIX advisory locking across processes.
pub struct FileLock {
    path: PathBuf,
    held: bool,
}

impl Lock for FileLock {
    fn acquire(&mut self) -> Result<bool, Error> {
        match fs::OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(_) => {
                self.held = true;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
    fn release(&mut self) -> Result<(), Error> {
        if self.held {
            let _ = fs::remove_file(&self.path);
            self.held = false;
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    type LockImpl = FileLock;

    fn open(&self, indexname: &str, writable: bool) -> Result<Session, Error> {
        Ok(Session { indexname: indexname.to_string(), writable, next_id: 0 })
    }

    fn save_toc(&self, session: &Session, toc: &Toc) -> Result<(), Error> {
        if !session.is_writable() {
            return Err(Error::ReadOnly);
        }
        let path = self.dir.join(toc_file_name(&session.indexname, toc.generation));
        let bytes = serde_json::to_vec(toc)?;
        let tmp = path.with_extension("toc.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load_toc(&self, session: &Session, generation: Option<u64>) -> Result<Toc, Error> {
        let generation = match generation {
            Some(g) => g,
            None => self
                .latest_generation(&session.indexname)?
                .ok_or(Error::TocNotFound)?,
        };
        let path = self.dir.join(toc_file_name(&session.indexname, generation));
        let bytes = fs::read(&path).map_err(|_| Error::TocNotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn latest_generation(&self, indexname: &str) -> Result<Option<u64>, Error> {
        let prefix = format!("_{}_", indexname);
        let mut best: Option<u64> = None;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(prefix.as_str()) {
                if let Some(gen_str) = rest.strip_suffix(".toc") {
                    if let Ok(gen) = gen_str.parse::<u64>() {
                        best = Some(best.map_or(gen, |b: u64| b.max(gen)));
                    }
                }
            }
        }
        Ok(best)
    }

    fn lock(&self, name: &str) -> Self::LockImpl {
        FileLock { path: self.dir.join(format!("{}.lock", name)), held: false }
    }

    fn create_segment_writer(&self, indexname: &str, segment: &str, suffix: &str) -> Result<Box<dyn Write + '_>, Error> {
        let path = self.segment_path(indexname, segment, suffix);
        Ok(Box::new(fs::File::create(path)?))
    }

    fn open_segment(&self, indexname: &str, segment: &str, suffix: &str) -> Result<ArcInputStream, Error> {
        let path = self.segment_path(indexname, segment, suffix);
        let mmap = open_mmap_file(&path)?;
        Ok(ArcInputStream::from_mmap(mmap))
    }
}

/// Purely in-memory storage: every segment file and every TOC generation
/// lives in a shared map. Useful for tests and short-lived indexes that
/// never need to survive a process restart.
#[derive(Default)]
pub struct RamStorage {
    segments: Mutex<BTreeMap<String, Arc<Vec<u8>>>>,
    tocs: Mutex<BTreeMap<(String, u64), Toc>>,
}

impl RamStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn segment_key(indexname: &str, segment: &str, suffix: &str) -> String {
        format!("{}.{}.{}", indexname, segment, suffix)
    }
}

/// An in-memory buffer that publishes itself into the owning `RamStorage`
/// when dropped, so callers can write through a plain `dyn Write`.
struct RamSegmentWriter<'s> {
    storage: &'s RamStorage,
    key: String,
    buf: Vec<u8>,
}

impl<'s> Write for RamSegmentWriter<'s> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.write(data)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'s> Drop for RamSegmentWriter<'s> {
    fn drop(&mut self) {
        let mut segments = self.storage.segments.lock().unwrap();
        segments.insert(std::mem::take(&mut self.key), Arc::new(std::mem::take(&mut self.buf)));
    }
}

impl Storage for RamStorage {
    type LockImpl = NullLock;

    fn open(&self, indexname: &str, writable: bool) -> Result<Session, Error> {
        Ok(Session { indexname: indexname.to_string(), writable, next_id: 0 })
    }

    fn save_toc(&self, session: &Session, toc: &Toc) -> Result<(), Error> {
        if !session.is_writable() {
            return Err(Error::ReadOnly);
        }
        self.tocs
            .lock()
            .unwrap()
            .insert((session.indexname.clone(), toc.generation), toc.clone());
        Ok(())
    }

    fn load_toc(&self, session: &Session, generation: Option<u64>) -> Result<Toc, Error> {
        let generation = match generation {
            Some(g) => g,
            None => self
                .latest_generation(&session.indexname)?
                .ok_or(Error::TocNotFound)?,
        };
        self.tocs
            .lock()
            .unwrap()
            .get(&(session.indexname.clone(), generation))
            .cloned()
            .ok_or(Error::TocNotFound)
    }

    fn latest_generation(&self, indexname: &str) -> Result<Option<u64>, Error> {
        Ok(self
            .tocs
            .lock()
            .unwrap()
            .keys()
            .filter(|(name, _)| name == indexname)
            .map(|(_, g)| *g)
            .max())
    }

    fn lock(&self, _name: &str) -> Self::LockImpl {
        NullLock
    }

    fn create_segment_writer(&self, indexname: &str, segment: &str, suffix: &str) -> Result<Box<dyn Write + '_>, Error> {
        Ok(Box::new(RamSegmentWriter {
            storage: self,
            key: Self::segment_key(indexname, segment, suffix),
            buf: Vec::new(),
        }))
    }

    fn open_segment(&self, indexname: &str, segment: &str, suffix: &str) -> Result<ArcInputStream, Error> {
        let key = Self::segment_key(indexname, segment, suffix);
        let bytes = self
            .segments
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::FormatMismatch(format!("no such segment file {:?}", key)))?;
        Ok(ArcInputStream::from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.add("title", Field::text(false)).unwrap();
        s
    }

    #[test]
    fn file_storage_round_trips_toc_generations() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::create(dir.path()).unwrap();
        let toc = storage.create_index(schema(), DEFAULT_INDEX_NAME).unwrap();
        assert_eq!(toc.generation, 0);

        let next = toc.next_generation(vec![SegmentMeta {
            name: "seg0".into(),
            doc_count: 5,
            field_stats: BTreeMap::new(),
        }]);
        let session = storage.open(DEFAULT_INDEX_NAME, true).unwrap();
        storage.save_toc(&session, &next).unwrap();

        assert_eq!(storage.latest_generation(DEFAULT_INDEX_NAME).unwrap(), Some(1));
        let loaded = storage.open_index(DEFAULT_INDEX_NAME).unwrap();
        assert_eq!(loaded.generation, 1);
        assert_eq!(loaded.segments.len(), 1);
        assert_eq!(loaded.segments[0].doc_count, 5);
    }

    #[test]
    fn file_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::create(dir.path()).unwrap();
        let mut a = storage.lock("writer");
        let mut b = storage.lock("writer");
        assert!(a.acquire().unwrap());
        assert!(!b.acquire().unwrap());
        a.release().unwrap();
        assert!(b.acquire().unwrap());
    }

    #[test]
    fn ram_storage_round_trips_segments_and_toc() {
        let storage = RamStorage::new();
        let toc = storage.create_index(schema(), DEFAULT_INDEX_NAME).unwrap();
        assert_eq!(toc.generation, 0);

        {
            let mut w = storage.create_segment_writer(DEFAULT_INDEX_NAME, "seg0", "post").unwrap();
            w.write_all(b"hello postings").unwrap();
        }
        let read = storage.open_segment(DEFAULT_INDEX_NAME, "seg0", "post").unwrap();
        assert_eq!(read.as_bytes(), b"hello postings");
    }
}
