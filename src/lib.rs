pub mod analysis;
pub mod codec;
pub mod config;
pub mod docstore;
pub mod heap;
pub mod io_helper;
pub mod matching;
pub mod numeric;
pub mod pool;
pub mod query;
pub mod schema;
pub mod scoring;
pub mod searching;
pub mod storage;
pub mod termtable;
pub mod writer;

#[macro_use]
extern crate serde_derive;

use fnv::FnvHashMap as HashMap;
#[allow(unused_imports)]
use fnv::FnvHashSet as HashSet;
use std::io;

/// The closed set of ways this crate's operations can fail.
#[derive(Debug)]
pub enum Error {
    /// A field was misconfigured, or a schema `add` violated a naming rule.
    FieldConfiguration(String),
    /// A user-supplied query string could not be parsed.
    QueryParser(String),
    /// Raw postings bytes were copied/read against an incompatible format.
    FormatMismatch(String),
    /// A block or chunk claimed a feature it does not carry.
    UnsupportedFeature(&'static str),
    /// Posting bytes ended before the format said they should.
    Truncated,
    /// An unrecognised typecode byte was encountered.
    BadTypecode,
    /// A looked-up key (e.g. a vector block's term) is not present.
    NotFound,
    /// Postings were not presented to the writer in sorted order.
    InvariantViolated(String),
    /// No generation exists yet for this index.
    TocNotFound,
    /// The index has no segments.
    EmptyIndex,
    /// A write was attempted against a read-only session.
    ReadOnly,
    /// A read was attempted against a write-only session.
    WriteOnly,
    /// An operation was attempted on a reader/searcher that was closed.
    ReaderClosed,
    /// A numeric value did not fit the field's configured bit width.
    OutOfRange,
    /// Tried to encode a block with zero postings.
    EmptyBlock,
    /// Postings were not presented to the codec in increasing doc-id/term order.
    OutOfOrder,
    /// Internal size/bounds computation did not add up.
    InternalSizeErr,
    /// A lock could not be acquired.
    LockContention(String),
    /// I/O failure from the underlying filesystem.
    IO(io::Error),
    /// A (de)serialization failure in the JSON-encoded TOC/schema.
    Json(serde_json::Error),
    /// Added context wrapping an inner failure.
    Context(String, Box<Error>),
}

impl Error {
    pub fn with_context<S>(self, msg: S) -> Error
    where
        S: Into<String>,
    {
        Error::Context(msg.into(), Box::new(self))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

/// A document identifier, monotonically assigned within a segment.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DocId(pub u32);

impl DocId {
    pub const NO_MORE: DocId = DocId(std::u32::MAX);

    pub fn is_done(&self) -> bool {
        self.0 == std::u32::MAX
    }
    pub fn next(&self) -> DocId {
        DocId(self.0 + 1)
    }
}
