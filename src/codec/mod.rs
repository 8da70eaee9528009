//! The posting codec: encode/decode blocks of postings, doc-list or vector
//! shaped, with a minimal fast path and chunk-listed variable-length
//! features (positions, ranges, payloads).

pub mod format;
pub mod ptuple;
pub mod reader;
pub mod writer;

pub use ptuple::{Features, PostTuple, Range};
pub use reader::BlockReader;
pub use writer::{encode_doc_block, encode_vector_block};
