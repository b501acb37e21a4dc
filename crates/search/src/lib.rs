//! Search backends for the transcription pipeline
//!
//! Two indexes:
//! - Speaker embeddings in Qdrant: per-file speaker vectors and
//!   consolidated profile vectors in one collection, discriminated by a
//!   `document_type` payload field, searched with cosine kNN.
//! - Summaries in Tantivy: BM25 full-text over BLUF summaries.

pub mod speaker_index;
pub mod summary_index;

pub use speaker_index::{
    DocumentType, EmbeddingDocument, SpeakerHit, SpeakerIndex, SpeakerIndexConfig,
};
pub use summary_index::{SummaryDocument, SummaryHit, SummaryIndex, SummaryIndexConfig};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}
