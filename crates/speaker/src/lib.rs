//! Speaker identity engine
//!
//! Assigns voice embeddings to file-local speakers, links voices across
//! files via kNN over the vector index, maintains consolidated profile
//! embeddings, and drives the auto-accept / suggest / retroactive-label
//! workflows.

pub mod embedding;
pub mod matching;
pub mod profiles;
pub mod similarity;
pub mod vector_index;

pub use embedding::{aggregate_embeddings, extract_speaker_embeddings, select_segments};
pub use matching::{MatchOutcome, MatchThresholds, RetroactiveOutcome, SpeakerMatchingService};
pub use profiles::ProfileService;
pub use similarity::{batch_cosine_similarity, cosine_similarity, mean_embedding};
pub use vector_index::VectorIndex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeakerEngineError {
    #[error(transparent)]
    Persistence(#[from] transcribe_persistence::PersistenceError),

    #[error(transparent)]
    Search(#[from] transcribe_search::SearchError),

    #[error("embedding extraction failed: {0}")]
    Embedding(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}
