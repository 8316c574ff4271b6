//! Listening-comprehension exercise pipeline.
//!
//! Transcripts are turned into structured exercises by a completion model
//! ([`extractor`]), indexed in a content-addressed similarity store
//! ([`store`], [`retriever`]) and used as few-shot examples for new
//! exercises ([`generator`]). [`parser`] reads the semi-structured text all
//! of these stages exchange and [`format`] writes it.

pub mod embedding;
pub mod error;
pub mod extractor;
pub mod format;
pub mod generator;
pub mod hash;
pub mod parser;
pub mod paths;
pub mod provider;
pub mod retriever;
pub mod store;
pub mod types;

pub use embedding::{ApiEmbedder, Embedder, HashingEmbedder, cosine_similarity};
pub use error::{EcouteError, Result};
pub use extractor::{BatchSummary, Extraction, TranscriptExtractor};
pub use format::{format_exercise_readable, render_exercise, render_exercises};
pub use generator::ExerciseGenerator;
pub use parser::{ParseOutcome, ParseReport, parse_lines, parse_model_response};
pub use paths::{get_exercises_dir, get_root_dir, get_transcripts_dir, get_vector_db_dir};
pub use provider::{ChatCompletionClient, CompletionParams, CompletionService, Provider};
pub use retriever::{Hit, SimilarityRetriever};
pub use store::{ContentStore, IndexSummary, StoreStats, UpsertOutcome};
pub use types::{
    DialogMatching, Exercise, ExerciseRecord, ExerciseSet, ExerciseType, InvalidExercise,
    MultipleChoice, OtherExercise, Question,
};
