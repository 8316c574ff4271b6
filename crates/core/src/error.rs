use std::path::PathBuf;
use thiserror::Error;

use crate::{
    embedding::EmbedError,
    parser::ParseReport,
    provider::{CompletionError, ProviderError},
    types::{ExerciseType, InvalidExercise},
};

#[derive(Error, Debug)]
pub enum EcouteError {
    #[error("Malformed input in {source_name}: {reason}")]
    MalformedInput { source_name: String, reason: String },

    #[error("Generation failed: {0}")]
    GenerationFailed(#[from] CompletionError),

    #[error("Model returned no valid {exercise_type} exercise ({report})")]
    MalformedGeneration {
        exercise_type: ExerciseType,
        report: ParseReport,
    },

    #[error("No {exercise_type} exercise with id {id}")]
    NotFound {
        id: String,
        exercise_type: ExerciseType,
    },

    #[error("Invalid exercise: {0}")]
    InvalidExercise(#[from] InvalidExercise),

    #[error("Unknown exercise type: {0}")]
    UnknownExerciseType(String),

    #[error(
        "Collection {collection} at {path} was indexed with {stored}, but the store was opened with {current}"
    )]
    EmbeddingMismatch {
        collection: &'static str,
        path: PathBuf,
        stored: String,
        current: String,
    },

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EcouteError>;
