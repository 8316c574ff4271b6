use std::path::{Path, PathBuf};

use crate::types::ExerciseType;

/// Default data root: `<data dir>/ecoute`.
pub fn get_root_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ecoute")
}

pub fn get_transcripts_dir(root: &Path) -> PathBuf {
    root.join("transcripts")
}

pub fn get_exercises_dir(root: &Path) -> PathBuf {
    root.join("exercises")
}

pub fn get_vector_db_dir(root: &Path) -> PathBuf {
    root.join("vector_db")
}

/// `<video_id>_<collection>.txt`
pub fn get_artifact_path(
    exercises_dir: &Path,
    video_id: &str,
    exercise_type: ExerciseType,
) -> PathBuf {
    exercises_dir.join(format!("{}_{}.txt", video_id, exercise_type.collection_name()))
}

/// `<video_id>_model_response.json`, written for every processed transcript.
pub fn get_model_response_path(exercises_dir: &Path, video_id: &str) -> PathBuf {
    exercises_dir.join(format!("{}_model_response.json", video_id))
}

/// Video id of a `<video_id>.txt` transcript file.
pub fn transcript_video_id(path: &Path) -> Option<&str> {
    if path.extension()? != "txt" {
        return None;
    }
    path.file_stem()?.to_str()
}

/// Split an artifact file name into its video id and exercise type.
pub fn parse_artifact_name(file_name: &str) -> Option<(&str, ExerciseType)> {
    let stem = file_name.strip_suffix(".txt")?;
    ExerciseType::ALL.into_iter().find_map(|exercise_type| {
        let video_id = stem.strip_suffix(exercise_type.collection_name())?.strip_suffix('_')?;
        (!video_id.is_empty()).then_some((video_id, exercise_type))
    })
}
