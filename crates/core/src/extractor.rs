//! Transcript → exercise extraction.
//!
//! One completion call per transcript asks for every exercise as a single
//! JSON object. The answer is parsed leniently and split into one artifact
//! file per exercise type, next to the raw answer.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    error::{EcouteError, Result},
    format::render_exercises,
    parser::{self, ParseReport, ResponseFormat},
    paths::{get_artifact_path, get_model_response_path, transcript_video_id},
    provider::{CompletionParams, CompletionService},
    types::{ExerciseSet, ExerciseType},
};

const EXTRACTION_PROMPT: &str = r#"Please analyze this French language test transcript and extract:
1. Multiple choice exercises (including the passage, questions, options, and correct answers)
2. Dialog matching exercises (including dialogs, images to match, and correct matches)
3. Any other types of exercises

Format the output as a JSON with the following structure:
{
    "multiple_choice": [
        {
            "content": "passage the questions are about",
            "questions": [
                {
                    "question": "text",
                    "options": ["option1", "option2", ...],
                    "correct_answer": "answer"
                }
            ]
        }
    ],
    "dialog_matching": [
        {
            "dialogs": ["dialog1", "dialog2", ...],
            "images": ["image_description1", "image_description2", ...],
            "correct_matches": {"dialog1": "image_description1", ...}
        }
    ],
    "other_exercises": [
        {
            "type": "exercise_type",
            "content": "exercise_content",
            "solution": "solution"
        }
    ]
}

Extract only the actual exercises, questions, and answers. Ignore instructions and filler text.
Provide only the JSON output, no additional text."#;

/// Everything one extraction produced.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub exercises: ExerciseSet,
    pub report: ParseReport,
    pub format: ResponseFormat,
    pub raw_response: String,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Serialize)]
struct ModelResponseFile<'a> {
    video_id: &'a str,
    model: &'a str,
    format: ResponseFormat,
    report: ParseReport,
    response: &'a str,
}

pub struct TranscriptExtractor<'a> {
    completion: &'a dyn CompletionService,
    params: CompletionParams,
}

impl<'a> TranscriptExtractor<'a> {
    pub fn new(completion: &'a dyn CompletionService) -> Self {
        Self {
            completion,
            params: CompletionParams::EXTRACTION,
        }
    }

    pub fn with_params(mut self, params: CompletionParams) -> Self {
        self.params = params;
        self
    }

    pub async fn extract(&self, transcript: &str) -> Result<Extraction> {
        let prompt = format!("{EXTRACTION_PROMPT}\n\nHere's the transcript:\n{transcript}");
        let raw_response = self.completion.complete(&prompt, &self.params).await?;

        let outcome = parser::parse_model_response(&raw_response);
        if !outcome.report.is_clean() {
            debug!(report = %outcome.report, "extraction response parsed with losses");
        }
        Ok(Extraction {
            exercises: outcome.exercises,
            report: outcome.report,
            format: outcome.format,
            raw_response,
        })
    }

    /// Extract one transcript file and write its artifacts. Returns the
    /// paths written.
    pub async fn process_transcript(
        &self,
        transcript_path: &Path,
        exercises_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let video_id = transcript_video_id(transcript_path).ok_or_else(|| {
            EcouteError::MalformedInput {
                source_name: transcript_path.display().to_string(),
                reason: "transcript files must be named <video_id>.txt".into(),
            }
        })?;

        let transcript = fs::read_to_string(transcript_path).await?;
        if transcript.trim().is_empty() {
            return Err(EcouteError::MalformedInput {
                source_name: transcript_path.display().to_string(),
                reason: "transcript is empty".into(),
            });
        }

        let extraction = self.extract(&transcript).await?;
        fs::create_dir_all(exercises_dir).await?;

        let mut written = Vec::new();
        for exercise_type in ExerciseType::ALL {
            let exercises = extraction.exercises.of_type(exercise_type);
            let path = get_artifact_path(exercises_dir, video_id, exercise_type);
            if exercises.is_empty() {
                // A previous run may have left an artifact for this type.
                match fs::remove_file(&path).await {
                    Ok(()) => debug!(path = %path.display(), "removed stale artifact"),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
                continue;
            }
            fs::write(&path, render_exercises(&exercises)).await?;
            written.push(path);
        }

        // Written last: its presence marks the transcript as done.
        let response_file = ModelResponseFile {
            video_id,
            model: self.completion.model(),
            format: extraction.format,
            report: extraction.report,
            response: &extraction.raw_response,
        };
        let path = get_model_response_path(exercises_dir, video_id);
        fs::write(&path, serde_json::to_string_pretty(&response_file)?).await?;
        written.push(path);

        info!(
            video_id,
            multiple_choice = extraction.exercises.multiple_choice.len(),
            dialog_matching = extraction.exercises.dialog_matching.len(),
            other = extraction.exercises.other_exercises.len(),
            "extracted exercises"
        );
        Ok(written)
    }

    /// Process every `<video_id>.txt` in `transcripts_dir` in name order.
    /// Transcripts with an existing model response are skipped unless
    /// `force` is set. A failing transcript does not stop the batch.
    pub async fn process_directory(
        &self,
        transcripts_dir: &Path,
        exercises_dir: &Path,
        force: bool,
    ) -> Result<BatchSummary> {
        let mut transcripts = Vec::new();
        let mut read_dir = fs::read_dir(transcripts_dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if transcript_video_id(&path).is_some() {
                transcripts.push(path);
            }
        }
        transcripts.sort();

        let mut summary = BatchSummary::default();
        for path in transcripts {
            let Some(video_id) = transcript_video_id(&path).map(str::to_string) else {
                continue;
            };

            if !force && fs::try_exists(get_model_response_path(exercises_dir, &video_id)).await? {
                debug!(%video_id, "already processed, skipping");
                summary.skipped.push(video_id);
                continue;
            }

            match self.process_transcript(&path, exercises_dir).await {
                Ok(_) => summary.processed.push(video_id),
                Err(err) => {
                    warn!(%video_id, %err, "failed to process transcript");
                    summary.failed.push((video_id, err.to_string()));
                }
            }
        }

        info!(
            processed = summary.processed.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "finished transcript batch"
        );
        Ok(summary)
    }
}
