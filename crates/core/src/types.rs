use std::{collections::BTreeMap, collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::EcouteError, format, hash};

/// The closed set of exercise kinds, one collection each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseType {
    MultipleChoice,
    DialogMatching,
    Other,
}

impl ExerciseType {
    pub const ALL: [ExerciseType; 3] = [
        ExerciseType::MultipleChoice,
        ExerciseType::DialogMatching,
        ExerciseType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExerciseType::MultipleChoice => "multiple_choice",
            ExerciseType::DialogMatching => "dialog_matching",
            ExerciseType::Other => "other",
        }
    }

    /// Name of the backing collection, also the artifact file suffix.
    pub fn collection_name(&self) -> &'static str {
        match self {
            ExerciseType::MultipleChoice => "multiple_choice",
            ExerciseType::DialogMatching => "dialog_matching",
            ExerciseType::Other => "other_exercises",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExerciseType::MultipleChoice => "multiple choice",
            ExerciseType::DialogMatching => "dialog matching",
            ExerciseType::Other => "other",
        }
    }
}

impl fmt::Display for ExerciseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExerciseType {
    type Err = EcouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "multiple_choice" => Ok(ExerciseType::MultipleChoice),
            "dialog_matching" => Ok(ExerciseType::DialogMatching),
            "other" | "other_exercises" => Ok(ExerciseType::Other),
            unknown => Err(EcouteError::UnknownExerciseType(unknown.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipleChoice {
    #[serde(default)]
    pub content: String,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogMatching {
    pub dialogs: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub correct_matches: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherExercise {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(default)]
    pub solution: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exercise {
    MultipleChoice(MultipleChoice),
    DialogMatching(DialogMatching),
    Other(OtherExercise),
}

/// Structural reasons an exercise cannot be stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidExercise {
    #[error("multiple choice exercise has no questions")]
    NoQuestions,
    #[error("question {question:?} has a blank prompt")]
    BlankQuestion { question: usize },
    #[error("question {question:?} has {count} option(s), at least 2 required")]
    TooFewOptions { question: String, count: usize },
    #[error("question {question:?} has a blank option")]
    BlankOption { question: String },
    #[error("question {question:?} repeats option {option:?}")]
    DuplicateOption { question: String, option: String },
    #[error("correct answer {answer:?} of question {question:?} is not one of its options")]
    AnswerNotAnOption { question: String, answer: String },
    #[error("dialog matching exercise has no dialogs")]
    NoDialogs,
    #[error("{section} repeats {item:?}")]
    DuplicateItem { section: &'static str, item: String },
    #[error("{section} contains a blank item")]
    BlankItem { section: &'static str },
    #[error("match references unknown dialog {0:?}")]
    UnknownDialog(String),
    #[error("match references unknown image {0:?}")]
    UnknownImage(String),
    #[error("exercise field {0} is blank")]
    BlankField(&'static str),
}

impl Exercise {
    pub fn exercise_type(&self) -> ExerciseType {
        match self {
            Exercise::MultipleChoice(_) => ExerciseType::MultipleChoice,
            Exercise::DialogMatching(_) => ExerciseType::DialogMatching,
            Exercise::Other(_) => ExerciseType::Other,
        }
    }

    /// Check the structural invariants required before storage.
    pub fn validate(&self) -> Result<(), InvalidExercise> {
        match self {
            Exercise::MultipleChoice(mc) => mc.validate(),
            Exercise::DialogMatching(dm) => dm.validate(),
            Exercise::Other(other) => other.validate(),
        }
    }

    /// Copy with every field trimmed and inner whitespace collapsed.
    pub fn normalized(&self) -> Exercise {
        match self {
            Exercise::MultipleChoice(mc) => Exercise::MultipleChoice(MultipleChoice {
                content: normalize_text(&mc.content),
                questions: mc
                    .questions
                    .iter()
                    .map(|q| Question {
                        question: normalize_text(&q.question),
                        options: q.options.iter().map(|o| normalize_text(o)).collect(),
                        correct_answer: normalize_text(&q.correct_answer),
                    })
                    .collect(),
            }),
            Exercise::DialogMatching(dm) => Exercise::DialogMatching(DialogMatching {
                dialogs: dm.dialogs.iter().map(|d| normalize_text(d)).collect(),
                images: dm.images.iter().map(|i| normalize_text(i)).collect(),
                correct_matches: dm
                    .correct_matches
                    .iter()
                    .map(|(d, i)| (normalize_text(d), normalize_text(i)))
                    .collect(),
            }),
            Exercise::Other(other) => Exercise::Other(OtherExercise {
                kind: normalize_text(&other.kind),
                content: normalize_text(&other.content),
                solution: normalize_text(&other.solution),
            }),
        }
    }

    /// The string whose embedding represents this exercise in the index.
    pub fn embedding_text(&self) -> String {
        match self {
            Exercise::MultipleChoice(mc) => {
                let mut parts = vec![mc.content.clone()];
                for q in &mc.questions {
                    parts.push(q.question.clone());
                    parts.extend(q.options.iter().cloned());
                }
                parts.retain(|p| !p.is_empty());
                parts.join(" ")
            }
            Exercise::DialogMatching(dm) => dm.dialogs.join(" "),
            Exercise::Other(other) => other.content.clone(),
        }
    }
}

impl MultipleChoice {
    pub fn validate(&self) -> Result<(), InvalidExercise> {
        if self.questions.is_empty() {
            return Err(InvalidExercise::NoQuestions);
        }
        for (idx, q) in self.questions.iter().enumerate() {
            q.validate(idx)?;
        }
        Ok(())
    }
}

impl Question {
    fn validate(&self, idx: usize) -> Result<(), InvalidExercise> {
        if self.question.trim().is_empty() {
            return Err(InvalidExercise::BlankQuestion { question: idx + 1 });
        }
        if self.options.len() < 2 {
            return Err(InvalidExercise::TooFewOptions {
                question: self.question.clone(),
                count: self.options.len(),
            });
        }
        let mut seen = HashSet::new();
        for option in &self.options {
            if option.trim().is_empty() {
                return Err(InvalidExercise::BlankOption {
                    question: self.question.clone(),
                });
            }
            if !seen.insert(option.as_str()) {
                return Err(InvalidExercise::DuplicateOption {
                    question: self.question.clone(),
                    option: option.clone(),
                });
            }
        }
        if !seen.contains(self.correct_answer.as_str()) {
            return Err(InvalidExercise::AnswerNotAnOption {
                question: self.question.clone(),
                answer: self.correct_answer.clone(),
            });
        }
        Ok(())
    }
}

impl DialogMatching {
    pub fn validate(&self) -> Result<(), InvalidExercise> {
        if self.dialogs.is_empty() {
            return Err(InvalidExercise::NoDialogs);
        }
        let dialogs = unique_items("dialogs", &self.dialogs)?;
        let images = unique_items("images", &self.images)?;
        for (dialog, image) in &self.correct_matches {
            if !dialogs.contains(dialog.as_str()) {
                return Err(InvalidExercise::UnknownDialog(dialog.clone()));
            }
            if !images.contains(image.as_str()) {
                return Err(InvalidExercise::UnknownImage(image.clone()));
            }
        }
        Ok(())
    }
}

impl OtherExercise {
    pub fn validate(&self) -> Result<(), InvalidExercise> {
        if self.kind.trim().is_empty() {
            return Err(InvalidExercise::BlankField("type"));
        }
        if self.content.trim().is_empty() {
            return Err(InvalidExercise::BlankField("content"));
        }
        Ok(())
    }
}

fn unique_items<'a>(
    section: &'static str,
    items: &'a [String],
) -> Result<HashSet<&'a str>, InvalidExercise> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if item.trim().is_empty() {
            return Err(InvalidExercise::BlankItem { section });
        }
        if !seen.insert(item.as_str()) {
            return Err(InvalidExercise::DuplicateItem {
                section,
                item: item.clone(),
            });
        }
    }
    Ok(seen)
}

fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A stored exercise. The id is derived from the content and cannot be set directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExerciseRecord {
    id: String,
    exercise: Exercise,
    exercise_type: ExerciseType,
    source_video_id: String,
    embedding_text: String,
}

impl ExerciseRecord {
    pub fn new(exercise: Exercise, source_video_id: impl Into<String>) -> Self {
        let exercise = exercise.normalized();
        Self {
            id: hash::content_id(&exercise),
            exercise_type: exercise.exercise_type(),
            embedding_text: exercise.embedding_text(),
            source_video_id: source_video_id.into(),
            exercise,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn exercise(&self) -> &Exercise {
        &self.exercise
    }

    pub fn into_exercise(self) -> Exercise {
        self.exercise
    }

    pub fn exercise_type(&self) -> ExerciseType {
        self.exercise_type
    }

    pub fn source_video_id(&self) -> &str {
        &self.source_video_id
    }

    pub fn embedding_text(&self) -> &str {
        &self.embedding_text
    }

    /// Line-oriented form of the exercise, the same text the parser reads.
    pub fn canonical_form(&self) -> String {
        format::render_exercise(&self.exercise)
    }
}

/// Result shape of one extraction: every category, each possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseSet {
    #[serde(default)]
    pub multiple_choice: Vec<MultipleChoice>,
    #[serde(default)]
    pub dialog_matching: Vec<DialogMatching>,
    #[serde(default)]
    pub other_exercises: Vec<OtherExercise>,
}

impl ExerciseSet {
    pub fn is_empty(&self) -> bool {
        self.multiple_choice.is_empty()
            && self.dialog_matching.is_empty()
            && self.other_exercises.is_empty()
    }

    pub fn len(&self) -> usize {
        self.multiple_choice.len() + self.dialog_matching.len() + self.other_exercises.len()
    }

    pub fn push(&mut self, exercise: Exercise) {
        match exercise {
            Exercise::MultipleChoice(mc) => self.multiple_choice.push(mc),
            Exercise::DialogMatching(dm) => self.dialog_matching.push(dm),
            Exercise::Other(other) => self.other_exercises.push(other),
        }
    }

    /// Exercises of one type, wrapped back into the polymorphic form.
    pub fn of_type(&self, exercise_type: ExerciseType) -> Vec<Exercise> {
        match exercise_type {
            ExerciseType::MultipleChoice => self
                .multiple_choice
                .iter()
                .cloned()
                .map(Exercise::MultipleChoice)
                .collect(),
            ExerciseType::DialogMatching => self
                .dialog_matching
                .iter()
                .cloned()
                .map(Exercise::DialogMatching)
                .collect(),
            ExerciseType::Other => self
                .other_exercises
                .iter()
                .cloned()
                .map(Exercise::Other)
                .collect(),
        }
    }
}
