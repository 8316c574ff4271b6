//! Lenient decoding of JSON-shaped model responses.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::ParseReport;
use crate::types::{DialogMatching, Exercise, ExerciseSet, MultipleChoice, OtherExercise, Question};

/// Byte length of the balanced object starting at `text[0] == '{'`.
/// Braces inside string literals (with escapes) do not count.
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Top-level balanced `{...}` spans of `text`, in order. An opening brace
/// that never closes is skipped and scanning resumes right after it.
pub fn object_candidates(text: &str) -> impl Iterator<Item = &str> {
    let mut from = 0;
    std::iter::from_fn(move || {
        while let Some(offset) = text[from..].find('{') {
            let start = from + offset;
            match balanced_len(&text[start..]) {
                Some(len) => {
                    from = start + len;
                    return Some(&text[start..start + len]);
                }
                None => from = start + 1,
            }
        }
        None
    })
}

/// Top-level keys that mark an object as an exercise set.
const SET_KEYS: [&str; 4] = [
    "multiple_choice",
    "dialog_matching",
    "other_exercises",
    "other",
];

fn has_set_shape(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| SET_KEYS.iter().any(|key| map.contains_key(*key)))
}

/// First candidate span that decodes as a JSON object with at least one
/// exercise-set key. Other objects (schema notes, braces in prose) are
/// passed over.
pub fn extract_json_object(text: &str) -> Option<Value> {
    object_candidates(text).find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
        Ok(value) if has_set_shape(&value) => Some(value),
        Ok(_) => {
            debug!(len = candidate.len(), "skipping JSON object without exercise keys");
            None
        }
        Err(_) => None,
    })
}

#[derive(Debug, Deserialize)]
struct RawExerciseSet {
    #[serde(default)]
    multiple_choice: Value,
    #[serde(default)]
    dialog_matching: Value,
    #[serde(default, alias = "other")]
    other_exercises: Value,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    question: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    correct_answer: String,
}

#[derive(Debug, Deserialize)]
struct RawMultipleChoice {
    #[serde(default)]
    content: String,
    questions: Vec<RawQuestion>,
}

#[derive(Debug, Deserialize)]
struct RawDialogMatching {
    #[serde(default)]
    dialogs: Vec<String>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    correct_matches: Value,
}

#[derive(Debug, Deserialize)]
struct RawOther {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    solution: Value,
}

/// Arrays stay arrays, a lone object becomes a one-item list, anything else is empty.
fn items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    }
}

/// Decode an already extracted object into typed exercises.
/// `None` means the object does not have the exercise-set shape at all.
pub fn decode_exercise_set(object: Value) -> Option<(ExerciseSet, ParseReport)> {
    if !has_set_shape(&object) {
        return None;
    }
    let raw: RawExerciseSet = match serde_json::from_value(object) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(%err, "JSON object is not an exercise set");
            return None;
        }
    };

    let mut set = ExerciseSet::default();
    let mut report = ParseReport::default();
    // Validity is judged on the normalized form, the same form that is
    // written to artifacts and hashed into ids.
    let mut accept = |exercise: Option<Exercise>, report: &mut ParseReport| {
        let Some(exercise) = exercise.map(|e| e.normalized()) else {
            report.discarded += 1;
            return;
        };
        match exercise.validate() {
            Ok(()) => set.push(exercise),
            Err(reason) => {
                debug!(%reason, "discarding invalid exercise from JSON");
                report.discarded += 1;
            }
        }
    };

    let mut loose_questions = Vec::new();
    for item in items(raw.multiple_choice) {
        if item.get("questions").is_some() {
            let exercise = serde_json::from_value::<RawMultipleChoice>(item)
                .ok()
                .map(|mc| {
                    Exercise::MultipleChoice(MultipleChoice {
                        content: mc.content,
                        questions: mc.questions.into_iter().map(repair_question).collect(),
                    })
                });
            accept(exercise, &mut report);
        } else {
            match serde_json::from_value::<RawQuestion>(item) {
                Ok(question) => loose_questions.push(repair_question(question)),
                Err(_) => report.discarded += 1,
            }
        }
    }
    if !loose_questions.is_empty() {
        accept(
            Some(Exercise::MultipleChoice(MultipleChoice {
                content: String::new(),
                questions: loose_questions,
            })),
            &mut report,
        );
    }

    for item in items(raw.dialog_matching) {
        let exercise = serde_json::from_value::<RawDialogMatching>(item)
            .ok()
            .and_then(|dm| {
                let correct_matches = match_pairs(dm.correct_matches)?;
                Some(Exercise::DialogMatching(DialogMatching {
                    dialogs: dm.dialogs,
                    images: dm.images,
                    correct_matches,
                }))
            });
        accept(exercise, &mut report);
    }

    for item in items(raw.other_exercises) {
        let exercise = serde_json::from_value::<RawOther>(item).ok().map(|other| {
            Exercise::Other(OtherExercise {
                kind: other.kind,
                content: other.content,
                solution: scalar_text(other.solution),
            })
        });
        accept(exercise, &mut report);
    }

    Some((set, report))
}

/// Models sometimes answer with the option letter instead of its text.
fn repair_question(raw: RawQuestion) -> Question {
    let mut correct_answer = raw.correct_answer.trim().to_string();
    if !raw.options.iter().any(|o| o.trim() == correct_answer) {
        let letter_index = match correct_answer.trim_end_matches([')', '.']).as_bytes() {
            [b] if b.is_ascii_alphabetic() => Some((b.to_ascii_lowercase() - b'a') as usize),
            _ => None,
        };
        if let Some(option) = letter_index.and_then(|idx| raw.options.get(idx)) {
            correct_answer = option.clone();
        }
    }
    Question {
        question: raw.question,
        options: raw.options.iter().map(|o| o.trim().to_string()).collect(),
        correct_answer,
    }
}

/// `{"dialog": "image"}` or `[{"dialog": .., "image": ..}]`.
fn match_pairs(value: Value) -> Option<std::collections::BTreeMap<String, String>> {
    let mut pairs = std::collections::BTreeMap::new();
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (dialog, image) in map {
                pairs.insert(dialog, image.as_str()?.to_string());
            }
        }
        Value::Array(list) => {
            for entry in list {
                let dialog = entry.get("dialog")?.as_str()?;
                let image = entry
                    .get("image")
                    .or_else(|| entry.get("matches_with"))?
                    .as_str()?;
                if !pairs.contains_key(dialog) {
                    pairs.insert(dialog.to_string(), image.to_string());
                }
            }
        }
        _ => return None,
    }
    Some(pairs)
}

fn scalar_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}
