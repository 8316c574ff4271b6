//! Parsing of semi-structured exercise text.
//!
//! Two entry points:
//!
//! - [`parse_lines`] reads the line-oriented grammar written by
//!   [`crate::format`] (artifact files, generation responses).
//! - [`parse_model_response`] reads whatever a model returned for an
//!   extraction request: the first balanced JSON object if there is one that
//!   has the exercise-set shape, otherwise the line grammar.
//!
//! Neither ever fails. Anything that cannot be turned into a valid exercise
//! is counted in the returned [`ParseReport`] and logged at debug level.

mod json;
mod machine;

use std::fmt;

use serde::Serialize;
use tracing::debug;

pub use json::{extract_json_object, object_candidates};
pub use machine::{LineParser, State};

use crate::types::{Exercise, ExerciseSet, ExerciseType};

/// What was thrown away while parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    /// Questions that never got a `Correct answer:` line.
    pub dropped_questions: usize,
    /// Exercises that failed structural validation.
    pub discarded: usize,
    /// Lines matching no rule of the grammar.
    pub skipped_lines: usize,
}

impl ParseReport {
    pub fn is_clean(&self) -> bool {
        *self == ParseReport::default()
    }

    pub fn merge(&mut self, other: ParseReport) {
        self.dropped_questions += other.dropped_questions;
        self.discarded += other.discarded;
        self.skipped_lines += other.skipped_lines;
    }
}

impl fmt::Display for ParseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} question(s) dropped, {} exercise(s) discarded, {} line(s) skipped",
            self.dropped_questions, self.discarded, self.skipped_lines
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Json,
    Lines,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub exercises: ExerciseSet,
    pub report: ParseReport,
    pub format: ResponseFormat,
}

pub fn parse_lines(text: &str) -> ParseOutcome {
    let mut parser = LineParser::new();
    for line in text.lines() {
        parser.feed(line);
    }
    let (exercises, report) = parser.finish();
    ParseOutcome {
        exercises,
        report,
        format: ResponseFormat::Lines,
    }
}

pub fn parse_model_response(text: &str) -> ParseOutcome {
    if let Some(object) = extract_json_object(text) {
        if let Some((exercises, report)) = json::decode_exercise_set(object) {
            return ParseOutcome {
                exercises,
                report,
                format: ResponseFormat::Json,
            };
        }
    }
    debug!("no exercise-set JSON object in response, falling back to line grammar");
    parse_lines(text)
}

/// Parse a single-type artifact file. Exercises of any other type found in
/// it are counted as discarded.
pub fn parse_artifact(text: &str, exercise_type: ExerciseType) -> (Vec<Exercise>, ParseReport) {
    let outcome = parse_lines(text);
    let mut report = outcome.report;
    let stray = outcome.exercises.len() - outcome.exercises.of_type(exercise_type).len();
    if stray > 0 {
        debug!(stray, %exercise_type, "ignoring exercises of another type");
        report.discarded += stray;
    }
    (outcome.exercises.of_type(exercise_type), report)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        format::{render_exercise, render_exercises},
        types::{DialogMatching, MultipleChoice, OtherExercise, Question},
    };

    fn sample_exercises() -> Vec<Exercise> {
        vec![
            Exercise::MultipleChoice(MultipleChoice {
                content: "Bonjour, je m'appelle Aurélien et j'ai 25 ans.".into(),
                questions: vec![
                    Question {
                        question: "Quel âge a Aurélien?".into(),
                        options: vec!["20 ans".into(), "25 ans".into(), "30 ans".into()],
                        correct_answer: "25 ans".into(),
                    },
                    Question {
                        question: "Comment s'appelle-t-il?".into(),
                        options: vec!["Hubert".into(), "Aurélien".into()],
                        correct_answer: "Aurélien".into(),
                    },
                ],
            }),
            Exercise::DialogMatching(DialogMatching {
                dialogs: vec![
                    "Un café, s'il vous plaît.".into(),
                    "Le train part à quelle heure?".into(),
                ],
                images: vec!["Un bar".into(), "Une gare".into(), "Une plage".into()],
                correct_matches: BTreeMap::from([
                    ("Un café, s'il vous plaît.".to_string(), "Un bar".to_string()),
                    (
                        "Le train part à quelle heure?".to_string(),
                        "Une gare".to_string(),
                    ),
                ]),
            }),
            Exercise::Other(OtherExercise {
                kind: "dictation".into(),
                content: "Écrivez ce que vous entendez.".into(),
                solution: String::new(),
            }),
        ]
    }

    #[test]
    fn rendered_exercises_parse_back_unchanged() {
        for exercise in sample_exercises() {
            let outcome = parse_lines(&render_exercise(&exercise));
            assert!(outcome.report.is_clean(), "{}", outcome.report);
            assert_eq!(
                outcome.exercises.of_type(exercise.exercise_type()),
                vec![exercise]
            );
        }
    }

    #[test]
    fn mixed_file_parses_every_exercise() {
        let exercises = sample_exercises();
        let outcome = parse_lines(&render_exercises(&exercises));
        assert_eq!(outcome.exercises.len(), 3);
        assert!(outcome.report.is_clean());
    }

    #[test]
    fn model_response_prefers_json() {
        let response = r#"Here you go:
```json
{
  "multiple_choice": [{"content": "Il fait beau.", "questions": [
    {"question": "Quel temps?", "options": ["Beau", "Pluie"], "correct_answer": "Beau"}
  ]}],
  "dialog_matching": [],
  "other_exercises": [{"type": "fill {blank}", "content": "Il ___ beau.", "solution": "fait"}]
}
```"#;
        let outcome = parse_model_response(response);
        assert_eq!(outcome.format, ResponseFormat::Json);
        assert_eq!(outcome.exercises.multiple_choice.len(), 1);
        assert_eq!(outcome.exercises.other_exercises[0].kind, "fill {blank}");
    }

    #[test]
    fn model_response_falls_back_to_lines() {
        let response = "Content: Salut\nQuestion: Ça va?\n- Oui\n- Non\nCorrect answer: Oui\n";
        let outcome = parse_model_response(response);
        assert_eq!(outcome.format, ResponseFormat::Lines);
        assert_eq!(outcome.exercises.multiple_choice.len(), 1);
    }

    #[test]
    fn unrecognizable_response_is_empty_not_an_error() {
        let outcome = parse_model_response("I'm sorry, I cannot find any exercises here.");
        assert_eq!(outcome.exercises, ExerciseSet::default());
        assert_eq!(outcome.report.discarded, 0);
    }

    #[test]
    fn broken_json_falls_back_to_lines() {
        let outcome = parse_model_response(r#"{"multiple_choice": [ {"question": "#);
        assert_eq!(outcome.format, ResponseFormat::Lines);
        assert!(outcome.exercises.is_empty());
    }

    #[test]
    fn braces_in_prose_do_not_hide_line_exercises() {
        let response = "Content: Il a dit {\"ok\": true} hier.
Question: Qu'a-t-il dit?
- ok
- non
Correct answer: ok
";
        let outcome = parse_model_response(response);
        assert_eq!(outcome.format, ResponseFormat::Lines);
        assert_eq!(outcome.exercises.multiple_choice.len(), 1);
        assert_eq!(
            outcome.exercises.multiple_choice[0].content,
            "Il a dit {\"ok\": true} hier."
        );
    }

    #[test]
    fn exercise_set_after_an_unrelated_object_is_found() {
        let response = r#"Schema note: {"version": 1}
{"multiple_choice": [{"content": "Salut", "questions": [
  {"question": "Ça va?", "options": ["Oui", "Non"], "correct_answer": "Oui"}
]}]}"#;
        let outcome = parse_model_response(response);
        assert_eq!(outcome.format, ResponseFormat::Json);
        assert_eq!(outcome.exercises.multiple_choice.len(), 1);
    }

    #[test]
    fn artifact_parse_counts_stray_types() {
        let text = render_exercises(&sample_exercises());
        let (exercises, report) = parse_artifact(&text, ExerciseType::DialogMatching);
        assert_eq!(exercises.len(), 1);
        assert_eq!(report.discarded, 2);
    }
}
