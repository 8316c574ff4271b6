//! State machine over the line-oriented exercise grammar.
//!
//! One machine reads all three exercise kinds so that a raw model response
//! mixing categories parses the same way as a single-type artifact file.
//! Markers only match at the start of a trimmed line, longest marker first,
//! so marker text appearing inside content is never mistaken for structure.

use std::collections::BTreeMap;

use tracing::debug;

use super::ParseReport;
use crate::types::{
    DialogMatching, Exercise, ExerciseSet, MultipleChoice, OtherExercise, Question,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No question pending; expecting `Content:`, `Question:` or any header.
    SeekingContent,
    /// A `Question:` line was read, no option yet.
    InQuestion,
    /// Options of the pending question are being collected.
    InOptions,
    /// Inside a dialog-matching draft, between sections.
    SeekingSection,
    InDialogs,
    InImages,
    InMatches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Marker {
    Content,
    Question,
    Bullet,
    CorrectAnswer,
    DialogsHeader,
    ImagesHeader,
    MatchesHeader,
    Dialog,
    MatchesWith,
    Type,
    Solution,
}

impl Marker {
    fn is_header(self) -> bool {
        matches!(
            self,
            Marker::DialogsHeader | Marker::ImagesHeader | Marker::MatchesHeader
        )
    }
}

/// Sorted by descending length so the longest marker wins.
const MARKERS: [(&str, Marker); 11] = [
    ("Correct matches:", Marker::MatchesHeader),
    ("Correct answer:", Marker::CorrectAnswer),
    ("Matches with:", Marker::MatchesWith),
    ("Question:", Marker::Question),
    ("Solution:", Marker::Solution),
    ("Content:", Marker::Content),
    ("Dialogs:", Marker::DialogsHeader),
    ("Dialog:", Marker::Dialog),
    ("Images:", Marker::ImagesHeader),
    ("Type:", Marker::Type),
    ("- ", Marker::Bullet),
];

/// Classify a trimmed, non-empty line. Section headers must stand alone.
pub(crate) fn classify(line: &str) -> Option<(Marker, &str)> {
    for (prefix, marker) in MARKERS {
        let Some(head) = line.get(..prefix.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(prefix) {
            continue;
        }
        let rest = line[prefix.len()..].trim();
        if marker.is_header() && !rest.is_empty() {
            return None;
        }
        return Some((marker, rest));
    }
    None
}

#[derive(Debug)]
struct QuestionDraft {
    question: String,
    options: Vec<String>,
}

#[derive(Debug)]
enum Draft {
    MultipleChoice {
        content: String,
        questions: Vec<Question>,
        pending: Option<QuestionDraft>,
    },
    DialogMatching {
        dialogs: Vec<String>,
        images: Vec<String>,
        matches: BTreeMap<String, String>,
        pending_dialog: Option<String>,
    },
    Other {
        kind: Option<String>,
        content: Option<String>,
        solution: Option<String>,
    },
}

impl Draft {
    fn multiple_choice(content: &str) -> Self {
        Draft::MultipleChoice {
            content: content.to_string(),
            questions: Vec::new(),
            pending: None,
        }
    }

    fn dialog_matching() -> Self {
        Draft::DialogMatching {
            dialogs: Vec::new(),
            images: Vec::new(),
            matches: BTreeMap::new(),
            pending_dialog: None,
        }
    }

    fn build(self, report: &mut ParseReport) -> Exercise {
        match self {
            Draft::MultipleChoice {
                content,
                questions,
                pending,
            } => {
                if let Some(question) = pending {
                    debug!(
                        question = %question.question,
                        "dropping question without correct answer"
                    );
                    report.dropped_questions += 1;
                }
                Exercise::MultipleChoice(MultipleChoice { content, questions })
            }
            Draft::DialogMatching {
                dialogs,
                images,
                matches,
                pending_dialog,
            } => {
                if let Some(dialog) = pending_dialog {
                    debug!(%dialog, "dropping dialog without a match");
                    report.skipped_lines += 1;
                }
                Exercise::DialogMatching(DialogMatching {
                    dialogs,
                    images,
                    correct_matches: matches,
                })
            }
            Draft::Other {
                kind,
                content,
                solution,
            } => Exercise::Other(OtherExercise {
                kind: kind.unwrap_or_default(),
                content: content.unwrap_or_default(),
                solution: solution.unwrap_or_default(),
            }),
        }
    }
}

pub struct LineParser {
    state: State,
    draft: Option<Draft>,
    exercises: ExerciseSet,
    report: ParseReport,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            state: State::SeekingContent,
            draft: None,
            exercises: ExerciseSet::default(),
            report: ParseReport::default(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn feed(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match classify(line) {
            Some((marker, rest)) => self.on_marker(marker, rest, line),
            None => {
                if matches!(
                    self.state,
                    State::InDialogs | State::InImages | State::InMatches
                ) {
                    self.state = State::SeekingSection;
                }
                self.skip(line, "unrecognized line");
            }
        }
    }

    pub fn finish(mut self) -> (ExerciseSet, ParseReport) {
        self.flush();
        (self.exercises, self.report)
    }

    fn on_marker(&mut self, marker: Marker, rest: &str, line: &str) {
        match marker {
            Marker::Content => self.on_content(rest),
            Marker::Question => self.on_question(rest),
            Marker::Bullet => self.on_bullet(rest, line),
            Marker::CorrectAnswer => self.on_correct_answer(rest, line),
            Marker::DialogsHeader => {
                let reuse = matches!(
                    &self.draft,
                    Some(Draft::DialogMatching { dialogs, .. }) if dialogs.is_empty()
                );
                if !reuse {
                    self.start(Draft::dialog_matching());
                }
                self.state = State::InDialogs;
            }
            Marker::ImagesHeader => {
                self.ensure_dialog_matching();
                self.state = State::InImages;
            }
            Marker::MatchesHeader => {
                self.ensure_dialog_matching();
                self.state = State::InMatches;
            }
            Marker::Dialog => self.on_dialog(rest, line),
            Marker::MatchesWith => self.on_matches_with(rest, line),
            Marker::Type => self.on_type(rest),
            Marker::Solution => self.on_solution(rest),
        }
    }

    fn on_content(&mut self, rest: &str) {
        if let Some(Draft::Other { content, .. }) = &mut self.draft {
            if content.is_none() {
                *content = Some(rest.to_string());
                return;
            }
        }
        self.start(Draft::multiple_choice(rest));
        self.state = State::SeekingContent;
    }

    fn on_question(&mut self, rest: &str) {
        if !matches!(self.draft, Some(Draft::MultipleChoice { .. })) {
            self.start(Draft::multiple_choice(""));
        }
        if let Some(Draft::MultipleChoice { pending, .. }) = &mut self.draft {
            if let Some(dropped) = pending.take() {
                debug!(question = %dropped.question, "dropping question without correct answer");
                self.report.dropped_questions += 1;
            }
            *pending = Some(QuestionDraft {
                question: rest.to_string(),
                options: Vec::new(),
            });
        }
        self.state = State::InQuestion;
    }

    fn on_bullet(&mut self, rest: &str, line: &str) {
        let next = match (self.state, self.draft.as_mut()) {
            (
                State::InQuestion | State::InOptions,
                Some(Draft::MultipleChoice {
                    pending: Some(question),
                    ..
                }),
            ) => {
                question.options.push(rest.to_string());
                Some(State::InOptions)
            }
            (State::InDialogs, Some(Draft::DialogMatching { dialogs, .. })) => {
                dialogs.push(rest.to_string());
                Some(State::InDialogs)
            }
            (State::InImages, Some(Draft::DialogMatching { images, .. })) => {
                images.push(rest.to_string());
                Some(State::InImages)
            }
            _ => None,
        };
        match next {
            Some(state) => self.state = state,
            None => self.skip(line, "list item outside a list"),
        }
    }

    fn on_correct_answer(&mut self, rest: &str, line: &str) {
        if let Some(Draft::MultipleChoice {
            questions, pending, ..
        }) = &mut self.draft
        {
            if let Some(question) = pending.take() {
                questions.push(Question {
                    question: question.question,
                    options: question.options,
                    correct_answer: rest.to_string(),
                });
                self.state = State::SeekingContent;
                return;
            }
        }
        self.skip(line, "answer without a question");
    }

    fn on_dialog(&mut self, rest: &str, line: &str) {
        if let Some(Draft::DialogMatching { pending_dialog, .. }) = &mut self.draft {
            if let Some(dangling) = pending_dialog.replace(rest.to_string()) {
                debug!(dialog = %dangling, "dropping dialog without a match");
                self.report.skipped_lines += 1;
            }
            self.state = State::InMatches;
            return;
        }
        self.skip(line, "match outside a dialog matching exercise");
    }

    fn on_matches_with(&mut self, rest: &str, line: &str) {
        if let Some(Draft::DialogMatching {
            matches,
            pending_dialog,
            ..
        }) = &mut self.draft
        {
            if let Some(dialog) = pending_dialog.take() {
                if matches.contains_key(&dialog) {
                    debug!(%dialog, "keeping first match of repeated dialog");
                    self.report.skipped_lines += 1;
                } else {
                    matches.insert(dialog, rest.to_string());
                }
                self.state = State::InMatches;
                return;
            }
        }
        self.skip(line, "image without a dialog");
    }

    fn on_type(&mut self, rest: &str) {
        if let Some(content) = self.take_questionless_content() {
            self.draft = Some(Draft::Other {
                kind: Some(rest.to_string()),
                content: Some(content),
                solution: None,
            });
        } else if matches!(self.draft, Some(Draft::Other { kind: None, .. })) {
            if let Some(Draft::Other { kind, .. }) = &mut self.draft {
                *kind = Some(rest.to_string());
            }
        } else {
            self.start(Draft::Other {
                kind: Some(rest.to_string()),
                content: None,
                solution: None,
            });
        }
        self.state = State::SeekingContent;
    }

    fn on_solution(&mut self, rest: &str) {
        if let Some(content) = self.take_questionless_content() {
            self.draft = Some(Draft::Other {
                kind: None,
                content: Some(content),
                solution: Some(rest.to_string()),
            });
        } else if matches!(self.draft, Some(Draft::Other { solution: None, .. })) {
            if let Some(Draft::Other { solution, .. }) = &mut self.draft {
                *solution = Some(rest.to_string());
            }
        } else {
            self.start(Draft::Other {
                kind: None,
                content: None,
                solution: Some(rest.to_string()),
            });
        }
        self.state = State::SeekingContent;
    }

    /// A `Content:` line that never got a question belongs to an `Other`
    /// exercise written content-first.
    fn take_questionless_content(&mut self) -> Option<String> {
        let questionless = matches!(
            &self.draft,
            Some(Draft::MultipleChoice { questions, pending: None, .. }) if questions.is_empty()
        );
        if !questionless {
            return None;
        }
        match self.draft.take() {
            Some(Draft::MultipleChoice { content, .. }) => Some(content),
            _ => None,
        }
    }

    fn ensure_dialog_matching(&mut self) {
        if !matches!(self.draft, Some(Draft::DialogMatching { .. })) {
            self.start(Draft::dialog_matching());
        }
    }

    fn start(&mut self, draft: Draft) {
        self.flush();
        self.draft = Some(draft);
    }

    fn flush(&mut self) {
        let Some(draft) = self.draft.take() else {
            return;
        };
        self.state = State::SeekingContent;
        let exercise = draft.build(&mut self.report).normalized();
        match exercise.validate() {
            Ok(()) => self.exercises.push(exercise),
            Err(reason) => {
                debug!(
                    exercise_type = %exercise.exercise_type(),
                    %reason,
                    "discarding invalid exercise"
                );
                self.report.discarded += 1;
            }
        }
    }

    fn skip(&mut self, line: &str, why: &'static str) {
        debug!(line, state = ?self.state, "skipping line: {why}");
        self.report.skipped_lines += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> (ExerciseSet, ParseReport) {
        let mut parser = LineParser::new();
        for line in text.lines() {
            parser.feed(line);
        }
        parser.finish()
    }

    #[test]
    fn classify_prefers_longest_marker() {
        assert_eq!(
            classify("Correct matches:"),
            Some((Marker::MatchesHeader, ""))
        );
        assert_eq!(
            classify("Correct answer: B"),
            Some((Marker::CorrectAnswer, "B"))
        );
        assert_eq!(classify("Dialog: Salut"), Some((Marker::Dialog, "Salut")));
        assert_eq!(classify("Dialogs:"), Some((Marker::DialogsHeader, "")));
        assert_eq!(classify("question: lower"), Some((Marker::Question, "lower")));
    }

    #[test]
    fn classify_matches_only_at_line_start() {
        assert_eq!(classify("The Question: is here"), None);
        assert_eq!(classify("Images: a cat"), None);
        assert_eq!(classify("-no space"), None);
    }

    #[test]
    fn states_follow_multiple_choice_lines() {
        let mut parser = LineParser::new();
        parser.feed("Content: Bonjour");
        assert_eq!(parser.state(), State::SeekingContent);
        parser.feed("Question: Ça va?");
        assert_eq!(parser.state(), State::InQuestion);
        parser.feed("- oui");
        assert_eq!(parser.state(), State::InOptions);
        parser.feed("Correct answer: oui");
        assert_eq!(parser.state(), State::SeekingContent);
    }

    #[test]
    fn states_follow_dialog_sections() {
        let mut parser = LineParser::new();
        parser.feed("Dialogs:");
        assert_eq!(parser.state(), State::InDialogs);
        parser.feed("some narration");
        assert_eq!(parser.state(), State::SeekingSection);
        parser.feed("- ignored bullet");
        parser.feed("Images:");
        assert_eq!(parser.state(), State::InImages);
        parser.feed("Correct matches:");
        assert_eq!(parser.state(), State::InMatches);
    }

    #[test]
    fn question_without_answer_is_dropped_but_siblings_kept() {
        let (set, report) = run(
            "Content: Il fait beau.\n\
             Question: Quel temps?\n- Beau\n- Pluie\nCorrect answer: Beau\n\
             Question: Quelle saison?\n- Été\n- Hiver\n\
             Question: Où?\n- Paris\n- Lyon\nCorrect answer: Paris\n",
        );
        assert_eq!(set.multiple_choice.len(), 1);
        let questions = &set.multiple_choice[0].questions;
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].question, "Quel temps?");
        assert_eq!(questions[1].question, "Où?");
        assert_eq!(report.dropped_questions, 1);
    }

    #[test]
    fn trailing_question_without_answer_is_dropped() {
        let (set, report) = run(
            "Content: A\nQuestion: Q1\n- a\n- b\nCorrect answer: a\nQuestion: Q2\n- c\n- d\n",
        );
        assert_eq!(set.multiple_choice[0].questions.len(), 1);
        assert_eq!(report.dropped_questions, 1);
    }

    #[test]
    fn content_only_block_is_discarded_with_count() {
        let (set, report) = run("Content: nothing to ask\n");
        assert!(set.is_empty());
        assert_eq!(report.discarded, 1);
    }

    #[test]
    fn several_multiple_choice_blocks_in_one_text() {
        let (set, _) = run(
            "Content: A\nQuestion: Q\n- x\n- y\nCorrect answer: x\n\n\
             Content: B\nQuestion: R\n- z\n- w\nCorrect answer: w\n",
        );
        assert_eq!(set.multiple_choice.len(), 2);
        assert_eq!(set.multiple_choice[1].content, "B");
    }

    #[test]
    fn dialog_matching_with_matches() {
        let (set, report) = run(
            "Dialogs:\n- A\n- B\n\nImages:\n- X\n- Y\n\nCorrect matches:\nDialog: A\nMatches with: X\n",
        );
        assert!(report.is_clean());
        let dm = &set.dialog_matching[0];
        assert_eq!(dm.dialogs, vec!["A", "B"]);
        assert_eq!(dm.images, vec!["X", "Y"]);
        assert_eq!(
            dm.correct_matches,
            BTreeMap::from([("A".to_string(), "X".to_string())])
        );
    }

    #[test]
    fn match_on_unknown_dialog_rejects_exercise() {
        let (set, report) = run(
            "Dialogs:\n- A\n- B\nImages:\n- X\n- Y\nCorrect matches:\nDialog: C\nMatches with: X\n",
        );
        assert!(set.dialog_matching.is_empty());
        assert_eq!(report.discarded, 1);
    }

    #[test]
    fn repeated_dialog_keeps_first_match() {
        let (set, report) = run(
            "Dialogs:\n- A\nImages:\n- X\n- Y\nCorrect matches:\nDialog: A\nMatches with: X\nDialog: A\nMatches with: Y\n",
        );
        assert_eq!(set.dialog_matching[0].correct_matches["A"], "X");
        assert_eq!(report.skipped_lines, 1);
    }

    #[test]
    fn new_dialogs_header_starts_new_exercise() {
        let (set, _) = run("Dialogs:\n- A\nImages:\n- X\nDialogs:\n- B\nImages:\n- Y\n");
        assert_eq!(set.dialog_matching.len(), 2);
        assert_eq!(set.dialog_matching[1].dialogs, vec!["B"]);
    }

    #[test]
    fn other_exercise_in_any_field_order() {
        let (set, _) = run(
            "Type: dictation\nContent: Écrivez.\nSolution: Oui.\n\
             Content: Traduisez.\nType: translation\nSolution: Translate.\n",
        );
        assert_eq!(set.other_exercises.len(), 2);
        assert_eq!(set.other_exercises[0].kind, "dictation");
        assert_eq!(set.other_exercises[1].kind, "translation");
        assert_eq!(set.other_exercises[1].content, "Traduisez.");
        assert_eq!(set.other_exercises[1].solution, "Translate.");
    }

    #[test]
    fn marker_text_inside_content_is_literal() {
        let (set, _) = run(
            "Content: He said Question: why?\nQuestion: What did he say? Correct answer: none\n- why\n- how\nCorrect answer: why\n",
        );
        let mc = &set.multiple_choice[0];
        assert_eq!(mc.content, "He said Question: why?");
        assert_eq!(mc.questions[0].question, "What did he say? Correct answer: none");
    }

    #[test]
    fn unrecognized_lines_are_counted() {
        let (set, report) = run("hello\nworld\n");
        assert!(set.is_empty());
        assert_eq!(report.skipped_lines, 2);
        assert_eq!(report.discarded, 0);
    }
}
