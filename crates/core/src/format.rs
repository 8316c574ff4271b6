//! Line-oriented rendering of exercises.
//!
//! Everything written here is read back by [`crate::parser`]: artifact files,
//! the few-shot block shown to the model and the canonical form used for ids
//! all share this one format.

use crate::types::{DialogMatching, Exercise, ExerciseType, MultipleChoice, OtherExercise};

pub fn render_multiple_choice(mc: &MultipleChoice) -> String {
    let mut output = String::new();
    output.push_str(&format!("Content: {}\n", mc.content));
    for q in &mc.questions {
        output.push_str(&format!("Question: {}\n", q.question));
        for option in &q.options {
            output.push_str(&format!("- {}\n", option));
        }
        output.push_str(&format!("Correct answer: {}\n\n", q.correct_answer));
    }
    output
}

pub fn render_dialog_matching(dm: &DialogMatching) -> String {
    let mut output = String::from("Dialogs:\n");
    for dialog in &dm.dialogs {
        output.push_str(&format!("- {}\n", dialog));
    }

    output.push_str("\nImages:\n");
    for image in &dm.images {
        output.push_str(&format!("- {}\n", image));
    }

    output.push_str("\nCorrect matches:\n");
    for (dialog, image) in &dm.correct_matches {
        output.push_str(&format!("Dialog: {}\n", dialog));
        output.push_str(&format!("Matches with: {}\n\n", image));
    }
    output
}

pub fn render_other(other: &OtherExercise) -> String {
    format!(
        "Type: {}\nContent: {}\nSolution: {}\n",
        other.kind, other.content, other.solution
    )
}

pub fn render_exercise(exercise: &Exercise) -> String {
    match exercise {
        Exercise::MultipleChoice(mc) => render_multiple_choice(mc),
        Exercise::DialogMatching(dm) => render_dialog_matching(dm),
        Exercise::Other(other) => render_other(other),
    }
}

/// Several exercises of one file, separated by blank lines.
pub fn render_exercises<'a>(exercises: impl IntoIterator<Item = &'a Exercise>) -> String {
    exercises
        .into_iter()
        .map(|e| render_exercise(&e.normalized()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Few-shot block placed in generation prompts.
pub fn render_examples_block(exercise_type: ExerciseType, examples: &[Exercise]) -> String {
    if examples.is_empty() {
        return String::new();
    }
    let mut output = format!(
        "Here are some example {} exercises:\n\n",
        exercise_type.label()
    );
    output.push_str(&render_exercises(examples));
    output.push('\n');
    output
}

/// Human-readable rendering for terminal output.
pub fn format_exercise_readable(exercise: &Exercise) -> String {
    let mut output = String::new();
    match exercise {
        Exercise::MultipleChoice(mc) => {
            output.push_str("# Multiple choice\n\n");
            if !mc.content.is_empty() {
                output.push_str(&format!("{}\n\n", mc.content));
            }
            for (i, q) in mc.questions.iter().enumerate() {
                output.push_str(&format!("{}. {}\n", i + 1, q.question));
                for option in &q.options {
                    let mark = if *option == q.correct_answer { "✓" } else { "•" };
                    output.push_str(&format!("   {} {}\n", mark, option));
                }
                output.push('\n');
            }
        }
        Exercise::DialogMatching(dm) => {
            output.push_str("# Dialog matching\n\n## Dialogs\n\n");
            for (i, dialog) in dm.dialogs.iter().enumerate() {
                output.push_str(&format!("{}. {}\n", i + 1, dialog));
            }
            output.push_str("\n## Images\n\n");
            for image in &dm.images {
                output.push_str(&format!("• {}\n", image));
            }
            output.push_str("\n## Matches\n\n");
            for (dialog, image) in &dm.correct_matches {
                output.push_str(&format!("{} → {}\n", dialog, image));
            }
        }
        Exercise::Other(other) => {
            output.push_str(&format!("# {}\n\n{}\n\n", other.kind, other.content));
            if !other.solution.is_empty() {
                output.push_str(&format!("**Solution:** {}\n", other.solution));
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::Question;

    #[test]
    fn multiple_choice_layout() {
        let mc = MultipleChoice {
            content: "Il fait beau.".into(),
            questions: vec![Question {
                question: "Quel temps fait-il?".into(),
                options: vec!["Beau".into(), "Pluie".into()],
                correct_answer: "Beau".into(),
            }],
        };
        assert_eq!(
            render_multiple_choice(&mc),
            "Content: Il fait beau.\nQuestion: Quel temps fait-il?\n- Beau\n- Pluie\nCorrect answer: Beau\n\n"
        );
    }

    #[test]
    fn dialog_matching_layout() {
        let dm = DialogMatching {
            dialogs: vec!["A".into(), "B".into()],
            images: vec!["X".into()],
            correct_matches: BTreeMap::from([("A".to_string(), "X".to_string())]),
        };
        assert_eq!(
            render_dialog_matching(&dm),
            "Dialogs:\n- A\n- B\n\nImages:\n- X\n\nCorrect matches:\nDialog: A\nMatches with: X\n\n"
        );
    }

    #[test]
    fn empty_examples_render_nothing() {
        assert!(render_examples_block(ExerciseType::MultipleChoice, &[]).is_empty());
    }

    #[test]
    fn examples_block_has_header() {
        let other = Exercise::Other(OtherExercise {
            kind: "dictation".into(),
            content: "Écoutez.".into(),
            solution: "Oui".into(),
        });
        let block = render_examples_block(ExerciseType::Other, &[other]);
        assert!(block.starts_with("Here are some example other exercises:\n\nType: dictation\n"));
    }
}
