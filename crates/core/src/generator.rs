//! Few-shot exercise generation.
//!
//! Similar stored exercises are retrieved for the topic, rendered in the
//! artifact line format and placed in front of a fixed instruction. The
//! model's answer is read back with the same parser.

use tracing::{debug, info, warn};

use crate::{
    error::{EcouteError, Result},
    format::render_examples_block,
    parser::{self, ParseReport},
    provider::{CompletionParams, CompletionService},
    retriever::SimilarityRetriever,
    types::{Exercise, ExerciseRecord, ExerciseType},
};

/// Source id given to records produced by the generator.
pub const GENERATED_SOURCE_ID: &str = "generated";

pub const DEFAULT_EXAMPLES: usize = 2;
pub const MULTIPLE_CHOICE_QUESTIONS: usize = 4;
pub const DIALOG_MATCHING_DIALOGS: usize = 5;

pub struct ExerciseGenerator<'a> {
    completion: &'a dyn CompletionService,
    retriever: SimilarityRetriever<'a>,
    params: CompletionParams,
    examples: usize,
}

impl<'a> ExerciseGenerator<'a> {
    pub fn new(completion: &'a dyn CompletionService, retriever: SimilarityRetriever<'a>) -> Self {
        Self {
            completion,
            retriever,
            params: CompletionParams::GENERATION,
            examples: DEFAULT_EXAMPLES,
        }
    }

    pub fn with_params(mut self, params: CompletionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_examples(mut self, examples: usize) -> Self {
        self.examples = examples;
        self
    }

    /// Prompt that [`generate`](Self::generate) would send for `topic`.
    pub async fn build_prompt(&self, topic: &str, exercise_type: ExerciseType) -> Result<String> {
        let examples = self
            .retriever
            .query(topic, exercise_type, self.examples)
            .await?;
        if examples.is_empty() {
            debug!(%exercise_type, "no stored examples, generating zero-shot");
        }
        Ok(generation_prompt(
            topic,
            exercise_type,
            &render_examples_block(exercise_type, &examples),
        ))
    }

    pub async fn generate(&self, topic: &str, exercise_type: ExerciseType) -> Result<Exercise> {
        let prompt = self.build_prompt(topic, exercise_type).await?;
        info!(topic, %exercise_type, model = self.completion.model(), "generating exercise");

        let response = self.completion.complete(&prompt, &self.params).await?;
        let (exercise, report) = read_generation(&response, exercise_type)?;
        if !report.is_clean() {
            debug!(%report, "generation response parsed with losses");
        }
        warn_on_unexpected_size(&exercise);
        Ok(exercise)
    }

    pub async fn generate_record(
        &self,
        topic: &str,
        exercise_type: ExerciseType,
    ) -> Result<ExerciseRecord> {
        let exercise = self.generate(topic, exercise_type).await?;
        Ok(ExerciseRecord::new(exercise, GENERATED_SOURCE_ID))
    }
}

/// First valid exercise of `exercise_type` in a model answer. The line
/// grammar is tried first, then an embedded JSON object.
fn read_generation(
    response: &str,
    exercise_type: ExerciseType,
) -> Result<(Exercise, ParseReport)> {
    let lines = parser::parse_lines(response);
    let mut report = lines.report;
    if let Some(exercise) = lines.exercises.of_type(exercise_type).into_iter().next() {
        return Ok((exercise, report));
    }

    let fallback = parser::parse_model_response(response);
    if fallback.format == parser::ResponseFormat::Json {
        report.merge(fallback.report);
        if let Some(exercise) = fallback.exercises.of_type(exercise_type).into_iter().next() {
            return Ok((exercise, report));
        }
    }

    Err(EcouteError::MalformedGeneration {
        exercise_type,
        report,
    })
}

fn warn_on_unexpected_size(exercise: &Exercise) {
    match exercise {
        Exercise::MultipleChoice(mc) if mc.questions.len() != MULTIPLE_CHOICE_QUESTIONS => {
            warn!(
                expected = MULTIPLE_CHOICE_QUESTIONS,
                got = mc.questions.len(),
                "generated exercise has an unexpected number of questions"
            );
        }
        Exercise::DialogMatching(dm) if dm.dialogs.len() != DIALOG_MATCHING_DIALOGS => {
            warn!(
                expected = DIALOG_MATCHING_DIALOGS,
                got = dm.dialogs.len(),
                "generated exercise has an unexpected number of dialogs"
            );
        }
        _ => {}
    }
}

fn generation_prompt(topic: &str, exercise_type: ExerciseType, examples: &str) -> String {
    let preamble = if examples.is_empty() {
        String::new()
    } else {
        format!("Based on these example exercises:\n\n{examples}\n")
    };

    let instructions = match exercise_type {
        ExerciseType::MultipleChoice => format!(
            r#"Generate a new multiple choice exercise about {topic}.
Use exactly this format, one item per line:
Content: <a short passage>
Question: <question>
- <option>
- <option>
Correct answer: <one of the options, copied exactly>

Please generate exactly {MULTIPLE_CHOICE_QUESTIONS} questions.
Make sure the exercise is educational and the correct answers are clearly indicated.
The content should be a complete text with proper punctuation, using periods (.) at the end of sentences."#
        ),
        ExerciseType::DialogMatching => format!(
            r#"Generate a new dialog matching exercise about {topic}.
Use exactly this format, one item per line:
Dialogs:
- <dialog>

Images:
- <image description>

Correct matches:
Dialog: <a dialog, copied exactly>
Matches with: <an image description, copied exactly>

Please generate exactly {DIALOG_MATCHING_DIALOGS} dialogs.
The content should be a complete text with proper punctuation, using periods (.) at the end of sentences.
Make sure the dialogs and images are related and the matches make logical sense."#
        ),
        ExerciseType::Other => format!(
            r#"Generate one new listening exercise about {topic} that is neither multiple choice nor dialog matching.
Use exactly this format:
Type: <kind of exercise>
Content: <the exercise>
Solution: <the solution>

Output only the exercise, nothing else."#
        ),
    };

    format!("{preamble}{instructions}")
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        embedding::HashingEmbedder,
        provider::CompletionError,
        store::ContentStore,
        types::{MultipleChoice, Question},
    };

    struct ScriptedCompletion {
        responses: Mutex<Vec<std::result::Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCompletion {
        fn new(responses: Vec<std::result::Result<&str, &str>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .rev()
                        .map(|r| r.map(String::from).map_err(String::from))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletion {
        async fn complete(
            &self,
            prompt: &str,
            _params: &CompletionParams,
        ) -> std::result::Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err("no scripted response".into()))
                .map_err(CompletionError::Other)
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn empty_store() -> ContentStore {
        ContentStore::in_memory(Arc::new(HashingEmbedder::new(64)))
    }

    const MC_RESPONSE: &str = "Content: Au restaurant, Marie commande une salade.
Question: Que commande Marie?
- Une salade
- Une pizza
Correct answer: Une salade
";

    #[tokio::test]
    async fn empty_collection_generates_zero_shot() {
        let store = empty_store();
        let completion = ScriptedCompletion::new(vec![Ok(MC_RESPONSE)]);
        let generator = ExerciseGenerator::new(&completion, SimilarityRetriever::new(&store));

        let exercise = generator
            .generate("ordering food", ExerciseType::MultipleChoice)
            .await
            .unwrap();
        let Exercise::MultipleChoice(mc) = exercise else {
            panic!("expected multiple choice");
        };
        assert_eq!(mc.questions[0].correct_answer, "Une salade");

        let prompts = completion.prompts.lock().unwrap();
        assert!(!prompts[0].contains("Based on these example exercises"));
        assert!(prompts[0].contains("exactly 4 questions"));
    }

    #[tokio::test]
    async fn stored_examples_are_rendered_into_the_prompt() {
        let mut store = empty_store();
        store
            .upsert(ExerciseRecord::new(
                Exercise::MultipleChoice(MultipleChoice {
                    content: "Le serveur apporte le menu.".into(),
                    questions: vec![Question {
                        question: "Qui apporte le menu?".into(),
                        options: vec!["Le serveur".into(), "Le chef".into()],
                        correct_answer: "Le serveur".into(),
                    }],
                }),
                "vid",
            ))
            .await
            .unwrap();

        let completion = ScriptedCompletion::new(vec![Ok(MC_RESPONSE)]);
        let generator = ExerciseGenerator::new(&completion, SimilarityRetriever::new(&store));
        let record = generator
            .generate_record("restaurant", ExerciseType::MultipleChoice)
            .await
            .unwrap();
        assert_eq!(record.source_video_id(), GENERATED_SOURCE_ID);

        let prompts = completion.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("Based on these example exercises:"));
        assert!(prompts[0].contains("Here are some example multiple choice exercises:"));
        assert!(prompts[0].contains("Correct answer: Le serveur"));
    }

    #[tokio::test]
    async fn completion_failure_is_generation_failed() {
        let store = empty_store();
        let completion = ScriptedCompletion::new(vec![Err("timeout")]);
        let generator = ExerciseGenerator::new(&completion, SimilarityRetriever::new(&store));
        let err = generator
            .generate("weather", ExerciseType::Other)
            .await
            .unwrap_err();
        assert!(matches!(err, EcouteError::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn unparseable_answer_is_malformed_generation() {
        let store = empty_store();
        let completion = ScriptedCompletion::new(vec![Ok(
            "Dialogs:\n- Bonjour.\nImages:\n- Une gare\nCorrect matches:\nDialog: Au revoir.\nMatches with: Une gare\n",
        )]);
        let generator = ExerciseGenerator::new(&completion, SimilarityRetriever::new(&store));
        let err = generator
            .generate("greetings", ExerciseType::DialogMatching)
            .await
            .unwrap_err();
        match err {
            EcouteError::MalformedGeneration {
                exercise_type,
                report,
            } => {
                assert_eq!(exercise_type, ExerciseType::DialogMatching);
                assert_eq!(report.discarded, 1);
            }
            other => panic!("expected MalformedGeneration, got {other}"),
        }
    }

    #[tokio::test]
    async fn json_answer_is_accepted() {
        let store = empty_store();
        let completion = ScriptedCompletion::new(vec![Ok(
            r#"```json
{"other_exercises": [{"type": "dictation", "content": "Écrivez: il pleut.", "solution": "Il pleut."}]}
```"#,
        )]);
        let generator = ExerciseGenerator::new(&completion, SimilarityRetriever::new(&store));
        let exercise = generator
            .generate("weather", ExerciseType::Other)
            .await
            .unwrap();
        assert_eq!(exercise.exercise_type(), ExerciseType::Other);
    }

    #[test]
    fn prompt_asks_for_five_dialogs() {
        let prompt = generation_prompt("the train", ExerciseType::DialogMatching, "");
        assert!(prompt.contains("about the train"));
        assert!(prompt.contains("exactly 5 dialogs"));
    }
}
