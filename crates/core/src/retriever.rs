use std::cmp::Ordering;

use tracing::debug;

use crate::{
    embedding::cosine_similarity,
    error::Result,
    store::ContentStore,
    types::{Exercise, ExerciseRecord, ExerciseType},
};

/// A stored record and how close it is to the query.
#[derive(Debug, Clone)]
pub struct Hit<'a> {
    pub record: &'a ExerciseRecord,
    pub score: f32,
}

/// Nearest-neighbour lookup over one collection of a [`ContentStore`].
///
/// The query text is embedded with the store's own embedder, so query and
/// index vectors always share a model.
#[derive(Clone, Copy)]
pub struct SimilarityRetriever<'a> {
    store: &'a ContentStore,
}

impl<'a> SimilarityRetriever<'a> {
    pub fn new(store: &'a ContentStore) -> Self {
        Self { store }
    }

    /// Up to `min(k, count)` exercises, most similar first.
    pub async fn query(
        &self,
        text: &str,
        exercise_type: ExerciseType,
        k: usize,
    ) -> Result<Vec<Exercise>> {
        Ok(self
            .query_scored(text, exercise_type, k)
            .await?
            .into_iter()
            .map(|hit| hit.record.exercise().clone())
            .collect())
    }

    pub async fn query_scored(
        &self,
        text: &str,
        exercise_type: ExerciseType,
        k: usize,
    ) -> Result<Vec<Hit<'a>>> {
        let k = k.min(self.store.count(exercise_type));
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = self.store.embedder().embed(text).await?;
        let mut hits: Vec<Hit<'a>> = self
            .store
            .entries(exercise_type)
            .map(|entry| Hit {
                record: &entry.record,
                score: cosine_similarity(&query, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.record.id().cmp(b.record.id()))
        });
        hits.truncate(k);

        debug!(
            %exercise_type,
            k,
            top_score = hits.first().map(|hit| hit.score),
            "similarity query"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        embedding::{EmbedResult, Embedder, HashingEmbedder},
        types::{MultipleChoice, Question},
    };

    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> EmbedResult<Vec<f32>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.inner.embed(text).await
        }

        fn model_id(&self) -> &str {
            self.inner.model_id()
        }
    }

    fn mc(content: &str) -> Exercise {
        Exercise::MultipleChoice(MultipleChoice {
            content: content.to_string(),
            questions: vec![Question {
                question: "Vrai ou faux?".into(),
                options: vec!["Vrai".into(), "Faux".into()],
                correct_answer: "Faux".into(),
            }],
        })
    }

    async fn store_with(contents: &[&str]) -> ContentStore {
        let mut store = ContentStore::in_memory(Arc::new(HashingEmbedder::default()));
        for content in contents {
            store
                .upsert(ExerciseRecord::new(mc(content), "vid"))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn query_clamps_to_collection_size() {
        let store = store_with(&["Bonjour, ça va?", "Il fait beau."]).await;
        let retriever = SimilarityRetriever::new(&store);

        let hits = retriever
            .query_scored("greeting", ExerciseType::MultipleChoice, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn closest_exercise_ranks_first() {
        let store = store_with(&["Bonjour, ça va?", "Il fait beau aujourd'hui."]).await;
        let results = SimilarityRetriever::new(&store)
            .query("Il fait beau", ExerciseType::MultipleChoice, 1)
            .await
            .unwrap();
        assert_eq!(results, vec![mc("Il fait beau aujourd'hui.")]);
    }

    #[tokio::test]
    async fn empty_collection_or_zero_k_skips_the_embedder() {
        let embedder = Arc::new(CountingEmbedder {
            inner: HashingEmbedder::new(16),
            calls: AtomicUsize::new(0),
        });
        let mut store = ContentStore::in_memory(embedder.clone());
        store
            .upsert(ExerciseRecord::new(mc("Salut"), "vid"))
            .await
            .unwrap();
        let before = embedder.calls.load(AtomicOrdering::SeqCst);

        let retriever = SimilarityRetriever::new(&store);
        assert!(
            retriever
                .query("x", ExerciseType::DialogMatching, 3)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            retriever
                .query("x", ExerciseType::MultipleChoice, 0)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), before);
    }

    #[tokio::test]
    async fn equal_scores_are_ordered_by_id() {
        let store = store_with(&["Un", "Deux", "Trois"]).await;
        let hits = SimilarityRetriever::new(&store)
            .query_scored("", ExerciseType::MultipleChoice, 3)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|hit| hit.record.id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
