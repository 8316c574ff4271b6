//! Content-addressed exercise store.
//!
//! One collection per [`ExerciseType`], each an id → (record, vector) map
//! persisted as `<root>/<collection>.json`. Ids are derived from content, so
//! re-indexing the same exercise replaces it instead of adding a copy.
//!
//! Every vector in a collection comes from the store's single [`Embedder`].
//! The embedder's model id is saved with each collection and checked on
//! open; queries go through [`ContentStore::embedder`], so the index and the
//! query side always share one embedding space.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    embedding::Embedder,
    error::{EcouteError, Result},
    parser,
    paths::parse_artifact_name,
    types::{Exercise, ExerciseRecord, ExerciseType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

#[derive(Debug, Clone)]
pub struct IndexedEntry {
    pub record: ExerciseRecord,
    pub vector: Vec<f32>,
}

#[derive(Debug, Default)]
struct Collection {
    entries: BTreeMap<String, IndexedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile {
    collection: String,
    embedding_model: String,
    entries: Vec<StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    id: String,
    document: String,
    embedding: Vec<f32>,
    metadata: EntryMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMetadata {
    video_id: String,
    #[serde(rename = "type")]
    kind: String,
    full_exercise: String,
}

impl StoredEntry {
    fn from_entry(entry: &IndexedEntry) -> Result<Self> {
        let record = &entry.record;
        let kind = match record.exercise() {
            Exercise::Other(other) => other.kind.clone(),
            _ => record.exercise_type().as_str().to_string(),
        };
        Ok(Self {
            id: record.id().to_string(),
            document: record.embedding_text().to_string(),
            embedding: entry.vector.clone(),
            metadata: EntryMetadata {
                video_id: record.source_video_id().to_string(),
                kind,
                full_exercise: serde_json::to_string(record.exercise())?,
            },
        })
    }

    fn into_entry(self, exercise_type: ExerciseType) -> Option<IndexedEntry> {
        let exercise: Exercise = match serde_json::from_str(&self.metadata.full_exercise) {
            Ok(exercise) => exercise,
            Err(err) => {
                warn!(id = %self.id, %err, "skipping entry with undecodable exercise");
                return None;
            }
        };
        if exercise.exercise_type() != exercise_type {
            warn!(id = %self.id, "skipping entry stored in the wrong collection");
            return None;
        }
        if let Err(reason) = exercise.validate() {
            warn!(id = %self.id, %reason, "skipping invalid stored exercise");
            return None;
        }
        let record = ExerciseRecord::new(exercise, self.metadata.video_id);
        if record.id() != self.id {
            debug!(stored = %self.id, computed = %record.id(), "re-keying entry");
        }
        Some(IndexedEntry {
            record,
            vector: self.embedding,
        })
    }
}

/// Record counts for every collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub multiple_choice: usize,
    pub dialog_matching: usize,
    pub other_exercises: usize,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} multiple choice, {} dialog matching, {} other",
            self.multiple_choice, self.dialog_matching, self.other_exercises
        )
    }
}

/// Outcome of indexing a directory of artifact files.
#[derive(Debug, Default)]
pub struct IndexSummary {
    pub files: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub discarded: usize,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct ContentStore {
    root: Option<PathBuf>,
    embedder: Arc<dyn Embedder>,
    multiple_choice: Collection,
    dialog_matching: Collection,
    other_exercises: Collection,
}

impl ContentStore {
    /// Store without persistence, for tests and dry runs.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            root: None,
            embedder,
            multiple_choice: Collection::default(),
            dialog_matching: Collection::default(),
            other_exercises: Collection::default(),
        }
    }

    /// Open (or create) a persisted store under `root`.
    pub async fn open(root: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let mut store = Self::in_memory(embedder);
        for exercise_type in ExerciseType::ALL {
            let path = collection_path(&root, exercise_type);
            store.load_collection(exercise_type, &path).await?;
        }
        store.root = Some(root);

        info!(stats = %store.stats(), model = store.embedder.model_id(), "opened content store");
        Ok(store)
    }

    async fn load_collection(&mut self, exercise_type: ExerciseType, path: &Path) -> Result<()> {
        if !fs::try_exists(path).await? {
            return Ok(());
        }
        let json_content = fs::read_to_string(path).await?;
        let file: CollectionFile = serde_json::from_str(&json_content)?;

        if !file.entries.is_empty() && file.embedding_model != self.embedder.model_id() {
            return Err(EcouteError::EmbeddingMismatch {
                collection: exercise_type.collection_name(),
                path: path.to_path_buf(),
                stored: file.embedding_model,
                current: self.embedder.model_id().to_string(),
            });
        }

        let collection = self.collection_mut(exercise_type);
        for stored in file.entries {
            if let Some(entry) = stored.into_entry(exercise_type) {
                collection
                    .entries
                    .insert(entry.record.id().to_string(), entry);
            }
        }
        Ok(())
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// The embedder every vector in this store was computed with.
    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    fn collection(&self, exercise_type: ExerciseType) -> &Collection {
        match exercise_type {
            ExerciseType::MultipleChoice => &self.multiple_choice,
            ExerciseType::DialogMatching => &self.dialog_matching,
            ExerciseType::Other => &self.other_exercises,
        }
    }

    fn collection_mut(&mut self, exercise_type: ExerciseType) -> &mut Collection {
        match exercise_type {
            ExerciseType::MultipleChoice => &mut self.multiple_choice,
            ExerciseType::DialogMatching => &mut self.dialog_matching,
            ExerciseType::Other => &mut self.other_exercises,
        }
    }

    pub fn get(&self, id: &str, exercise_type: ExerciseType) -> Option<&ExerciseRecord> {
        self.collection(exercise_type)
            .entries
            .get(id)
            .map(|entry| &entry.record)
    }

    pub fn require(&self, id: &str, exercise_type: ExerciseType) -> Result<&ExerciseRecord> {
        self.get(id, exercise_type)
            .ok_or_else(|| EcouteError::NotFound {
                id: id.to_string(),
                exercise_type,
            })
    }

    pub fn count(&self, exercise_type: ExerciseType) -> usize {
        self.collection(exercise_type).entries.len()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            multiple_choice: self.count(ExerciseType::MultipleChoice),
            dialog_matching: self.count(ExerciseType::DialogMatching),
            other_exercises: self.count(ExerciseType::Other),
        }
    }

    /// Entries of one collection in id order.
    pub fn entries(&self, exercise_type: ExerciseType) -> impl Iterator<Item = &IndexedEntry> {
        self.collection(exercise_type).entries.values()
    }

    /// Insert or replace `record`, recompute its vector and persist the
    /// collection. Invalid exercises are rejected before anything is written.
    /// If the collection cannot be persisted the in-memory change is undone.
    pub async fn upsert(&mut self, record: ExerciseRecord) -> Result<UpsertOutcome> {
        let exercise_type = record.exercise_type();
        let id = record.id().to_string();
        let previous = self.collection(exercise_type).entries.get(&id).cloned();

        let outcome = self.insert_entry(record).await?;
        if let Err(err) = self.persist(exercise_type).await {
            let entries = &mut self.collection_mut(exercise_type).entries;
            match previous {
                Some(entry) => entries.insert(id, entry),
                None => entries.remove(&id),
            };
            warn!(%err, "failed to persist collection, upsert rolled back");
            return Err(err);
        }
        Ok(outcome)
    }

    async fn insert_entry(&mut self, record: ExerciseRecord) -> Result<UpsertOutcome> {
        record.exercise().validate()?;
        let vector = self.embedder.embed(record.embedding_text()).await?;

        let id = record.id().to_string();
        let exercise_type = record.exercise_type();
        let previous = self
            .collection_mut(exercise_type)
            .entries
            .insert(id.clone(), IndexedEntry { record, vector });

        debug!(%id, %exercise_type, replaced = previous.is_some(), "upserted exercise");
        Ok(match previous {
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        })
    }

    /// Index every `<video_id>_<collection>.txt` artifact in `dir`. A file
    /// that cannot be read or indexed is recorded and skipped.
    pub async fn index_directory(&mut self, dir: &Path) -> Result<IndexSummary> {
        let mut files = Vec::new();
        let mut read_dir = fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            files.push(entry.path());
        }
        files.sort();

        let mut summary = IndexSummary::default();
        let mut touched = BTreeSet::new();

        for path in files {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((video_id, exercise_type)) = parse_artifact_name(file_name) else {
                continue;
            };
            let video_id = video_id.to_string();
            summary.files += 1;

            let text = match fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to read artifact");
                    summary.failed.push((path.clone(), err.to_string()));
                    continue;
                }
            };

            let (exercises, report) = parser::parse_artifact(&text, exercise_type);
            if !report.is_clean() {
                debug!(path = %path.display(), %report, "artifact parsed with losses");
            }
            summary.discarded += report.discarded;

            for exercise in exercises {
                let record = ExerciseRecord::new(exercise, video_id.clone());
                match self.insert_entry(record).await {
                    Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
                    Ok(UpsertOutcome::Replaced) => summary.replaced += 1,
                    Err(err) => {
                        warn!(path = %path.display(), %err, "failed to index exercise");
                        summary.failed.push((path.clone(), err.to_string()));
                        break;
                    }
                }
                touched.insert(exercise_type);
            }
        }

        for exercise_type in touched {
            self.persist(exercise_type).await?;
        }

        info!(
            files = summary.files,
            inserted = summary.inserted,
            replaced = summary.replaced,
            discarded = summary.discarded,
            failed = summary.failed.len(),
            "indexed exercise artifacts"
        );
        Ok(summary)
    }

    async fn persist(&self, exercise_type: ExerciseType) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let entries = self
            .entries(exercise_type)
            .map(StoredEntry::from_entry)
            .collect::<Result<Vec<_>>>()?;
        let file = CollectionFile {
            collection: exercise_type.collection_name().to_string(),
            embedding_model: self.embedder.model_id().to_string(),
            entries,
        };
        let json = serde_json::to_string(&file)?;
        write_atomic(&collection_path(root, exercise_type), json.as_bytes()).await
    }
}

fn collection_path(root: &Path, exercise_type: ExerciseType) -> PathBuf {
    root.join(format!("{}.json", exercise_type.collection_name()))
}

/// Atomic write: write to a temp file in the same dir, then rename.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("collection");
    let tmp_path = path.with_file_name(format!(".tmp_{}", file_name));
    fs::write(&tmp_path, data).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}
