//! SQLite-backed records for datasets, trained models, and training jobs.
//!
//! This is deliberately a thin record store: the core reads job/dataset/model
//! fields and writes status, completion fields, and new-artifact linkage.
//! Connections are cheap to open, so each thread opens its own.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Identifier of a training job record.
pub type JobId = i64;
/// Identifier of a trained model record.
pub type ModelId = i64;
/// Identifier of a dataset record.
pub type DatasetId = i64;

/// Errors raised by record persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening the database file failed.
    #[error("Failed to open database {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
    /// An SQL statement failed.
    #[error("Database error: {0}")]
    Sql(#[from] rusqlite::Error),
    /// A referenced dataset record does not exist.
    #[error("Dataset {0} not found")]
    MissingDataset(DatasetId),
    /// A referenced model record does not exist.
    #[error("Model {0} not found")]
    MissingModel(ModelId),
    /// A referenced job record does not exist.
    #[error("Training job {0} not found")]
    MissingJob(JobId),
    /// A status column held an unknown value.
    #[error("Unknown job status '{0}'")]
    BadStatus(String),
}

/// Lifecycle status of a training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl JobStatus {
    /// Database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
        }
    }

    fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "ERROR" => Ok(Self::Error),
            other => Err(StoreError::BadStatus(other.to_string())),
        }
    }
}

/// An uploaded, already-validated dataset rooted at a directory of words.
#[derive(Debug, Clone)]
pub struct DatasetRecord {
    pub id: DatasetId,
    pub name: String,
    /// Root directory containing one subdirectory per word.
    pub root_directory: PathBuf,
    pub created_at: i64,
}

/// A trained classifier artifact plus the metadata needed to interpret it.
#[derive(Debug, Clone)]
pub struct ModelRecord {
    pub id: ModelId,
    pub name: String,
    /// Path to the serialized classifier; the metadata sidecar sits beside it.
    pub file_path: PathBuf,
    pub max_frames: i64,
    pub num_features: i64,
    /// Comma-joined ordered vocabulary.
    pub words: String,
    pub fps: f64,
    /// Overall test accuracy from the producing training run.
    pub accuracy: f64,
    /// Word to `[correct, total]` counts on the test partition.
    pub word_accuracy: BTreeMap<String, [u32; 2]>,
    pub is_active: bool,
    pub created_at: i64,
}

impl ModelRecord {
    /// Vocabulary as an ordered word list.
    pub fn word_list(&self) -> Vec<String> {
        self.words
            .split(',')
            .filter(|word| !word.is_empty())
            .map(|word| word.to_string())
            .collect()
    }
}

/// Fields for inserting a new trained model record.
#[derive(Debug, Clone)]
pub struct NewModel {
    pub name: String,
    pub file_path: PathBuf,
    pub max_frames: i64,
    pub num_features: i64,
    pub words: String,
    pub fps: f64,
    pub accuracy: f64,
    pub word_accuracy: BTreeMap<String, [u32; 2]>,
    pub is_active: bool,
}

/// One retraining request and its lifecycle bookkeeping.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub dataset_id: DatasetId,
    pub base_model_id: Option<ModelId>,
    pub status: JobStatus,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub output_model_id: Option<ModelId>,
}

/// Handle over one SQLite connection with the schema applied.
pub struct Store {
    connection: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let connection = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        apply_schema(&connection)?;
        Ok(Self { connection })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory()?;
        apply_schema(&connection)?;
        Ok(Self { connection })
    }

    // Datasets

    /// Insert a dataset record and return it.
    pub fn insert_dataset(&self, name: &str, root: &Path) -> Result<DatasetRecord, StoreError> {
        self.connection
            .prepare_cached(
                "INSERT INTO datasets (name, root_directory, created_at) VALUES (?1, ?2, ?3)",
            )?
            .execute(params![name, root.to_string_lossy(), now_unix()])?;
        let id = self.connection.last_insert_rowid();
        self.dataset(id)
    }

    /// Load a dataset by id.
    pub fn dataset(&self, id: DatasetId) -> Result<DatasetRecord, StoreError> {
        self.connection
            .prepare_cached(
                "SELECT id, name, root_directory, created_at FROM datasets WHERE id = ?1",
            )?
            .query_row(params![id], dataset_from_row)
            .optional()?
            .ok_or(StoreError::MissingDataset(id))
    }

    /// Look up a dataset by name.
    pub fn dataset_by_name(&self, name: &str) -> Result<Option<DatasetRecord>, StoreError> {
        Ok(self
            .connection
            .prepare_cached(
                "SELECT id, name, root_directory, created_at FROM datasets WHERE name = ?1",
            )?
            .query_row(params![name], dataset_from_row)
            .optional()?)
    }

    // Models

    /// Insert a trained model record; activates it atomically when requested.
    pub fn insert_model(&self, model: &NewModel) -> Result<ModelRecord, StoreError> {
        let tx = self.connection.unchecked_transaction()?;
        if model.is_active {
            tx.execute("UPDATE models SET is_active = 0 WHERE is_active = 1", [])?;
        }
        tx.prepare_cached(
            "INSERT INTO models (name, file_path, max_frames, num_features, words, fps,
                                 accuracy, word_accuracy, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?
        .execute(params![
            model.name,
            model.file_path.to_string_lossy(),
            model.max_frames,
            model.num_features,
            model.words,
            model.fps,
            model.accuracy,
            serde_json::to_string(&model.word_accuracy).unwrap_or_else(|_| "{}".to_string()),
            model.is_active as i64,
            now_unix()
        ])?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        self.model(id)
    }

    /// Load a model by id.
    pub fn model(&self, id: ModelId) -> Result<ModelRecord, StoreError> {
        self.connection
            .prepare_cached(&format!("{MODEL_SELECT} WHERE id = ?1"))?
            .query_row(params![id], model_from_row)
            .optional()?
            .ok_or(StoreError::MissingModel(id))
    }

    /// Look up a model by name.
    pub fn model_by_name(&self, name: &str) -> Result<Option<ModelRecord>, StoreError> {
        Ok(self
            .connection
            .prepare_cached(&format!("{MODEL_SELECT} WHERE name = ?1"))?
            .query_row(params![name], model_from_row)
            .optional()?)
    }

    /// All model records, newest first.
    pub fn models(&self) -> Result<Vec<ModelRecord>, StoreError> {
        let mut stmt = self
            .connection
            .prepare_cached(&format!("{MODEL_SELECT} ORDER BY created_at DESC, id DESC"))?;
        let rows = stmt.query_map([], model_from_row)?;
        let mut models = Vec::new();
        for row in rows {
            models.push(row?);
        }
        Ok(models)
    }

    /// The currently active model, if one is flagged.
    pub fn active_model(&self) -> Result<Option<ModelRecord>, StoreError> {
        Ok(self
            .connection
            .prepare_cached(&format!("{MODEL_SELECT} WHERE is_active = 1"))?
            .query_row([], model_from_row)
            .optional()?)
    }

    /// Flag one model active, deactivating all others in the same transaction.
    pub fn activate_model(&self, id: ModelId) -> Result<(), StoreError> {
        let tx = self.connection.unchecked_transaction()?;
        tx.execute("UPDATE models SET is_active = 0 WHERE is_active = 1", [])?;
        let changed = tx.execute("UPDATE models SET is_active = 1 WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::MissingModel(id));
        }
        tx.commit()?;
        Ok(())
    }

    // Jobs

    /// Insert a new PENDING training job.
    pub fn insert_job(
        &self,
        name: &str,
        dataset_id: DatasetId,
        base_model_id: Option<ModelId>,
    ) -> Result<JobRecord, StoreError> {
        self.connection
            .prepare_cached(
                "INSERT INTO jobs (name, dataset_id, base_model_id, status) VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![
                name,
                dataset_id,
                base_model_id,
                JobStatus::Pending.as_str()
            ])?;
        self.job(self.connection.last_insert_rowid())
    }

    /// Load a job by id.
    pub fn job(&self, id: JobId) -> Result<JobRecord, StoreError> {
        self.connection
            .prepare_cached(&format!("{JOB_SELECT} WHERE id = ?1"))?
            .query_row(params![id], job_from_row)
            .optional()?
            .ok_or(StoreError::MissingJob(id))?
    }

    /// Look up a job by name.
    pub fn job_by_name(&self, name: &str) -> Result<Option<JobRecord>, StoreError> {
        self.connection
            .prepare_cached(&format!("{JOB_SELECT} WHERE name = ?1"))?
            .query_row(params![name], job_from_row)
            .optional()?
            .transpose()
    }

    /// Overwrite a job's status.
    pub fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError> {
        let changed = self
            .connection
            .prepare_cached("UPDATE jobs SET status = ?1 WHERE id = ?2")?
            .execute(params![status.as_str(), id])?;
        if changed == 0 {
            return Err(StoreError::MissingJob(id));
        }
        Ok(())
    }

    /// Mark a job IN_PROGRESS and stamp its start time.
    pub fn mark_job_started(&self, id: JobId) -> Result<(), StoreError> {
        let changed = self
            .connection
            .prepare_cached("UPDATE jobs SET status = ?1, started_at = ?2 WHERE id = ?3")?
            .execute(params![JobStatus::InProgress.as_str(), now_unix(), id])?;
        if changed == 0 {
            return Err(StoreError::MissingJob(id));
        }
        Ok(())
    }

    /// Commit natural completion: status, completion time, and output model
    /// linkage land together or not at all.
    pub fn complete_job(&self, id: JobId, output_model: ModelId) -> Result<(), StoreError> {
        let tx = self.connection.unchecked_transaction()?;
        let changed = tx
            .prepare_cached(
                "UPDATE jobs SET status = ?1, completed_at = ?2, output_model_id = ?3 WHERE id = ?4",
            )?
            .execute(params![
                JobStatus::Completed.as_str(),
                now_unix(),
                output_model,
                id
            ])?;
        if changed == 0 {
            return Err(StoreError::MissingJob(id));
        }
        tx.commit()?;
        Ok(())
    }

    /// Record a failed run: terminal ERROR status plus completion time.
    pub fn fail_job(&self, id: JobId) -> Result<(), StoreError> {
        let tx = self.connection.unchecked_transaction()?;
        let changed = tx
            .prepare_cached("UPDATE jobs SET status = ?1, completed_at = ?2 WHERE id = ?3")?
            .execute(params![JobStatus::Error.as_str(), now_unix(), id])?;
        if changed == 0 {
            return Err(StoreError::MissingJob(id));
        }
        tx.commit()?;
        Ok(())
    }
}

const MODEL_SELECT: &str = "SELECT id, name, file_path, max_frames, num_features, words, fps,
                                   accuracy, word_accuracy, is_active, created_at FROM models";
const JOB_SELECT: &str = "SELECT id, name, dataset_id, base_model_id, status, started_at,
                                 completed_at, output_model_id FROM jobs";

fn apply_schema(connection: &Connection) -> Result<(), StoreError> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS datasets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            root_directory TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
         CREATE TABLE IF NOT EXISTS models (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            file_path TEXT NOT NULL,
            max_frames INTEGER NOT NULL,
            num_features INTEGER NOT NULL,
            words TEXT NOT NULL,
            fps REAL NOT NULL,
            accuracy REAL NOT NULL DEFAULT 0,
            word_accuracy TEXT NOT NULL DEFAULT '{}',
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_models_active ON models (is_active);
         CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            dataset_id INTEGER NOT NULL REFERENCES datasets(id),
            base_model_id INTEGER REFERENCES models(id),
            status TEXT NOT NULL DEFAULT 'PENDING',
            started_at INTEGER,
            completed_at INTEGER,
            output_model_id INTEGER REFERENCES models(id)
         );
         CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status);",
    )?;
    Ok(())
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn dataset_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DatasetRecord> {
    Ok(DatasetRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        root_directory: PathBuf::from(row.get::<_, String>(2)?),
        created_at: row.get(3)?,
    })
}

fn model_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModelRecord> {
    let word_accuracy_raw: String = row.get(8)?;
    let word_accuracy = serde_json::from_str(&word_accuracy_raw).unwrap_or_else(|err| {
        tracing::warn!("Unreadable word_accuracy column: {err}");
        BTreeMap::new()
    });
    Ok(ModelRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        file_path: PathBuf::from(row.get::<_, String>(2)?),
        max_frames: row.get(3)?,
        num_features: row.get(4)?,
        words: row.get(5)?,
        fps: row.get(6)?,
        accuracy: row.get(7)?,
        word_accuracy,
        is_active: row.get::<_, i64>(9)? != 0,
        created_at: row.get(10)?,
    })
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<JobRecord, StoreError>> {
    let id = row.get(0)?;
    let name = row.get(1)?;
    let dataset_id = row.get(2)?;
    let base_model_id = row.get(3)?;
    let status_raw: String = row.get(4)?;
    let started_at = row.get(5)?;
    let completed_at = row.get(6)?;
    let output_model_id = row.get(7)?;
    Ok(JobStatus::parse(&status_raw).map(|status| JobRecord {
        id,
        name,
        dataset_id,
        base_model_id,
        status,
        started_at,
        completed_at,
        output_model_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model(name: &str, active: bool) -> NewModel {
        NewModel {
            name: name.to_string(),
            file_path: PathBuf::from(format!("/tmp/{name}.json")),
            max_frames: 30,
            num_features: 126,
            words: "no,eat,teacher".to_string(),
            fps: 20.0,
            accuracy: 0.5,
            word_accuracy: BTreeMap::from([("no".to_string(), [1, 2])]),
            is_active: active,
        }
    }

    #[test]
    fn job_lifecycle_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let dataset = store.insert_dataset("signs", Path::new("/data/signs")).unwrap();
        let model = store.insert_model(&sample_model("base", true)).unwrap();
        let job = store.insert_job("run-1", dataset.id, Some(model.id)).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());

        store.mark_job_started(job.id).unwrap();
        let running = store.job(job.id).unwrap();
        assert_eq!(running.status, JobStatus::InProgress);
        assert!(running.started_at.is_some());

        let output = store.insert_model(&sample_model("run-1-model", false)).unwrap();
        store.complete_job(job.id, output.id).unwrap();
        let done = store.job(job.id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.output_model_id, Some(output.id));
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn activating_a_model_deactivates_the_previous_one() {
        let store = Store::open_in_memory().unwrap();
        let first = store.insert_model(&sample_model("first", true)).unwrap();
        let second = store.insert_model(&sample_model("second", false)).unwrap();
        assert!(store.model(first.id).unwrap().is_active);

        store.activate_model(second.id).unwrap();
        assert!(!store.model(first.id).unwrap().is_active);
        assert!(store.model(second.id).unwrap().is_active);
        assert_eq!(store.active_model().unwrap().unwrap().id, second.id);
    }

    #[test]
    fn word_accuracy_round_trips_through_json() {
        let store = Store::open_in_memory().unwrap();
        let record = store.insert_model(&sample_model("m", false)).unwrap();
        assert_eq!(record.word_accuracy.get("no"), Some(&[1, 2]));
        assert_eq!(record.word_list(), vec!["no", "eat", "teacher"]);
    }

    #[test]
    fn missing_job_is_reported_by_id() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(store.job(42), Err(StoreError::MissingJob(42))));
    }

    #[test]
    fn unknown_status_value_is_surfaced_not_defaulted() {
        let store = Store::open_in_memory().unwrap();
        let dataset = store.insert_dataset("d", Path::new("/d")).unwrap();
        let job = store.insert_job("run", dataset.id, None).unwrap();
        store
            .connection
            .execute("UPDATE jobs SET status = 'BOGUS' WHERE id = ?1", params![job.id])
            .unwrap();
        let err = store.job(job.id).unwrap_err();
        assert!(matches!(err, StoreError::BadStatus(value) if value == "BOGUS"));
    }

    #[test]
    fn fail_job_is_terminal_with_completion_time() {
        let store = Store::open_in_memory().unwrap();
        let dataset = store.insert_dataset("d", Path::new("/d")).unwrap();
        let job = store.insert_job("run", dataset.id, None).unwrap();
        store.fail_job(job.id).unwrap();
        let failed = store.job(job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Error);
        assert!(failed.completed_at.is_some());
    }
}
