//! Flat JSON persistence for test definitions and execution results.
//!
//! Two files under one data directory: `tests.json` and `results.json`,
//! each holding a JSON array that is read, modified and rewritten whole.
//! A per-file mutex serializes writers within the process; writes go
//! through a temp file plus rename so a crash never leaves a torn file.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use testpilot_core_types::{ExecutionResult, ResultId, Step, TestDefinition, TestId};

pub mod errors;

pub use errors::StoreError;

/// Which archive state a listing should include.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveFilter {
    All,
    Active,
    Archived,
}

/// JSON-file-backed store for tests and results.
pub struct TestStore {
    tests_file: PathBuf,
    results_file: PathBuf,
    tests_lock: Mutex<()>,
    results_lock: Mutex<()>,
}

impl TestStore {
    /// Open a store rooted at `data_dir`, creating the directory if needed.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|source| StoreError::Io {
                path: data_dir.clone(),
                source,
            })?;
        Ok(Self {
            tests_file: data_dir.join("tests.json"),
            results_file: data_dir.join("results.json"),
            tests_lock: Mutex::new(()),
            results_lock: Mutex::new(()),
        })
    }

    // Test operations

    /// Insert or replace a test definition.
    pub async fn save_test(&self, test: &TestDefinition) -> Result<(), StoreError> {
        let _guard = self.tests_lock.lock().await;
        let mut tests: Vec<TestDefinition> = read_array(&self.tests_file).await?;
        match tests.iter_mut().find(|existing| existing.id == test.id) {
            Some(existing) => *existing = test.clone(),
            None => tests.push(test.clone()),
        }
        write_array(&self.tests_file, &tests).await
    }

    pub async fn get_test(&self, id: TestId) -> Result<Option<TestDefinition>, StoreError> {
        let tests: Vec<TestDefinition> = read_array(&self.tests_file).await?;
        Ok(tests.into_iter().find(|test| test.id == id))
    }

    /// All tests matching `filter`, newest first.
    pub async fn list_tests(
        &self,
        filter: ArchiveFilter,
    ) -> Result<Vec<TestDefinition>, StoreError> {
        let mut tests: Vec<TestDefinition> = read_array(&self.tests_file).await?;
        tests.retain(|test| match filter {
            ArchiveFilter::All => true,
            ArchiveFilter::Active => !test.archived,
            ArchiveFilter::Archived => test.archived,
        });
        tests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tests)
    }

    /// Delete a test and every result that belongs to it.
    pub async fn delete_test(&self, id: TestId) -> Result<(), StoreError> {
        {
            let _guard = self.tests_lock.lock().await;
            let mut tests: Vec<TestDefinition> = read_array(&self.tests_file).await?;
            tests.retain(|test| test.id != id);
            write_array(&self.tests_file, &tests).await?;
        }
        let _guard = self.results_lock.lock().await;
        let mut results: Vec<ExecutionResult> = read_array(&self.results_file).await?;
        results.retain(|result| result.test_request_id != id);
        write_array(&self.results_file, &results).await
    }

    pub async fn set_test_archived(&self, id: TestId, archived: bool) -> Result<(), StoreError> {
        let _guard = self.tests_lock.lock().await;
        let mut tests: Vec<TestDefinition> = read_array(&self.tests_file).await?;
        let test = tests
            .iter_mut()
            .find(|test| test.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "test",
                id: id.to_string(),
            })?;
        test.archived = archived;
        test.archived_at = archived.then(Utc::now);
        write_array(&self.tests_file, &tests).await
    }

    /// Overwrite a test's cached steps and stamp the clean run that
    /// produced them.
    pub async fn update_cached_steps(
        &self,
        id: TestId,
        steps: Vec<Step>,
    ) -> Result<(), StoreError> {
        let _guard = self.tests_lock.lock().await;
        let mut tests: Vec<TestDefinition> = read_array(&self.tests_file).await?;
        let test = tests
            .iter_mut()
            .find(|test| test.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "test",
                id: id.to_string(),
            })?;
        debug!(test = %id, steps = steps.len(), "caching step sequence");
        test.cached_steps = steps;
        test.last_successful_run = Some(Utc::now());
        write_array(&self.tests_file, &tests).await
    }

    /// Drop a test's cached steps so the next run regenerates them.
    pub async fn clear_cached_steps(&self, id: TestId) -> Result<(), StoreError> {
        let _guard = self.tests_lock.lock().await;
        let mut tests: Vec<TestDefinition> = read_array(&self.tests_file).await?;
        let test = tests
            .iter_mut()
            .find(|test| test.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "test",
                id: id.to_string(),
            })?;
        test.cached_steps.clear();
        write_array(&self.tests_file, &tests).await
    }

    // Result operations

    /// Insert or replace an execution result.
    pub async fn save_result(&self, result: &ExecutionResult) -> Result<(), StoreError> {
        let _guard = self.results_lock.lock().await;
        let mut results: Vec<ExecutionResult> = read_array(&self.results_file).await?;
        match results.iter_mut().find(|existing| existing.id == result.id) {
            Some(existing) => *existing = result.clone(),
            None => results.push(result.clone()),
        }
        write_array(&self.results_file, &results).await
    }

    pub async fn get_result(&self, id: ResultId) -> Result<Option<ExecutionResult>, StoreError> {
        let results: Vec<ExecutionResult> = read_array(&self.results_file).await?;
        Ok(results.into_iter().find(|result| result.id == id))
    }

    /// All results matching `filter`, newest first.
    pub async fn list_results(
        &self,
        filter: ArchiveFilter,
    ) -> Result<Vec<ExecutionResult>, StoreError> {
        let mut results: Vec<ExecutionResult> = read_array(&self.results_file).await?;
        results.retain(|result| match filter {
            ArchiveFilter::All => true,
            ArchiveFilter::Active => !result.archived,
            ArchiveFilter::Archived => result.archived,
        });
        results.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        Ok(results)
    }

    /// Results for one test, newest first.
    pub async fn results_for_test(
        &self,
        test_id: TestId,
    ) -> Result<Vec<ExecutionResult>, StoreError> {
        let mut results = self.list_results(ArchiveFilter::All).await?;
        results.retain(|result| result.test_request_id == test_id);
        Ok(results)
    }

    pub async fn delete_result(&self, id: ResultId) -> Result<(), StoreError> {
        let _guard = self.results_lock.lock().await;
        let mut results: Vec<ExecutionResult> = read_array(&self.results_file).await?;
        results.retain(|result| result.id != id);
        write_array(&self.results_file, &results).await
    }

    pub async fn set_result_archived(&self, id: ResultId, archived: bool) -> Result<(), StoreError> {
        let _guard = self.results_lock.lock().await;
        let mut results: Vec<ExecutionResult> = read_array(&self.results_file).await?;
        let result = results
            .iter_mut()
            .find(|result| result.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "result",
                id: id.to_string(),
            })?;
        result.archived = archived;
        result.archived_at = archived.then(Utc::now);
        write_array(&self.results_file, &results).await
    }

    /// Write just the live-progress line of a running result.
    pub async fn set_current_action(
        &self,
        id: ResultId,
        action: Option<String>,
    ) -> Result<(), StoreError> {
        let _guard = self.results_lock.lock().await;
        let mut results: Vec<ExecutionResult> = read_array(&self.results_file).await?;
        let result = results
            .iter_mut()
            .find(|result| result.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "result",
                id: id.to_string(),
            })?;
        result.current_action = action;
        write_array(&self.results_file, &results).await
    }
}

async fn read_array<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn write_array<T: serde::Serialize>(path: &Path, items: &[T]) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(items).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use testpilot_core_types::{ActionKind, RunStatus};

    async fn store() -> (TestStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TestStore::open(dir.path()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn tests_round_trip_and_upsert() {
        let (store, _dir) = store().await;
        let mut test = TestDefinition::new("https://x.test", "log in");
        store.save_test(&test).await.unwrap();

        let loaded = store.get_test(test.id).await.unwrap().unwrap();
        assert_eq!(loaded, test);

        test.description = "log in and out".to_string();
        store.save_test(&test).await.unwrap();
        let tests = store.list_tests(ArchiveFilter::All).await.unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].description, "log in and out");
    }

    #[tokio::test]
    async fn missing_files_read_as_empty() {
        let (store, _dir) = store().await;
        assert!(store.list_tests(ArchiveFilter::All).await.unwrap().is_empty());
        assert!(store
            .list_results(ArchiveFilter::All)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn archive_filters_split_tests() {
        let (store, _dir) = store().await;
        let active = TestDefinition::new("https://x.test", "a");
        let parked = TestDefinition::new("https://x.test", "b");
        store.save_test(&active).await.unwrap();
        store.save_test(&parked).await.unwrap();
        store.set_test_archived(parked.id, true).await.unwrap();

        let actives = store.list_tests(ArchiveFilter::Active).await.unwrap();
        assert_eq!(actives.len(), 1);
        assert_eq!(actives[0].id, active.id);

        let archived = store.list_tests(ArchiveFilter::Archived).await.unwrap();
        assert_eq!(archived.len(), 1);
        assert!(archived[0].archived_at.is_some());

        store.set_test_archived(parked.id, false).await.unwrap();
        let back = store.get_test(parked.id).await.unwrap().unwrap();
        assert!(!back.archived);
        assert!(back.archived_at.is_none());
    }

    #[tokio::test]
    async fn deleting_a_test_cascades_its_results() {
        let (store, _dir) = store().await;
        let test = TestDefinition::new("https://x.test", "a");
        store.save_test(&test).await.unwrap();
        let mine = ExecutionResult::running(test.id);
        let other = ExecutionResult::running(TestId::new());
        store.save_result(&mine).await.unwrap();
        store.save_result(&other).await.unwrap();

        store.delete_test(test.id).await.unwrap();
        assert!(store.get_test(test.id).await.unwrap().is_none());
        assert!(store.get_result(mine.id).await.unwrap().is_none());
        assert!(store.get_result(other.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cache_write_stamps_last_successful_run() {
        let (store, _dir) = store().await;
        let test = TestDefinition::new("https://x.test", "a");
        store.save_test(&test).await.unwrap();

        let steps = vec![Step::new(ActionKind::Click).with_target("#go")];
        store.update_cached_steps(test.id, steps.clone()).await.unwrap();
        let loaded = store.get_test(test.id).await.unwrap().unwrap();
        assert_eq!(loaded.cached_steps, steps);
        assert!(loaded.last_successful_run.is_some());

        store.clear_cached_steps(test.id).await.unwrap();
        let cleared = store.get_test(test.id).await.unwrap().unwrap();
        assert!(cleared.cached_steps.is_empty());
        assert!(cleared.last_successful_run.is_some());
    }

    #[tokio::test]
    async fn current_action_writes_through() {
        let (store, _dir) = store().await;
        let mut result = ExecutionResult::running(TestId::new());
        store.save_result(&result).await.unwrap();

        store
            .set_current_action(result.id, Some("Executing step 2/5".to_string()))
            .await
            .unwrap();
        let live = store.get_result(result.id).await.unwrap().unwrap();
        assert_eq!(live.current_action.as_deref(), Some("Executing step 2/5"));

        result.finalize(RunStatus::Passed);
        store.save_result(&result).await.unwrap();
        let done = store.get_result(result.id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Passed);
        assert!(done.current_action.is_none());
    }

    #[tokio::test]
    async fn results_listing_filters_by_test() {
        let (store, _dir) = store().await;
        let test_id = TestId::new();
        let first = ExecutionResult::running(test_id);
        let second = ExecutionResult::running(test_id);
        let stranger = ExecutionResult::running(TestId::new());
        store.save_result(&first).await.unwrap();
        store.save_result(&second).await.unwrap();
        store.save_result(&stranger).await.unwrap();

        let mine = store.results_for_test(test_id).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|result| result.test_request_id == test_id));
    }

    #[tokio::test]
    async fn missing_ids_report_not_found() {
        let (store, _dir) = store().await;
        let err = store
            .set_test_archived(TestId::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "test", .. }));
    }
}
