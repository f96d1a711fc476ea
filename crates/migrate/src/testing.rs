//! In-memory backend for exercising the engine without a database

use async_trait::async_trait;
use std::sync::Mutex;

use crate::definitions::{Direction, History, Migration, MigrationRecord, Version};
use crate::error::{MigrateError, MigrateResult};
use crate::runner::{ExecutableMigration, MigrationExecutor};
use crate::store::VersionStore;

#[derive(Default)]
struct MemoryState {
    records: Vec<MigrationRecord>,
    executions: Vec<(Version, Direction)>,
    statements: Vec<String>,
    transactional: Vec<bool>,
    failures: Vec<(Version, Direction)>,
    history_reads: usize,
}

impl MemoryState {
    fn append(&mut self, version_id: Version, is_applied: bool, down_data: Option<String>) {
        let id = self.records.len() as i64 + 1;
        self.records.push(MigrationRecord {
            id,
            version_id,
            is_applied,
            tstamp: None,
            down_data,
        });
    }
}

/// Version table and executor kept in memory, with failure injection
pub(crate) struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Fresh history holding only the baseline row
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        state.append(0, true, None);
        Self {
            state: Mutex::new(state),
        }
    }

    /// History where each version was applied with the given rollback script
    pub fn with_applied(versions: &[(Version, Option<String>)]) -> Self {
        let backend = Self::new();
        for (version, down_data) in versions {
            backend.record(*version, true, down_data.clone());
        }
        backend
    }

    pub fn record(&self, version: Version, is_applied: bool, down_data: Option<String>) {
        self.state
            .lock()
            .unwrap()
            .append(version, is_applied, down_data);
    }

    pub fn fail_on(&self, version: Version, direction: Direction) {
        self.state.lock().unwrap().failures.push((version, direction));
    }

    pub fn set_down_data(&self, version: Version, down_data: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state
            .records
            .iter_mut()
            .rev()
            .find(|r| r.version_id == version)
        {
            record.down_data = Some(down_data.to_string());
        }
    }

    pub fn executions(&self) -> Vec<(Version, Direction)> {
        self.state.lock().unwrap().executions.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    /// Transaction flag of every successful execution, in order
    pub fn transactional(&self) -> Vec<bool> {
        self.state.lock().unwrap().transactional.clone()
    }

    pub fn records(&self) -> Vec<MigrationRecord> {
        self.state.lock().unwrap().records.clone()
    }

    pub fn history_reads(&self) -> usize {
        self.state.lock().unwrap().history_reads
    }

    pub fn current(&self) -> Version {
        History::new(self.records()).current_version()
    }
}

#[async_trait]
impl VersionStore for MemoryBackend {
    async fn ensure_version_table(&self) -> MigrateResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.records.is_empty() {
            state.append(0, true, None);
        }
        Ok(())
    }

    async fn history(&self) -> MigrateResult<History> {
        let mut state = self.state.lock().unwrap();
        state.history_reads += 1;
        Ok(History::new(state.records.clone()))
    }
}

#[async_trait]
impl MigrationExecutor for MemoryBackend {
    async fn execute(&self, migration: &ExecutableMigration) -> MigrateResult<()> {
        let mut state = self.state.lock().unwrap();
        if state
            .failures
            .contains(&(migration.version, migration.direction))
        {
            return Err(MigrateError::execution(
                migration.version,
                "injected statement failure",
            ));
        }
        state
            .executions
            .push((migration.version, migration.direction));
        state.statements.extend(migration.statements.iter().cloned());
        state.transactional.push(migration.use_transaction);
        state.append(
            migration.version,
            migration.records_applied(),
            migration.down_data.clone(),
        );
        Ok(())
    }
}

/// Catalog definition creating and dropping `t<version>`
pub(crate) fn migration(version: Version) -> Migration {
    let mut migration = Migration::new(version, format!("table {}", version));
    migration.up = vec![format!("CREATE TABLE t{} (id INT);", version)];
    migration.down = vec![format!("DROP TABLE t{};", version)];
    migration
}

pub(crate) fn catalog(versions: &[Version]) -> Vec<Migration> {
    versions.iter().copied().map(migration).collect()
}

/// Rollback script as the Up-runner records it
pub(crate) fn down_data(version: Version) -> String {
    migration(version).down_script()
}

/// History entry for a version applied by the Up-runner
pub(crate) fn applied(version: Version) -> (Version, Option<String>) {
    (version, Some(down_data(version)))
}

/// History entry for a version applied with a hand-written payload
pub(crate) fn applied_with(version: Version, payload: &str) -> (Version, Option<String>) {
    (version, Some(payload.to_string()))
}
