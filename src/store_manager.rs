use chrono::{Duration, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::errors::RepoError;
use crate::repository::{RepoResult, Repository};
use crate::storage::{ChainDefinition, CommandRecord};

/// File-backed repository.
///
/// ```text
/// <base>/records/<id>/meta.json
/// <base>/records/<id>/stdout.txt
/// <base>/records/<id>/stderr.txt
/// <base>/chains/<name>.json
/// ```
pub struct StoreManager {
    base_dir: PathBuf,
    config: StorageConfig,
}

impl StoreManager {
    pub fn open(base_dir: impl Into<PathBuf>, config: StorageConfig) -> RepoResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(base_dir.join("records"))?;
        fs::create_dir_all(base_dir.join("chains"))?;
        Ok(Self { base_dir, config })
    }

    fn records_dir(&self) -> PathBuf {
        self.base_dir.join("records")
    }

    fn record_dir(&self, id: &str) -> RepoResult<PathBuf> {
        check_key(id)?;
        Ok(self.records_dir().join(id))
    }

    fn chain_path(&self, name: &str) -> RepoResult<PathBuf> {
        check_key(name)?;
        Ok(self.base_dir.join("chains").join(format!("{}.json", name)))
    }

    fn load_record(&self, record_dir: &Path) -> RepoResult<CommandRecord> {
        let meta = fs::File::open(record_dir.join("meta.json"))?;
        let mut record: CommandRecord = serde_json::from_reader(io::BufReader::new(meta))?;
        // Output files are optional; a record without them still loads.
        record.output = fs::read_to_string(record_dir.join("stdout.txt")).unwrap_or_default();
        record.error = fs::read_to_string(record_dir.join("stderr.txt")).unwrap_or_default();
        Ok(record)
    }

    fn load_all(&self) -> RepoResult<Vec<CommandRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.records_dir())? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            match self.load_record(&path) {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable record"),
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Remove records created more than `age` ago; returns how many went.
    ///
    /// An age reaching past the earliest representable date removes nothing.
    pub fn clean_older_than(&self, age: Duration) -> RepoResult<usize> {
        let Some(cutoff_date) = Utc::now().checked_sub_signed(age) else {
            debug!(?age, "retention age exceeds the calendar, nothing expired");
            return Ok(0);
        };
        let mut cleaned = 0;
        for record in self.load_all()? {
            if record.created_at < cutoff_date {
                self.delete(&record.id)?;
                cleaned += 1;
            }
        }
        debug!(cleaned, %cutoff_date, "removed expired records");
        Ok(cleaned)
    }

    /// Apply the configured retention window.
    pub fn clean_expired(&self) -> RepoResult<usize> {
        match Duration::try_days(i64::from(self.config.max_retention_days)) {
            Some(age) => self.clean_older_than(age),
            None => Ok(0),
        }
    }

    pub fn clean_all(&self) -> RepoResult<usize> {
        let count = self.load_all()?.len();
        let records_dir = self.records_dir();
        if records_dir.exists() {
            fs::remove_dir_all(&records_dir)?;
        }
        fs::create_dir_all(&records_dir)?;
        Ok(count)
    }
}

/// Keys become path components, so they must stay inside their directory.
fn check_key(key: &str) -> RepoResult<()> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
        return Err(RepoError::NotFound(key.to_string()));
    }
    Ok(())
}

fn not_found(err: io::Error, key: &str) -> RepoError {
    if err.kind() == io::ErrorKind::NotFound {
        RepoError::NotFound(key.to_string())
    } else {
        RepoError::Io(err)
    }
}

impl Repository for StoreManager {
    fn get(&self, id: &str) -> RepoResult<CommandRecord> {
        let record_dir = self.record_dir(id)?;
        if !record_dir.join("meta.json").exists() {
            return Err(RepoError::NotFound(id.to_string()));
        }
        self.load_record(&record_dir)
    }

    fn put(&self, record: &CommandRecord) -> RepoResult<()> {
        let record_dir = self.record_dir(&record.id)?;
        fs::create_dir_all(&record_dir)?;

        fs::write(record_dir.join("stdout.txt"), &record.output)?;
        fs::write(record_dir.join("stderr.txt"), &record.error)?;
        // Metadata last: a record is visible once meta.json exists.
        let meta = fs::File::create(record_dir.join("meta.json"))?;
        serde_json::to_writer_pretty(meta, record)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> RepoResult<()> {
        let record_dir = self.record_dir(id)?;
        fs::remove_dir_all(&record_dir).map_err(|e| not_found(e, id))
    }

    fn search_by_tag(&self, tag: &str) -> RepoResult<Vec<CommandRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|r| r.tags.iter().any(|t| t == tag))
            .collect())
    }

    fn search_by_status(&self, success: bool) -> RepoResult<Vec<CommandRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|r| r.success == success)
            .collect())
    }

    fn get_all_commands(&self) -> RepoResult<Vec<CommandRecord>> {
        self.load_all()
    }

    fn get_chain(&self, name: &str) -> RepoResult<ChainDefinition> {
        let path = self.chain_path(name)?;
        let file = fs::File::open(&path).map_err(|e| not_found(e, name))?;
        Ok(serde_json::from_reader(io::BufReader::new(file))?)
    }

    fn put_chain(&self, chain: &ChainDefinition) -> RepoResult<()> {
        let path = self.chain_path(&chain.name)?;
        serde_json::to_writer_pretty(fs::File::create(path)?, chain)?;
        Ok(())
    }

    fn delete_chain(&self, name: &str) -> RepoResult<()> {
        let path = self.chain_path(name)?;
        fs::remove_file(path).map_err(|e| not_found(e, name))
    }

    fn list_chains(&self) -> RepoResult<Vec<ChainDefinition>> {
        let mut chains = Vec::new();
        for entry in fs::read_dir(self.base_dir.join("chains"))? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::File::open(&path)
                .map_err(RepoError::from)
                .and_then(|f| Ok(serde_json::from_reader::<_, ChainDefinition>(io::BufReader::new(f))?));
            match parsed {
                Ok(chain) => chains.push(chain),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable chain"),
            }
        }
        chains.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(chains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Outcome;
    use tempfile::TempDir;

    fn store() -> (TempDir, StoreManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreManager::open(dir.path(), StorageConfig::default()).unwrap();
        (dir, store)
    }

    fn record(id: &str, success: bool) -> CommandRecord {
        let mut record = CommandRecord::begin(id.to_string(), "echo", &["hi".to_string()]);
        record.complete(&Outcome {
            exit_code: Some(if success { 0 } else { 1 }),
            precise: true,
            stdout: "hi\n".to_string(),
            stderr: "warning\n".to_string(),
            combined: "hi\nwarning\n".to_string(),
            success,
        });
        record
    }

    #[test]
    fn put_then_get_restores_output() {
        let (_dir, store) = store();
        let saved = record("a1", true).with_tags(["x"]);
        store.put(&saved).unwrap();
        let loaded = store.get("a1").unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.output, "hi\n");
        assert_eq!(loaded.error, "warning\n");
    }

    #[test]
    fn missing_ids_are_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.get("nope"), Err(RepoError::NotFound(_))));
        assert!(matches!(store.delete("nope"), Err(RepoError::NotFound(_))));
        assert!(matches!(store.get("../etc"), Err(RepoError::NotFound(_))));
    }

    #[test]
    fn searches_and_lists_newest_first() {
        let (_dir, store) = store();
        let mut old = record("old", false).with_tags(["ci"]);
        old.created_at = Utc::now() - Duration::hours(1);
        store.put(&old).unwrap();
        store.put(&record("new", true).with_tags(["ci"])).unwrap();

        let all: Vec<String> = store.get_all_commands().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(all, vec!["new".to_string(), "old".to_string()]);
        assert_eq!(store.search_by_tag("ci").unwrap().len(), 2);
        assert_eq!(store.search_by_status(false).unwrap()[0].id, "old");
    }

    #[test]
    fn corrupt_records_are_skipped() {
        let (dir, store) = store();
        store.put(&record("good", true)).unwrap();
        let broken = dir.path().join("records").join("broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("meta.json"), "{ not json").unwrap();
        assert_eq!(store.get_all_commands().unwrap().len(), 1);
    }

    #[test]
    fn retention_removes_only_expired_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            max_retention_days: 30,
            auto_clean: false,
        };
        let store = StoreManager::open(dir.path(), config).unwrap();
        let mut ancient = record("ancient", true);
        ancient.created_at = Utc::now() - Duration::days(31);
        store.put(&ancient).unwrap();
        store.put(&record("fresh", true)).unwrap();

        assert_eq!(store.clean_expired().unwrap(), 1);
        assert!(store.get("fresh").is_ok());
        assert!(matches!(store.get("ancient"), Err(RepoError::NotFound(_))));
        assert_eq!(store.clean_all().unwrap(), 1);
        assert!(store.get_all_commands().unwrap().is_empty());
    }

    #[test]
    fn huge_retention_ages_expire_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            max_retention_days: u32::MAX,
            auto_clean: true,
        };
        let store = StoreManager::open(dir.path(), config).unwrap();
        let mut old = record("old", true);
        old.created_at = Utc::now() - Duration::days(3650);
        store.put(&old).unwrap();

        assert_eq!(store.clean_expired().unwrap(), 0);
        assert_eq!(store.clean_older_than(Duration::days(100_000_000)).unwrap(), 0);
        assert_eq!(store.clean_older_than(Duration::MAX).unwrap(), 0);
        assert!(store.get("old").is_ok());
    }

    #[test]
    fn chains_round_trip_and_delete() {
        let (_dir, store) = store();
        let chain = ChainDefinition {
            name: "build".to_string(),
            description: "compile".to_string(),
            steps: vec!["a".to_string(), "b".to_string()],
            conditional: true,
            store: false,
            created_at: Utc::now(),
        };
        store.put_chain(&chain).unwrap();
        assert_eq!(store.get_chain("build").unwrap(), chain);
        assert_eq!(store.list_chains().unwrap().len(), 1);
        store.delete_chain("build").unwrap();
        assert!(matches!(store.get_chain("build"), Err(RepoError::NotFound(_))));
        assert!(matches!(store.delete_chain("build"), Err(RepoError::NotFound(_))));
    }
}
