use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::errors::{ExecError, RepoError};
use crate::executor::{ExecMode, StreamExecutor};
use crate::id;
use crate::repository::Repository;
use crate::storage::{ChainDefinition, CommandRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Resolving,
    Running,
    Completed,
    Aborted,
}

/// Arguments for creating a chain.
#[derive(Debug, Clone, Default)]
pub struct NewChain {
    pub name: String,
    pub description: String,
    pub steps: Vec<String>,
    pub conditional: bool,
    pub store: bool,
}

#[derive(Debug, Clone)]
pub struct ChainReport {
    pub name: String,
    pub state: ChainState,
    pub records: Vec<CommandRecord>, // One per attempted step
}

impl ChainReport {
    pub fn failed(&self) -> Vec<&CommandRecord> {
        self.records.iter().filter(|r| !r.success).collect()
    }
}

/// Split a comma separated list of record ids, trimming each entry.
pub fn parse_step_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_name(name: &str) -> Result<(), ExecError> {
    static NAME: OnceLock<Option<Regex>> = OnceLock::new();
    if name.is_empty() {
        return Err(ExecError::missing_value());
    }
    let valid = NAME
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(name));
    if !valid {
        return Err(ExecError::InvalidInput(format!(
            "chain name '{}' may only contain letters, digits, '.', '_' and '-'",
            name
        )));
    }
    Ok(())
}

fn resolve_step<R: Repository>(repo: &R, id: &str) -> Result<CommandRecord, ExecError> {
    repo.get(id).map_err(|err| match err {
        RepoError::NotFound(_) => ExecError::CommandNotFound(id.to_string()),
        other => ExecError::Repository(other),
    })
}

pub struct ChainEngine<'a, R: Repository> {
    repo: &'a R,
    executor: &'a StreamExecutor,
}

impl<'a, R: Repository> ChainEngine<'a, R> {
    pub fn new(repo: &'a R, executor: &'a StreamExecutor) -> Self {
        Self { repo, executor }
    }

    /// Persist a new chain after checking that every step exists.
    ///
    /// Nothing is written when any step id is unknown.
    pub fn create(&self, request: NewChain) -> Result<ChainDefinition, ExecError> {
        let name = request.name.trim().to_string();
        validate_name(&name)?;

        let steps: Vec<String> = request
            .steps
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if steps.is_empty() {
            return Err(ExecError::missing_value());
        }

        match self.repo.get_chain(&name) {
            Ok(_) => return Err(ExecError::ChainExists(name)),
            Err(RepoError::NotFound(_)) => {}
            Err(other) => return Err(other.into()),
        }

        for step in &steps {
            resolve_step(self.repo, step)?;
        }

        let chain = ChainDefinition {
            name,
            description: request.description.trim().to_string(),
            steps,
            conditional: request.conditional,
            store: request.store,
            created_at: Utc::now(),
        };
        self.repo.put_chain(&chain)?;
        info!(chain = %chain.name, steps = chain.steps.len(), "chain created");
        Ok(chain)
    }

    pub fn delete(&self, name: &str) -> Result<(), ExecError> {
        if name.trim().is_empty() {
            return Err(ExecError::missing_value());
        }
        self.repo.delete_chain(name.trim()).map_err(|err| match err {
            RepoError::NotFound(_) => ExecError::ChainNotFound(name.trim().to_string()),
            other => other.into(),
        })?;
        info!(chain = %name.trim(), "chain deleted");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<ChainDefinition>, ExecError> {
        Ok(self.repo.list_chains()?)
    }

    pub fn get(&self, name: &str) -> Result<ChainDefinition, ExecError> {
        self.repo.get_chain(name).map_err(|err| match err {
            RepoError::NotFound(_) => ExecError::ChainNotFound(name.to_string()),
            other => other.into(),
        })
    }

    /// Run a stored chain, step by step.
    ///
    /// Every step is resolved before the first one starts. A conditional chain
    /// ends `Aborted` at its first failing step; otherwise all steps run and
    /// the chain ends `Completed` even when some of them failed.
    pub fn execute(&self, name: &str, mode: ExecMode) -> Result<ChainReport, ExecError> {
        if name.trim().is_empty() {
            return Err(ExecError::missing_value());
        }
        let chain = self.get(name.trim())?;

        let mut state = ChainState::Resolving;
        debug!(chain = %chain.name, ?state, "resolving chain steps");
        let steps = chain
            .steps
            .iter()
            .map(|id| resolve_step(self.repo, id))
            .collect::<Result<Vec<_>, _>>()?;

        state = ChainState::Running;
        info!(chain = %chain.name, steps = steps.len(), ?state, "running chain");
        let mut records = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let mut record = CommandRecord::begin(id::next_id(), &step.name, &step.args)
                .with_tags(step.tags.iter().cloned());
            record.category = step.category.clone();
            record.chain = Some(chain.name.clone());

            let run = self.executor.run_once(&step.name, &step.args, mode)?;
            record.complete(&run.outcome);
            debug!(chain = %chain.name, step = index + 1, source = %step.id, success = record.success, "chain step finished");

            if chain.store {
                self.repo.put(&record)?;
            }
            let failed = !record.success;
            records.push(record);

            if failed && chain.conditional {
                state = ChainState::Aborted;
                break;
            }
        }

        if state == ChainState::Running {
            state = ChainState::Completed;
        }
        info!(chain = %chain.name, ?state, attempted = records.len(), "chain finished");

        Ok(ChainReport {
            name: chain.name,
            state,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use crate::runner::ProcessRunner;

    fn not_a_terminal() -> bool {
        false
    }

    fn executor() -> StreamExecutor {
        StreamExecutor::with_terminal_probe(ProcessRunner::new(), not_a_terminal)
    }

    fn stored(repo: &MemoryRepository, program: &str, args: &[&str]) -> String {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let record = CommandRecord::begin(id::next_id(), program, &args).with_tags(["saved"]);
        repo.put(&record).unwrap();
        record.id
    }

    fn new_chain(name: &str, steps: Vec<String>, conditional: bool, store: bool) -> NewChain {
        NewChain {
            name: name.to_string(),
            description: "test chain".to_string(),
            steps,
            conditional,
            store,
        }
    }

    #[test]
    fn step_ids_are_trimmed() {
        assert_eq!(
            parse_step_ids(" a1 ,b2,, c3 "),
            vec!["a1".to_string(), "b2".to_string(), "c3".to_string()]
        );
        assert!(parse_step_ids(" , ").is_empty());
    }

    #[test]
    fn create_with_unknown_step_persists_nothing() {
        let repo = MemoryRepository::new();
        let exec = executor();
        let engine = ChainEngine::new(&repo, &exec);
        let known = stored(&repo, "true", &[]);

        let err = engine
            .create(new_chain("deploy", vec![known, "missing-id".to_string()], true, false))
            .unwrap_err();
        assert!(matches!(err, ExecError::CommandNotFound(ref id) if id == "missing-id"));
        assert!(err.to_string().contains("command not found"));
        assert!(engine.list().unwrap().is_empty());
    }

    #[test]
    fn create_validates_name_and_steps() {
        let repo = MemoryRepository::new();
        let exec = executor();
        let engine = ChainEngine::new(&repo, &exec);
        let known = stored(&repo, "true", &[]);

        assert!(matches!(
            engine.create(new_chain("", vec![known.clone()], false, false)),
            Err(ExecError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.create(new_chain("bad name", vec![known.clone()], false, false)),
            Err(ExecError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.create(new_chain("empty", vec![" ".to_string()], false, false)),
            Err(ExecError::InvalidInput(_))
        ));

        engine.create(new_chain("ok", vec![format!(" {} ", known)], false, false)).unwrap();
        assert_eq!(engine.get("ok").unwrap().steps, vec![known.clone()]);
        assert!(matches!(
            engine.create(new_chain("ok", vec![known], false, false)),
            Err(ExecError::ChainExists(_))
        ));
    }

    #[test]
    fn delete_and_list() {
        let repo = MemoryRepository::new();
        let exec = executor();
        let engine = ChainEngine::new(&repo, &exec);
        let known = stored(&repo, "true", &[]);

        engine.create(new_chain("b", vec![known.clone()], false, false)).unwrap();
        engine.create(new_chain("a", vec![known], false, false)).unwrap();
        let names: Vec<String> = engine.list().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        engine.delete("a").unwrap();
        assert!(matches!(engine.delete("a"), Err(ExecError::ChainNotFound(_))));
        assert_eq!(engine.list().unwrap().len(), 1);
    }

    #[test]
    fn execute_unknown_chain_fails() {
        let repo = MemoryRepository::new();
        let exec = executor();
        let engine = ChainEngine::new(&repo, &exec);
        assert!(matches!(
            engine.execute("nope", ExecMode::Capture),
            Err(ExecError::ChainNotFound(_))
        ));
        assert!(matches!(
            engine.execute(" ", ExecMode::Capture),
            Err(ExecError::InvalidInput(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn step_removed_after_creation_aborts_before_running() {
        let repo = MemoryRepository::new();
        let exec = executor();
        let engine = ChainEngine::new(&repo, &exec);
        let first = stored(&repo, "true", &[]);
        let second = stored(&repo, "true", &[]);
        engine
            .create(new_chain("fragile", vec![first, second.clone()], false, true))
            .unwrap();
        repo.delete(&second).unwrap();

        let before = repo.get_all_commands().unwrap().len();
        let err = engine.execute("fragile", ExecMode::Capture).unwrap_err();
        assert!(matches!(err, ExecError::CommandNotFound(ref id) if *id == second));
        assert_eq!(repo.get_all_commands().unwrap().len(), before);
    }

    #[cfg(unix)]
    fn three_steps(repo: &MemoryRepository) -> Vec<String> {
        vec![
            stored(repo, "echo", &["one"]),
            stored(repo, "sh", &["-c", "echo two; exit 2"]),
            stored(repo, "echo", &["three"]),
        ]
    }

    #[cfg(unix)]
    #[test]
    fn conditional_chain_aborts_at_first_failure() {
        let repo = MemoryRepository::new();
        let exec = executor();
        let engine = ChainEngine::new(&repo, &exec);
        let steps = three_steps(&repo);
        engine.create(new_chain("strict", steps, true, false)).unwrap();

        let report = engine.execute("strict", ExecMode::Capture).unwrap();
        assert_eq!(report.state, ChainState::Aborted);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].output, "one\n");
        assert_eq!(report.records[1].exit_code, Some(2));
        assert_eq!(report.failed().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn non_conditional_chain_runs_every_step() {
        let repo = MemoryRepository::new();
        let exec = executor();
        let engine = ChainEngine::new(&repo, &exec);
        let steps = three_steps(&repo);
        engine.create(new_chain("lenient", steps, false, false)).unwrap();

        let report = engine.execute("lenient", ExecMode::Capture).unwrap();
        assert_eq!(report.state, ChainState::Completed);
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.records[2].output, "three\n");
        assert_eq!(report.failed().len(), 1);
        assert!(!report.records[1].success);
    }

    #[cfg(unix)]
    #[test]
    fn store_flag_persists_linked_step_results() {
        let repo = MemoryRepository::new();
        let exec = executor();
        let engine = ChainEngine::new(&repo, &exec);
        let steps = three_steps(&repo);
        let sources = steps.clone();
        engine.create(new_chain("kept", steps, false, true)).unwrap();

        let report = engine.execute("kept", ExecMode::Capture).unwrap();
        for record in &report.records {
            let saved = repo.get(&record.id).unwrap();
            assert_eq!(saved.chain.as_deref(), Some("kept"));
            assert_eq!(saved.tags, vec!["saved".to_string()]);
            assert!(!sources.contains(&saved.id));
            assert!(saved.terminated_at >= saved.created_at);
        }
        assert_eq!(repo.get_all_commands().unwrap().len(), 6);
    }

    #[cfg(unix)]
    #[test]
    fn without_store_flag_nothing_new_is_saved() {
        let repo = MemoryRepository::new();
        let exec = executor();
        let engine = ChainEngine::new(&repo, &exec);
        let steps = three_steps(&repo);
        engine.create(new_chain("transient", steps, false, false)).unwrap();

        engine.execute("transient", ExecMode::Capture).unwrap();
        assert_eq!(repo.get_all_commands().unwrap().len(), 3);
    }
}
