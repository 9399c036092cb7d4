//! Pipe-separated command lines run one segment at a time.
//!
//! Unlike a shell pipe, segments do not run concurrently: each one finishes
//! and is recorded before its combined output is handed to the next as stdin.

use tracing::{debug, info};

use crate::errors::{ExecError, RepoError};
use crate::id;
use crate::runner::{Input, ProcessRunner};
use crate::storage::CommandRecord;

/// Tag attached to every record produced by a pipeline run.
pub const PIPELINE_TAG: &str = "pipeline";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub program: String,
    pub args: Vec<String>,
}

/// Split on `|`, then on runs of whitespace.
pub fn parse(raw: &str) -> Result<Vec<Segment>, ExecError> {
    if raw.trim().is_empty() {
        return Err(ExecError::missing_value());
    }
    raw.split('|')
        .map(|part| -> Result<Segment, ExecError> {
            let mut words = part.split_whitespace().map(str::to_string);
            let program = words.next().ok_or_else(ExecError::missing_value)?;
            Ok(Segment {
                program,
                args: words.collect(),
            })
        })
        .collect()
}

pub struct PipelineSequencer<'a> {
    runner: &'a ProcessRunner,
    tags: Vec<String>,
}

impl<'a> PipelineSequencer<'a> {
    pub fn new(runner: &'a ProcessRunner) -> Self {
        Self {
            runner,
            tags: Vec::new(),
        }
    }

    /// Extra tags for every record, after the `pipeline` tag.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Run every segment of `raw` in order.
    ///
    /// `sink` receives each completed record before the next segment starts.
    /// The run stops at the first failing segment, so the returned list ends
    /// with that failure and later segments are never started.
    pub fn run<F>(&self, raw: &str, mut sink: F) -> Result<Vec<CommandRecord>, ExecError>
    where
        F: FnMut(&CommandRecord) -> anyhow::Result<()>,
    {
        let segments = parse(raw)?;
        let total = segments.len();
        let mut records = Vec::with_capacity(total);
        let mut input = Input::Inherit;

        for (index, segment) in segments.into_iter().enumerate() {
            debug!(step = index + 1, total, program = %segment.program, "running pipeline segment");
            let mut record = CommandRecord::begin(id::next_id(), &segment.program, &segment.args)
                .with_tags(std::iter::once(PIPELINE_TAG.to_string()).chain(self.tags.iter().cloned()));
            let outcome = self.runner.run(&segment.program, &segment.args, input);
            record.complete(&outcome);

            sink(&record).map_err(RepoError::Other)?;
            let failed = !record.success;
            records.push(record);

            if failed {
                info!(step = index + 1, total, "pipeline stopped at failing segment");
                break;
            }
            input = Input::Data(outcome.combined.into_bytes());
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_segments_and_arguments() {
        let segments = parse("  ls   -la /tmp |grep  rs|  wc -l ").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment {
                    program: "ls".to_string(),
                    args: vec!["-la".to_string(), "/tmp".to_string()],
                },
                Segment {
                    program: "grep".to_string(),
                    args: vec!["rs".to_string()],
                },
                Segment {
                    program: "wc".to_string(),
                    args: vec!["-l".to_string()],
                },
            ]
        );
    }

    #[test]
    fn empty_line_and_empty_segments_are_rejected() {
        for raw in ["", "   ", "ls |", "| wc", "ls || wc"] {
            let err = parse(raw).unwrap_err();
            assert!(
                err.to_string().contains("value must be provided"),
                "unexpected error for {:?}: {}",
                raw,
                err
            );
        }
    }

    #[test]
    fn invalid_line_spawns_nothing() {
        let runner = ProcessRunner::new();
        let mut seen = 0;
        let result = PipelineSequencer::new(&runner).run("echo hi | ", |_| {
            seen += 1;
            Ok(())
        });
        assert!(matches!(result, Err(ExecError::InvalidInput(_))));
        assert_eq!(seen, 0);
    }

    #[cfg(unix)]
    #[test]
    fn output_flows_into_the_next_segment() {
        let runner = ProcessRunner::new();
        let records = PipelineSequencer::new(&runner)
            .run("echo hello | cat", |_| Ok(()))
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[1].output.contains("hello"));
        assert!(records.iter().all(|r| r.success));
        assert!(records.iter().all(|r| r.tags.first().map(String::as_str) == Some(PIPELINE_TAG)));
        assert_ne!(records[0].id, records[1].id);
    }

    #[cfg(unix)]
    #[test]
    fn stops_at_first_failure() {
        let runner = ProcessRunner::new();
        let mut persisted = Vec::new();
        let records = PipelineSequencer::new(&runner)
            .run("false | echo never", |record| {
                persisted.push(record.name.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(persisted, vec!["false".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn missing_program_stops_the_pipeline() {
        let runner = ProcessRunner::new();
        let records = PipelineSequencer::new(&runner)
            .run("cmdvault-no-such-binary | echo never", |_| Ok(()))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].exit_code, None);
        assert!(records[0].error.contains("failed to start"));
    }

    #[cfg(unix)]
    #[test]
    fn sink_error_halts_the_run() {
        let runner = ProcessRunner::new();
        let result = PipelineSequencer::new(&runner)
            .with_tags(vec!["demo".to_string()])
            .run("echo one | cat", |_| Err(anyhow::anyhow!("disk full")));
        let err = result.unwrap_err();
        assert!(matches!(err, ExecError::Repository(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
