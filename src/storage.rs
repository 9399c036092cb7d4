use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::runner::Outcome;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CommandRecord {
    pub id: String,                    // Record unique identifier
    pub name: String,                  // Program invoked
    pub args: Vec<String>,             // Arguments, in order
    #[serde(skip)]
    pub output: String, // Captured stdout (stored beside the metadata)
    #[serde(skip)]
    pub error: String, // Captured stderr or spawn failure message
    pub success: bool,
    #[serde(default)]
    pub exit_code: Option<i32>, // None when the process never started
    pub created_at: DateTime<Utc>,
    pub terminated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub chain: Option<String>, // Chain whose execution produced this record
    #[serde(default)]
    pub working_dir: PathBuf,
}

impl CommandRecord {
    /// Start a record right before the process is spawned.
    pub fn begin(id: String, name: &str, args: &[String]) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.to_string(),
            args: args.to_vec(),
            output: String::new(),
            error: String::new(),
            success: false,
            exit_code: None,
            created_at: now,
            terminated_at: now,
            tags: Vec::new(),
            category: None,
            chain: None,
            working_dir: std::env::current_dir().unwrap_or_default(),
        }
    }

    /// Fill in output and status once the process has finished.
    pub fn complete(&mut self, outcome: &Outcome) {
        self.output = outcome.stdout.clone();
        self.error = outcome.stderr.clone();
        self.success = outcome.success;
        self.exit_code = outcome.exit_code;
        self.terminated_at = Utc::now().max(self.created_at);
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_tags(tags);
        self
    }

    /// Append tags, keeping first-seen order and dropping duplicates.
    pub fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            let tag = tag.trim();
            if !tag.is_empty() && !self.tags.iter().any(|t| t == tag) {
                self.tags.push(tag.to_string());
            }
        }
    }

    /// Program and arguments joined the way a user would type them.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            return self.name.clone();
        }
        format!("{} {}", self.name, self.args.join(" "))
    }

    pub fn duration_ms(&self) -> i64 {
        (self.terminated_at - self.created_at).num_milliseconds()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChainDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<String>, // Record ids, in execution order
    pub conditional: bool,  // Stop at the first failing step
    pub store: bool,        // Persist a result record per step
    pub created_at: DateTime<Utc>,
}
