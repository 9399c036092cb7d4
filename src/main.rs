mod chain;
mod config;
mod errors;
mod executor;
mod exit_status;
mod fuzzy_matcher;
mod i18n;
mod id;
mod logging;
mod pipeline;
mod pty;
mod repository;
mod runner;
mod storage;
mod store_manager;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Local};
use clap::{Parser, Subcommand};
use colored::*;
use regex::Regex;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use chain::{parse_step_ids, ChainEngine, ChainState, NewChain};
use config::Config;
use executor::{ExecMode, StreamExecutor};
use fuzzy_matcher::CommandMatcher;
use i18n::I18n;
use logging::LogLevel;
use pipeline::PipelineSequencer;
use repository::Repository;
use runner::ProcessRunner;
use storage::CommandRecord;
use store_manager::StoreManager;

const COMMAND_COLUMN_WIDTH: usize = 60;

#[derive(Parser)]
#[command(name = "cv", version)]
#[command(about = "Record shell commands with their output, then replay, chain, pipe and search them")]
struct Cli {
    /// Log level [default: warn, or $CMDVAULT_LOG]
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a command and record its output
    Run {
        /// Execution mode [default: from config]
        #[arg(long, short = 'm', value_enum)]
        mode: Option<ExecMode>,
        /// Tag to attach (repeatable)
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,
        /// Category to file the record under
        #[arg(long, short = 'c')]
        category: Option<String>,
        /// Run without saving a record
        #[arg(long)]
        no_store: bool,
        /// Program followed by its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Run a pipe-separated command line one segment at a time
    Pipe {
        /// Command line, e.g. "ls -la | grep rs" (wrap in quotes)
        command: String,
        /// Tag to attach to every segment (repeatable)
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,
    },
    /// Run a stored command again and record the new result
    Rerun {
        id: String,
        #[arg(long, short = 'm', value_enum)]
        mode: Option<ExecMode>,
    },
    /// List recorded commands, newest first
    List {
        /// Only records carrying this tag
        #[arg(long, short = 't')]
        tag: Option<String>,
        /// Only failed records
        #[arg(long, conflicts_with = "succeeded")]
        failed: bool,
        /// Only successful records
        #[arg(long)]
        succeeded: bool,
        /// Maximum number of records to show [default: from config]
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
    /// Show one record with its output
    Show { id: String },
    /// Fuzzy search recorded commands
    Search {
        query: String,
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
    /// Add tags to a record
    Tag {
        id: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Delete one record
    Delete { id: String },
    /// Remove old records
    Clean {
        /// Age threshold such as 30d, 12h or 45m [default: storage.max_retention_days]
        #[arg(long, conflicts_with = "all")]
        older_than: Option<String>,
        /// Remove every record
        #[arg(long)]
        all: bool,
        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Manage and run command chains
    Chain {
        #[command(subcommand)]
        action: ChainAction,
    },
}

#[derive(Subcommand)]
enum ChainAction {
    /// Define a chain from recorded command ids
    Create {
        name: String,
        /// Comma separated record ids, in order
        #[arg(long, short = 's')]
        steps: String,
        #[arg(long, short = 'd', default_value = "")]
        description: String,
        /// Stop at the first failing step
        #[arg(long)]
        conditional: bool,
        /// Save a result record for every step
        #[arg(long)]
        store: bool,
    },
    /// Execute a chain
    Run {
        name: String,
        #[arg(long, short = 'm', value_enum)]
        mode: Option<ExecMode>,
    },
    /// List chains
    List,
    /// Delete a chain
    Delete { name: String },
}

struct App {
    config: Config,
    i18n: I18n,
    store: StoreManager,
    executor: StreamExecutor,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level)?;

    let config = Config::new().context("Failed to load configuration")?;
    let i18n = I18n::new(&config.get_effective_language());
    let store = StoreManager::open(Config::data_dir(), config.storage.clone())
        .context(i18n.t("error_open_store"))?;
    let app = App {
        config,
        i18n,
        store,
        executor: StreamExecutor::new(ProcessRunner::new()),
    };

    let exit_code = match cli.command {
        Commands::Run {
            mode,
            tags,
            category,
            no_store,
            command,
        } => {
            let (program, args) = command
                .split_first()
                .ok_or_else(|| anyhow!("value must be provided"))?;
            let mut record = CommandRecord::begin(id::next_id(), program, args).with_tags(tags);
            record.category = category;
            app.run_and_record(&app.executor, record, mode, !no_store)?
        }
        Commands::Pipe { command, tags } => app.run_pipeline(&command, tags)?,
        Commands::Rerun { id: source_id, mode } => {
            let source = app.store.get(&source_id)?;
            println!(
                "{}",
                app.i18n
                    .t_format("rerun_source", &[&source.id, &source.command_line()])
                    .dimmed()
            );
            let mut record = CommandRecord::begin(id::next_id(), &source.name, &source.args)
                .with_tags(source.tags.iter().cloned());
            record.category = source.category.clone();
            // Replay where the command originally ran, when that still exists
            if source.working_dir.is_dir() {
                let executor = StreamExecutor::new(ProcessRunner::in_dir(&source.working_dir));
                record.working_dir = source.working_dir.clone();
                app.run_and_record(&executor, record, mode, true)?
            } else {
                app.run_and_record(&app.executor, record, mode, true)?
            }
        }
        Commands::List {
            tag,
            failed,
            succeeded,
            limit,
        } => {
            app.list(tag, failed, succeeded, limit)?;
            0
        }
        Commands::Show { id } => {
            app.show(&id)?;
            0
        }
        Commands::Search { query, limit } => {
            app.search(&query, limit)?;
            0
        }
        Commands::Tag { id, tags } => {
            let mut record = app.store.get(&id)?;
            record.add_tags(tags);
            app.store
                .put(&record)
                .context(app.i18n.t("error_save_record"))?;
            println!(
                "{}",
                app.i18n
                    .t_format("tags_updated", &[&record.id, &record.tags.join(", ")])
                    .green()
            );
            0
        }
        Commands::Delete { id } => {
            app.store.delete(&id)?;
            println!("{}", app.i18n.t_format("record_deleted", &[&id]).green());
            0
        }
        Commands::Clean {
            older_than,
            all,
            yes,
        } => {
            app.clean(older_than, all, yes)?;
            0
        }
        Commands::Chain { action } => app.chain(action)?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

impl App {
    fn default_mode(&self, mode: Option<ExecMode>) -> ExecMode {
        mode.unwrap_or(self.config.execution.default_mode)
    }

    /// Execute the command a fresh record describes and print the result.
    /// Returns the exit code `cv` itself should finish with.
    fn run_and_record(
        &self,
        executor: &StreamExecutor,
        mut record: CommandRecord,
        mode: Option<ExecMode>,
        store: bool,
    ) -> Result<i32> {
        let run = executor
            .run_once(&record.name, &record.args, self.default_mode(mode))?;
        record.complete(&run.outcome);

        self.print_result(&record, run.captured().is_some());

        if store {
            self.store
                .put(&record)
                .context(self.i18n.t("error_save_record"))?;
            println!("{}", self.i18n.t_format("result_saved", &[&record.id]).green().bold());
            if self.config.storage.auto_clean {
                self.store.clean_expired()?;
            }
        }

        Ok(exit_code_of(&record))
    }

    fn print_result(&self, record: &CommandRecord, captured: bool) {
        let Some(code) = record.exit_code else {
            println!("{}", self.i18n.t("command_not_started").red().bold());
            println!("{}", record.error.red());
            return;
        };

        if captured {
            if !record.output.is_empty() {
                println!("{}", self.i18n.t("stdout").cyan().bold());
                print!("{}", with_newline(&record.output));
            }
            if !record.error.is_empty() {
                println!("{}", self.i18n.t("stderr").red().bold());
                print!("{}", with_newline(&record.error).red());
            }
        }

        let completed = self.i18n.t_format("command_completed", &[&code.to_string()]);
        if record.success {
            println!("{}", completed.green().bold());
        } else {
            println!("{}", completed.red().bold());
        }
        println!(
            "{}: {}ms",
            self.i18n.t("execution_time").yellow(),
            record.duration_ms().to_string().green()
        );
    }

    fn run_pipeline(&self, command: &str, tags: Vec<String>) -> Result<i32> {
        let total = pipeline::parse(command)?.len();
        let store = self.config.execution.store_pipeline;
        let sequencer = PipelineSequencer::new(self.executor.runner()).with_tags(tags);

        let records = sequencer.run(command, |record| {
            if store {
                self.store.put(record)?;
            }
            Ok(())
        })?;

        for (index, record) in records.iter().enumerate() {
            let code = record
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            let line = self.i18n.t_format(
                "pipeline_segment",
                &[&(index + 1).to_string(), &total.to_string(), &record.command_line(), &code],
            );
            if record.success {
                println!("{}", line.green());
            } else {
                println!("{}", line.red());
            }
        }

        let Some(last) = records.last() else {
            return Ok(0);
        };
        if last.success {
            println!("{}", self.i18n.t("pipeline_output").cyan().bold());
            print!("{}", with_newline(&last.output));
        } else {
            if !last.error.is_empty() {
                println!("{}", self.i18n.t("stderr").red().bold());
                print!("{}", with_newline(&last.error).red());
            }
            if records.len() < total {
                println!(
                    "{}",
                    self.i18n
                        .t_format("pipeline_stopped", &[&records.len().to_string(), &total.to_string()])
                        .yellow()
                );
            }
        }
        Ok(exit_code_of(last))
    }

    fn list(&self, tag: Option<String>, failed: bool, succeeded: bool, limit: Option<usize>) -> Result<()> {
        let mut records = match (&tag, failed, succeeded) {
            (Some(tag), _, _) => self.store.search_by_tag(tag)?,
            (None, true, _) => self.store.search_by_status(false)?,
            (None, _, true) => self.store.search_by_status(true)?,
            (None, false, false) => self.store.get_all_commands()?,
        };
        // A tag query can still be narrowed by status
        if tag.is_some() && (failed || succeeded) {
            records.retain(|r| r.success == succeeded);
        }

        if records.is_empty() {
            println!("{}", self.i18n.t("no_records").yellow());
            return Ok(());
        }
        let total = records.len();
        let limit = limit.unwrap_or(self.config.display.max_history_shown);
        records.truncate(limit);
        println!(
            "{}",
            self.i18n
                .t_format("history_records", &[&records.len().to_string(), &total.to_string()])
                .cyan()
                .bold()
        );
        for record in &records {
            println!("{}", self.format_line(record));
        }
        Ok(())
    }

    fn format_line(&self, record: &CommandRecord) -> String {
        let status = if record.success {
            format!("{:>4}", record.exit_code.unwrap_or(0)).green()
        } else {
            let code = record
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!("{:>4}", code).red()
        };
        let mut line = format!(
            "{}  {}  {}  {}",
            record.id.yellow(),
            status,
            record
                .created_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed(),
            truncate_to_width(&record.command_line(), COMMAND_COLUMN_WIDTH)
        );
        if !record.tags.is_empty() {
            line.push_str(&format!("  [{}]", record.tags.join(", ")).blue().to_string());
        }
        line
    }

    fn show(&self, id: &str) -> Result<()> {
        let record = self.store.get(id)?;
        let status = if record.success {
            self.i18n.t("status_ok").green()
        } else {
            self.i18n.t("status_failed").red()
        };
        let code = record
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let time_format = "%Y-%m-%d %H:%M:%S%.3f";

        println!("{}: {}", self.i18n.t("label_id").yellow(), record.id);
        println!("{}: {}", self.i18n.t("label_command").yellow(), record.command_line());
        println!("{}: {} ({})", self.i18n.t("label_status").yellow(), status, code);
        println!(
            "{}: {}",
            self.i18n.t("label_created").yellow(),
            record.created_at.with_timezone(&Local).format(time_format)
        );
        println!(
            "{}: {}",
            self.i18n.t("label_terminated").yellow(),
            record.terminated_at.with_timezone(&Local).format(time_format)
        );
        println!("{}: {}ms", self.i18n.t("execution_time").yellow(), record.duration_ms());
        println!("{}: {}", self.i18n.t("label_dir").yellow(), record.working_dir.display());
        if !record.tags.is_empty() {
            println!("{}: {}", self.i18n.t("label_tags").yellow(), record.tags.join(", "));
        }
        if let Some(category) = &record.category {
            println!("{}: {}", self.i18n.t("label_category").yellow(), category);
        }
        if let Some(chain) = &record.chain {
            println!("{}: {}", self.i18n.t("label_chain").yellow(), chain);
        }
        if !record.output.is_empty() {
            println!("{}", self.i18n.t("stdout").cyan().bold());
            print!("{}", with_newline(&record.output));
        }
        if !record.error.is_empty() {
            println!("{}", self.i18n.t("stderr").red().bold());
            print!("{}", with_newline(&record.error).red());
        }
        Ok(())
    }

    fn search(&self, query: &str, limit: Option<usize>) -> Result<()> {
        let hits = CommandMatcher::new().rank(query, self.store.get_all_commands()?);
        if hits.is_empty() {
            println!("{}", self.i18n.t_format("search_no_matches", &[query]).yellow());
            return Ok(());
        }
        let limit = limit.unwrap_or(self.config.display.max_history_shown);
        for hit in hits.iter().take(limit) {
            println!("{}", self.format_line(&hit.record));
        }
        Ok(())
    }

    fn clean(&self, older_than: Option<String>, all: bool, yes: bool) -> Result<()> {
        if all {
            let count = self.store.get_all_commands()?.len();
            println!("{}", self.i18n.t_format("clean_all_summary", &[&count.to_string()]).red().bold());
            if !yes && !confirm_delete(&self.i18n)? {
                println!("{}", self.i18n.t("confirm_aborted").yellow());
                return Ok(());
            }
            let cleaned = self.store.clean_all()?;
            println!("{}", self.i18n.t_format("cleaned_records", &[&cleaned.to_string()]));
            return Ok(());
        }

        // No age means the configured retention window
        let (label, age) = match older_than {
            Some(text) => {
                let age = parse_age(&text)
                    .ok_or_else(|| anyhow!(self.i18n.t_format("invalid_duration", &[&text])))?;
                (text, Some(age))
            }
            None => (format!("{}d", self.config.storage.max_retention_days), None),
        };
        println!("{}", self.i18n.t_format("clean_expired_summary", &[&label]));
        if !yes && !confirm_delete(&self.i18n)? {
            println!("{}", self.i18n.t("confirm_aborted").yellow());
            return Ok(());
        }
        let cleaned = match age {
            Some(age) => self.store.clean_older_than(age)?,
            None => self.store.clean_expired()?,
        };
        println!("{}", self.i18n.t_format("cleaned_records", &[&cleaned.to_string()]));
        Ok(())
    }

    fn chain(&self, action: ChainAction) -> Result<i32> {
        let engine = ChainEngine::new(&self.store, &self.executor);
        match action {
            ChainAction::Create {
                name,
                steps,
                description,
                conditional,
                store,
            } => {
                let chain = engine.create(NewChain {
                    name,
                    description,
                    steps: parse_step_ids(&steps),
                    conditional,
                    store,
                })?;
                println!(
                    "{}",
                    self.i18n
                        .t_format("chain_created", &[&chain.name, &chain.steps.len().to_string()])
                        .green()
                );
                Ok(0)
            }
            ChainAction::Run { name, mode } => {
                let total = engine.get(&name)?.steps.len();
                let report = engine.execute(&name, self.default_mode(mode))?;
                for (index, record) in report.records.iter().enumerate() {
                    let header = self.i18n.t_format(
                        "chain_step",
                        &[&(index + 1).to_string(), &total.to_string(), &record.command_line()],
                    );
                    println!("{}", header.cyan().bold());
                    self.print_result(record, !record.output.is_empty() || !record.error.is_empty());
                }

                let failed = report.failed().len();
                match report.state {
                    ChainState::Aborted => println!(
                        "{}",
                        self.i18n
                            .t_format(
                                "chain_aborted",
                                &[&report.name, &report.records.len().to_string(), &total.to_string()]
                            )
                            .red()
                            .bold()
                    ),
                    _ => {
                        let summary = self.i18n.t_format(
                            "chain_completed",
                            &[&report.name, &report.records.len().to_string(), &failed.to_string()],
                        );
                        if failed == 0 {
                            println!("{}", summary.green().bold());
                        } else {
                            println!("{}", summary.yellow().bold());
                        }
                    }
                }
                Ok(if failed == 0 { 0 } else { 1 })
            }
            ChainAction::List => {
                let chains = engine.list()?;
                if chains.is_empty() {
                    println!("{}", self.i18n.t("no_chains").yellow());
                }
                for chain in chains {
                    let policy = if chain.conditional {
                        self.i18n.t("chain_conditional")
                    } else {
                        self.i18n.t("chain_always")
                    };
                    let mut flags = vec![policy];
                    if chain.store {
                        flags.push(self.i18n.t("chain_stored"));
                    }
                    println!(
                        "{}  ({})  {}",
                        chain.name.green().bold(),
                        flags.join(", "),
                        chain.description
                    );
                    println!("    {}", chain.steps.join(" -> ").dimmed());
                }
                Ok(0)
            }
            ChainAction::Delete { name } => {
                engine.delete(&name)?;
                println!("{}", self.i18n.t_format("chain_deleted", &[&name]).green());
                Ok(0)
            }
        }
    }
}

/// Exit code `cv` reports for a finished record.
fn exit_code_of(record: &CommandRecord) -> i32 {
    match record.exit_code {
        Some(code) if record.success => code,
        Some(0) | None => exit_status::GENERIC_FAILURE,
        Some(code) => code,
    }
}

fn with_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}

/// Parse ages like `30d`, `12h`, `45m`.
fn parse_age(text: &str) -> Option<Duration> {
    let pattern = Regex::new(r"^\s*(\d+)\s*([dhm])\s*$").ok()?;
    let caps = pattern.captures(text)?;
    let amount: i64 = caps[1].parse().ok()?;
    match &caps[2] {
        "d" => Duration::try_days(amount),
        "h" => Duration::try_hours(amount),
        "m" => Duration::try_minutes(amount),
        _ => None,
    }
}

/// Cut `text` to at most `max` terminal columns, marking the cut with `…`.
fn truncate_to_width(text: &str, max: usize) -> String {
    let mut lines = text.lines();
    let line = lines.next().unwrap_or("");
    let multiline = lines.next().is_some();
    let total: usize = line.chars().map(|c| c.width().unwrap_or(0)).sum();
    if total <= max && !multiline {
        return line.to_string();
    }

    let budget = max.saturating_sub(1);
    let mut width = 0;
    let mut result = String::new();
    for c in line.chars() {
        let w = c.width().unwrap_or(0);
        if width + w > budget {
            break;
        }
        width += w;
        result.push(c);
    }
    result.push('…');
    result
}

fn confirm_delete(i18n: &I18n) -> Result<bool> {
    print!("{}", i18n.t("confirm_delete_prompt").yellow());
    io::stdout().flush().ok();
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return Ok(false);
    }
    Ok(input.trim().to_lowercase() == "yes")
}
