use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

use crate::storage::CommandRecord;

/// A record that matched a search query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record: CommandRecord,
    pub score: i64,
}

/// FZF-style ranking of stored commands.
pub struct CommandMatcher {
    matcher: SkimMatcherV2,
}

impl CommandMatcher {
    pub fn new() -> Self {
        Self {
            matcher: SkimMatcherV2::default(),
        }
    }

    /// Score `text` against `pattern`, trying stricter strategies first.
    pub fn score(&self, pattern: &str, text: &str) -> Option<i64> {
        if pattern.is_empty() {
            return Some(0);
        }
        let pattern_lower = pattern.to_lowercase();
        let text_lower = text.to_lowercase();

        // Prefix match
        if text_lower.starts_with(&pattern_lower) {
            return Some(1000 + (pattern.len() * 10) as i64);
        }
        // Exact substring
        if text_lower.contains(&pattern_lower) {
            return Some(800 + (pattern.len() * 8) as i64);
        }
        self.matcher.fuzzy_match(text, pattern)
    }

    /// Best score of a record over its id, command line, tags and category.
    pub fn score_record(&self, pattern: &str, record: &CommandRecord) -> Option<i64> {
        // An id prefix is the most specific thing a user can type
        if !pattern.is_empty() && record.id.starts_with(pattern) {
            return Some(1200);
        }
        let mut best = self.score(pattern, &record.command_line());
        let extras = record.tags.iter().chain(record.category.iter());
        for text in extras {
            // Tag hits rank just below command hits of the same kind
            if let Some(score) = self.score(pattern, text).map(|s| s - 1) {
                best = Some(best.map_or(score, |b| b.max(score)));
            }
        }
        best
    }

    /// Matching records, best first; ties go to the most recent record.
    pub fn rank(&self, pattern: &str, records: Vec<CommandRecord>) -> Vec<SearchHit> {
        let pattern = pattern.trim();
        let mut hits: Vec<SearchHit> = records
            .into_iter()
            .filter_map(|record| {
                self.score_record(pattern, &record)
                    .map(|score| SearchHit { record, score })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        });
        hits
    }
}

impl Default for CommandMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(id: &str, line: &str, tags: &[&str]) -> CommandRecord {
        let mut words = line.split_whitespace().map(str::to_string);
        let name = words.next().unwrap();
        let args: Vec<String> = words.collect();
        CommandRecord::begin(id.to_string(), &name, &args).with_tags(tags.iter().copied())
    }

    #[test]
    fn strategies_rank_in_order() {
        let matcher = CommandMatcher::new();
        let prefix = matcher.score("git", "git status").unwrap();
        let contains = matcher.score("status", "git status").unwrap();
        let fuzzy = matcher.score("gst", "git status").unwrap();
        assert!(prefix > contains);
        assert!(contains > fuzzy);
        assert!(matcher.score("xyz", "git status").is_none());
    }

    #[test]
    fn ranks_records_by_relevance() {
        let matcher = CommandMatcher::new();
        let records = vec![
            record("1", "cargo build --release", &[]),
            record("2", "make build", &[]),
            record("3", "ls -la", &["build"]),
            record("4", "echo hello", &[]),
        ];
        let hits = matcher.rank("build", records);
        let ids: Vec<&str> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&"4"));
        // tag "build" is a prefix hit, above substring hits in commands
        assert_eq!(ids[0], "3");
    }

    #[test]
    fn id_prefix_wins_and_ties_prefer_recent() {
        let matcher = CommandMatcher::new();
        let mut older = record("aa1", "echo one", &[]);
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = record("bb2", "echo two", &[]);
        let hits = matcher.rank("echo", vec![older.clone(), newer]);
        assert_eq!(hits[0].record.id, "bb2");

        let hits = matcher.rank("aa", vec![older, record("cc3", "aa", &[])]);
        assert_eq!(hits[0].record.id, "aa1");
    }
}
