use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::export::topic_file_stem;

pub const LEDGER_SUFFIX: &str = "_failed_terms.txt";

/// Terms that failed in the latest pass over a topic.
pub trait FailureLedger {
    /// Replace the topic's entry and return where it was stored.
    fn save(&self, topic: &str, terms: &BTreeSet<String>) -> Result<PathBuf>;
    /// A topic without an entry has no failed terms.
    fn load(&self, topic: &str) -> Result<BTreeSet<String>>;
    fn clear(&self, topic: &str) -> Result<()>;
    /// Topics that currently have an entry.
    fn pending_topics(&self) -> Result<Vec<String>>;
}

/// One newline-delimited UTF-8 file per topic.
#[derive(Debug, Clone)]
pub struct FileLedger {
    dir: PathBuf,
}

impl FileLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, topic: &str) -> PathBuf {
        self.dir
            .join(format!("{}{LEDGER_SUFFIX}", topic_file_stem(topic)))
    }
}

impl FailureLedger for FileLedger {
    fn save(&self, topic: &str, terms: &BTreeSet<String>) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path_for(topic);
        let staging = path.with_extension("txt.tmp");
        let mut body = String::new();
        for term in terms {
            body.push_str(term);
            body.push('\n');
        }
        fs::write(&staging, body)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        tracing::debug!(topic, path = %path.display(), count = terms.len(), "saved failure ledger");
        Ok(path)
    }

    fn load(&self, topic: &str) -> Result<BTreeSet<String>> {
        let path = self.path_for(topic);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                tracing::debug!(topic, path = %path.display(), "no failure ledger");
                return Ok(BTreeSet::new());
            }
            Err(error) => {
                return Err(error).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    fn clear(&self, topic: &str) -> Result<()> {
        let path = self.path_for(topic);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error).with_context(|| format!("failed to remove {}", path.display())),
        }
    }

    fn pending_topics(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut topics = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry =
                entry.with_context(|| format!("failed to scan {}", self.dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if let Some(topic) = name.strip_suffix(LEDGER_SUFFIX)
                && !topic.is_empty()
            {
                topics.push(topic.to_string());
            }
        }
        topics.sort();
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempdir().expect("tempdir");
        let ledger = FileLedger::new(temp.path());
        let terms = set(&["反向传播", "Symmetric monoidal category"]);

        let path = ledger.save("深度学习", &terms).expect("save");

        assert!(path.ends_with("深度学习_failed_terms.txt"));
        assert_eq!(ledger.load("深度学习").expect("load"), terms);
    }

    #[test]
    fn load_of_unknown_topic_is_empty() {
        let temp = tempdir().expect("tempdir");
        let ledger = FileLedger::new(temp.path());
        assert!(ledger.load("never").expect("load").is_empty());
    }

    #[test]
    fn save_replaces_previous_entry() {
        let temp = tempdir().expect("tempdir");
        let ledger = FileLedger::new(temp.path());
        ledger.save("T", &set(&["A", "B"])).expect("save");
        ledger.save("T", &set(&["C"])).expect("save");
        assert_eq!(ledger.load("T").expect("load"), set(&["C"]));
        assert!(!temp.path().join("T_failed_terms.txt.tmp").exists());
    }

    #[test]
    fn clear_removes_entry_and_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let ledger = FileLedger::new(temp.path());
        let path = ledger.save("T", &set(&["A"])).expect("save");

        ledger.clear("T").expect("clear");
        assert!(!path.exists());
        assert!(ledger.load("T").expect("load").is_empty());
        ledger.clear("T").expect("clear again");
    }

    #[test]
    fn load_ignores_blank_lines_and_whitespace() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("T_failed_terms.txt"), "  A \n\n B\n\n").expect("write");
        let ledger = FileLedger::new(temp.path());
        assert_eq!(ledger.load("T").expect("load"), set(&["A", "B"]));
    }

    #[test]
    fn pending_topics_lists_ledger_files_only() {
        let temp = tempdir().expect("tempdir");
        let ledger = FileLedger::new(temp.path());
        ledger.save("深度学习", &set(&["A"])).expect("save");
        ledger.save("量子计算", &set(&["B"])).expect("save");
        fs::write(temp.path().join("notes.txt"), "x").expect("write");
        fs::create_dir_all(temp.path().join("nested")).expect("mkdir");
        fs::write(
            temp.path().join("nested").join("Other_failed_terms.txt"),
            "y",
        )
        .expect("write");

        assert_eq!(
            ledger.pending_topics().expect("topics"),
            vec!["深度学习".to_string(), "量子计算".to_string()]
        );
    }

    #[test]
    fn missing_directory_has_no_pending_topics() {
        let temp = tempdir().expect("tempdir");
        let ledger = FileLedger::new(temp.path().join("absent"));
        assert!(ledger.pending_topics().expect("topics").is_empty());
    }

    #[test]
    fn unsafe_topic_characters_stay_inside_ledger_dir() {
        let temp = tempdir().expect("tempdir");
        let ledger = FileLedger::new(temp.path());
        let path = ledger.save("AC/DC", &set(&["A"])).expect("save");
        assert_eq!(path.parent(), Some(temp.path()));
        assert_eq!(ledger.load("AC/DC").expect("load"), set(&["A"]));
    }
}
