use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::client::EncyclopediaApi;
use crate::collect::{TermCollection, collect_terms};
use crate::config::KbConfig;
use crate::export::{
    TableStore, TermRow, export_file_name, latest_export, merge_tables, merged_file_name,
    patch_file_name, term_list_file_name, timestamp_now,
};
use crate::fetch::{FetchPolicy, Pause};
use crate::filter::TermFilter;
use crate::ledger::FailureLedger;

/// Outcome of one sequential pass over a term set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub successes: Vec<TermRow>,
    pub failures: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullRunReport {
    pub topic: String,
    pub total_links: usize,
    pub collected: usize,
    pub succeeded: usize,
    pub failed: Vec<String>,
    pub export_path: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
}

impl FullRunReport {
    fn empty(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            total_links: 0,
            collected: 0,
            succeeded: 0,
            failed: Vec::new(),
            export_path: None,
            ledger_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum MergeStatus {
    /// No successes, so no patch table was written.
    NothingToMerge,
    NoPriorExport,
    Merged { prior: PathBuf, merged: PathBuf },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchTopicReport {
    pub topic: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub remaining: Vec<String>,
    pub patch_path: Option<PathBuf>,
    pub merge: MergeStatus,
    pub ledger_cleared: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub policy: FetchPolicy,
    pub filter: TermFilter,
    pub output_dir: PathBuf,
    pub full_delay: Duration,
    pub patch_delay: Duration,
    pub show_progress: bool,
}

impl RunSettings {
    pub fn from_config(config: &KbConfig) -> Self {
        Self {
            policy: FetchPolicy::from_config(config),
            filter: config.term_filter(),
            output_dir: config.output_dir(),
            full_delay: config.full_delay(),
            patch_delay: config.patch_delay(),
            show_progress: true,
        }
    }

    pub fn home_language(&self) -> &str {
        &self.policy.home_language
    }
}

/// Drives full, patch and analyze runs over one set of collaborators.
pub struct Runner<A, P, L, S> {
    pub api: A,
    pub pause: P,
    pub ledger: L,
    pub store: S,
    pub settings: RunSettings,
}

impl<A, P, L, S> Runner<A, P, L, S>
where
    A: EncyclopediaApi,
    P: Pause,
    L: FailureLedger,
    S: TableStore,
{
    pub fn new(api: A, pause: P, ledger: L, store: S, settings: RunSettings) -> Self {
        Self {
            api,
            pause,
            ledger,
            store,
            settings,
        }
    }

    /// Collect the topic's terms without fetching their content.
    pub fn run_analyze(&mut self, topic: &str) -> TermCollection {
        let language = self.settings.policy.home_language.clone();
        collect_terms(&mut self.api, &language, topic, &self.settings.filter)
    }

    pub fn run_full(&mut self, topic: &str) -> Result<FullRunReport> {
        let collection = self.run_analyze(topic);
        if collection.is_empty() {
            tracing::warn!(topic, "no related terms collected");
            return Ok(FullRunReport::empty(topic));
        }
        tracing::info!(
            topic,
            total_links = collection.total_links,
            terms = collection.terms.len(),
            "collected related terms"
        );

        let delay = self.settings.full_delay;
        let record = self.fetch_all(&collection.terms, delay, "fetching terms");

        let export_path = if record.successes.is_empty() {
            tracing::warn!(topic, "no term content fetched");
            None
        } else {
            let path = self
                .settings
                .output_dir
                .join(export_file_name(topic, &timestamp_now()));
            self.store.write_table(&path, &record.successes)?;
            tracing::info!(topic, path = %path.display(), rows = record.successes.len(), "exported term base");
            Some(path)
        };

        let ledger_path = if record.failures.is_empty() {
            self.ledger.clear(topic)?;
            None
        } else {
            Some(self.ledger.save(topic, &record.failures)?)
        };

        Ok(FullRunReport {
            topic: topic.to_string(),
            total_links: collection.total_links,
            collected: collection.terms.len(),
            succeeded: record.successes.len(),
            failed: record.failures.into_iter().collect(),
            export_path,
            ledger_path,
        })
    }

    /// Retry the failed terms of every topic that has a ledger entry.
    pub fn run_patch(&mut self) -> Result<Vec<PatchTopicReport>> {
        let topics = self.ledger.pending_topics()?;
        if topics.is_empty() {
            tracing::info!("no failure ledgers found");
        }
        let mut reports = Vec::with_capacity(topics.len());
        for topic in topics {
            reports.push(self.patch_topic(&topic)?);
        }
        Ok(reports)
    }

    fn patch_topic(&mut self, topic: &str) -> Result<PatchTopicReport> {
        let terms = self.ledger.load(topic)?;
        tracing::info!(topic, terms = terms.len(), "patching failed terms");
        if terms.is_empty() {
            self.ledger.clear(topic)?;
            return Ok(PatchTopicReport {
                topic: topic.to_string(),
                attempted: 0,
                succeeded: 0,
                remaining: Vec::new(),
                patch_path: None,
                merge: MergeStatus::NothingToMerge,
                ledger_cleared: true,
            });
        }

        let delay = self.settings.patch_delay;
        let record = self.fetch_all(&terms, delay, "patching terms");
        let timestamp = timestamp_now();

        let (patch_path, merge) = if record.successes.is_empty() {
            (None, MergeStatus::NothingToMerge)
        } else {
            let path = self
                .settings
                .output_dir
                .join(patch_file_name(topic, &timestamp));
            self.store.write_table(&path, &record.successes)?;
            tracing::info!(topic, path = %path.display(), "wrote patch table");
            let merge = match self.merge_into_latest(topic, &timestamp, &record.successes) {
                Ok(status) => status,
                Err(error) => {
                    tracing::warn!(topic, "failed to merge patch table: {error:#}");
                    MergeStatus::Failed {
                        error: format!("{error:#}"),
                    }
                }
            };
            (Some(path), merge)
        };

        let ledger_cleared = record.failures.is_empty();
        if ledger_cleared {
            self.ledger.clear(topic)?;
        } else {
            self.ledger.save(topic, &record.failures)?;
        }

        Ok(PatchTopicReport {
            topic: topic.to_string(),
            attempted: terms.len(),
            succeeded: record.successes.len(),
            remaining: record.failures.into_iter().collect(),
            patch_path,
            merge,
            ledger_cleared,
        })
    }

    fn merge_into_latest(
        &self,
        topic: &str,
        timestamp: &str,
        patch: &[TermRow],
    ) -> Result<MergeStatus> {
        let Some(prior) = latest_export(&self.settings.output_dir, topic)? else {
            tracing::info!(topic, "no prior export found, skipping merge");
            return Ok(MergeStatus::NoPriorExport);
        };
        let rows = self.store.read_table(&prior)?;
        let merged_rows = merge_tables(rows, patch);
        let merged = self
            .settings
            .output_dir
            .join(merged_file_name(topic, timestamp));
        self.store.write_table(&merged, &merged_rows)?;
        tracing::info!(topic, prior = %prior.display(), merged = %merged.display(), "merged patch table");
        Ok(MergeStatus::Merged { prior, merged })
    }

    /// Fetch every term in order, pausing `delay` after each one.
    fn fetch_all(&mut self, terms: &BTreeSet<String>, delay: Duration, label: &str) -> RunRecord {
        let home = self.settings.policy.home_language.clone();
        let progress = self.progress_bar(terms.len(), label);
        let mut record = RunRecord::default();

        for term in terms {
            progress.set_message(term.clone());
            let outcome =
                self.settings
                    .policy
                    .fetch_content(&mut self.api, &mut self.pause, term, &home);
            match outcome.into_content() {
                Some(content) => record.successes.push(TermRow {
                    title: term.clone(),
                    content,
                }),
                None => {
                    record.failures.insert(term.clone());
                }
            }
            progress.inc(1);
            self.pause.pause(delay);
        }

        progress.finish_and_clear();
        tracing::info!(
            succeeded = record.successes.len(),
            failed = record.failures.len(),
            requests = self.api.request_count(),
            "{label} finished"
        );
        record
    }

    fn progress_bar(&self, len: usize, label: &str) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        let style = ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>4}/{len:4} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
        bar.set_style(style);
        bar.set_prefix(label.to_string());
        bar
    }
}

pub fn render_term_list_report(topic: &str, collection: &TermCollection) -> String {
    let mut lines = vec![
        format!("topic: {topic}"),
        format!("total links: {}", collection.total_links),
        format!("filtered terms: {}", collection.terms.len()),
        String::new(),
        "terms:".to_string(),
    ];
    for (index, term) in collection.terms.iter().enumerate() {
        lines.push(format!("{:3}. {term}", index + 1));
    }
    lines.push(String::new());
    lines.join("\n")
}

pub fn write_term_list_report(
    dir: &Path,
    topic: &str,
    collection: &TermCollection,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(term_list_file_name(topic, &timestamp_now()));
    fs::write(&path, render_term_list_report(topic, collection))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
