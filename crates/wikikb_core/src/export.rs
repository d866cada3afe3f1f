use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow};
use calamine::{Data, Reader, Xlsx, open_workbook};
use chrono::Local;
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use walkdir::WalkDir;

pub const EXPORT_MARKER: &str = "_术语词库_";
pub const PATCH_MARKER: &str = "_补丁_";
pub const MERGED_MARKER: &str = "_术语词库_合并_";
pub const TERM_LIST_MARKER: &str = "_术语列表_";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Longest text an xlsx cell can hold.
pub const XLSX_MAX_CELL_CHARS: usize = 32_767;

const TITLE_HEADER: &str = "title";
const CONTENT_HEADER: &str = "content";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermRow {
    pub title: String,
    pub content: String,
}

/// Tabular artifact storage, one `title`/`content` row per term.
pub trait TableStore {
    fn write_table(&self, path: &Path, rows: &[TermRow]) -> Result<()>;
    fn read_table(&self, path: &Path) -> Result<Vec<TermRow>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct XlsxStore;

impl TableStore for XlsxStore {
    fn write_table(&self, path: &Path, rows: &[TermRow]) -> Result<()> {
        let mut workbook = Workbook::new();
        let header = Format::new().set_bold();
        let worksheet = workbook.add_worksheet();
        worksheet
            .write_string_with_format(0, 0, TITLE_HEADER, &header)
            .context("failed to write header")?;
        worksheet
            .write_string_with_format(0, 1, CONTENT_HEADER, &header)
            .context("failed to write header")?;

        for (index, row) in rows.iter().enumerate() {
            let row_number = u32::try_from(index + 1).context("too many rows for xlsx")?;
            worksheet
                .write_string(row_number, 0, row.title.as_str())
                .with_context(|| format!("failed to write title for {}", row.title))?;
            worksheet
                .write_string(row_number, 1, clamp_cell(&row.title, &row.content))
                .with_context(|| format!("failed to write content for {}", row.title))?;
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        workbook
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn read_table(&self, path: &Path) -> Result<Vec<TermRow>> {
        let mut workbook: Xlsx<_> =
            open_workbook(path).with_context(|| format!("failed to open {}", path.display()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| anyhow!("{} has no worksheets", path.display()))?
            .with_context(|| format!("failed to read {}", path.display()))?;

        let mut rows = Vec::new();
        for (index, cells) in range.rows().enumerate() {
            let title = cells.first().map(cell_text).unwrap_or_default();
            let content = cells.get(1).map(cell_text).unwrap_or_default();
            if index == 0 && title == TITLE_HEADER {
                continue;
            }
            if title.is_empty() && content.is_empty() {
                continue;
            }
            rows.push(TermRow { title, content });
        }
        Ok(rows)
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.clone(),
        other => other.to_string(),
    }
}

fn clamp_cell(title: &str, content: &str) -> String {
    if content.chars().count() <= XLSX_MAX_CELL_CHARS {
        return content.to_string();
    }
    tracing::warn!(
        title,
        limit = XLSX_MAX_CELL_CHARS,
        "content exceeds xlsx cell limit, truncating"
    );
    content.chars().take(XLSX_MAX_CELL_CHARS).collect()
}

/// Prior rows followed by patch rows.
pub fn merge_tables(prior: Vec<TermRow>, patch: &[TermRow]) -> Vec<TermRow> {
    let mut merged = prior;
    merged.extend_from_slice(patch);
    merged
}

pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Topic as used in file names: path separators and characters that are
/// invalid on common file systems become `-`.
pub fn topic_file_stem(topic: &str) -> String {
    topic
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_control()
                || matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*' | '/' | '\\')
            {
                '-'
            } else {
                ch
            }
        })
        .collect()
}

pub fn export_file_name(topic: &str, timestamp: &str) -> String {
    format!("{}{EXPORT_MARKER}{timestamp}.xlsx", topic_file_stem(topic))
}

pub fn patch_file_name(topic: &str, timestamp: &str) -> String {
    format!("{}{PATCH_MARKER}{timestamp}.xlsx", topic_file_stem(topic))
}

pub fn merged_file_name(topic: &str, timestamp: &str) -> String {
    format!("{}{MERGED_MARKER}{timestamp}.xlsx", topic_file_stem(topic))
}

pub fn term_list_file_name(topic: &str, timestamp: &str) -> String {
    format!("{}{TERM_LIST_MARKER}{timestamp}.txt", topic_file_stem(topic))
}

/// Most recently modified export for `topic` in `dir`, merged exports included.
pub fn latest_export(dir: &Path, topic: &str) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    let prefix = format!("{}{EXPORT_MARKER}", topic_file_stem(topic));
    let mut newest = None::<(SystemTime, PathBuf)>;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed to scan {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.starts_with(&prefix) || !name.ends_with(".xlsx") {
            continue;
        }
        let modified = entry
            .metadata()
            .with_context(|| format!("failed to inspect {}", entry.path().display()))?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let is_newer = newest
            .as_ref()
            .is_none_or(|(current, _)| modified > *current);
        if is_newer {
            newest = Some((modified, entry.path().to_path_buf()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
