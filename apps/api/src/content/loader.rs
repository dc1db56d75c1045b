//! Splits a source document into ordered [`ContentRecord`]s.
//!
//! PDF sources yield one record per non-empty physical page. Text sources
//! are split by the first strategy that applies: markdown headings, then
//! horizontal rules, then groups of paragraphs.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use super::ContentRecord;
use crate::errors::PipelineError;

/// Paragraphs grouped into one record by the fallback text strategy.
pub const PARAGRAPHS_PER_RECORD: usize = 3;

/// Used when a job carries no `instructions.md`.
pub const DEFAULT_INSTRUCTIONS: &str = "\
Design professional consulting-style presentation slides:
- Clean, minimalist design with clear hierarchy
- Use bullet points for lists
- Include data visualizations where appropriate
- Add \"So What?\" insight boxes for key takeaways
- Professional color scheme";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Text,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("pdf") => SourceKind::Pdf,
            _ => SourceKind::Text,
        }
    }
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#{1,2}\s+(.+)$").expect("valid heading regex"))
}

fn rule_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(-{3,}|={3,})$").expect("valid rule regex"))
}

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("valid paragraph regex"))
}

// ────────────────────────────────────────────────────────────────────────────
// Source resolution
// ────────────────────────────────────────────────────────────────────────────

/// Finds the source under `input_dir`: `file_name` if present, otherwise the
/// first non-hidden file in name order.
pub async fn resolve_source(input_dir: &Path, file_name: &str) -> Result<PathBuf, PipelineError> {
    if !file_name.is_empty() {
        let candidate = input_dir.join(file_name);
        if tokio::fs::metadata(&candidate)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Ok(candidate);
        }
    }

    let mut entries = tokio::fs::read_dir(input_dir).await.map_err(|e| {
        PipelineError::Input(format!("Input folder not found: {}: {e}", input_dir.display()))
    })?;

    let mut candidates = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::Input(e.to_string()))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && !name.starts_with('.') {
            candidates.push(entry.path());
        }
    }
    candidates.sort();

    match candidates.into_iter().next() {
        Some(path) => {
            warn!(
                "Source '{}' not found, using {}",
                file_name,
                path.display()
            );
            Ok(path)
        }
        None => Err(PipelineError::Input(format!(
            "No input file found in {}",
            input_dir.display()
        ))),
    }
}

/// Reads `<workdir>/instructions.md`, falling back to [`DEFAULT_INSTRUCTIONS`].
pub async fn load_instructions(workdir: &Path) -> String {
    match tokio::fs::read_to_string(workdir.join("instructions.md")).await {
        Ok(text) if !text.trim().is_empty() => text,
        _ => DEFAULT_INSTRUCTIONS.to_string(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loading
// ────────────────────────────────────────────────────────────────────────────

/// Loads `path` and splits it into records. `page_cap` of -1 keeps everything.
pub async fn load_records(path: &Path, page_cap: i64) -> Result<Vec<ContentRecord>, PipelineError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::Input(format!("Cannot read {}: {e}", path.display())))?;

    let kind = SourceKind::from_path(path);
    let records = match kind {
        SourceKind::Pdf => {
            let pages = tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem_by_pages(&data)
            })
            .await
            .map_err(|e| PipelineError::Input(format!("PDF extraction task failed: {e}")))?
            .map_err(|e| PipelineError::Input(format!("Cannot extract PDF text: {e}")))?;
            split_pdf_pages(pages, page_cap)
        }
        SourceKind::Text => split_text(&String::from_utf8_lossy(&data), page_cap),
    };

    if records.is_empty() {
        return Err(PipelineError::EmptyContent);
    }

    info!(
        "Loaded {} records from {} ({:?})",
        records.len(),
        path.display(),
        kind
    );
    Ok(records)
}

fn cap_len(len: usize, page_cap: i64) -> usize {
    if page_cap < 0 {
        len
    } else {
        len.min(page_cap as usize)
    }
}

/// One record per physical page within the cap; blank pages are dropped and
/// the survivors renumbered from 1.
pub fn split_pdf_pages(pages: Vec<String>, page_cap: i64) -> Vec<ContentRecord> {
    let limit = cap_len(pages.len(), page_cap);
    pages
        .into_iter()
        .take(limit)
        .enumerate()
        .filter_map(|(i, text)| {
            let body = text.trim();
            (!body.is_empty()).then(|| (i + 1, body.to_string()))
        })
        .enumerate()
        .map(|(n, (physical, body))| ContentRecord {
            number: n + 1,
            title: format!("Page {physical}"),
            body,
        })
        .collect()
}

/// Splits text by headings, rules or paragraph groups, then applies the cap.
pub fn split_text(text: &str, page_cap: i64) -> Vec<ContentRecord> {
    let text = text.replace("\r\n", "\n");
    let lines: Vec<&str> = text.lines().collect();

    let sections = if lines.iter().any(|l| heading_re().is_match(l)) {
        split_by_headings(&lines)
    } else if lines.iter().any(|l| rule_re().is_match(l)) {
        split_by_rules(&lines)
    } else {
        split_by_paragraphs(&text)
    };

    let limit = cap_len(sections.len(), page_cap);
    sections
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (title, body))| ContentRecord {
            number: i + 1,
            title,
            body,
        })
        .collect()
}

fn split_by_headings(lines: &[&str]) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut title = "Introduction".to_string();
    let mut body: Vec<&str> = Vec::new();

    for line in lines {
        if let Some(caps) = heading_re().captures(line) {
            push_section(&mut sections, &title, &body);
            title = caps[1].trim().to_string();
            body.clear();
        } else {
            body.push(line);
        }
    }
    push_section(&mut sections, &title, &body);
    sections
}

fn split_by_rules(lines: &[&str]) -> Vec<(String, String)> {
    let mut parts: Vec<Vec<&str>> = vec![Vec::new()];
    for line in lines {
        if rule_re().is_match(line) {
            parts.push(Vec::new());
        } else if let Some(part) = parts.last_mut() {
            part.push(line);
        }
    }

    parts
        .iter()
        .enumerate()
        .filter_map(|(i, part)| {
            let body = part.join("\n").trim().to_string();
            (!body.is_empty()).then(|| (format!("Section {}", i + 1), body))
        })
        .collect()
}

fn split_by_paragraphs(text: &str) -> Vec<(String, String)> {
    let paragraphs: Vec<&str> = paragraph_re().split(text).collect();
    paragraphs
        .chunks(PARAGRAPHS_PER_RECORD)
        .enumerate()
        .filter_map(|(i, chunk)| {
            let body = chunk.join("\n\n").trim().to_string();
            (!body.is_empty()).then(|| (format!("Section {}", i + 1), body))
        })
        .collect()
}

fn push_section(sections: &mut Vec<(String, String)>, title: &str, body: &[&str]) {
    let content = body.join("\n").trim().to_string();
    if !content.is_empty() {
        sections.push((title.to_string(), content));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(records: &[ContentRecord]) -> Vec<&str> {
        records.iter().map(|r| r.title.as_str()).collect()
    }

    #[test]
    fn test_headings_with_introduction() {
        let text = "Preface text.\n\n# Market\nGrowing fast.\n\n## Risks\nCompetition.\n### not a split\nstill risks";
        let records = split_text(text, -1);
        assert_eq!(titles(&records), vec!["Introduction", "Market", "Risks"]);
        assert_eq!(records[0].body, "Preface text.");
        assert!(records[2].body.contains("### not a split"));
        assert_eq!(
            records.iter().map(|r| r.number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_headings_drop_empty_sections() {
        let records = split_text("# One\n\n# Two\nbody", -1);
        assert_eq!(titles(&records), vec!["Two"]);
        assert_eq!(records[0].number, 1);
    }

    #[test]
    fn test_rules_split() {
        let text = "first part\n---\n\n===\nsecond part\n-----\nthird";
        let records = split_text(text, -1);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].body, "first part");
        assert_eq!(records[1].title, "Section 3");
        assert_eq!(records[1].number, 2);
        assert_eq!(records[2].body, "third");
    }

    #[test]
    fn test_paragraph_chunks() {
        let text = "p1\n\np2\n\np3\n\np4\n\n\np5";
        let records = split_text(text, -1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].body, "p1\n\np2\n\np3");
        assert_eq!(records[1].body, "p4\n\np5");
        assert_eq!(titles(&records), vec!["Section 1", "Section 2"]);
    }

    #[test]
    fn test_text_page_cap() {
        let records = split_text("# A\na\n# B\nb\n# C\nc", 2);
        assert_eq!(titles(&records), vec!["A", "B"]);
    }

    #[test]
    fn test_pdf_pages_drop_blank_and_renumber() {
        let pages = vec![
            "Cover".to_string(),
            "   \n ".to_string(),
            "Body".to_string(),
            "Appendix".to_string(),
        ];
        let records = split_pdf_pages(pages, 3);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].number, 2);
        assert_eq!(records[1].title, "Page 3");
        assert_eq!(records[1].body, "Body");
    }

    #[test]
    fn test_source_kind_from_extension() {
        assert_eq!(SourceKind::from_path(Path::new("a/Report.PDF")), SourceKind::Pdf);
        assert_eq!(SourceKind::from_path(Path::new("notes.md")), SourceKind::Text);
        assert_eq!(SourceKind::from_path(Path::new("README")), SourceKind::Text);
    }

    #[tokio::test]
    async fn test_resolve_source_falls_back_to_first_visible_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(".hidden"), "x").await.unwrap();
        tokio::fs::write(dir.path().join("b.md"), "# B\nb").await.unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "a").await.unwrap();

        let found = resolve_source(dir.path(), "missing.pdf").await.unwrap();
        assert_eq!(found, dir.path().join("a.txt"));

        let exact = resolve_source(dir.path(), "b.md").await.unwrap();
        assert_eq!(exact, dir.path().join("b.md"));
    }

    #[tokio::test]
    async fn test_resolve_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_source(dir.path(), "x.pdf").await.unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));

        let err = resolve_source(&dir.path().join("nope"), "x.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }

    #[tokio::test]
    async fn test_load_records_empty_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        tokio::fs::write(&path, "  \n\n \n").await.unwrap();
        let err = load_records(&path, -1).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyContent));
    }

    #[tokio::test]
    async fn test_instructions_fallback() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_instructions(dir.path()).await, DEFAULT_INSTRUCTIONS);
        tokio::fs::write(dir.path().join("instructions.md"), "Use dark theme")
            .await
            .unwrap();
        assert_eq!(load_instructions(dir.path()).await, "Use dark theme");
    }
}
