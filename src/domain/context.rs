//! Structured context extracted from an issue's title and body.
//!
//! Code generation receives the task type, the listed requirements and
//! acceptance criteria, and the files the issue mentions alongside the raw text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

/// Kind of work an issue asks for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Feature,
    BugFix,
    Refactor,
    Documentation,
    Test,
    #[default]
    Unknown,
}

impl TaskType {
    /// Conventional-commit prefix used for PR titles
    pub fn pr_prefix(self) -> &'static str {
        match self {
            TaskType::Feature => "feat:",
            TaskType::BugFix => "fix:",
            TaskType::Refactor => "refactor:",
            TaskType::Documentation => "docs:",
            TaskType::Test => "test:",
            TaskType::Unknown => "chore:",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Feature => "feature",
            TaskType::BugFix => "bug_fix",
            TaskType::Refactor => "refactor",
            TaskType::Documentation => "documentation",
            TaskType::Test => "test",
            TaskType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword prefixes per task type, checked in this order
const TASK_KEYWORDS: &[(TaskType, &[&str])] = &[
    (TaskType::BugFix, &["bug", "fix", "error", "broken", "crash", "fail"]),
    (TaskType::Feature, &["add", "implement", "create", "new", "feature", "support"]),
    (TaskType::Refactor, &["refactor", "improve", "optimize", "clean", "restructure"]),
    (TaskType::Documentation, &["doc", "readme", "comment"]),
    (TaskType::Test, &["test", "coverage"]),
];

/// Extensions accepted as file references when the path has no directory part
const FILE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "jsx", "tsx", "go", "json", "yaml", "yml", "md", "txt", "html", "css",
    "scss", "sql", "sh", "toml", "ini", "cfg", "env", "dockerfile",
];

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z]+").expect("static regex"));

static REQUIREMENTS_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:#{1,6}\s*)?(?:requirements?|needs?|must have|should have|tasks?|todo)\s*:?\s*$")
        .expect("static regex")
});

static ACCEPTANCE_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:#{1,6}\s*)?(?:acceptance criteria|ac|done when|complete when|expected behaviou?r|expected results?)\s*:?\s*$",
    )
    .expect("static regex")
});

static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(.+?)\s*$").expect("static regex"));

static QUOTED_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([A-Za-z0-9_\-./]+\.[A-Za-z0-9]+)`").expect("static regex"));

static MENTIONED_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:file|in|at|see|modify|edit|update|create)\s+[`'"]?([A-Za-z0-9_\-./]+\.[A-Za-z0-9]+)"#)
        .expect("static regex")
});

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\d+").expect("static regex"));

static TITLE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[[^\]]*\]\s*").expect("static regex"));

/// Structured view of an issue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueContext {
    pub task_type: TaskType,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Sorted, deduplicated file paths mentioned in the body
    #[serde(default)]
    pub mentioned_files: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Requirements,
    Acceptance,
}

impl IssueContext {
    pub fn parse(title: &str, body: &str) -> Self {
        let (requirements, acceptance_criteria) = list_sections(body);
        let context = Self {
            task_type: detect_task_type(title, body),
            requirements,
            acceptance_criteria,
            mentioned_files: file_references(body),
        };
        log::debug!(
            "issue parsed: {} ({} requirements, {} criteria, {} files)",
            context.task_type,
            context.requirements.len(),
            context.acceptance_criteria.len(),
            context.mentioned_files.len()
        );
        context
    }

    /// PR title: conventional prefix, leading `[tag]` dropped, first letter lowercased
    pub fn pr_title(&self, issue_title: &str) -> String {
        let clean = TITLE_TAG_RE.replace(issue_title.trim(), "");
        let mut chars = clean.chars();
        let clean = match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => String::new(),
        };
        format!("{} {}", self.task_type.pr_prefix(), clean)
    }

    /// Markdown sections for the generator prompt; empty when nothing was extracted
    pub fn render(&self) -> String {
        let mut out = String::new();
        let sections = [
            ("Requirements", &self.requirements),
            ("Acceptance Criteria", &self.acceptance_criteria),
        ];
        for (heading, items) in sections {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("## {}\n", heading));
            for item in items {
                out.push_str(&format!("- {}\n", item));
            }
            out.push('\n');
        }
        if !self.mentioned_files.is_empty() {
            out.push_str("## Referenced Files\n");
            for file in &self.mentioned_files {
                out.push_str(&format!("- `{}`\n", file));
            }
            out.push('\n');
        }
        out
    }
}

fn detect_task_type(title: &str, body: &str) -> TaskType {
    let text = format!("{} {}", title, body).to_lowercase();
    let words: Vec<&str> = WORD_RE.find_iter(&text).map(|m| m.as_str()).collect();

    TASK_KEYWORDS
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|keyword| words.iter().any(|word| word.starts_with(keyword)))
        })
        .map_or(TaskType::Unknown, |(task_type, _)| *task_type)
}

/// Requirements and acceptance criteria: list items directly under a matching header
fn list_sections(body: &str) -> (Vec<String>, Vec<String>) {
    let mut requirements = Vec::new();
    let mut criteria = Vec::new();
    let mut section: Option<Section> = None;
    let mut seen_item = false;

    for line in body.lines() {
        if REQUIREMENTS_HEADER_RE.is_match(line) {
            section = Some(Section::Requirements);
            seen_item = false;
            continue;
        }
        if ACCEPTANCE_HEADER_RE.is_match(line) {
            section = Some(Section::Acceptance);
            seen_item = false;
            continue;
        }
        let Some(current) = section else {
            continue;
        };

        if let Some(item) = LIST_ITEM_RE.captures(line).and_then(|c| c.get(1)) {
            let target = match current {
                Section::Requirements => &mut requirements,
                Section::Acceptance => &mut criteria,
            };
            let item = item.as_str().to_string();
            if !target.contains(&item) {
                target.push(item);
            }
            seen_item = true;
        } else if !line.trim().is_empty() || seen_item {
            // Prose, or a blank line after the list, ends the section
            section = None;
        }
    }

    (requirements, criteria)
}

fn file_references(body: &str) -> Vec<String> {
    let files: BTreeSet<String> = QUOTED_FILE_RE
        .captures_iter(body)
        .chain(MENTIONED_FILE_RE.captures_iter(body))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_string())
        .filter(|path| is_file_reference(path))
        .collect();
    files.into_iter().collect()
}

fn is_file_reference(path: &str) -> bool {
    if VERSION_RE.is_match(path) {
        return false;
    }
    if path.contains('/') {
        return true;
    }
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| FILE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
