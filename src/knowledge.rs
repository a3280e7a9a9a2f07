//! Knowledge Retriever
//!
//! Loads curated markdown documents describing schema semantics and join
//! patterns, indexes them by keyword, and selects a bounded subset relevant
//! to a question. Join-recipe documents (files named `_joins*.md` by
//! convention) are force-included when the scored selection spans more than
//! one table, because keyword overlap alone rarely surfaces them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Words too generic to carry retrieval signal, matching the tokens users
/// put in front of almost every question.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "be", "been", "being",
    "have", "has", "had", "do", "does", "did", "will", "would", "could", "should", "may",
    "might", "can", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into",
    "through", "during", "before", "after", "above", "below", "between", "under", "again",
    "further", "then", "once", "all", "each", "few", "more", "most", "other", "some", "such",
    "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very", "just", "what",
    "which", "who", "whom", "this", "that", "these", "those", "am", "show", "me", "list",
    "get", "find", "give", "tell", "how", "many", "much", "when", "where", "why", "total",
    "count", "sum", "average", "avg", "max", "min",
];

/// One curated knowledge file, read-only for the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    /// File name, used as the stable identity and deterministic tie-breaker.
    pub name: String,
    /// Full text, injected verbatim into prompts when selected.
    pub content: String,
    /// Index terms from headings, join-key annotations and the file stem.
    pub keywords: HashSet<String>,
    /// Schema tables this document talks about.
    pub tables: Vec<String>,
    /// Marks a document describing cross-table join patterns.
    pub is_join_recipe: bool,
}

/// The full document set for a session, re-indexed at load time.
pub struct KnowledgeBase {
    documents: Vec<KnowledgeDocument>,
    budget: usize,
}

impl KnowledgeBase {
    /// Read every `*.md` file under `dir`. A missing directory is an empty
    /// base, not an error: absence of knowledge is a valid state.
    pub fn load(dir: impl AsRef<Path>, table_names: &[String], budget: usize) -> std::io::Result<Self> {
        let dir = dir.as_ref();
        let mut documents = Vec::new();

        if dir.is_dir() {
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                let content = std::fs::read_to_string(&path)?;
                documents.push(index_document(name, content, table_names));
            }
            documents.sort_by(|a, b| a.name.cmp(&b.name));
            info!("indexed {} knowledge documents from {}", documents.len(), dir.display());
        } else {
            debug!("knowledge directory {} not found", dir.display());
        }

        Ok(Self { documents, budget })
    }

    pub fn from_documents(documents: Vec<KnowledgeDocument>, budget: usize) -> Self {
        let mut documents = documents;
        documents.sort_by(|a, b| a.name.cmp(&b.name));
        Self { documents, budget }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.name.as_str()).collect()
    }

    /// Select the documents to inject into the prompt for `question`.
    ///
    /// Documents are scored by keyword overlap with the question, the top-K
    /// with score > 0 are kept (ties broken by name, ascending), and when
    /// the selection spans two or more tables any join-recipe document whose
    /// tables intersect the selection is appended regardless of its score.
    pub fn retrieve(&self, question: &str) -> Vec<&KnowledgeDocument> {
        let question_keywords = extract_keywords(question);

        let mut scored: Vec<(usize, &KnowledgeDocument)> = self
            .documents
            .iter()
            .map(|doc| {
                let score = doc.keywords.intersection(&question_keywords).count();
                (score, doc)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        scored.truncate(self.budget);

        let mut selected: Vec<&KnowledgeDocument> = scored.into_iter().map(|(_, d)| d).collect();

        // Cross-table escalation: domain files say what each table means,
        // join recipes say how to connect them.
        let selected_tables: HashSet<&str> = selected
            .iter()
            .flat_map(|d| d.tables.iter().map(String::as_str))
            .collect();
        if selected_tables.len() >= 2 {
            let chosen: HashSet<&str> = selected.iter().map(|d| d.name.as_str()).collect();
            let mut recipes: Vec<&KnowledgeDocument> = self
                .documents
                .iter()
                .filter(|d| {
                    d.is_join_recipe
                        && !chosen.contains(d.name.as_str())
                        && d.tables.iter().any(|t| selected_tables.contains(t.as_str()))
                })
                .collect();
            recipes.sort_by(|a, b| a.name.cmp(&b.name));
            if !recipes.is_empty() {
                debug!("force-including {} join recipe document(s)", recipes.len());
            }
            selected.extend(recipes);
        }

        selected
    }
}

/// Lower-cased word tokens with stop words and short tokens removed.
pub fn extract_keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn index_document(name: String, content: String, table_names: &[String]) -> KnowledgeDocument {
    let stem = name.trim_end_matches(".md");
    let is_join_recipe = stem.starts_with('_') && stem.to_lowercase().contains("join");

    // Keywords come from headings, explicit join-key annotations and the
    // file stem, not the full body, so a long document does not match every
    // question.
    let mut index_text = String::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || trimmed.to_lowercase().contains("join key") {
            index_text.push_str(trimmed);
            index_text.push('\n');
        }
    }
    index_text.push_str(stem);
    let keywords = extract_keywords(&index_text);

    let content_lower = content.to_lowercase();
    let stem_lower = stem.to_lowercase();
    let tables: Vec<String> = table_names
        .iter()
        .filter(|t| {
            let t_lower = t.to_lowercase();
            contains_word(&content_lower, &t_lower) || contains_word(&stem_lower, &t_lower)
        })
        .cloned()
        .collect();

    KnowledgeDocument {
        name,
        content,
        keywords,
        tables,
        is_join_recipe,
    }
}

/// Whole-word containment check: `word` must be bounded by non-identifier
/// characters on both sides.
fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = text[start..].find(word) {
        let idx = start + pos;
        if boundary_at(text, idx) && boundary_at(text, idx + word.len()) {
            return true;
        }
        start = idx + word.chars().next().map(char::len_utf8).unwrap_or(1);
    }
    false
}

fn boundary_at(text: &str, idx: usize) -> bool {
    if idx == 0 || idx >= text.len() {
        return true;
    }
    if !text.is_char_boundary(idx) {
        return false;
    }
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let prev = text[..idx].chars().next_back().unwrap_or(' ');
    let next = text[idx..].chars().next().unwrap_or(' ');
    !(is_ident(prev) && is_ident(next))
}
