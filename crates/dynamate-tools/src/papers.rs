//! Literature search over a local directory of plain-text papers.
//!
//! Papers are split into passages of roughly `chunk_chars` characters and scored by
//! term frequency of the query's words. The index is built once, on the first search
//! of a session, and owned by the [`Toolbox`](crate::Toolbox).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dynamate_settings::PaperSearchSettings;
use tracing::{debug, info, warn};

/// Terms shorter than this are ignored on both sides.
const MIN_TERM_LEN: usize = 3;

#[derive(Clone, Debug)]
struct Passage {
    file: String,
    text: String,
    terms: HashMap<String, usize>,
}

/// One ranked passage.
#[derive(Clone, Debug, PartialEq)]
pub struct PaperHit {
    pub file: String,
    pub score: usize,
    pub text: String,
}

#[derive(Clone, Debug, Default)]
pub struct PaperIndex {
    dir: PathBuf,
    passages: Vec<Passage>,
    files: usize,
}

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
        .map(str::to_lowercase)
}

/// Split on whitespace into passages of at least `chunk_chars` characters (the last
/// one may be shorter).
fn chunk(text: &str, chunk_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
        if current.len() >= chunk_chars.max(1) {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

impl PaperIndex {
    /// Index every file in `dir` whose extension is listed in `settings`. Unreadable
    /// files are skipped with a warning; a missing directory yields an empty index.
    pub async fn build(dir: &Path, settings: &PaperSearchSettings) -> Self {
        let mut index = Self {
            dir: dir.to_path_buf(),
            ..Self::default()
        };
        let mut reader = match tokio::fs::read_dir(dir).await {
            Ok(r) => r,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "paper directory unavailable");
                return index;
            }
        };

        let mut paths = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let path = entry.path();
            let wanted = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .is_some_and(|ext| settings.extensions.iter().any(|w| w.eq_ignore_ascii_case(&ext)));
            if wanted {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable paper");
                    continue;
                }
            };
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            for passage in chunk(&text, settings.chunk_chars) {
                let mut counts = HashMap::new();
                for term in terms(&passage) {
                    *counts.entry(term).or_insert(0) += 1;
                }
                index.passages.push(Passage {
                    file: file.clone(),
                    text: passage,
                    terms: counts,
                });
            }
            index.files += 1;
        }

        info!(
            dir = %dir.display(),
            files = index.files,
            passages = index.passages.len(),
            "paper index built"
        );
        index
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Best `top_k` passages with a positive score, highest first. Ties keep index order.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<PaperHit> {
        let mut query_terms: Vec<String> = terms(query).collect();
        query_terms.sort();
        query_terms.dedup();

        let mut scored: Vec<(usize, &Passage)> = self
            .passages
            .iter()
            .map(|p| {
                let score = query_terms.iter().map(|t| p.terms.get(t).copied().unwrap_or(0)).sum();
                (score, p)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        debug!(query, matches = scored.len(), "paper search");

        scored
            .into_iter()
            .take(top_k)
            .map(|(score, p)| PaperHit {
                file: p.file.clone(),
                score,
                text: p.text.clone(),
            })
            .collect()
    }

    /// Narrated answer for the model: cited passages, or the standard refusal.
    pub fn answer(&self, query: &str, top_k: usize) -> String {
        let hits = self.search(query, top_k);
        if hits.is_empty() {
            return format!(
                "I cannot answer. Check to ensure there's papers in {}",
                self.dir.display()
            );
        }
        let mut out = format!("Found {} relevant passages for \"{query}\":", hits.len());
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format!("\n\n[{}] {} (score {})\n{}", i + 1, hit.file, hit.score, hit.text));
        }
        out
    }
}
