//! Keyword matching over paper text.
//!
//! # Policy
//!
//! A keyword matches a paper when it occurs in the title or the abstract on
//! token boundaries, case-insensitively (see [`TrackedKeyword::is_match`]):
//!
//! - `AI` does not match `pair` or `said`
//! - `neural` matches `Neural Networks`
//! - `transformer` matches `Transformers` (plural suffix on the last token)
//! - `self attention` matches `Self-Attention`
//! - `C++` matches `C++` only, not `C#` or a bare `C`
//!
//! Matching is pure: no I/O and no hidden state, so the result depends only on
//! the paper text and the keyword set.

use std::collections::BTreeSet;

use crate::keywords::{KeywordSet, TrackedKeyword};
use crate::models::{MatchResult, PaperRecord};

/// Keywords from `keywords` satisfied by `paper`. Empty set when none match.
pub fn matches(paper: &PaperRecord, keywords: &KeywordSet) -> BTreeSet<TrackedKeyword> {
    keywords
        .iter()
        .filter(|k| k.is_match(&paper.title) || k.is_match(&paper.summary))
        .cloned()
        .collect()
}

/// Pair `paper` with its matched keywords, or `None` if nothing matched.
pub fn match_paper(paper: PaperRecord, keywords: &KeywordSet) -> Option<MatchResult> {
    let matched = matches(&paper, keywords);
    if matched.is_empty() {
        None
    } else {
        Some(MatchResult {
            paper,
            keywords: matched,
        })
    }
}
