//! Tracked keywords and keyword sets.
//!
//! A keyword is normalized once at construction (trimmed, lowercased,
//! whitespace collapsed) and its token-boundary pattern is compiled at the
//! same time, so matching never fails at cycle time.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A normalized search term with its compiled matching pattern.
///
/// Equality, ordering and hashing only look at the normalized term.
#[derive(Clone)]
pub struct TrackedKeyword {
    term: String,
    pattern: Regex,
}

impl TrackedKeyword {
    /// Normalize `raw` and compile its pattern.
    ///
    /// # Errors
    /// `InvalidInput` if the term is blank or has no letter or digit.
    pub fn new(raw: &str) -> Result<Self> {
        let term = normalize_term(raw);
        if term.is_empty() {
            return Err(Error::InvalidInput("keyword is empty".to_string()));
        }

        let shape = KeywordShape::of(&term);
        if shape.tokens.is_empty() {
            return Err(Error::InvalidInput(format!(
                "keyword '{}' has no letters or digits",
                term
            )));
        }

        let pattern = compile_pattern(&shape)?;
        Ok(Self { term, pattern })
    }

    /// The normalized term.
    pub fn as_str(&self) -> &str {
        &self.term
    }

    /// Whether the term occurs in `text` on token boundaries.
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Trim, lowercase and collapse internal whitespace runs.
pub fn normalize_term(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

const NON_WORD: &str = r"[^\p{L}\p{N}]";

/// Characters allowed to precede a keyword that starts with a symbol.
const SYMBOL_LEAD: &str = r#"[\s(\[{"'/]"#;

/// Characters allowed to follow a keyword that ends with a symbol.
const SYMBOL_TRAIL: &str = r#"[\s,.;:!?)\]}"'/]"#;

/// A normalized term split into its literal symbol edges and word tokens.
///
/// `c++` is lead `""`, tokens `["c"]`, trail `"++"`. Punctuation between
/// tokens (`self-attention`, `c.v`) is a separator, not part of the shape.
struct KeywordShape<'a> {
    lead: &'a str,
    tokens: Vec<&'a str>,
    trail: &'a str,
}

impl<'a> KeywordShape<'a> {
    fn of(term: &'a str) -> Self {
        let is_word = |c: char| c.is_alphanumeric();
        let Some(first) = term.find(is_word) else {
            return Self {
                lead: term,
                tokens: Vec::new(),
                trail: "",
            };
        };
        // `first` exists, so `rfind` does too.
        let last = term.rfind(is_word).unwrap_or(first);
        let last_end = last + term[last..].chars().next().map_or(1, char::len_utf8);

        let tokens = term[first..last_end]
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        Self {
            lead: term[..first].trim_end(),
            tokens,
            trail: term[last_end..].trim_start(),
        }
    }
}

/// Escape a symbol edge, letting its internal spaces match any whitespace.
fn escape_edge(edge: &str) -> String {
    edge.split(' ')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+")
}

/// Token-boundary pattern.
///
/// Keyword tokens must be whole words and may be separated by any run of
/// non-alphanumeric characters. Leading and trailing symbols (`c++`, `c#`,
/// `.net`) are matched literally and must sit against whitespace or
/// bracketing punctuation, so `c++` matches neither `c#` nor a bare `c`. Only
/// a keyword ending in a word character takes the `s`/`es` plural suffix.
fn compile_pattern(shape: &KeywordShape<'_>) -> Result<Regex> {
    let body = shape
        .tokens
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join(&format!("{NON_WORD}+"));

    let head = if shape.lead.is_empty() {
        format!("(?:^|{NON_WORD})")
    } else {
        format!("(?:^|{SYMBOL_LEAD}){}", escape_edge(shape.lead))
    };
    let tail = if shape.trail.is_empty() {
        format!("(?:e?s)?(?:{NON_WORD}|$)")
    } else {
        format!("{}(?:{SYMBOL_TRAIL}|$)", escape_edge(shape.trail))
    };

    Regex::new(&format!("(?i){head}{body}{tail}"))
        .map_err(|e| Error::Internal(format!("Failed to compile keyword pattern: {}", e)))
}

impl PartialEq for TrackedKeyword {
    fn eq(&self, other: &Self) -> bool {
        self.term == other.term
    }
}

impl Eq for TrackedKeyword {}

impl PartialOrd for TrackedKeyword {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TrackedKeyword {
    fn cmp(&self, other: &Self) -> Ordering {
        self.term.cmp(&other.term)
    }
}

impl Hash for TrackedKeyword {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.term.hash(state);
    }
}

impl fmt::Debug for TrackedKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TrackedKeyword").field(&self.term).finish()
    }
}

impl fmt::Display for TrackedKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.term)
    }
}

impl Serialize for TrackedKeyword {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.term)
    }
}

impl<'de> Deserialize<'de> for TrackedKeyword {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TrackedKeyword::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// The subscription configuration: a set of tracked keywords.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordSet {
    keywords: BTreeSet<TrackedKeyword>,
}

impl KeywordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from raw terms. Duplicates after normalization collapse.
    pub fn parse<I, S>(terms: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = terms
            .into_iter()
            .map(|t| TrackedKeyword::new(t.as_ref()))
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(Self { keywords })
    }

    /// Add a keyword. Returns false if an equal keyword was already tracked.
    pub fn insert(&mut self, keyword: TrackedKeyword) -> bool {
        self.keywords.insert(keyword)
    }

    /// Remove the keyword whose normalized form equals `normalize_term(raw)`.
    pub fn remove(&mut self, raw: &str) -> bool {
        let term = normalize_term(raw);
        let before = self.keywords.len();
        self.keywords.retain(|k| k.term != term);
        self.keywords.len() != before
    }

    pub fn contains(&self, raw: &str) -> bool {
        let term = normalize_term(raw);
        self.keywords.iter().any(|k| k.term == term)
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn iter(&self) -> std::collections::btree_set::Iter<'_, TrackedKeyword> {
        self.keywords.iter()
    }

    /// Normalized terms in sorted order.
    pub fn terms(&self) -> Vec<String> {
        self.keywords.iter().map(|k| k.term.clone()).collect()
    }
}

impl FromIterator<TrackedKeyword> for KeywordSet {
    fn from_iter<T: IntoIterator<Item = TrackedKeyword>>(iter: T) -> Self {
        Self {
            keywords: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a KeywordSet {
    type Item = &'a TrackedKeyword;
    type IntoIter = std::collections::btree_set::Iter<'a, TrackedKeyword>;

    fn into_iter(self) -> Self::IntoIter {
        self.keywords.iter()
    }
}
