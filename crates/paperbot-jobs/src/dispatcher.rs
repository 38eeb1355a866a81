//! Notification dispatcher.
//!
//! Posts one message per match, in batch order. Delivery is best effort:
//! every id in a batch is already committed, so a failed post is reported
//! and never retried. Error text never reaches the channel.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};

use paperbot_core::defaults::{AUTHORS_MAX_CHARS, AUTHORS_MAX_NAMES, SUMMARY_MAX_CHARS};
use paperbot_core::{ChannelId, ChatPlatform, MatchResult, NotificationBatch, PaperId};

/// A single undelivered notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFailure {
    pub paper_id: PaperId,
    pub error: String,
}

/// Result of dispatching one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    /// Delivered ids, in batch order.
    pub delivered: Vec<PaperId>,
    /// Per-item failures, in batch order.
    pub failures: Vec<DispatchFailure>,
}

impl DispatchOutcome {
    /// True when every item was delivered.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Items attempted.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failures.len()
    }
}

/// Escape the three characters Slack mrkdwn treats as control sequences.
pub fn escape_mrkdwn(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn truncate_summary(summary: &str, max: usize) -> String {
    if summary.chars().count() <= max {
        return summary.to_string();
    }
    let cut: String = summary.chars().take(max).collect();
    format!("{}…", cut.trim_end())
}

/// Join author names, cutting to "et al." past `max_names` names or once the
/// next name would push the line over `max_chars`. The first name is always
/// kept.
pub fn format_authors(authors: &[String], max_names: usize, max_chars: usize) -> String {
    let mut line = String::new();
    let mut used = 0;
    let mut shown = 0;

    for name in authors.iter().take(max_names.max(1)) {
        let cost = name.chars().count() + if shown == 0 { 0 } else { 2 };
        if shown > 0 && used + cost > max_chars {
            break;
        }
        if shown > 0 {
            line.push_str(", ");
        }
        line.push_str(name);
        used += cost;
        shown += 1;
    }

    if shown < authors.len() {
        line.push_str(", et al.");
    }
    line
}

/// Per-cycle header posted ahead of the items.
pub fn format_header(count: usize, date: NaiveDate) -> String {
    let noun = if count == 1 { "paper" } else { "papers" };
    format!("Found *{} {}* on Arxiv, {}", count, noun, date.format("%Y-%m-%d"))
}

/// Render the message for item `index` (1-based) of `total`.
///
/// ```text
/// [1/3] *<https://arxiv.org/abs/2610.01234|Sparse Transformers>*
/// _*Author(s)*:_ Ada Lovelace, Alan Turing
/// _*Keywords*:_ transformer
/// _We study attention..._
/// ```
pub fn format_message(item: &MatchResult, index: usize, total: usize, summary_max: usize) -> String {
    let paper = &item.paper;
    let title = escape_mrkdwn(&paper.title);

    let mut lines = Vec::with_capacity(4);
    if paper.url.is_empty() {
        lines.push(format!("[{}/{}] *{}*", index, total, title));
    } else {
        // `|` would end the link label early.
        lines.push(format!(
            "[{}/{}] *<{}|{}>*",
            index,
            total,
            paper.url,
            title.replace('|', "¦")
        ));
    }

    if !paper.authors.is_empty() {
        lines.push(format!(
            "_*Author(s)*:_ {}",
            escape_mrkdwn(&format_authors(
                &paper.authors,
                AUTHORS_MAX_NAMES,
                AUTHORS_MAX_CHARS
            ))
        ));
    }

    let keywords: Vec<&str> = item.keywords.iter().map(|k| k.as_str()).collect();
    lines.push(format!("_*Keywords*:_ {}", keywords.join(", ")));

    if !paper.summary.is_empty() {
        lines.push(format!(
            "_{}_",
            escape_mrkdwn(&truncate_summary(&paper.summary, summary_max))
        ));
    }

    lines.join("\n")
}

/// Fans a batch out to a chat platform.
#[derive(Clone)]
pub struct Dispatcher {
    platform: Arc<dyn ChatPlatform>,
    summary_max_chars: usize,
    header: bool,
}

impl Dispatcher {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            platform,
            summary_max_chars: SUMMARY_MAX_CHARS,
            header: false,
        }
    }

    pub fn with_summary_max_chars(mut self, max: usize) -> Self {
        self.summary_max_chars = max;
        self
    }

    /// Post a "Found N papers" header before each non-empty batch.
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    /// Post every item of `batch` to `channel`.
    ///
    /// A failure for one item does not stop the rest. A failed header is
    /// logged and the items still go out.
    #[instrument(
        skip(self, batch),
        fields(subsystem = "dispatch", op = "dispatch", platform = self.platform.name(), channel = %channel, count = batch.len())
    )]
    pub async fn dispatch(&self, batch: &NotificationBatch, channel: &ChannelId) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let total = batch.len();

        if self.header && total > 0 {
            let text = format_header(total, chrono::Utc::now().date_naive());
            if let Err(e) = self.platform.post_message(channel, &text).await {
                warn!(error = %e, error_kind = e.kind(), "Batch header not delivered");
            }
        }

        for (i, item) in batch.iter().enumerate() {
            let text = format_message(item, i + 1, total, self.summary_max_chars);
            match self.platform.post_message(channel, &text).await {
                Ok(()) => {
                    debug!(paper_id = %item.id(), "Notification delivered");
                    outcome.delivered.push(item.id().clone());
                }
                Err(e) => {
                    warn!(
                        paper_id = %item.id(),
                        error = %e,
                        error_kind = e.kind(),
                        "Notification not delivered, id stays committed"
                    );
                    outcome.failures.push(DispatchFailure {
                        paper_id: item.id().clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if total > 0 {
            info!(
                delivered = outcome.delivered.len(),
                failed = outcome.failures.len(),
                "Batch dispatched"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperbot_core::{KeywordSet, PaperRecord};

    fn item(id: &str, title: &str, summary: &str, keywords: &[&str]) -> MatchResult {
        MatchResult {
            paper: PaperRecord::new(id, title, summary)
                .with_url(format!("https://arxiv.org/abs/{}", id)),
            keywords: KeywordSet::parse(keywords.iter().copied())
                .unwrap()
                .iter()
                .cloned()
                .collect(),
        }
    }

    #[test]
    fn test_format_message_layout() {
        let mut m = item("2610.01234", "Sparse Transformers", "We study attention.", &["transformer"]);
        m.paper.authors = vec!["Ada Lovelace".into(), "Alan Turing".into()];

        let text = format_message(&m, 1, 3, 100);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[1/3] *<https://arxiv.org/abs/2610.01234|Sparse Transformers>*",
                "_*Author(s)*:_ Ada Lovelace, Alan Turing",
                "_*Keywords*:_ transformer",
                "_We study attention._",
            ]
        );
    }

    #[test]
    fn test_format_message_without_url_or_authors() {
        let mut m = item("P1", "Title", "", &["gan"]);
        m.paper.url.clear();

        let text = format_message(&m, 2, 2, 100);
        assert_eq!(text, "[2/2] *Title*\n_*Keywords*:_ gan");
    }

    #[test]
    fn test_format_message_escapes_and_truncates() {
        let m = item("P1", "A <b> & C", "abcdefghij", &["c"]);
        let text = format_message(&m, 1, 1, 4);
        assert!(text.contains("A &lt;b&gt; &amp; C"));
        assert!(text.ends_with("_abcd…_"));
    }

    #[test]
    fn test_authors_capped_by_count() {
        let authors: Vec<String> = (1..=12).map(|i| format!("A{}", i)).collect();
        assert_eq!(format_authors(&authors, 3, 400), "A1, A2, A3, et al.");
        assert_eq!(format_authors(&authors[..3], 3, 400), "A1, A2, A3");
    }

    #[test]
    fn test_authors_capped_by_chars() {
        let authors = vec!["Ada Lovelace".to_string(), "Alan Turing".to_string()];
        assert_eq!(format_authors(&authors, 10, 15), "Ada Lovelace, et al.");
        assert_eq!(format_authors(&authors[..1], 10, 3), "Ada Lovelace");
    }

    #[test]
    fn test_huge_author_list_keeps_message_in_one_section() {
        let mut m = item("2610.09999", "Big Collaboration", &"x".repeat(5000), &["detector"]);
        m.paper.authors = (0..3000).map(|i| format!("Collaborator & Co {}", i)).collect();

        let text = format_message(&m, 1, 1, SUMMARY_MAX_CHARS);
        assert!(text.chars().count() < paperbot_core::defaults::SLACK_SECTION_MAX_CHARS);
        assert!(text.contains("et al."));
        assert!(text.contains("_*Keywords*:_ detector"));
        assert!(text.ends_with("…_"));
    }

    #[test]
    fn test_format_header() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(format_header(3, date), "Found *3 papers* on Arxiv, 2026-10-19");
        assert_eq!(format_header(1, date), "Found *1 paper* on Arxiv, 2026-10-19");
    }

    #[test]
    fn test_outcome_accounting() {
        let outcome = DispatchOutcome {
            delivered: vec![PaperId::new("a")],
            failures: vec![DispatchFailure {
                paper_id: PaperId::new("b"),
                error: "x".into(),
            }],
        };
        assert_eq!(outcome.attempted(), 2);
        assert!(!outcome.is_complete());
        assert!(DispatchOutcome::default().is_complete());
    }
}
