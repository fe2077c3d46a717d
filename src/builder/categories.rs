// In: src/builder/categories.rs

//! Per-article summary metadata recorded when a group closes.

use crate::block::{Block, MetaValue, Metadata};
use crate::builder::parser::revision_text_of;

const CATEGORY_OPEN: &str = "[[Category:";
const CATEGORY_CLOSE: &str = "]]";
const REDIRECT: &str = "#REDIRECT";

/// Categories declared on their own line as `[[Category:Name]]`, in order.
pub fn extract_categories(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let inner = line.strip_prefix(CATEGORY_OPEN)?.strip_suffix(CATEGORY_CLOSE)?;
            (!inner.is_empty()).then(|| inner.to_string())
        })
        .collect()
}

fn is_redirect(text: &str) -> bool {
    text.trim_start()
        .get(..REDIRECT.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(REDIRECT))
}

/// Accumulates the title, categories and source revision of one article while its
/// revisions stream past.
///
/// Categories come from the newest revision whose text is not a redirect; that
/// revision's id is recorded as `source_revision`.
#[derive(Debug, Default)]
pub struct GroupSummary {
    title: Option<MetaValue>,
    categories: Vec<String>,
    source_revision: Option<MetaValue>,
}

impl GroupSummary {
    pub fn observe(&mut self, block: &Block) {
        if self.title.is_none() {
            self.title = block.meta("title").cloned();
        }
        let Some(text) = block.content.get("text").and_then(revision_text_of) else {
            return;
        };
        if text.is_empty() || is_redirect(text) {
            return;
        }
        self.categories = extract_categories(text);
        self.source_revision = block.meta("revision_id").cloned();
    }

    pub fn into_metadata(self) -> Metadata {
        let mut summary = Metadata::new();
        if let Some(title) = self.title {
            summary.insert("title".into(), title);
        }
        if let Some(rev) = self.source_revision {
            summary.insert("source_revision".into(), rev);
        }
        summary.insert("categories".into(), MetaValue::List(self.categories));
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_summary(blocks: &[Block]) -> Metadata {
        let mut summary = GroupSummary::default();
        for block in blocks {
            summary.observe(block);
        }
        summary.into_metadata()
    }

    fn revision(id: &str, text: &str) -> Block {
        Block::new("1", json!({ "text": { "#text": text, "@bytes": "1" } }), Metadata::new())
            .with_meta("revision_id", id)
            .with_meta("title", "Alpha")
    }

    #[test]
    fn test_extract_categories_only_matches_whole_lines() {
        let text = "Intro [[Category:Inline]] text\n[[Category:Physics]]\n[[Category:Sort|Key]]\n[[Category:]]\n";
        assert_eq!(extract_categories(text), vec!["Physics", "Sort|Key"]);
    }

    #[test]
    fn test_group_summary_skips_trailing_redirects() {
        let blocks = vec![
            revision("1", "old\n[[Category:Old]]"),
            revision("2", "new\n[[Category:A]]\n[[Category:B]]"),
            revision("3", "#REDIRECT [[Beta]]"),
        ];
        let summary = group_summary(&blocks);
        assert_eq!(summary["title"], MetaValue::from("Alpha"));
        assert_eq!(summary["source_revision"], MetaValue::from("2"));
        assert_eq!(
            summary["categories"],
            MetaValue::List(vec!["A".into(), "B".into()])
        );
    }

    #[test]
    fn test_group_summary_of_redirect_only_article() {
        let summary = group_summary(&[revision("9", "#redirect [[Elsewhere]]")]);
        assert_eq!(summary["categories"], MetaValue::List(vec![]));
        assert!(!summary.contains_key("source_revision"));
    }
}
