use serde::{Deserialize, Serialize};

use super::tree::Node;

/// Title shown when a feed item has none.
pub const UNTITLED: &str = "(ei otsikkoa)";

/// Canonical article shape handed to presentation and cache.
///
/// Every field is a plain string (or `None` for the publication time) no
/// matter how the parsed item represented it. Created fresh on every
/// successful parse, never mutated, superseded wholesale by the next fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Raw timestamp as the feed provided it; localization happens at render
    /// time, not here.
    pub published_at: Option<String>,
    /// Display/list key only, not used for deduplication.
    pub identity: String,
}

/// Map one parsed feed item to an [`Article`].
///
/// Total by construction: a field may be a bare string, a wrapper node with a
/// text payload, missing, or any other malformed shape, and each case degrades
/// to the documented fallback instead of failing. The caller hands in items
/// one at a time in feed order; `index` is the fallback identity for items
/// with neither a guid nor a usable link.
pub fn normalize(item: &Node, index: usize) -> Article {
    let field = |name: &str| {
        item.at(&[name])
            .and_then(Node::text)
            .map(str::to_owned)
    };

    let title = field("title").unwrap_or_else(|| UNTITLED.to_string());
    let link = field("link").unwrap_or_else(|| "#".to_string());
    let description = field("description").unwrap_or_default();
    let published_at = field("pubDate");

    let identity = field("guid")
        .filter(|guid| !guid.trim().is_empty())
        .or_else(|| {
            if link != "#" && !link.trim().is_empty() {
                Some(link.clone())
            } else {
                None
            }
        })
        .unwrap_or_else(|| index.to_string());

    Article {
        title,
        link,
        description,
        published_at,
        identity,
    }
}
