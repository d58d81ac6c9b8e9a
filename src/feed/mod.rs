//! Feed plumbing: proxy fetch, XML-to-tree conversion, and normalization of
//! heterogeneous item shapes into the canonical [`Article`].

pub mod fetcher;
pub mod normalize;
pub mod tree;

pub use fetcher::{decode_contents, fetch_feed_xml, FetchError};
pub use normalize::{normalize, Article, UNTITLED};
pub use tree::{Node, ParseError};

/// Parse feed XML and normalize every item, preserving feed order.
///
/// The item collection lives at `rss.channel.item`. A missing path is an
/// empty feed (zero articles, not an error); a single bare item, the
/// parser's list-of-one artifact, is wrapped into a one-element sequence so
/// the normalizer always sees a uniform list.
pub fn parse_articles(xml: &str) -> Result<Vec<Article>, ParseError> {
    let document = tree::parse(xml)?;

    let items: Vec<Node> = match document.at(&["rss", "channel", "item"]) {
        None => Vec::new(),
        Some(Node::List(items)) => items.clone(),
        Some(item) => vec![item.clone()],
    };

    Ok(items
        .iter()
        .enumerate()
        .map(|(index, item)| normalize(item, index))
        .collect())
}
