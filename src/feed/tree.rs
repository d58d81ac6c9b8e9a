//! XML-to-tree conversion mirroring the shape the proxy clients were built
//! against: a nested mapping in which a text-only element collapses to a bare
//! string, an element carrying attributes (or child elements) becomes a
//! wrapper node with an optional text payload, and repeated sibling names
//! become a list while a single child stays bare.
//!
//! That last asymmetry is the reason callers must be prepared to receive
//! either one item or a list of items at `rss.channel.item`.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Invalid XML attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("Unbalanced XML document")]
    Unbalanced,
}

/// One node of the parsed tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A text-only element, collapsed to its content.
    Text(String),
    /// Repeated sibling elements of the same name.
    List(Vec<Node>),
    /// An element with attributes and/or child elements.
    Element(Element),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub attributes: BTreeMap<String, String>,
    /// Text payload of an element that also carries attributes or children.
    pub text: Option<String>,
    pub children: BTreeMap<String, Node>,
}

impl Node {
    /// Walk `path` through element children, descending into the first entry
    /// of any list encountered on the way.
    pub fn at(&self, path: &[&str]) -> Option<&Node> {
        let mut current = self;
        for segment in path {
            let element = match current {
                Node::Element(element) => element,
                Node::List(items) => match items.first()? {
                    Node::Element(element) => element,
                    _ => return None,
                },
                Node::Text(_) => return None,
            };
            current = element.children.get(*segment)?;
        }
        Some(current)
    }

    /// The textual content of this node, whichever shape it has.
    pub fn text(&self) -> Option<&str> {
        match self {
            Node::Text(text) => Some(text),
            Node::Element(element) => element.text.as_deref(),
            Node::List(items) => items.first().and_then(Node::text),
        }
    }
}

/// Parse an XML document into a [`Node`] tree.
///
/// The returned node is a synthetic document element whose children hold the
/// root element, so `doc.at(&["rss", "channel", "item"])` addresses the item
/// collection of an RSS feed.
pub fn parse(text: &str) -> Result<Node, ParseError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    // Bottom of the stack is the synthetic document element
    let mut stack: Vec<(String, Element)> = vec![(String::new(), Element::default())];

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let (name, element) = open_element(&start)?;
                stack.push((name, element));
            }
            Event::Empty(start) => {
                let (name, element) = open_element(&start)?;
                let parent = stack.last_mut().ok_or(ParseError::Unbalanced)?;
                insert_child(&mut parent.1, name, collapse(element));
            }
            Event::Text(text) => {
                let unescaped = text.unescape()?;
                if let Some((_, element)) = stack.last_mut() {
                    append_text(element, &unescaped);
                }
            }
            Event::CData(data) => {
                let raw = data.into_inner();
                let content = String::from_utf8_lossy(&raw);
                if let Some((_, element)) = stack.last_mut() {
                    append_text(element, &content);
                }
            }
            Event::End(_) => {
                let (name, element) = stack.pop().ok_or(ParseError::Unbalanced)?;
                let parent = stack.last_mut().ok_or(ParseError::Unbalanced)?;
                insert_child(&mut parent.1, name, collapse(element));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some((_, document)), true) => Ok(Node::Element(document)),
        _ => Err(ParseError::Unbalanced),
    }
}

fn open_element(start: &quick_xml::events::BytesStart<'_>) -> Result<(String, Element), ParseError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut element = Element::default();
    for attribute in start.attributes() {
        let attribute = attribute?;
        element.attributes.insert(
            String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned(),
            attribute.unescape_value()?.into_owned(),
        );
    }
    Ok((name, element))
}

fn append_text(element: &mut Element, content: &str) {
    match &mut element.text {
        Some(existing) => existing.push_str(content),
        None => element.text = Some(content.to_string()),
    }
}

/// A text-only element parses to a bare string; anything carrying attributes
/// or children stays a wrapper node.
fn collapse(element: Element) -> Node {
    if element.attributes.is_empty() && element.children.is_empty() {
        Node::Text(element.text.unwrap_or_default())
    } else {
        Node::Element(element)
    }
}

fn insert_child(parent: &mut Element, name: String, node: Node) {
    match parent.children.entry(name) {
        Entry::Vacant(slot) => {
            slot.insert(node);
        }
        Entry::Occupied(mut slot) => match slot.get_mut() {
            Node::List(items) => items.push(node),
            existing => {
                let first = std::mem::replace(existing, Node::List(Vec::with_capacity(2)));
                if let Node::List(items) = existing {
                    items.push(first);
                    items.push(node);
                }
            }
        },
    }
}
