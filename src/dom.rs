//! Read-only view over a rendered page.
//!
//! The browser hands us the serialized DOM; everything downstream (extraction,
//! classification) only talks to [`ElementHandle`], so it doesn't care which automation
//! stack produced the markup.

use scraper::node::{Element, Node};
use scraper::{ElementRef, Html, Selector};

/// One rendered search result.
pub const RESULT_CONTAINER: &str = "article";

/// Elements whose text never renders.
const NON_RENDERED: &[&str] = &["script", "style", "noscript", "template"];

pub trait ElementHandle: Sized {
    /// First descendant matching a CSS selector. Invalid selectors match nothing.
    fn find(&self, css: &str) -> Option<Self>;
    fn find_all(&self, css: &str) -> Vec<Self>;
    fn attribute(&self, name: &str) -> Option<String>;
    /// Rendered text, one line per non-empty text node. Scripts, styles and hidden
    /// subtrees are left out.
    fn inner_text(&self) -> String;
    /// False when the element or an ancestor is hidden via attribute or inline style.
    fn is_visible(&self) -> bool;
}

impl<'a> ElementHandle for ElementRef<'a> {
    fn find(&self, css: &str) -> Option<Self> {
        let selector = Selector::parse(css).ok()?;
        self.select(&selector).next()
    }

    fn find_all(&self, css: &str) -> Vec<Self> {
        match Selector::parse(css) {
            Ok(selector) => self.select(&selector).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.value().attr(name).map(str::to_string)
    }

    fn inner_text(&self) -> String {
        let mut lines = Vec::new();
        rendered_text(*self, &mut lines);
        lines.join("\n")
    }

    fn is_visible(&self) -> bool {
        let own = std::iter::once(self.value());
        let ancestors = self.ancestors().filter_map(|node| node.value().as_element());
        !own.chain(ancestors).any(is_hidden)
    }
}

fn is_hidden(el: &Element) -> bool {
    let hidden_attr = el.attr("hidden").is_some()
        || el.attr("aria-hidden").map_or(false, |v| v.eq_ignore_ascii_case("true"));
    let hidden_style = el.attr("style").map_or(false, |style| {
        let compact: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        compact.contains("display:none") || compact.contains("visibility:hidden")
    });
    hidden_attr || hidden_style
}

fn rendered_text<'a>(el: ElementRef<'a>, lines: &mut Vec<&'a str>) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    lines.push(text);
                }
            }
            Node::Element(element) => {
                if NON_RENDERED.contains(&element.name()) || is_hidden(element) {
                    continue;
                }
                if let Some(child) = ElementRef::wrap(child) {
                    rendered_text(child, lines);
                }
            }
            _ => {}
        }
    }
}

/// Parsed copy of the page at one point in time.
///
/// Not `Send`: build it, read it and drop it between awaits.
pub struct DomSnapshot {
    url: String,
    document: Html,
}

impl DomSnapshot {
    pub fn parse(url: impl Into<String>, html: &str) -> Self {
        Self {
            url: url.into(),
            document: Html::parse_document(html),
        }
    }

    /// URL the page resolved to; relative links are joined against it.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn root(&self) -> ElementRef<'_> {
        self.document.root_element()
    }

    /// The result containers currently rendered, in document order.
    pub fn result_containers(&self) -> Vec<ElementRef<'_>> {
        self.root().find_all(RESULT_CONTAINER)
    }
}

pub fn collapse_whitespace(text: &str, max_chars: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}
