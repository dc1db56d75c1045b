//! Flat slide markup: one root container with absolutely positioned children.
//!
//! The markup is parsed leniently (HTML void elements, unclosed `<p>` and
//! stray end tags are tolerated) into a small element tree, then reduced to a
//! [`SlideFragment`]. Only direct children of the root become elements; any
//! deeper nesting contributes its text to the enclosing child.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::style::{parse_declarations, parse_length, BoxStyle, Rgb};

/// `id` of the slide root `div`.
pub const ROOT_ID: &str = "slide";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const OPAQUE_ELEMENTS: &[&str] = &["head", "script", "style", "title"];

#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("malformed markup at byte {position}: {message}")]
    Syntax { position: u64, message: String },
}

/// Where to find the root container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootLookup {
    /// Only a `<div id="slide">`.
    SlideId,
    /// `<div id="slide">`, else the `<body>` element.
    SlideIdOrBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlideFragment {
    pub width: f64,
    pub height: f64,
    pub background: Option<Rgb>,
    pub elements: Vec<SlideElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlideElement {
    pub style: BoxStyle,
    pub text: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Element tree
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Element {
    name: String,
    id: Option<String>,
    style: Option<String>,
    children: Vec<Node>,
}

#[derive(Debug)]
enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Self {
        let mut element = Element {
            name: String::from_utf8_lossy(start.name().as_ref()).to_ascii_lowercase(),
            ..Element::default()
        };

        for attr in start.html_attributes().flatten() {
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            match attr.key.as_ref() {
                b"id" => element.id = Some(value),
                b"style" => element.style = Some(value),
                _ => {}
            }
        }
        element
    }

    fn push_text(&mut self, text: &str) {
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    fn find(&self, predicate: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        if predicate(self) {
            return Some(self);
        }
        self.children.iter().find_map(|child| match child {
            Node::Element(e) => e.find(predicate),
            Node::Text(_) => None,
        })
    }

    fn collect_text(&self, out: &mut Vec<String>) {
        if OPAQUE_ELEMENTS.contains(&self.name.as_str()) {
            return;
        }
        for child in &self.children {
            match child {
                Node::Text(t) => {
                    let t = t.split_whitespace().collect::<Vec<_>>().join(" ");
                    if !t.is_empty() {
                        out.push(t);
                    }
                }
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    fn text(&self) -> String {
        let mut parts = Vec::new();
        self.collect_text(&mut parts);
        parts.join(" ")
    }
}

fn resolve_entity(name: &str) -> String {
    if let Some(code) = name.strip_prefix('#') {
        let parsed = match code.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        return parsed
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default();
    }
    match name {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        "nbsp" => " ".to_string(),
        other => format!("&{other};"),
    }
}

fn parse_tree(markup: &str) -> Result<Element, MarkupError> {
    let mut reader = Reader::from_str(markup);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    // stack[0] is a synthetic document node
    let mut stack: Vec<Element> = vec![Element::default()];

    loop {
        let event = reader.read_event().map_err(|e| MarkupError::Syntax {
            position: reader.error_position(),
            message: e.to_string(),
        })?;

        match event {
            Event::Start(start) => {
                let element = Element::from_start(&start);
                if VOID_ELEMENTS.contains(&element.name.as_str()) {
                    attach(&mut stack, element);
                } else {
                    stack.push(element);
                }
            }
            Event::Empty(start) => attach(&mut stack, Element::from_start(&start)),
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).to_ascii_lowercase();
                if let Some(pos) = stack.iter().rposition(|e| e.name == name) {
                    if pos > 0 {
                        while stack.len() > pos {
                            close_top(&mut stack);
                        }
                    }
                }
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.push_text(&String::from_utf8_lossy(&text));
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.push_text(&String::from_utf8_lossy(&data));
                }
            }
            Event::GeneralRef(entity) => {
                let resolved = resolve_entity(&String::from_utf8_lossy(&entity));
                if let Some(top) = stack.last_mut() {
                    top.push_text(&resolved);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    while stack.len() > 1 {
        close_top(&mut stack);
    }
    Ok(stack.pop().unwrap_or_default())
}

fn attach(stack: &mut [Element], element: Element) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
    }
}

fn close_top(stack: &mut Vec<Element>) {
    if let Some(element) = stack.pop() {
        attach(stack, element);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fragment extraction
// ────────────────────────────────────────────────────────────────────────────

/// Parses `markup` and extracts its slide fragment.
///
/// Returns `Ok(None)` when no root container is found. `default_size` is used
/// when the root does not declare its own width or height.
pub fn parse_fragment(
    markup: &str,
    lookup: RootLookup,
    default_size: (f64, f64),
) -> Result<Option<SlideFragment>, MarkupError> {
    let document = parse_tree(markup)?;

    let root = document
        .find(&|e: &Element| e.name == "div" && e.id.as_deref() == Some(ROOT_ID))
        .or_else(|| match lookup {
            RootLookup::SlideIdOrBody => document.find(&|e: &Element| e.name == "body"),
            RootLookup::SlideId => None,
        });

    let Some(root) = root else {
        return Ok(None);
    };

    let root_style = parse_declarations(root.style.as_deref().unwrap_or_default());
    let dimension = |property: &str, default: f64| {
        root_style
            .get(property)
            .and_then(parse_length)
            .filter(|v| *v > 0.0)
            .unwrap_or(default)
    };

    let elements = root
        .children
        .iter()
        .filter_map(|child| match child {
            Node::Element(e) if !OPAQUE_ELEMENTS.contains(&e.name.as_str()) => Some(e),
            _ => None,
        })
        .map(|child| SlideElement {
            style: parse_declarations(child.style.as_deref().unwrap_or_default()).box_style(),
            text: child.text(),
        })
        .collect();

    Ok(Some(SlideFragment {
        width: dimension("width", default_size.0),
        height: dimension("height", default_size.1),
        background: root_style.background(),
        elements,
    }))
}
