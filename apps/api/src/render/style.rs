//! Inline `style="..."` parsing shared by both renderers.

use std::collections::HashMap;

pub const DEFAULT_LEFT: f64 = 0.0;
pub const DEFAULT_TOP: f64 = 0.0;
pub const DEFAULT_WIDTH: f64 = 100.0;
pub const DEFAULT_HEIGHT: f64 = 50.0;
pub const DEFAULT_FONT_SIZE_PX: f64 = 11.0;

/// 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);

    /// Upper-case `RRGGBB` without the leading `#`.
    pub fn hex(&self) -> String {
        format!("{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }

    /// Components scaled to `0.0..=1.0` for PDF color operators.
    pub fn unit(&self) -> (f32, f32, f32) {
        (
            self.0 as f32 / 255.0,
            self.1 as f32 / 255.0,
            self.2 as f32 / 255.0,
        )
    }
}

/// Declarations of one `style` attribute. Property names are lower-cased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Declarations(HashMap<String, String>);

impl Declarations {
    pub fn get(&self, property: &str) -> Option<&str> {
        self.0.get(property).map(String::as_str)
    }

    fn length(&self, property: &str, default: f64) -> f64 {
        self.get(property).and_then(parse_length).unwrap_or(default)
    }

    /// `background-color`, falling back to a plain-color `background`.
    pub fn background(&self) -> Option<Rgb> {
        self.get("background-color")
            .and_then(parse_color)
            .or_else(|| self.get("background").and_then(parse_color))
    }

    pub fn bold(&self) -> bool {
        match self.get("font-weight") {
            Some(w) => {
                let w = w.to_ascii_lowercase();
                w.contains("bold") || w.parse::<u32>().map(|n| n >= 600).unwrap_or(false)
            }
            None => false,
        }
    }

    pub fn box_style(&self) -> BoxStyle {
        BoxStyle {
            left: self.length("left", DEFAULT_LEFT),
            top: self.length("top", DEFAULT_TOP),
            width: self.length("width", DEFAULT_WIDTH),
            height: self.length("height", DEFAULT_HEIGHT),
            background: self.background(),
            font_size_px: self.length("font-size", DEFAULT_FONT_SIZE_PX),
            bold: self.bold(),
            color: self.get("color").and_then(parse_color).unwrap_or(Rgb::BLACK),
        }
    }
}

/// Resolved geometry and text styling of one positioned element, in px.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxStyle {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub background: Option<Rgb>,
    pub font_size_px: f64,
    pub bold: bool,
    pub color: Rgb,
}

impl Default for BoxStyle {
    fn default() -> Self {
        Declarations::default().box_style()
    }
}

/// Splits on `;`, then on the first `:` of each token; both sides trimmed.
/// Tokens without a `:` or with an empty name are ignored.
pub fn parse_declarations(style: &str) -> Declarations {
    let map = style
        .split(';')
        .filter_map(|token| {
            let (name, value) = token.split_once(':')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();
    Declarations(map)
}

/// Leading numeric prefix of `value` (optional sign, digits, at most one
/// decimal point); any unit suffix is ignored.
pub fn parse_length(value: &str) -> Option<f64> {
    let value = value.trim();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_digit = false;

    for (i, c) in value.char_indices() {
        match c {
            '+' | '-' if i == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = i + c.len_utf8();
    }

    if !seen_digit {
        return None;
    }
    value[..end].trim_end_matches('.').parse().ok()
}

/// `#rgb` or `#rrggbb`; the short form doubles each digit.
pub fn parse_color(value: &str) -> Option<Rgb> {
    let hex = value.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
    Some(Rgb(channel(0)?, channel(2)?, channel(4)?))
}
