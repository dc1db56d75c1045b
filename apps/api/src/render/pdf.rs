//! Fixed-canvas renderer: one PDF page per slide, sized to the slide's
//! declared pixel dimensions (1px = 0.75pt).

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use super::markup::{parse_fragment, RootLookup, SlideFragment};
use super::style::Rgb;
use super::{RenderError, SlideSource};

/// Points per CSS pixel.
pub const PT_PER_PX: f64 = 0.75;
const LINE_HEIGHT: f64 = 1.2;
/// Average Helvetica glyph advance as a fraction of the font size.
const AVG_GLYPH_WIDTH: f64 = 0.5;
const AVG_BOLD_GLYPH_WIDTH: f64 = 0.55;

/// Wraps a bare fragment in a document skeleton sized to `canvas`.
pub fn ensure_document(markup: &str, canvas: (f64, f64)) -> String {
    if markup.to_ascii_uppercase().contains("<!DOCTYPE") {
        return markup.to_string();
    }
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"UTF-8\"></head>\n\
         <body style=\"width:{}px;height:{}px\">\n{}\n</body>\n</html>",
        canvas.0, canvas.1, markup
    )
}

/// Renders every slide or nothing: the first slide that fails to parse, or
/// that has neither a slide root nor a body, aborts the whole document.
pub fn render(slides: &[SlideSource], canvas: (f64, f64)) -> Result<Vec<u8>, RenderError> {
    let fragments = slides
        .iter()
        .map(|slide| {
            let document = ensure_document(&slide.markup, canvas);
            parse_fragment(&document, RootLookup::SlideIdOrBody, canvas)
                .map_err(|source| RenderError::Markup {
                    slide: slide.number,
                    source,
                })?
                .ok_or(RenderError::MissingRoot(slide.number))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
    });

    let mut page_ids: Vec<ObjectId> = Vec::with_capacity(fragments.len());
    for fragment in &fragments {
        let content = page_content(fragment)
            .encode()
            .map_err(|e| RenderError::Pdf(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));

        let width = (fragment.width * PT_PER_PX) as f32;
        let height = (fragment.height * PT_PER_PX) as f32;
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| (*id).into()).collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| RenderError::Pdf(e.to_string()))?;

    debug!("Rendered {} PDF pages ({} bytes)", page_ids.len(), buffer.len());
    Ok(buffer)
}

fn fill_rect(ops: &mut Vec<Operation>, color: Rgb, x: f64, y: f64, w: f64, h: f64) {
    let (r, g, b) = color.unit();
    ops.push(Operation::new("rg", vec![r.into(), g.into(), b.into()]));
    ops.push(Operation::new(
        "re",
        vec![
            (x as f32).into(),
            (y as f32).into(),
            (w as f32).into(),
            (h as f32).into(),
        ],
    ));
    ops.push(Operation::new("f", vec![]));
}

fn page_content(fragment: &SlideFragment) -> Content {
    let page_width = fragment.width * PT_PER_PX;
    let page_height = fragment.height * PT_PER_PX;
    let mut ops = Vec::new();

    if let Some(bg) = fragment.background {
        fill_rect(&mut ops, bg, 0.0, 0.0, page_width, page_height);
    }

    for element in &fragment.elements {
        let style = &element.style;
        let x = style.left * PT_PER_PX;
        let top = style.top * PT_PER_PX;
        let width = style.width * PT_PER_PX;
        let height = style.height * PT_PER_PX;

        if let Some(bg) = style.background {
            fill_rect(&mut ops, bg, x, page_height - top - height, width, height);
        }

        if element.text.is_empty() {
            continue;
        }

        let size = (style.font_size_px * PT_PER_PX).max(1.0);
        let glyph = if style.bold {
            AVG_BOLD_GLYPH_WIDTH
        } else {
            AVG_GLYPH_WIDTH
        };
        let leading = size * LINE_HEIGHT;
        let (r, g, b) = style.color.unit();
        let font = if style.bold { "F2" } else { "F1" };

        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new("Tf", vec![font.into(), (size as f32).into()]));
        ops.push(Operation::new("rg", vec![r.into(), g.into(), b.into()]));
        ops.push(Operation::new("TL", vec![(leading as f32).into()]));
        ops.push(Operation::new(
            "Td",
            vec![(x as f32).into(), ((page_height - top - size) as f32).into()],
        ));
        for (i, line) in wrap_text(&element.text, width, size * glyph)
            .iter()
            .enumerate()
        {
            if page_height - top - size - leading * (i as f64) < 0.0 {
                break;
            }
            if i > 0 {
                ops.push(Operation::new("T*", vec![]));
            }
            ops.push(Operation::new("Tj", vec![Object::string_literal(to_win_ansi(line))]));
        }
        ops.push(Operation::new("ET", vec![]));
    }

    Content { operations: ops }
}

/// Greedy word wrap against an estimated per-glyph advance.
pub fn wrap_text(text: &str, max_width: f64, glyph_width: f64) -> Vec<String> {
    let max_chars = if glyph_width > 0.0 {
        ((max_width / glyph_width).floor() as usize).max(1)
    } else {
        usize::MAX
    };

    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Latin-1 bytes for the standard fonts; other characters become `?`.
fn to_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u8,
            0x2019 | 0x2018 => b'\'',
            0x201C | 0x201D => b'"',
            0x2013 | 0x2014 => b'-',
            0x2022 => 0x95,
            _ => b'?',
        })
        .collect()
}
