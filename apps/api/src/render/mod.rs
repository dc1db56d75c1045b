//! Document assembly: turns stored slide markup into the final artifact.
//!
//! - [`pdf`]: fixed-canvas document, one page per slide. All-or-nothing.
//! - [`pptx`]: native-shapes document. Slides without a root are skipped.

pub mod markup;
pub mod pdf;
pub mod pptx;
pub mod style;

use thiserror::Error;

use crate::models::job::OutputFormat;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("No slide fragments to assemble")]
    NoSlides,

    #[error("Slide {slide}: {source}")]
    Markup {
        slide: usize,
        #[source]
        source: markup::MarkupError,
    },

    #[error("Slide {0} has no root container")]
    MissingRoot(usize),

    #[error("PDF write failed: {0}")]
    Pdf(String),

    #[error("PPTX packaging failed: {0}")]
    Package(String),
}

/// One slide's stored markup, in deck order.
#[derive(Debug, Clone)]
pub struct SlideSource {
    pub number: usize,
    pub markup: String,
}

/// Assembles `slides` (already ordered by number) into `format`.
///
/// `canvas` is the pixel size assumed for fragments that do not declare one.
/// CPU-bound; call from `spawn_blocking`.
pub fn assemble(
    slides: &[SlideSource],
    format: OutputFormat,
    canvas: (f64, f64),
) -> Result<Vec<u8>, RenderError> {
    if slides.is_empty() {
        return Err(RenderError::NoSlides);
    }
    match format {
        OutputFormat::Pdf => pdf::render(slides, canvas),
        OutputFormat::Pptx => pptx::render(slides, canvas),
    }
}

/// Escapes text for XML element content and attribute values.
pub(crate) fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
