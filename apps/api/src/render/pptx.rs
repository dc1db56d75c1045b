//! Native-shapes renderer: one 16:9 PPTX slide per fragment, one text box per
//! positioned element.
//!
//! Coordinates are scaled by `SLIDE_WIDTH_EMU / fragment width`, so the same
//! factor applies to both axes and the source aspect ratio is kept.

use std::fmt::Write as FmtWrite;
use std::io::{Cursor, Write};

use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::markup::{parse_fragment, RootLookup, SlideElement, SlideFragment};
use super::{escape_xml, RenderError, SlideSource};

pub const SLIDE_WIDTH_EMU: i64 = 12_192_000;
pub const SLIDE_HEIGHT_EMU: i64 = 6_858_000;
/// Points per CSS pixel for font sizes.
const PT_PER_PX: f64 = 0.75;

const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_P: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Builds the deck from every fragment that has a slide root. Fragments that
/// fail to parse or lack the root are skipped with a warning.
pub fn render(slides: &[SlideSource], canvas: (f64, f64)) -> Result<Vec<u8>, RenderError> {
    let mut slide_parts = Vec::with_capacity(slides.len());

    for slide in slides {
        match parse_fragment(&slide.markup, RootLookup::SlideId, canvas) {
            Ok(Some(fragment)) => slide_parts.push(slide_xml(&fragment)),
            Ok(None) => warn!("Slide {}: no slide container found, skipping", slide.number),
            Err(e) => warn!("Slide {}: {}, skipping", slide.number, e),
        }
    }

    if slide_parts.is_empty() {
        return Err(RenderError::NoSlides);
    }

    let bytes = package(&slide_parts).map_err(|e| RenderError::Package(e.to_string()))?;
    debug!(
        "Rendered {} of {} slides to PPTX ({} bytes)",
        slide_parts.len(),
        slides.len(),
        bytes.len()
    );
    Ok(bytes)
}

fn emu(px: f64, scale: f64) -> i64 {
    (px * scale).round() as i64
}

// ────────────────────────────────────────────────────────────────────────────
// Slide XML
// ────────────────────────────────────────────────────────────────────────────

fn slide_xml(fragment: &SlideFragment) -> String {
    let scale = SLIDE_WIDTH_EMU as f64 / fragment.width;
    let mut xml = String::with_capacity(4096);

    xml.push_str(XML_DECL);
    let _ = write!(
        xml,
        r#"<p:sld xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld>"#
    );

    if let Some(bg) = fragment.background {
        let _ = write!(
            xml,
            r#"<p:bg><p:bgPr><a:solidFill><a:srgbClr val="{}"/></a:solidFill><a:effectLst/></p:bgPr></p:bg>"#,
            bg.hex()
        );
    }

    xml.push_str("<p:spTree>");
    xml.push_str(r#"<p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr>"#);
    xml.push_str(r#"<p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr>"#);

    for (index, element) in fragment.elements.iter().enumerate() {
        text_box_xml(&mut xml, index as u32 + 2, element, scale);
    }

    xml.push_str("</p:spTree></p:cSld>");
    xml.push_str("<p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>");
    xml
}

fn text_box_xml(xml: &mut String, shape_id: u32, element: &SlideElement, scale: f64) {
    let style = &element.style;

    xml.push_str("<p:sp><p:nvSpPr>");
    let _ = write!(
        xml,
        r#"<p:cNvPr id="{shape_id}" name="Text Box {shape_id}"/>"#
    );
    xml.push_str(r#"<p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr>"#);

    xml.push_str("<p:spPr><a:xfrm>");
    let _ = write!(
        xml,
        r#"<a:off x="{}" y="{}"/><a:ext cx="{}" cy="{}"/>"#,
        emu(style.left, scale),
        emu(style.top, scale),
        emu(style.width, scale).max(0),
        emu(style.height, scale).max(0)
    );
    xml.push_str(r#"</a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom>"#);
    match style.background {
        Some(fill) => {
            let _ = write!(
                xml,
                r#"<a:solidFill><a:srgbClr val="{}"/></a:solidFill>"#,
                fill.hex()
            );
        }
        None => xml.push_str("<a:noFill/>"),
    }
    xml.push_str("</p:spPr>");

    xml.push_str(r#"<p:txBody><a:bodyPr wrap="square" rtlCol="0"/><a:lstStyle/><a:p>"#);
    if element.text.is_empty() {
        xml.push_str(r#"<a:endParaRPr lang="en-US" dirty="0"/>"#);
    } else {
        let size = ((style.font_size_px * PT_PER_PX * 100.0).round() as i64).clamp(100, 400_000);
        let _ = write!(xml, r#"<a:r><a:rPr lang="en-US" sz="{size}""#);
        if style.bold {
            xml.push_str(r#" b="1""#);
        }
        xml.push_str(r#" dirty="0">"#);
        let _ = write!(
            xml,
            r#"<a:solidFill><a:srgbClr val="{}"/></a:solidFill>"#,
            style.color.hex()
        );
        xml.push_str("</a:rPr>");
        let _ = write!(xml, "<a:t>{}</a:t></a:r>", escape_xml(&element.text));
    }
    xml.push_str("</a:p></p:txBody></p:sp>");
}

// ────────────────────────────────────────────────────────────────────────────
// Package parts
// ────────────────────────────────────────────────────────────────────────────

fn package(slide_parts: &[String]) -> zip::result::ZipResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let put = |zip: &mut ZipWriter<Cursor<Vec<u8>>>, name: &str, body: &str| {
        zip.start_file(name, options)?;
        zip.write_all(body.as_bytes())?;
        Ok::<(), zip::result::ZipError>(())
    };

    let count = slide_parts.len();
    put(&mut zip, "[Content_Types].xml", &content_types_xml(count))?;
    put(&mut zip, "_rels/.rels", &root_rels_xml())?;
    put(&mut zip, "ppt/presentation.xml", &presentation_xml(count))?;
    put(&mut zip, "ppt/_rels/presentation.xml.rels", &presentation_rels_xml(count))?;
    put(&mut zip, "ppt/slideMasters/slideMaster1.xml", &slide_master_xml())?;
    put(
        &mut zip,
        "ppt/slideMasters/_rels/slideMaster1.xml.rels",
        &relationships(&[
            ("rId1", "slideLayout", "../slideLayouts/slideLayout1.xml"),
            ("rId2", "theme", "../theme/theme1.xml"),
        ]),
    )?;
    put(&mut zip, "ppt/slideLayouts/slideLayout1.xml", &slide_layout_xml())?;
    put(
        &mut zip,
        "ppt/slideLayouts/_rels/slideLayout1.xml.rels",
        &relationships(&[("rId1", "slideMaster", "../slideMasters/slideMaster1.xml")]),
    )?;
    put(&mut zip, "ppt/theme/theme1.xml", &theme_xml())?;

    let slide_rels = relationships(&[("rId1", "slideLayout", "../slideLayouts/slideLayout1.xml")]);
    for (i, part) in slide_parts.iter().enumerate() {
        let n = i + 1;
        put(&mut zip, &format!("ppt/slides/slide{n}.xml"), part)?;
        put(&mut zip, &format!("ppt/slides/_rels/slide{n}.xml.rels"), &slide_rels)?;
    }

    Ok(zip.finish()?.into_inner())
}

fn relationships(entries: &[(&str, &str, &str)]) -> String {
    let mut xml = String::from(XML_DECL);
    xml.push_str(r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#);
    for (id, kind, target) in entries {
        let _ = write!(
            xml,
            r#"<Relationship Id="{id}" Type="{REL_BASE}/{kind}" Target="{target}"/>"#
        );
    }
    xml.push_str("</Relationships>");
    xml
}

fn content_types_xml(slide_count: usize) -> String {
    let mut xml = String::from(XML_DECL);
    xml.push_str(r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#);
    xml.push_str(r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#);
    xml.push_str(r#"<Default Extension="xml" ContentType="application/xml"/>"#);
    xml.push_str(r#"<Override PartName="/ppt/presentation.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"/>"#);
    xml.push_str(r#"<Override PartName="/ppt/slideMasters/slideMaster1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml"/>"#);
    xml.push_str(r#"<Override PartName="/ppt/slideLayouts/slideLayout1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml"/>"#);
    xml.push_str(r#"<Override PartName="/ppt/theme/theme1.xml" ContentType="application/vnd.openxmlformats-officedocument.theme+xml"/>"#);
    for n in 1..=slide_count {
        let _ = write!(
            xml,
            r#"<Override PartName="/ppt/slides/slide{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slide+xml"/>"#
        );
    }
    xml.push_str("</Types>");
    xml
}

fn root_rels_xml() -> String {
    relationships(&[("rId1", "officeDocument", "ppt/presentation.xml")])
}

/// `rId1` is the master; slides follow from `rId2`, then the theme.
fn presentation_rels_xml(slide_count: usize) -> String {
    let slide_targets: Vec<(String, String)> = (1..=slide_count)
        .map(|n| (format!("rId{}", n + 1), format!("slides/slide{n}.xml")))
        .collect();
    let theme_id = format!("rId{}", slide_count + 2);

    let mut entries: Vec<(&str, &str, &str)> =
        vec![("rId1", "slideMaster", "slideMasters/slideMaster1.xml")];
    entries.extend(
        slide_targets
            .iter()
            .map(|(id, target)| (id.as_str(), "slide", target.as_str())),
    );
    entries.push((theme_id.as_str(), "theme", "theme/theme1.xml"));
    relationships(&entries)
}

fn presentation_xml(slide_count: usize) -> String {
    let mut xml = String::from(XML_DECL);
    let _ = write!(
        xml,
        r#"<p:presentation xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}" saveSubsetFonts="1">"#
    );
    xml.push_str(r#"<p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst>"#);
    xml.push_str("<p:sldIdLst>");
    for n in 1..=slide_count {
        let _ = write!(xml, r#"<p:sldId id="{}" r:id="rId{}"/>"#, 255 + n, n + 1);
    }
    xml.push_str("</p:sldIdLst>");
    let _ = write!(
        xml,
        r#"<p:sldSz cx="{SLIDE_WIDTH_EMU}" cy="{SLIDE_HEIGHT_EMU}"/><p:notesSz cx="6858000" cy="9144000"/>"#
    );
    xml.push_str("</p:presentation>");
    xml
}

fn empty_sp_tree() -> &'static str {
    r#"<p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr></p:spTree>"#
}

fn slide_master_xml() -> String {
    let mut xml = String::from(XML_DECL);
    let _ = write!(
        xml,
        r#"<p:sldMaster xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld>"#
    );
    xml.push_str(r#"<p:bg><p:bgRef idx="1001"><a:schemeClr val="bg1"/></p:bgRef></p:bg>"#);
    xml.push_str(empty_sp_tree());
    xml.push_str("</p:cSld>");
    xml.push_str(r#"<p:clrMap bg1="lt1" tx1="dk1" bg2="lt2" tx2="dk2" accent1="accent1" accent2="accent2" accent3="accent3" accent4="accent4" accent5="accent5" accent6="accent6" hlink="hlink" folHlink="folHlink"/>"#);
    xml.push_str(r#"<p:sldLayoutIdLst><p:sldLayoutId id="2147483649" r:id="rId1"/></p:sldLayoutIdLst>"#);
    xml.push_str("<p:txStyles><p:titleStyle/><p:bodyStyle/><p:otherStyle/></p:txStyles>");
    xml.push_str("</p:sldMaster>");
    xml
}

fn slide_layout_xml() -> String {
    let mut xml = String::from(XML_DECL);
    let _ = write!(
        xml,
        r#"<p:sldLayout xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}" type="blank" preserve="1"><p:cSld name="Blank">"#
    );
    xml.push_str(empty_sp_tree());
    xml.push_str("</p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sldLayout>");
    xml
}

fn theme_xml() -> String {
    let mut xml = String::from(XML_DECL);
    let _ = write!(xml, r#"<a:theme xmlns:a="{NS_A}" name="Deck"><a:themeElements>"#);

    xml.push_str(r#"<a:clrScheme name="Deck">"#);
    xml.push_str(r#"<a:dk1><a:srgbClr val="000000"/></a:dk1><a:lt1><a:srgbClr val="FFFFFF"/></a:lt1>"#);
    xml.push_str(r#"<a:dk2><a:srgbClr val="1F2937"/></a:dk2><a:lt2><a:srgbClr val="F3F4F6"/></a:lt2>"#);
    for (name, value) in [
        ("accent1", "004080"),
        ("accent2", "0066CC"),
        ("accent3", "FFA000"),
        ("accent4", "4B5563"),
        ("accent5", "10B981"),
        ("accent6", "EF4444"),
        ("hlink", "0563C1"),
        ("folHlink", "954F72"),
    ] {
        let _ = write!(xml, r#"<a:{name}><a:srgbClr val="{value}"/></a:{name}>"#);
    }
    xml.push_str("</a:clrScheme>");

    xml.push_str(r#"<a:fontScheme name="Deck">"#);
    for kind in ["majorFont", "minorFont"] {
        let _ = write!(
            xml,
            r#"<a:{kind}><a:latin typeface="Calibri"/><a:ea typeface=""/><a:cs typeface=""/></a:{kind}>"#
        );
    }
    xml.push_str("</a:fontScheme>");

    let solid = r#"<a:solidFill><a:schemeClr val="phClr"/></a:solidFill>"#;
    let line = r#"<a:ln w="9525"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln>"#;
    xml.push_str(r#"<a:fmtScheme name="Deck"><a:fillStyleLst>"#);
    xml.push_str(&solid.repeat(3));
    xml.push_str("</a:fillStyleLst><a:lnStyleLst>");
    xml.push_str(&line.repeat(3));
    xml.push_str("</a:lnStyleLst><a:effectStyleLst>");
    xml.push_str(&"<a:effectStyle><a:effectLst/></a:effectStyle>".repeat(3));
    xml.push_str("</a:effectStyleLst><a:bgFillStyleLst>");
    xml.push_str(&solid.repeat(3));
    xml.push_str("</a:bgFillStyleLst></a:fmtScheme>");

    xml.push_str("</a:themeElements></a:theme>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn slide(number: usize, markup: &str) -> SlideSource {
        SlideSource {
            number,
            markup: markup.to_string(),
        }
    }

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut text = String::new();
        part.read_to_string(&mut text).unwrap();
        text
    }

    fn slide_part_count(bytes: &[u8]) -> usize {
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        archive
            .file_names()
            .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
            .count()
    }

    #[test]
    fn test_skips_fragment_without_root() {
        let slides = vec![
            slide(1, r#"<div id="slide" style="width:1280px;height:720px"><p>one</p></div>"#),
            slide(2, "<div class=\"content\"><p>no root</p></div>"),
            slide(3, r#"<div id="slide"><p>three</p></div>"#),
        ];
        let bytes = render(&slides, (1280.0, 720.0)).unwrap();
        assert_eq!(slide_part_count(&bytes), 2);

        let presentation = read_part(&bytes, "ppt/presentation.xml");
        assert_eq!(presentation.matches("<p:sldId ").count(), 2);
        assert!(read_part(&bytes, "ppt/slides/slide2.xml").contains("<a:t>three</a:t>"));
    }

    #[test]
    fn test_geometry_scales_uniformly_from_source_width() {
        let slides = vec![slide(
            1,
            r##"<div id="slide" style="width:640px;height:360px;background-color:#004080">
                 <div style="left:320px;top:180px;width:160px;height:90px;background-color:#ffa000;font-size:24px;font-weight:600;color:#fff">Headline &amp; more</div>
               </div>"##,
        )];
        let bytes = render(&slides, (1280.0, 720.0)).unwrap();
        let xml = read_part(&bytes, "ppt/slides/slide1.xml");

        // 12192000 / 640 = 19050 EMU per px
        assert!(xml.contains(r#"<a:off x="6096000" y="3429000"/>"#));
        assert!(xml.contains(r#"<a:ext cx="3048000" cy="1714500"/>"#));
        assert!(xml.contains(r#"<p:bg><p:bgPr><a:solidFill><a:srgbClr val="004080"/>"#));
        assert!(xml.contains(r#"<a:solidFill><a:srgbClr val="FFA000"/></a:solidFill></p:spPr>"#));
        assert!(xml.contains(r#"sz="1800" b="1""#));
        assert!(xml.contains(r#"<a:srgbClr val="FFFFFF"/></a:solidFill></a:rPr>"#));
        assert!(xml.contains("<a:t>Headline &amp; more</a:t>"));
    }

    #[test]
    fn test_no_usable_fragments_is_an_error() {
        let slides = vec![slide(1, "<p>nothing</p>")];
        assert!(matches!(
            render(&slides, (1280.0, 720.0)),
            Err(RenderError::NoSlides)
        ));
    }

    #[test]
    fn test_presentation_rels_ids_line_up() {
        let rels = presentation_rels_xml(2);
        assert!(rels.contains(r#"Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide" Target="slides/slide1.xml""#));
        assert!(rels.contains(r#"Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/theme""#));
    }
}
