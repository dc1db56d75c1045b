// Prompt templates for slide generation.
// Placeholders are `{name}` and are filled with `str::replace` before sending.

use chrono::{DateTime, Utc};

use crate::content::ContentRecord;
use crate::models::job::{EndingKind, JobConfig};
use crate::models::slide::SlideType;

/// One ready-to-send generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct SlidePrompt {
    pub slide_type: SlideType,
    pub slide_number: usize,
    pub system: String,
    pub user: String,
}

pub const SLIDE_SYSTEM: &str = "You are a senior presentation designer. \
    You produce exactly one slide as a self-contained HTML fragment. \
    Respond with the HTML only, wrapped in a single ```html code fence. \
    Do NOT include explanations.";

/// Canvas contract shared by every slide type.
pub const CANVAS_RULES_TEMPLATE: &str = r#"TECHNICAL REQUIREMENTS (MANDATORY):
1. Root container, exactly:
   <div id="slide" style="width:{width}px; height:{height}px; position:relative; background-color:{background}; overflow:hidden;">
2. Every child of the root MUST have position:absolute and explicit top, left, width, height in px.
3. Children are a FLAT list: no nested positioned containers. Inline <span>, <b>, <br> are allowed.
4. Set font-size (px), font-weight and color inline on each child. Colors are #rrggbb.
5. No element may extend past {width}x{height}. Leave at least 20px between elements.
6. No external resources, scripts or images."#;

pub const TITLE_PROMPT_TEMPLATE: &str = r#"Create the TITLE SLIDE.

CONTENT (use exactly as given, do not add text):
- Title: {title}
- Subtitle: {subtitle}
- Author: {author}
- Date: {date}

DESIGN:
- Slide background: {background}
- Text color for all text: {text_color}
- Accent color: {accent}
- Font family: {font}
- The title is bold and at least {title_size}px.

{canvas_rules}"#;

pub const CONTENT_PROMPT_TEMPLATE: &str = r#"Create slide {slide_number} of {total_slides}.

SLIDE TOPIC: {topic}

SOURCE CONTENT (summarize faithfully, never invent figures):
{content}

DESIGN INSTRUCTIONS:
{instructions}

STYLING:
- Primary color: {primary}
- Secondary color: {secondary}
- Accent color: {accent}
- Title color: {title_color}, {title_size}px bold
- Body color: {body_color}, {body_size}px
- Font family: {font}
{additional}
{canvas_rules}"#;

pub const ENDING_PROMPT_TEMPLATE: &str = r#"Create the closing slide ({kind}).

CONTENT (use exactly as given):
- Main text: {main_text}
- Secondary text: {secondary_text}
{contact}
DESIGN:
- Slide background: {background}
- Text color for all text: {text_color}
- Accent color: {accent}
- Center the main text, bold, at least {title_size}px.

{canvas_rules}"#;

fn canvas_rules(config: &JobConfig, background: &str) -> String {
    CANVAS_RULES_TEMPLATE
        .replace("{width}", &config.slide_width.to_string())
        .replace("{height}", &config.slide_height.to_string())
        .replace("{background}", background)
}

/// `"auto"` renders as e.g. "March 2025"; anything else is used verbatim.
pub fn date_text(config: &JobConfig, now: DateTime<Utc>) -> String {
    if config.title_slide.date.eq_ignore_ascii_case("auto") {
        now.format("%B %Y").to_string()
    } else {
        config.title_slide.date.clone()
    }
}

/// Bucket titles joined with " / ", or `Slide N` when none are set.
pub fn content_topic(bucket: &[ContentRecord], slide_number: usize) -> String {
    let titles: Vec<&str> = bucket
        .iter()
        .map(|r| r.title.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if titles.is_empty() {
        format!("Slide {slide_number}")
    } else {
        titles.join(" / ")
    }
}

pub fn title_prompt(config: &JobConfig, slide_number: usize, now: DateTime<Utc>) -> SlidePrompt {
    let title = &config.title_slide;
    let user = TITLE_PROMPT_TEMPLATE
        .replace("{title}", &config.title)
        .replace("{subtitle}", config.subtitle.as_deref().unwrap_or(""))
        .replace("{author}", config.author.as_deref().unwrap_or(""))
        .replace("{date}", &date_text(config, now))
        .replace("{background}", &title.background_color)
        .replace("{text_color}", &title.text_color)
        .replace("{accent}", &config.styling.accent_color)
        .replace("{font}", &title.font)
        .replace("{title_size}", &(config.styling.title_font_size * 2).to_string())
        .replace("{canvas_rules}", &canvas_rules(config, &title.background_color));

    SlidePrompt {
        slide_type: SlideType::Title,
        slide_number,
        system: SLIDE_SYSTEM.to_string(),
        user,
    }
}

pub fn content_prompt(
    config: &JobConfig,
    bucket: &[ContentRecord],
    slide_number: usize,
    total_slides: usize,
    instructions: &str,
) -> SlidePrompt {
    let styling = &config.styling;
    let content = bucket
        .iter()
        .map(|r| r.body.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let additional = if config.additional_prompt.trim().is_empty() {
        String::new()
    } else {
        format!("\nADDITIONAL INSTRUCTIONS:\n{}\n", config.additional_prompt.trim())
    };

    let user = CONTENT_PROMPT_TEMPLATE
        .replace("{slide_number}", &slide_number.to_string())
        .replace("{total_slides}", &total_slides.to_string())
        .replace("{topic}", &content_topic(bucket, slide_number))
        .replace("{instructions}", instructions.trim())
        .replace("{primary}", &styling.primary_color)
        .replace("{secondary}", &styling.secondary_color)
        .replace("{accent}", &styling.accent_color)
        .replace("{title_color}", &styling.title_color)
        .replace("{title_size}", &styling.title_font_size.to_string())
        .replace("{body_color}", &styling.body_color)
        .replace("{body_size}", &styling.body_font_size.to_string())
        .replace("{font}", &styling.content_font)
        .replace("{additional}", &additional)
        .replace("{canvas_rules}", &canvas_rules(config, &styling.background_color))
        // last, so that source text containing braces is never re-expanded
        .replace("{content}", &content);

    SlidePrompt {
        slide_type: SlideType::Content,
        slide_number,
        system: SLIDE_SYSTEM.to_string(),
        user,
    }
}

pub fn ending_prompt(config: &JobConfig, slide_number: usize) -> SlidePrompt {
    let ending = &config.ending_slide;
    let kind = match ending.kind {
        EndingKind::ThankYou => "thank you",
        EndingKind::Questions => "questions",
        EndingKind::Contact => "contact",
    };
    let contact = if ending.kind == EndingKind::Contact {
        ending
            .contact
            .lines()
            .iter()
            .map(|l| format!("- {l}\n"))
            .collect::<String>()
    } else {
        String::new()
    };

    let user = ENDING_PROMPT_TEMPLATE
        .replace("{kind}", kind)
        .replace("{main_text}", &ending.main_text)
        .replace("{secondary_text}", &ending.secondary_text)
        .replace("{contact}", &contact)
        .replace("{background}", &ending.background_color)
        .replace("{text_color}", &ending.text_color)
        .replace("{accent}", &config.styling.accent_color)
        .replace("{title_size}", &(config.styling.title_font_size * 2).to_string())
        .replace("{canvas_rules}", &canvas_rules(config, &ending.background_color));

    SlidePrompt {
        slide_type: SlideType::Ending,
        slide_number,
        system: SLIDE_SYSTEM.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(title: &str, body: &str) -> ContentRecord {
        ContentRecord {
            number: 1,
            title: title.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_auto_date() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
        let mut config = JobConfig::default();
        assert_eq!(date_text(&config, now), "March 2025");
        config.title_slide.date = "Q1 FY25".to_string();
        assert_eq!(date_text(&config, now), "Q1 FY25");
    }

    #[test]
    fn test_content_topic_fallback() {
        let bucket = vec![record("Market", "a"), record(" ", "b"), record("Risks", "c")];
        assert_eq!(content_topic(&bucket, 4), "Market / Risks");
        assert_eq!(content_topic(&[record("", "x")], 4), "Slide 4");
    }

    #[test]
    fn test_content_prompt_fills_every_placeholder() {
        let config = JobConfig {
            additional_prompt: "Use a dark theme".to_string(),
            ..JobConfig::default()
        };
        let bucket = vec![record("Intro", "Body with {braces} kept")];
        let prompt = content_prompt(&config, &bucket, 2, 5, "Be concise");

        assert_eq!(prompt.slide_type, SlideType::Content);
        assert!(prompt.user.contains("Create slide 2 of 5."));
        assert!(prompt.user.contains("Body with {braces} kept"));
        assert!(prompt.user.contains("ADDITIONAL INSTRUCTIONS:\nUse a dark theme"));
        assert!(prompt.user.contains(r#"<div id="slide" style="width:1280px; height:720px;"#));
        assert!(!prompt.user.contains("{canvas_rules}"));
        assert!(!prompt.user.contains("{primary}"));
    }

    #[test]
    fn test_ending_prompt_lists_contact_only_for_contact_kind() {
        let mut config = JobConfig::default();
        config.ending_slide.contact.email = Some("team@example.com".to_string());
        assert!(!ending_prompt(&config, 9).user.contains("team@example.com"));

        config.ending_slide.kind = crate::models::job::EndingKind::Contact;
        let prompt = ending_prompt(&config, 9);
        assert!(prompt.user.contains("- Email: team@example.com"));
        assert_eq!(prompt.slide_number, 9);
    }

    #[test]
    fn test_title_prompt_uses_title_colors() {
        let config = JobConfig::default();
        let prompt = title_prompt(&config, 1, Utc::now());
        assert!(prompt.user.contains("Slide background: #004080"));
        assert!(prompt.user.contains("Text color for all text: #FFFFFF"));
        assert_eq!(prompt.slide_type, SlideType::Title);
    }
}
