//! Certificate of achievement rendered as a one-page landscape PDF.

use chrono::{DateTime, Utc};
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfLayerReference, Point, Rgb,
};

use crate::{error::AppError, models::quiz::QuizType, services::ai_quiz::title_case};

/// US letter, landscape, in points.
const PAGE_WIDTH: f32 = 792.0;
const PAGE_HEIGHT: f32 = 612.0;

/// Average glyph advance of the Times faces, as a share of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.48;

const ORGANIZER: &str = "QuizMaster Academy";

const TEAL: (f32, f32, f32) = (0.059, 0.463, 0.431);
const DARK: (f32, f32, f32) = (0.067, 0.094, 0.153);
const GRAY: (f32, f32, f32) = (0.216, 0.255, 0.318);

#[derive(Debug, Clone)]
pub struct CertificateData {
    pub recipient: String,
    pub college: Option<String>,
    pub quiz_title: String,
    pub quiz_type: QuizType,
    pub percentage: i64,
    pub finished_at: DateTime<Utc>,
}

pub fn recipient_name(first_name: &str, last_name: &str, username: &str) -> String {
    let full = format!("{} {}", first_name.trim(), last_name.trim());
    let full = full.trim();
    title_case(if full.is_empty() { username } else { full })
}

pub fn event_type(quiz_type: QuizType, title: &str) -> &'static str {
    match quiz_type {
        QuizType::Hackathon => "Hackathon",
        _ if title.to_lowercase().contains("challenge") => "Coding Challenge",
        _ => "Quiz",
    }
}

/// Whole-number percentage, truncated.
pub fn integer_percentage(score: i32, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    score as i64 * 100 / total
}

pub fn certificate_date(at: DateTime<Utc>) -> String {
    at.format("%B %d, %Y").to_string()
}

pub fn file_name(quiz_title: &str) -> String {
    let slug: String = quiz_title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("certificate_{}.pdf", slug.trim_matches('_'))
}

fn mm(points: f32) -> Mm {
    Mm(points * 0.352_778)
}

fn rgb((r, g, b): (f32, f32, f32)) -> Color {
    Color::Rgb(Rgb::new(r, g, b, None))
}

/// X coordinate that roughly centres `text` on `center_x`.
pub fn centered_x(text: &str, size: f32, center_x: f32) -> f32 {
    let width = text.chars().count() as f32 * size * AVG_GLYPH_WIDTH;
    (center_x - width / 2.0).max(0.0)
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    italic: IndirectFontRef,
}

fn centered(layer: &PdfLayerReference, font: &IndirectFontRef, size: f32, color: (f32, f32, f32), center_x: f32, y: f32, text: &str) {
    layer.set_fill_color(rgb(color));
    layer.use_text(text, size, mm(centered_x(text, size, center_x)), mm(y), font);
}

fn line(layer: &PdfLayerReference, points: &[(f32, f32)], closed: bool) {
    layer.add_line(Line {
        points: points
            .iter()
            .map(|&(x, y)| (Point::new(mm(x), mm(y)), false))
            .collect(),
        is_closed: closed,
    });
}

pub fn render(data: &CertificateData) -> Result<Vec<u8>, AppError> {
    let pdf_err = |e: printpdf::Error| AppError::InternalServerError(format!("PDF rendering failed: {e}"));

    let (doc, page, layer) = PdfDocument::new("Certificate", mm(PAGE_WIDTH), mm(PAGE_HEIGHT), "Certificate");
    let layer = doc.get_page(page).get_layer(layer);
    let fonts = Fonts {
        regular: doc.add_builtin_font(BuiltinFont::TimesRoman).map_err(pdf_err)?,
        bold: doc.add_builtin_font(BuiltinFont::TimesBold).map_err(pdf_err)?,
        italic: doc.add_builtin_font(BuiltinFont::TimesItalic).map_err(pdf_err)?,
    };

    let (w, h) = (PAGE_WIDTH, PAGE_HEIGHT);
    let cx = w / 2.0;

    layer.set_outline_color(rgb(TEAL));
    layer.set_outline_thickness(5.0);
    line(&layer, &[(20.0, 20.0), (w - 20.0, 20.0), (w - 20.0, h - 20.0), (20.0, h - 20.0)], true);

    centered(&layer, &fonts.bold, 40.0, TEAL, cx, h - 135.0, "CERTIFICATE");
    centered(&layer, &fonts.regular, 12.0, DARK, cx, h - 155.0, "OF ACHIEVEMENT");
    centered(&layer, &fonts.regular, 11.0, GRAY, cx, h - 185.0, "This Certificate is Proudly Presented by");
    centered(&layer, &fonts.bold, 14.0, DARK, cx, h - 205.0, ORGANIZER);
    centered(&layer, &fonts.italic, 11.0, GRAY, cx, h - 230.0, "This is to certify that");
    centered(&layer, &fonts.bold, 30.0, TEAL, cx, h - 265.0, &data.recipient);

    if let Some(college) = data.college.as_deref().filter(|c| !c.trim().is_empty()) {
        centered(&layer, &fonts.regular, 11.0, DARK, cx, h - 285.0, &format!("from {college}"));
    }

    let kind = event_type(data.quiz_type, &data.quiz_title);
    centered(
        &layer,
        &fonts.regular,
        11.0,
        GRAY,
        cx,
        h - 315.0,
        &format!("has successfully participated in the {kind} titled"),
    );
    centered(&layer, &fonts.bold, 18.0, DARK, cx, h - 340.0, &format!("\"{}\"", data.quiz_title));
    centered(&layer, &fonts.regular, 11.0, GRAY, cx, h - 365.0, &format!("organized by {ORGANIZER}."));
    centered(
        &layer,
        &fonts.regular,
        10.0,
        GRAY,
        cx,
        h - 395.0,
        "The participant demonstrated strong analytical thinking, problem-solving ability,",
    );
    centered(
        &layer,
        &fonts.regular,
        10.0,
        GRAY,
        cx,
        h - 410.0,
        "and technical competence while working on real-world challenges during the event.",
    );

    let y = h - 445.0;
    centered(&layer, &fonts.bold, 11.0, DARK, cx, y, "Performance Score");
    centered(&layer, &fonts.bold, 16.0, TEAL, cx, y - 20.0, &format!("{}%", data.percentage));
    centered(&layer, &fonts.bold, 11.0, DARK, cx, y - 40.0, &format!("Date: {}", certificate_date(data.finished_at)));

    centered(&layer, &fonts.italic, 9.0, TEAL, cx, 90.0, "Empowering Innovation.");
    centered(&layer, &fonts.italic, 9.0, TEAL, cx, 80.0, "Building Future-Ready Technologists.");

    layer.set_outline_color(rgb(DARK));
    layer.set_outline_thickness(0.8);
    for (offset, name, role) in [(-170.0, "Program Director", "Director"), (170.0, "Lead Instructor", "Instructor")] {
        let sx = cx + offset;
        line(&layer, &[(sx - 70.0, 60.0), (sx + 70.0, 60.0)], false);
        centered(&layer, &fonts.bold, 10.0, DARK, sx, 48.0, name);
        centered(&layer, &fonts.regular, 8.0, GRAY, sx, 38.0, role);
        centered(&layer, &fonts.regular, 8.0, GRAY, sx, 28.0, ORGANIZER);
    }

    doc.save_to_bytes().map_err(pdf_err)
}
