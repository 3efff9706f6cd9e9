//! Server-side rendered HTML of the upload page.

use std::fmt;

use classifier::{PredictionResult, Source};

use super::labels::LabelMap;

/// Number of runner-up classes shown under a prediction.
const ALTERNATIVES: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Prediction(PredictionView),
    Error(String),
}

/// A prediction with its classes resolved to labels.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionView {
    pub class: usize,
    pub label: String,
    pub confidence: f32,
    pub source: Source,
    pub alternatives: Vec<(String, f32)>,
}

impl PredictionView {
    pub fn new(result: &PredictionResult, labels: &LabelMap) -> Self {
        let alternatives = result
            .top(ALTERNATIVES + 1)
            .into_iter()
            .filter(|(class, _)| *class != result.predicted_class)
            .take(ALTERNATIVES)
            .map(|(class, p)| (labels.label(class), p))
            .collect();
        Self {
            class: result.predicted_class,
            label: labels.label(result.predicted_class),
            confidence: result.confidence,
            source: result.source,
            alternatives,
        }
    }
}

/// `0.91254` renders as `91.25%`.
pub fn percent(value: f32) -> String {
    format!("{:.2}%", value * 100.0)
}

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// The whole page: upload form, the outcome of the last request if any, and
/// the list of known labels.
pub fn render(labels: &LabelMap, outcome: Option<&Outcome>) -> String {
    Page { labels, outcome }.to_string()
}

struct Page<'a> {
    labels: &'a LabelMap,
    outcome: Option<&'a Outcome>,
}

impl fmt::Display for Page<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(HEAD)?;
        f.write_str(FORM)?;

        match self.outcome {
            Some(Outcome::Prediction(view)) => {
                write!(
                    f,
                    r#"<section class="result"><h2>{}</h2><p class="confidence">Confidence: {}</p><p class="source">Source: {}</p>"#,
                    escape(&view.label),
                    percent(view.confidence),
                    view.source,
                )?;
                if !view.alternatives.is_empty() {
                    f.write_str(r#"<h3>Also possible</h3><ul class="alternatives">"#)?;
                    for (label, p) in &view.alternatives {
                        write!(f, "<li>{}: {}</li>", escape(label), percent(*p))?;
                    }
                    f.write_str("</ul>")?;
                }
                f.write_str("</section>")?;
            }
            Some(Outcome::Error(message)) => {
                write!(f, r#"<section class="error"><p>{}</p></section>"#, escape(message))?;
            }
            None => {}
        }

        if !self.labels.is_empty() {
            write!(
                f,
                r#"<section class="labels"><h2>Known artists ({})</h2><ol>"#,
                self.labels.len()
            )?;
            for (class, name) in self.labels.iter() {
                write!(f, r#"<li value="{class}">{}</li>"#, escape(name))?;
            }
            f.write_str("</ol></section>")?;
        }

        f.write_str(TAIL)
    }
}

const HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Who painted it?</title>
<style>
body { font-family: sans-serif; max-width: 48rem; margin: 2rem auto; padding: 0 1rem; }
.result { border: 1px solid #8a8; padding: 1rem; border-radius: 0.5rem; }
.error { border: 1px solid #c66; padding: 1rem; border-radius: 0.5rem; color: #a22; }
.labels ol { columns: 2; }
</style>
</head>
<body>
<h1>Who painted it?</h1>
"#;

const FORM: &str = r#"<form action="/predict" method="post" enctype="multipart/form-data">
<input type="file" name="file" accept="image/*" required>
<button type="submit">Identify the artist</button>
</form>
"#;

const TAIL: &str = "</body>\n</html>\n";
