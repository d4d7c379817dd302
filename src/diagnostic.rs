//! Plain-text error reports pointing into the CSD source.

use ariadne::{Config, IndexType, Label, Report, ReportKind, Source};

use crate::error::CsdError;

/// Render `err` against `source` as an ariadne report without colour.
///
/// Errors without a location (missing sections) render as a single line.
pub fn render_report(err: &CsdError, source: &str, name: &str) -> String {
    let Some(span) = err.span() else {
        return format!("error: {err}\n");
    };
    let end = span.end.max(span.start).min(source.len());
    let start = span.start.min(end);
    let range = start..end;

    let mut buf = Vec::<u8>::new();
    let written = Report::build(ReportKind::Error, (name, range.clone()))
        .with_config(
            Config::default()
                .with_color(false)
                .with_index_type(IndexType::Byte),
        )
        .with_message(err.to_string())
        .with_label(Label::new((name, range)).with_message(label_for(err)))
        .finish()
        .write((name, Source::from(source)), &mut buf);
    match written {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => format!("error: {err}\n"),
    }
}

fn label_for(err: &CsdError) -> &'static str {
    match err {
        CsdError::Document(_) => "in this section",
        CsdError::Lex(_) => "unexpected input",
        CsdError::Parse(_) => "here",
        CsdError::Compile(_) => "in this statement",
    }
}
