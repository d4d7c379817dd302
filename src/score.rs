//! `<CsScore>` parsing and resolution into timed events.
//!
//! Supported statements: `i` (instrument event), `f` (function table,
//! including `f0` to extend the performance), `t 0 bpm` (constant tempo),
//! `e [time]` (end of score). Comments use `;`, `//` or `/* */`.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::token::Span;

/// A raw p-field as written in the score.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Number(f64),
    /// `.`: repeat the same field of the previous `i` statement.
    Carry,
    /// `+` in p2: start when the previous `i` statement ends.
    FollowPrevious,
    /// `z`: unbounded time.
    Infinite,
}

#[derive(Debug, Clone)]
enum Statement {
    Instrument { fields: Vec<(Field, Span)>, span: Span },
    Table { fields: Vec<(Field, Span)>, span: Span },
    Tempo { bpm: f64 },
    End { time: Option<f64> },
}

/// A function-table definition from an `f` statement or `ftgen`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub number: u32,
    pub size: usize,
    /// GEN routine; a negative value skips normalisation.
    pub routine: i32,
    pub args: Vec<f64>,
    pub span: Span,
}

/// One instrument activation, times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub instr: u32,
    pub start: f64,
    /// Negative or infinite durations hold the note until the performance ends.
    pub duration: f64,
    /// p1…pN, with p2/p3 already converted to seconds.
    pub pfields: Vec<f64>,
    pub span: Span,
}

impl ScoreEvent {
    pub fn is_held(&self) -> bool {
        self.duration < 0.0 || self.duration.is_infinite()
    }
}

/// A resolved score section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub events: Vec<ScoreEvent>,
    pub tables: Vec<TableDef>,
    /// Time at which the performance ends; `None` means it never does.
    pub end_time: Option<f64>,
}

/// Parse and resolve score text located at byte `base` of the document.
pub fn parse_score(text: &str, base: usize) -> Result<Score, ParseError> {
    let cleaned = blank_block_comments(text);
    let mut statements = Vec::new();
    let mut line_start = 0;
    for line in cleaned.split('\n') {
        let offset = base + line_start;
        line_start += line.len() + 1;
        let code = strip_line_comment(line);
        if let Some(statement) = parse_line(code, offset)? {
            let is_end = matches!(statement, Statement::End { .. });
            statements.push(statement);
            if is_end {
                break;
            }
        }
    }
    resolve(statements)
}

/// Replace `/* … */` with spaces so byte offsets stay valid.
fn blank_block_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("/*") {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let close = after.find("*/").map(|i| i + 2).unwrap_or(after.len());
        for ch in after[..close].chars() {
            if ch == '\n' {
                out.push('\n');
            } else {
                out.extend(std::iter::repeat_n(' ', ch.len_utf8()));
            }
        }
        rest = &after[close..];
    }
    out.push_str(rest);
    out
}

fn strip_line_comment(line: &str) -> &str {
    let semi = line.find(';').unwrap_or(line.len());
    let slashes = line.find("//").unwrap_or(line.len());
    &line[..semi.min(slashes)]
}

fn parse_line(line: &str, offset: usize) -> Result<Option<Statement>, ParseError> {
    let trimmed = line.trim_start();
    let Some(letter) = trimmed.chars().next() else {
        return Ok(None);
    };
    let letter_pos = offset + (line.len() - trimmed.len());
    let span = Span::new(letter_pos, offset + line.trim_end().len());

    // Fields may follow the statement letter without a space (`i1 0 1`).
    let mut fields = Vec::new();
    let body_offset = letter_pos + letter.len_utf8();
    let body = &trimmed[letter.len_utf8()..];
    let mut cursor = 0;
    for word in body.split_whitespace() {
        let rel = body[cursor..].find(word).map(|i| i + cursor).unwrap_or(cursor);
        cursor = rel + word.len();
        let field_span = Span::new(body_offset + rel, body_offset + cursor);
        fields.push((parse_field(word, field_span)?, field_span));
    }

    let statement = match letter {
        'i' => Statement::Instrument { fields, span },
        'f' => Statement::Table { fields, span },
        't' => {
            let numbers = numbers_only(&fields)?;
            match numbers.as_slice() {
                [beat, bpm] if *beat == 0.0 && *bpm > 0.0 => Statement::Tempo { bpm: *bpm },
                _ => {
                    return Err(ParseError::UnsupportedScoreStatement {
                        statement: 't',
                        span,
                    });
                }
            }
        }
        'e' => {
            let numbers = numbers_only(&fields)?;
            Statement::End {
                time: numbers.first().copied(),
            }
        }
        other => {
            return Err(ParseError::UnsupportedScoreStatement {
                statement: other,
                span,
            });
        }
    };
    Ok(Some(statement))
}

fn parse_field(word: &str, span: Span) -> Result<Field, ParseError> {
    match word {
        "." => Ok(Field::Carry),
        "+" => Ok(Field::FollowPrevious),
        "z" => Ok(Field::Infinite),
        _ => word
            .parse::<f64>()
            .map(Field::Number)
            .map_err(|_| ParseError::InvalidScoreField {
                text: word.to_string(),
                span,
            }),
    }
}

fn numbers_only(fields: &[(Field, Span)]) -> Result<Vec<f64>, ParseError> {
    fields
        .iter()
        .map(|(field, span)| match field {
            Field::Number(n) => Ok(*n),
            _ => Err(ParseError::InvalidScoreField {
                text: field_text(*field).into(),
                span: *span,
            }),
        })
        .collect()
}

fn field_text(field: Field) -> &'static str {
    match field {
        Field::Number(_) => "number",
        Field::Carry => ".",
        Field::FollowPrevious => "+",
        Field::Infinite => "z",
    }
}

fn resolve(statements: Vec<Statement>) -> Result<Score, ParseError> {
    let seconds_per_beat = statements
        .iter()
        .find_map(|s| match s {
            Statement::Tempo { bpm } => Some(60.0 / bpm),
            _ => None,
        })
        .unwrap_or(1.0);

    let mut score = Score::default();
    let mut unbounded = false;
    let mut end_beats: f64 = 0.0;
    // p-fields of the previous `i` statement, in beats.
    let mut previous: Option<Vec<f64>> = None;

    for statement in statements {
        match statement {
            Statement::Instrument { fields, span } => {
                let mut p = Vec::with_capacity(fields.len());
                for (idx, (field, field_span)) in fields.iter().enumerate() {
                    let value = match field {
                        Field::Number(n) => *n,
                        Field::Infinite => f64::INFINITY,
                        Field::Carry => previous
                            .as_ref()
                            .and_then(|prev| prev.get(idx).copied())
                            .ok_or_else(|| invalid(".", *field_span))?,
                        Field::FollowPrevious if idx == 1 => previous
                            .as_ref()
                            .and_then(|prev| Some(prev.get(1)? + prev.get(2)?.abs()))
                            .ok_or_else(|| invalid("+", *field_span))?,
                        Field::FollowPrevious => return Err(invalid("+", *field_span)),
                    };
                    p.push(value);
                }
                if p.len() < 3 {
                    return Err(ParseError::InvalidScoreField {
                        text: "i statement needs at least p1, p2 and p3".into(),
                        span,
                    });
                }
                let instr = p[0];
                if instr < 1.0 || instr.fract() != 0.0 {
                    return Err(invalid("p1", fields[0].1));
                }
                if !p[1].is_finite() {
                    return Err(invalid("p2", fields[1].1));
                }
                if p[2].is_finite() && p[2] >= 0.0 {
                    end_beats = end_beats.max(p[1] + p[2]);
                } else {
                    end_beats = end_beats.max(p[1]);
                }
                let mut pfields = p.clone();
                pfields[1] *= seconds_per_beat;
                pfields[2] *= seconds_per_beat;
                score.events.push(ScoreEvent {
                    instr: instr as u32,
                    start: pfields[1],
                    duration: pfields[2],
                    pfields,
                    span,
                });
                previous = Some(p);
            }
            Statement::Table { fields, span } => {
                let numbers: Vec<f64> = fields
                    .iter()
                    .map(|(field, field_span)| match field {
                        Field::Number(n) => Ok(*n),
                        Field::Infinite => Ok(f64::INFINITY),
                        other => Err(invalid(field_text(*other), *field_span)),
                    })
                    .collect::<Result<_, _>>()?;
                match numbers.as_slice() {
                    [number, time, ..] if *number == 0.0 => {
                        if time.is_infinite() {
                            unbounded = true;
                        } else {
                            end_beats = end_beats.max(*time);
                        }
                    }
                    [number, _time, size, routine, args @ ..]
                        if *number >= 1.0 && number.fract() == 0.0 && *size >= 1.0 =>
                    {
                        score.tables.push(TableDef {
                            number: *number as u32,
                            size: *size as usize,
                            routine: *routine as i32,
                            args: args.to_vec(),
                            span,
                        });
                    }
                    _ => {
                        return Err(ParseError::InvalidScoreField {
                            text: "f statement needs ifn, itime, isize, igen".into(),
                            span,
                        });
                    }
                }
            }
            Statement::Tempo { .. } => {}
            Statement::End { time } => {
                if let Some(t) = time {
                    end_beats = end_beats.max(t);
                }
            }
        }
    }

    score
        .events
        .sort_by(|a, b| a.start.total_cmp(&b.start).then(a.instr.cmp(&b.instr)));
    score.end_time = if unbounded {
        None
    } else {
        Some(end_beats * seconds_per_beat)
    };
    Ok(score)
}

fn invalid(text: &str, span: Span) -> ParseError {
    ParseError::InvalidScoreField {
        text: text.to_string(),
        span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_and_end_time() {
        let score = parse_score("i1 0 2 0.5 440\ni 1 1 3 0.25 880\ne\n", 0).unwrap();
        assert_eq!(score.events.len(), 2);
        assert_eq!(score.events[1].pfields, vec![1.0, 1.0, 3.0, 0.25, 880.0]);
        assert_eq!(score.end_time, Some(4.0));
    }

    #[test]
    fn carry_and_follow() {
        let score = parse_score("i1 0 1 0.5 440\ni1 + . . 660\n", 0).unwrap();
        assert_eq!(score.events[1].pfields, vec![1.0, 1.0, 1.0, 0.5, 660.0]);
        assert_eq!(score.end_time, Some(2.0));
    }

    #[test]
    fn tempo_scales_times() {
        let score = parse_score("t 0 120\ni1 2 2\n", 0).unwrap();
        assert_eq!(score.events[0].start, 1.0);
        assert_eq!(score.events[0].duration, 1.0);
        assert_eq!(score.end_time, Some(2.0));
    }

    #[test]
    fn f0_extends_and_z_unbounds() {
        assert_eq!(parse_score("f0 10\ni1 0 1\n", 0).unwrap().end_time, Some(10.0));
        assert_eq!(parse_score("f0 z\ni1 0 1\n", 0).unwrap().end_time, None);
    }

    #[test]
    fn tables_are_collected() {
        let score = parse_score("f 1 0 1024 10 1 0.5 ; sine + 2nd harmonic\n", 0).unwrap();
        assert_eq!(score.tables.len(), 1);
        assert_eq!(score.tables[0].size, 1024);
        assert_eq!(score.tables[0].routine, 10);
        assert_eq!(score.tables[0].args, vec![1.0, 0.5]);
    }

    #[test]
    fn statements_after_e_are_ignored() {
        let score = parse_score("i1 0 1\ne 3\ni1 5 1\n", 0).unwrap();
        assert_eq!(score.events.len(), 1);
        assert_eq!(score.end_time, Some(3.0));
    }

    #[test]
    fn comments_keep_offsets() {
        let err = parse_score("/* note */ i1 0 x\n", 100).unwrap_err();
        match err {
            ParseError::InvalidScoreField { text, span } => {
                assert_eq!(text, "x");
                assert_eq!(span, Span::new(116, 117));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_statement_rejected() {
        assert!(matches!(
            parse_score("q 1 2\n", 0),
            Err(ParseError::UnsupportedScoreStatement { statement: 'q', .. })
        ));
    }

    #[test]
    fn held_notes_do_not_extend_end() {
        let score = parse_score("i1 0 -1\ni1 1 2\n", 0).unwrap();
        assert!(score.events[0].is_held());
        assert_eq!(score.end_time, Some(3.0));
    }

    #[test]
    fn start_time_must_be_finite() {
        assert!(matches!(
            parse_score("i1 z 1\n", 0),
            Err(ParseError::InvalidScoreField { ref text, .. }) if text == "p2"
        ));
        assert!(parse_score("i1 0 z\ni1 + 1\n", 0).is_err());
    }

    #[test]
    fn empty_score_ends_immediately() {
        assert_eq!(parse_score("", 0).unwrap().end_time, Some(0.0));
    }
}
