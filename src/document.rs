//! CSD container splitting: locates the orchestra, score and options
//! sections inside a `<CsoundSynthesizer>` document.

use crate::error::DocumentError;

/// One section's text and the byte offset where that text begins.
#[derive(Debug, Clone, PartialEq)]
pub struct Section<'a> {
    pub text: &'a str,
    pub offset: usize,
}

/// The sections of a CSD document that the engine cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct CsdDocument<'a> {
    pub options: Option<Section<'a>>,
    pub instruments: Section<'a>,
    pub score: Option<Section<'a>>,
}

impl<'a> CsdDocument<'a> {
    pub fn parse(source: &'a str) -> Result<Self, DocumentError> {
        let root = find_section(source, 0, "CsoundSynthesizer")?.ok_or(DocumentError::MissingRoot)?;
        let options = find_section(source, root.offset, "CsOptions")?
            .filter(|s| within(s, &root));
        let instruments = find_section(source, root.offset, "CsInstruments")?
            .filter(|s| within(s, &root))
            .ok_or(DocumentError::MissingSection { name: "CsInstruments" })?;
        let score = find_section(source, root.offset, "CsScore")?.filter(|s| within(s, &root));
        Ok(CsdDocument {
            options,
            instruments,
            score,
        })
    }

    /// Command-line style flags from `<CsOptions>`, split on whitespace.
    pub fn option_flags(&self) -> Vec<&'a str> {
        match &self.options {
            Some(section) => section
                .text
                .lines()
                .map(|line| line.split(';').next().unwrap_or(""))
                .flat_map(str::split_whitespace)
                .collect(),
            None => Vec::new(),
        }
    }
}

fn within(inner: &Section<'_>, outer: &Section<'_>) -> bool {
    inner.offset >= outer.offset && inner.offset + inner.text.len() <= outer.offset + outer.text.len()
}

/// Find `<name ...>` … `</name>` at or after `from`. Tag matching is
/// case-sensitive, as it is for the reference engine.
fn find_section<'a>(
    source: &'a str,
    from: usize,
    name: &str,
) -> Result<Option<Section<'a>>, DocumentError> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let mut search = from;
    while let Some(rel) = source[search..].find(&open) {
        let tag_start = search + rel;
        let after_name = tag_start + open.len();
        let next = source[after_name..].chars().next();
        // `<CsScoreX>` must not match `<CsScore`.
        if !matches!(next, Some('>') | Some(' ') | Some('\t') | Some('\r') | Some('\n')) {
            search = after_name;
            continue;
        }
        let Some(gt) = source[after_name..].find('>') else {
            return Err(DocumentError::UnterminatedSection {
                name: name.to_string(),
                pos: tag_start,
            });
        };
        let body_start = after_name + gt + 1;
        let Some(end_rel) = source[body_start..].find(&close) else {
            return Err(DocumentError::UnterminatedSection {
                name: name.to_string(),
                pos: tag_start,
            });
        };
        let body_end = body_start + end_rel;
        return Ok(Some(Section {
            text: &source[body_start..body_end],
            offset: body_start,
        }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "<CsoundSynthesizer>\n<CsOptions>\n-odac -d ; realtime\n</CsOptions>\n<CsInstruments>\nsr = 48000\n</CsInstruments>\n<CsScore>\ne\n</CsScore>\n</CsoundSynthesizer>\n";

    #[test]
    fn splits_sections_with_offsets() {
        let doc = CsdDocument::parse(DOC).unwrap();
        assert_eq!(doc.instruments.text, "\nsr = 48000\n");
        assert_eq!(&DOC[doc.instruments.offset..doc.instruments.offset + 5], "\nsr =");
        assert_eq!(doc.score.as_ref().unwrap().text, "\ne\n");
        assert_eq!(doc.option_flags(), vec!["-odac", "-d"]);
    }

    #[test]
    fn missing_orchestra_is_an_error() {
        let err = CsdDocument::parse("<CsoundSynthesizer><CsScore>e</CsScore></CsoundSynthesizer>")
            .unwrap_err();
        assert!(matches!(err, DocumentError::MissingSection { name: "CsInstruments" }));
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(matches!(
            CsdDocument::parse("instr 1\nendin\n"),
            Err(DocumentError::MissingRoot)
        ));
    }

    #[test]
    fn unterminated_section_reports_position() {
        let src = "<CsoundSynthesizer><CsInstruments>sr=1</CsoundSynthesizer>";
        match CsdDocument::parse(src) {
            Err(DocumentError::UnterminatedSection { name, pos }) => {
                assert_eq!(name, "CsInstruments");
                assert_eq!(pos, 19);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn score_is_optional() {
        let src = "<CsoundSynthesizer><CsInstruments>sr=1</CsInstruments></CsoundSynthesizer>";
        let doc = CsdDocument::parse(src).unwrap();
        assert!(doc.score.is_none());
        assert!(doc.option_flags().is_empty());
    }
}
