use std::collections::BTreeMap;
use std::fmt;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;

use crate::records::{BackupRecord, RawElement};

/// Child elements whose text is carried on the parent record.
const TEXT_CHILDREN: &[&str] = &["text", "text_more", "description"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseDiagnostic {
    pub position: u64,
    pub message: String,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at byte {}: {}", self.position, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedBackup {
    pub records: Vec<BackupRecord>,
    /// Top-level tags with no importer, with how often they appeared.
    pub ignored: BTreeMap<String, usize>,
}

/// Parse a sanitized backup document into its ordered top-level records.
///
/// The document is parsed completely before anything is returned, so a chunk
/// with a syntax error anywhere yields only diagnostics and nothing is imported
/// from it.
pub fn parse_backup(xml: &str) -> Result<ParsedBackup, Vec<ParseDiagnostic>> {
    let elements = read_elements(xml).map_err(|diagnostic| vec![diagnostic])?;
    let mut parsed = ParsedBackup::default();
    for element in &elements {
        match BackupRecord::from_raw(element) {
            Some(record) => parsed.records.push(record),
            None => *parsed.ignored.entry(element.name.clone()).or_default() += 1,
        }
    }
    Ok(parsed)
}

fn read_elements(xml: &str) -> Result<Vec<RawElement>, ParseDiagnostic> {
    let mut reader = Reader::from_str(xml);
    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut current: Option<RawElement> = None;
    let mut current_child: Option<(String, String)> = None;

    loop {
        let position = reader.buffer_position() as u64;
        let event = reader.read_event().map_err(|error| ParseDiagnostic {
            position: reader.buffer_position() as u64,
            message: error.to_string(),
        })?;
        match event {
            Event::Start(start) => {
                depth += 1;
                match depth {
                    1 => seen_root = true,
                    2 => current = Some(raw_element(&start, position)?),
                    3 => {
                        let name = local_name(&start);
                        if current.is_some() && TEXT_CHILDREN.contains(&name.as_str()) {
                            current_child = Some((name, String::new()));
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(start) => match depth {
                0 => seen_root = true,
                1 => elements.push(raw_element(&start, position)?),
                2 => {
                    let name = local_name(&start);
                    if let Some(element) = current.as_mut()
                        && TEXT_CHILDREN.contains(&name.as_str())
                    {
                        element.children.insert(name, String::new());
                    }
                }
                _ => {}
            },
            Event::Text(text) => {
                if depth == 3
                    && let Some((_, buffer)) = current_child.as_mut()
                {
                    let value = text.unescape().map_err(|error| ParseDiagnostic {
                        position,
                        message: error.to_string(),
                    })?;
                    buffer.push_str(&value);
                }
            }
            Event::CData(data) => {
                if depth == 3
                    && let Some((_, buffer)) = current_child.as_mut()
                {
                    buffer.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                match depth {
                    3 => {
                        if let Some((name, value)) = current_child.take()
                            && let Some(element) = current.as_mut()
                        {
                            element.children.insert(name, value);
                        }
                    }
                    2 => {
                        if let Some(element) = current.take() {
                            elements.push(element);
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(ParseDiagnostic {
            position: reader.buffer_position() as u64,
            message: format!("document ended with {depth} unclosed element(s)"),
        });
    }
    if !seen_root {
        return Err(ParseDiagnostic {
            position: 0,
            message: "document has no root element".to_string(),
        });
    }
    Ok(elements)
}

fn raw_element(start: &BytesStart<'_>, position: u64) -> Result<RawElement, ParseDiagnostic> {
    let mut element = RawElement::new(local_name(start));
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|error| ParseDiagnostic {
            position,
            message: error.to_string(),
        })?;
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(|error| ParseDiagnostic {
            position,
            message: format!("attribute `{key}`: {error}"),
        })?;
        element.attributes.insert(key, value.into_owned());
    }
    Ok(element)
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<movabletype xmlns="http://www.sixapart.com/ns/movabletype">
  <blog id="1" name="Old" site_url="http://old.example/"/>
  <author id="2" name="melody" status="1"/>
  <entry id="9" title="Caf&#233; &amp; more" author_id="2">
    <text>&lt;p&gt;Hello&lt;/p&gt;</text>
    <text_more><![CDATA[<p>Extended</p>]]></text_more>
  </entry>
  <permission id="3"/>
  <category id="5" basename="news" label="News"/>
</movabletype>
"#;

    #[test]
    fn records_keep_document_order() {
        let parsed = parse_backup(SAMPLE).expect("parse");
        let kinds = parsed.records.iter().map(BackupRecord::kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec!["blog", "author", "entry", "category"]);
        assert_eq!(parsed.ignored.get("permission"), Some(&1));
    }

    #[test]
    fn entry_text_children_are_unescaped() {
        let parsed = parse_backup(SAMPLE).expect("parse");
        let Some(BackupRecord::Entry(entry)) = parsed.records.get(2) else {
            panic!("expected entry");
        };
        assert_eq!(entry.title, "Caf\u{e9} & more");
        assert_eq!(entry.text, "<p>Hello</p>");
        assert_eq!(entry.text_more, "<p>Extended</p>");
    }

    #[test]
    fn malformed_document_reports_a_diagnostic() {
        let diagnostics =
            parse_backup("<backup><entry id=\"1\"><text>x</entry></backup>").expect_err("fail");
        assert_eq!(diagnostics.len(), 1);
        assert!(!diagnostics[0].message.is_empty());
    }

    #[test]
    fn unterminated_document_is_rejected() {
        let diagnostics = parse_backup("<backup><entry id=\"1\">").expect_err("fail");
        assert!(diagnostics[0].message.contains("unclosed"));
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(parse_backup("   ").is_err());
    }
}
