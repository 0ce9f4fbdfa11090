//! Repairs raw Movable Type backup chunks into XML that a strict parser accepts.
//!
//! Exports from older MT installs routinely contain control characters pasted
//! from word processors, `&#176C`-style references without their terminating
//! semicolon, latin-1 bytes, and large `<log>` sections nobody needs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

static RE_LOG_SECTION: OnceLock<Regex> = OnceLock::new();
static RE_XML_DECL_ENCODING: OnceLock<Regex> = OnceLock::new();

pub const CLEAN_PREFIX: &str = "clean-";

/// Sanitize one chunk's bytes into well-formed UTF-8 text.
pub fn sanitize_backup(raw: &[u8]) -> String {
    let text = decode_to_utf8(raw);
    let text = strip_log_sections(&text);
    let text = normalize_declared_encoding(&text);
    let text = replace_invalid_xml_chars(&text);
    fix_numeric_references(&text)
}

/// Read `chunk`, sanitize it and write the result to `clean-{name}` beside it.
pub fn write_clean_copy(chunk: &Path) -> Result<(PathBuf, String)> {
    let raw = fs::read(chunk).with_context(|| format!("failed to read {}", chunk.display()))?;
    let cleaned = sanitize_backup(&raw);
    let file_name = chunk
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("chunk path has no file name: {}", chunk.display()))?;
    let clean_path = chunk.with_file_name(format!("{CLEAN_PREFIX}{file_name}"));
    fs::write(&clean_path, &cleaned)
        .with_context(|| format!("failed to write {}", clean_path.display()))?;
    Ok((clean_path, cleaned))
}

/// UTF-8 input passes through; anything else is treated as ISO-8859-1.
pub fn decode_to_utf8(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_string(),
        Err(_) => raw.iter().map(|&byte| char::from(byte)).collect(),
    }
}

pub fn strip_log_sections(text: &str) -> String {
    let re = RE_LOG_SECTION
        .get_or_init(|| Regex::new(r"(?is)<log\b[^>]*>.*?</log\s*>").expect("valid log regex"));
    re.replace_all(text, "").into_owned()
}

fn normalize_declared_encoding(text: &str) -> String {
    let re = RE_XML_DECL_ENCODING.get_or_init(|| {
        Regex::new(r#"^(\s*<\?xml[^>]*?encoding\s*=\s*["'])[^"']*(["'])"#)
            .expect("valid declaration regex")
    });
    re.replace(text, "${1}UTF-8${2}").into_owned()
}

pub fn is_allowed_xml_char(ch: char) -> bool {
    matches!(
        u32::from(ch),
        0x9 | 0xA | 0xD | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x10000..=0x10FFFF
    )
}

/// Every disallowed character becomes exactly one space.
pub fn replace_invalid_xml_chars(text: &str) -> String {
    text.chars()
        .map(|ch| if is_allowed_xml_char(ch) { ch } else { ' ' })
        .collect()
}

/// Terminate `&#NNN` / `&#xHHH` references that lack their `;` and blank out
/// references to code points XML does not allow.
pub fn fix_numeric_references(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 16);
    let mut cursor = 0;
    let mut copied_until = 0;

    while let Some(offset) = text[cursor..].find("&#") {
        let start = cursor + offset;
        let mut end = start + 2;
        let hex = matches!(bytes.get(end), Some(b'x') | Some(b'X'));
        if hex {
            end += 1;
        }
        let digits_start = end;
        while end < bytes.len()
            && (if hex {
                bytes[end].is_ascii_hexdigit()
            } else {
                bytes[end].is_ascii_digit()
            })
        {
            end += 1;
        }
        if end == digits_start {
            cursor = end;
            continue;
        }

        let terminated = bytes.get(end) == Some(&b';');
        let radix = if hex { 16 } else { 10 };
        let allowed = u32::from_str_radix(&text[digits_start..end], radix)
            .ok()
            .and_then(char::from_u32)
            .is_some_and(is_allowed_xml_char);

        out.push_str(&text[copied_until..start]);
        if allowed {
            out.push_str(&text[start..end]);
            out.push(';');
        } else {
            out.push(' ');
        }
        copied_until = if terminated { end + 1 } else { end };
        cursor = copied_until;
    }

    out.push_str(&text[copied_until..]);
    out
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn control_characters_become_single_spaces() {
        let input = "a\u{1}b\u{8}c\td\ne\u{FFFE}";
        let cleaned = replace_invalid_xml_chars(input);
        assert_eq!(cleaned, "a b c\td\ne ");
        assert!(cleaned.chars().all(is_allowed_xml_char));
    }

    #[test]
    fn ascii_control_replacement_preserves_length() {
        let input: String = (0u8..0x80).map(char::from).collect();
        let cleaned = replace_invalid_xml_chars(&input);
        assert_eq!(cleaned.len(), input.len());
        assert!(cleaned.chars().all(is_allowed_xml_char));
    }

    #[test]
    fn log_sections_are_removed() {
        let input = "<backup><log id=\"1\">noise\nmore</log><entry id=\"2\"/><LOG>x</LOG></backup>";
        assert_eq!(strip_log_sections(input), "<backup><entry id=\"2\"/></backup>");
    }

    #[test]
    fn logo_elements_are_not_mistaken_for_logs() {
        let input = "<logo>kept</logo>";
        assert_eq!(strip_log_sections(input), input);
    }

    #[test]
    fn unterminated_references_get_semicolons() {
        assert_eq!(fix_numeric_references("20&#176C"), "20&#176;C");
        assert_eq!(fix_numeric_references("a &#x22B8-b"), "a &#x22B8;-b");
        assert_eq!(fix_numeric_references("end&#8217"), "end&#8217;");
        assert_eq!(fix_numeric_references("ok&#8217;s"), "ok&#8217;s");
        assert_eq!(fix_numeric_references("plain & text &#; here"), "plain & text &#; here");
    }

    #[test]
    fn references_to_disallowed_code_points_are_blanked() {
        assert_eq!(fix_numeric_references("a&#1;b"), "a b");
        assert_eq!(fix_numeric_references("a&#x0B;b"), "a b");
    }

    #[test]
    fn latin1_input_is_decoded() {
        let raw = b"<t>caf\xe9</t>";
        assert_eq!(decode_to_utf8(raw), "<t>caf\u{e9}</t>");
        assert_eq!(decode_to_utf8("<t>caf\u{e9}</t>".as_bytes()), "<t>caf\u{e9}</t>");
    }

    #[test]
    fn declared_encoding_is_rewritten_to_utf8() {
        let raw = b"<?xml version=\"1.0\" encoding=\"iso-8859-1\"?>\n<backup>\xe9</backup>";
        let cleaned = sanitize_backup(raw);
        assert!(cleaned.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(cleaned.contains("<backup>\u{e9}</backup>"));
    }

    #[test]
    fn clean_copy_is_written_next_to_chunk() {
        let temp = tempdir().expect("tempdir");
        let chunk = temp.path().join("blog-1.xml");
        fs::write(&chunk, b"<backup>\x01&#176C</backup>").expect("write chunk");
        let (clean_path, cleaned) = write_clean_copy(&chunk).expect("clean");
        assert_eq!(clean_path, temp.path().join("clean-blog-1.xml"));
        assert_eq!(cleaned, "<backup> &#176;C</backup>");
        assert_eq!(fs::read_to_string(clean_path).expect("read"), cleaned);
    }
}
