//! Header codec: `---`-fenced metadata prefixes on markdown documents.
//!
//! Parsing is tolerant by default: a document without a header, or with a
//! header that will not parse, yields a synthesized default header instead of
//! an error. Strict mode rejects everything lenient mode papers over.
//!
//! Serialization writes keys in the stable order `id, title, category, tags,
//! project, created, updated, links`, then preserved unknown scalars in
//! sorted order. `serialize` output always parses back to an equal header.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde_yaml::Value;

use mementa_core::{generate_uid, Category, Error, NoteHeader, Result, Uid};

/// How forgiving parsing should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Synthesize defaults for anything missing or malformed; keep unknown
    /// scalar fields as opaque extras.
    Lenient,
    /// Reject missing/malformed UID, empty title, unknown category, unknown
    /// fields, and inverted timestamps.
    Strict,
}

/// Split a document into its raw header block and body.
///
/// Returns `None` when the document does not start with a `---` fence line.
/// The body keeps its bytes exactly as they appear after the closing fence.
pub fn split_document(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---\n").or_else(|| {
        text.strip_prefix("---\r\n")
    })?;

    // Closing fence is a line that is exactly `---`.
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == "---" {
            let header = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

/// Parse a markdown document into `(header, body)`.
pub fn parse_document(text: &str, mode: ParseMode) -> Result<(NoteHeader, String)> {
    let Some((raw_header, body)) = split_document(text) else {
        return match mode {
            ParseMode::Strict => Err(Error::Parse("document has no header".into())),
            ParseMode::Lenient => Ok((default_header(), text.to_string())),
        };
    };

    match parse_header(raw_header, mode) {
        Ok(header) => Ok((header, body.to_string())),
        Err(err) => match mode {
            ParseMode::Strict => Err(err),
            ParseMode::Lenient => Ok((default_header(), body.to_string())),
        },
    }
}

/// Serialize a header and body back into document text.
pub fn serialize_document(header: &NoteHeader, body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 256);
    out.push_str("---\n");
    out.push_str(&format!("id: {}\n", header.id));
    out.push_str(&format!("title: {}\n", yaml_scalar(&header.title)));
    out.push_str(&format!("category: {}\n", header.category));
    out.push_str(&format!("tags: {}\n", yaml_seq(&header.tags)));
    if let Some(project) = &header.project {
        out.push_str(&format!("project: {}\n", yaml_scalar(project)));
    }
    out.push_str(&format!("created: {}\n", format_timestamp(header.created)));
    out.push_str(&format!("updated: {}\n", format_timestamp(header.updated)));
    let links: Vec<String> = header.links.iter().map(|l| l.to_string()).collect();
    out.push_str(&format!("links: {}\n", yaml_seq(&links)));
    for (key, value) in &header.extras {
        out.push_str(&format!("{}: {}\n", key, yaml_scalar(value)));
    }
    out.push_str("---\n");
    out.push_str(body);
    out
}

/// Default header synthesized for headerless or unparseable documents.
fn default_header() -> NoteHeader {
    let now = Utc::now().trunc_subsecs(6);
    NoteHeader {
        id: generate_uid(),
        title: "Untitled".to_string(),
        category: Category::Resources,
        tags: Vec::new(),
        project: None,
        created: now,
        updated: now,
        links: Vec::new(),
        extras: BTreeMap::new(),
    }
}

const KNOWN_KEYS: &[&str] = &[
    "id", "title", "category", "tags", "project", "created", "updated", "links",
];

fn parse_header(raw: &str, mode: ParseMode) -> Result<NoteHeader> {
    let value: Value = serde_yaml::from_str(raw)
        .map_err(|e| Error::Parse(format!("header is not valid yaml: {e}")))?;
    let Value::Mapping(map) = value else {
        return Err(Error::Parse("header is not a mapping".into()));
    };

    let strict = mode == ParseMode::Strict;
    let now = Utc::now().trunc_subsecs(6);

    let id = match scalar_str(&map, "id") {
        Some(raw_id) => match Uid::parse(&raw_id) {
            Ok(uid) => uid,
            Err(e) if strict => return Err(e),
            Err(_) => generate_uid(),
        },
        None if strict => return Err(Error::Parse("header is missing id".into())),
        None => generate_uid(),
    };

    let title = match scalar_str(&map, "title") {
        Some(t) if !t.trim().is_empty() => t,
        Some(_) | None if strict => return Err(Error::Parse("header has no usable title".into())),
        _ => "Untitled".to_string(),
    };

    let category = match scalar_str(&map, "category") {
        Some(raw_cat) => match raw_cat.parse::<Category>() {
            Ok(cat) => cat,
            Err(e) if strict => return Err(e),
            Err(_) => Category::Resources,
        },
        None if strict => return Err(Error::Parse("header is missing category".into())),
        None => Category::Resources,
    };

    let mut tags = Vec::new();
    if let Some(seq) = string_seq(&map, "tags", strict)? {
        for tag in seq {
            let tag = tag.trim().to_string();
            if tag.is_empty() {
                if strict {
                    return Err(Error::Parse("empty tag".into()));
                }
                continue;
            }
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }

    let project = match scalar_str(&map, "project") {
        Some(p) if !p.trim().is_empty() => Some(p),
        Some(_) if strict => return Err(Error::Parse("empty project".into())),
        _ => None,
    };

    let created = parse_timestamp(&map, "created", strict)?.unwrap_or(now);
    let mut updated = parse_timestamp(&map, "updated", strict)?.unwrap_or(created);
    if created > updated {
        if strict {
            return Err(Error::Parse(format!(
                "created {created} is after updated {updated}"
            )));
        }
        updated = created;
    }

    let mut links = Vec::new();
    if let Some(seq) = string_seq(&map, "links", strict)? {
        for raw_link in seq {
            match Uid::parse(&raw_link) {
                Ok(uid) => {
                    if uid != id && !links.contains(&uid) {
                        links.push(uid);
                    }
                }
                Err(e) if strict => return Err(e),
                Err(_) => {}
            }
        }
    }

    let mut extras = BTreeMap::new();
    for (key, value) in &map {
        let Value::String(key) = key else {
            if strict {
                return Err(Error::Parse("non-string header key".into()));
            }
            continue;
        };
        if KNOWN_KEYS.contains(&key.as_str()) {
            continue;
        }
        if strict {
            return Err(Error::Parse(format!("unknown header field: {key:?}")));
        }
        if let Some(scalar) = value_to_scalar(value) {
            extras.insert(key.clone(), scalar);
        }
    }

    let header = NoteHeader {
        id,
        title,
        category,
        tags,
        project,
        created,
        updated,
        links,
        extras,
    };
    header.validate()?;
    Ok(header)
}

fn scalar_str(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    map.get(&Value::String(key.to_string()))
        .and_then(value_to_scalar)
}

fn value_to_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_seq(
    map: &serde_yaml::Mapping,
    key: &str,
    strict: bool,
) -> Result<Option<Vec<String>>> {
    match map.get(&Value::String(key.to_string())) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Sequence(seq)) => {
            let mut out = Vec::with_capacity(seq.len());
            for item in seq {
                match value_to_scalar(item) {
                    Some(s) => out.push(s),
                    None if strict => {
                        return Err(Error::Parse(format!("non-scalar entry in {key:?}")))
                    }
                    None => {}
                }
            }
            Ok(Some(out))
        }
        // A bare scalar is treated as a one-element sequence.
        Some(other) => match value_to_scalar(other) {
            Some(s) => Ok(Some(vec![s])),
            None if strict => Err(Error::Parse(format!("{key:?} is not a sequence"))),
            None => Ok(None),
        },
    }
}

fn parse_timestamp(
    map: &serde_yaml::Mapping,
    key: &str,
    strict: bool,
) -> Result<Option<DateTime<Utc>>> {
    match scalar_str(map, key) {
        None => Ok(None),
        Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
            Ok(dt) => Ok(Some(dt.with_timezone(&Utc).trunc_subsecs(6))),
            Err(e) if strict => Err(Error::Parse(format!("bad {key} timestamp {raw:?}: {e}"))),
            Err(_) => Ok(None),
        },
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Render a string as a yaml scalar, quoting only when the plain form would
/// be ambiguous.
fn yaml_scalar(s: &str) -> String {
    let plain_safe = !s.is_empty()
        && !s.starts_with(char::is_whitespace)
        && !s.ends_with(char::is_whitespace)
        && s.chars().all(|c| {
            c.is_alphanumeric() || matches!(c, ' ' | '_' | '.' | '/' | '+' | '(' | ')')
        })
        && !matches!(s, "true" | "false" | "null" | "~" | "yes" | "no")
        && s.parse::<f64>().is_err();
    if plain_safe {
        s.to_string()
    } else {
        let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    }
}

fn yaml_seq<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }
    let rendered: Vec<String> = items.iter().map(|i| yaml_scalar(i.as_ref())).collect();
    format!("[{}]", rendered.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mementa_core::generate_uid;

    fn sample_header() -> NoteHeader {
        let mut header = NoteHeader::new("Index optimization");
        header.tags = vec!["index".into(), "fts5".into()];
        header.project = Some("search-tuning".into());
        header.links = vec![generate_uid()];
        header
    }

    #[test]
    fn test_serialize_parse_round_trip() {
        let header = sample_header();
        let body = "FTS5 tuning tips\n\nSecond paragraph.\n";
        let text = serialize_document(&header, body);

        let (parsed, parsed_body) = parse_document(&text, ParseMode::Strict).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed_body, body);
    }

    #[test]
    fn test_serializer_output_is_a_fixed_point() {
        let header = sample_header();
        let text = serialize_document(&header, "body\n");
        let (parsed, body) = parse_document(&text, ParseMode::Lenient).unwrap();
        assert_eq!(serialize_document(&parsed, &body), text);
    }

    #[test]
    fn test_key_order_is_stable() {
        let header = sample_header();
        let text = serialize_document(&header, "");
        let positions: Vec<usize> = ["id:", "title:", "category:", "tags:", "project:", "created:", "updated:", "links:"]
            .iter()
            .map(|k| text.find(k).unwrap_or_else(|| panic!("missing key {k}")))
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_headerless_document_lenient() {
        let (header, body) = parse_document("just some text", ParseMode::Lenient).unwrap();
        assert_eq!(header.title, "Untitled");
        assert_eq!(header.category, Category::Resources);
        assert_eq!(body, "just some text");
    }

    #[test]
    fn test_headerless_document_strict_fails() {
        assert!(parse_document("just some text", ParseMode::Strict).is_err());
    }

    #[test]
    fn test_malformed_header_lenient_synthesizes() {
        let text = "---\n: [unbalanced\n---\nbody here";
        let (header, body) = parse_document(text, ParseMode::Lenient).unwrap();
        assert_eq!(header.title, "Untitled");
        assert_eq!(body, "body here");
    }

    #[test]
    fn test_strict_rejects_missing_uid() {
        let text = "---\ntitle: No id\ncategory: Resources\n---\n";
        assert!(parse_document(text, ParseMode::Strict).is_err());
    }

    #[test]
    fn test_strict_rejects_unknown_category() {
        let uid = generate_uid();
        let text = format!("---\nid: {uid}\ntitle: T\ncategory: Inbox\n---\n");
        assert!(parse_document(&text, ParseMode::Strict).is_err());
    }

    #[test]
    fn test_strict_rejects_unknown_field() {
        let uid = generate_uid();
        let text = format!("---\nid: {uid}\ntitle: T\ncategory: Areas\nmood: grumpy\n---\n");
        assert!(parse_document(&text, ParseMode::Strict).is_err());
    }

    #[test]
    fn test_lenient_preserves_unknown_scalars() {
        let uid = generate_uid();
        let text = format!("---\nid: {uid}\ntitle: T\ncategory: Areas\nmood: grumpy\n---\nbody");
        let (header, _) = parse_document(&text, ParseMode::Lenient).unwrap();
        assert_eq!(header.extras.get("mood").map(String::as_str), Some("grumpy"));

        let round = serialize_document(&header, "body");
        assert!(round.contains("mood: grumpy\n"));
    }

    #[test]
    fn test_lenient_drops_self_links_and_duplicates() {
        let uid = generate_uid();
        let other = generate_uid();
        let text = format!(
            "---\nid: {uid}\ntitle: T\ncategory: Areas\nlinks: [{uid}, {other}, {other}, nonsense]\n---\n"
        );
        let (header, _) = parse_document(&text, ParseMode::Lenient).unwrap();
        assert_eq!(header.links, vec![other]);
    }

    #[test]
    fn test_block_sequences_parse() {
        let uid = generate_uid();
        let text = format!(
            "---\nid: {uid}\ntitle: T\ncategory: Areas\ntags:\n  - rust\n  - sqlite\n---\n"
        );
        let (header, _) = parse_document(&text, ParseMode::Lenient).unwrap();
        assert_eq!(header.tags, vec!["rust".to_string(), "sqlite".to_string()]);
    }

    #[test]
    fn test_body_preserved_byte_for_byte() {
        let header = sample_header();
        let body = "line one\r\n\r\n  indented\n\ttabbed\nno trailing newline";
        let text = serialize_document(&header, body);
        let (_, parsed_body) = parse_document(&text, ParseMode::Strict).unwrap();
        assert_eq!(parsed_body, body);
    }

    #[test]
    fn test_title_with_colon_quotes_and_round_trips() {
        let mut header = sample_header();
        header.title = "Reading: a survey".to_string();
        let text = serialize_document(&header, "");
        let (parsed, _) = parse_document(&text, ParseMode::Strict).unwrap();
        assert_eq!(parsed.title, "Reading: a survey");
    }

    #[test]
    fn test_inverted_timestamps_clamped_leniently() {
        let uid = generate_uid();
        let text = format!(
            "---\nid: {uid}\ntitle: T\ncategory: Areas\ncreated: 2026-05-01T00:00:00Z\nupdated: 2026-04-01T00:00:00Z\n---\n"
        );
        let (header, _) = parse_document(&text, ParseMode::Lenient).unwrap();
        assert_eq!(header.created, header.updated);
        assert!(parse_document(&text, ParseMode::Strict).is_err());
    }
}
