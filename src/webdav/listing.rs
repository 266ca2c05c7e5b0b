// src/webdav/listing.rs

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;
use url::Url;

/// Names hidden from listings regardless of location.
const SYSTEM_FILES: &[&str] = &[
    ".DS_Store",
    "._.DS_Store",
    ".Spotlight-V100",
    ".Trashes",
    "ehthumbs.db",
    "Thumbs.db",
    "$RECYCLE.BIN",
];

/// AppleDouble resource-fork prefix.
const MAC_RESOURCE_PREFIX: &str = "._";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One child of a listed directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    /// Decoded path relative to the share root, always starting with `/`.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

/// Properties of a single `<response>` in a multistatus body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropEntry {
    pub href: String,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

impl PropEntry {
    /// Converts to a [`DirEntry`] relative to the share root `base`.
    /// Returns `None` for the listed directory `dir` itself.
    pub fn into_entry(self, base: &str, dir: &str) -> Option<DirEntry> {
        let href_path = match Url::parse(&self.href) {
            Ok(url) => url.path().to_string(),
            Err(_) => self.href.clone(),
        };
        let full = percent_decode_str(&href_path).decode_utf8_lossy().trim_end_matches('/').to_string();
        if full == dir {
            return None;
        }

        let rel = full.strip_prefix(base).unwrap_or(&full);
        let name = rel.rsplit('/').find(|s| !s.is_empty())?.to_string();
        let path = if rel.starts_with('/') { rel.to_string() } else { format!("/{rel}") };
        let kind = if self.is_collection { EntryKind::Directory } else { EntryKind::File };
        let modified = self
            .last_modified
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
            .map(|d| d.with_timezone(&Utc));

        Some(DirEntry {
            name,
            path,
            kind,
            size: if kind == EntryKind::File { self.content_length.unwrap_or(0) } else { 0 },
            modified,
            content_type: self.content_type.filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Href,
    ContentLength,
    LastModified,
    ContentType,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"href" => Some(Field::Href),
            b"getcontentlength" => Some(Field::ContentLength),
            b"getlastmodified" => Some(Field::LastModified),
            b"getcontenttype" => Some(Field::ContentType),
            _ => None,
        }
    }
}

/// Parses a `207 Multi-Status` body. Namespace prefixes are ignored.
pub fn parse_multistatus(xml: &str) -> Result<Vec<PropEntry>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<PropEntry> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"response" => current = Some(PropEntry::default()),
                b"collection" => mark_collection(&mut current),
                other => field = Field::from_local_name(other),
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"collection" {
                    mark_collection(&mut current);
                }
            }
            Event::Text(text) => {
                if let (Some(field), Some(entry)) = (field, current.as_mut()) {
                    let value = text.unescape()?.trim().to_string();
                    match field {
                        Field::Href => entry.href = value,
                        Field::ContentLength => entry.content_length = value.parse().ok(),
                        Field::LastModified => entry.last_modified = Some(value),
                        Field::ContentType => entry.content_type = Some(value),
                    }
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"response" {
                    entries.extend(current.take());
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(entries)
}

fn mark_collection(current: &mut Option<PropEntry>) {
    if let Some(entry) = current.as_mut() {
        entry.is_collection = true;
    }
}

/// Desktop metadata files that never belong in a listing.
pub fn is_system_file(name: &str) -> bool {
    SYSTEM_FILES.contains(&name) || name.starts_with(MAC_RESOURCE_PREFIX)
}

/// Case-insensitive ordering where runs of digits compare by value,
/// so `file2` sorts before `file10`. Ties fall back to byte order.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        let ord = match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                compare_digits(&take_digits(&mut left), &take_digits(&mut right))
            }
            (Some(l), Some(r)) => {
                left.next();
                right.next();
                l.to_lowercase().cmp(r.to_lowercase())
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        digits.push(c);
    }
    digits
}

fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTISTATUS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/dav/docs/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>http://files.example.org/dav/docs/annual%20report.pdf</D:href>
    <D:propstat>
      <D:prop>
        <D:resourcetype/>
        <D:getcontentlength>2048</D:getcontentlength>
        <D:getlastmodified>Mon, 15 Jan 2024 10:00:00 GMT</D:getlastmodified>
        <D:getcontenttype>application/pdf</D:getcontenttype>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/dav/docs/Tom%20&amp;%20Jerry/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection></D:collection></D:resourcetype></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#;

    #[test]
    fn parses_responses_with_any_prefix() {
        let entries = parse_multistatus(MULTISTATUS).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_collection);
        assert_eq!(entries[1].href, "http://files.example.org/dav/docs/annual%20report.pdf");
        assert_eq!(entries[1].content_length, Some(2048));
        assert_eq!(entries[1].content_type.as_deref(), Some("application/pdf"));
        assert!(!entries[1].is_collection);
        assert_eq!(entries[2].href, "/dav/docs/Tom%20&%20Jerry/");
        assert!(entries[2].is_collection);

        let renamed = MULTISTATUS.replace("D:", "lp1:").replace("xmlns:D", "xmlns:lp1");
        assert_eq!(parse_multistatus(&renamed).unwrap(), entries);
    }

    #[test]
    fn entries_are_relative_to_the_share() {
        let mut entries = parse_multistatus(MULTISTATUS).unwrap().into_iter();
        assert_eq!(entries.next().unwrap().into_entry("/dav", "/dav/docs"), None);

        let file = entries.next().unwrap().into_entry("/dav", "/dav/docs").unwrap();
        assert_eq!(file.name, "annual report.pdf");
        assert_eq!(file.path, "/docs/annual report.pdf");
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.size, 2048);
        assert_eq!(file.modified.unwrap().to_rfc3339(), "2024-01-15T10:00:00+00:00");

        let dir = entries.next().unwrap().into_entry("/dav", "/dav/docs").unwrap();
        assert_eq!(dir.name, "Tom & Jerry");
        assert_eq!(dir.path, "/docs/Tom & Jerry");
        assert_eq!(dir.kind, EntryKind::Directory);
        assert_eq!(dir.size, 0);
    }

    #[test]
    fn system_files_are_recognised() {
        for name in [".DS_Store", "Thumbs.db", "$RECYCLE.BIN", "._photo.jpg", ".Trashes"] {
            assert!(is_system_file(name), "{name}");
        }
        for name in [".bashrc", "thumbs.db.txt", "_notes", "report.pdf"] {
            assert!(!is_system_file(name), "{name}");
        }
    }

    #[test]
    fn natural_order_compares_numbers_by_value() {
        let mut names = vec!["file10.txt", "File1.txt", "file2.txt", "file02.txt", "alpha", "Beta", "file1.txt"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(
            names,
            ["alpha", "Beta", "File1.txt", "file1.txt", "file02.txt", "file2.txt", "file10.txt"]
        );
        assert_eq!(natural_cmp("a", "a"), Ordering::Equal);
        assert_eq!(natural_cmp("a", "ab"), Ordering::Less);
        assert_eq!(natural_cmp("v9", "v00010"), Ordering::Less);
    }
}
