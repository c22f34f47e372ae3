// src/feed/atom.rs
//! Atom feed parsing. The upstream `.rss` endpoint actually serves Atom,
//! so the serde structs model `<feed><entry>` documents.

use quick_xml::de::from_str;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::FetchError;
use crate::feed::types::RawItem;

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: Option<String>,
    title: Option<String>,
    content: Option<Content>,
    link: Option<Link>,
    author: Option<Author>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(rename = "$text")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
}

/// Parse one feed document into raw items. An empty entry list is a valid
/// (quiet) feed; a document that is not Atom at all is `Malformed`.
pub fn parse_feed(xml: &str, feed: &str, fetched_at: u64) -> Result<Vec<RawItem>, FetchError> {
    let cleaned = scrub_entities_for_xml(xml);
    // serde ignores the root element name, so a block page would otherwise
    // deserialize as an empty feed.
    if root_element_name(&cleaned).as_deref() != Some("feed") {
        return Err(FetchError::Malformed {
            feed: feed.to_string(),
            reason: "document root is not an Atom <feed>".to_string(),
        });
    }
    let doc: Feed = from_str(&cleaned).map_err(|e| FetchError::Malformed {
        feed: feed.to_string(),
        reason: e.to_string(),
    })?;

    let mut out = Vec::with_capacity(doc.entries.len());
    for entry in doc.entries {
        let link = entry.link.and_then(|l| l.href);
        let title = entry.title.unwrap_or_default();
        let id = extract_item_id(entry.id.as_deref(), link.as_deref(), &title);

        out.push(RawItem {
            id,
            title,
            body: entry.content.and_then(|c| c.text).unwrap_or_default(),
            feed: feed.to_string(),
            url: link,
            author: entry
                .author
                .and_then(|a| a.name)
                .map(|n| n.trim_start_matches("/u/").trim().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            published_at: entry
                .published
                .or(entry.updated)
                .as_deref()
                .map(parse_rfc3339_to_unix)
                .unwrap_or(0),
            fetched_at,
        });
    }
    Ok(out)
}

/// Stable post id: the `t3_` payload when present, the `/comments/<id>/`
/// path segment as fallback, and a content hash as the last resort.
fn extract_item_id(id: Option<&str>, link: Option<&str>, title: &str) -> String {
    if let Some(raw) = id {
        if let Some(stripped) = raw.strip_prefix("t3_") {
            return stripped.to_string();
        }
        if !raw.is_empty() {
            return raw.to_string();
        }
    }
    if let Some(link) = link {
        if let Some(seg) = link
            .split("/comments/")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
        {
            if !seg.is_empty() {
                return seg.to_string();
            }
        }
    }
    let digest = Sha256::digest(link.unwrap_or(title).as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

fn parse_rfc3339_to_unix(ts: &str) -> u64 {
    OffsetDateTime::parse(ts, &Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp())
        .and_then(|x| u64::try_from(x).ok())
        .unwrap_or(0)
}

fn root_element_name(xml: &str) -> Option<String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    loop {
        match reader.read_event().ok()? {
            quick_xml::events::Event::Start(e) | quick_xml::events::Event::Empty(e) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            quick_xml::events::Event::Eof => return None,
            _ => {}
        }
    }
}

/// HTML entities that are legal in feeds but not in bare XML.
fn scrub_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
