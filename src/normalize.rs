//! Turn melib envelopes into [`NormalizedMessage`]s.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use melib::backends::TagHash;
use melib::email::attachment_types::{ContentType, Text};
use melib::email::attachments::Attachment;
use melib::email::{Envelope, Flag};

use crate::connector::ProviderDialect;
use crate::models::{
    Address, NormalizedMessage, FLAG_ANSWERED, FLAG_DELETED, FLAG_DRAFT, FLAG_FLAGGED,
    FLAG_FORWARDED, FLAG_SEEN,
};

const FLAG_NAMES: [(Flag, &str); 6] = [
    (Flag::SEEN, FLAG_SEEN),
    (Flag::FLAGGED, FLAG_FLAGGED),
    (Flag::REPLIED, FLAG_ANSWERED),
    (Flag::DRAFT, FLAG_DRAFT),
    (Flag::TRASHED, FLAG_DELETED),
    (Flag::PASSED, FLAG_FORWARDED),
];

/// Names of the system flags set in `flag`.
pub fn flag_names(flag: Flag) -> BTreeSet<String> {
    FLAG_NAMES
        .iter()
        .filter(|(bit, _)| flag.contains(*bit))
        .map(|(_, name)| (*name).to_string())
        .collect()
}

/// Keyword names by tag hash, as the backend resolved them.
pub type TagNames = BTreeMap<TagHash, String>;

/// Names of the keywords (`$Work`, `$Label1`, ...) carried by `envelope`.
/// Tags the backend never named are skipped.
pub fn keyword_names(envelope: &Envelope, tags: &TagNames) -> BTreeSet<String> {
    envelope
        .tags()
        .iter()
        .filter_map(|hash| tags.get(hash).cloned())
        .collect()
}

/// Split flag names into melib system flags and free-form keywords.
pub fn flags_from_names<'a>(names: impl IntoIterator<Item = &'a String>) -> (Flag, Vec<String>) {
    let mut flag = Flag::empty();
    let mut keywords = Vec::new();
    for name in names {
        let lower = name.trim_start_matches('\\').to_ascii_lowercase();
        match FLAG_NAMES.iter().find(|(_, n)| *n == lower) {
            Some((bit, _)) => flag |= *bit,
            None => keywords.push(name.clone()),
        }
    }
    (flag, keywords)
}

/// Canonical provider id: the Message-ID without angle brackets.
pub fn canonical_message_id(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

/// Build the canonical message from an envelope and, when fetched, its raw bytes.
pub fn normalize_envelope(
    envelope: &Envelope,
    bytes: Option<&[u8]>,
    folder: &str,
    dialect: &ProviderDialect,
    tags: &TagNames,
) -> NormalizedMessage {
    let mut provider_id = canonical_message_id(&envelope.message_id().to_string());
    if provider_id.is_empty() {
        // No Message-ID header; fall back to the backend's content hash.
        provider_id = format!("{:?}-{}", dialect.kind, envelope.hash().0);
    }

    let (text, html) = match bytes {
        Some(bytes) => extract_body(&envelope.body_bytes(bytes)),
        None => (None, None),
    };
    let text = match (text, html.as_deref()) {
        (Some(text), _) => Some(text),
        (None, Some(html)) => Some(crate::render::html_to_text(html)),
        (None, None) => None,
    };

    let mut flags = flag_names(envelope.flags());
    flags.extend(keyword_names(envelope, tags));

    NormalizedMessage {
        provider_id,
        from: envelope.from().iter().map(to_address).collect(),
        to: envelope.to().iter().map(to_address).collect(),
        subject: envelope.subject().to_string(),
        html,
        text,
        date: DateTime::<Utc>::from_timestamp(envelope.timestamp as i64, 0).unwrap_or_default(),
        flags,
        folder: folder.to_string(),
        labels: BTreeSet::from([folder.to_string()]),
    }
}

fn to_address(addr: &melib::email::Address) -> Address {
    Address {
        address: addr.get_email(),
        name: addr.get_display_name().filter(|n| !n.trim().is_empty()),
    }
}

/// Walk the MIME tree and collect inline text/plain and text/html parts.
fn extract_body(att: &Attachment) -> (Option<String>, Option<String>) {
    let mut text_plain = None;
    let mut text_html = None;
    extract_parts(att, &mut text_plain, &mut text_html);
    (text_plain, text_html)
}

fn extract_parts(att: &Attachment, plain: &mut Option<String>, html: &mut Option<String>) {
    match &att.content_type {
        ContentType::Text { kind, .. } if !att.content_disposition.kind.is_attachment() => {
            let target = match kind {
                Text::Plain => plain,
                Text::Html => html,
                _ => return,
            };
            let bytes = att.decode(Default::default());
            let text = String::from_utf8_lossy(&bytes);
            if !text.trim().is_empty() {
                *target = Some(target.take().unwrap_or_default() + &text);
            }
        }
        ContentType::Multipart { parts, .. } => {
            for part in parts {
                extract_parts(part, plain, html);
            }
        }
        _ => {}
    }
}
