//! Message and draft counts from the participants cell.
//!
//! The host renders a thread's participants as `Alice, Bob (3) Draft (2)`: names inside
//! spans, the message count in parentheses, then a coloured draft marker followed by an
//! optional draft count.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::host::Contact;

static DRAFT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<font color=[^>]+>[^>]+</font>").expect("valid regex"));
static NAME_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<span\b[^>]*>.*?</span>").expect("valid regex"));
static COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d+)\)").expect("valid regex"));

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadCounts {
    pub message_count: u32,
    pub draft_count: u32,
}

fn parenthesized_count(text: &str) -> Option<u32> {
    COUNT
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|count| count.as_str().parse().ok())
}

pub fn parse_counts(participants_html: &str) -> ThreadCounts {
    let mut parts = DRAFT_MARKER.split(participants_html);
    let before_drafts = parts.next().unwrap_or_default();
    let drafts = parts.next();

    let without_names = NAME_SPAN.replace_all(before_drafts, "");
    let message_count = parenthesized_count(&without_names)
        .unwrap_or(if before_drafts.is_empty() { 0 } else { 1 });
    let draft_count = match drafts {
        Some(drafts) => parenthesized_count(drafts).unwrap_or(1),
        None => 0,
    };
    ThreadCounts {
        message_count,
        draft_count,
    }
}

/// First occurrence of each email address wins.
pub fn unique_contacts(contacts: Vec<Contact>) -> Vec<Contact> {
    let mut seen = HashSet::new();
    contacts
        .into_iter()
        .filter(|contact| seen.insert(contact.email_address.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_message_without_count() {
        let counts = parse_counts(r#"<span email="a@x.com">Alice</span>"#);
        assert_eq!(counts, ThreadCounts { message_count: 1, draft_count: 0 });
    }

    #[test]
    fn names_do_not_leak_into_the_message_count() {
        let html = r#"<span name="Bob (2)">Bob (2)</span>, <span>me</span> (4)"#;
        assert_eq!(parse_counts(html).message_count, 4);
    }

    #[test]
    fn draft_marker_with_and_without_count() {
        let with_count = r##"<span>Alice</span> (3) <font color="#DD4B39">Draft</font> (2)"##;
        assert_eq!(
            parse_counts(with_count),
            ThreadCounts { message_count: 3, draft_count: 2 }
        );

        let bare = r##"<span>Alice</span><font color="#DD4B39">Draft</font>"##;
        assert_eq!(
            parse_counts(bare),
            ThreadCounts { message_count: 1, draft_count: 1 }
        );
    }

    #[test]
    fn only_a_draft() {
        let html = r##"<font color="#DD4B39">Draft</font>"##;
        assert_eq!(parse_counts(html), ThreadCounts { message_count: 0, draft_count: 1 });
    }

    #[test]
    fn contacts_are_unique_by_address() {
        let contacts = vec![
            Contact { email_address: "a@x.com".into(), name: Some("Alice".into()) },
            Contact { email_address: "b@x.com".into(), name: None },
            Contact { email_address: "a@x.com".into(), name: Some("Alice Again".into()) },
        ];
        let unique = unique_contacts(contacts);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].name.as_deref(), Some("Alice"));
    }
}
