use std::fmt;

use serde::{Deserialize, Serialize};

use crate::host::RowMetadata;

/// Metadata key two rows must share to be considered the same thread.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    subject: String,
    time_label: String,
    participants: String,
}

impl Fingerprint {
    pub fn new(subject: &str, time_label: &str, participants: &str) -> Self {
        Self {
            subject: subject.trim().to_string(),
            time_label: time_label.trim().to_string(),
            participants: normalize_participants(participants),
        }
    }

    pub fn from_metadata(metadata: &RowMetadata) -> Self {
        Self::new(
            &metadata.subject,
            &metadata.time_label,
            &metadata.participants,
        )
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn time_label(&self) -> &str {
        &self.time_label
    }

    pub fn participants(&self) -> &str {
        &self.participants
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.subject, self.time_label, self.participants)
    }
}

/// Participant lines differ in whitespace between the list markup and list data.
fn normalize_participants(participants: &str) -> String {
    participants.split_whitespace().collect::<Vec<_>>().join(" ")
}
