use crate::model::{GuildConfig, HistoryRecord, MessageCandidate, MessageKind};

/// Decides whether an observed message belongs in the replay pool.
///
/// Built once per ingestion run from the guild config and its disabled
/// substrings, then shared read-only by every path that stores messages.
#[derive(Debug, Clone)]
pub struct StorabilityFilter {
    target_user_id: Option<u64>,
    can_embed: bool,
    disabled_substrings: Vec<String>,
}

impl StorabilityFilter {
    pub fn new(config: &GuildConfig, disabled_substrings: Vec<String>) -> Self {
        Self {
            target_user_id: config.target_user_id,
            can_embed: config.can_embed,
            disabled_substrings: disabled_substrings
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn is_storable(&self, record: &HistoryRecord) -> bool {
        let Some(target) = self.target_user_id else {
            return false;
        };
        if record.author_id != target {
            return false;
        }
        if !self.can_embed && record.has_embeds_or_attachments() {
            return false;
        }
        !self
            .disabled_substrings
            .iter()
            .any(|s| record.content.contains(s.as_str()))
    }

    /// Filters and converts in one step.
    pub fn candidate(&self, record: &HistoryRecord) -> Option<MessageCandidate> {
        self.is_storable(record).then(|| to_candidate(record))
    }
}

/// Converts a record into its replay payload.
///
/// Sticker messages replay as their sticker ids; everything else as the text
/// with attachment and embed URLs appended.
pub fn to_candidate(record: &HistoryRecord) -> MessageCandidate {
    if !record.sticker_ids.is_empty() {
        let text = serde_json::to_string(&record.sticker_ids).unwrap_or_else(|_| "[]".to_string());
        return MessageCandidate {
            message_id: record.id,
            kind: MessageKind::Sticker,
            text,
        };
    }

    let mut text = record.content.clone();
    let urls: Vec<&str> = record
        .attachment_urls
        .iter()
        .chain(record.embed_urls.iter())
        .map(|u| u.as_str())
        .filter(|u| !u.is_empty())
        .collect();
    if !urls.is_empty() {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&urls.join(" "));
    }

    MessageCandidate {
        message_id: record.id,
        kind: MessageKind::Raw,
        text,
    }
}

/// Parses a sticker payload produced by [`to_candidate`].
pub fn sticker_ids(text: &str) -> serde_json::Result<Vec<u64>> {
    serde_json::from_str(text)
}
