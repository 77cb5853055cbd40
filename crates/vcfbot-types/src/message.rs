//! Inbound message envelopes and their normalized form.

use crate::jid;
use serde::{Deserialize, Serialize};

/// Identifies one message within a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub id: Option<String>,
    /// Author of a group message.
    #[serde(default)]
    pub participant: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptionedMedia {
    #[serde(default)]
    pub caption: Option<String>,
}

/// Content of a message; exactly one field is normally populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_message: Option<CaptionedMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_message: Option<CaptionedMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_message: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_message: Option<serde_json::Value>,
    /// Content types this crate does not interpret.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// Keys that carry metadata rather than content.
const METADATA_KEYS: &[&str] = &["messageContextInfo", "senderKeyDistributionMessage"];

impl MessageContent {
    /// Name of the populated content field, in wire spelling.
    pub fn content_type(&self) -> Option<&str> {
        if self.conversation.is_some() {
            Some("conversation")
        } else if self.extended_text_message.is_some() {
            Some("extendedTextMessage")
        } else if self.image_message.is_some() {
            Some("imageMessage")
        } else if self.video_message.is_some() {
            Some("videoMessage")
        } else if self.protocol_message.is_some() {
            Some("protocolMessage")
        } else if self.ephemeral_message.is_some() {
            Some("ephemeralMessage")
        } else {
            self.other
                .keys()
                .map(String::as_str)
                .find(|k| !METADATA_KEYS.contains(k))
        }
    }

    /// Protocol and ephemeral control messages never reach the dispatcher.
    pub fn is_control(&self) -> bool {
        self.protocol_message.is_some() || self.ephemeral_message.is_some()
    }

    /// Text from the plain, extended or caption field, else empty.
    pub fn text(&self) -> String {
        let text = match self.content_type() {
            Some("conversation") => self.conversation.clone(),
            Some("extendedTextMessage") => self
                .extended_text_message
                .as_ref()
                .and_then(|m| m.text.clone()),
            Some("imageMessage") => self.image_message.as_ref().and_then(|m| m.caption.clone()),
            Some("videoMessage") => self.video_message.as_ref().and_then(|m| m.caption.clone()),
            _ => None,
        };
        text.unwrap_or_default()
    }
}

/// Raw inbound message as delivered by the protocol client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    #[serde(default)]
    pub key: Option<MessageKey>,
    #[serde(default)]
    pub message: Option<MessageContent>,
    #[serde(default)]
    pub push_name: Option<String>,
}

/// Message shape the command dispatcher works on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    /// Conversation the message arrived in.
    pub chat: String,
    /// Author; the account's canonical address for its own messages.
    pub sender: String,
    pub from_me: bool,
    pub is_group: bool,
    pub content_type: String,
    pub text: String,
    pub push_name: Option<String>,
    /// Original key, used to quote the message in replies.
    pub key: MessageKey,
}

impl InboundEnvelope {
    /// Normalize for dispatch.
    ///
    /// `own_user_id` is the session account's id (may carry a device suffix).
    /// Returns `None` for envelopes without content or a chat, and for
    /// protocol/ephemeral control messages.
    pub fn normalize(&self, own_user_id: &str) -> Option<NormalizedMessage> {
        let key = self.key.as_ref()?;
        let content = self.message.as_ref()?;
        let chat = key.remote_jid.clone()?;
        if content.is_control() {
            return None;
        }

        let sender = if key.from_me {
            jid::own_user_jid(own_user_id)
        } else {
            key.participant
                .as_deref()
                .map(jid::decode_jid)
                .unwrap_or_else(|| chat.clone())
        };

        Some(NormalizedMessage {
            is_group: jid::is_group(&chat),
            chat,
            sender,
            from_me: key.from_me,
            content_type: content.content_type().unwrap_or_default().to_string(),
            text: content.text(),
            push_name: self.push_name.clone(),
            key: key.clone(),
        })
    }
}
