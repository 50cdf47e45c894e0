//! Telegram Bot API client.
//!
//! Covers the three calls the gate needs: long polling for updates,
//! sending plain-text replies, and creating constrained invite links.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const TELEGRAM_API_BASE_URL: &str = "https://api.telegram.org";

/// Request timeout applied on top of the long-poll window.
const POLL_GRACE_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Error types for plain Bot API calls.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("http error: {0}")]
    Http(String),
    #[error("telegram api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("unexpected response: {0}")]
    Parse(String),
}

/// Invite creation failures, classified so the user-facing diagnostic can
/// be composed deterministically.
#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    #[error("bot lacks invite permissions: {0}")]
    PermissionDenied(String),
    #[error("target chat not usable: {0}")]
    BadTarget(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invite creation failed: {0}")]
    Unknown(String),
}

// ============================================================================
// Bot API types
// ============================================================================

/// Update from getUpdates.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    /// Unique update identifier
    pub update_id: i64,
    /// New incoming message
    pub message: Option<Message>,
}

/// Message from Telegram.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub message_id: i64,
    /// Sender of the message
    pub from: Option<User>,
    /// Chat the message belongs to
    pub chat: Chat,
    /// Date the message was sent (Unix timestamp)
    pub date: i64,
    /// Text content of the message
    pub text: Option<String>,
}

/// Telegram user.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: i64,
    /// Whether the user is a bot
    pub is_bot: bool,
    /// User's first name
    pub first_name: Option<String>,
    /// User's last name
    pub last_name: Option<String>,
    /// User's username
    pub username: Option<String>,
}

/// Telegram chat.
#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    /// Unique identifier
    pub id: i64,
    /// Type of chat: "private", "group", "supergroup", or "channel"
    #[serde(rename = "type")]
    pub chat_type: String,
}

/// Invite link returned by createChatInviteLink.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatInviteLink {
    /// The invite link itself
    pub invite_link: String,
    /// Name given to the link at creation
    pub name: Option<String>,
}

/// Response envelope from the Bot API.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateInviteLinkRequest<'a> {
    chat_id: i64,
    member_limit: u32,
    expire_date: i64,
    creates_join_request: bool,
    name: &'a str,
}

// ============================================================================
// Client
// ============================================================================

/// Client for the Bot API, authenticated by the bot token in the URL path.
#[derive(Clone)]
pub struct TelegramClient {
    bot_token: String,
    base_url: String,
    http: reqwest::Client,
}

impl TelegramClient {
    pub fn new(bot_token: String) -> Self {
        Self::with_base_url(bot_token, TELEGRAM_API_BASE_URL.to_string())
    }

    /// Point the client at a different API host. For tests.
    pub fn with_base_url(bot_token: String, base_url: String) -> Self {
        Self {
            bot_token,
            base_url,
            http: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }

    /// Long-poll for new message updates.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout_secs,
            allowed_updates: ["message"],
        };
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                &request,
                Duration::from_secs(timeout_secs + POLL_GRACE_SECS),
            )
            .await?;
        Ok(updates)
    }

    /// Send a plain-text message to a chat.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let request = SendMessageRequest { chat_id, text };
        let _sent: Message = self
            .call(
                "sendMessage",
                &request,
                Duration::from_secs(REQUEST_TIMEOUT_SECS),
            )
            .await?;
        Ok(())
    }

    /// Create a single-use invite link: one joining member, a hard expiry,
    /// direct join without approval.
    pub async fn create_invite_link(
        &self,
        chat_id: i64,
        expire_date: i64,
        name: &str,
    ) -> Result<ChatInviteLink, InviteError> {
        let request = CreateInviteLinkRequest {
            chat_id,
            member_limit: 1,
            expire_date,
            creates_join_request: false,
            name,
        };
        self.call(
            "createChatInviteLink",
            &request,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )
        .await
        .map_err(classify_invite_error)
    }

    async fn call<Req, Resp>(
        &self,
        method: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Resp, TelegramError>
    where
        Req: Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let url = self.api_url(method);
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| TelegramError::Http(e.to_string()))?;

        let envelope: ApiResponse<Resp> = response
            .json()
            .await
            .map_err(|e| TelegramError::Parse(e.to_string()))?;

        if !envelope.ok {
            return Err(TelegramError::Api {
                code: envelope.error_code.unwrap_or(0),
                description: envelope
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        envelope
            .result
            .ok_or_else(|| TelegramError::Parse(format!("{method}: ok response without result")))
    }
}

/// Map a Bot API failure onto the invite error taxonomy.
fn classify_invite_error(err: TelegramError) -> InviteError {
    match err {
        TelegramError::Http(msg) => InviteError::Transport(msg),
        TelegramError::Api { code, description } => {
            let lowered = description.to_ascii_lowercase();
            if code == 403 || lowered.contains("not enough rights") {
                InviteError::PermissionDenied(description)
            } else if lowered.contains("chat not found")
                || lowered.contains("chat_id is empty")
                || lowered.contains("group chat was upgraded")
            {
                InviteError::BadTarget(description)
            } else {
                InviteError::Unknown(format!("{code}: {description}"))
            }
        }
        TelegramError::Parse(msg) => InviteError::Unknown(msg),
    }
}

/// First and last name space-joined, omitting absent parts.
pub fn full_name(user: &User) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(first) = user.first_name.as_deref() {
        parts.push(first);
    }
    if let Some(last) = user.last_name.as_deref() {
        parts.push(last);
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(first: Option<&str>, last: Option<&str>) -> User {
        User {
            id: 1,
            is_bot: false,
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            username: None,
        }
    }

    #[test]
    fn full_name_joins_present_parts() {
        assert_eq!(full_name(&user(Some("Ada"), Some("Lovelace"))), "Ada Lovelace");
        assert_eq!(full_name(&user(Some("Ada"), None)), "Ada");
        assert_eq!(full_name(&user(None, Some("Lovelace"))), "Lovelace");
        assert_eq!(full_name(&user(None, None)), "");
    }

    #[test]
    fn forbidden_status_maps_to_permission_denied() {
        let err = classify_invite_error(TelegramError::Api {
            code: 403,
            description: "Forbidden: bot is not a member of the supergroup chat".to_string(),
        });
        assert!(matches!(err, InviteError::PermissionDenied(_)));
    }

    #[test]
    fn missing_rights_maps_to_permission_denied() {
        let err = classify_invite_error(TelegramError::Api {
            code: 400,
            description: "Bad Request: not enough rights to manage chat invite links".to_string(),
        });
        assert!(matches!(err, InviteError::PermissionDenied(_)));
    }

    #[test]
    fn chat_not_found_maps_to_bad_target() {
        let err = classify_invite_error(TelegramError::Api {
            code: 400,
            description: "Bad Request: chat not found".to_string(),
        });
        assert!(matches!(err, InviteError::BadTarget(_)));
    }

    #[test]
    fn network_failure_maps_to_transport() {
        let err = classify_invite_error(TelegramError::Http("connection reset".to_string()));
        assert!(matches!(err, InviteError::Transport(_)));
    }

    #[test]
    fn anything_else_maps_to_unknown() {
        let err = classify_invite_error(TelegramError::Api {
            code: 420,
            description: "Flood control exceeded".to_string(),
        });
        assert!(matches!(err, InviteError::Unknown(_)));
    }

    #[test]
    fn parse_update_with_text_message() {
        let payload = r#"{
            "update_id": 123456789,
            "message": {
                "message_id": 1,
                "from": {
                    "id": 12345,
                    "is_bot": false,
                    "first_name": "Ada",
                    "username": "ada"
                },
                "chat": {
                    "id": 12345,
                    "type": "private"
                },
                "date": 1234567890,
                "text": "/start"
            }
        }"#;

        let update: Update = serde_json::from_str(payload).unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.chat.chat_type, "private");
        assert_eq!(message.text.as_deref(), Some("/start"));
        assert_eq!(message.from.unwrap().id, 12345);
    }
}
