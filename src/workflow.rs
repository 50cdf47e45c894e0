//! Submission workflow: the conversation state machine and the admission
//! procedure.
//!
//! Each incoming update is handled by one task. A conversation holds at
//! most one piece of state (awaiting the email); the admission procedure
//! runs once per valid submission and orders its side effects so a row is
//! only ever written for a submission that produced a real invite.

use std::sync::OnceLock;

use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use regex::Regex;
use tracing::{info, warn};

use crate::config::BotConfig;
use crate::session::SessionStore;
use crate::sheets::{SheetsClient, SheetsError, USER_ID_COLUMN};
use crate::telegram::{full_name, InviteError, Message, TelegramClient, TelegramError, Update, User};

const START_PROMPT: &str =
    "To get access, reply with the email address you use for Patreon.\n\nNote: you can only submit once.";
const DM_REDIRECT: &str = "Please DM me to get access.";
const INVALID_EMAIL_PROMPT: &str =
    "That doesn't look like a valid email. Please try again (example: name@gmail.com).";
const DUPLICATE_REJECTION: &str =
    "You've already submitted your details, so I can't accept another entry.\nIf you need help, message the admin.";
const CANCELLED: &str = "Cancelled. You can restart with /start.";
const ADMISSION_BUSY: &str = "I'm still working on your previous submission. Hang tight.";

/// Orchestrates conversations between the chat platform, the record
/// store, and the invite issuer.
pub struct Workflow {
    config: BotConfig,
    telegram: TelegramClient,
    sheets: SheetsClient,
    sessions: SessionStore,
}

impl Workflow {
    pub fn new(config: BotConfig, telegram: TelegramClient, sheets: SheetsClient) -> Self {
        Self {
            config,
            telegram,
            sheets,
            sessions: SessionStore::default(),
        }
    }

    /// Handle one update. Failures end up as a user-facing reply or a log
    /// line; nothing propagates out of the per-update task.
    pub async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text.clone() else {
            return;
        };

        let outcome = match command(&text) {
            Some("start") => self.handle_start(&message).await,
            Some("cancel") => self.handle_cancel(&message).await,
            // Other commands are not ours
            Some(_) => Ok(()),
            None => self.handle_text(&message, text.trim()).await,
        };

        if let Err(err) = outcome {
            warn!("failed to reply in chat {}: {}", message.chat.id, err);
        }
    }

    async fn handle_start(&self, message: &Message) -> Result<(), TelegramError> {
        let chat_id = message.chat.id;
        // Only allow DM use
        if message.chat.chat_type != "private" {
            return self.telegram.send_message(chat_id, DM_REDIRECT).await;
        }
        let Some(user) = message.from.as_ref() else {
            return Ok(());
        };

        self.sessions.begin(chat_id, user.id);
        info!("conversation started for user {} in chat {}", user.id, chat_id);
        self.telegram.send_message(chat_id, START_PROMPT).await
    }

    async fn handle_cancel(&self, message: &Message) -> Result<(), TelegramError> {
        // Only an active conversation gets a confirmation
        if self.sessions.end(message.chat.id).is_none() {
            return Ok(());
        }
        self.telegram.send_message(message.chat.id, CANCELLED).await
    }

    async fn handle_text(&self, message: &Message, text: &str) -> Result<(), TelegramError> {
        let chat_id = message.chat.id;
        // Text outside an active conversation is not ours to answer
        if self.sessions.awaiting(chat_id).is_none() {
            return Ok(());
        }
        if message.chat.chat_type != "private" {
            self.sessions.end(chat_id);
            return Ok(());
        }
        let Some(user) = message.from.as_ref() else {
            return Ok(());
        };

        if !is_valid_email(text) {
            return self.telegram.send_message(chat_id, INVALID_EMAIL_PROMPT).await;
        }

        // Whatever the admission outcome, the conversation ends here
        self.sessions.end(chat_id);
        self.run_admission(chat_id, user, text).await
    }

    /// Dedup check, invite issuance, record append, in that order. Each
    /// step is a hard dependency on the previous one succeeding.
    async fn run_admission(
        &self,
        chat_id: i64,
        user: &User,
        email: &str,
    ) -> Result<(), TelegramError> {
        let Some(_slot) = self.sessions.try_begin_admission(user.id) else {
            return self.telegram.send_message(chat_id, ADMISSION_BUSY).await;
        };

        if let Err(err) = self.sheets.ensure_initialized().await {
            warn!("sheet init failed for user {}: {}", user.id, err);
            return self
                .telegram
                .send_message(chat_id, &records_failure_text(&err))
                .await;
        }

        let existing = match self.sheets.read_column(USER_ID_COLUMN).await {
            Ok(values) => values,
            Err(err) => {
                warn!("dedup read failed for user {}: {}", user.id, err);
                return self
                    .telegram
                    .send_message(chat_id, &records_failure_text(&err))
                    .await;
            }
        };
        let user_id = user.id.to_string();
        if existing.iter().any(|value| value == &user_id) {
            info!("duplicate submission from user {}", user.id);
            return self.telegram.send_message(chat_id, DUPLICATE_REJECTION).await;
        }

        let now = Utc::now();
        let expire_date =
            (now + ChronoDuration::minutes(self.config.invite_expire_minutes)).timestamp();
        let name = invite_name(user.id, now.timestamp());
        let invite = match self
            .telegram
            .create_invite_link(self.config.group_chat_id, expire_date, &name)
            .await
        {
            Ok(link) => link,
            Err(err) => {
                warn!("invite creation failed for user {}: {}", user.id, err);
                // No row is appended on this path; the user stays unrecorded
                // and may retry with /start.
                return self
                    .telegram
                    .send_message(chat_id, &invite_failure_text(&err))
                    .await;
            }
        };

        let row = submission_row(user, email, &invite.invite_link);
        if let Err(err) = self.sheets.append_row(&row).await {
            warn!("record append failed for user {}: {}", user.id, err);
            return self
                .telegram
                .send_message(chat_id, &append_failure_text(&invite.invite_link, &err))
                .await;
        }

        info!("admitted user {}", user.id);
        self.telegram
            .send_message(chat_id, &success_text(&invite.invite_link))
            .await
    }
}

/// Extract the command name from a message, tolerating bot-name suffixes
/// ("/start@MyBot") and trailing arguments.
fn command(text: &str) -> Option<&str> {
    let rest = text.trim().strip_prefix('/')?;
    let token = rest.split_whitespace().next().unwrap_or("");
    let name = token.split('@').next().unwrap_or(token);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

/// Syntactic email check, case-insensitive. Not a deliverability check.
pub fn is_valid_email(text: &str) -> bool {
    let re = EMAIL_RE.get_or_init(|| {
        Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").expect("email pattern compiles")
    });
    re.is_match(text)
}

/// Invite link name, unique across concurrent requests.
fn invite_name(user_id: i64, unix_now: i64) -> String {
    format!("patreon_gate_{}_{}", user_id, unix_now)
}

/// The six-column submission record, timestamp generated at append time.
fn submission_row(user: &User, email: &str, invite_link: &str) -> Vec<String> {
    vec![
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false),
        user.id.to_string(),
        user.username.clone().unwrap_or_default(),
        full_name(user),
        email.to_string(),
        invite_link.to_string(),
    ]
}

fn records_failure_text(err: &SheetsError) -> String {
    format!(
        "I couldn't reach the submission records. Please try again later.\n\nError: {}",
        err
    )
}

fn invite_failure_text(err: &InviteError) -> String {
    format!(
        "I couldn't create an invite link. Common causes:\n\
         • bot is not an admin in the group\n\
         • bot lacks permission to manage invite links\n\
         • GROUP_CHAT_ID is wrong (supergroups often start with -100...)\n\n\
         Error: {}",
        err
    )
}

fn append_failure_text(invite_link: &str, err: &SheetsError) -> String {
    format!(
        "Your invite link was created, but I couldn't record the submission:\n\n{}\n\nError: {}",
        invite_link, err
    )
}

fn success_text(invite_link: &str) -> String {
    format!(
        "Thanks! Here's your one-time join link (single use, expires soon):\n\n{}",
        invite_link
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_pattern_accepts_plain_addresses() {
        for candidate in [
            "name@example.com",
            "NAME@EXAMPLE.COM",
            "first.last+tag@sub.domain-name.co",
            "a_b%c@d.io",
        ] {
            assert!(is_valid_email(candidate), "should accept {candidate}");
        }
    }

    #[test]
    fn email_pattern_rejects_malformed_input() {
        for candidate in [
            "",
            "not-an-email",
            "name@",
            "@example.com",
            "name@example",
            "name@example.c",
            "name example@example.com",
            "name@exam ple.com",
        ] {
            assert!(!is_valid_email(candidate), "should reject {candidate}");
        }
    }

    #[test]
    fn command_parsing_handles_suffixes_and_arguments() {
        assert_eq!(command("/start"), Some("start"));
        assert_eq!(command("/start@MyGateBot"), Some("start"));
        assert_eq!(command("/cancel please"), Some("cancel"));
        assert_eq!(command("  /cancel  "), Some("cancel"));
        assert_eq!(command("name@example.com"), None);
        assert_eq!(command("/"), None);
    }

    #[test]
    fn invite_names_differ_per_user_and_time() {
        assert_eq!(invite_name(42, 1_700_000_000), "patreon_gate_42_1700000000");
        assert_ne!(invite_name(42, 1), invite_name(42, 2));
        assert_ne!(invite_name(42, 1), invite_name(43, 1));
    }

    #[test]
    fn submission_row_has_six_literal_columns() {
        let user = User {
            id: 42,
            is_bot: false,
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            username: Some("ada".to_string()),
        };
        let row = submission_row(&user, "ada@example.com", "https://t.me/+abc");
        assert_eq!(row.len(), 6);
        assert_eq!(row[1], "42");
        assert_eq!(row[2], "ada");
        assert_eq!(row[3], "Ada Lovelace");
        assert_eq!(row[4], "ada@example.com");
        assert_eq!(row[5], "https://t.me/+abc");
        // Second-precision UTC timestamp, no fractional part
        assert!(row[0].ends_with("+00:00"));
        assert!(!row[0].contains('.'));
    }

    #[test]
    fn submission_row_tolerates_missing_optional_fields() {
        let user = User {
            id: 7,
            is_bot: false,
            first_name: Some("Ada".to_string()),
            last_name: None,
            username: None,
        };
        let row = submission_row(&user, "ada@example.com", "link");
        assert_eq!(row[2], "");
        assert_eq!(row[3], "Ada");
    }

    #[test]
    fn invite_diagnostic_names_the_likely_causes() {
        let text = invite_failure_text(&InviteError::PermissionDenied(
            "not enough rights".to_string(),
        ));
        assert!(text.contains("not an admin"));
        assert!(text.contains("manage invite links"));
        assert!(text.contains("-100"));
        assert!(text.contains("not enough rights"));
    }
}
