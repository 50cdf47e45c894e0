//! Google Sheets record store for submission rows.
//!
//! The sheet is append-only: the first row is a fixed header and every
//! admitted submission adds exactly one row below it. Uniqueness of
//! `telegram_user_id` is enforced by the caller, not at this layer.

use serde::Deserialize;
use tracing::{error, info};

use crate::google_auth::{GoogleAuth, GoogleAuthError};

pub const SHEETS_API_BASE_URL: &str = "https://sheets.googleapis.com";

/// Worksheet tab holding the submission table.
pub const SHEET_TAB: &str = "sheet1";

/// Fixed header row, in column order.
pub const HEADER: [&str; 6] = [
    "timestamp_utc",
    "telegram_user_id",
    "telegram_username",
    "telegram_full_name",
    "patreon_email",
    "invite_link_created",
];

/// Column used for the dedup check.
pub const USER_ID_COLUMN: &str = "telegram_user_id";

/// Position of `telegram_user_id` when the header row is unrecognized.
const USER_ID_FALLBACK_INDEX: usize = 1;

/// Error types for sheet access. All of them are fatal for the current
/// request; there is no retry at this layer.
#[derive(Debug, thiserror::Error)]
pub enum SheetsError {
    #[error("auth error: {0}")]
    Auth(#[from] GoogleAuthError),
    #[error("http error: {0}")]
    Http(String),
    #[error("sheets api error HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Parse(String),
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Client for one spreadsheet, addressed by its opaque identifier.
#[derive(Clone)]
pub struct SheetsClient {
    auth: GoogleAuth,
    sheet_id: String,
    base_url: String,
    http: reqwest::Client,
}

impl SheetsClient {
    pub fn new(auth: GoogleAuth, sheet_id: String) -> Self {
        Self::with_base_url(auth, sheet_id, SHEETS_API_BASE_URL.to_string())
    }

    /// Point the client at a different API host. For tests.
    pub fn with_base_url(auth: GoogleAuth, sheet_id: String, base_url: String) -> Self {
        Self {
            auth,
            sheet_id,
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Open the sheet and write the header row if the tab is empty.
    /// Idempotent across calls.
    pub async fn ensure_initialized(&self) -> Result<(), SheetsError> {
        let first_row = self.read_range(&format!("{SHEET_TAB}!1:1")).await?;
        if first_row.is_empty() {
            let header: Vec<String> = HEADER.iter().map(|s| s.to_string()).collect();
            self.append_row(&header).await?;
            info!("created header row in sheet {}", self.sheet_id);
        }
        Ok(())
    }

    /// Read all values of a column, excluding the header row. The header
    /// resolves the column name to an index; if the name is absent the
    /// fixed position of `telegram_user_id` is used instead.
    pub async fn read_column(&self, name: &str) -> Result<Vec<String>, SheetsError> {
        let header = self.read_range(&format!("{SHEET_TAB}!1:1")).await?;
        let index = header
            .first()
            .and_then(|row| row.iter().position(|cell| cell == name))
            .unwrap_or(USER_ID_FALLBACK_INDEX);
        let letter = column_letter(index)?;
        let rows = self
            .read_range(&format!("{SHEET_TAB}!{letter}2:{letter}"))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    /// Append one row of literal values. `RAW` input keeps the values
    /// out of formula interpretation.
    pub async fn append_row(&self, values: &[String]) -> Result<(), SheetsError> {
        let token = self.auth.get_access_token().await?;
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
            self.base_url, self.sheet_id, SHEET_TAB
        );
        let payload = serde_json::json!({ "values": [values] });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SheetsError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("append to sheet {} failed: {} - {}", self.sheet_id, status, body);
            return Err(SheetsError::Api { status, body });
        }
        Ok(())
    }

    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        let token = self.auth.get_access_token().await?;
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url, self.sheet_id, range
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| SheetsError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("read of {} from sheet {} failed: {} - {}", range, self.sheet_id, status, body);
            return Err(SheetsError::Api { status, body });
        }

        let value_range: ValueRange = response
            .json()
            .await
            .map_err(|e| SheetsError::Parse(e.to_string()))?;
        Ok(value_range.values)
    }
}

fn column_letter(index: usize) -> Result<char, SheetsError> {
    // The submission table is six columns wide; anything past Z means the
    // header row is not ours.
    if index < 26 {
        Ok((b'A' + index as u8) as char)
    } else {
        Err(SheetsError::Parse(format!(
            "column index {index} out of range"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_matches_table_layout() {
        assert_eq!(HEADER.len(), 6);
        assert_eq!(HEADER[USER_ID_FALLBACK_INDEX], USER_ID_COLUMN);
    }

    #[test]
    fn column_letters_cover_the_table() {
        assert_eq!(column_letter(0).unwrap(), 'A');
        assert_eq!(column_letter(1).unwrap(), 'B');
        assert_eq!(column_letter(5).unwrap(), 'F');
        assert!(column_letter(26).is_err());
    }
}
