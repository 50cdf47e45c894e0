use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use group_gate::config::BotConfig;
use group_gate::google_auth::GoogleAuth;
use group_gate::sheets::SheetsClient;
use group_gate::telegram::TelegramClient;
use group_gate::workflow::Workflow;

const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();
    dotenvy::dotenv().ok();

    let config = BotConfig::from_env()?;
    let auth = GoogleAuth::from_key_file(&config.service_account_path)?;
    let sheets = SheetsClient::new(auth, config.sheet_id.clone());
    let telegram = TelegramClient::new(config.bot_token.clone());

    info!(
        "group gate started; inviting into chat {} with {}-minute links",
        config.group_chat_id, config.invite_expire_minutes
    );

    let workflow = Arc::new(Workflow::new(config, telegram.clone(), sheets));

    let mut offset: Option<i64> = None;
    loop {
        let batch = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            batch = telegram.get_updates(offset, POLL_TIMEOUT_SECS) => batch,
        };

        match batch {
            Ok(updates) => {
                for update in updates {
                    offset = Some(update.update_id + 1);
                    let workflow = Arc::clone(&workflow);
                    tokio::spawn(async move {
                        workflow.handle_update(update).await;
                    });
                }
            }
            Err(err) => {
                // The poll loop survives transient failures; per-update
                // processing stays single-attempt.
                warn!("getUpdates failed: {}", err);
                tokio::time::sleep(POLL_RETRY_DELAY).await;
            }
        }
    }

    Ok(())
}
