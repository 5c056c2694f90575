use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use tgf_core::{config::Config, download::DownloadService, messaging::port::MessagingPort};
use tgf_mtproto::MtprotoSession;

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub service: Arc<DownloadService<MtprotoSession>>,
    pub messenger: Arc<dyn MessagingPort>,
    pub started_at: DateTime<Utc>,
}

pub async fn run_polling(cfg: Arc<Config>, session: Arc<MtprotoSession>) -> anyhow::Result<()> {
    let token = cfg
        .bot_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("BOT_TOKEN is required for the bridge"))?;
    let bot = Bot::new(token);

    match bot.get_me().await {
        Ok(me) => info!(bot = %me.username(), "bridge started"),
        Err(e) => warn!(error = %e, "get_me failed"),
    }
    info!(
        allowed_users = cfg.allowed_users.len(),
        public_mode = cfg.public_mode,
        max_concurrent = cfg.max_concurrent,
        staging = %cfg.download_dir.display(),
        "bridge configuration"
    );

    // Status replies and file uploads go out through the bot account; the user
    // session only fetches.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let service = Arc::new(DownloadService::from_config(&cfg, session, raw_messenger));

    let state = Arc::new(AppState {
        cfg,
        messenger: service.messenger(),
        service,
        started_at: Utc::now(),
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
