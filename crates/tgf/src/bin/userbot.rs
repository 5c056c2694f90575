//! Userbot shape: one user account receives `/download` commands and answers
//! them itself.

use std::sync::Arc;

use tgf_core::{
    config::{Config, Shape},
    download::DownloadService,
    messaging::port::MessagingPort,
};
use tgf_mtproto::{userbot, MtprotoSession};

#[tokio::main]
async fn main() -> Result<(), tgf_core::Error> {
    tgf_core::logging::init("tgf-userbot")?;

    let cfg = Config::load(Shape::Userbot)?;
    let (session, updates) = MtprotoSession::connect(&cfg).await?;

    let messenger: Arc<dyn MessagingPort> = session.clone();
    let service = Arc::new(DownloadService::from_config(
        &cfg,
        Arc::clone(&session),
        messenger,
    ));

    userbot::run(session, service, updates).await
}
