//! Bridge shape: a public bot account takes `/download` commands and a backing
//! user session fetches the media.

use std::sync::Arc;

use tgf_core::config::{Config, Shape};
use tgf_mtproto::{userbot::discard_updates, MtprotoSession};

#[tokio::main]
async fn main() -> Result<(), tgf_core::Error> {
    tgf_core::logging::init("tgf")?;

    let cfg = Arc::new(Config::load(Shape::Bridge)?);
    let (session, updates) = MtprotoSession::connect(&cfg).await?;
    tokio::spawn(discard_updates(Arc::clone(&session), updates));

    tgf_telegram::router::run_polling(cfg, Arc::clone(&session))
        .await
        .map_err(|e| tgf_core::Error::External(format!("telegram bot failed: {e}")))?;

    session.save().await?;
    tracing::info!("bridge stopped");
    Ok(())
}
