use std::sync::Arc;

use tracing::info;

use cico_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), cico_core::Error> {
    cico_core::logging::init("cico")?;

    let cfg = Arc::new(Config::load()?);
    info!(portal = %cfg.portal_base_url, "starting");

    cico_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| cico_core::Error::Transport(format!("telegram bot failed: {e}")))?;

    Ok(())
}
