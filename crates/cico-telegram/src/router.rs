use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use cico_core::{
    config::Config,
    export::{ExportConfig, ExportController, ExportRegistry},
    login::LoginSessions,
    messaging::port::MessagingPort,
    ports::{AttendancePort, ImageProcessor},
    report::RecordFormatter,
    sender::{RateLimitedSender, RetryPolicy},
    store::SettingsStore,
};
use cico_media::ImageFetcher;
use cico_portal::PortalClient;

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub store: Arc<SettingsStore>,
    pub portal: Arc<dyn AttendancePort>,
    pub images: Arc<dyn ImageProcessor>,
    pub formatter: Arc<RecordFormatter>,
    pub sender: Arc<RateLimitedSender>,
    pub exports: Arc<ExportController>,
    pub logins: Arc<LoginSessions>,
}

impl AppState {
    /// Wire the pipeline around already-built adapters.
    pub fn new(
        cfg: Arc<Config>,
        messenger: Arc<dyn MessagingPort>,
        portal: Arc<dyn AttendancePort>,
        images: Arc<dyn ImageProcessor>,
    ) -> Self {
        let formatter = Arc::new(RecordFormatter::new(images.clone()));
        let sender = Arc::new(RateLimitedSender::new(
            messenger.clone(),
            RetryPolicy {
                max_attempts: cfg.send_max_attempts,
                ..RetryPolicy::default()
            },
        ));
        let exports = Arc::new(ExportController::new(
            Arc::new(ExportRegistry::new()),
            formatter.clone(),
            sender.clone(),
            ExportConfig {
                inter_record_delay: cfg.export_delay,
                progress_every: cfg.export_progress_every,
            },
        ));

        Self {
            store: Arc::new(SettingsStore::new(cfg.store_path.clone())),
            cfg,
            messenger,
            portal,
            images,
            formatter,
            sender,
            exports,
            logins: Arc::new(LoginSessions::new()),
        }
    }
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(cfg.http_timeout)
        .build()?;
    let bot = Bot::with_client(cfg.bot_token.clone(), client);

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "bot started"),
        Err(e) => warn!(error = %e, "get_me failed"),
    }
    info!(
        store = %cfg.store_path.display(),
        allowed_users = cfg.allowed_users.len(),
        "configuration loaded"
    );

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let portal: Arc<dyn AttendancePort> = Arc::new(PortalClient::new(
        cfg.portal_base_url.clone(),
        cfg.http_timeout,
    )?);
    let images: Arc<dyn ImageProcessor> = Arc::new(ImageFetcher::new(cfg.http_timeout)?);

    let state = Arc::new(AppState::new(cfg, messenger, portal, images));

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
