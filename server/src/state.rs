use std::sync::Arc;

use redis::aio::ConnectionManager;

use super::{config::Config, database::init_redis, session::SessionCodec};

pub struct State {
    pub config: Config,
    pub redis_connection: ConnectionManager,
    pub sessions: SessionCodec,
}

impl State {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let redis_connection = init_redis(&config.redis_url).await;
        let sessions = SessionCodec::new(&config.session_secret, config.session_ttl_secs);

        tokio::fs::create_dir_all(&config.uploads_dir)
            .await
            .expect("Uploads directory misconfigured!");

        Arc::new(Self {
            config,
            redis_connection,
            sessions,
        })
    }
}
