use anyhow::Result;
use parley_config::AppConfig;
use parley_database::{initialize_database, MemberRepository, MessageRepository, RoomRepository};
use redis::aio::ConnectionManager;
use sqlx::SqlitePool;
use tracing::info;

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::INFO)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Redis handles shared by the backplane publisher and the durable log.
/// The client is kept alongside the manager because pub/sub and the
/// blocking consumer need dedicated connections.
#[derive(Clone)]
pub struct RedisHandles {
    pub client: redis::Client,
    pub manager: ConnectionManager,
}

#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub rooms: RoomRepository,
    pub members: MemberRepository,
    pub messages: MessageRepository,
    pub redis: Option<RedisHandles>,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database).await?;

        let rooms = RoomRepository::new(db_pool.clone());
        let members = MemberRepository::new(db_pool.clone());
        let messages = MessageRepository::new(db_pool.clone());

        // Redis is optional: without it the server still runs, scoped
        // to a single process with an in-memory backplane and log.
        let redis = if config.redis.enabled() {
            match redis::Client::open(config.redis.url.as_str()) {
                Ok(client) => match ConnectionManager::new(client.clone()).await {
                    Ok(manager) => {
                        info!(url = %config.redis.url, "redis connection established");
                        Some(RedisHandles { client, manager })
                    }
                    Err(e) => {
                        tracing::warn!(
                            "failed to connect to redis, proceeding without redis: {}",
                            e
                        );
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        "failed to create redis client, proceeding without redis: {}",
                        e
                    );
                    None
                }
            }
        } else {
            info!("redis not configured, running single-process");
            None
        };

        Ok(Self {
            db_pool,
            rooms,
            members,
            messages,
            redis,
        })
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
