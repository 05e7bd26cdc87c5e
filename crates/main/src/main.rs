//! 主应用程序入口
//!
//! 装配全部适配器并启动：发件箱中继、Kafka 投影消费者、
//! Redis 订阅泵和 Axum HTTP/WebSocket 服务。

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use application::{
    ConversationService, MessageService, OutboxRelay, PresenceService, ProfileProjector,
    ProfileService, StatusService, SystemClock,
};
use infrastructure::{
    create_pg_pool, AppConfig, KafkaIdentityConsumer, KafkaIdentityProducer,
    PgConversationRepository, PgIdentityUserStore, PgMessageRepository, PgOutboxRepository,
    PgReplicaRepository, PgStatusEventRepository, RedisConversationCache, RedisEventPublisher,
    RedisEventSubscriber, RedisPresenceStore,
};
use web_api::{router, run_event_pump, AppState, JwtService, SessionRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 加载并校验配置
    let config = AppConfig::load()?;
    config.validate().map_err(anyhow::Error::msg)?;

    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').last().unwrap_or("unknown")
    );

    let pool = Arc::new(
        create_pg_pool(&config.database.url, config.database.max_connections).await?,
    );

    // 运行迁移
    sqlx::migrate!("../../migrations").run(&*pool).await?;

    // 持久化仓储
    let users = Arc::new(PgIdentityUserStore::new(pool.clone()));
    let outbox = Arc::new(PgOutboxRepository::new(pool.clone()));
    let replicas = Arc::new(PgReplicaRepository::new(pool.clone()));
    let conversations = Arc::new(PgConversationRepository::new(pool.clone()));
    let messages = Arc::new(PgMessageRepository::new(pool.clone()));
    let status_events = Arc::new(PgStatusEventRepository::new(pool));

    // Kafka 身份事件管道
    let kafka_producer = Arc::new(KafkaIdentityProducer::new(&config.kafka)?);
    let kafka_consumer = Arc::new(KafkaIdentityConsumer::new(&config.kafka)?);

    // Redis 实时通道、在线状态与缓存
    let realtime = Arc::new(RedisEventPublisher::new(&config.redis).await?);
    let subscriber = Arc::new(RedisEventSubscriber::new(&config.redis)?);
    let presence_store = Arc::new(RedisPresenceStore::new(&config.redis).await?);
    let cache = Arc::new(RedisConversationCache::new(&config.redis).await?);

    let clock = Arc::new(SystemClock);

    // 应用层服务
    let profile_service = Arc::new(ProfileService::new(users, clock.clone()));
    let conversation_service = Arc::new(ConversationService::new(
        conversations.clone(),
        replicas.clone(),
        cache.clone(),
        realtime.clone(),
        clock.clone(),
        config.redis.conversation_cache_ttl(),
    ));
    let message_service = Arc::new(MessageService::new(
        messages.clone(),
        conversations.clone(),
        cache.clone(),
        realtime.clone(),
        clock.clone(),
    ));
    let status_service = Arc::new(StatusService::new(
        messages,
        conversations.clone(),
        status_events,
        cache.clone(),
        realtime.clone(),
        clock.clone(),
    ));
    let presence_service = Arc::new(PresenceService::new(
        presence_store.clone(),
        presence_store,
        conversations.clone(),
        realtime,
        clock.clone(),
    ));

    // 发件箱中继：把身份事件从 Postgres 搬运到 Kafka
    let relay = Arc::new(OutboxRelay::new(
        outbox,
        kafka_producer,
        clock,
        (&config.relay).into(),
    ));
    {
        let relay = relay.clone();
        tokio::spawn(async move { relay.run().await });
    }

    // 投影消费者：把身份事件物化为本地副本
    let projector = Arc::new(ProfileProjector::new(replicas, conversations, cache));
    {
        let consumer = kafka_consumer.clone();
        tokio::spawn(async move {
            if let Err(err) = consumer.run(projector).await {
                tracing::error!(error = %err, "kafka consumer stopped");
            }
        });
    }

    // 事件泵：Redis 订阅 -> 会话注册表扇出
    let registry = Arc::new(SessionRegistry::new());
    let events = subscriber.start();
    tokio::spawn(run_event_pump(registry.clone(), events));

    let jwt_service = Arc::new(JwtService::new(
        &config.server.jwt_secret,
        config.server.jwt_expiration_hours,
    ));

    let state = AppState::new(
        profile_service,
        conversation_service,
        message_service,
        status_service,
        presence_service,
        jwt_service,
        registry,
    );

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("聊天服务器启动在 http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
