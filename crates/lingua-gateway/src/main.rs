use std::{net::SocketAddr, sync::Arc};

use anyhow::Result as AnyResult;
use lingua_core::EnrollmentCoordinator;
use lingua_gateway::{RedisPublisher, marketplace_router};
use lingua_platform::{RedisBus, ServiceConfig, connect_database};
use lingua_store::PgMarketplace;
use tracing::info;

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "lingua_gateway=info,lingua_core=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let store = PgMarketplace::new(pool);
    let publisher = RedisPublisher::new(redis);
    let coordinator = Arc::new(EnrollmentCoordinator::new(store, publisher));
    let router = marketplace_router(coordinator);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
