use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use lingua_core::{ActorRole, DomainEvent, DomainEventKind};
use lingua_platform::{RedisBus, ServiceConfig, connect_database};
use redis::Msg;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "lingua_notifier=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let mut pubsub = redis.client().get_async_pubsub().await?;
    for channel in DomainEventKind::all_channels() {
        pubsub.subscribe(channel).await?;
    }
    let mut messages = pubsub.on_message();

    info!(
        "notifier subscribed to {}",
        DomainEventKind::all_channels().join(", ")
    );

    loop {
        let msg = messages
            .next()
            .await
            .context("enrollment event stream ended unexpectedly")?;
        if let Err(err) = handle_message(&pool, msg).await {
            error!("failed to process message: {err:#}");
        }
    }
}

async fn handle_message(pool: &PgPool, msg: Msg) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let event: DomainEvent = serde_json::from_str(&payload)?;

    let delivered = record_notifications(pool, &event).await?;
    info!("event {} fanned out to {} recipient(s)", event.id, delivered);
    Ok(())
}

/// Writes one notification row per recipient. Redelivered events hit the
/// `(event_id, recipient_id)` unique constraint and insert nothing.
async fn record_notifications(pool: &PgPool, event: &DomainEvent) -> Result<u64> {
    let mut delivered = 0;
    for (recipient_id, role) in recipients_for(event)? {
        let inserted = sqlx::query(
            r#"
            INSERT INTO notifications (
                id, event_id, recipient_id, recipient_role, kind, payload, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id, recipient_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.id)
        .bind(recipient_id)
        .bind(role.as_str())
        .bind(event.kind.channel())
        .bind(&event.payload)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        delivered += inserted.rows_affected();
    }
    Ok(delivered)
}

/// The student hears about every lifecycle step; the institution only about
/// an activation, which is the moment its payout exists.
fn recipients_for(event: &DomainEvent) -> Result<Vec<(Uuid, ActorRole)>> {
    let mut recipients = vec![(payload_id(event, "student_id")?, ActorRole::Student)];
    if event.kind == DomainEventKind::EnrollmentActivated {
        recipients.push((payload_id(event, "institution_id")?, ActorRole::Institution));
    }
    Ok(recipients)
}

fn payload_id(event: &DomainEvent, field: &str) -> Result<Uuid> {
    event
        .payload
        .get(field)
        .and_then(|value| value.as_str())
        .and_then(|value| value.parse().ok())
        .with_context(|| format!("event payload is missing {field}"))
}
