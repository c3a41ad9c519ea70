//! HTTP surface for the enrollment marketplace.
//!
//! The router is generic over the store and the event publisher so the same
//! handlers serve Postgres in production and the in-memory store in tests.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    routing::{get, post},
};
use tracing::error;
use uuid::Uuid;

use lingua_core::{
    ActorRole, Booking, DomainError, DomainEvent, Enrollment, EnrollmentCoordinator,
    EnrollmentIntent, EventPublisher, GatewayDetails, MarketplaceStore, OutcomeReport, Payment,
    PaymentOutcome, Payout, RequestContext,
};
use lingua_platform::{
    BookingSummary, ConsistencyResponse, EnrollRequest, EnrollResponse, EnrollmentSummary,
    ErrorBody, PaymentSummary, PayoutSummary, ProcessPaymentRequest, ProcessPaymentResponse,
    RedisBus,
};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

type ErrorReply = (StatusCode, Json<ErrorBody>);

/// Caller identity taken from the gateway headers.
///
/// Upstream auth terminates before this service, so the headers are trusted;
/// the extractor only rejects requests where they are absent or malformed.
pub struct Identity(pub RequestContext);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ErrorReply;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let actor = headers
            .get(ACTOR_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| unauthorized("missing x-actor-id header"))?;
        let actor: Uuid = actor
            .parse()
            .map_err(|_| unauthorized("x-actor-id must be a UUID"))?;
        let role = headers
            .get(ACTOR_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| unauthorized("missing x-actor-role header"))?;
        let role = ActorRole::parse(role.trim()).map_err(|err| unauthorized(&err.to_string()))?;

        let mut ctx = RequestContext::new(actor, role);
        if let Some(trace_id) = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Uuid>().ok())
        {
            ctx = ctx.with_trace_id(trace_id);
        }
        Ok(Identity(ctx))
    }
}

/// Publishes domain events on the channel named by their kind.
pub struct RedisPublisher {
    bus: RedisBus,
}

impl RedisPublisher {
    pub fn new(bus: RedisBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.bus.publish_json(event.kind.channel(), event).await
    }
}

pub fn marketplace_router<S, P>(coordinator: Arc<EnrollmentCoordinator<S, P>>) -> Router
where
    S: MarketplaceStore + 'static,
    P: EventPublisher + 'static,
{
    Router::new()
        .route("/healthz", get(healthz))
        .route("/courses/{course_id}/enroll", post(enroll::<S, P>))
        .route(
            "/student/payments/process/{payment_id}",
            post(process_payment::<S, P>),
        )
        .route(
            "/ops/bookings/{booking_id}/consistency",
            get(booking_consistency::<S, P>),
        )
        .with_state(coordinator)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn enroll<S, P>(
    State(coordinator): State<Arc<EnrollmentCoordinator<S, P>>>,
    Identity(ctx): Identity,
    Path(course_id): Path<Uuid>,
    Json(payload): Json<EnrollRequest>,
) -> Result<(StatusCode, Json<EnrollResponse>), ErrorReply>
where
    S: MarketplaceStore + 'static,
    P: EventPublisher + 'static,
{
    let intent = EnrollmentIntent {
        start_date: payload.start_date,
        end_date: payload.end_date,
        calculated_price: payload.calculated_price,
    };
    let bundle = coordinator
        .initiate_enrollment(&ctx, course_id, intent)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(EnrollResponse {
            enrollment: enrollment_summary(&bundle.enrollment),
            booking: booking_summary(&bundle.booking),
            payment: payment_summary(&bundle.payment),
        }),
    ))
}

async fn process_payment<S, P>(
    State(coordinator): State<Arc<EnrollmentCoordinator<S, P>>>,
    Identity(ctx): Identity,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<ProcessPaymentRequest>,
) -> Result<Json<ProcessPaymentResponse>, ErrorReply>
where
    S: MarketplaceStore + 'static,
    P: EventPublisher + 'static,
{
    let outcome = PaymentOutcome::parse(&payload.status.trim().to_ascii_uppercase())
        .map_err(|err| bad_request(err.to_string()))?;
    let report = OutcomeReport {
        outcome,
        details: GatewayDetails {
            method: payload.payment_details.method,
            reference: payload.payment_details.reference,
            timestamp: payload.payment_details.timestamp,
        },
    };
    let record = coordinator
        .process_payment_outcome(&ctx, payment_id, report)
        .await
        .map_err(error_response)?;

    Ok(Json(ProcessPaymentResponse {
        status: record.payment.status.as_str().to_string(),
        replayed: record.replayed,
        payment: payment_summary(&record.payment),
        enrollment: enrollment_summary(&record.enrollment),
        booking: booking_summary(&record.booking),
        payout: record.payout.as_ref().map(payout_summary),
    }))
}

async fn booking_consistency<S, P>(
    State(coordinator): State<Arc<EnrollmentCoordinator<S, P>>>,
    Identity(ctx): Identity,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<ConsistencyResponse>, ErrorReply>
where
    S: MarketplaceStore + 'static,
    P: EventPublisher + 'static,
{
    ctx.require_role(ActorRole::Admin).map_err(error_response)?;
    let report = coordinator
        .booking_consistency(booking_id)
        .await
        .map_err(error_response)?;
    Ok(Json(ConsistencyResponse {
        booking_id,
        valid: report.valid,
        issues: report.issues,
    }))
}

fn error_response(err: DomainError) -> ErrorReply {
    let (status, message) = match &err {
        DomainError::AlreadyEnrolled
        | DomainError::BookingAlreadyExists
        | DomainError::InvalidDateRange
        | DomainError::InvalidPrice
        | DomainError::Transition(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        DomainError::CourseNotFound
        | DomainError::PaymentNotFound
        | DomainError::EnrollmentNotFound
        | DomainError::BookingNotFound => (StatusCode::NOT_FOUND, err.to_string()),
        DomainError::NotOwner | DomainError::RoleRequired(_) => {
            (StatusCode::UNAUTHORIZED, err.to_string())
        }
        DomainError::Store(inner) => {
            error!("storage failure: {inner}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    };
    (status, Json(ErrorBody { error: message }))
}

fn unauthorized(message: &str) -> ErrorReply {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
}

fn bad_request(message: String) -> ErrorReply {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message }))
}

fn enrollment_summary(enrollment: &Enrollment) -> EnrollmentSummary {
    EnrollmentSummary {
        id: enrollment.id,
        status: enrollment.status.as_str().to_string(),
        payment_status: enrollment.payment_status.as_str().to_string(),
        start_date: enrollment.start_date,
        end_date: enrollment.end_date,
        payment_date: enrollment.payment_date,
    }
}

fn booking_summary(booking: &Booking) -> BookingSummary {
    BookingSummary {
        id: booking.id,
        institution_id: booking.institution_id,
        status: booking.status.as_str().to_string(),
        amount: booking.amount,
    }
}

fn payment_summary(payment: &Payment) -> PaymentSummary {
    PaymentSummary {
        id: payment.id,
        status: payment.status.as_str().to_string(),
        amount: payment.amount,
        currency: payment.currency.clone(),
        idempotency_key: payment.idempotency_key,
    }
}

fn payout_summary(payout: &Payout) -> PayoutSummary {
    PayoutSummary {
        id: payout.id,
        institution_id: payout.institution_id,
        gross_amount: payout.gross_amount,
        commission_rate: payout.commission_rate,
        commission_amount: payout.commission_amount,
        net_amount: payout.net_amount,
        currency: payout.currency.clone(),
    }
}
