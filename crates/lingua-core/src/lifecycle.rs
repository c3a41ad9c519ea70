use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commission;
use crate::models::{
    Booking, BookingStatus, Enrollment, EnrollmentStatus, Payment, PaymentState, PaymentStatus,
    Payout, UnknownValue,
};

/// Metadata key under which gateway details are recorded when an outcome is
/// applied.
const GATEWAY_KEY: &str = "gateway";

/// Outcome reported by the payment gateway for one payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Success,
    Failed,
}

impl PaymentOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentOutcome::Success => "SUCCESS",
            PaymentOutcome::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownValue> {
        Ok(match value {
            "SUCCESS" => PaymentOutcome::Success,
            "FAILED" => PaymentOutcome::Failed,
            _ => return Err(UnknownValue::new("payment outcome", value)),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayDetails {
    pub method: String,
    pub reference: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub outcome: PaymentOutcome,
    pub details: GatewayDetails,
}

/// Terminal states one outcome application writes across the three records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetStates {
    pub payment: PaymentStatus,
    pub enrollment: EnrollmentStatus,
    pub payment_state: PaymentState,
    pub booking: BookingStatus,
    pub creates_payout: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomePlan {
    /// Move all three records to their terminal states, writing a payout row
    /// on success.
    Apply(TargetStates),
    /// The same outcome was already recorded; acknowledge without writing.
    Replay,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("payment already recorded as {} and cannot accept {}", .recorded.as_str(), .reported.as_str())]
    Conflicting {
        recorded: PaymentStatus,
        reported: PaymentOutcome,
    },
}

/// Decides what a reported outcome means for a payment in its current state.
/// Both store adapters derive their writes from this, so replay and conflict
/// semantics live in exactly one place.
pub fn plan_outcome(
    current: PaymentStatus,
    outcome: PaymentOutcome,
) -> Result<OutcomePlan, TransitionError> {
    if current.is_terminal() {
        let recorded = match current {
            PaymentStatus::Paid => PaymentOutcome::Success,
            _ => PaymentOutcome::Failed,
        };
        if recorded == outcome {
            return Ok(OutcomePlan::Replay);
        }
        return Err(TransitionError::Conflicting {
            recorded: current,
            reported: outcome,
        });
    }

    Ok(OutcomePlan::Apply(match outcome {
        PaymentOutcome::Success => TargetStates {
            payment: PaymentStatus::Paid,
            enrollment: EnrollmentStatus::Enrolled,
            payment_state: PaymentState::Paid,
            booking: BookingStatus::Completed,
            creates_payout: true,
        },
        PaymentOutcome::Failed => TargetStates {
            payment: PaymentStatus::Failed,
            enrollment: EnrollmentStatus::Failed,
            payment_state: PaymentState::Failed,
            booking: BookingStatus::Failed,
            creates_payout: false,
        },
    }))
}

#[derive(Debug, Clone)]
pub struct AppliedOutcome {
    pub payment: Payment,
    pub enrollment: Enrollment,
    pub booking: Booking,
    pub payout: Option<Payout>,
}

/// Applies a planned transition to in-memory copies of the three records.
/// Adapters persist exactly what comes back, so the written rows cannot
/// drift between backends.
pub fn apply_targets(
    mut payment: Payment,
    mut enrollment: Enrollment,
    mut booking: Booking,
    target: TargetStates,
    report: &OutcomeReport,
    commission_rate: Decimal,
) -> AppliedOutcome {
    let now = Utc::now();

    payment.status = target.payment;
    payment.metadata = merge_gateway_details(payment.metadata, &report.details);
    payment.updated_at = now;

    enrollment.status = target.enrollment;
    enrollment.payment_status = target.payment_state;
    enrollment.updated_at = now;

    booking.status = target.booking;
    booking.updated_at = now;

    let payout = if target.creates_payout {
        payment.paid_at = Some(now);
        enrollment.payment_date = Some(now);
        let breakdown = commission::payout_breakdown(payment.amount, commission_rate);
        Some(Payout {
            id: Uuid::new_v4(),
            institution_id: booking.institution_id,
            payment_id: payment.id,
            enrollment_id: enrollment.id,
            gross_amount: payment.amount,
            commission_rate,
            commission_amount: breakdown.commission_amount,
            net_amount: breakdown.net_amount,
            currency: payment.currency.clone(),
            created_at: now,
        })
    } else {
        None
    };

    AppliedOutcome {
        payment,
        enrollment,
        booking,
        payout,
    }
}

fn merge_gateway_details(
    metadata: serde_json::Value,
    details: &GatewayDetails,
) -> serde_json::Value {
    let mut map = match metadata {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    if let Ok(value) = serde_json::to_value(details) {
        map.insert(GATEWAY_KEY.to_string(), value);
    }
    serde_json::Value::Object(map)
}
