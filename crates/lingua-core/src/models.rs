use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raised when a text column or header carries a value outside the known set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    PendingPayment,
    Enrolled,
    Failed,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::PendingPayment => "PENDING_PAYMENT",
            EnrollmentStatus::Enrolled => "ENROLLED",
            EnrollmentStatus::Failed => "FAILED",
            EnrollmentStatus::Completed => "COMPLETED",
            EnrollmentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownValue> {
        Ok(match value {
            "PENDING_PAYMENT" => EnrollmentStatus::PendingPayment,
            "ENROLLED" => EnrollmentStatus::Enrolled,
            "FAILED" => EnrollmentStatus::Failed,
            "COMPLETED" => EnrollmentStatus::Completed,
            "CANCELLED" => EnrollmentStatus::Cancelled,
            _ => return Err(UnknownValue::new("enrollment status", value)),
        })
    }

    /// Live enrollments block a second enrollment for the same course.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            EnrollmentStatus::PendingPayment | EnrollmentStatus::Enrolled
        )
    }
}

/// Payment flag carried on the enrollment record, updated alongside the
/// payment itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Pending,
    Paid,
    Failed,
}

impl PaymentState {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentState::Pending => "PENDING",
            PaymentState::Paid => "PAID",
            PaymentState::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownValue> {
        Ok(match value {
            "PENDING" => PaymentState::Pending,
            "PAID" => PaymentState::Paid,
            "FAILED" => PaymentState::Failed,
            _ => return Err(UnknownValue::new("enrollment payment state", value)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Completed,
    Failed,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownValue> {
        Ok(match value {
            "PENDING" => BookingStatus::Pending,
            "COMPLETED" => BookingStatus::Completed,
            "FAILED" => BookingStatus::Failed,
            _ => return Err(UnknownValue::new("booking status", value)),
        })
    }

    /// An open booking blocks a second booking for the same (student, course).
    pub fn is_open(self) -> bool {
        matches!(self, BookingStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Initiated,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Initiated => "INITIATED",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownValue> {
        Ok(match value {
            "PENDING" => PaymentStatus::Pending,
            "PROCESSING" => PaymentStatus::Processing,
            "INITIATED" => PaymentStatus::Initiated,
            "PAID" => PaymentStatus::Paid,
            "FAILED" => PaymentStatus::Failed,
            _ => return Err(UnknownValue::new("payment status", value)),
        })
    }

    /// Terminal payments only accept an idempotent replay of the same outcome.
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Institution {
    pub id: Uuid,
    pub name: String,
    pub commission_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub title: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub status: EnrollmentStatus,
    pub payment_status: PaymentState,
    pub progress: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub payment_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub institution_id: Uuid,
    pub amount: Decimal,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub idempotency_key: Uuid,
    pub metadata: serde_json::Value,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub payment_id: Uuid,
    pub enrollment_id: Uuid,
    pub gross_amount: Decimal,
    pub commission_rate: Decimal,
    pub commission_amount: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_round_trips() {
        assert_eq!(EnrollmentStatus::PendingPayment.as_str(), "PENDING_PAYMENT");
        assert_eq!(
            EnrollmentStatus::parse("PENDING_PAYMENT").unwrap(),
            EnrollmentStatus::PendingPayment
        );
        assert_eq!(
            serde_json::to_value(PaymentStatus::Paid).unwrap(),
            serde_json::json!("PAID")
        );
        assert!(BookingStatus::parse("REFUNDED").is_err());
    }

    #[test]
    fn terminal_and_live_flags() {
        assert!(EnrollmentStatus::PendingPayment.is_live());
        assert!(EnrollmentStatus::Enrolled.is_live());
        assert!(!EnrollmentStatus::Failed.is_live());
        assert!(!EnrollmentStatus::Cancelled.is_live());

        assert!(BookingStatus::Pending.is_open());
        assert!(!BookingStatus::Completed.is_open());

        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Processing.is_terminal());
        assert!(!PaymentStatus::Initiated.is_terminal());
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }
}
