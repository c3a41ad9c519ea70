use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub calculated_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetailsPayload {
    pub method: String,
    pub reference: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPaymentRequest {
    pub status: String,
    pub payment_details: PaymentDetailsPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentSummary {
    pub id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub payment_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingSummary {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub status: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub id: Uuid,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub idempotency_key: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutSummary {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub gross_amount: Decimal,
    pub commission_rate: Decimal,
    pub commission_amount: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollResponse {
    pub enrollment: EnrollmentSummary,
    pub booking: BookingSummary,
    pub payment: PaymentSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPaymentResponse {
    pub status: String,
    pub replayed: bool,
    pub payment: PaymentSummary,
    pub enrollment: EnrollmentSummary,
    pub booking: BookingSummary,
    pub payout: Option<PayoutSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyResponse {
    pub booking_id: Uuid,
    pub valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
