use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::commission;
use crate::error::StoreError;
use crate::events::DomainEvent;
use crate::lifecycle::OutcomeReport;
use crate::models::{
    Booking, BookingStatus, Course, Enrollment, EnrollmentStatus, Institution, Payment,
    PaymentState, PaymentStatus, Payout,
};

/// Everything the enrollment transaction needs to persist the three pending
/// records. Assembled by the coordinator from the course and institution it
/// already validated.
#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub institution_id: Uuid,
    pub currency: String,
    pub commission_rate: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub price: Decimal,
}

impl NewEnrollment {
    /// Builds the pending enrollment, booking and payment this intent
    /// persists. Both store adapters write exactly these records.
    pub fn materialize(&self) -> EnrollmentBundle {
        let now = Utc::now();
        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            student_id: self.student_id,
            course_id: self.course_id,
            status: EnrollmentStatus::PendingPayment,
            payment_status: PaymentState::Pending,
            progress: Decimal::ZERO,
            start_date: self.start_date,
            end_date: self.end_date,
            payment_date: None,
            created_at: now,
            updated_at: now,
        };
        let booking = Booking {
            id: Uuid::new_v4(),
            student_id: self.student_id,
            course_id: self.course_id,
            institution_id: self.institution_id,
            amount: self.price,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let payment = Payment {
            id: Uuid::new_v4(),
            enrollment_id: enrollment.id,
            booking_id: booking.id,
            amount: self.price,
            currency: self.currency.clone(),
            status: PaymentStatus::Pending,
            idempotency_key: Uuid::new_v4(),
            metadata: commission::rate_snapshot(self.commission_rate),
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        EnrollmentBundle {
            enrollment,
            booking,
            payment,
        }
    }
}

/// The three records one enrollment attempt creates atomically.
#[derive(Debug, Clone)]
pub struct EnrollmentBundle {
    pub enrollment: Enrollment,
    pub booking: Booking,
    pub payment: Payment,
}

/// Result of applying (or replaying) a payment outcome.
#[derive(Debug, Clone)]
pub struct OutcomeRecord {
    pub payment: Payment,
    pub enrollment: Enrollment,
    pub booking: Booking,
    pub payout: Option<Payout>,
    pub replayed: bool,
}

#[async_trait]
pub trait CourseRepository: Send + Sync {
    async fn course(&self, id: Uuid) -> Result<Option<Course>, StoreError>;
    async fn institution(&self, id: Uuid) -> Result<Option<Institution>, StoreError>;
}

#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    async fn enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError>;
    async fn live_enrollment_exists(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;
    async fn open_booking_exists(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;
    async fn payments_for_booking(&self, booking_id: Uuid) -> Result<Vec<Payment>, StoreError>;
}

#[async_trait]
pub trait PayoutRepository: Send + Sync {
    async fn payouts_for_payment(&self, payment_id: Uuid) -> Result<Vec<Payout>, StoreError>;
}

/// The only write surface of the domain. Both operations are transactional:
/// either every record lands or none does.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Creates enrollment, booking and payment together, rejecting the
    /// attempt when a live enrollment or open booking already exists.
    async fn create_enrollment_bundle(
        &self,
        intent: NewEnrollment,
    ) -> Result<EnrollmentBundle, StoreError>;

    /// Applies a reported outcome to the payment and its sibling records,
    /// deriving the transition under the payment lock so redelivery replays
    /// instead of double-writing.
    async fn apply_payment_outcome(
        &self,
        payment_id: Uuid,
        report: OutcomeReport,
    ) -> Result<OutcomeRecord, StoreError>;
}

pub trait MarketplaceStore:
    CourseRepository
    + EnrollmentRepository
    + BookingRepository
    + PaymentRepository
    + PayoutRepository
    + WorkflowStore
{
}

impl<T> MarketplaceStore for T where
    T: CourseRepository
        + EnrollmentRepository
        + BookingRepository
        + PaymentRepository
        + PayoutRepository
        + WorkflowStore
{
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()>;
}
