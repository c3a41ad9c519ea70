use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::consistency::{self, ConsistencyReport};
use crate::context::{ActorRole, RequestContext};
use crate::error::{DomainError, Entity, StoreError};
use crate::events::{DomainEvent, DomainEventKind};
use crate::lifecycle::OutcomeReport;
use crate::models::PaymentStatus;
use crate::ports::{
    EnrollmentBundle, EventPublisher, MarketplaceStore, NewEnrollment, OutcomeRecord,
};

/// Student-supplied parameters of one enrollment attempt.
#[derive(Debug, Clone)]
pub struct EnrollmentIntent {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub calculated_price: Decimal,
}

/// Drives the enrollment workflow: validates the caller and the intent,
/// delegates the transactional writes to the store, and emits events and
/// consistency findings after commit.
pub struct EnrollmentCoordinator<S, P> {
    store: S,
    publisher: P,
}

impl<S, P> EnrollmentCoordinator<S, P>
where
    S: MarketplaceStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    #[instrument(skip_all, fields(trace_id = %ctx.trace_id, course_id = %course_id))]
    pub async fn initiate_enrollment(
        &self,
        ctx: &RequestContext,
        course_id: Uuid,
        intent: EnrollmentIntent,
    ) -> Result<EnrollmentBundle, DomainError> {
        ctx.require_role(ActorRole::Student)?;
        validate_schedule(intent.start_date, intent.end_date)?;
        validate_price(intent.calculated_price)?;

        let course = self
            .store
            .course(course_id)
            .await
            .map_err(DomainError::from_store)?
            .ok_or(DomainError::CourseNotFound)?;
        let institution = self
            .store
            .institution(course.institution_id)
            .await
            .map_err(DomainError::from_store)?
            .ok_or(DomainError::Store(StoreError::NotFound(Entity::Institution)))?;

        let bundle = self
            .store
            .create_enrollment_bundle(NewEnrollment {
                student_id: ctx.actor,
                course_id: course.id,
                institution_id: institution.id,
                currency: course.currency.clone(),
                commission_rate: institution.commission_rate,
                start_date: intent.start_date,
                end_date: intent.end_date,
                price: intent.calculated_price,
            })
            .await
            .map_err(DomainError::from_store)?;

        info!(
            "enrollment {} initiated with payment {}",
            bundle.enrollment.id, bundle.payment.id
        );

        self.emit(DomainEvent::new(
            bundle.enrollment.id,
            DomainEventKind::EnrollmentRequested,
            json!({
                "enrollment_id": bundle.enrollment.id,
                "student_id": bundle.enrollment.student_id,
                "course_id": course.id,
                "institution_id": institution.id,
                "payment_id": bundle.payment.id,
                "booking_id": bundle.booking.id,
                "amount": bundle.payment.amount,
                "currency": bundle.payment.currency,
            }),
        ))
        .await;

        Ok(bundle)
    }

    #[instrument(skip_all, fields(trace_id = %ctx.trace_id, payment_id = %payment_id))]
    pub async fn process_payment_outcome(
        &self,
        ctx: &RequestContext,
        payment_id: Uuid,
        report: OutcomeReport,
    ) -> Result<OutcomeRecord, DomainError> {
        ctx.require_role(ActorRole::Student)?;

        let payment = self
            .store
            .payment(payment_id)
            .await
            .map_err(DomainError::from_store)?
            .ok_or(DomainError::PaymentNotFound)?;
        let enrollment = self
            .store
            .enrollment(payment.enrollment_id)
            .await
            .map_err(DomainError::from_store)?
            .ok_or(DomainError::EnrollmentNotFound)?;
        if enrollment.student_id != ctx.actor {
            return Err(DomainError::NotOwner);
        }

        let record = self
            .store
            .apply_payment_outcome(payment_id, report)
            .await
            .map_err(DomainError::from_store)?;

        if record.replayed {
            info!("payment {} outcome replayed without writes", payment_id);
        } else {
            info!(
                "payment {} recorded as {}",
                record.payment.id,
                record.payment.status.as_str()
            );
            let kind = match record.payment.status {
                PaymentStatus::Paid => DomainEventKind::EnrollmentActivated,
                _ => DomainEventKind::EnrollmentFailed,
            };
            self.emit(DomainEvent::new(
                record.enrollment.id,
                kind,
                json!({
                    "enrollment_id": record.enrollment.id,
                    "student_id": record.enrollment.student_id,
                    "course_id": record.enrollment.course_id,
                    "institution_id": record.booking.institution_id,
                    "payment_id": record.payment.id,
                    "booking_id": record.booking.id,
                    "net_amount": record.payout.as_ref().map(|payout| payout.net_amount),
                }),
            ))
            .await;
        }

        self.audit_booking(record.booking.id).await;

        Ok(record)
    }

    /// Re-checks one booking against its payments. Exposed to operators and
    /// run after every outcome application.
    pub async fn booking_consistency(
        &self,
        booking_id: Uuid,
    ) -> Result<ConsistencyReport, DomainError> {
        let booking = self
            .store
            .booking(booking_id)
            .await
            .map_err(DomainError::from_store)?
            .ok_or(DomainError::BookingNotFound)?;
        let payments = self
            .store
            .payments_for_booking(booking_id)
            .await
            .map_err(DomainError::from_store)?;
        let statuses: Vec<_> = payments.iter().map(|payment| payment.status).collect();
        Ok(consistency::check_pair(booking.status, &statuses))
    }

    async fn audit_booking(&self, booking_id: Uuid) {
        match self.booking_consistency(booking_id).await {
            Ok(report) if !report.valid => {
                warn!(
                    "booking {} inconsistent after outcome: {:?}",
                    booking_id, report.issues
                );
            }
            Ok(_) => {}
            Err(err) => warn!("consistency check for booking {} skipped: {err:#}", booking_id),
        }
    }

    async fn emit(&self, event: DomainEvent) {
        let channel = event.kind.channel();
        if let Err(err) = self.publisher.publish(&event).await {
            warn!("failed to publish on {channel}: {err:#}");
        }
    }
}

fn validate_schedule(start: NaiveDate, end: NaiveDate) -> Result<(), DomainError> {
    if start >= end {
        return Err(DomainError::InvalidDateRange);
    }
    Ok(())
}

fn validate_price(price: Decimal) -> Result<(), DomainError> {
    if price <= Decimal::ZERO {
        return Err(DomainError::InvalidPrice);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(text: &str) -> NaiveDate {
        text.parse().unwrap()
    }

    #[test]
    fn schedule_must_start_before_it_ends() {
        assert!(validate_schedule(date("2026-09-01"), date("2026-12-18")).is_ok());
        assert!(matches!(
            validate_schedule(date("2026-09-01"), date("2026-09-01")),
            Err(DomainError::InvalidDateRange)
        ));
        assert!(validate_schedule(date("2026-12-18"), date("2026-09-01")).is_err());
    }

    #[test]
    fn price_must_be_positive() {
        assert!(validate_price(Decimal::new(4999, 2)).is_ok());
        assert!(matches!(
            validate_price(Decimal::ZERO),
            Err(DomainError::InvalidPrice)
        ));
        assert!(validate_price(Decimal::new(-1, 0)).is_err());
    }
}
