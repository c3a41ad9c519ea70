use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use lingua_core::{
    Booking, BookingRepository, Course, CourseRepository, Enrollment, EnrollmentBundle,
    EnrollmentRepository, Entity, Institution, NewEnrollment, OutcomePlan, OutcomeRecord,
    OutcomeReport, Payment, PaymentRepository, Payout, PayoutRepository, StoreError, WorkflowStore,
    apply_targets, plan_outcome, snapshot_rate,
};

/// In-memory implementation of the marketplace ports, used in tests and as
/// the reference behavior for the Postgres adapter. Workflow operations hold
/// the write lock for their whole duration, which gives them the same
/// atomicity the database adapter gets from transactions and row locks.
#[derive(Clone, Default)]
pub struct InMemoryMarketplace {
    state: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    institutions: HashMap<Uuid, Institution>,
    courses: HashMap<Uuid, Course>,
    enrollments: HashMap<Uuid, Enrollment>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<Uuid, Payment>,
    payouts: Vec<Payout>,
}

impl InMemoryMarketplace {
    pub async fn seed_institution(&self, institution: Institution) {
        let mut state = self.state.write().await;
        state.institutions.insert(institution.id, institution);
    }

    pub async fn seed_course(&self, course: Course) {
        let mut state = self.state.write().await;
        state.courses.insert(course.id, course);
    }

    pub async fn seed_booking(&self, booking: Booking) {
        let mut state = self.state.write().await;
        state.bookings.insert(booking.id, booking);
    }

    pub async fn seed_payment(&self, payment: Payment) {
        let mut state = self.state.write().await;
        state.payments.insert(payment.id, payment);
    }
}

#[async_trait]
impl CourseRepository for InMemoryMarketplace {
    async fn course(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        Ok(self.state.read().await.courses.get(&id).cloned())
    }

    async fn institution(&self, id: Uuid) -> Result<Option<Institution>, StoreError> {
        Ok(self.state.read().await.institutions.get(&id).cloned())
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryMarketplace {
    async fn enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError> {
        Ok(self.state.read().await.enrollments.get(&id).cloned())
    }

    async fn live_enrollment_exists(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        Ok(has_live_enrollment(&state, student_id, course_id))
    }
}

#[async_trait]
impl BookingRepository for InMemoryMarketplace {
    async fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.state.read().await.bookings.get(&id).cloned())
    }

    async fn open_booking_exists(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        Ok(has_open_booking(&state, student_id, course_id))
    }
}

#[async_trait]
impl PaymentRepository for InMemoryMarketplace {
    async fn payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn payments_for_booking(&self, booking_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|payment| payment.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|payment| payment.created_at);
        Ok(payments)
    }
}

#[async_trait]
impl PayoutRepository for InMemoryMarketplace {
    async fn payouts_for_payment(&self, payment_id: Uuid) -> Result<Vec<Payout>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .payouts
            .iter()
            .filter(|payout| payout.payment_id == payment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryMarketplace {
    async fn create_enrollment_bundle(
        &self,
        intent: NewEnrollment,
    ) -> Result<EnrollmentBundle, StoreError> {
        let mut state = self.state.write().await;

        if !state.courses.contains_key(&intent.course_id) {
            return Err(StoreError::NotFound(Entity::Course));
        }
        if has_live_enrollment(&state, intent.student_id, intent.course_id) {
            return Err(StoreError::EnrollmentConflict);
        }
        if has_open_booking(&state, intent.student_id, intent.course_id) {
            return Err(StoreError::BookingConflict);
        }

        let bundle = intent.materialize();
        state
            .enrollments
            .insert(bundle.enrollment.id, bundle.enrollment.clone());
        state
            .bookings
            .insert(bundle.booking.id, bundle.booking.clone());
        state
            .payments
            .insert(bundle.payment.id, bundle.payment.clone());

        Ok(bundle)
    }

    async fn apply_payment_outcome(
        &self,
        payment_id: Uuid,
        report: OutcomeReport,
    ) -> Result<OutcomeRecord, StoreError> {
        let mut state = self.state.write().await;

        let payment = state
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Payment))?;
        let enrollment = state
            .enrollments
            .get(&payment.enrollment_id)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Enrollment))?;
        let booking = state
            .bookings
            .get(&payment.booking_id)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Booking))?;

        match plan_outcome(payment.status, report.outcome)? {
            OutcomePlan::Replay => {
                let payout = state
                    .payouts
                    .iter()
                    .find(|payout| payout.payment_id == payment_id)
                    .cloned();
                Ok(OutcomeRecord {
                    payment,
                    enrollment,
                    booking,
                    payout,
                    replayed: true,
                })
            }
            OutcomePlan::Apply(target) => {
                let rate = match snapshot_rate(&payment.metadata) {
                    Some(rate) => rate,
                    None => state
                        .institutions
                        .get(&booking.institution_id)
                        .map(|institution| institution.commission_rate)
                        .ok_or(StoreError::NotFound(Entity::Institution))?,
                };

                let applied = apply_targets(payment, enrollment, booking, target, &report, rate);

                state
                    .payments
                    .insert(applied.payment.id, applied.payment.clone());
                state
                    .enrollments
                    .insert(applied.enrollment.id, applied.enrollment.clone());
                state
                    .bookings
                    .insert(applied.booking.id, applied.booking.clone());
                if let Some(payout) = &applied.payout {
                    state.payouts.push(payout.clone());
                }

                Ok(OutcomeRecord {
                    payment: applied.payment,
                    enrollment: applied.enrollment,
                    booking: applied.booking,
                    payout: applied.payout,
                    replayed: false,
                })
            }
        }
    }
}

fn has_live_enrollment(state: &State, student_id: Uuid, course_id: Uuid) -> bool {
    state.enrollments.values().any(|enrollment| {
        enrollment.student_id == student_id
            && enrollment.course_id == course_id
            && enrollment.status.is_live()
    })
}

fn has_open_booking(state: &State, student_id: Uuid, course_id: Uuid) -> bool {
    state.bookings.values().any(|booking| {
        booking.student_id == student_id
            && booking.course_id == course_id
            && booking.status.is_open()
    })
}
