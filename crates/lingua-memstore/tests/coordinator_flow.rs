use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use lingua_core::{
    ActorRole, Booking, BookingStatus, Course, DomainError, DomainEvent, DomainEventKind,
    EnrollmentCoordinator, EnrollmentIntent, EnrollmentStatus, EventPublisher, GatewayDetails,
    Institution, OutcomeReport, Payment, PaymentOutcome, PaymentRepository, PaymentState,
    PaymentStatus, PayoutRepository, RequestContext, rate_snapshot, snapshot_rate,
};
use lingua_memstore::InMemoryMarketplace;

#[derive(Clone, Default)]
struct RecordingPublisher {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingPublisher {
    fn kinds(&self) -> Vec<DomainEventKind> {
        self.events.lock().unwrap().iter().map(|event| event.kind).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(&self, _event: &DomainEvent) -> anyhow::Result<()> {
        anyhow::bail!("bus unavailable")
    }
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn term_intent(price: Decimal) -> EnrollmentIntent {
    EnrollmentIntent {
        start_date: date(2026, 9, 1),
        end_date: date(2026, 12, 18),
        calculated_price: price,
    }
}

fn report(outcome: PaymentOutcome) -> OutcomeReport {
    OutcomeReport {
        outcome,
        details: GatewayDetails {
            method: "card".to_string(),
            reference: "psp-7810".to_string(),
            timestamp: Utc::now(),
        },
    }
}

struct Harness {
    store: InMemoryMarketplace,
    publisher: RecordingPublisher,
    coordinator: EnrollmentCoordinator<InMemoryMarketplace, RecordingPublisher>,
    course_id: Uuid,
    institution_id: Uuid,
}

async fn harness(commission_rate: Decimal) -> Harness {
    let store = InMemoryMarketplace::default();
    let institution = Institution {
        id: Uuid::new_v4(),
        name: "Lingua Berlin".to_string(),
        commission_rate,
    };
    let course = Course {
        id: Uuid::new_v4(),
        institution_id: institution.id,
        title: "German B2 Evening".to_string(),
        currency: "EUR".to_string(),
    };
    let institution_id = institution.id;
    let course_id = course.id;
    store.seed_institution(institution).await;
    store.seed_course(course).await;

    let publisher = RecordingPublisher::default();
    let coordinator = EnrollmentCoordinator::new(store.clone(), publisher.clone());

    Harness {
        store,
        publisher,
        coordinator,
        course_id,
        institution_id,
    }
}

fn student() -> RequestContext {
    RequestContext::new(Uuid::new_v4(), ActorRole::Student)
}

#[tokio::test]
async fn enrollment_creates_the_pending_bundle() {
    let h = harness(Decimal::new(10, 0)).await;
    let ctx = student();

    let bundle = h
        .coordinator
        .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap();

    assert_eq!(bundle.enrollment.status, EnrollmentStatus::PendingPayment);
    assert_eq!(bundle.enrollment.payment_status, PaymentState::Pending);
    assert_eq!(bundle.enrollment.student_id, ctx.actor);
    assert_eq!(bundle.booking.status, BookingStatus::Pending);
    assert_eq!(bundle.booking.amount, Decimal::new(100, 0));
    assert_eq!(bundle.booking.institution_id, h.institution_id);
    assert_eq!(bundle.payment.status, PaymentStatus::Pending);
    assert_eq!(bundle.payment.enrollment_id, bundle.enrollment.id);
    assert_eq!(bundle.payment.booking_id, bundle.booking.id);
    assert_eq!(
        snapshot_rate(&bundle.payment.metadata),
        Some(Decimal::new(10, 0))
    );

    let stored = h.store.payment(bundle.payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert_eq!(h.publisher.kinds(), vec![DomainEventKind::EnrollmentRequested]);
}

#[tokio::test]
async fn second_enrollment_for_the_same_course_is_rejected() {
    let h = harness(Decimal::new(10, 0)).await;
    let ctx = student();

    h.coordinator
        .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap();
    let err = h
        .coordinator
        .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::AlreadyEnrolled));
    // only the first attempt published anything
    assert_eq!(h.publisher.kinds(), vec![DomainEventKind::EnrollmentRequested]);
}

#[tokio::test]
async fn another_student_can_enroll_in_the_same_course() {
    let h = harness(Decimal::new(10, 0)).await;

    h.coordinator
        .initiate_enrollment(&student(), h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap();
    h.coordinator
        .initiate_enrollment(&student(), h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap();
}

#[tokio::test]
async fn racing_enrollments_admit_exactly_one() {
    let h = harness(Decimal::new(10, 0)).await;
    let ctx = student();

    let (first, second) = tokio::join!(
        h.coordinator
            .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0))),
        h.coordinator
            .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0))),
    );

    assert!(first.is_ok() != second.is_ok());
    let err = first.err().or(second.err()).unwrap();
    assert!(matches!(
        err,
        DomainError::AlreadyEnrolled | DomainError::BookingAlreadyExists
    ));
}

#[tokio::test]
async fn success_outcome_pays_the_institution_net_of_commission() {
    let h = harness(Decimal::new(10, 0)).await;
    let ctx = student();

    let bundle = h
        .coordinator
        .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap();
    let record = h
        .coordinator
        .process_payment_outcome(&ctx, bundle.payment.id, report(PaymentOutcome::Success))
        .await
        .unwrap();

    assert!(!record.replayed);
    assert_eq!(record.payment.status, PaymentStatus::Paid);
    assert!(record.payment.paid_at.is_some());
    assert_eq!(record.enrollment.status, EnrollmentStatus::Enrolled);
    assert_eq!(record.enrollment.payment_status, PaymentState::Paid);
    assert!(record.enrollment.payment_date.is_some());
    assert_eq!(record.booking.status, BookingStatus::Completed);

    let payout = record.payout.expect("success must create a payout");
    assert_eq!(payout.institution_id, h.institution_id);
    assert_eq!(payout.gross_amount, Decimal::new(100, 0));
    assert_eq!(payout.commission_amount, Decimal::new(10, 0));
    assert_eq!(payout.net_amount, Decimal::new(90, 0));

    let payouts = h.store.payouts_for_payment(bundle.payment.id).await.unwrap();
    assert_eq!(payouts.len(), 1);

    let consistency = h
        .coordinator
        .booking_consistency(bundle.booking.id)
        .await
        .unwrap();
    assert!(consistency.valid);

    assert_eq!(
        h.publisher.kinds(),
        vec![
            DomainEventKind::EnrollmentRequested,
            DomainEventKind::EnrollmentActivated
        ]
    );
}

#[tokio::test]
async fn failed_outcome_fails_all_three_records_without_payout() {
    let h = harness(Decimal::new(10, 0)).await;
    let ctx = student();

    let bundle = h
        .coordinator
        .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap();
    let record = h
        .coordinator
        .process_payment_outcome(&ctx, bundle.payment.id, report(PaymentOutcome::Failed))
        .await
        .unwrap();

    assert_eq!(record.payment.status, PaymentStatus::Failed);
    assert!(record.payment.paid_at.is_none());
    assert_eq!(record.enrollment.status, EnrollmentStatus::Failed);
    assert_eq!(record.enrollment.payment_status, PaymentState::Failed);
    assert_eq!(record.booking.status, BookingStatus::Failed);
    assert!(record.payout.is_none());

    let payouts = h.store.payouts_for_payment(bundle.payment.id).await.unwrap();
    assert!(payouts.is_empty());

    assert_eq!(
        h.publisher.kinds(),
        vec![
            DomainEventKind::EnrollmentRequested,
            DomainEventKind::EnrollmentFailed
        ]
    );
}

#[tokio::test]
async fn failed_enrollment_frees_the_course_for_retry() {
    let h = harness(Decimal::new(10, 0)).await;
    let ctx = student();

    let bundle = h
        .coordinator
        .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap();
    h.coordinator
        .process_payment_outcome(&ctx, bundle.payment.id, report(PaymentOutcome::Failed))
        .await
        .unwrap();

    // the first attempt is terminal on every record, so a fresh one may start
    h.coordinator
        .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap();
}

#[tokio::test]
async fn redelivered_success_replays_without_a_second_payout() {
    let h = harness(Decimal::new(10, 0)).await;
    let ctx = student();

    let bundle = h
        .coordinator
        .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap();
    h.coordinator
        .process_payment_outcome(&ctx, bundle.payment.id, report(PaymentOutcome::Success))
        .await
        .unwrap();
    let replay = h
        .coordinator
        .process_payment_outcome(&ctx, bundle.payment.id, report(PaymentOutcome::Success))
        .await
        .unwrap();

    assert!(replay.replayed);
    assert_eq!(replay.payment.status, PaymentStatus::Paid);
    let payout = replay.payout.expect("replay reports the recorded payout");
    assert_eq!(payout.net_amount, Decimal::new(90, 0));

    let payouts = h.store.payouts_for_payment(bundle.payment.id).await.unwrap();
    assert_eq!(payouts.len(), 1);

    // the replay must not emit a second activation event
    assert_eq!(
        h.publisher.kinds(),
        vec![
            DomainEventKind::EnrollmentRequested,
            DomainEventKind::EnrollmentActivated
        ]
    );
}

#[tokio::test]
async fn contradicting_outcome_is_rejected_and_changes_nothing() {
    let h = harness(Decimal::new(10, 0)).await;
    let ctx = student();

    let bundle = h
        .coordinator
        .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap();
    h.coordinator
        .process_payment_outcome(&ctx, bundle.payment.id, report(PaymentOutcome::Success))
        .await
        .unwrap();
    let err = h
        .coordinator
        .process_payment_outcome(&ctx, bundle.payment.id, report(PaymentOutcome::Failed))
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::Transition(_)));
    let stored = h.store.payment(bundle.payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Paid);
}

#[tokio::test]
async fn only_the_enrolled_student_may_report_the_outcome() {
    let h = harness(Decimal::new(10, 0)).await;
    let owner = student();
    let stranger = student();

    let bundle = h
        .coordinator
        .initiate_enrollment(&owner, h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap();
    let err = h
        .coordinator
        .process_payment_outcome(&stranger, bundle.payment.id, report(PaymentOutcome::Success))
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::NotOwner));
    let stored = h.store.payment(bundle.payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn non_students_cannot_enroll() {
    let h = harness(Decimal::new(10, 0)).await;
    let ctx = RequestContext::new(Uuid::new_v4(), ActorRole::Institution);

    let err = h
        .coordinator
        .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::new(100, 0)))
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::RoleRequired(ActorRole::Student)));
}

#[tokio::test]
async fn invalid_intents_are_rejected_up_front() {
    let h = harness(Decimal::new(10, 0)).await;
    let ctx = student();

    let backwards = EnrollmentIntent {
        start_date: date(2026, 12, 18),
        end_date: date(2026, 9, 1),
        calculated_price: Decimal::new(100, 0),
    };
    assert!(matches!(
        h.coordinator
            .initiate_enrollment(&ctx, h.course_id, backwards)
            .await,
        Err(DomainError::InvalidDateRange)
    ));

    assert!(matches!(
        h.coordinator
            .initiate_enrollment(&ctx, h.course_id, term_intent(Decimal::ZERO))
            .await,
        Err(DomainError::InvalidPrice)
    ));

    assert!(matches!(
        h.coordinator
            .initiate_enrollment(&ctx, Uuid::new_v4(), term_intent(Decimal::new(100, 0)))
            .await,
        Err(DomainError::CourseNotFound)
    ));
}

#[tokio::test]
async fn a_dead_bus_never_fails_the_workflow() {
    let store = InMemoryMarketplace::default();
    let institution = Institution {
        id: Uuid::new_v4(),
        name: "Lingua Lyon".to_string(),
        commission_rate: Decimal::new(15, 0),
    };
    let course = Course {
        id: Uuid::new_v4(),
        institution_id: institution.id,
        title: "French A1 Intensive".to_string(),
        currency: "EUR".to_string(),
    };
    let course_id = course.id;
    store.seed_institution(institution).await;
    store.seed_course(course).await;

    let coordinator = EnrollmentCoordinator::new(store, FailingPublisher);
    let ctx = student();

    let bundle = coordinator
        .initiate_enrollment(&ctx, course_id, term_intent(Decimal::new(200, 0)))
        .await
        .unwrap();
    let record = coordinator
        .process_payment_outcome(&ctx, bundle.payment.id, report(PaymentOutcome::Success))
        .await
        .unwrap();

    assert_eq!(record.payment.status, PaymentStatus::Paid);
}

#[tokio::test]
async fn consistency_report_flags_a_drifted_booking() {
    let h = harness(Decimal::new(10, 0)).await;
    let now = Utc::now();
    let booking = Booking {
        id: Uuid::new_v4(),
        student_id: Uuid::new_v4(),
        course_id: h.course_id,
        institution_id: h.institution_id,
        amount: Decimal::new(100, 0),
        status: BookingStatus::Completed,
        created_at: now,
        updated_at: now,
    };
    let payment = Payment {
        id: Uuid::new_v4(),
        enrollment_id: Uuid::new_v4(),
        booking_id: booking.id,
        amount: Decimal::new(100, 0),
        currency: "EUR".to_string(),
        status: PaymentStatus::Failed,
        idempotency_key: Uuid::new_v4(),
        metadata: rate_snapshot(Decimal::new(10, 0)),
        paid_at: None,
        created_at: now,
        updated_at: now,
    };
    let booking_id = booking.id;
    h.store.seed_booking(booking).await;
    h.store.seed_payment(payment).await;

    let consistency = h.coordinator.booking_consistency(booking_id).await.unwrap();
    assert!(!consistency.valid);
    assert_eq!(
        consistency.issues,
        vec!["booking COMPLETED without a PAID payment".to_string()]
    );

    assert!(matches!(
        h.coordinator.booking_consistency(Uuid::new_v4()).await,
        Err(DomainError::BookingNotFound)
    ));
}
