use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use lingua_core::{
    Booking, BookingRepository, BookingStatus, Course, CourseRepository, Enrollment,
    EnrollmentBundle, EnrollmentRepository, EnrollmentStatus, Entity, Institution, NewEnrollment,
    OutcomePlan, OutcomeRecord, OutcomeReport, Payment, PaymentRepository, PaymentState,
    PaymentStatus, Payout, PayoutRepository, StoreError, UnknownValue, WorkflowStore,
    apply_targets, plan_outcome, snapshot_rate,
};

/// Postgres adapter for the marketplace ports. All writes run inside
/// explicit transactions; the partial unique indexes on live enrollments and
/// open bookings back up the in-transaction existence checks under races.
pub struct PgMarketplace {
    pool: PgPool,
}

impl PgMarketplace {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CourseRepository for PgMarketplace {
    async fn course(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        let row =
            sqlx::query("SELECT id, institution_id, title, currency FROM courses WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        row.map(|row| course_from_row(&row)).transpose().map_err(backend)
    }

    async fn institution(&self, id: Uuid) -> Result<Option<Institution>, StoreError> {
        let row = sqlx::query("SELECT id, name, commission_rate FROM institutions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|row| institution_from_row(&row))
            .transpose()
            .map_err(backend)
    }
}

#[async_trait]
impl EnrollmentRepository for PgMarketplace {
    async fn enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError> {
        let row = sqlx::query(
            "SELECT id, student_id, course_id, status, payment_status, progress, start_date, end_date, payment_date, created_at, updated_at FROM enrollments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|row| enrollment_from_row(&row))
            .transpose()
            .map_err(backend)
    }

    async fn live_enrollment_exists(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM enrollments WHERE student_id = $1 AND course_id = $2 AND status IN ('PENDING_PAYMENT', 'ENROLLED'))",
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)
    }
}

#[async_trait]
impl BookingRepository for PgMarketplace {
    async fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(
            "SELECT id, student_id, course_id, institution_id, amount, status, created_at, updated_at FROM bookings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|row| booking_from_row(&row))
            .transpose()
            .map_err(backend)
    }

    async fn open_booking_exists(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM bookings WHERE student_id = $1 AND course_id = $2 AND status = 'PENDING')",
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)
    }
}

#[async_trait]
impl PaymentRepository for PgMarketplace {
    async fn payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(
            "SELECT id, enrollment_id, booking_id, amount, currency, status, idempotency_key, metadata, paid_at, created_at, updated_at FROM payments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|row| payment_from_row(&row))
            .transpose()
            .map_err(backend)
    }

    async fn payments_for_booking(&self, booking_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, enrollment_id, booking_id, amount, currency, status, idempotency_key, metadata, paid_at, created_at, updated_at FROM payments WHERE booking_id = $1 ORDER BY created_at",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(payment_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)
    }
}

#[async_trait]
impl PayoutRepository for PgMarketplace {
    async fn payouts_for_payment(&self, payment_id: Uuid) -> Result<Vec<Payout>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, institution_id, payment_id, enrollment_id, gross_amount, commission_rate, commission_amount, net_amount, currency, created_at FROM payouts WHERE payment_id = $1 ORDER BY created_at",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(payout_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)
    }
}

#[async_trait]
impl WorkflowStore for PgMarketplace {
    async fn create_enrollment_bundle(
        &self,
        intent: NewEnrollment,
    ) -> Result<EnrollmentBundle, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let enrolled: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM enrollments WHERE student_id = $1 AND course_id = $2 AND status IN ('PENDING_PAYMENT', 'ENROLLED'))",
        )
        .bind(intent.student_id)
        .bind(intent.course_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        if enrolled {
            return Err(StoreError::EnrollmentConflict);
        }

        let booked: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM bookings WHERE student_id = $1 AND course_id = $2 AND status = 'PENDING')",
        )
        .bind(intent.student_id)
        .bind(intent.course_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        if booked {
            return Err(StoreError::BookingConflict);
        }

        let bundle = intent.materialize();

        sqlx::query(
            r#"
            INSERT INTO enrollments (
                id, student_id, course_id, status, payment_status, progress,
                start_date, end_date, payment_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(bundle.enrollment.id)
        .bind(bundle.enrollment.student_id)
        .bind(bundle.enrollment.course_id)
        .bind(bundle.enrollment.status.as_str())
        .bind(bundle.enrollment.payment_status.as_str())
        .bind(bundle.enrollment.progress)
        .bind(bundle.enrollment.start_date)
        .bind(bundle.enrollment.end_date)
        .bind(bundle.enrollment.payment_date)
        .bind(bundle.enrollment.created_at)
        .bind(bundle.enrollment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(unique_conflict)?;

        sqlx::query(
            r#"
            INSERT INTO bookings (
                id, student_id, course_id, institution_id, amount, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(bundle.booking.id)
        .bind(bundle.booking.student_id)
        .bind(bundle.booking.course_id)
        .bind(bundle.booking.institution_id)
        .bind(bundle.booking.amount)
        .bind(bundle.booking.status.as_str())
        .bind(bundle.booking.created_at)
        .bind(bundle.booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(unique_conflict)?;

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, enrollment_id, booking_id, amount, currency, status,
                idempotency_key, metadata, paid_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(bundle.payment.id)
        .bind(bundle.payment.enrollment_id)
        .bind(bundle.payment.booking_id)
        .bind(bundle.payment.amount)
        .bind(&bundle.payment.currency)
        .bind(bundle.payment.status.as_str())
        .bind(bundle.payment.idempotency_key)
        .bind(&bundle.payment.metadata)
        .bind(bundle.payment.paid_at)
        .bind(bundle.payment.created_at)
        .bind(bundle.payment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(unique_conflict)?;

        Ok(bundle)
    }

    async fn apply_payment_outcome(
        &self,
        payment_id: Uuid,
        report: OutcomeReport,
    ) -> Result<OutcomeRecord, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let payment_row = sqlx::query(
            "SELECT id, enrollment_id, booking_id, amount, currency, status, idempotency_key, metadata, paid_at, created_at, updated_at FROM payments WHERE id = $1 FOR UPDATE",
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound(Entity::Payment))?;
        let payment = payment_from_row(&payment_row).map_err(backend)?;

        let enrollment_row = sqlx::query(
            "SELECT id, student_id, course_id, status, payment_status, progress, start_date, end_date, payment_date, created_at, updated_at FROM enrollments WHERE id = $1 FOR UPDATE",
        )
        .bind(payment.enrollment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound(Entity::Enrollment))?;
        let enrollment = enrollment_from_row(&enrollment_row).map_err(backend)?;

        let booking_row = sqlx::query(
            "SELECT id, student_id, course_id, institution_id, amount, status, created_at, updated_at FROM bookings WHERE id = $1 FOR UPDATE",
        )
        .bind(payment.booking_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound(Entity::Booking))?;
        let booking = booking_from_row(&booking_row).map_err(backend)?;

        match plan_outcome(payment.status, report.outcome)? {
            OutcomePlan::Replay => {
                let payout_row = sqlx::query(
                    "SELECT id, institution_id, payment_id, enrollment_id, gross_amount, commission_rate, commission_amount, net_amount, currency, created_at FROM payouts WHERE payment_id = $1",
                )
                .bind(payment.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;
                let payout = payout_row
                    .map(|row| payout_from_row(&row))
                    .transpose()
                    .map_err(backend)?;
                tx.commit().await.map_err(backend)?;

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
                    None => sqlx::query_scalar::<_, Decimal>(
                        "SELECT commission_rate FROM institutions WHERE id = $1",
                    )
                    .bind(booking.institution_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(backend)?
                    .ok_or(StoreError::NotFound(Entity::Institution))?,
                };

                let applied = apply_targets(payment, enrollment, booking, target, &report, rate);

                sqlx::query(
                    "UPDATE payments SET status = $2, metadata = $3, paid_at = $4, updated_at = $5 WHERE id = $1",
                )
                .bind(applied.payment.id)
                .bind(applied.payment.status.as_str())
                .bind(&applied.payment.metadata)
                .bind(applied.payment.paid_at)
                .bind(applied.payment.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;

                sqlx::query(
                    "UPDATE enrollments SET status = $2, payment_status = $3, payment_date = $4, updated_at = $5 WHERE id = $1",
                )
                .bind(applied.enrollment.id)
                .bind(applied.enrollment.status.as_str())
                .bind(applied.enrollment.payment_status.as_str())
                .bind(applied.enrollment.payment_date)
                .bind(applied.enrollment.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;

                sqlx::query("UPDATE bookings SET status = $2, updated_at = $3 WHERE id = $1")
                    .bind(applied.booking.id)
                    .bind(applied.booking.status.as_str())
                    .bind(applied.booking.updated_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;

                if let Some(payout) = &applied.payout {
                    sqlx::query(
                        r#"
                        INSERT INTO payouts (
                            id, institution_id, payment_id, enrollment_id, gross_amount,
                            commission_rate, commission_amount, net_amount, currency, created_at
                        )
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                        "#,
                    )
                    .bind(payout.id)
                    .bind(payout.institution_id)
                    .bind(payout.payment_id)
                    .bind(payout.enrollment_id)
                    .bind(payout.gross_amount)
                    .bind(payout.commission_rate)
                    .bind(payout.commission_amount)
                    .bind(payout.net_amount)
                    .bind(&payout.currency)
                    .bind(payout.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                }

                tx.commit().await.map_err(backend)?;

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

fn backend<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Maps a unique violation on the partial indexes to the matching domain
/// conflict, so the loser of a race gets the same error the existence check
/// produces.
fn unique_conflict(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.constraint() {
            Some("enrollments_live_unique") => return StoreError::EnrollmentConflict,
            Some("bookings_open_unique") => return StoreError::BookingConflict,
            _ => {}
        }
    }
    backend(err)
}

fn bad_column(column: &str, err: UnknownValue) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    }
}

fn course_from_row(row: &PgRow) -> Result<Course, sqlx::Error> {
    Ok(Course {
        id: row.try_get("id")?,
        institution_id: row.try_get("institution_id")?,
        title: row.try_get("title")?,
        currency: row.try_get("currency")?,
    })
}

fn institution_from_row(row: &PgRow) -> Result<Institution, sqlx::Error> {
    Ok(Institution {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        commission_rate: row.try_get("commission_rate")?,
    })
}

fn enrollment_from_row(row: &PgRow) -> Result<Enrollment, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let payment_status: String = row.try_get("payment_status")?;
    Ok(Enrollment {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        course_id: row.try_get("course_id")?,
        status: EnrollmentStatus::parse(&status).map_err(|err| bad_column("status", err))?,
        payment_status: PaymentState::parse(&payment_status)
            .map_err(|err| bad_column("payment_status", err))?,
        progress: row.try_get("progress")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        payment_date: row.try_get("payment_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn booking_from_row(row: &PgRow) -> Result<Booking, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Booking {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        course_id: row.try_get("course_id")?,
        institution_id: row.try_get("institution_id")?,
        amount: row.try_get("amount")?,
        status: BookingStatus::parse(&status).map_err(|err| bad_column("status", err))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: row.try_get("id")?,
        enrollment_id: row.try_get("enrollment_id")?,
        booking_id: row.try_get("booking_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: PaymentStatus::parse(&status).map_err(|err| bad_column("status", err))?,
        idempotency_key: row.try_get("idempotency_key")?,
        metadata: row.try_get("metadata")?,
        paid_at: row.try_get("paid_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payout_from_row(row: &PgRow) -> Result<Payout, sqlx::Error> {
    Ok(Payout {
        id: row.try_get("id")?,
        institution_id: row.try_get("institution_id")?,
        payment_id: row.try_get("payment_id")?,
        enrollment_id: row.try_get("enrollment_id")?,
        gross_amount: row.try_get("gross_amount")?,
        commission_rate: row.try_get("commission_rate")?,
        commission_amount: row.try_get("commission_amount")?,
        net_amount: row.try_get("net_amount")?,
        currency: row.try_get("currency")?,
        created_at: row.try_get("created_at")?,
    })
}
