use crate::context::ActorRole;
use crate::lifecycle::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Institution,
    Course,
    Enrollment,
    Booking,
    Payment,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Entity::Institution => "institution",
            Entity::Course => "course",
            Entity::Enrollment => "enrollment",
            Entity::Booking => "booking",
            Entity::Payment => "payment",
        })
    }
}

/// Failures surfaced by the storage ports.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a live enrollment already exists for this student and course")]
    EnrollmentConflict,
    #[error("an open booking already exists for this student and course")]
    BookingConflict,
    #[error("{0} not found")]
    NotFound(Entity),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// The full failure taxonomy of the enrollment workflow. The HTTP layer maps
/// conflicts to 400, missing records to 404, authorization failures to 401
/// and storage failures to 500.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("student is already enrolled in this course")]
    AlreadyEnrolled,
    #[error("an open booking already exists for this course")]
    BookingAlreadyExists,
    #[error("start date must fall before end date")]
    InvalidDateRange,
    #[error("calculated price must be greater than zero")]
    InvalidPrice,
    #[error(transparent)]
    Transition(TransitionError),
    #[error("course not found")]
    CourseNotFound,
    #[error("payment not found")]
    PaymentNotFound,
    #[error("enrollment not found")]
    EnrollmentNotFound,
    #[error("booking not found")]
    BookingNotFound,
    #[error("payment does not belong to the caller")]
    NotOwner,
    #[error("this action requires the {0} role")]
    RoleRequired(ActorRole),
    #[error("storage failure")]
    Store(#[source] StoreError),
}

impl DomainError {
    /// Store conflicts become their domain counterparts so handlers never
    /// inspect `StoreError` themselves; everything unmapped stays a storage
    /// failure.
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::EnrollmentConflict => DomainError::AlreadyEnrolled,
            StoreError::BookingConflict => DomainError::BookingAlreadyExists,
            StoreError::NotFound(Entity::Course) => DomainError::CourseNotFound,
            StoreError::NotFound(Entity::Enrollment) => DomainError::EnrollmentNotFound,
            StoreError::NotFound(Entity::Booking) => DomainError::BookingNotFound,
            StoreError::NotFound(Entity::Payment) => DomainError::PaymentNotFound,
            StoreError::Transition(err) => DomainError::Transition(err),
            err => DomainError::Store(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::PaymentOutcome;
    use crate::models::{PaymentStatus, UnknownValue};

    #[test]
    fn store_conflicts_map_to_domain_conflicts() {
        assert!(matches!(
            DomainError::from_store(StoreError::EnrollmentConflict),
            DomainError::AlreadyEnrolled
        ));
        assert!(matches!(
            DomainError::from_store(StoreError::NotFound(Entity::Payment)),
            DomainError::PaymentNotFound
        ));
        assert!(matches!(
            DomainError::from_store(StoreError::Transition(TransitionError::Conflicting {
                recorded: PaymentStatus::Paid,
                reported: PaymentOutcome::Failed,
            })),
            DomainError::Transition(_)
        ));
    }

    #[test]
    fn backend_failures_stay_storage_failures() {
        let err = DomainError::from_store(StoreError::Backend(
            UnknownValue::new("booking status", "REFUNDED").to_string(),
        ));
        assert!(matches!(err, DomainError::Store(_)));
        // the caller-facing message must not leak the backend detail
        assert_eq!(err.to_string(), "storage failure");
    }
}
