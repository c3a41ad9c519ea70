pub mod commission;
pub mod consistency;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod models;
pub mod ports;

pub use commission::{PayoutBreakdown, payout_breakdown, rate_snapshot, snapshot_rate};
pub use consistency::{ConsistencyReport, check_pair};
pub use context::{ActorRole, RequestContext};
pub use coordinator::{EnrollmentCoordinator, EnrollmentIntent};
pub use error::{DomainError, Entity, StoreError};
pub use events::{DomainEvent, DomainEventKind};
pub use lifecycle::{
    AppliedOutcome, GatewayDetails, OutcomePlan, OutcomeReport, PaymentOutcome, TargetStates,
    TransitionError, apply_targets, plan_outcome,
};
pub use models::{
    Booking, BookingStatus, Course, Enrollment, EnrollmentStatus, Institution, Payment,
    PaymentState, PaymentStatus, Payout, UnknownValue,
};
pub use ports::{
    BookingRepository, CourseRepository, EnrollmentBundle, EnrollmentRepository, EventPublisher,
    MarketplaceStore, NewEnrollment, OutcomeRecord, PaymentRepository, PayoutRepository,
    WorkflowStore,
};
