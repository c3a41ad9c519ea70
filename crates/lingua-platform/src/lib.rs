pub mod config;
pub mod contracts;
pub mod db;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    BookingSummary, ConsistencyResponse, EnrollRequest, EnrollResponse, EnrollmentSummary,
    ErrorBody, PaymentDetailsPayload, PaymentSummary, PayoutSummary, ProcessPaymentRequest,
    ProcessPaymentResponse,
};
pub use db::connect_database;
pub use redis_bus::RedisBus;
