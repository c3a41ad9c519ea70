use serde::{Deserialize, Serialize};

use crate::models::{BookingStatus, PaymentStatus};

/// Advisory findings for one booking and the payments attached to it.
/// Callers log the issues; nothing is ever auto-repaired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub valid: bool,
    pub issues: Vec<String>,
}

pub fn check_pair(booking: BookingStatus, payments: &[PaymentStatus]) -> ConsistencyReport {
    let mut issues = Vec::new();

    if payments.is_empty() {
        issues.push("booking has no payments attached".to_string());
    }
    let paid = payments
        .iter()
        .filter(|status| **status == PaymentStatus::Paid)
        .count();

    match booking {
        BookingStatus::Pending => {
            for status in payments {
                if status.is_terminal() {
                    issues.push(format!(
                        "booking still PENDING but payment already {}",
                        status.as_str()
                    ));
                }
            }
        }
        BookingStatus::Completed => {
            if paid == 0 {
                issues.push("booking COMPLETED without a PAID payment".to_string());
            }
        }
        BookingStatus::Failed => {
            if paid > 0 {
                issues.push("booking FAILED but a payment is PAID".to_string());
            }
        }
    }

    ConsistencyReport {
        valid: issues.is_empty(),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_booking_with_pending_payment_is_valid() {
        let report = check_pair(BookingStatus::Pending, &[PaymentStatus::Pending]);
        assert!(report.valid);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn terminal_payment_under_pending_booking_is_flagged() {
        let report = check_pair(BookingStatus::Pending, &[PaymentStatus::Paid]);
        assert!(!report.valid);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn completed_booking_requires_a_paid_payment() {
        assert!(check_pair(BookingStatus::Completed, &[PaymentStatus::Paid]).valid);

        let report = check_pair(BookingStatus::Completed, &[PaymentStatus::Failed]);
        assert!(!report.valid);
        assert_eq!(
            report.issues,
            vec!["booking COMPLETED without a PAID payment".to_string()]
        );
    }

    #[test]
    fn failed_booking_must_not_hold_a_paid_payment() {
        assert!(check_pair(BookingStatus::Failed, &[PaymentStatus::Failed]).valid);
        assert!(!check_pair(BookingStatus::Failed, &[PaymentStatus::Paid]).valid);
    }

    #[test]
    fn bookings_without_payments_are_flagged() {
        let report = check_pair(BookingStatus::Pending, &[]);
        assert!(!report.valid);
        assert_eq!(
            report.issues,
            vec!["booking has no payments attached".to_string()]
        );
    }
}
