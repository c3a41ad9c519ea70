use rust_decimal::Decimal;
use serde_json::{Value, json};

/// Metadata key under which the payment snapshots the institution's
/// commission rate at creation time.
pub const RATE_KEY: &str = "commission_rate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutBreakdown {
    pub commission_amount: Decimal,
    pub net_amount: Decimal,
}

/// Splits a gross amount into platform commission and institution payout.
/// The rate is a percentage; the commission is rounded to cents before the
/// subtraction so gross = commission + net holds exactly.
pub fn payout_breakdown(gross: Decimal, rate: Decimal) -> PayoutBreakdown {
    let commission_amount = (gross * rate / Decimal::new(100, 0)).round_dp(2);
    PayoutBreakdown {
        commission_amount,
        net_amount: gross - commission_amount,
    }
}

pub fn rate_snapshot(rate: Decimal) -> Value {
    json!({ RATE_KEY: rate })
}

pub fn snapshot_rate(metadata: &Value) -> Option<Decimal> {
    let raw = metadata.get(RATE_KEY)?;
    serde_json::from_value(raw.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_gross_by_percentage() {
        let breakdown = payout_breakdown(Decimal::new(100, 0), Decimal::new(10, 0));
        assert_eq!(breakdown.commission_amount, Decimal::new(10, 0));
        assert_eq!(breakdown.net_amount, Decimal::new(90, 0));
    }

    #[test]
    fn rounds_commission_to_cents() {
        // 59.99 at 12.5% -> 7.49875, rounded to 7.50
        let breakdown = payout_breakdown(Decimal::new(5999, 2), Decimal::new(125, 1));
        assert_eq!(breakdown.commission_amount, Decimal::new(750, 2));
        assert_eq!(breakdown.net_amount, Decimal::new(5249, 2));
    }

    #[test]
    fn zero_rate_pays_out_everything() {
        let breakdown = payout_breakdown(Decimal::new(4250, 2), Decimal::ZERO);
        assert_eq!(breakdown.commission_amount, Decimal::ZERO);
        assert_eq!(breakdown.net_amount, Decimal::new(4250, 2));
    }

    #[test]
    fn snapshot_survives_metadata_round_trip() {
        let rate = Decimal::new(125, 1);
        assert_eq!(snapshot_rate(&rate_snapshot(rate)), Some(rate));
        assert_eq!(snapshot_rate(&json!({})), None);
    }
}
