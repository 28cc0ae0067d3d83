//! Reconciliation counters for archive replay. The engine computes every
//! swap itself; the archived on-chain values are authoritative, and any
//! disagreement is tallied here instead of halting the run.

use serde::Serialize;

use crate::events::SwapEvent;
use crate::swap::SwapResult;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationStats {
    pub swaps_checked: u64,
    pub exact_matches: u64,
    pub amount_out_mismatches: u64,
    pub lp_fee_mismatches: u64,
    pub protocol_fee_mismatches: u64,
    /// Cumulative signed differences, computed minus archived
    pub amount_out_diff: i128,
    pub lp_fee_diff: i128,
    pub protocol_fee_diff: i128,
}

impl ValidationStats {
    pub fn record(&mut self, computed: &SwapResult, expected: &SwapEvent) {
        self.swaps_checked += 1;
        let mut clean = true;

        if computed.amount_out != expected.amount_out {
            self.amount_out_mismatches += 1;
            self.amount_out_diff += signed_diff(computed.amount_out, expected.amount_out);
            clean = false;
        }
        if computed.lp_fee != expected.fee {
            self.lp_fee_mismatches += 1;
            self.lp_fee_diff += signed_diff(computed.lp_fee, expected.fee);
            clean = false;
        }
        if computed.protocol_fee != expected.protocol_fee {
            self.protocol_fee_mismatches += 1;
            self.protocol_fee_diff += signed_diff(computed.protocol_fee, expected.protocol_fee);
            clean = false;
        }

        if clean {
            self.exact_matches += 1;
        }
    }

    pub fn is_clean(&self) -> bool {
        self.swaps_checked == self.exact_matches
    }
}

fn signed_diff(computed: u128, expected: u128) -> i128 {
    if computed >= expected {
        i128::try_from(computed - expected).unwrap_or(i128::MAX)
    } else {
        i128::try_from(expected - computed)
            .map(|d| -d)
            .unwrap_or(i128::MIN)
    }
}

impl std::fmt::Display for ValidationStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "swaps={} exact={} amount_out_mismatches={} (diff {}) lp_fee_mismatches={} (diff {}) protocol_fee_mismatches={} (diff {})",
            self.swaps_checked,
            self.exact_matches,
            self.amount_out_mismatches,
            self.amount_out_diff,
            self.lp_fee_mismatches,
            self.lp_fee_diff,
            self.protocol_fee_mismatches,
            self.protocol_fee_diff,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn expected(amount_out: u128, fee: u128, protocol_fee: u128) -> SwapEvent {
        SwapEvent {
            amount_out,
            fee,
            protocol_fee,
            ..Default::default()
        }
    }

    fn computed(amount_out: u128, lp_fee: u128, protocol_fee: u128) -> SwapResult {
        SwapResult {
            amount_out,
            lp_fee,
            protocol_fee,
            ..Default::default()
        }
    }

    #[test]
    fn exact_match_counts_clean() {
        let mut stats = ValidationStats::default();
        stats.record(&computed(100, 8, 2), &expected(100, 8, 2));
        assert_eq!(stats.swaps_checked, 1);
        assert_eq!(stats.exact_matches, 1);
        assert!(stats.is_clean());
    }

    #[test]
    fn one_unit_mismatch_is_tallied_not_fatal() {
        let mut stats = ValidationStats::default();
        stats.record(&computed(99, 8, 2), &expected(100, 8, 2));
        assert_eq!(stats.amount_out_mismatches, 1);
        assert_eq!(stats.amount_out_diff, -1);
        assert_eq!(stats.exact_matches, 0);
        assert!(!stats.is_clean());

        stats.record(&computed(101, 8, 2), &expected(100, 8, 2));
        assert_eq!(stats.amount_out_mismatches, 2);
        assert_eq!(stats.amount_out_diff, 0);
    }

    #[test]
    fn fee_mismatches_are_tracked_separately() {
        let mut stats = ValidationStats::default();
        stats.record(&computed(100, 9, 1), &expected(100, 8, 2));
        assert_eq!(stats.amount_out_mismatches, 0);
        assert_eq!(stats.lp_fee_mismatches, 1);
        assert_eq!(stats.protocol_fee_mismatches, 1);
        assert_eq!(stats.lp_fee_diff, 1);
        assert_eq!(stats.protocol_fee_diff, -1);
    }
}
