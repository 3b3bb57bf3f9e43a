//! Pari-mutuel settlement math. Pure functions over a poll's pools and
//! participations; applying the resulting deltas (and flipping status) is
//! the moderation engine's job and happens in one transaction.

use crate::config::{FEE_TOTAL, REFUND_RATE, REPUTATION_REWARD};
use crate::types::{Participation, ParticipationMode, PollOption};

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementEntry {
    pub user_id: i64,
    pub balance_delta: f64,
    pub reputation_delta: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SettlementBatch {
    pub entries: Vec<SettlementEntry>,
    /// Total currency leaving the pool.
    pub paid_out: f64,
    /// Remainder retained by the platform (fee, plus the whole payout pool
    /// when nobody staked the winning side).
    pub house_take: f64,
}

/// Settles a resolved poll.
///
/// Every staker gets `stake × REFUND_RATE` back unconditionally. Winners
/// additionally split the payout pool — the combined pool net of the refund
/// guarantee and the platform fee — proportionally to their stake. Correct
/// votes earn reputation; money never moves for votes.
pub fn settle_resolution(
    pool_a: f64,
    pool_b: f64,
    winning: PollOption,
    participations: &[Participation],
) -> SettlementBatch {
    let total = pool_a + pool_b;
    let winning_pool = match winning {
        PollOption::A => pool_a,
        PollOption::B => pool_b,
    };
    let payout_pool = total * (1.0 - REFUND_RATE) * (1.0 - FEE_TOTAL);

    let mut batch = SettlementBatch::default();
    for p in participations {
        match p.mode {
            ParticipationMode::Stake => {
                let refund = p.stake_amount * REFUND_RATE;
                // winning_pool = 0 means every staker lost; the payout pool
                // stays with the platform and only refunds go out.
                let settlement = if p.option == winning && winning_pool > 0.0 {
                    refund + p.stake_amount * (payout_pool / winning_pool)
                } else {
                    refund
                };
                batch.paid_out += settlement;
                batch.entries.push(SettlementEntry {
                    user_id: p.user_id,
                    balance_delta: settlement,
                    reputation_delta: 0,
                });
            }
            ParticipationMode::Vote => {
                if p.option == winning {
                    batch.entries.push(SettlementEntry {
                        user_id: p.user_id,
                        balance_delta: 0.0,
                        reputation_delta: REPUTATION_REWARD,
                    });
                }
            }
        }
    }
    batch.house_take = total - batch.paid_out;
    batch
}

/// Unwinds a cancelled (or invalidated) poll: every stake comes back in
/// full, no fee, no reputation changes.
pub fn settle_cancellation(participations: &[Participation]) -> SettlementBatch {
    let mut batch = SettlementBatch::default();
    for p in participations {
        if p.mode == ParticipationMode::Stake && p.stake_amount > 0.0 {
            batch.paid_out += p.stake_amount;
            batch.entries.push(SettlementEntry {
                user_id: p.user_id,
                balance_delta: p.stake_amount,
                reputation_delta: 0,
            });
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stake(user_id: i64, option: PollOption, amount: f64) -> Participation {
        Participation {
            poll_id: 1,
            user_id,
            mode: ParticipationMode::Stake,
            option,
            stake_amount: amount,
            created_at: Utc::now(),
        }
    }

    fn vote(user_id: i64, option: PollOption) -> Participation {
        Participation {
            poll_id: 1,
            user_id,
            mode: ParticipationMode::Vote,
            option,
            stake_amount: 0.0,
            created_at: Utc::now(),
        }
    }

    fn entry_for(batch: &SettlementBatch, user_id: i64) -> &SettlementEntry {
        batch
            .entries
            .iter()
            .find(|e| e.user_id == user_id)
            .expect("entry")
    }

    #[test]
    fn winning_staker_gets_refund_plus_pool_share() {
        // pool_a = 700, pool_b = 300, resolves A. A 100-stake on A receives
        // 100·0.15 + 100·(1000·0.85·0.93/700).
        let parts = vec![
            stake(1, PollOption::A, 100.0),
            stake(2, PollOption::A, 600.0),
            stake(3, PollOption::B, 300.0),
        ];
        let batch = settle_resolution(700.0, 300.0, PollOption::A, &parts);

        let expected = 100.0 * 0.15 + 100.0 * (1000.0 * 0.85 * 0.93 / 700.0);
        let got = entry_for(&batch, 1).balance_delta;
        assert!((got - expected).abs() < 1e-9, "got {got}, expected {expected}");
    }

    #[test]
    fn losing_staker_gets_refund_only() {
        // Same poll, a 50-stake on B: 50·0.15 = 7.5.
        let parts = vec![
            stake(1, PollOption::A, 700.0),
            stake(2, PollOption::B, 50.0),
            stake(3, PollOption::B, 250.0),
        ];
        let batch = settle_resolution(700.0, 300.0, PollOption::A, &parts);
        let got = entry_for(&batch, 2).balance_delta;
        assert!((got - 7.5).abs() < 1e-9, "got {got}");
        assert_eq!(entry_for(&batch, 2).reputation_delta, 0);
    }

    #[test]
    fn total_payout_never_exceeds_pool_net_of_fee() {
        let cases: Vec<Vec<Participation>> = vec![
            vec![stake(1, PollOption::A, 100.0), stake(2, PollOption::B, 100.0)],
            vec![
                stake(1, PollOption::A, 500.0),
                stake(2, PollOption::A, 1.0),
                stake(3, PollOption::B, 250.0),
                vote(4, PollOption::A),
            ],
            vec![stake(1, PollOption::B, 42.0)],
        ];
        for parts in cases {
            let pool_a: f64 = parts
                .iter()
                .filter(|p| p.option == PollOption::A)
                .map(|p| p.stake_amount)
                .sum();
            let pool_b: f64 = parts
                .iter()
                .filter(|p| p.option == PollOption::B)
                .map(|p| p.stake_amount)
                .sum();
            let total = pool_a + pool_b;
            let fee = total * (1.0 - REFUND_RATE) * FEE_TOTAL;

            let batch = settle_resolution(pool_a, pool_b, PollOption::A, &parts);
            assert!(
                batch.paid_out <= total - fee + 1e-9,
                "paid {} out of {total}",
                batch.paid_out
            );
            assert!(batch.house_take >= fee - 1e-9);
        }
    }

    #[test]
    fn empty_winning_pool_pays_refunds_only() {
        // Nobody staked A; A wins. Everyone is a loser, the payout pool
        // stays with the platform.
        let parts = vec![
            stake(1, PollOption::B, 200.0),
            stake(2, PollOption::B, 100.0),
        ];
        let batch = settle_resolution(0.0, 300.0, PollOption::A, &parts);

        assert!((entry_for(&batch, 1).balance_delta - 30.0).abs() < 1e-9);
        assert!((entry_for(&batch, 2).balance_delta - 15.0).abs() < 1e-9);
        assert!((batch.paid_out - 45.0).abs() < 1e-9);
        assert!((batch.house_take - 255.0).abs() < 1e-9);
    }

    #[test]
    fn correct_vote_earns_reputation_only() {
        let parts = vec![
            stake(1, PollOption::A, 100.0),
            vote(2, PollOption::A),
            vote(3, PollOption::B),
        ];
        let batch = settle_resolution(100.0, 0.0, PollOption::A, &parts);

        let winner_vote = entry_for(&batch, 2);
        assert_eq!(winner_vote.balance_delta, 0.0);
        assert_eq!(winner_vote.reputation_delta, REPUTATION_REWARD);
        assert!(batch.entries.iter().all(|e| e.user_id != 3));
    }

    #[test]
    fn cancellation_returns_every_stake_in_full() {
        let parts = vec![
            stake(1, PollOption::A, 100.0),
            stake(2, PollOption::B, 100.0),
            stake(3, PollOption::A, 100.0),
            vote(4, PollOption::B),
        ];
        let batch = settle_cancellation(&parts);

        assert_eq!(batch.entries.len(), 3);
        for user_id in [1, 2, 3] {
            let e = entry_for(&batch, user_id);
            assert!((e.balance_delta - 100.0).abs() < 1e-9);
            assert_eq!(e.reputation_delta, 0);
        }
        assert!((batch.paid_out - 300.0).abs() < 1e-9);
        assert_eq!(batch.house_take, 0.0);
    }
}
