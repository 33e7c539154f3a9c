#[cfg(test)]
mod lmsr_property_tests {
    use crate::fixed::{LEDGER_SCALE, WAD};
    use crate::lmsr_core::{buy_quote, cost, max_subsidy, prices, sell_quote};
    use proptest::prelude::*;

    const S: i128 = LEDGER_SCALE;

    fn liquidity() -> impl Strategy<Value = i128> {
        // 0.1 .. 10_000 units of liquidity
        (S / 10)..(10_000 * S)
    }

    fn quantities() -> impl Strategy<Value = Vec<i128>> {
        prop::collection::vec(0i128..(1_000_000 * S), 2..8)
    }

    proptest! {
        // Prices form a distribution strictly inside (0, 1)
        #[test]
        fn prices_sum_to_one(q in quantities(), b in liquidity()) {
            let p = prices(&q, b).unwrap();
            let sum: i128 = p.iter().sum();
            prop_assert!((sum - WAD).abs() <= q.len() as i128, "sum={}", sum);
            for pk in &p {
                prop_assert!(*pk > 0 && *pk < WAD, "price out of range: {}", pk);
            }
        }

        // Buying costs something, more for more, nothing for nothing
        #[test]
        fn buy_quote_monotone_in_amount(
            q in quantities(),
            b in liquidity(),
            k in 0usize..8,
            d1 in 0i128..(1_000 * S),
            d2 in 0i128..(1_000 * S),
        ) {
            let k = k % q.len();
            let (small, large) = if d1 <= d2 { (d1, d2) } else { (d2, d1) };
            prop_assert_eq!(buy_quote(&q, b, k, 0).unwrap(), 0);
            let a = buy_quote(&q, b, k, small).unwrap();
            let c = buy_quote(&q, b, k, large).unwrap();
            prop_assert!(a >= 0);
            prop_assert!(c >= a, "quote({})={} > quote({})={}", small, a, large, c);
        }

        // Selling back at the post-buy state exactly cancels the buy
        #[test]
        fn single_state_round_trip_is_exact(
            q in quantities(),
            b in liquidity(),
            k in 0usize..8,
            delta in 1i128..(10_000 * S),
        ) {
            let k = k % q.len();
            let paid = buy_quote(&q, b, k, delta).unwrap();
            let mut after = q.clone();
            after[k] += delta;
            let received = sell_quote(&after, b, k, delta).unwrap();
            prop_assert_eq!(paid, received);
        }

        // The cost function never decreases when any quantity grows
        #[test]
        fn cost_monotone_in_each_quantity(
            q in quantities(),
            b in liquidity(),
            k in 0usize..8,
            bump in 1i128..(100 * S),
        ) {
            let k = k % q.len();
            let mut bumped = q.clone();
            bumped[k] += bump;
            prop_assert!(cost(&bumped, b).unwrap() >= cost(&q, b).unwrap());
        }

        // Market maker loss over any trade path from zero stays within b*ln(N)
        #[test]
        fn worst_case_subsidy_is_bounded(
            n in 2usize..6,
            b in (S)..(1_000 * S),
            ops in prop::collection::vec((0usize..6, 1i128..(5_000 * S), any::<bool>()), 1..60),
        ) {
            let mut q = vec![0i128; n];
            let mut collected: i128 = 0;
            for (k, amount, sell) in ops {
                let k = k % n;
                if sell {
                    let amount = amount.min(q[k]);
                    if amount == 0 {
                        continue;
                    }
                    collected -= sell_quote(&q, b, k, amount).unwrap();
                    q[k] -= amount;
                } else {
                    collected += buy_quote(&q, b, k, amount).unwrap();
                    q[k] += amount;
                }
            }
            // costs telescope exactly
            prop_assert_eq!(collected, cost(&q, b).unwrap() - cost(&vec![0; n], b).unwrap());

            let worst_payout = *q.iter().max().unwrap();
            let bound = max_subsidy(n, b).unwrap();
            prop_assert!(
                worst_payout - collected <= bound + 2,
                "loss {} exceeds bound {}", worst_payout - collected, bound
            );
        }
    }

    // Path independence: split purchases cost the same as one purchase
    #[test]
    fn split_purchase_matches_single_purchase() {
        let b = 5000 * S;
        let q = vec![100 * S, 200 * S, 0];
        let direct = buy_quote(&q, b, 0, 100 * S).unwrap();

        let first = buy_quote(&q, b, 0, 50 * S).unwrap();
        let mut mid = q.clone();
        mid[0] += 50 * S;
        let second = buy_quote(&mid, b, 0, 50 * S).unwrap();
        assert_eq!(direct, first + second);
    }

    // Marginal cost rises with each further unit
    #[test]
    fn marginal_cost_increases() {
        let b = 100 * S;
        let mut q = vec![0i128; 3];
        let mut prev = 0;
        for _ in 0..20 {
            let step = buy_quote(&q, b, 1, 10 * S).unwrap();
            assert!(step > prev, "step {} not above {}", step, prev);
            prev = step;
            q[1] += 10 * S;
        }
        // never more than one unit per share
        assert!(prev <= 10 * S);
    }

    // Pushing one outcome to near certainty approaches the bound from below
    #[test]
    fn amm_loss_approaches_bound_at_certainty() {
        let b = 1000 * S;
        let n = 4;
        let q = vec![20_000 * S, 0, 0, 0];
        let collected = cost(&q, b).unwrap() - cost(&vec![0; n], b).unwrap();
        let loss = q[0] - collected;
        let bound = max_subsidy(n, b).unwrap();
        assert!(loss <= bound + 1);
        assert!(loss > bound - S, "loss {} should be close to {}", loss, bound);
    }
}
