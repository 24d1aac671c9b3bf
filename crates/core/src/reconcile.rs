use rust_decimal::Decimal;

use crate::models::{
    Amount, BudgetBreakdown, BudgetCategory, BudgetCategoryName, BudgetItem, Money,
    DEFAULT_CURRENCY,
};

/// Recomputes totals bottom-up and drops the "other" bucket. Never fails;
/// `aligned` turns false whenever a recorded value had to change.
pub fn reconcile(mut breakdown: BudgetBreakdown) -> BudgetBreakdown {
    let mut aligned = true;

    breakdown
        .categories
        .retain(|category| category.name != BudgetCategoryName::Other);

    for category in &mut breakdown.categories {
        let item_sum = category.item_sum();
        if item_sum > Decimal::ZERO && item_sum != category.total {
            category.total = item_sum;
            aligned = false;
        }
        if category.currency.is_none() {
            category.currency = category.items.first().map(|item| item.currency.clone());
        }
    }

    let grand_total = breakdown
        .categories
        .iter()
        .map(|category| category.total)
        .sum::<Decimal>();
    if grand_total != breakdown.grand_total {
        aligned = false;
    }
    breakdown.grand_total = grand_total;

    if breakdown.currency.is_none() {
        breakdown.currency = breakdown
            .categories
            .iter()
            .find_map(|category| category.currency.clone());
    }
    if breakdown.currency.is_none() {
        breakdown.currency = Some(DEFAULT_CURRENCY.to_string());
    }

    breakdown.aligned = aligned;
    breakdown
}

const ESTIMATE_SHARES: [(BudgetCategoryName, u32); 4] = [
    (BudgetCategoryName::Lodging, 40),
    (BudgetCategoryName::Dining, 30),
    (BudgetCategoryName::Transport, 15),
    (BudgetCategoryName::Tickets, 15),
];

pub fn needs_estimate(breakdown: &BudgetBreakdown) -> bool {
    let non_zero = breakdown
        .categories
        .iter()
        .filter(|category| category.total > Decimal::ZERO)
        .count();
    breakdown.grand_total <= Decimal::ZERO || non_zero < 2
}

/// Splits `base` across the canonical categories. The last share absorbs
/// rounding so the parts add up to `base` exactly.
pub fn estimate_breakdown(base: &Money) -> BudgetBreakdown {
    let mut allocated = Decimal::ZERO;
    let categories = ESTIMATE_SHARES
        .iter()
        .enumerate()
        .map(|(idx, (name, percent))| {
            let total = if idx + 1 == ESTIMATE_SHARES.len() {
                base.amount - allocated
            } else {
                (base.amount * Decimal::from(*percent) / Decimal::from(100)).round_dp(2)
            };
            allocated += total;
            BudgetCategory {
                name: *name,
                items: vec![BudgetItem {
                    name: format!("{}（估算）", name.as_label()),
                    amount: Amount::Counted(total),
                    currency: base.currency.clone(),
                }],
                total,
                currency: Some(base.currency.clone()),
            }
        })
        .collect::<Vec<_>>();

    BudgetBreakdown {
        categories,
        grand_total: base.amount,
        currency: Some(base.currency.clone()),
        aligned: false,
        estimated: true,
    }
}
