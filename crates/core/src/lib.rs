pub mod budget_parser;
pub mod daily;
pub mod geo;
pub mod lines;
pub mod models;
pub mod money;
pub mod normalizer;
pub mod reconcile;

pub use budget_parser::{parse_budget, parse_item, ParsedItem};
pub use daily::{classify_fragment, classify_poi_type, daily_from_plan, daily_from_text, split_days};
pub use models::*;
pub use money::stated_total;
pub use normalizer::normalize;
pub use reconcile::{estimate_breakdown, needs_estimate, reconcile};

/// Runs the full budget pipeline: normalize, parse, reconcile.
pub fn budget_from_text(text: &str) -> (String, BudgetBreakdown) {
    let normalized = normalize(text);
    let budget = reconcile(parse_budget(&normalized));
    (normalized, budget)
}
