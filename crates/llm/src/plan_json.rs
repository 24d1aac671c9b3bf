//! Recovers the structured plan embedded in model output.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use wayfarer_core::geo::DEFAULT_ROUTE_COLOR;
use wayfarer_core::money::canonical_currency;
use wayfarer_core::{DayPlan, ItineraryPlan, LngLat, Money, Poi, Route, DEFAULT_CURRENCY};

pub const PLAN_MARKER: &str = "NAV_PLAN_JSON:";
const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// Finds a plan object in model output. Candidates are tried in order: the
/// block after [`PLAN_MARKER`], the whole text, a fenced json block, and the
/// span from the first `{` to the last `}`.
pub fn extract_plan(raw: &str) -> Option<ItineraryPlan> {
    plan_candidates(raw).into_iter().find_map(|candidate| {
        serde_json::from_str::<Value>(candidate)
            .ok()
            .and_then(|value| parse_plan_value(&value))
    })
}

pub fn strip_plan_json(raw: &str) -> String {
    let mut text = raw.to_string();

    if let Some(marker) = text.find(PLAN_MARKER) {
        let end = marker_block_end(&text, marker);
        text = match end {
            Some(end) => format!("{}{}", &text[..marker], &text[end + 1..]),
            None => text[..marker].to_string(),
        };
    }
    if let Some((open, close)) = fenced_span(&text) {
        text = format!("{}{}", &text[..open], &text[close..]);
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return String::new();
    }
    trimmed.to_string()
}

pub fn parse_plan_value(value: &Value) -> Option<ItineraryPlan> {
    let node = value
        .get("navPlan")
        .filter(|inner| inner.is_object())
        .unwrap_or(value);
    let days = node.get("days")?.as_array()?;

    let base_budget = ["totalBudget", "baseBudget"]
        .iter()
        .filter_map(|key| node.get(*key))
        .find(|budget| budget.is_object())
        .and_then(parse_money);

    Some(ItineraryPlan {
        city_center: node.get("cityCenter").and_then(parse_coord),
        days: days.iter().map(parse_day).collect(),
        base_budget,
        base_budget_placeholder: false,
    })
}

fn plan_candidates(raw: &str) -> Vec<&str> {
    let mut candidates = Vec::new();

    if let Some(marker) = raw.find(PLAN_MARKER) {
        let after = marker + PLAN_MARKER.len();
        if let (Some(start), Some(end)) = (
            raw[after..].find('{').map(|offset| after + offset),
            marker_block_end(raw, marker),
        ) {
            candidates.push(&raw[start..=end]);
        }
    }
    candidates.push(raw.trim());
    if let Some((open, close)) = fenced_span(raw) {
        candidates.push(raw[open + JSON_FENCE.len()..close - FENCE.len()].trim());
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            candidates.push(&raw[start..=end]);
        }
    }
    candidates
}

fn marker_block_end(text: &str, marker: usize) -> Option<usize> {
    let after = marker + PLAN_MARKER.len();
    let start = text[after..].find('{').map(|offset| after + offset)?;
    matching_brace(text, start).or_else(|| text.rfind('}').filter(|end| *end > start))
}

fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn fenced_span(text: &str) -> Option<(usize, usize)> {
    let open = text.find(JSON_FENCE)?;
    let body = open + JSON_FENCE.len();
    let close = text[body..].find(FENCE)? + body + FENCE.len();
    Some((open, close))
}

fn parse_day(node: &Value) -> DayPlan {
    if let Some(summary) = node.as_str() {
        return DayPlan {
            summary: non_empty(summary),
            ..DayPlan::default()
        };
    }

    let routes = array_of(node, "routes")
        .filter_map(|route| {
            let polyline = route.get("polyline").and_then(Value::as_str)?.trim();
            if polyline.is_empty() {
                return None;
            }
            let color = route
                .get("color")
                .and_then(Value::as_str)
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_ROUTE_COLOR.to_string());
            Some(Route {
                polyline: polyline.to_string(),
                color,
            })
        })
        .collect();

    let pois = array_of(node, "pois")
        .filter_map(|poi| {
            let name = poi.get("name").and_then(Value::as_str).and_then(non_empty)?;
            Some(Poi {
                name,
                coord: poi.get("coord").and_then(parse_coord),
                kind: poi.get("type").and_then(Value::as_str).and_then(non_empty),
            })
        })
        .collect();

    DayPlan {
        summary: node.get("summary").and_then(Value::as_str).and_then(non_empty),
        routes,
        pois,
    }
}

fn array_of<'a>(node: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    node.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn parse_coord(value: &Value) -> Option<LngLat> {
    match value {
        Value::String(text) => LngLat::parse(text),
        Value::Array(parts) if parts.len() >= 2 => {
            LngLat::from_parts(number_of(&parts[0])?, number_of(&parts[1])?)
        }
        _ => None,
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn parse_money(node: &Value) -> Option<Money> {
    let text = match node.get("amount")? {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().replace(',', ""),
        _ => return None,
    };
    let amount = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
        .filter(|amount| *amount > Decimal::ZERO)?;

    let currency = node
        .get("currency")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            canonical_currency(value)
                .map(ToString::to_string)
                .unwrap_or_else(|| value.to_uppercase())
        })
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    Some(Money::new(amount, currency))
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MARKED: &str = "第1天：故宫、景山\n\nNAV_PLAN_JSON: {\"cityCenter\":[116.4,39.9],\"days\":[{\"summary\":\"午门入 }\",\"pois\":[{\"name\":\"故宫\",\"coord\":[116.397,39.918],\"type\":\"sight\"},{\"name\":\"景山\",\"coord\":[]}]}],\"totalBudget\":{\"amount\":3000,\"currency\":\"人民币\"}}\n祝旅途愉快";

    #[test]
    fn reads_block_after_marker() {
        let plan = extract_plan(MARKED).unwrap();
        assert_eq!(plan.city_center, Some(LngLat::new(116.4, 39.9)));
        assert_eq!(plan.days.len(), 1);
        assert_eq!(plan.days[0].summary.as_deref(), Some("午门入 }"));
        assert_eq!(plan.days[0].pois[0].kind.as_deref(), Some("sight"));
        assert_eq!(plan.days[0].pois[1].coord, None);
        assert_eq!(plan.base_budget, Some(Money::cny(dec!(3000))));
        assert!(!plan.base_budget_placeholder);
    }

    #[test]
    fn strips_marker_block_from_prose() {
        let prose = strip_plan_json(MARKED);
        assert!(prose.starts_with("第1天：故宫、景山"));
        assert!(prose.ends_with("祝旅途愉快"));
        assert!(!prose.contains(PLAN_MARKER));
        assert!(!prose.contains("cityCenter"));
    }

    #[test]
    fn unwraps_nav_plan_and_blanks_pure_json() {
        let raw = r#"{"displayText":"两日游","navPlan":{"days":[{"summary":"外滩"}],"baseBudget":{"amount":"1,200","currency":"usd"}}}"#;
        let plan = extract_plan(raw).unwrap();
        assert_eq!(plan.days[0].summary.as_deref(), Some("外滩"));
        assert_eq!(plan.base_budget, Some(Money::new(dec!(1200), "USD")));
        assert_eq!(strip_plan_json(raw), "");
    }

    #[test]
    fn reads_fenced_block() {
        let raw = "说明\n```json\n{\"days\":[{\"pois\":[{\"name\":\"西湖\",\"coord\":\"120.15,30.24\"}]}]}\n```\n结束";
        let plan = extract_plan(raw).unwrap();
        assert_eq!(plan.days[0].pois[0].coord, Some(LngLat::new(120.15, 30.24)));
        assert_eq!(strip_plan_json(raw), "说明\n\n结束");
    }

    #[test]
    fn falls_back_to_outer_braces() {
        let raw = "行程如下 {\"days\": [{\"routes\":[{\"polyline\":\"120.1,30.2;120.2,30.3\"},{\"polyline\":\"\"}]}]} 以上";
        let plan = extract_plan(raw).unwrap();
        assert_eq!(plan.days[0].routes.len(), 1);
        assert_eq!(plan.days[0].routes[0].color, DEFAULT_ROUTE_COLOR);
    }

    #[test]
    fn rejects_text_without_days() {
        assert!(extract_plan("只有文字 {不是json}").is_none());
        assert!(extract_plan(r#"{"cityCenter":[116.4,39.9]}"#).is_none());
        assert!(extract_plan("").is_none());
        assert_eq!(strip_plan_json("第1天：故宫"), "第1天：故宫");
    }

    #[test]
    fn drops_out_of_range_coordinates() {
        let raw = r#"{"cityCenter":[200,10],"days":[{"pois":[{"name":"甲","coord":[116.4,95]},{"name":" "}]}]}"#;
        let plan = extract_plan(raw).unwrap();
        assert_eq!(plan.city_center, None);
        assert_eq!(plan.days[0].pois.len(), 1);
        assert_eq!(plan.days[0].pois[0].coord, None);
    }
}
