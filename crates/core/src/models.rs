use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CURRENCY: &str = "CNY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn cny(amount: Decimal) -> Self {
        Self::new(amount, DEFAULT_CURRENCY)
    }
}

/// Amount carried by a budget line. `Superseded` marks an item whose value is
/// already part of its category's declared total and must not be summed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<Decimal>", into = "Option<Decimal>")]
pub enum Amount {
    Counted(Decimal),
    Superseded,
}

impl Amount {
    pub fn counted(self) -> Decimal {
        match self {
            Self::Counted(value) => value,
            Self::Superseded => Decimal::ZERO,
        }
    }
}

impl From<Option<Decimal>> for Amount {
    fn from(value: Option<Decimal>) -> Self {
        value.map(Self::Counted).unwrap_or(Self::Superseded)
    }
}

impl From<Amount> for Option<Decimal> {
    fn from(value: Amount) -> Self {
        match value {
            Amount::Counted(value) => Some(value),
            Amount::Superseded => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BudgetCategoryName {
    #[serde(rename = "住宿")]
    Lodging,
    #[serde(rename = "餐饮")]
    Dining,
    #[serde(rename = "交通")]
    Transport,
    #[serde(rename = "门票")]
    Tickets,
    #[serde(rename = "其他")]
    Other,
}

impl BudgetCategoryName {
    pub const CANONICAL: [Self; 4] = [Self::Lodging, Self::Dining, Self::Transport, Self::Tickets];

    pub fn recognize(label: &str) -> Option<Self> {
        let label = label.trim();
        let lower = label.to_lowercase();
        if label.starts_with("住宿") || lower.starts_with("lodging") {
            Some(Self::Lodging)
        } else if label.starts_with("餐饮") || lower.starts_with("dining") {
            Some(Self::Dining)
        } else if label.starts_with("交通") || lower.starts_with("transport") {
            Some(Self::Transport)
        } else if label.starts_with("门票") || lower.starts_with("tickets") {
            Some(Self::Tickets)
        } else if label.starts_with("其他") || lower.starts_with("other") {
            Some(Self::Other)
        } else {
            None
        }
    }

    pub fn infer_from_item(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if contains_any(
            &lower,
            &["酒店", "民宿", "宾馆", "旅店", "客栈", "青旅", "hotel", "inn", "hostel"],
        ) {
            Some(Self::Lodging)
        } else if contains_any(&lower, &["门票", "票", "入场券", "ticket"]) {
            Some(Self::Tickets)
        } else if contains_any(
            &lower,
            &["打车", "出租车", "地铁", "公交", "车费", "滴滴", "taxi"],
        ) {
            Some(Self::Transport)
        } else if contains_any(
            &lower,
            &[
                "餐厅", "餐馆", "饭店", "菜馆", "小吃", "美食", "人均", "顿", "早餐", "午餐",
                "晚餐",
            ],
        ) {
            Some(Self::Dining)
        } else {
            None
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Self::Lodging => "住宿",
            Self::Dining => "餐饮",
            Self::Transport => "交通",
            Self::Tickets => "门票",
            Self::Other => "其他",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetItem {
    pub name: String,
    pub amount: Amount,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetCategory {
    pub name: BudgetCategoryName,
    pub items: Vec<BudgetItem>,
    pub total: Decimal,
    pub currency: Option<String>,
}

impl BudgetCategory {
    pub fn item_sum(&self) -> Decimal {
        self.items.iter().map(|item| item.amount.counted()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetBreakdown {
    pub categories: Vec<BudgetCategory>,
    pub grand_total: Decimal,
    pub currency: Option<String>,
    pub aligned: bool,
    #[serde(default)]
    pub estimated: bool,
}

impl BudgetBreakdown {
    pub fn empty() -> Self {
        Self {
            categories: Vec::new(),
            grand_total: Decimal::ZERO,
            currency: None,
            aligned: true,
            estimated: false,
        }
    }

    pub fn category(&self, name: BudgetCategoryName) -> Option<&BudgetCategory> {
        self.categories.iter().find(|category| category.name == name)
    }
}

impl Default for BudgetBreakdown {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (lng, lat) = value.trim().split_once(',')?;
        let lng = lng.trim().parse::<f64>().ok()?;
        let lat = lat.trim().parse::<f64>().ok()?;
        Self::from_parts(lng, lat)
    }

    pub fn from_parts(lng: f64, lat: f64) -> Option<Self> {
        let valid = lng.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(&lng)
            && (-90.0..=90.0).contains(&lat);
        valid.then_some(Self { lng, lat })
    }

    pub fn to_pair(self) -> String {
        format!("{},{}", self.lng, self.lat)
    }
}

impl From<[f64; 2]> for LngLat {
    fn from(value: [f64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<LngLat> for [f64; 2] {
    fn from(value: LngLat) -> Self {
        [value.lng, value.lat]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coord: Option<LngLat>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Poi {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            coord: None,
            kind: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub polyline: String,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub pois: Vec<Poi>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryPlan {
    #[serde(default)]
    pub city_center: Option<LngLat>,
    #[serde(default)]
    pub days: Vec<DayPlan>,
    #[serde(default)]
    pub base_budget: Option<Money>,
    #[serde(default)]
    pub base_budget_placeholder: bool,
}

impl ItineraryPlan {
    pub fn single_day(summary: impl Into<String>, city_center: Option<LngLat>) -> Self {
        Self {
            city_center,
            days: vec![DayPlan {
                summary: Some(summary.into()),
                routes: Vec::new(),
                pois: Vec::new(),
            }],
            base_budget: None,
            base_budget_placeholder: false,
        }
    }

    pub fn has_typed_pois(&self) -> bool {
        self.days.iter().any(|day| {
            day.pois.iter().any(|poi| {
                poi.kind
                    .as_deref()
                    .map(|kind| !kind.trim().is_empty())
                    .unwrap_or(false)
            })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoiClass {
    Attraction,
    Lodging,
    Restaurant,
    Transport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub title: String,
    pub attractions: Vec<String>,
    pub lodging: Vec<String>,
    pub restaurants: Vec<String>,
    pub transport: Vec<String>,
}

impl DailyRecord {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn add(&mut self, class: PoiClass, name: &str) {
        let bucket = match class {
            PoiClass::Attraction => &mut self.attractions,
            PoiClass::Lodging => &mut self.lodging,
            PoiClass::Restaurant => &mut self.restaurants,
            PoiClass::Transport => &mut self.transport,
        };
        if !bucket.iter().any(|existing| existing == name) {
            bucket.push(name.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attractions.is_empty()
            && self.lodging.is_empty()
            && self.restaurants.is_empty()
            && self.transport.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    pub text: String,
    #[serde(default)]
    pub city: Option<String>,
}

impl PlanRequest {
    pub fn declared_city(&self) -> Option<&str> {
        self.city
            .as_deref()
            .map(str::trim)
            .filter(|city| !city.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub plan: ItineraryPlan,
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<Vec<DailyRecord>>,
    pub budget: BudgetBreakdown,
    pub budget_aligned: bool,
}

pub(crate) fn contains_any(input: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| input.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn superseded_amount_serializes_as_null() {
        let item = BudgetItem {
            name: "酒店A".to_string(),
            amount: Amount::Superseded,
            currency: "CNY".to_string(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert!(json["amount"].is_null());

        let back: BudgetItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.amount, Amount::Superseded);
        assert_eq!(Amount::Counted(dec!(12)).counted(), dec!(12));
    }

    #[test]
    fn category_names_serialize_as_labels() {
        let json = serde_json::to_string(&BudgetCategoryName::Lodging).unwrap();
        assert_eq!(json, "\"住宿\"");
        assert_eq!(
            BudgetCategoryName::recognize("住宿（3晚）"),
            Some(BudgetCategoryName::Lodging)
        );
        assert_eq!(BudgetCategoryName::recognize("酒店"), None);
    }

    #[test]
    fn infers_item_categories_from_keywords() {
        assert_eq!(
            BudgetCategoryName::infer_from_item("如家酒店 2晚"),
            Some(BudgetCategoryName::Lodging)
        );
        assert_eq!(
            BudgetCategoryName::infer_from_item("烤鸭店 人均150 × 2人"),
            Some(BudgetCategoryName::Dining)
        );
        assert_eq!(
            BudgetCategoryName::infer_from_item("滴滴打车"),
            Some(BudgetCategoryName::Transport)
        );
        assert_eq!(BudgetCategoryName::infer_from_item("纪念品"), None);
    }

    #[test]
    fn coordinates_round_trip_as_pairs() {
        let coord = LngLat::parse("116.397,39.918").unwrap();
        assert_eq!(coord, LngLat::new(116.397, 39.918));
        assert_eq!(serde_json::to_string(&coord).unwrap(), "[116.397,39.918]");
        assert!(LngLat::parse("200,10").is_none());
        assert!(LngLat::parse("oops").is_none());
    }

    #[test]
    fn daily_record_deduplicates_in_order() {
        let mut record = DailyRecord::titled("第 1 天");
        record.add(PoiClass::Attraction, "故宫");
        record.add(PoiClass::Attraction, "景山");
        record.add(PoiClass::Attraction, "故宫");
        assert_eq!(record.attractions, vec!["故宫", "景山"]);
    }
}
