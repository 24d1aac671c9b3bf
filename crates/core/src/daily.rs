//! Day splitting and point-of-interest classification for itinerary prose.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::models::{contains_any, DailyRecord, ItineraryPlan, PoiClass};

static CN_DAY_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[#>*\-\t ]*第\s*([0-9一二三四五六七八九十]+)\s*天[^\n]*")
        .expect("valid chinese day heading regex")
});

static EN_DAY_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^[#>*\-\t ]*(?:day|d)\s*([0-9]+)[^\n]*").expect("valid day heading regex")
});

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[#>*\s\-•·]+").expect("valid list marker regex"));

static FRAGMENT_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[、，,；;\s]+").expect("valid fragment separator regex"));

static DAY_TITLE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:第\s*[0-9一二三四五六七八九十]+\s*天|day\s*[0-9]+|d[0-9]+)\s*[：:]?")
        .expect("valid day title prefix regex")
});

static TRAILING_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[。.!！？?…]+$").expect("valid punctuation regex"));

/// Ordered classification rules; the first matching pattern decides.
/// `None` marks fragments that are not places at all (prices, budget talk).
static FRAGMENT_RULES: Lazy<Vec<(Regex, Option<PoiClass>)>> = Lazy::new(|| {
    [
        (
            r"(?i)预算|费用|花费|人均|价格|约\s*[0-9]+|¥|￥|元|CNY|RMB|合计|小计|[：:]\s*[0-9]|^[0-9]+(?:\.[0-9]+)?$",
            None,
        ),
        (
            r"(?i)酒店|民宿|宾馆|旅店|客栈|青旅|入住|住宿|inn|hostel|hotel",
            Some(PoiClass::Lodging),
        ),
        (
            r"餐厅|餐馆|饭店|酒楼|菜馆|小吃|美食|早餐|午餐|晚餐|早茶|夜宵|奶茶|茶馆|咖啡|咖啡馆|烘焙|甜品|糕点|面馆|粉馆|烧烤|火锅|烤鸭|米线|螺蛳粉|小笼包|包子|馄饨|粉丝汤|拉面|牛肉面|汤包|生煎|串串|蟹黄汤包|砂锅|汤|面|粉",
            Some(PoiClass::Restaurant),
        ),
        (
            r"地铁|公交|火车|高铁|航班|机场|车站|码头|出租车|打车|步行|骑行|交通|抵达|到达|出发|前往|转乘|换乘",
            Some(PoiClass::Transport),
        ),
    ]
    .into_iter()
    .map(|(pattern, class)| (Regex::new(pattern).expect("valid fragment rule"), class))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySegment<'a> {
    pub title: String,
    pub body: &'a str,
}

pub fn split_days(text: &str) -> Vec<DaySegment<'_>> {
    let (pattern, english) = if CN_DAY_HEADING.is_match(text) {
        (&*CN_DAY_HEADING, false)
    } else {
        (&*EN_DAY_HEADING, true)
    };

    let starts = pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?.as_str();
            let title = if english {
                format!("Day {number}")
            } else {
                format!("第 {number} 天")
            };
            Some((whole.start(), title))
        })
        .collect::<Vec<_>>();

    starts
        .iter()
        .enumerate()
        .map(|(idx, (start, title))| {
            let end = starts
                .get(idx + 1)
                .map(|(next, _)| *next)
                .unwrap_or(text.len());
            DaySegment {
                title: title.clone(),
                body: &text[*start..end],
            }
        })
        .collect()
}

pub fn daily_from_text(text: &str) -> Option<Vec<DailyRecord>> {
    let segments = split_days(text);
    if segments.is_empty() {
        return None;
    }

    Some(
        segments
            .into_iter()
            .map(|segment| {
                let mut record = DailyRecord::titled(segment.title);
                for fragment in fragments(segment.body) {
                    let name = clean_fragment(&fragment);
                    if name.graphemes(true).count() < 2 {
                        continue;
                    }
                    if let Some(class) = classify_fragment(&name) {
                        record.add(class, &name);
                    }
                }
                record
            })
            .collect(),
    )
}

pub fn daily_from_plan(plan: &ItineraryPlan) -> Vec<DailyRecord> {
    plan.days
        .iter()
        .enumerate()
        .map(|(idx, day)| {
            let mut record = DailyRecord::titled(format!("第 {} 天", idx + 1));
            for poi in &day.pois {
                let name = poi.name.trim();
                if name.graphemes(true).count() < 2 {
                    continue;
                }
                record.add(classify_poi_type(poi.kind.as_deref()), name);
            }
            record
        })
        .collect()
}

pub fn classify_fragment(fragment: &str) -> Option<PoiClass> {
    FRAGMENT_RULES
        .iter()
        .find(|(pattern, _)| pattern.is_match(fragment))
        .map(|(_, class)| *class)
        .unwrap_or(Some(PoiClass::Attraction))
}

pub fn classify_poi_type(kind: Option<&str>) -> PoiClass {
    let kind = kind.unwrap_or_default().trim().to_lowercase();
    if contains_any(&kind, &["hotel", "lodg", "inn", "hostel", "住宿", "酒店"]) {
        PoiClass::Lodging
    } else if contains_any(&kind, &["rest", "food", "cafe", "bar", "餐", "美食", "小吃"]) {
        PoiClass::Restaurant
    } else if contains_any(
        &kind,
        &["transport", "metro", "subway", "bus", "train", "airport", "车站", "地铁"],
    ) {
        PoiClass::Transport
    } else {
        PoiClass::Attraction
    }
}

fn fragments(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in body.lines() {
        let line = LIST_MARKER.replace(line.trim(), "");
        if line.chars().count() < 2 {
            continue;
        }
        out.extend(
            FRAGMENT_SEPARATOR
                .split(&line)
                .filter(|part| part.graphemes(true).count() >= 2)
                .map(ToString::to_string),
        );
    }
    out
}

fn clean_fragment(fragment: &str) -> String {
    let without_title = DAY_TITLE_PREFIX.replace(fragment.trim(), "");
    let without_punct = TRAILING_PUNCTUATION.replace(without_title.trim(), "");
    let mut name = without_punct.trim();
    for suffix in ["之类", "等"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            name = stripped.trim_end();
        }
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DayPlan, Poi};

    const PROSE: &str = "行程如下\n### 第1天：故宫、景山公园\n- 午餐：四季民福烤鸭\n- 晚上入住全季酒店\n- 人均 200 元\n### 第2天\n地铁前往颐和园，南锣鼓巷等。\n";

    #[test]
    fn splits_chinese_day_headings() {
        let segments = split_days(PROSE);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].title, "第 1 天");
        assert!(segments[0].body.starts_with("### 第1天"));
        assert!(segments[1].body.contains("颐和园"));
    }

    #[test]
    fn falls_back_to_english_headings_only_without_chinese_ones() {
        let segments = split_days("Day 1: Louvre\nDay 2: Versailles");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].title, "Day 2");

        let mixed = split_days("第1天 故宫\nDay 2 长城");
        assert_eq!(mixed.len(), 1);
    }

    #[test]
    fn classifies_fragments_per_day() {
        let daily = daily_from_text(PROSE).unwrap();
        assert_eq!(daily.len(), 2);

        let first = &daily[0];
        assert_eq!(first.attractions, vec!["故宫", "景山公园"]);
        assert!(first.restaurants.iter().any(|name| name.contains("烤鸭")));
        assert!(first.lodging.iter().any(|name| name.contains("酒店")));
        assert!(first.attractions.iter().all(|name| !name.contains("200")));

        let second = &daily[1];
        assert!(second.transport.iter().any(|name| name.starts_with("地铁")));
        assert!(second.attractions.contains(&"南锣鼓巷".to_string()));
    }

    #[test]
    fn rules_apply_in_priority_order() {
        assert_eq!(classify_fragment("酒店早餐费用"), None);
        assert_eq!(classify_fragment("酒店早餐"), Some(PoiClass::Lodging));
        assert_eq!(classify_fragment("北京站"), Some(PoiClass::Attraction));
        assert_eq!(classify_fragment("北京南站出发"), Some(PoiClass::Transport));
        assert_eq!(classify_fragment("兰州拉面"), Some(PoiClass::Restaurant));
        assert_eq!(classify_fragment("天坛"), Some(PoiClass::Attraction));
    }

    #[test]
    fn prose_without_headings_needs_fallback() {
        assert!(daily_from_text("先去故宫，再去景山，晚上吃烤鸭").is_none());
    }

    #[test]
    fn typed_points_use_their_tags() {
        let plan = ItineraryPlan {
            days: vec![DayPlan {
                summary: None,
                routes: Vec::new(),
                pois: vec![
                    Poi {
                        name: "全季酒店".to_string(),
                        coord: None,
                        kind: Some("Hotel".to_string()),
                    },
                    Poi {
                        name: "大董".to_string(),
                        coord: None,
                        kind: Some("restaurant".to_string()),
                    },
                    Poi {
                        name: "首都机场".to_string(),
                        coord: None,
                        kind: Some("airport".to_string()),
                    },
                    Poi::named("故宫"),
                    Poi::named("x"),
                ],
            }],
            ..ItineraryPlan::default()
        };
        let daily = daily_from_plan(&plan);
        assert_eq!(daily[0].title, "第 1 天");
        assert_eq!(daily[0].lodging, vec!["全季酒店"]);
        assert_eq!(daily[0].restaurants, vec!["大董"]);
        assert_eq!(daily[0].transport, vec!["首都机场"]);
        assert_eq!(daily[0].attractions, vec!["故宫"]);
    }
}
