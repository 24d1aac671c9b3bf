use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use crate::lines::{tokenize, Line, LineKind};
use crate::models::{
    Amount, BudgetBreakdown, BudgetCategory, BudgetCategoryName, BudgetItem,
};
use crate::money::{currency_or_default, detect_currency, last_amount, scan_amounts, AmountToken};

static PURE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:约|大约|≈)?\s*[0-9][0-9,]*(?:\.[0-9]+)?\s*(?:CNY|RMB|USD|EUR|JPY|人民币|美元|欧元|日元|元)?\s*(?:[（(][^）)]*[）)])?\s*(?:左右)?$",
    )
    .expect("valid pure amount regex")
});

static ITEM_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[；;]").expect("valid item separator regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItem {
    pub name: String,
    pub amount: Decimal,
    pub currency: Option<&'static str>,
}

pub fn parse_budget(text: &str) -> BudgetBreakdown {
    let lines = tokenize(text);
    let mut reducer = BudgetReducer::default();
    for line in budget_candidates(&lines) {
        reducer.feed(line);
    }
    reducer.finish()
}

fn budget_candidates<'a>(lines: &'a [Line<'a>]) -> Vec<&'a Line<'a>> {
    let section = lines
        .iter()
        .position(Line::is_budget_heading)
        .map(|start| {
            lines[start + 1..]
                .iter()
                .take_while(|line| line.kind != LineKind::Heading)
                .filter(|line| line.kind != LineKind::Blank)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if !section.is_empty() {
        return section;
    }

    lines
        .iter()
        .filter(|line| line.marker.is_some())
        .collect()
}

struct CategoryDraft {
    name: BudgetCategoryName,
    header_total: Option<Decimal>,
    currency: Option<&'static str>,
    items: Vec<ParsedItem>,
}

#[derive(Default)]
struct BudgetReducer {
    drafts: Vec<CategoryDraft>,
    index: HashMap<BudgetCategoryName, usize>,
    current: Option<usize>,
}

impl BudgetReducer {
    fn feed(&mut self, line: &Line<'_>) {
        if line.kind == LineKind::Checksum {
            return;
        }
        let body = line.body;

        if let Some(rest) = body.strip_prefix("类别小计") {
            self.feed_subtotal_list(rest);
            return;
        }

        let (name, value) = split_name_value(body);
        if name.contains("小计") {
            self.feed_subtotal(name, body);
            return;
        }

        if let Some(value) = value {
            if let Some(category) = BudgetCategoryName::recognize(name) {
                self.feed_category_line(category, value, body);
                return;
            }
        }

        for segment in ITEM_SEPARATOR.split(body) {
            if let Some(item) = parse_item(segment) {
                let target = self.target_for(&item.name);
                self.push_item(target, item);
            }
        }
    }

    fn feed_subtotal(&mut self, name: &str, body: &str) {
        let label = name.replace("小计", "");
        let category =
            BudgetCategoryName::recognize(&label).unwrap_or(BudgetCategoryName::Other);
        let idx = self.category(category);
        if let Some(token) = last_amount(body) {
            self.set_header(idx, token);
        }
    }

    fn feed_subtotal_list(&mut self, rest: &str) {
        let rest = rest.trim_start_matches(['：', ':', ' ']);
        for segment in rest.split('，') {
            let segment = segment.trim();
            let label_end = segment
                .find(|ch: char| ch.is_ascii_digit())
                .unwrap_or(segment.len());
            let label = segment[..label_end].trim().trim_end_matches(['：', ':']);
            if label.is_empty() {
                continue;
            }
            let category =
                BudgetCategoryName::recognize(label).unwrap_or(BudgetCategoryName::Other);
            let Some(token) = scan_amounts(&segment[label_end..]).into_iter().next() else {
                continue;
            };
            let idx = self.category(category);
            self.set_header(idx, token);
        }
    }

    fn feed_category_line(&mut self, category: BudgetCategoryName, value: &str, body: &str) {
        let idx = self.category(category);
        self.current = Some(idx);

        if PURE_AMOUNT.is_match(value) {
            if let Some(token) = last_amount(value) {
                self.set_header(idx, token);
            }
            return;
        }

        if let Some(currency) = detect_currency(value) {
            self.drafts[idx].currency.get_or_insert(currency);
        }
        if let Some(item) = parse_item(body) {
            self.push_item(idx, item);
        }
    }

    fn set_header(&mut self, idx: usize, token: AmountToken) {
        let draft = &mut self.drafts[idx];
        if let Some(currency) = token.currency {
            draft.currency.get_or_insert(currency);
        }
        if token.value > Decimal::ZERO {
            draft.header_total = Some(token.value);
        }
    }

    fn target_for(&mut self, item_name: &str) -> usize {
        let open = self
            .current
            .filter(|&idx| self.drafts[idx].name != BudgetCategoryName::Other);
        if let Some(idx) = open {
            return idx;
        }
        match BudgetCategoryName::infer_from_item(item_name) {
            Some(category) => self.category(category),
            None => match self.current {
                Some(idx) => idx,
                None => self.category(BudgetCategoryName::Other),
            },
        }
    }

    fn push_item(&mut self, idx: usize, item: ParsedItem) {
        let draft = &mut self.drafts[idx];
        if let Some(currency) = item.currency {
            draft.currency.get_or_insert(currency);
        }
        draft.items.push(item);
    }

    fn category(&mut self, name: BudgetCategoryName) -> usize {
        if let Some(&idx) = self.index.get(&name) {
            return idx;
        }
        self.drafts.push(CategoryDraft {
            name,
            header_total: None,
            currency: None,
            items: Vec::new(),
        });
        let idx = self.drafts.len() - 1;
        self.index.insert(name, idx);
        idx
    }

    fn finish(self) -> BudgetBreakdown {
        let categories = self
            .drafts
            .into_iter()
            .map(|draft| {
                let header = draft.header_total;
                let items = draft
                    .items
                    .into_iter()
                    .map(|item| BudgetItem {
                        currency: currency_or_default(item.currency),
                        amount: match header {
                            Some(_) => Amount::Superseded,
                            None => Amount::Counted(item.amount),
                        },
                        name: item.name,
                    })
                    .collect::<Vec<_>>();
                let total = header
                    .unwrap_or_else(|| items.iter().map(|item| item.amount.counted()).sum());
                BudgetCategory {
                    name: draft.name,
                    items,
                    total,
                    currency: draft.currency.map(ToString::to_string),
                }
            })
            .collect::<Vec<_>>();

        let grand_total = categories.iter().map(|category| category.total).sum();
        let currency = categories
            .iter()
            .find_map(|category| category.currency.clone());

        BudgetBreakdown {
            categories,
            grand_total,
            currency,
            aligned: true,
            estimated: false,
        }
    }
}

/// Parses one item segment by priority: `name = amount`, then
/// `unit price × quantity`, then a single amount.
pub fn parse_item(segment: &str) -> Option<ParsedItem> {
    let segment = segment.trim();
    if segment.is_empty() {
        return None;
    }

    let split_at = segment
        .rfind('=')
        .into_iter()
        .chain(segment.rfind('≈'))
        .max()
        .filter(|&idx| idx > 0);

    if let Some(idx) = split_at {
        let (left, right) = segment.split_at(idx);
        let right = right.trim_start_matches(['=', '≈']);
        let token = last_amount(right)?;
        return Some(ParsedItem {
            name: item_name(left),
            amount: token.value,
            currency: token.currency.or_else(|| detect_currency(right)),
        });
    }

    let tokens = scan_amounts(segment);
    let (amount, currency) = match tokens.as_slice() {
        [] => return None,
        [only] => (only.value, only.currency),
        [first, second, ..] => (
            first.value * second.value,
            first.currency.or(second.currency),
        ),
    };

    Some(ParsedItem {
        name: item_name(segment),
        amount,
        currency: currency.or_else(|| detect_currency(segment)),
    })
}

fn item_name(text: &str) -> String {
    let (name, value) = split_name_value(text);
    let name = match value {
        Some(value) if !value.is_empty() && BudgetCategoryName::recognize(name).is_some() => value,
        _ => name,
    };
    name.trim().trim_end_matches(['：', ':']).trim().to_string()
}

fn split_name_value(text: &str) -> (&str, Option<&str>) {
    match text.find(['：', ':']) {
        Some(idx) => {
            let sep_len = text[idx..].chars().next().map(char::len_utf8).unwrap_or(1);
            (text[..idx].trim(), Some(text[idx + sep_len..].trim()))
        }
        None => (text.trim(), None),
    }
}
