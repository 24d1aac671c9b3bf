use std::borrow::Cow;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use crate::models::{Money, DEFAULT_CURRENCY};

static AMOUNT_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([0-9]+(?:\.[0-9]+)?)\s*(CNY|RMB|USD|EUR|JPY|人民币|美元|欧元|日元|元)?")
        .expect("valid amount regex")
});

static CURRENCY_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(CNY|RMB|USD|EUR|JPY|人民币|美元|欧元|日元|元)").expect("valid currency regex")
});

static STATED_TOTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)总预算\s*[：:]\s*([0-9][0-9,]*(?:\.[0-9]+)?)\s*(CNY|RMB|USD|EUR|JPY|人民币|美元|欧元|日元|元)?",
    )
    .expect("valid stated total regex")
});

static STATED_BUDGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)预算(?:控制在|约|大约|大概)?[^\n]*?([0-9][0-9,]*(?:\.[0-9]+)?)\s*(人民币|RMB|CNY|元)",
    )
    .expect("valid stated budget regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountToken {
    pub value: Decimal,
    pub currency: Option<&'static str>,
}

pub fn canonical_currency(token: &str) -> Option<&'static str> {
    match token.trim().to_uppercase().as_str() {
        "CNY" | "RMB" | "人民币" | "元" => Some("CNY"),
        "USD" | "美元" => Some("USD"),
        "EUR" | "欧元" => Some("EUR"),
        "JPY" | "日元" => Some("JPY"),
        _ => None,
    }
}

pub fn detect_currency(text: &str) -> Option<&'static str> {
    CURRENCY_TOKEN
        .find(text)
        .and_then(|found| canonical_currency(found.as_str()))
}

pub fn currency_or_default(currency: Option<&str>) -> String {
    currency.unwrap_or(DEFAULT_CURRENCY).to_string()
}

pub fn scan_amounts(text: &str) -> Vec<AmountToken> {
    let cleaned = strip_thousands_separators(text);
    AMOUNT_TOKEN
        .captures_iter(&cleaned)
        .filter_map(|caps| {
            let value = Decimal::from_str(caps.get(1)?.as_str()).ok()?;
            let currency = caps
                .get(2)
                .and_then(|token| canonical_currency(token.as_str()));
            Some(AmountToken { value, currency })
        })
        .collect()
}

pub fn last_amount(text: &str) -> Option<AmountToken> {
    scan_amounts(text).pop()
}

pub fn format_amount(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Budget stated in prose, such as `总预算：5000 元` or `预算控制在3000元左右`.
pub fn stated_total(text: &str) -> Option<Money> {
    let caps = STATED_TOTAL
        .captures(text)
        .or_else(|| STATED_BUDGET.captures(text))?;
    let amount = Decimal::from_str(&caps.get(1)?.as_str().replace(',', "")).ok()?;
    if amount <= Decimal::ZERO {
        return None;
    }
    let currency = caps
        .get(2)
        .and_then(|token| canonical_currency(token.as_str()))
        .unwrap_or(DEFAULT_CURRENCY);
    Some(Money::new(amount, currency))
}

fn strip_thousands_separators(text: &str) -> Cow<'_, str> {
    if !text.contains(',') {
        return Cow::Borrowed(text);
    }

    let chars = text.chars().collect::<Vec<_>>();
    let mut out = String::with_capacity(text.len());
    for (idx, ch) in chars.iter().enumerate() {
        let between_digits = *ch == ','
            && idx > 0
            && chars[idx - 1].is_ascii_digit()
            && chars.get(idx + 1).map(char::is_ascii_digit).unwrap_or(false);
        if !between_digits {
            out.push(*ch);
        }
    }
    Cow::Owned(out)
}
