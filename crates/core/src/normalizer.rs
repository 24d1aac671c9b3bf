//! Structural repair of model-written budget text.
//!
//! The pass is idempotent: running it on its own output is a no-op.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rust_decimal::Decimal;

use crate::lines::{lex, LineKind};
use crate::models::DEFAULT_CURRENCY;
use crate::money::{canonical_currency, format_amount};

pub const BUDGET_HEADING: &str = "### 预算";

const PER_UNIT_QUALIFIERS: [&str; 5] = ["每日", "每天", "人均", "每人", "按天"];

static CATEGORY_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^([-*])\s*(住宿|酒店|交通|餐饮|吃饭|用餐|门票|景点|购物|其他)\s*[：:]\s*([0-9]+(?:\.[0-9]+)?)\s*(CNY|RMB|人民币|元|USD|EUR|JPY)?\s*(?:[（(]总计[）)])?\s*$",
    )
    .expect("valid category header regex")
});

static SUB_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s+[-*]\s*.*?=\s*([0-9]+(?:\.[0-9]+)?)\s*(CNY|RMB|人民币|元|USD|EUR|JPY)?\s*$",
    )
    .expect("valid sub-item regex")
});

static FREE_SUB_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+[-*]\s*.*免费").expect("valid free sub-item regex"));

static CHECK_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*(?:[-*]\s*)?)校验\s*[：:]").expect("valid check line regex"));

static GRAND_CHECK_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:[-*]\s*)?)总预算校验\s*[：:]").expect("valid grand check regex")
});

static SUM_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^((?:[-*]\s*)?)合计\s*[：:]").expect("valid sum line regex"));

static TOTAL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*]\s*)?(?:总预算|预算总额|总体预算|合计)\s*[：:]\s*[0-9]+(?:\.[0-9]+)?\s*(?:CNY|RMB|人民币|元|USD|EUR|JPY)?\s*$",
    )
    .expect("valid total line regex")
});

pub fn normalize(text: &str) -> String {
    let mut doc = BudgetDocument::new(text);
    doc.ensure_budget_heading();
    doc.enforce_consistency();
    doc.render()
}

struct BudgetDocument {
    lines: Vec<String>,
    trailing_newline: bool,
}

struct CategoryTotal {
    label: String,
    amount: Decimal,
    currency: String,
}

#[derive(Default)]
struct SubItems {
    amounts: Vec<Decimal>,
    priced: usize,
    currency: Option<&'static str>,
}

impl BudgetDocument {
    fn new(text: &str) -> Self {
        Self {
            lines: text.lines().map(ToString::to_string).collect(),
            trailing_newline: text.ends_with('\n'),
        }
    }

    fn render(self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline {
            out.push('\n');
        }
        out
    }

    fn ensure_budget_heading(&mut self) {
        let Some(first) = self
            .lines
            .iter()
            .position(|line| CATEGORY_HEADER.is_match(line))
        else {
            return;
        };
        if self.budget_heading().is_some() {
            return;
        }
        self.lines.insert(first, BUDGET_HEADING.to_string());
    }

    /// Corrects category headers from their sub-items, then keeps the
    /// summary lines in step with the corrected totals. A `合计` line is
    /// appended after the last category block when a header changed, or
    /// when several categories carry no stated total at all.
    fn enforce_consistency(&mut self) {
        let headers = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| CATEGORY_HEADER.is_match(line))
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        let (Some(&first_header), Some(&last_header)) = (headers.first(), headers.last()) else {
            return;
        };

        let mut totals = Vec::with_capacity(headers.len());
        let mut corrected_any = false;
        for (n, &header) in headers.iter().enumerate() {
            let block_end = self.block_end(header, headers.get(n + 1).copied());
            if let Some((total, corrected)) = self.rewrite_category(header, block_end) {
                corrected_any |= corrected;
                totals.push(total);
            }
        }

        let Some(currency) = totals.first().map(|total| total.currency.clone()) else {
            return;
        };
        if totals.iter().any(|total| total.currency != currency) {
            return;
        }

        let grand = totals.iter().map(|total| total.amount).sum::<Decimal>();
        let grand_text = format!("{} {}", format_amount(grand), currency);
        let breakdown = totals
            .iter()
            .map(|total| format!("{} {}", total.label, format_amount(total.amount)))
            .collect::<Vec<_>>()
            .join(" + ");

        let mut rewrote = false;
        for line in self.lines.iter_mut().skip(first_header + 1) {
            let replacement = if let Some(caps) = GRAND_CHECK_LINE.captures(line) {
                Some(format!("{}总预算校验：{} = {}", &caps[1], breakdown, grand_text))
            } else if has_per_unit_qualifier(line) {
                None
            } else {
                SUM_LINE
                    .captures(line)
                    .map(|caps| format!("{}合计：{}", &caps[1], grand_text))
            };
            if let Some(replacement) = replacement {
                *line = replacement;
                rewrote = true;
            }
        }
        if rewrote {
            return;
        }

        let missing_total =
            totals.len() >= 2 && !self.lines.iter().any(|line| is_valid_total(line));
        if corrected_any || missing_total {
            let at = self.after_block(last_header);
            self.lines.insert(at, format!("合计：{grand_text}"));
        }
    }

    fn rewrite_category(&mut self, header: usize, block_end: usize) -> Option<(CategoryTotal, bool)> {
        let caps = CATEGORY_HEADER.captures(&self.lines[header])?;
        let marker = caps[1].to_string();
        let label = caps[2].to_string();
        let declared = Decimal::from_str(&caps[3]).ok()?;
        let declared_currency = header_currency(&caps);

        let sub_items = self.collect_sub_items(header + 1, block_end);
        if sub_items.priced == 0 {
            return Some((
                CategoryTotal {
                    label,
                    amount: declared,
                    currency: declared_currency.unwrap_or(DEFAULT_CURRENCY).to_string(),
                },
                false,
            ));
        }

        let sum = sub_items.amounts.iter().copied().sum::<Decimal>();
        let currency = sub_items
            .currency
            .or(declared_currency)
            .unwrap_or(DEFAULT_CURRENCY);
        self.lines[header] = format!("{marker} {label}：{} {currency}（总计）", format_amount(sum));

        let listed = sub_items
            .amounts
            .iter()
            .map(|amount| format_amount(*amount))
            .collect::<Vec<_>>()
            .join(" + ");
        for line in &mut self.lines[header + 1..block_end] {
            let replacement = CHECK_LINE.captures(line).map(|caps| {
                format!(
                    "{}校验：{} = {} {}",
                    &caps[1],
                    listed,
                    format_amount(sum),
                    currency
                )
            });
            if let Some(replacement) = replacement {
                *line = replacement;
            }
        }

        Some((
            CategoryTotal {
                label,
                amount: sum,
                currency: currency.to_string(),
            },
            true,
        ))
    }

    fn collect_sub_items(&self, from: usize, to: usize) -> SubItems {
        let mut sub_items = SubItems::default();
        for (idx, line) in self.lines.iter().enumerate().take(to).skip(from) {
            if lex(idx, line).kind == LineKind::Checksum || line.contains("小计") {
                continue;
            }
            if let Some(caps) = SUB_ITEM.captures(line) {
                let Ok(amount) = Decimal::from_str(&caps[1]) else {
                    continue;
                };
                sub_items.amounts.push(amount);
                sub_items.priced += 1;
                if sub_items.currency.is_none() {
                    sub_items.currency = caps
                        .get(2)
                        .and_then(|token| canonical_currency(token.as_str()));
                }
            } else if FREE_SUB_ITEM.is_match(line) {
                sub_items.amounts.push(Decimal::ZERO);
            }
        }
        sub_items
    }

    fn block_end(&self, header: usize, next_header: Option<usize>) -> usize {
        let limit = next_header.unwrap_or(self.lines.len());
        (header + 1..limit)
            .find(|&idx| lex(idx, &self.lines[idx]).kind == LineKind::Heading)
            .unwrap_or(limit)
    }

    fn after_block(&self, header: usize) -> usize {
        let end = self.block_end(header, None);
        (header + 1..end)
            .rev()
            .find(|&idx| !self.lines[idx].trim().is_empty())
            .unwrap_or(header)
            + 1
    }

    fn budget_heading(&self) -> Option<usize> {
        self.lines
            .iter()
            .enumerate()
            .position(|(idx, line)| lex(idx, line).is_budget_heading())
    }
}

fn header_currency(caps: &Captures<'_>) -> Option<&'static str> {
    caps.get(4)
        .and_then(|token| canonical_currency(token.as_str()))
}

fn is_valid_total(line: &str) -> bool {
    TOTAL_LINE.is_match(line) && !has_per_unit_qualifier(line)
}

fn has_per_unit_qualifier(line: &str) -> bool {
    PER_UNIT_QUALIFIERS
        .iter()
        .any(|qualifier| line.contains(qualifier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_grand_total_for_flat_items() {
        let out = normalize("- 住宿：2700 CNY\n- 交通：140 CNY");
        assert_eq!(out, "### 预算\n- 住宿：2700 CNY\n- 交通：140 CNY\n合计：2840 CNY");
    }

    #[test]
    fn corrects_header_from_sub_items() {
        let input = "### 预算\n- 住宿：2000 CNY\n  - 酒店A = 1200 CNY\n  - 酒店B = 1500 CNY\n  - 校验：2000 CNY\n- 交通：140 CNY\n";
        let out = normalize(input);
        assert!(out.contains("- 住宿：2700 CNY（总计）"));
        assert!(out.contains("  - 校验：1200 + 1500 = 2700 CNY"));
        assert!(out.contains("合计：2840 CNY"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn rewrites_existing_checksum_lines() {
        let input = "### 预算\n- 住宿：2700 CNY\n- 门票：60 CNY\n总预算校验：9999 CNY\n合计：9999 CNY";
        let out = normalize(input);
        assert!(out.contains("总预算校验：住宿 2700 + 门票 60 = 2760 CNY"));
        assert!(out.contains("合计：2760 CNY"));
    }

    #[test]
    fn ignores_per_person_totals() {
        let input = "### 预算\n- 餐饮：300 CNY\n- 门票：120 CNY\n合计：人均 210 CNY";
        let out = normalize(input);
        assert!(out.contains("合计：人均 210 CNY"));
        assert!(out.contains("合计：420 CNY"));
    }

    #[test]
    fn leaves_mixed_currencies_alone() {
        let input = "- 住宿：2700 CNY\n- 交通：40 USD";
        let out = normalize(input);
        assert!(!out.contains("合计"));
    }

    #[test]
    fn stops_category_block_at_next_heading() {
        let input = "### 预算\n- 住宿：500 CNY\n### 第2天\n  - 烤串 = 30 CNY";
        let out = normalize(input);
        assert!(out.contains("- 住宿：500 CNY\n"));
    }

    #[test]
    fn summary_follows_details_under_a_later_heading() {
        let input = "### 预算概览\n以下为明细\n### 明细\n- 住宿：2000 CNY\n  - 酒店A = 1200 CNY\n  - 酒店B = 1500 CNY";
        let out = normalize(input);
        assert_eq!(
            out,
            "### 预算概览\n以下为明细\n### 明细\n- 住宿：2700 CNY（总计）\n  - 酒店A = 1200 CNY\n  - 酒店B = 1500 CNY\n合计：2700 CNY"
        );
        assert_eq!(normalize(&out), out);
    }

    #[test]
    fn free_note_alone_keeps_declared_total() {
        let input = "### 预算\n- 住宿：2000 CNY\n  - 如家酒店 2 晚，早餐免费\n- 交通：140 CNY";
        let out = normalize(input);
        assert!(out.contains("- 住宿：2000 CNY\n"));
        assert!(out.ends_with("合计：2140 CNY"));

        let priced = normalize("### 预算\n- 门票：100 CNY\n  - 故宫 = 60 CNY\n  - 天坛 免费\n  - 校验：100 CNY");
        assert!(priced.contains("- 门票：60 CNY（总计）"));
        assert!(priced.contains("  - 校验：60 + 0 = 60 CNY"));
    }

    #[test]
    fn no_summary_when_corrected_currencies_diverge() {
        let out = normalize("- 住宿：2000 CNY\n  - 酒店 = 40 USD\n- 交通：140 CNY");
        assert!(out.contains("- 住宿：40 USD（总计）"));
        assert!(!out.contains("合计"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "- 住宿：2700 CNY\n- 交通：140 CNY",
            "预算如下\n- 住宿：2000 元\n  - 酒店A = 1200 元\n  - 酒店B = 1500 元\n  - 校验：2000 元\n- 门票：0 CNY\n  - 天安门广场 免费\n总预算校验：1 CNY\n",
            "### 第1天\n故宫、景山\n### 预算\n- 餐饮：150.50 CNY\n  * 烤鸭 = 150.50 CNY\n\n### 贴士\n带伞",
            "### 预算概览\n以下为明细\n### 明细\n- 住宿：2000 CNY\n  - 酒店A = 1200 CNY\n  - 酒店B = 1500 CNY",
            "### 预算\n- 住宿：2000 CNY\n  - 如家酒店 2 晚，早餐免费\n- 交通：140 CNY",
            "no budget here",
            "",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "input: {sample:?}");
        }
    }

    #[test]
    fn normalization_is_idempotent_over_line_combinations() {
        let fragments = [
            "### 预算概览",
            "以下为明细",
            "### 明细",
            "- 住宿：2000 CNY",
            "  - 酒店A = 1200 CNY\n  - 酒店B = 1500 CNY",
            "  - 早餐免费",
            "- 交通：140 元",
            "  - 地铁 = 40 USD",
            "合计：人均 300 CNY",
            "  - 校验：1 CNY",
            "总预算：5000元",
            "",
        ];
        let n = fragments.len();
        for code in 0..n.pow(4) {
            let sample = (0..4)
                .map(|digit| fragments[code / n.pow(digit) % n])
                .collect::<Vec<_>>()
                .join("\n");
            let once = normalize(&sample);
            assert_eq!(normalize(&once), once, "input: {sample:?}");
        }
    }
}
