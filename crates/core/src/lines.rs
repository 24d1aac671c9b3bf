//! Line-level lexer for budget text.
//!
//! Every line becomes one [`Line`]: its indentation, list marker and body are
//! split off once so later passes never re-scan raw strings.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Markdown heading (`### 预算`).
    Heading,
    /// Bullet line (`- ...`, `* ...`, `• ...`).
    Item,
    /// Summary or checksum line (`合计：`, `校验：`, `总预算校验：`, ...).
    Checksum,
    Other,
    Blank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    pub index: usize,
    pub raw: &'a str,
    pub kind: LineKind,
    pub indent: usize,
    pub marker: Option<char>,
    /// Text after indentation and list marker, trimmed.
    pub body: &'a str,
}

impl Line<'_> {
    pub fn is_budget_heading(&self) -> bool {
        self.kind == LineKind::Heading && self.body.contains("预算")
    }
}

const CHECKSUM_PREFIXES: [&str; 7] = [
    "合计",
    "总花费",
    "总预算校验",
    "校验",
    "总预算",
    "预算总额",
    "总体预算",
];

pub fn tokenize(text: &str) -> Vec<Line<'_>> {
    text.lines()
        .enumerate()
        .map(|(index, raw)| lex(index, raw))
        .collect()
}

pub fn lex(index: usize, raw: &str) -> Line<'_> {
    let trimmed_start = raw.trim_start();
    let indent = raw.len() - trimmed_start.len();

    if trimmed_start.trim().is_empty() {
        return Line {
            index,
            raw,
            kind: LineKind::Blank,
            indent,
            marker: None,
            body: "",
        };
    }

    if trimmed_start.starts_with('#') {
        return Line {
            index,
            raw,
            kind: LineKind::Heading,
            indent,
            marker: None,
            body: trimmed_start.trim_start_matches('#').trim(),
        };
    }

    let (marker, body) = split_marker(trimmed_start);
    let body = body.trim();
    let kind = if is_checksum(body) {
        LineKind::Checksum
    } else if marker.is_some() {
        LineKind::Item
    } else {
        LineKind::Other
    };

    Line {
        index,
        raw,
        kind,
        indent,
        marker,
        body,
    }
}

fn split_marker(text: &str) -> (Option<char>, &str) {
    let mut chars = text.chars();
    match chars.next() {
        Some(marker @ ('•' | '·')) => (Some(marker), chars.as_str()),
        Some(marker @ ('-' | '*')) => {
            let rest = chars.as_str();
            if rest.starts_with(char::is_whitespace) {
                (Some(marker), rest)
            } else {
                (None, text)
            }
        }
        _ => (None, text),
    }
}

fn is_checksum(body: &str) -> bool {
    CHECKSUM_PREFIXES
        .iter()
        .any(|prefix| body.starts_with(prefix))
        || body.contains("预算余量")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_budget_lines() {
        let lines = tokenize("### 预算\n- 住宿：2700 CNY\n  - 酒店A = 1200 CNY\n合计：2840 CNY\n\n说明");
        let kinds = lines.iter().map(|line| line.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                LineKind::Heading,
                LineKind::Item,
                LineKind::Item,
                LineKind::Checksum,
                LineKind::Blank,
                LineKind::Other,
            ]
        );
        assert!(lines[0].is_budget_heading());
        assert_eq!(lines[2].indent, 2);
        assert_eq!(lines[2].body, "酒店A = 1200 CNY");
    }

    #[test]
    fn bold_text_is_not_a_bullet() {
        let line = tokenize("**住宿**：2700").remove(0);
        assert_eq!(line.kind, LineKind::Other);
        assert_eq!(line.marker, None);
    }
}
