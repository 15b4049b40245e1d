//! Personal-finance dashboard parsing.
//!
//! The dashboard is a static HTML page with `<h2>Portfolio</h2>` and
//! `<h2>Debt</h2>` headings, each followed by a table. Account rows carry the
//! account name in `<div class="s">`; the summary row has `class="t"`.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static RE_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"~?\$([\d,]+(?:\.\d{1,2})?)\s*(CAD|USD)?").unwrap());

/// Row excluded from the itemized list regardless of its value.
const DAILY_BUDGET: &str = "Daily budget";

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioItem {
    pub name: String,
    pub amount: f64,
    /// `CAD`, `USD`, or empty when the cell does not say.
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Portfolio {
    pub items: Vec<PortfolioItem>,
    /// Rounded portfolio total, e.g. `$122 USD`.
    pub total: Option<String>,
    /// Debt total, e.g. `$7,334.3`.
    pub debt: Option<String>,
}

impl Portfolio {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.total.is_none()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Other,
    Portfolio,
    Debt,
}

/// Extract accounts, the portfolio total, and the debt total.
///
/// Missing sections yield empty fields, never an error.
pub fn parse_portfolio(html: &str) -> Portfolio {
    let mut result = Portfolio::default();
    let (Ok(sel_rows), Ok(sel_cell), Ok(sel_name)) = (
        Selector::parse("h2, tr"),
        Selector::parse("td"),
        Selector::parse("div.s"),
    ) else {
        return result;
    };

    let document = Html::parse_document(html);
    let mut section = Section::Other;

    for el in document.select(&sel_rows) {
        if el.value().name() == "h2" {
            section = match text_of(&el).as_str() {
                "Portfolio" => Section::Portfolio,
                "Debt" => Section::Debt,
                _ => Section::Other,
            };
            continue;
        }

        let cells: Vec<ElementRef> = el.select(&sel_cell).collect();
        let is_total = el.value().classes().any(|c| c == "t")
            && cells.first().is_some_and(|c| text_of(c) == "Total");

        match section {
            Section::Portfolio if is_total => {
                if let Some((value, currency)) = cells.get(1).and_then(|c| parse_amount(&text_of(c))) {
                    let currency = if currency.is_empty() { "USD".to_string() } else { currency };
                    result.total = Some(format!("${} {currency}", group_thousands(value.round() as u64)));
                }
            }
            Section::Portfolio => {
                if let Some(item) = parse_item(&el, &cells, &sel_name) {
                    result.items.push(item);
                }
            }
            Section::Debt if is_total => {
                if let Some((value, _)) = cells.get(1).and_then(|c| parse_amount(&text_of(c))) {
                    result.debt = Some(format!("${}", format_amount(value)));
                }
            }
            _ => {}
        }
    }

    result
}

fn parse_item(row: &ElementRef, cells: &[ElementRef], sel_name: &Selector) -> Option<PortfolioItem> {
    let name = row.select(sel_name).next().map(|n| text_of(&n))?;
    if name.is_empty() || name == DAILY_BUDGET {
        return None;
    }
    let (amount, currency) = parse_amount(&text_of(cells.get(1)?))?;
    Some(PortfolioItem {
        name,
        amount,
        currency,
    })
}

/// Parse `$1,234.56 CAD` into `(1234.56, "CAD")`.
fn parse_amount(cell: &str) -> Option<(f64, String)> {
    let caps = RE_AMOUNT.captures(cell)?;
    let value = caps[1].replace(',', "").parse::<f64>().ok()?;
    let currency = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
    Some((value, currency))
}

fn text_of(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// `7334.3` → `7,334.3`; at most two decimals, trailing zeros dropped.
fn format_amount(value: f64) -> String {
    let fixed = format!("{value:.2}");
    let (int, frac) = fixed.split_once('.').unwrap_or((&fixed, ""));
    let frac = frac.trim_end_matches('0');
    let int = int.parse::<u64>().map(group_thousands).unwrap_or_else(|_| int.to_string());
    if frac.is_empty() {
        int
    } else {
        format!("{int}.{frac}")
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Render the portfolio as a sentence sequence for speech. Empty when there
/// is nothing to say.
pub fn portfolio_summary(p: &Portfolio) -> String {
    if p.is_empty() {
        return String::new();
    }

    let mut parts: Vec<String> = p
        .items
        .iter()
        .map(|item| {
            if item.currency.is_empty() {
                format!("{}, ${:.2}", item.name, item.amount)
            } else {
                format!("{}, ${:.2} {}", item.name, item.amount, item.currency)
            }
        })
        .collect();
    if let Some(total) = &p.total {
        parts.push(format!("Total, {total}"));
    }
    if let Some(debt) = &p.debt {
        parts.push(format!("Debt, {debt}"));
    }
    format!("{}.", parts.join(". "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<h2>Portfolio</h2>
<div class="card">
<table>
<tr><td><div class="s">Vacation</div><div class="m">Chequing</div></td><td>$23.19 CAD</td></tr>
<tr><td><div class="s">TFSA</div><div class="m">Cash</div></td><td>$100.56 CAD</td></tr>
<tr><td><div class="s">Starbucks Card</div><div class="m">Gift card</div></td><td>$9.74 CAD</td></tr>
<tr><td><div class="s">Stocks</div><div class="m">AAPL, HOOD</div></td><td>$24.82 USD</td></tr>
<tr class="t"><td>Total</td><td>~$122 USD</td></tr>
<tr><td><div class="s">Daily budget</div><div class="m">Vacation / days</div></td><td id="daily-budget">--</td></tr>
</table>
</div>

<h2>Debt</h2>
<div class="card">
<table>
<tr class="h"><td><div class="s">Mom</div></td><td>$140</td></tr>
<tr class="h"><td><div class="s">RBC VISA</div></td><td>$5,500</td></tr>
<tr class="t"><td>Total</td><td class="r">$7,334.30</td></tr>
</table>
</div>"#;

    #[test]
    fn extracts_items() {
        let p = parse_portfolio(SAMPLE);
        assert_eq!(p.items.len(), 4);
        let names: Vec<&str> = p.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Vacation", "TFSA", "Starbucks Card", "Stocks"]);
        assert_eq!(p.items[0].amount, 23.19);
        assert_eq!(p.items[0].currency, "CAD");
        assert_eq!(p.items[1].amount, 100.56);
        assert_eq!(p.items[3].currency, "USD");
    }

    #[test]
    fn excludes_daily_budget() {
        let html = r#"<h2>Portfolio</h2><table>
<tr><td><div class="s">Daily budget</div></td><td>$12.00 CAD</td></tr>
<tr><td><div class="s">TFSA</div></td><td>$1.00 CAD</td></tr>
</table>"#;
        let p = parse_portfolio(html);
        assert_eq!(p.items.len(), 1);
        assert!(p.items.iter().all(|i| i.name != "Daily budget"));
    }

    #[test]
    fn extracts_totals() {
        let p = parse_portfolio(SAMPLE);
        assert_eq!(p.total.as_deref(), Some("$122 USD"));
        assert_eq!(p.debt.as_deref(), Some("$7,334.3"));
    }

    #[test]
    fn missing_section_is_empty() {
        let p = parse_portfolio("<html><body>nothing</body></html>");
        assert!(p.items.is_empty());
        assert_eq!(p.total, None);
        assert_eq!(p.debt, None);
        assert_eq!(portfolio_summary(&p), "");
    }

    #[test]
    fn summary_reads_naturally() {
        let p = parse_portfolio(SAMPLE);
        let s = portfolio_summary(&p);
        assert!(s.starts_with("Vacation, $23.19 CAD. TFSA, $100.56 CAD."));
        assert!(s.ends_with("Total, $122 USD. Debt, $7,334.3."));
    }

    #[test]
    fn amount_formatting() {
        assert_eq!(format_amount(7334.30), "7,334.3");
        assert_eq!(format_amount(140.0), "140");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
        assert_eq!(group_thousands(999), "999");
    }
}
