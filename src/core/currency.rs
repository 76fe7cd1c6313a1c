//! Currency table, conversion and formatting.
//!
//! Amounts are stored in the account's base unit and never converted on write. Conversion
//! only happens for display, through fixed USD rates.

use crate::core::finance::FinancialSummary;
use tracing::warn;

/// Static description of one supported currency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrencyInfo {
    /// ISO 4217 code
    pub code: &'static str,
    /// English display name
    pub name: &'static str,
    /// Display symbol
    pub symbol: &'static str,
    /// Units of this currency per US dollar
    pub usd_rate: f64,
    /// Whether the symbol is written after the amount
    pub symbol_after: bool,
}

const fn currency(
    code: &'static str,
    name: &'static str,
    symbol: &'static str,
    usd_rate: f64,
    symbol_after: bool,
) -> CurrencyInfo {
    CurrencyInfo {
        code,
        name,
        symbol,
        usd_rate,
        symbol_after,
    }
}

/// Every supported currency. Rates are maintained by hand.
pub const CURRENCIES: &[CurrencyInfo] = &[
    currency("USD", "US Dollar", "$", 1.0, false),
    currency("EUR", "Euro", "€", 0.92, true),
    currency("GBP", "Pound Sterling", "£", 0.79, false),
    currency("CAD", "Canadian Dollar", "C$", 1.36, false),
    currency("AUD", "Australian Dollar", "A$", 1.52, false),
    currency("CHF", "Swiss Franc", "CHF", 0.88, false),
    currency("CNY", "Chinese Yuan", "¥", 7.24, false),
    currency("JPY", "Japanese Yen", "¥", 149.50, false),
    currency("INR", "Indian Rupee", "₹", 83.12, false),
    currency("BRL", "Brazilian Real", "R$", 4.97, false),
    currency("XAF", "Central African CFA Franc", "FCFA", 607.50, true),
    currency("XOF", "West African CFA Franc", "CFA", 607.50, true),
    currency("MAD", "Moroccan Dirham", "د.م.", 10.10, true),
    currency("ZAR", "South African Rand", "R", 18.75, false),
    currency("KES", "Kenyan Shilling", "KSh", 156.50, false),
    currency("NGN", "Nigerian Naira", "₦", 1550.00, false),
    currency("GHS", "Ghanaian Cedi", "₵", 12.50, false),
    currency("AOA", "Angolan Kwanza", "Kz", 833.50, true),
    currency("MZN", "Mozambican Metical", "MT", 63.75, true),
    currency("RWF", "Rwandan Franc", "FRw", 1305.00, true),
    currency("TZS", "Tanzanian Shilling", "TSh", 2650.00, false),
];

/// Looks up a currency by code, case-insensitively.
#[must_use]
pub fn find(code: &str) -> Option<&'static CurrencyInfo> {
    CURRENCIES
        .iter()
        .find(|c| c.code.eq_ignore_ascii_case(code.trim()))
}

/// All currencies, sorted by display name.
#[must_use]
pub fn available_currencies() -> Vec<&'static CurrencyInfo> {
    let mut all: Vec<&'static CurrencyInfo> = CURRENCIES.iter().collect();
    all.sort_by(|a, b| a.name.cmp(b.name));
    all
}

/// Units of `code` per US dollar; `1.0` for an unknown code.
#[must_use]
pub fn exchange_rate(code: &str) -> f64 {
    find(code).map_or(1.0, |c| c.usd_rate)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Converts `amount` from one currency to another through USD, rounded to cents.
///
/// An unknown code on either side returns `amount` unchanged.
#[must_use]
pub fn convert(amount: f64, from: &str, to: &str) -> f64 {
    let (Some(source), Some(target)) = (find(from), find(to)) else {
        warn!(%from, %to, "Unknown currency in conversion, amount left unchanged");
        return amount;
    };

    round2(amount / source.usd_rate * target.usd_rate)
}

/// Converts every amount of a USD summary into `target`.
#[must_use]
pub fn convert_summary(summary: &FinancialSummary, target: &str) -> FinancialSummary {
    let c = |v: f64| convert(v, "USD", target);
    FinancialSummary {
        total_revenue: c(summary.total_revenue),
        cost_of_goods_sold: c(summary.cost_of_goods_sold),
        total_expenses: c(summary.total_expenses),
        net_profit: c(summary.net_profit),
        stock_value: c(summary.stock_value),
        stock_cost: c(summary.stock_cost),
    }
}

/// Groups the integer digits of `digits` in threes with spaces.
fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

/// Formats `amount` with two decimals, grouped thousands and the currency symbol.
///
/// `format_amount(1234.5, "EUR")` gives `"1 234,50 €"`; `format_amount(-3.0, "USD")`
/// gives `"$ -3,00"`. Non-finite amounts format as zero. An unknown code is used as
/// its own symbol, written before the amount.
#[must_use]
pub fn format_amount(amount: f64, code: &str) -> String {
    let amount = if amount.is_finite() { amount } else { 0.0 };
    let fixed = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let sign = if amount < 0.0 && fixed.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
        "-"
    } else {
        ""
    };
    let number = format!("{sign}{},{frac_part}", group_thousands(int_part));

    match find(code) {
        Some(info) if info.symbol_after => format!("{number} {}", info.symbol),
        Some(info) => format!("{} {number}", info.symbol),
        None => format!("{} {number}", code.trim()),
    }
}
