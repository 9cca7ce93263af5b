use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use url::Url;

use super::html::{Page, balanced_object};
use crate::model::PRICE_NOT_AVAILABLE;

type PriceMethod = fn(&Page<'_>, &str) -> Option<String>;

/// Evaluated in order with early exit. Each method receives the default
/// currency inferred from the page URL.
const METHODS: &[(&str, PriceMethod)] = &[
    ("json-ld offers", json_ld_offers),
    ("shopify product blob", shopify_blobs),
    ("product:price meta", product_price_meta),
    ("og:price meta", og_price_meta),
    ("currentPrice field", current_price_field),
    ("price field", minor_unit_price_field),
    ("price_min field", price_min_field),
    ("currency symbol scan", currency_symbol_scan),
];

static FLOAT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)").expect("valid float prefix regex"));

static SHOPIFY_PRODUCT_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)var\s+product\s*=\s*\{").expect("valid product var regex")
});

static SHOPIFY_META_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)var\s+meta\s*=\s*\{").expect("valid meta var regex"));

static SHOPIFY_ANALYTICS_META: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ShopifyAnalytics\.meta\s*=\s*\{").expect("valid analytics meta regex")
});

static CURRENT_PRICE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""currentPrice"\s*:\s*(\d+(?:\.\d+)?)"#).expect("valid currentPrice regex")
});

static PRICE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""price"\s*:\s*(\d+)(?:,|\s|")"#).expect("valid price field regex")
});

static PRICE_MIN_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""price_min"\s*:\s*(\d+)"#).expect("valid price_min regex"));

static SYMBOL_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"€\s*(\d+(?:[.,]\d{2})?)", "EUR"),
        (r"(\d+(?:[.,]\d{2})?)\s*€", "EUR"),
        (r"(?i)EUR\s*(\d+(?:[.,]\d{2})?)", "EUR"),
        (r"(?i)(\d+(?:[.,]\d{2})?)\s*EUR", "EUR"),
        (r"\$\s*(\d+(?:[.,]\d{2})?)", "USD"),
        (r"(\d+(?:[.,]\d{2})?)\s*\$", "USD"),
        (r"£\s*(\d+(?:[.,]\d{2})?)", "GBP"),
        (r"(\d+(?:[.,]\d{2})?)\s*£", "GBP"),
        (r"\bUSD\s*(\d+(?:[.,]\d{2})?)", "USD"),
        (r"\bGBP\s*(\d+(?:[.,]\d{2})?)", "GBP"),
        (r"\bCHF\s*(\d+(?:[.,]\d{2})?)", "CHF"),
    ]
    .into_iter()
    .map(|(pattern, currency)| {
        (
            Regex::new(pattern).expect("valid currency symbol regex"),
            currency,
        )
    })
    .collect()
});

pub fn extract(page: &Page<'_>, default_currency: &str) -> String {
    METHODS
        .iter()
        .find_map(|(label, method)| {
            let price = method(page, default_currency)?;
            tracing::trace!(method = label, price = %price, "price matched");
            Some(price)
        })
        .unwrap_or_else(|| PRICE_NOT_AVAILABLE.to_owned())
}

/// Currency assumed when the page states none, inferred from the host.
pub fn default_currency(page_url: &str) -> &'static str {
    let host = Url::parse(page_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default();

    if host.contains(".com") && !host.contains("eu.") {
        "USD"
    } else if host.contains(".co.uk") || host.contains("uk.") {
        "GBP"
    } else {
        "EUR"
    }
}

/// Two decimals; EUR and CHF use a comma and a trailing label, everything
/// else a period with a leading symbol.
pub fn format_price_exact(amount: f64, currency: &str) -> String {
    if !amount.is_finite() {
        return PRICE_NOT_AVAILABLE.to_owned();
    }

    let code = currency.trim().to_ascii_uppercase();
    let fixed = format!("{amount:.2}");
    match code.as_str() {
        "EUR" => format!("{} €", fixed.replacen('.', ",", 1)),
        "CHF" => format!("{} CHF", fixed.replacen('.', ",", 1)),
        "USD" => format!("${fixed}"),
        "GBP" => format!("£{fixed}"),
        _ => format!("{code} {fixed}"),
    }
}

/// Formats a human-written amount such as `"19,5"` or `"1.234,56"`.
pub fn format_price(amount: &str, currency: &str) -> String {
    let mut clean = amount.trim().to_owned();

    if clean.contains(',') && !clean.contains('.') {
        clean = clean.replacen(',', ".", 1);
    }
    if clean.contains('.') && clean.contains(',') {
        clean = clean.replacen('.', "", 1).replacen(',', ".", 1);
    }

    match parse_float_prefix(&clean) {
        Some(value) => format_price_exact(value, currency),
        None => PRICE_NOT_AVAILABLE.to_owned(),
    }
}

/// Parses the longest leading decimal number, ignoring leading whitespace.
pub fn parse_float_prefix(text: &str) -> Option<f64> {
    FLOAT_PREFIX
        .find(text.trim_start())
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float_prefix(s),
        _ => None,
    }
}

fn json_ld_offers(page: &Page<'_>, default_currency: &str) -> Option<String> {
    page.json_ld_products().into_iter().find_map(|product| {
        let offers = match product.get("offers")? {
            Value::Array(items) => items.first()?,
            other => other,
        };
        let currency = offers
            .get("priceCurrency")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(default_currency);

        let raw = ["price", "lowPrice", "highPrice"]
            .into_iter()
            .find_map(|field| offers.get(field).filter(|v| !v.is_null()))?;
        let value = json_number(raw)?;
        Some(format_price_exact(value, currency))
    })
}

fn json_object_after(page: &Page<'_>, marker: &Regex) -> Option<Value> {
    let found = marker.find(page.html)?;
    let object = balanced_object(page.html, found.end() - 1)?;
    match serde_json::from_str(object) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(?err, "skipping malformed inline product json");
            None
        }
    }
}

fn first_variant_price(product: &Value) -> Option<&Value> {
    product.get("variants")?.as_array()?.first()?.get("price")
}

fn minor_units(value: &Value) -> Option<f64> {
    json_number(value)
        .filter(|cents| *cents != 0.0)
        .map(|cents| cents / 100.0)
}

/// `var product`, `var meta` and `ShopifyAnalytics.meta` blobs carry minor
/// currency units.
fn shopify_blobs(page: &Page<'_>, default_currency: &str) -> Option<String> {
    let from_product_var = || {
        let product = json_object_after(page, &SHOPIFY_PRODUCT_VAR)?;
        let price = first_variant_price(&product)?;
        price.as_f64().map(|cents| cents / 100.0)
    };
    let from_meta_var = || {
        let meta = json_object_after(page, &SHOPIFY_META_VAR)?;
        minor_units(first_variant_price(meta.get("product")?)?)
    };
    let from_analytics = || {
        let analytics = json_object_after(page, &SHOPIFY_ANALYTICS_META)?;
        let product = analytics.get("product")?;
        product
            .get("price")
            .and_then(minor_units)
            .or_else(|| minor_units(first_variant_price(product)?))
    };

    from_product_var()
        .or_else(from_meta_var)
        .or_else(from_analytics)
        .map(|amount| format_price_exact(amount, default_currency))
}

fn meta_price(page: &Page<'_>, prefix: &str, default_currency: &str) -> Option<String> {
    let amount = page.meta_property(&format!("{prefix}:price:amount"))?;
    let currency = page
        .meta_property(&format!("{prefix}:price:currency"))
        .unwrap_or(default_currency);
    Some(format_price(amount, currency))
}

fn product_price_meta(page: &Page<'_>, default_currency: &str) -> Option<String> {
    meta_price(page, "product", default_currency)
}

fn og_price_meta(page: &Page<'_>, default_currency: &str) -> Option<String> {
    meta_price(page, "og", default_currency)
}

fn current_price_field(page: &Page<'_>, default_currency: &str) -> Option<String> {
    let caps = CURRENT_PRICE_FIELD.captures(page.html)?;
    Some(format_price(caps.get(1)?.as_str(), default_currency))
}

/// A bare `"price": N` is read as minor units once it reaches 100.
fn minor_unit_price_field(page: &Page<'_>, default_currency: &str) -> Option<String> {
    let caps = PRICE_FIELD.captures(page.html)?;
    let cents = caps.get(1)?.as_str().parse::<u64>().ok()?;
    (cents >= 100).then(|| format_price_exact(cents as f64 / 100.0, default_currency))
}

fn price_min_field(page: &Page<'_>, default_currency: &str) -> Option<String> {
    let caps = PRICE_MIN_FIELD.captures(page.html)?;
    let cents = caps.get(1)?.as_str().parse::<u64>().ok()?;
    Some(format_price_exact(cents as f64 / 100.0, default_currency))
}

fn currency_symbol_scan(page: &Page<'_>, _default_currency: &str) -> Option<String> {
    SYMBOL_PATTERNS.iter().find_map(|(pattern, currency)| {
        let caps = pattern.captures(page.html)?;
        Some(format_price(caps.get(1)?.as_str(), currency))
    })
}
