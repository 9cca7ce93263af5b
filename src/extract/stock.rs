use once_cell::sync::Lazy;
use regex::Regex;

use super::html::Page;

pub const OUT_OF_STOCK_INDICATORS: &[&str] = &[
    "sold out",
    "out of stock",
    "unavailable",
    "not available",
    "coming soon",
    "notify me",
    "esaurito",
    "non disponibile",
    "épuisé",
    "agotado",
    "ausverkauft",
    "currently unavailable",
    "avvisami",
    "notify when available",
];

pub const IN_STOCK_INDICATORS: &[&str] = &[
    "add to cart",
    "add to bag",
    "buy now",
    "in stock",
    "available",
    "aggiungi al carrello",
    "acquista ora",
    "disponibile",
    "ajouter au panier",
    "añadir al carrito",
    "in den warenkorb",
];

static AVAILABLE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"available"\s*:\s*(true|false)"#).expect("valid available field regex")
});

/// Keyword verdict, overridden by Shopify `"available"` fields when present.
pub fn detect(page: &Page<'_>) -> bool {
    let keyword = keyword_signal(&page.lower);
    match available_field_signal(page.html) {
        Some(available) => available,
        None => keyword,
    }
}

/// Out-of-stock phrases are checked first; a hit ends the scan.
pub fn keyword_signal(lower_html: &str) -> bool {
    if OUT_OF_STOCK_INDICATORS
        .iter()
        .any(|indicator| lower_html.contains(indicator))
    {
        return false;
    }
    IN_STOCK_INDICATORS
        .iter()
        .any(|indicator| lower_html.contains(indicator))
}

/// OR of every `"available": <bool>` field, or `None` when there are none.
pub fn available_field_signal(html: &str) -> Option<bool> {
    let mut seen = false;
    for caps in AVAILABLE_FIELD.captures_iter(html) {
        seen = true;
        if caps
            .get(1)
            .is_some_and(|m| m.as_str().eq_ignore_ascii_case("true"))
        {
            return Some(true);
        }
    }
    seen.then_some(false)
}
