use super::html::{Page, clean_text};
use crate::model::UNKNOWN_PRODUCT;

type NameStrategy = fn(&Page<'_>) -> Option<String>;

/// Evaluated in order; the first non-empty result wins.
const STRATEGIES: &[(&str, NameStrategy)] = &[
    ("og:title", og_title),
    ("twitter:title", twitter_title),
    ("json-ld", json_ld_name),
    ("title", title_tag),
];

pub fn extract(page: &Page<'_>) -> String {
    STRATEGIES
        .iter()
        .find_map(|(label, strategy)| {
            let name = strategy(page)?;
            tracing::trace!(strategy = label, name = %name, "product name matched");
            Some(name)
        })
        .unwrap_or_else(|| UNKNOWN_PRODUCT.to_owned())
}

fn non_empty(text: &str) -> Option<String> {
    let cleaned = clean_text(text);
    (!cleaned.is_empty()).then_some(cleaned)
}

fn og_title(page: &Page<'_>) -> Option<String> {
    page.meta_property("og:title").and_then(non_empty)
}

fn twitter_title(page: &Page<'_>) -> Option<String> {
    page.meta("twitter:title").and_then(non_empty)
}

fn json_ld_name(page: &Page<'_>) -> Option<String> {
    page.json_ld_products()
        .into_iter()
        .find_map(|product| product.get("name")?.as_str().and_then(non_empty))
}

fn title_tag(page: &Page<'_>) -> Option<String> {
    let title = page.title()?;
    let head = title
        .split(['|', '-', '–'])
        .next()
        .unwrap_or(title);
    non_empty(head)
}
