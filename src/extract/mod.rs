pub mod html;
pub mod image;
pub mod name;
pub mod price;
pub mod stock;

use anyhow::Context as _;

use crate::cli::ExtractArgs;
use crate::model::StockSnapshot;

pub use price::{default_currency, format_price, format_price_exact};

pub fn run(args: ExtractArgs) -> anyhow::Result<()> {
    let html = std::fs::read_to_string(&args.html)
        .with_context(|| format!("read html: {}", args.html))?;
    let snapshot = extract(&html, &args.url);
    tracing::info!(
        url = %args.url,
        product = %snapshot.product_name,
        in_stock = snapshot.in_stock,
        "extracted"
    );

    let json = serde_json::to_string_pretty(&snapshot).context("serialize snapshot")?;
    println!("{json}");
    Ok(())
}

/// Extracts a snapshot; `page_url` only drives the default currency.
pub fn extract(html: &str, page_url: &str) -> StockSnapshot {
    extract_with_currency(html, default_currency(page_url))
}

pub fn extract_with_currency(html: &str, default_currency: &str) -> StockSnapshot {
    let page = html::Page::parse(html);
    StockSnapshot {
        in_stock: stock::detect(&page),
        product_name: name::extract(&page),
        price: price::extract(&page, default_currency),
        image_url: image::extract(&page),
        error: None,
    }
}
