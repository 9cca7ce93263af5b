use serde_json::Value;

use super::html::{Page, normalize_protocol_relative};

pub fn extract(page: &Page<'_>) -> String {
    if let Some(og) = page.meta_property("og:image") {
        return normalize_protocol_relative(og.trim());
    }

    page.json_ld_products()
        .into_iter()
        .find_map(|product| image_url(product.get("image")?))
        .map(|url| normalize_protocol_relative(&url))
        .unwrap_or_default()
}

fn image_url(image: &Value) -> Option<String> {
    let url = match image {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => image_url(items.first()?),
        Value::Object(object) => object.get("url")?.as_str().map(str::to_owned),
        _ => None,
    };
    url.filter(|url| !url.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_of(html: &str) -> String {
        extract(&Page::parse(html))
    }

    #[test]
    fn og_image_protocol_relative_is_normalized() {
        let html = r#"<meta property="og:image" content="//cdn.shopify.com/s/files/a.jpg">"#;
        assert_eq!(image_of(html), "https://cdn.shopify.com/s/files/a.jpg");
    }

    #[test]
    fn json_ld_image_variants() {
        let html = r#"<script type="application/ld+json">{"@type":"Product","image":["https://cdn/x.png","https://cdn/y.png"]}</script>"#;
        assert_eq!(image_of(html), "https://cdn/x.png");

        let html = r#"<script type="application/ld+json">{"@type":"Product","image":{"url":"https://cdn/z.png"}}</script>"#;
        assert_eq!(image_of(html), "https://cdn/z.png");
    }

    #[test]
    fn missing_image_is_empty() {
        assert_eq!(image_of("<p></p>"), "");
    }
}
