use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static META_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid meta tag regex"));

static TAG_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid tag attribute regex")
});

static JSON_LD_SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .expect("valid json-ld script regex")
});

static TITLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<title[^>]*>([^<]+)<").expect("valid title regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

#[derive(Debug, Clone)]
struct MetaTag {
    property: Option<String>,
    name: Option<String>,
    content: String,
}

/// A fetched document parsed once and shared by every extraction stage.
#[derive(Debug)]
pub struct Page<'a> {
    pub html: &'a str,
    pub lower: String,
    metas: Vec<MetaTag>,
    json_ld: Vec<Value>,
}

impl<'a> Page<'a> {
    pub fn parse(html: &'a str) -> Self {
        Self {
            html,
            lower: html.to_lowercase(),
            metas: parse_meta_tags(html),
            json_ld: parse_json_ld_blocks(html),
        }
    }

    /// Content of the first `<meta>` whose `property` or `name` equals `key`.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metas
            .iter()
            .find(|meta| {
                meta.property
                    .as_deref()
                    .is_some_and(|p| p.eq_ignore_ascii_case(key))
                    || meta.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(key))
            })
            .map(|meta| meta.content.as_str())
            .filter(|content| !content.trim().is_empty())
    }

    pub fn meta_property(&self, key: &str) -> Option<&str> {
        self.metas
            .iter()
            .find(|meta| {
                meta.property
                    .as_deref()
                    .is_some_and(|p| p.eq_ignore_ascii_case(key))
            })
            .map(|meta| meta.content.as_str())
            .filter(|content| !content.trim().is_empty())
    }

    pub fn title(&self) -> Option<&str> {
        TITLE_TAG
            .captures(self.html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    /// JSON-LD nodes typed `Product`, whether top-level, inside an array, or
    /// nested under `@graph`.
    pub fn json_ld_products(&self) -> Vec<&Value> {
        let mut products = Vec::new();
        for block in &self.json_ld {
            match block {
                Value::Array(items) => {
                    products.extend(items.iter().filter(|item| is_product(item)));
                }
                Value::Object(object) => {
                    if is_product(block) {
                        products.push(block);
                    }
                    if let Some(Value::Array(graph)) = object.get("@graph") {
                        products.extend(graph.iter().filter(|item| is_product(item)));
                    }
                }
                _ => {}
            }
        }
        products
    }
}

fn is_product(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(kind)) => kind == "Product",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k.as_str() == Some("Product")),
        _ => false,
    }
}

fn parse_meta_tags(html: &str) -> Vec<MetaTag> {
    let mut metas = Vec::new();
    for tag in META_TAG.find_iter(html) {
        let mut property = None;
        let mut name = None;
        let mut content = None;

        for caps in TAG_ATTRIBUTE.captures_iter(tag.as_str()) {
            let Some(attr) = caps.get(1) else {
                continue;
            };
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_owned())
                .unwrap_or_default();
            match attr.as_str().to_ascii_lowercase().as_str() {
                "property" => property = Some(value),
                "name" => name = Some(value),
                "content" => content = Some(value),
                _ => {}
            }
        }

        if let Some(content) = content {
            metas.push(MetaTag {
                property,
                name,
                content,
            });
        }
    }
    metas
}

fn parse_json_ld_blocks(html: &str) -> Vec<Value> {
    let mut blocks = Vec::new();
    for caps in JSON_LD_SCRIPT.captures_iter(html) {
        let Some(body) = caps.get(1) else {
            continue;
        };
        match serde_json::from_str::<Value>(body.as_str().trim()) {
            Ok(value) => blocks.push(value),
            Err(err) => {
                tracing::debug!(?err, "skipping malformed json-ld block");
            }
        }
    }
    blocks
}

/// Decodes HTML entities and collapses runs of whitespace.
pub fn clean_text(text: &str) -> String {
    let decoded = decode_entities(text);
    WHITESPACE.replace_all(&decoded, " ").trim().to_owned()
}

pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];

        let decoded = tail
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&tail[1..semi]).map(|ch| (ch, semi)));

        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "nbsp" => Some(' '),
        "ndash" => Some('–'),
        "mdash" => Some('—'),
        _ => {
            let code = entity.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse::<u32>().ok()?,
            };
            char::from_u32(value)
        }
    }
}

/// Returns the brace-balanced JSON object starting exactly at `start`.
///
/// String literals are honored so braces inside them do not count.
pub fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

/// `//cdn.example/x.jpg` becomes `https://cdn.example/x.jpg`.
pub fn normalize_protocol_relative(url: &str) -> String {
    match url.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_owned(),
    }
}
