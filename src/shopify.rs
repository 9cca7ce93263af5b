use std::sync::Arc;

use anyhow::Context as _;
use rand::Rng;
use rand::seq::IndexedRandom as _;
use serde::{Deserialize, Serialize};
use url::Url;
use url::form_urlencoded;

use crate::cli::ResolveArgs;
use crate::extract::{default_currency, format_price_exact, price::parse_float_prefix};
use crate::fetch::{ContentFetcher, ContentKind, DEFAULT_FETCH_TIMEOUT, Fetch};

pub async fn run(args: ResolveArgs) -> anyhow::Result<()> {
    let fetcher = ContentFetcher::new(args.proxy, DEFAULT_FETCH_TIMEOUT).context("build fetcher")?;
    let resolver = ShopifyResolver::new(Arc::new(fetcher));

    let size = match (args.range_min, args.range_max) {
        _ if !args.size.is_empty() => SizePolicy::Specific { sizes: args.size },
        (Some(min), Some(max)) => SizePolicy::Range { min, max },
        _ => SizePolicy::Random,
    };
    let request = CheckoutRequest {
        product_url: args.url,
        size,
        min_price: args.min_price,
        max_price: args.max_price,
        profile: None,
        quantity: args.quantity,
    };

    let result = resolver.process_task(&request).await;
    let json = serde_json::to_string_pretty(&result).context("serialize checkout result")?;
    println!("{json}");

    if !result.success {
        anyhow::bail!(
            "resolution failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopifyProduct {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub variants: Vec<ShopifyVariant>,
    #[serde(default)]
    pub images: Vec<ShopifyImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopifyImage {
    pub src: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopifyVariant {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub option1: Option<String>,
    #[serde(default)]
    pub option2: Option<String>,
    #[serde(default)]
    pub option3: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub inventory_quantity: Option<i64>,
}

impl ShopifyVariant {
    /// `option1` when set, otherwise the variant title.
    pub fn size_label(&self) -> &str {
        self.option1
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.title)
    }

    pub fn price_amount(&self) -> Option<f64> {
        parse_float_prefix(&self.price)
    }

    fn size_number(&self) -> Option<f64> {
        let digits: String = self
            .size_label()
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        parse_float_prefix(&digits)
    }
}

#[derive(Debug, Deserialize)]
struct ProductEnvelope {
    product: Option<ShopifyProduct>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SizePolicy {
    #[default]
    Random,
    /// Tried in order; the first available size wins.
    Specific { sizes: Vec<String> },
    Range { min: String, max: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub address1: String,
    pub address2: String,
    pub city: String,
    pub province: String,
    pub zip: String,
    pub country: String,
    pub phone: String,
}

impl Address {
    fn fields(&self) -> [(&'static str, &str); 9] {
        [
            ("first_name", self.first_name.as_str()),
            ("last_name", self.last_name.as_str()),
            ("address1", self.address1.as_str()),
            ("address2", self.address2.as_str()),
            ("city", self.city.as_str()),
            ("province", self.province.as_str()),
            ("zip", self.zip.as_str()),
            ("country", self.country.as_str()),
            ("phone", self.phone.as_str()),
        ]
    }
}

/// Buyer data embedded as query parameters in a checkout link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutProfile {
    pub email: String,
    pub shipping: Address,
    pub billing: Option<Address>,
}

/// How the billing block of a pre-filled link is populated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    /// Billing parameters repeat the shipping address.
    #[default]
    MirrorShipping,
    /// Uses `CheckoutProfile::billing` when present.
    Distinct,
}

pub fn store_origin(store_url: &str) -> anyhow::Result<String> {
    let url = Url::parse(store_url).with_context(|| format!("parse store url {store_url}"))?;
    if url.host_str().is_none() {
        anyhow::bail!("store url has no host: {store_url}");
    }
    Ok(url.origin().ascii_serialization())
}

/// `{origin}/products/{handle}.json` for a product page URL.
pub fn product_json_url(product_url: &str) -> anyhow::Result<String> {
    let origin = store_origin(product_url)?;
    let url = Url::parse(product_url).with_context(|| format!("parse product url {product_url}"))?;
    let handle = url
        .path_segments()
        .and_then(|mut segments| {
            segments
                .by_ref()
                .find(|segment| *segment == "products")
                .and_then(|_| segments.next())
        })
        .filter(|handle| !handle.is_empty())
        .with_context(|| format!("no product handle in {product_url}"))?;
    Ok(format!("{origin}/products/{handle}.json"))
}

pub fn cart_url(store_url: &str, variant_id: u64, quantity: u32) -> anyhow::Result<String> {
    let origin = store_origin(store_url)?;
    Ok(format!("{origin}/cart/{variant_id}:{}", quantity.max(1)))
}

pub fn checkout_url(store_url: &str, variant_id: u64, quantity: u32) -> anyhow::Result<String> {
    let origin = store_origin(store_url)?;
    Ok(format!(
        "{origin}/checkout?updates[{variant_id}]={}",
        quantity.max(1)
    ))
}

/// Cart link carrying `updates`, email, shipping and billing parameters.
/// Empty profile fields are left out.
pub fn cart_url_with_profile(
    store_url: &str,
    variant_id: u64,
    quantity: u32,
    profile: &CheckoutProfile,
    billing_mode: BillingMode,
) -> anyhow::Result<String> {
    let base = cart_url(store_url, variant_id, quantity)?;
    let mut params = form_urlencoded::Serializer::new(String::new());
    params.append_pair(
        &format!("updates[{variant_id}]"),
        &quantity.max(1).to_string(),
    );
    if !profile.email.trim().is_empty() {
        params.append_pair("checkout[email]", &profile.email);
    }

    let billing = match billing_mode {
        BillingMode::MirrorShipping => &profile.shipping,
        BillingMode::Distinct => profile.billing.as_ref().unwrap_or(&profile.shipping),
    };
    for (kind, address) in [("shipping_address", &profile.shipping), ("billing_address", billing)] {
        for (field, value) in address.fields() {
            if !value.trim().is_empty() {
                params.append_pair(&format!("checkout[{kind}][{field}]"), value);
            }
        }
    }

    Ok(format!("{base}?{}", params.finish()))
}

/// Exact case-insensitive match on the size label first, then containment
/// in either direction. Unavailable variants never match.
pub fn find_variant_by_size<'a>(
    product: &'a ShopifyProduct,
    size: &str,
) -> Option<&'a ShopifyVariant> {
    let wanted = size.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    let available = || product.variants.iter().filter(|v| v.available);

    available()
        .find(|v| v.size_label().trim().to_lowercase() == wanted)
        .or_else(|| {
            available().find(|v| {
                let label = v.size_label().to_lowercase();
                let digits: String = label
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                label.contains(&wanted) || (!digits.is_empty() && wanted.contains(&digits))
            })
        })
}

pub fn find_variant_in_range<'a>(
    product: &'a ShopifyProduct,
    min: &str,
    max: &str,
) -> Option<&'a ShopifyVariant> {
    find_variant_in_range_with(product, min, max, &mut rand::rng())
}

/// Uniform pick among available variants whose numeric size lies in
/// `[min, max]`.
pub fn find_variant_in_range_with<'a, R: Rng + ?Sized>(
    product: &'a ShopifyProduct,
    min: &str,
    max: &str,
    rng: &mut R,
) -> Option<&'a ShopifyVariant> {
    let min = parse_float_prefix(min)?;
    let max = parse_float_prefix(max)?;
    let matches: Vec<&ShopifyVariant> = product
        .variants
        .iter()
        .filter(|v| v.available)
        .filter(|v| v.size_number().is_some_and(|n| n >= min && n <= max))
        .collect();
    matches.choose(rng).copied()
}

pub fn find_random_available_variant(product: &ShopifyProduct) -> Option<&ShopifyVariant> {
    find_random_available_variant_with(product, &mut rand::rng())
}

pub fn find_random_available_variant_with<'a, R: Rng + ?Sized>(
    product: &'a ShopifyProduct,
    rng: &mut R,
) -> Option<&'a ShopifyVariant> {
    let available: Vec<&ShopifyVariant> =
        product.variants.iter().filter(|v| v.available).collect();
    available.choose(rng).copied()
}

/// Selects a variant under `policy`, or the human-readable reason none fits.
pub fn select_variant<'a, R: Rng + ?Sized>(
    product: &'a ShopifyProduct,
    policy: &SizePolicy,
    rng: &mut R,
) -> Result<&'a ShopifyVariant, &'static str> {
    match policy {
        SizePolicy::Specific { sizes } if !sizes.is_empty() => sizes
            .iter()
            .find_map(|size| find_variant_by_size(product, size))
            .ok_or("Specified sizes not available"),
        SizePolicy::Range { min, max } if !min.trim().is_empty() && !max.trim().is_empty() => {
            find_variant_in_range_with(product, min, max, rng)
                .ok_or("No sizes available in specified range")
        }
        _ => find_random_available_variant_with(product, rng).ok_or("No variants available"),
    }
}

/// Inputs for one resolution attempt.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub product_url: String,
    pub size: SizePolicy,
    /// Inactive unless positive.
    pub min_price: Option<f64>,
    /// Inactive unless positive.
    pub max_price: Option<f64>,
    pub profile: Option<CheckoutProfile>,
    pub quantity: u32,
}

impl CheckoutRequest {
    pub fn new(product_url: impl Into<String>) -> Self {
        Self {
            product_url: product_url.into(),
            size: SizePolicy::Random,
            min_price: None,
            max_price: None,
            profile: None,
            quantity: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckoutResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<u64>,
}

impl CheckoutResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

pub struct ShopifyResolver {
    fetcher: Arc<dyn Fetch>,
    billing_mode: BillingMode,
}

impl ShopifyResolver {
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            fetcher,
            billing_mode: BillingMode::default(),
        }
    }

    pub fn with_billing_mode(mut self, billing_mode: BillingMode) -> Self {
        self.billing_mode = billing_mode;
        self
    }

    pub async fn get_product(&self, product_url: &str) -> anyhow::Result<ShopifyProduct> {
        let json_url = product_json_url(product_url)?;
        tracing::debug!(url = %json_url, "fetching product json");

        let body = self
            .fetcher
            .fetch(&json_url, ContentKind::Json)
            .await
            .with_context(|| format!("fetch {json_url}"))?;
        let envelope: ProductEnvelope =
            serde_json::from_str(&body).with_context(|| format!("parse {json_url}"))?;
        let product = envelope
            .product
            .with_context(|| format!("no product in {json_url}"))?;

        tracing::info!(
            product = %product.title,
            variants = product.variants.len(),
            "product fetched"
        );
        Ok(product)
    }

    /// Fetch, price filter, variant selection and link building.
    ///
    /// Every failure comes back as `CheckoutResult { success: false, .. }`.
    pub async fn process_task(&self, request: &CheckoutRequest) -> CheckoutResult {
        if let Err(err) = product_json_url(&request.product_url) {
            return CheckoutResult::failure(format!("Invalid product URL: {err:#}"));
        }

        let product = match self.get_product(&request.product_url).await {
            Ok(product) => product,
            Err(err) => {
                tracing::warn!(url = %request.product_url, ?err, "product fetch failed");
                return CheckoutResult::failure("Failed to fetch product data");
            }
        };

        let listed = product
            .variants
            .first()
            .and_then(ShopifyVariant::price_amount)
            .unwrap_or(0.0);
        if let Some(min) = request.min_price.filter(|p| *p > 0.0) {
            if listed < min {
                return CheckoutResult::failure(format!("Price {listed} below minimum {min}"));
            }
        }
        if let Some(max) = request.max_price.filter(|p| *p > 0.0) {
            if listed > max {
                return CheckoutResult::failure(format!("Price {listed} above maximum {max}"));
            }
        }

        let variant = match select_variant(&product, &request.size, &mut rand::rng()) {
            Ok(variant) => variant,
            Err(reason) => return CheckoutResult::failure(reason),
        };
        tracing::info!(variant_id = variant.id, size = variant.size_label(), "variant selected");

        let link = match &request.profile {
            Some(profile) => cart_url_with_profile(
                &request.product_url,
                variant.id,
                request.quantity,
                profile,
                self.billing_mode,
            ),
            None => cart_url(&request.product_url, variant.id, request.quantity),
        };
        let checkout_url = match link {
            Ok(url) => url,
            Err(err) => return CheckoutResult::failure(format!("{err:#}")),
        };

        let amount = variant.price_amount();
        let currency = default_currency(&request.product_url);
        CheckoutResult {
            success: true,
            checkout_url: Some(checkout_url),
            error: None,
            product_name: Some(product.title.clone()),
            price: Some(amount.map_or_else(
                || crate::model::PRICE_NOT_AVAILABLE.to_owned(),
                |a| format_price_exact(a, currency),
            )),
            price_amount: amount,
            size: Some(variant.size_label().to_owned()),
            variant_id: Some(variant.id),
        }
    }
}
