use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use serde::Serialize;

use crate::config::DiscordSettings;
use crate::model::store_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Restock,
    Checkout,
    Decline,
}

impl Channel {
    fn title(self) -> &'static str {
        match self {
            Self::Restock => "🚨 PRODUCT IN STOCK!",
            Self::Checkout => "✅ CHECKOUT SUCCESS!",
            Self::Decline => "❌ PAYMENT DECLINED",
        }
    }

    fn color(self) -> u32 {
        match self {
            Self::Restock => 0x9D80FE,
            Self::Checkout => 0x00FF00,
            Self::Decline => 0xFF0000,
        }
    }

    fn source_label(self) -> &'static str {
        match self {
            Self::Restock => "📡 Monitor",
            Self::Checkout | Self::Decline => "🧾 Task",
        }
    }
}

/// What a notification is about.
#[derive(Debug, Clone)]
pub struct Notification {
    pub product_name: String,
    pub product_url: String,
    pub image_url: String,
    pub price: String,
    /// Target name for restocks, task-group name for checkout outcomes.
    pub source_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    /// Channel disabled or has no URL.
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
    pub timestamp: String,
    pub footer: EmbedFooter,
}

#[derive(Debug, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

pub fn build_payload(channel: Channel, notification: &Notification) -> WebhookPayload {
    let price = if notification.price.trim().is_empty() {
        "N/A".to_owned()
    } else {
        notification.price.clone()
    };

    let field = |name: &str, value: String, inline: bool| EmbedField {
        name: name.to_owned(),
        value,
        inline,
    };

    let embed = Embed {
        title: channel.title().to_owned(),
        description: format!("**{}**", notification.product_name),
        color: channel.color(),
        fields: vec![
            field("💰 Price", price, true),
            field("🏪 Store", store_name(&notification.product_url), true),
            field(
                channel.source_label(),
                notification.source_name.clone(),
                true,
            ),
            field(
                "🔗 Link",
                format!("[Click to Buy]({})", notification.product_url),
                false,
            ),
        ],
        thumbnail: (!notification.image_url.is_empty()).then(|| EmbedImage {
            url: notification.image_url.clone(),
        }),
        timestamp: Utc::now().to_rfc3339(),
        footer: EmbedFooter {
            text: concat!("stockwatch v", env!("CARGO_PKG_VERSION")).to_owned(),
        },
    };

    WebhookPayload {
        embeds: vec![embed],
    }
}

/// Local audible cue played alongside restock alerts.
pub trait ToneSink: Send + Sync {
    fn play(&self);
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Default)]
pub struct TerminalBell;

impl ToneSink for TerminalBell {
    fn play(&self) {
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }
}

/// Fans notifications out to the restock, checkout and decline webhooks.
pub struct Notifier {
    client: reqwest::Client,
    discord: DiscordSettings,
    tone: Option<Arc<dyn ToneSink>>,
}

impl Notifier {
    pub fn new(discord: DiscordSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build webhook http client")?;
        Ok(Self {
            client,
            discord,
            tone: None,
        })
    }

    pub fn with_tone(mut self, tone: Arc<dyn ToneSink>) -> Self {
        self.tone = Some(tone);
        self
    }

    pub fn channel_url(&self, channel: Channel) -> Option<&str> {
        if !self.discord.enabled {
            return None;
        }
        let url = match channel {
            Channel::Restock => self.discord.webhook_restock.as_deref(),
            Channel::Checkout => self.discord.webhook_checkout.as_deref(),
            Channel::Decline => self.discord.webhook_decline.as_deref(),
        };
        url.map(str::trim).filter(|u| !u.is_empty())
    }

    pub async fn send(
        &self,
        channel: Channel,
        notification: &Notification,
    ) -> anyhow::Result<Dispatch> {
        let Some(url) = self.channel_url(channel) else {
            tracing::debug!(?channel, "webhook channel not configured; skipping");
            return Ok(Dispatch::Skipped);
        };

        let payload = build_payload(channel, notification);
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("POST {channel:?} webhook"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{channel:?} webhook returned {status}: {body}");
        }

        tracing::info!(?channel, product = %notification.product_name, "webhook notification sent");
        Ok(Dispatch::Sent)
    }

    /// Checkout or decline outcome for a task group.
    pub async fn send_checkout_notification(
        &self,
        outcome: Channel,
        notification: &Notification,
    ) -> anyhow::Result<Dispatch> {
        if outcome == Channel::Restock {
            anyhow::bail!("checkout notifications use the checkout or decline channel");
        }
        self.send(outcome, notification).await
    }

    pub fn play_tone(&self) {
        if let Some(tone) = &self.tone {
            tone.play();
        }
    }
}
