use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::model::{MIN_CHECK_INTERVAL_SECS, MonitorTarget};
use crate::task::{ProfileGroup, TaskGroup};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: AppSettings,
    /// Ordered pass-through proxy bases; empty means direct requests.
    pub proxies: Vec<String>,
    pub targets: Vec<MonitorTarget>,
    pub profile_groups: Vec<ProfileGroup>,
    pub task_groups: Vec<TaskGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub discord: DiscordSettings,
    pub check_interval_default: u64,
    pub sound_enabled: bool,
    pub fetch_timeout_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            discord: DiscordSettings::default(),
            check_interval_default: 30,
            sound_enabled: true,
            fetch_timeout_secs: 15,
        }
    }
}

impl AppSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordSettings {
    pub enabled: bool,
    pub webhook_restock: Option<String>,
    pub webhook_checkout: Option<String>,
    pub webhook_decline: Option<String>,
}

impl Default for DiscordSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_restock: None,
            webhook_checkout: None,
            webhook_decline: None,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse config: {}", path.display()))?;
        config.apply_env()?;
        config.normalize();
        Ok(config)
    }

    /// Environment overrides on top of the file.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(raw) = var("STOCKWATCH_PROXIES") {
            self.proxies = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(url) = var("STOCKWATCH_WEBHOOK_RESTOCK") {
            self.settings.discord.webhook_restock = Some(url);
        }
        if let Some(url) = var("STOCKWATCH_WEBHOOK_CHECKOUT") {
            self.settings.discord.webhook_checkout = Some(url);
        }
        if let Some(url) = var("STOCKWATCH_WEBHOOK_DECLINE") {
            self.settings.discord.webhook_decline = Some(url);
        }
        if let Some(raw) = var("STOCKWATCH_SOUND") {
            self.settings.sound_enabled = parse_flag(&raw)
                .with_context(|| format!("invalid STOCKWATCH_SOUND={raw:?}"))?;
        }
        Ok(())
    }

    /// Applies the default interval, clamps to the floor and fills in
    /// unnamed targets.
    pub fn normalize(&mut self) {
        self.settings.check_interval_default = self
            .settings
            .check_interval_default
            .max(MIN_CHECK_INTERVAL_SECS);
        for target in &mut self.targets {
            if target.check_interval == 0 {
                target.check_interval = self.settings.check_interval_default;
            }
            target.check_interval = target.check_interval.max(MIN_CHECK_INTERVAL_SECS);
            if target.name.trim().is_empty() {
                target.name = target.id.clone();
            }
        }
    }
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => anyhow::bail!("unsupported flag value: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
settings:
  discord:
    webhook_restock: https://discord.example/api/webhooks/1/restock
proxies:
  - "https://api.allorigins.win/raw?url="
targets:
  - id: m-1
    urls: ["https://kith.com/products/dunk"]
    keywords: ["dunk"]
    check_interval: 5
  - id: m-2
    name: Second
    urls: ["https://eu.kith.com/products/dunk"]
"#;

    #[test]
    fn yaml_defaults_are_filled() -> anyhow::Result<()> {
        let mut config: Config = serde_yaml::from_str(SAMPLE)?;
        config.normalize();

        assert!(config.settings.discord.enabled);
        assert!(config.settings.sound_enabled);
        assert_eq!(config.settings.check_interval_default, 30);
        assert_eq!(config.settings.fetch_timeout(), Duration::from_secs(15));
        assert_eq!(config.proxies.len(), 1);

        let target = &config.targets[0];
        assert_eq!(target.name, "m-1");
        assert_eq!(target.check_interval, MIN_CHECK_INTERVAL_SECS);
        assert!(target.negative_keywords.is_empty());
        assert_eq!(config.targets[1].check_interval, 30);
        assert_eq!(config.targets[1].name, "Second");
        Ok(())
    }

    #[test]
    fn env_overrides_replace_file_values() -> anyhow::Result<()> {
        let mut config: Config = serde_yaml::from_str(SAMPLE)?;
        config.apply_overrides(|key| match key {
            "STOCKWATCH_PROXIES" => Some(" https://a/?u= , ,https://b/?u=".to_owned()),
            "STOCKWATCH_WEBHOOK_DECLINE" => Some("https://hooks.example/decline".to_owned()),
            "STOCKWATCH_SOUND" => Some("off".to_owned()),
            _ => None,
        })?;

        assert_eq!(config.proxies, ["https://a/?u=", "https://b/?u="]);
        assert_eq!(
            config.settings.discord.webhook_decline.as_deref(),
            Some("https://hooks.example/decline")
        );
        assert!(!config.settings.sound_enabled);
        Ok(())
    }

    #[test]
    fn invalid_flag_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "STOCKWATCH_SOUND").then(|| "loud".to_owned()))
            .unwrap_err();
        assert!(format!("{err:#}").contains("unsupported flag value"));
    }
}
