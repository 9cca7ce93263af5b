use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::alert::{AlertLog, Decision, DedupKey, Deduplicator};
use crate::cli::{CheckArgs, MonitorArgs};
use crate::config::Config;
use crate::extract;
use crate::fetch::{ContentFetcher, ContentKind, DEFAULT_FETCH_TIMEOUT, Fetch};
use crate::model::{AlertEvent, AlertStatus, MonitorTarget, StockSnapshot, TargetState, store_name};
use crate::notify::{Channel, Notification, Notifier, TerminalBell};

pub async fn check(args: CheckArgs) -> anyhow::Result<()> {
    let config = match args.config.as_deref() {
        Some(path) => Some(Config::load(path).context("load config")?),
        None => None,
    };
    let proxies = match (&config, args.proxy.is_empty()) {
        (Some(config), true) => config.proxies.clone(),
        _ => args.proxy,
    };
    let timeout = config
        .as_ref()
        .map_or(DEFAULT_FETCH_TIMEOUT, |c| c.settings.fetch_timeout());

    let fetcher = ContentFetcher::new(proxies, timeout).context("build fetcher")?;
    let snapshot = match fetcher.fetch(&args.url, ContentKind::Html).await {
        Ok(html) => extract::extract(&html, &args.url),
        Err(err) => {
            tracing::warn!(url = %args.url, ?err, "fetch failed");
            StockSnapshot::failed(format!("{err:#}"))
        }
    };

    let json = serde_json::to_string_pretty(&snapshot).context("serialize snapshot")?;
    println!("{json}");
    Ok(())
}

pub async fn run(args: MonitorArgs) -> anyhow::Result<()> {
    let config = Config::load(&args.config).context("load config")?;

    let fetcher = ContentFetcher::new(config.proxies.clone(), config.settings.fetch_timeout())
        .context("build fetcher")?;
    let notifier = Notifier::new(config.settings.discord.clone())
        .context("build notifier")?
        .with_tone(Arc::new(TerminalBell));
    let registry = Arc::new(TargetRegistry::new());
    let runtime = MonitorRuntime::new(
        Arc::new(fetcher),
        Arc::new(notifier),
        Arc::clone(&registry),
        config.settings.sound_enabled,
    );

    let mut started = 0usize;
    for target in config.targets {
        let wanted = args.all || target.state == TargetState::Running;
        registry.upsert(target.clone());
        if !wanted {
            continue;
        }
        match runtime.start(target) {
            Ok(()) => started += 1,
            Err(err) => tracing::warn!(?err, "monitor not started"),
        }
    }
    if started == 0 {
        anyhow::bail!("no targets started; mark targets `state: running` or pass --all");
    }
    tracing::info!(started, "monitoring; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    runtime.stop_all();

    for target in registry.list() {
        tracing::info!(
            target_id = %target.id,
            alerts_sent = target.stats.alerts_sent,
            "target summary"
        );
    }
    tracing::info!(alerts = runtime.alerts().len(), "monitor stopped");
    Ok(())
}

/// Operator-visible target definitions plus the stats the runtime updates.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: RwLock<HashMap<String, MonitorTarget>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, target: MonitorTarget) {
        self.write().insert(target.id.clone(), target);
    }

    pub fn remove(&self, target_id: &str) -> Option<MonitorTarget> {
        self.write().remove(target_id)
    }

    pub fn get(&self, target_id: &str) -> Option<MonitorTarget> {
        self.read().get(target_id).cloned()
    }

    pub fn list(&self) -> Vec<MonitorTarget> {
        let mut targets: Vec<_> = self.read().values().cloned().collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));
        targets
    }

    pub fn set_state(&self, target_id: &str, state: TargetState) {
        if let Some(target) = self.write().get_mut(target_id) {
            target.state = state;
        }
    }

    pub fn record_check(&self, target_id: &str, at: DateTime<Utc>) {
        if let Some(target) = self.write().get_mut(target_id) {
            target.stats.last_check = Some(at);
        }
    }

    pub fn record_alert(&self, target_id: &str) {
        if let Some(target) = self.write().get_mut(target_id) {
            target.stats.alerts_sent += 1;
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, MonitorTarget>> {
        self.targets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, MonitorTarget>> {
        self.targets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Outcome of checking one URL of a target.
#[derive(Debug, Clone)]
pub struct UrlCheck {
    pub url: String,
    pub snapshot: StockSnapshot,
    pub admitted: bool,
    pub decision: Option<Decision>,
}

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Timer {
    fn shutdown(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

struct CheckContext {
    fetcher: Arc<dyn Fetch>,
    notifier: Arc<Notifier>,
    dedup: Arc<Deduplicator>,
    alerts: Arc<AlertLog>,
    registry: Arc<TargetRegistry>,
    sound_enabled: bool,
}

impl CheckContext {
    async fn run_check(&self, target: &MonitorTarget) -> Vec<UrlCheck> {
        tracing::debug!(target_id = %target.id, urls = target.urls.len(), "checking target");

        let mut results = Vec::with_capacity(target.urls.len());
        for url in &target.urls {
            let snapshot = match self.fetcher.fetch(url, ContentKind::Html).await {
                Ok(html) => extract::extract(&html, url),
                Err(err) => StockSnapshot::failed(format!("{err:#}")),
            };
            self.registry.record_check(&target.id, Utc::now());

            if let Some(err) = &snapshot.error {
                tracing::warn!(target_id = %target.id, url = %url, err = %err, "check failed");
                results.push(UrlCheck {
                    url: url.clone(),
                    snapshot,
                    admitted: false,
                    decision: None,
                });
                continue;
            }

            tracing::info!(
                target_id = %target.id,
                url = %url,
                product = %snapshot.product_name,
                price = %snapshot.price,
                in_stock = snapshot.in_stock,
                "checked"
            );

            if !target.admits(&snapshot.product_name) {
                tracing::debug!(target_id = %target.id, url = %url, "filtered by keywords");
                results.push(UrlCheck {
                    url: url.clone(),
                    snapshot,
                    admitted: false,
                    decision: None,
                });
                continue;
            }

            let decision = self
                .dedup
                .observe(DedupKey::new(&target.id, url), snapshot.in_stock);
            match decision {
                Decision::Alert => self.raise_alert(target, url, &snapshot).await,
                Decision::Suppressed => {
                    tracing::debug!(target_id = %target.id, url = %url, "already alerted");
                }
                Decision::Cleared => {}
            }

            results.push(UrlCheck {
                url: url.clone(),
                snapshot,
                admitted: true,
                decision: Some(decision),
            });
        }
        results
    }

    async fn raise_alert(&self, target: &MonitorTarget, url: &str, snapshot: &StockSnapshot) {
        tracing::info!(
            target_id = %target.id,
            url,
            product = %snapshot.product_name,
            price = %snapshot.price,
            "in stock"
        );

        self.alerts.push(AlertEvent {
            id: uuid::Uuid::new_v4().to_string(),
            product_name: snapshot.product_name.clone(),
            product_url: url.to_owned(),
            product_image: snapshot.image_url.clone(),
            store_name: store_name(url),
            price: snapshot.price.clone(),
            status: AlertStatus::InStock,
            target_id: target.id.clone(),
            created_at: Utc::now(),
        });
        self.registry.record_alert(&target.id);

        let notification = Notification {
            product_name: snapshot.product_name.clone(),
            product_url: url.to_owned(),
            image_url: snapshot.image_url.clone(),
            price: snapshot.price.clone(),
            source_name: target.display_name().to_owned(),
        };
        if let Err(err) = self.notifier.send(Channel::Restock, &notification).await {
            tracing::warn!(target_id = %target.id, ?err, "restock webhook failed");
        }

        if self.sound_enabled {
            self.notifier.play_tone();
        }
    }
}

pub struct MonitorRuntime {
    ctx: Arc<CheckContext>,
    timers: Mutex<HashMap<String, Timer>>,
}

impl MonitorRuntime {
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        notifier: Arc<Notifier>,
        registry: Arc<TargetRegistry>,
        sound_enabled: bool,
    ) -> Self {
        Self {
            ctx: Arc::new(CheckContext {
                fetcher,
                notifier,
                dedup: Arc::new(Deduplicator::new()),
                alerts: Arc::new(AlertLog::new()),
                registry,
                sound_enabled,
            }),
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.ctx.registry
    }

    pub fn alerts(&self) -> &Arc<AlertLog> {
        &self.ctx.alerts
    }

    pub fn dedup(&self) -> &Arc<Deduplicator> {
        &self.ctx.dedup
    }

    /// Restarts `target`: any existing timer for the id is cancelled, one
    /// check runs immediately, then every `check_interval` seconds.
    pub fn start(&self, mut target: MonitorTarget) -> anyhow::Result<()> {
        // Held through the insert: one timer per id even under concurrent starts.
        let mut timers = self.lock_timers();
        if let Some(previous) = timers.remove(&target.id) {
            previous.shutdown();
            tracing::debug!(target_id = %target.id, "previous timer cancelled");
        }

        if target.urls.is_empty() {
            target.state = TargetState::Error;
            let target_id = target.id.clone();
            self.ctx.registry.upsert(target);
            anyhow::bail!("target {target_id} has no urls");
        }

        target.state = TargetState::Running;
        self.ctx.registry.upsert(target.clone());

        let period = Duration::from_secs(target.effective_interval_secs());
        let cancel = CancellationToken::new();
        let ctx = Arc::clone(&self.ctx);
        let token = cancel.clone();
        let target_id = target.id.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ctx.run_check(&target) => {}
                }
            }
            tracing::debug!(target_id = %target.id, "timer loop exited");
        });

        tracing::info!(target_id = %target_id, interval_secs = period.as_secs(), "monitor started");
        timers.insert(target_id, Timer { cancel, handle });
        Ok(())
    }

    /// Cancels the timer for `target_id`; returns whether one was running.
    pub fn stop(&self, target_id: &str) -> bool {
        let timer = self.lock_timers().remove(target_id);
        let Some(timer) = timer else {
            return false;
        };
        timer.shutdown();
        self.ctx.registry.set_state(target_id, TargetState::Stopped);
        tracing::info!(target_id, "monitor stopped");
        true
    }

    pub fn stop_all(&self) {
        let timers: Vec<(String, Timer)> = self.lock_timers().drain().collect();
        for (target_id, timer) in timers {
            timer.shutdown();
            self.ctx.registry.set_state(&target_id, TargetState::Stopped);
        }
        tracing::info!("all monitors stopped");
    }

    /// Starts every registered target; returns how many failed to start.
    pub fn start_all(&self) -> usize {
        let mut failed = 0;
        for target in self.ctx.registry.list() {
            if let Err(err) = self.start(target) {
                tracing::warn!(?err, "monitor not started");
                failed += 1;
            }
        }
        failed
    }

    /// Stops the timer and forgets the target and its dedup keys.
    pub fn delete(&self, target_id: &str) -> Option<MonitorTarget> {
        self.stop(target_id);
        self.ctx.dedup.forget_target(target_id);
        self.ctx.registry.remove(target_id)
    }

    pub fn is_running(&self, target_id: &str) -> bool {
        self.lock_timers().contains_key(target_id)
    }

    pub fn timer_count(&self) -> usize {
        self.lock_timers().len()
    }

    /// One check pass outside the timer, with the same side effects.
    pub async fn check_now(&self, target: &MonitorTarget) -> Vec<UrlCheck> {
        if self.ctx.registry.get(&target.id).is_none() {
            self.ctx.registry.upsert(target.clone());
        }
        self.ctx.run_check(target).await
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Timer>> {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for MonitorRuntime {
    fn drop(&mut self) {
        for (_, timer) in self.lock_timers().drain() {
            timer.shutdown();
        }
    }
}
