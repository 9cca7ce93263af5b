use std::collections::VecDeque;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cli::TaskArgs;
use crate::config::Config;
use crate::fetch::ContentFetcher;
use crate::model::{UNKNOWN_PRODUCT, store_name};
use crate::notify::{Channel, Notification, Notifier};
use crate::shopify::{
    Address, CheckoutProfile, CheckoutRequest, CheckoutResult, ShopifyResolver, SizePolicy,
};

pub const ORDER_BOOK_CAPACITY: usize = 500;
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

pub async fn run(args: TaskArgs) -> anyhow::Result<()> {
    let config = Config::load(&args.config).context("load config")?;

    let fetcher = ContentFetcher::new(config.proxies.clone(), config.settings.fetch_timeout())
        .context("build fetcher")?;
    let notifier = Notifier::new(config.settings.discord.clone()).context("build notifier")?;
    let opener: Arc<dyn LinkOpener> = if args.no_open {
        Arc::new(LogLinkOpener)
    } else {
        Arc::new(SystemLinkOpener)
    };
    let orchestrator = TaskOrchestrator::new(
        Arc::new(ShopifyResolver::new(Arc::new(fetcher))),
        Arc::new(notifier),
        opener,
        config.task_groups,
        config.profile_groups,
    );

    let outcomes = match args.task.as_deref() {
        Some(task_id) => vec![orchestrator.start_task(&args.group, task_id).await?],
        None => orchestrator.start_all(&args.group).await?,
    };

    let json = serde_json::to_string_pretty(&outcomes).context("serialize task outcomes")?;
    println!("{json}");

    let failed = outcomes
        .iter()
        .filter(|o| o.task.status == TaskStatus::Error)
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} tasks failed", outcomes.len());
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub shipping: Address,
    #[serde(default = "default_true")]
    pub billing_same_as_shipping: bool,
    #[serde(default)]
    pub billing: Option<Address>,
}

impl Profile {
    pub fn to_checkout_profile(&self) -> CheckoutProfile {
        let with_phone = |address: &Address| {
            let mut address = address.clone();
            if address.phone.trim().is_empty() {
                address.phone = self.phone.clone();
            }
            address
        };
        CheckoutProfile {
            email: self.email.clone(),
            shipping: with_phone(&self.shipping),
            billing: if self.billing_same_as_shipping {
                None
            } else {
                self.billing.as_ref().map(with_phone)
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    #[default]
    Url,
    Keyword,
    Sku,
    Variant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeMode {
    #[default]
    Random,
    Specific,
    Range,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSize {
    pub mode: SizeMode,
    pub specific: Vec<String>,
    pub range_min: String,
    pub range_max: String,
}

impl TaskSize {
    pub fn to_policy(&self) -> SizePolicy {
        match self.mode {
            SizeMode::Random => SizePolicy::Random,
            SizeMode::Specific => SizePolicy::Specific {
                sizes: self.specific.clone(),
            },
            SizeMode::Range => SizePolicy::Range {
                min: self.range_min.clone(),
                max: self.range_max.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    Waiting,
    Checkout,
    Success,
    Declined,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutTask {
    pub id: String,
    pub product_input: String,
    #[serde(default)]
    pub input_mode: InputMode,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub proxy_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub size: TaskSize,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub status_message: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Policy shared by every task of a group.
///
/// `proxy_rotation` and `captcha_auto_solve` are carried as data only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskGroupSettings {
    pub store_id: String,
    pub profile_group_id: Option<String>,
    pub proxy_group_id: Option<String>,
    pub account_group_id: Option<String>,
    pub cart_quantity: u32,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub retry_on_decline: bool,
    pub proxy_rotation: bool,
    pub captcha_auto_solve: bool,
}

impl Default for TaskGroupSettings {
    fn default() -> Self {
        Self {
            store_id: String::new(),
            profile_group_id: None,
            proxy_group_id: None,
            account_group_id: None,
            cart_quantity: 1,
            min_price: None,
            max_price: None,
            retry_on_decline: false,
            proxy_rotation: false,
            captcha_auto_solve: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub settings: TaskGroupSettings,
    #[serde(default)]
    pub tasks: Vec<CheckoutTask>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Success,
    Declined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub task_id: String,
    pub group_id: String,
    pub product_name: String,
    pub product_url: String,
    pub store_name: String,
    pub size: String,
    pub price: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Newest-first order history.
#[derive(Debug)]
pub struct OrderBook {
    orders: Mutex<VecDeque<Order>>,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self {
            orders: Mutex::new(VecDeque::new()),
        }
    }
}

impl OrderBook {
    pub fn record(&self, order: Order) {
        let mut orders = self.lock();
        orders.push_front(order);
        orders.truncate(ORDER_BOOK_CAPACITY);
    }

    pub fn snapshot(&self) -> Vec<Order> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Order>> {
        self.orders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Hands a checkout link to whatever the host uses to open URLs.
pub trait LinkOpener: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// Opens links with the platform's default handler.
#[derive(Debug, Default)]
pub struct SystemLinkOpener;

impl LinkOpener for SystemLinkOpener {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        let mut cmd = opener_command(url);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let program = cmd.get_program().to_string_lossy().into_owned();
        cmd.spawn()
            .with_context(|| format!("spawn {program} to open checkout link"))?;
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn opener_command(url: &str) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    cmd
}

#[cfg(target_os = "windows")]
fn opener_command(url: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", "", url]);
    cmd
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn opener_command(url: &str) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    cmd
}

/// Logs the link instead of opening it.
#[derive(Debug, Default)]
pub struct LogLinkOpener;

impl LinkOpener for LogLinkOpener {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        tracing::info!(url, "checkout link ready");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task: CheckoutTask,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CheckoutResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
}

/// Drives checkout tasks: `idle -> running -> checkout -> success`, or
/// `error` when resolution fails.
pub struct TaskOrchestrator {
    resolver: Arc<ShopifyResolver>,
    notifier: Arc<Notifier>,
    opener: Arc<dyn LinkOpener>,
    groups: Mutex<Vec<TaskGroup>>,
    profile_groups: Vec<ProfileGroup>,
    orders: OrderBook,
    settle_delay: Duration,
}

impl TaskOrchestrator {
    pub fn new(
        resolver: Arc<ShopifyResolver>,
        notifier: Arc<Notifier>,
        opener: Arc<dyn LinkOpener>,
        groups: Vec<TaskGroup>,
        profile_groups: Vec<ProfileGroup>,
    ) -> Self {
        Self {
            resolver,
            notifier,
            opener,
            groups: Mutex::new(groups),
            profile_groups,
            orders: OrderBook::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn orders(&self) -> &OrderBook {
        &self.orders
    }

    pub fn group(&self, group_id: &str) -> Option<TaskGroup> {
        self.lock_groups().iter().find(|g| g.id == group_id).cloned()
    }

    pub fn task(&self, group_id: &str, task_id: &str) -> Option<CheckoutTask> {
        self.lock_groups()
            .iter()
            .find(|g| g.id == group_id)?
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
    }

    /// Runs one checkout attempt; only unknown ids are `Err`.
    pub async fn start_task(&self, group_id: &str, task_id: &str) -> anyhow::Result<TaskOutcome> {
        let (task, group) = self.mark_running(group_id, task_id)?;
        tracing::info!(task_id, group_id, mode = ?task.input_mode, "task started");

        if task.input_mode != InputMode::Url || task.product_input.trim().is_empty() {
            let message = format!(
                "input mode {:?} is not supported for checkout",
                task.input_mode
            );
            return Ok(self.finish_with_error(group_id, task_id, message, None));
        }

        let request = CheckoutRequest {
            product_url: task.product_input.trim().to_owned(),
            size: task.size.to_policy(),
            min_price: group.settings.min_price,
            max_price: group.settings.max_price,
            profile: self.resolve_profile(&task, &group.settings),
            quantity: group.settings.cart_quantity.max(1),
        };
        let result = self.resolver.process_task(&request).await;

        if !result.success {
            let message = result
                .error
                .clone()
                .unwrap_or_else(|| "checkout resolution failed".to_owned());
            return Ok(self.finish_with_error(group_id, task_id, message, Some(result)));
        }
        let Some(checkout_url) = result.checkout_url.clone() else {
            let message = "resolver returned no checkout url".to_owned();
            return Ok(self.finish_with_error(group_id, task_id, message, Some(result)));
        };

        let mut reached_checkout = false;
        self.update_task(group_id, task_id, |t| {
            if t.status == TaskStatus::Running {
                t.status = TaskStatus::Checkout;
                t.status_message = "checkout link opened".to_owned();
                reached_checkout = true;
            }
        });
        if !reached_checkout {
            let task = self
                .task(group_id, task_id)
                .with_context(|| format!("task disappeared: {group_id}/{task_id}"))?;
            tracing::info!(task_id, status = ?task.status, "task stopped before checkout");
            return Ok(TaskOutcome {
                task,
                result: Some(result),
                order: None,
            });
        }
        tracing::info!(task_id, url = %checkout_url, "task reached checkout");

        if let Err(err) = self.opener.open(&checkout_url) {
            tracing::warn!(task_id, ?err, "failed to open checkout link");
        }

        let product_name = result
            .product_name
            .clone()
            .unwrap_or_else(|| UNKNOWN_PRODUCT.to_owned());
        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_owned(),
            group_id: group_id.to_owned(),
            product_name: product_name.clone(),
            product_url: request.product_url.clone(),
            store_name: store_name(&request.product_url),
            size: result.size.clone().unwrap_or_else(|| "N/A".to_owned()),
            price: result.price_amount.unwrap_or(0.0),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };
        self.orders.record(order.clone());

        let notification = Notification {
            product_name,
            product_url: request.product_url.clone(),
            image_url: String::new(),
            price: result.price.clone().unwrap_or_else(|| "N/A".to_owned()),
            source_name: group.name.clone(),
        };
        if let Err(err) = self
            .notifier
            .send_checkout_notification(Channel::Checkout, &notification)
            .await
        {
            tracing::warn!(task_id, ?err, "checkout webhook failed");
        }

        tokio::time::sleep(self.settle_delay).await;
        self.update_task(group_id, task_id, |t| {
            if t.status == TaskStatus::Checkout {
                t.status = TaskStatus::Success;
                t.status_message = "success".to_owned();
                t.completed_at = Some(Utc::now());
            }
        });

        let task = self
            .task(group_id, task_id)
            .with_context(|| format!("task disappeared: {group_id}/{task_id}"))?;
        tracing::info!(task_id, status = ?task.status, "task settled");
        Ok(TaskOutcome {
            task,
            result: Some(result),
            order: Some(order),
        })
    }

    /// Status-only: an in-flight resolution keeps running.
    pub fn stop_task(&self, group_id: &str, task_id: &str) -> anyhow::Result<()> {
        let updated = self.update_task(group_id, task_id, |t| {
            t.status = TaskStatus::Idle;
            t.status_message = "stopped".to_owned();
        });
        if !updated {
            anyhow::bail!("task not found: {group_id}/{task_id}");
        }
        tracing::info!(task_id, group_id, "task stopped");
        Ok(())
    }

    pub async fn start_all(&self, group_id: &str) -> anyhow::Result<Vec<TaskOutcome>> {
        let task_ids: Vec<String> = self
            .group(group_id)
            .with_context(|| format!("task group not found: {group_id}"))?
            .tasks
            .iter()
            .map(|t| t.id.clone())
            .collect();

        let mut outcomes = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            outcomes.push(self.start_task(group_id, &task_id).await?);
        }
        Ok(outcomes)
    }

    pub fn stop_all(&self, group_id: &str) -> anyhow::Result<usize> {
        let mut groups = self.lock_groups();
        let group = groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .with_context(|| format!("task group not found: {group_id}"))?;
        for task in &mut group.tasks {
            task.status = TaskStatus::Idle;
            task.status_message = "stopped".to_owned();
        }
        Ok(group.tasks.len())
    }

    /// Task-level profile first, then the first profile of the group's
    /// profile group.
    fn resolve_profile(
        &self,
        task: &CheckoutTask,
        settings: &TaskGroupSettings,
    ) -> Option<CheckoutProfile> {
        if let Some(profile_id) = task.profile_id.as_deref().filter(|id| !id.is_empty()) {
            let found = self
                .profile_groups
                .iter()
                .flat_map(|g| &g.profiles)
                .find(|p| p.id == profile_id);
            if let Some(profile) = found {
                return Some(profile.to_checkout_profile());
            }
            tracing::debug!(profile_id, "task profile not found; trying group profile");
        }

        let profile_group_id = settings.profile_group_id.as_deref()?;
        self.profile_groups
            .iter()
            .find(|g| g.id == profile_group_id)?
            .profiles
            .first()
            .map(Profile::to_checkout_profile)
    }

    fn mark_running(
        &self,
        group_id: &str,
        task_id: &str,
    ) -> anyhow::Result<(CheckoutTask, TaskGroup)> {
        let mut groups = self.lock_groups();
        let group = groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .with_context(|| format!("task group not found: {group_id}"))?;
        let task = group
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .with_context(|| format!("task not found: {group_id}/{task_id}"))?;

        task.status = TaskStatus::Running;
        task.status_message = "starting".to_owned();
        task.started_at = Some(Utc::now());
        task.completed_at = None;
        let task = task.clone();
        Ok((task, group.clone()))
    }

    fn finish_with_error(
        &self,
        group_id: &str,
        task_id: &str,
        message: String,
        result: Option<CheckoutResult>,
    ) -> TaskOutcome {
        tracing::warn!(task_id, group_id, error = %message, "task failed");
        let mut latest = None;
        self.update_task(group_id, task_id, |t| {
            if t.status == TaskStatus::Running {
                t.status = TaskStatus::Error;
                t.status_message = message;
                t.completed_at = Some(Utc::now());
            }
            latest = Some(t.clone());
        });
        TaskOutcome {
            task: latest.unwrap_or_else(|| placeholder_task(task_id)),
            result,
            order: None,
        }
    }

    fn update_task(
        &self,
        group_id: &str,
        task_id: &str,
        apply: impl FnOnce(&mut CheckoutTask),
    ) -> bool {
        let mut groups = self.lock_groups();
        let task = groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .and_then(|g| g.tasks.iter_mut().find(|t| t.id == task_id));
        match task {
            Some(task) => {
                apply(task);
                true
            }
            None => false,
        }
    }

    fn lock_groups(&self) -> std::sync::MutexGuard<'_, Vec<TaskGroup>> {
        self.groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn placeholder_task(task_id: &str) -> CheckoutTask {
    CheckoutTask {
        id: task_id.to_owned(),
        product_input: String::new(),
        input_mode: InputMode::Url,
        profile_id: None,
        proxy_id: None,
        account_id: None,
        size: TaskSize::default(),
        status: TaskStatus::Error,
        status_message: String::new(),
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::DiscordSettings;
    use crate::fetch::{ContentKind, Fetch};

    const PRODUCT: &str = r#"{"product":{"id":1,"title":"Air Classic","handle":"air","variants":[
        {"id":41,"title":"41","price":"119.00","available":true,"option1":"41"},
        {"id":42,"title":"42","price":"119.00","available":true,"option1":"42"}]}}"#;

    #[derive(Default)]
    struct ProductFetcher {
        calls: AtomicUsize,
        delay: Duration,
        body: Option<&'static str>,
    }

    #[async_trait]
    impl Fetch for ProductFetcher {
        async fn fetch(&self, _url: &str, _kind: ContentKind) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.body.unwrap_or(PRODUCT).to_owned())
        }
    }

    #[derive(Default)]
    struct RecordingOpener {
        opened: Mutex<Vec<String>>,
    }

    impl RecordingOpener {
        fn opened(&self) -> Vec<String> {
            self.opened
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone()
        }
    }

    impl LinkOpener for RecordingOpener {
        fn open(&self, url: &str) -> anyhow::Result<()> {
            self.opened
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(url.to_owned());
            Ok(())
        }
    }

    fn task(id: &str, mode: InputMode, profile_id: Option<&str>) -> CheckoutTask {
        CheckoutTask {
            id: id.to_owned(),
            product_input: "https://shop.example.it/products/air".to_owned(),
            input_mode: mode,
            profile_id: profile_id.map(str::to_owned),
            proxy_id: None,
            account_id: None,
            size: TaskSize {
                mode: SizeMode::Specific,
                specific: vec!["42".to_owned()],
                ..TaskSize::default()
            },
            status: TaskStatus::Idle,
            status_message: String::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn profile(id: &str, email: &str) -> Profile {
        Profile {
            id: id.to_owned(),
            name: id.to_owned(),
            email: email.to_owned(),
            phone: "+39 02 000".to_owned(),
            shipping: Address {
                first_name: "Ana".to_owned(),
                city: "Milano".to_owned(),
                ..Address::default()
            },
            billing_same_as_shipping: true,
            billing: None,
        }
    }

    struct Harness {
        orchestrator: Arc<TaskOrchestrator>,
        fetcher: Arc<ProductFetcher>,
        opener: Arc<RecordingOpener>,
    }

    fn harness(tasks: Vec<CheckoutTask>, settings: TaskGroupSettings) -> anyhow::Result<Harness> {
        harness_with(tasks, settings, ProductFetcher::default())
    }

    fn harness_with(
        tasks: Vec<CheckoutTask>,
        settings: TaskGroupSettings,
        fetcher: ProductFetcher,
    ) -> anyhow::Result<Harness> {
        let fetcher = Arc::new(fetcher);
        let opener = Arc::new(RecordingOpener::default());
        let notifier = Notifier::new(DiscordSettings {
            enabled: true,
            webhook_restock: None,
            webhook_checkout: None,
            webhook_decline: None,
        })?;
        let groups = vec![TaskGroup {
            id: "g1".to_owned(),
            name: "Drops".to_owned(),
            settings,
            tasks,
        }];
        let profile_groups = vec![
            ProfileGroup {
                id: "pg-main".to_owned(),
                name: "Main".to_owned(),
                profiles: vec![profile("p-first", "first@example.com")],
            },
            ProfileGroup {
                id: "pg-other".to_owned(),
                name: "Other".to_owned(),
                profiles: vec![profile("p-other", "other@example.com")],
            },
        ];
        let orchestrator = TaskOrchestrator::new(
            Arc::new(ShopifyResolver::new(fetcher.clone())),
            Arc::new(notifier),
            opener.clone(),
            groups,
            profile_groups,
        );
        Ok(Harness {
            orchestrator: Arc::new(orchestrator),
            fetcher,
            opener,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn url_task_reaches_success_and_records_order() -> anyhow::Result<()> {
        let h = harness(
            vec![task("t1", InputMode::Url, None)],
            TaskGroupSettings::default(),
        )?;

        let outcome = h.orchestrator.start_task("g1", "t1").await?;
        assert_eq!(outcome.task.status, TaskStatus::Success);
        assert!(outcome.task.started_at.is_some());
        assert!(outcome.task.completed_at.is_some());
        assert_eq!(h.opener.opened(), ["https://shop.example.it/cart/42:1"]);

        let orders = h.orchestrator.orders().snapshot();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Pending);
        assert_eq!(orders[0].size, "42");
        assert_eq!(orders[0].price, 119.0);
        assert_eq!(orders[0].store_name, "shop.example.it");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn price_filter_failure_is_error_without_order() -> anyhow::Result<()> {
        let settings = TaskGroupSettings {
            min_price: Some(200.0),
            ..TaskGroupSettings::default()
        };
        let h = harness(vec![task("t1", InputMode::Url, None)], settings)?;

        let outcome = h.orchestrator.start_task("g1", "t1").await?;
        assert_eq!(outcome.task.status, TaskStatus::Error);
        assert!(outcome.task.status_message.contains("below minimum"));
        assert!(h.orchestrator.orders().is_empty());
        assert!(h.opener.opened().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn non_url_modes_fail_without_fetching() -> anyhow::Result<()> {
        let h = harness(
            vec![
                task("kw", InputMode::Keyword, None),
                task("sku", InputMode::Sku, None),
                task("var", InputMode::Variant, None),
            ],
            TaskGroupSettings::default(),
        )?;

        let outcomes = h.orchestrator.start_all("g1").await?;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.task.status == TaskStatus::Error));
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn task_profile_takes_precedence_over_group_profile() -> anyhow::Result<()> {
        let settings = TaskGroupSettings {
            profile_group_id: Some("pg-main".to_owned()),
            ..TaskGroupSettings::default()
        };
        let h = harness(
            vec![
                task("own", InputMode::Url, Some("p-other")),
                task("group", InputMode::Url, None),
            ],
            settings,
        )?;

        h.orchestrator.start_all("g1").await?;
        let opened = h.opener.opened();
        assert!(opened[0].contains("checkout%5Bemail%5D=other%40example.com"));
        assert!(opened[1].contains("checkout%5Bemail%5D=first%40example.com"));
        assert!(opened[1].contains("checkout%5Bshipping_address%5D%5Bphone%5D=%2B39+02+000"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_settle_keeps_task_idle() -> anyhow::Result<()> {
        let h = harness(
            vec![task("t1", InputMode::Url, None)],
            TaskGroupSettings::default(),
        )?;

        let orchestrator = Arc::clone(&h.orchestrator);
        let run = tokio::spawn(async move { orchestrator.start_task("g1", "t1").await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            h.orchestrator.task("g1", "t1").map(|t| t.status),
            Some(TaskStatus::Checkout)
        );

        h.orchestrator.stop_task("g1", "t1")?;
        let outcome = run.await??;
        assert_eq!(outcome.task.status, TaskStatus::Idle);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_slow_resolution_is_not_overwritten() -> anyhow::Result<()> {
        let slow = || ProductFetcher {
            delay: Duration::from_secs(5),
            ..ProductFetcher::default()
        };
        let h = harness_with(
            vec![task("t1", InputMode::Url, None)],
            TaskGroupSettings::default(),
            slow(),
        )?;

        let orchestrator = Arc::clone(&h.orchestrator);
        let run = tokio::spawn(async move { orchestrator.start_task("g1", "t1").await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            h.orchestrator.task("g1", "t1").map(|t| t.status),
            Some(TaskStatus::Running)
        );

        h.orchestrator.stop_task("g1", "t1")?;
        let outcome = run.await??;
        assert_eq!(outcome.task.status, TaskStatus::Idle);
        assert!(outcome.order.is_none());
        assert!(h.opener.opened().is_empty());
        assert!(h.orchestrator.orders().is_empty());

        let failing = harness_with(
            vec![task("t2", InputMode::Url, None)],
            TaskGroupSettings::default(),
            ProductFetcher {
                body: Some(r#"{"product":{"id":1,"title":"Air","variants":[]}}"#),
                ..slow()
            },
        )?;
        let orchestrator = Arc::clone(&failing.orchestrator);
        let run = tokio::spawn(async move { orchestrator.start_task("g1", "t2").await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        failing.orchestrator.stop_task("g1", "t2")?;
        let outcome = run.await??;
        assert_eq!(outcome.task.status, TaskStatus::Idle);
        assert_eq!(outcome.task.status_message, "stopped");
        Ok(())
    }

    #[tokio::test]
    async fn stop_all_idles_every_task_and_unknown_ids_error() -> anyhow::Result<()> {
        let h = harness(
            vec![task("a", InputMode::Url, None), task("b", InputMode::Url, None)],
            TaskGroupSettings::default(),
        )?;
        assert_eq!(h.orchestrator.stop_all("g1")?, 2);
        assert!(h.orchestrator.stop_all("missing").is_err());
        assert!(h.orchestrator.stop_task("g1", "missing").is_err());
        assert!(h.orchestrator.start_task("g1", "missing").await.is_err());
        Ok(())
    }

    #[test]
    fn order_book_keeps_newest_five_hundred() {
        let book = OrderBook::default();
        for n in 0..510 {
            book.record(Order {
                id: format!("o-{n}"),
                task_id: "t".to_owned(),
                group_id: "g".to_owned(),
                product_name: "P".to_owned(),
                product_url: "https://shop.example/products/p".to_owned(),
                store_name: "shop.example".to_owned(),
                size: "42".to_owned(),
                price: 1.0,
                status: OrderStatus::Pending,
                created_at: Utc::now(),
            });
        }
        let orders = book.snapshot();
        assert_eq!(orders.len(), ORDER_BOOK_CAPACITY);
        assert_eq!(orders[0].id, "o-509");
    }

    #[test]
    fn task_yaml_defaults() -> anyhow::Result<()> {
        let group: TaskGroup = serde_yaml::from_str(
            r#"
id: g1
tasks:
  - id: t1
    product_input: https://shop.example/products/air
"#,
        )?;
        assert_eq!(group.settings.cart_quantity, 1);
        assert_eq!(group.tasks[0].input_mode, InputMode::Url);
        assert_eq!(group.tasks[0].status, TaskStatus::Idle);
        assert_eq!(group.tasks[0].size.to_policy(), SizePolicy::Random);
        Ok(())
    }
}
