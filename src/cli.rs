use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract a stock snapshot from a saved page.
    Extract(ExtractArgs),
    /// Fetch one page and print its stock snapshot.
    Check(CheckArgs),
    /// Poll configured targets until Ctrl-C.
    Monitor(MonitorArgs),
    /// Resolve a Shopify variant and print a checkout link.
    Resolve(ResolveArgs),
    /// Run checkout tasks from a task group.
    Task(TaskArgs),
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Saved HTML document.
    #[arg(long)]
    pub html: String,

    /// URL the page was served from (used to infer the currency).
    #[arg(long)]
    pub url: String,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Product page URL.
    #[arg(long)]
    pub url: String,

    /// Pass-through proxy base, tried in order (repeatable).
    #[arg(long)]
    pub proxy: Vec<String>,

    /// Config file supplying proxies and the fetch timeout.
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Config file (YAML).
    #[arg(long)]
    pub config: String,

    /// Start every target, not only those marked `running`.
    #[arg(long, default_value_t = false)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Shopify product URL (`.../products/{handle}`).
    #[arg(long)]
    pub url: String,

    /// Preferred size, tried in order (repeatable).
    #[arg(long)]
    pub size: Vec<String>,

    /// Lower bound of a numeric size range.
    #[arg(long, requires = "range_max", conflicts_with = "size")]
    pub range_min: Option<String>,

    /// Upper bound of a numeric size range.
    #[arg(long, requires = "range_min", conflicts_with = "size")]
    pub range_max: Option<String>,

    /// Reject products listed below this price.
    #[arg(long)]
    pub min_price: Option<f64>,

    /// Reject products listed above this price.
    #[arg(long)]
    pub max_price: Option<f64>,

    /// Cart quantity.
    #[arg(long, default_value_t = 1)]
    pub quantity: u32,

    /// Pass-through proxy base, tried in order (repeatable).
    #[arg(long)]
    pub proxy: Vec<String>,
}

#[derive(Debug, Args)]
pub struct TaskArgs {
    /// Config file (YAML).
    #[arg(long)]
    pub config: String,

    /// Task group id.
    #[arg(long)]
    pub group: String,

    /// Task id; every task of the group when omitted.
    #[arg(long)]
    pub task: Option<String>,

    /// Log checkout links instead of opening them.
    #[arg(long, default_value_t = false)]
    pub no_open: bool,
}
