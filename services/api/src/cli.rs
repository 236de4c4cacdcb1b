use crate::infra::{file_store, rule_engine, LookupRequest, LOOKUP_FAILED};
use crate::server;
use chrono::{NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use returns_portal::config::{AppConfig, ReturnsConfig};
use returns_portal::error::AppError;
use returns_portal::returns::normalizer::parse_timestamp;
use returns_portal::returns::{derive_rows, EligibilityRow, Order, RuleSet};
use returns_portal::telemetry;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "returns-portal",
    about = "Serve the self-service returns portal or inspect return eligibility from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Look up an order and print the eligibility of every line item
    Check(CheckArgs),
    /// Print the active eligibility rules in evaluation order
    Rules(RulesArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug)]
pub(crate) struct CheckArgs {
    /// Order number as printed on the confirmation
    #[arg(long)]
    pub(crate) order_number: String,
    /// Email address or postal code the order was placed with
    #[arg(long)]
    pub(crate) identifier: String,
    /// Order fixture to read instead of the configured one
    #[arg(long)]
    pub(crate) orders: Option<PathBuf>,
    /// Rule file to use instead of the configured one
    #[arg(long)]
    pub(crate) rules: Option<PathBuf>,
    /// Evaluation instant (RFC 3339). Defaults to now.
    #[arg(long, value_parser = parse_now)]
    pub(crate) now: Option<NaiveDateTime>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct RulesArgs {
    /// Rule file to print instead of the configured one
    #[arg(long)]
    pub(crate) rules: Option<PathBuf>,
}

fn parse_now(raw: &str) -> Result<NaiveDateTime, String> {
    parse_timestamp(raw).ok_or_else(|| format!("failed to parse '{raw}' as an RFC 3339 timestamp"))
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Check(args) => run_check(args),
        Command::Rules(args) => run_rules(args),
    }
}

fn cli_config() -> Result<ReturnsConfig, AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    Ok(config.returns)
}

fn run_check(args: CheckArgs) -> Result<(), AppError> {
    let config = cli_config()?;
    print!("{}", check(args, config)?);
    Ok(())
}

/// Renders the eligibility table for one order. Invalid input and failed
/// lookups are errors, so the process exits non-zero.
fn check(args: CheckArgs, mut config: ReturnsConfig) -> Result<String, AppError> {
    if let Some(orders) = args.orders {
        config.orders_path = orders;
    }
    if let Some(rules) = args.rules {
        config.rules_path = Some(rules);
    }

    let request = LookupRequest {
        order_number: args.order_number,
        identifier: args.identifier,
    };
    let query = request.validate().map_err(|errors| {
        let detail = errors
            .iter()
            .map(|error| format!("{}: {}", error.field, error.message))
            .collect::<Vec<_>>()
            .join("; ");
        AppError::Lookup(detail)
    })?;

    let store = file_store(&config);
    let order = store
        .find(&query.order_number, &query.identifier)?
        .ok_or_else(|| AppError::Lookup(LOOKUP_FAILED.to_string()))?;

    let engine = rule_engine(&config)?;
    let now = args.now.unwrap_or_else(|| Utc::now().naive_utc());
    let rows = derive_rows(&order, engine.evaluate_at(&order, now));
    Ok(render_check(&order, &rows, now))
}

fn render_check(order: &Order, rows: &[EligibilityRow], now: NaiveDateTime) -> String {
    let mut lines = vec![
        format!("Order {}", order.order_number),
        format!("  Recipient : {}", order.recipient),
        format!("  Address   : {}, {} {}", order.street, order.zip, order.city),
        format!("  Purchased : {}", order.purchased_at),
        format!("  Delivered : {}", order.delivered_at),
        format!("  Window    : {} days (evaluated at {now})", order.return_window_days),
        String::new(),
        format!(
            "{:<18} {:<16} {:>4} {:<14} {:<16} {}",
            "SKU", "Verdict", "Left", "Options", "Flag", "Reason"
        ),
    ];

    for row in rows {
        let options = row
            .quantity_options
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let verdict = if row.selectable {
            "selectable".to_string()
        } else {
            row.result.returnable.label().to_string()
        };
        lines.push(format!(
            "{:<18} {:<16} {:>4} {:<14} {:<16} {}",
            row.item.sku,
            verdict,
            row.remaining_qty,
            if options.is_empty() { "-".to_string() } else { options },
            row.result.flag,
            row.result.reason
        ));
    }

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

fn run_rules(args: RulesArgs) -> Result<(), AppError> {
    let mut config = cli_config()?;
    if let Some(rules) = args.rules {
        config.rules_path = Some(rules);
    }

    let engine = rule_engine(&config)?;
    print!("{}", render_rules(engine.rules()));
    Ok(())
}

fn render_rules(rules: &RuleSet) -> String {
    let mut output = String::new();
    for rule in rules.iter() {
        let when = serde_json::to_string(&rule.when).unwrap_or_else(|_| "?".to_string());
        output.push_str(&format!(
            "{:>5}  {:<16} returnable={:<5} flag={:<16} when={}\n",
            rule.priority, rule.id, rule.result.returnable, rule.result.flag, when
        ));
    }
    output
}
