use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use voltra_api::{InMemoryApi, RegistryApi};
use voltra_core::{EntityKind, EntityRecord};
use voltra_filter::{
    builtin_filters_for, record_path, AppliedFilter, FilterInput, FilterValue,
};
use voltra_loader::{default_page_size, PaginatedLoader};

#[derive(Parser, Debug)]
#[command(name = "voltractl", version, about = "Voltra console CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Fixture file seeding the in-memory registries (JSON array of
    /// records, each carrying a "kind" field)
    #[arg(long = "data", global = true)]
    data: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List one page of a collection, e.g. "certificate" or "demand"
    Ls {
        /// Collection key (producing-asset, consuming-asset, demand, supply, agreement, certificate)
        kind: String,
        /// Page number, starting at 1
        #[arg(long = "page", default_value_t = 1)]
        page: usize,
        /// Records per page (default from VOLTRA_PAGE_SIZE, else 25)
        #[arg(long = "page-size")]
        page_size: Option<usize>,
        /// Substring filter: path=text
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Multiselect filter: path=v1,v2
        #[arg(long = "select")]
        selects: Vec<String>,
        /// Range filter: path=min..max
        #[arg(long = "range")]
        ranges: Vec<String>,
        /// Year-month filter: path=YYYY-MM
        #[arg(long = "year-month")]
        year_months: Vec<String>,
    },
    /// Show the built-in filter definitions for a collection
    Filters { kind: String },
    /// Approve a requested certificate
    Approve { id: String },
    /// Offer an active certificate for sale
    Publish {
        id: String,
        /// Asking price in cents
        #[arg(long = "price")]
        price: u64,
    },
    /// Withdraw a sale offer
    Unpublish { id: String },
    /// Buy a certificate that is for sale
    Buy {
        id: String,
        /// Buyer account
        #[arg(long = "as")]
        buyer: String,
    },
}

fn init_tracing() {
    let env = std::env::var("VOLTRA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VOLTRA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid VOLTRA_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_fixture(path: &std::path::Path) -> Result<Vec<EntityRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(&text).context("fixture must be a JSON array")?;
    entries
        .into_iter()
        .map(|mut entry| {
            let kind: EntityKind = entry
                .get("kind")
                .and_then(|k| k.as_str())
                .context("fixture entry missing \"kind\"")?
                .parse()?;
            if let Some(obj) = entry.as_object_mut() {
                obj.remove("kind");
            }
            EntityRecord::from_raw(kind, entry)
        })
        .collect()
}

fn split_kv(arg: &str) -> Result<(&str, &str)> {
    arg.split_once('=')
        .with_context(|| format!("expected path=value, got {arg:?}"))
}

fn build_filters(
    filters: &[String],
    selects: &[String],
    ranges: &[String],
    year_months: &[String],
) -> Result<Vec<AppliedFilter>> {
    let mut out = Vec::new();
    for arg in filters {
        let (path, text) = split_kv(arg)?;
        out.push(AppliedFilter {
            property: record_path(path),
            input: FilterInput::Text,
            selected: Some(FilterValue::Text(text.to_string())),
        });
    }
    for arg in selects {
        let (path, values) = split_kv(arg)?;
        let chosen: Vec<serde_json::Value> = values
            .split(',')
            .filter(|v| !v.is_empty())
            .map(|v| serde_json::Value::String(v.to_string()))
            .collect();
        out.push(AppliedFilter {
            property: record_path(path),
            input: FilterInput::Multiselect { options: vec![] },
            selected: Some(FilterValue::Many(chosen)),
        });
    }
    for arg in ranges {
        let (path, bounds) = split_kv(arg)?;
        let (min, max) = bounds
            .split_once("..")
            .with_context(|| format!("expected min..max, got {bounds:?}"))?;
        let min: f64 = min.parse().with_context(|| format!("range min {min:?}"))?;
        let max: f64 = max.parse().with_context(|| format!("range max {max:?}"))?;
        out.push(AppliedFilter {
            property: record_path(path),
            input: FilterInput::Range { min, max },
            selected: Some(FilterValue::Range(min, max)),
        });
    }
    for arg in year_months {
        let (path, ym) = split_kv(arg)?;
        let (year, month) = ym
            .split_once('-')
            .with_context(|| format!("expected YYYY-MM, got {ym:?}"))?;
        let year: i32 = year.parse().with_context(|| format!("year {year:?}"))?;
        let month: u32 = month.parse().with_context(|| format!("month {month:?}"))?;
        anyhow::ensure!((1..=12).contains(&month), "month out of range: {month}");
        out.push(AppliedFilter {
            property: record_path(path),
            input: FilterInput::YearMonth,
            selected: Some(FilterValue::YearMonth { year, month0: month - 1 }),
        });
    }
    Ok(out)
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }
    let line = |cells: Vec<&str>| {
        let mut out = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                out.push_str("  ");
            }
            out.push_str(&format!("{:<width$}", cell, width = widths.get(i).copied().unwrap_or(0)));
        }
        println!("{}", out.trim_end());
    };
    line(headers.to_vec());
    for row in rows {
        line(row.iter().map(|c| c.as_str()).collect());
    }
}

async fn setup_api(data: Option<&std::path::Path>) -> Result<InMemoryApi> {
    let api = InMemoryApi::new();
    if let Some(path) = data {
        let records = load_fixture(path)?;
        info!(count = records.len(), file = %path.display(), "seeding registries from fixture");
        api.seed(records).await?;
    }
    Ok(api)
}

fn print_record(output: Output, rec: &EntityRecord, verb: &str) -> Result<()> {
    match output {
        Output::Human => {
            let status = rec.raw.get("status").and_then(|v| v.as_str()).unwrap_or("-");
            println!("{} {} {verb} (status: {status})", rec.kind, rec.id);
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(rec)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ls { kind, page, page_size, filters, selects, ranges, year_months } => {
            let kind: EntityKind = kind.parse()?;
            let applied = build_filters(&filters, &selects, &ranges, &year_months)?;
            info!(kind = %kind, page, filters = applied.len(), "ls invoked");

            let api = setup_api(cli.data.as_deref()).await?;
            let source = api.source(kind);
            let page_size = page_size.unwrap_or_else(default_page_size).max(1);
            let loader = PaginatedLoader::with_page_size(source.clone(), page_size);
            loader.load_page(page, Some(applied)).await?;

            let state = loader.state();
            match cli.output {
                Output::Human => {
                    let headers: Vec<&str> = source.columns().iter().map(|c| c.label).collect();
                    print_table(&headers, &state.rows);
                    let pages = (state.total + page_size - 1) / page_size;
                    println!("page {} of {} • {} records", state.page, pages.max(1), state.total);
                }
                Output::Json => {
                    let out = serde_json::json!({
                        "page": state.page,
                        "pageSize": state.page_size,
                        "total": state.total,
                        "records": state.records,
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
            loader.teardown();
        }
        Commands::Filters { kind } => {
            let kind: EntityKind = kind.parse()?;
            let defs = builtin_filters_for(kind);
            match cli.output {
                Output::Human => {
                    for d in &defs {
                        let input = match &d.input {
                            FilterInput::Text => "text".to_string(),
                            FilterInput::Multiselect { options } => {
                                format!("multiselect ({} options)", options.len())
                            }
                            FilterInput::Dropdown { options } => {
                                format!("dropdown ({} options)", options.len())
                            }
                            FilterInput::Range { min, max } => format!("range [{min}, {max}]"),
                            FilterInput::YearMonth => "year-month".to_string(),
                        };
                        println!("{} • {} • {}", d.label, input, d.property);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&defs)?),
            }
        }
        Commands::Approve { id } => {
            let api = setup_api(cli.data.as_deref()).await?;
            match api.approve_certificate(&id).await {
                Ok(rec) => print_record(cli.output, &rec, "approved")?,
                Err(e) => {
                    error!(error = %e, id = %id, "approve failed");
                    eprintln!("approve error: {e}");
                }
            }
        }
        Commands::Publish { id, price } => {
            let api = setup_api(cli.data.as_deref()).await?;
            match api.publish_for_sale(&id, price).await {
                Ok(rec) => print_record(cli.output, &rec, "published for sale")?,
                Err(e) => {
                    error!(error = %e, id = %id, "publish failed");
                    eprintln!("publish error: {e}");
                }
            }
        }
        Commands::Unpublish { id } => {
            let api = setup_api(cli.data.as_deref()).await?;
            match api.unpublish_for_sale(&id).await {
                Ok(rec) => print_record(cli.output, &rec, "offer withdrawn")?,
                Err(e) => {
                    error!(error = %e, id = %id, "unpublish failed");
                    eprintln!("unpublish error: {e}");
                }
            }
        }
        Commands::Buy { id, buyer } => {
            let api = setup_api(cli.data.as_deref()).await?;
            match api.buy_certificate(&id, &buyer).await {
                Ok(rec) => print_record(cli.output, &rec, "bought")?,
                Err(e) => {
                    error!(error = %e, id = %id, "buy failed");
                    eprintln!("buy error: {e}");
                }
            }
        }
    }

    Ok(())
}
