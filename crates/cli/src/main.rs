use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, info_span, Instrument, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use esguard_aws::AwsCliSource;
use esguard_core::{CheckConfig, CheckResult, DomainInspector, Region, Summary};
use esguard_policy::PolicyEvaluator;

#[derive(Parser, Debug)]
#[command(author, version, about="esguard — flag Elasticsearch domains with open access policies")]
struct Cli {
    /// Check config (YAML); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value_t=Format::Json, global = true)]
    format: Format,

    /// Debug logging
    #[arg(short, long, default_value_t=false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum Format { Json, Text }

#[derive(Subcommand, Debug)] enum Cmd {
    /// Scan every domain in the given regions (all enabled regions by default)
    Scan {
        #[arg(long = "region")] regions: Vec<Region>,
        #[arg(long)] profile: Option<String>,
        /// Exit non-zero when any domain has an open access policy
        #[arg(long, default_value_t=false)] fail_on_open: bool,
    },
    /// Evaluate one raw access policy read from a file, or stdin with `-`
    Evaluate {
        #[arg(default_value = "-")] policy: PathBuf,
    },
}

fn read_policy(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut s = String::new();
        std::io::stdin().read_to_string(&mut s).context("read policy from stdin")?;
        Ok(s)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("read policy {}", path.display()))
    }
}

/// Regions to scan: the requested ones without repeats, or every enabled region.
fn scan_regions(requested: Vec<Region>, config: &CheckConfig) -> Vec<Region> {
    if requested.is_empty() { return config.valid_regions.clone(); }
    requested.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Exit decision after a scan has been reported.
fn scan_exit(summary: &Summary, regions: usize, failed_regions: usize, fail_on_open: bool) -> Result<()> {
    if regions > 0 && failed_regions == regions {
        anyhow::bail!("every requested region failed to scan");
    }
    if fail_on_open && summary.fail > 0 {
        anyhow::bail!("{} domain(s) have an open access policy", summary.fail);
    }
    Ok(())
}

fn write_results(out: &mut impl Write, format: Format, config: &CheckConfig, results: &[CheckResult], summary: &Summary) -> Result<()> {
    match format {
        Format::Json => {
            for r in results { writeln!(out, "{}", serde_json::to_string(r)?)?; }
        }
        Format::Text => {
            writeln!(out, "{} [{}]", config.name, config.severity)?;
            for r in results {
                writeln!(out, "{:<5}  {:<14}  {:<28}  {}", r.status, r.region, r.resource_id, r.message)?;
            }
            writeln!(out, "{} passed, {} failed, {} errored", summary.pass, summary.fail, summary.error)?;
            if summary.fail > 0 { writeln!(out, "Resolution: {}", config.resolution)?; }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .json()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(p) => CheckConfig::from_file(p)?,
        None => CheckConfig::default(),
    };

    match cli.cmd {
        Cmd::Scan { regions, profile, fail_on_open } => {
            let source = AwsCliSource::new(profile)?;
            let regions = scan_regions(regions, &config);
            let inspector = DomainInspector::new(config);

            let mut results = Vec::new();
            let mut failed_regions = 0;
            for region in &regions {
                let span = info_span!("scan_region", %region);
                match inspector.inspect_region(&source, region).instrument(span).await {
                    Ok(r) => results.extend(r),
                    Err(e) => { error!(%region, error = %e, "region scan failed"); failed_regions += 1; }
                }
            }

            let summary = Summary::of(&results);
            write_results(&mut std::io::stdout().lock(), cli.format, inspector.config(), &results, &summary)?;
            info!(pass = summary.pass, fail = summary.fail, error = summary.error, failed_regions, "scan finished");

            scan_exit(&summary, regions.len(), failed_regions, fail_on_open)?;
        },
        Cmd::Evaluate { policy } => {
            let raw = read_policy(&policy)?;
            let verdict = PolicyEvaluator::new().evaluate(Some(raw.trim()))
                .with_context(|| format!("evaluate {}", policy.display()))?;
            match cli.format {
                Format::Json => println!("{}", json!({
                    "policy_present": verdict.policy_present,
                    "open_statement_count": verdict.open_statement_count,
                    "classification": verdict.classification(),
                })),
                Format::Text => println!("{} ({} open statement(s))", verdict.classification(), verdict.open_statement_count),
            }
        },
    }
    Ok(())
}
