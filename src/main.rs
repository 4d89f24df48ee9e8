use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map};

use netscore::config::{LogFormat, LoggingConfig, ScorerConfig};
use netscore::errorlog::ErrorLog;
use netscore::export::{self, ExportFormat, LabelFilter, RowFilter};
use netscore::feedback::FeedbackStore;

#[derive(Parser)]
#[command(
    name = "netscore",
    about = "Isolation-forest anomaly scoring for network monitoring logs",
    version,
    long_about = None
)]
struct Cli {
    /// TOML config file (falls back to $NETSCORE_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Label every row of a log file as inlier (1) or outlier (-1)
    Score {
        /// Input log file
        #[arg(long)]
        input: Option<PathBuf>,

        /// Result table path (replaced atomically)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Expected fraction of outliers, in (0, 1)
        #[arg(long)]
        contamination: Option<f64>,

        /// RNG seed for reproducible labels
        #[arg(long)]
        seed: Option<u64>,

        /// Number of isolation trees
        #[arg(long)]
        trees: Option<usize>,

        /// Rows sampled per tree
        #[arg(long)]
        max_samples: Option<usize>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Export a result table as JSON records or filtered CSV
    Export {
        /// Result table to read (defaults to the configured output path)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Destination file
        #[arg(long)]
        output: PathBuf,

        /// json or csv
        #[arg(long, default_value = "json")]
        format: ExportFormat,

        /// all, outliers or inliers
        #[arg(long, default_value = "all")]
        filter: LabelFilter,

        /// Keep only these severities (comma-separated); needs a `severity` column
        #[arg(long, value_delimiter = ',')]
        severity: Vec<String>,

        /// Keep rows at or after this time (YYYY-MM-DD or ISO-8601); needs a `timestamp` column
        #[arg(long, value_parser = export::parse_since)]
        since: Option<chrono::NaiveDateTime>,

        /// Keep rows at or before this time; a bare date covers the whole day
        #[arg(long, value_parser = export::parse_until)]
        until: Option<chrono::NaiveDateTime>,
    },

    /// Record or review analyst feedback
    Feedback {
        #[command(subcommand)]
        action: FeedbackAction,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum FeedbackAction {
    /// Add a feedback entry
    Add {
        /// Feedback text
        text: String,

        /// Page or view the feedback refers to
        #[arg(long, default_value = "cli")]
        page: String,

        /// Rating from 1 to 5
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        rating: Option<u8>,

        /// Submitter name
        #[arg(long)]
        name: Option<String>,
    },

    /// Show recent feedback, newest first
    List {
        /// Number of entries
        #[arg(long, default_value = "5")]
        limit: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ScorerConfig::load_or_default(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging);

    let context = command_name(&cli.command);
    let error_log = ErrorLog::new(&config.logging.error_log_path);

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let msg = format!("{:#}", e);
            tracing::error!(command = context, error = %msg, "command failed");
            if let Err(log_err) = error_log.record(context, &e) {
                tracing::warn!(error = %log_err, "could not write error log");
            }
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn command_name(cmd: &Commands) -> &'static str {
    match cmd {
        Commands::Score { .. } => "score",
        Commands::Export { .. } => "export",
        Commands::Feedback { .. } => "feedback",
        Commands::Config => "config",
    }
}

fn run(command: Commands, mut config: ScorerConfig) -> Result<()> {
    match command {
        Commands::Score {
            input,
            output,
            contamination,
            seed,
            trees,
            max_samples,
            json,
        } => {
            if let Some(p) = input {
                config.input_path = p;
            }
            if let Some(p) = output {
                config.output_path = p;
            }
            if let Some(c) = contamination {
                config.contamination = c;
            }
            if seed.is_some() {
                config.seed = seed;
            }
            if let Some(n) = trees {
                config.forest.n_trees = n;
            }
            if let Some(n) = max_samples {
                config.forest.max_samples = n;
            }

            let report = netscore::detect_anomalies(&config).with_context(|| {
                format!("scoring {} failed", config.input_path.display())
            })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let share = if report.rows > 0 {
                    100.0 * report.outliers as f64 / report.rows as f64
                } else {
                    0.0
                };
                println!("\n=== netscore anomaly scoring ===");
                println!("Run:        {}", report.run_id);
                println!("Input:      {}", report.input_path.display());
                println!("Output:     {}", report.output_path.display());
                println!("Features:   {}", report.feature_columns.join(", "));
                println!("Rows:       {}", report.rows);
                println!("Outliers:   {} ({:.2}%)", report.outliers, share);
                println!("Threshold:  {:.4}", report.threshold);
                let rows = report.outlier_rows();
                if !rows.is_empty() {
                    let shown: Vec<String> = rows.iter().take(20).map(|r| r.to_string()).collect();
                    let more = if rows.len() > 20 { ", ..." } else { "" };
                    println!("Outlier rows (0-based): {}{}", shown.join(", "), more);
                }
                println!("================================\n");
            }
        }
        Commands::Export {
            input,
            output,
            format,
            filter,
            severity,
            since,
            until,
        } => {
            let source = input.unwrap_or_else(|| config.output_path.clone());
            let rows = RowFilter {
                label: filter,
                severity,
                since,
                until,
            };
            let delimiter = config
                .delimiter_byte()
                .context("configured delimiter is not a single ASCII byte")?;
            let n = export::export(&source, &output, format, &rows, delimiter)
                .with_context(|| format!("exporting {} failed", source.display()))?;
            println!("Exported {} {} row(s) to {}", n, filter, output.display());
        }
        Commands::Feedback { action } => {
            let store = FeedbackStore::new(&config.feedback.path);
            match action {
                FeedbackAction::Add {
                    text,
                    page,
                    rating,
                    name,
                } => {
                    let mut meta = Map::new();
                    if let Some(r) = rating {
                        meta.insert("rating".into(), json!(r));
                    }
                    if let Some(n) = name {
                        meta.insert("name".into(), json!(n));
                    }
                    store.save(&page, &text, Some(meta))?;
                    println!("Thank you for your feedback!");
                }
                FeedbackAction::List { limit, json } => {
                    let entries = store.recent(limit)?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    } else if entries.is_empty() {
                        println!("No feedback recorded.");
                    } else {
                        println!("{:<25} | {:<10} | {:<6} | Feedback", "Timestamp", "Page", "Rating");
                        println!("{:-<25}-|-{:-<10}-|-{:-<6}-|-{:-<40}", "", "", "", "");
                        for e in entries {
                            let rating = e
                                .metadata
                                .as_ref()
                                .and_then(|m| m.get("rating"))
                                .map(|r| r.to_string())
                                .unwrap_or_else(|| "-".to_string());
                            println!(
                                "{:<25} | {:<10} | {:<6} | {}",
                                e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                                e.page,
                                rating,
                                e.feedback
                            );
                        }
                    }
                }
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
