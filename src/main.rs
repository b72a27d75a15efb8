use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use netinsight::config::{Config, LoggingConfig};
use netinsight::detect::{AnomalyDetector, DetectError, ModelKind, ModelSource};
use netinsight::telemetry::{JsonlSource, Record, RecordSource};

#[derive(Parser)]
#[command(
    name = "netinsight",
    about = "Anomaly detection and batch analytics for network device telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to $NETINSIGHT_CONFIG, then /etc/netinsight/netinsight.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite record store, overriding the configured path
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load JSON-lines records into the record store
    Import {
        /// Newline-delimited JSON file of records
        #[arg(long)]
        file: PathBuf,
    },

    /// Fit a model on recent records and flag anomalies
    Detect {
        /// Read records from a JSON-lines file instead of the database
        #[arg(long)]
        input: Option<PathBuf>,

        /// Number of records to analyze
        #[arg(long)]
        limit: Option<usize>,

        /// Model: isolation_forest, one_class_svm or dbscan
        #[arg(long)]
        model: Option<String>,

        /// Persist the fitted model for single-record prediction
        #[arg(long)]
        save_model: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Classify one set of metrics in real time
    Predict {
        /// Latency in ms
        #[arg(long)]
        latency: f64,
        /// Jitter in ms
        #[arg(long)]
        jitter: f64,
        /// Packet loss as a fraction (0.05 = 5%)
        #[arg(long)]
        packet_loss: f64,
        /// CPU utilization percentage
        #[arg(long)]
        cpu: f64,
        /// Memory utilization percentage
        #[arg(long)]
        memory: f64,
        /// TCP retransmission count
        #[arg(long)]
        retransmissions: u32,
        /// Connected clients
        #[arg(long)]
        clients: u32,
        /// Throughput in Mbps
        #[arg(long)]
        throughput: f64,

        /// Model used when no saved bundle is available
        #[arg(long)]
        model: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Device performance, hourly traffic, problem devices and security events
    Aggregate {
        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Dashboard summary statistics
    Summary {
        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// List the features the detectors analyze
    Features,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    init_tracing(&config.logging);

    let limit_or_default = |limit: Option<usize>| limit.unwrap_or(config.detector.fetch_limit);

    match cli.command {
        Commands::Import { file } => {
            let records = JsonlSource::new(&file).fetch(usize::MAX)?;
            let pool = netinsight::storage::open_pool(&config.storage.db_path)?;
            let inserted = netinsight::storage::save_records(&pool, &records)?;
            tracing::info!(inserted, file = %file.display(), "Imported records");
            println!("Imported {} records into {}", inserted, config.storage.db_path);
        }
        Commands::Detect {
            input,
            limit,
            model,
            save_model,
            json,
        } => {
            let kind: ModelKind = model
                .as_deref()
                .unwrap_or(&config.detector.model)
                .parse()?;
            let source = netinsight::open_source(input.as_deref(), &config.storage.db_path)?;
            let batch = source.fetch(limit_or_default(limit))?;

            let mut detector = AnomalyDetector::new(kind, &config.detector);
            let detection = match detector.detect(&batch) {
                Ok(d) => d,
                Err(DetectError::InsufficientData { needed, have }) => {
                    println!(
                        "Insufficient data: {} records available, at least {} needed. No records flagged.",
                        have, needed
                    );
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if save_model {
                if let Some(bundle) = detector.bundle() {
                    bundle
                        .save(&config.detector.bundle_path)
                        .context("Failed to save model bundle")?;
                }
            }

            if json {
                print_json(&detection)?;
            } else {
                let stats = &detection.stats;
                println!("\n=== netinsight Detection Report ===");
                println!("Model:      {}", stats.model_type);
                println!("Records:    {}", stats.total_records);
                println!(
                    "Anomalies:  {} ({:.2}%)",
                    stats.total_anomalies, stats.anomaly_percentage
                );
                if !stats.anomalies_by_device_type.is_empty() {
                    println!("\nBy device type:");
                    for (device_type, count) in &stats.anomalies_by_device_type {
                        println!(" - {:<20} {}", device_type, count);
                    }
                }
                if !stats.top_anomalous_devices.is_empty() {
                    println!("\nTop anomalous devices:");
                    for d in &stats.top_anomalous_devices {
                        println!(" - {:<20} {:.3}", d.device_id, d.mean_score);
                    }
                }
                for e in &stats.top_anomaly_explanations {
                    println!("\n{} (score {:.3})", e.device_id, e.anomaly_score);
                    for reason in e.messages() {
                        println!("   {}", reason);
                    }
                    for rec in &e.recommendations {
                        println!("   -> Recommendation: {}", rec);
                    }
                }
                println!("===================================\n");
            }
        }
        Commands::Predict {
            latency,
            jitter,
            packet_loss,
            cpu,
            memory,
            retransmissions,
            clients,
            throughput,
            model,
            json,
        } => {
            let kind: ModelKind = model
                .as_deref()
                .unwrap_or(&config.detector.model)
                .parse()?;
            let record = Record {
                latency_ms: Some(latency),
                jitter_ms: Some(jitter),
                packet_loss: Some(packet_loss),
                cpu_utilization: Some(cpu),
                memory_utilization: Some(memory),
                tcp_retransmissions: Some(retransmissions),
                client_count: Some(clients),
                throughput_mbps: Some(throughput),
                ..Default::default()
            };

            let detector = AnomalyDetector::new(kind, &config.detector);
            let prediction = detector.predict_one(&record)?;

            if json {
                print_json(&prediction)?;
            } else {
                println!("\n=== netinsight Prediction ===");
                println!("Anomaly:    {}", prediction.result.is_anomaly);
                println!("Score:      {:.3}", prediction.result.anomaly_score);
                println!("Confidence: {:.3}", prediction.confidence);
                println!("Model:      {}", prediction.model_type);
                match &prediction.model_source {
                    ModelSource::Persisted {
                        path, trained_at, ..
                    } => println!("Source:     {} (trained {})", path.display(), trained_at),
                    ModelSource::AdHoc => {
                        println!("Source:     ad hoc fit on this record (uncalibrated)")
                    }
                }
                println!("\nReasons:");
                for reason in prediction.explanation.messages() {
                    println!(" - {}", reason);
                }
                for rec in &prediction.explanation.recommendations {
                    println!("   -> Recommendation: {}", rec);
                }
                println!();
            }
        }
        Commands::Aggregate { input, limit, json } => {
            let source = netinsight::open_source(input.as_deref(), &config.storage.db_path)?;
            let batch = source.fetch(limit_or_default(limit))?;
            let report = netinsight::analysis::aggregate(&batch, &config.analysis);

            if json {
                print_json(&report)?;
            } else {
                let meta = &report.metadata;
                println!(
                    "\nAnalyzed {} records from {} devices",
                    meta.records_analyzed, meta.total_devices
                );
                if let Some(range) = &meta.time_range {
                    println!("Time range: {} .. {}", range.min, range.max);
                }

                println!("\n{:<16} | {:<12} | {:<12} | {:>6} | {:>9} | {:>8}", "Device", "Type", "Location", "Events", "Latency", "Success");
                println!("{:-<16}-|-{:-<12}-|-{:-<12}-|-{:-<6}-|-{:-<9}-|-{:-<8}", "", "", "", "", "", "");
                for d in &report.device_performance {
                    println!(
                        "{:<16} | {:<12} | {:<12} | {:>6} | {:>9} | {:>7.1}%",
                        d.device_id,
                        d.device_type,
                        d.location,
                        d.event_count,
                        fmt_opt(d.avg_latency_ms),
                        d.success_rate
                    );
                }

                println!("\nHourly traffic:");
                for h in &report.hourly_traffic {
                    println!(
                        " {:02}:00 {:<12} events={:<6} latency={:<8} sent={} recv={}",
                        h.hour,
                        h.device_type,
                        h.event_count,
                        fmt_opt(h.avg_latency_ms),
                        h.total_bytes_sent,
                        h.total_bytes_received
                    );
                }

                println!(
                    "\nIssues: {} (latency {}, cpu {}, packet loss {}, retransmissions {})",
                    meta.total_issues,
                    meta.high_latency_count,
                    meta.high_cpu_count,
                    meta.high_packet_loss_count,
                    meta.high_retransmissions_count
                );
                for d in &report.problematic_devices {
                    println!(" - {:<16} {:<12} {}", d.device_id, d.device_type, d.issue_count);
                }

                if report.security_summary.is_empty() {
                    println!("\nNo security events.");
                } else {
                    println!("\nSecurity events:");
                    for s in &report.security_summary {
                        println!(
                            " - {:<20} {:<12} count={} avg_score={}",
                            s.event_type,
                            s.device_type,
                            s.count,
                            fmt_opt(s.avg_anomaly_score)
                        );
                    }
                }
                println!();
            }
        }
        Commands::Summary { input, limit, json } => {
            let source = netinsight::open_source(input.as_deref(), &config.storage.db_path)?;
            let batch = source.fetch(limit_or_default(limit))?;
            let summary = netinsight::analysis::summarize(&batch, &config.analysis);

            if json {
                print_json(&summary)?;
            } else {
                println!("\nTotal logs:   {}", summary.total_logs);
                println!("Success rate: {:.2}%", summary.success_rate);
                println!(
                    "Anomalies:    {} ({:.2}%)",
                    summary.anomaly_count, summary.anomaly_percentage
                );
                println!("\nDevice types:");
                for (device_type, count) in &summary.device_distribution {
                    let Some(latency) = summary.latency_by_device_type.get(device_type) else {
                        continue;
                    };
                    println!(
                        " - {:<12} {:>6} logs, latency avg {} max {} min {}",
                        device_type,
                        count,
                        fmt_opt(latency.avg),
                        fmt_opt(latency.max),
                        fmt_opt(latency.min)
                    );
                }
                println!("\nDevice health:");
                for d in &summary.device_health {
                    println!(
                        " - {:<16} {:<12} {:<8} max score {}",
                        d.device_id,
                        d.device_type,
                        d.status,
                        fmt_opt(d.max_anomaly_score)
                    );
                }
                println!();
            }
        }
        Commands::Features => {
            for f in &config.detector.features {
                println!("{:<26} {}", f.name(), f.description());
            }
        }
    }

    Ok(())
}
