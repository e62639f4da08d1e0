use anyhow::{bail, Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::{Parser, Subcommand};
use colored::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

use readyrs::config::AppConfig;
use readyrs::cycle::CyclePhase;
use readyrs::engine::{AnalyticsEngine, AthleteReport};
use readyrs::error::{ErrorSeverity, ReadyError, StoreError};
use readyrs::import::{ImportManager, RecordValidator};
use readyrs::logging::init_logging;
use readyrs::models::{Alert, AlertCategory, AlertSeverity, AthleteProfile, Gender, MetricType};
use readyrs::readiness::{ReadinessLevel, ReadinessStatus};
use readyrs::series::DateSeries;
use readyrs::store::{load_snapshot, MetricStore, SqliteStore};
use readyrs::trend::Window;

/// readyrs - Athlete readiness analytics
///
/// Turns daily self-reported wellness, load and cycle data into readiness
/// scores, trends and alerts.
#[derive(Parser)]
#[command(name = "readyrs")]
#[command(version)]
#[command(about = "Athlete readiness analytics CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Overrides the database path from the config file
    #[arg(short, long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import metric records from CSV or JSON files or directories
    Import {
        /// Files or directories to import
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// CSV of planned weeks (athlete_id,start_date,volume_planned,intensity_planned)
        #[arg(long, value_name = "FILE")]
        plan: Option<PathBuf>,

        /// Gender for athletes not yet in the store
        #[arg(long, default_value = "other", value_parser = parse_gender)]
        gender: Gender,

        /// Abort without writing if any row is rejected
        #[arg(long)]
        strict: bool,
    },

    /// Register or update an athlete profile
    Athlete {
        id: String,

        #[arg(long, value_parser = parse_gender)]
        gender: Gender,

        /// Disable menstrual cycle analysis for this athlete
        #[arg(long)]
        no_cycle_tracking: bool,
    },

    /// Compute derived metrics (wellness index, weekly load, ACWR)
    Derive {
        #[arg(short, long)]
        athlete: String,

        /// Period start (YYYY-MM-DD), default 28 days before --to
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Period end (YYYY-MM-DD), default today
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Overwrite cached rows for the period
        #[arg(long)]
        save: bool,
    },

    /// Readiness score for a day
    Readiness {
        #[arg(short, long)]
        athlete: String,

        /// Day to score (YYYY-MM-DD), default today
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Current menstrual cycle phase
    Cycle {
        #[arg(short, long)]
        athlete: String,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Alerts for the requested categories
    Alerts {
        #[arg(short, long)]
        athlete: String,

        #[arg(long)]
        date: Option<NaiveDate>,

        /// general, load, readiness or menstrual (repeatable; default from config)
        #[arg(long = "category", value_parser = parse_category)]
        categories: Vec<AlertCategory>,
    },

    /// Rolling averages and segmented trend of one metric
    Trend {
        #[arg(short, long)]
        athlete: String,

        #[arg(short, long, value_parser = parse_metric)]
        metric: MetricType,

        /// Trend window in days (default: all data)
        #[arg(short, long)]
        window: Option<u32>,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Correlation between two metrics
    Correlate {
        #[arg(short, long)]
        athlete: String,

        #[arg(value_parser = parse_metric)]
        first: MetricType,

        #[arg(value_parser = parse_metric)]
        second: MetricType,
    },

    /// Full analysis for one athlete or every athlete in the store
    Report {
        /// Athlete id; all athletes when omitted
        #[arg(short, long)]
        athlete: Option<String>,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a configuration file with the built-in defaults
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Check that every required threshold is present and valid
    Validate,
}

fn parse_gender(s: &str) -> std::result::Result<Gender, String> {
    Gender::from_str(s).ok_or_else(|| format!("unknown gender '{}' (female, male, other)", s))
}

fn parse_metric(s: &str) -> std::result::Result<MetricType, String> {
    MetricType::from_slug(s).ok_or_else(|| {
        let known: Vec<&str> = MetricType::ALL.iter().map(|m| m.slug()).collect();
        format!("unknown metric '{}' (one of: {})", s, known.join(", "))
    })
}

fn parse_category(s: &str) -> std::result::Result<AlertCategory, String> {
    AlertCategory::from_str(s).ok_or_else(|| format!("unknown alert category '{}'", s))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load_or_default()?,
    };
    init_logging(&config.logging.clone().with_verbosity(cli.verbose))?;

    if let Err(err) = run(&cli, config) {
        if let Some(ready) = err.downcast_ref::<ReadyError>() {
            if ready.severity() == ErrorSeverity::Critical {
                tracing::error!(error = %ready, "Command failed");
            }
            eprintln!("{} {}", "error:".red().bold(), ready.user_message());
            std::process::exit(1);
        }
        return Err(err);
    }
    Ok(())
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(AppConfig::default_config_path)
}

fn open_store(cli: &Cli, config: &AppConfig) -> Result<SqliteStore> {
    let path = cli
        .database
        .clone()
        .unwrap_or_else(|| config.storage.database_path.clone());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
    }
    SqliteStore::open(&path).map_err(|e| ReadyError::from(e).into())
}

fn engine(config: &AppConfig) -> Result<AnalyticsEngine> {
    config.engine().map_err(|e| ReadyError::from(e).into())
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: &Cli, config: AppConfig) -> Result<()> {
    match &cli.command {
        Commands::Import {
            paths,
            plan,
            gender,
            strict,
        } => import(cli, &config, paths, plan.as_deref(), *gender, *strict),

        Commands::Athlete {
            id,
            gender,
            no_cycle_tracking,
        } => {
            let mut store = open_store(cli, &config)?;
            let mut profile = AthleteProfile::new(id.clone(), *gender);
            if *no_cycle_tracking {
                profile
                    .preferences
                    .insert("menstrual_tracking".to_string(), "off".to_string());
            }
            store.upsert_profile(&profile).map_err(ReadyError::from)?;
            println!("{} {} ({})", "✓ Saved athlete".green(), id, gender.as_str());
            Ok(())
        }

        Commands::Derive {
            athlete,
            from,
            to,
            save,
        } => {
            let to = to.unwrap_or_else(today);
            let from = from.unwrap_or(to - Duration::days(27));
            if from > to {
                bail!("--from {} is after --to {}", from, to);
            }
            let mut store = open_store(cli, &config)?;
            let lookback = (to - from).num_days() as u32 + 1 + 28;
            let snapshot = load_snapshot(&store, athlete, to, lookback).map_err(ReadyError::from)?;
            let rows = engine(&config)?.compute_derived_metrics(&snapshot, from, to);

            if *save {
                store
                    .save_calculated(athlete, from, to, &rows)
                    .map_err(ReadyError::from)?;
            }

            if cli.json {
                return print_json(&rows);
            }

            #[derive(Tabled)]
            struct Row {
                #[tabled(rename = "Date")]
                date: NaiveDate,
                #[tabled(rename = "Metric")]
                metric: String,
                #[tabled(rename = "Value")]
                value: String,
            }
            let table_rows: Vec<Row> = rows
                .iter()
                .map(|r| Row {
                    date: r.date,
                    metric: r.metric_type.to_string(),
                    value: format!("{:.2}", r.value),
                })
                .collect();
            println!("{}", Table::new(table_rows).with(Style::rounded()));
            if *save {
                println!("{} {} rows cached", "✓".green(), rows.len());
            }
            Ok(())
        }

        Commands::Readiness { athlete, date } => {
            let as_of = date.unwrap_or_else(today);
            let store = open_store(cli, &config)?;
            let snapshot = load_snapshot(&store, athlete, as_of, config.analysis.lookback_days)
                .map_err(ReadyError::from)?;
            let status = engine(&config)?.compute_readiness(&snapshot, as_of);

            if cli.json {
                return print_json(&status);
            }
            print_readiness(&status);
            Ok(())
        }

        Commands::Cycle { athlete, date } => {
            let as_of = date.unwrap_or_else(today);
            let store = open_store(cli, &config)?;
            let snapshot = load_snapshot(&store, athlete, as_of, config.analysis.lookback_days)
                .map_err(ReadyError::from)?;
            let result = engine(&config)?.deduce_cycle_phase(&snapshot, as_of);

            if cli.json {
                return print_json(&result);
            }

            let phase = match result.phase {
                CyclePhase::Amenorrhea => result.phase.to_string().red().bold(),
                CyclePhase::Oligomenorrhea | CyclePhase::PotentialDelayOrLongCycle => {
                    result.phase.to_string().yellow().bold()
                }
                CyclePhase::Unknown => result.phase.to_string().dimmed(),
                _ => result.phase.to_string().cyan().bold(),
            };
            println!("Phase: {} ({})", phase, result.reason);
            if let Some(day) = result.day_in_cycle {
                println!("  Day in cycle:    {}", day);
            }
            if let Some(day) = result.days_in_phase {
                println!("  Day in phase:    {}", day);
            }
            if let Some(average) = result.average_cycle_length_days {
                println!("  Average length:  {:.1} days", average);
            }
            if let Some(last) = result.last_period_start_date {
                println!("  Last period:     {}", last);
            }
            Ok(())
        }

        Commands::Alerts {
            athlete,
            date,
            categories,
        } => {
            let as_of = date.unwrap_or_else(today);
            let categories = if categories.is_empty() {
                config.analysis.alert_categories.clone()
            } else {
                categories.clone()
            };
            let store = open_store(cli, &config)?;
            let snapshot = load_snapshot(&store, athlete, as_of, config.analysis.lookback_days)
                .map_err(ReadyError::from)?;
            let alerts = engine(&config)?.get_alerts(&snapshot, as_of, &categories);

            if cli.json {
                return print_json(&alerts);
            }
            print_alerts(&alerts);
            Ok(())
        }

        Commands::Trend {
            athlete,
            metric,
            window,
            date,
        } => {
            let as_of = date.unwrap_or_else(today);
            let store = open_store(cli, &config)?;
            let snapshot = load_snapshot(&store, athlete, as_of, config.analysis.lookback_days)
                .map_err(ReadyError::from)?;
            let engine = engine(&config)?;

            let points: Vec<(NaiveDate, f64)> = DateSeries::from_records(&snapshot.records, *metric)
                .iter()
                .collect();
            let trend = engine.compute_trend(&points, *window, as_of);
            let averages = engine.rolling_averages(&snapshot, &[*metric], as_of);

            if cli.json {
                return print_json(&serde_json::json!({ "trend": trend, "averages": averages }));
            }

            let change = trend
                .change_percent
                .map(|c| format!("{:+.1}%", c))
                .unwrap_or_else(|| "n/a".to_string());
            println!("{} {}: {} ({})", metric.label().bold(), "trend".dimmed(), trend.trend, change);

            #[derive(Tabled)]
            struct Row {
                #[tabled(rename = "Window")]
                window: String,
                #[tabled(rename = "Average")]
                average: String,
                #[tabled(rename = "Samples")]
                samples: usize,
            }
            let rows: Vec<Row> = averages
                .averages
                .get(metric)
                .map(|windows| {
                    windows
                        .iter()
                        .map(|w| Row {
                            window: w.window.to_string(),
                            average: w.average.map(|a| format!("{:.2}", a)).unwrap_or_else(|| "-".to_string()),
                            samples: w.samples,
                        })
                        .collect()
                })
                .unwrap_or_default();
            if rows.is_empty() {
                println!("{}", "No averages: metric carries free text".dimmed());
            } else {
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
            Ok(())
        }

        Commands::Correlate {
            athlete,
            first,
            second,
        } => {
            let store = open_store(cli, &config)?;
            let snapshot = load_snapshot(&store, athlete, today(), config.analysis.lookback_days)
                .map_err(ReadyError::from)?;
            let engine = engine(&config)?;
            let result = engine.compute_correlation(
                &DateSeries::from_records(&snapshot.records, *first),
                &DateSeries::from_records(&snapshot.records, *second),
            );

            if cli.json {
                return print_json(&result);
            }

            match result.correlation {
                Some(r) => println!(
                    "{} vs {}: r = {:.3}, impact {:.3} per unit ({} common days)",
                    first.label(),
                    second.label(),
                    r,
                    result.impact_size.unwrap_or_default(),
                    result.common_dates
                ),
                None => println!("{} vs {}: n/a", first.label(), second.label()),
            }
            if let Some(reason) = result.reason {
                println!("  {}", reason.to_string().dimmed());
            }
            Ok(())
        }

        Commands::Report { athlete, date } => {
            let as_of = date.unwrap_or_else(today);
            let store = open_store(cli, &config)?;
            let ids = match athlete {
                Some(id) => vec![id.clone()],
                None => store.athlete_ids().map_err(ReadyError::from)?,
            };
            let snapshots = ids
                .iter()
                .map(|id| load_snapshot(&store, id, as_of, config.analysis.lookback_days))
                .collect::<std::result::Result<Vec<_>, StoreError>>()
                .map_err(ReadyError::from)?;
            let reports = engine(&config)?.analyze_all(&snapshots, as_of, &config.analysis.alert_categories);

            if cli.json {
                return print_json(&reports);
            }
            for report in &reports {
                print_report(report);
            }
            Ok(())
        }

        Commands::Config { action } => config_command(cli, config, action),
    }
}

fn import(
    cli: &Cli,
    config: &AppConfig,
    paths: &[PathBuf],
    plan: Option<&Path>,
    gender: Gender,
    strict: bool,
) -> Result<()> {
    let manager = ImportManager::new(RecordValidator::rejecting_after(today()));
    let mut records = Vec::new();
    let mut rejected = Vec::new();

    for path in paths {
        let result = if path.is_dir() {
            manager.import_directory(path)
        } else {
            manager.import_file(path)
        };
        let outcome = result.map_err(ReadyError::from)?;
        records.extend(outcome.records);
        rejected.extend(outcome.rejected);
    }

    let plan_weeks = match plan {
        Some(path) => {
            let (weeks, errors) = manager.import_plan_file(path).map_err(ReadyError::from)?;
            rejected.extend(errors);
            weeks
        }
        None => Vec::new(),
    };

    for error in &rejected {
        eprintln!("{} {}", "✗".red(), error);
    }
    if strict && !rejected.is_empty() {
        bail!("{} rows rejected, nothing written (--strict)", rejected.len());
    }

    let mut store = open_store(cli, config)?;
    let athletes: BTreeSet<&str> = records
        .iter()
        .map(|r| r.athlete_id.as_str())
        .chain(plan_weeks.iter().map(|w| w.athlete_id.as_str()))
        .collect();
    for id in athletes {
        match store.profile(id) {
            Ok(_) => {}
            Err(StoreError::AthleteNotFound(_)) => {
                store
                    .upsert_profile(&AthleteProfile::new(id, gender))
                    .map_err(ReadyError::from)?;
                println!("  New athlete {} ({})", id, gender.as_str());
            }
            Err(e) => return Err(ReadyError::from(e).into()),
        }
    }

    let written = store.upsert_records(&records).map_err(ReadyError::from)?;
    for week in &plan_weeks {
        store.upsert_plan_week(week).map_err(ReadyError::from)?;
    }

    println!(
        "{} {} records, {} plan weeks imported ({} rejected)",
        "✓".green(),
        written,
        plan_weeks.len(),
        rejected.len()
    );
    Ok(())
}

fn config_command(cli: &Cli, config: AppConfig, action: &ConfigAction) -> Result<()> {
    let path = config_path(cli);
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            let mut fresh = AppConfig::default();
            fresh.save_to_file(&path)?;
            println!("{} Wrote {}", "✓".green(), path.display());
        }
        ConfigAction::Show => {
            if cli.json {
                return print_json(&config);
            }
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate => match config.thresholds() {
            Ok(_) => println!("{} {} is valid", "✓".green(), path.display()),
            Err(e) => return Err(ReadyError::from(e).into()),
        },
    }
    Ok(())
}

fn severity_label(severity: AlertSeverity) -> ColoredString {
    let label = format!("{:<7}", severity.to_string());
    match severity {
        AlertSeverity::Danger => label.red().bold(),
        AlertSeverity::Warning => label.yellow().bold(),
        AlertSeverity::Info => label.blue(),
        AlertSeverity::Success => label.green(),
    }
}

fn print_alerts(alerts: &[Alert]) {
    if alerts.is_empty() {
        println!("{}", "No alerts".green());
        return;
    }
    for alert in alerts {
        println!(
            "{} [{}] {}",
            severity_label(alert.severity),
            alert.category.to_string().dimmed(),
            alert.message
        );
    }
}

fn print_readiness(status: &ReadinessStatus) {
    let headline = format!("{} {}", status.score, status.level);
    let headline = match status.level {
        ReadinessLevel::Green => headline.green().bold(),
        ReadinessLevel::Yellow => headline.yellow().bold(),
        ReadinessLevel::Orange => headline.truecolor(255, 165, 0).bold(),
        ReadinessLevel::Red => headline.red().bold(),
        ReadinessLevel::Neutral => headline.dimmed(),
    };
    println!("Readiness {}: {}", status.date, headline);
    println!("  {}", status.message);
    println!("  {}", status.recommendation.italic());

    if !status.penalties.is_empty() {
        #[derive(Tabled)]
        struct Row {
            #[tabled(rename = "Signal")]
            detail: String,
            #[tabled(rename = "Points")]
            points: String,
        }
        let rows: Vec<Row> = status
            .penalties
            .iter()
            .map(|p| Row {
                detail: p.detail.clone(),
                points: format!("-{:.1}", p.points),
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
}

fn print_report(report: &AthleteReport) {
    println!("{} {}", "Athlete".bold(), report.athlete_id.bold());
    print_readiness(&report.readiness);
    if let Some(cycle) = &report.cycle {
        println!("Cycle phase: {} ({})", cycle.phase, cycle.reason);
    }
    for (metric, trend) in &report.trends {
        let week_average = report.rolling_averages.average(*metric, Window::Days(7));
        println!(
            "  {:<18} {:<11} 7d avg {}",
            metric.label(),
            trend.trend.to_string(),
            week_average.map(|v| format!("{:.1}", v)).unwrap_or_else(|| "-".to_string())
        );
    }
    print_alerts(&report.alerts);
    println!();
}
