use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use crossterm::cursor::MoveTo;
use crossterm::terminal::{self, Clear, ClearType};
use tracing::warn;

use uptimed::client::{self, BarChartLayout, CachedMonitor, MonitorApi, StatusCache};
use uptimed::config::Config;
use uptimed::daemon::{self, ServiceStatus};
use uptimed::stats::HistoricalStat;

/// Width assumed when the terminal size cannot be read
const FALLBACK_WIDTH: u16 = 80;

/// Columns used by the text before the status strip in `watch`
const WATCH_LABEL_WIDTH: u16 = 52;

#[derive(Parser)]
#[command(name = "uptimed", version, about = "Uptime monitoring daemon and client")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/uptimed/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitoring daemon in the foreground
    Daemon,
    /// Print the effective configuration
    Config,
    /// Manage monitors on a running daemon
    #[command(subcommand)]
    Monitor(MonitorCommand),
    /// Live status of every monitor, refreshed periodically
    Watch,
}

#[derive(Subcommand)]
enum MonitorCommand {
    Add { name: String, url: String },
    Remove { name: String },
    Pause { name: String },
    Resume { name: String },
    List,
    /// Current status and uptime
    Get { name: String },
    /// Most recent checks, newest first
    History {
        name: String,
        #[arg(long, default_value_t = 20, allow_negative_numbers = true)]
        count: i64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        logger::init_with_level(logger::LevelFilter::DEBUG);
    } else {
        logger::init();
    }

    let config = Config::from_config(cli.config.as_ref()).context("failed to load config")?;

    match cli.command {
        Command::Daemon => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start tokio runtime")?;
            runtime.block_on(daemon::run(&config))
        }
        Command::Config => {
            print!("{config}");
            Ok(())
        }
        Command::Monitor(command) => run_monitor_command(&config, command),
        Command::Watch => watch(&config),
    }
}

fn run_monitor_command(config: &Config, command: MonitorCommand) -> anyhow::Result<()> {
    let mut client = client::connect(config)?;

    match command {
        MonitorCommand::Add { name, url } => println!("{}", client.add_monitor(&name, &url)?),
        MonitorCommand::Remove { name } => println!("{}", client.remove_monitor(&name)?),
        MonitorCommand::Pause { name } => println!("{}", client.pause_monitor(&name)?),
        MonitorCommand::Resume { name } => println!("{}", client.resume_monitor(&name)?),
        MonitorCommand::List => {
            let monitors = client.list_monitors()?;
            if monitors.is_empty() {
                println!("No monitors");
            }
            for monitor in monitors {
                let state = if monitor.is_active { "active" } else { "paused" };
                println!("{:>4}  {:<20} {:<7} {}", monitor.id, monitor.name, state, monitor.url);
            }
        }
        MonitorCommand::Get { name } => print_status(&client.service_status(&name)?),
        MonitorCommand::History { name, count } => {
            let status = client.service_status(&name)?;
            let history = client.historical_stats(status.monitor_id, count)?;
            if history.is_empty() {
                println!("No checks recorded for {name}");
            }
            for stat in history {
                println!(
                    "{}  {:<4}  {} ms",
                    stat.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    if stat.is_up { "up" } else { "down" },
                    stat.response_time_ms
                );
            }
        }
    }

    Ok(())
}

fn print_status(status: &ServiceStatus) {
    println!("{} ({})", status.monitor_name, status.url);
    println!("  State:            {}", if status.is_active { "active" } else { "paused" });
    println!("  Last check:       {}", up_label(status.last_is_up));
    println!("  Checked at:       {}", or_no_data(status.last_checked_at.map(format_time)));
    println!("  Response time:    {}", or_no_data(status.last_response_time.map(|ms| format!("{ms} ms"))));
    println!("  Avg (30d):        {}", or_no_data(status.avg_response_time.map(|ms| format!("{ms:.1} ms"))));
    println!("  Uptime (24h):     {}", percent(status.uptime_24h));
    println!("  Uptime (30d):     {}", percent(status.uptime_30d));
    println!(
        "  Certificate:      {}",
        or_no_data(status.last_certificate_expiry.map(|at| format!("expires {}", format_time(at))))
    );
}

/// Plain-text display session; runs until interrupted.
fn watch(config: &Config) -> anyhow::Result<()> {
    let client = client::connect(config)?;
    let mut cache = StatusCache::new(client, BarChartLayout::default(), strip_width());
    let mut stdout = io::stdout();

    loop {
        let width = strip_width();
        if width != cache.width() {
            for (name, e) in cache.resize(width).failures {
                warn!(%name, "History refresh failed: {}", e);
            }
        }

        match cache.refresh() {
            Ok(report) => {
                for (name, e) in report.failures {
                    warn!(%name, "Refresh failed, showing last known values: {}", e);
                }
            }
            Err(e) => warn!("Refresh failed, showing last known values: {}", e),
        }

        crossterm::execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
        writeln!(stdout, "uptimed - {}", format_time(Utc::now()))?;
        writeln!(stdout)?;
        if cache.entries().is_empty() {
            writeln!(stdout, "No monitors")?;
        }
        for entry in cache.entries() {
            writeln!(stdout, "{}", watch_line(entry))?;
        }
        stdout.flush()?;

        thread::sleep(config.refresh_interval());
    }
}

fn strip_width() -> u16 {
    let columns = terminal::size().map(|(columns, _)| columns).unwrap_or(FALLBACK_WIDTH);
    columns.saturating_sub(WATCH_LABEL_WIDTH)
}

fn watch_line(entry: &CachedMonitor) -> String {
    let status = entry.status.as_ref();
    let state = if entry.monitor.is_active {
        up_label(status.and_then(|s| s.last_is_up))
    } else {
        "paused".to_string()
    };

    format!(
        "{:<16} {:<7} {:>9} {:>8} {:>8} {}",
        entry.monitor.name,
        state,
        or_no_data(status.and_then(|s| s.last_response_time).map(|ms| format!("{ms}ms"))),
        percent(status.and_then(|s| s.uptime_24h)),
        percent(status.and_then(|s| s.uptime_30d)),
        status_strip(&entry.history),
    )
}

/// One character per check, oldest on the left.
fn status_strip(history: &[HistoricalStat]) -> String {
    history.iter().rev().map(|stat| if stat.is_up { '▇' } else { '▁' }).collect()
}

fn up_label(is_up: Option<bool>) -> String {
    match is_up {
        Some(true) => "up".to_string(),
        Some(false) => "down".to_string(),
        None => "no data".to_string(),
    }
}

fn percent(value: Option<f64>) -> String {
    or_no_data(value.map(|v| format!("{v:.2}%")))
}

fn or_no_data(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
