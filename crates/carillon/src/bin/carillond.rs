//! carillond - quarter-hour striking daemon for a MIDI carillon
//!
//! Subcommands:
//! - `carillond serve` - Run the clock and the operator HTTP API (default)
//! - `carillond songs` - List the song catalog
//! - `carillond plan --at <HH:MM>` - Show what the rules would ring
//! - `carillond config` - Print the effective configuration
//! - `carillond ports` - List MIDI output ports

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use tracing::info;

use carillon::daemon::{open_calendar, open_instrument};
use carillon::instrument::list_output_ports;
use carillon::{
    CarillonDaemon, DaemonParts, DryRunInstrument, Instrument, NoteRange, SongCatalog,
    SystemClock, ThreadPacer,
};
use carillonconf::CarillonConfig;

#[derive(Parser)]
#[command(name = "carillond")]
#[command(about = "Quarter-hour striking daemon for a MIDI carillon")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./carillon.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Strike the quarters and serve the operator API
    Serve {
        /// Log strikes instead of sending them to the instrument
        #[arg(long)]
        dry_run: bool,
    },

    /// List the song catalog
    Songs {
        /// Only songs whose title contains this
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Print the ring plan for a time of day
    Plan {
        /// Time of day (HH:MM)
        #[arg(long, value_parser = parse_time)]
        at: NaiveTime,

        /// Date (YYYY-MM-DD), default today
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },

    /// Print the effective configuration
    Config,

    /// List MIDI output ports
    Ports,
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| format!("expected HH:MM: {}", e))
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_catalog(config: &CarillonConfig) -> Result<SongCatalog> {
    let dir = &config.infra.paths.songs_dir;
    SongCatalog::load(dir).with_context(|| format!("Failed to load songs from {}", dir.display()))
}

fn assemble(config: &CarillonConfig, instrument: Arc<dyn Instrument>) -> Result<CarillonDaemon> {
    let calendar = open_calendar(config).context("Invalid [calendar] configuration")?;

    let daemon = CarillonDaemon::build(
        config,
        DaemonParts {
            instrument,
            catalog: load_catalog(config)?,
            calendar,
            clock: Arc::new(SystemClock),
            pacer: Arc::new(ThreadPacer),
        },
    )?;
    Ok(daemon)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = CarillonConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&config.infra.telemetry.log_level);

    for path in &sources.files {
        info!("Loaded config from {}", path.display());
    }

    match cli.command.unwrap_or(Commands::Serve { dry_run: false }) {
        Commands::Serve { dry_run } => {
            config.infra.midi.dry_run |= dry_run;
            let instrument = open_instrument(&config.infra.midi)
                .context("Failed to open the instrument")?;

            let daemon = Arc::new(assemble(&config, instrument)?);
            daemon.start_clock()?;

            let served = carillon::http::serve(Arc::clone(&daemon), &config.infra.http.addr()).await;
            daemon.stop_clock();
            served?;
        }
        Commands::Songs { title } => {
            let catalog = load_catalog(&config)?;
            let songs = match title {
                Some(fragment) => catalog.search_title(&fragment),
                None => catalog.iter().cloned().collect(),
            };
            for song in songs {
                let id = catalog.id_of(&song).unwrap_or_default();
                println!(
                    "{:>4}  {:>6}  {:<40} {:>3} strikes  {:>5.1}s",
                    id,
                    song.number.as_deref().unwrap_or("-"),
                    song.title,
                    song.strike_count(),
                    song.duration().as_secs_f64()
                );
            }
        }
        Commands::Plan { at, date } => {
            let range = NoteRange::new(config.infra.midi.lowest_note, config.infra.midi.highest_note);
            let daemon = assemble(&config, Arc::new(DryRunInstrument::new(range)))?;

            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            // The Direktorium lookup blocks on HTTP
            let preview = tokio::task::spawn_blocking(move || daemon.preview(date.and_time(at)))
                .await
                .context("Preview task failed")??;

            let title = preview.facts.title.as_deref().unwrap_or("-");
            println!(
                "{} {}  {} in {} ({})",
                preview.date, preview.tick, preview.facts.rank, preview.facts.season, title
            );
            if preview.silent_day {
                println!("silent day");
            }
            println!("{} ({} actions)", preview.plan, preview.actions);
        }
        Commands::Config => {
            for path in &sources.files {
                println!("# loaded: {}", path.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {}", var);
            }
            print!("{}", config.to_toml());
        }
        Commands::Ports => {
            let ports = list_output_ports(&config.infra.midi.client_name)?;
            if ports.is_empty() {
                println!("No MIDI output ports found");
            }
            for port in ports {
                println!("{:>3}  {}", port.index, port.name);
            }
        }
    }

    Ok(())
}
