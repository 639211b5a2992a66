use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use district_explorer::config::{ExplorerConfig, RecordSource};
use district_explorer::explorer::run_explorer;
use district_explorer::index::GeoSurface;
use district_explorer::layers::{default_layers, install, source_defs, style_document};
use district_explorer::records::AnyFetcher;
use district_explorer::session::Session;
use district_explorer::sources::SourceRegistry;
use district_explorer::surface::{LngLat, MapSurface};

/// Size of the off-screen view used by the headless commands
const HEADLESS_COLS: u16 = 160;
const HEADLESS_ROWS: u16 = 48;

#[derive(Parser, Debug)]
#[command(name = "district_explorer")]
#[command(about = "Explore census tracts, school districts and congressional districts in the terminal")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// JSON config file (fields not given take their defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Fetch records over HTTP from this base URL
    #[arg(long, global = true, conflicts_with = "data_dir")]
    data_url: Option<String>,

    /// Read records from this local asset tree
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory holding {source}.geojson
    #[arg(long, global = true)]
    tiles_dir: Option<PathBuf>,

    /// Start view centre as LNG,LAT
    #[arg(long, global = true, allow_hyphen_values = true)]
    center: Option<LngLat>,

    /// Start zoom
    #[arg(long, global = true)]
    zoom: Option<f64>,

    /// Log file for the interactive explorer
    #[arg(long, global = true, default_value = "district_explorer.log")]
    log_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive terminal explorer (default)
    Explore,
    /// Print the details panel for the features at a position
    Describe {
        /// Position as LNG,LAT
        #[arg(long, allow_hyphen_values = true)]
        at: LngLat,
        /// Print the panel markup instead of plain text
        #[arg(long)]
        html: bool,
    },
    /// Export the features in the start view as CSV
    Export {
        /// Output directory (overrides the configured export_dir)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Print the Mapbox-style document for the configured sources and layers
    Style,
}

fn load_config(args: &Args) -> anyhow::Result<ExplorerConfig> {
    let mut config = match &args.config {
        Some(path) => ExplorerConfig::load(path)?,
        None => ExplorerConfig::default(),
    };
    if let Some(base_url) = &args.data_url {
        config.records = RecordSource::Http {
            base_url: base_url.clone(),
        };
    }
    if let Some(root) = &args.data_dir {
        config.records = RecordSource::Dir { root: root.clone() };
    }
    if let Some(dir) = &args.tiles_dir {
        config.tiles_dir = dir.clone();
    }
    if let Some(center) = args.center {
        config.view.center = center;
    }
    if let Some(zoom) = args.zoom {
        config.view.zoom = zoom;
    }
    Ok(config)
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        // The terminal belongs to the explorer; logs go to a file
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("could not create log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn build_surface(config: &ExplorerConfig, registry: &SourceRegistry, cols: u16, rows: u16) -> anyhow::Result<GeoSurface> {
    let mut surface = GeoSurface::new(config.viewport(cols, rows));
    let layers = default_layers().context("invalid layer colours")?;
    install(&mut surface, source_defs(&config.tiles_dir, registry), layers);
    for (source, err) in surface.load_errors() {
        tracing::warn!(source, error = err, "source unavailable");
    }
    Ok(surface)
}

fn build_session(config: &ExplorerConfig) -> anyhow::Result<Session<AnyFetcher>> {
    let fetcher = config.fetcher().context("could not set up record source")?;
    Ok(Session::new(
        SourceRegistry::standard(),
        fetcher,
        config.gates(),
        config.export_dir.clone(),
    ))
}

async fn describe_at(config: &ExplorerConfig, at: LngLat, html: bool) -> anyhow::Result<()> {
    let mut session = build_session(config)?;
    let mut surface = build_surface(config, session.registry(), HEADLESS_COLS, HEADLESS_ROWS)?;
    surface.fly_to(at, config.view.zoom);

    let Some(point) = surface.viewport().to_screen(at) else {
        bail!("{} is outside the view", at);
    };
    match session.handle_click(&mut surface, point).await {
        Some(composite) if !composite.is_empty() => {
            if html {
                println!("{}", composite.to_html());
            } else {
                print!("{}", composite);
            }
        }
        _ => println!("No features at {}", at),
    }
    Ok(())
}

async fn export_view(config: &ExplorerConfig) -> anyhow::Result<()> {
    let session = build_session(config)?;
    let surface = build_surface(config, session.registry(), HEADLESS_COLS, HEADLESS_ROWS)?;
    let summary = session.export(&surface).await.context("export failed")?;

    println!("Wrote {}", summary.path.display());
    for (source, rows) in &summary.rows {
        println!("  {}: {} rows", source, rows);
    }
    Ok(())
}

async fn explore(config: &ExplorerConfig) -> anyhow::Result<()> {
    let session = build_session(config)?;
    let (cols, rows) = crossterm::terminal::size().context("could not read terminal size")?;
    let surface = build_surface(config, session.registry(), cols, rows)?;
    tracing::info!(features = surface.feature_count(), "starting explorer");
    run_explorer(surface, session, config.view.clone()).await?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let command = args.command.as_ref().unwrap_or(&Command::Explore);

    let log_file = matches!(command, Command::Explore).then_some(args.log_file.as_path());
    init_logging(log_file)?;

    let mut config = load_config(&args)?;
    if let Command::Export { out_dir: Some(dir) } = command {
        config.export_dir = dir.clone();
    }

    if let Command::Style = command {
        let document = style_document(
            &source_defs(&config.tiles_dir, &SourceRegistry::standard()),
            &default_layers()?,
        );
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("could not start async runtime")?;

    runtime.block_on(async {
        match command {
            Command::Explore => explore(&config).await,
            Command::Describe { at, html } => describe_at(&config, *at, *html).await,
            Command::Export { .. } => export_view(&config).await,
            Command::Style => Ok(()),
        }
    })
}
