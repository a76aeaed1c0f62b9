use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use strata::config::{load_config, CompositorConfig};
use strata::displacement::{composite_displacement, DisplacementJob, EdgeMode};
use strata::engine::skia::TinySkiaEngine;
use strata::engine::{with_scope, RenderEngine};
use strata::error::ErrorEnvelope;
use strata::store::DirByteStore;
use strata::transform::Point;
use strata::Session;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("STRATA_GIT_HASH"), ")");

#[derive(Debug, Parser)]
#[command(name = "strata")]
#[command(version = VERSION)]
#[command(about = "Layered image compositor")]
struct Cli {
    /// Print failures as a JSON error envelope on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a compositor config file
    Check { config: PathBuf },
    /// Render a saved project to PNG
    Render {
        /// Store key the project was saved under
        project: String,
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 1024)]
        width: u32,
        #[arg(long, default_value_t = 768)]
        height: u32,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    /// Warp an image by a displacement map
    Displace {
        source: PathBuf,
        map: PathBuf,
        #[arg(long)]
        mask: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Pixels of offset at full map saturation
        #[arg(long, allow_negative_numbers = true)]
        strength: Option<f64>,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        offset_x: f64,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        offset_y: f64,
        #[arg(long)]
        smooth_edges: bool,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Check { config } => run_check(&config),
        Commands::Render {
            project,
            store,
            config,
            width,
            height,
            output,
        } => run_render(&project, &store, config.as_deref(), width, height, &output),
        Commands::Displace {
            source,
            map,
            mask,
            config,
            strength,
            offset_x,
            offset_y,
            smooth_edges,
            output,
        } => run_displace(&DisplaceArgs {
            source: &source,
            map: &map,
            mask: mask.as_deref(),
            config: config.as_deref(),
            strength,
            offset: Point::new(offset_x, offset_y),
            smooth_edges,
            output: &output,
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if cli.json {
                match serde_json::to_string_pretty(&ErrorEnvelope::from_anyhow(&error)) {
                    Ok(json) => println!("{json}"),
                    Err(_) => eprintln!("error: {error:#}"),
                }
            } else {
                eprintln!("error: {error:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn config_or_default(path: Option<&Path>) -> Result<CompositorConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(CompositorConfig::default()),
    }
}

fn run_check(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    println!(
        "OK: {} (size rule {:?}, zoom {}..={}, pan with {:?})",
        config_path.display(),
        config.overlap.size_rule,
        config.zoom.min_scale,
        config.zoom.max_scale,
        config.input.pan_button
    );
    Ok(())
}

fn run_render(
    project: &str,
    store_root: &Path,
    config_path: Option<&Path>,
    width: u32,
    height: u32,
    output: &Path,
) -> Result<()> {
    let config = config_or_default(config_path)?;
    let store = DirByteStore::open(store_root)?;
    let mut session = Session::new(TinySkiaEngine::new(), width, height, config)?;

    let report = session
        .load_project(&store, project)
        .with_context(|| format!("failed to load project '{project}'"))?;
    let png = session.snapshot_png()?;
    write_output(output, &png)?;

    println!(
        "Wrote {} ({} layers, {} skipped)",
        output.display(),
        report.loaded,
        report.skipped.len()
    );
    Ok(())
}

struct DisplaceArgs<'a> {
    source: &'a Path,
    map: &'a Path,
    mask: Option<&'a Path>,
    config: Option<&'a Path>,
    strength: Option<f64>,
    offset: Point,
    smooth_edges: bool,
    output: &'a Path,
}

fn run_displace(args: &DisplaceArgs<'_>) -> Result<()> {
    let config = config_or_default(args.config)?;
    let mut params = config.displacement_params();
    if let Some(strength) = args.strength {
        params.strength = strength;
    }
    params.source_offset = args.offset;
    if args.smooth_edges {
        params.edge_mode = EdgeMode::Smooth;
    }

    let mut engine = TinySkiaEngine::new();
    let png = with_scope(&mut engine, |engine, scope| -> Result<Vec<u8>> {
        let source = scope.track(decode_file(engine, args.source)?);
        let map = scope.track(decode_file(engine, args.map)?);
        let mask = match args.mask {
            Some(path) => Some(scope.track(decode_file(engine, path)?)),
            None => None,
        };

        let output = scope.track(composite_displacement(
            engine,
            &DisplacementJob { source, map, mask },
            &params,
        )?);
        Ok(engine.encode_png(output)?)
    })?;
    write_output(args.output, &png)?;

    println!("Wrote {}", args.output.display());
    Ok(())
}

fn decode_file<E: RenderEngine>(
    engine: &mut E,
    path: &Path,
) -> Result<strata::engine::ImageHandle> {
    let bytes = fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    engine
        .decode(&bytes)
        .with_context(|| format!("failed to decode image {}", path.display()))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create output dir {}", parent.display()))?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
