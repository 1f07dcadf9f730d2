//! `depoview`: submit a deposition job, stream its trajectory and report the
//! roughness of the deposited film.
//!
//! Examples:
//!   depoview molecules
//!   depoview run --mix TPD=1 --mix AQ4=2 --set deposition_velocity=0.5
//!   depoview analyze ~/.local/share/depoview/archives/AQ4-2_TPD-1_0.50.dtrj --bins 20
//!   depoview paths
//!
//! The server defaults to http://127.0.0.1:8080/; override with `--server URL`
//! or `DEPOVIEW_SERVER`.

mod connection;
mod error;
mod http;
mod paths;
mod runner;
mod settings;
mod sinks;

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use depoview::archive::load_trajectory;
use depoview::config::{parse_ratio, parse_setting, Configuration};
use depoview::heightmap::HeightMap;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ClientError;
use crate::http::fetch_catalog;
use crate::paths::AppPaths;
use crate::runner::{run_job, JobOptions, JobOutcome};
use crate::settings::ClientSettings;

#[derive(Parser)]
#[command(name = "depoview", version, about = "Molecular deposition trajectory client")]
struct Cli {
    /// Server page URL; the socket is derived from it.
    #[arg(long, global = true)]
    server: Option<String>,
    /// Credential sent as the `id` cookie.
    #[arg(long, global = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job and download its trajectory.
    Run {
        /// Mixture component, RES=RATIO. Repeatable.
        #[arg(long = "mix", value_name = "RES=RATIO", value_parser = parse_ratio, required = true)]
        mix: Vec<(String, u32)>,
        /// Protocol setting, NAME=VALUE. Repeatable.
        #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_setting)]
        set: Vec<(String, f64)>,
        /// Height-map bins per axis.
        #[arg(long)]
        bins: Option<usize>,
        /// Also export the trajectory as XYZ text.
        #[arg(long, value_name = "PATH")]
        xyz: Option<PathBuf>,
        /// Do not keep a trajectory archive.
        #[arg(long)]
        no_archive: bool,
    },
    /// List the components the server offers.
    Molecules,
    /// Compute the height map of the last frame in an archive.
    Analyze {
        archive: PathBuf,
        #[arg(long)]
        bins: Option<usize>,
        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show where settings, archives and reports live.
    Paths,
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let paths = AppPaths::resolve()?;
    let mut settings = ClientSettings::load(&paths.settings_file())?;
    if let Some(server) = cli.server {
        settings.server = server;
    }
    if let Some(token) = cli.token {
        settings.token = Some(token);
    }

    match cli.command {
        Commands::Run {
            mix,
            set,
            bins,
            xyz,
            no_archive,
        } => {
            if let Some(bins) = bins {
                settings.bins = bins;
            }
            if no_archive {
                settings.save_archive = false;
            }
            run(&settings, &paths, mix, set, xyz).await
        }
        Commands::Molecules => molecules(&settings).await,
        Commands::Analyze {
            archive,
            bins,
            json,
        } => analyze(&archive, bins.unwrap_or(settings.bins), json),
        Commands::Paths => {
            println!("data dir:   {}", paths.data_dir().display());
            println!("settings:   {}", paths.settings_file().display());
            println!("archives:   {}", paths.archive_dir().display());
            println!("reports:    {}", paths.report_dir().display());
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn run(
    settings: &ClientSettings,
    paths: &AppPaths,
    mix: Vec<(String, u32)>,
    set: Vec<(String, f64)>,
    xyz: Option<PathBuf>,
) -> Result<(), ClientError> {
    let server = settings.server_url()?;
    let http = reqwest::Client::new();
    let mut config = match fetch_catalog(&http, &server, settings.token.as_deref()).await {
        Ok(catalog) => {
            for (res_name, _) in &mix {
                catalog.require(res_name)?;
            }
            Configuration::from_catalog(&catalog)
        }
        Err(e) => {
            warn!("component catalog unavailable ({}), submitting the mixture as given", e);
            Configuration::default()
        }
    };
    for (res_name, ratio) in &mix {
        config.set_ratio(res_name, *ratio);
    }
    for (key, value) in &set {
        config.set_setting(key, *value);
    }
    config.validate()?;
    for (key, setting) in config.settings() {
        let units = setting.range.display_units.as_deref().unwrap_or("");
        info!("{}: {} {}", setting.range.label(key), setting.value, units);
    }

    let job = config.job_name();
    paths.ensure()?;
    let options = JobOptions {
        bins: settings.bins,
        xyz,
        archive: settings.save_archive.then(|| paths.archive_file(&job)),
    };
    info!("job {}", job);

    match run_job(settings, &config, &options).await? {
        JobOutcome::Completed(Some(height_map)) => {
            print_height_map(&height_map);
            let report = paths.report_file(&job);
            fs::write(&report, serde_json::to_string_pretty(&height_map.report())?)?;
            println!("report:            {}", report.display());
        }
        JobOutcome::Completed(None) => warn!("trajectory complete but there is nothing to analyse"),
        JobOutcome::Cancelled => println!("cancelled"),
    }
    Ok(())
}

async fn molecules(settings: &ClientSettings) -> Result<(), ClientError> {
    let http = reqwest::Client::new();
    let catalog = fetch_catalog(&http, &settings.server_url()?, settings.token.as_deref()).await?;
    for m in &catalog.molecules {
        println!("{:<6} {:<32} {}", m.res_name, m.name, m.formula);
    }
    Ok(())
}

fn analyze(archive: &Path, bins: usize, json: bool) -> Result<(), ClientError> {
    let trajectory = load_trajectory(BufReader::new(File::open(archive)?))?;
    info!(
        frames = trajectory.len(),
        particles = trajectory.particle_count(),
        "archive loaded"
    );
    let height_map = trajectory
        .last_frame()
        .and_then(|frame| HeightMap::from_frame(&frame, bins))
        .ok_or(ClientError::NothingToAnalyse)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&height_map.report())?);
    } else {
        print_height_map(&height_map);
    }
    Ok(())
}

fn print_height_map(height_map: &HeightMap) {
    println!("bins:              {0} x {0}", height_map.bins());
    println!("film thickness:    {:.3} nm", height_map.film_thickness());
    println!("roughness:         {:.3} nm", height_map.roughness());
}
