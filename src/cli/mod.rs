//! Command-line interface for the KWIK tools.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::container::Container;
use crate::core::kwik::{has_kwik_extension, open_experiment, KwikExperiment};
use crate::processors::overlap::{OverlapParams, OverlapResult, Progress, ProgressSink, TieBreak};
use crate::ToolsConfig;

#[derive(Parser)]
#[command(name = "kwik-tools")]
#[command(about = "Post-processing tools for KWIK spike-sorting experiments", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove overlapping duplicate spikes from every channel group (in place)
    IsiClean {
        /// KWIK file to clean; the .kwx file next to it is rewritten too
        kwik_path: PathBuf,
        /// Spikes closer than this many samples are candidates for removal
        interval_samples: u64,
        /// Minimum mask overlap for two spikes to count as duplicates
        mask_min: f64,
        /// 1 discards a random spike of each pair, 0 always the earlier one
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        rand_disc: Option<u8>,
        /// Seed for the random discard
        #[arg(long)]
        seed: Option<u64>,
        /// Report what would be removed without modifying any file
        #[arg(long)]
        dry_run: bool,
    },

    /// Add a spike cluster file as a new clustering
    ImportClusters {
        /// Text file with one 1-based cluster label per spike
        scname: PathBuf,
        /// KWIK file to add the clustering to
        kwikname: PathBuf,
        /// Name of the new clustering
        clusteringname: String,
        /// Channel group (defaults to the first one)
        #[arg(long)]
        channel_group: Option<String>,
    },

    /// Export a channel group as KlustaKwik .fet/.fmask files
    ExportKlusters {
        /// KWIK file to export from
        kwikname: PathBuf,
        /// Channel group to export
        shank: String,
        /// Directory for the output files
        outputdir: PathBuf,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Progress bar fed by the overlap filter, one bar per channel group.
struct BarProgress {
    bar: Option<ProgressBar>,
}

impl BarProgress {
    fn new() -> Self {
        Self { bar: None }
    }
}

impl ProgressSink for BarProgress {
    fn begin(&mut self, label: &str, total: usize) {
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_prefix(format!("Group {}", label));
        self.bar = Some(pb);
    }

    fn report(&mut self, progress: &Progress) {
        debug!(
            "{:.1}% complete, {:.1}% discarded",
            progress.percent_complete(),
            progress.percent_discarded()
        );
        if let Some(pb) = &self.bar {
            pb.set_position(progress.position as u64);
            pb.set_message(format!("{} discarded", progress.discarded));
        }
    }

    fn finish(&mut self, result: &OverlapResult) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
        info!("{} of {} spikes discarded", result.discarded, result.len());
    }
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match ToolsConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                ToolsConfig::default()
            }
        },
        None => ToolsConfig::default(),
    };

    // Dispatch to subcommands
    match cli.command {
        Commands::IsiClean { kwik_path, interval_samples, mask_min, rand_disc, seed, dry_run } => {
            cmd_isi_clean(&kwik_path, interval_samples, mask_min, rand_disc, seed, dry_run, &config);
        }
        Commands::ImportClusters { scname, kwikname, clusteringname, channel_group } => {
            cmd_import_clusters(&scname, &kwikname, &clusteringname, channel_group.as_deref());
        }
        Commands::ExportKlusters { kwikname, shank, outputdir } => {
            cmd_export_klusters(&kwikname, &shank, &outputdir, &config);
        }
    }
}

/// Validate the path and open the experiment with its companion file.
fn open_checked(kwik_path: &Path) -> Result<KwikExperiment<Box<dyn Container>>> {
    if !has_kwik_extension(kwik_path) {
        bail!("File must end in .kwik and be an HDF5 KWIK-format file");
    }
    open_experiment(kwik_path)
        .with_context(|| format!("Failed to open experiment {}", kwik_path.display()))
}

/// Open an experiment or exit with status 1.
fn open_or_exit(kwik_path: &Path) -> KwikExperiment<Box<dyn Container>> {
    match open_checked(kwik_path) {
        Ok(exp) => exp,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_isi_clean(
    kwik_path: &Path,
    interval_samples: u64,
    mask_min: f64,
    rand_disc: Option<u8>,
    seed: Option<u64>,
    dry_run: bool,
    config: &ToolsConfig,
) {
    use crate::processors::isi_clean::{self, IsiCleanParams};

    let start = Instant::now();

    let tie_break = match rand_disc {
        Some(flag) => TieBreak::from_rand_disc(flag != 0),
        None => config.isi_clean.tie_break(),
    };
    let seed = seed.or(config.isi_clean.seed);

    let mut experiment = open_or_exit(kwik_path);

    if dry_run {
        println!("DRY RUN: No datasets will be modified");
    }

    let mut rng = match seed {
        Some(s) => {
            debug!("Seeding tie-break with {}", s);
            StdRng::seed_from_u64(s)
        }
        None => StdRng::from_entropy(),
    };

    let params = IsiCleanParams {
        overlap: OverlapParams::new(interval_samples, mask_min, tie_break),
        dry_run,
        staging_group: config.isi_clean.staging_group.clone(),
    };

    let mut progress = BarProgress::new();
    match isi_clean::clean_experiment(&mut experiment, &params, &mut rng, &mut progress) {
        Ok(reports) => {
            let total: usize = reports.iter().map(|r| r.n_spikes).sum();
            let discarded: usize = reports.iter().map(|r| r.n_discarded).sum();

            let mut items = vec![
                ("Experiment", kwik_path.display().to_string()),
                ("Interval (samples)", interval_samples.to_string()),
                ("Mask minimum", mask_min.to_string()),
                ("Tie-break", format!("{:?}", tie_break)),
            ];
            for report in &reports {
                items.push((
                    "Channel group",
                    format!(
                        "{}: {}/{} ({:.2}%)",
                        report.channel_group,
                        report.n_discarded,
                        report.n_spikes,
                        report.percent_discarded()
                    ),
                ));
            }
            items.push(("Spikes total", total.to_string()));
            items.push(("Spikes discarded", discarded.to_string()));
            items.push(("Dry run", dry_run.to_string()));
            items.push(("Duration", format!("{:.2?}", start.elapsed())));

            print_summary("ISI Clean Complete", &items);
        }
        Err(e) => {
            error!("ISI clean failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_import_clusters(
    scname: &Path,
    kwikname: &Path,
    clusteringname: &str,
    channel_group: Option<&str>,
) {
    use crate::processors::clusters;

    let start = Instant::now();
    let mut experiment = open_or_exit(kwikname);

    let spinner = create_spinner("Importing spike clusters...");

    match clusters::import_spike_clusters(&mut experiment, scname, channel_group, clusteringname) {
        Ok(path) => {
            spinner.finish_and_clear();
            print_summary(
                "Cluster Import Complete",
                &[
                    ("Spike clusters", scname.display().to_string()),
                    ("Experiment", kwikname.display().to_string()),
                    ("Dataset", path),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Cluster import failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_export_klusters(kwikname: &Path, shank: &str, outputdir: &Path, config: &ToolsConfig) {
    use crate::processors::klusters;

    let start = Instant::now();
    let experiment = open_or_exit(kwikname);

    let spinner = create_spinner("Exporting features and masks...");

    match klusters::export_klusters(&experiment, shank, outputdir, &config.klusters) {
        Ok(export) => {
            spinner.finish_and_clear();
            let fmask = export
                .fmask_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(no masks)".to_string());
            print_summary(
                "Klusters Export Complete",
                &[
                    ("Experiment", kwikname.display().to_string()),
                    ("Channel group", shank.to_string()),
                    ("Feature file", export.fet_path.display().to_string()),
                    ("Mask file", fmask),
                    ("Spikes", export.n_spikes.to_string()),
                    ("Features", export.n_features.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Klusters export failed: {}", e);
            std::process::exit(1);
        }
    }
}
