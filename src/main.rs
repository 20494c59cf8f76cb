// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Verdant: closed-set plant identification
//!
//! Identifies plant photos against a user-curated set of reference profiles
//! using a local vision model.

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::future::Future;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use verdant::capture::{
    collect_sources, enumerate_folder, read_image_file, CameraSession, CaptureMode, FfmpegCamera,
    ImageSource, ImageSourceAdapter,
};
use verdant::classifier::ClassificationClient;
use verdant::config::{AppConfig, LocationSource};
use verdant::geo::GeolocationResolver;
use verdant::history::{History, RecordFlag};
use verdant::ollama::OllamaClient;
use verdant::orchestrator::{BatchSummary, ResultSink};
use verdant::profiles::{NewProfile, ProfileStore};
use verdant::{AnalysisRecord, BatchOrchestrator, Result, RunOptions, VerdantError};

/// Verdant CLI - closed-set plant identification
#[derive(Parser, Debug)]
#[command(name = "verdant")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "0.1.0")]
#[command(about = "Identify plants against your own reference profiles", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Identify photos: files, folders or glob patterns
    Identify {
        /// Images, folders or patterns to identify
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Descend into sub-folders
        #[arg(short, long)]
        recursive: bool,

        /// Do not save results to history
        #[arg(long)]
        no_history: bool,
    },

    /// Identify frames grabbed from a camera
    Camera {
        /// Number of frames to capture
        #[arg(short, long, default_value = "1")]
        shots: usize,

        /// Camera device (overrides config)
        #[arg(short, long)]
        device: Option<String>,

        /// Do not save results to history
        #[arg(long)]
        no_history: bool,
    },

    /// Reference profile management
    Profiles {
        #[command(subcommand)]
        action: ProfileCommands,
    },

    /// Identification history
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show classifier and storage status
    Status,

    /// Initialize a new Verdant project
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommands {
    /// List reference profiles
    List,

    /// Add a profile from a folder of sample images
    Add {
        /// Folder of sample images
        folder: PathBuf,

        /// Common name (default: folder name)
        #[arg(short, long)]
        name: Option<String>,

        /// Scientific name
        #[arg(short, long, default_value = "")]
        scientific: String,

        /// Mark the plant as invasive
        #[arg(long)]
        invasive: bool,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,

        /// Include images in sub-folders
        #[arg(short, long)]
        recursive: bool,
    },

    /// Remove a profile
    Remove {
        /// Profile id
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent identifications
    List {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Toggle the favorite flag
    Favorite { id: String },

    /// Toggle the incorrect flag
    Incorrect { id: String },

    /// Delete one record
    Delete { id: String },

    /// Export all records to a JSON file
    Export {
        /// Output file
        output: PathBuf,
    },

    /// Clear all history
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = AppConfig::load(&cli.config)?;
    let output = Output {
        format: cli.format.clone(),
        quiet: cli.quiet,
    };

    match cli.command {
        Some(Commands::Identify { inputs, recursive, no_history }) => {
            run_identify(config, inputs, recursive, no_history, &output).await
        }
        Some(Commands::Camera { shots, device, no_history }) => {
            run_camera(config, shots, device, no_history, &output).await
        }
        Some(Commands::Profiles { action }) => run_profile_command(config, action).await,
        Some(Commands::History { action }) => run_history_command(config, action).await,
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config).await,
        Some(Commands::Status) | None => run_status(config).await,
        Some(Commands::Init { dir, force }) => run_init(dir, force).await,
    }
}

struct Output {
    format: String,
    quiet: bool,
}

impl Output {
    fn show_ticker(&self) -> bool {
        !self.quiet && self.format == "text" && std::io::stderr().is_terminal()
    }
}

fn build_orchestrator(config: &AppConfig, camera_device: Option<&str>) -> Result<BatchOrchestrator> {
    let backend = Arc::new(OllamaClient::new(
        &config.classifier.url,
        Duration::from_secs(config.classifier.connect_timeout_secs),
    )?);
    let classifier = Arc::new(ClassificationClient::from_config(backend, config));
    let geolocation = GeolocationResolver::from_config(&config.geolocation)?;

    let camera = FfmpegCamera::new(
        camera_device.unwrap_or(&config.capture.camera_device),
        &config.capture.camera_input_format,
    );
    let adapter = ImageSourceAdapter::new(CameraSession::new(Arc::new(camera)));

    Ok(BatchOrchestrator::new(classifier, geolocation, adapter))
}

fn load_profiles(config: &AppConfig) -> Result<Vec<verdant::profiles::ReferenceProfile>> {
    let store = ProfileStore::new(PathBuf::from(&config.storage.profiles_path));
    let profiles = store.load()?;
    if profiles.is_empty() {
        warn!(
            "No reference profiles in {:?}. Add some with: verdant profiles add <folder>",
            store.path()
        );
    } else {
        info!("Loaded {} reference profiles", profiles.len());
    }
    Ok(profiles)
}

/// Prints each record as it arrives and forwards it to history
struct ConsoleSink<'a> {
    history: Option<&'a History>,
    format: String,
    collected: Mutex<Vec<serde_json::Value>>,
}

impl<'a> ConsoleSink<'a> {
    fn new(history: Option<&'a History>, format: &str) -> Self {
        Self {
            history,
            format: format.to_string(),
            collected: Mutex::new(Vec::new()),
        }
    }

    /// Flush output that is only printed once the run ends
    fn finish(&self) -> Result<()> {
        if self.format == "json" {
            let collected = self.collected.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            println!("{}", serde_json::to_string_pretty(&*collected)?);
        }
        Ok(())
    }
}

fn record_summary(record: &AnalysisRecord) -> serde_json::Value {
    serde_json::json!({
        "id": record.id,
        "source": record.source_image.origin,
        "matchedName": record.outcome.matched_name,
        "scientificName": record.outcome.scientific_name,
        "isInvasive": record.outcome.is_invasive,
        "confidence": record.outcome.confidence,
        "matchedProfileId": record.outcome.matched_profile_id,
        "explanation": record.outcome.explanation,
        "elapsedSeconds": record.elapsed_seconds,
        "coordinates": record.coordinates,
        "capturedAt": record.captured_at,
    })
}

fn describe(record: &AnalysisRecord) -> String {
    let outcome = &record.outcome;
    let verdict = match outcome.match_confidence() {
        Some(confidence) => format!(
            "{} ({}) {:.0}%{}",
            outcome.matched_name,
            outcome.scientific_name,
            confidence * 100.0,
            if outcome.is_invasive { " INVASIVE" } else { "" }
        ),
        None => format!(
            "no match ({:.0}% likely not in your profiles)",
            outcome.confidence * 100.0
        ),
    };
    let location = record
        .coordinates
        .map(|c| format!(" @ {:.5},{:.5}", c.lat, c.lng))
        .unwrap_or_default();
    format!(
        "{}: {} in {:.2}s{}",
        record.source_image.origin, verdict, record.elapsed_seconds, location
    )
}

impl ResultSink for ConsoleSink<'_> {
    fn accept(&self, record: AnalysisRecord) {
        match self.format.as_str() {
            "json" => {
                let mut collected = self.collected.lock().unwrap_or_else(|poisoned| {
                    error!("Output buffer poisoned while adding record {}", record.id);
                    poisoned.into_inner()
                });
                collected.push(record_summary(&record));
            }
            "jsonl" => println!("{}", record_summary(&record)),
            _ => {
                if std::io::stderr().is_terminal() {
                    eprint!("\r");
                }
                println!("{}", describe(&record));
                if !record.outcome.explanation.is_empty() {
                    println!("    {}", record.outcome.explanation);
                }
            }
        }

        if let Some(history) = self.history {
            history.accept(record);
        }
    }
}

/// Drive a run while rendering the live elapsed time on stderr
async fn with_ticker<F>(orchestrator: &BatchOrchestrator, config: &AppConfig, show: bool, run: F) -> F::Output
where
    F: Future,
{
    if !show {
        return run.await;
    }

    let ticks = orchestrator.elapsed_ticks(config.progress.tick());
    let ticker = tokio::spawn(async move {
        tokio::pin!(ticks);
        while let Some(tick) = ticks.next().await {
            if let Some(tick) = tick {
                eprint!("\r[{}/{}] {:>8.2}s", tick.index, tick.total, tick.elapsed.as_secs_f64());
            }
        }
    });

    let result = run.await;
    ticker.abort();
    eprint!("\r");
    result
}

fn print_summary(summary: &BatchSummary, output: &Output) {
    if output.format != "text" || output.quiet || summary.total <= 1 {
        return;
    }
    println!("\nIdentified {}/{} images", summary.succeeded, summary.total);
    for failure in &summary.failures {
        println!("  failed [{}] {}: {}", failure.index, failure.source, failure.message);
    }
}

/// Identify files, folders and patterns
async fn run_identify(
    config: AppConfig,
    inputs: Vec<PathBuf>,
    recursive: bool,
    no_history: bool,
    output: &Output,
) -> Result<()> {
    let sources = collect_sources(&inputs, &config.capture.formats, recursive)?;
    if sources.is_empty() {
        warn!("No images found in {:?}", inputs);
        return Ok(());
    }

    let profiles = load_profiles(&config)?;
    let orchestrator = build_orchestrator(&config, None)?;
    let history = History::new(PathBuf::from(&config.storage.history_path));
    let sink = ConsoleSink::new((!no_history).then_some(&history), &output.format);

    let options = RunOptions::for_count(sources.len());
    let summary = with_ticker(
        &orchestrator,
        &config,
        output.show_ticker(),
        orchestrator.run(sources, &profiles, &sink, options),
    )
    .await?;

    sink.finish()?;
    print_summary(&summary, output);
    Ok(())
}

/// Identify frames from the camera, always releasing it afterwards
async fn run_camera(
    config: AppConfig,
    shots: usize,
    device: Option<String>,
    no_history: bool,
    output: &Output,
) -> Result<()> {
    if shots == 0 {
        return Ok(());
    }

    let profiles = load_profiles(&config)?;
    let orchestrator = build_orchestrator(&config, device.as_deref())?;
    let history = History::new(PathBuf::from(&config.storage.history_path));
    let sink = ConsoleSink::new((!no_history).then_some(&history), &output.format);

    orchestrator.switch_mode(CaptureMode::Camera).await?;

    let result = with_ticker(
        &orchestrator,
        &config,
        output.show_ticker(),
        orchestrator.run(
            vec![ImageSource::Camera; shots],
            &profiles,
            &sink,
            RunOptions::for_count(shots),
        ),
    )
    .await;

    orchestrator.release_capture().await;

    let summary = result?;
    sink.finish()?;
    print_summary(&summary, output);
    Ok(())
}

/// Run profile commands
async fn run_profile_command(config: AppConfig, action: ProfileCommands) -> Result<()> {
    let store = ProfileStore::new(PathBuf::from(&config.storage.profiles_path));

    match action {
        ProfileCommands::List => {
            let profiles = store.load()?;
            println!("Reference profiles ({}):", profiles.len());
            for p in profiles {
                println!(
                    "  {}  {} ({}){} - {} samples, added {}",
                    p.id,
                    p.common_name,
                    if p.scientific_name.is_empty() { "-" } else { p.scientific_name.as_str() },
                    if p.is_invasive { " [invasive]" } else { "" },
                    p.sample_images.len(),
                    p.created_at.format("%Y-%m-%d")
                );
            }
        }
        ProfileCommands::Add { folder, name, scientific, invasive, notes, recursive } => {
            let listing = enumerate_folder(
                &folder,
                &config.capture.formats,
                recursive,
                &config.capture.default_label,
            )?;
            if listing.files.is_empty() {
                return Err(VerdantError::Profile(format!("No images found in {:?}", folder)));
            }

            let mut samples = Vec::with_capacity(listing.files.len());
            for file in &listing.files {
                samples.push(read_image_file(file).await?);
            }

            let profile = store.add(NewProfile {
                common_name: name.unwrap_or(listing.label),
                scientific_name: scientific,
                is_invasive: invasive,
                notes: notes.unwrap_or_default(),
                sample_images: samples,
            })?;
            println!(
                "Added {} ({}) with {} samples",
                profile.common_name,
                profile.id,
                profile.sample_images.len()
            );
        }
        ProfileCommands::Remove { id } => {
            if store.remove(&id)? {
                println!("Removed profile {}", id);
            } else {
                println!("No profile with id {}", id);
            }
        }
    }

    Ok(())
}

/// Run history commands
async fn run_history_command(config: AppConfig, action: HistoryCommands) -> Result<()> {
    let history = History::new(PathBuf::from(&config.storage.history_path));

    match action {
        HistoryCommands::List { count } => {
            let records = history.get_recent(count)?;
            println!("Recent identifications ({}):", records.len());
            for record in records {
                let mut marks = String::new();
                if record.is_favorite {
                    marks.push_str(" [favorite]");
                }
                if record.is_incorrect {
                    marks.push_str(" [incorrect]");
                }
                println!(
                    "  {} {} {}{}",
                    record.captured_at.format("%Y-%m-%d %H:%M"),
                    record.id,
                    describe(&record),
                    marks
                );
            }
        }
        HistoryCommands::Favorite { id } => {
            let value = history.toggle_flag(&id, RecordFlag::Favorite)?;
            println!("{} favorite: {}", id, value);
        }
        HistoryCommands::Incorrect { id } => {
            let value = history.toggle_flag(&id, RecordFlag::Incorrect)?;
            println!("{} incorrect: {}", id, value);
        }
        HistoryCommands::Delete { id } => {
            if history.delete(&id)? {
                println!("Deleted {}", id);
            } else {
                println!("No record with id {}", id);
            }
        }
        HistoryCommands::Export { output } => {
            let count = history.export(&output)?;
            println!("Exported {} records to {:?}", count, output);
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing history");
                return Ok(());
            }
            history.clear()?;
            println!("History cleared");
        }
    }

    Ok(())
}

/// Run config commands
async fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Classifier: {} ({})", config.classifier.url, config.classifier.model);
            println!("  Geolocation timeout: {} ms", config.geolocation.timeout_ms);
            println!("  Profiles: {}", config.storage.profiles_path);
            println!("  History: {}", config.storage.history_path);
        }
    }

    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    let client = OllamaClient::new(
        &config.classifier.url,
        Duration::from_secs(config.classifier.connect_timeout_secs),
    )?;

    println!("Verdant v0.1.0 Status");
    println!("=====================");

    match client.health_check().await {
        Ok(()) => println!("Ollama: Running at {}", client.base_url()),
        Err(e) => println!("Ollama: Error - {}", e),
    }

    match client.list_models().await {
        Ok(models) => {
            println!("\nAvailable models:");
            for m in &models {
                let marker = if m.starts_with(config.classifier.model.as_str()) { "→" } else { " " };
                println!("  {} {}", marker, m);
            }
        }
        Err(e) => println!("  Error listing models: {}", e),
    }

    match ProfileStore::new(PathBuf::from(&config.storage.profiles_path)).load() {
        Ok(profiles) => println!("\nProfiles ({}): {}", config.storage.profiles_path, profiles.len()),
        Err(e) => println!("\nProfiles: Error - {}", e),
    }
    match History::new(PathBuf::from(&config.storage.history_path)).read_all() {
        Ok(records) => println!("History ({}): {}", config.storage.history_path, records.len()),
        Err(e) => println!("History: Error - {}", e),
    }

    let location = match &config.geolocation.source {
        LocationSource::None => "none".to_string(),
        LocationSource::Fixed { lat, lng } => format!("fixed {:.5},{:.5}", lat, lng),
        LocationSource::Http { url } => format!("http {}", url),
    };
    println!("\nConfiguration:");
    println!("  Model: {}", config.classifier.model);
    println!("  Location: {} (timeout {} ms)", location, config.geolocation.timeout_ms);
    println!("  Camera: {} ({})", config.capture.camera_device, config.capture.camera_input_format);

    Ok(())
}

/// Initialize a new Verdant project
async fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        return Err(VerdantError::Config(
            "config.json already exists. Use --force to overwrite".to_string(),
        ));
    }

    std::fs::create_dir_all(&target)?;

    let mut config = AppConfig::default();
    config.storage.profiles_path = target.join("verdant_profiles.json").to_string_lossy().to_string();
    config.storage.history_path = target.join("verdant_history.jsonl").to_string_lossy().to_string();
    config.save(&config_path)?;

    let profiles_path = Path::new(&config.storage.profiles_path);
    if !profiles_path.exists() {
        std::fs::write(profiles_path, "[]")?;
    }

    println!("Verdant initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - verdant_profiles.json");
    println!("\nNext steps:");
    println!("  1. Start Ollama and pull a vision model: ollama pull {}", config.classifier.model);
    println!("  2. Add reference plants: verdant profiles add ./photos/knotweed --invasive");
    println!("  3. Identify: verdant identify ./field-photos");

    Ok(())
}
