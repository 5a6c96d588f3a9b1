use crate::install::{
    label_installation, platform_install_root, InstallationResolver, ResolverConfig,
    VersionOrdering,
};
use crate::model::{ResolvedInstallation, RunEvent, RunOutcome, RunRequest};
use crate::orchestrator::{process_run_completion, ControllerConfig, RunController};
use crate::settings::{Settings, SettingsStore};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "eplaunch-lite",
    version,
    about = "Find an EnergyPlus installation and run simulations with it"
)]
pub struct Cli {
    /// Settings file to use instead of the per-user default
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Show which EnergyPlus installation would be used
    Resolve(ResolveArgs),
    /// Run a simulation and wait for it to finish (Ctrl-C cancels)
    Run(RunArgs),
}

#[derive(Debug, Args, Clone)]
pub struct InstallArgs {
    /// EnergyPlus installation directory to use as-is
    #[arg(long)]
    pub install_root: Option<PathBuf>,

    /// Directory scanned for EnergyPlus-* installations when none is configured
    #[arg(long)]
    pub search_root: Option<PathBuf>,

    /// How version tokens are compared when picking the newest installation
    #[arg(long, value_enum)]
    pub version_order: Option<VersionOrdering>,
}

#[derive(Debug, Args, Clone)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub install: InstallArgs,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Input file (.idf); defaults to the last one used
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Weather file (.epw); defaults to the last one used
    #[arg(long)]
    pub weather: Option<PathBuf>,

    #[command(flatten)]
    pub install: InstallArgs,

    /// Launch this executable instead of resolving an installation
    #[arg(long, conflicts_with = "install_root")]
    pub executable: Option<PathBuf>,

    /// Working directory for the simulation
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Grace period before a cancelled simulation is killed outright (e.g. 10s)
    #[arg(long)]
    pub kill_grace: Option<humantime::Duration>,

    /// Print the run report as JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Export the run report as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Use --remember false to leave the saved file choices untouched
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub remember: bool,
}

/// Run the selected command and return the process exit code.
pub async fn run(args: Cli) -> Result<i32> {
    let store = open_store(args.settings.as_deref());
    let settings = store.as_ref().map(SettingsStore::load).unwrap_or_default();

    match args.command {
        Command::Resolve(resolve) => run_resolve(&resolve, &settings).await,
        Command::Run(run) => run_simulation(run, settings, store.as_ref()).await,
    }
}

fn open_store(path: Option<&Path>) -> Option<SettingsStore> {
    match path {
        Some(p) => Some(SettingsStore::new(p)),
        None => match SettingsStore::default_location() {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!("settings disabled: {}", e);
                None
            }
        },
    }
}

/// Build a resolver from CLI flags, falling back to saved settings.
pub fn resolve_installation(
    args: &InstallArgs,
    settings: &Settings,
) -> Result<ResolvedInstallation> {
    let resolver = InstallationResolver::new(ResolverConfig {
        default_root: args
            .search_root
            .clone()
            .unwrap_or_else(platform_install_root),
        ordering: args.version_order.unwrap_or(settings.version_ordering),
    });
    let root = args.install_root.as_deref().or_else(|| settings.install_root());
    resolver
        .resolve(root)
        .context("failed to scan for EnergyPlus installations")
}

async fn run_resolve(args: &ResolveArgs, settings: &Settings) -> Result<i32> {
    let mut resolved = resolve_installation(&args.install, settings)?;
    label_installation(&mut resolved).await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else if let (true, Some(exe)) = (resolved.valid, resolved.executable.as_ref()) {
        println!("{}", resolved.descriptor());
        println!("Executable: {}", exe.display());
    } else {
        println!("EnergyPlus not found under {}", resolved.root.display());
    }
    Ok(if resolved.valid { 0 } else { 1 })
}

async fn run_simulation(
    args: RunArgs,
    settings: Settings,
    store: Option<&SettingsStore>,
) -> Result<i32> {
    let input = args
        .input
        .clone()
        .or_else(|| settings.last_input.clone())
        .context("no input file given; pass --input")?;
    let weather = args
        .weather
        .clone()
        .or_else(|| settings.last_weather.clone())
        .context("no weather file given; pass --weather")?;
    if !input.is_file() || !weather.is_file() {
        bail!(
            "input and/or weather file paths are invalid: {} / {}",
            input.display(),
            weather.display()
        );
    }

    let executable = match args.executable.clone() {
        Some(exe) => exe,
        None => {
            let mut resolved = resolve_installation(&args.install, &settings)?;
            label_installation(&mut resolved).await;
            match resolved.executable.clone() {
                Some(exe) if resolved.valid => {
                    tracing::info!("using {}", resolved.descriptor());
                    exe
                }
                _ => bail!(
                    "no valid EnergyPlus installation found under {}",
                    resolved.root.display()
                ),
            }
        }
    };

    let mut request = RunRequest::new(executable, input.clone(), weather.clone());
    if let Some(dir) = args.working_dir.clone() {
        request = request.with_working_dir(dir);
    }

    if args.remember {
        if let Some(store) = store {
            let mut updated = settings.clone();
            updated.last_input = Some(input);
            updated.last_weather = Some(weather);
            if let Some(root) = args.install.install_root.as_deref() {
                updated.install_root = root.display().to_string();
            }
            if let Err(e) = store.save(&updated) {
                tracing::warn!("{}", e);
            }
        }
    }

    let kill_grace = args.kill_grace.map(Duration::from).or(settings.kill_grace);
    let mut controller = RunController::new(ControllerConfig { kill_grace });
    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RunEvent>();

    let _run = controller.start(request.clone(), event_tx)?;

    let mut listen_ctrl_c = true;
    let outcome = loop {
        tokio::select! {
            ev = event_rx.recv() => match ev {
                Some(RunEvent::Status(status)) => {
                    if !args.json {
                        let _ = out_tx.send(OutputLine::Stderr(format!(
                            "EnergyPlus {}",
                            status.to_message()
                        )));
                    }
                }
                Some(RunEvent::Finished { outcome }) => break *outcome,
                None => bail!("simulation stopped without reporting an outcome"),
            },
            res = tokio::signal::ctrl_c(), if listen_ctrl_c => match res {
                Ok(()) => {
                    controller.cancel();
                    let _ = out_tx.send(OutputLine::Stderr("Cancelling…".into()));
                }
                Err(e) => {
                    tracing::warn!("cannot listen for Ctrl-C: {}", e);
                    listen_ctrl_c = false;
                }
            },
        }
    };

    let processed = process_run_completion(&request, &outcome, args.export_json.as_deref());
    for msg in processed.export_messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }
    if args.json {
        let out = serde_json::to_string_pretty(&processed.report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        let summary = crate::text_summary::build_text_summary(&processed.report);
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(exit_code(&outcome))
}

/// Process exit code for a run outcome: 0 completed, 1 failed, 130 cancelled.
pub fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed(_) => 0,
        RunOutcome::Failed { .. } => 1,
        RunOutcome::Cancelled(_) => 130,
    }
}
