// src/lib.rs

pub mod assets;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod host;
pub mod logging;
pub mod supervisor;
pub mod types;
pub mod update;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::assets::{AssetSource, DirAssetSource, EmptyAssetSource};
use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::engine::orchestrator::decide;
use crate::engine::{
    Collaborators, ControlEvent, ControlQueue, Orchestrator, OrchestratorOptions, Runtime,
    StartDecision, StartRequest,
};
use crate::host::{ConfigResolver, FilePayloadStore, JobResolver, LogPresenter, PayloadStore};
use crate::supervisor::TracingSink;
use crate::update::{DirectoryInstaller, FileDownloader};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - host capabilities (resolver, presenter, payload store)
/// - download / install collaborators
/// - orchestrator + runtime loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    let store = FilePayloadStore::new(cfg.payload_path());

    if args.dry_run {
        print_dry_run(&cfg, args.payload.or_else(|| store.load()).as_deref());
        return Ok(());
    }

    let collab = Collaborators {
        resolver: Arc::new(ConfigResolver::new(cfg.clone())),
        downloader: Arc::new(FileDownloader::new()),
        installer: Arc::new(DirectoryInstaller::new(cfg.install_dir())),
        presenter: Arc::new(LogPresenter),
        store: Arc::new(store),
        assets: asset_source(&cfg),
        sink: Arc::new(TracingSink),
    };

    let options = OrchestratorOptions {
        installed_version: cfg.service.installed_version.clone(),
        asset_marker: cfg.asset_marker(),
        download_dir: cfg.download_dir(),
        poll_interval: cfg.poll_interval(),
        title: cfg.update_title(),
        exit_when_stopped: cfg.service.exit_when_stopped,
    };

    let (control, control_rx) = ControlQueue::new();
    let orchestrator = Orchestrator::new(collab, options, control.clone());

    // Ctrl-C → destroy.
    {
        let control = control.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; shutting down");
            control.post(ControlEvent::Destroy);
        });
    }

    control.post(ControlEvent::Start(StartRequest {
        payload: args.payload,
    }));

    let runtime = Runtime::new(orchestrator, control_rx);
    runtime.run().await?;
    Ok(())
}

fn asset_source(cfg: &ConfigFile) -> Arc<dyn AssetSource> {
    match &cfg.daemon.assets_dir {
        Some(dir) => Arc::new(DirAssetSource::new(dir.clone())),
        None => Arc::new(EmptyAssetSource),
    }
}

/// Print what a start request with `payload` would do, without doing it.
fn print_dry_run(cfg: &ConfigFile, payload: Option<&str>) {
    let installed = &cfg.service.installed_version;
    let resolver = ConfigResolver::new(cfg.clone());

    println!("warden dry-run");
    println!("  installed_version = {installed}");
    println!("  payload = {}", payload.unwrap_or("<none>"));
    println!();

    match decide(&resolver, installed, payload) {
        Ok(StartDecision::Daemon(spec)) => {
            println!("daemon:");
            println!("  tag: {}", spec.tag());
            println!("  cmd: {:?}", spec.cmd());
            if let Some(cwd) = spec.cwd() {
                println!("  cwd: {}", cwd.display());
            }
            println!("  retries: {} (delay {:?})", spec.retries(), spec.retry_delay());
            let codes = spec.exit_codes();
            println!(
                "  exit codes: end={:?} skip={:?} start={:?}",
                codes.end, codes.skip, codes.start
            );
            for (source, destination) in spec.assets() {
                println!("  asset: {source} -> {}", destination.display());
            }
        }
        Ok(StartDecision::Update(version)) => {
            println!("update:");
            println!("  {installed} -> {version}");
            if let Some(uri) = resolver.update_download_uri(&version) {
                println!("  from: {uri}");
            }
            println!("  into: {}", cfg.download_dir().display());
        }
        Err(err) => println!("start request would fail: {err:#}"),
    }

    debug!("dry-run complete (no execution)");
}
