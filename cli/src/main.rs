//! cloudscan CLI: operator entry point for distributed cloud scans.
//!
//! # Usage
//!
//! ```text
//! cloudscan scan -t example.com -f general
//! cloudscan scan -T targets.txt -c 5 --chunk
//! cloudscan report
//! cloudscan resume osmedeus-1a2b3c4d
//! cloudscan cleanup
//! cloudscan image build
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cloudscan_core::chunk::split_into_files;
use cloudscan_core::provider::ProviderAction;
use cloudscan_core::rig::dispatch::{Dispatcher, TargetOutcome};
use cloudscan_core::rig::orchestrator::{CloudRunner, Collaborators};
use cloudscan_core::store::runtime::RuntimeStore;
use cloudscan_core::types::config::{parse_interval, CloudConfig};


#[derive(Parser, Debug)]
#[command(name = "cloudscan", version, about = "Distributed security scans on ephemeral cloud instances")]
struct Cli {
    /// Configuration file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a distributed scan
    Scan(ScanArgs),
    /// Split a file into line-aligned chunk files
    Split {
        input: PathBuf,
        #[arg(short = 'n', long, default_value_t = 2)]
        parts: usize,
        /// Output directory, defaults to the configured chunk directory
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// List runtime records of local workspaces
    Report {
        #[arg(long)]
        json: bool,
    },
    /// Resume monitoring a launched instance
    Resume { instance_id: String },
    /// Delete every instance with persisted state
    Cleanup,
    /// Provider image actions
    Image {
        #[command(subcommand)]
        action: ImageAction,
    },
}

#[derive(Subcommand, Debug)]
enum ImageAction {
    Build,
    List,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Target to scan (repeatable)
    #[arg(short = 't', long = "target")]
    targets: Vec<String>,
    /// File of targets, one per line (repeatable)
    #[arg(short = 'T', long = "targets")]
    target_files: Vec<PathBuf>,
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,
    #[arg(short = 'm', long)]
    module: Option<String>,
    #[arg(short = 'f', long)]
    flow: Option<String>,
    #[arg(short = 'w', long)]
    workspace: Option<String>,
    /// Extra placeholder parameter, key=value (repeatable)
    #[arg(short = 'p', long = "param")]
    params: Vec<String>,
    /// Raw command template run instead of the synthesized one
    #[arg(long)]
    raw: Option<String>,
    /// Text appended to the synthesized command
    #[arg(long)]
    extra: Option<String>,
    /// Threads of the scanner on the instance
    #[arg(long)]
    threads: Option<u32>,
    /// Polling interval, e.g. 10m
    #[arg(long, value_parser = parse_interval)]
    interval: Option<std::time::Duration>,
    /// Split target files into chunks, one instance per chunk
    #[arg(long)]
    chunk: bool,
    #[arg(long)]
    chunk_parts: Option<usize>,
    #[arg(long)]
    no_delete: bool,
    #[arg(long)]
    no_local_sync: bool,
    #[arg(long)]
    sync_workflow: bool,
    #[arg(long)]
    git_sync: bool,
    /// Do not check the scan process while polling
    #[arg(long)]
    no_ps: bool,
    #[arg(long)]
    retry: Option<u32>,
    #[arg(long)]
    only_create: bool,
    #[arg(long)]
    cleanup_on_failure: bool,
}

impl ScanArgs {
    /// Layer the flags over the file configuration.
    fn apply(&self, cfg: &mut CloudConfig) {
        if let Some(n) = self.concurrency {
            cfg.concurrency = n;
        }
        if self.module.is_some() {
            cfg.scan.module = self.module.clone();
        }
        if self.flow.is_some() {
            cfg.scan.flow = self.flow.clone();
        }
        if self.workspace.is_some() {
            cfg.scan.workspace = self.workspace.clone();
        }
        cfg.scan.params.extend(self.params.iter().cloned());
        if self.raw.is_some() {
            cfg.scan.raw_command = self.raw.clone();
        }
        if self.extra.is_some() {
            cfg.scan.extra = self.extra.clone();
        }
        if let Some(t) = self.threads {
            cfg.scan.remote_threads = t;
        }
        if let Some(i) = self.interval {
            cfg.poll.interval = i;
        }
        if let Some(r) = self.retry {
            cfg.retry.max_attempts = r;
        }
        if let Some(p) = self.chunk_parts {
            cfg.chunk.parts = Some(p);
        }
        cfg.chunk.enabled |= self.chunk;
        cfg.no_delete |= self.no_delete;
        cfg.disable_local_sync |= self.no_local_sync;
        cfg.sync_workflow |= self.sync_workflow;
        cfg.git_sync |= self.git_sync;
        cfg.poll.ignore_process |= self.no_ps;
        cfg.only_create |= self.only_create;
        cfg.cleanup_on_failure |= self.cleanup_on_failure;
    }
}


fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut cfg = load_config(cli.config.clone())?;
    match cli.command {
        Command::Scan(args) => {
            args.apply(&mut cfg);
            cfg.validate()?;
            run_scan(cfg, &args)
        }
        Command::Split { input, parts, dest } => {
            let dest = dest.unwrap_or_else(|| cfg.chunk_dir.clone());
            for file in split_into_files(&input, parts, &dest)? {
                println!("{}", file.display());
            }
            Ok(())
        }
        Command::Report { json } => {
            let records = RuntimeStore::new(&cfg.workspaces_dir).read_all();
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            for r in records {
                println!(
                    "{:<32} {:<8} {:<16} {:<14} {:<24} {}",
                    r.input_name,
                    r.task_type,
                    r.task_name,
                    r.stage,
                    r.instance.as_deref().unwrap_or("-"),
                    r.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        Command::Resume { instance_id } => {
            let report = build_runner(cfg).resume(&instance_id)?;
            println!("ok   {} workspace={}", report.target, report.workspace);
            Ok(())
        }
        Command::Cleanup => {
            let (deleted, failed) = build_runner(cfg).cleanup();
            for id in &deleted {
                println!("deleted {}", id);
            }
            if !failed.is_empty() {
                bail!("{} instance(s) could not be deleted", failed.len());
            }
            Ok(())
        }
        Command::Image { action } => {
            let kind = match action {
                ImageAction::Build => ProviderAction::RunImageBuild,
                ImageAction::List => ProviderAction::ListImages,
            };
            let runner = build_runner(cfg);
            let output = runner
                .provider()
                .action(kind, None)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("provider action '{}' failed", kind))?;
            if !output.trim().is_empty() {
                println!("{}", output.trim_end());
            }
            Ok(())
        }
    }
}


fn run_scan(cfg: CloudConfig, args: &ScanArgs) -> Result<()> {
    if args.targets.is_empty() && args.target_files.is_empty() {
        bail!("no target given, use -t <target> or -T <file>");
    }
    let dispatcher = Dispatcher::new(build_runner(cfg));
    let outcomes = dispatcher.run(&args.targets, &args.target_files);

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    for outcome in &outcomes {
        println!("{}", outcome_line(outcome));
    }
    if failed > 0 {
        bail!("{} of {} scan(s) failed", failed, outcomes.len());
    }
    Ok(())
}

fn outcome_line(outcome: &TargetOutcome) -> String {
    match outcome.result {
        Ok(ref report) => {
            let mut line = format!(
                "ok   {} workspace={} instance={}",
                outcome.target,
                report.workspace,
                report.instance.as_deref().unwrap_or("-")
            );
            if !report.hook_failures.is_empty() {
                line.push_str(&format!(" hook_failures={}", report.hook_failures.len()));
            }
            line
        }
        Err(ref e) => format!("FAIL {}: {}", outcome.target, e),
    }
}

fn build_runner(cfg: CloudConfig) -> CloudRunner {
    let parts = Collaborators::from_config(&cfg);
    CloudRunner::new(Arc::new(cfg), parts)
}


fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `--config`, then `$CLOUDSCAN_CONFIG`, then `~/.cloudscan/config.yaml` if
/// it exists.
fn resolve_config_path(flag: Option<PathBuf>) -> Option<PathBuf> {
    if flag.is_some() {
        return flag;
    }
    if let Ok(path) = std::env::var("CLOUDSCAN_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    let default = PathBuf::from(home).join(".cloudscan").join("config.yaml");
    if default.is_file() {
        Some(default)
    } else {
        None
    }
}

fn load_config(flag: Option<PathBuf>) -> Result<CloudConfig> {
    match resolve_config_path(flag) {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            Ok(CloudConfig::load(&path)?)
        }
        None => Ok(CloudConfig::default()),
    }
}
