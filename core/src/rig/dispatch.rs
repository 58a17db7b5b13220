//! Fan-out of scan targets over the worker pool.
//!
//! Plain targets and the lines of target list files each get their own
//! `CloudRunner::run`. In chunk mode every list file is instead split into
//! `chunk_parts` chunk files which are scanned as file-backed targets; the
//! chunks of one input are drained by the pool before the next input is
//! split, and their files are removed afterwards whatever the outcome.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::orchestrator::{CloudRunner, RunReport};
use super::worker::WorkerPool;
use crate::chunk::{remove_chunk_files, split_into_files};
use crate::error::ScanError;


/// Result of one orchestration run.
#[derive(Debug)]
pub struct TargetOutcome {
    pub target: String,
    pub result: Result<RunReport, ScanError>,
}

impl TargetOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Dispatcher {
    runner: CloudRunner,
    pool: WorkerPool,
}

impl Dispatcher {
    pub fn new(runner: CloudRunner) -> Self {
        let pool = WorkerPool::new(runner.config().concurrency);
        Dispatcher { runner, pool }
    }

    /// Scan every target in `targets` and every input in `lists`.
    pub fn run(&self, targets: &[String], lists: &[PathBuf]) -> Vec<TargetOutcome> {
        warn_single_target(self.pool.size(), targets, lists);
        let mut outcomes = Vec::new();

        if !self.runner.config().chunk.enabled {
            let mut all: Vec<String> = targets.to_vec();
            for list in lists {
                match read_target_list(list) {
                    Ok(lines) => all.extend(lines),
                    Err(e) => outcomes.push(TargetOutcome {
                        target: list.display().to_string(),
                        result: Err(e),
                    }),
                }
            }
            outcomes.extend(self.run_all(&all));
            return outcomes;
        }

        if !targets.is_empty() {
            outcomes.extend(self.run_all(targets));
        }
        for list in lists {
            outcomes.extend(self.run_chunked(list));
        }
        outcomes
    }

    fn run_all(&self, targets: &[String]) -> Vec<TargetOutcome> {
        info!(count = targets.len(), workers = self.pool.size(), "dispatching targets");
        self.pool.run(targets, |target| TargetOutcome {
            target: target.clone(),
            result: self.runner.run(target),
        })
    }

    fn run_chunked(&self, list: &Path) -> Vec<TargetOutcome> {
        let config = self.runner.config();
        let parts = config.chunk_parts();
        let files = match split_into_files(list, parts, &config.chunk_dir) {
            Ok(files) => files,
            Err(e) => {
                warn!(input = %list.display(), error = %e, "could not split input");
                return vec![TargetOutcome {
                    target: list.display().to_string(),
                    result: Err(e),
                }];
            }
        };
        info!(input = %list.display(), chunks = files.len(), "input split into chunks");

        let targets: Vec<String> = files
            .iter()
            .map(|f| f.to_string_lossy().into_owned())
            .collect();
        let outcomes = self.run_all(&targets);
        remove_chunk_files(&files);
        outcomes
    }
}

/// Non-empty, trimmed lines of a target list file.
pub fn read_target_list(path: &Path) -> Result<Vec<String>, ScanError> {
    let content = fs::read_to_string(path).map_err(|e| ScanError::InvalidInput {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn warn_single_target(workers: usize, targets: &[String], lists: &[PathBuf]) {
    if workers > 1 && lists.is_empty() && targets.len() == 1 && !Path::new(&targets[0]).is_file() {
        warn!(
            target_count = 1,
            workers,
            "concurrency has no effect on a single target, pass a target list with -T instead"
        );
    }
}
