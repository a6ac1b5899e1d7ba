//! Stage driver: turns a subject's dmrirc into job plans and runs them.
//!
//! Two strategies exist:
//!
//! - [`StageStrategy::JobFiles`]: `trac-all -<stage> -jobs` writes the stage's
//!   commands to job files, which are split into segments and dispatched
//!   through the worker pool.
//! - [`StageStrategy::Direct`]: `trac-all -prep`, per-unit `bedpostx` and
//!   `trac-all -path` are run one after another, each as a single sequential
//!   segment.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::job::{read_job_file, read_optional_job_file, JobPlan, Stage, StageSelection};
use super::worker_pool::WorkerPool;
use crate::dataset::study_mode::{long_session_dir, subject_dir};
use crate::discovery::SubjectSessionUnit;
use crate::error::Result;
use crate::pipeline::ToolCommands;
use crate::runner::{CommandRunner, ShellCommand};

/// Subdirectories bedpostx expects below `<subject>.bedpostX`.
pub const BEDPOSTX_SUBDIRS: &[&str] = &["diff_slices", "logs/monitor", "xfms"];

/// How stages are turned into commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStrategy {
    /// Job files generated by `trac-all -jobs`, dispatched in parallel.
    #[default]
    JobFiles,
    /// Direct sequential invocation with native `bedpostx`.
    Direct,
}

/// Runs the selected stages for one subject.
pub struct StageDriver {
    runner: Arc<dyn CommandRunner>,
    pool: WorkerPool,
    tools: ToolCommands,
    output_dir: PathBuf,
    strategy: StageStrategy,
}

impl StageDriver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        tools: ToolCommands,
        output_dir: impl Into<PathBuf>,
        n_cpus: usize,
        strategy: StageStrategy,
    ) -> Self {
        let pool = match strategy {
            StageStrategy::JobFiles => WorkerPool::new(Arc::clone(&runner), n_cpus),
            StageStrategy::Direct => WorkerPool::sequential(Arc::clone(&runner)),
        };
        Self {
            runner,
            pool,
            tools,
            output_dir: output_dir.into(),
            strategy,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn strategy(&self) -> StageStrategy {
        self.strategy
    }

    /// Runs every selected stage in order. The first failing stage stops the
    /// subject.
    pub async fn run_stages(
        &self,
        subject: &str,
        dmrirc: &Path,
        units: &[SubjectSessionUnit],
        stages: &StageSelection,
    ) -> Result<()> {
        for stage in stages.stages() {
            let plan = match self.strategy {
                StageStrategy::JobFiles => self.job_file_plan(stage, subject, dmrirc).await?,
                StageStrategy::Direct => self.direct_plan(stage, subject, dmrirc, units),
            };

            if plan.is_empty() {
                info!(subject, stage = %stage, "No commands for stage");
                continue;
            }
            if let Some(pre) = plan.segment("pre") {
                prepare_bedpostx_dirs(&pre.commands)?;
            }
            self.pool.run_plan(&plan).await?;
            info!(subject, stage = %stage, "Stage complete");
        }
        Ok(())
    }

    /// `<output_dir>/sub-<id>/<stage>.jobs`
    pub fn job_file_path(&self, subject: &str, stage: Stage) -> PathBuf {
        self.output_dir
            .join(subject_dir(subject))
            .join(stage.job_file_name())
    }

    /// Command that makes `trac-all` write a stage's job file.
    pub fn job_file_command(&self, stage: Stage, dmrirc: &Path, jobs: &Path) -> String {
        format!(
            "{} -{} -c {} -jobs {}",
            self.tools.trac_all,
            stage,
            dmrirc.display(),
            jobs.display()
        )
    }

    /// Generates the stage's job file(s) and splits them into a plan.
    pub async fn job_file_plan(&self, stage: Stage, subject: &str, dmrirc: &Path) -> Result<JobPlan> {
        let jobs = self.job_file_path(subject, stage);
        let command = self.job_file_command(stage, dmrirc, &jobs);
        self.runner.run(&ShellCommand::new(command)).await?;
        debug!(subject, stage = %stage, jobs = %jobs.display(), "Generated job file");

        let plan = match stage {
            Stage::Prep => JobPlan::prep(subject, read_job_file(&jobs, true)?),
            Stage::Bedp => JobPlan::bedp(
                subject,
                read_optional_job_file(&with_suffix(&jobs, ".pre"), false)?,
                read_job_file(&jobs, false)?,
                read_optional_job_file(&with_suffix(&jobs, ".post"), false)?,
            ),
            Stage::Path => JobPlan::path(subject, read_job_file(&jobs, false)?),
        };
        Ok(plan)
    }

    /// Plan of the direct strategy for one stage.
    pub fn direct_plan(
        &self,
        stage: Stage,
        subject: &str,
        dmrirc: &Path,
        units: &[SubjectSessionUnit],
    ) -> JobPlan {
        let commands = match stage {
            Stage::Prep | Stage::Path => vec![format!(
                "{} -{} -c {}",
                self.tools.trac_all,
                stage,
                dmrirc.display()
            )],
            Stage::Bedp => units
                .iter()
                .map(|unit| {
                    let dir = match &unit.session {
                        Some(session) => long_session_dir(&unit.subject, session),
                        None => subject_dir(&unit.subject),
                    };
                    format!(
                        "{} {}/dmri -n 2",
                        self.tools.bedpostx,
                        self.output_dir.join(dir).display()
                    )
                })
                .collect(),
        };
        JobPlan::direct(subject, stage, commands)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Creates the `<p>.bedpostX` subdirectories for every `pre` command, where
/// `<p>` is the command's second whitespace-separated token. Existing
/// directories are left alone. Returns the number of subject paths prepared.
pub fn prepare_bedpostx_dirs(pre_commands: &[String]) -> Result<usize> {
    let mut prepared = 0;
    for command in pre_commands {
        let Some(subject_path) = command.split_whitespace().nth(1) else {
            continue;
        };
        let root = PathBuf::from(format!("{}.bedpostX", subject_path));
        for sub in BEDPOSTX_SUBDIRS {
            let dir = root.join(sub);
            if !dir.is_dir() {
                fs::create_dir_all(&dir)?;
            }
        }
        debug!(path = %root.display(), "Prepared bedpostX directories");
        prepared += 1;
    }
    Ok(prepared)
}
