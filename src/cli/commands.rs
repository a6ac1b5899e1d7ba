//! CLI definition for tracula-bids.
//!
//! Follows the BIDS-App calling convention:
//! `tracula-bids <bids_dir> <output_dir> <participant|group1|group2> [options]`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;

use crate::dataset::BidsLayout;
use crate::group::{group_level_motion_stats, group_level_tract_stats};
use crate::pipeline::{
    group_subjects, participant_subjects, validate_dataset, ParticipantPipeline,
    PipelineConfig, ToolCommands,
};
use crate::runner::{CommandRunner, ShellRunner};
use crate::scheduler::{StageSelection, StageStrategy};

/// BIDS-App analysis level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisLevel {
    /// Run TRACULA for each participant.
    Participant,
    /// Collect motion statistics and compute the total motion index.
    Group1,
    /// Collect per-tract statistics with tractstats2table.
    Group2,
}

/// TRACULA BIDS-App.
#[derive(Parser, Debug)]
#[command(name = "tracula-bids")]
#[command(about = "Run FreeSurfer's TRACULA on a BIDS dataset")]
#[command(version)]
#[command(
    long_about = "tracula-bids reconstructs white-matter pathways with TRACULA for every participant of a BIDS dataset,\nthen aggregates motion and tract statistics at the group level.\n\nExample usage:\n  tracula-bids /data/bids /data/out participant --license_key KEY --participant_label 01 02 --n_cpus 4"
)]
pub struct Cli {
    /// The directory with the input dataset formatted according to the BIDS standard.
    pub bids_dir: PathBuf,

    /// The directory where the output files should be stored.
    pub output_dir: PathBuf,

    /// Level of the analysis that will be performed.
    #[arg(value_enum)]
    pub analysis_level: AnalysisLevel,

    /// FreeSurfer license key.
    #[arg(long = "license_key")]
    pub license_key: String,

    /// Participant labels to analyze (without the "sub-" prefix). All subjects
    /// are analyzed when omitted.
    #[arg(long = "participant_label", num_args = 1..)]
    pub participant_label: Vec<String>,

    /// Session labels to analyze (without the "ses-" prefix). All sessions
    /// with the required data are analyzed when omitted.
    #[arg(long = "session_label", num_args = 1..)]
    pub session_label: Vec<String>,

    /// Directory with existing FreeSurfer reconstructions. Defaults to the output directory.
    #[arg(long = "freesurfer_dir")]
    pub freesurfer_dir: Option<PathBuf>,

    /// TRACULA stages to run.
    #[arg(
        long,
        num_args = 1..,
        default_value = "all",
        value_parser = ["prep", "bedp", "path", "all"]
    )]
    pub stages: Vec<String>,

    /// Number of CPUs used for parallel stage commands.
    #[arg(long = "n_cpus", default_value = "1")]
    pub n_cpus: usize,

    /// Skip BIDS validation.
    #[arg(long = "skip_bids_validator")]
    pub skip_bids_validator: bool,

    /// Only run the first FreeSurfer stage when reconstructions are missing (for tests).
    #[arg(
        long = "run_freesurfer_tests_only",
        alias = "run-freesurfer-tests-only"
    )]
    pub run_freesurfer_tests_only: bool,

    /// Run stages as whole trac-all/bedpostx invocations instead of job files.
    #[arg(long = "direct_stages")]
    pub direct_stages: bool,

    /// Print the run summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Builds the pipeline configuration from the arguments and the
    /// `TRACULA_*` tool overrides.
    pub fn to_config(&self) -> anyhow::Result<PipelineConfig> {
        let stages = StageSelection::from_names(&self.stages)
            .map_err(|e| anyhow::anyhow!("Invalid --stages value: {}", e))?;
        let strategy = if self.direct_stages {
            StageStrategy::Direct
        } else {
            StageStrategy::JobFiles
        };

        let mut config = PipelineConfig::new(&self.bids_dir, &self.output_dir, &self.license_key)
            .with_participant_labels(self.participant_label.clone())
            .with_session_labels(self.session_label.clone())
            .with_stages(stages)
            .with_n_cpus(self.n_cpus)
            .with_strategy(strategy)
            .with_freesurfer_tests_only(self.run_freesurfer_tests_only)
            .with_skip_bids_validator(self.skip_bids_validator)
            .with_tools(ToolCommands::from_env()?);
        if let Some(dir) = &self.freesurfer_dir {
            config = config.with_freesurfer_dir(dir);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = cli.to_config()?;
    config.ensure_output_dir()?;

    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new());
    if !config.skip_bids_validator {
        validate_dataset(runner.as_ref(), &config.tools.bids_validator, &config.bids_dir).await?;
    }

    match cli.analysis_level {
        AnalysisLevel::Participant => run_participant_level(config, runner, cli.json).await,
        AnalysisLevel::Group1 => run_group1_level(&config, cli.json),
        AnalysisLevel::Group2 => run_group2_level(&config, runner.as_ref(), cli.json).await,
    }
}

async fn run_participant_level(
    config: PipelineConfig,
    runner: Arc<dyn CommandRunner>,
    json: bool,
) -> anyhow::Result<()> {
    let index = Arc::new(BidsLayout::index(&config.bids_dir)?);
    let subjects = participant_subjects(&config.participant_labels, index.as_ref());

    let pipeline = ParticipantPipeline::new(config, index, runner);
    let summary = pipeline.run(&subjects).await?;

    if json {
        let output = serde_json::to_string_pretty(&summary)
            .map_err(|e| anyhow::anyhow!("Failed to serialize run summary: {}", e))?;
        println!("{}", output);
    } else {
        info!(
            study_mode = %summary.study_mode,
            processed = summary.processed.len(),
            skipped = summary.skipped.len(),
            commands = summary.commands_run,
            duration_ms = summary.duration_ms,
            "Participant level finished"
        );
    }
    Ok(())
}

fn run_group1_level(config: &PipelineConfig, json: bool) -> anyhow::Result<()> {
    let subjects = group_subjects(&config.participant_labels, &config.output_dir)?;
    let report = group_level_motion_stats(&config.output_dir, &subjects)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!(
            output = %report.output_file.display(),
            records = report.records,
            skipped = report.skipped.len(),
            tmi = %report.tmi_info,
            "Group motion stats finished"
        );
    }
    Ok(())
}

async fn run_group2_level(
    config: &PipelineConfig,
    runner: &dyn CommandRunner,
    json: bool,
) -> anyhow::Result<()> {
    let subjects = group_subjects(&config.participant_labels, &config.output_dir)?;
    let report = group_level_tract_stats(
        runner,
        &config.tools.tractstats2table,
        &config.output_dir,
        &subjects,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!(
            tracts = report.tracts.len(),
            failed = report.failed.len(),
            "Group tract stats finished"
        );
    }
    Ok(())
}
