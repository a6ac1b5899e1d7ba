//! Participant-level processing loop.
//!
//! Subjects are processed strictly one after another:
//!
//! 1. Minimal data check (subject, then sessions)
//! 2. FreeSurfer prerequisites, remediated once through `run_freesurfer.py`
//! 3. Input discovery per unit; a unit without inputs or reconstruction is
//!    dropped and the remaining units go on
//! 4. dmrirc generation
//! 5. Stage driver
//!
//! A failure for one subject is logged and the loop moves on, unless the
//! error is fatal (a failed external command or an inconsistent output tree).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::config::PipelineConfig;
use crate::dataset::study_mode::{session_dir, subject_dir};
use crate::dataset::{DatasetIndex, FileQuery, StudyMode};
use crate::discovery::{
    check_minimal_data_reqs, DataDiscoverer, FallbackAudit, SubjectData, SubjectSessionUnit,
};
use crate::dmrirc::create_dmrirc;
use crate::error::{PipelineError, Result};
use crate::runner::{CommandRunner, ShellCommand};
use crate::scheduler::StageDriver;

/// A subject that was not processed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSubject {
    pub subject: String,
    pub reason: String,
}

/// Outcome of a participant-level run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub study_mode: StudyMode,
    pub processed: Vec<String>,
    pub skipped: Vec<SkippedSubject>,
    /// Number of dataset-root gradient files that were used as fallback.
    pub fallback_gradient_files: usize,
    /// External stage commands dispatched through the worker pool.
    pub commands_run: u64,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

/// Result of processing one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectStatus {
    /// Stages ran for these units.
    Processed { units: Vec<String>, dmrirc: PathBuf },
    /// Not enough data to start.
    Skipped(String),
}

/// Drives every selected subject through the participant-level stages.
pub struct ParticipantPipeline {
    config: PipelineConfig,
    index: Arc<dyn DatasetIndex>,
    runner: Arc<dyn CommandRunner>,
    driver: StageDriver,
}

impl ParticipantPipeline {
    pub fn new(
        config: PipelineConfig,
        index: Arc<dyn DatasetIndex>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let driver = StageDriver::new(
            Arc::clone(&runner),
            config.tools.clone(),
            config.output_dir.clone(),
            config.n_cpus,
            config.strategy,
        );
        Self {
            config,
            index,
            runner,
            driver,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Command that reconstructs a subject with the FreeSurfer BIDS-App.
    pub fn freesurfer_command(&self, subject: &str) -> String {
        let mut command = format!(
            "{} {} {} participant --participant_label {} --license_key {} --n_cpus {}",
            self.config.tools.run_freesurfer,
            self.config.bids_dir.display(),
            self.config.freesurfer_dir().display(),
            subject,
            self.config.license_key,
            self.config.n_cpus
        );
        if self.config.freesurfer_tests_only {
            command.push_str(" --steps cross-sectional --stages autorecon1");
        }
        command
    }

    /// Processes `subjects` in order.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error. Non-fatal errors skip the subject.
    pub async fn run(&self, subjects: &[String]) -> Result<RunSummary> {
        let start = Instant::now();
        let study_mode = StudyMode::resolve(self.index.as_ref());
        info!(
            study_mode = %study_mode,
            subjects = subjects.len(),
            stages = ?self.config.stages.stages().collect::<Vec<_>>(),
            "Starting participant level"
        );

        let mut audit = FallbackAudit::new();
        let mut processed = Vec::new();
        let mut skipped = Vec::new();

        for subject in subjects {
            match self.process_subject(subject, study_mode, &mut audit).await {
                Ok(SubjectStatus::Processed { units, .. }) => {
                    info!(subject = %subject, units = units.len(), "Subject complete");
                    processed.push(subject.clone());
                }
                Ok(SubjectStatus::Skipped(reason)) => {
                    warn!(subject = %subject, reason = %reason, "Skipping subject");
                    skipped.push(SkippedSubject {
                        subject: subject.clone(),
                        reason,
                    });
                }
                Err(e) if e.is_fatal() => {
                    error!(subject = %subject, error = %e, "Fatal error; aborting run");
                    return Err(e);
                }
                Err(e) => {
                    warn!(subject = %subject, error = %e, "Skipping subject");
                    skipped.push(SkippedSubject {
                        subject: subject.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(RunSummary {
            study_mode,
            processed,
            skipped,
            fallback_gradient_files: audit.len(),
            commands_run: self.driver.pool().stats().total_processed(),
            duration_ms: start.elapsed().as_millis() as u64,
            finished_at: Utc::now(),
        })
    }

    /// Runs the whole participant chain for one subject.
    pub async fn process_subject(
        &self,
        subject: &str,
        study_mode: StudyMode,
        audit: &mut FallbackAudit,
    ) -> Result<SubjectStatus> {
        let requested = if self.config.session_labels.is_empty() {
            None
        } else {
            Some(self.config.session_labels.as_slice())
        };
        let eligibility = check_minimal_data_reqs(self.index.as_ref(), subject, requested);
        if !eligibility.eligible {
            return Ok(SubjectStatus::Skipped(
                "no DWI and T1w images for the requested data".to_string(),
            ));
        }

        let sessions: Vec<Option<String>> = if !study_mode.is_longitudinal() {
            vec![None]
        } else if !eligibility.sessions.is_empty() {
            eligibility.sessions.into_iter().map(Some).collect()
        } else if requested.is_none()
            && self
                .index
                .sessions(&FileQuery::new().subject(subject))
                .is_empty()
        {
            // Sessionless subject in a longitudinal dataset: one bare unit.
            vec![None]
        } else {
            return Ok(SubjectStatus::Skipped(
                "no session with DWI and T1w images".to_string(),
            ));
        };

        let discoverer =
            DataDiscoverer::new(self.index.as_ref(), self.config.freesurfer_dir(), study_mode);
        self.remediate_freesurfer(&discoverer, subject, &sessions)
            .await?;

        let mut units = Vec::with_capacity(sessions.len());
        let mut first_error = None;
        for session in &sessions {
            let session = session.as_deref();
            match self.discover_unit(&discoverer, subject, session) {
                Ok((unit, data)) => {
                    if data.gradient_fallback {
                        audit.record_data(&unit.name(), &data, &self.config.bids_dir);
                    }
                    units.push(unit);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        subject,
                        unit = %unit_name(subject, session),
                        error = %e,
                        "Dropping unit"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        if units.is_empty() {
            return match first_error {
                Some(e) => Err(e),
                None => Ok(SubjectStatus::Skipped("no usable unit".to_string())),
            };
        }

        let dmrirc = create_dmrirc(
            self.config.freesurfer_dir(),
            &self.config.output_dir,
            subject,
            &units,
        )?;
        self.driver
            .run_stages(subject, &dmrirc, &units, &self.config.stages)
            .await?;

        Ok(SubjectStatus::Processed {
            units: units.iter().map(SubjectSessionUnit::name).collect(),
            dmrirc,
        })
    }

    /// Verifies the reconstructions of one unit and collects its inputs.
    fn discover_unit(
        &self,
        discoverer: &DataDiscoverer<'_>,
        subject: &str,
        session: Option<&str>,
    ) -> Result<(SubjectSessionUnit, SubjectData)> {
        discoverer.verify_prerequisites(subject, session)?;
        let data = discoverer.get_data(subject, session)?;
        let unit = match session {
            Some(s) => SubjectSessionUnit::longitudinal(subject, s, data.clone()),
            None => SubjectSessionUnit::cross_sectional(subject, data.clone()),
        };
        Ok((unit, data))
    }

    /// Runs FreeSurfer once when any unit lacks a reconstruction. Units that
    /// are still incomplete afterwards fail their own prerequisite check.
    async fn remediate_freesurfer(
        &self,
        discoverer: &DataDiscoverer<'_>,
        subject: &str,
        sessions: &[Option<String>],
    ) -> Result<()> {
        let missing: Vec<String> = sessions
            .iter()
            .flat_map(|s| discoverer.missing_prerequisites(subject, s.as_deref()))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        info!(subject, missing = ?missing, "FreeSurfer reconstruction missing; running FreeSurfer");
        self.runner
            .run(&ShellCommand::new(self.freesurfer_command(subject)))
            .await?;
        Ok(())
    }
}

fn unit_name(subject: &str, session: Option<&str>) -> String {
    match session {
        Some(s) => session_dir(subject, s),
        None => subject_dir(subject),
    }
}
