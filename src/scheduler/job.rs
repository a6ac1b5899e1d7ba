//! Job definitions for the stage scheduler.
//!
//! This module defines the core job types used by the stage driver:
//!
//! - `Stage`: one of the three TRACULA processing stages
//! - `StageSelection`: which stages a run executes
//! - `JobSegment`: an ordered batch of commands with one dispatch mode
//! - `JobPlan`: the segments of one stage for one subject, in order

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Sentinel accepted in a stage list meaning every stage.
pub const ALL_STAGES_SENTINEL: &str = "all";

/// TRACULA processing stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Preprocessing and registration.
    Prep,
    /// Fiber orientation estimation.
    Bedp,
    /// Pathway reconstruction.
    Path,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Prep, Stage::Bedp, Stage::Path];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prep => "prep",
            Stage::Bedp => "bedp",
            Stage::Path => "path",
        }
    }

    /// Name of the job file `trac-all` writes for this stage.
    pub fn job_file_name(&self) -> String {
        format!("{}.jobs", self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prep" => Ok(Stage::Prep),
            "bedp" => Ok(Stage::Bedp),
            "path" => Ok(Stage::Path),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

/// Set of stages to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSelection {
    stages: BTreeSet<Stage>,
}

impl StageSelection {
    pub fn all() -> Self {
        Self {
            stages: Stage::ALL.into_iter().collect(),
        }
    }

    pub fn only(stages: &[Stage]) -> Self {
        Self {
            stages: stages.iter().copied().collect(),
        }
    }

    /// Parses stage names. `all` anywhere selects every stage; an empty list
    /// also selects every stage.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> std::result::Result<Self, String> {
        if names.is_empty() || names.iter().any(|n| n.as_ref() == ALL_STAGES_SENTINEL) {
            return Ok(Self::all());
        }
        let stages = names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<std::result::Result<BTreeSet<Stage>, _>>()?;
        Ok(Self { stages })
    }

    pub fn includes(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    /// Selected stages in execution order.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages.iter().copied()
    }
}

impl Default for StageSelection {
    fn default() -> Self {
        Self::all()
    }
}

/// How the commands of a segment are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// Concurrently through the worker pool, in no particular order.
    Parallel,
    /// One after another, stopping at the first failure.
    Sequential,
}

/// An ordered batch of commands sharing one dispatch mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSegment {
    pub name: String,
    pub commands: Vec<String>,
    pub dispatch: Dispatch,
}

impl JobSegment {
    pub fn parallel(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            commands,
            dispatch: Dispatch::Parallel,
        }
    }

    pub fn sequential(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            commands,
            dispatch: Dispatch::Sequential,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// The commands of one stage for one subject, split into segments that run
/// strictly one after another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    pub subject: String,
    pub stage: Stage,
    pub segments: Vec<JobSegment>,
}

impl JobPlan {
    /// All commands but the last run in parallel; the last (the subject-level
    /// base step) runs alone after them.
    pub fn prep(subject: impl Into<String>, mut commands: Vec<String>) -> Self {
        let mut segments = Vec::new();
        if let Some(last) = commands.pop() {
            if !commands.is_empty() {
                segments.push(JobSegment::parallel("main", commands));
            }
            segments.push(JobSegment::sequential("base", vec![last]));
        }
        Self {
            subject: subject.into(),
            stage: Stage::Prep,
            segments,
        }
    }

    /// `pre` setup commands, then the main body, then `post`. Empty segments
    /// are dropped.
    pub fn bedp(
        subject: impl Into<String>,
        pre: Vec<String>,
        main: Vec<String>,
        post: Vec<String>,
    ) -> Self {
        let segments = vec![
            JobSegment::sequential("pre", pre),
            JobSegment::parallel("main", main),
            JobSegment::parallel("post", post),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
        Self {
            subject: subject.into(),
            stage: Stage::Bedp,
            segments,
        }
    }

    /// Every command in one parallel segment.
    pub fn path(subject: impl Into<String>, commands: Vec<String>) -> Self {
        let segments = if commands.is_empty() {
            Vec::new()
        } else {
            vec![JobSegment::parallel("main", commands)]
        };
        Self {
            subject: subject.into(),
            stage: Stage::Path,
            segments,
        }
    }

    /// A single sequential segment, used by the direct strategy.
    pub fn direct(subject: impl Into<String>, stage: Stage, commands: Vec<String>) -> Self {
        let segments = if commands.is_empty() {
            Vec::new()
        } else {
            vec![JobSegment::sequential("direct", commands)]
        };
        Self {
            subject: subject.into(),
            stage,
            segments,
        }
    }

    pub fn command_count(&self) -> usize {
        self.segments.iter().map(|s| s.commands.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.command_count() == 0
    }

    pub fn segment(&self, name: &str) -> Option<&JobSegment> {
        self.segments.iter().find(|s| s.name == name)
    }
}

/// Splits job file content into commands.
///
/// Commands are separated by newlines, and additionally by `;` when
/// `semicolons` is set (the prep job file). Blank entries and `#` comments
/// are skipped.
pub fn parse_job_commands(content: &str, semicolons: bool) -> Vec<String> {
    content
        .lines()
        .flat_map(|line| {
            if semicolons {
                line.split(';').collect::<Vec<_>>()
            } else {
                vec![line]
            }
        })
        .map(str::trim)
        .filter(|c| !c.is_empty() && !c.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Reads and parses a job file.
pub fn read_job_file(path: &Path, semicolons: bool) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| PipelineError::malformed(path, format!("cannot read job file: {}", e)))?;
    Ok(parse_job_commands(&content, semicolons))
}

/// Like [`read_job_file`], treating a missing file as empty.
pub fn read_optional_job_file(path: &Path, semicolons: bool) -> Result<Vec<String>> {
    if path.exists() {
        read_job_file(path, semicolons)
    } else {
        Ok(Vec::new())
    }
}
