//! Group-level motion statistics and the Total Motion Index.
//!
//! TMI follows Yendiki et al. (2013): every motion metric is standardized as
//! `(x - median) / IQR` across the batch, and TMI is the mean of the
//! standardized metrics. A metric only contributes when it is defined for
//! every record, which drops metrics with zero spread (for example
//! `PercentBadSlices` when most subjects have none).

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use super::outputs::{find_unique, output_units, unit_output_dir};
use super::{MOTION_DIR, MOTION_FILE};
use crate::error::{PipelineError, Result};

/// Metrics combined into TMI, in output order.
pub const MOTION_METRICS: [&str; 4] = [
    "AvgTranslation",
    "AvgRotation",
    "PercentBadSlices",
    "AvgDropoutScore",
];

/// One row of a participant's motion file.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionRecord {
    pub participant_id: String,
    pub session_id: Option<String>,
    /// Columns as read, in file order.
    pub fields: Vec<(String, String)>,
}

impl MotionRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Numeric value of a metric; NaN when absent or unparsable.
    pub fn metric(&self, name: &str) -> f64 {
        self.field(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(f64::NAN)
    }
}

/// Standardized metrics and TMI for a batch of records.
#[derive(Debug, Clone, PartialEq)]
pub struct TmiResult {
    /// `z_scores[i][m]` is metric `MOTION_METRICS[m]` of record `i`.
    pub z_scores: Vec<[f64; 4]>,
    /// TMI per record; NaN when no metric contributes.
    pub tmi: Vec<f64>,
    /// Contributing metric columns (`<metric>_z`).
    pub contributing: Vec<String>,
}

impl TmiResult {
    /// `TMI based on <m1_z>, <m2_z>, ...`
    pub fn info(&self) -> String {
        format!("TMI based on {}", self.contributing.join(", "))
    }
}

/// Summary of a motion aggregation run.
#[derive(Debug, Clone, Serialize)]
pub struct MotionStatsReport {
    pub output_file: PathBuf,
    pub records: usize,
    /// Units without a motion file.
    pub skipped: Vec<String>,
    pub tmi_info: String,
}

/// Quantile with linear interpolation between order statistics, ignoring
/// undefined values. NaN for an empty input.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Standardizes `values` as `(x - median) / (Q3 - Q1)`.
pub fn standardize(values: &[f64]) -> Vec<f64> {
    let q1 = quantile(values, 0.25);
    let median = quantile(values, 0.5);
    let q3 = quantile(values, 0.75);
    values.iter().map(|v| (v - median) / (q3 - q1)).collect()
}

/// Computes standardized metrics and TMI for every record.
pub fn calculate_tmi(records: &[MotionRecord]) -> TmiResult {
    let mut z_scores = vec![[f64::NAN; 4]; records.len()];
    let mut contributing = Vec::new();

    for (m, metric) in MOTION_METRICS.iter().enumerate() {
        let values: Vec<f64> = records.iter().map(|r| r.metric(metric)).collect();
        let z = standardize(&values);
        for (row, value) in z.iter().enumerate() {
            z_scores[row][m] = *value;
        }
        if z.iter().all(|v| v.is_finite()) {
            contributing.push(m);
        }
    }

    let tmi = z_scores
        .iter()
        .map(|row| {
            if contributing.is_empty() {
                return f64::NAN;
            }
            contributing.iter().map(|&m| row[m]).sum::<f64>() / contributing.len() as f64
        })
        .collect();

    TmiResult {
        z_scores,
        tmi,
        contributing: contributing
            .into_iter()
            .map(|m| format!("{}_z", MOTION_METRICS[m]))
            .collect(),
    }
}

/// Reads a space-separated motion file with a header row.
pub fn load_motion_file(
    path: &Path,
    subject: &str,
    session: Option<&str>,
) -> Result<Vec<MotionRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(PipelineError::malformed(path, "missing header row"));
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        records.push(MotionRecord {
            participant_id: subject.to_string(),
            session_id: session.map(str::to_string),
            fields: headers
                .iter()
                .cloned()
                .zip(row.iter().map(str::to_string))
                .collect(),
        });
    }
    Ok(records)
}

/// Locates the single motion file of a subject or longitudinal session.
pub fn find_motion_file(
    output_dir: &Path,
    subject: &str,
    session: Option<&str>,
) -> Result<Option<PathBuf>> {
    let dmri = output_dir
        .join(unit_output_dir(subject, session))
        .join("dmri");
    let name = Regex::new(r"^dwi_motion.*\.txt$")?;
    let pattern = dmri.join("dwi_motion*.txt").display().to_string();
    find_unique(&dmri, &name, None, &pattern)
}

/// Collects the motion records of all subjects and their sessions.
///
/// A missing motion file skips that unit with a warning. More than one match
/// aborts the whole aggregation.
pub fn collect_motion_records(
    output_dir: &Path,
    subjects: &[String],
) -> Result<(Vec<MotionRecord>, Vec<String>)> {
    let mut records = Vec::new();
    let mut skipped = Vec::new();

    for subject in subjects {
        for session in output_units(output_dir, subject)? {
            let unit = unit_output_dir(subject, session.as_deref());
            let file = match find_motion_file(output_dir, subject, session.as_deref())? {
                Some(file) => file,
                None => {
                    warn!(subject = %subject, unit = %unit, "Missing motion file; skipping");
                    skipped.push(unit);
                    continue;
                }
            };
            match load_motion_file(&file, subject, session.as_deref()) {
                Ok(rows) => records.extend(rows),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(subject = %subject, unit = %unit, error = %e, "Unreadable motion file; skipping");
                    skipped.push(unit);
                }
            }
        }
    }
    Ok((records, skipped))
}

fn format_value(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        String::new()
    }
}

/// Writes the motion table with standardized metrics and TMI.
pub fn write_motion_table(path: &Path, records: &[MotionRecord], tmi: &TmiResult) -> Result<()> {
    let with_sessions = records.iter().any(|r| r.session_id.is_some());

    let mut data_columns: Vec<String> = Vec::new();
    for record in records {
        for (name, _) in &record.fields {
            if !data_columns.contains(name) {
                data_columns.push(name.clone());
            }
        }
    }

    let mut header = vec!["participant_id".to_string()];
    if with_sessions {
        header.push("session_id".to_string());
    }
    header.extend(data_columns.iter().cloned());
    header.extend(MOTION_METRICS.iter().map(|m| format!("{}_z", m)));
    header.push("TMI".to_string());
    header.push("TMI_info".to_string());

    let info = tmi.info();
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(&header)?;
    for (i, record) in records.iter().enumerate() {
        let mut row = vec![record.participant_id.clone()];
        if with_sessions {
            row.push(record.session_id.clone().unwrap_or_default());
        }
        for column in &data_columns {
            row.push(record.field(column).unwrap_or_default().to_string());
        }
        row.extend(tmi.z_scores[i].iter().map(|z| format_value(*z)));
        row.push(format_value(tmi.tmi[i]));
        row.push(info.clone());
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Aggregates motion files into `00_group1_motion_stats/group_motion.tsv`.
pub fn group_level_motion_stats(output_dir: &Path, subjects: &[String]) -> Result<MotionStatsReport> {
    let (records, skipped) = collect_motion_records(output_dir, subjects)?;
    let tmi = calculate_tmi(&records);

    let dir = output_dir.join(MOTION_DIR);
    fs::create_dir_all(&dir)?;
    let output_file = dir.join(MOTION_FILE);
    write_motion_table(&output_file, &records, &tmi)?;

    info!(
        output = %output_file.display(),
        records = records.len(),
        skipped = skipped.len(),
        tmi = %tmi.info(),
        "Wrote group motion stats"
    );

    Ok(MotionStatsReport {
        output_file,
        records: records.len(),
        skipped,
        tmi_info: tmi.info(),
    })
}
