//! Group-level tract statistics via `tractstats2table`.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::outputs::{find_unique, output_units, unit_output_dir};
use super::{FILE_LIST_DIR, TRACT_DIR};
use crate::error::Result;
use crate::runner::{CommandRunner, ShellCommand};

/// Commissural tracts without hemisphere.
pub const BILATERAL_TRACTS: [&str; 2] = ["fmajor", "fminor"];

pub const HEMISPHERES: [&str; 2] = ["lh", "rh"];

/// Tracts reconstructed once per hemisphere.
pub const LATERAL_TRACTS: [&str; 8] = ["cst", "unc", "ilf", "atr", "ccg", "cab", "slfp", "slft"];

/// Statistics file inside each tract directory.
pub const PATHSTATS_FILE: &str = "pathstats.overall.txt";

/// All 18 tract names: `fmajor`, `fminor`, then `lh.*` and `rh.*`.
pub fn tract_names() -> Vec<String> {
    let mut tracts: Vec<String> = BILATERAL_TRACTS.iter().map(|t| t.to_string()).collect();
    for hemi in HEMISPHERES {
        for tract in LATERAL_TRACTS {
            tracts.push(format!("{}.{}", hemi, tract));
        }
    }
    tracts
}

/// Per-tract outcome of the aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct TractOutcome {
    pub tract: String,
    pub files: usize,
    pub table: PathBuf,
    pub rows: usize,
}

/// Summary of a tract aggregation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TractStatsReport {
    pub tracts: Vec<TractOutcome>,
    /// Tracts that could not be aggregated, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Matches the `<tract>*_avg33_mni_bbr` directory names of one tract.
pub fn tract_dir_pattern(tract: &str) -> Result<Regex> {
    Ok(Regex::new(&format!(
        r"^{}.*_avg33_mni_bbr$",
        regex::escape(tract)
    ))?)
}

/// Locates `<unit>/dpath/<tract>*_avg33_mni_bbr/pathstats.overall.txt`.
/// `dir_pattern` comes from [`tract_dir_pattern`].
pub fn find_pathstats_file(
    output_dir: &Path,
    subject: &str,
    session: Option<&str>,
    tract: &str,
    dir_pattern: &Regex,
) -> Result<Option<PathBuf>> {
    let dpath = output_dir
        .join(unit_output_dir(subject, session))
        .join("dpath");
    let pattern = dpath
        .join(format!("{}*_avg33_mni_bbr", tract))
        .join(PATHSTATS_FILE)
        .display()
        .to_string();
    find_unique(&dpath, dir_pattern, Some(PATHSTATS_FILE), &pattern)
}

/// Collects one tract's statistics files over all subjects and sessions.
/// Units without a file are skipped with a warning.
pub fn collect_tract_files(output_dir: &Path, subjects: &[String], tract: &str) -> Result<Vec<PathBuf>> {
    let dir_pattern = tract_dir_pattern(tract)?;
    let mut files = Vec::new();
    for subject in subjects {
        for session in output_units(output_dir, subject)? {
            match find_pathstats_file(output_dir, subject, session.as_deref(), tract, &dir_pattern)? {
                Some(file) => files.push(file),
                None => warn!(
                    subject = %subject,
                    unit = %unit_output_dir(subject, session.as_deref()),
                    tract,
                    "Missing pathstats file; skipping for this tract"
                ),
            }
        }
    }
    Ok(files)
}

/// Writes a newline-joined file list.
pub fn write_file_list(path: &Path, files: &[PathBuf]) -> Result<()> {
    let content = files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, content)?;
    Ok(())
}

/// `<tractstats2table> --load-pathstats-from-file <list> --overall --tablefile <out>`
pub fn table_command(tractstats2table: &str, list: &Path, table: &Path) -> String {
    format!(
        "{} --load-pathstats-from-file {} --overall --tablefile {}",
        tractstats2table,
        list.display(),
        table.display()
    )
}

/// Rewrites a table produced by `tractstats2table`: the column named after
/// the tract becomes `participant_id` and a `tract` column is appended.
/// Returns the number of data rows.
pub fn reshape_tract_table(path: &Path, tract: &str) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?;

    let mut header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    match header.iter_mut().find(|h| h.as_str() == tract) {
        Some(column) => *column = "participant_id".to_string(),
        None => debug!(table = %path.display(), tract, "No tract-named column to rename"),
    }
    header.push("tract".to_string());

    let mut rows = Vec::new();
    for row in reader.records() {
        let mut row: Vec<String> = row?.iter().map(str::to_string).collect();
        row.push(tract.to_string());
        rows.push(row);
    }
    drop(reader);

    write_table(path, &header, &rows)?;
    Ok(rows.len())
}

fn write_table(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Builds the table of one tract. With no input files the tool is not run
/// and the table only carries the header.
pub async fn aggregate_tract(
    runner: &dyn CommandRunner,
    tractstats2table: &str,
    output_dir: &Path,
    subjects: &[String],
    tract: &str,
) -> Result<TractOutcome> {
    let group_dir = output_dir.join(TRACT_DIR);
    let list_dir = group_dir.join(FILE_LIST_DIR);
    fs::create_dir_all(&list_dir)?;

    let files = collect_tract_files(output_dir, subjects, tract)?;
    let list = list_dir.join(format!("{}_list.txt", tract));
    write_file_list(&list, &files)?;

    let table = group_dir.join(format!("{}_stats.tsv", tract));
    let rows = if files.is_empty() {
        warn!(tract, "No pathstats files for tract; writing empty table");
        write_table(
            &table,
            &["participant_id".to_string(), "tract".to_string()],
            &[],
        )?;
        0
    } else {
        runner
            .run(&ShellCommand::new(table_command(tractstats2table, &list, &table)))
            .await?;
        reshape_tract_table(&table, tract)?
    };

    debug!(tract, files = files.len(), rows, "Aggregated tract");
    Ok(TractOutcome {
        tract: tract.to_string(),
        files: files.len(),
        table,
        rows,
    })
}

/// Aggregates every tract into `00_group2_tract_stats/`.
///
/// A tract that fails for a non-fatal reason is reported and the remaining
/// tracts still run. A fatal error aborts the aggregation.
pub async fn group_level_tract_stats(
    runner: &dyn CommandRunner,
    tractstats2table: &str,
    output_dir: &Path,
    subjects: &[String],
) -> Result<TractStatsReport> {
    let mut report = TractStatsReport::default();
    for tract in tract_names() {
        match aggregate_tract(runner, tractstats2table, output_dir, subjects, &tract).await {
            Ok(outcome) => report.tracts.push(outcome),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(tract = %tract, error = %e, "Tract aggregation failed; continuing");
                report.failed.push((tract, e.to_string()));
            }
        }
    }
    info!(
        tracts = report.tracts.len(),
        failed = report.failed.len(),
        "Wrote group tract stats"
    );
    Ok(report)
}
