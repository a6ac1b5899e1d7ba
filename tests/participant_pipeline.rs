//! Integration tests for the participant level.
//!
//! External tools are replaced by a recording runner that writes the job
//! files `trac-all -jobs` would produce, so stage dispatch can be observed
//! end to end.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tracula_bids::dataset::{BidsFile, BidsLayout, DatasetIndex, FileQuery, StudyMode};
use tracula_bids::discovery::recon_done_marker;
use tracula_bids::pipeline::{ParticipantPipeline, PipelineConfig};
use tracula_bids::runner::{CommandOutcome, CommandRunner, ShellCommand};
use tracula_bids::scheduler::{Stage, StageSelection};
use tracula_bids::PipelineError;

/// Records every command. `-jobs <path>` commands write the configured job
/// file; commands listed in `fail` exit non-zero.
struct JobFileRunner {
    commands: Mutex<Vec<String>>,
    jobs: HashMap<String, String>,
    fail: HashSet<String>,
}

impl JobFileRunner {
    fn new(jobs: &[(&str, &str)], fail: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            jobs: jobs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fail: fail.iter().map(|c| c.to_string()).collect(),
        })
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn position(&self, command: &str) -> Option<usize> {
        self.commands().iter().position(|c| c == command)
    }
}

#[async_trait]
impl CommandRunner for JobFileRunner {
    async fn run(&self, command: &ShellCommand) -> tracula_bids::Result<CommandOutcome> {
        self.commands.lock().unwrap().push(command.command.clone());

        if command.command.contains(" -jobs ") {
            if let Some(path) = command.command.split_whitespace().last() {
                let path = PathBuf::from(path);
                let dir = path.parent().unwrap();
                let name = path.file_name().unwrap().to_string_lossy().to_string();
                fs::create_dir_all(dir).unwrap();
                // The stage file plus its .pre/.post companions.
                for (file, content) in &self.jobs {
                    if *file == name || file.starts_with(&format!("{}.", name)) {
                        fs::write(dir.join(file), content).unwrap();
                    }
                }
            }
        }

        if self.fail.contains(&command.command) {
            return Err(PipelineError::CommandFailed {
                command: command.command.clone(),
                code: 1,
            });
        }
        Ok(CommandOutcome { exit_code: 0 })
    }
}

/// Index reporting a fixed list of sessions.
struct SessionStub(Vec<String>);

impl DatasetIndex for SessionStub {
    fn subjects(&self) -> Vec<String> {
        vec!["01".to_string()]
    }

    fn sessions(&self, _filter: &FileQuery) -> Vec<String> {
        self.0.clone()
    }

    fn files(&self, _query: &FileQuery) -> Vec<PathBuf> {
        Vec::new()
    }
}

fn dataset() -> Arc<dyn DatasetIndex> {
    let files = [
        (None, "/bids/dwi.bvec"),
        (None, "/bids/dwi.bval"),
        (Some("anat"), "/bids/sub-01/anat/sub-01_T1w.nii.gz"),
        (Some("dwi"), "/bids/sub-01/dwi/sub-01_dwi.nii.gz"),
        (Some("anat"), "/bids/sub-02/anat/sub-02_T1w.nii.gz"),
    ]
    .iter()
    .map(|(dt, path)| BidsFile::parse(PathBuf::from(path), *dt))
    .collect();
    Arc::new(BidsLayout::from_files("/bids", files))
}

struct Fixture {
    _temp: TempDir,
    out: PathBuf,
    fs_dir: PathBuf,
}

fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    let fs_dir = temp.path().join("freesurfer");
    let marker = recon_done_marker(&fs_dir, "sub-01");
    fs::create_dir_all(marker.parent().unwrap()).unwrap();
    fs::write(marker, "").unwrap();
    Fixture {
        _temp: temp,
        out,
        fs_dir,
    }
}

fn prep_config(fixture: &Fixture) -> PipelineConfig {
    PipelineConfig::new("/bids", &fixture.out, "key")
        .with_freesurfer_dir(&fixture.fs_dir)
        .with_stages(StageSelection::only(&[Stage::Prep]))
        .with_n_cpus(2)
}

#[tokio::test]
async fn test_prep_base_runs_after_parallel_commands() {
    let fixture = fixture();
    let runner = JobFileRunner::new(&[("prep.jobs", "c1; c2\nc3\n")], &[]);
    let pipeline = ParticipantPipeline::new(prep_config(&fixture), dataset(), runner.clone());

    let summary = pipeline.run(&["01".to_string()]).await.unwrap();
    assert_eq!(summary.processed, vec!["01"]);

    let c3 = runner.position("c3").unwrap();
    assert!(runner.position("c1").unwrap() < c3);
    assert!(runner.position("c2").unwrap() < c3);
    assert_eq!(runner.commands().len(), 4);

    let dmrirc = fixture.out.join("sub-01").join("dmrirc");
    let content = fs::read_to_string(dmrirc).unwrap();
    assert!(content.contains("set subjlist = (sub-01)"));
    assert!(content.contains("set bveclist = (/bids/dwi.bvec)"));
}

#[tokio::test]
async fn test_failed_parallel_command_stops_stage() {
    let fixture = fixture();
    let runner = JobFileRunner::new(&[("prep.jobs", "c1; c2\nc3\n")], &["c1"]);
    let pipeline = ParticipantPipeline::new(prep_config(&fixture), dataset(), runner.clone());

    let err = pipeline.run(&["01".to_string()]).await.unwrap_err();
    assert!(matches!(err, PipelineError::CommandFailed { ref command, .. } if command == "c1"));
    assert!(runner.position("c2").is_some());
    assert!(runner.position("c3").is_none());
}

#[tokio::test]
async fn test_ineligible_subject_gets_nothing() {
    let fixture = fixture();
    let runner = JobFileRunner::new(&[("prep.jobs", "c1\n")], &[]);
    let pipeline = ParticipantPipeline::new(prep_config(&fixture), dataset(), runner.clone());

    let summary = pipeline.run(&["02".to_string()]).await.unwrap();
    assert!(summary.processed.is_empty());
    assert_eq!(summary.skipped[0].subject, "02");
    assert!(runner.commands().is_empty());
    assert!(!fixture.out.join("sub-02").join("dmrirc").exists());
}

#[tokio::test]
async fn test_bedp_pre_prepares_directories() {
    let fixture = fixture();
    let dmri = fixture.out.join("sub-01").join("dmri");
    let pre = format!("bedpostx_preproc.sh {}\n", dmri.display());
    let runner = JobFileRunner::new(
        &[
            ("bedp.jobs", "b1\nb2\n"),
            ("bedp.jobs.pre", pre.as_str()),
            ("bedp.jobs.post", "b3\n"),
        ],
        &[],
    );
    let config = prep_config(&fixture).with_stages(StageSelection::only(&[Stage::Bedp]));
    let pipeline = ParticipantPipeline::new(config, dataset(), runner.clone());

    pipeline.run(&["01".to_string()]).await.unwrap();

    let bedpostx = PathBuf::from(format!("{}.bedpostX", dmri.display()));
    assert!(bedpostx.join("diff_slices").is_dir());
    assert!(bedpostx.join("logs/monitor").is_dir());
    assert!(bedpostx.join("xfms").is_dir());
    assert!(runner.position("b3").unwrap() > runner.position("b1").unwrap());
    assert!(runner.position("b3").unwrap() > runner.position("b2").unwrap());
}

fn layout(files: &[(Option<&str>, &str)]) -> Arc<dyn DatasetIndex> {
    let files = files
        .iter()
        .map(|(dt, path)| BidsFile::parse(PathBuf::from(path), *dt))
        .collect();
    Arc::new(BidsLayout::from_files("/bids", files))
}

fn mark_done(fixture: &Fixture, names: &[&str]) {
    for name in names {
        let marker = recon_done_marker(&fixture.fs_dir, name);
        fs::create_dir_all(marker.parent().unwrap()).unwrap();
        fs::write(marker, "").unwrap();
    }
}

#[tokio::test]
async fn test_mixed_session_dataset_runs_sessionless_subject() {
    let fixture = fixture();
    mark_done(
        &fixture,
        &[
            "sub-01_ses-a",
            "sub-01_ses-a.long.sub-01",
            "sub-01_ses-b",
            "sub-01_ses-b.long.sub-01",
            "sub-02",
        ],
    );
    let index = layout(&[
        (None, "/bids/dwi.bvec"),
        (None, "/bids/dwi.bval"),
        (Some("anat"), "/bids/sub-01/ses-a/anat/sub-01_ses-a_T1w.nii.gz"),
        (Some("dwi"), "/bids/sub-01/ses-a/dwi/sub-01_ses-a_dwi.nii.gz"),
        (Some("anat"), "/bids/sub-01/ses-b/anat/sub-01_ses-b_T1w.nii.gz"),
        (Some("dwi"), "/bids/sub-01/ses-b/dwi/sub-01_ses-b_dwi.nii.gz"),
        (Some("anat"), "/bids/sub-02/anat/sub-02_T1w.nii.gz"),
        (Some("dwi"), "/bids/sub-02/dwi/sub-02_dwi.nii.gz"),
    ]);
    let runner = JobFileRunner::new(&[("prep.jobs", "c1\n")], &[]);
    let pipeline = ParticipantPipeline::new(prep_config(&fixture), index, runner.clone());

    let summary = pipeline
        .run(&["01".to_string(), "02".to_string()])
        .await
        .unwrap();
    assert_eq!(summary.study_mode, StudyMode::Longitudinal);
    assert_eq!(summary.processed, vec!["01", "02"]);
    assert!(summary.skipped.is_empty());

    let longitudinal = fs::read_to_string(fixture.out.join("sub-01").join("dmrirc")).unwrap();
    assert!(longitudinal.contains("set subjlist = (sub-01_ses-a sub-01_ses-b)"));
    let sessionless = fs::read_to_string(fixture.out.join("sub-02").join("dmrirc")).unwrap();
    assert!(sessionless.contains("set subjlist = (sub-02)"));
    assert!(!sessionless.contains("baselist"));
    assert!(runner.commands().iter().all(|c| !c.starts_with("run_freesurfer.py")));
}

#[tokio::test]
async fn test_session_without_gradients_is_left_out() {
    let fixture = fixture();
    mark_done(
        &fixture,
        &[
            "sub-01_ses-a",
            "sub-01_ses-a.long.sub-01",
            "sub-01_ses-b",
            "sub-01_ses-b.long.sub-01",
        ],
    );
    let index = layout(&[
        (Some("anat"), "/bids/sub-01/ses-a/anat/sub-01_ses-a_T1w.nii.gz"),
        (Some("dwi"), "/bids/sub-01/ses-a/dwi/sub-01_ses-a_dwi.nii.gz"),
        (Some("dwi"), "/bids/sub-01/ses-a/dwi/sub-01_ses-a_dwi.bvec"),
        (Some("dwi"), "/bids/sub-01/ses-a/dwi/sub-01_ses-a_dwi.bval"),
        (Some("anat"), "/bids/sub-01/ses-b/anat/sub-01_ses-b_T1w.nii.gz"),
        (Some("dwi"), "/bids/sub-01/ses-b/dwi/sub-01_ses-b_dwi.nii.gz"),
    ]);
    let runner = JobFileRunner::new(&[("prep.jobs", "c1\n")], &[]);
    let pipeline = ParticipantPipeline::new(prep_config(&fixture), index, runner.clone());

    let summary = pipeline.run(&["01".to_string()]).await.unwrap();
    assert_eq!(summary.study_mode, StudyMode::Longitudinal);
    assert_eq!(summary.processed, vec!["01"]);
    assert_eq!(summary.fallback_gradient_files, 0);

    let content = fs::read_to_string(fixture.out.join("sub-01").join("dmrirc")).unwrap();
    assert!(content.contains("set subjlist = (sub-01_ses-a)"));
    assert!(content.contains("set baselist = (sub-01)"));
    assert!(!content.contains("ses-b"));
    assert!(runner.position("c1").is_some());
}

#[test]
fn test_study_mode_from_index() {
    let single = SessionStub(vec!["a".to_string()]);
    let multiple = SessionStub(vec!["a".to_string(), "b".to_string()]);
    assert_eq!(StudyMode::resolve(&single), StudyMode::CrossSectional);
    assert_eq!(StudyMode::resolve(&multiple), StudyMode::Longitudinal);
    assert_eq!(StudyMode::resolve(&SessionStub(Vec::new())), StudyMode::CrossSectional);
}
