use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::event::{JobId, RemotePath, StageId};

pub type StageStates = BTreeMap<StageId, StageState>;

// --- Remote jobs ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Failed,
    Archived,
}

impl JobStatus {
    /// Maps a scheduler or job-service status string onto the five states
    /// the case logic distinguishes. Suffixes such as `CANCELLED+` or
    /// `FAILED:1` are stripped first. Unknown strings yield `None`.
    #[must_use]
    pub fn from_remote(raw: &str) -> Option<Self> {
        let token = raw
            .split(|c| c == '+' || c == ':' || c == '(')
            .next()
            .unwrap_or(raw)
            .trim()
            .to_ascii_uppercase();
        let status = match token.as_str() {
            "PENDING" | "QUEUED" | "ACCEPTED" | "BLOCKED" | "CONFIGURING" | "REQUEUED"
            | "SUSPENDED" | "PAUSED" | "PROCESSING_INPUTS" | "STAGING_INPUTS" | "STAGED" => {
                Self::Queued
            }
            "RUNNING" | "COMPLETING" | "STAGING_JOB" | "SUBMITTING" | "CLEANING_UP"
            | "ARCHIVING" | "STAGE_OUT" => Self::Running,
            "FINISHED" | "COMPLETED" | "DONE" => Self::Finished,
            "FAILED" | "CANCELLED" | "KILLED" | "STOPPED" | "TIMEOUT" | "NODE_FAIL"
            | "OUT_OF_MEMORY" | "PREEMPTED" | "BOOT_FAIL" | "ARCHIVING_FAILED" => Self::Failed,
            "ARCHIVED" | "ARCHIVING_FINISHED" => Self::Archived,
            _ => return None,
        };
        Some(status)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }

    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn details_loaded_default() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteJob {
    pub id: JobId,
    pub case_folder: RemotePath,
    pub stage: StageId,
    pub status: JobStatus,
    #[serde(default)]
    pub submitted_at_ms: u64,
    /// False while the job service has listed the job but not yet returned
    /// its full record (folder, stage, parameters).
    #[serde(default = "details_loaded_default")]
    pub details_loaded: bool,
}

/// One complete job listing from the job notifier. Each snapshot replaces
/// the previous one.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct JobSnapshot {
    pub jobs: Vec<RemoteJob>,
}

impl JobSnapshot {
    #[must_use]
    pub const fn new(jobs: Vec<RemoteJob>) -> Self {
        Self { jobs }
    }

    pub fn relevant_to<'a>(&'a self, folder: &'a RemotePath) -> impl Iterator<Item = &'a RemoteJob> {
        self.jobs.iter().filter(move |job| &job.case_folder == folder)
    }

    #[must_use]
    pub fn find(&self, id: &JobId) -> Option<&RemoteJob> {
        self.jobs.iter().find(|job| &job.id == id)
    }

    /// The active job for this folder with the latest submission, if any.
    #[must_use]
    pub fn active_for(&self, folder: &RemotePath) -> Option<&RemoteJob> {
        self.jobs
            .iter()
            .filter(|job| &job.case_folder == folder && job.status.is_active())
            .max_by(|a, b| {
                (a.submitted_at_ms, &a.id).cmp(&(b.submitted_at_ms, &b.id))
            })
    }
}

// --- Per-stage state ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Unready,
    Unrun,
    Running,
    Finished,
    FinishedPrereq,
    Loading,
    Error,
    Downloading,
    Offline,
}

impl StageState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unready => "unready",
            Self::Unrun => "unrun",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::FinishedPrereq => "finished_prereq",
            Self::Loading => "loading",
            Self::Error => "error",
            Self::Downloading => "downloading",
            Self::Offline => "offline",
        }
    }

    /// Short status line shown next to a stage.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unready => "Prerequisites not met",
            Self::Unrun => "Ready to run",
            Self::Running => "Task running",
            Self::Finished | Self::FinishedPrereq => "Task finished",
            Self::Loading => "Loading data...",
            Self::Error => "Error in task",
            Self::Downloading => "Downloading...",
            Self::Offline => "Offline",
        }
    }

    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Finished | Self::FinishedPrereq)
    }

    #[must_use]
    pub const fn can_roll_back(self) -> bool {
        matches!(self, Self::Finished | Self::FinishedPrereq | Self::Error)
    }

    /// Parameters owned by a stage may only change before it has produced
    /// anything.
    #[must_use]
    pub const fn params_editable(self) -> bool {
        matches!(self, Self::Unrun | Self::Unready)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Case state ---

/// Coarse state published to observers.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Loading,
    Invalid,
    Ready,
    Defunct,
    Error,
    OpInvoke,
    Running,
    Download,
    Offline,
}

impl CaseState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Invalid => "invalid",
            Self::Ready => "ready",
            Self::Defunct => "defunct",
            Self::Error => "error",
            Self::OpInvoke => "op_invoke",
            Self::Running => "running",
            Self::Download => "download",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained controller state. The controller itself keeps a richer
/// tagged phase; this is its fieldless projection.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InternalCaseState {
    Offline,
    Invalid,
    Error,
    Defunct,
    TypeSelected,
    EmptyCase,
    InitDataLoad,
    MakingFolder,
    CopyingFolder,
    InitParamUpload,
    Ready,
    UserParamUpload,
    WaitingFolderDel,
    ReDataLoad,
    StartingJob,
    StoppingJob,
    RunningJobNoRecord,
    RunningJobYesRecord,
    FolderCheckStoppedJob,
    Download,
}

impl InternalCaseState {
    #[must_use]
    pub const fn case_state(self) -> CaseState {
        match self {
            Self::Offline => CaseState::Offline,
            Self::Invalid => CaseState::Invalid,
            Self::Error => CaseState::Error,
            Self::Defunct => CaseState::Defunct,
            Self::EmptyCase | Self::InitDataLoad | Self::ReDataLoad => CaseState::Loading,
            Self::TypeSelected | Self::Ready => CaseState::Ready,
            Self::MakingFolder
            | Self::CopyingFolder
            | Self::InitParamUpload
            | Self::UserParamUpload
            | Self::WaitingFolderDel
            | Self::FolderCheckStoppedJob
            | Self::StartingJob
            | Self::StoppingJob => CaseState::OpInvoke,
            Self::RunningJobNoRecord | Self::RunningJobYesRecord => CaseState::Running,
            Self::Download => CaseState::Download,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Invalid => "invalid",
            Self::Error => "error",
            Self::Defunct => "defunct",
            Self::TypeSelected => "type_selected",
            Self::EmptyCase => "empty_case",
            Self::InitDataLoad => "init_data_load",
            Self::MakingFolder => "making_folder",
            Self::CopyingFolder => "copying_folder",
            Self::InitParamUpload => "init_param_upload",
            Self::Ready => "ready",
            Self::UserParamUpload => "user_param_upload",
            Self::WaitingFolderDel => "waiting_folder_del",
            Self::ReDataLoad => "re_data_load",
            Self::StartingJob => "starting_job",
            Self::StoppingJob => "stopping_job",
            Self::RunningJobNoRecord => "running_job_no_record",
            Self::RunningJobYesRecord => "running_job_yes_record",
            Self::FolderCheckStoppedJob => "folder_check_stopped_job",
            Self::Download => "download",
        }
    }

    /// No remote operation is outstanding and no job is being tracked.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::TypeSelected | Self::EmptyCase)
    }
}

impl fmt::Display for InternalCaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
