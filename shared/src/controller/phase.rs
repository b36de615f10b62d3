use serde::{Deserialize, Serialize};

use crate::event::{JobId, OpHandle, RemotePath, StageId};
use crate::model::{InternalCaseState, JobStatus};
use crate::params::ParamMap;

/// Job the controller is starting, watching or stopping.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RunningJob {
    pub stage: StageId,
    /// Unknown until the invocation is acknowledged.
    pub job: Option<JobId>,
    pub status: Option<JobStatus>,
}

impl RunningJob {
    pub(crate) const fn starting(stage: StageId) -> Self {
        Self {
            stage,
            job: None,
            status: None,
        }
    }
}

/// Controller state with the data each state owns. Variants holding an
/// `op` are waiting on exactly that remote operation, so a second one can
/// never be outstanding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Offline,
    Invalid,
    Error,
    Defunct,
    TypeSelected,
    EmptyCase,
    InitDataLoad { op: OpHandle },
    MakingFolder { op: OpHandle, folder: RemotePath },
    CopyingFolder { op: OpHandle, folder: RemotePath },
    InitParamUpload { op: OpHandle, prospective: ParamMap },
    Ready,
    UserParamUpload { op: OpHandle, prospective: ParamMap },
    WaitingFolderDel { op: OpHandle, stage: StageId },
    ReDataLoad { op: OpHandle },
    StartingJob { op: OpHandle, job: RunningJob },
    StoppingJob { op: OpHandle, job: RunningJob },
    RunningJobNoRecord { job: RunningJob },
    RunningJobYesRecord { job: RunningJob },
    FolderCheckStoppedJob { stage: StageId },
    Download { op: OpHandle, destination: String },
}

impl Phase {
    pub(crate) const fn kind(&self) -> InternalCaseState {
        match self {
            Self::Offline => InternalCaseState::Offline,
            Self::Invalid => InternalCaseState::Invalid,
            Self::Error => InternalCaseState::Error,
            Self::Defunct => InternalCaseState::Defunct,
            Self::TypeSelected => InternalCaseState::TypeSelected,
            Self::EmptyCase => InternalCaseState::EmptyCase,
            Self::InitDataLoad { .. } => InternalCaseState::InitDataLoad,
            Self::MakingFolder { .. } => InternalCaseState::MakingFolder,
            Self::CopyingFolder { .. } => InternalCaseState::CopyingFolder,
            Self::InitParamUpload { .. } => InternalCaseState::InitParamUpload,
            Self::Ready => InternalCaseState::Ready,
            Self::UserParamUpload { .. } => InternalCaseState::UserParamUpload,
            Self::WaitingFolderDel { .. } => InternalCaseState::WaitingFolderDel,
            Self::ReDataLoad { .. } => InternalCaseState::ReDataLoad,
            Self::StartingJob { .. } => InternalCaseState::StartingJob,
            Self::StoppingJob { .. } => InternalCaseState::StoppingJob,
            Self::RunningJobNoRecord { .. } => InternalCaseState::RunningJobNoRecord,
            Self::RunningJobYesRecord { .. } => InternalCaseState::RunningJobYesRecord,
            Self::FolderCheckStoppedJob { .. } => InternalCaseState::FolderCheckStoppedJob,
            Self::Download { .. } => InternalCaseState::Download,
        }
    }

    pub(crate) const fn outstanding(&self) -> Option<&OpHandle> {
        match self {
            Self::InitDataLoad { op }
            | Self::MakingFolder { op, .. }
            | Self::CopyingFolder { op, .. }
            | Self::InitParamUpload { op, .. }
            | Self::UserParamUpload { op, .. }
            | Self::WaitingFolderDel { op, .. }
            | Self::ReDataLoad { op }
            | Self::StartingJob { op, .. }
            | Self::StoppingJob { op, .. }
            | Self::Download { op, .. } => Some(op),
            Self::Offline
            | Self::Invalid
            | Self::Error
            | Self::Defunct
            | Self::TypeSelected
            | Self::EmptyCase
            | Self::Ready
            | Self::RunningJobNoRecord { .. }
            | Self::RunningJobYesRecord { .. }
            | Self::FolderCheckStoppedJob { .. } => None,
        }
    }

    pub(crate) const fn running_job(&self) -> Option<&RunningJob> {
        match self {
            Self::StartingJob { job, .. }
            | Self::StoppingJob { job, .. }
            | Self::RunningJobNoRecord { job }
            | Self::RunningJobYesRecord { job } => Some(job),
            _ => None,
        }
    }
}
