//! Per-case state machine.
//!
//! A `CaseController` owns everything known about one case and is driven by
//! two inputs: public operations requested by the user and `CaseEvent`s from
//! the remote collaborators. Both return `Directive`s that the host turns
//! into shell effects. The controller never performs I/O itself.

mod operations;
mod phase;
mod transitions;


use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::capabilities::{
    RemoteFailure, RemoteOperation, RemoteOutcome, RemotePayload, RemoteRequest, RequestKind,
};
use crate::case_type::{CaseTypeCatalog, CaseTypeDescriptor};
use crate::config::{CaseConfig, NameError};
use crate::event::{JobId, OpHandle, RemotePath, StageId};
use crate::model::{CaseState, InternalCaseState, JobSnapshot, StageState, StageStates};
use crate::params::{ParamFileError, ParamMap};
use crate::stages::{derive_stage_states, StageInputs};

pub(crate) use self::phase::Phase;
pub use self::phase::RunningJob;

/// Work the host must carry out on the controller's behalf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    Issue(RemoteOperation),
    WatchFolder(RemotePath),
    UnwatchFolder(RemotePath),
    WatchJobs,
    UnwatchJobs,
    /// Published state changed; observers should re-read it.
    Publish,
    /// The case is gone; the owner should drop this controller.
    Detach,
}

pub type Directives = Vec<Directive>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaseError {
    #[error("Case connection has been closed")]
    Defunct,
    #[error("Cannot {operation} while the case is {state}")]
    Busy {
        operation: &'static str,
        state: InternalCaseState,
    },
    #[error("Invalid case name: {0}")]
    InvalidName(#[from] NameError),
    #[error("Case type is not known yet")]
    UnknownCaseType,
    #[error("Case folder does not exist yet")]
    NoCaseFolder,
    #[error("Unknown stage: {0}")]
    UnknownStage(StageId),
    #[error("Stage {stage} cannot be started while {state}")]
    StageNotRunnable { stage: StageId, state: StageState },
    #[error("Stage {stage} cannot be rolled back while {state}")]
    StageNotRollbackable { stage: StageId, state: StageState },
    #[error("No running job for stage {0}")]
    NoRunningJob(StageId),
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Parameter {param} belongs to stage {stage}, which is {state}")]
    FrozenParameter {
        param: String,
        stage: StageId,
        state: StageState,
    },
    #[error("No parameter changes to upload")]
    NoChanges,
    #[error("Download destination cannot be empty")]
    EmptyDestination,
    #[error(transparent)]
    ParamFile(#[from] ParamFileError),
}

/// Inputs from the remote collaborators. Completions carry the handle of
/// the operation they answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaseEvent {
    FolderChanged {
        path: RemotePath,
        exists: bool,
    },
    JobListUpdated(JobSnapshot),
    ConnectionLost {
        reason: String,
    },
    ConnectionRestored,
    TaskDone {
        handle: OpHandle,
        outcome: Result<RemotePayload, RemoteFailure>,
    },
    JobInvoked {
        handle: OpHandle,
        outcome: Result<JobId, RemoteFailure>,
    },
    JobKilled {
        handle: OpHandle,
        outcome: Result<(), RemoteFailure>,
    },
    RecursiveOpDone {
        handle: OpHandle,
        outcome: Result<(), RemoteFailure>,
    },
}

impl CaseEvent {
    /// Classifies a raw remote outcome by the kind of request it answers.
    #[must_use]
    pub fn from_completion(handle: OpHandle, kind: RequestKind, outcome: RemoteOutcome) -> Self {
        let outcome = outcome.into_result();
        match kind {
            RequestKind::MakeDir
            | RequestKind::CopyTree
            | RequestKind::UploadFile
            | RequestKind::ReadCaseData => Self::TaskDone { handle, outcome },
            RequestKind::InvokeJob => Self::JobInvoked {
                handle,
                outcome: outcome.and_then(|payload| match payload {
                    RemotePayload::JobStarted { job } => Ok(job),
                    _ => Err(RemoteFailure::rejected(
                        "job service did not return a job id",
                    )),
                }),
            },
            RequestKind::KillJob => Self::JobKilled {
                handle,
                outcome: outcome.map(|_| ()),
            },
            RequestKind::DeleteTree | RequestKind::DownloadTree => Self::RecursiveOpDone {
                handle,
                outcome: outcome.map(|_| ()),
            },
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FolderChanged { .. } => "folder_changed",
            Self::JobListUpdated(_) => "job_list_updated",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::ConnectionRestored => "connection_restored",
            Self::TaskDone { .. } => "task_done",
            Self::JobInvoked { .. } => "job_invoked",
            Self::JobKilled { .. } => "job_killed",
            Self::RecursiveOpDone { .. } => "recursive_op_done",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DownloadReport {
    pub destination: String,
    pub success: bool,
    pub message: Option<String>,
}

/// Everything observers are told about a case.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CaseSnapshot {
    pub state: CaseState,
    pub stages: StageStates,
    pub params: ParamMap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Existing,
    New,
    Duplicate,
}

#[derive(Debug)]
pub struct CaseController {
    config: CaseConfig,
    catalog: CaseTypeCatalog,
    origin: Origin,
    phase: Phase,
    name: Option<String>,
    case_folder: Option<RemotePath>,
    case_type: Option<Arc<CaseTypeDescriptor>>,
    stored_params: ParamMap,
    stored_outputs: BTreeSet<StageId>,
    jobs: JobSnapshot,
    stored_stage_states: StageStates,
    attached: bool,
    watched_folder: Option<RemotePath>,
    reload_pending: bool,
    last_error: Option<String>,
    last_download: Option<DownloadReport>,
    published: Option<CaseSnapshot>,
}

impl CaseController {
    fn blank(origin: Origin, phase: Phase, catalog: CaseTypeCatalog, config: CaseConfig) -> Self {
        Self {
            config,
            catalog,
            origin,
            phase,
            name: None,
            case_folder: None,
            case_type: None,
            stored_params: ParamMap::new(),
            stored_outputs: BTreeSet::new(),
            jobs: JobSnapshot::default(),
            stored_stage_states: StageStates::new(),
            attached: false,
            watched_folder: None,
            reload_pending: false,
            last_error: None,
            last_download: None,
            published: None,
        }
    }

    /// Wraps an existing case folder. The case type is read from its
    /// parameter document once `attach` loads it.
    #[must_use]
    pub fn open(folder: RemotePath, catalog: CaseTypeCatalog, config: CaseConfig) -> Self {
        let mut controller = Self::blank(Origin::Existing, Phase::EmptyCase, catalog, config);
        controller.name = Some(folder.name().to_string());
        controller.case_folder = Some(folder);
        controller
    }

    /// A case that does not exist yet; `create_case` makes it.
    #[must_use]
    pub fn with_type(
        case_type: Arc<CaseTypeDescriptor>,
        catalog: CaseTypeCatalog,
        config: CaseConfig,
    ) -> Self {
        let mut controller = Self::blank(Origin::New, Phase::TypeSelected, catalog, config);
        controller.case_type = Some(case_type);
        controller.recompute_stage_states();
        controller
    }

    /// A case that will be filled by copying another with `duplicate_case`.
    #[must_use]
    pub fn for_duplication(catalog: CaseTypeCatalog, config: CaseConfig) -> Self {
        Self::blank(Origin::Duplicate, Phase::EmptyCase, catalog, config)
    }

    // --- Accessors ---

    #[must_use]
    pub fn is_defunct(&self) -> bool {
        matches!(self.phase, Phase::Defunct)
    }

    #[must_use]
    pub const fn internal_state(&self) -> InternalCaseState {
        self.phase.kind()
    }

    #[must_use]
    pub const fn case_state(&self) -> CaseState {
        self.phase.kind().case_state()
    }

    #[must_use]
    pub const fn case_folder(&self) -> Option<&RemotePath> {
        self.case_folder.as_ref()
    }

    #[must_use]
    pub fn case_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn case_type(&self) -> Option<&CaseTypeDescriptor> {
        self.case_type.as_deref()
    }

    #[must_use]
    pub const fn current_params(&self) -> &ParamMap {
        &self.stored_params
    }

    #[must_use]
    pub const fn running_job(&self) -> Option<&RunningJob> {
        self.phase.running_job()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub const fn last_download(&self) -> Option<&DownloadReport> {
        self.last_download.as_ref()
    }

    #[must_use]
    pub const fn outstanding_operation(&self) -> Option<&OpHandle> {
        self.phase.outstanding()
    }

    /// Stage states as observers see them: the derived states with the
    /// current operation overlaid.
    #[must_use]
    pub fn stage_states(&self) -> StageStates {
        let mut states = self.stored_stage_states.clone();
        let blanket = match self.phase {
            Phase::Offline => Some(StageState::Offline),
            Phase::Download { .. } => Some(StageState::Downloading),
            Phase::EmptyCase | Phase::InitDataLoad { .. } | Phase::ReDataLoad { .. } => {
                Some(StageState::Loading)
            }
            _ => None,
        };
        if let Some(state) = blanket {
            states.values_mut().for_each(|s| *s = state);
            return states;
        }
        match &self.phase {
            Phase::StartingJob { job, .. } => {
                states.insert(job.stage.clone(), StageState::Loading);
            }
            Phase::WaitingFolderDel { stage, .. } => {
                states.insert(stage.clone(), StageState::Loading);
            }
            Phase::StoppingJob { job, .. }
            | Phase::RunningJobNoRecord { job }
            | Phase::RunningJobYesRecord { job } => {
                states.insert(job.stage.clone(), StageState::Running);
            }
            _ => {}
        }
        states
    }

    #[must_use]
    pub fn snapshot(&self) -> CaseSnapshot {
        CaseSnapshot {
            state: self.case_state(),
            stages: self.stage_states(),
            params: self.stored_params.clone(),
        }
    }

    fn label(&self) -> String {
        match (&self.case_folder, &self.name) {
            (Some(folder), _) => folder.to_string(),
            (None, Some(name)) => name.clone(),
            (None, None) => "<new case>".to_string(),
        }
    }

    // --- Internal helpers shared by operations and transitions ---

    fn issue(&self, request: RemoteRequest, out: &mut Directives) -> OpHandle {
        let handle = OpHandle::generate();
        debug!(
            case = %self.label(),
            handle = %handle,
            kind = %request.kind(),
            "issuing remote operation"
        );
        out.push(Directive::Issue(RemoteOperation {
            handle: handle.clone(),
            request,
        }));
        handle
    }

    fn enter(&mut self, next: Phase) {
        let from = self.phase.kind();
        let to = next.kind();
        self.phase = next;
        if from != to {
            info!(case = %self.label(), from = %from, to = %to, "case state transition");
        }
    }

    fn read_case_data(&self, folder: &RemotePath, out: &mut Directives) -> OpHandle {
        self.issue(
            RemoteRequest::ReadCaseData {
                folder: folder.clone(),
                param_file: self.config.param_file_name.clone(),
            },
            out,
        )
    }

    fn watch_case_folder(&mut self, out: &mut Directives) {
        if !self.attached || self.watched_folder.is_some() {
            return;
        }
        if let Some(folder) = &self.case_folder {
            out.push(Directive::WatchFolder(folder.clone()));
            self.watched_folder = Some(folder.clone());
        }
    }

    fn release_subscriptions(&mut self, out: &mut Directives) {
        if let Some(folder) = self.watched_folder.take() {
            out.push(Directive::UnwatchFolder(folder));
        }
        if self.attached {
            out.push(Directive::UnwatchJobs);
            self.attached = false;
        }
    }

    /// Returns to `Ready`. A reload deferred while busy is issued now.
    fn settle(&mut self, out: &mut Directives) {
        if self.reload_pending {
            if let Some(folder) = self.case_folder.clone() {
                self.reload_pending = false;
                let op = self.read_case_data(&folder, out);
                self.enter(Phase::ReDataLoad { op });
                return;
            }
        }
        self.enter(Phase::Ready);
    }

    fn recompute_stage_states(&mut self) {
        let Some(case_type) = self.case_type.as_deref() else {
            self.stored_stage_states.clear();
            return;
        };
        self.stored_stage_states = derive_stage_states(&StageInputs {
            case_type,
            params: &self.stored_params,
            outputs: &self.stored_outputs,
            case_folder: self.case_folder.as_ref(),
            jobs: &self.jobs.jobs,
        });
    }

    /// Recomputes derived state and appends `Publish` if anything observers
    /// can see has changed.
    fn finish(&mut self, mut out: Directives) -> Directives {
        self.recompute_stage_states();
        let snapshot = self.snapshot();
        if self.published.as_ref() != Some(&snapshot) {
            self.published = Some(snapshot);
            out.push(Directive::Publish);
        }
        out
    }

    fn busy(&self, operation: &'static str) -> CaseError {
        CaseError::Busy {
            operation,
            state: self.phase.kind(),
        }
    }

    fn ensure_live(&self) -> Result<(), CaseError> {
        if self.is_defunct() {
            Err(CaseError::Defunct)
        } else {
            Ok(())
        }
    }
}
