//! Remote operation capability.
//!
//! Every request carries an [`OpHandle`]. The shell performs the operation
//! and resolves it with exactly one [`RemoteOutcome`], which is fed back to
//! the app tagged with the same handle.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::{JobId, OpHandle, RemotePath, StageId};
use crate::params::ParamMap;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    MakeDir,
    CopyTree,
    UploadFile,
    ReadCaseData,
    InvokeJob,
    KillJob,
    DeleteTree,
    DownloadTree,
}

impl RequestKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MakeDir => "make_dir",
            Self::CopyTree => "copy_tree",
            Self::UploadFile => "upload_file",
            Self::ReadCaseData => "read_case_data",
            Self::InvokeJob => "invoke_job",
            Self::KillJob => "kill_job",
            Self::DeleteTree => "delete_tree",
            Self::DownloadTree => "download_tree",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteRequest {
    MakeDir {
        parent: RemotePath,
        name: String,
    },
    CopyTree {
        source: RemotePath,
        parent: RemotePath,
        name: String,
    },
    UploadFile {
        folder: RemotePath,
        file_name: String,
        contents: String,
    },
    /// Lists the case folder and returns the parameter document, if present.
    ReadCaseData {
        folder: RemotePath,
        param_file: String,
    },
    InvokeJob {
        app_id: String,
        job_name: String,
        case_folder: RemotePath,
        stage: StageId,
        params: ParamMap,
    },
    KillJob {
        job: JobId,
    },
    DeleteTree {
        path: RemotePath,
    },
    DownloadTree {
        source: RemotePath,
        destination: String,
    },
}

impl RemoteRequest {
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::MakeDir { .. } => RequestKind::MakeDir,
            Self::CopyTree { .. } => RequestKind::CopyTree,
            Self::UploadFile { .. } => RequestKind::UploadFile,
            Self::ReadCaseData { .. } => RequestKind::ReadCaseData,
            Self::InvokeJob { .. } => RequestKind::InvokeJob,
            Self::KillJob { .. } => RequestKind::KillJob,
            Self::DeleteTree { .. } => RequestKind::DeleteTree,
            Self::DownloadTree { .. } => RequestKind::DownloadTree,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteOperation {
    pub handle: OpHandle,
    pub request: RemoteRequest,
}

impl Operation for RemoteOperation {
    type Output = RemoteOutcome;
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The service refused or could not complete the request.
    Rejected,
    /// The target path or job does not exist.
    NotFound,
    /// The connection to the service is gone.
    Disconnected,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RemoteFailure {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Rejected,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::NotFound,
            message: message.into(),
        }
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Disconnected,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Listing of a case folder returned by [`RemoteRequest::ReadCaseData`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CaseData {
    pub exists: bool,
    /// Names of the folder's direct children.
    #[serde(default)]
    pub entries: Vec<String>,
    /// Raw parameter document text; `None` if the file is absent.
    #[serde(default)]
    pub param_document: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemotePayload {
    Done,
    JobStarted { job: JobId },
    CaseData(CaseData),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOutcome {
    Good(RemotePayload),
    Fail(RemoteFailure),
}

impl RemoteOutcome {
    #[must_use]
    pub const fn done() -> Self {
        Self::Good(RemotePayload::Done)
    }

    #[must_use]
    pub const fn is_good(&self) -> bool {
        matches!(self, Self::Good(_))
    }

    #[must_use]
    pub fn into_result(self) -> Result<RemotePayload, RemoteFailure> {
        match self {
            Self::Good(payload) => Ok(payload),
            Self::Fail(failure) => Err(failure),
        }
    }
}

pub struct RemoteOps<Ev> {
    context: CapabilityContext<RemoteOperation, Ev>,
}

impl<Ev> Capability<Ev> for RemoteOps<Ev> {
    type Operation = RemoteOperation;
    type MappedSelf<MappedEv> = RemoteOps<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        RemoteOps::new(self.context.map_event(f))
    }
}

impl<Ev> RemoteOps<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<RemoteOperation, Ev>) -> Self {
        Self { context }
    }

    /// Sends `request` to the shell and dispatches `make_event` with the
    /// outcome once the shell resolves it.
    pub fn issue<F>(&self, handle: OpHandle, request: RemoteRequest, make_event: F)
    where
        F: FnOnce(OpHandle, RequestKind, RemoteOutcome) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let kind = request.kind();
            let operation = RemoteOperation {
                handle: handle.clone(),
                request,
            };
            let outcome = ctx.request_from_shell(operation).await;
            ctx.update_app(make_event(handle, kind, outcome));
        });
    }
}
