use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::capabilities::{RemoteOutcome, RequestKind};
use crate::case_type::CaseTypeDescriptor;
use crate::config::CaseConfig;
use crate::model::JobSnapshot;
use crate::params::ParamMap;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

typed_id!(StageId);
typed_id!(JobId);
typed_id!(CaseTypeId);
typed_id!(OpHandle);

impl OpHandle {
    /// Fresh handle for a remote operation; completions echo it back.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

// --- RemotePath: '/'-separated, syntactically normalised ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// Collapses repeated separators, drops `.` segments and resolves `..`
    /// against the preceding segment. A leading `..` on a relative path is kept.
    pub fn new(path: impl AsRef<str>) -> Self {
        let raw = path.as_ref();
        let absolute = raw.starts_with('/');
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => match segments.last() {
                    Some(&last) if last != ".." => {
                        segments.pop();
                    }
                    _ if absolute => {}
                    _ => segments.push(".."),
                },
                other => segments.push(other),
            }
        }
        let joined = segments.join("/");
        if absolute {
            Self(format!("/{joined}"))
        } else {
            Self(joined)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            Self::new(segment)
        } else {
            Self::new(format!("{}/{segment}", self.0))
        }
    }

    /// Last path segment; empty for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let idx = self.0.rfind('/')?;
        if idx == 0 {
            if self.0.len() == 1 {
                None
            } else {
                Some(Self("/".to_string()))
            }
        } else {
            Some(Self(self.0[..idx].to_string()))
        }
    }

    /// True if `other` is this path or lies beneath it.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        if self.0 == other.0 {
            return true;
        }
        if self.0 == "/" {
            return other.0.starts_with('/');
        }
        other
            .0
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Either path contains the other.
    #[must_use]
    pub fn is_related(&self, other: &Self) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RemotePath {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for RemotePath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<RemotePath> for String {
    fn from(p: RemotePath) -> Self {
        p.0
    }
}

// --- Events ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    // Host setup
    Configure(CaseConfig),
    CaseTypesLoaded(Vec<CaseTypeDescriptor>),

    // Case selection
    SelectCaseType {
        type_id: CaseTypeId,
    },
    OpenCase {
        folder: RemotePath,
    },
    DuplicateCase {
        name: String,
        parent: RemotePath,
        source: RemotePath,
    },
    CloseCase,

    // Case operations
    CreateCase {
        name: String,
        parent: RemotePath,
    },
    ChangeParameters {
        params: ParamMap,
    },
    StartStage {
        stage: StageId,
    },
    RollBack {
        stage: StageId,
    },
    StopJob {
        stage: StageId,
    },
    DownloadCase {
        destination: String,
    },

    // Collaborator notifications
    FolderChanged {
        path: RemotePath,
        exists: bool,
    },
    JobListUpdated(JobSnapshot),
    ConnectionLost {
        reason: String,
    },
    ConnectionRestored,

    // Remote operation completion
    #[serde(skip)]
    RemoteOpDone {
        handle: OpHandle,
        kind: RequestKind,
        outcome: Box<RemoteOutcome>,
    },
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Configure(_) => "configure",
            Self::CaseTypesLoaded(_) => "case_types_loaded",
            Self::SelectCaseType { .. } => "select_case_type",
            Self::OpenCase { .. } => "open_case",
            Self::DuplicateCase { .. } => "duplicate_case",
            Self::CloseCase => "close_case",
            Self::CreateCase { .. } => "create_case",
            Self::ChangeParameters { .. } => "change_parameters",
            Self::StartStage { .. } => "start_stage",
            Self::RollBack { .. } => "roll_back",
            Self::StopJob { .. } => "stop_job",
            Self::DownloadCase { .. } => "download_case",
            Self::FolderChanged { .. } => "folder_changed",
            Self::JobListUpdated(_) => "job_list_updated",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::ConnectionRestored => "connection_restored",
            Self::RemoteOpDone { .. } => "remote_op_done",
        }
    }
}
