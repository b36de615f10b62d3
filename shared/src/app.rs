//! Crux host for the current case.
//!
//! The app owns at most one `CaseController`, forwards shell notifications
//! to it and turns its directives into capability requests.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capabilities::{Capabilities, RemoteOperation};
use crate::case_type::{CaseTypeCatalog, CaseTypeDescriptor};
use crate::config::CaseConfig;
use crate::controller::{
    CaseController, CaseError, CaseEvent, Directive, Directives, DownloadReport,
};
use crate::event::{Event, RemotePath};
use crate::model::{CaseState, StageState};
use crate::params::ParamMap;
use crate::{AppError, ErrorKind, UserFacingError};

#[derive(Debug)]
pub struct Model {
    pub config: CaseConfig,
    pub catalog: CaseTypeCatalog,
    pub current: Option<CaseController>,
    pub last_rejection: Option<AppError>,
    /// Folder of the last case dropped because it disappeared remotely.
    pub detached_folder: Option<RemotePath>,
    pub online: bool,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            config: CaseConfig::default(),
            catalog: CaseTypeCatalog::default(),
            current: None,
            last_rejection: None,
            detached_folder: None,
            online: true,
        }
    }
}

// --- View types ---

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaseTypeSummary {
    pub id: String,
    pub display_name: String,
    pub stage_count: usize,
}

impl From<&CaseTypeDescriptor> for CaseTypeSummary {
    fn from(t: &CaseTypeDescriptor) -> Self {
        Self {
            id: t.id.to_string(),
            display_name: t.display_name.clone(),
            stage_count: t.stages.len(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageView {
    pub id: String,
    pub display_name: String,
    pub state: StageState,
    pub label: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaseView {
    pub name: Option<String>,
    pub folder: Option<String>,
    pub type_id: Option<String>,
    pub type_name: Option<String>,
    pub state: CaseState,
    pub stages: Vec<StageView>,
    pub params: ParamMap,
    pub running_job: Option<String>,
    pub last_error: Option<String>,
    pub last_download: Option<DownloadReport>,
}

impl From<&CaseController> for CaseView {
    fn from(case: &CaseController) -> Self {
        let states = case.stage_states();
        let stages = case
            .case_type()
            .map(|t| {
                t.stages
                    .iter()
                    .map(|stage| {
                        let state = states.get(&stage.id).copied().unwrap_or(StageState::Unready);
                        StageView {
                            id: stage.id.to_string(),
                            display_name: stage.display_name.clone(),
                            state,
                            label: state.label().to_string(),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: case.case_name().map(str::to_string),
            folder: case.case_folder().map(ToString::to_string),
            type_id: case.case_type().map(|t| t.id.to_string()),
            type_name: case.case_type().map(|t| t.display_name.clone()),
            state: case.case_state(),
            stages,
            params: case.current_params().clone(),
            running_job: case
                .running_job()
                .and_then(|job| job.job.as_ref())
                .map(ToString::to_string),
            last_error: case.last_error().map(str::to_string),
            last_download: case.last_download().cloned(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub case: Option<CaseView>,
    pub case_types: Vec<CaseTypeSummary>,
    pub error: Option<UserFacingError>,
    pub online: bool,
    pub detached_folder: Option<String>,
}

// --- App ---

#[derive(Default)]
pub struct App;

impl App {
    /// Executes controller directives. Returns true if the view changed.
    fn dispatch(directives: Directives, model: &mut Model, caps: &Capabilities) -> bool {
        let mut changed = false;
        for directive in directives {
            match directive {
                Directive::Issue(RemoteOperation { handle, request }) => {
                    caps.remote
                        .issue(handle, request, |handle, kind, outcome| Event::RemoteOpDone {
                            handle,
                            kind,
                            outcome: Box::new(outcome),
                        });
                }
                Directive::WatchFolder(path) => caps.watch.watch_folder(path),
                Directive::UnwatchFolder(path) => caps.watch.unwatch_folder(path),
                Directive::WatchJobs => caps.watch.watch_jobs(),
                Directive::UnwatchJobs => caps.watch.unwatch_jobs(),
                Directive::Publish => changed = true,
                Directive::Detach => {
                    if let Some(case) = model.current.take() {
                        info!(folder = ?case.case_folder(), "detaching case");
                        model.detached_folder = case.case_folder().cloned();
                    }
                    changed = true;
                }
            }
        }
        changed
    }

    fn close_current(model: &mut Model, caps: &Capabilities) -> bool {
        let Some(mut case) = model.current.take() else {
            return false;
        };
        let directives = case.kill_case_connection();
        Self::dispatch(directives, model, caps);
        true
    }

    /// Makes `next` the current case, severing the previous one first.
    fn replace_current(model: &mut Model, caps: &Capabilities, mut next: CaseController) {
        Self::close_current(model, caps);
        model.detached_folder = None;
        model.last_rejection = None;
        let directives = next.attach();
        model.current = Some(next);
        Self::dispatch(directives, model, caps);
    }

    fn operate<F>(model: &mut Model, caps: &Capabilities, operation: &'static str, f: F) -> bool
    where
        F: FnOnce(&mut CaseController) -> Result<Directives, CaseError>,
    {
        let Some(case) = model.current.as_mut() else {
            Self::reject(
                model,
                AppError::new(ErrorKind::InvalidState, "No case is open"),
                operation,
            );
            return true;
        };
        match f(case) {
            Ok(directives) => {
                let cleared = model.last_rejection.take().is_some();
                Self::dispatch(directives, model, caps) || cleared
            }
            Err(e) => {
                Self::reject(model, e.into(), operation);
                true
            }
        }
    }

    fn reject(model: &mut Model, error: AppError, operation: &'static str) {
        warn!(operation, code = error.code(), error = %error, "request rejected");
        model.last_rejection = Some(error.with_context("operation", operation));
    }

    fn forward(model: &mut Model, caps: &Capabilities, event: CaseEvent) -> bool {
        let Some(case) = model.current.as_mut() else {
            debug!(event = event.name(), "no open case, dropping event");
            return false;
        };
        let directives = case.handle_event(event);
        Self::dispatch(directives, model, caps)
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Self::Event, model: &mut Self::Model, caps: &Self::Capabilities) {
        debug!(event = event.name(), "update");
        let changed = match event {
            Event::Configure(config) => {
                match config.validate() {
                    Ok(()) => {
                        info!(param_file = %config.param_file_name, "configuration applied");
                        model.config = config;
                    }
                    Err(e) => Self::reject(model, e.into(), "configure"),
                }
                true
            }
            Event::CaseTypesLoaded(descriptors) => {
                let mut catalog = CaseTypeCatalog::new();
                for descriptor in descriptors {
                    let id = descriptor.id.clone();
                    if let Err(e) = catalog.insert(descriptor) {
                        warn!(case_type = %id, error = %e, "skipping case type");
                        Self::reject(model, e.into(), "load_case_types");
                    }
                }
                info!(count = catalog.len(), "case types loaded");
                model.catalog = catalog;
                true
            }
            Event::SelectCaseType { type_id } => {
                if let Some(case_type) = model.catalog.get(&type_id) {
                    let next = CaseController::with_type(
                        case_type,
                        model.catalog.clone(),
                        model.config.clone(),
                    );
                    Self::replace_current(model, caps, next);
                } else {
                    Self::reject(
                        model,
                        AppError::new(ErrorKind::NotFound, format!("Unknown case type {type_id}")),
                        "select_case_type",
                    );
                }
                true
            }
            Event::OpenCase { folder } => {
                let next =
                    CaseController::open(folder, model.catalog.clone(), model.config.clone());
                Self::replace_current(model, caps, next);
                true
            }
            Event::DuplicateCase {
                name,
                parent,
                source,
            } => {
                if let Err(e) = model.config.validate_case_name(&name) {
                    Self::reject(model, e.into(), "duplicate_case");
                } else {
                    let next =
                        CaseController::for_duplication(model.catalog.clone(), model.config.clone());
                    Self::replace_current(model, caps, next);
                    Self::operate(model, caps, "duplicate_case", |case| {
                        case.duplicate_case(&name, &parent, &source)
                    });
                }
                true
            }
            Event::CloseCase => {
                model.last_rejection = None;
                Self::close_current(model, caps)
            }
            Event::CreateCase { name, parent } => {
                Self::operate(model, caps, "create_case", |case| {
                    case.create_case(&name, &parent)
                })
            }
            Event::ChangeParameters { params } => {
                Self::operate(model, caps, "change_parameters", |case| {
                    case.change_parameters(&params)
                })
            }
            Event::StartStage { stage } => Self::operate(model, caps, "start_stage", |case| {
                case.start_stage_app(&stage)
            }),
            Event::RollBack { stage } => {
                Self::operate(model, caps, "roll_back", |case| case.roll_back(&stage))
            }
            Event::StopJob { stage } => {
                Self::operate(model, caps, "stop_job", |case| case.stop_job(&stage))
            }
            Event::DownloadCase { destination } => {
                Self::operate(model, caps, "download_case", |case| {
                    case.download_case(&destination)
                })
            }
            Event::FolderChanged { path, exists } => {
                Self::forward(model, caps, CaseEvent::FolderChanged { path, exists })
            }
            Event::JobListUpdated(snapshot) => {
                Self::forward(model, caps, CaseEvent::JobListUpdated(snapshot))
            }
            Event::ConnectionLost { reason } => {
                model.online = false;
                Self::forward(model, caps, CaseEvent::ConnectionLost { reason });
                true
            }
            Event::ConnectionRestored => {
                model.online = true;
                Self::forward(model, caps, CaseEvent::ConnectionRestored);
                true
            }
            Event::RemoteOpDone {
                handle,
                kind,
                outcome,
            } => Self::forward(
                model,
                caps,
                CaseEvent::from_completion(handle, kind, *outcome),
            ),
        };

        if changed {
            caps.render.render();
        }
    }

    fn view(&self, model: &Self::Model) -> Self::ViewModel {
        ViewModel {
            case: model.current.as_ref().map(CaseView::from),
            case_types: model.catalog.iter().map(CaseTypeSummary::from).collect(),
            error: model.last_rejection.as_ref().map(UserFacingError::from),
            online: model.online,
            detached_folder: model.detached_folder.as_ref().map(ToString::to_string),
        }
    }
}
