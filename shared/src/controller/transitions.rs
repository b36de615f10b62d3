use tracing::{debug, info, instrument, warn};

use super::{CaseController, CaseEvent, Directive, Directives, DownloadReport, Origin, Phase};
use crate::capabilities::{CaseData, FailureKind, RemoteFailure, RemotePayload, RemoteRequest};
use crate::event::{JobId, OpHandle, RemotePath, StageId};
use crate::model::{JobSnapshot, JobStatus};
use crate::params::{merge_params, ParamDocument};

use super::RunningJob;

impl CaseController {
    /// Feeds one collaborator event through the state machine.
    #[instrument(skip(self, event), fields(case = %self.label(), event = event.name()))]
    pub fn handle_event(&mut self, event: CaseEvent) -> Directives {
        if self.is_defunct() {
            debug!("dropping event for defunct case");
            return Vec::new();
        }
        let mut out = Vec::new();
        match event {
            CaseEvent::FolderChanged { path, exists } => {
                self.on_folder_changed(&path, exists, &mut out);
            }
            CaseEvent::JobListUpdated(snapshot) => self.on_job_list(snapshot, &mut out),
            CaseEvent::ConnectionLost { reason } => self.go_offline(reason),
            CaseEvent::ConnectionRestored => self.on_connection_restored(&mut out),
            CaseEvent::TaskDone { handle, outcome } => {
                if self.accept(&handle, outcome.as_ref().err()) {
                    self.on_task_done(outcome, &mut out);
                }
            }
            CaseEvent::JobInvoked { handle, outcome } => {
                if self.accept(&handle, outcome.as_ref().err()) {
                    self.on_job_invoked(outcome, &mut out);
                }
            }
            CaseEvent::JobKilled { handle, outcome } => {
                if self.accept(&handle, outcome.as_ref().err()) {
                    self.on_job_killed(outcome, &mut out);
                }
            }
            CaseEvent::RecursiveOpDone { handle, outcome } => {
                if self.accept(&handle, outcome.as_ref().err()) {
                    self.on_recursive_done(outcome, &mut out);
                }
            }
        }
        self.finish(out)
    }

    /// Filters completions: stale handles are ignored and a dropped
    /// connection takes the case offline. Returns true if the completion
    /// should be applied to the current phase.
    fn accept(&mut self, handle: &OpHandle, failure: Option<&RemoteFailure>) -> bool {
        if self.phase.outstanding() != Some(handle) {
            debug!(handle = %handle, state = %self.phase.kind(), "ignoring stale completion");
            return false;
        }
        if let Some(failure) = failure {
            warn!(handle = %handle, kind = ?failure.kind, message = %failure.message, "remote operation failed");
            if failure.kind == FailureKind::Disconnected {
                self.go_offline(failure.message.clone());
                return false;
            }
        }
        true
    }

    fn go_offline(&mut self, reason: String) {
        if matches!(self.phase, Phase::Offline) {
            return;
        }
        warn!(reason = %reason, "case connection lost");
        self.last_error = Some(reason);
        self.enter(Phase::Offline);
    }

    fn on_connection_restored(&mut self, out: &mut Directives) {
        if !matches!(self.phase, Phase::Offline) {
            return;
        }
        self.watch_case_folder(out);
        if let Some(folder) = self.case_folder.clone() {
            let op = self.read_case_data(&folder, out);
            self.reload_pending = false;
            if self.case_type.is_some() {
                self.enter(Phase::ReDataLoad { op });
            } else {
                self.enter(Phase::InitDataLoad { op });
            }
        } else if self.origin == Origin::Duplicate {
            self.enter(Phase::EmptyCase);
        } else if self.case_type.is_some() {
            self.enter(Phase::TypeSelected);
        }
    }

    fn on_folder_changed(&mut self, path: &RemotePath, exists: bool, out: &mut Directives) {
        let Some(folder) = self.case_folder.clone() else {
            return;
        };
        if !path.is_related(&folder) {
            return;
        }
        if !exists && path.contains(&folder) {
            self.vanish(out);
            return;
        }
        match self.phase {
            Phase::Ready => {
                let op = self.read_case_data(&folder, out);
                self.enter(Phase::ReDataLoad { op });
            }
            Phase::Offline
            | Phase::Invalid
            | Phase::Error
            | Phase::Defunct
            | Phase::TypeSelected
            | Phase::EmptyCase => {}
            _ => {
                debug!(path = %path, "deferring reload until the case settles");
                self.reload_pending = true;
            }
        }
    }

    fn vanish(&mut self, out: &mut Directives) {
        info!("case folder no longer exists");
        self.last_error = Some("Case folder no longer exists".to_string());
        self.release_subscriptions(out);
        self.enter(Phase::Defunct);
        out.push(Directive::Detach);
    }

    fn on_job_list(&mut self, snapshot: JobSnapshot, out: &mut Directives) {
        self.jobs = snapshot;
        let Some(folder) = self.case_folder.clone() else {
            return;
        };
        match self.phase.clone() {
            Phase::Ready => {
                if let Some(job) = self.jobs.active_for(&folder) {
                    let tracked = RunningJob {
                        stage: job.stage.clone(),
                        job: Some(job.id.clone()),
                        status: Some(job.status),
                    };
                    info!(job = %job.id, stage = %job.stage, "tracking job found in listing");
                    self.enter(Phase::RunningJobNoRecord { job: tracked });
                }
            }
            Phase::RunningJobYesRecord { job } => self.follow_job(job, true, out),
            Phase::RunningJobNoRecord { job } => self.follow_job(job, false, out),
            Phase::FolderCheckStoppedJob { stage } => {
                let still_active = self
                    .jobs
                    .relevant_to(&folder)
                    .filter(|job| job.stage == stage && job.status.is_active())
                    .max_by(|a, b| (a.submitted_at_ms, &a.id).cmp(&(b.submitted_at_ms, &b.id)))
                    .map(|job| RunningJob {
                        stage: job.stage.clone(),
                        job: Some(job.id.clone()),
                        status: Some(job.status),
                    });
                match still_active {
                    Some(job) => self.enter(Phase::RunningJobNoRecord { job }),
                    None => self.settle(out),
                }
            }
            Phase::StoppingJob { op, mut job } => {
                if let Some(status) = job.job.as_ref().and_then(|id| self.job_status(id)) {
                    job.status = Some(status);
                    self.phase = Phase::StoppingJob { op, job };
                }
            }
            _ => {}
        }
    }

    /// Advances a tracked job. `invoked` is true when this controller
    /// started the job, in which case a listing that does not show it yet
    /// is simply not up to date.
    fn follow_job(&mut self, mut job: RunningJob, invoked: bool, out: &mut Directives) {
        let listed = job.job.as_ref().and_then(|id| self.job_status(id));
        match listed {
            Some(status) if status.is_terminal() => {
                info!(stage = %job.stage, status = %status, "tracked job ended");
                self.stored_outputs.insert(job.stage);
                self.settle(out);
            }
            Some(status) => {
                job.status = Some(status);
                self.phase = if invoked {
                    Phase::RunningJobYesRecord { job }
                } else {
                    Phase::RunningJobNoRecord { job }
                };
            }
            None if invoked => {}
            None => {
                info!(stage = %job.stage, "tracked job left the listing");
                self.settle(out);
            }
        }
    }

    fn job_status(&self, id: &JobId) -> Option<JobStatus> {
        self.jobs.find(id).map(|job| job.status)
    }

    fn on_task_done(
        &mut self,
        outcome: Result<RemotePayload, RemoteFailure>,
        out: &mut Directives,
    ) {
        match self.phase.clone() {
            Phase::MakingFolder { folder, .. } => match outcome {
                Ok(_) => self.folder_created(folder, out),
                Err(failure) => self.fail(format!("Could not create case folder: {}", failure.message)),
            },
            Phase::CopyingFolder { folder, .. } => match outcome {
                Ok(_) => {
                    self.case_folder = Some(folder.clone());
                    self.watch_case_folder(out);
                    let op = self.read_case_data(&folder, out);
                    self.enter(Phase::InitDataLoad { op });
                }
                Err(failure) => self.fail(format!("Could not copy case: {}", failure.message)),
            },
            Phase::InitParamUpload { prospective, .. } => match outcome {
                Ok(_) => {
                    self.stored_params = merge_params(&self.stored_params, &prospective);
                    self.settle(out);
                }
                Err(failure) if failure.kind == FailureKind::NotFound => {
                    self.fail(format!("Case folder is unreachable: {}", failure.message));
                }
                Err(failure) => {
                    self.last_error = Some(format!(
                        "Could not write initial parameters: {}",
                        failure.message
                    ));
                    self.settle(out);
                }
            },
            Phase::UserParamUpload { prospective, .. } => match outcome {
                Ok(_) => {
                    self.stored_params = merge_params(&self.stored_params, &prospective);
                    self.settle(out);
                }
                Err(failure) if failure.kind == FailureKind::NotFound => {
                    self.fail(format!("Case folder is unreachable: {}", failure.message));
                }
                Err(failure) => {
                    self.last_error =
                        Some(format!("Parameter change rejected: {}", failure.message));
                    self.settle(out);
                }
            },
            Phase::InitDataLoad { .. } => self.data_loaded(outcome, true, out),
            Phase::ReDataLoad { .. } => self.data_loaded(outcome, false, out),
            other => {
                warn!(state = %other.kind(), "task completion does not match the current state");
            }
        }
    }

    fn folder_created(&mut self, folder: RemotePath, out: &mut Directives) {
        self.case_folder = Some(folder.clone());
        self.watch_case_folder(out);
        let Some(case_type) = self.case_type.clone() else {
            self.fail("Case type is not known".to_string());
            return;
        };
        let initial = case_type.initial_params();
        if initial.is_empty() {
            self.settle(out);
            return;
        }
        let contents = match ParamDocument::new(case_type.id.clone(), initial.clone()).to_json() {
            Ok(contents) => contents,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };
        let op = self.issue(
            RemoteRequest::UploadFile {
                folder,
                file_name: self.config.param_file_name.clone(),
                contents,
            },
            out,
        );
        self.enter(Phase::InitParamUpload {
            op,
            prospective: initial,
        });
    }

    fn data_loaded(
        &mut self,
        outcome: Result<RemotePayload, RemoteFailure>,
        initial: bool,
        out: &mut Directives,
    ) {
        match outcome {
            Ok(RemotePayload::CaseData(data)) => self.apply_case_data(data, initial, out),
            Ok(other) => {
                warn!(payload = ?other, "case data read returned an unexpected payload");
                self.reject_data("Case data could not be read".to_string(), initial);
            }
            Err(failure) if failure.kind == FailureKind::NotFound => self.vanish(out),
            Err(failure) => self.fail(format!("Could not read case data: {}", failure.message)),
        }
    }

    fn apply_case_data(&mut self, data: CaseData, initial: bool, out: &mut Directives) {
        if !data.exists {
            self.vanish(out);
            return;
        }
        let document = match data.param_document.as_deref().map(ParamDocument::parse) {
            None => None,
            Some(Ok(document)) => Some(document),
            Some(Err(e)) => {
                self.reject_data(e.to_string(), initial);
                return;
            }
        };

        let case_type = match (self.case_type.clone(), &document) {
            (Some(known), Some(doc)) if known.id != doc.type_id => {
                self.enter(Phase::Invalid);
                self.last_error = Some(format!(
                    "Case type {} does not match expected {}",
                    doc.type_id, known.id
                ));
                return;
            }
            (Some(known), _) => known,
            (None, Some(doc)) => {
                if let Some(found) = self.catalog.get(&doc.type_id) {
                    found
                } else {
                    self.enter(Phase::Invalid);
                    self.last_error = Some(format!("Unknown case type {}", doc.type_id));
                    return;
                }
            }
            (None, None) => {
                self.enter(Phase::Invalid);
                self.last_error = Some("Folder has no parameter file".to_string());
                return;
            }
        };

        self.stored_params = document.map(|doc| doc.vars).unwrap_or_default();
        self.stored_outputs = data
            .entries
            .iter()
            .filter(|entry| case_type.is_stage_name(entry))
            .map(|entry| StageId::new(entry.as_str()))
            .collect();
        self.case_type = Some(case_type);
        if initial {
            self.last_error = None;
        }

        let active = self.case_folder.as_ref().and_then(|folder| {
            self.jobs.active_for(folder).map(|job| RunningJob {
                stage: job.stage.clone(),
                job: Some(job.id.clone()),
                status: Some(job.status),
            })
        });
        match active {
            Some(job) => self.enter(Phase::RunningJobNoRecord { job }),
            None => self.settle(out),
        }
    }

    fn reject_data(&mut self, reason: String, initial: bool) {
        warn!(reason = %reason, "rejecting case data");
        self.last_error = Some(reason);
        self.enter(if initial { Phase::Invalid } else { Phase::Error });
    }

    fn fail(&mut self, reason: String) {
        self.last_error = Some(reason);
        self.enter(Phase::Error);
    }

    fn on_job_invoked(&mut self, outcome: Result<JobId, RemoteFailure>, out: &mut Directives) {
        let Phase::StartingJob { job, .. } = &self.phase else {
            warn!(state = %self.phase.kind(), "job invocation does not match the current state");
            return;
        };
        let stage = job.stage.clone();
        match outcome {
            Ok(id) => {
                info!(job = %id, stage = %stage, "job invoked");
                let status = self.job_status(&id);
                self.enter(Phase::RunningJobYesRecord {
                    job: RunningJob {
                        stage,
                        job: Some(id),
                        status,
                    },
                });
            }
            Err(failure) => {
                self.last_error = Some(format!(
                    "Could not start stage {stage}: {}",
                    failure.message
                ));
                self.settle(out);
            }
        }
    }

    fn on_job_killed(&mut self, outcome: Result<(), RemoteFailure>, out: &mut Directives) {
        if !matches!(self.phase, Phase::StoppingJob { .. }) {
            warn!(state = %self.phase.kind(), "job kill does not match the current state");
            return;
        }
        if let Err(failure) = outcome {
            self.last_error = Some(format!("Could not stop job: {}", failure.message));
        }
        self.settle(out);
    }

    fn on_recursive_done(&mut self, outcome: Result<(), RemoteFailure>, out: &mut Directives) {
        match self.phase.clone() {
            Phase::WaitingFolderDel { stage, .. } => {
                match outcome {
                    Ok(()) => {
                        info!(stage = %stage, "stage output removed");
                        self.stored_outputs.remove(&stage);
                        self.enter(Phase::FolderCheckStoppedJob { stage });
                    }
                    Err(failure) => {
                        self.last_error = Some(format!(
                            "Rollback of {stage} failed: {}",
                            failure.message
                        ));
                        self.settle(out);
                    }
                }
            }
            Phase::Download { destination, .. } => {
                let report = DownloadReport {
                    destination,
                    success: outcome.is_ok(),
                    message: outcome.err().map(|failure| failure.message),
                };
                info!(destination = %report.destination, success = report.success, "download finished");
                self.last_download = Some(report);
                self.settle(out);
            }
            other => {
                warn!(state = %other.kind(), "recursive completion does not match the current state");
            }
        }
    }
}
