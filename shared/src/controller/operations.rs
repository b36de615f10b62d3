use tracing::{info, instrument, warn};

use super::{CaseController, CaseError, Directive, Directives, Origin, Phase, RunningJob};
use crate::capabilities::RemoteRequest;
use crate::event::{RemotePath, StageId};
use crate::model::StageState;
use crate::params::{diff_params, merge_params, ParamDocument, ParamMap};

impl CaseController {
    /// Subscribes to the notifiers and, for a case opened from an existing
    /// folder, starts loading its data. Calling it again is a no-op.
    #[instrument(skip(self), fields(case = %self.label()))]
    pub fn attach(&mut self) -> Directives {
        let mut out = Vec::new();
        if self.is_defunct() || self.attached {
            return out;
        }
        self.attached = true;
        out.push(Directive::WatchJobs);
        self.watch_case_folder(&mut out);

        if self.origin == Origin::Existing && matches!(self.phase, Phase::EmptyCase) {
            if let Some(folder) = self.case_folder.clone() {
                let op = self.read_case_data(&folder, &mut out);
                self.enter(Phase::InitDataLoad { op });
            }
        }
        self.finish(out)
    }

    #[instrument(skip(self), fields(case = %self.label()))]
    pub fn create_case(&mut self, name: &str, parent: &RemotePath) -> Result<Directives, CaseError> {
        self.ensure_live()?;
        if !matches!(self.phase, Phase::TypeSelected) {
            return Err(self.busy("create a case"));
        }
        self.config.validate_case_name(name)?;

        let mut out = Vec::new();
        let op = self.issue(
            RemoteRequest::MakeDir {
                parent: parent.clone(),
                name: name.to_string(),
            },
            &mut out,
        );
        self.name = Some(name.to_string());
        self.enter(Phase::MakingFolder {
            op,
            folder: parent.join(name),
        });
        Ok(self.finish(out))
    }

    #[instrument(skip(self), fields(case = %self.label()))]
    pub fn duplicate_case(
        &mut self,
        name: &str,
        parent: &RemotePath,
        source: &RemotePath,
    ) -> Result<Directives, CaseError> {
        self.ensure_live()?;
        if self.origin != Origin::Duplicate
            || self.case_folder.is_some()
            || !matches!(self.phase, Phase::EmptyCase)
        {
            return Err(self.busy("duplicate a case"));
        }
        self.config.validate_case_name(name)?;

        let mut out = Vec::new();
        let op = self.issue(
            RemoteRequest::CopyTree {
                source: source.clone(),
                parent: parent.clone(),
                name: name.to_string(),
            },
            &mut out,
        );
        self.name = Some(name.to_string());
        self.enter(Phase::CopyingFolder {
            op,
            folder: parent.join(name),
        });
        Ok(self.finish(out))
    }

    /// Uploads the parameters that differ from the stored ones. Only
    /// parameters of stages that have not produced output may change.
    #[instrument(skip(self, params), fields(case = %self.label(), count = params.len()))]
    pub fn change_parameters(&mut self, params: &ParamMap) -> Result<Directives, CaseError> {
        self.ensure_live()?;
        if !matches!(self.phase, Phase::Ready) {
            return Err(self.busy("change parameters"));
        }
        let case_type = self.case_type.clone().ok_or(CaseError::UnknownCaseType)?;
        let folder = self.case_folder.clone().ok_or(CaseError::NoCaseFolder)?;

        let delta = diff_params(&self.stored_params, params);
        for name in delta.keys() {
            let owner = case_type
                .param_owner(name)
                .ok_or_else(|| CaseError::UnknownParameter(name.clone()))?;
            let state = self
                .stored_stage_states
                .get(&owner.id)
                .copied()
                .unwrap_or(StageState::Unready);
            if !state.params_editable() {
                return Err(CaseError::FrozenParameter {
                    param: name.clone(),
                    stage: owner.id.clone(),
                    state,
                });
            }
        }
        if delta.is_empty() {
            return Err(CaseError::NoChanges);
        }

        let document = ParamDocument::new(
            case_type.id.clone(),
            merge_params(&self.stored_params, &delta),
        );
        let contents = document.to_json()?;

        let mut out = Vec::new();
        let op = self.issue(
            RemoteRequest::UploadFile {
                folder,
                file_name: self.config.param_file_name.clone(),
                contents,
            },
            &mut out,
        );
        self.enter(Phase::UserParamUpload {
            op,
            prospective: delta,
        });
        Ok(self.finish(out))
    }

    #[instrument(skip(self), fields(case = %self.label()))]
    pub fn start_stage_app(&mut self, stage: &StageId) -> Result<Directives, CaseError> {
        self.ensure_live()?;
        if !matches!(self.phase, Phase::Ready) {
            return Err(self.busy("start a stage"));
        }
        let case_type = self.case_type.clone().ok_or(CaseError::UnknownCaseType)?;
        let descriptor = case_type
            .stage(stage)
            .ok_or_else(|| CaseError::UnknownStage(stage.clone()))?;
        let state = self.stored_state(stage);
        if state != StageState::Unrun {
            return Err(CaseError::StageNotRunnable {
                stage: stage.clone(),
                state,
            });
        }
        let folder = self.case_folder.clone().ok_or(CaseError::NoCaseFolder)?;
        let case_name = self
            .name
            .clone()
            .unwrap_or_else(|| folder.name().to_string());

        let mut out = Vec::new();
        let op = self.issue(
            RemoteRequest::InvokeJob {
                app_id: descriptor.app_id.clone(),
                job_name: self.config.job_name(&case_name, stage),
                case_folder: folder,
                stage: stage.clone(),
                params: self.stored_params.clone(),
            },
            &mut out,
        );
        info!(stage = %stage, app = %descriptor.app_id, "starting stage");
        self.enter(Phase::StartingJob {
            op,
            job: RunningJob::starting(stage.clone()),
        });
        Ok(self.finish(out))
    }

    /// Deletes the stage's output folder so it can be run again.
    #[instrument(skip(self), fields(case = %self.label()))]
    pub fn roll_back(&mut self, stage: &StageId) -> Result<Directives, CaseError> {
        self.ensure_live()?;
        if !matches!(self.phase, Phase::Ready) {
            return Err(self.busy("roll back a stage"));
        }
        let case_type = self.case_type.clone().ok_or(CaseError::UnknownCaseType)?;
        if case_type.stage(stage).is_none() {
            return Err(CaseError::UnknownStage(stage.clone()));
        }
        let state = self.stored_state(stage);
        if !state.can_roll_back() {
            return Err(CaseError::StageNotRollbackable {
                stage: stage.clone(),
                state,
            });
        }
        let folder = self.case_folder.clone().ok_or(CaseError::NoCaseFolder)?;

        let mut out = Vec::new();
        let op = self.issue(
            RemoteRequest::DeleteTree {
                path: folder.join(stage.as_str()),
            },
            &mut out,
        );
        self.enter(Phase::WaitingFolderDel {
            op,
            stage: stage.clone(),
        });
        Ok(self.finish(out))
    }

    #[instrument(skip(self), fields(case = %self.label()))]
    pub fn stop_job(&mut self, stage: &StageId) -> Result<Directives, CaseError> {
        self.ensure_live()?;
        let tracked = match &self.phase {
            Phase::RunningJobNoRecord { job } | Phase::RunningJobYesRecord { job } => job.clone(),
            phase if phase.kind().is_settled() => {
                return Err(CaseError::NoRunningJob(stage.clone()));
            }
            _ => return Err(self.busy("stop a job")),
        };
        let Some(job_id) = tracked.job.clone().filter(|_| &tracked.stage == stage) else {
            return Err(CaseError::NoRunningJob(stage.clone()));
        };

        let mut out = Vec::new();
        let op = self.issue(RemoteRequest::KillJob { job: job_id }, &mut out);
        self.enter(Phase::StoppingJob { op, job: tracked });
        Ok(self.finish(out))
    }

    #[instrument(skip(self), fields(case = %self.label()))]
    pub fn download_case(&mut self, destination: &str) -> Result<Directives, CaseError> {
        self.ensure_live()?;
        if !matches!(self.phase, Phase::Ready) {
            return Err(self.busy("download the case"));
        }
        if destination.trim().is_empty() {
            return Err(CaseError::EmptyDestination);
        }
        let folder = self.case_folder.clone().ok_or(CaseError::NoCaseFolder)?;

        let mut out = Vec::new();
        let op = self.issue(
            RemoteRequest::DownloadTree {
                source: folder,
                destination: destination.to_string(),
            },
            &mut out,
        );
        self.enter(Phase::Download {
            op,
            destination: destination.to_string(),
        });
        Ok(self.finish(out))
    }

    /// Drops every subscription and marks the case defunct. Remote data is
    /// left untouched; in-flight operations are abandoned.
    #[instrument(skip(self), fields(case = %self.label()))]
    pub fn kill_case_connection(&mut self) -> Directives {
        let mut out = Vec::new();
        if self.is_defunct() {
            return out;
        }
        if let Some(op) = self.phase.outstanding() {
            warn!(handle = %op, "abandoning outstanding operation");
        }
        self.release_subscriptions(&mut out);
        self.enter(Phase::Defunct);
        self.finish(out)
    }

    fn stored_state(&self, stage: &StageId) -> StageState {
        self.stored_stage_states
            .get(stage)
            .copied()
            .unwrap_or(StageState::Unready)
    }
}
