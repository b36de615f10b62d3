//! Per-stage state derivation.
//!
//! Stage states are never stored independently: they are recomputed from the
//! case type, the confirmed parameters, the stage output folders present in
//! the case folder and the latest job listing.

use std::collections::BTreeSet;

use crate::case_type::{CaseTypeDescriptor, StageDescriptor};
use crate::event::{RemotePath, StageId};
use crate::model::{JobStatus, RemoteJob, StageState, StageStates};
use crate::params::ParamMap;

#[derive(Debug, Clone, Copy)]
pub struct StageInputs<'a> {
    pub case_type: &'a CaseTypeDescriptor,
    pub params: &'a ParamMap,
    /// Stage ids with an output folder inside the case folder.
    pub outputs: &'a BTreeSet<StageId>,
    pub case_folder: Option<&'a RemotePath>,
    pub jobs: &'a [RemoteJob],
}

#[must_use]
pub fn derive_stage_states(inputs: &StageInputs<'_>) -> StageStates {
    let relevant: Vec<&RemoteJob> = match inputs.case_folder {
        Some(folder) => inputs
            .jobs
            .iter()
            .filter(|job| &job.case_folder == folder)
            .collect(),
        None => Vec::new(),
    };

    let mut states = StageStates::new();
    for stage in &inputs.case_type.stages {
        let stage_jobs: Vec<&RemoteJob> = relevant
            .iter()
            .copied()
            .filter(|job| job.stage == stage.id)
            .collect();
        let state = first_pass_state(stage, &stage_jobs, inputs, &states);
        states.insert(stage.id.clone(), state);
    }

    // Finished stages something downstream depends on.
    let held: BTreeSet<StageId> = inputs
        .case_type
        .stages
        .iter()
        .filter(|stage| {
            matches!(
                states.get(&stage.id),
                Some(StageState::Running | StageState::Finished | StageState::Error)
            )
        })
        .flat_map(|stage| stage.prerequisites.iter().cloned())
        .collect();

    for (id, state) in &mut states {
        if *state == StageState::Finished && held.contains(id) {
            *state = StageState::FinishedPrereq;
        }
    }
    states
}

fn first_pass_state(
    stage: &StageDescriptor,
    stage_jobs: &[&RemoteJob],
    inputs: &StageInputs<'_>,
    earlier: &StageStates,
) -> StageState {
    let prerequisites_met = stage.prerequisites.iter().all(|prerequisite| {
        earlier
            .get(prerequisite)
            .is_some_and(|state| state.is_finished())
    });
    if !prerequisites_met {
        return StageState::Unready;
    }
    if stage_jobs.iter().any(|job| job.status.is_active()) {
        return StageState::Running;
    }
    if stage_jobs.iter().any(|job| !job.details_loaded) {
        return StageState::Loading;
    }
    if inputs.outputs.contains(&stage.id) {
        return match latest(stage_jobs) {
            Some(job) if job.status == JobStatus::Failed => StageState::Error,
            _ => StageState::Finished,
        };
    }
    if stage
        .required_params()
        .any(|name| inputs.params.get(name).map_or(true, |v| v.trim().is_empty()))
    {
        return StageState::Unready;
    }
    StageState::Unrun
}

fn latest<'a>(jobs: &[&'a RemoteJob]) -> Option<&'a RemoteJob> {
    jobs.iter()
        .copied()
        .max_by(|a, b| (a.submitted_at_ms, &a.id).cmp(&(b.submitted_at_ms, &b.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case_type::fixtures::{wind_tower, with_defaults};
    use crate::event::JobId;
    use proptest::prelude::*;

    fn folder() -> RemotePath {
        RemotePath::new("/cases/tower")
    }

    fn job(id: &str, stage: &str, status: JobStatus, submitted_at_ms: u64) -> RemoteJob {
        RemoteJob {
            id: JobId::new(id),
            case_folder: folder(),
            stage: StageId::new(stage),
            status,
            submitted_at_ms,
            details_loaded: true,
        }
    }

    fn outputs(ids: &[&str]) -> BTreeSet<StageId> {
        ids.iter().map(|id| StageId::new(*id)).collect()
    }

    fn derive(
        case_type: &CaseTypeDescriptor,
        params: &ParamMap,
        outputs: &BTreeSet<StageId>,
        jobs: &[RemoteJob],
    ) -> StageStates {
        let folder = folder();
        derive_stage_states(&StageInputs {
            case_type,
            params,
            outputs,
            case_folder: Some(&folder),
            jobs,
        })
    }

    fn state(states: &StageStates, id: &str) -> StageState {
        states[&StageId::new(id)]
    }

    mod derivation_tests {
        use super::*;

        #[test]
        fn test_fresh_case_first_stage_unrun_rest_unready() {
            let states = derive(&wind_tower(), &ParamMap::new(), &outputs(&[]), &[]);
            assert_eq!(state(&states, "mesh"), StageState::Unrun);
            assert_eq!(state(&states, "sim"), StageState::Unready);
            assert_eq!(state(&states, "post"), StageState::Unready);
        }

        #[test]
        fn test_missing_required_param_is_unready() {
            let case_type = with_defaults();
            let states = derive(&case_type, &ParamMap::new(), &outputs(&["mesh"]), &[]);
            assert_eq!(state(&states, "mesh"), StageState::Finished);
            assert_eq!(state(&states, "sim"), StageState::Unready);

            let params: ParamMap = [("velocity".to_string(), "12".to_string())].into();
            let states = derive(&case_type, &params, &outputs(&["mesh"]), &[]);
            assert_eq!(state(&states, "sim"), StageState::Unrun);
        }

        #[test]
        fn test_active_job_wins_over_output() {
            let states = derive(
                &wind_tower(),
                &ParamMap::new(),
                &outputs(&["mesh"]),
                &[job("j1", "mesh", JobStatus::Running, 1)],
            );
            assert_eq!(state(&states, "mesh"), StageState::Running);
        }

        #[test]
        fn test_unloaded_job_details_show_loading() {
            let mut pending = job("j1", "mesh", JobStatus::Finished, 1);
            pending.details_loaded = false;
            let states = derive(&wind_tower(), &ParamMap::new(), &outputs(&["mesh"]), &[pending]);
            assert_eq!(state(&states, "mesh"), StageState::Loading);
        }

        #[test]
        fn test_latest_failed_job_marks_error() {
            let jobs = [
                job("j1", "mesh", JobStatus::Finished, 1),
                job("j2", "mesh", JobStatus::Failed, 2),
            ];
            let states = derive(&wind_tower(), &ParamMap::new(), &outputs(&["mesh"]), &jobs);
            assert_eq!(state(&states, "mesh"), StageState::Error);
            assert_eq!(state(&states, "sim"), StageState::Unready);
        }

        #[test]
        fn test_finished_prerequisite_of_running_stage() {
            let states = derive(
                &wind_tower(),
                &ParamMap::new(),
                &outputs(&["mesh"]),
                &[job("j1", "sim", JobStatus::Queued, 5)],
            );
            assert_eq!(state(&states, "mesh"), StageState::FinishedPrereq);
            assert_eq!(state(&states, "sim"), StageState::Running);
            assert_eq!(state(&states, "post"), StageState::Unready);
        }

        #[test]
        fn test_finished_chain() {
            let states = derive(&wind_tower(), &ParamMap::new(), &outputs(&["mesh", "sim"]), &[]);
            assert_eq!(state(&states, "mesh"), StageState::FinishedPrereq);
            assert_eq!(state(&states, "sim"), StageState::Finished);
            assert_eq!(state(&states, "post"), StageState::Unrun);
        }

        #[test]
        fn test_output_without_finished_prerequisite_is_unready() {
            let states = derive(&wind_tower(), &ParamMap::new(), &outputs(&["sim"]), &[]);
            assert_eq!(state(&states, "mesh"), StageState::Unrun);
            assert_eq!(state(&states, "sim"), StageState::Unready);
            assert_eq!(state(&states, "post"), StageState::Unready);

            let states = derive(&wind_tower(), &ParamMap::new(), &outputs(&["mesh", "post"]), &[]);
            assert_eq!(state(&states, "mesh"), StageState::Finished);
            assert_eq!(state(&states, "sim"), StageState::Unrun);
            assert_eq!(state(&states, "post"), StageState::Unready);
        }

        #[test]
        fn test_prerequisite_checked_before_jobs() {
            let states = derive(
                &wind_tower(),
                &ParamMap::new(),
                &outputs(&[]),
                &[job("j1", "sim", JobStatus::Running, 1)],
            );
            assert_eq!(state(&states, "mesh"), StageState::Unrun);
            assert_eq!(state(&states, "sim"), StageState::Unready);
        }

        #[test]
        fn test_jobs_of_other_cases_are_ignored() {
            let mut foreign = job("j1", "mesh", JobStatus::Running, 1);
            foreign.case_folder = RemotePath::new("/cases/bridge");
            let states = derive(&wind_tower(), &ParamMap::new(), &outputs(&[]), &[foreign]);
            assert_eq!(state(&states, "mesh"), StageState::Unrun);
        }

        #[test]
        fn test_no_folder_means_no_relevant_jobs() {
            let case_type = wind_tower();
            let params = ParamMap::new();
            let outputs = outputs(&[]);
            let jobs = [job("j1", "mesh", JobStatus::Running, 1)];
            let states = derive_stage_states(&StageInputs {
                case_type: &case_type,
                params: &params,
                outputs: &outputs,
                case_folder: None,
                jobs: &jobs,
            });
            assert_eq!(state(&states, "mesh"), StageState::Unrun);
        }
    }

    fn arb_job() -> impl Strategy<Value = RemoteJob> {
        (
            prop::sample::select(vec!["mesh", "sim", "post"]),
            prop::sample::select(vec![
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Finished,
                JobStatus::Failed,
                JobStatus::Archived,
            ]),
            0u64..5,
            any::<bool>(),
        )
            .prop_map(|(stage, status, submitted_at_ms, details_loaded)| RemoteJob {
                id: JobId::new("unassigned"),
                case_folder: folder(),
                stage: StageId::new(stage),
                status,
                submitted_at_ms,
                details_loaded,
            })
    }

    // Job ids are unique within one listing.
    fn arb_jobs() -> impl Strategy<Value = Vec<RemoteJob>> {
        prop::collection::vec(arb_job(), 0..8).prop_map(|mut jobs| {
            for (i, job) in jobs.iter_mut().enumerate() {
                job.id = JobId::new(format!("j{i}"));
            }
            jobs
        })
    }

    proptest! {
        #[test]
        fn derivation_ignores_job_order(
            jobs in arb_jobs(),
            output_flags in prop::collection::vec(any::<bool>(), 3),
        ) {
            let case_type = wind_tower();
            let present: BTreeSet<StageId> = case_type
                .stages
                .iter()
                .zip(&output_flags)
                .filter(|(_, present)| **present)
                .map(|(stage, _)| stage.id.clone())
                .collect();
            let forward = derive(&case_type, &ParamMap::new(), &present, &jobs);
            let mut reversed_jobs = jobs.clone();
            reversed_jobs.reverse();
            let reversed = derive(&case_type, &ParamMap::new(), &present, &reversed_jobs);
            let again = derive(&case_type, &ParamMap::new(), &present, &jobs);

            prop_assert_eq!(&forward, &reversed);
            prop_assert_eq!(&forward, &again);
            prop_assert_eq!(forward.len(), case_type.stages.len());
        }
    }
}
