use assert_matches::assert_matches;
use case_core::capabilities::{
    CaseData, RemoteOperation, RemoteOutcome, RemotePayload, RemoteRequest, WatchOperation,
};
use case_core::case_type::CaseTypeDescriptor;
use case_core::event::{JobId, RemotePath, StageId};
use case_core::model::{CaseState, JobSnapshot, JobStatus, RemoteJob, StageState};
use case_core::{App, Effect, Event, Model};
use crux_core::testing::AppTester;

const WIND_TOWER: &str = r#"{
    "id": "wind_tower",
    "display_name": "Wind tower",
    "stages": [
        { "id": "mesh", "display_name": "Mesh", "app_id": "cwe-mesh",
          "params": [{ "name": "mesh_density", "default": "medium" }] },
        { "id": "sim", "display_name": "Simulation", "app_id": "cwe-sim",
          "prerequisites": ["mesh"], "params": [{ "name": "velocity", "required": true }] }
    ]
}"#;

fn descriptor() -> CaseTypeDescriptor {
    serde_json::from_str(WIND_TOWER).unwrap()
}

fn remote_ops(effects: Vec<Effect>) -> Vec<RemoteOperation> {
    effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::RemoteOps(req) => Some(req.operation),
            _ => None,
        })
        .collect()
}

fn complete(op: &RemoteOperation, outcome: RemoteOutcome) -> Event {
    Event::RemoteOpDone {
        handle: op.handle.clone(),
        kind: op.request.kind(),
        outcome: Box::new(outcome),
    }
}

fn setup() -> (AppTester<App, Effect>, Model) {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let update = app.update(Event::CaseTypesLoaded(vec![descriptor()]), &mut model);
    assert!(update.effects.iter().any(|e| matches!(e, Effect::Render(_))));
    (app, model)
}

#[test]
fn test_create_run_and_roll_back() {
    let (app, mut model) = setup();
    let parent = RemotePath::new("/home/user/cases");
    let folder = parent.join("tower");

    // Select a type and create the case
    let update = app.update(
        Event::SelectCaseType {
            type_id: "wind_tower".into(),
        },
        &mut model,
    );
    assert!(update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Watch(req) if req.operation == WatchOperation::WatchJobs)));
    assert_eq!(app.view(&model).case.unwrap().state, CaseState::Ready);

    let update = app.update(
        Event::CreateCase {
            name: "tower".into(),
            parent: parent.clone(),
        },
        &mut model,
    );
    let ops = remote_ops(update.effects);
    assert_eq!(ops.len(), 1);
    assert_matches!(&ops[0].request, RemoteRequest::MakeDir { name, .. } if name == "tower");

    // Folder made, initial defaults uploaded
    let update = app.update(complete(&ops[0], RemoteOutcome::done()), &mut model);
    let ops = remote_ops(update.effects);
    assert_matches!(&ops[0].request, RemoteRequest::UploadFile { contents, .. } if contents.contains("medium"));
    app.update(complete(&ops[0], RemoteOutcome::done()), &mut model);

    let view = app.view(&model).case.unwrap();
    assert_eq!(view.state, CaseState::Ready);
    assert_eq!(view.folder.as_deref(), Some("/home/user/cases/tower"));
    assert_eq!(view.params.get("mesh_density").map(String::as_str), Some("medium"));
    assert_eq!(view.stages[0].state, StageState::Unrun);
    assert_eq!(view.stages[1].state, StageState::Unready);

    // Start the mesh stage
    let update = app.update(
        Event::StartStage {
            stage: StageId::new("mesh"),
        },
        &mut model,
    );
    let ops = remote_ops(update.effects);
    assert_matches!(&ops[0].request, RemoteRequest::InvokeJob { app_id, .. } if app_id == "cwe-mesh");
    app.update(
        complete(
            &ops[0],
            RemoteOutcome::Good(RemotePayload::JobStarted {
                job: JobId::new("job-42"),
            }),
        ),
        &mut model,
    );
    let view = app.view(&model).case.unwrap();
    assert_eq!(view.state, CaseState::Running);
    assert_eq!(view.running_job.as_deref(), Some("job-42"));

    // Job finishes
    app.update(
        Event::JobListUpdated(JobSnapshot::new(vec![RemoteJob {
            id: JobId::new("job-42"),
            case_folder: folder.clone(),
            stage: StageId::new("mesh"),
            status: JobStatus::Finished,
            submitted_at_ms: 10,
            details_loaded: true,
        }])),
        &mut model,
    );
    let view = app.view(&model).case.unwrap();
    assert_eq!(view.state, CaseState::Ready);
    assert_eq!(view.stages[0].state, StageState::Finished);
    // velocity is required and still unset
    assert_eq!(view.stages[1].state, StageState::Unready);

    // A rollback the server refuses leaves the stage finished
    let update = app.update(
        Event::RollBack {
            stage: StageId::new("mesh"),
        },
        &mut model,
    );
    let ops = remote_ops(update.effects);
    app.update(
        complete(
            &ops[0],
            RemoteOutcome::Fail(case_core::capabilities::RemoteFailure::rejected(
                "permission denied",
            )),
        ),
        &mut model,
    );
    let view = app.view(&model).case.unwrap();
    assert_eq!(view.state, CaseState::Ready);
    assert_eq!(view.stages[0].state, StageState::Finished);
    assert!(view.last_error.unwrap().contains("permission denied"));
}

#[test]
fn test_open_existing_case_and_reject_busy_edit() {
    let (app, mut model) = setup();
    let folder = RemotePath::new("/home/user/cases/tower");

    let update = app.update(
        Event::OpenCase {
            folder: folder.clone(),
        },
        &mut model,
    );
    let ops = remote_ops(update.effects);
    assert_matches!(&ops[0].request, RemoteRequest::ReadCaseData { param_file, .. } if param_file == ".caseParams");
    assert_eq!(app.view(&model).case.unwrap().state, CaseState::Loading);

    app.update(
        complete(
            &ops[0],
            RemoteOutcome::Good(RemotePayload::CaseData(CaseData {
                exists: true,
                entries: vec![".caseParams".into()],
                param_document: Some(
                    r#"{"type": "wind_tower", "vars": {"mesh_density": "fine"}}"#.into(),
                ),
            })),
        ),
        &mut model,
    );
    let view = app.view(&model).case.unwrap();
    assert_eq!(view.state, CaseState::Ready);
    assert_eq!(view.type_id.as_deref(), Some("wind_tower"));
    assert_eq!(view.name.as_deref(), Some("tower"));

    let change = |value: &str| Event::ChangeParameters {
        params: [("velocity".to_string(), value.to_string())].into(),
    };
    let update = app.update(change("12"), &mut model);
    assert_eq!(remote_ops(update.effects).len(), 1);

    let update = app.update(change("14"), &mut model);
    assert!(remote_ops(update.effects).is_empty());
    let error = app.view(&model).error.unwrap();
    assert_eq!(error.error_code, "CASE_BUSY");
    assert!(error.is_retryable);
}

#[test]
fn test_vanished_folder_detaches_case() {
    let (app, mut model) = setup();
    let folder = RemotePath::new("/home/user/cases/tower");
    let update = app.update(
        Event::OpenCase {
            folder: folder.clone(),
        },
        &mut model,
    );
    let ops = remote_ops(update.effects);
    app.update(
        complete(
            &ops[0],
            RemoteOutcome::Good(RemotePayload::CaseData(CaseData::default())),
        ),
        &mut model,
    );

    let view = app.view(&model);
    assert!(view.case.is_none());
    assert_eq!(view.detached_folder.as_deref(), Some("/home/user/cases/tower"));
}

#[test]
fn test_connection_loss_marks_everything_offline() {
    let (app, mut model) = setup();
    app.update(
        Event::SelectCaseType {
            type_id: "wind_tower".into(),
        },
        &mut model,
    );
    app.update(
        Event::ConnectionLost {
            reason: "network down".into(),
        },
        &mut model,
    );
    let view = app.view(&model);
    assert!(!view.online);
    let case = view.case.unwrap();
    assert_eq!(case.state, CaseState::Offline);
    assert!(case.stages.iter().all(|s| s.state == StageState::Offline));

    app.update(Event::ConnectionRestored, &mut model);
    let view = app.view(&model);
    assert!(view.online);
    assert_eq!(view.case.unwrap().state, CaseState::Ready);
}

#[test]
fn test_operations_without_case_are_rejected() {
    let (app, mut model) = setup();
    let update = app.update(
        Event::StartStage {
            stage: StageId::new("mesh"),
        },
        &mut model,
    );
    assert!(remote_ops(update.effects).is_empty());
    assert_eq!(app.view(&model).error.unwrap().error_code, "INVALID_STATE");
}

#[test]
fn test_close_case_unsubscribes() {
    let (app, mut model) = setup();
    app.update(
        Event::OpenCase {
            folder: RemotePath::new("/home/user/cases/tower"),
        },
        &mut model,
    );
    let update = app.update(Event::CloseCase, &mut model);
    assert!(update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Watch(req) if req.operation == WatchOperation::UnwatchJobs)));
    assert!(app.view(&model).case.is_none());
}
