mod common;

use common::*;
use pipeloom::api::{AppState, RunTable};
use pipeloom::pipeline::{PipelineRegistry, PipelineStorage};
use pipeloom::runtime::runners::NodeRunners;
use pipeloom::runtime::{EngineServices, RunState};
use pipeloom::server::create_router;
use pipeloom::Pipeline;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;

async fn serve() -> String {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let storage = PipelineStorage::new(pool);
    storage.init_schema().await.unwrap();

    let services = EngineServices::new(
        NodeRunners::new(Arc::new(MockTransform::default())),
        Arc::new(storage.clone()),
        Arc::new(storage.clone()),
    );
    let state = AppState {
        registry: Arc::new(PipelineRegistry::new(Arc::new(storage.clone()))),
        storage,
        services,
        runs: RunTable::default(),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

fn bom_pipeline() -> Pipeline {
    Pipeline {
        id: "bom".into(),
        name: "BOM cleanup".into(),
        nodes: vec![upload("upload", 0.0), action("clean", "cleaned"), export("export", &["Parts"])],
        edges: vec![edge("upload", "clean"), edge("clean", "export")],
    }
}

async fn poll_state(client: &reqwest::Client, base: &str, run_id: &str, node: &str, state: &str) {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let run: Value = client
                .get(format!("{base}/api/runs/{run_id}"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if run["states"][node]["state"] == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("'{node}' never reached {state}"));
}

fn upload_form() -> Form {
    Form::new().part(
        "file",
        Part::bytes(b"pn,qty\nR1,2\n".to_vec()).file_name("bom.csv"),
    )
}

#[tokio::test]
async fn pipeline_lifecycle_over_http() {
    let base = serve().await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(health.text().await.unwrap(), "ok");

    let mut cyclic = bom_pipeline();
    cyclic.edges.push(edge("export", "upload"));
    let rejected = client
        .post(format!("{base}/api/pipelines"))
        .json(&json!({ "pipeline": cyclic }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let created = client
        .post(format!("{base}/api/pipelines"))
        .json(&json!({ "pipeline": bom_pipeline() }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::OK);

    let duplicate = client
        .post(format!("{base}/api/pipelines"))
        .json(&json!({ "pipeline": bom_pipeline() }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let listed: Value = client
        .get(format!("{base}/api/pipelines"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["pipelines"][0]["id"], "bom");

    let closing = client
        .post(format!("{base}/api/pipelines/bom/connections"))
        .json(&json!({ "source": "export", "target": "clean" }))
        .send()
        .await
        .unwrap();
    assert_eq!(closing.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let back_edge = client
        .post(format!("{base}/api/pipelines/bom/connections"))
        .json(&json!({ "source": "export", "target": "clean", "targetPort": "bottom" }))
        .send()
        .await
        .unwrap();
    assert_eq!(back_edge.status(), StatusCode::OK);

    let deleted = client
        .delete(format!("{base}/api/pipelines/bom"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    let gone = client
        .get(format!("{base}/api/pipelines/bom"))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn run_with_upload_and_artifact_download() {
    let base = serve().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/api/pipelines"))
        .json(&json!({ "pipeline": bom_pipeline() }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let started: Value = client
        .post(format!("{base}/api/pipelines/bom/runs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let run_id = started["run_id"].as_str().unwrap().to_string();

    poll_state(&client, &base, &run_id, "upload", "awaiting_input").await;

    let early = client
        .post(format!("{base}/api/runs/{run_id}/nodes/clean/upload"))
        .multipart(upload_form())
        .send()
        .await
        .unwrap();
    assert_eq!(early.status(), StatusCode::NOT_FOUND);

    let resolved = client
        .post(format!("{base}/api/runs/{run_id}/nodes/upload/upload"))
        .multipart(upload_form())
        .send()
        .await
        .unwrap();
    assert_eq!(resolved.status(), StatusCode::OK);

    let again = client
        .post(format!("{base}/api/runs/{run_id}/nodes/upload/upload"))
        .multipart(upload_form())
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    poll_state(&client, &base, &run_id, "export", "done").await;

    let listed: Value = client
        .get(format!("{base}/api/runs/{run_id}/nodes/export/artifacts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["artifacts"][0]["name"], "export.json");

    let download = client
        .get(format!("{base}/api/runs/{run_id}/nodes/export/artifacts/export.json"))
        .send()
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(
        download.headers()[reqwest::header::CONTENT_TYPE],
        "application/json"
    );
    let workbook: Value = download.json().await.unwrap();
    assert_eq!(workbook["sheets"][0]["name"], "Parts");
}

#[tokio::test]
async fn unknown_runs_are_not_found() {
    let base = serve().await;
    let client = reqwest::Client::new();
    let missing = client
        .post(format!("{base}/api/runs/{}/abort", uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

async fn start(client: &reqwest::Client, base: &str, pipeline: &str) -> String {
    let started: Value = client
        .post(format!("{base}/api/pipelines/{pipeline}/runs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    started["run_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn superseded_runs_report_gone_instead_of_newer_states() {
    let base = serve().await;
    let client = reqwest::Client::new();
    client
        .post(format!("{base}/api/pipelines"))
        .json(&json!({ "pipeline": bom_pipeline() }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let first = start(&client, &base, "bom").await;
    poll_state(&client, &base, &first, "upload", "awaiting_input").await;
    let second = start(&client, &base, "bom").await;

    let stale = client
        .get(format!("{base}/api/runs/{first}"))
        .send()
        .await
        .unwrap();
    assert_eq!(stale.status(), StatusCode::GONE);

    let live = client
        .get(format!("{base}/api/runs/{second}"))
        .send()
        .await
        .unwrap();
    assert_eq!(live.status(), StatusCode::OK);
}

#[tokio::test]
async fn history_and_traces_are_served_from_storage() {
    let base = serve().await;
    let client = reqwest::Client::new();
    client
        .post(format!("{base}/api/pipelines"))
        .json(&json!({ "pipeline": bom_pipeline() }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let run_id = start(&client, &base, "bom").await;
    poll_state(&client, &base, &run_id, "upload", "awaiting_input").await;
    client
        .post(format!("{base}/api/runs/{run_id}/nodes/upload/upload"))
        .multipart(upload_form())
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();
    poll_state(&client, &base, &run_id, "export", "done").await;

    let history: Value = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let history: Value = client
                .get(format!("{base}/api/runs/{run_id}/history"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if history["entries"].as_array().is_some_and(|e| e.len() == 3) {
                return history;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("history never reached three entries");
    let nodes: Vec<&str> = history["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["node_id"].as_str().unwrap())
        .collect();
    assert_eq!(nodes, vec!["upload", "clean", "export"]);
    assert_eq!(history["entries"][1]["output_file_name"], "cleaned.csv");

    let traces: Value = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let traces: Value = client
                .get(format!("{base}/api/traces/clean"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if traces["traces"].as_array().is_some_and(|t| t.len() == 2) {
                return traces;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("traces for 'clean' never recorded");
    let rows = traces["traces"].as_array().unwrap();
    assert!(rows
        .iter()
        .any(|t| t["direction"] == "input" && t["file_name"] == "bom.csv"));
    assert!(rows
        .iter()
        .any(|t| t["direction"] == "output" && t["file_name"] == "cleaned.csv"));
}

#[tokio::test]
async fn run_table_keeps_only_the_newest_runs_per_pipeline() {
    let h = harness();
    let runs = RunTable::with_retention(2);
    let g = graph(vec![upload("upload", 0.0)], vec![]);

    let mut started = Vec::new();
    for _ in 0..4 {
        started.push(runs.start("bom", g.clone(), &h.services).await);
    }
    let other = runs.start("other", g.clone(), &h.services).await;

    assert_eq!(runs.run_count().await, 3);
    assert!(runs.get(started[0].id()).await.is_none());
    assert!(runs.get(started[1].id()).await.is_none());
    assert!(runs.get(started[2].id()).await.is_some());
    assert!(runs.get(other.id()).await.is_some());

    let newest = runs.get(started[3].id()).await.unwrap();
    assert!(newest.is_current());
    reach(&newest, "upload", RunState::AwaitingInput).await;

    runs.retire("bom").await;
    assert_eq!(runs.run_count().await, 1);
}
