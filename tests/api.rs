//! End-to-end tests of the HTTP API against a small trained bundle.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use fraud_detection_service::{
    api::{create_router, AppState},
    config::{AppConfig, TrainingConfig},
    frame, train, TrainingOutcome,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::fmt::Write;
use std::sync::OnceLock;
use tower::ServiceExt;

const BOUNDARY: &str = "fraud-test-boundary";

fn training_csv(n: usize) -> String {
    let mut csv = String::from(
        "TransactionID,TransactionDT,TransactionAmt,ProductCD,card1,card4,P_emaildomain,\
         DeviceType,DeviceInfo,id_01,isFraud\n",
    );
    for i in 0..n {
        let fraud = i % 4 == 0;
        let amount = if fraud { 800.0 + (i * 7) as f64 } else { 15.0 + (i % 40) as f64 };
        let dt = if fraud { 3600 * 3 + i * 11 } else { 3600 * 15 + i * 11 };
        let card4 = if i % 3 == 0 { "visa" } else { "mastercard" };
        let device = if i % 2 == 0 { "desktop" } else { "mobile" };
        let id = if i % 5 == 0 { String::new() } else { format!("-{}", i % 9) };
        writeln!(
            csv,
            "{},{},{},W,{},{},gmail.com,{},Windows,{},{}",
            2000 + i,
            dt,
            amount,
            1000 + i % 6,
            card4,
            device,
            id,
            u8::from(fraud)
        )
        .unwrap();
    }
    csv
}

fn trained() -> &'static TrainingOutcome {
    static OUTCOME: OnceLock<TrainingOutcome> = OnceLock::new();
    OUTCOME.get_or_init(|| {
        let config = TrainingConfig {
            non_fraud_fraction: 1.0,
            n_estimators: 8,
            stack_folds: 2,
            ..AppConfig::default().training
        };
        let raw = frame::read_csv(training_csv(120).as_bytes()).unwrap();
        train(&raw, &config).unwrap()
    })
}

fn trained_app() -> Router {
    let outcome = trained().clone();
    let state = AppState::with_artifacts(
        AppConfig::default(),
        outcome.bundle,
        Some(outcome.metrics),
        Some(outcome.eda),
    );
    create_router(state)
}

/// Router whose artifacts point at an empty directory.
fn untrained_app(dir: &tempfile::TempDir) -> Router {
    let mut config = AppConfig::default();
    config.artifacts.results_dir = dir.path().to_string_lossy().into_owned();
    create_router(AppState::new(config))
}

const UPLOAD_CSV: &str = "\
TransactionID,TransactionDT,TransactionAmt,ProductCD,card1,card4,DeviceInfo\n\
1,10000,10,W,1001,visa,Windows\n\
2,20000,200,W,1002,mastercard,\n\
3,30000,5000,W,1003,visa,iOS\n";

fn multipart_body(files: &[(&str, &str, &str)], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    for (name, value) in fields {
        write!(
            body,
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        )
        .unwrap();
    }
    for (name, filename, content) in files {
        write!(
            body,
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
             Content-Type: text/csv\r\n\r\n{content}\r\n"
        )
        .unwrap();
    }
    write!(body, "--{BOUNDARY}--\r\n").unwrap();
    body.into_bytes()
}

fn multipart_request(
    uri: &str,
    files: &[(&str, &str, &str)],
    fields: &[(&str, &str)],
) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(multipart_body(files, fields)))
        .unwrap()
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn predict(app: &Router, fields: &[(&str, &str)]) -> (StatusCode, Value) {
    send(
        app,
        multipart_request(
            "/api/v1/predict",
            &[("file_transaction", "upload.csv", UPLOAD_CSV)],
            fields,
        ),
    )
    .await
}

#[tokio::test]
async fn test_health() {
    let app = trained_app();
    let (status, body) = send(&app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_models_lists_every_key() {
    let app = trained_app();
    let (status, body) = send(&app, get("/api/v1/models")).await;
    assert_eq!(status, StatusCode::OK);

    let models = body["models"].as_array().unwrap();
    let keys: Vec<&str> = models.iter().map(|m| m["key"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["xgb", "cat", "stack"]);
    assert_eq!(models[2]["supports_threshold"], true);
    assert_eq!(models[0]["supports_threshold"], false);
    assert_eq!(models[1]["name"], "CatBoost");
}

#[tokio::test]
async fn test_stack_prediction_applies_threshold() {
    let app = trained_app();
    let (status, body) = predict(&app, &[("model", "stack"), ("threshold", "0.4")]).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    for row in rows {
        let proba = row["proba"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&proba));
        let expected = u64::from(proba > 0.4);
        assert_eq!(row["pred_label"].as_u64().unwrap(), expected);
    }
    assert_eq!(rows[1]["TransactionID"], "2");

    let summary = &body["summary"];
    assert_eq!(summary["total"], 3);
    assert_eq!(summary["threshold"], 0.4);
    assert_eq!(summary["model"], "stack");
    let fraud = summary["fraud_count"].as_u64().unwrap();
    assert_eq!(fraud + summary["non_fraud_count"].as_u64().unwrap(), 3);
    assert!(body["batch_id"].as_str().is_some());
}

#[tokio::test]
async fn test_base_model_ignores_threshold() {
    let app = trained_app();
    let (_, low) = predict(&app, &[("model", "xgb"), ("threshold", "0.01")]).await;
    let (_, high) = predict(&app, &[("model", "xgb"), ("threshold", "0.99")]).await;

    assert_eq!(low["rows"], high["rows"]);
    assert_eq!(low["summary"]["threshold"], 0.5);
    for row in low["rows"].as_array().unwrap() {
        let expected = u64::from(row["proba"].as_f64().unwrap() > 0.5);
        assert_eq!(row["pred_label"].as_u64().unwrap(), expected);
    }
}

#[tokio::test]
async fn test_explain_matches_cached_prediction() {
    let app = trained_app();
    let (_, prediction) = predict(&app, &[("model", "xgb")]).await;

    let request = json_request("/api/v1/explain", json!({"row_ids": ["0", "1"]}));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let explanations = body["explanations"].as_array().unwrap();
    assert_eq!(explanations.len(), 2);
    for (explanation, row) in explanations.iter().zip(prediction["rows"].as_array().unwrap()) {
        assert_eq!(explanation["row_id"], row["row_id"]);
        assert_eq!(explanation["proba"], row["proba"]);
        assert_eq!(explanation["pred_label"], row["pred_label"]);
        assert!(explanation["positives"].as_array().unwrap().len() <= 8);
        for c in explanation["positives"].as_array().unwrap() {
            assert!(c["value"].as_f64().unwrap() > 0.0);
        }
        for c in explanation["negatives"].as_array().unwrap() {
            assert!(c["value"].as_f64().unwrap() < 0.0);
        }
        assert!(explanation["category_breakdown"].as_array().unwrap().len() <= 5);
    }
}

#[tokio::test]
async fn test_explain_skips_unknown_rows_and_honours_top_k() {
    let app = trained_app();
    predict(&app, &[]).await;

    let request = json_request(
        "/api/v1/explain",
        json!({"row_ids": [2, "x", "99"], "top_k": 1}),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let explanations = body["explanations"].as_array().unwrap();
    assert_eq!(explanations.len(), 1);
    assert_eq!(explanations[0]["row_id"], "2");
    assert!(explanations[0]["positives"].as_array().unwrap().len() <= 1);
    assert!(explanations[0]["negatives"].as_array().unwrap().len() <= 1);
}

#[tokio::test]
async fn test_explain_before_predict_is_bad_request() {
    let app = trained_app();
    let request = json_request("/api/v1/explain", json!({"row_ids": ["0"]}));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "empty_cache");
}

#[tokio::test]
async fn test_explain_with_stale_batch_id_conflicts() {
    let app = trained_app();
    let (_, first) = predict(&app, &[]).await;
    let (_, second) = predict(&app, &[]).await;
    assert_ne!(first["batch_id"], second["batch_id"]);

    let stale = json!({"row_ids": ["0"], "batch_id": first["batch_id"]});
    let (status, body) = send(&app, json_request("/api/v1/explain", stale)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "stale_batch");

    let current = json!({"row_ids": ["0"], "batch_id": second["batch_id"]});
    let (status, _) = send(&app, json_request("/api/v1/explain", current)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_model_is_not_found() {
    let app = trained_app();
    let (status, body) = predict(&app, &[("model", "lgbm")]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);

    let (status, _) = send(&app, get("/api/v1/metrics?model=lgbm")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_threshold_is_bad_request() {
    let app = trained_app();
    let (status, _) = predict(&app, &[("model", "stack"), ("threshold", "high")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = predict(&app, &[("model", "stack"), ("threshold", "1.5")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_base_model_accepts_out_of_range_threshold() {
    let app = trained_app();
    for model in ["xgb", "cat"] {
        let (status, body) = predict(&app, &[("model", model), ("threshold", "1.5")]).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["summary"]["threshold"], 0.5);
        assert_eq!(body["summary"]["model"], model);
        for row in body["rows"].as_array().unwrap() {
            let expected = u64::from(row["proba"].as_f64().unwrap() > 0.5);
            assert_eq!(row["pred_label"].as_u64().unwrap(), expected);
        }
    }
}

#[tokio::test]
async fn test_predict_without_file_is_bad_request() {
    let app = trained_app();
    let request = multipart_request("/api/v1/predict", &[], &[("model", "xgb")]);
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Provide file_merged or file_transaction.");

    let identity = "TransactionID,id_01\n1,-5\n";
    let identity_only =
        multipart_request("/api/v1/predict", &[("file_identity", "id.csv", identity)], &[]);
    let (status, _) = send(&app, identity_only).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_predict_missing_amount_column_is_bad_request() {
    let app = trained_app();
    let csv = "TransactionID,TransactionDT\n1,100\n";
    let request = multipart_request("/api/v1/predict", &[("file_transaction", "t.csv", csv)], &[]);
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("TransactionAmt"));
}

#[tokio::test]
async fn test_metrics_reports_requested_model() {
    let app = trained_app();
    let (status, body) = send(&app, get("/api/v1/metrics?model=stack")).await;
    assert_eq!(status, StatusCode::OK);
    let auc = body["metrics"]["roc_auc"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&auc));
    assert!(body["confusion_matrix"]["fn"].is_u64());

    let (status, body) = send(&app, get("/api/v1/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["feature_importance"].as_array().unwrap().len() <= 20);
}

#[tokio::test]
async fn test_training_eda_is_served() {
    let app = trained_app();
    let (status, body) = send(&app, get("/api/v1/eda/training")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["missingness"].is_array());
    assert!(body["fraud_by_hour"].is_array());
}

#[tokio::test]
async fn test_upload_eda_accepts_identity_only() {
    let app = trained_app();
    let identity = "TransactionID,id_01,id_02\n1,-5,\n2,,100\n2,,100\n";
    let files = [("file_identity", "id.csv", identity)];
    let request = multipart_request("/api/v1/eda/upload", &files, &[]);
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["summary"]["rows"], 3);
    assert_eq!(body["summary"]["dataset_type"], "identity");
}

#[tokio::test]
async fn test_upload_eda_reports_transaction_summary() {
    let app = trained_app();
    let files = [("file_merged", "m.csv", UPLOAD_CSV)];
    let request = multipart_request("/api/v1/eda/upload", &files, &[]);
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["summary"]["rows"], 3);
    assert_eq!(body["summary"]["transaction_id_present"], true);
    assert_eq!(body["summary"]["dataset_type"], "merged");
}

#[tokio::test]
async fn test_missing_artifacts_are_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let app = untrained_app(&dir);

    let (status, body) = predict(&app, &[]).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "artifact_missing");

    let (status, _) = send(&app, get("/api/v1/eda/training")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = send(&app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_artifacts_written_after_startup_are_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    let app = untrained_app(&dir);
    let (status, _) = predict(&app, &[]).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let mut artifacts = AppConfig::default().artifacts;
    artifacts.results_dir = dir.path().to_string_lossy().into_owned();
    trained().save(&artifacts).unwrap();

    let (status, body) = predict(&app, &[]).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["rows"].as_array().unwrap().len(), 3);
}
