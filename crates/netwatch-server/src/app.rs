use axum::{
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use netwatch_core::NetwatchConfig;
use netwatch_results::ResultStore;
use netwatch_scheduler::{SchedulerEngine, SqliteScheduleStore};
use std::sync::Arc;

use crate::http::{health, jobs, results};

/// Shared state, passed as `Arc<AppState>` to every handler.
pub struct AppState {
    pub config: NetwatchConfig,
    /// Job management; the engine reads the same table through `ScheduleStore`.
    pub jobs: Arc<SqliteScheduleStore>,
    pub results: Arc<ResultStore>,
    pub engine: Arc<SchedulerEngine>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: NetwatchConfig,
        jobs: Arc<SqliteScheduleStore>,
        results: Arc<ResultStore>,
        engine: Arc<SchedulerEngine>,
    ) -> Self {
        Self {
            config,
            jobs,
            results,
            engine,
            started_at: Utc::now(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route("/api/jobs/running", get(jobs::running_jobs))
        .route(
            "/api/jobs/{id}",
            get(jobs::get_job)
                .put(jobs::update_job)
                .delete(jobs::delete_job),
        )
        .route("/api/jobs/{id}/enabled", put(jobs::set_enabled))
        .route("/api/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/api/jobs/{id}/results", get(jobs::job_results))
        .route("/api/results", get(results::list_results))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netwatch_core::{PacketLossResult, TestResult};
    use netwatch_monitor::MonitorExecutor;
    use netwatch_results::ResultRecorder;
    use rusqlite::Connection;
    use serde_json::{json, Value};

    async fn spawn_app() -> (String, Arc<AppState>) {
        let config = NetwatchConfig::default();
        let tz = config.scheduler.tz().unwrap();
        let jobs = Arc::new(
            SqliteScheduleStore::new(Connection::open_in_memory().unwrap(), tz).unwrap(),
        );
        let results = Arc::new(ResultStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let engine = Arc::new(SchedulerEngine::new(
            jobs.clone(),
            Arc::new(MonitorExecutor::from_config(&config)),
            Arc::new(ResultRecorder::new(results.clone(), None)),
            &config.scheduler,
        ));
        let state = Arc::new(AppState::new(config, jobs, results, engine));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}"), state)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn packet_loss_job(interval: &str) -> Value {
        json!({
            "name": "router loss",
            "interval": interval,
            "options": { "kind": "packet_loss", "host": "192.168.1.1", "packet_count": 5 }
        })
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (base, _) = spawn_app().await;
        let body: Value = client()
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["scheduler_running"], false);
        assert_eq!(body["jobs_in_flight"], 0);
    }

    #[tokio::test]
    async fn job_lifecycle_over_http() {
        let (base, _) = spawn_app().await;
        let http = client();

        let resp = http
            .post(format!("{base}/api/jobs"))
            .json(&packet_loss_job("15m"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let job: Value = resp.json().await.unwrap();
        let id = job["id"].as_str().unwrap().to_string();
        assert!(job["next_run"].is_string());
        assert_eq!(job["enabled"], true);

        let list: Vec<Value> = http
            .get(format!("{base}/api/jobs"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list.len(), 1);

        let resp = http
            .put(format!("{base}/api/jobs/{id}/enabled"))
            .json(&json!({ "enabled": false }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let toggled: Value = resp.json().await.unwrap();
        assert_eq!(toggled["enabled"], false);

        let resp = http.delete(format!("{base}/api/jobs/{id}")).send().await.unwrap();
        assert_eq!(resp.status(), 204);
        let resp = http.get(format!("{base}/api/jobs/{id}")).send().await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn invalid_interval_is_a_bad_request() {
        let (base, _) = spawn_app().await;
        let resp = client()
            .post(format!("{base}/api/jobs"))
            .json(&packet_loss_job("whenever"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("whenever"));
    }

    #[tokio::test]
    async fn cancel_of_idle_job_is_not_found() {
        let (base, _) = spawn_app().await;
        let resp = client()
            .post(format!("{base}/api/jobs/nope/cancel"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let running: Vec<Value> = client()
            .get(format!("{base}/api/jobs/running"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(running.is_empty());
    }

    #[tokio::test]
    async fn results_are_listed_and_filtered() {
        let (base, state) = spawn_app().await;
        let http = client();
        let job: Value = http
            .post(format!("{base}/api/jobs"))
            .json(&packet_loss_job("1h"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = job["id"].as_str().unwrap();

        state
            .results
            .save(
                id,
                "router loss",
                &TestResult::PacketLoss(PacketLossResult {
                    host: "192.168.1.1".to_string(),
                    packets_sent: 5,
                    packets_received: 5,
                    loss_pct: 0.0,
                    rtt_min_ms: Some(0.4),
                    rtt_avg_ms: Some(0.5),
                    rtt_max_ms: Some(0.7),
                    hop_count: None,
                    used_mtr: false,
                    measured_at: Utc::now(),
                }),
            )
            .unwrap();

        let all: Vec<Value> = http
            .get(format!("{base}/api/results?kind=packet_loss&limit=10"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["kind"], "packet_loss");

        let none: Vec<Value> = http
            .get(format!("{base}/api/results?kind=speed_test"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(none.is_empty());

        let per_job: Vec<Value> = http
            .get(format!("{base}/api/jobs/{id}/results"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(per_job.len(), 1);

        let resp = http
            .get(format!("{base}/api/results?kind=bogus"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}
