// tests/common/mod.rs

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use plandstu::{
    clients::llm::{HttpLlmService, normalize_base_url},
    config::Config,
    db::Repositories,
    models::user::{NewUser, ROLE_TEACHER},
    queue::{MemoryQueue, QueueOptions},
    routes,
    state::AppState,
    utils::hash::hash_password,
    worker::Worker,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const MAX_RETRY: u32 = 2;

/// Stand-in for the generator and answer-key service.
/// Every generated test has topics T1 (3 questions) and T2 (2 questions),
/// and every correct answer is "A".
#[derive(Default)]
pub struct MockLlm {
    pub answers: Mutex<HashMap<Uuid, Vec<String>>>,
    /// Number of upcoming `api/test-workflow` calls that answer 503.
    pub failures_left: AtomicUsize,
    pub generate_calls: AtomicUsize,
}

#[derive(Deserialize)]
struct GenerateBody {
    test_id: Uuid,
    #[allow(dead_code)]
    themes: Vec<String>,
}

#[derive(Deserialize)]
struct SetAnswersBody {
    test_id: Uuid,
    answers: Vec<String>,
}

pub fn generated_details() -> Value {
    let question = |text: &str| {
        json!({"text": text, "options": [{"label": "A", "text": "yes"}, {"label": "B", "text": "no"}]})
    };
    json!({
        "test": [
            {"title": "T1", "questions": [question("q1"), question("q2"), question("q3")]},
            {"title": "T2", "questions": [question("q4"), question("q5")]}
        ]
    })
}

async fn generate(State(mock): State<Arc<MockLlm>>, Json(body): Json<GenerateBody>) -> Result<Json<Value>, StatusCode> {
    mock.generate_calls.fetch_add(1, Ordering::SeqCst);
    let failing = mock
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    mock.answers
        .lock()
        .await
        .insert(body.test_id, vec!["A".to_string(); 5]);
    Ok(Json(generated_details()))
}

async fn first_test(State(mock): State<Arc<MockLlm>>, Json(body): Json<GenerateBody>) -> Json<Value> {
    mock.answers
        .lock()
        .await
        .insert(body.test_id, vec!["A".to_string(); 5]);
    Json(generated_details())
}

async fn answers(
    State(mock): State<Arc<MockLlm>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    let answers = mock.answers.lock().await.get(&id).cloned();
    answers
        .map(|a| Json(json!({ "answers": a })))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn set_answers(State(mock): State<Arc<MockLlm>>, Json(body): Json<SetAnswersBody>) -> StatusCode {
    mock.answers.lock().await.insert(body.test_id, body.answers);
    StatusCode::OK
}

async fn spawn_mock_llm() -> (String, Arc<MockLlm>) {
    let mock = Arc::new(MockLlm::default());
    let app = Router::new()
        .route("/api/test-workflow", post(generate))
        .route("/test-exmpl/", get(first_test))
        .route("/test-exmpl-answers/{id}", get(answers))
        .route("/test/set-answers", post(set_answers))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock port");
    let address = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (address, mock)
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub mock: Arc<MockLlm>,
    pub repos: Repositories,
    pub queue: Arc<MemoryQueue>,
    pub worker: Worker,
    pub config: Config,
    pub state: AppState,
}

/// Spawns the app on a random port with in-memory stores and queue.
/// No worker pool runs; tests drive `worker.process_next()` themselves.
pub async fn spawn_app() -> TestApp {
    let (llm_address, mock) = spawn_mock_llm().await;

    let config = Config {
        database_url: String::new(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        llm_url: normalize_base_url(&llm_address).unwrap(),
        worker_concurrency: 1,
        job_max_retry: MAX_RETRY,
        job_retention: Duration::from_secs(60),
        job_backoff_base: Duration::ZERO,
        job_backoff_max: Duration::ZERO,
        worker_poll_interval: Duration::from_millis(10),
        generator_timeout: Duration::from_secs(5),
        sync_timeout: Duration::from_secs(5),
        teacher_login: None,
        teacher_password: None,
    };

    let repos = Repositories::in_memory();
    let queue = Arc::new(MemoryQueue::new(QueueOptions {
        backoff_base: config.job_backoff_base,
        backoff_max: config.job_backoff_max,
        lease: Duration::from_secs(60),
    }));
    let llm = Arc::new(
        HttpLlmService::new(
            config.llm_url.clone(),
            config.generator_timeout,
            config.sync_timeout,
        )
        .unwrap(),
    );
    let worker = Worker::new(queue.clone(), repos.tests.clone(), llm.clone());

    let state = AppState::new(config.clone(), repos.clone(), queue.clone(), llm);
    let app = routes::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let address = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address,
        client: reqwest::Client::new(),
        mock,
        repos,
        queue,
        worker,
        config,
        state,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.address, path)
    }

    /// Registers a student and returns a bearer token.
    pub async fn student_token(&self, group: &str) -> String {
        let login = format!("s_{}", &Uuid::new_v4().to_string()[..8]);
        let response = self
            .client
            .post(self.url("/register"))
            .json(&json!({"login": login, "password": "password123", "group": group}))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 201);
        self.login(&login, "password123").await
    }

    /// Creates a teacher account directly in the store and returns a token.
    pub async fn teacher_token(&self) -> String {
        let login = format!("t_{}", &Uuid::new_v4().to_string()[..8]);
        self.repos
            .users
            .create_user(NewUser {
                login: login.clone(),
                password: hash_password("teacherpass").unwrap(),
                role: ROLE_TEACHER.to_string(),
                group: String::new(),
            })
            .await
            .unwrap();
        self.login(&login, "teacherpass").await
    }

    pub async fn login(&self, login: &str, password: &str) -> String {
        let response = self
            .client
            .post(self.url("/login"))
            .json(&json!({"login": login, "password": password}))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    /// Creates the diagnostic test and returns the response body.
    pub async fn first_test(&self, token: &str, discipline_id: i32) -> Value {
        let response = self
            .client
            .post(self.url(&format!("/tests/first-test?discipline_id={}", discipline_id)))
            .bearer_auth(token)
            .json(&json!({"themes": ["Graphs", "Trees"]}))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 200);
        response.json().await.unwrap()
    }

    pub async fn submit(&self, token: &str, test_id: &str, answers: &[&str]) -> reqwest::Response {
        self.client
            .post(self.url("/tests/answers"))
            .bearer_auth(token)
            .json(&json!({"test_id": test_id, "answers": answers}))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Queues a default test and returns the task id.
    pub async fn default_test(&self, token: &str, discipline_id: i32) -> String {
        let response = self
            .client
            .post(self.url(&format!("/tests/default-test?discipline_id={}", discipline_id)))
            .bearer_auth(token)
            .json(&json!({"themes": ["Graphs"]}))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 202);
        let body: Value = response.json().await.unwrap();
        body["task_id"].as_str().unwrap().to_string()
    }

    pub async fn task_status(&self, token: &str, task_id: &str) -> Value {
        let response = self
            .client
            .get(self.url(&format!("/tests/status?task_id={}", task_id)))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 200);
        response.json().await.unwrap()
    }

    pub async fn history(&self, token: &str, discipline_id: i32) -> Value {
        let response = self
            .client
            .get(self.url(&format!("/tests/history?discipline_id={}", discipline_id)))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 200);
        response.json().await.unwrap()
    }
}
