// src/main.rs

use std::sync::Arc;
use std::time::Duration;

use plandstu::clients::llm::HttpLlmService;
use plandstu::config::Config;
use plandstu::db::Repositories;
use plandstu::error::AppError;
use plandstu::models::user::{NewUser, ROLE_TEACHER};
use plandstu::queue::{PgQueue, QueueOptions, TaskQueue};
use plandstu::routes;
use plandstu::state::AppState;
use plandstu::utils::hash::hash_password;
use plandstu::worker::{Worker, WorkerPool};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Extra lease time on top of the generator deadline before a job is redelivered.
const LEASE_MARGIN: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() {
    // Load configuration from environment (.env included)
    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    // Initialize Database Pool with Retry
    let mut retry_count = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(config.worker_concurrency as u32 + 5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    panic!("Failed to connect to database after 5 retries: {}", e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    };

    tracing::info!("Database connected...");

    // Run Migrations Automatically
    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations applied successfully.");

    let repos = Repositories::postgres(pool.clone());

    if let Err(e) = seed_teacher_user(&repos, &config).await {
        tracing::error!("Failed to seed teacher user: {:?}", e);
    }

    let queue: Arc<dyn TaskQueue> = Arc::new(PgQueue::new(
        pool.clone(),
        QueueOptions {
            backoff_base: config.job_backoff_base,
            backoff_max: config.job_backoff_max,
            lease: config.generator_timeout + LEASE_MARGIN,
        },
    ));

    let llm = Arc::new(
        HttpLlmService::new(
            config.llm_url.clone(),
            config.generator_timeout,
            config.sync_timeout,
        )
        .expect("Failed to build LLM client"),
    );

    let worker = Worker::new(queue.clone(), repos.tests.clone(), llm.clone());
    let pool_handle = WorkerPool::spawn(
        worker,
        config.worker_concurrency,
        config.worker_poll_interval,
    );

    let state = AppState::new(config.clone(), repos, queue, llm);
    let app = routes::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listening address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    pool_handle.shutdown().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn seed_teacher_user(repos: &Repositories, config: &Config) -> Result<(), AppError> {
    if let (Some(login), Some(password)) = (&config.teacher_login, &config.teacher_password) {
        if repos.users.user_by_login(login).await?.is_none() {
            tracing::info!("Seeding teacher user: {}", login);
            let hashed_password = hash_password(password)?;

            repos
                .users
                .create_user(NewUser {
                    login: login.clone(),
                    password: hashed_password,
                    role: ROLE_TEACHER.to_string(),
                    group: String::new(),
                })
                .await?;
            tracing::info!("Teacher user created successfully.");
        }
    }
    Ok(())
}
