// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    clients::llm::LlmService,
    config::Config,
    db::Repositories,
    queue::TaskQueue,
    services::{
        reports::ReportService,
        test_flow::{JobSettings, TestService},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repos: Repositories,
    pub tests: TestService,
    pub reports: ReportService,
}

impl AppState {
    pub fn new(
        config: Config,
        repos: Repositories,
        queue: Arc<dyn TaskQueue>,
        llm: Arc<dyn LlmService>,
    ) -> Self {
        let tests = TestService::new(
            repos.clone(),
            queue,
            llm,
            JobSettings::from_config(&config),
        );
        let reports = ReportService::new(repos.clone());
        Self {
            config,
            repos,
            tests,
            reports,
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Repositories {
    fn from_ref(state: &AppState) -> Self {
        state.repos.clone()
    }
}

impl FromRef<AppState> for TestService {
    fn from_ref(state: &AppState) -> Self {
        state.tests.clone()
    }
}

impl FromRef<AppState> for ReportService {
    fn from_ref(state: &AppState) -> Self {
        state.reports.clone()
    }
}
