//! Runs a small three-task pipeline against a stub generation service.
//!
//! ```sh
//! RUST_LOG=debug cargo run --example demo
//! ```

use anyhow::Result;
use async_trait::async_trait;
use forgeflow::logging::init_tracing;
use forgeflow::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

/// Stands in for the real generation backend.
struct StubService;

#[async_trait]
impl GenerationService for StubService {
    async fn generate(&self, request: &ServiceRequest) -> Result<ServiceResponse, ServiceError> {
        tokio::time::sleep(Duration::from_millis(25)).await;
        Ok(ServiceResponse::new(serde_json::json!({
            "operation": request.operation,
            "artifact": format!("artifact for {}", request.task_id),
        })))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let orchestrator = PipelineOrchestrator::with_sink(
        Arc::new(StubService),
        Arc::new(InMemoryResultStore::new()),
        Arc::new(LoggingEventSink::new(Level::INFO)),
        PipelineConfig::default(),
    );

    let summary = orchestrator
        .run(vec![
            TaskSpec::new("lexer", "build the lexer"),
            TaskSpec::new("parser", "build the parser").with_dependency("lexer"),
            TaskSpec::new("cli", "wire up the command line").with_dependency("parser"),
        ])
        .await?;

    println!("deployed: {:?}", summary.deployed);
    println!("failed:   {:?}", summary.failed);
    println!("blocked:  {:?}", summary.blocked);
    Ok(())
}
