//! secuRAG gateway entry point.
//!
//! Reads configuration from environment variables, bootstraps the audit
//! store when persistence is enabled, assembles the default guardrail
//! policy, and serves the axum gateway.

use securag_audit::AuditStore;
use securag_gateway::config::Settings;
use securag_gateway::llm::AiResponder;
use securag_gateway::state::AppState;
use securag_gateway::{policy, server};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("securag_gateway=info".parse().unwrap())
                .add_directive("securag_audit=info".parse().unwrap()),
        )
        .init();

    let settings = Settings::from_env();

    let audit = if settings.write_logs {
        if settings.db_uri.is_empty() {
            eprintln!("SECURAG_SERVER_WRITE_LOGS is true but SECURAG_SERVER_DB_URI is empty");
            std::process::exit(1);
        }
        match AuditStore::connect(&settings.db_uri, &settings.table_name).await {
            Ok(store) => {
                info!(table = %store.table(), "audit store ready");
                Some(store)
            }
            Err(e) => {
                eprintln!("audit store initialization failed: {e}");
                std::process::exit(1);
            }
        }
    } else {
        warn!("SECURAG_SERVER_WRITE_LOGS is false; audit persistence is disabled");
        None
    };

    let executor = match policy::build_executor(&settings) {
        Ok(executor) => executor,
        Err(e) => {
            eprintln!("guardrail policy configuration failed: {e}");
            std::process::exit(1);
        }
    };

    let responder = AiResponder::new(settings.ollama.clone());

    info!(
        port = settings.port,
        write_logs = settings.write_logs,
        classifiers_enabled = settings.hf_auth_token.is_some(),
        "secuRAG gateway configuration loaded"
    );

    let state = AppState::new(executor, responder, audit);
    if let Err(e) = server::serve(state, settings.port).await {
        eprintln!("gateway error: {e}");
        std::process::exit(1);
    }
}
