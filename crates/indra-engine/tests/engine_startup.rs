//! Engine wiring tests: construction and fatal startup failures.

use indra_engine::{AppConfig, Engine, EngineError};
use std::io::Write;

fn config_toml(db_path: &str, policy_path: &str) -> String {
    format!(
        r#"
        mode = "paper"

        [broker]
        base_url = "https://api.upstox.com"
        access_token = "test-token"

        [storage]
        db_path = "{db_path}"

        [meta]
        policy_path = "{policy_path}"
        "#
    )
}

fn load_config(body: &str) -> AppConfig {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    AppConfig::from_file(file.path()).unwrap()
}

#[tokio::test]
async fn engine_constructs_offline_in_paper_mode() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("indra.db");
    let policy = dir.path().join("policy.json");
    let config = load_config(&config_toml(
        db.to_str().unwrap(),
        policy.to_str().unwrap(),
    ));

    // No broker, feed, or Redis connectivity is needed to wire the
    // engine; the policy artifact is absent so allocation is uniform.
    let engine = Engine::new(config).await.unwrap();
    let token = engine.shutdown_token();
    assert!(!token.is_cancelled());
    token.cancel();
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn unreachable_database_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let policy = dir.path().join("policy.json");
    let config = load_config(&config_toml(
        "/nonexistent-dir/indra.db",
        policy.to_str().unwrap(),
    ));

    match Engine::new(config).await {
        Err(EngineError::Startup(msg)) => assert!(msg.contains("database")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected fatal startup error"),
    }
}

#[tokio::test]
async fn corrupt_policy_artifact_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("indra.db");
    let policy = dir.path().join("policy.json");
    std::fs::write(&policy, b"{broken").unwrap();
    let config = load_config(&config_toml(
        db.to_str().unwrap(),
        policy.to_str().unwrap(),
    ));

    assert!(matches!(
        Engine::new(config).await,
        Err(EngineError::Policy(_))
    ));
}
