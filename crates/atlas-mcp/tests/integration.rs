use std::path::Path;

use atlas_mcp::tools::{AtlasServer, RepoMapParams, SearchIdentifiersParams};
use rmcp::{handler::server::wrapper::Parameters, model::*, ServerHandler};

fn extract_text(result: &CallToolResult) -> &str {
    match &result.content[0].raw {
        RawContent::Text(t) => &t.text,
        _ => panic!("expected text content"),
    }
}

fn parse(result: &CallToolResult) -> serde_json::Value {
    serde_json::from_str(extract_text(result)).unwrap()
}

fn foo_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), "def foo():\n    return 42\n").unwrap();
    std::fs::write(dir.path().join("b.py"), "foo()\nfoo()\nfoo()\n").unwrap();
    dir
}

fn root_param(path: &Path) -> Option<String> {
    Some(path.display().to_string())
}

#[test]
fn server_info_is_correct() {
    let server = AtlasServer::new(".".into());
    let info = server.get_info();

    assert_eq!(info.server_info.name, "atlas");
    assert_eq!(info.server_info.version, env!("CARGO_PKG_VERSION"));
    let instructions = info.instructions.unwrap();
    assert!(instructions.contains("repo_map"));
    assert!(instructions.contains("search_identifiers"));
}

#[tokio::test]
async fn repo_map_returns_map_and_report() {
    let repo = foo_repo();
    let server = AtlasServer::new(repo.path().to_path_buf());
    let params = Parameters(RepoMapParams {
        project_root: root_param(repo.path()),
        token_limit: Some(serde_json::json!("")),
        ..RepoMapParams::default()
    });

    let result = server.repo_map(params).await.unwrap();
    let parsed = parse(&result);

    assert!(parsed["map"].as_str().unwrap().contains("def foo"));
    let report = &parsed["report"];
    assert_eq!(report["total_files_considered"], 2);
    assert_eq!(report["definition_matches"], 1);
    assert_eq!(report["reference_matches"], 3);
    assert!(report["excluded"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn repo_map_on_empty_root_returns_sentinel() {
    let repo = tempfile::tempdir().unwrap();
    let server = AtlasServer::new(repo.path().to_path_buf());

    let result = server
        .repo_map(Parameters(RepoMapParams::default()))
        .await
        .unwrap();
    let parsed = parse(&result);
    assert_eq!(parsed["map"], "No files found to generate a map.");
}

#[tokio::test]
async fn repo_map_missing_root_is_an_error_body() {
    let repo = tempfile::tempdir().unwrap();
    let server = AtlasServer::new(repo.path().to_path_buf());
    let params = Parameters(RepoMapParams {
        project_root: root_param(&repo.path().join("missing")),
        ..RepoMapParams::default()
    });

    let result = server.repo_map(params).await.unwrap();
    let parsed = parse(&result);
    let error = parsed["error"].as_str().unwrap();
    assert!(error.contains("not found"), "{error}");
    assert!(parsed.get("map").is_none());
}

#[tokio::test]
async fn search_lists_definition_before_references() {
    let repo = foo_repo();
    let server = AtlasServer::new(repo.path().to_path_buf());
    let params = Parameters(SearchIdentifiersParams {
        project_root: root_param(repo.path()),
        query: "foo".into(),
        ..SearchIdentifiersParams::default()
    });

    let result = server.search_identifiers(params).await.unwrap();
    let parsed = parse(&result);
    let results = parsed["results"].as_array().unwrap();

    assert_eq!(results.len(), 4);
    assert_eq!(results[0]["kind"], "definition");
    assert_eq!(results[0]["file"], "a.py");
    assert!(results[1..].iter().all(|r| r["kind"] == "reference"));
    assert!(results[0]["context"].as_str().unwrap().contains("def foo"));
}

#[tokio::test]
async fn search_respects_limits_and_filters() {
    let repo = foo_repo();
    let server = AtlasServer::new(repo.path().to_path_buf());
    let params = Parameters(SearchIdentifiersParams {
        project_root: None,
        query: "foo".into(),
        max_results: Some(2),
        include_definitions: Some(false),
        ..SearchIdentifiersParams::default()
    });

    let result = server.search_identifiers(params).await.unwrap();
    let results = parse(&result)["results"].as_array().unwrap().clone();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r["kind"] == "reference"));
}

#[tokio::test]
async fn blank_query_is_an_error_body() {
    let repo = foo_repo();
    let server = AtlasServer::new(repo.path().to_path_buf());
    let params = Parameters(SearchIdentifiersParams {
        query: " ".into(),
        ..SearchIdentifiersParams::default()
    });

    let result = server.search_identifiers(params).await.unwrap();
    assert!(parse(&result)["error"]
        .as_str()
        .unwrap()
        .contains("query is empty"));
}
