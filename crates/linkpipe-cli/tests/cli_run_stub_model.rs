use axum::{routing::post, Json, Router};
use std::net::SocketAddr;

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn stub_model() -> Router {
    Router::new().route(
        "/v1/chat/completions",
        post(|Json(_body): Json<serde_json::Value>| async move {
            let content = serde_json::json!([
                {
                    "anchor_text": "pricing plans",
                    "target_url": "/pricing",
                    "claimed_paragraph": "Our pricing plans are flexible.",
                    "relevance": 8
                },
                {
                    "anchor_text": "invented anchor",
                    "target_url": "/pricing",
                    "claimed_paragraph": "Our pricing plans are flexible."
                }
            ])
            .to_string();
            Json(serde_json::json!({"choices": [{"message": {"content": content}}]}))
        }),
    )
}

fn fixtures(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let html = dir.join("page.html");
    std::fs::write(&html, "<p>Our pricing plans are flexible.</p>").unwrap();
    let inventory = dir.join("inventory.json");
    std::fs::write(
        &inventory,
        r#"[{"url": "/pricing", "title": "Pricing"}, {"url": "/docs", "title": "Docs"}]"#,
    )
    .unwrap();
    (html, inventory)
}

#[tokio::test(flavor = "multi_thread")]
async fn linkpipe_run_against_stub_model() {
    let addr = serve(stub_model()).await;
    let tmp = tempfile::tempdir().unwrap();
    let (html, inventory) = fixtures(tmp.path());

    let bin = assert_cmd::cargo::cargo_bin!("linkpipe");
    let out = tokio::process::Command::new(bin)
        .args(["run", "--no-cache", "--html"])
        .arg(&html)
        .arg("--inventory")
        .arg(&inventory)
        .env("LINKPIPE_OPENAI_COMPAT_BASE_URL", format!("http://{addr}"))
        .env("LINKPIPE_OPENAI_COMPAT_MODEL", "stub")
        .env_remove("LINKPIPE_OPENAI_COMPAT_API_KEY")
        .output()
        .await
        .expect("run linkpipe run");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("report json");
    assert_eq!(
        v["html"].as_str(),
        Some(r#"<p>Our <a href="/pricing">pricing plans</a> are flexible.</p>"#)
    );
    // One batch of two entries: both model records come back once.
    assert_eq!(v["total_candidates"].as_u64(), Some(2));
    assert_eq!(v["rejected"][0]["reason"].as_str(), Some("unverified_anchor"));
}

#[tokio::test(flavor = "multi_thread")]
async fn linkpipe_suggest_uses_the_cache_dir() {
    let addr = serve(stub_model()).await;
    let tmp = tempfile::tempdir().unwrap();
    let (html, inventory) = fixtures(tmp.path());
    let cache_dir = tmp.path().join("cache");

    let bin = assert_cmd::cargo::cargo_bin!("linkpipe");
    let out = tokio::process::Command::new(bin)
        .args(["suggest", "--html"])
        .arg(&html)
        .arg("--inventory")
        .arg(&inventory)
        .arg("--cache-dir")
        .arg(&cache_dir)
        .env("LINKPIPE_OPENAI_COMPAT_BASE_URL", format!("http://{addr}"))
        .env("LINKPIPE_OPENAI_COMPAT_MODEL", "stub")
        .output()
        .await
        .expect("run linkpipe suggest");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("candidates json");
    assert_eq!(v.as_array().map(|a| a.len()), Some(2));
    assert!(std::fs::read_dir(&cache_dir).unwrap().next().is_some());
}

#[test]
fn linkpipe_suggest_requires_a_configured_model() {
    let tmp = tempfile::tempdir().unwrap();
    let (html, inventory) = fixtures(tmp.path());
    let bin = assert_cmd::cargo::cargo_bin!("linkpipe");
    assert_cmd::Command::new(bin)
        .args(["suggest", "--no-cache", "--html"])
        .arg(&html)
        .arg("--inventory")
        .arg(&inventory)
        .env_remove("LINKPIPE_OPENAI_COMPAT_BASE_URL")
        .assert()
        .failure()
        .stderr(predicates::str::contains("LINKPIPE_OPENAI_COMPAT_BASE_URL"));
}
