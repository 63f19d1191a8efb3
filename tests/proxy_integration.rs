//! End-to-end tests: admin API and proxying over real sockets.

use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod common;
use common::{
    chunk, client, start_programmable_backend, start_proxy, test_config, Reply, ScriptedFetcher,
    SeenRequest, Step, ADMIN_KEY,
};

fn bearer() -> String {
    format!("Bearer {}", ADMIN_KEY)
}

/// Backend that records every request head and answers with its own name.
async fn recording_backend(name: &'static str) -> (String, Arc<Mutex<Vec<SeenRequest>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let addr = start_programmable_backend(move |req: SeenRequest| {
        log.lock().unwrap().push(req);
        async move { Reply::new(200, name).header("content-type", "text/plain") }
    })
    .await;
    (format!("http://{}", addr), seen)
}

#[tokio::test]
async fn test_admin_requires_bearer_key() {
    let proxy = start_proxy(test_config("http://127.0.0.1:9"), None).await;
    let http = client();

    let res = http.get(proxy.url("/manage/api/mappings")).send().await.unwrap();
    assert_eq!(res.status(), 401);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");

    let res = http
        .get(proxy.url("/manage/api/mappings"))
        .header("authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = http
        .get(proxy.url("/manage/api/mappings"))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["cache-control"], "no-store");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "version": null, "mappings": {} }));
}

#[tokio::test]
async fn test_admin_mapping_lifecycle() {
    let proxy = start_proxy(test_config("http://127.0.0.1:9"), None).await;
    let http = client();

    let res = http
        .put(proxy.url("/manage/api/mappings/tv"))
        .header("authorization", bearer())
        .json(&json!({ "upstream": "http://media.internal:8096", "pathPrefix": "/jf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let v1 = res.json::<Value>().await.unwrap()["version"]
        .as_str()
        .unwrap()
        .to_string();

    let res = http
        .put(proxy.url("/manage/api/mappings/music"))
        .header("authorization", bearer())
        .json(&json!({ "upstream": "http://music.internal" }))
        .send()
        .await
        .unwrap();
    let v2 = res.json::<Value>().await.unwrap()["version"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(v1, v2);

    let listed: Value = http
        .get(proxy.url("/manage/api/mappings"))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["version"], v2.as_str());
    assert_eq!(listed["mappings"]["tv"]["upstream"], "http://media.internal:8096");
    assert_eq!(listed["mappings"]["tv"]["pathPrefix"], "/jf");
    assert_eq!(listed["mappings"]["music"]["pathPrefix"], "");

    // Stale precondition.
    let res = http
        .delete(proxy.url("/manage/api/mappings/tv"))
        .header("authorization", bearer())
        .header("if-match", format!("\"{}\"", v1))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], "Version conflict");

    let history: Value = http
        .get(proxy.url("/manage/api/history?limit=5"))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["version"], v2.as_str());
    assert_eq!(history[0]["prev"], v1.as_str());
    assert_eq!(history[0]["editor"], "manage.put");

    let res = http
        .post(proxy.url("/manage/api/rollback"))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.json::<Value>().await.unwrap()["version"], v1.as_str());

    let exported: Value = http
        .get(proxy.url("/manage/api/export"))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(exported["version"], v1.as_str());
    assert!(exported["mappings"].get("music").is_none());
}

#[tokio::test]
async fn test_admin_bad_requests() {
    let proxy = start_proxy(test_config("http://127.0.0.1:9"), None).await;
    let http = client();

    let res = http
        .put(proxy.url("/manage/api/mappings/tv"))
        .header("authorization", bearer())
        .json(&json!({ "pathPrefix": "/x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], "upstream required");

    let res = http
        .post(proxy.url("/manage/api/rollback"))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], "No previous version");

    let res = http
        .post(proxy.url("/manage/api/rollback"))
        .header("authorization", bearer())
        .json(&json!({ "toVersion": "v404" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    let res = http
        .post(proxy.url("/manage/api/import"))
        .header("authorization", bearer())
        .json(&json!({ "nothing": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn test_admin_import_and_batch_delete() {
    let proxy = start_proxy(test_config("http://127.0.0.1:9"), None).await;
    let http = client();

    let res = http
        .post(proxy.url("/manage/api/import"))
        .header("authorization", bearer())
        .json(&json!({ "mappings": {
            "a": { "upstream": "http://a.internal" },
            "b": { "upstream": "http://b.internal" },
            "c": { "upstream": "http://c.internal" },
        }}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res: Value = http
        .post(proxy.url("/manage/api/batch-delete"))
        .header("authorization", bearer())
        .json(&json!({ "subdomains": ["a", "c", "zzz"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(res["count"], 2);

    let res: Value = http
        .post(proxy.url("/manage/api/batch-delete"))
        .header("authorization", bearer())
        .json(&json!({ "subdomains": ["zzz"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(res["message"], "Nothing to delete");

    let loaded = proxy.state.routes.load().await;
    assert_eq!(loaded.mappings.keys().collect::<Vec<_>>(), vec!["b"]);
}

#[tokio::test]
async fn test_manage_paths_are_not_proxied() {
    let (default_url, seen) = recording_backend("default").await;
    let proxy = start_proxy(test_config(&default_url), None).await;

    for path in ["/manage", "/manage/index.html"] {
        let res = client().get(proxy.url(path)).send().await.unwrap();
        assert_eq!(res.status(), 404, "{}", path);
    }
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_routes_by_subdomain_and_normalizes_headers() {
    let (default_url, default_seen) = recording_backend("default").await;
    let (tv_url, tv_seen) = recording_backend("tv").await;
    let proxy = start_proxy(test_config(&default_url), None).await;

    let mut mappings = edge_media_proxy::routing::Mappings::new();
    mappings.insert(
        "tv".into(),
        edge_media_proxy::routing::RouteMapping::new(tv_url.clone()).with_prefix("/jf"),
    );
    proxy.state.routes.publish("test", mappings, None).await.unwrap();

    let res = client()
        .get(proxy.url("/Users/1/Items?limit=5"))
        .header("host", "tv.example.com")
        .header("x-forwarded-for", "203.0.113.9")
        .header("cf-connecting-ip", "203.0.113.9")
        .header("connection", "x-private")
        .header("x-private", "secret")
        .header("x-keep", "yes")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert!(res.headers().get("x-request-id").is_some());
    assert_eq!(res.text().await.unwrap(), "tv");

    let seen = tv_seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    let req = &seen[0];
    assert_eq!(req.path, "/jf/Users/1/Items?limit=5");
    let tv_host = tv_url.trim_start_matches("http://");
    assert_eq!(req.header("host"), Some(tv_host));
    assert_eq!(req.header("origin"), Some(tv_url.as_str()));
    assert_eq!(req.header("x-keep"), Some("yes"));
    assert!(req.header("x-forwarded-for").is_none());
    assert!(req.header("cf-connecting-ip").is_none());
    assert!(req.header("x-private").is_none());

    // Unmapped subdomain goes to the default upstream.
    let res = client()
        .get(proxy.url("/web/index.html"))
        .header("host", "other.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "default");
    assert_eq!(default_seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_same_host_redirect_is_made_relative() {
    let addr = start_programmable_backend(|req: SeenRequest| async move {
        if req.path == "/login" {
            Reply::new(302, "moved").header("location", "/web/index.html?from=login")
        } else {
            Reply::new(302, "away").header("location", "https://elsewhere.example.net/x")
        }
    })
    .await;
    let proxy = start_proxy(test_config(&format!("http://{}", addr)), None).await;

    let res = client().get(proxy.url("/login")).send().await.unwrap();
    assert_eq!(res.status(), 302);
    assert_eq!(res.headers()["location"], "/web/index.html?from=login");
    assert!(res.bytes().await.unwrap().is_empty());

    let res = client().get(proxy.url("/other")).send().await.unwrap();
    assert_eq!(res.headers()["location"], "https://elsewhere.example.net/x");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (default_url, seen) = recording_backend("default").await;
    let mut config = test_config(&default_url);
    config.upstream.max_body_bytes = 16;
    let proxy = start_proxy(config, None).await;

    let res = client()
        .post(proxy.url("/Sessions/Playing"))
        .body(vec![b'x'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_api_timeout_returns_gateway_timeout() {
    let fetcher = ScriptedFetcher::new(vec![Step::Hang]);
    let mut config = test_config("http://origin.test");
    config.upstream.api_timeout_ms = 200;
    let proxy = start_proxy(config, Some(fetcher.clone())).await;

    let res = client().get(proxy.url("/System/Info")).send().await.unwrap();
    assert_eq!(res.status(), 504);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Gateway Timeout");

    let res = client()
        .get(proxy.url("/System/Info"))
        .send()
        .await
        .unwrap();
    // The script is exhausted; later calls succeed.
    assert_eq!(res.status(), 200);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_timeout_debug_headers() {
    let fetcher = ScriptedFetcher::new(vec![Step::Hang]);
    let mut config = test_config("http://origin.test");
    config.upstream.critical_timeout_ms = 150;
    let proxy = start_proxy(config, Some(fetcher)).await;

    let res = client()
        .get(proxy.url("/Items/1/PlaybackInfo"))
        .header("x-proxy-debug", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 504);
    assert_eq!(res.headers()["x-proxy-error"], "Timeout-150ms");
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Proxy Error:"));
}

#[tokio::test]
async fn test_media_retry_diagnostics() {
    let fetcher = ScriptedFetcher::new(vec![
        Step::status(503),
        Step::media("video/mp4", vec![chunk(0, b"frame-1"), chunk(5, b"frame-2")], false),
    ]);
    let proxy = start_proxy(test_config("http://origin.test"), Some(fetcher.clone())).await;

    let res = client()
        .get(proxy.url("/Videos/7/stream.mp4"))
        .header("x-proxy-debug", "1")
        .header("x-forwarded-for", "198.51.100.1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-proxy-stream-mode"], "bypass");
    assert_eq!(res.headers()["x-proxy-retry"], "1");
    assert_eq!(res.headers()["x-proxy-upstream-status"], "200");
    assert_eq!(res.text().await.unwrap(), "frame-1frame-2");

    assert_eq!(fetcher.calls(), 2);
    let seen = fetcher.seen.lock().unwrap().clone();
    assert_eq!(seen[1].url.as_str(), "http://origin.test/Videos/7/stream.mp4");
    assert_eq!(seen[1].headers["accept-encoding"], "identity");
    assert!(seen[1].headers.get("x-forwarded-for").is_none());
}

#[tokio::test]
async fn test_media_fallback_and_no_diagnostics_by_default() {
    let fetcher = ScriptedFetcher::new(vec![Step::status(500), Step::status(500)]);
    let proxy = start_proxy(test_config("http://origin.test"), Some(fetcher.clone())).await;

    let res = client()
        .get(proxy.url("/Items/3/Download"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    assert!(res.headers().get("x-proxy-stream-mode").is_none());
    assert_eq!(res.text().await.unwrap(), "body");
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_stalled_media_stream_is_torn_down() {
    let fetcher = ScriptedFetcher::new(vec![Step::media(
        "application/json",
        vec![chunk(0, b"{")],
        true,
    )]);
    let mut config = test_config("http://origin.test");
    config.media.idle_timeout_ms = 200;
    let proxy = start_proxy(config, Some(fetcher.clone())).await;

    let res = client()
        .get(proxy.url("/Videos/9/stream"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    // The body ends with an error once the watchdog fires.
    let outcome = tokio::time::timeout(Duration::from_secs(5), res.bytes()).await;
    assert!(matches!(outcome, Ok(Err(_))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.cancels.load(Ordering::SeqCst), 1);
}
