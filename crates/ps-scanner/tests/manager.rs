//! Integration tests for the scan manager lifecycle and pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use ps_analysis::{AnalysisError, ScriptedClient};
use ps_core::{Config, Exchange, HttpRequest, HttpResponse, RiskLevel, ScanId, ScanStatus};
use ps_scanner::{MemoryTrafficSource, ScanError, ScanManager, ScannerStatus};
use tokio::runtime::Handle;

const WAIT: Duration = Duration::from_secs(10);

fn config(threads: usize) -> Config {
    let mut config = Config::default();
    config.scan.thread_count = threads;
    config.scan.retry_backoff_ms = 1;
    config.scan.shutdown_timeout_ms = 500;
    config
}

fn manager_with(config: &Config) -> (ScanManager, Arc<MemoryTrafficSource>) {
    let source = Arc::new(MemoryTrafficSource::new());
    let manager =
        ScanManager::new(config, Arc::clone(&source) as _, Handle::current()).unwrap();
    (manager, source)
}

fn get(url: &str) -> Exchange {
    Exchange::new(HttpRequest::new("GET", url), Some(HttpResponse::new(200)))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_twice_registers_once() {
    let (manager, source) = manager_with(&config(2));
    manager.start();
    manager.start();
    assert!(manager.is_running());
    assert_eq!(source.registrations_total(), 1);
    assert_eq!(source.handler_count(), 1);

    manager.shutdown().await;
    assert!(!manager.is_running());
    assert_eq!(source.handler_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_without_start() {
    let (manager, source) = manager_with(&config(2));
    manager.stop();
    manager.shutdown().await;
    assert!(!manager.is_running());
    assert_eq!(source.registrations_total(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_registers_again() {
    let (manager, source) = manager_with(&config(1));
    manager.start();
    manager.stop();
    manager.start();
    assert_eq!(source.registrations_total(), 2);
    assert_eq!(source.handler_count(), 1);
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_thread_count_clamping() {
    let (manager, _source) = manager_with(&config(3));
    assert_eq!(manager.set_thread_count(100), 10);
    assert_eq!(manager.set_thread_count(0), 1);
    assert_eq!(manager.set_thread_count(-1), 1);
    assert_eq!(manager.set_thread_count(4), 4);
    assert_eq!(manager.thread_count(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_events() {
    let (manager, _source) = manager_with(&config(2));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    manager.on_status_changed(move |status| sink.lock().push(status));

    manager.start();
    manager.set_thread_count(5);
    manager.set_thread_count(5);
    manager.clear_results();

    assert_eq!(
        *events.lock(),
        vec![
            ScannerStatus::Started { threads: 2 },
            ScannerStatus::ThreadCountChanged { threads: 5 },
            ScannerStatus::Stopped,
            ScannerStatus::Cleared,
        ]
    );
}

// =============================================================================
// Intake
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_request_requires_running() {
    let (manager, _source) = manager_with(&config(1));
    assert!(manager.add_request(get("https://shop.test/api/items")).is_none());
    assert!(manager.get_scan_results().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_filtered_and_duplicate_requests() {
    let (manager, _source) = manager_with(&config(1));
    manager.set_api_client(Some(Arc::new(ScriptedClient::new("未发现任何安全漏洞"))));
    manager.start();

    assert!(manager.add_request(get("https://shop.test/static/app.js")).is_none());
    assert!(manager.add_request(get("https://shop.test/logo.png?v=2")).is_none());

    let first = manager.add_request(get("https://shop.test/api/items?page=1"));
    assert!(first.is_some());
    assert!(manager.add_request(get("https://shop.test/api/items?page=2")).is_none());

    let post = Exchange::new(HttpRequest::new("POST", "https://shop.test/api/items"), None);
    assert!(manager.add_request(post).is_some());

    assert_eq!(manager.stats().total, 2);
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queued_result_is_pending_and_announced() {
    let (manager, _source) = manager_with(&config(1));
    let queued = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&queued);
    manager.on_new_request_queued(move |result| {
        assert_eq!(result.status(), ScanStatus::Pending);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    manager.start();

    let result = manager.add_request(get("https://shop.test/api/orders/7")).unwrap();
    assert_eq!(result.method(), "GET");
    assert_eq!(result.host(), "shop.test");
    assert!(result.request_text().contains("GET /api/orders/7 HTTP/1.1"));
    assert_eq!(queued.load(Ordering::SeqCst), 1);
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_capture_handler_feeds_pipeline() {
    let (manager, source) = manager_with(&config(2));
    manager.set_api_client(Some(Arc::new(ScriptedClient::new("未发现任何安全漏洞"))));

    assert_eq!(source.publish(get("https://shop.test/api/a")), 0);
    manager.start();
    assert_eq!(source.publish(get("https://shop.test/api/a")), 1);
    assert!(manager.wait_idle(WAIT).await);
    assert_eq!(manager.get_scan_results().len(), 1);

    manager.shutdown().await;
    assert_eq!(source.publish(get("https://shop.test/api/b")), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queue_full_drops_candidate() {
    let mut cfg = config(1);
    cfg.scan.queue_capacity = 1;
    let (manager, _source) = manager_with(&cfg);
    let client = ScriptedClient::new("ok").with_delay(Duration::from_secs(60));
    manager.set_api_client(Some(Arc::new(client)));
    manager.start();

    let first = manager.add_request(get("https://shop.test/api/1")).unwrap();
    wait_for(|| {
        manager
            .get_result_by_id(first.id())
            .is_some_and(|r| r.status() == ScanStatus::Scanning)
    })
    .await;

    assert!(manager.add_request(get("https://shop.test/api/2")).is_some());
    assert!(manager.add_request(get("https://shop.test/api/3")).is_none());
    assert_eq!(manager.stats().total, 2);
    assert_eq!(manager.get_scan_results().len(), 2);

    manager.shutdown().await;
}

// =============================================================================
// Queries and clear
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_get_scan_results_returns_fresh_copy() {
    let (manager, _source) = manager_with(&config(1));
    manager.set_api_client(Some(Arc::new(ScriptedClient::new("未发现任何安全漏洞"))));
    manager.start();
    manager.add_request(get("https://shop.test/api/a")).unwrap();

    let mut before = manager.get_scan_results();
    before.clear();
    assert!(manager.wait_idle(WAIT).await);
    let after = manager.get_scan_results();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].status(), ScanStatus::Completed);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clear_results_resets_everything() {
    let (manager, _source) = manager_with(&config(2));
    manager.set_api_client(Some(Arc::new(ScriptedClient::new("存在SQL注入漏洞"))));
    manager.start();
    let first = manager.add_request(get("https://shop.test/api/a")).unwrap();
    manager.add_request(get("https://shop.test/api/b")).unwrap();
    assert!(manager.wait_idle(WAIT).await);

    manager.clear_results();
    assert!(!manager.is_running());
    assert!(manager.get_scan_results().is_empty());
    let stats = manager.stats();
    assert_eq!((stats.total, stats.queued, stats.completed), (0, 0, 0));
    assert!(manager.get_progress().abs() < f64::EPSILON);
    assert!(manager.get_stats_by_risk_level().values().all(|n| *n == 0));

    manager.start();
    let again = manager.add_request(get("https://shop.test/api/a")).unwrap();
    assert!(again.id() > first.id());
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clear_during_scan_leaves_no_stale_counts() {
    let (manager, _source) = manager_with(&config(1));
    let client = ScriptedClient::new("未发现任何安全漏洞").with_delay(Duration::from_secs(30));
    manager.set_api_client(Some(Arc::new(client)));
    manager.start();
    let first = manager.add_request(get("https://shop.test/api/a")).unwrap();
    wait_for(|| {
        manager
            .get_result_by_id(first.id())
            .is_some_and(|r| r.status() == ScanStatus::Scanning)
    })
    .await;

    manager.clear_results();
    // Give the cancelled task time to settle against the cleared store.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = manager.stats();
    assert_eq!((stats.total, stats.queued, stats.completed), (0, 0, 0));

    manager.start();
    let second = manager.add_request(get("https://shop.test/api/b")).unwrap();
    wait_for(|| {
        manager
            .get_result_by_id(second.id())
            .is_some_and(|r| r.status() == ScanStatus::Scanning)
    })
    .await;
    assert!(!manager.wait_idle(Duration::from_millis(50)).await);
    assert!(manager.get_progress().abs() < f64::EPSILON);
    let stats = manager.stats();
    assert_eq!((stats.total, stats.completed), (1, 0));
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_three_gets() {
    let (manager, _source) = manager_with(&config(1));
    let client = ScriptedClient::new("未发现任何安全漏洞")
        .with_reply("存在SQL注入漏洞，参数id可被利用")
        .with_reply("发现反射型XSS漏洞");
    manager.set_api_client(Some(Arc::new(client)));
    manager.start();

    for path in ["a", "b", "c"] {
        let url = format!("https://shop.test/api/{path}");
        assert!(manager.add_request(get(&url)).is_some());
    }
    assert!(manager.wait_idle(WAIT).await);

    assert!((manager.get_progress() - 1.0).abs() < f64::EPSILON);
    let results = manager.get_scan_results();
    assert!(results.iter().all(|r| r.status().is_terminal()));
    let by_risk = manager.get_stats_by_risk_level();
    assert_eq!(by_risk.len(), RiskLevel::ALL.len());
    assert_eq!(by_risk.values().sum::<usize>(), 3);
    assert_eq!(by_risk[&RiskLevel::High], 1);
    assert_eq!(by_risk[&RiskLevel::Medium], 1);
    assert_eq!(by_risk[&RiskLevel::None], 1);

    let report = manager.snapshot();
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.model.as_deref(), Some("scripted"));
    assert_eq!(report.stats.succeeded(), 3);

    manager.shutdown().await;
}

// =============================================================================
// Task outcomes
// =============================================================================

async fn run_one(client: ScriptedClient) -> (ps_core::ScanResult, Arc<ScriptedClient>) {
    let (manager, _source) = manager_with(&config(1));
    let client = Arc::new(client);
    manager.set_api_client(Some(Arc::clone(&client) as _));
    manager.start();
    let queued = manager.add_request(get("https://shop.test/api/search?q=1")).unwrap();
    assert!(manager.wait_idle(WAIT).await);
    let result = manager.get_result_by_id(queued.id()).unwrap();
    manager.shutdown().await;
    (result, client)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retryable_errors_are_retried() {
    let client = ScriptedClient::new("unused")
        .with_error(AnalysisError::malformed("truncated json"))
        .with_error(AnalysisError::EmptyContent)
        .with_reply("风险等级: 高危\n存在SQL注入");
    let (result, client) = run_one(client).await;

    assert_eq!(result.status(), ScanStatus::Completed);
    assert_eq!(result.risk_level(), RiskLevel::High);
    assert_eq!(client.call_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retries_exhausted_marks_error() {
    let client = ScriptedClient::new("unused")
        .with_error(AnalysisError::EmptyContent)
        .with_error(AnalysisError::EmptyContent)
        .with_error(AnalysisError::InputRequired("more".to_owned()));
    let (result, client) = run_one(client).await;

    assert_eq!(result.status(), ScanStatus::Error);
    assert!(result.error_message().unwrap().contains("more"));
    assert_eq!(client.call_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_fatal_refusal_completes_with_note() {
    let client = ScriptedClient::new("unused")
        .with_error(AnalysisError::ContentRejected("data_inspection_failed".to_owned()));
    let (result, client) = run_one(client).await;

    assert_eq!(result.status(), ScanStatus::Completed);
    assert_eq!(result.risk_level(), RiskLevel::None);
    assert!(result.analysis_result().unwrap().starts_with("[分析跳过]"));
    assert_eq!(client.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fatal_error_is_not_retried() {
    let client = ScriptedClient::new("unused").with_error(AnalysisError::Api {
        status: 401,
        message: "invalid api key".to_owned(),
    });
    let (result, client) = run_one(client).await;

    assert_eq!(result.status(), ScanStatus::Error);
    assert!(result.error_message().unwrap().contains("401"));
    assert_eq!(client.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_client_marks_error() {
    let (manager, _source) = manager_with(&config(1));
    manager.start();
    let queued = manager.add_request(get("https://shop.test/api/a")).unwrap();
    assert!(manager.wait_idle(WAIT).await);

    let result = manager.get_result_by_id(queued.id()).unwrap();
    assert_eq!(result.status(), ScanStatus::Error);
    assert!(result.error_message().unwrap().contains("not configured"));
    assert_eq!(manager.stats().errors, 1);
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_cancels_running_and_pending() {
    let (manager, _source) = manager_with(&config(1));
    let client = ScriptedClient::new("late").with_delay(Duration::from_secs(60));
    manager.set_api_client(Some(Arc::new(client)));
    manager.start();

    let first = manager.add_request(get("https://shop.test/api/1")).unwrap();
    manager.add_request(get("https://shop.test/api/2")).unwrap();
    manager.add_request(get("https://shop.test/api/3")).unwrap();
    wait_for(|| {
        manager
            .get_result_by_id(first.id())
            .is_some_and(|r| r.status() == ScanStatus::Scanning)
    })
    .await;

    manager.stop();
    assert!(manager.wait_idle(WAIT).await);

    let results = manager.get_scan_results();
    assert!(results.iter().all(|r| r.status() == ScanStatus::Cancelled));
    let stats = manager.stats();
    assert_eq!(stats.cancelled, 3);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.queued, 0);
    assert!((manager.get_progress() - 1.0).abs() < f64::EPSILON);
}

// =============================================================================
// Callbacks
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_result_updated_once_per_result() {
    let (manager, _source) = manager_with(&config(3));
    manager.set_api_client(Some(Arc::new(ScriptedClient::new("建议开启HSTS"))));
    let seen: Arc<Mutex<HashMap<ScanId, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let sink = Arc::clone(&seen);
    manager.on_result_updated(move |result| {
        assert!(result.is_terminal());
        *sink.lock().entry(result.id()).or_default() += 1;
    });
    manager.start();

    for n in 0..8 {
        manager.add_request(get(&format!("https://shop.test/api/{n}")));
    }
    assert!(manager.wait_idle(WAIT).await);

    let seen = seen.lock();
    assert_eq!(seen.len(), 8);
    assert!(seen.values().all(|count| *count == 1));
    drop(seen);
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streaming_chunks_forwarded() {
    let reply = "风险等级: 中危\n发现反射型XSS漏洞，参数q未经转义直接输出到页面。";
    let (manager, _source) = manager_with(&config(1));
    manager.set_api_client(Some(Arc::new(ScriptedClient::new(reply))));
    let streamed: Arc<Mutex<HashMap<ScanId, String>>> = Arc::new(Mutex::new(HashMap::new()));
    let sink = Arc::clone(&streamed);
    manager.on_streaming_chunk(move |id, chunk| {
        sink.lock().entry(id).or_default().push_str(chunk);
    });
    manager.start();

    let a = manager.add_request(get("https://shop.test/search?q=1")).unwrap();
    let b = manager.add_request(get("https://shop.test/find?q=1")).unwrap();
    assert!(manager.wait_idle(WAIT).await);

    let streamed = streamed.lock();
    assert_eq!(streamed.get(&a.id()).map(String::as_str), Some(reply));
    assert_eq!(streamed.get(&b.id()).map(String::as_str), Some(reply));
    drop(streamed);
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_callback_does_not_stall_pipeline() {
    let (manager, _source) = manager_with(&config(2));
    manager.set_api_client(Some(Arc::new(ScriptedClient::new("未发现任何安全漏洞"))));
    manager.on_result_updated(|_| panic!("listener bug"));
    manager.on_progress_changed(|_| panic!("listener bug"));
    manager.start();

    for n in 0..4 {
        manager.add_request(get(&format!("https://shop.test/api/{n}")));
    }
    assert!(manager.wait_idle(WAIT).await);
    assert_eq!(manager.stats().succeeded(), 4);
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callback_may_reenter_manager() {
    let (manager, _source) = manager_with(&config(1));
    manager.set_api_client(Some(Arc::new(ScriptedClient::new("未发现任何安全漏洞"))));
    let observed = Arc::new(AtomicUsize::new(0));
    let handle = manager.clone();
    let counter = Arc::clone(&observed);
    manager.on_result_updated(move |_| {
        counter.store(handle.get_scan_results().len(), Ordering::SeqCst);
        handle.set_thread_count(2);
    });
    manager.start();
    manager.add_request(get("https://shop.test/api/a")).unwrap();
    assert!(manager.wait_idle(WAIT).await);

    assert_eq!(observed.load(Ordering::SeqCst), 1);
    assert_eq!(manager.thread_count(), 2);
    manager.shutdown().await;
}

// =============================================================================
// Collaborators
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_swap_applies_to_running_pool() {
    let (manager, _source) = manager_with(&config(1));
    let old = Arc::new(ScriptedClient::new("存在SQL注入漏洞").with_model("old"));
    let new = Arc::new(ScriptedClient::new("未发现任何安全漏洞").with_model("new"));
    manager.set_api_client(Some(Arc::clone(&old) as _));
    manager.start();

    let first = manager.add_request(get("https://shop.test/api/a")).unwrap();
    assert!(manager.wait_idle(WAIT).await);
    manager.set_api_client(Some(Arc::clone(&new) as _));
    assert!(manager.is_running());
    let second = manager.add_request(get("https://shop.test/api/b")).unwrap();
    assert!(manager.wait_idle(WAIT).await);

    let first = manager.get_result_by_id(first.id()).unwrap();
    let second = manager.get_result_by_id(second.id()).unwrap();
    assert_eq!(first.analysis_result(), Some("存在SQL注入漏洞"));
    assert_eq!(first.risk_level(), RiskLevel::High);
    assert_eq!(second.analysis_result(), Some("未发现任何安全漏洞"));
    assert_eq!(second.risk_level(), RiskLevel::None);
    assert_eq!((old.call_count(), new.call_count()), (1, 1));
    assert_eq!(manager.snapshot().model.as_deref(), Some("new"));
    manager.shutdown().await;
}

// =============================================================================
// Direct analysis
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_analyze_request_requires_client() {
    let (manager, _source) = manager_with(&config(1));
    let err = manager
        .analyze_request(&get("https://shop.test/api/a"))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::ClientNotConfigured));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_analyze_request_bypasses_queue() {
    let (manager, _source) = manager_with(&config(1));
    let client = Arc::new(ScriptedClient::new("存在SQL注入漏洞"));
    manager.set_api_client(Some(Arc::clone(&client) as _));

    let text = manager
        .analyze_request(&get("https://shop.test/static/app.js"))
        .await
        .unwrap();
    assert_eq!(text, "存在SQL注入漏洞");
    assert!(client.prompts()[0].contains("GET /static/app.js"));
    assert!(manager.get_scan_results().is_empty());
}
