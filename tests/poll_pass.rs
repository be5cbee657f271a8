//! Poll passes end to end: checks, notifications and the closing save.

mod common;

use common::{RecordingDelivery, ScriptedProbe};
use reqwest::StatusCode;
use sitewatch::monitor::ProbeResponse;
use sitewatch::notify::TRUNCATION_MARKER;
use sitewatch::prelude::*;
use tempfile::TempDir;

const T1: TenantId = TenantId(1);
const C10: ChannelId = ChannelId(10);
const BLOG: &str = "https://example.com/blog";

fn service(dir: &TempDir, probe: &ScriptedProbe, delivery: &RecordingDelivery) -> WatchService {
    WatchService::builder()
        .with_store(CsvStore::new(dir.path()))
        .with_probe(probe.clone())
        .with_delivery(delivery.clone())
        .with_baseline_priming(false)
        .build()
        .unwrap()
}

async fn with_blog(service: &WatchService) {
    service.provision_tenant(T1).await.unwrap();
    service.add_watched_resource(T1, C10, "blog", BLOG).await.unwrap();
}

#[tokio::test]
async fn test_first_change_then_not_modified() {
    let dir = TempDir::new().unwrap();
    let probe = ScriptedProbe::new();
    let delivery = RecordingDelivery::new();
    let service = service(&dir, &probe, &delivery);
    with_blog(&service).await;

    // No baseline: the change is reported without a diff.
    probe.respond(BLOG, ProbeResponse::ok("<p>hello</p>\n").with_etag("\"v1\""));
    let report = service.run_one_poll_pass().await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.changed, 1);
    assert_eq!(report.notified, 1);
    assert!(report.saved);
    assert_eq!(
        delivery.take(),
        vec![(C10, format!("[blog]({BLOG}) was updated!\n"))]
    );

    probe.respond(BLOG, ProbeResponse::not_modified());
    let report = service.run_one_poll_pass().await;
    assert_eq!(report.changed, 0);
    assert_eq!(report.notified, 0);
    assert!(delivery.take().is_empty());

    let request = probe.last_request(BLOG).unwrap();
    assert_eq!(request.if_none_match.as_deref(), Some("\"v1\""));
    assert!(request.if_modified_since.is_some());
}

#[tokio::test]
async fn test_change_notifies_subscribers_with_diff() {
    let dir = TempDir::new().unwrap();
    let probe = ScriptedProbe::new();
    let delivery = RecordingDelivery::new();
    let service = service(&dir, &probe, &delivery);
    with_blog(&service).await;
    service.subscribe(T1, SubscriberId(7), "blog").await.unwrap();
    service.subscribe(T1, SubscriberId(3), "blog").await.unwrap();

    probe.respond(BLOG, ProbeResponse::ok("title\nold line\n"));
    service.run_one_poll_pass().await;
    delivery.take();

    probe.respond(BLOG, ProbeResponse::ok("title\nnew line\n"));
    service.run_one_poll_pass().await;

    let sent = delivery.take();
    assert_eq!(sent.len(), 1);
    let (channel, text) = &sent[0];
    assert_eq!(*channel, C10);
    assert!(text.starts_with(&format!(
        "[blog]({BLOG}) was updated!\n* <@3>\n* <@7>\n\n```diff\n--- Before\n+++ After\n"
    )));
    assert!(text.contains("\n-old line\n"));
    assert!(text.contains("\n+new line\n"));
    assert!(text.ends_with("```"));
}

#[tokio::test]
async fn test_long_diff_is_truncated() {
    let dir = TempDir::new().unwrap();
    let probe = ScriptedProbe::new();
    let delivery = RecordingDelivery::new();
    let service = service(&dir, &probe, &delivery);
    with_blog(&service).await;

    let before: String = (0..400).map(|i| format!("row {i}\n")).collect();
    let after: String = (0..400).map(|i| format!("changed row {i}\n")).collect();
    probe.respond(BLOG, ProbeResponse::ok(before));
    probe.respond(BLOG, ProbeResponse::ok(after));
    service.run_one_poll_pass().await;
    delivery.take();
    service.run_one_poll_pass().await;

    let sent = delivery.take();
    let text = &sent[0].1;
    assert_eq!(text.chars().count(), 2000);
    assert!(text.ends_with(TRUNCATION_MARKER));
    assert!(text.starts_with(&format!("[blog]({BLOG}) was updated!\n")));
}

#[tokio::test]
async fn test_failures_do_not_stop_the_pass() {
    let dir = TempDir::new().unwrap();
    let probe = ScriptedProbe::new();
    let delivery = RecordingDelivery::new();
    let service = service(&dir, &probe, &delivery);
    with_blog(&service).await;
    service
        .add_watched_resource(T1, C10, "down", "https://down.example.com")
        .await
        .unwrap();
    service
        .add_watched_resource(T1, ChannelId(11), "gone", "https://gone.example.com")
        .await
        .unwrap();
    service
        .add_watched_resource(T1, ChannelId(12), "news", "https://news.example.com")
        .await
        .unwrap();
    delivery.refuse(ChannelId(12));

    probe.respond(BLOG, ProbeResponse::ok("blog"));
    probe.fail("https://down.example.com");
    probe.respond(
        "https://gone.example.com",
        ProbeResponse::status(StatusCode::NOT_FOUND),
    );
    probe.respond("https://news.example.com", ProbeResponse::ok("news"));

    let report = service.run_one_poll_pass().await;
    assert_eq!(report.checked, 4);
    assert_eq!(report.changed, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.notified, 1);
    assert_eq!(report.failed_deliveries, 1);
    assert!(report.saved);

    // A failed check changes nothing, so the next request is still unconditional.
    probe.fail("https://down.example.com");
    service.run_one_poll_pass().await;
    let request = probe.last_request("https://down.example.com").unwrap();
    assert_eq!(request.if_none_match, None);
    assert_eq!(request.if_modified_since, None);
}

#[tokio::test]
async fn test_pass_visits_in_stable_order() {
    let dir = TempDir::new().unwrap();
    let probe = ScriptedProbe::new();
    let delivery = RecordingDelivery::new();
    let service = service(&dir, &probe, &delivery);
    service.provision_tenant(TenantId(2)).await.unwrap();
    service.provision_tenant(T1).await.unwrap();
    service
        .add_watched_resource(TenantId(2), ChannelId(5), "z", "https://t2/z")
        .await
        .unwrap();
    service
        .add_watched_resource(T1, ChannelId(20), "a", "https://t1/c20/a")
        .await
        .unwrap();
    service
        .add_watched_resource(T1, C10, "b", "https://t1/c10/b")
        .await
        .unwrap();
    service
        .add_watched_resource(T1, C10, "a", "https://t1/c10/a")
        .await
        .unwrap();

    service.run_one_poll_pass().await;
    let order: Vec<String> = probe.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(
        order,
        vec![
            "https://t1/c10/a",
            "https://t1/c10/b",
            "https://t1/c20/a",
            "https://t2/z"
        ]
    );
}

#[tokio::test]
async fn test_pass_saves_monitor_state() {
    let dir = TempDir::new().unwrap();
    let probe = ScriptedProbe::new();
    let delivery = RecordingDelivery::new();
    let service = service(&dir, &probe, &delivery);
    with_blog(&service).await;

    probe.respond(BLOG, ProbeResponse::ok("body").with_etag("\"e1\""));
    service.run_one_poll_pass().await;

    let tables = CsvStore::new(dir.path()).tables_dir().unwrap().unwrap();
    let table = std::fs::read_to_string(tables.join("monitors/ETagMonitor.csv")).unwrap();
    assert!(table.starts_with("url,validator,pending,last_modified,content\n"));
    assert!(table.contains(r#""""e1""""#));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("cache/ETagMonitor/1/blog.html")).unwrap(),
        "body"
    );
}
