#![cfg(feature = "http")]

use log_producer::client::{LogClient, PutLogsRequest};
use log_producer::http::{HttpClientConfig, HttpLogClient};
use log_producer::{LogItem, LogProducer, ProducerConfig, ProjectConfig, ProjectConfigs};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn request<'a>(items: &'a [LogItem]) -> PutLogsRequest<'a> {
    PutLogsRequest {
        log_store: "ls",
        topic: "topic",
        source: "host-1",
        shard_hash: "",
        package_id: "PKG-1",
        items,
    }
}

#[tokio::test]
async fn posts_records_as_json() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/logstores/ls/track")
        .match_header("x-log-apiversion", "0.6.0")
        .match_header("x-acs-security-token", "token")
        .match_body(Matcher::PartialJson(json!({
            "__topic__": "topic",
            "__source__": "host-1",
        })))
        .with_status(200)
        .create_async()
        .await;

    let project = ProjectConfig::new("p", server.url(), "id", "secret").with_security_token("token");
    let items = vec![LogItem::with_time(7).with_content("level", "info")];
    HttpLogClient::default()
        .put_logs(&project, &request(&items))
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn service_errors_carry_code_and_message() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/logstores/ls/track")
        .with_status(403)
        .with_body(r#"{"errorCode":"WriteQuotaExceed","errorMessage":"quota exceeded"}"#)
        .create_async()
        .await;

    let project = ProjectConfig::new("p", server.url(), "id", "secret");
    let items = vec![LogItem::with_time(7)];
    let err = HttpLogClient::default()
        .put_logs(&project, &request(&items))
        .await
        .unwrap_err();
    assert_eq!(err.code, "WriteQuotaExceed");
    assert_eq!(err.message, "quota exceeded");
}

#[tokio::test]
async fn unreachable_endpoint_is_a_request_error() {
    let client = HttpLogClient::new(HttpClientConfig {
        request_timeout: Duration::from_secs(2),
        use_https: false,
    });
    // Nothing listens on the discard port.
    let project = ProjectConfig::new("p", "http://127.0.0.1:9", "id", "secret");
    let items = vec![LogItem::with_time(7)];
    let err = client.put_logs(&project, &request(&items)).await.unwrap_err();
    assert_eq!(err.code, "RequestError");
    assert!(err.message.starts_with("Web request failed: "), "{}", err.message);
}

#[tokio::test]
async fn producer_retries_through_the_http_client() {
    let mut server = mockito::Server::new_async().await;
    let busy = server
        .mock("POST", "/logstores/ls/track")
        .with_status(503)
        .with_body(r#"{"errorCode":"ServerBusy","errorMessage":"try later"}"#)
        .expect(1)
        .create_async()
        .await;

    let config = ProducerConfig::new()
        .with_base_retry_backoff_ms(1_000)
        .with_linger_ms(100)
        .with_jitter_seed(1);
    let producer = LogProducer::new(
        config,
        ProjectConfigs::from_configs([ProjectConfig::new("p", server.url(), "id", "secret")]),
        Arc::new(HttpLogClient::default()),
    )
    .unwrap();
    let mut future = producer
        .send("p", "ls", LogItem::new().with_content("k", "v"))
        .await
        .unwrap();

    // Let the first attempt fail, then make the service healthy again.
    tokio::time::sleep(Duration::from_millis(300)).await;
    busy.assert_async().await;
    busy.remove_async().await;
    let ok = server
        .mock("POST", "/logstores/ls/track")
        .with_status(200)
        .create_async()
        .await;

    let result = future
        .wait_timeout(Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_successful());
    assert_eq!(result.attempts().len(), 2);
    assert_eq!(result.attempts()[0].error_code, "ServerBusy");
    ok.assert_async().await;
    producer.close().await.unwrap();
}
