use mockito::{Matcher, Server};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use paratrans::cancel::CancellationToken;
use paratrans::config::ClientSettings;
use paratrans::events::{ChannelSink, TranslationEvent, UnitStatus};
use paratrans::job::{JobResult, JobRunner, TranslationJob, TranslationUnit, UnitId};
use paratrans::translate::{OllamaClient, TranslationSettings};

fn runner_for(endpoint: &str, token: CancellationToken) -> (JobRunner, UnboundedReceiver<TranslationEvent>) {
    let settings = TranslationSettings {
        endpoint: endpoint.to_string(),
        model: "translategemma:4b".to_string(),
        temperature: 0.3,
        custom_prompt: None,
    };
    let tuning = ClientSettings {
        request_timeout_ms: 2_000,
        max_retries: 1,
        retry_base_delay_ms: 10,
        probe_timeout_ms: 500,
    };
    let client = OllamaClient::new(settings, tuning, token.clone()).unwrap();
    let (sink, rx) = ChannelSink::channel();
    (JobRunner::new(Arc::new(client), Arc::new(sink), token), rx)
}

fn drain(rx: &mut UnboundedReceiver<TranslationEvent>) -> Vec<TranslationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_single_paragraph_streams_to_sink() {
    let mut server = Server::new_async().await;
    let chat = server
        .mock("POST", "/api/chat")
        .with_status(200)
        .with_body("{\"message\":{\"content\":\"Bon\"}}\n{\"message\":{\"content\":\"jour\"}}\n")
        .expect(1)
        .create_async()
        .await;

    let (runner, mut rx) = runner_for(&server.url(), CancellationToken::new());
    let job = TranslationJob::new(vec![TranslationUnit::new("p1", "Hello")], "fr");

    let result = runner.run(&job).await;

    assert_eq!(result, JobResult::COMPLETED);
    chat.assert_async().await;

    let p1 = UnitId::from("p1");
    assert_eq!(
        drain(&mut rx),
        vec![
            TranslationEvent::Progress { current: 1, total: 1 },
            TranslationEvent::status(&p1, UnitStatus::Translating),
            TranslationEvent::partial(&p1, "Bon", false),
            TranslationEvent::partial(&p1, "Bonjour", false),
            TranslationEvent::partial(&p1, "Bonjour", true),
            TranslationEvent::status(&p1, UnitStatus::Done),
        ]
    );
}

#[tokio::test]
async fn test_missing_model_fails_one_paragraph_only() {
    let mut server = Server::new_async().await;
    let missing = server
        .mock("POST", "/api/chat")
        .match_body(Matcher::Regex("Second paragraph".to_string()))
        .with_status(404)
        .with_body(r#"{"error":"model \"translategemma:4b\" not found, try pulling it first"}"#)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("POST", "/api/chat")
        .match_body(Matcher::Regex("(First|Third) paragraph".to_string()))
        .with_status(200)
        .with_body("{\"message\":{\"content\":\"ok\"}}\n")
        .create_async()
        .await;

    let (runner, mut rx) = runner_for(&server.url(), CancellationToken::new());
    let job = TranslationJob::new(
        vec![
            TranslationUnit::new("a", "First paragraph"),
            TranslationUnit::new("b", "Second paragraph"),
            TranslationUnit::new("c", "Third paragraph"),
        ],
        "de",
    )
    .with_source_language("en");

    let result = runner.run(&job).await;

    assert_eq!(result, JobResult::COMPLETED);
    missing.assert_async().await;

    let terminal: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, TranslationEvent::Status { status, .. } if status.is_terminal()))
        .collect();
    assert_eq!(
        terminal,
        vec![
            TranslationEvent::status(&"a".into(), UnitStatus::Done),
            TranslationEvent::error(&"b".into(), "Model \"translategemma:4b\" not found"),
            TranslationEvent::status(&"c".into(), UnitStatus::Done),
        ]
    );
}

#[tokio::test]
async fn test_job_after_cancel_runs_normally() {
    let mut server = Server::new_async().await;
    let chat = server
        .mock("POST", "/api/chat")
        .with_status(200)
        .with_body("{\"message\":{\"content\":\"Salut\"}}\n")
        .expect(2)
        .create_async()
        .await;

    let token = CancellationToken::new();
    let (runner, mut rx) = runner_for(&server.url(), token.clone());
    let job = TranslationJob::new(
        vec![TranslationUnit::new("p1", "Hi"), TranslationUnit::new("p2", "Hey")],
        "fr",
    );

    // A cancel left over from an earlier job is cleared at start.
    token.cancel();
    let result = runner.run(&job).await;

    assert_eq!(result, JobResult::COMPLETED);
    chat.assert_async().await;
    let done = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, TranslationEvent::Status { status: UnitStatus::Done, .. }))
        .count();
    assert_eq!(done, 2);
}
