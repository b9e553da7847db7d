//! Question answering end to end against mock embedding and chat servers.

use std::path::PathBuf;

use docpilot::config::Config;
use docpilot::embedding::{Embedder, OpenAIEmbedder};
use docpilot::llm::OpenAiCompatibleModel;
use docpilot::qa::{Backends, QaState};
use docpilot::session::{Session, TurnError, TurnOutcome};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const POLICY: &str = "Shipping is free on orders over fifty dollars.\n\n\
Refunds are issued within fourteen days of a refund request.";

/// Embeds each input as (#"refund", #"shipping") in OpenAI response shape.
struct KeywordEmbeddings;

impl Respond for KeywordEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let inputs = body["input"].as_array().unwrap();
        let data: Vec<Value> = inputs
            .iter()
            .enumerate()
            .map(|(index, text)| {
                let text = text.as_str().unwrap().to_lowercase();
                json!({
                    "index": index,
                    "embedding": [
                        text.matches("refund").count() as f64 + 0.01,
                        text.matches("shipping").count() as f64 + 0.01,
                    ],
                })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
    }
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}

fn config(server: &MockServer, output: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.chunking.chunk_size = 80;
    config.chunking.chunk_overlap = 0;
    config.retrieval.top_k = 1;
    config.embedding.provider = "openai".to_string();
    config.embedding.model = Some("text-embedding-3-small".to_string());
    config.embedding.dims = Some(2);
    config.embedding.url = Some(server.uri());
    config.llm.base_url = server.uri();
    config.output.dir = output.to_path_buf();
    config
}

fn backends(config: &Config) -> Backends {
    let embedder = OpenAIEmbedder::new(&config.embedding, "embed-key".to_string()).unwrap();
    assert_eq!(embedder.dims(), 2);
    let model = OpenAiCompatibleModel::new(&config.llm, "chat-key".to_string()).unwrap();
    Backends {
        embedder: Box::new(embedder),
        model: Box::new(model),
    }
}

fn write_doc(tmp: &TempDir) -> PathBuf {
    let path = tmp.path().join("policy.txt");
    std::fs::write(&path, POLICY).unwrap();
    path
}

#[tokio::test]
async fn answers_from_the_most_relevant_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("authorization", "Bearer embed-key"))
        .respond_with(KeywordEmbeddings)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer chat-key"))
        .and(body_partial_json(json!({
            "model": "llama-3.3-70b-versatile",
            "temperature": 0.0,
        })))
        .respond_with(chat_reply("Refunds take fourteen days."))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let cfg = config(&server, tmp.path());
    let mut session = Session::open(&write_doc(&tmp), &cfg, backends(&cfg)).unwrap();
    assert_eq!(session.qa_state(), QaState::Empty);

    let answer = match session.handle_turn("How long do refunds take?").await.unwrap() {
        TurnOutcome::Answered(answer) => answer,
        other => panic!("expected an answer, got {:?}", other),
    };
    assert_eq!(answer.text, "Refunds take fourteen days.");
    assert_eq!(answer.sources.len(), 1);
    assert!(answer.sources[0].chunk.text.starts_with("Refunds are issued"));
    assert_eq!(session.qa_state(), QaState::Ready);

    // The prompt carries the retrieved chunk and the question.
    let requests = server.received_requests().await.unwrap();
    let chat: Value = requests
        .iter()
        .find(|r| r.url.path() == "/chat/completions")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .unwrap();
    let prompt = chat["messages"][0]["content"].as_str().unwrap();
    assert!(prompt.contains("Refunds are issued within fourteen days"));
    assert!(prompt.ends_with("Question: How long do refunds take?\nHelpful Answer:"));
}

#[tokio::test]
async fn model_outage_fails_the_turn_but_keeps_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(KeywordEmbeddings)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let cfg = config(&server, tmp.path());
    let mut session = Session::open(&write_doc(&tmp), &cfg, backends(&cfg)).unwrap();

    let err = session.handle_turn("Is shipping free?").await.unwrap_err();
    match &err {
        TurnError::Qa(qa) => assert!(qa.is_external()),
        other => panic!("expected a QA error, got {:?}", other),
    }
    assert!(err.to_string().contains("503"));
    assert_eq!(session.history().count(), 0);

    // Edits keep working after a failed question.
    match session.handle_turn("replace fifty with sixty").await.unwrap() {
        TurnOutcome::Edited(report) => {
            let text = std::fs::read_to_string(&report.output).unwrap();
            assert!(text.contains("over sixty dollars"));
        }
        other => panic!("expected an edit, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_embedding_response_is_an_external_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": "list" })))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let cfg = config(&server, tmp.path());
    let mut session = Session::open(&write_doc(&tmp), &cfg, backends(&cfg)).unwrap();

    let err = session.handle_turn("Is shipping free?").await.unwrap_err();
    assert!(matches!(&err, TurnError::Qa(qa) if qa.is_external()));
    assert_eq!(session.qa_state(), QaState::Empty);
}
