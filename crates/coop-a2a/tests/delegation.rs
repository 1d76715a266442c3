#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Delegation against a mocked peer and against a served in-process engine.

use async_trait::async_trait;
use coop_a2a::{
    A2aServer, AgentEngine, AgentEvent, Delegator, Message, RemotePeer, Session,
};
use coop_core::CoopResult;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Replies to `message/send` with a fixed text, echoing the request id.
struct ReplyWith(&'static str);

impl Respond for ReplyWith {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        assert!(body["params"]["message"]["messageId"].is_string());
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": body["id"],
            "result": {"message": {"role": "agent", "parts": [{"kind": "text", "text": self.0}]}}
        }))
    }
}

/// Wraps a responder, delaying its reply.
struct Delayed<R>(R, Duration);

impl<R: Respond> Respond for Delayed<R> {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.0.respond(request).set_delay(self.1)
    }
}

fn delegator_for(url: String) -> Delegator {
    Delegator::new(Arc::new(RemotePeer::new(url).unwrap()))
}

#[tokio::test]
async fn test_reply_is_annotated_with_share_link() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "method": "message/send",
            "params": {"message": {"role": "user", "parts": [{"text": "Context: 50 units expiring\nGoal: write a tweet"}]}}
        })))
        .respond_with(ReplyWith("Buy now!"))
        .expect(1)
        .mount(&server)
        .await;

    let out = delegator_for(server.uri())
        .consult("50 units expiring", "write a tweet")
        .await;
    assert!(out.starts_with("Buy now!"), "{out}");
    assert!(out.contains("[Post to Twitter](https://twitter.com/intent/tweet?text=Buy%20now%21)"), "{out}");
}

#[tokio::test]
async fn test_peer_error_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "x",
            "error": {"code": -1, "message": "boom"}
        })))
        .mount(&server)
        .await;

    let out = delegator_for(server.uri()).consult("c", "g").await;
    assert!(out.starts_with("Error (PeerReportedError) from peer agent"), "{out}");
    assert!(out.contains("boom"));
    assert!(!out.contains("Post to Twitter"));
}

#[tokio::test]
async fn test_unexpected_shape_embeds_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "x",
            "result": {"status": {"state": "submitted"}}
        })))
        .mount(&server)
        .await;

    let out = delegator_for(server.uri()).consult("c", "g").await;
    assert!(
        out.starts_with("Error (ProtocolError): unexpected response format from peer agent"),
        "{out}"
    );
    assert!(out.contains("submitted"));
}

#[tokio::test]
async fn test_unreachable_peer_is_text_not_panic() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    drop(listener);

    let out = delegator_for(url.clone()).consult("c", "g").await;
    assert!(out.starts_with("Error (TransportUnavailable)"), "{out}");
    assert!(out.contains(&url));
}

#[tokio::test]
async fn test_slow_peer_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(Delayed(ReplyWith("late"), Duration::from_secs(5)))
        .mount(&server)
        .await;

    let peer = RemotePeer::with_timeout(server.uri(), Duration::from_millis(200)).unwrap();
    let out = Delegator::new(Arc::new(peer)).consult("c", "g").await;
    assert!(out.starts_with("Error (ToolCallTimeout)"), "{out}");
}

/// Writes a short campaign for whatever it is asked, streaming a tool step
/// before the final answer.
struct Copywriter;

#[async_trait]
impl AgentEngine for Copywriter {
    fn app_name(&self) -> &str {
        "marketing_agent"
    }

    async fn run(&self, session: &Session, message: Message) -> CoopResult<mpsc::Receiver<AgentEvent>> {
        assert!(session.session_id.starts_with("marketing_agent-"));
        let goal = message
            .first_text()
            .and_then(|t| t.lines().find_map(|l| l.strip_prefix("Goal: ")))
            .unwrap_or("nothing")
            .to_string();
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            tx.send(AgentEvent::progress("marketing_agent", None)).await.ok();
            tx.send(AgentEvent::final_text("marketing_agent", format!("Campaign: {goal}")))
                .await
                .ok();
        });
        Ok(rx)
    }
}

#[tokio::test]
async fn test_round_trip_through_served_engine() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = A2aServer::build(Arc::new(Copywriter), "writes campaigns", Duration::from_secs(5));
    tokio::spawn(A2aServer::serve(listener, router));

    let out = delegator_for(format!("http://{addr}/"))
        .consult("Surplus chicken thighs", "promote & sell")
        .await;
    assert!(out.starts_with("Campaign: promote & sell\n\n"), "{out}");
    assert!(out.ends_with("?text=Campaign%3A%20promote%20%26%20sell)"), "{out}");

    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
}
