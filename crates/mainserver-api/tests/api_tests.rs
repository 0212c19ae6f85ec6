use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use mainserver_api::ws::{ProtocolMessage, SUBPROTOCOL};
use mainserver_api::{
    ApiError, ClientOptions, GraphQlRequest, GraphQlResponse, HealthCheck, HealthOutcome,
    HttpClient, HttpLink, MainserverClient, RequestLink, ResponseStream, Routed, SplitClient,
    StreamingLink, WsLink,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// HttpClient tests
// ---------------------------------------------------------------------------

mod http_client {
    use super::*;

    #[test]
    fn new_with_valid_url() {
        let client = HttpClient::new("http://localhost:6555/", &ClientOptions::default());
        assert!(client.is_ok());
    }

    #[test]
    fn new_with_invalid_url() {
        let result = HttpClient::new("not a url", &ClientOptions::default());
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ApiError::InvalidUrl(_)));
    }

    #[test]
    fn new_with_timeout_and_without_credentials() {
        let options = ClientOptions {
            with_credentials: false,
            timeout: Some(Duration::from_secs(5)),
        };
        assert!(HttpClient::new("http://localhost:6555/", &options).is_ok());
    }

    #[test]
    fn https_base_initialises_tls() {
        // Building the client exercises the rustls stack; a missing crypto
        // provider shows up here instead of on the first production request.
        let client = HttpClient::new("https://mainserver.failean.com/", &ClientOptions::default());
        assert!(client.is_ok(), "TLS client construction failed");
    }

    #[test]
    fn debug_impl_shows_base_url() {
        let client =
            HttpClient::new("http://example.com:9090/", &ClientOptions::default()).unwrap();
        let debug = format!("{client:?}");
        assert!(
            debug.contains("http://example.com:9090/"),
            "Debug output should contain base_url, got: {debug}"
        );
        assert!(
            debug.contains("HttpClient"),
            "Debug output should contain struct name, got: {debug}"
        );
    }

    #[tokio::test]
    async fn get_sends_json_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/areyoualive"))
            .and(header("content-type", "application/json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"answer": "yes"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri(), &ClientOptions::default()).unwrap();
        let resp: serde_json::Value = client.get("areyoualive").await.unwrap();
        assert_eq!(resp["answer"], "yes");
    }

    #[tokio::test]
    async fn get_returns_api_error_on_500() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/areyoualive"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri(), &ClientOptions::default()).unwrap();
        let result: Result<serde_json::Value, _> = client.get("areyoualive").await;
        match result.unwrap_err() {
            ApiError::ApiResponse { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "internal error");
            }
            other => panic!("expected ApiResponse, got: {other}"),
        }
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ideas"))
            .and(body_json(json!({"title": "Idea"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 1, "title": "Idea"})),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri(), &ClientOptions::default()).unwrap();
        let resp: serde_json::Value =
            client.post("ideas", &json!({"title": "Idea"})).await.unwrap();
        assert_eq!(resp["id"], 1);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/areyoualive"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"answer": "yes"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let options = ClientOptions {
            timeout: Some(Duration::from_millis(50)),
            ..ClientOptions::default()
        };
        let client = HttpClient::new(&server.uri(), &options).unwrap();
        let result: Result<serde_json::Value, _> = client.get("areyoualive").await;
        assert!(matches!(result, Err(ApiError::Request(_))));
    }
}

// ---------------------------------------------------------------------------
// MainserverClient tests
// ---------------------------------------------------------------------------

mod mainserver_client {
    use super::*;

    async fn client_for(body: ResponseTemplate) -> (MockServer, MainserverClient) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/areyoualive"))
            .respond_with(body)
            .mount(&server)
            .await;
        let client = MainserverClient::new(&server.uri(), &ClientOptions::default()).unwrap();
        (server, client)
    }

    #[test]
    fn new_rejects_invalid_url() {
        let result = MainserverClient::new("not a url", &ClientOptions::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn alive_decodes_answer_and_version() {
        let (_server, client) = client_for(
            ResponseTemplate::new(200).set_body_json(json!({"answer": "yes", "version": "1.2.3"})),
        )
        .await;

        let liveness = client.alive().await.unwrap();
        assert_eq!(liveness.answer, "yes");
        assert_eq!(liveness.version.as_deref(), Some("1.2.3"));
        assert_eq!(client.version().await.unwrap(), "1.2.3");
    }

    #[tokio::test]
    async fn health_check_healthy_on_yes() {
        let (_server, client) = client_for(
            ResponseTemplate::new(200).set_body_json(json!({"answer": "yes", "version": "1.2.3"})),
        )
        .await;

        let outcome = HealthOutcome::from(client.is_alive().await);
        assert_eq!(
            outcome,
            HealthOutcome::Healthy {
                version: "1.2.3".into()
            }
        );
    }

    #[tokio::test]
    async fn health_check_bad_answer_on_no() {
        let (_server, client) =
            client_for(ResponseTemplate::new(200).set_body_json(json!({"answer": "no"}))).await;

        let outcome = HealthOutcome::from(client.is_alive().await);
        assert_eq!(outcome, HealthOutcome::BadAnswer { answer: "no".into() });
    }

    #[tokio::test]
    async fn health_check_bad_answer_on_unexpected_object() {
        let (_server, client) =
            client_for(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"}))).await;

        let outcome = HealthOutcome::from(client.is_alive().await);
        assert_eq!(outcome, HealthOutcome::BadAnswer { answer: String::new() });
    }

    #[tokio::test]
    async fn health_check_transport_error_on_503() {
        let (_server, client) = client_for(ResponseTemplate::new(503)).await;

        let outcome = HealthOutcome::from(client.is_alive().await);
        assert!(matches!(outcome, HealthOutcome::TransportError(_)));
    }

    #[tokio::test]
    async fn health_check_transport_error_on_non_json_body() {
        let (_server, client) =
            client_for(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
                .await;

        let outcome = HealthOutcome::from(client.is_alive().await);
        assert!(matches!(outcome, HealthOutcome::TransportError(_)));
    }

    #[tokio::test]
    async fn health_check_transport_error_when_unreachable() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let client = MainserverClient::new(&uri, &ClientOptions::default()).unwrap();
        let outcome = HealthOutcome::from(client.is_alive().await);
        assert!(matches!(outcome, HealthOutcome::TransportError(_)));
    }
}

// ---------------------------------------------------------------------------
// HttpLink tests
// ---------------------------------------------------------------------------

mod http_link {
    use super::*;

    #[tokio::test]
    async fn execute_posts_request_to_graphql_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_json(json!({
                "query": "query Me { me { id } }",
                "operationName": "Me"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"me": {"id": "u1"}}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let http = HttpClient::new(&server.uri(), &ClientOptions::default()).unwrap();
        let link = HttpLink::new(http, "graphql");
        let request = GraphQlRequest::new("query Me { me { id } }").with_operation_name("Me");
        let response = link.execute(&request).await.unwrap();
        assert!(response.is_ok());
        assert_eq!(response.data, Some(json!({"me": {"id": "u1"}})));
    }

    #[tokio::test]
    async fn execute_decodes_graphql_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "not authorised", "path": ["me"]}]
            })))
            .mount(&server)
            .await;

        let http = HttpClient::new(&server.uri(), &ClientOptions::default()).unwrap();
        let link = HttpLink::new(http, "graphql");
        let response = link.execute(&GraphQlRequest::new("{ me { id } }")).await.unwrap();
        assert!(!response.is_ok());
        assert_eq!(response.errors[0].message, "not authorised");
        assert_eq!(response.errors[0].path, Some(vec![json!("me")]));
    }
}

// ---------------------------------------------------------------------------
// SplitClient tests
// ---------------------------------------------------------------------------

mod split_client {
    use super::*;

    #[derive(Clone, Default)]
    struct CallLog(Arc<Mutex<Vec<(&'static str, String)>>>);

    impl CallLog {
        fn record(&self, target: &'static str, request: &GraphQlRequest) {
            self.0.lock().unwrap().push((target, request.query.clone()));
        }

        fn targets(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    struct RecordingStandard(CallLog);

    impl RequestLink for RecordingStandard {
        async fn execute(&self, request: &GraphQlRequest) -> Result<GraphQlResponse, ApiError> {
            self.0.record("standard", request);
            Ok(GraphQlResponse {
                data: Some(json!({"ok": true})),
                errors: vec![],
            })
        }
    }

    struct RecordingStreaming(CallLog);

    impl StreamingLink for RecordingStreaming {
        async fn subscribe(&self, request: GraphQlRequest) -> Result<ResponseStream, ApiError> {
            self.0.record("streaming", &request);
            let events = vec![
                Ok(GraphQlResponse {
                    data: Some(json!({"tick": 1})),
                    errors: vec![],
                }),
                Ok(GraphQlResponse {
                    data: Some(json!({"tick": 2})),
                    errors: vec![],
                }),
            ];
            Ok(futures::stream::iter(events).boxed())
        }
    }

    fn client() -> (CallLog, SplitClient<RecordingStandard, RecordingStreaming>) {
        let log = CallLog::default();
        let client = SplitClient::new(
            RecordingStandard(log.clone()),
            RecordingStreaming(log.clone()),
        );
        (log, client)
    }

    #[tokio::test]
    async fn queries_and_mutations_use_standard_link() {
        let (log, client) = client();

        let routed = client.execute(GraphQlRequest::new("{ me { id } }")).await.unwrap();
        assert!(matches!(routed, Routed::Response(_)));
        let routed = client
            .execute(GraphQlRequest::new("mutation { logout }"))
            .await
            .unwrap();
        assert!(matches!(routed, Routed::Response(_)));

        assert_eq!(log.targets(), vec!["standard", "standard"]);
    }

    #[tokio::test]
    async fn subscriptions_use_streaming_link() {
        let (log, client) = client();

        let routed = client
            .execute(GraphQlRequest::new("subscription { tick }"))
            .await
            .unwrap();
        let Routed::Stream(stream) = routed else {
            panic!("subscription was not routed to the streaming link");
        };
        let events: Vec<_> = stream.map(|e| e.unwrap().data.unwrap()).collect().await;
        assert_eq!(events, vec![json!({"tick": 1}), json!({"tick": 2})]);

        assert_eq!(log.targets(), vec!["streaming"]);
    }

    #[tokio::test]
    async fn operation_name_drives_routing_in_multi_operation_documents() {
        let (log, client) = client();
        let doc = "query Feed { feed { id } } subscription Live { feedChanged { id } }";

        client
            .execute(GraphQlRequest::new(doc).with_operation_name("Feed"))
            .await
            .unwrap();
        client
            .execute(GraphQlRequest::new(doc).with_operation_name("Live"))
            .await
            .unwrap();

        assert_eq!(log.targets(), vec!["standard", "streaming"]);
    }
}

// ---------------------------------------------------------------------------
// WsLink tests
// ---------------------------------------------------------------------------

mod ws_link {
    use super::*;
    use futures::SinkExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
    use url::Url;

    /// Server side of a single `graphql-transport-ws` connection.
    struct Peer {
        socket: WebSocketStream<TcpStream>,
    }

    impl Peer {
        async fn accept(listener: &TcpListener) -> Self {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = |_req: &Request, mut response: Response| {
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
                Ok::<_, ErrorResponse>(response)
            };
            let socket = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            Self { socket }
        }

        /// Accept the connection and complete the `connection_init` handshake.
        async fn handshake(listener: &TcpListener) -> Self {
            let mut peer = Self::accept(listener).await;
            let init = peer.recv().await.unwrap();
            assert!(matches!(init, ProtocolMessage::ConnectionInit { .. }));
            peer.send(ProtocolMessage::ConnectionAck { payload: None }).await;
            peer
        }

        async fn recv(&mut self) -> Option<ProtocolMessage> {
            while let Some(frame) = self.socket.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        return Some(serde_json::from_str(text.as_str()).unwrap());
                    }
                    Ok(Message::Close(_)) | Err(_) => return None,
                    Ok(_) => {}
                }
            }
            None
        }

        async fn send(&mut self, message: ProtocolMessage) {
            let text = serde_json::to_string(&message).unwrap();
            self.socket.send(Message::text(text)).await.unwrap();
        }
    }

    async fn listen() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = Url::parse(&format!("ws://{addr}/graphql")).unwrap();
        (listener, url)
    }

    fn tick(n: u64) -> GraphQlResponse {
        GraphQlResponse {
            data: Some(json!({"tick": n})),
            errors: vec![],
        }
    }

    #[tokio::test]
    async fn subscription_streams_events_until_complete() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut peer = Peer::handshake(&listener).await;
            let Some(ProtocolMessage::Subscribe { id, payload }) = peer.recv().await else {
                panic!("expected subscribe");
            };
            peer.send(ProtocolMessage::Next { id: id.clone(), payload: tick(1) }).await;
            peer.send(ProtocolMessage::Next { id: id.clone(), payload: tick(2) }).await;
            peer.send(ProtocolMessage::Complete { id }).await;
            // Wait for the client to close the socket.
            while peer.recv().await.is_some() {}
            payload
        });

        let link = WsLink::new(url);
        let stream = link
            .subscribe(GraphQlRequest::new("subscription { tick }"))
            .await
            .unwrap();
        let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;
        assert_eq!(events, vec![tick(1), tick(2)]);

        drop(link);
        let payload = server.await.unwrap();
        assert_eq!(payload.query, "subscription { tick }");
    }

    #[tokio::test]
    async fn dropping_stream_sends_complete() {
        let (listener, url) = listen().await;
        let (seen_tx, seen_rx) = oneshot::channel();
        let server = tokio::spawn(async move {
            let mut peer = Peer::handshake(&listener).await;
            let Some(ProtocolMessage::Subscribe { id, .. }) = peer.recv().await else {
                panic!("expected subscribe");
            };
            peer.send(ProtocolMessage::Next { id, payload: tick(1) }).await;
            let _ = seen_tx.send(peer.recv().await);
            while peer.recv().await.is_some() {}
        });

        let link = WsLink::new(url);
        let mut stream = link
            .subscribe(GraphQlRequest::new("subscription { tick }"))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), tick(1));
        drop(stream);

        let seen = tokio::time::timeout(Duration::from_secs(5), seen_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, Some(ProtocolMessage::Complete { id: "1".into() }));

        drop(link);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_errors_arrive_as_graphql_errors() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut peer = Peer::handshake(&listener).await;
            let Some(ProtocolMessage::Subscribe { id, .. }) = peer.recv().await else {
                panic!("expected subscribe");
            };
            let error = serde_json::from_value(json!({"message": "unknown field"})).unwrap();
            peer.send(ProtocolMessage::Error { id, payload: vec![error] }).await;
            while peer.recv().await.is_some() {}
        });

        let link = WsLink::new(url);
        let stream = link
            .subscribe(GraphQlRequest::new("subscription { nope }"))
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        let response = events.into_iter().next().unwrap().unwrap();
        assert_eq!(response.errors[0].message, "unknown field");

        drop(link);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn subscriptions_share_one_connection() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            // Only one connection is ever accepted.
            let mut peer = Peer::handshake(&listener).await;
            let mut ids = Vec::new();
            for _ in 0..2 {
                let Some(ProtocolMessage::Subscribe { id, .. }) = peer.recv().await else {
                    panic!("expected subscribe");
                };
                ids.push(id);
            }
            for id in &ids {
                peer.send(ProtocolMessage::Complete { id: id.clone() }).await;
            }
            while peer.recv().await.is_some() {}
            ids
        });

        let link = WsLink::new(url);
        let first = link
            .subscribe(GraphQlRequest::new("subscription { a }"))
            .await
            .unwrap();
        let second = link
            .subscribe(GraphQlRequest::new("subscription { b }"))
            .await
            .unwrap();
        assert_eq!(first.collect::<Vec<_>>().await.len(), 0);
        assert_eq!(second.collect::<Vec<_>>().await.len(), 0);

        drop(link);
        assert_eq!(server.await.unwrap(), vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn reconnects_after_server_close() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut first = Peer::handshake(&listener).await;
            let Some(ProtocolMessage::Subscribe { id, .. }) = first.recv().await else {
                panic!("expected subscribe");
            };
            first.send(ProtocolMessage::Next { id: id.clone(), payload: tick(1) }).await;
            first.socket.close(None).await.unwrap();
            drop(first);

            let mut second = Peer::handshake(&listener).await;
            let Some(ProtocolMessage::Subscribe { id: next_id, .. }) = second.recv().await else {
                panic!("expected subscribe on the new connection");
            };
            second.send(ProtocolMessage::Next { id: next_id.clone(), payload: tick(2) }).await;
            second.send(ProtocolMessage::Complete { id: next_id.clone() }).await;
            while second.recv().await.is_some() {}
            (id, next_id)
        });

        let link = WsLink::new(url);
        let first: Vec<_> = link
            .subscribe(GraphQlRequest::new("subscription { tick }"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(first[0].as_ref().unwrap(), &tick(1));
        assert!(first[1..]
            .iter()
            .all(|e| matches!(e, Err(ApiError::ConnectionClosed))));

        let second: Vec<_> = link
            .subscribe(GraphQlRequest::new("subscription { tick }"))
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(second, vec![tick(2)]);

        drop(link);
        let (first_id, second_id) = server.await.unwrap();
        assert_eq!(first_id, "1");
        assert_eq!(second_id, "2");
    }

    #[tokio::test]
    async fn subscribe_fails_when_server_unreachable() {
        let (listener, url) = listen().await;
        drop(listener);

        let link = WsLink::new(url);
        let result = link.subscribe(GraphQlRequest::new("subscription { tick }")).await;
        assert!(matches!(result, Err(ApiError::WebSocket(_))));
    }
}
