use crate::config::{CategoryEndpoints, Config, Downstreams, Listener, Timeouts};
use crate::downstream::Downstream;
use crate::errors::TransportError;
use crate::protocol::{Envelope, ReferenceNumber};
use async_trait::async_trait;
use http::Method;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use url::Url;

pub const IMPORT_REFERENCE_URL: &str = "http://core-import.test/import/import_ref_n/user_id";
pub const IMPORT_CONTAINER_URL: &str = "http://core-import-cont.test/import_cont/container_num";
pub const EXPORT_REFERENCE_URL: &str = "http://core-export.test/export/export_ref_n/user_id";
pub const EXPORT_CONTAINER_URL: &str = "http://core-export-cont.test/export_cont/container_num";

/// Config pointing at the fake downstream URLs above.
pub fn test_config() -> Config {
    let endpoints = |reference_url: &str, container_url: &str| CategoryEndpoints {
        reference_url: Url::parse(reference_url).unwrap(),
        container_url: Url::parse(container_url).unwrap(),
        reference_key: "reference_number".to_string(),
    };

    Config {
        listener: Listener {
            host: "127.0.0.1".to_string(),
            port: 5010,
        },
        admin_listener: Listener {
            host: "127.0.0.1".to_string(),
            port: 5011,
        },
        timeouts: Timeouts {
            http_timeout_secs: 5,
            fanout_timeout_secs: 5,
        },
        fanout_concurrency: 8,
        user_key: "user_id".to_string(),
        downstreams: Downstreams {
            import: endpoints(IMPORT_REFERENCE_URL, IMPORT_CONTAINER_URL),
            export: endpoints(EXPORT_REFERENCE_URL, EXPORT_CONTAINER_URL),
        },
    }
}

/// Canned answer of a [`FakeDownstream`].
pub struct FakeReply {
    pub delay: Duration,
    pub result: Result<Envelope, TransportError>,
}

impl FakeReply {
    pub fn envelope(value: JsonValue) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(Envelope::from_json(value)),
        }
    }

    pub fn output(records: JsonValue) -> Self {
        Self::envelope(json!({"code": 200, "data": {"output": records}}))
    }

    pub fn containers(numbers: &[&str]) -> Self {
        Self::envelope(json!({"code": 200, "data": {"container_nums": numbers}}))
    }

    pub fn timeout(url: &Url) -> Self {
        Self::error(TransportError::Timeout {
            url: url.to_string(),
        })
    }

    pub fn error(error: TransportError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Responder = dyn Fn(&Url, &JsonValue) -> FakeReply + Send + Sync;

/// In-memory [`Downstream`] that records every call.
pub struct FakeDownstream {
    responder: Box<Responder>,
    calls: Mutex<Vec<(Url, JsonValue)>>,
}

impl FakeDownstream {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&Url, &JsonValue) -> FakeReply + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(Url, JsonValue)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(called, _)| called.as_str() == url)
            .count()
    }
}

#[async_trait]
impl Downstream for FakeDownstream {
    async fn invoke(
        &self,
        method: Method,
        url: &Url,
        body: &JsonValue,
    ) -> Result<Envelope, TransportError> {
        assert_eq!(method, Method::POST);
        self.calls.lock().unwrap().push((url.clone(), body.clone()));

        let reply = (self.responder)(url, body);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result
    }
}

/// Reads the reference number out of a container lookup body.
pub fn requested_reference(body: &JsonValue) -> ReferenceNumber {
    body["reference_number"].as_i64().unwrap()
}

/// Answer of a mock HTTP downstream started with [`start_mock_server`].
#[derive(Clone)]
pub struct MockReply {
    pub status: StatusCode,
    pub body: Bytes,
    pub delay: Duration,
}

impl MockReply {
    pub fn json(value: JsonValue) -> Self {
        Self {
            status: StatusCode::OK,
            body: Bytes::from(serde_json::to_vec(&value).unwrap()),
            delay: Duration::ZERO,
        }
    }

    pub fn raw(body: &'static str) -> Self {
        Self {
            status: StatusCode::OK,
            body: Bytes::from_static(body.as_bytes()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Start a mock HTTP downstream. `handler` receives the request path and the
/// decoded JSON body (`null` if the body is not JSON).
pub async fn start_mock_server<F>(handler: F) -> u16
where
    F: Fn(&str, JsonValue) -> MockReply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let handler = handler.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let handler = handler.clone();
                    async move {
                        let path = req.uri().path().to_string();
                        let bytes = req.into_body().collect().await.unwrap().to_bytes();
                        let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);

                        let reply = handler(&path, body);
                        if !reply.delay.is_zero() {
                            tokio::time::sleep(reply.delay).await;
                        }

                        let mut response = Response::new(Full::new(reply.body));
                        *response.status_mut() = reply.status;
                        Ok::<_, Infallible>(response)
                    }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    port
}

/// Tracing layer that keeps the fields of every event, for asserting on logs.
#[derive(Clone, Default)]
pub struct CapturedEvents(Arc<Mutex<Vec<HashMap<String, String>>>>);

impl CapturedEvents {
    /// Captures events on the current thread until the guard is dropped.
    pub fn set_default(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    /// First event whose message is `message`.
    pub fn find(&self, message: &str) -> Option<HashMap<String, String>> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|fields| fields.get("message").map(String::as_str) == Some(message))
            .cloned()
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = FieldMap::default();
        event.record(&mut fields);
        self.0.lock().unwrap().push(fields.0);
    }
}

#[derive(Default)]
struct FieldMap(HashMap<String, String>);

impl Visit for FieldMap {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}
