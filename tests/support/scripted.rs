//! In-process transport that replays a fixed script, for failure injection.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use fetcher_core::download::{
    FileTimestamps, Transport, TransportError, TransportRequest, TransportResponse,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Step {
    Reply {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
    },
    Fail(TransportError),
    /// 200 whose body yields `partial` and then breaks off.
    Interrupted {
        content_type: &'static str,
        partial: Vec<u8>,
    },
}

impl Step {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::Reply {
            status: 200,
            headers: vec![("content-type", content_type.to_string())],
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::Reply {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::Reply {
            status,
            headers: vec![("location", location.to_string())],
            body: Vec::new(),
        }
    }
}

fn play(step: Step, url: Url) -> Result<TransportResponse, TransportError> {
    match step {
        Step::Fail(error) => Err(error),
        Step::Interrupted {
            content_type,
            partial,
        } => {
            let mut headers = HeaderMap::new();
            headers.insert("content-type", HeaderValue::from_static(content_type));
            let chunks = vec![
                Ok(partial),
                Err(TransportError::Body("connection reset by peer".into())),
            ];
            Ok(TransportResponse {
                status: StatusCode::OK,
                headers,
                final_url: url,
                body: stream::iter(chunks).boxed(),
            })
        }
        Step::Reply {
            status,
            headers,
            body,
        } => {
            let mut map = HeaderMap::new();
            for (name, value) in headers {
                map.append(
                    HeaderName::from_static(name),
                    HeaderValue::from_str(&value).unwrap(),
                );
            }
            Ok(TransportResponse::from_bytes(
                StatusCode::from_u16(status).unwrap(),
                map,
                url,
                body,
            ))
        }
    }
}

/// Request as seen by the transport.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

/// Replays `steps` in order; fails with `Other` once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.seen().into_iter().map(|seen| seen.url).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.seen.lock().unwrap().push(Seen {
            method: request.method.clone(),
            url: request.url.to_string(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        });

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None => Err(TransportError::Other("script exhausted".into())),
            Some(step) => play(step, request.url),
        }
    }
}

/// File timestamp capability that always reports a full disk.
#[derive(Debug, Default)]
pub struct DiskFullTimestamps;

impl FileTimestamps for DiskFullTimestamps {
    fn set_timestamps(
        &self,
        _path: &Path,
        _created: Option<SystemTime>,
        _accessed: Option<SystemTime>,
        _modified: Option<SystemTime>,
    ) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::StorageFull, "no space left on device"))
    }
}

/// Per-URL scripts with an artificial delay; tracks peak concurrency.
#[derive(Debug, Default)]
pub struct RoutedTransport {
    routes: Mutex<HashMap<String, VecDeque<Step>>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl RoutedTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn route(self, url: &str, steps: Vec<Step>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into());
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RoutedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let step = self
            .routes
            .lock()
            .unwrap()
            .get_mut(request.url.as_str())
            .and_then(VecDeque::pop_front);
        match step {
            None => Err(TransportError::Other("no route".into())),
            Some(step) => play(step, request.url),
        }
    }
}

/// Panics for one URL and forwards every other request to `inner`.
#[derive(Debug)]
pub struct PanicOn<T> {
    pub url: String,
    pub inner: T,
}

#[async_trait]
impl<T: Transport> Transport for PanicOn<T> {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        if request.url.as_str() == self.url {
            panic!("transport blew up on {}", self.url);
        }
        self.inner.send(request).await
    }
}
