//! Bounded-concurrency request runner.
//!
//! A [`DownloadTransport`] fetches one URL at a time. [`run_requests`] drives
//! many requests through it with at most
//! [`max_concurrent`](DownloadTransport::max_concurrent) in flight, and hands
//! every [`DownloadOutcome`] to a single [`OutcomeHandler`]. Handlers run one
//! after another on the calling task, so they may mutate shared state
//! (catalog writes, report accumulation) without locking.
//!
//! Each fetch runs on its own spawned task, so bodies keep streaming while
//! the handler is busy verifying or committing an earlier outcome.
//!
//! Requests are pulled lazily from the iterator. Once the cancellation token
//! fires no further request is issued; requests already issued run to
//! completion and their outcomes are still handled.

mod http;

pub use http::HttpTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where a fetched body goes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    /// Keep the body in memory
    Memory,
    /// Stream the body to this file, replacing it if present
    File(PathBuf),
}

/// A fetched body
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// In-memory body
    Bytes(Vec<u8>),
    /// Body written to disk
    File {
        /// Path the body was written to
        path: PathBuf,
        /// Number of bytes written
        size: u64,
    },
}

/// One URL to fetch, with caller context carried through to the outcome
#[derive(Clone, Debug)]
pub struct DownloadRequest<T> {
    /// Absolute URL
    pub url: String,
    /// Where the body should go
    pub destination: Destination,
    /// Opaque caller context
    pub tag: T,
}

/// Result of one [`DownloadRequest`]
#[derive(Debug)]
pub struct DownloadOutcome<T> {
    /// URL that was requested
    pub url: String,
    /// Where the body was meant to go
    pub destination: Destination,
    /// Context from the request
    pub tag: T,
    /// Fetched body or the reason it could not be fetched
    pub result: Result<Payload, TransportError>,
}

/// Fetches single URLs
#[async_trait]
pub trait DownloadTransport: Send + Sync {
    /// Fetch `url` into `destination`
    async fn fetch(&self, url: &str, destination: &Destination)
    -> Result<Payload, TransportError>;

    /// Upper bound on simultaneous fetches
    fn max_concurrent(&self) -> usize;
}

/// Receives outcomes one at a time
#[async_trait]
pub trait OutcomeHandler<T: Send>: Send {
    /// Handle one outcome. Never called concurrently with itself.
    async fn handle(&mut self, outcome: DownloadOutcome<T>);
}

/// Fetch every request through `transport`, handing outcomes to `handler`
///
/// Returns the number of outcomes handled.
pub async fn run_requests<T, I, H>(
    transport: &Arc<dyn DownloadTransport>,
    requests: I,
    cancel: &CancellationToken,
    handler: &mut H,
) -> usize
where
    T: Send,
    I: IntoIterator<Item = DownloadRequest<T>>,
    I::IntoIter: Send,
    H: OutcomeHandler<T> + ?Sized,
{
    let limit = transport.max_concurrent().max(1);
    let mut pending = requests.into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut handled = 0;

    loop {
        while in_flight.len() < limit && !cancel.is_cancelled() {
            let Some(request) = pending.next() else {
                break;
            };
            in_flight.push(spawn_fetch(transport.clone(), request));
        }

        let Some(outcome) = in_flight.next().await else {
            break;
        };
        handler.handle(outcome).await;
        handled += 1;
    }

    if cancel.is_cancelled() {
        debug!(handled, "request issuing stopped by cancellation");
    }
    handled
}

/// Run one fetch on its own task and pair the result with its request
async fn spawn_fetch<T>(
    transport: Arc<dyn DownloadTransport>,
    request: DownloadRequest<T>,
) -> DownloadOutcome<T> {
    let DownloadRequest {
        url,
        destination,
        tag,
    } = request;
    debug!(url = %url, "fetching");

    let task = {
        let url = url.clone();
        let destination = destination.clone();
        tokio::spawn(async move { transport.fetch(&url, &destination).await })
    };
    let result = task.await.unwrap_or_else(|e| {
        Err(TransportError::Request {
            url: url.clone(),
            reason: format!("download task failed: {e}"),
        })
    });

    DownloadOutcome {
        url,
        destination,
        tag,
        result,
    }
}

/// In-memory transport for tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves canned bodies or status codes by URL; unknown URLs are 404
    #[derive(Default)]
    pub(crate) struct MapTransport {
        responses: HashMap<String, Result<Vec<u8>, u16>>,
        max_concurrent: usize,
        delay: Duration,
        pub(crate) in_flight: AtomicUsize,
        pub(crate) peak_in_flight: AtomicUsize,
        pub(crate) fetched: Mutex<Vec<String>>,
    }

    impl MapTransport {
        pub(crate) fn new(max_concurrent: usize) -> Self {
            Self {
                max_concurrent,
                ..Default::default()
            }
        }

        pub(crate) fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
            self.responses.insert(url.to_string(), Ok(body.into()));
            self
        }

        pub(crate) fn with_status(mut self, url: &str, status: u16) -> Self {
            self.responses.insert(url.to_string(), Err(status));
            self
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn fetch_count(&self) -> usize {
            self.fetched.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DownloadTransport for MapTransport {
        async fn fetch(
            &self,
            url: &str,
            destination: &Destination,
        ) -> Result<Payload, TransportError> {
            self.fetched.lock().unwrap().push(url.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let body = match self.responses.get(url) {
                Some(Ok(body)) => body.clone(),
                Some(Err(status)) => {
                    return Err(TransportError::Status {
                        url: url.to_string(),
                        status: *status,
                    });
                }
                None => {
                    return Err(TransportError::Status {
                        url: url.to_string(),
                        status: 404,
                    });
                }
            };

            match destination {
                Destination::Memory => Ok(Payload::Bytes(body)),
                Destination::File(path) => {
                    tokio::fs::write(path, &body)
                        .await
                        .map_err(|source| TransportError::Write {
                            path: path.clone(),
                            source,
                        })?;
                    Ok(Payload::File {
                        path: path.clone(),
                        size: body.len() as u64,
                    })
                }
            }
        }

        fn max_concurrent(&self) -> usize {
            self.max_concurrent
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::testing::MapTransport;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect {
        seen: Vec<(usize, Result<Payload, TransportError>)>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    #[async_trait]
    impl OutcomeHandler<usize> for Collect {
        async fn handle(&mut self, outcome: DownloadOutcome<usize>) {
            self.seen.push((outcome.tag, outcome.result));
            if let Some((after, token)) = &self.cancel_after
                && self.seen.len() >= *after
            {
                token.cancel();
            }
        }
    }

    fn requests(n: usize) -> Vec<DownloadRequest<usize>> {
        (0..n)
            .map(|i| DownloadRequest {
                url: format!("https://files.example/{i}"),
                destination: Destination::Memory,
                tag: i,
            })
            .collect()
    }

    fn transport_for(n: usize, max_concurrent: usize) -> MapTransport {
        (0..n).fold(MapTransport::new(max_concurrent), |t, i| {
            t.with_body(&format!("https://files.example/{i}"), format!("body {i}"))
        })
    }

    fn shared(transport: MapTransport) -> (Arc<MapTransport>, Arc<dyn DownloadTransport>) {
        let concrete = Arc::new(transport);
        let erased: Arc<dyn DownloadTransport> = concrete.clone();
        (concrete, erased)
    }

    #[tokio::test]
    async fn every_request_yields_one_outcome() {
        let (_, transport) =
            shared(transport_for(8, 3).with_status("https://files.example/5", 500));
        let mut handler = Collect::default();

        let handled =
            run_requests(&transport, requests(8), &CancellationToken::new(), &mut handler).await;

        assert_eq!(handled, 8);
        let mut tags: Vec<_> = handler.seen.iter().map(|(t, _)| *t).collect();
        tags.sort();
        assert_eq!(tags, (0..8).collect::<Vec<_>>());

        let (_, failed) = handler.seen.iter().find(|(t, _)| *t == 5).unwrap();
        assert!(matches!(failed, Err(TransportError::Status { status: 500, .. })));
        let (_, ok) = handler.seen.iter().find(|(t, _)| *t == 2).unwrap();
        assert_eq!(ok.as_ref().unwrap(), &Payload::Bytes(b"body 2".to_vec()));
    }

    #[tokio::test]
    async fn in_flight_fetches_never_exceed_limit() {
        let (concrete, transport) =
            shared(transport_for(12, 3).with_delay(Duration::from_millis(20)));
        let mut handler = Collect::default();

        run_requests(&transport, requests(12), &CancellationToken::new(), &mut handler).await;

        assert_eq!(handler.seen.len(), 12);
        let peak = concrete.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in flight was {peak}");
        assert!(peak >= 2, "requests should overlap, peak was {peak}");
    }

    #[tokio::test]
    async fn cancelled_token_issues_nothing() {
        let (concrete, transport) = shared(transport_for(4, 2));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut handler = Collect::default();

        let handled = run_requests(&transport, requests(4), &cancel, &mut handler).await;

        assert_eq!(handled, 0);
        assert_eq!(concrete.fetch_count(), 0);
    }

    #[tokio::test]
    async fn cancelling_mid_run_stops_new_requests() {
        let (concrete, transport) = shared(transport_for(10, 1));
        let cancel = CancellationToken::new();
        let mut handler = Collect {
            cancel_after: Some((1, cancel.clone())),
            ..Default::default()
        };

        run_requests(&transport, requests(10), &cancel, &mut handler).await;

        assert_eq!(concrete.fetch_count(), 1);
        assert_eq!(handler.seen.len(), 1);
    }

    #[tokio::test]
    async fn issued_requests_complete_after_cancel() {
        let (concrete, transport) =
            shared(transport_for(4, 2).with_delay(Duration::from_millis(200)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let mut handler = Collect::default();

        let handled = run_requests(&transport, requests(4), &cancel, &mut handler).await;

        assert_eq!(concrete.fetch_count(), 2);
        assert_eq!(handled, 2);
        assert!(handler.seen.iter().all(|(_, result)| result.is_ok()));
    }

    /// Handler that stalls on its first outcome, then records what is still fetching
    struct SlowFirst {
        transport: Arc<MapTransport>,
        stall: Duration,
        seen: Vec<usize>,
        still_fetching_after_stall: Option<usize>,
    }

    #[async_trait]
    impl OutcomeHandler<usize> for SlowFirst {
        async fn handle(&mut self, outcome: DownloadOutcome<usize>) {
            if self.seen.is_empty() {
                tokio::time::sleep(self.stall).await;
                self.still_fetching_after_stall =
                    Some(self.transport.in_flight.load(Ordering::SeqCst));
            }
            self.seen.push(outcome.tag);
        }
    }

    #[tokio::test]
    async fn fetches_progress_while_handler_is_busy() {
        let (concrete, transport) =
            shared(transport_for(4, 4).with_delay(Duration::from_millis(50)));
        let mut handler = SlowFirst {
            transport: concrete,
            stall: Duration::from_millis(300),
            seen: Vec::new(),
            still_fetching_after_stall: None,
        };

        run_requests(&transport, requests(4), &CancellationToken::new(), &mut handler).await;

        assert_eq!(handler.seen.len(), 4);
        assert_eq!(handler.still_fetching_after_stall, Some(0));
    }

    #[tokio::test]
    async fn requests_are_pulled_lazily() {
        let (_, transport) = shared(transport_for(3, 1));
        let produced = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = produced.clone();
        let lazy = (0..1000usize).map(move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            DownloadRequest {
                url: format!("https://files.example/{i}"),
                destination: Destination::Memory,
                tag: i,
            }
        });
        let cancel = CancellationToken::new();
        let mut handler = Collect {
            cancel_after: Some((3, cancel.clone())),
            ..Default::default()
        };

        run_requests(&transport, lazy, &cancel, &mut handler).await;

        assert_eq!(produced.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn file_destination_is_written() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("0.bin");
        let (_, transport) = shared(transport_for(1, 1));
        let mut handler = Collect::default();
        let request = DownloadRequest {
            url: "https://files.example/0".to_string(),
            destination: Destination::File(path.clone()),
            tag: 0,
        };

        run_requests(&transport, vec![request], &CancellationToken::new(), &mut handler).await;

        assert_eq!(
            handler.seen[0].1.as_ref().unwrap(),
            &Payload::File {
                path: path.clone(),
                size: 6
            }
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"body 0");
    }
}
