//! Request/response multiplexing over one worker's stdio.
//!
//! Many calls may be outstanding on the same worker at once. Each gets its own
//! id, its own completion slot and its own deadline; responses are matched by
//! id alone, so the order in which the worker answers does not matter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::internal::transport::{ReadHalf, WriteHalf};
use crate::types::{BrokerError, Result, RpcReply, RpcRequest};

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Outstanding calls of one worker.
///
/// A call is completed by removing its sender from the map, so whichever of
/// response, timeout or teardown gets there first wins and the others find
/// nothing to complete.
struct PendingTable {
    inner: StdMutex<PendingInner>,
}

struct PendingInner {
    calls: HashMap<u64, oneshot::Sender<RpcReply>>,
    closed: bool,
}

impl PendingTable {
    fn new() -> Self {
        Self {
            inner: StdMutex::new(PendingInner {
                calls: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingInner> {
        // Recover from poison.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a call. Returns `None` once the table is closed.
    fn register(&self, id: u64) -> Option<oneshot::Receiver<RpcReply>> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        inner.calls.insert(id, tx);
        Some(rx)
    }

    /// Deliver a reply. Replies for unknown ids (timed out, never sent) are dropped.
    fn complete(&self, id: u64, reply: RpcReply) -> bool {
        let sender = self.lock().calls.remove(&id);
        match sender {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: u64) -> bool {
        self.lock().calls.remove(&id).is_some()
    }

    /// Reject everything outstanding and refuse new registrations.
    /// Dropping a sender is what the waiting caller sees as a crash.
    fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.calls.drain().collect()
        };
        drained.len()
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn len(&self) -> usize {
        self.lock().calls.len()
    }
}

/// Removes the pending entry if the caller stops waiting early.
struct PendingSlot<'a> {
    table: &'a PendingTable,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

/// JSON-RPC multiplexer bound to one worker's stdin/stdout.
pub struct Multiplexer {
    server: String,
    write_half: Mutex<WriteHalf<BoxWriter>>,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl Multiplexer {
    /// Bind a multiplexer to a worker's pipes and start routing responses.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<R, W>(
        server: impl Into<String>,
        read_half: ReadHalf<R>,
        write_half: WriteHalf<W>,
        timeout: Duration,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let server = server.into();
        let pending = Arc::new(PendingTable::new());

        let mut responses = read_half.read_responses(server.clone());
        let router_pending = Arc::clone(&pending);
        let router_server = server.clone();
        tokio::spawn(async move {
            while let Some((id, reply)) = responses.recv().await {
                if !router_pending.complete(id, reply) {
                    debug!(server = %router_server, id, "Dropping response with no pending call");
                }
            }
            let rejected = router_pending.close();
            if rejected > 0 {
                warn!(server = %router_server, rejected, "Worker output closed with calls outstanding");
            }
        });

        let writer: BoxWriter = Box::new(write_half.into_inner());

        Arc::new(Self {
            server,
            write_half: Mutex::new(WriteHalf::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            timeout,
        })
    }

    /// Send a request and wait for its result under the default deadline.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.request(method, params, self.timeout).await?.into_result()
    }

    /// Send a request and return the decoded reply without interpreting it.
    ///
    /// The deadline covers waiting for the writer and writing the request as
    /// well as waiting for the response.
    pub(crate) async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<RpcReply> {
        let deadline = Instant::now() + timeout;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = RpcRequest::new(id, method, params).to_line()?;

        let mut rx = self
            .pending
            .register(id)
            .ok_or_else(|| BrokerError::crashed(&self.server))?;
        let _slot = PendingSlot {
            table: &self.pending,
            id,
        };

        {
            let Ok(mut write_half) = tokio::time::timeout_at(deadline, self.write_half.lock()).await
            else {
                warn!(server = %self.server, id, method, "Timed out waiting for the writer");
                return Err(timed_out(method, timeout));
            };
            if self.is_closed() {
                return Err(BrokerError::crashed(&self.server));
            }

            match tokio::time::timeout_at(deadline, write_half.write(&line)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(server = %self.server, id, method, "Failed to write request: {}", e);
                    return Err(BrokerError::crashed(&self.server));
                }
                Err(_) => {
                    // A partial line may be in the pipe; framing is lost.
                    warn!(server = %self.server, id, method, "Worker stopped reading stdin, closing");
                    drop(write_half);
                    self.close();
                    return Err(timed_out(method, timeout));
                }
            }
        }
        debug!(server = %self.server, id, method, "Sent request");

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BrokerError::crashed(&self.server)),
            Err(_) => {
                if self.pending.remove(id) {
                    warn!(server = %self.server, id, method, "Request timed out after {:?}", timeout);
                    Err(timed_out(method, timeout))
                } else {
                    // The reply or the teardown won the race against the timer.
                    rx.try_recv().map_err(|_| BrokerError::crashed(&self.server))
                }
            }
        }
    }

    /// Reject all outstanding calls with `WorkerCrashed` and refuse new ones.
    /// Idempotent.
    pub fn close(&self) {
        let rejected = self.pending.close();
        if rejected > 0 {
            debug!(server = %self.server, rejected, "Rejected outstanding calls");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    /// Number of calls currently waiting for a response.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

fn timed_out(method: &str, timeout: Duration) -> BrokerError {
    BrokerError::RequestTimeout {
        method: method.to_string(),
        timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// Multiplexer wired to in-memory pipes. Returns the worker's view:
    /// a line reader over what the multiplexer sends, and a writer for replies.
    fn wired(
        timeout: Duration,
    ) -> (
        Arc<Multiplexer>,
        tokio::io::Lines<BufReader<DuplexStream>>,
        DuplexStream,
    ) {
        let (broker_in, worker_out) = tokio::io::duplex(4096);
        let (worker_in, broker_out) = tokio::io::duplex(4096);
        let mux = Multiplexer::new(
            "test-mcp",
            ReadHalf::new(broker_in),
            WriteHalf::new(broker_out),
            timeout,
        );
        (mux, BufReader::new(worker_in).lines(), worker_out)
    }

    async fn next_request(lines: &mut tokio::io::Lines<BufReader<DuplexStream>>) -> Value {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn reply(writer: &mut DuplexStream, id: u64, result: Value) {
        let line = json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string() + "\n";
        writer.write_all(line.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_from_one() {
        let (mux, mut requests, mut worker_out) = wired(Duration::from_secs(5));

        let worker = tokio::spawn(async move {
            for expected in 1..=3u64 {
                let req = next_request(&mut requests).await;
                assert_eq!(req["jsonrpc"], "2.0");
                assert_eq!(req["id"], expected);
                reply(&mut worker_out, expected, json!(expected)).await;
            }
        });

        for expected in 1..=3u64 {
            let value = mux.send("ping", json!({})).await.unwrap();
            assert_eq!(value, json!(expected));
        }
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (mux, mut requests, mut worker_out) = wired(Duration::from_secs(5));

        let worker = tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..3 {
                let req = next_request(&mut requests).await;
                ids.push((req["id"].as_u64().unwrap(), req["params"]["tag"].clone()));
            }
            ids.sort_by_key(|(id, _)| *id);
            assert_eq!(ids.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2, 3]);

            // Answer 3, 2, 1 with each request's own tag.
            for (id, tag) in ids.into_iter().rev() {
                reply(&mut worker_out, id, json!({"tag": tag})).await;
            }
        });

        let (a, b, c) = tokio::join!(
            mux.send("tools/call", json!({"tag": "a"})),
            mux.send("tools/call", json!({"tag": "b"})),
            mux.send("tools/call", json!({"tag": "c"})),
        );

        assert_eq!(a.unwrap(), json!({"tag": "a"}));
        assert_eq!(b.unwrap(), json!({"tag": "b"}));
        assert_eq!(c.unwrap(), json!({"tag": "c"}));
        assert_eq!(mux.outstanding(), 0);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_isolated_from_other_calls() {
        let (mux, mut requests, mut worker_out) = wired(Duration::from_millis(50));

        let worker = tokio::spawn(async move {
            let first = next_request(&mut requests).await;
            let second = next_request(&mut requests).await;
            // Only the fast call is ever answered.
            let fast = if first["params"]["name"] == "fast" { first } else { second };
            reply(&mut worker_out, fast["id"].as_u64().unwrap(), json!("fast")).await;
            // Keep the pipes open past the deadline.
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(worker_out);
        });

        let started = Instant::now();
        let (fast, slow) = tokio::join!(
            mux.send("tools/call", json!({"name": "fast"})),
            mux.send("tools/call", json!({"name": "slow"})),
        );
        let elapsed = started.elapsed();

        assert_eq!(fast.unwrap(), json!("fast"));
        match slow {
            Err(BrokerError::RequestTimeout { method, timeout }) => {
                assert_eq!(method, "tools/call");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("Expected RequestTimeout, got {:?}", other),
        }
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1000));
        assert!(!mux.is_closed());
        assert_eq!(mux.outstanding(), 0);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_late_response_after_timeout_is_dropped() {
        let (mux, mut requests, mut worker_out) = wired(Duration::from_millis(30));

        let result = mux.send("tools/call", json!({})).await;
        assert!(matches!(result, Err(BrokerError::RequestTimeout { .. })));

        let req = next_request(&mut requests).await;
        reply(&mut worker_out, req["id"].as_u64().unwrap(), json!("late")).await;

        // Next call still works and gets its own answer.
        let worker = tokio::spawn(async move {
            let req = next_request(&mut requests).await;
            reply(&mut worker_out, req["id"].as_u64().unwrap(), json!("fresh")).await;
            (requests, worker_out)
        });
        let value = mux
            .request("tools/call", json!({}), Duration::from_secs(5))
            .await
            .and_then(RpcReply::into_result)
            .unwrap();
        assert_eq!(value, json!("fresh"));
        let _pipes = worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_rejects_outstanding_calls() {
        let (mux, mut requests, worker_out) = wired(Duration::from_secs(5));

        let worker = tokio::spawn(async move {
            next_request(&mut requests).await;
            next_request(&mut requests).await;
            drop(worker_out);
            requests
        });

        let (a, b) = tokio::join!(
            mux.send("tools/call", json!({})),
            mux.send("tools/call", json!({})),
        );
        assert!(matches!(a, Err(BrokerError::WorkerCrashed { ref name }) if name == "test-mcp"));
        assert!(matches!(b, Err(BrokerError::WorkerCrashed { .. })));
        assert!(mux.is_closed());

        // Closed multiplexers fail fast.
        let c = mux.send("tools/call", json!({})).await;
        assert!(matches!(c, Err(BrokerError::WorkerCrashed { .. })));
        let _requests = worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mux, mut requests, _worker_out) = wired(Duration::from_secs(5));

        let pending = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move { mux.send("tools/call", json!({})).await })
        };
        next_request(&mut requests).await;
        while mux.outstanding() == 0 {
            tokio::task::yield_now().await;
        }

        mux.close();
        mux.close();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(BrokerError::WorkerCrashed { .. })));
        assert_eq!(mux.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_error_payload() {
        let (mux, mut requests, mut worker_out) = wired(Duration::from_secs(5));

        let worker = tokio::spawn(async move {
            let req = next_request(&mut requests).await;
            let line = json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": {"code": -32601, "message": "Method not found"}
            })
            .to_string()
                + "\n";
            worker_out.write_all(line.as_bytes()).await.unwrap();
            (requests, worker_out)
        });

        let err = mux.send("bogus", json!({})).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rpc { code: -32601, .. }));
        let _pipes = worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8_noise_keeps_channel_open() {
        let (mux, mut requests, mut worker_out) = wired(Duration::from_secs(5));

        let worker = tokio::spawn(async move {
            let req = next_request(&mut requests).await;
            worker_out.write_all(b"log \xff\xfe binary noise\n").await.unwrap();
            reply(&mut worker_out, req["id"].as_u64().unwrap(), json!("ok")).await;
            (requests, worker_out)
        });

        let value = mux.send("tools/call", json!({})).await.unwrap();
        assert_eq!(value, json!("ok"));
        assert!(!mux.is_closed());
        let _pipes = worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_stdin_times_out() {
        // The worker never reads, so a large request fills the pipe.
        let (broker_in, _worker_out) = tokio::io::duplex(64);
        let (_worker_in, broker_out) = tokio::io::duplex(64);
        let mux = Multiplexer::new(
            "stuck-mcp",
            ReadHalf::new(broker_in),
            WriteHalf::new(broker_out),
            Duration::from_millis(50),
        );
        let big = json!({"blob": "x".repeat(1024)});

        let started = Instant::now();
        let (first, second) = tokio::join!(
            mux.send("tools/call", big.clone()),
            mux.send("tools/call", big),
        );
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(matches!(first, Err(BrokerError::RequestTimeout { .. })));
        assert!(matches!(
            second,
            Err(BrokerError::RequestTimeout { .. } | BrokerError::WorkerCrashed { .. })
        ));
        assert!(mux.is_closed());
        assert_eq!(mux.outstanding(), 0);

        let third = mux.send("tools/call", json!({})).await;
        assert!(matches!(third, Err(BrokerError::WorkerCrashed { .. })));
    }
}
