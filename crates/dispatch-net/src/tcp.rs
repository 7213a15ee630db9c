//! TCP transport: one rank per process, full mesh of loopback/LAN streams.
//!
//! Every rank listens on `peers[rank]` and dials every other rank, so each
//! ordered pair owns exactly one stream and per-pair FIFO delivery falls out of
//! TCP ordering. Socket I/O runs on a private tokio runtime; the synchronous
//! [`Transport`] calls bridge into it with `block_on` and read arrivals from a
//! [`Mailbox`] that background reader tasks fill.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dispatch_types::{NetConfig, Rank, Tag, TAG_BARRIER, TAG_BARRIER_RELEASE};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::codec::{self, Frame};
use crate::error::{NetError, Result};
use crate::mailbox::Mailbox;
use crate::transport::{check_rank, Envelope, RecvRequest, Transport};

/// Pause between attempts to dial a peer whose listener is not up yet.
const DIAL_RETRY: Duration = Duration::from_millis(50);

type Writer = AsyncMutex<TcpStream>;

pub struct TcpTransport {
    rank: Rank,
    size: usize,
    mailbox: Arc<Mailbox>,
    /// Outbound stream per peer; `None` at our own index.
    writers: Vec<Option<Writer>>,
    /// Serializes barrier rounds issued by threads of this process.
    barrier_lock: Mutex<()>,
    // Declared last: streams above must drop while the reactor is alive.
    runtime: Runtime,
}

impl TcpTransport {
    /// Bind, dial every peer and accept every peer. Collective: returns once
    /// this rank holds a stream in both directions with every other rank.
    ///
    /// Like every blocking call on this transport, must not run on an async
    /// runtime thread; doing so fails with [`NetError::AsyncContext`].
    pub fn connect(config: NetConfig) -> Result<Self> {
        ensure_blocking_context()?;
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(format!("dispatch-net-{}", config.rank))
            .enable_all()
            .build()?;

        let mailbox = Arc::new(Mailbox::new());
        let writers = runtime.block_on(establish(&config, mailbox.clone()))?;

        info!(
            rank = config.rank,
            size = config.peers.len(),
            addr = %config.peers[config.rank],
            "tcp transport connected"
        );

        Ok(Self {
            rank: config.rank,
            size: config.peers.len(),
            mailbox,
            writers,
            barrier_lock: Mutex::new(()),
            runtime,
        })
    }

    fn deliver_local(&self, tag: Tag, payload: &[u8]) {
        self.mailbox.push(Envelope {
            source: self.rank,
            tag,
            payload: payload.to_vec(),
        });
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn post_recv(&self, tag: Tag, capacity: usize) -> Result<RecvRequest> {
        Ok(RecvRequest::new(tag, capacity))
    }

    fn test(&self, request: &mut RecvRequest) -> Result<Option<Envelope>> {
        request.complete_from(&self.mailbox)
    }

    fn send(&self, dest: Rank, tag: Tag, payload: &[u8]) -> Result<()> {
        check_rank(dest, self.size)?;
        if dest == self.rank {
            self.deliver_local(tag, payload);
            return Ok(());
        }

        ensure_blocking_context()?;
        let writer = self.writers[dest].as_ref().ok_or_else(|| NetError::Disconnected {
            rank: dest,
            reason: "no stream to this rank".into(),
        })?;
        let encoded = codec::encode_frame(&Frame {
            tag,
            payload: payload.to_vec(),
        })?;

        self.runtime.block_on(async {
            let mut stream = writer.lock().await;
            codec::write_frame(&mut *stream, &encoded).await
        })?;
        trace!(to = dest, %tag, bytes = payload.len(), "frame sent");
        Ok(())
    }

    fn cancel(&self, _request: RecvRequest) -> Result<()> {
        Ok(())
    }

    /// Centralized at rank 0: everyone reports in, rank 0 releases everyone.
    fn barrier(&self) -> Result<()> {
        let _round = self.barrier_lock.lock();
        if self.size == 1 {
            return Ok(());
        }

        if self.rank == 0 {
            for _ in 1..self.size {
                self.mailbox.take_blocking(TAG_BARRIER)?;
            }
            for peer in 1..self.size {
                self.send(peer, TAG_BARRIER_RELEASE, &[])?;
            }
        } else {
            self.send(0, TAG_BARRIER, &[])?;
            self.mailbox.take_blocking(TAG_BARRIER_RELEASE)?;
        }
        debug!(rank = self.rank, "barrier passed");
        Ok(())
    }
}

/// `Runtime::block_on` panics on a runtime thread; report it instead.
fn ensure_blocking_context() -> Result<()> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(NetError::AsyncContext);
    }
    Ok(())
}

// ── Connection setup ─────────────────────────────────────────────────────────

async fn establish(config: &NetConfig, mailbox: Arc<Mailbox>) -> Result<Vec<Option<Writer>>> {
    let listener = TcpListener::bind(config.peers[config.rank]).await?;
    debug!(addr = %config.peers[config.rank], "listening for peers");

    let ((), writers) = tokio::try_join!(
        accept_peers(listener, config, mailbox),
        dial_peers(config),
    )?;
    Ok(writers)
}

async fn accept_peers(listener: TcpListener, config: &NetConfig, mailbox: Arc<Mailbox>) -> Result<()> {
    let size = config.peers.len();
    let mut seen = vec![false; size];
    seen[config.rank] = true;

    for _ in 1..size {
        let (mut stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        let source = codec::read_handshake(&mut stream).await?;
        if source >= size || seen[source] {
            return Err(NetError::Handshake(format!(
                "unexpected rank {source} from {addr}"
            )));
        }
        seen[source] = true;
        debug!(source, %addr, "accepted peer");

        tokio::spawn(read_loop(stream, source, mailbox.clone(), config.max_frame_bytes));
    }
    Ok(())
}

async fn dial_peers(config: &NetConfig) -> Result<Vec<Option<Writer>>> {
    let deadline = Instant::now() + config.connect_timeout;
    let mut writers = Vec::with_capacity(config.peers.len());

    for (peer, addr) in config.peers.iter().enumerate() {
        if peer == config.rank {
            writers.push(None);
            continue;
        }
        let mut stream = dial(peer, *addr, deadline).await?;
        codec::write_handshake(&mut stream, config.rank).await?;
        debug!(peer, %addr, "dialed peer");
        writers.push(Some(AsyncMutex::new(stream)));
    }
    Ok(writers)
}

async fn dial(rank: Rank, addr: SocketAddr, deadline: Instant) -> Result<TcpStream> {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) if Instant::now() < deadline => {
                trace!(rank, %addr, %e, "peer not up yet, retrying");
                tokio::time::sleep(DIAL_RETRY).await;
            }
            Err(_) => return Err(NetError::ConnectTimeout { rank, addr }),
        }
    }
}

/// Pump frames from `source` into the mailbox until the stream closes.
async fn read_loop(mut stream: TcpStream, source: Rank, mailbox: Arc<Mailbox>, max_frame_bytes: usize) {
    loop {
        match codec::read_frame(&mut stream, max_frame_bytes).await {
            Ok(frame) => {
                trace!(from = source, tag = %frame.tag, bytes = frame.payload.len(), "frame received");
                mailbox.push(Envelope {
                    source,
                    tag: frame.tag,
                    payload: frame.payload,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(source, "peer closed its stream");
                return;
            }
            Err(e) => {
                warn!(source, %e, "peer stream failed");
                mailbox.poison(source, e.to_string());
                return;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::thread;

    use dispatch_types::{TAG_DECREMENT, TAG_ENQUEUE};

    use super::*;

    fn free_loopback_addrs(n: usize) -> Vec<SocketAddr> {
        let listeners: Vec<_> = (0..n)
            .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        listeners.iter().map(|l| l.local_addr().unwrap()).collect()
    }

    fn connect_group(n: usize) -> Vec<TcpTransport> {
        let peers = free_loopback_addrs(n);
        let handles: Vec<_> = (0..n)
            .map(|rank| {
                let cfg = NetConfig::new(rank, peers.clone());
                thread::spawn(move || TcpTransport::connect(cfg))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
    }

    fn wait_for(t: &TcpTransport, tag: Tag, capacity: usize) -> Envelope {
        let mut req = t.post_recv(tag, capacity).unwrap();
        loop {
            if let Some(env) = t.test(&mut req).unwrap() {
                return env;
            }
            thread::yield_now();
        }
    }

    #[test]
    fn ring_messages_arrive_with_source() {
        let group = connect_group(3);
        for t in &group {
            let next = (t.rank() + 1) % t.size();
            t.send(next, TAG_ENQUEUE, &[t.rank() as u8; 4]).unwrap();
        }
        for t in &group {
            let prev = (t.rank() + t.size() - 1) % t.size();
            let env = wait_for(t, TAG_ENQUEUE, 8);
            assert_eq!(env.source, prev);
            assert_eq!(env.payload, vec![prev as u8; 4]);
        }
    }

    #[test]
    fn stream_preserves_order_and_empty_payloads() {
        let group = connect_group(2);
        for i in 0..20u8 {
            group[0].send(1, TAG_ENQUEUE, &[i]).unwrap();
        }
        group[0].send(1, TAG_DECREMENT, &[]).unwrap();

        for i in 0..20u8 {
            assert_eq!(wait_for(&group[1], TAG_ENQUEUE, 1).payload, vec![i]);
        }
        assert!(wait_for(&group[1], TAG_DECREMENT, 0).payload.is_empty());
    }

    #[test]
    fn self_send_skips_the_network() {
        let group = connect_group(2);
        group[1].send(1, TAG_DECREMENT, &[]).unwrap();
        assert_eq!(wait_for(&group[1], TAG_DECREMENT, 0).source, 1);
    }

    #[test]
    fn barrier_completes_repeatedly() {
        let group = connect_group(3);
        let handles: Vec<_> = group
            .into_iter()
            .map(|t| {
                thread::spawn(move || {
                    for _ in 0..5 {
                        t.barrier().unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[tokio::test]
    async fn connect_from_runtime_thread_is_refused() {
        let peers = free_loopback_addrs(1);
        assert!(matches!(
            TcpTransport::connect(NetConfig::new(0, peers)),
            Err(NetError::AsyncContext)
        ));
    }

    #[test]
    fn truncated_frame_poisons_the_mailbox() {
        use tokio::io::AsyncWriteExt;

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let mailbox = Arc::new(Mailbox::new());
        rt.block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let mut client = TcpStream::connect(addr).await.unwrap();
            let (server, _) = listener.accept().await.unwrap();

            // Length prefix promises 100 bytes; only 3 arrive before close.
            client.write_all(&100u32.to_be_bytes()).await.unwrap();
            client.write_all(&[1, 2, 3]).await.unwrap();
            drop(client);

            read_loop(server, 2, mailbox.clone(), 4096).await;
        });

        assert!(matches!(
            mailbox.try_take(TAG_ENQUEUE),
            Err(NetError::Disconnected { rank: 2, .. })
        ));
    }

    #[test]
    fn rejects_invalid_config() {
        let peers = free_loopback_addrs(1);
        assert!(TcpTransport::connect(NetConfig::new(3, peers)).is_err());
    }
}
