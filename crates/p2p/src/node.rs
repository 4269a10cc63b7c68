use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use quarry_chain::Chain;
use quarry_types::{Block, Transaction};

use crate::message::{decode_line, encode_line, Message};
use crate::session::{read_line, write_loop};
use crate::{Broadcaster, P2pError};

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

struct Peer {
    session: u64,
    outbox: mpsc::UnboundedSender<String>,
}

/// Gossip node: owns the peer set and relays chain traffic between peers.
///
/// Every peer gets a reader task that decodes and dispatches messages one at
/// a time, and a writer task that drains an unbounded outbox. Chain calls run
/// on the blocking pool. The peer map lock is never held across an await or
/// while calling into the chain.
pub struct P2pNode {
    chain: Arc<Chain>,
    peers: Mutex<HashMap<SocketAddr, Peer>>,
    next_session: AtomicU64,
    dial_timeout: Duration,
}

impl P2pNode {
    pub fn new(chain: Arc<Chain>) -> Arc<Self> {
        Self::with_dial_timeout(chain, DEFAULT_DIAL_TIMEOUT)
    }

    pub fn with_dial_timeout(chain: Arc<Chain>, dial_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            chain,
            peers: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(0),
            dial_timeout,
        })
    }

    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<_> = self.peers.lock().keys().copied().collect();
        addrs.sort();
        addrs
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Bind `addr` and accept peers in the background. Returns the bound
    /// address, which differs from `addr` when binding port 0.
    pub async fn listen(self: &Arc<Self>, addr: &str) -> Result<SocketAddr, P2pError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "p2p listening");

        let node = Arc::clone(self);
        tokio::spawn(async move { node.accept_loop(listener).await });
        Ok(local)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!(%addr, "accepted inbound peer");
                    self.register(stream, addr);
                }
                Err(err) => {
                    warn!(%err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// Dial `addr` and start a session with it.
    pub async fn connect(self: &Arc<Self>, addr: &str) -> Result<SocketAddr, P2pError> {
        let stream = tokio::time::timeout(self.dial_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| P2pError::DialTimeout(addr.to_string()))??;
        let remote = stream.peer_addr()?;
        info!(addr = %remote, "connected to peer");
        self.register(stream, remote);
        Ok(remote)
    }

    /// Start the reader and writer tasks for `stream` and ask the peer for
    /// its chain.
    fn register(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%addr, %err, "could not set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        let (outbox, rx) = mpsc::unbounded_channel();
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);

        if self
            .peers
            .lock()
            .insert(addr, Peer { session, outbox })
            .is_some()
        {
            debug!(%addr, "replaced existing session");
        }

        tokio::spawn(write_loop(write_half, rx));
        let node = Arc::clone(self);
        tokio::spawn(async move { node.read_loop(read_half, addr, session).await });

        self.send_to(addr, &Message::GetChain {});
    }

    async fn read_loop(self: Arc<Self>, read_half: OwnedReadHalf, addr: SocketAddr, session: u64) {
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();
        loop {
            match read_line(&mut reader, &mut buf).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    warn!(%addr, %err, "peer read failed");
                    break;
                }
            }
            match decode_line(&buf) {
                Ok(Some(msg)) => self.handle_message(addr, msg).await,
                Ok(None) => debug!(%addr, "ignoring unknown message type"),
                Err(err) => {
                    warn!(%addr, %err, "malformed message, dropping peer");
                    break;
                }
            }
        }
        self.remove_peer(addr, session);
    }

    fn remove_peer(&self, addr: SocketAddr, session: u64) {
        let mut peers = self.peers.lock();
        if peers.get(&addr).is_some_and(|peer| peer.session == session) {
            peers.remove(&addr);
            info!(%addr, "peer disconnected");
        }
    }

    async fn handle_message(&self, from: SocketAddr, msg: Message) {
        debug!(%from, kind = msg.kind(), "received message");
        match msg {
            Message::Tx(tx) => {
                let relay = tx.clone();
                match self.on_chain(move |chain| chain.add_transaction(tx)).await {
                    Some(Ok(_)) => self.broadcast_except(from, &Message::Tx(relay)),
                    Some(Err(err)) => debug!(%from, %err, "rejected transaction"),
                    None => {}
                }
            }
            Message::Mine { miner } => {
                match self
                    .on_chain(move |chain| chain.mine_pending_transactions(&miner))
                    .await
                {
                    Some(Ok(block)) => self.broadcast(&Message::Block(block)),
                    Some(Err(err)) => debug!(%from, %err, "mine request failed"),
                    None => {}
                }
            }
            Message::Block(block) => {
                let relay = block.clone();
                let outcome = self
                    .on_chain(move |chain| {
                        // relayed copies of a block we hold are not a divergence
                        if chain.has_block(&block) {
                            None
                        } else {
                            Some(chain.try_add_block(block))
                        }
                    })
                    .await;
                match outcome {
                    Some(Some(true)) => {
                        info!(%from, height = relay.index, "accepted block from peer");
                        self.broadcast_except(from, &Message::Block(relay));
                    }
                    Some(Some(false)) => self.send_to(from, &Message::GetChain {}),
                    Some(None) => debug!(%from, height = relay.index, "already have block"),
                    None => {}
                }
            }
            Message::GetChain {} => {
                if let Some(blocks) = self.on_chain(|chain| chain.blocks()).await {
                    self.send_to(from, &Message::Chain(blocks));
                }
            }
            Message::Chain(blocks) => {
                if let Some(true) = self
                    .on_chain(move |chain| chain.try_replace_chain(blocks))
                    .await
                {
                    info!(%from, "adopted chain from peer");
                }
            }
        }
    }

    /// Run `f` against the chain on the blocking pool.
    async fn on_chain<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&Chain) -> T + Send + 'static,
        T: Send + 'static,
    {
        let chain = Arc::clone(&self.chain);
        match tokio::task::spawn_blocking(move || f(&chain)).await {
            Ok(out) => Some(out),
            Err(err) => {
                warn!(%err, "chain task failed");
                None
            }
        }
    }

    fn encode(msg: &Message) -> Option<String> {
        match encode_line(msg) {
            Ok(line) => Some(line),
            Err(err) => {
                warn!(%err, kind = msg.kind(), "failed to encode message");
                None
            }
        }
    }

    fn send_to(&self, addr: SocketAddr, msg: &Message) {
        let Some(line) = Self::encode(msg) else {
            return;
        };
        if let Some(peer) = self.peers.lock().get(&addr) {
            let _ = peer.outbox.send(line);
        }
    }

    fn fan_out(&self, skip: Option<SocketAddr>, msg: &Message) {
        let Some(line) = Self::encode(msg) else {
            return;
        };
        for (addr, peer) in self.peers.lock().iter() {
            if Some(*addr) == skip {
                continue;
            }
            let _ = peer.outbox.send(line.clone());
        }
    }

    /// Queue `msg` for every peer.
    pub fn broadcast(&self, msg: &Message) {
        self.fan_out(None, msg);
    }

    /// Queue `msg` for every peer but `skip`.
    pub fn broadcast_except(&self, skip: SocketAddr, msg: &Message) {
        self.fan_out(Some(skip), msg);
    }
}

impl Broadcaster for P2pNode {
    fn broadcast_tx(&self, tx: &Transaction) {
        self.broadcast(&Message::Tx(tx.clone()));
    }

    fn broadcast_block(&self, block: &Block) {
        self.broadcast(&Message::Block(block.clone()));
    }
}
