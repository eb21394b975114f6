// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The ZeroMQ ROUTER realization of [`crate::transport::Transport`]
//! (spec §4.2): one bidirectional router socket per node, addressed by
//! `Nid`, exchanging three-frame multipart messages
//! `[targetNid][header][payload]`.
//!
//! `libzmq` sockets are not safe to share across threads without
//! external synchronization, and spec §5 calls for exactly one thread
//! touching the socket (send serialized through an upstream queue,
//! receive on its own dedicated loop). This module gives the socket to
//! one dedicated OS thread — `zmq`'s calls are blocking, so a `tokio`
//! task would otherwise tie up a runtime worker — and bridges it to the
//! rest of the node with a `std::sync::mpsc` outbound queue and a
//! `tokio::sync::mpsc` inbound channel.
//!
//! Grounded on `other_examples/manifests/vorjdux-monocoque` and
//! `other_examples/manifests/tobert-hootenanny` (see `DESIGN.md`'s
//! "Added dependencies" section) for pulling in the `zmq` crate as the
//! ROUTER-socket transport of a routed mesh; the dedicated-thread owning
//! the raw socket while a channel bridges it to async callers is the
//! same shape as the teacher's `Worker`/reporter tasks each owning one
//! exclusive TCP connection (`app/stage/mod.rs`).

use crate::{
    error::PlayHouseError,
    identity::Nid,
    route::header::RouteHeader,
};
use async_trait::async_trait;
use std::{
    sync::{
        mpsc as std_mpsc,
        Arc,
    },
    thread::JoinHandle,
};
use tokio::sync::{
    mpsc,
    oneshot,
};

/// A packet received on the router socket, already split into its
/// three wire frames and decoded.
#[derive(Debug)]
pub struct Inbound {
    /// The sending peer's `Nid`, taken from the ROUTER envelope's
    /// routing-identity frame (spec §4.2: "the first frame is the
    /// sender NID, provided by the transport's routing identity").
    pub from: Nid,
    pub header: RouteHeader,
    pub payload: Vec<u8>,
}

enum Command {
    Send {
        to: Nid,
        header: RouteHeader,
        payload: Vec<u8>,
        respond: oneshot::Sender<Result<(), PlayHouseError>>,
    },
    Connect {
        endpoint: String,
        respond: oneshot::Sender<Result<(), PlayHouseError>>,
    },
    Shutdown,
}

/// Socket-level parameters the ROUTER transport is bound with (spec §6
/// `SendHWM`/`ReceiveHWM`/`Linger`/`TcpKeepalive*`).
#[derive(Debug, Clone)]
pub struct RouterSocketConfig {
    pub bind_endpoint: String,
    pub send_hwm: i32,
    pub receive_hwm: i32,
    pub linger_ms: i32,
    pub tcp_keepalive_secs: Option<u32>,
}

/// The ROUTER-socket [`Transport`](crate::transport::Transport). Owns
/// no thread itself — [`RouterSocket::spawn`] hands the raw socket to a
/// dedicated background thread and returns a handle plus the inbound
/// stream.
pub struct RouterSocket {
    nid: Nid,
    outbound: std_mpsc::Sender<Command>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RouterSocket {
    /// Bind a ROUTER socket as `nid` per `config`, returning the
    /// transport handle and the channel inbound packets arrive on.
    /// Peers are dialed lazily the first time a send addresses them
    /// (spec §9: "a single-socket design is simpler and suffices
    /// provided the identity-based routing policy is mandatory").
    pub fn spawn(nid: Nid, config: RouterSocketConfig, inbound_capacity: usize) -> Result<(Arc<Self>, mpsc::Receiver<Inbound>), PlayHouseError> {
        let ctx = zmq::Context::new();
        let socket = ctx
            .socket(zmq::ROUTER)
            .map_err(|e| PlayHouseError::InternalError(format!("zmq socket create failed: {e}")))?;
        socket
            .set_identity(nid.to_string().as_bytes())
            .map_err(|e| PlayHouseError::InternalError(format!("zmq set_identity failed: {e}")))?;
        socket
            .set_router_mandatory(true)
            .map_err(|e| PlayHouseError::InternalError(format!("zmq set_router_mandatory failed: {e}")))?;
        socket
            .set_sndhwm(config.send_hwm)
            .map_err(|e| PlayHouseError::InternalError(format!("zmq set_sndhwm failed: {e}")))?;
        socket
            .set_rcvhwm(config.receive_hwm)
            .map_err(|e| PlayHouseError::InternalError(format!("zmq set_rcvhwm failed: {e}")))?;
        socket
            .set_linger(config.linger_ms)
            .map_err(|e| PlayHouseError::InternalError(format!("zmq set_linger failed: {e}")))?;
        if let Some(secs) = config.tcp_keepalive_secs {
            let _ = socket.set_tcp_keepalive(1);
            let _ = socket.set_tcp_keepalive_idle(secs as i32);
        }
        socket
            .bind(&config.bind_endpoint)
            .map_err(|e| PlayHouseError::InternalError(format!("zmq bind {} failed: {e}", config.bind_endpoint)))?;

        let (outbound_tx, outbound_rx) = std_mpsc::channel::<Command>();
        let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(inbound_capacity);

        let worker = std::thread::Builder::new()
            .name(format!("playhouse-router-{nid}"))
            .spawn(move || run_socket_thread(socket, outbound_rx, inbound_tx))
            .map_err(|e| PlayHouseError::InternalError(format!("failed to spawn router thread: {e}")))?;

        Ok((
            Arc::new(Self {
                nid,
                outbound: outbound_tx,
                worker: std::sync::Mutex::new(Some(worker)),
            }),
            inbound_rx,
        ))
    }

    /// This node's own identity, as bound on the socket.
    pub fn nid(&self) -> &Nid {
        &self.nid
    }

    /// Dial a peer's bind endpoint so subsequent [`Transport::send`]
    /// calls addressing its `Nid` succeed. ROUTER-to-ROUTER sends
    /// (spec §4.2) require each side to have either accepted an
    /// inbound connection from the peer or explicitly dialed it;
    /// this is not part of the `Transport` trait itself because
    /// establishing peer connections from discovery (spec §4.3) is a
    /// node-level concern, not something every sender needs to drive.
    pub async fn connect_peer(&self, endpoint: &str) -> Result<(), PlayHouseError> {
        let (respond_tx, respond_rx) = oneshot::channel();
        self.outbound
            .send(Command::Connect {
                endpoint: endpoint.to_string(),
                respond: respond_tx,
            })
            .map_err(|_| PlayHouseError::ShuttingDown)?;
        respond_rx.await.map_err(|_| PlayHouseError::ShuttingDown)?
    }
}

#[async_trait]
impl crate::transport::Transport for RouterSocket {
    async fn send(&self, nid: &Nid, header: RouteHeader, payload: Vec<u8>) -> Result<(), PlayHouseError> {
        let (respond_tx, respond_rx) = oneshot::channel();
        self.outbound
            .send(Command::Send {
                to: nid.clone(),
                header,
                payload,
                respond: respond_tx,
            })
            .map_err(|_| PlayHouseError::ShuttingDown)?;
        respond_rx.await.map_err(|_| PlayHouseError::ShuttingDown)?
    }

    async fn shutdown(&self) {
        let _ = self.outbound.send(Command::Shutdown);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }
}

fn run_socket_thread(socket: zmq::Socket, outbound: std_mpsc::Receiver<Command>, inbound: mpsc::Sender<Inbound>) {
    loop {
        match outbound.try_recv() {
            Ok(Command::Send { to, header, payload, respond }) => {
                let result = send_one(&socket, &to, header, payload);
                let _ = respond.send(result);
                continue;
            }
            Ok(Command::Connect { endpoint, respond }) => {
                let result = socket
                    .connect(&endpoint)
                    .map_err(|e| PlayHouseError::InternalError(format!("zmq connect {endpoint} failed: {e}")));
                let _ = respond.send(result);
                continue;
            }
            Ok(Command::Shutdown) => break,
            Err(std_mpsc::TryRecvError::Empty) => {}
            Err(std_mpsc::TryRecvError::Disconnected) => break,
        }

        match socket.poll(zmq::PollEvents::POLLIN, 50) {
            Ok(n) if n > 0 => {
                if let Ok(frames) = socket.recv_multipart(0) {
                    if let Some(parsed) = parse_inbound(frames) {
                        if inbound.blocking_send(parsed).is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

fn send_one(socket: &zmq::Socket, to: &Nid, header: RouteHeader, mut payload: Vec<u8>) -> Result<(), PlayHouseError> {
    let identity = to.to_string();
    let encoded_header = header.encode();
    socket
        .send(identity.as_bytes(), zmq::SNDMORE)
        .and_then(|_| socket.send(&encoded_header, zmq::SNDMORE))
        .and_then(|_| socket.send(std::mem::take(&mut payload), 0))
        .map_err(|e| match e {
            zmq::Error::EHOSTUNREACH => PlayHouseError::PeerUnreachable,
            zmq::Error::EAGAIN => PlayHouseError::Backpressure,
            _ => PlayHouseError::InternalError(format!("zmq send failed: {e}")),
        })
}

fn parse_inbound(mut frames: Vec<Vec<u8>>) -> Option<Inbound> {
    if frames.len() != 3 {
        log::warn!("dropping router frame with unexpected part count {}", frames.len());
        return None;
    }
    let payload = frames.pop().unwrap();
    let header_bytes = frames.pop().unwrap();
    let identity = frames.pop().unwrap();

    let from = match String::from_utf8(identity).ok().and_then(|s| s.parse::<Nid>().ok()) {
        Some(nid) => nid,
        None => {
            log::warn!("dropping router frame with unparseable sender identity");
            return None;
        }
    };
    let header = match RouteHeader::decode(&header_bytes) {
        Ok(header) => header,
        Err(err) => {
            log::warn!("dropping router frame with malformed header: {err}");
            return None;
        }
    };
    Some(Inbound { from, header, payload })
}
