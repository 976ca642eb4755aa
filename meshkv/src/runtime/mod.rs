//! Tokio driver: runs a cluster inside one current-thread runtime.
//!
//! Each node gets three local tasks:
//!
//! - a **receiver** pulling packets off its inbound channel into the mailbox,
//! - a **clock** pushing a tick every `tick_interval`,
//! - the **deferred task**, woken through a [`Notify`] whenever a push
//!   reports [`Admission::ScheduleDrain`], which runs
//!   [`Node::run_deferred`] and hands the output to the mesh.
//!
//! The first two only enqueue; all request processing happens in the third.
//! Everything is `!Send` and must run inside a [`tokio::task::LocalSet`].

mod mesh;

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::client::{ClientResponse, HostClient};
use crate::config::ClusterConfig;
use crate::error::{ConfigError, KvError};
use crate::node::{build_cluster, Node};
use crate::queue::Admission;
use crate::types::{Datum, NodeId, RequestId};
use crate::wire::{self, Message};

use mesh::ChannelMesh;

/// A running cluster of local tasks, driven from the host side.
#[derive(Debug)]
pub struct LocalCluster {
    dispatcher: NodeId,
    mesh: Rc<ChannelMesh>,
    host_rx: mpsc::UnboundedReceiver<Bytes>,
    client: HostClient,
    late_responses: u64,
    response_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    /// Spawn every node of `config` on the current `LocalSet`.
    ///
    /// Mesh packets are lost with probability `loss`, drawn from a generator
    /// seeded with `seed`.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` for an invalid configuration or loss rate.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `LocalSet`.
    pub fn start(config: &ClusterConfig, loss: f64, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        if !(0.0..=1.0).contains(&loss) {
            return Err(ConfigError::Invalid(format!("loss {loss} outside [0, 1]")));
        }

        let nodes = build_cluster(config);
        let dispatcher = config.topology().dispatcher;

        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let mut links = BTreeMap::new();
        let mut inbound = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let (tx, rx) = mpsc::unbounded_channel();
            links.insert(node.id(), tx);
            inbound.push(rx);
        }
        let mesh = Rc::new(ChannelMesh::new(links, host_tx, loss, seed));

        let epoch = Instant::now();
        let mut tasks = Vec::with_capacity(nodes.len() * 3);
        for (node, rx) in nodes.into_iter().zip(inbound) {
            let mesh = Rc::clone(&mesh);
            tasks.extend(spawn_node(node, rx, mesh, config.tick_interval, epoch));
        }

        let tracker = &config.tracker;
        let per_attempt = tracker.retry_interval + tracker.pull_retry_offset + config.tick_interval;
        let response_timeout = per_attempt * (tracker.max_retries + 2) + Duration::from_secs(1);

        tracing::info!(nodes = tasks.len() / 3, loss, "local cluster started");
        Ok(Self {
            dispatcher,
            mesh,
            host_rx,
            client: HostClient::new(dispatcher),
            late_responses: 0,
            response_timeout,
            tasks,
        })
    }

    /// Send a request to the dispatcher and wait for its response.
    ///
    /// `None` if no response arrived within the response timeout (the request
    /// was dropped on a full dispatcher mailbox). Only one request is in
    /// flight at a time, so a response for any other id arrived after its
    /// caller gave up and is discarded.
    pub async fn call(&mut self, request: Message) -> Option<ClientResponse> {
        let id = request.id;
        match wire::encode(&request) {
            Ok(packet) => {
                if !self.mesh.inject(self.dispatcher, packet) {
                    tracing::warn!(id = %id, "dispatcher not reachable");
                    return None;
                }
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "request not encodable");
                return None;
            }
        }

        let waiting = tokio::time::timeout(self.response_timeout, self.wait_for(id));
        match waiting.await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!(id = %id, timeout = ?self.response_timeout, "no response");
                None
            }
        }
    }

    /// Store `value` under `key`.
    pub async fn put(
        &mut self,
        key: impl Into<Datum>,
        value: impl Into<Datum>,
    ) -> Option<ClientResponse> {
        let request = self.client.put(key, value);
        self.call(request).await
    }

    /// Look `key` up.
    pub async fn pull(&mut self, key: impl Into<Datum>) -> Option<ClientResponse> {
        let request = self.client.pull(key);
        self.call(request).await
    }

    /// Drop every record on every shard.
    pub async fn clear(&mut self) -> Option<ClientResponse> {
        let request = self.client.clear();
        self.call(request).await
    }

    async fn wait_for(&mut self, id: RequestId) -> Option<ClientResponse> {
        while let Some(packet) = self.host_rx.recv().await {
            let response = match wire::decode(&packet) {
                Ok(message) => ClientResponse::from_message(message),
                Err(e) => {
                    tracing::warn!(error = %e, "corrupt response");
                    continue;
                }
            };
            match response {
                Some(response) if response.id == id => return Some(response),
                Some(late) => {
                    self.late_responses += 1;
                    tracing::debug!(id = %late.id, waiting = %id, "late response discarded");
                }
                None => {}
            }
        }
        None
    }

    /// Responses discarded because their request had already timed out.
    pub fn late_responses(&self) -> u64 {
        self.late_responses
    }

    /// Mesh packets lost so far.
    pub fn dropped_packets(&self) -> u64 {
        self.mesh.dropped()
    }

    /// Stop every node task.
    pub fn shutdown(mut self) {
        self.abort_all();
        tracing::info!("local cluster stopped");
    }

    fn abort_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        self.abort_all();
    }
}

fn spawn_node(
    mut node: Node,
    mut inbound: mpsc::UnboundedReceiver<Bytes>,
    mesh: Rc<ChannelMesh>,
    tick: Duration,
    epoch: Instant,
) -> [JoinHandle<()>; 3] {
    let wake = Rc::new(Notify::new());
    let mailbox = node.mailbox();

    let receiver = {
        let mailbox = mailbox.clone();
        let wake = Rc::clone(&wake);
        tokio::task::spawn_local(async move {
            while let Some(packet) = inbound.recv().await {
                match mailbox.on_packet(packet) {
                    Ok(Admission::ScheduleDrain) => wake.notify_one(),
                    Ok(Admission::Coalesced) => {}
                    Err(overflow) => {
                        let error = KvError::from(overflow);
                        tracing::debug!(error = %error, "packet dropped");
                    }
                }
            }
        })
    };

    let clock = {
        let wake = Rc::clone(&wake);
        tokio::task::spawn_local(async move {
            let mut interval = tokio::time::interval_at(epoch + tick, tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let at = interval.tick().await;
                if let Ok(Admission::ScheduleDrain) = mailbox.on_tick(at.duration_since(epoch)) {
                    wake.notify_one();
                }
            }
        })
    };

    let deferred = tokio::task::spawn_local(async move {
        let id = node.id();
        tracing::debug!(node = %id, role = node.role().name(), "node running");
        loop {
            wake.notified().await;
            for outgoing in node.run_deferred(epoch.elapsed()) {
                mesh.send(id, outgoing);
            }
        }
    });

    [receiver, clock, deferred]
}
