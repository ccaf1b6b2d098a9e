//! # Request Lanes
//!
//! Sharded serialization of request work. Every task that touches a request
//! (its invocation, each response, each synthetic error) is queued on the lane
//! `request_id % lane_count`, and each lane is drained by a single tokio task.
//!
//! ## Invariants
//!
//! - A lane exclusively owns the in-flight requests mapped to it, so the state
//!   machines need no locks.
//! - Per request, invocation is processed before any response, since both are
//!   queued on the same FIFO and the response can only exist after the send.
//! - A completed request is removed from its lane; later tasks for it find
//!   nothing and are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use svcwire::Header;
use svcwire::RequestId;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;

use crate::mesh::PeerRegistry;
use crate::registry::RequestRegistry;
use crate::request::ServiceRequest;
use crate::timer::Timer;

/// Work queued on a lane.
pub(crate) enum LaneTask {
    Invoke(ServiceRequest),
    Response { header: Header, payload: Vec<u8> },
    /// Resolved once everything queued before it has been processed.
    Barrier(oneshot::Sender<()>),
    /// Fails every in-flight request on the lane and stops it.
    Shutdown,
}

/// Everything a request needs while it runs on a lane.
pub(crate) struct LaneContext {
    pub(crate) peers: Arc<PeerRegistry>,
    pub(crate) requests: Arc<RequestRegistry>,
    pub(crate) timer: Timer,
}

/// Submission side of the lanes.
#[derive(Clone)]
pub(crate) struct Lanes {
    senders: Arc<[mpsc::UnboundedSender<LaneTask>]>,
    in_flight: Arc<AtomicUsize>,
}

impl Lanes {
    /// Creates `count` lanes. The receivers are handed to [`spawn_workers`].
    pub(crate) fn new(count: usize) -> (Self, Vec<mpsc::UnboundedReceiver<LaneTask>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..count).map(|_| mpsc::unbounded_channel()).unzip();
        let lanes = Self {
            senders: senders.into(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        };
        (lanes, receivers)
    }

    pub(crate) fn count(&self) -> usize {
        self.senders.len()
    }

    pub(crate) fn lane_of(&self, id: RequestId) -> usize {
        (id.0 % self.senders.len() as u64) as usize
    }

    /// Queues `task` on the lane owning `id`. Hands the task back if the lane stopped.
    pub(crate) fn submit(&self, id: RequestId, task: LaneTask) -> Result<(), LaneTask> {
        self.senders[self.lane_of(id)]
            .send(task)
            .map_err(|mpsc::error::SendError(task)| task)
    }

    /// Requests currently owned by some lane.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Asks every lane to stop. Work queued before this call is still processed.
    pub(crate) fn shutdown(&self) {
        for sender in self.senders.iter() {
            let _ = sender.send(LaneTask::Shutdown);
        }
    }

    /// Waits until every lane has drained the work queued before this call.
    pub(crate) async fn settle(&self) {
        let mut waiters = Vec::with_capacity(self.senders.len());
        for sender in self.senders.iter() {
            let (tx, rx) = oneshot::channel();
            if sender.send(LaneTask::Barrier(tx)).is_ok() {
                waiters.push(rx);
            }
        }
        for rx in waiters {
            let _ = rx.await;
        }
    }
}

/// Spawns one worker per receiver.
pub(crate) fn spawn_workers(
    receivers: Vec<mpsc::UnboundedReceiver<LaneTask>>,
    ctx: Arc<LaneContext>,
    lanes: &Lanes,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(index, rx)| {
            let ctx = ctx.clone();
            let in_flight = lanes.in_flight.clone();
            tokio::spawn(run_lane(index, rx, ctx, in_flight))
        })
        .collect()
}

async fn run_lane(
    index: usize,
    mut rx: mpsc::UnboundedReceiver<LaneTask>,
    ctx: Arc<LaneContext>,
    in_flight: Arc<AtomicUsize>,
) {
    let mut requests: HashMap<RequestId, ServiceRequest> = HashMap::new();

    while let Some(task) = rx.recv().await {
        match task {
            LaneTask::Invoke(mut request) => {
                let id = request.id();
                request.start(&ctx);
                if !request.is_complete() {
                    requests.insert(id, request);
                    in_flight.fetch_add(1, Ordering::AcqRel);
                }
            }
            LaneTask::Response { header, payload } => {
                let id = header.request_id;
                let Some(request) = requests.get_mut(&id) else {
                    trace!(lane = index, request = %id, source = %header.source, "dropping response for finished request");
                    continue;
                };
                request.handle_response(&ctx, header, payload);
                if request.is_complete() {
                    requests.remove(&id);
                    in_flight.fetch_sub(1, Ordering::AcqRel);
                }
            }
            LaneTask::Barrier(tx) => {
                let _ = tx.send(());
            }
            LaneTask::Shutdown => break,
        }
    }

    debug!(lane = index, abandoned = requests.len(), "lane stopped");
    for (_, mut request) in requests.drain() {
        request.abandon();
        in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
