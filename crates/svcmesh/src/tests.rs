//! Tests for request dispatch, membership and routing against recording transports.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use svcwire::ErrorKind;
use svcwire::Header;
use svcwire::MessageTag;
use svcwire::PeerId;

use crate::descriptor::PeerDescriptor;
use crate::descriptor::PeerRole;
use crate::descriptor::PeerStatus;
use crate::handler::Reply;
use crate::handler::handler_fn;
use crate::mock_transport::RecordingConnector;
use crate::mock_transport::RecordingNotifier;
use crate::mock_transport::ScriptedFaults;
use crate::node::Mesh;
use crate::request::RequestState;
use crate::request::Response;

const LOCAL: PeerId = PeerId(1);
const A: PeerId = PeerId(2);
const B: PeerId = PeerId(3);
const C: PeerId = PeerId(4);
const PING: MessageTag = MessageTag(7);

fn descriptor(id: PeerId, role: PeerRole) -> PeerDescriptor {
    PeerDescriptor::new(id, role, format!("10.0.0.{}", id.0), 7000 + id.0 as u16).with_incarnation(1)
}

struct Fixture {
    mesh: Mesh,
    connector: Arc<RecordingConnector>,
    faults: Arc<ScriptedFaults>,
    notifier: Arc<RecordingNotifier>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_lanes(4)
    }

    fn with_lanes(lanes: usize) -> Self {
        let connector = Arc::new(RecordingConnector::new());
        let faults = Arc::new(ScriptedFaults::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let mesh = Mesh::builder(descriptor(LOCAL, PeerRole::Platform))
            .lanes(lanes)
            .connector(connector.clone())
            .faults(faults.clone())
            .notifier(notifier.clone())
            .handler(Arc::new(handler_fn(|_header, payload| async move { Reply::ok(payload) })))
            .build()
            .expect("valid config");
        mesh.update_membership([
            descriptor(A, PeerRole::Storage),
            descriptor(B, PeerRole::Storage),
            descriptor(C, PeerRole::Storage),
        ]);
        Self { mesh, connector, faults, notifier }
    }

    /// Header of the last request frame sent to `peer`.
    fn sent_to(&self, peer: PeerId) -> Header {
        *self.connector.headers(peer).last().expect("no frame sent to peer")
    }

    fn respond(&self, peer: PeerId, kind: ErrorKind, payload: &[u8]) {
        let header = self.sent_to(peer).reply(kind);
        self.mesh.requests().deliver(header, payload.to_vec());
    }

    /// Lets every lane, and whatever it queued on itself, run to quiescence.
    async fn drain(&self) {
        for _ in 0..8 {
            self.mesh.settle().await;
            tokio::task::yield_now().await;
        }
    }
}

#[derive(Clone, Default)]
struct Responses(Arc<Mutex<Vec<Response>>>);

impl Responses {
    fn callback(&self) -> Box<dyn FnOnce(Response) + Send + 'static> {
        let inner = self.0.clone();
        Box::new(move |response| inner.lock().unwrap().push(response))
    }

    fn all(&self) -> Vec<Response> {
        self.0.lock().unwrap().clone()
    }

    fn single(&self) -> Response {
        let all = self.all();
        assert_eq!(all.len(), 1, "expected exactly one response, got {:?}", all);
        all[0].clone()
    }
}

// --- Point-to-point ---

#[tokio::test]
async fn test_point_to_point_success() {
    let f = Fixture::new();
    let responses = Responses::default();
    let request = f.mesh.point_to_point(A).set_payload(PING, b"ping".to_vec()).on_response(responses.callback());
    let id = request.id();
    request.invoke();
    f.drain().await;

    let sent = f.sent_to(A);
    assert_eq!(sent.request_id, id);
    assert_eq!(sent.tag, PING);
    assert_eq!(sent.source, LOCAL);
    assert_eq!(f.mesh.outstanding(), 1);

    f.respond(A, ErrorKind::Ok, b"pong");
    f.drain().await;

    let response = responses.single();
    assert!(response.is_ok());
    assert_eq!(response.payload, b"pong");
    assert_eq!(response.header.source, A);
    assert_eq!(response.call(A).map(|c| c.outcome), Some(Some(ErrorKind::Ok)));
    assert_eq!(f.mesh.outstanding(), 0);
}

#[tokio::test]
async fn test_request_ids_increase() {
    let f = Fixture::new();
    let first = f.mesh.point_to_point(A);
    let second = f.mesh.failover([A, B]);
    assert!(second.id() > first.id());
    assert!(first.id().0 >= 1);
}

#[tokio::test]
async fn test_unknown_destination_yields_invocation_failed() {
    let f = Fixture::new();
    let ghost = PeerId(99);
    let responses = Responses::default();
    f.mesh.point_to_point(ghost).on_response(responses.callback()).invoke();
    f.drain().await;

    let response = responses.single();
    assert_eq!(response.kind, ErrorKind::RequestInvocationFailed);
    assert_eq!(response.cause(), ErrorKind::RequestInvocationFailed);
    assert_eq!(response.header.source, ghost);
    assert!(f.notifier.reported().is_empty());
}

#[tokio::test]
async fn test_request_to_self_is_served_locally() {
    let f = Fixture::new();
    let response = f.mesh.point_to_point(LOCAL).set_payload(PING, b"echo".to_vec()).call().await;

    assert!(response.is_ok());
    assert_eq!(response.payload, b"echo");
    assert_eq!(f.connector.connects(LOCAL), 0);
}

#[tokio::test]
async fn test_point_to_point_retries_a_failed_peer() {
    let f = Fixture::new();
    f.faults.fail_times(A, 1);

    let first = f.mesh.point_to_point(A).call().await;
    assert_eq!(first.kind, ErrorKind::RequestInvocationFailed);
    assert!(f.mesh.peers().is_failed(A));

    let responses = Responses::default();
    f.mesh.point_to_point(A).on_response(responses.callback()).invoke();
    f.drain().await;
    assert_eq!(f.connector.headers(A).len(), 1);

    f.respond(A, ErrorKind::Ok, b"");
    f.drain().await;
    assert!(responses.single().is_ok());
}

// --- Completion semantics ---

#[tokio::test(start_paused = true)]
async fn test_completion_happens_at_most_once() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh
        .point_to_point(A)
        .set_timeout(Duration::from_millis(50))
        .on_response(responses.callback())
        .invoke();
    f.drain().await;

    let sent = f.sent_to(A);
    f.respond(A, ErrorKind::Ok, b"first");
    f.respond(A, ErrorKind::App(5), b"second");
    f.respond(A, ErrorKind::Ok, b"third");
    f.mesh.requests().post_error(&sent, ErrorKind::RequestTimeout);
    f.drain().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    f.drain().await;

    let response = responses.single();
    assert!(response.is_ok());
    assert_eq!(response.payload, b"first");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_when_peer_is_silent() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh
        .point_to_point(A)
        .set_timeout(Duration::from_millis(100))
        .on_response(responses.callback())
        .invoke();
    f.drain().await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    f.drain().await;
    assert!(responses.all().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    f.drain().await;

    let response = responses.single();
    assert_eq!(response.kind, ErrorKind::RequestTimeout);
    assert_eq!(response.header.source, A);
    assert_eq!(response.call(A).map(|c| c.state), Some(RequestState::Complete));
}

#[tokio::test(start_paused = true)]
async fn test_response_cancels_timer() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh
        .point_to_point(A)
        .set_timeout(Duration::from_millis(100))
        .on_response(responses.callback())
        .invoke();
    f.drain().await;
    f.respond(A, ErrorKind::Ok, b"");
    f.drain().await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    f.drain().await;
    assert!(responses.single().is_ok());
}

#[tokio::test]
async fn test_timeout_race_first_task_on_lane_wins() {
    for success_first in [true, false] {
        let f = Fixture::new();
        let responses = Responses::default();
        f.mesh.point_to_point(A).on_response(responses.callback()).invoke();
        f.drain().await;

        let sent = f.sent_to(A);
        if success_first {
            f.respond(A, ErrorKind::Ok, b"ok");
            f.mesh.requests().post_error(&sent, ErrorKind::RequestTimeout);
        } else {
            f.mesh.requests().post_error(&sent, ErrorKind::RequestTimeout);
            f.respond(A, ErrorKind::Ok, b"ok");
        }
        f.drain().await;

        let expected = if success_first { ErrorKind::Ok } else { ErrorKind::RequestTimeout };
        assert_eq!(responses.single().kind, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_send_does_not_hold_up_its_lane() {
    let f = Fixture::with_lanes(1);
    f.connector.stall(A);

    let stalled = Responses::default();
    let healthy = Responses::default();
    f.mesh
        .point_to_point(A)
        .set_timeout(Duration::from_millis(50))
        .on_response(stalled.callback())
        .invoke();
    f.mesh
        .point_to_point(B)
        .set_timeout(Duration::from_millis(50))
        .on_response(healthy.callback())
        .invoke();
    f.drain().await;

    assert!(f.connector.headers(A).is_empty());
    assert_eq!(f.connector.headers(B).len(), 1);
    f.respond(B, ErrorKind::Ok, b"b");
    f.drain().await;
    assert!(healthy.single().is_ok());
    assert!(stalled.all().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    f.drain().await;
    let response = stalled.single();
    assert_eq!(response.kind, ErrorKind::RequestTimeout);
    assert_eq!(response.header.source, A);
    assert_eq!(f.mesh.outstanding(), 0);

    // The timed-out send no longer holds the peer.
    f.connector.restore(A);
    f.mesh.point_to_point(A).invoke();
    f.drain().await;
    assert_eq!(f.connector.headers(A).len(), 1);
}

#[tokio::test]
async fn test_reserved_codes_from_a_handler_are_layer_outcomes() {
    assert_eq!(Reply::error(ErrorKind::App(-1003)).status, ErrorKind::RequestFailed);
    assert_eq!(Reply::error(ErrorKind::App(13)).status, ErrorKind::App(13));

    let mesh = Mesh::builder(descriptor(LOCAL, PeerRole::Storage))
        .lanes(1)
        .connector(Arc::new(RecordingConnector::new()))
        .handler(Arc::new(handler_fn(|_header, _payload| async move {
            Reply {
                status: ErrorKind::App(-1001),
                payload: Vec::new(),
            }
        })))
        .build()
        .expect("valid config");

    let response = mesh
        .point_to_point(LOCAL)
        .classify_with(|_: &Header, _: &[u8]| ErrorKind::Ok)
        .call()
        .await;
    assert_eq!(response.kind, ErrorKind::RequestTimeout);
}

#[tokio::test]
async fn test_classifier_reinterprets_peer_responses_only() {
    let f = Fixture::new();
    let classify = |header: &Header, payload: &[u8]| match payload {
        b"busy" => ErrorKind::App(42),
        _ => header.kind(),
    };

    let responses = Responses::default();
    f.mesh.point_to_point(A).classify_with(classify).on_response(responses.callback()).invoke();
    f.drain().await;
    f.respond(A, ErrorKind::Ok, b"busy");
    f.drain().await;
    assert_eq!(responses.single().kind, ErrorKind::App(42));

    let responses = Responses::default();
    f.mesh
        .point_to_point(B)
        .classify_with(|_: &Header, _: &[u8]| ErrorKind::Ok)
        .on_response(responses.callback())
        .invoke();
    f.drain().await;
    f.mesh.requests().post_error(&f.sent_to(B), ErrorKind::RequestTimeout);
    f.drain().await;
    assert_eq!(responses.single().kind, ErrorKind::RequestTimeout);
}

// --- Failover ---

#[tokio::test]
async fn test_failover_tries_candidates_in_order() {
    let f = Fixture::new();
    let stranger = PeerId(5);
    let responses = Responses::default();
    f.mesh.failover([A, B, C]).on_response(responses.callback()).invoke();
    f.drain().await;

    assert_eq!(f.connector.headers(A).len(), 1);
    assert!(f.connector.headers(B).is_empty());

    f.respond(A, ErrorKind::App(7), b"");
    f.drain().await;
    assert_eq!(f.connector.headers(B).len(), 1);
    assert!(f.connector.headers(C).is_empty());

    // A peer that was never a candidate has no say.
    let mut foreign = f.sent_to(B).reply(ErrorKind::Ok);
    foreign.source = stranger;
    f.mesh.requests().deliver(foreign, Vec::new());
    f.respond(B, ErrorKind::App(8), b"");
    f.drain().await;
    assert!(responses.all().is_empty());

    f.respond(C, ErrorKind::Ok, b"from-c");
    f.drain().await;

    let response = responses.single();
    assert!(response.is_ok());
    assert_eq!(response.payload, b"from-c");
    let outcomes: Vec<_> = response.calls.iter().map(|c| (c.peer, c.state, c.outcome)).collect();
    assert_eq!(
        outcomes,
        vec![
            (A, RequestState::Complete, Some(ErrorKind::App(7))),
            (B, RequestState::Complete, Some(ErrorKind::App(8))),
            (C, RequestState::Complete, Some(ErrorKind::Ok)),
        ]
    );
}

#[tokio::test]
async fn test_failover_ignores_responses_from_earlier_candidates() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh.failover([A, B]).on_response(responses.callback()).invoke();
    f.drain().await;
    f.respond(A, ErrorKind::App(1), b"");
    f.drain().await;

    f.respond(A, ErrorKind::Ok, b"late");
    f.drain().await;
    assert!(responses.all().is_empty());

    f.respond(B, ErrorKind::Ok, b"b");
    f.drain().await;
    assert_eq!(responses.single().payload, b"b");
}

#[tokio::test]
async fn test_failover_exhausted_reports_last_error() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh.failover([A, B]).on_response(responses.callback()).invoke();
    f.drain().await;
    f.respond(A, ErrorKind::App(1), b"");
    f.drain().await;
    f.respond(B, ErrorKind::App(2), b"b-failed");
    f.drain().await;

    let response = responses.single();
    assert_eq!(response.kind, ErrorKind::RequestFailed);
    assert_eq!(response.cause(), ErrorKind::App(2));
    assert_eq!(response.header.source, B);
    assert_eq!(response.payload, b"b-failed");
}

#[tokio::test]
async fn test_failover_moves_on_after_send_failure() {
    let f = Fixture::new();
    f.faults.fail(A);
    let responses = Responses::default();
    f.mesh.failover([A, B]).on_response(responses.callback()).invoke();
    f.drain().await;

    assert!(f.connector.headers(A).is_empty());
    assert_eq!(f.connector.headers(B).len(), 1);
    assert!(f.mesh.peers().is_failed(A));
    assert_eq!(f.notifier.reported(), vec![A]);

    f.respond(B, ErrorKind::Ok, b"");
    f.drain().await;
    let response = responses.single();
    assert!(response.is_ok());
    assert_eq!(
        response.call(A).and_then(|c| c.outcome),
        Some(ErrorKind::RequestInvocationFailed)
    );
}

#[tokio::test]
async fn test_failover_skips_peers_known_to_be_failed() {
    let f = Fixture::new();
    f.mesh.update_membership([descriptor(A, PeerRole::Storage).with_status(PeerStatus::Failed)]);

    let responses = Responses::default();
    f.mesh.failover([A, B]).on_response(responses.callback()).invoke();
    f.drain().await;

    assert!(f.connector.headers(A).is_empty());
    f.respond(B, ErrorKind::Ok, b"");
    f.drain().await;
    assert!(responses.single().is_ok());
}

#[tokio::test]
async fn test_failover_with_every_candidate_failed_sends_nothing() {
    let f = Fixture::new();
    f.mesh.update_membership([
        descriptor(A, PeerRole::Storage).with_status(PeerStatus::Failed),
        descriptor(B, PeerRole::Storage).with_status(PeerStatus::Failed),
    ]);

    let response = f.mesh.failover([A, B]).call().await;
    assert_eq!(response.kind, ErrorKind::RequestFailed);
    assert_eq!(response.cause(), ErrorKind::RequestInvocationFailed);
    assert_eq!(response.header.source, B);
    assert!(f.connector.headers(A).is_empty());
    assert!(f.connector.headers(B).is_empty());

    let outcomes: Vec<_> = response.calls.iter().map(|c| (c.peer, c.state, c.outcome)).collect();
    assert_eq!(
        outcomes,
        vec![
            (A, RequestState::Complete, Some(ErrorKind::RequestInvocationFailed)),
            (B, RequestState::Complete, Some(ErrorKind::RequestInvocationFailed)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failover_moves_on_after_timeout() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh
        .failover([A, B, C])
        .set_timeout(Duration::from_millis(100))
        .on_response(responses.callback())
        .invoke();
    f.drain().await;
    assert_eq!(f.connector.headers(A).len(), 1);
    assert!(f.connector.headers(B).is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;
    f.drain().await;
    assert_eq!(f.connector.headers(B).len(), 1);
    assert!(responses.all().is_empty());

    f.respond(B, ErrorKind::Ok, b"b");
    f.drain().await;

    let response = responses.single();
    assert!(response.is_ok());
    assert_eq!(response.payload, b"b");
    assert!(f.connector.headers(C).is_empty());
    let outcomes: Vec<_> = response.calls.iter().map(|c| (c.peer, c.state, c.outcome)).collect();
    assert_eq!(
        outcomes,
        vec![
            (A, RequestState::Complete, Some(ErrorKind::RequestTimeout)),
            (B, RequestState::Complete, Some(ErrorKind::Ok)),
            (C, RequestState::PriorInvocation, None),
        ]
    );
}

#[tokio::test]
async fn test_repeated_candidates_are_contacted_once() {
    let f = Fixture::new();
    assert_eq!(f.mesh.failover([A, B, A]).targets(), vec![A, B]);
    assert_eq!(f.mesh.quorum([A, A, B]).targets(), vec![A, B]);

    let responses = Responses::default();
    f.mesh.failover([A, B, A]).on_response(responses.callback()).invoke();
    f.drain().await;
    f.respond(A, ErrorKind::App(1), b"");
    f.drain().await;

    // A late answer from A cannot be credited to a second turn of A.
    f.respond(A, ErrorKind::Ok, b"late");
    f.respond(B, ErrorKind::App(2), b"");
    f.drain().await;

    let response = responses.single();
    assert_eq!(response.kind, ErrorKind::RequestFailed);
    assert_eq!(response.cause(), ErrorKind::App(2));
    assert_eq!(f.connector.headers(A).len(), 1);
    assert_eq!(response.calls.len(), 2);
}

#[tokio::test]
async fn test_failover_without_candidates_fails_fast() {
    let f = Fixture::new();
    let response = f.mesh.failover(Vec::<PeerId>::new()).call().await;
    assert_eq!(response.kind, ErrorKind::RequestInvocationFailed);
    assert!(response.calls.is_empty());
}

// --- Quorum ---

#[tokio::test]
async fn test_quorum_completes_before_last_ack() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh.quorum_of([A, B, C], 2).on_response(responses.callback()).invoke();
    f.drain().await;

    for peer in [A, B, C] {
        assert_eq!(f.connector.headers(peer).len(), 1, "{} not contacted", peer);
    }

    f.respond(A, ErrorKind::Ok, b"a");
    f.drain().await;
    assert!(responses.all().is_empty());

    f.respond(B, ErrorKind::Ok, b"b");
    f.drain().await;
    f.respond(C, ErrorKind::Ok, b"c");
    f.drain().await;

    let response = responses.single();
    assert!(response.is_ok());
    assert_eq!(response.payload, b"b");
    assert_eq!(response.call(C).map(|c| c.state), Some(RequestState::InvocationProgress));
    assert_eq!(f.mesh.outstanding(), 0);
}

#[tokio::test]
async fn test_quorum_fails_once_unreachable() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh.quorum_of([A, B, C], 2).on_response(responses.callback()).invoke();
    f.drain().await;

    f.respond(A, ErrorKind::App(3), b"");
    f.drain().await;
    assert!(responses.all().is_empty());

    f.respond(B, ErrorKind::App(4), b"");
    f.drain().await;

    let response = responses.single();
    assert_eq!(response.kind, ErrorKind::RequestFailed);
    assert_eq!(response.cause(), ErrorKind::App(4));
}

#[tokio::test]
async fn test_quorum_defaults_to_every_candidate() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh.quorum([A, B]).on_response(responses.callback()).invoke();
    f.drain().await;

    f.respond(A, ErrorKind::Ok, b"");
    f.drain().await;
    assert!(responses.all().is_empty());

    f.respond(B, ErrorKind::App(9), b"");
    f.drain().await;
    assert_eq!(responses.single().kind, ErrorKind::RequestFailed);
}

#[tokio::test]
async fn test_quorum_counts_duplicate_acks_once() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh.quorum_of([A, B, C], 2).on_response(responses.callback()).invoke();
    f.drain().await;

    f.respond(A, ErrorKind::Ok, b"");
    f.respond(A, ErrorKind::Ok, b"");
    f.drain().await;
    assert!(responses.all().is_empty());
}

#[tokio::test]
async fn test_quorum_over_repeated_candidates_needs_each_peer_once() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh.quorum([A, B, A]).on_response(responses.callback()).invoke();
    f.drain().await;
    assert_eq!(f.connector.headers(A).len(), 1);

    f.respond(A, ErrorKind::Ok, b"");
    f.drain().await;
    assert!(responses.all().is_empty());

    f.respond(B, ErrorKind::Ok, b"");
    f.drain().await;
    assert!(responses.single().is_ok());
}

#[tokio::test]
async fn test_quorum_override_is_clamped() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh.quorum_of([A, B], 10).on_response(responses.callback()).invoke();
    f.drain().await;
    f.respond(A, ErrorKind::Ok, b"");
    f.respond(B, ErrorKind::Ok, b"");
    f.drain().await;
    assert!(responses.single().is_ok());

    let responses = Responses::default();
    f.mesh.quorum_of([A, B], 0).on_response(responses.callback()).invoke();
    f.drain().await;
    f.respond(B, ErrorKind::Ok, b"");
    f.drain().await;
    assert!(responses.single().is_ok());
}

#[tokio::test]
async fn test_quorum_without_candidates_fails_fast() {
    let f = Fixture::new();
    let response = f.mesh.quorum(Vec::<PeerId>::new()).call().await;
    assert_eq!(response.kind, ErrorKind::RequestInvocationFailed);
}

// --- Membership ---

#[tokio::test]
async fn test_membership_conflict_resolution() {
    let f = Fixture::new();
    let peers = f.mesh.peers();
    peers.update_membership([descriptor(A, PeerRole::Storage).with_incarnation(5)]);

    let lower = descriptor(A, PeerRole::Storage).with_incarnation(4).with_status(PeerStatus::Stopped);
    assert_eq!(peers.update_membership([lower]), 0);
    assert_eq!(peers.descriptor(A).map(|d| (d.incarnation, d.status)), Some((5, PeerStatus::Active)));

    let same = descriptor(A, PeerRole::Storage).with_incarnation(5);
    assert_eq!(peers.update_membership([same]), 0);

    let status_change = descriptor(A, PeerRole::Storage).with_incarnation(5).with_status(PeerStatus::Failed);
    assert_eq!(peers.update_membership([status_change]), 1);
    assert!(!peers.is_healthy(A));

    let restarted = descriptor(A, PeerRole::Storage).with_incarnation(6).with_status(PeerStatus::Starting);
    assert_eq!(peers.update_membership([restarted]), 1);
    assert_eq!(peers.descriptor(A).map(|d| (d.incarnation, d.status)), Some((6, PeerStatus::Starting)));
    assert!(peers.is_healthy(A));
}

#[tokio::test]
async fn test_unknown_incarnation_policy() {
    let f = Fixture::new();
    let unknown = descriptor(A, PeerRole::Storage).with_incarnation(0).with_property("zone", "b");
    assert_eq!(f.mesh.update_membership([unknown]), 1);
    assert_eq!(f.mesh.peers().descriptor(A).map(|d| d.incarnation), Some(0));

    let strict = Mesh::builder(descriptor(LOCAL, PeerRole::Platform)).lanes(1).strict_incarnation().build().unwrap();
    strict.update_membership([descriptor(A, PeerRole::Storage).with_incarnation(3)]);
    assert_eq!(strict.update_membership([descriptor(A, PeerRole::Storage).with_incarnation(0)]), 0);
    assert_eq!(strict.peers().descriptor(A).map(|d| d.incarnation), Some(3));
}

#[tokio::test]
async fn test_accepted_update_drops_cached_client() {
    let f = Fixture::new();
    f.mesh.point_to_point(A).invoke();
    f.drain().await;
    assert_eq!(f.connector.connects(A), 1);
    assert!(f.mesh.peers().handle(A).is_some_and(|h| h.is_connected()));

    f.mesh.update_membership([descriptor(A, PeerRole::Storage).with_incarnation(2)]);
    assert!(f.mesh.peers().handle(A).is_some_and(|h| !h.is_connected()));

    f.mesh.point_to_point(A).invoke();
    f.drain().await;
    assert_eq!(f.connector.connects(A), 2);
}

#[tokio::test]
async fn test_self_queries() {
    let f = Fixture::new();
    let peers = f.mesh.peers();
    assert_eq!(peers.self_id(), LOCAL);
    assert_eq!(peers.self_descriptor().role, PeerRole::Platform);
    let ids: Vec<_> = peers.descriptors().iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![LOCAL, A, B, C]);
    assert!(peers.descriptor(PeerId(42)).is_none());
    assert!(!peers.is_healthy(PeerId(42)));
    assert!(!peers.is_failed(PeerId(42)));
}

// --- Peer failure ---

#[tokio::test]
async fn test_send_failure_marks_peer_failed_and_notifies_once() {
    let f = Fixture::new();
    f.connector.break_link(A);

    for _ in 0..2 {
        let response = f.mesh.point_to_point(A).call().await;
        assert_eq!(response.kind, ErrorKind::RequestInvocationFailed);
    }

    assert_eq!(f.mesh.peers().descriptor(A).map(|d| d.status), Some(PeerStatus::Failed));
    assert!(f.mesh.peers().handle(A).is_some_and(|h| !h.is_connected()));
    assert_eq!(f.notifier.reported(), vec![A]);
}

#[tokio::test]
async fn test_manager_is_never_reported_down() {
    let f = Fixture::new();
    let manager = PeerId(9);
    f.mesh.update_membership([descriptor(manager, PeerRole::Manager)]);
    f.connector.refuse(manager);

    let response = f.mesh.point_to_point(manager).call().await;
    assert_eq!(response.kind, ErrorKind::RequestInvocationFailed);
    assert!(f.mesh.peers().is_failed(manager));
    assert!(f.notifier.reported().is_empty());
}

// --- Broadcast ---

#[tokio::test]
async fn test_broadcast_honours_predicate() {
    let connector = Arc::new(RecordingConnector::new());
    let mesh = Mesh::builder(descriptor(LOCAL, PeerRole::Storage))
        .lanes(2)
        .connector(connector.clone())
        .build()
        .unwrap();
    mesh.update_membership([descriptor(A, PeerRole::Storage), descriptor(B, PeerRole::Storage)]);

    let sent = mesh.broadcast(PING, b"hello", |d| d.role == PeerRole::Storage).await;
    assert_eq!(sent, 2);
    for peer in [A, B] {
        let headers = connector.headers(peer);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].destination, peer);
        assert_eq!(headers[0].tag, PING);
    }
    assert!(connector.headers(LOCAL).is_empty());

    let sent = mesh.broadcast(PING, b"hello", |d| d.role == PeerRole::Data).await;
    assert_eq!(sent, 0);
    assert_eq!(connector.headers(A).len(), 1);
}

// --- Lifecycle ---

#[tokio::test]
async fn test_shutdown_fails_outstanding_and_later_requests() {
    let f = Fixture::new();
    let responses = Responses::default();
    f.mesh.quorum([A, B]).on_response(responses.callback()).invoke();
    f.drain().await;
    assert_eq!(f.mesh.outstanding(), 1);

    f.mesh.shutdown().await;
    assert_eq!(responses.single().kind, ErrorKind::RequestInvocationFailed);
    assert_eq!(f.mesh.outstanding(), 0);

    let late = f.mesh.point_to_point(A).call().await;
    assert_eq!(late.kind, ErrorKind::RequestInvocationFailed);
}

#[tokio::test]
async fn test_zero_lanes_is_rejected() {
    let result = Mesh::builder(descriptor(LOCAL, PeerRole::Platform)).lanes(0).build();
    assert!(matches!(result, Err(crate::config::Error::ZeroLanes)));
}
