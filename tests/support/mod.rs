#![allow(dead_code)]

use async_trait::async_trait;
use peercall::call::{CallController, CallHandle, CallStateMachine};
use peercall::error::{CallError, Result};
use peercall::identity::Identity;
use peercall::peer::types::{
    LocalMedia, MediaKind, NegotiatorEvent, NetworkCandidate, RemoteStream, RemoteTrack,
    SessionDescription,
};
use peercall::peer::{Negotiator, NegotiatorFactory};
use peercall::session::{CallId, CallSnapshot};
use peercall::signaling::{ClientMessage, LocalRelay, RelayLink, SignalingLink};
use peercall::CallPolicy;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

/// Counters shared by every negotiator a fake factory creates
#[derive(Debug, Default)]
pub struct FakeStats {
    pub created: AtomicUsize,
    pub offers: AtomicUsize,
    pub answers: AtomicUsize,
    pub applied_answers: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub streams: AtomicUsize,
    pub candidates: Mutex<Vec<NetworkCandidate>>,
}

impl FakeStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn offers(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }

    pub fn candidates(&self) -> Vec<NetworkCandidate> {
        self.candidates.lock().unwrap().clone()
    }
}

/// Scripted negotiator: no media, deterministic descriptions, a fixed
/// number of local candidates per description.
#[derive(Default)]
pub struct FakeNegotiatorFactory {
    pub stats: Arc<FakeStats>,
    pub fail_offer: AtomicBool,
    pub offer_delay: Mutex<Option<Duration>>,
    pub fail_create: AtomicBool,
    pub create_delay: Mutex<Option<Duration>>,
    pub local_candidates: usize,
}

impl FakeNegotiatorFactory {
    pub fn new() -> Self {
        Self {
            local_candidates: 2,
            ..Self::default()
        }
    }

    pub fn failing_offer() -> Self {
        let factory = Self::new();
        factory.fail_offer.store(true, Ordering::SeqCst);
        factory
    }

    pub fn slow_offer(delay: Duration) -> Self {
        let factory = Self::new();
        *factory.offer_delay.lock().unwrap() = Some(delay);
        factory
    }

    /// `create` fails, as when the media stack cannot be initialised
    pub fn failing_create() -> Self {
        let factory = Self::new();
        factory.fail_create.store(true, Ordering::SeqCst);
        factory
    }

    pub fn slow_create(delay: Duration) -> Self {
        let factory = Self::new();
        *factory.create_delay.lock().unwrap() = Some(delay);
        factory
    }
}

#[async_trait]
impl NegotiatorFactory for FakeNegotiatorFactory {
    async fn create(
        &self,
        call_id: CallId,
        _media: LocalMedia,
        events: mpsc::UnboundedSender<NegotiatorEvent>,
    ) -> Result<Box<dyn Negotiator>> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CallError::Negotiation("media engine unavailable".into()));
        }
        Ok(Box::new(FakeNegotiator {
            call_id,
            events,
            stats: self.stats.clone(),
            fail_offer: self.fail_offer.load(Ordering::SeqCst),
            offer_delay: *self.offer_delay.lock().unwrap(),
            local_candidates: self.local_candidates,
            closed: AtomicBool::new(false),
            offer_sent: AtomicBool::new(false),
            stream_fired: AtomicBool::new(false),
        }))
    }
}

pub struct FakeNegotiator {
    call_id: CallId,
    events: mpsc::UnboundedSender<NegotiatorEvent>,
    stats: Arc<FakeStats>,
    fail_offer: bool,
    offer_delay: Option<Duration>,
    local_candidates: usize,
    closed: AtomicBool,
    offer_sent: AtomicBool,
    stream_fired: AtomicBool,
}

pub fn candidate(n: usize) -> NetworkCandidate {
    NetworkCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

impl FakeNegotiator {
    fn trickle(&self) {
        for n in 0..self.local_candidates {
            let _ = self.events.send(NegotiatorEvent::LocalCandidate {
                call_id: self.call_id.clone(),
                candidate: candidate(n),
            });
        }
    }

    fn remote_description_set(&self) {
        if self.stream_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stats.streams.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(NegotiatorEvent::RemoteStream {
            call_id: self.call_id.clone(),
            stream: RemoteStream {
                stream_id: format!("stream-{}", self.call_id),
                tracks: vec![
                    RemoteTrack::detached("audio-0", MediaKind::Audio),
                    RemoteTrack::detached("video-0", MediaKind::Video),
                ],
            },
        });
    }
}

#[async_trait]
impl Negotiator for FakeNegotiator {
    fn call_id(&self) -> &CallId {
        &self.call_id
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        if let Some(delay) = self.offer_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_offer {
            return Err(CallError::Negotiation("no capture device".into()));
        }
        self.stats.offers.fetch_add(1, Ordering::SeqCst);
        self.offer_sent.store(true, Ordering::SeqCst);
        self.trickle();
        Ok(SessionDescription::offer(format!("offer-{}", self.call_id)))
    }

    async fn create_answer(&self, remote_offer: &SessionDescription) -> Result<SessionDescription> {
        if !remote_offer.is_offer() {
            return Err(CallError::Negotiation("not an offer".into()));
        }
        self.stats.answers.fetch_add(1, Ordering::SeqCst);
        self.remote_description_set();
        self.trickle();
        Ok(SessionDescription::answer(format!("answer-{}", self.call_id)))
    }

    async fn apply_remote_answer(&self, answer: &SessionDescription) -> Result<()> {
        if !self.offer_sent.load(Ordering::SeqCst) || !answer.is_answer() {
            return Err(CallError::Negotiation("no local offer is outstanding".into()));
        }
        self.stats.applied_answers.fetch_add(1, Ordering::SeqCst);
        self.remote_description_set();
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: NetworkCandidate) -> Result<()> {
        if self.is_closed() {
            return Err(CallError::Transport("closed".into()));
        }
        self.stats.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.stats.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Link that records what was sent instead of delivering it
#[derive(Default)]
pub struct RecordingLink {
    sent: Mutex<Vec<ClientMessage>>,
    down: AtomicBool,
}

impl RecordingLink {
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take_sent(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalingLink for RecordingLink {
    async fn send(&self, message: ClientMessage) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CallError::Link("down".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }
}

pub fn policy(signal_teardown: bool) -> CallPolicy {
    CallPolicy {
        signal_teardown,
        candidate_buffer_capacity: 16,
    }
}

/// A state machine on a recording link with identity `identity` already assigned
pub struct Bench {
    pub machine: CallStateMachine,
    pub events: mpsc::UnboundedReceiver<NegotiatorEvent>,
    pub link: Arc<RecordingLink>,
    pub factory: Arc<FakeNegotiatorFactory>,
}

impl Bench {
    pub async fn new(identity: &str, factory: FakeNegotiatorFactory, teardown: bool) -> Self {
        let link = Arc::new(RecordingLink::default());
        let factory = Arc::new(factory);
        let (mut machine, events) = CallStateMachine::new(
            link.clone(),
            factory.clone(),
            LocalMedia::default(),
            policy(teardown),
        );
        machine.on_identity_assigned(Identity::new(identity)).await;
        link.take_sent();
        Self {
            machine,
            events,
            link,
            factory,
        }
    }

    /// Delivers every queued negotiator callback
    pub async fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.machine.handle_negotiator_event(event).await;
        }
    }

    pub fn stats(&self) -> &FakeStats {
        &self.factory.stats
    }
}

/// A controller on a shared relay
pub struct Peer {
    pub identity: Identity,
    pub link: Arc<RelayLink>,
    pub handle: CallHandle,
    pub factory: Arc<FakeNegotiatorFactory>,
    pub task: JoinHandle<()>,
}

impl Peer {
    pub async fn join(relay: &LocalRelay, factory: FakeNegotiatorFactory, teardown: bool) -> Self {
        let (link, link_events) = relay.connect();
        let factory = Arc::new(factory);
        let (machine, negotiator_events) = CallStateMachine::new(
            link.clone(),
            factory.clone(),
            LocalMedia::default(),
            policy(teardown),
        );
        let (controller, handle) = CallController::new(machine, negotiator_events, link_events);
        let task = controller.spawn();

        let identity = link.identity().clone();
        let expected = identity.clone();
        wait_until(&handle, move |s| s.local_identity.as_ref() == Some(&expected)).await;

        Self {
            identity,
            link,
            handle,
            factory,
            task,
        }
    }

    pub fn stats(&self) -> &FakeStats {
        &self.factory.stats
    }
}

/// Waits (bounded) for a snapshot matching `check`
pub async fn wait_until(
    handle: &CallHandle,
    check: impl FnMut(&CallSnapshot) -> bool,
) -> CallSnapshot {
    let mut rx = handle.subscribe();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(check))
        .await
        .expect("timed out waiting for call state")
        .expect("controller stopped")
        .clone();
    snapshot
}

/// Polls `check` until it holds or the wait runs out
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}
