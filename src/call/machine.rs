//! The call state machine. Owns the one [`CallSession`], drives the negotiator
//! and talks to the peer through the signaling link. Every method runs to
//! completion before the next one starts; `CallController` provides that
//! serial context.

use crate::call::buffer::CandidateBuffer;
use crate::call::events::CallNotice;
use crate::config::CallPolicy;
use crate::error::{CallError, Result};
use crate::identity::{Identity, IdentityRegistry, RoomToken};
use crate::peer::negotiator::NegotiatorFactory;
use crate::peer::types::{
    LocalMedia, NegotiatorEvent, NetworkCandidate, RemoteStream, RemoteTrack, SessionDescription,
    TransportState,
};
use crate::session::{CallId, CallSession, CallSnapshot, CallState, PendingOffer};
use crate::signaling::link::{LinkEvent, SignalingLink};
use crate::signaling::messages::{ClientMessage, DeclineReason, ServerMessage};
use crate::utils::non_blank;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

const NOTICE_CAPACITY: usize = 32;

pub struct CallStateMachine {
    link: Arc<dyn SignalingLink>,
    factory: Arc<dyn NegotiatorFactory>,
    media: LocalMedia,
    policy: CallPolicy,
    registry: IdentityRegistry,
    session: CallSession,
    candidates: CandidateBuffer,
    negotiator_tx: mpsc::UnboundedSender<NegotiatorEvent>,
    state_tx: watch::Sender<CallSnapshot>,
    notice_tx: broadcast::Sender<CallNotice>,
}

impl CallStateMachine {
    /// The returned receiver carries callbacks from every negotiator this machine creates
    pub fn new(
        link: Arc<dyn SignalingLink>,
        factory: Arc<dyn NegotiatorFactory>,
        media: LocalMedia,
        policy: CallPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<NegotiatorEvent>) {
        let (negotiator_tx, negotiator_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(CallSnapshot::default());
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);

        let machine = Self {
            link,
            factory,
            media,
            candidates: CandidateBuffer::new(policy.candidate_buffer_capacity),
            policy,
            registry: IdentityRegistry::new(),
            session: CallSession::new(),
            negotiator_tx,
            state_tx,
            notice_tx,
        };
        (machine, negotiator_rx)
    }

    pub fn state(&self) -> CallState {
        self.session.state
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.session
            .snapshot(self.registry.local(), self.registry.room_token())
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<CallNotice> {
        self.notice_tx.subscribe()
    }

    pub(crate) fn notice_sender(&self) -> broadcast::Sender<CallNotice> {
        self.notice_tx.clone()
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn buffered_candidates(&self) -> usize {
        self.candidates.len(&self.session.id)
    }

    // ---- user intents ----

    /// Issues a fresh room token and registers it with the relay
    pub async fn create_room(&mut self, display_name: &str) -> Result<RoomToken> {
        let name = non_blank(display_name)
            .ok_or_else(|| CallError::InvalidInput("display name must not be blank".into()))?;
        self.registry.set_local_display_name(name);
        let token = self.registry.issue_room_token();
        info!(%token, "room created");

        if self.link.is_connected() {
            self.link
                .send(ClientMessage::RegisterToken {
                    token: token.clone(),
                })
                .await?;
        } else {
            debug!(%token, "link down, token will be registered on reconnect");
        }
        self.publish();
        Ok(token)
    }

    pub fn set_display_name(&mut self, display_name: &str) -> Result<()> {
        let name = non_blank(display_name)
            .ok_or_else(|| CallError::InvalidInput("display name must not be blank".into()))?;
        self.registry.set_local_display_name(name);
        self.publish();
        Ok(())
    }

    pub async fn initiate_call(&mut self, target: &str, display_name: &str) -> Result<()> {
        self.require("initiate_call", CallState::Idle)?;
        let name = non_blank(display_name)
            .ok_or_else(|| CallError::InvalidInput("display name must not be blank".into()))?;
        let target = non_blank(target)
            .ok_or_else(|| CallError::InvalidInput("call target must not be blank".into()))?;
        let local = self
            .registry
            .local()
            .cloned()
            .ok_or_else(|| CallError::Link("no identity assigned by the signaling service".into()))?;
        self.registry.set_local_display_name(name.as_str());

        let call_id = CallId::new();
        info!(%call_id, %target, "placing call");
        self.session = CallSession {
            id: call_id.clone(),
            peer_identity: Some(self.registry.resolve(&target)),
            peer_address: Some(target.clone()),
            ..CallSession::new()
        };

        if let Err(e) = self.attach_negotiator(&call_id).await {
            return Err(self.abort_call(e, None).await);
        }

        let offer = match &self.session.negotiator {
            Some(negotiator) => negotiator.create_offer().await,
            None => Err(CallError::Cancelled),
        };
        let offer = match offer {
            Ok(offer) => offer,
            Err(e) => return Err(self.abort_call(e, None).await),
        };

        let sent = self
            .link
            .send(ClientMessage::CallUser {
                to: target,
                signal: offer,
                from: local,
                name,
            })
            .await;
        if let Err(e) = sent {
            return Err(self.abort_call(e, None).await);
        }

        self.transition(CallState::OutgoingPending);
        Ok(())
    }

    pub async fn accept_call(&mut self) -> Result<()> {
        self.require("accept_call", CallState::IncomingOffered)?;
        let Some(offer) = self.session.pending_offer.clone() else {
            return Err(CallError::InvalidState {
                operation: "accept_call",
                state: self.session.state,
            });
        };
        let call_id = self.session.id.clone();
        let name = self
            .registry
            .local_display_name()
            .unwrap_or_default()
            .to_string();
        info!(%call_id, from = %offer.from, "accepting call");

        if let Err(e) = self.attach_negotiator(&call_id).await {
            return Err(self.abort_call(e, Some(offer.from)).await);
        }

        let answer = match &self.session.negotiator {
            Some(negotiator) => negotiator.create_answer(&offer.description).await,
            None => Err(CallError::Cancelled),
        };
        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => return Err(self.abort_call(e, Some(offer.from)).await),
        };

        let sent = self
            .link
            .send(ClientMessage::AnswerCall {
                to: offer.from.clone(),
                signal: answer,
                name,
            })
            .await;
        if let Err(e) = sent {
            return Err(self.abort_call(e, None).await);
        }

        self.session.pending_offer = None;
        self.session.connected_at = Some(Utc::now());
        self.transition(CallState::Connected);
        Ok(())
    }

    pub async fn decline_call(&mut self) -> Result<()> {
        self.require("decline_call", CallState::IncomingOffered)?;
        let caller = self.session.peer_identity.clone();
        info!(call_id = %self.session.id, "declining call");

        if let Some(caller) = caller {
            self.send_teardown(ClientMessage::DeclineCall {
                to: caller,
                reason: DeclineReason::Declined,
            })
            .await;
        }
        self.session = CallSession::new();
        self.candidates.clear();
        self.publish();
        Ok(())
    }

    /// Ends whatever is in progress. Always leaves the session idle; safe to repeat.
    pub async fn hang_up(&mut self) {
        if let Some(peer) = self.session.peer_identity.clone() {
            match self.session.state {
                CallState::IncomingOffered => {
                    self.send_teardown(ClientMessage::DeclineCall {
                        to: peer,
                        reason: DeclineReason::Declined,
                    })
                    .await
                }
                CallState::OutgoingPending | CallState::Connected => {
                    self.send_teardown(ClientMessage::EndCall { to: peer }).await
                }
                CallState::Idle | CallState::Ended => {}
            }
        }
        self.end_call("local hang-up").await;
    }

    /// Restores startup defaults without telling the peer
    pub async fn reset(&mut self) {
        self.end_call("reset").await;
    }

    // ---- network events ----

    pub async fn on_identity_assigned(&mut self, identity: Identity) {
        info!(%identity, "signaling identity assigned");
        self.registry.assign_local(identity);
        if let Some(token) = self.registry.room_token().cloned() {
            if let Err(e) = self.link.send(ClientMessage::RegisterToken { token }).await {
                warn!("failed to re-register room token: {e}");
            }
        }
        self.publish();
    }

    pub async fn on_incoming_offer(
        &mut self,
        from: Identity,
        description: SessionDescription,
        display_name: String,
    ) -> Result<()> {
        if self.is_confirmed_peer(&from) {
            let repeated = self
                .session
                .pending_offer
                .as_ref()
                .is_some_and(|pending| pending.description == description);
            if repeated {
                debug!(%from, "dropping duplicate incoming-offer");
            } else {
                warn!(
                    %from,
                    state = %self.session.state,
                    "ignoring incoming-offer from the current peer: renegotiation is not supported"
                );
            }
            return Ok(());
        }
        if !self.session.is_idle() {
            warn!(
                %from,
                state = %self.session.state,
                "rejecting incoming offer: a call is already in progress"
            );
            self.notify(CallNotice::OfferRejected {
                from: from.clone(),
                display_name,
            });
            self.send_teardown(ClientMessage::DeclineCall {
                to: from,
                reason: DeclineReason::Busy,
            })
            .await;
            return Ok(());
        }
        if !description.is_offer() {
            warn!(%from, "ignoring incoming-offer carrying a {:?} description", description.sdp_type);
            return Ok(());
        }

        self.registry.remember_display_name(&from, &display_name);
        self.session = CallSession {
            peer_identity: Some(from.clone()),
            peer_address: Some(from.to_string()),
            peer_confirmed: true,
            peer_display_name: Some(display_name.clone()),
            pending_offer: Some(PendingOffer {
                from: from.clone(),
                display_name: display_name.clone(),
                description,
                received_at: Utc::now(),
            }),
            ..CallSession::new()
        };
        info!(call_id = %self.session.id, %from, name = %display_name, "incoming call");
        self.transition(CallState::IncomingOffered);
        self.notify(CallNotice::IncomingCall { from, display_name });
        Ok(())
    }

    pub async fn on_answer_received(
        &mut self,
        description: SessionDescription,
        display_name: String,
        from: Option<Identity>,
    ) -> Result<()> {
        if self.session.state != CallState::OutgoingPending || self.session.negotiator.is_none() {
            warn!(
                state = %self.session.state,
                "ignoring answer: no outgoing call is pending"
            );
            return Ok(());
        }
        if !self.session.is_peer(from.as_ref()) {
            warn!(from = ?from, "ignoring answer from someone we did not call");
            return Ok(());
        }

        let applied = match &self.session.negotiator {
            Some(negotiator) => negotiator.apply_remote_answer(&description).await,
            None => Err(CallError::Cancelled),
        };
        if let Err(e) = applied {
            let peer = from.or_else(|| self.session.peer_identity.clone());
            return Err(self.abort_call(e, peer).await);
        }

        if let Some(from) = from {
            self.registry.remember_display_name(&from, &display_name);
            self.session.peer_identity = Some(from);
            self.session.peer_confirmed = true;
        }
        self.session.peer_display_name = Some(display_name);
        self.session.connected_at = Some(Utc::now());
        self.transition(CallState::Connected);
        Ok(())
    }

    pub async fn on_candidate_received(
        &mut self,
        candidate: NetworkCandidate,
        from: Option<Identity>,
    ) -> Result<()> {
        if self.session.is_idle() && self.session.negotiator.is_none() {
            debug!("dropping remote candidate: no call in progress");
            return Ok(());
        }
        if !self.session.is_peer(from.as_ref()) {
            warn!(from = ?from, "dropping candidate from someone outside this call");
            return Ok(());
        }

        match &self.session.negotiator {
            Some(negotiator) => {
                if let Err(e) = negotiator.add_remote_candidate(candidate).await {
                    warn!(call_id = %self.session.id, "remote candidate not applied: {e}");
                }
            }
            None => self.candidates.push(&self.session.id, candidate),
        }
        Ok(())
    }

    pub async fn on_remote_declined(&mut self, from: Identity, reason: DeclineReason) {
        if self.session.state != CallState::OutgoingPending || !self.session.is_peer(Some(&from)) {
            warn!(%from, state = %self.session.state, "ignoring call-declined");
            return;
        }
        info!(%from, ?reason, "call declined by peer");
        self.notify(CallNotice::CallDeclined { from, reason });
        self.end_call("declined by peer").await;
    }

    pub async fn on_remote_ended(&mut self, from: Identity) {
        if self.session.is_idle() || !self.session.is_peer(Some(&from)) {
            warn!(%from, state = %self.session.state, "ignoring call-ended");
            return;
        }
        info!(%from, "peer hung up");
        self.notify(CallNotice::RemoteHungUp { from });
        self.end_call("peer hung up").await;
    }

    /// The relay connection is gone: nothing can be signalled any more
    pub async fn on_link_lost(&mut self, reason: String) {
        warn!(%reason, "signaling link lost");
        self.registry.clear_local();
        self.notify(CallNotice::LinkLost { reason });
        self.end_call("signaling link lost").await;
        self.publish();
    }

    // ---- negotiator callbacks ----

    pub async fn on_local_candidate(&mut self, call_id: CallId, candidate: NetworkCandidate) {
        if !self.is_current(&call_id, "local candidate") {
            return;
        }
        let Some(peer) = self.session.peer_identity.clone() else {
            debug!(%call_id, "no peer to send local candidate to");
            return;
        };
        if let Err(e) = self
            .link
            .send(ClientMessage::Candidate { to: peer, candidate })
            .await
        {
            warn!(%call_id, "failed to send local candidate: {e}");
        }
    }

    pub fn on_remote_stream(&mut self, call_id: CallId, stream: RemoteStream) {
        if !self.is_current(&call_id, "remote stream") {
            return;
        }
        if self.session.remote_stream.is_some() {
            debug!(%call_id, "remote stream already announced");
            return;
        }
        info!(%call_id, stream = %stream.stream_id, "remote stream ready");
        self.session.remote_stream = Some(stream.clone());
        self.notify(CallNotice::RemoteStreamReady(stream));
        self.publish();
    }

    pub fn on_remote_track(&mut self, call_id: CallId, track: RemoteTrack) {
        if !self.is_current(&call_id, "remote track") {
            return;
        }
        match &mut self.session.remote_stream {
            Some(stream) if !stream.tracks.iter().any(|t| t.id == track.id) => {
                debug!(%call_id, track = %track.id, "remote track added to stream");
                stream.tracks.push(track);
                self.publish();
            }
            Some(_) => {}
            None => debug!(%call_id, track = %track.id, "track before stream, ignored"),
        }
    }

    pub async fn on_transport_state(&mut self, call_id: CallId, state: TransportState) {
        if !self.is_current(&call_id, "transport state") {
            return;
        }
        match state {
            TransportState::Connected => info!(%call_id, "peer transport connected"),
            TransportState::Disconnected => {
                warn!(%call_id, "peer transport disconnected, waiting for ICE to recover")
            }
            TransportState::Failed => {
                warn!(%call_id, "peer transport failed, ending call");
                self.notify(CallNotice::TransportFailed);
                self.end_call("transport failed").await;
            }
            other => debug!(%call_id, "peer transport {other:?}"),
        }
    }

    // ---- dispatch ----

    pub async fn handle_link_event(&mut self, event: LinkEvent) -> Result<()> {
        match event {
            LinkEvent::Message(ServerMessage::AssignedIdentity { identity }) => {
                self.on_identity_assigned(identity).await;
                Ok(())
            }
            LinkEvent::Message(ServerMessage::IncomingOffer { from, signal, name }) => {
                self.on_incoming_offer(from, signal, name).await
            }
            LinkEvent::Message(ServerMessage::AnswerReceived { signal, name, from }) => {
                self.on_answer_received(signal, name, from).await
            }
            LinkEvent::Message(ServerMessage::CandidateReceived { candidate, from }) => {
                self.on_candidate_received(candidate, from).await
            }
            LinkEvent::Message(ServerMessage::CallDeclined { from, reason }) => {
                self.on_remote_declined(from, reason).await;
                Ok(())
            }
            LinkEvent::Message(ServerMessage::CallEnded { from }) => {
                self.on_remote_ended(from).await;
                Ok(())
            }
            LinkEvent::Disconnected { reason } => {
                self.on_link_lost(reason).await;
                Ok(())
            }
        }
    }

    pub async fn handle_negotiator_event(&mut self, event: NegotiatorEvent) {
        match event {
            NegotiatorEvent::LocalCandidate { call_id, candidate } => {
                self.on_local_candidate(call_id, candidate).await
            }
            NegotiatorEvent::RemoteStream { call_id, stream } => {
                self.on_remote_stream(call_id, stream)
            }
            NegotiatorEvent::RemoteTrack { call_id, track } => self.on_remote_track(call_id, track),
            NegotiatorEvent::TransportState { call_id, state } => {
                self.on_transport_state(call_id, state).await
            }
        }
    }

    // ---- internals ----

    fn require(&self, operation: &'static str, expected: CallState) -> Result<()> {
        if self.session.state == expected {
            Ok(())
        } else {
            Err(CallError::InvalidState {
                operation,
                state: self.session.state,
            })
        }
    }

    fn is_current(&self, call_id: &CallId, what: &str) -> bool {
        let current = self.session.negotiator.is_some() && &self.session.id == call_id;
        if !current {
            debug!(%call_id, "dropping stale {what}");
        }
        current
    }

    /// Creates the call's negotiator, stores it, and replays buffered candidates into it
    async fn attach_negotiator(&mut self, call_id: &CallId) -> Result<()> {
        let negotiator = self
            .factory
            .create(call_id.clone(), self.media.clone(), self.negotiator_tx.clone())
            .await?;
        self.session.negotiator = Some(negotiator);

        let buffered = self.candidates.drain(call_id);
        if buffered.is_empty() {
            return Ok(());
        }
        debug!(%call_id, count = buffered.len(), "replaying buffered remote candidates");
        if let Some(negotiator) = &self.session.negotiator {
            for candidate in buffered {
                if let Err(e) = negotiator.add_remote_candidate(candidate).await {
                    warn!(%call_id, "buffered candidate not applied: {e}");
                }
            }
        }
        Ok(())
    }

    fn is_confirmed_peer(&self, from: &Identity) -> bool {
        self.session.peer_confirmed && self.session.peer_identity.as_ref() == Some(from)
    }

    /// Tears the call down after a failed step and hands the error back
    async fn abort_call(&mut self, err: CallError, notify_peer: Option<Identity>) -> CallError {
        warn!(call_id = %self.session.id, "call setup failed: {err}");
        if let Some(peer) = notify_peer {
            self.send_teardown(ClientMessage::EndCall { to: peer }).await;
        }
        if matches!(err, CallError::Negotiation(_)) {
            self.notify(CallNotice::NegotiationFailed(err.clone()));
        }
        self.end_call("setup failed").await;
        err
    }

    /// Ended, then a fresh idle session. Closes the negotiator if there is one.
    async fn end_call(&mut self, reason: &str) {
        self.candidates.clear();
        if self.session.is_pristine() {
            return;
        }
        info!(call_id = %self.session.id, from = %self.session.state, reason, "call ended");
        // a call still being set up was never visible, so it skips Ended
        if !self.session.is_idle() {
            self.session.state = CallState::Ended;
            self.publish();
        }

        let previous = std::mem::take(&mut self.session);
        if let Some(negotiator) = previous.negotiator {
            if let Err(e) = negotiator.close().await {
                warn!(call_id = %previous.id, "negotiator close failed: {e}");
            }
        }
        if let Some(peer) = &previous.peer_identity {
            self.registry.forget(peer);
        }
        self.publish();
    }

    async fn send_teardown(&self, message: ClientMessage) {
        if !self.policy.signal_teardown {
            debug!(event = message.event_name(), "teardown signalling disabled, not sent");
            return;
        }
        if let Err(e) = self.link.send(message).await {
            warn!("failed to signal teardown: {e}");
        }
    }

    fn transition(&mut self, next: CallState) {
        info!(call_id = %self.session.id, from = %self.session.state, to = %next, "call state");
        self.session.state = next;
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }

    fn notify(&self, notice: CallNotice) {
        // no subscribers is fine
        let _ = self.notice_tx.send(notice);
    }
}
