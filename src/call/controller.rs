//! Serial execution context for the state machine. User intents, link events
//! and negotiator callbacks all funnel through one task; while an intent is
//! suspended on negotiation the only thing that can interrupt it is a hang-up.

use crate::call::events::CallNotice;
use crate::call::machine::CallStateMachine;
use crate::error::{CallError, Result};
use crate::identity::RoomToken;
use crate::peer::types::NegotiatorEvent;
use crate::session::{CallSnapshot, CallState};
use crate::signaling::link::LinkEvent;
use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum Command {
    CreateRoom {
        display_name: String,
        reply: oneshot::Sender<Result<RoomToken>>,
    },
    SetDisplayName {
        display_name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    InitiateCall {
        target: String,
        display_name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    AcceptCall {
        reply: oneshot::Sender<Result<()>>,
    },
    DeclineCall {
        reply: oneshot::Sender<Result<()>>,
    },
    HangUp {
        reply: oneshot::Sender<()>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::CreateRoom { .. } => "create_room",
            Command::SetDisplayName { .. } => "set_display_name",
            Command::InitiateCall { .. } => "initiate_call",
            Command::AcceptCall { .. } => "accept_call",
            Command::DeclineCall { .. } => "decline_call",
            Command::HangUp { .. } => "hang_up",
            Command::Reset { .. } => "reset",
        }
    }
}

enum Guarded<T> {
    Done(Result<T>),
    /// A hang-up arrived first; the step was dropped
    HungUp(oneshot::Sender<()>),
}

/// Drives `step` to completion unless a hang-up arrives first.
/// Any other command received meanwhile is deferred in order.
async fn guard<T, F>(
    step: F,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    deferred: &mut VecDeque<Command>,
) -> Guarded<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::pin!(step);
    let mut commands_open = true;
    loop {
        tokio::select! {
            biased;
            outcome = &mut step => return Guarded::Done(outcome),
            command = commands.recv(), if commands_open => match command {
                Some(Command::HangUp { reply }) => return Guarded::HungUp(reply),
                Some(other) => {
                    debug!(command = other.name(), "deferring until the current step finishes");
                    deferred.push_back(other);
                }
                None => commands_open = false,
            },
        }
    }
}

pub struct CallController {
    machine: CallStateMachine,
    commands: mpsc::UnboundedReceiver<Command>,
    negotiator_events: mpsc::UnboundedReceiver<NegotiatorEvent>,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    deferred: VecDeque<Command>,
}

impl CallController {
    pub fn new(
        machine: CallStateMachine,
        negotiator_events: mpsc::UnboundedReceiver<NegotiatorEvent>,
        link_events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> (Self, CallHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = CallHandle {
            commands: command_tx,
            state: machine.subscribe(),
            notices: machine.notice_sender(),
        };
        let controller = Self {
            machine,
            commands: command_rx,
            negotiator_events,
            link_events,
            deferred: VecDeque::new(),
        };
        (controller, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until every [`CallHandle`] is dropped, then hangs up
    pub async fn run(mut self) {
        info!("call controller started");
        let mut link_open = true;
        loop {
            if let Some(command) = self.deferred.pop_front() {
                self.execute(command).await;
                continue;
            }

            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.execute(command).await,
                    None => break,
                },
                event = self.link_events.recv(), if link_open => match event {
                    Some(event) => {
                        if let Err(e) = self.machine.handle_link_event(event).await {
                            warn!("signaling event failed: {e}");
                        }
                    }
                    None => {
                        link_open = false;
                        if self.machine.registry().local().is_some() {
                            self.machine.on_link_lost("link event stream closed".into()).await;
                        }
                    }
                },
                Some(event) = self.negotiator_events.recv() => {
                    self.machine.handle_negotiator_event(event).await;
                }
            }
        }
        self.machine.hang_up().await;
        info!("call controller stopped");
    }

    async fn execute(&mut self, command: Command) {
        debug!(command = command.name(), "executing");
        match command {
            Command::CreateRoom {
                display_name,
                reply,
            } => {
                let outcome = guard(
                    self.machine.create_room(&display_name),
                    &mut self.commands,
                    &mut self.deferred,
                )
                .await;
                self.settle(outcome, reply).await;
            }
            Command::SetDisplayName {
                display_name,
                reply,
            } => {
                let _ = reply.send(self.machine.set_display_name(&display_name));
            }
            Command::InitiateCall {
                target,
                display_name,
                reply,
            } => {
                let outcome = guard(
                    self.machine.initiate_call(&target, &display_name),
                    &mut self.commands,
                    &mut self.deferred,
                )
                .await;
                self.settle(outcome, reply).await;
            }
            Command::AcceptCall { reply } => {
                let outcome = guard(
                    self.machine.accept_call(),
                    &mut self.commands,
                    &mut self.deferred,
                )
                .await;
                self.settle(outcome, reply).await;
            }
            Command::DeclineCall { reply } => {
                let outcome = guard(
                    self.machine.decline_call(),
                    &mut self.commands,
                    &mut self.deferred,
                )
                .await;
                self.settle(outcome, reply).await;
            }
            Command::HangUp { reply } => {
                self.machine.hang_up().await;
                let _ = reply.send(());
            }
            Command::Reset { reply } => {
                self.machine.reset().await;
                let _ = reply.send(());
            }
        }
    }

    async fn settle<T>(&mut self, outcome: Guarded<T>, reply: oneshot::Sender<Result<T>>) {
        match outcome {
            Guarded::Done(result) => {
                let _ = reply.send(result);
            }
            Guarded::HungUp(hang_up_reply) => {
                info!("hang-up cancelled an in-flight step");
                let _ = reply.send(Err(CallError::Cancelled));
                self.machine.hang_up().await;
                let _ = hang_up_reply.send(());
            }
        }
    }
}

/// Presentation-layer interface to a running controller
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<CallSnapshot>,
    notices: broadcast::Sender<CallNotice>,
}

fn controller_stopped() -> CallError {
    CallError::Link("call controller has stopped".into())
}

impl CallHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| controller_stopped())?;
        rx.await.map_err(|_| controller_stopped())?
    }

    pub async fn create_room(&self, display_name: impl Into<String>) -> Result<RoomToken> {
        let display_name = display_name.into();
        self.request(|reply| Command::CreateRoom {
            display_name,
            reply,
        })
        .await
    }

    pub async fn set_display_name(&self, display_name: impl Into<String>) -> Result<()> {
        let display_name = display_name.into();
        self.request(|reply| Command::SetDisplayName {
            display_name,
            reply,
        })
        .await
    }

    pub async fn initiate_call(
        &self,
        target: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<()> {
        let target = target.into();
        let display_name = display_name.into();
        self.request(|reply| Command::InitiateCall {
            target,
            display_name,
            reply,
        })
        .await
    }

    pub async fn accept_call(&self) -> Result<()> {
        self.request(|reply| Command::AcceptCall { reply }).await
    }

    pub async fn decline_call(&self) -> Result<()> {
        self.request(|reply| Command::DeclineCall { reply }).await
    }

    pub async fn hang_up(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::HangUp { reply })
            .map_err(|_| controller_stopped())?;
        rx.await.map_err(|_| controller_stopped())
    }

    pub async fn reset(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Reset { reply })
            .map_err(|_| controller_stopped())?;
        rx.await.map_err(|_| controller_stopped())
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.state.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<CallNotice> {
        self.notices.subscribe()
    }

    /// Resolves with the first snapshot in `state`, including the current one
    pub async fn wait_for_state(&self, state: CallState) -> Result<CallSnapshot> {
        let mut rx = self.state.clone();
        let snapshot = rx
            .wait_for(|snapshot| snapshot.state == state)
            .await
            .map_err(|_| controller_stopped())?;
        Ok(snapshot.clone())
    }
}
