use tokio::sync::{mpsc, oneshot};

use meshcall_common::{CallId, ParticipantUpdate, SessionError, SlotIndex};

use super::controller::Command;
use crate::negotiator::LinkState;

/// Control surface of a running [`MeshController`](super::MeshController).
///
/// Clones share the controller. Once every clone is dropped the controller
/// stops without telling anyone, the same way a crashed process would.
#[derive(Clone)]
pub struct MeshHandle {
    call: CallId,
    slot: SlotIndex,
    commands: mpsc::Sender<Command>,
}

impl MeshHandle {
    pub(super) fn new(call: CallId, slot: SlotIndex, commands: mpsc::Sender<Command>) -> Self {
        Self {
            call,
            slot,
            commands,
        }
    }

    pub fn call(&self) -> &CallId {
        &self.call
    }

    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Whether the controller is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Close every link, leave the roster and stop. Succeeds trivially if
    /// the controller already stopped.
    pub async fn hangup(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Hangup { reply }).await.is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Best-effort departure bounded by the flush timeout, then release.
    pub async fn terminate(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Terminate { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Report that the process went to the background or came back.
    pub async fn set_visibility(&self, hidden: bool) {
        let _ = self.commands.send(Command::SetVisibility { hidden }).await;
    }

    /// Visible remote participants, ordered by slot.
    pub async fn participants(&self) -> Vec<ParticipantUpdate> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Participants { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// State of every live link, ordered by remote slot.
    pub async fn link_states(&self) -> Vec<(SlotIndex, LinkState)> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::LinkStates { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}
