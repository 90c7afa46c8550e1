//! Single-occupancy connection slot
//!
//! The relay serves exactly one chat client. The slot owns the outbound
//! channel of whichever connection currently holds it; frames addressed to
//! "the client" go through [`ConnectionSlot::send`].

use crate::config::SlotPolicy;
use crate::protocol::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};

/// Identifies one accepted WebSocket connection
pub type ConnectionId = u64;

/// Message for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    /// Close the socket and stop writing
    Close,
}

/// Handle to a connection's writer task
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, tx }
    }

    /// Queue a frame; false if the writer is gone
    pub fn send(&self, frame: Frame) -> bool {
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Outcome of [`ConnectionSlot::admit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Slot was free
    Accepted,
    /// Slot was taken; the previous occupant has been told to close
    Displaced { previous: ConnectionId },
    /// Slot was taken; the newcomer must be turned away
    Rejected { occupant: ConnectionId },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

/// Holds at most one live connection
pub struct ConnectionSlot {
    policy: SlotPolicy,
    occupant: RwLock<Option<ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionSlot {
    pub fn new(policy: SlotPolicy) -> Self {
        Self {
            policy,
            occupant: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> SlotPolicy {
        self.policy
    }

    /// Allocate an id for a freshly upgraded connection
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Try to place `handle` in the slot according to the slot policy.
    ///
    /// An occupant whose writer has already gone away counts as vacant.
    pub async fn admit(&self, handle: ConnectionHandle) -> Admission {
        let mut occupant = self.occupant.write().await;

        match occupant.as_ref() {
            Some(current) if current.is_open() => match self.policy {
                SlotPolicy::Displace => {
                    let previous = current.id;
                    current.close();
                    *occupant = Some(handle);
                    Admission::Displaced { previous }
                }
                SlotPolicy::Reject => Admission::Rejected {
                    occupant: current.id,
                },
            },
            _ => {
                *occupant = Some(handle);
                Admission::Accepted
            }
        }
    }

    /// Vacate the slot if `id` holds it. Returns whether anything changed.
    pub async fn release(&self, id: ConnectionId) -> bool {
        let mut occupant = self.occupant.write().await;
        match occupant.as_ref() {
            Some(current) if current.id == id => {
                *occupant = None;
                true
            }
            _ => false,
        }
    }

    /// Send a frame to the current occupant; false when nobody is listening
    pub async fn send(&self, frame: Frame) -> bool {
        match self.occupant.read().await.as_ref() {
            Some(current) => current.send(frame),
            None => false,
        }
    }

    /// Id of the current occupant
    pub async fn occupant(&self) -> Option<ConnectionId> {
        self.occupant
            .read()
            .await
            .as_ref()
            .filter(|c| c.is_open())
            .map(|c| c.id)
    }

    pub async fn is_occupied(&self) -> bool {
        self.occupant().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(slot: &ConnectionSlot) -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(slot.next_connection_id(), tx), rx)
    }

    #[tokio::test]
    async fn test_first_connection_accepted() {
        let slot = ConnectionSlot::new(SlotPolicy::Displace);
        let (conn, _rx) = connection(&slot);
        let id = conn.id;

        assert_eq!(slot.admit(conn).await, Admission::Accepted);
        assert_eq!(slot.occupant().await, Some(id));
    }

    #[tokio::test]
    async fn test_displace_closes_previous() {
        let slot = ConnectionSlot::new(SlotPolicy::Displace);
        let (first, mut first_rx) = connection(&slot);
        let (second, _second_rx) = connection(&slot);
        let (first_id, second_id) = (first.id, second.id);

        slot.admit(first).await;
        let admission = slot.admit(second).await;

        assert_eq!(admission, Admission::Displaced { previous: first_id });
        assert_eq!(first_rx.recv().await, Some(Outbound::Close));
        assert_eq!(slot.occupant().await, Some(second_id));
    }

    #[tokio::test]
    async fn test_reject_keeps_occupant() {
        let slot = ConnectionSlot::new(SlotPolicy::Reject);
        let (first, mut first_rx) = connection(&slot);
        let (second, _second_rx) = connection(&slot);
        let first_id = first.id;

        slot.admit(first).await;
        let admission = slot.admit(second).await;

        assert_eq!(admission, Admission::Rejected { occupant: first_id });
        assert!(!admission.is_admitted());
        assert_eq!(slot.occupant().await, Some(first_id));
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_release_only_by_occupant() {
        let slot = ConnectionSlot::new(SlotPolicy::Displace);
        let (first, _first_rx) = connection(&slot);
        let (second, _second_rx) = connection(&slot);
        let (first_id, second_id) = (first.id, second.id);

        slot.admit(first).await;
        slot.admit(second).await;

        // The displaced socket closing must not evict its successor
        assert!(!slot.release(first_id).await);
        assert_eq!(slot.occupant().await, Some(second_id));

        assert!(slot.release(second_id).await);
        assert!(!slot.is_occupied().await);
    }

    #[tokio::test]
    async fn test_dead_occupant_counts_as_vacant() {
        let slot = ConnectionSlot::new(SlotPolicy::Reject);
        let (first, first_rx) = connection(&slot);
        let (second, _second_rx) = connection(&slot);
        slot.admit(first).await;
        drop(first_rx);

        assert!(!slot.is_occupied().await);
        assert_eq!(slot.admit(second).await, Admission::Accepted);
    }

    #[tokio::test]
    async fn test_at_most_one_occupant_over_many_attempts() {
        let slot = ConnectionSlot::new(SlotPolicy::Displace);
        let mut receivers = Vec::new();
        let mut last_id = 0;

        for _ in 0..50 {
            let (conn, rx) = connection(&slot);
            last_id = conn.id;
            slot.admit(conn).await;
            receivers.push(rx);
        }

        assert_eq!(slot.occupant().await, Some(last_id));

        // Every earlier connection was told to close, the last one was not
        let (last_rx, earlier) = receivers.split_last_mut().unwrap();
        for rx in earlier {
            assert_eq!(rx.try_recv(), Ok(Outbound::Close));
        }
        assert!(last_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_goes_to_occupant() {
        let slot = ConnectionSlot::new(SlotPolicy::Displace);
        assert!(!slot.send(Frame::TypingStart).await);

        let (conn, mut rx) = connection(&slot);
        slot.admit(conn).await;
        assert!(slot.send(Frame::chat_response("Hello")).await);
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Frame(Frame::chat_response("Hello")))
        );
    }
}
