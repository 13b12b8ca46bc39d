//! Room-scoped event fan-out for the BidRoom server.
//!
//! Every WebSocket connection owns a bounded [`mpsc`] channel whose
//! receiving end is drained by the connection's writer task. The
//! [`Broadcaster`] keeps the sending ends keyed by session id and delivers
//! an event to exactly the sessions named in a room's membership set.
//!
//! # Ordering
//!
//! Each channel is FIFO and the relay issues every broadcast while holding
//! its lock, so all members of a room observe events in the same relative
//! order.
//!
//! # Slow connections
//!
//! Sends never wait. A connection whose queue already holds
//! [`DEFAULT_CHANNEL_CAPACITY`] undelivered events is considered stale: its
//! sender is dropped, the writer task drains what is queued and exits, and
//! the connection is torn down. A client that cannot keep up reconnects and
//! receives a fresh snapshot instead of an ever-growing backlog.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashSet;
//! use bidroom_server::broadcast::Broadcaster;
//! use bidroom_server::protocol::ServerEvent;
//! use bidroom_server::types::RoomStats;
//! use tokio::sync::mpsc;
//! use uuid::Uuid;
//!
//! let mut broadcaster = Broadcaster::new();
//! let session = Uuid::new_v4();
//! let (tx, mut rx) = mpsc::channel(8);
//! broadcaster.register(session, tx);
//!
//! let delivered = broadcaster.broadcast(
//!     &HashSet::from([session]),
//!     &ServerEvent::ClientsUpdate(RoomStats::default()),
//! );
//! assert_eq!(delivered, 1);
//! assert!(rx.try_recv().is_ok());
//! ```

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::protocol::ServerEvent;
use crate::types::SessionId;

/// Default capacity of a connection's outbound queue.
///
/// This value (256) covers bursts such as a busy bidding round, where every
/// bid produces an `auction-state` and a `new-bid` for each member. A
/// connection that falls this far behind is dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Sending half of a connection's outbound queue.
pub type ConnectionTx = mpsc::Sender<ServerEvent>;

/// Receiving half of a connection's outbound queue.
pub type ConnectionRx = mpsc::Receiver<ServerEvent>;

/// Creates a connection's outbound queue with [`DEFAULT_CHANNEL_CAPACITY`].
#[must_use]
pub fn connection_channel() -> (ConnectionTx, ConnectionRx) {
    mpsc::channel(DEFAULT_CHANNEL_CAPACITY)
}

/// Outbound channels of every open connection.
#[derive(Debug, Default)]
pub struct Broadcaster {
    connections: HashMap<SessionId, ConnectionTx>,
}

impl Broadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the outbound channel of a newly opened connection.
    pub fn register(&mut self, session_id: SessionId, tx: ConnectionTx) {
        self.connections.insert(session_id, tx);
        debug!(
            session_id = %session_id,
            connections = self.connections.len(),
            "Connection registered"
        );
    }

    /// Drops the outbound channel of a closed connection.
    ///
    /// Dropping the sender lets the writer task drain what is queued and exit.
    pub fn unregister(&mut self, session_id: &SessionId) -> bool {
        let removed = self.connections.remove(session_id).is_some();
        if removed {
            debug!(
                session_id = %session_id,
                connections = self.connections.len(),
                "Connection unregistered"
            );
        }
        removed
    }

    /// Queues an event for a single session without waiting.
    ///
    /// Returns `false` if the session has no open channel. A session whose
    /// queue is full, or whose writer has gone away, is unregistered.
    pub fn send_to(&mut self, session_id: &SessionId, event: &ServerEvent) -> bool {
        let Some(tx) = self.connections.get(session_id) else {
            return false;
        };

        match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    session_id = %session_id,
                    event = event.name(),
                    capacity = DEFAULT_CHANNEL_CAPACITY,
                    "Outbound queue full, dropping slow connection"
                );
                self.unregister(session_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = %session_id, "Writer gone, dropping connection");
                self.unregister(session_id);
                false
            }
        }
    }

    /// Sends an event to every session in `members`.
    ///
    /// Members without an open channel are skipped. Returns the number of
    /// sessions the event was queued for.
    pub fn broadcast(&mut self, members: &HashSet<SessionId>, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for session_id in members {
            if self.send_to(session_id, event) {
                delivered += 1;
            } else {
                trace!(session_id = %session_id, event = event.name(), "Skipping stale member");
            }
        }

        trace!(
            event = event.name(),
            members = members.len(),
            delivered,
            "Event broadcast"
        );
        delivered
    }

    /// Number of open connections, joined to a room or not.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` while the session's outbound channel is registered.
    #[must_use]
    pub fn is_connected(&self, session_id: &SessionId) -> bool {
        self.connections.contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RoomEnded;
    use crate::types::RoomStats;
    use tokio::sync::mpsc::error::TryRecvError;
    use uuid::Uuid;

    fn connect(broadcaster: &mut Broadcaster) -> (SessionId, ConnectionRx) {
        let id = Uuid::new_v4();
        let (tx, rx) = connection_channel();
        broadcaster.register(id, tx);
        (id, rx)
    }

    fn stats_event(total: usize) -> ServerEvent {
        ServerEvent::ClientsUpdate(RoomStats {
            total,
            ..RoomStats::default()
        })
    }

    #[test]
    fn broadcaster_starts_empty() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.connection_count(), 0);
    }

    #[test]
    fn register_and_unregister_track_connections() {
        let mut broadcaster = Broadcaster::new();
        let (a, _rx_a) = connect(&mut broadcaster);
        let (_b, _rx_b) = connect(&mut broadcaster);
        assert_eq!(broadcaster.connection_count(), 2);
        assert!(broadcaster.is_connected(&a));

        assert!(broadcaster.unregister(&a));
        assert!(!broadcaster.unregister(&a));
        assert_eq!(broadcaster.connection_count(), 1);
    }

    #[test]
    fn broadcast_reaches_only_members() {
        let mut broadcaster = Broadcaster::new();
        let (a, mut rx_a) = connect(&mut broadcaster);
        let (_b, mut rx_b) = connect(&mut broadcaster);

        let delivered = broadcaster.broadcast(&HashSet::from([a]), &stats_event(1));

        assert_eq!(delivered, 1);
        assert_eq!(rx_a.try_recv().unwrap(), stats_event(1));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcast_skips_stale_members() {
        let mut broadcaster = Broadcaster::new();
        let (a, mut rx_a) = connect(&mut broadcaster);
        let (b, rx_b) = connect(&mut broadcaster);
        let never_connected = Uuid::new_v4();
        drop(rx_b);

        let delivered = broadcaster.broadcast(
            &HashSet::from([a, b, never_connected]),
            &stats_event(3),
        );

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(!broadcaster.is_connected(&b));
    }

    #[test]
    fn connection_that_stops_draining_is_dropped() {
        let mut broadcaster = Broadcaster::new();
        let (reader, mut rx_reader) = connect(&mut broadcaster);
        let (stalled, mut rx_stalled) = connect(&mut broadcaster);
        let members = HashSet::from([reader, stalled]);

        for total in 0..DEFAULT_CHANNEL_CAPACITY {
            assert_eq!(broadcaster.broadcast(&members, &stats_event(total)), 2);
            assert!(rx_reader.try_recv().is_ok());
        }
        assert!(broadcaster.is_connected(&stalled));

        let delivered = broadcaster.broadcast(&members, &stats_event(DEFAULT_CHANNEL_CAPACITY));

        assert_eq!(delivered, 1);
        assert!(!broadcaster.is_connected(&stalled));
        assert!(broadcaster.is_connected(&reader));
        assert_eq!(broadcaster.connection_count(), 1);

        // The writer still sees the queued backlog, then the closed channel.
        let mut backlog = 0;
        while rx_stalled.try_recv().is_ok() {
            backlog += 1;
        }
        assert_eq!(backlog, DEFAULT_CHANNEL_CAPACITY);
        assert!(matches!(rx_stalled.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn broadcast_with_no_members_delivers_nothing() {
        let mut broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.broadcast(&HashSet::new(), &stats_event(0)), 0);
    }

    #[tokio::test]
    async fn events_arrive_in_broadcast_order() {
        let mut broadcaster = Broadcaster::new();
        let (a, mut rx_a) = connect(&mut broadcaster);
        let (b, mut rx_b) = connect(&mut broadcaster);
        let members = HashSet::from([a, b]);

        for total in 1..=5 {
            broadcaster.broadcast(&members, &stats_event(total));
        }

        for rx in [&mut rx_a, &mut rx_b] {
            for total in 1..=5 {
                assert_eq!(rx.recv().await.unwrap(), stats_event(total));
            }
        }
    }

    #[test]
    fn send_to_targets_one_session() {
        let mut broadcaster = Broadcaster::new();
        let (a, mut rx_a) = connect(&mut broadcaster);
        let (_b, mut rx_b) = connect(&mut broadcaster);
        let event = ServerEvent::RoomEnded(RoomEnded {
            room_id: "R1".to_string(),
            message: "bye".to_string(),
        });

        assert!(broadcaster.send_to(&a, &event));
        assert_eq!(rx_a.try_recv().unwrap(), event);
        assert!(rx_b.try_recv().is_err());
        assert!(!broadcaster.send_to(&Uuid::new_v4(), &event));
    }
}
