//! Live WebSocket session registry.
//!
//! One session per device; a newer connection for the same device evicts
//! the older one (last wins). Payloads are pre-serialized JSON strings
//! pushed through bounded per-connection queues, so a slow consumer never
//! blocks fan-out to its siblings.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Clone)]
pub struct SessionHandle {
    pub user_id: Uuid,
    /// Distinguishes this connection from a successor for the same device.
    pub conn_id: Uuid,
    pub tx: mpsc::Sender<String>,
}

#[derive(Default)]
struct Inner {
    by_device: HashMap<Uuid, SessionHandle>,
    by_conn: HashMap<Uuid, Uuid>,
    user_devices: HashMap<Uuid, HashSet<Uuid>>,
}

#[derive(Default)]
pub struct SessionDirectory {
    inner: Mutex<Inner>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers a connection for a device, displacing any previous
    /// session for the same device. Returns the connection id used to
    /// unregister later.
    pub fn register(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        tx: mpsc::Sender<String>,
    ) -> Uuid {
        let conn_id = Uuid::new_v4();
        let mut inner = self.lock();

        if let Some(old) = inner.by_device.insert(
            device_id,
            SessionHandle {
                user_id,
                conn_id,
                tx,
            },
        ) {
            inner.by_conn.remove(&old.conn_id);
        }
        inner.by_conn.insert(conn_id, device_id);
        inner.user_devices.entry(user_id).or_default().insert(device_id);
        conn_id
    }

    /// Removes a connection, but only while it still owns its device slot.
    /// A stale close racing a reconnect must not evict the successor.
    /// Returns the (user, device) pair when the slot was actually freed.
    pub fn unregister(&self, conn_id: Uuid) -> Option<(Uuid, Uuid)> {
        let mut inner = self.lock();
        let device_id = inner.by_conn.remove(&conn_id)?;

        let owns_slot = inner
            .by_device
            .get(&device_id)
            .is_some_and(|handle| handle.conn_id == conn_id);
        if !owns_slot {
            return None;
        }

        let handle = inner.by_device.remove(&device_id)?;
        if let Some(devices) = inner.user_devices.get_mut(&handle.user_id) {
            devices.remove(&device_id);
            if devices.is_empty() {
                inner.user_devices.remove(&handle.user_id);
            }
        }
        Some((handle.user_id, device_id))
    }

    pub fn is_connected(&self, device_id: Uuid) -> bool {
        self.lock().by_device.contains_key(&device_id)
    }

    pub fn connected_devices(&self, user_id: Uuid) -> Vec<Uuid> {
        self.lock()
            .user_devices
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Queues a payload for one device. Returns false when the device is
    /// offline or its queue is full or closed; a dead queue is pruned.
    pub fn send_to_device(&self, device_id: Uuid, payload: &str) -> bool {
        let mut inner = self.lock();
        let Some(handle) = inner.by_device.get(&device_id) else {
            return false;
        };
        match handle.tx.try_send(payload.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let conn_id = handle.conn_id;
                let user_id = handle.user_id;
                inner.by_device.remove(&device_id);
                inner.by_conn.remove(&conn_id);
                if let Some(devices) = inner.user_devices.get_mut(&user_id) {
                    devices.remove(&device_id);
                    if devices.is_empty() {
                        inner.user_devices.remove(&user_id);
                    }
                }
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => false,
        }
    }

    /// Fans a payload out to every connected device of a user, optionally
    /// skipping one. Returns the devices that accepted the payload.
    pub fn broadcast_to_user(
        &self,
        user_id: Uuid,
        payload: &str,
        exclude_device: Option<Uuid>,
    ) -> Vec<Uuid> {
        let targets = self.connected_devices(user_id);
        let mut delivered = Vec::new();
        for device_id in targets {
            if Some(device_id) == exclude_device {
                continue;
            }
            if self.send_to_device(device_id, payload) {
                delivered.push(device_id);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(8)
    }

    #[test]
    fn register_and_broadcast_excluding_sender() {
        let sessions = SessionDirectory::new();
        let user = Uuid::new_v4();
        let (dev_a, dev_b, dev_c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        let (tx_c, mut rx_c) = channel();
        sessions.register(user, dev_a, tx_a);
        sessions.register(user, dev_b, tx_b);
        sessions.register(user, dev_c, tx_c);

        let delivered = sessions.broadcast_to_user(user, "hello", Some(dev_a));
        assert_eq!(delivered.len(), 2);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), "hello");
        assert_eq!(rx_c.try_recv().unwrap(), "hello");
    }

    #[test]
    fn reconnect_displaces_previous_session() {
        let sessions = SessionDirectory::new();
        let user = Uuid::new_v4();
        let device = Uuid::new_v4();

        let (tx_old, mut rx_old) = channel();
        let (tx_new, mut rx_new) = channel();
        let old_conn = sessions.register(user, device, tx_old);
        sessions.register(user, device, tx_new);

        assert!(sessions.send_to_device(device, "ping"));
        assert!(rx_old.try_recv().is_err());
        assert_eq!(rx_new.try_recv().unwrap(), "ping");

        // The stale close must not evict the new session.
        assert!(sessions.unregister(old_conn).is_none());
        assert!(sessions.is_connected(device));
    }

    #[test]
    fn unregister_frees_the_slot() {
        let sessions = SessionDirectory::new();
        let user = Uuid::new_v4();
        let device = Uuid::new_v4();
        let (tx, _rx) = channel();

        let conn = sessions.register(user, device, tx);
        assert_eq!(sessions.unregister(conn), Some((user, device)));
        assert!(!sessions.is_connected(device));
        assert!(sessions.connected_devices(user).is_empty());
    }

    #[test]
    fn closed_queue_is_pruned_on_send() {
        let sessions = SessionDirectory::new();
        let user = Uuid::new_v4();
        let device = Uuid::new_v4();
        let (tx, rx) = channel();

        sessions.register(user, device, tx);
        drop(rx);

        assert!(!sessions.send_to_device(device, "x"));
        assert!(!sessions.is_connected(device));
    }

    #[test]
    fn full_queue_rejects_without_pruning() {
        let sessions = SessionDirectory::new();
        let user = Uuid::new_v4();
        let device = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(1);

        sessions.register(user, device, tx);
        assert!(sessions.send_to_device(device, "first"));
        assert!(!sessions.send_to_device(device, "second"));
        // Still registered; the consumer may drain and recover.
        assert!(sessions.is_connected(device));
    }
}
