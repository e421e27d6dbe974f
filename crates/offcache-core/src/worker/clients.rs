use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// An open page talking to the intermediary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Open clients and the bucket name of the worker controlling each one.
#[derive(Default)]
pub struct ClientRegistry {
    next_id: AtomicU64,
    clients: Mutex<HashMap<ClientId, Option<String>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, Option<String>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open(&self, controller: Option<&str>) -> ClientId {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().insert(id, controller.map(str::to_string));
        id
    }

    pub fn close(&self, id: ClientId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn controller(&self, id: ClientId) -> Option<String> {
        self.lock().get(&id).cloned().flatten()
    }

    /// Move every client controlled by `from` over to `to`.
    pub fn handover(&self, from: &str, to: &str) -> usize {
        let mut clients = self.lock();
        let mut moved = 0;
        for controller in clients.values_mut() {
            if controller.as_deref() == Some(from) {
                *controller = Some(to.to_string());
                moved += 1;
            }
        }
        moved
    }

    /// Put every open client under `to`. Returns how many changed controller.
    pub fn claim(&self, to: &str) -> usize {
        let mut clients = self.lock();
        let mut claimed = 0;
        for controller in clients.values_mut() {
            if controller.as_deref() != Some(to) {
                *controller = Some(to.to_string());
                claimed += 1;
            }
        }
        claimed
    }

    pub fn controlled_by(&self, name: &str) -> usize {
        self.lock()
            .values()
            .filter(|c| c.as_deref() == Some(name))
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_close() {
        let clients = ClientRegistry::new();
        let a = clients.open(None);
        let b = clients.open(Some("app-v1"));
        assert_ne!(a, b);
        assert_eq!(clients.len(), 2);
        assert_eq!(clients.controller(a), None);
        assert_eq!(clients.controller(b).as_deref(), Some("app-v1"));

        assert!(clients.close(a));
        assert!(!clients.close(a));
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn test_handover_only_moves_matching_clients() {
        let clients = ClientRegistry::new();
        clients.open(Some("app-v1"));
        clients.open(Some("app-v1"));
        let free = clients.open(None);

        assert_eq!(clients.handover("app-v1", "app-v2"), 2);
        assert_eq!(clients.controlled_by("app-v2"), 2);
        assert_eq!(clients.controller(free), None);
    }

    #[test]
    fn test_claim_takes_every_client() {
        let clients = ClientRegistry::new();
        clients.open(None);
        clients.open(Some("app-v1"));
        clients.open(Some("app-v2"));

        assert_eq!(clients.claim("app-v2"), 2);
        assert_eq!(clients.controlled_by("app-v2"), 3);
        assert_eq!(clients.claim("app-v2"), 0);
    }

    #[test]
    fn test_client_id_display() {
        let clients = ClientRegistry::new();
        assert_eq!(clients.open(None).to_string(), "client-1");
    }
}
