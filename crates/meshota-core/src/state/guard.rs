//! Reentrancy guard for outstanding connection/discovery requests.

use std::sync::Mutex;

/// Requests that must not be issued twice concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingRequest {
    Connection,
    ComponentMetadata,
}

#[derive(Debug, Default)]
struct Flags {
    connection: bool,
    component_metadata: bool,
}

impl Flags {
    fn slot(&mut self, request: PendingRequest) -> &mut bool {
        match request {
            PendingRequest::Connection => &mut self.connection,
            PendingRequest::ComponentMetadata => &mut self.component_metadata,
        }
    }
}

/// One lock around the "already outstanding" checks.
#[derive(Debug, Default)]
pub struct RequestGuard {
    flags: Mutex<Flags>,
}

impl RequestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `request` outstanding. Returns false if it already was.
    pub fn try_begin(&self, request: PendingRequest) -> bool {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        let slot = flags.slot(request);
        if *slot {
            return false;
        }
        *slot = true;
        true
    }

    /// Clear `request`. Returns whether it was outstanding.
    pub fn finish(&self, request: PendingRequest) -> bool {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(flags.slot(request), false)
    }

    pub fn is_outstanding(&self, request: PendingRequest) -> bool {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        *flags.slot(request)
    }

    pub fn clear(&self) {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        *flags = Flags::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_second_begin_rejected() {
        let guard = RequestGuard::new();
        assert!(guard.try_begin(PendingRequest::ComponentMetadata));
        assert!(!guard.try_begin(PendingRequest::ComponentMetadata));
        assert!(guard.try_begin(PendingRequest::Connection));
        assert!(guard.finish(PendingRequest::ComponentMetadata));
        assert!(!guard.finish(PendingRequest::ComponentMetadata));
        assert!(guard.try_begin(PendingRequest::ComponentMetadata));
    }

    #[test]
    fn test_only_one_thread_wins() {
        let guard = Arc::new(RequestGuard::new());
        let winners: usize = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                thread::spawn(move || guard.try_begin(PendingRequest::Connection))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }
}
