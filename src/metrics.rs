use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide counters, exposed as JSON on `/metrics`.
///
/// Counters only; anything that needs history belongs in the log
/// pipeline, not here.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    connections_total: AtomicU64,
    connections_current: AtomicU64,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    frames_dropped: AtomicU64,
    rooms_created: AtomicU64,
    rooms_closed: AtomicU64,
    room_commands: AtomicU64,
    errors_sent: AtomicU64,
    auth_failures: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_current: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub frames_dropped: u64,
    pub rooms_created: u64,
    pub rooms_closed: u64,
    pub rooms_current: u64,
    pub room_commands: u64,
    pub errors_sent: u64,
    pub auth_failures: u64,
}

impl ServerMetrics {
    pub fn increment_connections(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_current.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_connections(&self) {
        // Saturating: an identity-mismatched unregister must not wrap.
        let _ = self
            .connections_current
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn increment_frames_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_frames_out(&self) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_frames_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rooms_created(&self) {
        self.rooms_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rooms_closed(&self) {
        self.rooms_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_room_commands(&self) {
        self.room_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors_sent(&self) {
        self.errors_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_auth_failures(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, rooms_current: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_current: self.connections_current.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
            rooms_closed: self.rooms_closed.load(Ordering::Relaxed),
            rooms_current: rooms_current as u64,
            room_commands: self.room_commands.load(Ordering::Relaxed),
            errors_sent: self.errors_sent.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_connections_never_wrap_below_zero() {
        let metrics = ServerMetrics::default();
        metrics.increment_connections();
        metrics.decrement_connections();
        metrics.decrement_connections();
        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.connections_current, 0);
        assert_eq!(snapshot.connections_total, 1);
    }
}
