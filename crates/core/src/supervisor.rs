//! Heartbeat watchdog (§4.I): subscribes to `program.heartbeat`, tracks
//! last-seen timestamps, and every `heartbeat_ttl / 2` publishes
//! `program.exit { ok: false }` for any program that has gone stale beyond
//! `heartbeat_ttl` (default 5s).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::bus::EventBus;
use crate::registry::Registry;

pub struct Supervisor {
    bus: EventBus,
    registry: Arc<Registry>,
    last_seen: Arc<DashMap<String, Instant>>,
    ttl: Duration,
}

impl Supervisor {
    /// Subscribe to `program.heartbeat` and start the watchdog loop as a
    /// background task. Returns a handle that can also be used to seed a
    /// just-spawned program's last-seen time before its first heartbeat.
    pub fn spawn(bus: EventBus, registry: Arc<Registry>, ttl: Duration) -> Self {
        let last_seen: Arc<DashMap<String, Instant>> = Arc::new(DashMap::new());

        let seen_for_sub = last_seen.clone();
        bus.subscribe(
            "program.heartbeat",
            Arc::new(move |payload| {
                if let Some(id) = payload.get("id").and_then(|v| v.as_str()) {
                    seen_for_sub.insert(id.to_string(), Instant::now());
                }
            }),
        );

        let sup = Self { bus, registry, last_seen, ttl };
        sup.spawn_watchdog_loop();
        sup
    }

    /// Record that `id` is alive right now — called when a program is
    /// spawned, so it isn't immediately flagged stale before its first
    /// heartbeat tick.
    pub fn note_seen(&self, id: &str) {
        self.last_seen.insert(id.to_string(), Instant::now());
    }

    fn spawn_watchdog_loop(&self) {
        let bus = self.bus.clone();
        let registry = self.registry.clone();
        let last_seen = self.last_seen.clone();
        let ttl = self.ttl;
        let period = (ttl / 2).max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                for id in registry.alive_ids() {
                    let stale = match last_seen.get(&id) {
                        Some(t) => now.duration_since(*t) > ttl,
                        None => true,
                    };
                    if !stale {
                        continue;
                    }
                    if let Some(program) = registry.get(&id) {
                        program.mark_exited();
                    }
                    bus.publish("program.exit", serde_json::json!({ "id": id, "ok": false }));
                    last_seen.remove(&id);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    #[tokio::test]
    async fn stale_program_is_marked_exited_and_announced() {
        let bus = EventBus::new();
        let registry = Arc::new(Registry::new());
        let program = Program::new("patcher");
        let id = program.id().to_string();
        registry.register(program.clone());

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received2 = received.clone();
        bus.subscribe(
            "program.exit",
            Arc::new(move |payload| {
                received2.lock().unwrap().push(payload);
            }),
        );

        let _sup = Supervisor::spawn(bus, registry.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(!program.is_alive());
        let events = received.lock().unwrap();
        assert!(events.iter().any(|e| e.get("id").and_then(|v| v.as_str()) == Some(id.as_str())));
    }

    #[tokio::test]
    async fn heartbeating_program_stays_alive() {
        let bus = EventBus::new();
        let registry = Arc::new(Registry::new());
        let program = Program::new("verifier");
        let id = program.id().to_string();
        registry.register(program.clone());

        let sup = Supervisor::spawn(bus.clone(), registry.clone(), Duration::from_millis(40));
        sup.note_seen(&id);

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            bus.publish("program.heartbeat", serde_json::json!({ "id": id }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(program.is_alive());
    }
}
