//! Runtime API (§4.L): `ensure_runtime`, `emit`/`on`, `spawn`/`stop`,
//! `submit_task`, `report_progress`/`report_result`, and
//! `register_prompt_macro`. Programs embed a `crate::program::Program`
//! rather than inheriting from a base class, per §9's "data-driven, not
//! inheritance" dispatch note.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tracing::info;

use crate::bus::EventBus;
use crate::config::RetrievalConfig;
use crate::program::{new_program_id, Program};
use crate::registry::Registry;
use crate::supervisor::Supervisor;
use crate::types::Task;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type TaskHandler = Arc<dyn Fn(Arc<Runtime>, Task) -> BoxFuture + Send + Sync>;
pub type PromptMacroHandler = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Runtime-wide back-pressure state (§5 "Back-pressure"). `throttle` pauses
/// acceptance of new conversation-driven tasks; `pulse` is a countdown of
/// remaining task admissions — when it hits zero the runtime either
/// soft-throttles (default) or requests shutdown (opt-in).
struct Backpressure {
    throttled: AtomicBool,
    pulse: AtomicI64,
    shutdown_on_depletion: AtomicBool,
}

impl Default for Backpressure {
    fn default() -> Self {
        Self { throttled: AtomicBool::new(false), pulse: AtomicI64::new(-1), shutdown_on_depletion: AtomicBool::new(false) }
    }
}

pub struct Runtime {
    pub bus: EventBus,
    pub registry: Arc<Registry>,
    supervisor: Supervisor,
    config: RetrievalConfig,
    task_handlers: DashMap<String, TaskHandler>,
    prompt_macros: DashMap<String, PromptMacroHandler>,
    backpressure: Backpressure,
}

static RUNTIME: OnceLock<Arc<Runtime>> = OnceLock::new();

/// Idempotent runtime initialization (§4.L, testable property 7): the first
/// call builds the bus, registry, and supervisor and installs the
/// `program.log` -> `tracing` bridge; every later call returns the same
/// instance. "Prewarming external HTTP clients" has no counterpart in this
/// crate's scope (the LLM provider client is an external collaborator per
/// §1) so this only does the parts owned by the retrieval/runtime core.
pub fn ensure_runtime(config: RetrievalConfig) -> Arc<Runtime> {
    RUNTIME
        .get_or_init(|| {
            let bus = EventBus::new();
            let registry = Arc::new(Registry::new());
            let supervisor =
                Supervisor::spawn(bus.clone(), registry.clone(), Duration::from_secs(config.runtime_heartbeat_sec));
            install_log_bridge(&bus);
            Arc::new(Runtime {
                bus,
                registry,
                supervisor,
                config,
                task_handlers: DashMap::new(),
                prompt_macros: DashMap::new(),
                backpressure: Backpressure::default(),
            })
        })
        .clone()
}

fn install_log_bridge(bus: &EventBus) {
    bus.subscribe(
        "program.log",
        Arc::new(|payload: Value| {
            let level = payload.get("level").and_then(|v| v.as_str()).unwrap_or("info");
            let msg = payload.get("msg").and_then(|v| v.as_str()).unwrap_or("");
            match level {
                "error" => tracing::error!(target: "program", "{msg}"),
                "warn" => tracing::warn!(target: "program", "{msg}"),
                "debug" => tracing::debug!(target: "program", "{msg}"),
                _ => tracing::info!(target: "program", "{msg}"),
            }
        }),
    );
}

impl Runtime {
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// `emit(topic, payload)`.
    pub fn emit(&self, topic: &str, payload: Value) {
        self.bus.publish(topic, payload);
    }

    /// `on(topic, handler)`.
    pub fn on(&self, topic: &str, handler: crate::bus::Handler) {
        self.bus.subscribe(topic, handler);
    }

    /// Register a program that owns task names under `prefixes` (e.g.
    /// `["patch", "dump", "refactor"]` for the patcher), start its 1Hz
    /// heartbeat loop, and publish `program.spawn`.
    pub fn spawn(self: &Arc<Self>, program: Arc<Program>, prefixes: &[&str], handler: TaskHandler) {
        self.registry.register(program.clone());
        self.supervisor.note_seen(program.id());
        for prefix in prefixes {
            self.task_handlers.insert(prefix.to_string(), handler.clone());
        }
        self.bus.publish(
            "program.spawn",
            serde_json::json!({ "id": program.id(), "name": program.name() }),
        );
        self.spawn_heartbeat_loop(program);
    }

    fn spawn_heartbeat_loop(self: &Arc<Self>, program: Arc<Program>) {
        let bus = self.bus.clone();
        let interval = Duration::from_secs(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while program.is_alive() {
                ticker.tick().await;
                if !program.is_alive() {
                    break;
                }
                bus.publish("program.heartbeat", serde_json::json!({ "id": program.id() }));
            }
        });
    }

    /// `stop(id)`: mark the program dead and announce a clean exit.
    pub fn stop(&self, id: &str) {
        if let Some(program) = self.registry.get(id) {
            program.mark_exited();
        }
        self.registry.unregister(id);
        self.bus.publish("program.exit", serde_json::json!({ "id": id, "ok": true }));
    }

    pub fn list_programs(&self) -> Vec<crate::types::ProgramInfo> {
        self.registry.list()
    }

    pub fn set_throttle(&self, throttled: bool) {
        self.backpressure.throttled.store(throttled, Ordering::SeqCst);
    }

    pub fn is_throttled(&self) -> bool {
        self.backpressure.throttled.load(Ordering::SeqCst)
    }

    pub fn set_pulse_budget(&self, budget: i64) {
        self.backpressure.pulse.store(budget, Ordering::SeqCst);
    }

    pub fn set_shutdown_on_pulse_depletion(&self, on: bool) {
        self.backpressure.shutdown_on_depletion.store(on, Ordering::SeqCst);
    }

    /// Consume one unit of pulse budget; `true` if admission should proceed.
    /// A negative budget means unlimited. When depleted, soft-throttles
    /// (sets `throttled`) unless configured to request shutdown instead.
    fn consume_pulse(&self) -> bool {
        let remaining = self.backpressure.pulse.load(Ordering::SeqCst);
        if remaining < 0 {
            return true;
        }
        if remaining == 0 {
            if self.backpressure.shutdown_on_depletion.load(Ordering::SeqCst) {
                self.bus.publish("program.log", serde_json::json!({"level": "warn", "msg": "pulse depleted; shutdown requested"}));
            } else {
                self.set_throttle(true);
            }
            return false;
        }
        self.backpressure.pulse.fetch_sub(1, Ordering::SeqCst);
        true
    }

    /// `submit_task(name, args, kwargs) -> task_id`. Publishes exactly one
    /// `task.request`, dispatches to the handler registered for the task's
    /// name prefix (e.g. `patch.write` -> the `patch` prefix), and lets that
    /// handler emit progress/result. Throttled or pulse-depleted submissions
    /// still get exactly one `task.result` (testable property 5), reporting
    /// failure instead of running the handler.
    pub fn submit_task(
        self: &Arc<Self>,
        name: impl Into<String>,
        args: Vec<Value>,
        kwargs: HashMap<String, Value>,
    ) -> String {
        let name = name.into();
        let task = Task { id: new_program_id(), name: name.clone(), args, kwargs };
        self.bus.publish(
            "task.request",
            serde_json::json!({ "id": task.id, "name": task.name, "args": task.args, "kwargs": task.kwargs }),
        );

        if self.is_throttled() || !self.consume_pulse() {
            self.report_result(&task.id, false, None, Some("throttled".to_string()));
            return task.id;
        }

        let prefix = task.name.split('.').next().unwrap_or("").to_string();
        let handler = self.task_handlers.get(&prefix).map(|h| h.clone());
        let runtime = self.clone();
        let task_id = task.id.clone();
        match handler {
            Some(handler) => {
                tokio::spawn(async move {
                    handler(runtime, task).await;
                });
            }
            None => {
                self.report_result(&task_id, false, None, Some(format!("no program registered for '{prefix}'")));
            }
        }
        task_id
    }

    pub fn report_progress(&self, task_id: &str, pct: u8, msg: impl AsRef<str>) {
        self.bus.publish(
            "task.progress",
            serde_json::json!({ "id": task_id, "pct": pct, "msg": msg.as_ref() }),
        );
    }

    pub fn report_result(&self, task_id: &str, ok: bool, result: Option<Value>, error: Option<String>) {
        self.bus.publish(
            "task.result",
            serde_json::json!({ "id": task_id, "ok": ok, "result": result, "error": error }),
        );
    }

    pub fn register_prompt_macro(&self, namespace: impl Into<String>, handler: PromptMacroHandler) {
        self.prompt_macros.insert(namespace.into(), handler);
    }

    pub fn render_prompt_macro(&self, namespace: &str, arg: &str) -> Option<String> {
        self.prompt_macros.get(namespace).map(|h| h(arg))
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        info!("retrieval runtime dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> RetrievalConfig {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RetrievalConfig::load(dir.path()).unwrap();
        std::mem::forget(dir);
        cfg
    }

    #[tokio::test]
    async fn submit_task_dispatches_to_registered_prefix_handler() {
        let rt = Arc::new(Runtime {
            bus: EventBus::new(),
            registry: Arc::new(Registry::new()),
            supervisor: Supervisor::spawn(EventBus::new(), Arc::new(Registry::new()), Duration::from_secs(5)),
            config: test_config(),
            task_handlers: DashMap::new(),
            prompt_macros: DashMap::new(),
            backpressure: Backpressure::default(),
        });

        let called = Arc::new(AtomicUsize::new(0));
        let called2 = called.clone();
        let handler: TaskHandler = Arc::new(move |rt, task| {
            let called = called2.clone();
            Box::pin(async move {
                called.fetch_add(1, Ordering::SeqCst);
                rt.report_result(&task.id, true, None, None);
            })
        });
        rt.task_handlers.insert("patch".to_string(), handler);

        let results = Arc::new(std::sync::Mutex::new(Vec::new()));
        let results2 = results.clone();
        rt.bus.subscribe(
            "task.result",
            Arc::new(move |payload| {
                results2.lock().unwrap().push(payload);
            }),
        );

        let id = rt.submit_task("patch.write", vec![], HashMap::new());
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(called.load(Ordering::SeqCst), 1);
        let results = results.lock().unwrap();
        assert!(results.iter().any(|r| r.get("id").and_then(|v| v.as_str()) == Some(id.as_str())));
    }

    #[tokio::test]
    async fn throttled_runtime_still_emits_exactly_one_result() {
        let rt = Arc::new(Runtime {
            bus: EventBus::new(),
            registry: Arc::new(Registry::new()),
            supervisor: Supervisor::spawn(EventBus::new(), Arc::new(Registry::new()), Duration::from_secs(5)),
            config: test_config(),
            task_handlers: DashMap::new(),
            prompt_macros: DashMap::new(),
            backpressure: Backpressure::default(),
        });
        rt.set_throttle(true);

        let results = Arc::new(std::sync::Mutex::new(Vec::new()));
        let results2 = results.clone();
        rt.bus.subscribe(
            "task.result",
            Arc::new(move |payload| {
                results2.lock().unwrap().push(payload);
            }),
        );

        rt.submit_task("patch.write", vec![], HashMap::new());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("ok").and_then(|v| v.as_bool()), Some(false));
    }

    #[test]
    fn prompt_macro_roundtrips() {
        let rt = Runtime {
            bus: EventBus::new(),
            registry: Arc::new(Registry::new()),
            supervisor: Supervisor::spawn(EventBus::new(), Arc::new(Registry::new()), Duration::from_secs(5)),
            config: test_config(),
            task_handlers: DashMap::new(),
            prompt_macros: DashMap::new(),
            backpressure: Backpressure::default(),
        };
        rt.register_prompt_macro("greet", Arc::new(|arg| format!("hello {arg}")));
        assert_eq!(rt.render_prompt_macro("greet", "world").as_deref(), Some("hello world"));
        assert!(rt.render_prompt_macro("missing", "x").is_none());
    }
}
