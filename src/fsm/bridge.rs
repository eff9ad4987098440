use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::json;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::fsm::chart::Chart;
use crate::fsm::interpreter::{FsmIo, Interpreter, ScheduledAfter, StepEffects};
use crate::runtime::task::{Command, Task};
use crate::runtime::timers::TimerRegistry;
use crate::sync::SyncProtocol;

/// Bridges per-task-type state charts and running tasks. One interpreter is
/// constructed lazily per instance and kept for the life of the session; the
/// bridge feeds task-derived events in and mirrors interpreter state back
/// onto `task.state.current`.
pub struct FsmBridge {
    charts: DashMap<String, Chart>,
    interpreters: DashMap<String, Arc<Mutex<Interpreter>>>,
}

impl FsmBridge {
    pub fn new() -> Self {
        Self {
            charts: DashMap::new(),
            interpreters: DashMap::new(),
        }
    }

    pub fn register_chart(&self, task_type: &str, chart: Chart) {
        self.charts.insert(task_type.to_string(), chart);
    }

    pub fn has_chart(&self, task_type: &str) -> bool {
        self.charts.contains_key(task_type)
    }

    pub fn current(&self, instance_id: &str) -> Option<String> {
        self.interpreters
            .get(instance_id)
            .map(|i| i.lock().expect("fsm poisoned").current())
    }

    /// Lazily construct the interpreter for this instance from its task
    /// type's chart, then align it with the task.
    ///
    /// First call: the interpreter starts at `task.state.current` (falling
    /// back to the chart's initial), so a persisted task resumes where it
    /// left off. Later calls: if an external actor moved `state.current`,
    /// the interpreter is resynchronized via the implicit GOTO event before
    /// any transition evaluation. Returns timed transitions to arm.
    pub fn initiate_fsm(&self, task: &Task, io: &FsmIo) -> Vec<ScheduledAfter> {
        let Some(chart) = self.charts.get(&task.task_type) else {
            debug!(task_type = %task.task_type, "no chart for task type");
            return Vec::new();
        };
        let interpreter = self
            .interpreters
            .entry(task.instance_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Interpreter::new(chart.value().clone()))))
            .clone();
        drop(chart);

        let mut interpreter = interpreter.lock().expect("fsm poisoned");
        let effects = if !interpreter.is_started() {
            interpreter.start(task.state.current.as_deref(), io)
        } else {
            match &task.state.current {
                Some(current) if *current != interpreter.current() => {
                    interpreter.send(&format!("GOTO{}", current), io)
                }
                _ => StepEffects::default(),
            }
        };
        effects.after
    }

    /// Feed an event into an instance's interpreter. Returns timed
    /// transitions to arm; the interpreter must have been initiated.
    pub fn send_event(&self, instance_id: &str, event: &str, io: &FsmIo) -> Vec<ScheduledAfter> {
        match self.interpreters.get(instance_id) {
            Some(interpreter) => {
                let mut interpreter = interpreter.lock().expect("fsm poisoned");
                interpreter.send(event, io).after
            }
            None => {
                warn!(instance_id, event, "fsm event for uninitiated interpreter");
                Vec::new()
            }
        }
    }

    /// Mirror interpreter state back onto the task. When the interpreter
    /// moved, `state.last` records where the task was and the task is marked
    /// as requiring an update command.
    pub fn update_states(&self, task: &mut Task) {
        let Some(current) = self.current(&task.instance_id) else {
            return;
        };
        if task.state.current.as_deref() != Some(current.as_str()) {
            debug!(
                instance_id = %task.instance_id,
                from = task.state.current.as_deref().unwrap_or(""),
                to = %current,
                "mirroring fsm state"
            );
            task.state.last = task.state.current.take();
            task.state.current = Some(current);
            task.node.command = Some(Command::Update);
        }
    }

    /// Arm timed transitions: after the delay, a local sync carrying the
    /// `fsmEvent` flag drives the target instance's machine to the target
    /// state under its own dispatch cycle. One named timer per instance, so
    /// re-arming replaces the previous timer.
    pub fn schedule_afters(
        &self,
        timers: &TimerRegistry,
        sync: Arc<SyncProtocol>,
        instance_id: &str,
        effects: Vec<ScheduledAfter>,
    ) {
        for scheduled in effects {
            let timer_name = format!("{}-fsm-after", instance_id);
            let instance = instance_id.to_string();
            let sync = sync.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(scheduled.delay_ms)).await;
                let diff = json!({"state": {"current": scheduled.target}});
                let result = sync
                    .sync_local_with_fsm_event(&instance, diff, "fsm after transition")
                    .await;
                if let Err(e) = result {
                    // Fire-and-forget: errors here are logged or lost.
                    warn!(instance_id = %instance, error = %e, "fsm after sync failed");
                }
            });
            timers.install(&timer_name, handle);
        }
    }

    /// Drop the interpreter for a finished instance.
    pub fn remove(&self, instance_id: &str) {
        self.interpreters.remove(instance_id);
    }
}

impl Default for FsmBridge {
    fn default() -> Self {
        Self::new()
    }
}
