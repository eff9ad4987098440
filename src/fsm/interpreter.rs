use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::fsm::chart::{Chart, Transition};

/// Named fire-and-forget action callback. The interpreter never awaits these
/// and never sees their errors; anything fallible inside must catch locally.
pub type ActionFn = Arc<dyn Fn(&ActionCall) + Send + Sync>;

/// Named boolean guard.
pub type GuardFn = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ActionCall {
    pub action: String,
    pub state: String,
    pub event: String,
}

/// Actions/guards wired in for one evaluation pass. Guards that a transition
/// names but the caller did not supply evaluate to false: charts are shared
/// across processors and some guards only exist elsewhere.
pub struct FsmIo {
    pub actions: HashMap<String, ActionFn>,
    pub guards: HashMap<String, GuardFn>,
    /// At most one state-changing transition per pass: no cascading through
    /// chained automatic transitions. Long-running actions own the decision
    /// to advance further, signaled later via an explicit fsm event.
    pub single_step: bool,
}

impl FsmIo {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
            guards: HashMap::new(),
            single_step: false,
        }
    }

    pub fn single_step(mut self) -> Self {
        self.single_step = true;
        self
    }

    pub fn action(mut self, name: &str, f: ActionFn) -> Self {
        self.actions.insert(name.to_string(), f);
        self
    }

    pub fn guard(mut self, name: &str, f: GuardFn) -> Self {
        self.guards.insert(name.to_string(), f);
        self
    }
}

impl Default for FsmIo {
    fn default() -> Self {
        Self::new()
    }
}

/// A timed transition to arm after this pass: after `delay_ms` the machine
/// should be driven to `target` via an fsm-event sync.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledAfter {
    pub delay_ms: u64,
    pub target: String,
}

#[derive(Debug, Default)]
pub struct StepEffects {
    pub transitions: usize,
    pub after: Vec<ScheduledAfter>,
}

// Cascade ceiling for always-transitions; a chart needing more is a cycle.
const MAX_CASCADE: usize = 32;

/// Hierarchical state-chart interpreter. Holds only the chart and the current
/// state path; actions and guards are supplied per pass.
pub struct Interpreter {
    chart: Chart,
    current: Vec<String>,
    started: bool,
}

impl Interpreter {
    pub fn new(chart: Chart) -> Self {
        Self {
            chart,
            current: Vec::new(),
            started: false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Current state as a dotted path ("parent.child" for sub-states).
    pub fn current(&self) -> String {
        self.current.join(".")
    }

    /// Enter the initial state and evaluate automatic transitions. `initial`
    /// overrides the chart's own initial so an interpreter can be rehydrated
    /// at the state an external actor last recorded.
    pub fn start(&mut self, initial: Option<&str>, io: &FsmIo) -> StepEffects {
        let mut effects = StepEffects::default();
        let name = initial
            .map(str::to_string)
            .or_else(|| self.chart.initial.clone())
            .or_else(|| self.chart.states.keys().next().cloned())
            .unwrap_or_default();
        let path = self.chart.resolve(&name).unwrap_or_else(|| vec![name.clone()]);
        self.enter(&path, "start", io, &mut effects);
        self.started = true;
        self.run_always(io, &mut effects);
        effects
    }

    /// Process one event. Implicit `GOTO<state>` events exist for every state
    /// so an external actor can drive the machine purely by naming states.
    pub fn send(&mut self, event: &str, io: &FsmIo) -> StepEffects {
        let mut effects = StepEffects::default();
        if let Some(state) = event.strip_prefix("GOTO") {
            if let Some(path) = self.chart.resolve(state) {
                self.transition(&path, &[], event, io, &mut effects);
                // Alignment with an externally recorded state, not a step of
                // its own; the step budget applies to what follows.
                effects.transitions = 0;
                self.run_always(io, &mut effects);
                return effects;
            }
        }

        // Innermost state first, then ancestors.
        let mut chosen: Option<Transition> = None;
        let mut depth = self.current.len();
        while depth > 0 && chosen.is_none() {
            if let Some(node) = self.chart.node(&self.current[..depth]) {
                if let Some(spec) = node.on.get(event) {
                    let candidates = spec.candidates();
                    chosen = self.pick(&candidates, io).cloned();
                }
            }
            depth -= 1;
        }

        match chosen {
            Some(taken) => match &taken.target {
                Some(target) => {
                    let Some(target_path) = self.chart.resolve(target) else {
                        warn!(target, "transition target not in chart");
                        return effects;
                    };
                    self.transition(&target_path, &taken.actions, event, io, &mut effects);
                    if !(io.single_step && effects.transitions > 0) {
                        self.run_always(io, &mut effects);
                    }
                }
                None => {
                    // Internal transition: actions only, no state change.
                    self.fire_actions(&taken.actions, event, io);
                }
            },
            None => debug!(event, state = %self.current(), "event has no transition"),
        }
        effects
    }

    fn pick<'a>(&self, candidates: &'a [Transition], io: &FsmIo) -> Option<&'a Transition> {
        candidates.iter().find(|t| self.guard_passes(t, io))
    }

    fn guard_passes(&self, transition: &Transition, io: &FsmIo) -> bool {
        match &transition.cond {
            None => true,
            Some(name) => io.guards.get(name).map(|g| g()).unwrap_or(false),
        }
    }

    fn run_always(&mut self, io: &FsmIo, effects: &mut StepEffects) {
        for _ in 0..MAX_CASCADE {
            if io.single_step && effects.transitions > 0 {
                return;
            }
            let mut taken: Option<(Vec<String>, Transition)> = None;
            let mut depth = self.current.len();
            while depth > 0 && taken.is_none() {
                if let Some(node) = self.chart.node(&self.current[..depth]) {
                    if let Some(spec) = &node.always {
                        let candidates = spec.candidates();
                        if let Some(t) = self.pick(&candidates, io) {
                            if let Some(target) = &t.target {
                                if let Some(target_path) = self.chart.resolve(target) {
                                    taken = Some((target_path, t.clone()));
                                }
                            }
                        }
                    }
                }
                depth -= 1;
            }
            match taken {
                Some((target_path, t)) => {
                    self.transition(&target_path, &t.actions, "always", io, effects);
                }
                None => return,
            }
        }
        warn!(state = %self.current(), "always-transition cascade limit hit");
    }

    fn transition(
        &mut self,
        target_path: &[String],
        actions: &[String],
        event: &str,
        io: &FsmIo,
        effects: &mut StepEffects,
    ) {
        // Exit from the leaf up to the common ancestor.
        let common = self
            .current
            .iter()
            .zip(target_path.iter())
            .take_while(|(a, b)| a == b)
            .count();
        for depth in (common + 1..=self.current.len()).rev() {
            if let Some(node) = self.chart.node(&self.current[..depth]) {
                let exits = node.exit.clone();
                self.fire_actions(&exits, event, io);
            }
        }
        self.fire_actions(actions, event, io);
        self.enter_from(target_path, common, event, io, effects);
        effects.transitions += 1;
        debug!(state = %self.current(), event, "fsm transition");
    }

    fn enter(&mut self, path: &[String], event: &str, io: &FsmIo, effects: &mut StepEffects) {
        self.enter_from(path, 0, event, io, effects);
    }

    fn enter_from(&mut self, path: &[String], from: usize, event: &str, io: &FsmIo, effects: &mut StepEffects) {
        self.current = path.to_vec();
        for depth in from + 1..=path.len() {
            if let Some(node) = self.chart.node(&path[..depth]) {
                let entries = node.entry.clone();
                self.fire_actions(&entries, event, io);
            }
        }
        // Descend compound states through their initial children.
        while let Some(node) = self.chart.node(&self.current) {
            let child = node.initial.clone().or_else(|| {
                if node.states.is_empty() {
                    None
                } else {
                    node.states.keys().next().cloned()
                }
            });
            match child {
                Some(child) => {
                    self.current.push(child);
                    if let Some(child_node) = self.chart.node(&self.current) {
                        let entries = child_node.entry.clone();
                        self.fire_actions(&entries, event, io);
                    }
                }
                None => break,
            }
        }
        self.collect_after(io, effects);
    }

    fn collect_after(&self, io: &FsmIo, effects: &mut StepEffects) {
        if let Some(node) = self.chart.node(&self.current) {
            for (delay, spec) in &node.after {
                let Ok(delay_ms) = delay.parse::<u64>() else {
                    warn!(delay, "after delay is not milliseconds");
                    continue;
                };
                let candidates = spec.candidates();
                if let Some(t) = self.pick(&candidates, io) {
                    if let Some(target) = &t.target {
                        effects.after.push(ScheduledAfter {
                            delay_ms,
                            target: target.clone(),
                        });
                    }
                }
            }
        }
    }

    fn fire_actions(&self, actions: &[String], event: &str, io: &FsmIo) {
        for action in actions {
            match io.actions.get(action) {
                Some(f) => f(&ActionCall {
                    action: action.clone(),
                    state: self.current(),
                    event: event.to_string(),
                }),
                // Actions may be bound on another node; not an error here.
                None => debug!(action, "no local binding for action"),
            }
        }
    }
}
