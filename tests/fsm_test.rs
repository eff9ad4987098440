use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use taskhub::fsm::bridge::FsmBridge;
use taskhub::fsm::chart::Chart;
use taskhub::fsm::interpreter::{FsmIo, Interpreter, ScheduledAfter};
use taskhub::runtime::error_task::TaskCatalog;
use taskhub::runtime::task::{Command, Task};
use taskhub::runtime::timers::TimerRegistry;
use taskhub::runtime::transport::ChannelTransport;
use taskhub::sync::SyncProtocol;

fn chart(value: serde_json::Value) -> Chart {
    serde_json::from_value(value).unwrap()
}

fn fill_chart() -> Chart {
    chart(json!({
        "id": "fill",
        "initial": "start",
        "states": {
            "start": {"always": "displayInstruction"},
            "displayInstruction": {
                "entry": ["displayInstruction"],
                "always": "waitingForFill"
            },
            "waitingForFill": {"on": {"FILLED": "filled"}},
            "filled": {}
        }
    }))
}

fn recording_io(log: &Arc<Mutex<Vec<String>>>) -> FsmIo {
    let log = log.clone();
    FsmIo::new().action(
        "displayInstruction",
        Arc::new(move |call| log.lock().unwrap().push(call.action.clone())),
    )
}

#[test]
fn test_start_cascades_through_automatic_transitions() {
    let mut fsm = Interpreter::new(fill_chart());
    let effects = fsm.start(None, &FsmIo::new());
    assert_eq!(fsm.current(), "waitingForFill");
    assert_eq!(effects.transitions, 2);
}

#[test]
fn test_single_step_halts_after_one_transition() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let io = recording_io(&log).single_step();

    let mut fsm = Interpreter::new(fill_chart());
    let effects = fsm.start(Some("start"), &io);

    // The entry action ran, then the machine stopped: no silent advance to
    // waitingForFill while the action is still doing its work.
    assert_eq!(fsm.current(), "displayInstruction");
    assert_eq!(effects.transitions, 1);
    assert_eq!(*log.lock().unwrap(), vec!["displayInstruction"]);
}

#[test]
fn test_event_transition_and_unknown_event() {
    let mut fsm = Interpreter::new(fill_chart());
    fsm.start(None, &FsmIo::new());
    assert_eq!(fsm.current(), "waitingForFill");

    fsm.send("NOT_A_THING", &FsmIo::new());
    assert_eq!(fsm.current(), "waitingForFill");

    fsm.send("FILLED", &FsmIo::new());
    assert_eq!(fsm.current(), "filled");
}

#[test]
fn test_goto_event_jumps_to_named_state() {
    let mut fsm = Interpreter::new(fill_chart());
    fsm.start(None, &FsmIo::new());
    fsm.send("GOTOfilled", &FsmIo::new());
    assert_eq!(fsm.current(), "filled");
}

#[test]
fn test_goto_resync_keeps_single_step_budget() {
    let mut fsm = Interpreter::new(fill_chart());
    fsm.start(Some("waitingForFill"), &FsmIo::new());

    // Realigning with an externally recorded state does not consume the
    // step: the machine still gets its one automatic transition.
    let effects = fsm.send("GOTOstart", &FsmIo::new().single_step());
    assert_eq!(fsm.current(), "displayInstruction");
    assert_eq!(effects.transitions, 1);
}

#[test]
fn test_missing_guard_evaluates_false() {
    let c = chart(json!({
        "id": "guarded",
        "initial": "idle",
        "states": {
            "idle": {"always": {"target": "running", "cond": "ready"}},
            "running": {}
        }
    }));

    let mut fsm = Interpreter::new(c.clone());
    fsm.start(None, &FsmIo::new());
    assert_eq!(fsm.current(), "idle");

    let io = FsmIo::new().guard("ready", Arc::new(|| true));
    let mut fsm = Interpreter::new(c);
    fsm.start(None, &io);
    assert_eq!(fsm.current(), "running");
}

#[test]
fn test_guarded_candidates_take_first_passing() {
    let c = chart(json!({
        "id": "branch",
        "initial": "idle",
        "states": {
            "idle": {"on": {"GO": [
                {"target": "a", "cond": "never"},
                {"target": "b"}
            ]}},
            "a": {},
            "b": {}
        }
    }));
    let mut fsm = Interpreter::new(c);
    fsm.start(None, &FsmIo::new());
    fsm.send("GO", &FsmIo::new());
    assert_eq!(fsm.current(), "b");
}

#[test]
fn test_compound_state_enters_initial_child() {
    let c = chart(json!({
        "id": "nested",
        "initial": "parent",
        "states": {
            "parent": {
                "initial": "child",
                "states": {
                    "child": {"on": {"NEXT": "sibling"}},
                    "sibling": {}
                }
            },
            "outside": {}
        }
    }));
    let mut fsm = Interpreter::new(c);
    fsm.start(None, &FsmIo::new());
    assert_eq!(fsm.current(), "parent.child");

    fsm.send("NEXT", &FsmIo::new());
    assert_eq!(fsm.current(), "parent.sibling");

    // GOTO resolves leaf names anywhere in the chart.
    fsm.send("GOTOchild", &FsmIo::new());
    assert_eq!(fsm.current(), "parent.child");
}

#[test]
fn test_bridge_resumes_at_recorded_state() {
    let bridge = FsmBridge::new();
    bridge.register_chart("fill", fill_chart());

    let mut task = Task::new("root.fill", "i-1", "fill");
    task.state.current = Some("waitingForFill".to_string());
    bridge.initiate_fsm(&task, &FsmIo::new());
    assert_eq!(bridge.current("i-1").as_deref(), Some("waitingForFill"));
}

#[test]
fn test_bridge_resyncs_on_external_state_change() {
    let bridge = FsmBridge::new();
    bridge.register_chart("fill", fill_chart());

    let mut task = Task::new("root.fill", "i-1", "fill");
    bridge.initiate_fsm(&task, &FsmIo::new());
    assert_eq!(bridge.current("i-1").as_deref(), Some("waitingForFill"));

    // Another actor moved the task; the interpreter follows.
    task.state.current = Some("filled".to_string());
    bridge.initiate_fsm(&task, &FsmIo::new());
    assert_eq!(bridge.current("i-1").as_deref(), Some("filled"));
}

#[test]
fn test_update_states_mirrors_interpreter_onto_task() {
    let bridge = FsmBridge::new();
    bridge.register_chart("fill", fill_chart());

    let mut task = Task::new("root.fill", "i-1", "fill");
    task.state.current = Some("start".to_string());
    // Automatic transitions carry the machine past the recorded state.
    bridge.initiate_fsm(&task, &FsmIo::new());

    bridge.update_states(&mut task);
    assert_eq!(task.state.current.as_deref(), Some("waitingForFill"));
    assert_eq!(task.state.last.as_deref(), Some("start"));
    assert_eq!(task.command(), Some(Command::Update));

    // No movement, no touch.
    task.node.command = None;
    bridge.update_states(&mut task);
    assert_eq!(task.command(), None);
}

#[test]
fn test_send_event_drives_instance_machine() {
    let bridge = FsmBridge::new();
    bridge.register_chart("fill", fill_chart());

    let task = Task::new("root.fill", "i-1", "fill");
    bridge.initiate_fsm(&task, &FsmIo::new());
    assert_eq!(bridge.current("i-1").as_deref(), Some("waitingForFill"));

    bridge.send_event("i-1", "FILLED", &FsmIo::new());
    assert_eq!(bridge.current("i-1").as_deref(), Some("filled"));

    // An event for an instance that was never initiated is swallowed.
    assert!(bridge.send_event("i-9", "FILLED", &FsmIo::new()).is_empty());
}

#[test]
fn test_remove_drops_the_interpreter() {
    let bridge = FsmBridge::new();
    bridge.register_chart("fill", fill_chart());

    let task = Task::new("root.fill", "i-1", "fill");
    bridge.initiate_fsm(&task, &FsmIo::new());
    assert!(bridge.current("i-1").is_some());

    bridge.remove("i-1");
    assert_eq!(bridge.current("i-1"), None);
}

#[test]
fn test_no_chart_is_a_noop() {
    let bridge = FsmBridge::new();
    let task = Task::new("root.x", "i-1", "uncharted");
    assert!(bridge.initiate_fsm(&task, &FsmIo::new()).is_empty());
    assert_eq!(bridge.current("i-1"), None);
}

#[tokio::test]
async fn test_after_transition_fires_sync_with_fsm_event() {
    let bridge = FsmBridge::new();
    bridge.register_chart(
        "timed",
        chart(json!({
            "id": "timed",
            "initial": "waiting",
            "states": {
                "waiting": {"after": {"30": "done"}},
                "done": {}
            }
        })),
    );

    let task = Task::new("root.timed", "i-1", "timed");
    let afters = bridge.initiate_fsm(&task, &FsmIo::new());
    assert_eq!(
        afters,
        vec![ScheduledAfter { delay_ms: 30, target: "done".to_string() }]
    );

    let (transport, mut incoming) = ChannelTransport::new(4);
    let sync = Arc::new(SyncProtocol::new(
        Arc::new(transport),
        Arc::new(TaskCatalog::new()),
    ));
    let timers = TimerRegistry::new();
    bridge.schedule_afters(&timers, sync, "i-1", afters);
    assert!(timers.is_installed("i-1-fsm-after"));

    let message = tokio::time::timeout(Duration::from_millis(500), incoming.recv())
        .await
        .expect("after transition never fired")
        .expect("transport closed");
    assert_eq!(message.command, Command::Update);
    let args = message.command_args.unwrap();
    assert!(args.sync);
    assert!(args.fsm_event);
    assert!(args.lock_bypass);
    assert_eq!(args.instance_id.as_deref(), Some("i-1"));
    assert_eq!(args.sync_task.unwrap(), json!({"state": {"current": "done"}}));
}
