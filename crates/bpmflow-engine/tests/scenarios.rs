//! End-to-end routing scenarios: synchronous tasks, gateways, fault routing,
//! sub-processes and asynchronous task completion.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bpmflow_engine::{
  EngineConfig, EngineError, Fault, Lookup, ProcessHooks, ProcessInstance, StepStatus, TaskKind,
};
use common::{Recorder, assert_path_invariants, count_status, graph, vars};
use serde_json::{Value, json};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn linear_process(task_kind: &str) -> Value {
  json!({
    "id": "defs",
    "processes": [{
      "id": "p",
      "elements": [
        { "id": "start", "type": "start_event" },
        { "id": "f1", "type": "sequence_flow", "source": "start", "target": "task" },
        { "id": "task", "type": "task", "kind": task_kind },
        { "id": "f2", "type": "sequence_flow", "source": "task", "target": "end" },
        { "id": "end", "type": "end_event" }
      ]
    }]
  })
}

/// A failing service task plus catch events for the fault router to find.
fn failing_process(catch_events: Value) -> Value {
  let mut elements = vec![
    json!({ "id": "start", "type": "start_event" }),
    json!({ "id": "f1", "type": "sequence_flow", "source": "start", "target": "task" }),
    json!({ "id": "task", "type": "task", "kind": "service" }),
    json!({ "id": "f2", "type": "sequence_flow", "source": "task", "target": "end" }),
    json!({ "id": "end", "type": "end_event" }),
    json!({ "id": "handled_end", "type": "end_event" }),
  ];
  for catch in catch_events.as_array().cloned().unwrap_or_default() {
    let id = catch["id"].as_str().unwrap().to_string();
    elements.push(catch);
    elements.push(json!({
      "id": format!("{id}_flow"),
      "type": "sequence_flow",
      "source": id,
      "target": "handled_end"
    }));
  }
  json!({ "id": "defs", "processes": [{ "id": "p", "elements": elements }] })
}

fn overflow_hooks(process_errors: Arc<AtomicUsize>) -> ProcessHooks {
  ProcessHooks::new()
    .task_handler(TaskKind::Service, |_ctx, _vars| {
      Err(Fault::task("Overflow", "counter exceeded 255"))
    })
    .on_process_error(move |_event| {
      process_errors.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn test_synchronous_task_echoes_variable() {
  let hooks = ProcessHooks::new().task_handler(TaskKind::Service, |_ctx, vars| {
    let x = vars.get("x").cloned().unwrap_or(Value::Null);
    vars.set("x", x);
    Ok(())
  });
  let instance = ProcessInstance::new(graph(linear_process("service")), hooks, EngineConfig::default()).unwrap();

  assert!(instance.begin_process(vars(json!({ "x": 1 }))).unwrap());
  assert!(instance.wait_for_completion(WAIT));
  assert_eq!(instance.get(None, "x"), Lookup::Found(json!(1)));

  let steps = instance.steps();
  assert_path_invariants(&steps);
  assert_eq!(count_status(&steps, "p", StepStatus::Succeeded), 1);
  // The echoed value is deep-equal, so nothing was written under the task.
  assert_eq!(instance.export_state().variables.len(), 1);
}

#[test]
fn test_exclusive_gateway_takes_matching_flow_only() {
  let definition = json!({
    "id": "defs",
    "processes": [{
      "id": "p",
      "elements": [
        { "id": "start", "type": "start_event" },
        { "id": "f0", "type": "sequence_flow", "source": "start", "target": "gw" },
        { "id": "gw", "type": "gateway", "kind": "exclusive" },
        { "id": "f_pos", "type": "sequence_flow", "source": "gw", "target": "positive", "condition": "x > 0" },
        { "id": "f_neg", "type": "sequence_flow", "source": "gw", "target": "negative", "condition": "x <= 0" },
        { "id": "positive", "type": "task" },
        { "id": "negative", "type": "task" },
        { "id": "f3", "type": "sequence_flow", "source": "positive", "target": "end_pos" },
        { "id": "f4", "type": "sequence_flow", "source": "negative", "target": "end_neg" },
        { "id": "end_pos", "type": "end_event" },
        { "id": "end_neg", "type": "end_event" }
      ]
    }]
  });
  let hooks = ProcessHooks::new().flow_valid(|event| {
    let x = event.variables.get("x").and_then(Value::as_i64).unwrap_or_default();
    Ok(match event.element.condition() {
      Some("x > 0") => x > 0,
      Some("x <= 0") => x <= 0,
      _ => true,
    })
  });
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  assert!(instance.begin_process(vars(json!({ "x": -5 }))).unwrap());
  assert!(instance.wait_for_completion(WAIT));

  let steps = instance.steps();
  assert_path_invariants(&steps);
  assert_eq!(instance.status_of("f_pos"), None);
  assert_eq!(instance.status_of("positive"), None);
  assert_eq!(instance.status_of("negative"), Some(StepStatus::Succeeded));

  let gateway = steps
    .iter()
    .find(|s| s.element_id == "gw" && s.status == StepStatus::Succeeded)
    .unwrap();
  assert_eq!(gateway.outgoing, vec!["f_neg"]);
}

#[test]
fn test_exclusive_gateway_falls_back_to_default_flow() {
  let definition = json!({
    "id": "defs",
    "processes": [{
      "id": "p",
      "elements": [
        { "id": "start", "type": "start_event" },
        { "id": "f0", "type": "sequence_flow", "source": "start", "target": "gw" },
        { "id": "gw", "type": "gateway", "kind": "exclusive", "default_flow": "f_default" },
        { "id": "f_never", "type": "sequence_flow", "source": "gw", "target": "end_a", "condition": "never" },
        { "id": "f_default", "type": "sequence_flow", "source": "gw", "target": "end_b" },
        { "id": "end_a", "type": "end_event" },
        { "id": "end_b", "type": "end_event" }
      ]
    }]
  });
  let offered = Recorder::default();
  let hooks = {
    let offered = offered.clone();
    ProcessHooks::new().flow_valid(move |event| {
      offered.push(event.element.id.clone());
      Ok(event.element.condition() != Some("never"))
    })
  };
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert!(instance.wait_for_completion(WAIT));
  assert_eq!(instance.status_of("end_b"), Some(StepStatus::Succeeded));
  assert_eq!(offered.entries(), vec!["f_never"]);
}

#[test]
fn test_gateway_predicate_error_fails_gateway() {
  let definition = json!({
    "id": "defs",
    "processes": [{
      "id": "p",
      "elements": [
        { "id": "start", "type": "start_event" },
        { "id": "f0", "type": "sequence_flow", "source": "start", "target": "gw" },
        { "id": "gw", "type": "gateway", "kind": "inclusive" },
        { "id": "f1", "type": "sequence_flow", "source": "gw", "target": "end", "condition": "x >" },
        { "id": "end", "type": "end_event" }
      ]
    }]
  });
  let gateway_errors = Recorder::default();
  let process_errors = Recorder::default();
  let hooks = {
    let gateway_errors = gateway_errors.clone();
    let process_errors = process_errors.clone();
    ProcessHooks::new()
      .flow_valid(|_event| Err(Fault::gateway("SyntaxError", "unexpected end of expression")))
      .on_gateway_error(move |event| {
        gateway_errors.push(event.fault.map(|f| f.name.clone()).unwrap_or_default());
      })
      .on_process_error(move |event| process_errors.push(event.element.id.clone()))
  };
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert_eq!(instance.status_of("gw"), Some(StepStatus::Failed));
  assert_eq!(instance.status_of("f1"), None);
  assert_eq!(gateway_errors.entries(), vec!["SyntaxError"]);
  assert_eq!(process_errors.entries(), vec!["gw"]);
  assert!(!instance.is_completed());
}

#[test]
fn test_parallel_gateway_join_waits_for_every_branch() {
  let definition = json!({
    "id": "defs",
    "processes": [{
      "id": "p",
      "elements": [
        { "id": "start", "type": "start_event" },
        { "id": "f0", "type": "sequence_flow", "source": "start", "target": "fork" },
        { "id": "fork", "type": "gateway", "kind": "parallel" },
        { "id": "fa", "type": "sequence_flow", "source": "fork", "target": "a" },
        { "id": "fb", "type": "sequence_flow", "source": "fork", "target": "b" },
        { "id": "a", "type": "task", "kind": "script" },
        { "id": "b", "type": "task", "kind": "script" },
        { "id": "ja", "type": "sequence_flow", "source": "a", "target": "join" },
        { "id": "jb", "type": "sequence_flow", "source": "b", "target": "join" },
        { "id": "join", "type": "gateway", "kind": "parallel" },
        { "id": "f_end", "type": "sequence_flow", "source": "join", "target": "end" },
        { "id": "end", "type": "end_event" }
      ]
    }]
  });
  let hooks = ProcessHooks::new().task_handler(TaskKind::Script, |ctx, vars| {
    vars.set(format!("{}_done", ctx.task_id()), true);
    Ok(())
  });
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert!(instance.wait_for_completion(WAIT));
  let steps = instance.steps();
  assert_path_invariants(&steps);
  assert_eq!(count_status(&steps, "join", StepStatus::Started), 1);
  assert_eq!(count_status(&steps, "end", StepStatus::Succeeded), 1);
  assert_eq!(instance.get(None, "a_done"), Lookup::Found(json!(true)));
  assert_eq!(instance.get(None, "b_done"), Lookup::Found(json!(true)));
}

#[test]
fn test_fault_routed_to_exact_catch_event() {
  let process_errors = Arc::new(AtomicUsize::new(0));
  let definition = failing_process(json!([
    { "id": "catch_all", "type": "intermediate_catch_event", "error_types": ["*"] },
    { "id": "on_overflow", "type": "intermediate_catch_event", "error_types": ["Overflow"] }
  ]));
  let instance = ProcessInstance::new(
    graph(definition),
    overflow_hooks(Arc::clone(&process_errors)),
    EngineConfig::default(),
  )
  .unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert!(instance.wait_for_completion(WAIT));
  assert_eq!(instance.status_of("task"), Some(StepStatus::Failed));
  assert_eq!(instance.status_of("on_overflow"), Some(StepStatus::Succeeded));
  assert_eq!(instance.status_of("catch_all"), None);
  assert_eq!(process_errors.load(Ordering::SeqCst), 0);

  let caught = instance
    .steps()
    .into_iter()
    .find(|s| s.element_id == "on_overflow")
    .unwrap();
  assert_eq!(caught.source_id.as_deref(), Some("task"));
}

#[test]
fn test_fault_routed_to_wildcard_catch_event() {
  let process_errors = Arc::new(AtomicUsize::new(0));
  let definition = failing_process(json!([
    { "id": "on_timeout", "type": "intermediate_catch_event", "error_types": ["Timeout"] },
    { "id": "catch_all", "type": "intermediate_catch_event", "error_types": ["*"] }
  ]));
  let instance = ProcessInstance::new(
    graph(definition),
    overflow_hooks(Arc::clone(&process_errors)),
    EngineConfig::default(),
  )
  .unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert!(instance.wait_for_completion(WAIT));
  assert_eq!(instance.status_of("catch_all"), Some(StepStatus::Succeeded));
  assert_eq!(instance.status_of("on_timeout"), None);
  assert_eq!(process_errors.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unhandled_fault_reaches_process_error_hook() {
  let errors = Recorder::default();
  let hooks = {
    let errors = errors.clone();
    ProcessHooks::new()
      .task_handler(TaskKind::Service, |_ctx, _vars| Err(Fault::task("Boom", "service unavailable")))
      .on_process_error(move |event| {
        errors.push(format!("{}/{}/{}", event.process.id, event.element.id, event.fault.name));
      })
  };
  let instance = ProcessInstance::new(graph(linear_process("service")), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert_eq!(errors.entries(), vec!["p/task/Boom"]);
  assert!(!instance.wait_for_completion(Some(Duration::from_millis(50))));
  assert_eq!(instance.status_of("end"), None);
}

#[test]
fn test_handler_panic_becomes_fault() {
  let definition = failing_process(json!([
    { "id": "on_panic", "type": "intermediate_catch_event", "error_types": ["Panic"] }
  ]));
  let task_errors = Recorder::default();
  let hooks = {
    let task_errors = task_errors.clone();
    ProcessHooks::new()
      .task_handler(TaskKind::Service, |_ctx, _vars| panic!("handler bug"))
      .on_task_error(move |event| {
        task_errors.push(event.fault.map(|f| f.message.clone()).unwrap_or_default());
      })
  };
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert!(instance.wait_for_completion(WAIT));
  assert_eq!(task_errors.entries(), vec!["handler bug"]);
  assert_eq!(instance.status_of("on_panic"), Some(StepStatus::Succeeded));
}

#[test]
fn test_task_local_catch_target() {
  let definition = json!({
    "id": "defs",
    "processes": [{
      "id": "p",
      "elements": [
        { "id": "start", "type": "start_event" },
        { "id": "f1", "type": "sequence_flow", "source": "start", "target": "call" },
        { "id": "call", "type": "task", "kind": "send",
          "catches": [{ "error_types": ["Timeout"], "target": "fallback" }] },
        { "id": "fallback", "type": "task" },
        { "id": "f2", "type": "sequence_flow", "source": "fallback", "target": "end" },
        { "id": "end", "type": "end_event" },
        { "id": "catch_all", "type": "intermediate_catch_event", "error_types": ["*"] }
      ]
    }]
  });
  let hooks = ProcessHooks::new()
    .task_handler(TaskKind::Send, |_ctx, _vars| Err(Fault::task("Timeout", "no reply in 30s")));
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert!(instance.wait_for_completion(WAIT));
  assert_eq!(instance.status_of("fallback"), Some(StepStatus::Succeeded));
  assert_eq!(instance.status_of("catch_all"), None);
}

#[test]
fn test_sub_process_runs_and_continues() {
  let definition = json!({
    "id": "defs",
    "variables": { "warehouse": "north" },
    "processes": [{
      "id": "p",
      "elements": [
        { "id": "start", "type": "start_event" },
        { "id": "f1", "type": "sequence_flow", "source": "start", "target": "fulfil" },
        { "id": "fulfil", "type": "sub_process", "elements": [
          { "id": "sub_start", "type": "start_event" },
          { "id": "sf1", "type": "sequence_flow", "source": "sub_start", "target": "pack" },
          { "id": "pack", "type": "task", "kind": "business_rule" },
          { "id": "sf2", "type": "sequence_flow", "source": "pack", "target": "sub_end" },
          { "id": "sub_end", "type": "end_event" }
        ]},
        { "id": "f2", "type": "sequence_flow", "source": "fulfil", "target": "notify" },
        { "id": "notify", "type": "task" },
        { "id": "f3", "type": "sequence_flow", "source": "notify", "target": "end" },
        { "id": "end", "type": "end_event" }
      ]
    }]
  });
  let completed = Recorder::default();
  let hooks = {
    let completed = completed.clone();
    ProcessHooks::new()
      .task_handler(TaskKind::BusinessRule, |_ctx, vars| {
        let warehouse = vars.get("warehouse").cloned().unwrap_or(Value::Null);
        vars.set("packed_at", warehouse);
        Ok(())
      })
      .on_sub_process_completed(move |event| completed.push(event.element.id.clone()))
  };
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert!(instance.wait_for_completion(WAIT));
  assert_path_invariants(&instance.steps());
  assert_eq!(completed.entries(), vec!["fulfil"]);
  assert_eq!(instance.status_of("notify"), Some(StepStatus::Succeeded));
  assert_eq!(instance.get(Some("pack"), "packed_at"), Lookup::Found(json!("north")));
}

#[test]
fn test_catch_event_in_unstarted_sub_process_starts_it() {
  let definition = json!({
    "id": "defs",
    "processes": [{
      "id": "p",
      "elements": [
        { "id": "start", "type": "start_event" },
        { "id": "f1", "type": "sequence_flow", "source": "start", "target": "task" },
        { "id": "task", "type": "task", "kind": "service" },
        { "id": "f2", "type": "sequence_flow", "source": "task", "target": "end" },
        { "id": "end", "type": "end_event" },
        { "id": "repair", "type": "sub_process", "elements": [
          { "id": "repair_start", "type": "start_event" },
          { "id": "on_damage", "type": "intermediate_catch_event", "error_types": ["Damaged"] },
          { "id": "rf1", "type": "sequence_flow", "source": "on_damage", "target": "repair_end" },
          { "id": "repair_end", "type": "end_event" }
        ]},
        { "id": "f3", "type": "sequence_flow", "source": "repair", "target": "repaired" },
        { "id": "repaired", "type": "end_event" }
      ]
    }]
  });
  let hooks = ProcessHooks::new()
    .task_handler(TaskKind::Service, |_ctx, _vars| Err(Fault::task("Damaged", "crate dropped")));
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert!(instance.wait_for_completion(WAIT));
  let steps = instance.steps();
  assert_path_invariants(&steps);
  assert_eq!(count_status(&steps, "repair", StepStatus::Started), 1);
  assert_eq!(instance.status_of("repair"), Some(StepStatus::Succeeded));
  assert_eq!(instance.status_of("repaired"), Some(StepStatus::Succeeded));
}

#[test]
fn test_user_task_completed_later_from_another_thread() {
  let handles = Arc::new(parking_lot::Mutex::new(Vec::new()));
  let hooks = {
    let handles = Arc::clone(&handles);
    ProcessHooks::new().async_task_handler(TaskKind::User, move |ctx, vars, handle| {
      assert_eq!(ctx.task_id(), "task");
      handles.lock().push((vars, handle));
    })
  };
  let instance = ProcessInstance::new(graph(linear_process("user")), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({ "amount": 40 }))).unwrap();
  assert_eq!(instance.current_position(), vec!["p", "task"]);

  let (mut vars, handle) = handles.lock().pop().unwrap();
  let worker = std::thread::spawn(move || {
    vars.set("approved", true);
    handle.complete(vars, Some("alice"))
  });
  worker.join().unwrap().unwrap();

  assert!(instance.wait_for_completion(WAIT));
  let completion = instance
    .steps()
    .into_iter()
    .find(|s| s.element_id == "task" && s.status == StepStatus::Succeeded)
    .unwrap();
  assert_eq!(completion.completed_by.as_deref(), Some("alice"));
  assert_eq!(instance.get(Some("task"), "approved"), Lookup::Found(json!(true)));
}

#[test]
fn test_completing_a_task_twice_is_rejected() {
  let hooks = ProcessHooks::new().async_task_handler(TaskKind::Manual, |_ctx, _vars, _handle| {});
  let instance = ProcessInstance::new(graph(linear_process("manual")), hooks, EngineConfig::default()).unwrap();
  instance.begin_process(vars(json!({}))).unwrap();

  let result = vars(json!({ "checked": true }));
  instance.complete_task("task", result.clone(), None).unwrap();
  let before = instance.export_state().variables;

  let err = instance.complete_task("task", result, None).unwrap_err();
  assert!(matches!(err, EngineError::TaskNotActive { task_id } if task_id == "task"));
  assert_eq!(instance.export_state().variables, before);
  assert_eq!(count_status(&instance.steps(), "task", StepStatus::Succeeded), 1);
}

#[test]
fn test_complete_unknown_task() {
  let instance =
    ProcessInstance::new(graph(linear_process("user")), ProcessHooks::new(), EngineConfig::default()).unwrap();

  let err = instance.complete_task("ghost", vars(json!({})), None).unwrap_err();
  assert!(matches!(err, EngineError::TaskNotFound { .. }));
  let err = instance.error_task("start", Fault::task("X", "y")).unwrap_err();
  assert!(matches!(err, EngineError::TaskNotFound { .. }));
}

#[test]
fn test_error_task_routes_fault() {
  let definition = failing_process(json!([
    { "id": "on_rejected", "type": "intermediate_catch_event", "error_types": ["Rejected"] }
  ]));
  let definition = {
    let mut definition = definition;
    definition["processes"][0]["elements"][2]["kind"] = json!("user");
    definition
  };
  let hooks = ProcessHooks::new().async_task_handler(TaskKind::User, |_ctx, _vars, _handle| {});
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();
  instance.begin_process(vars(json!({}))).unwrap();

  instance
    .error_task("task", Fault::task("Rejected", "manager declined"))
    .unwrap();

  assert!(instance.wait_for_completion(WAIT));
  assert_eq!(instance.status_of("on_rejected"), Some(StepStatus::Succeeded));
}

#[test]
fn test_begin_twice_and_no_valid_process() {
  let instance =
    ProcessInstance::new(graph(linear_process("service")), ProcessHooks::new(), EngineConfig::default()).unwrap();
  assert!(instance.begin_process(vars(json!({}))).unwrap());
  assert!(matches!(
    instance.begin_process(vars(json!({}))),
    Err(EngineError::AlreadyStarted)
  ));

  let rejecting = ProcessHooks::new().process_start_valid(|_event| Ok(false));
  let instance = ProcessInstance::new(graph(linear_process("service")), rejecting, EngineConfig::default()).unwrap();
  assert!(!instance.begin_process(vars(json!({}))).unwrap());
  assert!(instance.steps().is_empty());
}

#[test]
fn test_constants_and_hooks_observe_variables() {
  let seen = Recorder::default();
  let hooks = {
    let seen = seen.clone();
    ProcessHooks::new()
      .on_task_started(move |event| {
        let region = event.variables.get("region").cloned().unwrap_or(Value::Null);
        seen.push(region.to_string());
      })
      .on_log(|_level, _message| panic!("log sinks never break execution"))
  };
  let config = EngineConfig {
    constants: vars(json!({ "region": "eu-west" })),
    state_log_level: bpmflow_engine::StateLogLevel::Info,
    ..EngineConfig::default()
  };
  let instance = ProcessInstance::new(graph(linear_process("service")), hooks, config).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert!(instance.wait_for_completion(WAIT));
  assert_eq!(seen.entries(), vec!["\"eu-west\""]);
  assert_eq!(instance.keys(None), vec!["region"]);
  assert!(!instance.export_state().log.is_empty());
}

#[test]
fn test_failing_catch_event_is_not_routed_to_itself() {
  let process_errors = Arc::new(AtomicUsize::new(0));
  let definition = failing_process(json!([
    { "id": "catch", "type": "intermediate_catch_event", "error_types": ["*"] }
  ]));
  let hooks =
    overflow_hooks(Arc::clone(&process_errors)).event_start_valid(|event| Ok(event.element.id != "catch"));
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  assert!(instance.begin_process(vars(json!({}))).unwrap());

  let steps = instance.steps();
  assert_eq!(count_status(&steps, "catch", StepStatus::Started), 1);
  assert_eq!(count_status(&steps, "catch", StepStatus::Failed), 1);
  assert_eq!(process_errors.load(Ordering::SeqCst), 1);
  assert!(!instance.is_completed());
  assert_path_invariants(&steps);
}

#[test]
fn test_catch_event_fires_at_most_once() {
  // The handled path fails again with a fault the same catch event would take.
  let definition = json!({
    "id": "defs",
    "processes": [{
      "id": "p",
      "elements": [
        { "id": "start", "type": "start_event" },
        { "id": "f1", "type": "sequence_flow", "source": "start", "target": "task" },
        { "id": "task", "type": "task", "kind": "service" },
        { "id": "catch", "type": "intermediate_catch_event", "error_types": ["*"] },
        { "id": "cf", "type": "sequence_flow", "source": "catch", "target": "gw" },
        { "id": "gw", "type": "gateway", "kind": "exclusive" },
        { "id": "g1", "type": "sequence_flow", "source": "gw", "target": "end" },
        { "id": "end", "type": "end_event" }
      ]
    }]
  });
  let process_errors = Arc::new(AtomicUsize::new(0));
  let hooks = overflow_hooks(Arc::clone(&process_errors))
    .flow_valid(|_event| Err(Fault::gateway("Unroutable", "no route for order")));
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  let steps = instance.steps();
  assert_eq!(count_status(&steps, "catch", StepStatus::Succeeded), 1);
  assert_eq!(count_status(&steps, "gw", StepStatus::Failed), 1);
  assert_eq!(process_errors.load(Ordering::SeqCst), 1);
  assert_path_invariants(&steps);
}

#[test]
fn test_task_handler_must_match_kind_completion_mode() {
  let sync_user = ProcessHooks::new().task_handler(TaskKind::User, |_ctx, _vars| Ok(()));
  let Err(err) = ProcessInstance::new(graph(linear_process("user")), sync_user, EngineConfig::default()) else {
    panic!("a synchronous user task handler should be rejected");
  };
  assert!(matches!(
    err,
    EngineError::TaskHandlerMismatch { kind: "user_task", expected: "asynchronous" }
  ));

  let async_service = ProcessHooks::new().async_task_handler(TaskKind::Service, |_ctx, _vars, _handle| {});
  let Err(err) = ProcessInstance::new(graph(linear_process("service")), async_service, EngineConfig::default())
  else {
    panic!("an asynchronous service task handler should be rejected");
  };
  assert!(matches!(
    err,
    EngineError::TaskHandlerMismatch { kind: "service_task", expected: "synchronous" }
  ));
}

#[test]
fn test_user_task_without_handler_completes_immediately() {
  let instance =
    ProcessInstance::new(graph(linear_process("user")), ProcessHooks::new(), EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert!(instance.wait_for_completion(WAIT));
  assert_eq!(instance.status_of("task"), Some(StepStatus::Succeeded));
}

fn checkpoint_process() -> Value {
  json!({
    "id": "defs",
    "processes": [{
      "id": "p",
      "elements": [
        { "id": "start", "type": "start_event" },
        { "id": "f1", "type": "sequence_flow", "source": "start", "target": "check" },
        { "id": "check", "type": "intermediate_catch_event" },
        { "id": "f2", "type": "sequence_flow", "source": "check", "target": "end" },
        { "id": "end", "type": "end_event" }
      ]
    }]
  })
}

#[test]
fn test_rejected_catch_event_fails() {
  let event_errors = Recorder::default();
  let process_errors = Recorder::default();
  let hooks = {
    let event_errors = event_errors.clone();
    let process_errors = process_errors.clone();
    ProcessHooks::new()
      .event_start_valid(|event| Ok(event.element.id != "check"))
      .on_event_error(move |event| {
        let name = event.fault.map(|f| f.name.clone()).unwrap_or_default();
        event_errors.push(format!("{}:{}", event.element.id, name));
      })
      .on_process_error(move |event| process_errors.push(event.element.id.clone()))
  };
  let instance = ProcessInstance::new(graph(checkpoint_process()), hooks, EngineConfig::default()).unwrap();

  assert!(instance.begin_process(vars(json!({}))).unwrap());

  assert_eq!(instance.status_of("check"), Some(StepStatus::Failed));
  assert_eq!(instance.status_of("end"), None);
  assert_eq!(event_errors.entries(), vec!["check:EventValidation"]);
  assert_eq!(process_errors.entries(), vec!["check"]);
  assert!(!instance.is_completed());
  assert_path_invariants(&instance.steps());
}

#[test]
fn test_raising_event_predicate_fails_event() {
  let event_errors = Recorder::default();
  let hooks = {
    let event_errors = event_errors.clone();
    ProcessHooks::new()
      .event_start_valid(|event| {
        if event.element.id == "check" {
          Err(Fault::event("Unverifiable", "signature service unavailable"))
        } else {
          Ok(true)
        }
      })
      .on_event_error(move |event| {
        let name = event.fault.map(|f| f.name.clone()).unwrap_or_default();
        event_errors.push(name);
      })
  };
  let instance = ProcessInstance::new(graph(checkpoint_process()), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert_eq!(instance.status_of("check"), Some(StepStatus::Failed));
  assert_eq!(event_errors.entries(), vec!["Unverifiable"]);
  let failed = instance
    .steps()
    .into_iter()
    .find(|s| s.element_id == "check" && s.status == StepStatus::Failed)
    .unwrap();
  assert!(failed.error.unwrap().contains("Unverifiable"));
}

#[test]
fn test_rejected_start_event_prevents_start() {
  let hooks = ProcessHooks::new().event_start_valid(|event| Ok(event.element.id != "start"));
  let instance = ProcessInstance::new(graph(linear_process("service")), hooks, EngineConfig::default()).unwrap();

  assert!(!instance.begin_process(vars(json!({}))).unwrap());
  assert!(instance.steps().is_empty());
}

#[test]
fn test_inclusive_and_complex_gateways_take_every_accepted_flow() {
  for kind in ["inclusive", "complex"] {
    let definition = json!({
      "id": "defs",
      "processes": [{
        "id": "p",
        "elements": [
          { "id": "start", "type": "start_event" },
          { "id": "f1", "type": "sequence_flow", "source": "start", "target": "gw" },
          { "id": "gw", "type": "gateway", "kind": kind },
          { "id": "to_a", "type": "sequence_flow", "source": "gw", "target": "end_a" },
          { "id": "to_b", "type": "sequence_flow", "source": "gw", "target": "end_b" },
          { "id": "to_c", "type": "sequence_flow", "source": "gw", "target": "end_c" },
          { "id": "end_a", "type": "end_event" },
          { "id": "end_b", "type": "end_event" },
          { "id": "end_c", "type": "end_event" }
        ]
      }]
    });
    let hooks = ProcessHooks::new().flow_valid(|event| Ok(event.element.id != "to_c"));
    let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

    instance.begin_process(vars(json!({}))).unwrap();

    assert!(instance.wait_for_completion(WAIT));
    let steps = instance.steps();
    let gateway = steps
      .iter()
      .find(|s| s.element_id == "gw" && s.status == StepStatus::Succeeded)
      .unwrap();
    assert_eq!(gateway.outgoing, vec!["to_a", "to_b"], "{kind} gateway");
    assert_eq!(count_status(&steps, "end_a", StepStatus::Succeeded), 1);
    assert_eq!(count_status(&steps, "end_b", StepStatus::Succeeded), 1);
    assert_eq!(instance.status_of("to_c"), None);
    assert_eq!(count_status(&steps, "p", StepStatus::Succeeded), 1);
    assert_path_invariants(&steps);
  }
}

#[test]
fn test_message_flow_crosses_into_another_process() {
  let definition = json!({
    "id": "defs",
    "processes": [
      { "id": "buyer", "elements": [
        { "id": "b_start", "type": "start_event" },
        { "id": "bf1", "type": "sequence_flow", "source": "b_start", "target": "order" },
        { "id": "order", "type": "task", "kind": "send" },
        { "id": "bf2", "type": "sequence_flow", "source": "order", "target": "b_end" },
        { "id": "b_end", "type": "end_event" }
      ]},
      { "id": "seller", "elements": [
        { "id": "s_start", "type": "start_event" },
        { "id": "receive", "type": "task", "kind": "receive" },
        { "id": "sf1", "type": "sequence_flow", "source": "receive", "target": "s_end" },
        { "id": "s_end", "type": "end_event" }
      ]}
    ],
    "message_flows": [{ "id": "m1", "source": "order", "target": "receive" }]
  });
  let messages = Recorder::default();
  let sequences = Recorder::default();
  let hooks = {
    let messages = messages.clone();
    let sequences = sequences.clone();
    ProcessHooks::new()
      .on_message_flow_completed(move |event| messages.push(event.element.id.clone()))
      .on_sequence_flow_completed(move |event| sequences.push(event.element.id.clone()))
  };
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  instance.begin_process(vars(json!({}))).unwrap();

  assert!(instance.wait_for_completion(WAIT));
  assert_eq!(messages.entries(), vec!["m1"]);
  assert_eq!(sequences.count("m1"), 0);
  let steps = instance.steps();
  let received = steps
    .iter()
    .find(|s| s.element_id == "receive" && s.status == StepStatus::Started)
    .unwrap();
  assert_eq!(received.source_id.as_deref(), Some("m1"));
  assert_eq!(instance.status_of("s_end"), Some(StepStatus::Succeeded));
  let seller_started = steps
    .iter()
    .find(|s| s.element_id == "seller" && s.status == StepStatus::Started)
    .unwrap();
  assert_eq!(seller_started.source_id.as_deref(), Some("m1"));
  assert_eq!(instance.status_of("seller"), Some(StepStatus::Succeeded));
  assert_path_invariants(&steps);
}

#[test]
fn test_rejected_sub_process_start_routes_fault() {
  let definition = json!({
    "id": "defs",
    "processes": [{
      "id": "p",
      "elements": [
        { "id": "start", "type": "start_event" },
        { "id": "f1", "type": "sequence_flow", "source": "start", "target": "fulfil" },
        { "id": "fulfil", "type": "sub_process", "elements": [
          { "id": "sub_start", "type": "start_event" },
          { "id": "sf1", "type": "sequence_flow", "source": "sub_start", "target": "pack" },
          { "id": "pack", "type": "task" },
          { "id": "sf2", "type": "sequence_flow", "source": "pack", "target": "sub_end" },
          { "id": "sub_end", "type": "end_event" }
        ]},
        { "id": "f2", "type": "sequence_flow", "source": "fulfil", "target": "end" },
        { "id": "end", "type": "end_event" }
      ]
    }]
  });
  let sub_errors = Recorder::default();
  let process_errors = Recorder::default();
  let hooks = {
    let sub_errors = sub_errors.clone();
    let process_errors = process_errors.clone();
    ProcessHooks::new()
      .process_start_valid(|event| Ok(event.element.id != "fulfil"))
      .on_sub_process_error(move |event| {
        let name = event.fault.map(|f| f.name.clone()).unwrap_or_default();
        sub_errors.push(name);
      })
      .on_process_error(move |event| process_errors.push(event.fault.name.clone()))
  };
  let instance = ProcessInstance::new(graph(definition), hooks, EngineConfig::default()).unwrap();

  assert!(instance.begin_process(vars(json!({}))).unwrap());

  let steps = instance.steps();
  assert_eq!(count_status(&steps, "fulfil", StepStatus::Started), 1);
  assert_eq!(instance.status_of("fulfil"), Some(StepStatus::Failed));
  assert_eq!(instance.status_of("pack"), None);
  assert_eq!(sub_errors.entries(), vec!["SubProcessStartInvalid"]);
  assert_eq!(process_errors.entries(), vec!["SubProcessStartInvalid"]);
  assert!(!instance.is_completed());
  assert_path_invariants(&steps);
}
