use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};

use triggerflow::{
    DataChange, EventData, ExecutionStatus, FlowConfig, Handler, StartOptions, TriggerFlow,
    TriggerFlowError,
};

fn recorder(log: &Arc<Mutex<Vec<Value>>>) -> Handler {
    let log = Arc::clone(log);
    Handler::from_fn(move |data| {
        log.lock().push(data.value().clone());
        Ok(Value::Null)
    })
}

fn failing() -> Handler {
    Handler::from_fn(|_| Err(anyhow::anyhow!("boom").into())).named("failing")
}

#[tokio::test]
async fn result_wait_times_out_softly() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.to(Handler::from_fn(|data| Ok(data.value().clone())));

    let result = flow
        .start_with(
            json!(1),
            StartOptions::default().with_timeout(Some(Duration::from_millis(50))),
        )
        .await?;
    assert_eq!(result, None);

    let execution = flow.start_execution(json!(1)).await?;
    assert_eq!(
        execution.get_result(Some(Duration::from_millis(20))).await,
        None
    );
    Ok(())
}

#[tokio::test]
async fn start_without_waiting_still_dispatches() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let flow = TriggerFlow::new();
    flow.side_branch(recorder(&seen)).end();

    assert_eq!(flow.start_with(json!("go"), StartOptions::no_wait()).await?, None);
    assert_eq!(*seen.lock(), vec![json!("go")]);
    Ok(())
}

#[tokio::test]
async fn get_result_waits_for_late_result() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.when_event("finish").end();

    let execution = flow.create_execution();
    let waiter = {
        let execution = execution.clone();
        tokio::spawn(async move { execution.get_result(Some(Duration::from_secs(1))).await })
    };
    sleep(Duration::from_millis(20)).await;
    execution.emit("finish", json!("done")).await?;

    assert_eq!(waiter.await?, Some(json!("done")));
    assert_eq!(execution.result(), Some(json!("done")));
    Ok(())
}

#[tokio::test]
async fn handler_failure_propagates_by_default() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.side_branch(failing());

    let execution = flow.create_execution_with(None, false);
    let error = execution.start(json!(null)).await.unwrap_err();
    assert!(error.to_string().contains("boom"));
    Ok(())
}

#[tokio::test]
async fn skip_exceptions_keeps_siblings_running() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let flow = TriggerFlow::new().with_config(FlowConfig::new().with_skip_exceptions(true));
    flow.side_branch(failing());
    flow.side_branch(recorder(&seen));

    flow.start_execution(json!(7)).await?;
    assert_eq!(*seen.lock(), vec![json!(7)]);

    let strict = flow.create_execution_with(Some("strict".to_string()), false);
    assert_eq!(strict.id(), "strict");
    assert!(strict.start(json!(8)).await.is_err());
    Ok(())
}

#[tokio::test]
async fn runtime_data_changes_reemit() -> anyhow::Result<()> {
    let scores = Arc::new(Mutex::new(Vec::new()));
    let flow = TriggerFlow::new();
    flow.when_runtime_data("score").side_branch(recorder(&scores));
    flow.to(Handler::new(|data: EventData| async move {
        data.set_runtime_data("score", json!(1)).await?;
        data.append_runtime_data("score", json!(2)).await?;
        data.delete_runtime_data("missing").await?;
        data.delete_runtime_data("score").await?;
        data.update_runtime_data(DataChange::Set, "score", json!(99), false)
            .await?;
        Ok(Value::Null)
    }));

    let execution = flow.start_execution(json!(null)).await?;
    assert_eq!(
        *scores.lock(),
        vec![json!(1), json!([1, 2]), Value::Null]
    );
    assert_eq!(execution.get_runtime_data("score"), Some(json!(99)));
    Ok(())
}

#[tokio::test]
async fn runtime_data_uses_dot_paths() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    let execution = flow.create_execution();
    execution.set_runtime_data("user.name", json!("ada")).await?;
    execution.set_runtime_data("user.age", json!(36)).await?;

    assert_eq!(
        execution.get_runtime_data("user"),
        Some(json!({"name": "ada", "age": 36}))
    );
    Ok(())
}

#[tokio::test]
async fn flow_data_broadcasts_to_live_executions() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let flow = TriggerFlow::new();
    {
        let seen = Arc::clone(&seen);
        flow.when_flow_data("config").side_branch(Handler::from_fn(move |data| {
            seen.lock()
                .push((data.execution_id().to_string(), data.value().clone()));
            Ok(Value::Null)
        }));
    }

    let first = flow.create_execution_with(Some("first".to_string()), false);
    let second = flow.create_execution_with(Some("second".to_string()), false);

    flow.set_flow_data("config", json!(1)).await?;
    let mut ids: Vec<String> = seen.lock().iter().map(|(id, _)| id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["first", "second"]);

    assert!(flow.remove_execution(first.id()));
    seen.lock().clear();
    flow.set_flow_data("config", json!(2)).await?;
    assert_eq!(*seen.lock(), vec![("second".to_string(), json!(2))]);

    drop(second);
    seen.lock().clear();
    flow.set_flow_data("config", json!(3)).await?;
    assert!(seen.lock().is_empty());
    assert_eq!(flow.get_flow_data("config"), Some(json!(3)));
    Ok(())
}

#[tokio::test]
async fn flow_data_set_from_handler_is_shared() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.to(Handler::new(|data: EventData| async move {
        data.append_flow_data("runs", data.value().clone()).await?;
        Ok(Value::Null)
    }));

    flow.start_execution(json!("a")).await?;
    flow.start_execution(json!("b")).await?;
    assert_eq!(flow.get_flow_data("runs"), Some(json!(["a", "b"])));

    flow.delete_flow_data("runs").await?;
    assert_eq!(flow.get_flow_data("runs"), None);
    Ok(())
}

#[tokio::test]
async fn runtime_stream_starts_execution_on_pull() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.to(Handler::new(|data: EventData| async move {
        let count = data.value().as_u64().unwrap_or_default();
        for index in 0..count {
            data.put_into_stream(json!(index));
            sleep(Duration::from_millis(5)).await;
        }
        data.stop_stream();
        Ok(Value::Null)
    }));

    let items: Vec<Value> = flow.runtime_stream(json!(3))?.collect().await;
    assert_eq!(items, vec![json!(0), json!(1), json!(2)]);
    Ok(())
}

#[tokio::test]
async fn runtime_stream_is_single_consumer() -> anyhow::Result<()> {
    let starts = Arc::new(AtomicUsize::new(0));
    let flow = TriggerFlow::new();
    {
        let starts = Arc::clone(&starts);
        flow.side_branch(Handler::from_fn(move |data| {
            starts.fetch_add(1, Ordering::SeqCst);
            data.stop_stream();
            Ok(Value::Null)
        }));
    }

    let execution = flow.create_execution();
    assert_eq!(execution.status(), ExecutionStatus::Created);

    let stream = execution.runtime_stream(json!(null))?;
    assert_eq!(execution.status(), ExecutionStatus::Started);
    assert!(matches!(
        execution.runtime_stream(json!(null)),
        Err(TriggerFlowError::StreamAlreadyTaken(id)) if id == execution.id()
    ));

    let items: Vec<Value> = stream.collect().await;
    assert!(items.is_empty());
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn runtime_stream_ends_after_idle_timeout() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.to(Handler::from_fn(|data| {
        data.put_into_stream(json!("only"));
        Ok(Value::Null)
    }));

    let items: Vec<Value> = flow
        .runtime_stream_with_timeout(json!(null), Some(Duration::from_millis(50)))?
        .collect()
        .await;
    assert_eq!(items, vec![json!("only")]);
    Ok(())
}

#[tokio::test]
async fn finished_runs_leave_the_registry() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.to(Handler::from_fn(|data| Ok(data.value().clone()))).end();

    let kept = flow.create_execution();
    for round in 0..50 {
        assert_eq!(flow.start(json!(round)).await?, Some(json!(round)));
    }
    flow.start_with(json!("bg"), StartOptions::no_wait()).await?;
    assert_eq!(flow.execution_count(), 1);
    assert!(flow.get_execution(kept.id()).is_some());

    for _ in 0..20 {
        flow.create_execution();
    }
    assert_eq!(flow.execution_count(), 1);

    drop(kept);
    assert_eq!(flow.execution_count(), 0);
    Ok(())
}

#[tokio::test]
async fn execution_starts_only_once() -> anyhow::Result<()> {
    let starts = Arc::new(AtomicUsize::new(0));
    let flow = TriggerFlow::new();
    {
        let starts = Arc::clone(&starts);
        flow.side_branch(Handler::from_fn(move |data| {
            starts.fetch_add(1, Ordering::SeqCst);
            data.stop_stream();
            Ok(Value::Null)
        }));
    }

    let streamed = flow.create_execution();
    let stream = streamed.runtime_stream(json!(1))?;
    assert!(matches!(
        streamed.start(json!(1)).await,
        Err(TriggerFlowError::AlreadyStarted(id)) if id == streamed.id()
    ));
    let items: Vec<Value> = stream.collect().await;
    assert!(items.is_empty());
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    let twice = flow.start_execution(json!(2)).await?;
    assert!(matches!(
        twice.start_and_wait(json!(2), Some(Duration::from_millis(50))).await,
        Err(TriggerFlowError::AlreadyStarted(_))
    ));
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    Ok(())
}
