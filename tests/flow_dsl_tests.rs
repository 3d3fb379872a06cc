use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};

use triggerflow::{
    BatchOptions, CaseCondition, Chunk, CollectMode, EventData, ForEachOptions, Handler,
    JoinMode, MatchMode, Trigger, TriggerFlow, TriggerFlowError,
};

fn number(data: &EventData) -> i64 {
    data.value().as_i64().unwrap_or_default()
}

fn recorder(log: &Arc<Mutex<Vec<Value>>>) -> Handler {
    let log = Arc::clone(log);
    Handler::from_fn(move |data| {
        log.lock().push(data.value().clone());
        Ok(Value::Null)
    })
}

fn constant(label: &'static str) -> Handler {
    Handler::from_fn(move |_| Ok(json!(label)))
}

/// 按数值大小延迟，使完成顺序与输入顺序不同
fn slow_square() -> Handler {
    Handler::new(|data: EventData| async move {
        let value = number(&data);
        sleep(Duration::from_millis(20 * value.unsigned_abs())).await;
        Ok(json!(value * value))
    })
    .named("square")
}

#[tokio::test]
async fn chain_runs_steps_in_order() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.to(Handler::from_fn(|data| Ok(json!(number(&data) + 1))).named("add_one"))
        .to(Handler::from_fn(|data| Ok(json!(number(&data) * 2))).named("double"))
        .end();

    assert_eq!(flow.start(json!(3)).await?, Some(json!(8)));
    Ok(())
}

#[tokio::test]
async fn for_each_sorted_keeps_input_order() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.for_each()
        .to(slow_square())
        .end_for_each_sorted(true)?
        .end();

    assert_eq!(flow.start(json!([3, 1, 2])).await?, Some(json!([9, 1, 4])));
    Ok(())
}

#[tokio::test]
async fn for_each_unsorted_keeps_arrival_order() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.for_each().to(slow_square()).end_for_each()?.end();

    assert_eq!(flow.start(json!([3, 1, 2])).await?, Some(json!([1, 4, 9])));
    Ok(())
}

#[tokio::test]
async fn for_each_edge_inputs() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.for_each()
        .to(Handler::from_fn(|data| Ok(json!(number(&data) + 1))))
        .end_for_each_sorted(true)?
        .end();

    assert_eq!(flow.start(json!([])).await?, Some(json!([])));
    assert_eq!(flow.start(json!(41)).await?, Some(json!([42])));
    Ok(())
}

#[tokio::test]
async fn for_each_with_index_sends_pairs() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.for_each_with(ForEachOptions::new().with_index(true))
        .to(Handler::from_fn(|data| Ok(data.value().clone())))
        .end_for_each_sorted(true)?
        .end();

    assert_eq!(
        flow.start(json!(["a", "b"])).await?,
        Some(json!([[0, "a"], [1, "b"]]))
    );
    Ok(())
}

#[tokio::test]
async fn nested_for_each_restores_outer_layer() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.for_each()
        .for_each()
        .to(Handler::from_fn(|data| Ok(json!(number(&data) * 2))))
        .end_for_each_sorted(true)?
        .end_for_each_sorted(true)?
        .end();

    assert_eq!(
        flow.start(json!([[1, 2], [3]])).await?,
        Some(json!([[2, 4], [6]]))
    );
    Ok(())
}

#[tokio::test]
async fn for_each_concurrency_limit_is_respected() -> anyhow::Result<()> {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let worker = {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        Handler::new(move |data: EventData| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(data.value().clone())
            }
        })
    };

    let flow = TriggerFlow::new();
    flow.for_each_with(ForEachOptions::new().with_concurrency(2))
        .to(worker)
        .end_for_each_sorted(true)?
        .end();

    assert_eq!(
        flow.start(json!([1, 2, 3, 4, 5])).await?,
        Some(json!([1, 2, 3, 4, 5]))
    );
    assert!(peak.load(Ordering::SeqCst) <= 2);
    Ok(())
}

#[tokio::test]
async fn end_for_each_rejects_unknown_item_marks() -> anyhow::Result<()> {
    let forge = Handler::new(|data: EventData| async move {
        let mut forged = data.clone();
        forged.layer_out();
        forged.layer_in();
        forged
            .emit("Chunk[forge]-forge", data.value().clone())
            .await?;
        Ok(data.value().clone())
    })
    .named("forge");

    let flow = TriggerFlow::new();
    flow.for_each()
        .to(Chunk::named("forge", forge))
        .end_for_each_sorted(true)?
        .end();

    let error = flow.start(json!([1])).await.unwrap_err();
    assert!(matches!(error, TriggerFlowError::ContractViolation { .. }));
    Ok(())
}

#[tokio::test]
async fn batch_joins_once_after_all_chunks() -> anyhow::Result<()> {
    let joins = Arc::new(AtomicUsize::new(0));
    let join = {
        let joins = Arc::clone(&joins);
        Handler::from_fn(move |data| {
            joins.fetch_add(1, Ordering::SeqCst);
            Ok(data.value().clone())
        })
    };

    let slow = Handler::new(|_: EventData| async move {
        sleep(Duration::from_millis(30)).await;
        Ok(json!("slow"))
    });

    let flow = TriggerFlow::new();
    flow.batch([Chunk::named("a", slow), Chunk::named("b", constant("fast"))])
        .to(join)
        .end();

    assert_eq!(
        flow.start(json!(null)).await?,
        Some(json!({"a": "slow", "b": "fast"}))
    );
    assert_eq!(joins.load(Ordering::SeqCst), 1);

    assert_eq!(
        flow.start(json!(null)).await?,
        Some(json!({"a": "slow", "b": "fast"}))
    );
    assert_eq!(joins.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn batch_side_branch_keeps_cursor_and_limits_concurrency() -> anyhow::Result<()> {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let worker = |label: &'static str| {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        Handler::new(move |_: EventData| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(label))
            }
        })
    };

    let flow = TriggerFlow::new();
    let cursor = flow.batch_with(
        [
            Chunk::named("x", worker("x")),
            Chunk::named("y", worker("y")),
            Chunk::named("z", worker("z")),
        ],
        BatchOptions::new().side_branch(true).with_concurrency(1),
    );
    assert_eq!(cursor.trigger(), &Trigger::start());
    cursor.to(Handler::from_fn(|data| Ok(data.value().clone()))).end();

    assert_eq!(flow.start(json!("input")).await?, Some(json!("input")));
    sleep(Duration::from_millis(80)).await;
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn hit_first_routes_to_first_match_or_else() -> anyhow::Result<()> {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let tracked = |label: &'static str| {
        let calls = Arc::clone(&calls);
        Handler::from_fn(move |_| {
            calls.lock().push(label);
            Ok(json!(label))
        })
    };

    let flow = TriggerFlow::new();
    flow.if_condition(CaseCondition::when(|data| number(data) > 0))?
        .to(tracked("positive"))
        .elif_condition(CaseCondition::when(|data| number(data) > 10))?
        .to(tracked("large"))
        .else_condition()?
        .to(tracked("negative"))
        .end_condition()?
        .end();

    assert_eq!(flow.start(json!(-1)).await?, Some(json!("negative")));
    assert_eq!(flow.start(json!(20)).await?, Some(json!("positive")));
    assert_eq!(*calls.lock(), vec!["negative", "positive"]);
    Ok(())
}

#[tokio::test]
async fn hit_first_without_else_forwards_value() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.match_on(MatchMode::HitFirst)
        .case("ping")?
        .to(constant("pong"))
        .end_match()?
        .end();

    assert_eq!(flow.start(json!("ping")).await?, Some(json!("pong")));
    assert_eq!(flow.start(json!("other")).await?, Some(json!("other")));
    Ok(())
}

#[tokio::test]
async fn hit_all_collects_in_registration_order() -> anyhow::Result<()> {
    let slow_positive = Handler::new(|_: EventData| async move {
        sleep(Duration::from_millis(40)).await;
        Ok(json!("positive"))
    });

    let flow = TriggerFlow::new();
    flow.match_on(MatchMode::HitAll)
        .case(CaseCondition::when(|data| number(data) > 0))?
        .to(slow_positive)
        .case(CaseCondition::when(|data| number(data) % 2 == 0))?
        .to(constant("even"))
        .case(CaseCondition::when(|data| number(data) > 100))?
        .to(constant("huge"))
        .end_match()?
        .end();

    assert_eq!(
        flow.start(json!(4)).await?,
        Some(json!(["positive", "even"]))
    );
    Ok(())
}

#[tokio::test]
async fn hit_all_without_match_emits_empty_or_else() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.match_on(MatchMode::HitAll)
        .case(CaseCondition::when(|data| number(data) > 0))?
        .to(constant("positive"))
        .end_match()?
        .end();
    assert_eq!(flow.start(json!(-3)).await?, Some(json!([])));

    let with_else = TriggerFlow::new();
    with_else
        .match_on(MatchMode::HitAll)
        .case(CaseCondition::when(|data| number(data) > 0))?
        .to(constant("positive"))
        .case_else()?
        .to(constant("fallback"))
        .end_match()?
        .end();
    assert_eq!(with_else.start(json!(-3)).await?, Some(json!(["fallback"])));
    assert_eq!(with_else.start(json!(3)).await?, Some(json!(["positive"])));
    Ok(())
}

#[tokio::test]
async fn hit_all_inside_for_each_keeps_items_apart() -> anyhow::Result<()> {
    // 先到的元素后完成，兄弟实例的分支结果交错到达
    let staggered = Handler::new(|data: EventData| async move {
        let value = number(&data);
        sleep(Duration::from_millis(10 * (5 - value).unsigned_abs())).await;
        Ok(json!("pos"))
    });

    let flow = TriggerFlow::new();
    flow.for_each()
        .match_on(MatchMode::HitAll)
        .case(CaseCondition::when(|data| number(data) > 0))?
        .to(staggered)
        .case(CaseCondition::when(|data| number(data) % 2 == 0))?
        .to(constant("even"))
        .end_match()?
        .end_for_each_sorted(true)?
        .end();

    assert_eq!(
        flow.start(json!([1, 2, 3, 4])).await?,
        Some(json!([["pos"], ["pos", "even"], ["pos"], ["pos", "even"]]))
    );
    Ok(())
}

#[tokio::test]
async fn batch_inside_for_each_joins_per_item() -> anyhow::Result<()> {
    let tens = Handler::new(|data: EventData| async move {
        let value = number(&data);
        sleep(Duration::from_millis(10 * (4 - value).unsigned_abs())).await;
        Ok(json!(value * 10))
    });
    let next = Handler::from_fn(|data| Ok(json!(number(&data) + 1)));

    let flow = TriggerFlow::new();
    flow.for_each()
        .batch([Chunk::named("a", tens), Chunk::named("b", next)])
        .end_for_each_sorted(true)?
        .end();

    assert_eq!(
        flow.start(json!([1, 2, 3])).await?,
        Some(json!([
            {"a": 10, "b": 2},
            {"a": 20, "b": 3},
            {"a": 30, "b": 4},
        ]))
    );
    Ok(())
}

#[tokio::test]
async fn collect_filled_then_empty_requires_a_full_refill() -> anyhow::Result<()> {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let flow = TriggerFlow::new();
    flow.when_event("left")
        .collect("pair", Some("left"), CollectMode::FilledThenEmpty);
    flow.when_event("right")
        .collect("pair", Some("right"), CollectMode::FilledThenEmpty)
        .side_branch(recorder(&fired));

    let execution = flow.create_execution();
    execution.emit("left", json!(1)).await?;
    execution.emit("right", json!(2)).await?;
    execution.emit("left", json!(3)).await?;
    assert_eq!(*fired.lock(), vec![json!({"left": 1, "right": 2})]);

    execution.emit("right", json!(4)).await?;
    assert_eq!(
        *fired.lock(),
        vec![json!({"left": 1, "right": 2}), json!({"left": 3, "right": 4})]
    );
    Ok(())
}

#[tokio::test]
async fn collect_filled_and_update_refires_on_every_refill() -> anyhow::Result<()> {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let flow = TriggerFlow::new();
    flow.when_event("left").collect("pair", Some("left"), CollectMode::default());
    flow.when_event("right")
        .collect("pair", Some("right"), CollectMode::default())
        .side_branch(recorder(&fired));

    let execution = flow.create_execution();
    execution.emit("left", json!(1)).await?;
    execution.emit("right", json!(2)).await?;
    execution.emit("left", json!(3)).await?;
    assert_eq!(
        *fired.lock(),
        vec![json!({"left": 1, "right": 2}), json!({"left": 3, "right": 2})]
    );
    Ok(())
}

#[tokio::test]
async fn and_join_refires_with_latest_values() -> anyhow::Result<()> {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let flow = TriggerFlow::new();
    flow.when_all(
        [Trigger::runtime_data("flag"), Trigger::event("phase")],
        JoinMode::And,
    )?
    .side_branch(recorder(&fired));

    let execution = flow.create_execution();
    execution.set_runtime_data("flag", json!("a")).await?;
    assert!(fired.lock().is_empty());

    execution.emit("phase", json!("p")).await?;
    execution.set_runtime_data("flag", json!("b")).await?;
    assert_eq!(
        *fired.lock(),
        vec![
            json!({"flag": "a", "phase": "p"}),
            json!({"flag": "b", "phase": "p"}),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn or_join_only_forwards_first_arrival() -> anyhow::Result<()> {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let simple = Arc::new(Mutex::new(Vec::new()));
    let flow = TriggerFlow::new();
    flow.when_all(["a", "b"], JoinMode::Or)?
        .side_branch(recorder(&fired));
    flow.when_all(["a", "b"], JoinMode::SimpleOr)?
        .side_branch(recorder(&simple));

    let execution = flow.create_execution();
    execution.emit("b", json!(2)).await?;
    execution.emit("a", json!(1)).await?;

    assert_eq!(
        *fired.lock(),
        vec![json!({"kind": "event", "trigger": "b", "value": 2})]
    );
    assert_eq!(*simple.lock(), vec![json!(2)]);

    let other = flow.create_execution();
    other.emit("a", json!(1)).await?;
    assert_eq!(fired.lock().len(), 2);
    Ok(())
}

#[tokio::test]
async fn side_branch_keeps_main_path() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let flow = TriggerFlow::new();
    flow.side_branch(recorder(&seen))
        .to(Handler::from_fn(|data| Ok(json!(number(&data) + 1))))
        .end();

    assert_eq!(flow.start(json!(1)).await?, Some(json!(2)));
    assert_eq!(*seen.lock(), vec![json!(1)]);
    Ok(())
}

#[tokio::test]
async fn explicit_result_wins_over_end() -> anyhow::Result<()> {
    let flow = TriggerFlow::new();
    flow.to(Handler::from_fn(|data| {
        data.set_result(json!("explicit"));
        Ok(json!("implicit"))
    }))
    .end();

    assert_eq!(flow.start(json!(null)).await?, Some(json!("explicit")));
    Ok(())
}

#[tokio::test]
async fn construction_misuse_is_rejected() {
    let flow = TriggerFlow::new();

    let outside = flow.to(constant("x"));
    assert!(matches!(
        outside.case(1_i64),
        Err(TriggerFlowError::InvalidConstruct { method: "case", .. })
    ));
    assert!(matches!(
        outside.end_match(),
        Err(TriggerFlowError::InvalidConstruct { method: "end_match", .. })
    ));
    assert!(matches!(
        outside.end_for_each(),
        Err(TriggerFlowError::InvalidConstruct { method: "end_for_each", .. })
    ));

    let matching = flow.match_on(MatchMode::HitFirst);
    assert!(matches!(
        matching.case_else(),
        Err(TriggerFlowError::InvalidConstruct { method: "case_else", .. })
    ));

    let with_else = matching
        .case(1_i64)
        .and_then(|cursor| cursor.case_else())
        .expect("first else is valid");
    assert!(matches!(
        with_else.case_else(),
        Err(TriggerFlowError::InvalidConstruct { method: "case_else", .. })
    ));

    assert!(matches!(
        flow.match_on(MatchMode::HitFirst).end_match(),
        Err(TriggerFlowError::InvalidConstruct { method: "end_match", .. })
    ));

    assert!(matches!(
        flow.when_all(Vec::<Trigger>::new(), JoinMode::And),
        Err(TriggerFlowError::InvalidConstruct { method: "when_all", .. })
    ));

    assert!(matches!(
        flow.to_named("missing"),
        Err(TriggerFlowError::UnknownChunk(name)) if name == "missing"
    ));
}
