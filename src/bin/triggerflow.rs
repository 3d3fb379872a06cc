use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::{json, Value};
use triggerflow::utils::LoggingConfig;
use triggerflow::{
    CaseCondition, EventData, FlowConfig, ForEachOptions, Handler, MatchMode, TriggerFlow,
};

#[derive(Parser)]
#[command(name = "triggerflow", version, about = "TriggerFlow sample runner", author)]
struct Cli {
    /// 等待结果的超时（秒）
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,
    /// 以 info 级别输出每次事件分发
    #[arg(long, global = true)]
    event_log: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// add_one -> double
    Chain {
        #[arg(default_value_t = 3)]
        value: i64,
    },
    /// 逐个平方，按输入顺序汇总
    ForEach {
        #[arg(value_delimiter = ',', default_value = "3,1,2")]
        items: Vec<i64>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// 正数 / 零 / 负数分支
    Branch {
        #[arg(allow_hyphen_values = true, default_value_t = -1)]
        value: i64,
    },
    /// 从运行时流读取倒计时
    Stream {
        #[arg(default_value_t = 5)]
        count: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = FlowConfig::global()
        .clone()
        .with_default_timeout(Some(Duration::from_secs(cli.timeout)))
        .with_event_log(cli.event_log || FlowConfig::global().show_event_log);
    LoggingConfig::init_with_config(&config);

    let result = match cli.command {
        Command::Chain { value } => run_chain(config, value).await?,
        Command::ForEach { items, concurrency } => run_for_each(config, items, concurrency).await?,
        Command::Branch { value } => run_branch(config, value).await?,
        Command::Stream { count } => {
            run_stream(config, count).await?;
            return Ok(());
        }
    };

    match result {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("No result before timeout"),
    }
    Ok(())
}

fn number(data: &EventData) -> i64 {
    data.value().as_i64().unwrap_or_default()
}

async fn run_chain(config: FlowConfig, value: i64) -> anyhow::Result<Option<Value>> {
    let flow = TriggerFlow::new().with_config(config);
    flow.to(Handler::from_fn(|data| Ok(json!(number(&data) + 1))).named("add_one"))
        .to(Handler::from_fn(|data| Ok(json!(number(&data) * 2))).named("double"))
        .end();
    Ok(flow.start(json!(value)).await?)
}

async fn run_for_each(
    config: FlowConfig,
    items: Vec<i64>,
    concurrency: Option<usize>,
) -> anyhow::Result<Option<Value>> {
    let flow = TriggerFlow::new().with_config(config);
    let mut options = ForEachOptions::new();
    if let Some(limit) = concurrency {
        options = options.with_concurrency(limit);
    }
    flow.for_each_with(options)
        .to(Handler::new(|data: EventData| async move {
            let value = number(&data);
            tokio::time::sleep(Duration::from_millis(10 * value.unsigned_abs())).await;
            Ok(json!(value * value))
        })
        .named("square"))
        .end_for_each_sorted(true)?
        .end();
    Ok(flow.start(json!(items)).await?)
}

async fn run_branch(config: FlowConfig, value: i64) -> anyhow::Result<Option<Value>> {
    let flow = TriggerFlow::new().with_config(config);
    flow.match_on(MatchMode::HitFirst)
        .case(CaseCondition::when(|data| number(data) > 0))?
        .to(Handler::from_fn(|_| Ok(json!("positive"))))
        .case(json!(0))?
        .to(Handler::from_fn(|_| Ok(json!("zero"))))
        .case_else()?
        .to(Handler::from_fn(|_| Ok(json!("negative"))))
        .end_match()?
        .end();
    Ok(flow.start(json!(value)).await?)
}

async fn run_stream(config: FlowConfig, count: u64) -> anyhow::Result<()> {
    let flow = TriggerFlow::new().with_config(config);
    flow.to(Handler::new(|data: EventData| async move {
        let count = data.value().as_u64().unwrap_or_default();
        for remaining in (1..=count).rev() {
            data.put_into_stream(json!({ "remaining": remaining }));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        data.stop_stream();
        Ok(Value::Null)
    }));

    let mut stream = flow.runtime_stream(json!(count))?;
    while let Some(item) = stream.next().await {
        println!("{}", item);
    }
    Ok(())
}
