//! Demonstration binary: inner vs. left join against an in-memory lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use clap::{Parser, ValueEnum};
use flowline::join::{MapJoinExtractor, OnClose};
use flowline::nodes::{VecExtractor, VecLoader};
use flowline::record::{record_map, Record};
use flowline::Flow;

#[derive(Copy, Clone, ValueEnum)]
enum JoinKind {
    Inner,
    Left,
}

#[derive(Parser)]
struct Args {
    #[arg(long, value_enum, default_value_t = JoinKind::Inner)]
    kind: JoinKind,
}

fn merge(upstream: &Record, joined: &Record) -> Record {
    Record::shallow_merge(upstream, joined)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let sink = Arc::new(Mutex::new(Vec::new()));
    let mut flow: Flow<Record> = Flow::new();
    let ext_id = flow.from(
        VecExtractor::new(
            vec![
                record_map([("id", 1.into()), ("a", 10.into())]),
                record_map([("id", 2.into()), ("a", 20.into())]),
                record_map([("id", 3.into()), ("a", 30.into())]),
            ],
            500,
        ),
        None,
    )?;

    let mut index = HashMap::new();
    index.insert(1i64, record_map([("b", 100.into())]));
    index.insert(3i64, record_map([("b", 300.into())]));

    let on_close = match args.kind {
        JoinKind::Inner => OnClose::inner(merge),
        JoinKind::Left => OnClose::left(merge, record_map([("b", Record::Null)])),
    };
    flow.join(
        MapJoinExtractor::new(index),
        ext_id,
        |r: &Record| r.get("id").and_then(Record::as_i64),
        on_close,
    )?;
    flow.to(VecLoader::new(sink.clone()))?;

    let status = flow.exec(None).await?;
    println!("status: {status:?}");
    for r in sink.lock().unwrap().iter() {
        println!("{r:?}");
    }
    println!("{}", flow.get_stats().report());
    Ok(())
}
