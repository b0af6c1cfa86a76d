//! Demonstration binary: extract integers, double them, load into memory.
//!
//! Not "the engine" - just a small CLI wrapper that assembles a flow from
//! the crate's in-memory node implementations and prints its stats report.

use std::sync::{Arc, Mutex};

use clap::Parser;
use flowline::nodes::{FnTransformer, VecExtractor, VecLoader};
use flowline::{ExecOutcome, Flow};

/// Run the identity flow (extract -> double -> load) over `1..=count`.
#[derive(Parser)]
struct Args {
    /// How many integers to push through the flow.
    #[arg(long, default_value_t = 3)]
    count: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let sink = Arc::new(Mutex::new(Vec::new()));
    let mut flow: Flow<i64> = Flow::new();
    flow.from(VecExtractor::new((1..=args.count).collect(), 500), None)?;
    flow.transform(FnTransformer::new(|x: i64| x * 2))?;
    flow.to(VecLoader::new(sink.clone()))?;

    let outcome = flow.exec(None).await?;
    println!("status: {outcome:?}");
    if let ExecOutcome::Status(status) = outcome {
        println!("loaded: {:?}", sink.lock().unwrap());
        println!("{}", flow.get_stats().report());
        println!("terminal: {status}");
    }
    Ok(())
}
