//! The ring: every rank sends four tasks to its right-hand neighbour.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use dispatch_engine::{Dispatcher, RemoteTask, TaskContext, TaskKey, TaskRegistry};
use dispatch_net::Transport;
use dispatch_types::EngineConfig;

// ── Tasks ─────────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct Hello;

impl RemoteTask for Hello {
    const NAME: &'static str = "demo::hello";

    fn run(self, ctx: &TaskContext) {
        info!(rank = ctx.rank, "rank {} received", ctx.rank);
    }
}

#[derive(Serialize, Deserialize)]
struct Announce(i32);

impl RemoteTask for Announce {
    const NAME: &'static str = "demo::announce";

    fn run(self, ctx: &TaskContext) {
        info!(rank = ctx.rank, value = self.0, "received a number");
    }
}

#[derive(Serialize, Deserialize)]
struct Greeting {
    from: usize,
}

impl RemoteTask for Greeting {
    const NAME: &'static str = "demo::greeting";

    fn run(self, ctx: &TaskContext) {
        info!(rank = ctx.rank, from = self.from, "rank {} greets rank {}", self.from, ctx.rank);
    }
}

const SUM_NAME: &str = "demo::sum";
const SUM: TaskKey<(i32, i32)> = TaskKey::new(SUM_NAME);

fn registry() -> Result<TaskRegistry> {
    let mut reg = TaskRegistry::new();
    reg.register::<Hello>()?;
    reg.register::<Announce>()?;
    reg.register::<Greeting>()?;
    reg.register_fn(SUM_NAME, |(a, b): (i32, i32), ctx| {
        info!(rank = ctx.rank, origin = ctx.origin, "{a} + {b} = {}", a + b);
    })?;
    Ok(reg)
}

// ── Driver ────────────────────────────────────────────────────────────────────

pub fn run<T: Transport>(transport: T, config: EngineConfig) -> Result<()> {
    let dispatcher = Dispatcher::enable(transport, registry()?, config)?;
    let rank = dispatcher.rank();
    let next = (rank + 1) % dispatcher.size();

    dispatcher.submit(next, &Hello)?;
    dispatcher.submit(next, &Announce(rank as i32 * 10))?;
    dispatcher.submit_with(next, SUM, &(rank as i32, 100))?;
    dispatcher.submit(next, &Greeting { from: rank })?;

    let report = dispatcher.disable()?;
    info!(
        rank,
        executed = report.stats.executed(),
        messages_sent = report.stats.messages_sent(),
        discarded = report.discarded,
        "drained"
    );
    Ok(())
}
