// Debuggee programs
//
// Small instrumented programs, one per scenario. Each runs on its own OS
// thread, parks at startup until the driver continues it, and reports every
// program point through a RuntimeHook.

use crate::catalog::Scenario;
use debugwire::monitor::TracedMonitor;
use debugwire::pool::{recheck, UsagePool};
use debugwire::wicket::wait_until;
use debugwire::{
    DebugSession, DebuggeeAgent, RuntimeHook, Value, WireConfig, WireError, WireResult, Wicket,
};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// Prefix of the stdout line announcing the agent address
pub const LISTENING_PREFIX: &str = "listening on";

pub const DEMO_CLASS: &str = "Demo";
pub const CONTENTION_CLASS: &str = "ContentionDemo";
pub const USAGE_CLASS: &str = "UsageDemo";
pub const USAGE_REPORT_LINE: u32 = 40;

pub fn run_program(scenario: Scenario, hook: &RuntimeHook) -> WireResult<()> {
    match scenario {
        Scenario::Breakpoints => breakpoints(hook),
        Scenario::Contention => contention(hook),
        Scenario::UsageThreshold => usage_threshold(hook),
    }
}

/// Run `scenario` on its own thread; the session closes when it returns
pub fn launch(scenario: Scenario, session: Arc<DebugSession>) -> thread::JoinHandle<WireResult<()>> {
    thread::spawn(move || {
        let hook = session.hook();
        let result = run_program(scenario, &hook);
        match &result {
            Ok(()) => info!("Program {} finished", scenario),
            Err(e) => error!("Program {} failed: {}", scenario, e),
        }
        session.close();
        result
    })
}

/// Serve one driver for `scenario`, announcing the bound address on stdout
pub async fn serve(listen: &str, scenario: Scenario, config: WireConfig) -> anyhow::Result<()> {
    let session = DebugSession::new(config);
    let agent = DebuggeeAgent::bind(listen, session.clone()).await?;
    let addr = agent.local_addr()?;

    // The parent process reads this line to find us
    println!("{} {}", LISTENING_PREFIX, addr);
    std::io::stdout().flush()?;

    let program = launch(scenario, session);
    let served = agent.accept().await;
    let outcome = tokio::task::spawn_blocking(move || program.join()).await?;

    served?;
    match outcome {
        Ok(result) => Ok(result?),
        Err(_) => anyhow::bail!("Program {} panicked", scenario),
    }
}

fn breakpoints(hook: &RuntimeHook) -> WireResult<()> {
    let main = hook.register_thread("main");
    let t = main.id();
    hook.class_prepare(DEMO_CLASS, t);
    hook.suspend_here(t);

    let mut i = 0i64;
    hook.line(DEMO_CLASS, 63, t, &[("i", Value::Int(i))]);
    i += 1;
    hook.line(DEMO_CLASS, 67, t, &[("i", Value::Int(i))]);
    i += 1;
    hook.line(DEMO_CLASS, 71, t, &[("i", Value::Int(i))]);
    Ok(())
}

fn contention(hook: &RuntimeHook) -> WireResult<()> {
    let main = hook.register_thread("main");
    let t = main.id();
    hook.class_prepare(CONTENTION_CLASS, t);
    hook.suspend_here(t);

    let config = hook.session().config().clone();
    let timeout = config.wait_time();
    let monitor = Arc::new(TracedMonitor::new(
        format!("{}.lock", CONTENTION_CLASS),
        0u32,
        hook.clone(),
    ));
    let first = Arc::new(Wicket::new());
    let second = Arc::new(Wicket::new());
    let again = Arc::new(Wicket::new());
    let round_done = Arc::new(Wicket::with_count(2));

    let await_contenders = |n: usize| -> WireResult<()> {
        if wait_until(config.poll_interval(), config.poll_attempts, || monitor.contenders() == n) {
            Ok(())
        } else {
            Err(WireError::timed_out(
                format!("{} contender(s) on {}", n, monitor.name()),
                config.poll_interval().saturating_mul(config.poll_attempts),
            ))
        }
    };

    let held = monitor.enter(t);

    let worker_1 = {
        let guard = hook.register_thread("worker-1");
        let (monitor, first, again, round_done) =
            (monitor.clone(), first.clone(), again.clone(), round_done.clone());
        thread::spawn(move || -> WireResult<()> {
            first.wait(timeout)?;
            *monitor.enter(guard.id()) += 1;
            round_done.unlock();
            again.wait(timeout)?;
            *monitor.enter(guard.id()) += 1;
            Ok(())
        })
    };
    let worker_2 = {
        let guard = hook.register_thread("worker-2");
        let (monitor, second, round_done) = (monitor.clone(), second.clone(), round_done.clone());
        thread::spawn(move || -> WireResult<()> {
            second.wait(timeout)?;
            *monitor.enter(guard.id()) += 1;
            round_done.unlock();
            Ok(())
        })
    };

    // Release one worker at a time, each only once the previous one is blocked
    first.unlock();
    await_contenders(1)?;
    second.unlock();
    await_contenders(2)?;
    drop(held);

    round_done.wait(timeout)?;
    let held = monitor.enter(t);
    again.unlock();
    await_contenders(1)?;
    drop(held);

    for worker in [worker_1, worker_2] {
        worker
            .join()
            .map_err(|_| WireError::Protocol("worker thread panicked".to_string()))??;
    }

    let entries = *monitor.enter(t);
    hook.line(CONTENTION_CLASS, 58, t, &[("entries", Value::Int(entries as i64))]);
    Ok(())
}

fn usage_threshold(hook: &RuntimeHook) -> WireResult<()> {
    let main = hook.register_thread("main");
    let t = main.id();
    hook.class_prepare(USAGE_CLASS, t);
    hook.suspend_here(t);

    let pool = UsagePool::new(format!("{}.heap", USAGE_CLASS), hook.clone());
    pool.allocate(64 * 1024, t);
    pool.set_usage_threshold(pool.used() + 1);
    for _ in 0..4 {
        pool.allocate(1024, t);
    }

    // A first negative may be a stale counter; only a second one is real
    let exceeded = recheck(|| pool.is_usage_threshold_exceeded());
    hook.line(
        USAGE_CLASS,
        USAGE_REPORT_LINE,
        t,
        &[
            ("exceeded", Value::Boolean(exceeded)),
            ("used", Value::Int(pool.used() as i64)),
        ],
    );
    pool.collect(t);
    Ok(())
}
