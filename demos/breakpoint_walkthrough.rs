// Walk through a breakpoint session in one process.
//
// Run with: cargo run -p debugwire --example breakpoint_walkthrough

use debugwire::{DebugSession, DebuggeeAgent, Driver, EventKind, Location, Value, WireConfig};
use std::thread;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debugwire=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = WireConfig::default();
    let session = DebugSession::new(config.clone());
    let agent = DebuggeeAgent::bind("127.0.0.1:0", session.clone()).await?;
    let addr = agent.local_addr()?.to_string();
    tokio::spawn(agent.accept());

    // The debuggee: a counting loop, parked until the driver says go
    let program = {
        let session = session.clone();
        thread::spawn(move || {
            let hook = session.hook();
            let main = hook.register_thread("main");
            hook.suspend_here(main.id());
            let mut sum = 0i64;
            for i in 0..4 {
                sum += i;
                hook.line("Walkthrough", 12, main.id(), &[("i", Value::Int(i)), ("sum", Value::Int(sum))]);
            }
            session.close();
        })
    };

    let mut driver = Driver::connect(&addr, config).await?;
    driver.expect_event(EventKind::ThreadSuspended).await?;
    let location = Location::line("Walkthrough", 12);
    println!("{}", driver.stop_at(location.clone()).await?);

    driver.cont().await?;
    for _ in 0..2 {
        let event = driver.expect_event_at(EventKind::Breakpoint, &location).await?;
        println!("{}", event);
        driver.cont().await?;
    }

    // Cleared while parked, so the final iteration runs silently
    let event = driver.expect_event_at(EventKind::Breakpoint, &location).await?;
    println!("{}", event);
    println!("{}", driver.clear(location).await?);
    driver.cont().await?;

    driver.wait_for_disconnect().await?;
    if program.join().is_err() {
        return Err("debuggee thread panicked".into());
    }

    println!("--- transcript ---\n{}", driver.transcript().render());
    Ok(())
}
