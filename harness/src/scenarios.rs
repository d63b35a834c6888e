// Driver scripts
//
// One async script per scenario. Each aborts on the first failed step; the
// caller reports the outcome along with the session transcript.

use crate::catalog::{Scenario, EXPECTED_CONTENDED_ENTERS};
use crate::debuggee::{DEMO_CLASS, USAGE_CLASS, USAGE_REPORT_LINE};
use debugwire::{
    Driver, EventKind, Location, StateKind, SuspendPolicy, ThreadId, WireConfig, WireError,
    WireResult,
};
use tracing::info;

/// Connect to a debuggee at `addr` and run `scenario` against it
pub async fn run_scenario(addr: &str, scenario: Scenario, config: WireConfig) -> anyhow::Result<bool> {
    info!("Driving scenario {} against {}", scenario, addr);
    let mut driver = Driver::connect(addr, config).await?;

    let result = drive(&mut driver, scenario).await;
    driver.report(scenario.name(), &result);
    driver.close().await;

    Ok(result.is_ok())
}

pub async fn drive(driver: &mut Driver, scenario: Scenario) -> WireResult<()> {
    driver.note(format!("scenario {}", scenario));
    match scenario {
        Scenario::Breakpoints => breakpoints(driver).await,
        Scenario::Contention => contention(driver).await,
        Scenario::UsageThreshold => usage_threshold(driver).await,
    }
}

async fn breakpoints(driver: &mut Driver) -> WireResult<()> {
    driver.expect_event(EventKind::ThreadSuspended).await?;

    let [first, cleared, last] = [63, 67, 71].map(|line| Location::line(DEMO_CLASS, line));
    for location in [&first, &cleared, &last] {
        driver.stop_at(location.clone()).await?;
    }
    let reply = driver.clear(cleared.clone()).await?;
    driver.expect_removed(&reply, &cleared)?;

    // Out of the startup suspension, then out of each remaining breakpoint
    driver.cont().await?;
    driver.expect_event_at(EventKind::Breakpoint, &first).await?;
    driver.cont().await?;
    driver.expect_event_at(EventKind::Breakpoint, &last).await?;
    driver.cont().await?;
    driver.wait_for_disconnect().await?;

    driver.assert_event_count(EventKind::Breakpoint, None, 2)?;
    driver.assert_event_count(EventKind::Breakpoint, Some(&first), 1)?;
    driver.assert_event_count(EventKind::Breakpoint, Some(&last), 1)?;
    driver.assert_no_event_at(&cleared)
}

async fn contention(driver: &mut Driver) -> WireResult<()> {
    driver.expect_event(EventKind::ThreadSuspended).await?;
    driver
        .subscribe(StateKind::MonitorContendedEnter, SuspendPolicy::None)
        .await?;
    driver.cont().await?;

    let contended = EventKind::State(StateKind::MonitorContendedEnter);
    driver
        .poll_events_until("MonitorContendedEnter events", |t| {
            t.count_events(contended, None) >= EXPECTED_CONTENDED_ENTERS
        })
        .await?;
    driver.wait_for_disconnect().await?;
    driver.assert_event_count(contended, None, EXPECTED_CONTENDED_ENTERS)?;

    let threads: Vec<ThreadId> = driver
        .transcript()
        .events()
        .filter(|e| e.kind == contended)
        .map(|e| e.thread)
        .collect();
    match threads.as_slice() {
        [a, b, c] if a == c && a < b => Ok(()),
        other => Err(WireError::mismatch(
            "contenders worker-1, worker-2, worker-1",
            format!("threads {:?}", other),
        )),
    }
}

async fn usage_threshold(driver: &mut Driver) -> WireResult<()> {
    driver.expect_event(EventKind::ThreadSuspended).await?;
    driver
        .subscribe(StateKind::UsageThresholdExceeded, SuspendPolicy::None)
        .await?;
    let report = Location::line(USAGE_CLASS, USAGE_REPORT_LINE);
    driver.stop_at(report.clone()).await?;
    driver.cont().await?;

    driver
        .expect_event(StateKind::UsageThresholdExceeded.into())
        .await?;
    let hit = driver.expect_event_at(EventKind::Breakpoint, &report).await?;
    if hit.get("exceeded") != Some("(boolean) true") {
        return Err(WireError::mismatch("exceeded=(boolean) true", hit.to_string()));
    }

    driver.cont().await?;
    driver.wait_for_disconnect().await?;
    driver.assert_event_count(StateKind::UsageThresholdExceeded.into(), None, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debuggee::launch;
    use debugwire::{DebugSession, DebuggeeAgent};

    /// Run `program` in-process behind an agent and drive it with `script`
    async fn run(program: Scenario, script: Scenario) -> bool {
        let config = WireConfig {
            reply_timeout_ms: 5_000,
            resume_timeout_ms: 10_000,
            ..WireConfig::default()
        };
        let session = DebugSession::new(config.clone());
        let agent = DebuggeeAgent::bind("127.0.0.1:0", session.clone()).await.unwrap();
        let addr = agent.local_addr().unwrap().to_string();
        let served = tokio::spawn(agent.accept());
        let program = launch(program, session);

        let passed = run_scenario(&addr, script, config).await.unwrap();
        served.await.unwrap().unwrap();
        tokio::task::spawn_blocking(move || program.join())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        passed
    }

    #[tokio::test]
    async fn test_breakpoints_scenario() {
        assert!(run(Scenario::Breakpoints, Scenario::Breakpoints).await);
    }

    #[tokio::test]
    async fn test_contention_scenario() {
        assert!(run(Scenario::Contention, Scenario::Contention).await);
    }

    #[tokio::test]
    async fn test_usage_threshold_scenario() {
        assert!(run(Scenario::UsageThreshold, Scenario::UsageThreshold).await);
    }

    #[tokio::test]
    async fn test_script_against_wrong_program_fails() {
        // The contention program never reaches a Demo breakpoint
        assert!(!run(Scenario::Contention, Scenario::Breakpoints).await);
    }
}
