// Scenario catalog
//
// The scripted sessions this harness can run, with what each one checks

use serde::Serialize;
use std::fmt;

/// Exactly this many MonitorContendedEnter events are expected from the
/// contention scenario: worker-1, worker-2, then worker-1 again
pub const EXPECTED_CONTENDED_ENTERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Breakpoints at 63/67/71 with 67 cleared
    Breakpoints,
    /// Gated workers contending for a traced monitor
    Contention,
    /// Usage threshold crossing with a re-check
    UsageThreshold,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [
        Scenario::Breakpoints,
        Scenario::Contention,
        Scenario::UsageThreshold,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Breakpoints => "breakpoints",
            Scenario::Contention => "contention",
            Scenario::UsageThreshold => "usage-threshold",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioInfo {
    pub name: String,
    pub description: String,
    /// Debuggee class the scenario instruments
    pub class: String,
    pub checks: Vec<String>,
}

pub fn get_scenarios() -> Vec<ScenarioInfo> {
    vec![
        ScenarioInfo {
            name: Scenario::Breakpoints.name().to_string(),
            description: "Set breakpoints at three lines, clear the middle one, continue three times"
                .to_string(),
            class: "Demo".to_string(),
            checks: vec![
                "clear Demo:67 is acknowledged as Removed: Demo:67".to_string(),
                "exactly 2 breakpoint events, at Demo:63 and Demo:71".to_string(),
                "no event at Demo:67".to_string(),
            ],
        },
        ScenarioInfo {
            name: Scenario::Contention.name().to_string(),
            description: "Two workers released through gates contend for a held monitor"
                .to_string(),
            class: "ContentionDemo".to_string(),
            checks: vec![
                format!(
                    "exactly {} MonitorContendedEnter events",
                    EXPECTED_CONTENDED_ENTERS
                ),
                "contending threads in gate order: worker-1, worker-2, worker-1".to_string(),
                "observed within the poll budget (20ms x 100 by default)".to_string(),
            ],
        },
        ScenarioInfo {
            name: Scenario::UsageThreshold.name().to_string(),
            description: "Set a pool threshold at used+1, allocate past it, re-check on a miss"
                .to_string(),
            class: "UsageDemo".to_string(),
            checks: vec![
                "a UsageThresholdExceeded event is reported".to_string(),
                "the program reports exceeded=true at UsageDemo:40".to_string(),
            ],
        },
    ]
}
