//! Operator-facing console output.

use std::fmt::Display;

use serde::Serialize;

use crate::supervisor::{Observation, ReconcileOutcome, StopReport};

const RULE_WIDTH: usize = 60;

/// Framed block printed before a fatal exit.
pub fn fatal_banner(message: &str) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    format!(
        "{rule}\n {} {}\n{rule}\n [FATAL] {}\n{rule}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        message.trim(),
    )
}

/// Print the fatal banner to stderr and exit with status 255.
pub fn exit_fatal(err: impl Display) -> ! {
    eprintln!("{}", fatal_banner(&err.to_string()));
    std::process::exit(255)
}

/// One line per fact, for `check`.
pub fn observation_lines(observation: &Observation) -> Vec<String> {
    let mut lines = vec![format!(
        "[i] State: {} ({} running, target {})",
        observation.state,
        observation.live_count(),
        observation.target
    )];
    lines.extend(observation.live.iter().map(|record| {
        format!(
            "    pid {:>7}  {:<5} {:>9}  {}",
            record.pid, record.status, record.time, record.command
        )
    }));
    lines
}

pub fn outcome_line(outcome: &ReconcileOutcome) -> String {
    match outcome {
        ReconcileOutcome::Unknown => "[!] Process table unavailable, nothing done".to_string(),
        ReconcileOutcome::Stopped => "[!] Stop file present, nothing started".to_string(),
        ReconcileOutcome::Exact => "[i] Pool already at target".to_string(),
        ReconcileOutcome::Spawned(n) => format!("[+] Started {} worker(s)", n),
        ReconcileOutcome::Killed { killed, hung } if hung.is_empty() => {
            format!("[-] Killed {} surplus worker(s)", killed.len())
        }
        ReconcileOutcome::Killed { killed, hung } => format!(
            "[!] Killed {} surplus worker(s), still running: {}",
            killed.len() - hung.len(),
            join_pids(hung)
        ),
    }
}

pub fn stop_lines(report: &StopReport) -> Vec<String> {
    let mut lines = Vec::new();
    if report.stopped.is_empty() && report.hung.is_empty() {
        lines.push("[i] No workers running".to_string());
    }
    if !report.stopped.is_empty() {
        lines.push(format!("[-] Stopped: {}", join_pids(&report.stopped)));
    }
    if !report.hung.is_empty() {
        lines.push(format!("[!] Hung: {}", join_pids(&report.hung)));
    }
    lines
}

/// JSON rendering of a report, for `LOG_FORMAT=json` consumers.
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn join_pids(pids: &[u32]) -> String {
    pids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_banner() {
        let banner = fatal_banner("database.dbname is required\n");
        let lines: Vec<&str> = banner.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0].len(), RULE_WIDTH);
        assert!(lines[1].contains(env!("CARGO_PKG_VERSION")));
        assert_eq!(lines[3], " [FATAL] database.dbname is required");
    }

    #[test]
    fn test_outcome_lines() {
        assert_eq!(outcome_line(&ReconcileOutcome::Spawned(2)), "[+] Started 2 worker(s)");
        let partial = ReconcileOutcome::Killed {
            killed: vec![4, 5],
            hung: vec![5],
        };
        assert_eq!(
            outcome_line(&partial),
            "[!] Killed 1 surplus worker(s), still running: 5"
        );
    }

    #[test]
    fn test_stop_lines() {
        let report = StopReport {
            stopped: vec![1, 2],
            hung: vec![3],
        };
        assert_eq!(stop_lines(&report), vec!["[-] Stopped: 1 2", "[!] Hung: 3"]);
        assert_eq!(stop_lines(&StopReport::default()), vec!["[i] No workers running"]);
    }
}
