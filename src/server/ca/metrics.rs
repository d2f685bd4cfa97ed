//! Metrics of the command engine.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use crate::api::history::CommandType;
use crate::commons::util::metrics::{Metric, Target};


//------------ CommandOutcome ------------------------------------------------

/// How the execution of a top-level command ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandOutcome {
    Success,
    NoEffect,
    Failure,
}

impl CommandOutcome {
    const ALL: [CommandOutcome; 3] = [
        CommandOutcome::Success,
        CommandOutcome::NoEffect,
        CommandOutcome::Failure,
    ];

    fn index(self) -> usize {
        match self {
            CommandOutcome::Success => 0,
            CommandOutcome::NoEffect => 1,
            CommandOutcome::Failure => 2,
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CommandOutcome::Success => "success",
            CommandOutcome::NoEffect => "no_effect",
            CommandOutcome::Failure => "failure",
        })
    }
}


//------------ CommandMetrics ------------------------------------------------

#[derive(Debug, Default)]
pub struct CommandMetrics {
    /// Total execution time and number of executions per command type.
    durations: Mutex<BTreeMap<CommandType, (Duration, u64)>>,

    retries: AtomicU64,
    outcomes: [AtomicU64; 3],
}

impl CommandMetrics {
    pub fn record_duration(&self, command_type: CommandType, duration: Duration) {
        let mut durations = self.durations.lock().expect("poisoned lock");
        let entry = durations.entry(command_type).or_default();
        entry.0 += duration;
        entry.1 += 1;
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: CommandOutcome) {
        self.outcomes[outcome.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of executions of a command type.
    pub fn executions(&self, command_type: CommandType) -> u64 {
        self.durations.lock().expect("poisoned lock").get(
            &command_type
        ).map(|(_, count)| *count).unwrap_or_default()
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn outcomes(&self, outcome: CommandOutcome) -> u64 {
        self.outcomes[outcome.index()].load(Ordering::Relaxed)
    }

    /// Writes all command metrics in Prometheus text format.
    pub fn write_metrics(&self, target: &mut Target) {
        let durations = self.durations.lock().expect(
            "poisoned lock"
        ).clone();

        let duration = Metric::summary(
            "command_execution_duration_seconds",
            "time spent executing commands, including retries",
        );
        target.header(duration);
        for (command_type, (total, _)) in &durations {
            duration.series("_sum").multi(target).label(
                "command_type", command_type
            ).value(total.as_secs_f64());
        }
        for (command_type, (_, count)) in &durations {
            duration.series("_count").multi(target).label(
                "command_type", command_type
            ).value(count);
        }

        target.single(
            Metric::counter(
                "command_transaction_retries_total",
                "number of commands retried after a transaction conflict",
            ),
            self.retries(),
        );

        let outcomes = Metric::counter(
            "command_outcomes_total", "number of executed commands by outcome"
        );
        target.header(outcomes);
        for outcome in CommandOutcome::ALL {
            target.multi(outcomes).label("outcome", outcome).value(
                self.outcomes(outcome)
            );
        }
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_metrics() {
        let metrics = CommandMetrics::default();
        metrics.record_duration(
            CommandType::SubscribeToRoaAlert, Duration::from_millis(250)
        );
        metrics.record_duration(
            CommandType::SubscribeToRoaAlert, Duration::from_millis(250)
        );
        metrics.record_retry();
        metrics.record_outcome(CommandOutcome::Success);
        metrics.record_outcome(CommandOutcome::NoEffect);
        assert_eq!(metrics.executions(CommandType::SubscribeToRoaAlert), 2);

        let mut target = Target::default();
        metrics.write_metrics(&mut target);
        let text = target.into_string();

        assert!(text.contains(
            "rpkicore_command_execution_duration_seconds_sum\
             {command_type=\"SubscribeToRoaAlert\"} 0.5\n"
        ));
        assert!(text.contains(
            "rpkicore_command_execution_duration_seconds_count\
             {command_type=\"SubscribeToRoaAlert\"} 2\n"
        ));
        assert!(text.contains("rpkicore_command_transaction_retries_total 1\n"));
        assert!(text.contains(
            "rpkicore_command_outcomes_total{outcome=\"no_effect\"} 1\n"
        ));
        assert!(text.contains(
            "rpkicore_command_outcomes_total{outcome=\"failure\"} 0\n"
        ));
    }
}
