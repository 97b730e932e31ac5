//! Wave Timeline
//!
//! Records the state transitions of one orchestrator invocation with
//! their timing, for the debug log and the end-of-run summary.

use std::time::{Duration, Instant};

use log::debug;

use super::WaveState;

/// A single transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: WaveState,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct WaveTimeline {
    pool: String,
    transitions: Vec<Transition>,
    start_time: Instant,
}

impl WaveTimeline {
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            transitions: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn enter(&mut self, state: WaveState) {
        debug!(
            "{}: {} -> {}",
            self.pool,
            self.current().map_or("start".to_string(), |s| s.to_string()),
            state
        );
        self.transitions.push(Transition {
            state,
            at: Instant::now(),
        });
    }

    pub fn current(&self) -> Option<WaveState> {
        self.transitions.last().map(|t| t.state)
    }

    pub fn states(&self) -> Vec<WaveState> {
        self.transitions.iter().map(|t| t.state).collect()
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Time spent in each state; the current state runs until now.
    pub fn durations(&self) -> Vec<(WaveState, Duration)> {
        let now = Instant::now();
        self.transitions
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let end = self.transitions.get(i + 1).map_or(now, |next| next.at);
                (t.state, end.duration_since(t.at))
            })
            .collect()
    }

    /// One line per state with a proportional bar.
    pub fn report(&self) -> String {
        let mut output = format!("\nWave timeline for {}:\n\n", self.pool);
        let durations = self.durations();
        let total = self.elapsed().as_millis().max(1);

        // Scale to 40 characters width
        let scale = 40.0 / total as f64;

        for (state, duration) in durations {
            let ms = duration.as_millis();
            let bar = "#".repeat(((ms as f64 * scale) as usize).max(1));
            output.push_str(&format!("{:16} |{:40}| ({} ms)\n", state.to_string(), bar, ms));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total));
        output
    }
}
