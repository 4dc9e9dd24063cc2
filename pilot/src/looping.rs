//! Multi-cycle driver for `pilot replay` (and any live capture source).

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cycle::{CycleReport, Pilot, PilotStats};
use crate::exit_codes;
use crate::io::capture::CaptureSource;
use crate::io::input::InputSink;
use crate::io::provider::ReasoningProvider;

/// Longest uninterrupted sleep between cancellation checks.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared stop flag, checked between cycles and during the interval sleep.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancel `token` on the first Ctrl-C so the loop stops between cycles; a
/// second Ctrl-C ends the process with `exit_codes::INTERRUPTED`.
pub fn cancel_on_interrupt(token: &CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    let token = token.clone();
    thread::Builder::new()
        .name("pilot-interrupt".to_string())
        .spawn(move || {
            if runtime.block_on(forward_interrupts(&token, tokio::signal::ctrl_c)) {
                std::process::exit(exit_codes::INTERRUPTED);
            }
        })
        .context("spawn interrupt watcher")?;
    Ok(())
}

/// Returns true when a second interrupt arrived after cancelling.
async fn forward_interrupts<F, Fut>(token: &CancelToken, mut interrupt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if let Err(err) = interrupt().await {
        warn!(%err, "interrupt handler unavailable");
        return false;
    }
    warn!("interrupt received, stopping after the current cycle");
    token.cancel();
    interrupt().await.is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub interval: Duration,
    pub max_cycles: Option<u64>,
    pub max_runtime: Option<Duration>,
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    Cancelled,
    MaxCycles,
    MaxRuntime,
    /// The capture source has nothing more to replay.
    CaptureExhausted,
}

impl LoopStop {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::MaxCycles => "max_cycles",
            Self::MaxRuntime => "max_runtime",
            Self::CaptureExhausted => "capture_exhausted",
        }
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub cycles: u64,
    pub stop: LoopStop,
    pub stats: PilotStats,
}

/// Run cycles until cancelled, a limit is reached, or the source runs dry.
///
/// Capture errors are counted and skipped; the loop still sleeps before the
/// next attempt. `on_cycle` sees every completed cycle.
pub fn run_loop<P, I, C, F>(
    pilot: &mut Pilot<P, I>,
    source: &mut C,
    config: &LoopConfig,
    cancel: &CancelToken,
    mut on_cycle: F,
) -> LoopOutcome
where
    P: ReasoningProvider,
    I: InputSink,
    C: CaptureSource,
    F: FnMut(&CycleReport),
{
    let started = Instant::now();
    let mut cycles = 0u64;
    let stop = loop {
        if cancel.is_cancelled() {
            break LoopStop::Cancelled;
        }
        if config.max_cycles.is_some_and(|max| cycles >= max) {
            break LoopStop::MaxCycles;
        }
        if config
            .max_runtime
            .is_some_and(|max| started.elapsed() >= max)
        {
            break LoopStop::MaxRuntime;
        }

        match source.capture() {
            Ok(Some(capture)) => {
                let report = pilot.run_cycle(capture);
                on_cycle(&report);
            }
            Ok(None) => break LoopStop::CaptureExhausted,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "capture failed");
                pilot.note_capture_error(&format!("{err:#}"));
            }
        }
        cycles += 1;

        if !sleep_unless_cancelled(config.interval, cancel) {
            break LoopStop::Cancelled;
        }
    };

    let stats = pilot.stats().clone();
    info!(
        cycles,
        stop = stop.as_str(),
        executed = stats.executed,
        failed = stats.failed,
        rule = stats.rule_decisions,
        external = stats.external_decisions,
        degraded = stats.degraded_decisions,
        budget_spent = stats.budget_spent,
        "loop finished"
    );
    LoopOutcome {
        cycles,
        stop,
        stats,
    }
}

/// Sleep for `total` in slices; returns false if cancelled meanwhile.
fn sleep_unless_cancelled(total: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ScriptedCapture, ScriptedProvider, ScriptedSink, capture, detection_batch, quiet_config,
        sample_heroes,
    };

    fn loop_config(max_cycles: Option<u64>) -> LoopConfig {
        LoopConfig {
            interval: Duration::from_millis(1),
            max_cycles,
            max_runtime: None,
        }
    }

    fn pilot() -> Pilot<ScriptedProvider, ScriptedSink> {
        let mut config = quiet_config();
        config.heroes = sample_heroes();
        config.safety.max_actions_per_minute = 0;
        Pilot::new(config, None, ScriptedSink::new())
    }

    #[test]
    fn stops_at_max_cycles() {
        let mut pilot = pilot();
        let mut source = ScriptedCapture::repeating(capture(detection_batch(10), Vec::new()));
        let mut seen = 0;

        let outcome = run_loop(
            &mut pilot,
            &mut source,
            &loop_config(Some(3)),
            &CancelToken::new(),
            |_| seen += 1,
        );
        assert_eq!(outcome.stop, LoopStop::MaxCycles);
        assert_eq!(outcome.cycles, 3);
        assert_eq!(seen, 3);
        assert_eq!(outcome.stats.cycles, 3);
    }

    #[test]
    fn stops_when_capture_exhausted() {
        let mut pilot = pilot();
        let mut source = ScriptedCapture::new(vec![
            Ok(capture(detection_batch(10), Vec::new())),
            Err("screen locked".to_string()),
            Ok(capture(detection_batch(10), Vec::new())),
        ]);

        let outcome = run_loop(
            &mut pilot,
            &mut source,
            &loop_config(None),
            &CancelToken::new(),
            |_| {},
        );
        assert_eq!(outcome.stop, LoopStop::CaptureExhausted);
        assert_eq!(outcome.cycles, 3);
        assert_eq!(outcome.stats.cycles, 2);
        assert_eq!(outcome.stats.capture_errors, 1);
    }

    #[test]
    fn cancellation_stops_before_next_cycle() {
        let mut pilot = pilot();
        let mut source = ScriptedCapture::repeating(capture(detection_batch(10), Vec::new()));
        let cancel = CancelToken::new();
        let handle = cancel.clone();

        let outcome = run_loop(&mut pilot, &mut source, &loop_config(None), &cancel, |report| {
            if report.cycle == 2 {
                handle.cancel();
            }
        });
        assert_eq!(outcome.stop, LoopStop::Cancelled);
        assert_eq!(outcome.cycles, 2);
        assert_eq!(source.taken(), 2);
    }

    #[test]
    fn max_runtime_ends_the_loop() {
        let mut pilot = pilot();
        let mut source = ScriptedCapture::repeating(capture(detection_batch(10), Vec::new()));
        let config = LoopConfig {
            interval: Duration::from_millis(5),
            max_cycles: None,
            max_runtime: Some(Duration::from_millis(30)),
        };

        let outcome = run_loop(&mut pilot, &mut source, &config, &CancelToken::new(), |_| {});
        assert_eq!(outcome.stop, LoopStop::MaxRuntime);
        assert!(outcome.cycles >= 1);
    }

    #[test]
    fn pre_cancelled_token_runs_nothing() {
        let mut pilot = pilot();
        let mut source = ScriptedCapture::repeating(capture(detection_batch(10), Vec::new()));
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = run_loop(&mut pilot, &mut source, &loop_config(None), &cancel, |_| {});
        assert_eq!(outcome.cycles, 0);
        assert_eq!(source.taken(), 0);
    }

    fn block_on<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(future)
    }

    #[test]
    fn first_interrupt_cancels_second_escalates() {
        let token = CancelToken::new();
        let mut interrupts = 0;
        let escalated = block_on(forward_interrupts(&token, || {
            interrupts += 1;
            std::future::ready(Ok(()))
        }));
        assert!(escalated);
        assert!(token.is_cancelled());
        assert_eq!(interrupts, 2);
    }

    #[test]
    fn missing_interrupt_handler_leaves_token_alone() {
        let token = CancelToken::new();
        let escalated = block_on(forward_interrupts(&token, || {
            std::future::ready(Err(io::Error::other("no signal driver")))
        }));
        assert!(!escalated);
        assert!(!token.is_cancelled());
    }
}
