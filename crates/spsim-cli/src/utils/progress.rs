use indicatif::{ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use spsim::engine::progress::{Progress, ProgressCallback};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const SPINNER_TICK: Duration = Duration::from_millis(80);
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";
const BAR_TEMPLATE: &str = "{msg:<12} [{bar:40.cyan/blue}] {pos}/{len} ({eta})";
const DONE_MESSAGE: &str = "✓ Done";

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
            let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
        })
        .progress_chars("##-")
}

/// Applies one engine event to the bar.
///
/// Phases show as a spinner named after the phase; a task inside a phase turns it
/// into a bar that keeps the phase name. Positions are absolute.
fn apply(pb: &ProgressBar, event: Progress) {
    match event {
        Progress::PhaseStart { name } => {
            pb.reset();
            pb.set_length(0);
            pb.set_style(spinner_style());
            pb.set_message(name);
            pb.enable_steady_tick(SPINNER_TICK);
        }
        Progress::TaskStart { total_steps } => {
            pb.disable_steady_tick();
            let phase = pb.message();
            pb.reset();
            pb.set_style(bar_style());
            pb.set_length(total_steps);
            pb.set_message(phase);
        }
        Progress::TaskAdvance { completed } => pb.set_position(completed),
        Progress::TaskFinish => {
            if let Some(total) = pb.length() {
                pb.set_position(pb.position().max(total));
            }
            pb.finish();
        }
        Progress::PhaseFinish => {
            pb.disable_steady_tick();
            pb.finish_with_message(DONE_MESSAGE);
        }
        Progress::Message(text) if pb.is_finished() => eprintln!("  {text}"),
        Progress::Message(text) => pb.println(format!("  {text}")),
    }
}

/// Renders engine progress events on stderr.
#[derive(Clone)]
pub struct CliProgressHandler {
    pb: Arc<Mutex<ProgressBar>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        let pb = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr())
            .with_style(spinner_style());
        pb.finish_and_clear();

        Self {
            pb: Arc::new(Mutex::new(pb)),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let pb = Arc::clone(&self.pb);
        Box::new(move |event: Progress| match pb.lock() {
            Ok(guard) => apply(&guard, event),
            Err(_) => warn!("Progress bar mutex was poisoned. Cannot update progress."),
        })
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}
