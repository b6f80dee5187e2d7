use std::future::Future;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Controls how step output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinner with a checkmark or cross on completion.
    Spinner,
    /// No ANSI, one line per step (for piped/non-TTY stderr).
    Plain,
}

impl OutputMode {
    pub fn detect() -> Self {
        if console::Term::stderr().is_term() {
            OutputMode::Spinner
        } else {
            OutputMode::Plain
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn finished_style(ok: bool) -> ProgressStyle {
    let template = if ok {
        "\u{2713} {msg:.green}"
    } else {
        "\u{2717} {msg:.red}"
    };
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Run a remote call behind a spinner labelled `label`.
pub async fn spin<F, T, E>(label: &str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    spin_with(OutputMode::detect(), label, fut).await
}

pub async fn spin_with<F, T, E>(mode: OutputMode, label: &str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let bar = match mode {
        OutputMode::Spinner => ProgressBar::new_spinner(),
        OutputMode::Plain => {
            eprintln!("{label}...");
            ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
        }
    };
    bar.set_style(spinner_style());
    bar.set_message(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));

    let result = fut.await;

    bar.set_style(finished_style(result.is_ok()));
    bar.finish_with_message(label.to_string());
    result
}
