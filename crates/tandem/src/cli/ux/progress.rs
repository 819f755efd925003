use indicatif::{ProgressBar, ProgressStyle};

/// A spinner shown while a backend is working.
///
/// The spinner can be started and stopped any number of times. Stopping it
/// erases the spinner line; stopping an idle spinner does nothing.
#[derive(Debug, Default)]
pub struct GenerationSpinner {
    spinner: Option<ProgressBar>,
}

impl GenerationSpinner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the spinner with `msg`, or changes the caption if it is running.
    pub fn start(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        if let Some(spinner) = &self.spinner {
            spinner.set_message(msg);
            return;
        }

        let style = ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.set_message(msg);
        spinner.enable_steady_tick(std::time::Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    /// Changes the caption without restarting the animation.
    pub fn update(&self, msg: impl Into<String>) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(msg.into());
        }
    }

    /// Stops the spinner and clears it from the terminal.
    pub fn stop(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.spinner.is_some()
    }

    #[cfg(test)]
    fn message(&self) -> Option<String> {
        self.spinner.as_ref().map(|s| s.message())
    }
}

impl Drop for GenerationSpinner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spinner_lifecycle() {
        let mut spinner = GenerationSpinner::new();
        assert!(!spinner.is_running());

        spinner.start("Thinking...");
        assert!(spinner.is_running());
        assert_eq!(spinner.message().as_deref(), Some("Thinking..."));

        spinner.update("Connected to sonnet...");
        assert_eq!(spinner.message().as_deref(), Some("Connected to sonnet..."));

        // Starting a running spinner only swaps the caption.
        spinner.start("Working...");
        assert_eq!(spinner.message().as_deref(), Some("Working..."));

        spinner.stop();
        assert!(!spinner.is_running());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut spinner = GenerationSpinner::new();
        spinner.stop();
        spinner.stop();
        spinner.update("ignored");
        assert!(!spinner.is_running());
        assert_eq!(spinner.message(), None);
    }
}
