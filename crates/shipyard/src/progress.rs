//! Colored, timestamped step output for the terminal

use chrono::Local;
use colored::Colorize;
use shipyard_deploy::{DeploymentError, StepObserver};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct ConsoleProgress {
    start_time: Instant,
    finished: Mutex<Vec<(String, Duration)>>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            finished: Mutex::new(Vec::new()),
        }
    }

    fn timestamp() -> String {
        Local::now().format("%H:%M:%S").to_string()
    }

    pub fn print_summary(&self, title: &str) {
        let finished = self.finished.lock().unwrap_or_else(|e| e.into_inner());
        let slowest = finished.iter().max_by_key(|(_, d)| *d);

        println!();
        println!("{}", "═".repeat(44));
        println!("{}", title.cyan().bold());
        println!("{}", "─".repeat(44));
        println!(
            "Total time:    {}",
            format_duration(self.start_time.elapsed()).green()
        );
        println!("Steps:         {}", finished.len());
        if let Some((step, duration)) = slowest {
            println!("Slowest step:  {} ({})", step, format_duration(*duration));
        }
        println!("{}", "═".repeat(44));
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl StepObserver for ConsoleProgress {
    fn started(&self, index: usize, total: usize, step: &str) {
        println!(
            "[{}] {} {} {}",
            Self::timestamp().dimmed(),
            "▶".cyan(),
            format!("[{}/{}]", index, total).dimmed(),
            step
        );
    }

    fn finished(&self, step: &str, elapsed: Duration) {
        println!(
            "[{}] {} {} ({})",
            Self::timestamp().dimmed(),
            "✓".green().bold(),
            step,
            format_duration(elapsed).dimmed()
        );
        self.finished
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((step.to_string(), elapsed));
    }

    fn failed(&self, step: &str, error: &DeploymentError) {
        println!(
            "[{}] {} {}: {}",
            Self::timestamp().dimmed(),
            "✗".red().bold(),
            step,
            error.message.red()
        );
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 60 {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    } else if total_secs >= 1 {
        format!("{}.{}s", total_secs, millis / 100)
    } else {
        format!("{}ms", millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_pick_a_readable_unit() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(4_700)), "4.7s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }
}
