use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::utils::{ensure_dir, find_char_boundary};

const PREVIEW_BYTES: usize = 200;

/// Append-only session log, one file per process start.
#[derive(Debug, Clone)]
pub struct Logger {
    log_file: PathBuf,
}

/// Counters for one pane's synchronization traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncMetrics {
    /// Diffs computed for attached views.
    pub renders: usize,
    pub messages_sent: usize,
    /// Updates withheld from the view that caused them.
    pub echoes_suppressed: usize,
    pub remote_events: usize,
    /// Updates where only buffer columns changed.
    pub buffer_patches: usize,
    pub send_failures: usize,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of produced updates that were sent rather than suppressed.
    pub fn delivery_rate(&self) -> f64 {
        let produced = self.messages_sent + self.echoes_suppressed + self.send_failures;
        if produced == 0 {
            return 0.0;
        }
        (self.messages_sent as f64 / produced as f64) * 100.0
    }

    pub fn merge(&mut self, other: &SyncMetrics) {
        self.renders += other.renders;
        self.messages_sent += other.messages_sent;
        self.echoes_suppressed += other.echoes_suppressed;
        self.remote_events += other.remote_events;
        self.buffer_patches += other.buffer_patches;
        self.send_failures += other.send_failures;
    }

    pub fn display(&self) {
        use colored::Colorize;
        println!("\n{}", "━━━━━━━━━ Sync Statistics ━━━━━━━━━".bright_cyan().bold());
        println!("Renders: {}", self.renders);
        println!("Messages sent: {}", self.messages_sent.to_string().green());
        println!("Echoes suppressed: {}", self.echoes_suppressed.to_string().yellow());
        println!("Buffer-only patches: {}", self.buffer_patches);
        println!("Remote events: {}", self.remote_events);
        println!("Send failures: {}", self.send_failures.to_string().red());
        println!("Delivery rate: {:.1}%", self.delivery_rate());
        println!("{}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_cyan());
    }
}

impl Logger {
    pub fn new(log_dir: &str) -> Result<Self> {
        let dir = PathBuf::from(log_dir);
        ensure_dir(&dir)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let log_file = dir.join(format!("session_{}.log", timestamp));

        Ok(Self { log_file })
    }

    pub fn path(&self) -> &Path {
        &self.log_file
    }

    pub fn log(&self, message: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?;

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "[{}] {}", timestamp, message)?;
        Ok(())
    }

    pub fn log_render(&self, view: &str, summary: &str) -> Result<()> {
        self.log(&format!("RENDER {}: {}", view, summary))
    }

    pub fn log_suppressed(&self, view: &str, summary: &str) -> Result<()> {
        self.log(&format!("SUPPRESSED echo to {}: {}", view, summary))
    }

    pub fn log_remote_event(&self, view: &str, event: &str, payload: &str) -> Result<()> {
        let end = find_char_boundary(payload, PREVIEW_BYTES);
        let preview = if end < payload.len() {
            format!("{}...", &payload[..end])
        } else {
            payload.to_string()
        };
        self.log(&format!("EVENT {} from {}: {}", event, view, preview))
    }

    pub fn log_error(&self, error: &str) -> Result<()> {
        self.log(&format!("ERROR: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_sync_metrics_new() {
        let metrics = SyncMetrics::new();
        assert_eq!(metrics.renders, 0);
        assert_eq!(metrics.messages_sent, 0);
        assert_eq!(metrics.echoes_suppressed, 0);
    }

    #[test]
    fn test_delivery_rate_zero() {
        assert_eq!(SyncMetrics::new().delivery_rate(), 0.0);
    }

    #[test]
    fn test_delivery_rate_calculation() {
        let mut metrics = SyncMetrics::new();
        metrics.messages_sent = 3;
        metrics.echoes_suppressed = 1;
        assert_eq!(metrics.delivery_rate(), 75.0);
    }

    #[test]
    fn test_merge_sums_counters() {
        let mut total = SyncMetrics::new();
        let mut pane = SyncMetrics::new();
        pane.renders = 2;
        pane.remote_events = 1;
        total.merge(&pane);
        total.merge(&pane);
        assert_eq!(total.renders, 4);
        assert_eq!(total.remote_events, 2);
    }

    #[test]
    fn test_logger_creation() {
        let test_log_dir = "test_logs_temp";
        let logger = Logger::new(test_log_dir).unwrap();
        assert!(logger.path().parent().unwrap().exists());
        let _ = fs::remove_dir_all(test_log_dir);
    }

    #[test]
    fn test_logger_writes_entries() {
        let test_log_dir = "test_logs_temp2";
        let logger = Logger::new(test_log_dir).unwrap();
        logger.log_render("view-1", "layout, render #1").unwrap();
        logger.log_remote_event("view-1", "relayout", &"x".repeat(300)).unwrap();

        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("RENDER view-1: layout, render #1"));
        assert!(content.contains("EVENT relayout from view-1"));
        assert!(content.contains("..."));
        let _ = fs::remove_dir_all(test_log_dir);
    }
}
