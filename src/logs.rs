//! Log stream multiplexing.
//!
//! `logs` merges the line streams of every selected replica into one
//! channel. Lines keep their per-source order, interleave across sources
//! by arrival, and every line is prefixed with its replica label. The
//! merged stream ends when every source has ended.

use tokio::sync::mpsc;

use crate::capability::LogLine;

/// One source to merge: a replica label and its line stream
pub struct LogSource {
    /// Prefix label (`service` or `service#replica`)
    pub label: String,
    /// The replica's line stream
    pub lines: mpsc::Receiver<LogLine>,
}

impl LogSource {
    /// Create a source from a label and stream
    pub fn new(label: impl Into<String>, lines: mpsc::Receiver<LogLine>) -> Self {
        Self {
            label: label.into(),
            lines,
        }
    }
}

/// Merge sources into a single `[label] line` stream.
///
/// One forwarding task per source feeds a shared channel; the channel
/// closes once every forwarder has drained its source and dropped its
/// sender. Stderr lines are dropped unless `include_stderr` is set.
pub fn multiplex(sources: Vec<LogSource>, include_stderr: bool) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(256);
    for source in sources {
        let tx = tx.clone();
        tokio::spawn(async move {
            let LogSource { label, mut lines } = source;
            while let Some(line) = lines.recv().await {
                if line.stderr && !include_stderr {
                    continue;
                }
                if tx.send(format!("[{label}] {}", line.message)).await.is_err() {
                    // Reader went away; stop forwarding.
                    break;
                }
            }
        });
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_labels_and_per_source_order() {
        let (web_tx, web_rx) = mpsc::channel(8);
        let (worker_tx, worker_rx) = mpsc::channel(8);

        let merged = multiplex(
            vec![
                LogSource::new("web", web_rx),
                LogSource::new("worker#2", worker_rx),
            ],
            true,
        );

        web_tx.send(LogLine::stdout("one")).await.unwrap();
        web_tx.send(LogLine::stdout("two")).await.unwrap();
        worker_tx.send(LogLine::stdout("alpha")).await.unwrap();
        drop(web_tx);
        drop(worker_tx);

        let lines = collect(merged).await;
        assert_eq!(lines.len(), 3);
        assert!(lines.contains(&"[worker#2] alpha".to_string()));

        let web_lines: Vec<&String> =
            lines.iter().filter(|l| l.starts_with("[web]")).collect();
        assert_eq!(web_lines, vec!["[web] one", "[web] two"]);
    }

    #[tokio::test]
    async fn test_stderr_filtered_unless_requested() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(LogLine::stdout("out")).await.unwrap();
        tx.send(LogLine::stderr("err")).await.unwrap();
        drop(tx);

        let lines = collect(multiplex(vec![LogSource::new("app", rx)], false)).await;
        assert_eq!(lines, vec!["[app] out"]);

        let (tx, rx) = mpsc::channel(8);
        tx.send(LogLine::stderr("err")).await.unwrap();
        drop(tx);
        let lines = collect(multiplex(vec![LogSource::new("app", rx)], true)).await;
        assert_eq!(lines, vec!["[app] err"]);
    }

    #[tokio::test]
    async fn test_stream_closes_when_all_sources_close() {
        let (tx, rx) = mpsc::channel(1);
        let merged = multiplex(vec![LogSource::new("app", rx)], true);
        drop(tx);
        assert!(collect(merged).await.is_empty());
    }

    #[tokio::test]
    async fn test_no_sources_yields_empty_closed_stream() {
        let merged = multiplex(Vec::new(), true);
        assert!(collect(merged).await.is_empty());
    }
}
