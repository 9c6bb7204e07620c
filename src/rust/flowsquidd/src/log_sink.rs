use crate::formatter::FormattedFlow;
use flowsquid_config::Config;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{error, info};

/// An append-only line log.
pub struct LogSink {
    path: PathBuf,
    writer: BufWriter<tokio::fs::File>,
}

impl LogSink {
    /// Opens `path` for appending, creating it with mode 0644.
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o644);
        let file = options.open(path).await.map_err(|e| SinkError::OpenFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!("Logging flows to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), SinkError> {
        let result = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await
        }
        .await;
        result.map_err(|e| self.write_failed(e))
    }

    pub async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await.map_err(|e| self.write_failed(e))
    }

    fn write_failed(&self, source: std::io::Error) -> SinkError {
        SinkError::LogWriteFailed {
            path: self.path.clone(),
            source,
        }
    }
}

/// The squid-style log plus, when enabled, its `.csv` companion.
pub struct LogSinks {
    log: LogSink,
    csv: Option<LogSink>,
}

impl LogSinks {
    pub async fn open(config: &Config) -> Result<Self, SinkError> {
        let log = LogSink::open(&config.log_file).await?;
        let csv = if config.csv {
            Some(LogSink::open(&config.csv_file()).await?)
        } else {
            None
        };
        Ok(Self { log, csv })
    }

    /// Writes the text line, then the CSV line if both exist. Failures
    /// are logged; the line is lost. No CSV line is written for a text
    /// line that failed.
    pub async fn write(&mut self, flow: &FormattedFlow) {
        if let Err(e) = self.log.write_line(&flow.text).await {
            error!("{e}");
            return;
        }
        if let (Some(sink), Some(line)) = (self.csv.as_mut(), flow.csv.as_deref()) {
            if let Err(e) = sink.write_line(line).await {
                error!("{e}");
            }
        }
    }

    pub async fn flush(&mut self) {
        if let Err(e) = self.log.flush().await {
            error!("{e}");
        }
        if let Some(sink) = self.csv.as_mut() {
            if let Err(e) = sink.flush().await {
                error!("{e}");
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Unable to open log file {path:?}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unable to write to {path:?}: {source}")]
    LogWriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}
