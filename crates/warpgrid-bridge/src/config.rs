//! Bridge configuration: `bridge.toml` parsing and defaults.
//!
//! ```toml
//! [queue]
//! high_water_mark = 65536
//! low_water_mark = 16384
//!
//! [pipe]
//! high_water_mark = 1000
//! drain_mode = "one_shot"
//!
//! [writer]
//! policy = "await_drain"
//! ```
//!
//! Every field is optional; missing sections fall back to [`Default`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::flow::DrainMode;

/// Default high watermark of the in-memory queue bridge, in bytes.
pub const DEFAULT_QUEUE_HIGH_WATER_MARK: usize = 100;

/// Default high watermark of the watermarked pipe bridge, in bytes.
pub const DEFAULT_PIPE_HIGH_WATER_MARK: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub queue: QueueConfig,
    pub pipe: PipeConfig,
    pub writer: WriterConfig,
}

/// Settings for the in-memory push-to-pull bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queued bytes at which `write_queue_full()` turns true.
    pub high_water_mark: usize,
    /// Queued bytes at or below which the drain handler fires.
    /// `None` means "whenever the queue is not full".
    pub low_water_mark: Option<usize>,
    pub drain_mode: DrainMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_QUEUE_HIGH_WATER_MARK,
            low_water_mark: None,
            drain_mode: DrainMode::Persistent,
        }
    }
}

/// Settings for the watermarked OS pipe bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Unread bytes at which `write_queue_full()` turns true. Drain fires
    /// once the count falls below half of this.
    pub high_water_mark: usize,
    pub drain_mode: DrainMode,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_PIPE_HIGH_WATER_MARK,
            drain_mode: DrainMode::Persistent,
        }
    }
}

/// How a blocking writer over a push sink handles a full sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Return as soon as the sink accepted the chunk.
    #[default]
    FireAndForget,
    /// Block while the sink reports a full write queue.
    AwaitDrain,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub policy: WritePolicy,
}

impl BridgeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject watermark combinations that could never drain.
    pub fn validate(&self) -> BridgeResult<()> {
        self.queue.validate()?;
        self.pipe.validate()
    }

    /// Builder method: set the queue bridge configuration.
    pub fn with_queue(self, queue: QueueConfig) -> Self {
        Self { queue, ..self }
    }

    /// Builder method: set the pipe bridge configuration.
    pub fn with_pipe(self, pipe: PipeConfig) -> Self {
        Self { pipe, ..self }
    }

    /// Builder method: set the blocking writer policy.
    pub fn with_write_policy(self, policy: WritePolicy) -> Self {
        Self {
            writer: WriterConfig { policy },
            ..self
        }
    }
}

impl QueueConfig {
    pub fn with_high_water_mark(self, high_water_mark: usize) -> Self {
        Self {
            high_water_mark,
            ..self
        }
    }

    pub fn with_low_water_mark(self, low_water_mark: usize) -> Self {
        Self {
            low_water_mark: Some(low_water_mark),
            ..self
        }
    }

    pub fn with_drain_mode(self, drain_mode: DrainMode) -> Self {
        Self { drain_mode, ..self }
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.high_water_mark == 0 {
            return Err(BridgeError::Config(
                "queue.high_water_mark must be > 0".into(),
            ));
        }
        match self.low_water_mark {
            Some(low) if low >= self.high_water_mark => Err(BridgeError::Config(format!(
                "queue.low_water_mark ({low}) must be below high_water_mark ({})",
                self.high_water_mark
            ))),
            _ => Ok(()),
        }
    }
}

impl PipeConfig {
    pub fn with_high_water_mark(self, high_water_mark: usize) -> Self {
        Self {
            high_water_mark,
            ..self
        }
    }

    pub fn with_drain_mode(self, drain_mode: DrainMode) -> Self {
        Self { drain_mode, ..self }
    }

    pub fn validate(&self) -> BridgeResult<()> {
        // Drain fires below high / 2, which is unreachable for 0 and 1.
        if self.high_water_mark < 2 {
            return Err(BridgeError::Config(
                "pipe.high_water_mark must be >= 2".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.queue.high_water_mark, DEFAULT_QUEUE_HIGH_WATER_MARK);
        assert_eq!(config.queue.low_water_mark, None);
        assert_eq!(config.pipe.high_water_mark, DEFAULT_PIPE_HIGH_WATER_MARK);
        assert_eq!(config.pipe.drain_mode, DrainMode::Persistent);
        assert_eq!(config.writer.policy, WritePolicy::FireAndForget);
    }

    #[test]
    fn parse_full_document() {
        let toml_str = r#"
[queue]
high_water_mark = 65536
low_water_mark = 16384

[pipe]
high_water_mark = 4096
drain_mode = "one_shot"

[writer]
policy = "await_drain"
"#;
        let config = BridgeConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.queue.high_water_mark, 65536);
        assert_eq!(config.queue.low_water_mark, Some(16384));
        assert_eq!(config.pipe.high_water_mark, 4096);
        assert_eq!(config.pipe.drain_mode, DrainMode::OneShot);
        assert_eq!(config.writer.policy, WritePolicy::AwaitDrain);
    }

    #[test]
    fn rejects_low_mark_at_or_above_high() {
        let toml_str = r#"
[queue]
high_water_mark = 10
low_water_mark = 10
"#;
        let err = BridgeConfig::from_toml_str(toml_str).unwrap_err();
        assert!(err.to_string().contains("low_water_mark"));
    }

    #[test]
    fn rejects_zero_queue_high_mark() {
        let config = BridgeConfig::default().with_queue(QueueConfig::default().with_high_water_mark(0));
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn rejects_tiny_pipe_high_mark() {
        let config = BridgeConfig::default().with_pipe(PipeConfig::default().with_high_water_mark(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn to_toml_round_trips() {
        let config = BridgeConfig::default()
            .with_queue(QueueConfig::default().with_high_water_mark(512).with_low_water_mark(128))
            .with_write_policy(WritePolicy::AwaitDrain);
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("await_drain"));

        let parsed = BridgeConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "[pipe]\nhigh_water_mark = 64\n").unwrap();

        let config = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(config.pipe.high_water_mark, 64);
        assert_eq!(config.queue, QueueConfig::default());
    }

    #[test]
    fn from_file_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BridgeConfig::from_file(&dir.path().join("nope.toml")).is_err());
    }
}
