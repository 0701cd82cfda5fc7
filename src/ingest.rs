//! Crash-safe event ingestion: replay history from a durable cursor, then
//! follow the live log stream.
//!
//! The ingester is the only writer of the cursor. Every accepted log is
//! forwarded to the dispatch loop and the cursor is persisted before the next
//! one is looked at, so a crash loses at most the event in flight - and the
//! pipeline's submission re-checks make redelivery of that one harmless.

use std::{fs, io::ErrorKind, path::PathBuf, pin::Pin, sync::Arc, time::Duration};

use alloy::{providers::Provider, rpc::types::Log};
use anyhow::{anyhow, Context, Result};
use futures_util::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc::UnboundedSender,
    time::{interval, sleep, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{client::ChainClient, message::ChainEvent};

/// Upper bound on a single `eth_getLogs` block range.
pub const MAX_GETLOGS_BLOCKS: u64 = 10_000;
/// How often the cursor is bumped to the chain head during quiet periods.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(180);
const RANGE_ATTEMPTS: u32 = 3;

/// Watermark below which every log has been handed to the pipeline at most
/// once. Ordered lexicographically by `(block, log_index)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cursor {
    pub block: u64,
    /// `-1` marks a legacy cursor that only recorded the block; `i64::MAX`
    /// marks a block with no further logs expected.
    #[serde(rename = "logIndex")]
    pub log_index: i64,
}

impl Cursor {
    pub fn start() -> Cursor {
        Cursor {
            block: 0,
            log_index: -1,
        }
    }

    /// Cursor meaning "every log of `block` is accounted for".
    pub fn block_done(block: u64) -> Cursor {
        Cursor {
            block,
            log_index: i64::MAX,
        }
    }

    /// Whether a log at `(block, log_index)` is past the watermark.
    pub fn admits(&self, block: u64, log_index: u64) -> bool {
        let log_index = i64::try_from(log_index).unwrap_or(i64::MAX);
        (block, log_index) > (self.block, self.log_index)
    }

    pub fn load(path: &PathBuf) -> Result<Cursor> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Cursor::start()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read cursor {}", path.display()))
            }
        };
        Cursor::parse(&text).with_context(|| format!("unparseable cursor {}", path.display()))
    }

    /// Accepts the JSON form and the legacy bare block number. The legacy
    /// form re-admits every log of its block.
    fn parse(text: &str) -> Result<Cursor> {
        let text = text.trim();
        if let Ok(cursor) = serde_json::from_str::<Cursor>(text) {
            return Ok(cursor);
        }
        let block = text.parse::<u64>()?;
        Ok(Cursor {
            block,
            log_index: -1,
        })
    }

    pub fn persist(&self, path: &PathBuf) -> Result<()> {
        let text = serde_json::to_string(self)?;
        fs::write(path, text).with_context(|| format!("failed to write cursor {}", path.display()))
    }
}

/// Closed block ranges of at most [`MAX_GETLOGS_BLOCKS`] covering
/// `from..=head`.
fn scan_ranges(from: u64, head: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= head {
        let end = head.min(start + MAX_GETLOGS_BLOCKS - 1);
        ranges.push((start, end));
        start = end + 1;
    }
    ranges
}

pub struct Ingester {
    client: Arc<ChainClient>,
    cursor_path: PathBuf,
    cursor: Cursor,
    events: UnboundedSender<ChainEvent>,
}

impl Ingester {
    pub fn new(
        client: Arc<ChainClient>,
        cursor_path: PathBuf,
        events: UnboundedSender<ChainEvent>,
    ) -> Result<Self> {
        let cursor = Cursor::load(&cursor_path)?;
        info!(
            "resuming from block {}, log index {}",
            cursor.block, cursor.log_index
        );
        Ok(Ingester {
            client,
            cursor_path,
            cursor,
            events,
        })
    }

    /// Replay history, then follow the live stream. Only returns on a dead
    /// subscription or a closed dispatch channel.
    pub async fn run(mut self) -> Result<()> {
        self.catch_up().await?;
        self.follow().await
    }

    async fn catch_up(&mut self) -> Result<()> {
        let head = self.client.current_block().await?;
        if self.cursor.block > head {
            info!(
                "cursor block {} is ahead of head {head}, skipping replay",
                self.cursor.block
            );
            return Ok(());
        }

        let mut complete = true;
        for (start, end) in scan_ranges(self.cursor.block.max(1), head) {
            if let Err(e) = self.replay_range(start, end).await {
                // Stop the pass here: delivering later ranges would persist
                // a cursor past the hole, and the skipped blocks would never
                // be replayed. A restart resumes from the failed range.
                error!("giving up on blocks {start}..={end}: {e:#}");
                complete = false;
                break;
            }
        }

        if complete {
            self.advance(Cursor::block_done(head))?;
            info!("caught up to block {head}");
        }
        Ok(())
    }

    async fn replay_range(&mut self, start: u64, end: u64) -> Result<()> {
        let mut attempt = 0;
        let mut logs = loop {
            attempt += 1;
            match self.client.query_logs(start, end).await {
                Ok(logs) => break logs,
                Err(e) if attempt < RANGE_ATTEMPTS => {
                    warn!("log query for blocks {start}..={end} failed, retrying: {e:#}");
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e),
            }
        };

        logs.sort_by_key(|log| (log.block_number, log.log_index));
        for log in &logs {
            self.deliver(log)?;
        }
        Ok(())
    }

    async fn follow(&mut self) -> Result<()> {
        let mut logs = self.log_stream().await?;

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                log = logs.next() => {
                    let Some(log) = log else {
                        return Err(anyhow!("log subscription ended"));
                    };
                    self.deliver(&log)?;
                }
                _ = heartbeat.tick() => {
                    self.heartbeat().await;
                }
            }
        }
    }

    async fn log_stream(&self) -> Result<Pin<Box<dyn Stream<Item = Log> + Send>>> {
        let filter = self.client.log_filter();
        if self.client.pubsub {
            let subscription = self.client.provider.subscribe_logs(&filter).await?;
            Ok(Box::pin(subscription.into_stream()))
        } else {
            let poller = self.client.provider.watch_logs(&filter).await?;
            Ok(Box::pin(poller.into_stream().flat_map(stream::iter)))
        }
    }

    /// Push the cursor to the head so a restart after a quiet spell does not
    /// replay the whole gap.
    async fn heartbeat(&mut self) {
        match self.client.current_block().await {
            Ok(head) if head > self.cursor.block => {
                debug!("heartbeat: advancing cursor to block {head}");
                if let Err(e) = self.advance(Cursor::block_done(head)) {
                    warn!("failed to persist heartbeat cursor: {e:#}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!("heartbeat block query failed: {e:#}"),
        }
    }

    /// Hand one log to the dispatch loop, if it is new, and move the
    /// watermark over it.
    fn deliver(&mut self, log: &Log) -> Result<()> {
        let (Some(block), Some(log_index)) = (log.block_number, log.log_index) else {
            warn!("skipping log without a block position");
            return Ok(());
        };
        if log.removed || !self.cursor.admits(block, log_index) {
            return Ok(());
        }

        if let Some(event) = ChainEvent::decode(log) {
            debug!("delivering {event:?} from block {block}, log {log_index}");
            self.events.send(event).context("dispatch channel closed")?;
        }
        self.advance(Cursor {
            block,
            log_index: i64::try_from(log_index).unwrap_or(i64::MAX),
        })
    }

    fn advance(&mut self, cursor: Cursor) -> Result<()> {
        if cursor <= self.cursor {
            return Ok(());
        }
        self.cursor = cursor;
        self.cursor.persist(&self.cursor_path)
    }
}

#[cfg(test)]
mod tests {
    use super::{scan_ranges, Cursor, MAX_GETLOGS_BLOCKS};

    #[test]
    fn parses_json_and_legacy_forms() {
        assert_eq!(
            Cursor::parse(r#"{"block":100,"logIndex":5}"#).unwrap(),
            Cursor {
                block: 100,
                log_index: 5,
            }
        );
        assert_eq!(
            Cursor::parse("42\n").unwrap(),
            Cursor {
                block: 42,
                log_index: -1,
            }
        );
        assert!(Cursor::parse("not a cursor").is_err());
    }

    #[test]
    fn legacy_cursor_readmits_its_block() {
        let cursor = Cursor::parse("42").unwrap();
        assert!(cursor.admits(42, 0));
        assert!(cursor.admits(42, 17));
        assert!(!cursor.admits(41, 999));
    }

    #[test]
    fn watermark_is_lexicographic() {
        let cursor = Cursor {
            block: 100,
            log_index: 5,
        };
        assert!(!cursor.admits(99, 9));
        assert!(!cursor.admits(100, 5));
        assert!(cursor.admits(100, 6));
        assert!(cursor.admits(101, 0));

        let done = Cursor::block_done(250);
        assert!(!done.admits(250, u64::MAX));
        assert!(done.admits(251, 0));
    }

    #[test]
    fn persisted_form_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor");
        std::fs::write(&path, "42").unwrap();

        let cursor = Cursor::load(&path).unwrap();
        assert_eq!(cursor.log_index, -1);

        // A rewrite upgrades the legacy file to the JSON form.
        Cursor {
            block: 43,
            log_index: 2,
        }
        .persist(&path)
        .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, r#"{"block":43,"logIndex":2}"#);
        assert_eq!(
            Cursor::load(&path).unwrap(),
            Cursor {
                block: 43,
                log_index: 2,
            }
        );
    }

    #[test]
    fn missing_cursor_starts_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let cursor = Cursor::load(&dir.path().join("absent")).unwrap();
        assert_eq!(cursor, Cursor::start());
    }

    #[test]
    fn ranges_are_capped() {
        assert_eq!(scan_ranges(100, 250), vec![(100, 250)]);
        assert_eq!(
            scan_ranges(1, 25_000),
            vec![(1, 10_000), (10_001, 20_000), (20_001, 25_000)]
        );
        assert_eq!(scan_ranges(500, 499), vec![]);
        assert_eq!(scan_ranges(7, 7), vec![(7, 7)]);

        for (start, end) in scan_ranges(3, 1_000_000) {
            assert!(end - start < MAX_GETLOGS_BLOCKS);
        }
    }
}
