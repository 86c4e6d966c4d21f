//! The `Sink` contract (§6) and two reference sinks (§4 "External Sink
//! Adapter"): a debug/demo `StdoutSink` grounded in the teacher's
//! `rde_io::sink_stdout::StdoutSink`, and an in-process `ChannelSink` for
//! embedding the engine or driving it from tests.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::TsqError;
use crate::result::QueryResult;

/// Terminal consumer of pipeline output. At-most-once `on_complete` or
/// `on_error` per instance (§8 "At-most-one terminal").
#[async_trait]
pub trait Sink: Send {
    async fn on_next(&mut self, result: QueryResult) -> Result<(), TsqError>;
    async fn on_error(&mut self, err: TsqError) -> Result<(), TsqError>;
    async fn on_complete(&mut self) -> Result<(), TsqError>;
}

/// Prints a one-line summary per batch. Useful for the demo CLI and manual
/// debugging; not meant for production serving.
#[derive(Default)]
pub struct StdoutSink {
    terminal_fired: bool,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn on_next(&mut self, result: QueryResult) -> Result<(), TsqError> {
        println!(
            "result node={} source={} seq={} series={}{}",
            result.node_id,
            result.data_source,
            result.sequence_id,
            result.series.len(),
            if result.cancelled { " [cancelled]" } else { "" }
        );
        for w in &result.warnings {
            println!("  warning: {w}");
        }
        Ok(())
    }

    async fn on_error(&mut self, err: TsqError) -> Result<(), TsqError> {
        debug_assert!(!self.terminal_fired, "on_error called after a terminal callback");
        self.terminal_fired = true;
        println!("query failed: {err} (code={:?})", err.code());
        Ok(())
    }

    async fn on_complete(&mut self) -> Result<(), TsqError> {
        debug_assert!(!self.terminal_fired, "on_complete called after a terminal callback");
        self.terminal_fired = true;
        info!("query complete");
        Ok(())
    }
}

/// Events delivered to a [`ChannelSink`]'s paired receiver.
pub enum SinkEvent {
    Next(QueryResult),
    Error(TsqError),
    Complete,
}

/// Forwards every callback onto an `mpsc` channel, so an embedding process
/// (or a test) can `.recv()` results without implementing `Sink` itself.
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
    terminal_fired: bool,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                terminal_fired: false,
            },
            rx,
        )
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn on_next(&mut self, result: QueryResult) -> Result<(), TsqError> {
        self.tx
            .send(SinkEvent::Next(result))
            .await
            .map_err(|_| TsqError::Internal("sink channel closed".into()))
    }

    async fn on_error(&mut self, err: TsqError) -> Result<(), TsqError> {
        debug_assert!(!self.terminal_fired, "on_error called after a terminal callback");
        self.terminal_fired = true;
        let _ = self.tx.send(SinkEvent::Error(err)).await;
        Ok(())
    }

    async fn on_complete(&mut self) -> Result<(), TsqError> {
        debug_assert!(!self.terminal_fired, "on_complete called after a terminal callback");
        self.terminal_fired = true;
        let _ = self.tx.send(SinkEvent::Complete).await;
        Ok(())
    }
}
