//! Bridges a blocking, thread-based token producer to an async, cancellable
//! consumer via a bounded handoff buffer. The bound provides backpressure
//! and caps memory on a slow consumer; the producer thread blocks on
//! enqueue, the async consumer cooperatively awaits dequeue.

use std::sync::Arc;

use relay_domain::{CancelToken, Error};

use crate::backend::{EngineBackend, GenerateRequest};

/// Capacity of the handoff buffer between the producer thread and the
/// async consumer.
pub const BRIDGE_CAPACITY: usize = 256;

/// One item crossing the sync/async boundary.
#[derive(Debug)]
pub enum BridgeItem {
    Delta(String),
    Done,
    Error(Error),
}

/// Spawns the producer thread and returns the receiving end of the bridge.
pub fn spawn_bridge(
    engine: Arc<dyn EngineBackend>,
    request: GenerateRequest,
    cancel: CancelToken,
) -> tokio::sync::mpsc::Receiver<BridgeItem> {
    let (tx, rx) = tokio::sync::mpsc::channel(BRIDGE_CAPACITY);
    std::thread::spawn(move || engine.run_blocking(request, cancel, tx));
    rx
}

/// Cooperative consumer side of the bridge. Yields deltas in order, stops
/// at the sentinel, and surfaces an in-band error as the terminal item.
pub struct EngineStream {
    rx: tokio::sync::mpsc::Receiver<BridgeItem>,
    cancel: CancelToken,
    done: bool,
}

impl EngineStream {
    pub fn new(rx: tokio::sync::mpsc::Receiver<BridgeItem>, cancel: CancelToken) -> Self {
        Self {
            rx,
            cancel,
            done: false,
        }
    }

    /// Returns the next delta, or `None` once the stream has ended — either
    /// because the producer signalled completion, the channel closed, or
    /// the cancel flag was observed. A cancelled stream simply stops; it
    /// does not surface as an `Err`.
    pub async fn next(&mut self) -> Option<relay_domain::Result<String>> {
        if self.done || self.cancel.is_cancelled() {
            self.done = true;
            return None;
        }

        match self.rx.recv().await {
            None => {
                self.done = true;
                None
            }
            Some(BridgeItem::Done) => {
                self.done = true;
                None
            }
            Some(BridgeItem::Error(e)) => {
                self.done = true;
                Some(Err(e))
            }
            Some(BridgeItem::Delta(d)) => {
                if self.cancel.is_cancelled() {
                    self.done = true;
                    return None;
                }
                Some(Ok(d))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;

    #[tokio::test]
    async fn streams_all_deltas_in_order() {
        let engine: Arc<dyn EngineBackend> = Arc::new(MockEngine::new(vec![
            "a".into(),
            "b".into(),
            "c".into(),
        ]));
        let cancel = CancelToken::new();
        let rx = spawn_bridge(engine, mock_request(), cancel.clone());
        let mut stream = EngineStream::new(rx, cancel);

        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item.unwrap());
        }
        assert_eq!(out, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cancellation_stops_further_emission() {
        let engine: Arc<dyn EngineBackend> =
            Arc::new(MockEngine::new(vec!["a".into(), "b".into(), "c".into()]));
        let cancel = CancelToken::new();
        let rx = spawn_bridge(engine, mock_request(), cancel.clone());
        let mut stream = EngineStream::new(rx, cancel.clone());

        let first = stream.next().await;
        assert_eq!(first.unwrap().unwrap(), "a");
        cancel.cancel();
        let next = stream.next().await;
        assert!(next.is_none());
    }

    fn mock_request() -> GenerateRequest {
        GenerateRequest {
            user_text: "hi".into(),
            preamble: None,
            system_prompt_path: None,
            default_system_prompt_path: "/dev/null".into(),
            sampling_overrides: serde_json::Map::new(),
            baseline_params: Default::default(),
        }
    }
}
