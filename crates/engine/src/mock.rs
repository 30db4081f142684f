//! A fixed-script backend used by tests elsewhere in the workspace that
//! need a `Worker` without a real loaded model.

use relay_domain::CancelToken;

use crate::backend::{EngineBackend, GenerateRequest};
use crate::bridge::BridgeItem;

pub struct MockEngine {
    deltas: Vec<String>,
}

impl MockEngine {
    pub fn new(deltas: Vec<String>) -> Self {
        Self { deltas }
    }
}

impl EngineBackend for MockEngine {
    fn run_blocking(
        &self,
        _request: GenerateRequest,
        cancel: CancelToken,
        tx: tokio::sync::mpsc::Sender<BridgeItem>,
    ) {
        for delta in &self.deltas {
            if cancel.is_cancelled() {
                return;
            }
            if tx.blocking_send(BridgeItem::Delta(delta.clone())).is_err() {
                return;
            }
        }
        let _ = tx.blocking_send(BridgeItem::Done);
    }
}
