//! In-memory radio link that answers framed calls with scripted notifications

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use wallbox_ble_controller::{ChunkStream, LinkError, Pairing, RadioLink};
use wallbox_proto::Call;
use wallbox_proto::ble::WriteMode;

type Responder = Box<dyn FnMut(&Call) -> Vec<Vec<u8>> + Send>;

struct Inner {
    services: Vec<Uuid>,
    writes: Mutex<Vec<(Uuid, Vec<u8>, WriteMode)>>,
    pending: Mutex<Vec<u8>>,
    calls: Mutex<Vec<Call>>,
    pair_calls: Mutex<u32>,
    responder: Mutex<Responder>,
    notify_tx: mpsc::UnboundedSender<Vec<u8>>,
    notify_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

#[derive(Clone)]
pub struct ScriptedLink {
    inner: Arc<Inner>,
}

impl ScriptedLink {
    pub fn new(services: Vec<Uuid>, responder: impl FnMut(&Call) -> Vec<Vec<u8>> + Send + 'static) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                services,
                writes: Mutex::new(Vec::new()),
                pending: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
                pair_calls: Mutex::new(0),
                responder: Mutex::new(Box::new(responder)),
                notify_tx,
                notify_rx: Mutex::new(Some(notify_rx)),
            }),
        }
    }

    /// Push an unsolicited notification chunk
    pub fn notify(&self, chunk: &[u8]) {
        let _ = self.inner.notify_tx.send(chunk.to_vec());
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>, WriteMode)> {
        self.inner.writes.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn pair_calls(&self) -> u32 {
        *self.inner.pair_calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl RadioLink for ScriptedLink {
    async fn services(&self) -> Result<Vec<Uuid>, LinkError> {
        Ok(self.inner.services.clone())
    }

    async fn pair(&self) -> Result<Pairing, LinkError> {
        *self.inner.pair_calls.lock().unwrap() += 1;
        Ok(Pairing::NotApplicable)
    }

    async fn subscribe(&self, _characteristic: Uuid) -> Result<ChunkStream, LinkError> {
        let rx = self.inner.notify_rx.lock().unwrap().take().expect("subscribed twice");
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })))
    }

    async fn write(&self, characteristic: Uuid, chunk: &[u8], mode: WriteMode) -> Result<(), LinkError> {
        self.inner.writes.lock().unwrap().push((characteristic, chunk.to_vec(), mode));

        let mut pending = self.inner.pending.lock().unwrap();
        pending.extend_from_slice(chunk);
        if let Ok(call) = Call::decode(&pending) {
            pending.clear();
            self.inner.calls.lock().unwrap().push(call.clone());
            let mut responder = self.inner.responder.lock().unwrap();
            let replies = (*responder)(&call);
            for reply in replies {
                let _ = self.inner.notify_tx.send(reply);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        Ok(())
    }
}

/// `{"id": id, "r": result}` split into notification-sized pieces
pub fn reply_chunks(id: u16, result: Value, chunk: usize) -> Vec<Vec<u8>> {
    let bytes = serde_json::to_vec(&json!({"id": id, "r": result})).unwrap();
    bytes.chunks(chunk).map(<[u8]>::to_vec).collect()
}

/// An id that is never `id`
pub fn other_id(id: u16) -> u16 {
    id % 999 + 1
}
