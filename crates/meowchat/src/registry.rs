//! Connected clients.
//!
//! A [`Client`] is the shared face of one chatting session: its outbound queue, its
//! disconnect switch and the part of its screen state the broadcaster needs (render offset
//! and the line being typed). The session task owns everything else.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, MutexGuard, mpsc, watch};

use crate::render;

/// Frames a client may have queued before it counts as stalled and is disconnected.
pub const OUTBOUND_QUEUE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u128);

impl SessionId {
    pub fn random() -> anyhow::Result<Self> {
        let mut b = [0u8; 16];
        getrandom::getrandom(&mut b).map_err(|e| anyhow::anyhow!("getrandom failed: {e}"))?;
        Ok(Self(u128::from_be_bytes(b)))
    }

    pub fn short(self) -> u64 {
        // Good enough for logs: XOR high/low halves.
        (self.0 as u64) ^ ((self.0 >> 64) as u64)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.short())
    }
}

/// What the broadcaster needs to repaint a client's screen.
#[derive(Debug, Default, Clone)]
pub struct View {
    /// First chat log index shown. Only ever moves forward.
    pub offset: usize,
    pub input: Vec<u8>,
    pub cursor: usize,
}

#[derive(Debug)]
pub struct Client {
    id: SessionId,
    name: String,
    out: mpsc::Sender<Bytes>,
    disconnect_tx: watch::Sender<bool>,
    view: Mutex<View>,
}

impl Client {
    pub fn new(
        id: SessionId,
        name: String,
        out: mpsc::Sender<Bytes>,
        disconnect_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            id,
            name,
            out,
            disconnect_tx,
            view: Mutex::new(View::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue bytes for the peer without waiting. A full queue disconnects the client;
    /// `false` means the frame was dropped.
    pub fn send(&self, b: Bytes) -> bool {
        match self.out.try_send(b) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.disconnect();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Lock the view. Anything that both changes the view and queues output for it must do
    /// both under this guard so frames reach the peer in view order.
    pub async fn view(&self) -> MutexGuard<'_, View> {
        self.view.lock().await
    }

    /// Ask the session to end; its own read loop notices and runs cleanup.
    pub fn disconnect(&self) {
        self.disconnect_tx.send_replace(true);
    }

    /// Mirror the editor state and repaint the prompt row.
    pub async fn show_input(&self, input: &[u8], cursor: usize) {
        let mut v = self.view.lock().await;
        v.input.clear();
        v.input.extend_from_slice(input);
        v.cursor = cursor.min(v.input.len());
        self.send(render::input_line(&v.input, v.cursor));
    }

    pub async fn move_cursor(&self, cursor: usize) {
        let mut v = self.view.lock().await;
        v.cursor = cursor.min(v.input.len());
        self.send(render::cursor_to(v.cursor));
    }

    /// Show lines to this client only.
    pub async fn notice(&self, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let v = self.view.lock().await;
        self.send(render::notice(lines, &v));
    }
}

/// The set of sessions past login with an open connection.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    inner: Mutex<HashMap<SessionId, Arc<Client>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, client: Arc<Client>) {
        self.inner.lock().await.insert(client.id(), client);
    }

    /// Remove a session. Only the first call for an id returns the client.
    pub async fn remove(&self, id: SessionId) -> Option<Arc<Client>> {
        self.inner.lock().await.remove(&id)
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.inner.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<Arc<Client>> {
        self.inner.lock().await.values().cloned().collect()
    }

    /// Sorted display names; a user logged in twice shows up twice.
    pub async fn names(&self) -> Vec<String> {
        let mut v = {
            let m = self.inner.lock().await;
            m.values().map(|c| c.name().to_string()).collect::<Vec<_>>()
        };
        v.sort();
        v
    }

    pub async fn find_by_name(&self, name: &str) -> Vec<Arc<Client>> {
        let m = self.inner.lock().await;
        m.values()
            .filter(|c| c.name().eq_ignore_ascii_case(name.trim()))
            .cloned()
            .collect()
    }
}
