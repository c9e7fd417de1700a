//! One connection: menu, login or registration, then the chat loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use telio::editor::{Edit, LineEditor};
use telio::line::TelnetReader;
use telio::telnet::EDIT_MODE_REQUEST;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::auth::AuthStore;
use crate::commands::Outcome;
use crate::hub::Hub;
use crate::registry::{Client, OUTBOUND_QUEUE, SessionId};

const MENU_OPTIONS: [&str; 2] = ["Login", "Register"];
const MAX_USERNAME_LEN: usize = 20;
const WRITER_GRACE: Duration = Duration::from_secs(5);

const LOGIN_BANNER: &str = "\x1b[2J\x1b[H\
================================\r\n\
|            WELCOME           |\r\n\
|        Please login:         |\r\n\
================================\r\n\
Username: ";

const REGISTER_BANNER: &str = "\x1b[2J\x1b[H\
================================\r\n\
|           REGISTER           |\r\n\
|    Create a new account      |\r\n\
================================\r\n\
New Username: ";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnState {
    MenuSelect,
    Login,
    Register,
    Chatting(String),
    Closed,
}

pub async fn handle_conn(stream: TcpStream, peer: SocketAddr, hub: Arc<Hub>) -> anyhow::Result<()> {
    let _ = stream.set_nodelay(true);
    let (rd, wr) = stream.into_split();
    serve(rd, wr, peer, hub).await
}

/// Drive one peer to completion over any byte pipe.
pub async fn serve<R, W>(rd: R, wr: W, peer: SocketAddr, hub: Arc<Hub>) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let session = SessionId::random()?;
    info!(peer = %peer, session = %session, "new connection");

    // Kept alive for the whole session so `changed()` only fires on a real request.
    let (disconnect_tx, disconnect_rx) = watch::channel(false);

    let (out, out_rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE);
    let (close_tx, close_rx) = oneshot::channel::<()>();
    let mut writer = tokio::spawn(write_loop(wr, out_rx, close_rx, disconnect_tx.clone()));

    let mut conn = Conn {
        reader: TelnetReader::new(rd).max_line_len(hub.max_line_len()),
        disconnect_rx,
        idle: hub.idle_timeout(),
        peer,
    };

    let mut state = ConnState::MenuSelect;
    loop {
        state = match state {
            ConnState::MenuSelect => menu(&mut conn, &hub, &out).await,
            ConnState::Login => login(&mut conn, &hub, &out).await,
            ConnState::Register => register(&mut conn, &hub, &out).await,
            ConnState::Chatting(name) => {
                chat(&mut conn, &hub, session, name, &out, &disconnect_tx).await;
                ConnState::Closed
            }
            ConnState::Closed => break,
        };
    }

    info!(peer = %peer, session = %session, "disconnected");
    // Other tasks may still hold this session's `Client`; the writer ends on this signal.
    let _ = close_tx.send(());
    drop(out);
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        debug!(peer = %peer, "writer stalled; dropping backlog");
        writer.abort();
    }
    Ok(())
}

/// Drain the outbound queue into the socket until the session ends, then flush what is
/// already queued and shut the write side down.
async fn write_loop<W: AsyncWrite + Unpin>(
    mut wr: W,
    mut out_rx: mpsc::Receiver<Bytes>,
    mut close_rx: oneshot::Receiver<()>,
    disconnect_tx: watch::Sender<bool>,
) {
    loop {
        tokio::select! {
            biased;
            b = out_rx.recv() => {
                let Some(b) = b else { break };
                if wr.write_all(&b[..]).await.is_err() {
                    disconnect_tx.send_replace(true);
                    return;
                }
            }
            _ = &mut close_rx => {
                out_rx.close();
                while let Ok(b) = out_rx.try_recv() {
                    if wr.write_all(&b[..]).await.is_err() {
                        return;
                    }
                }
                break;
            }
        }
    }
    let _ = wr.shutdown().await;
}

struct Conn<R> {
    reader: TelnetReader<R>,
    disconnect_rx: watch::Receiver<bool>,
    idle: Option<Duration>,
    peer: SocketAddr,
}

impl<R: AsyncRead + Unpin> Conn<R> {
    /// Next cooked line, or `None` once the session should end.
    async fn line(&mut self) -> Option<String> {
        if *self.disconnect_rx.borrow() {
            return None;
        }
        let idle = self.idle;
        let peer = self.peer;
        tokio::select! {
            r = with_idle(idle, self.reader.read_line()) => {
                ended(peer, r).map(|b| String::from_utf8_lossy(&b).trim().to_string())
            }
            _ = self.disconnect_rx.changed() => None,
        }
    }

    /// Next keystroke byte, or `None` once the session should end.
    async fn byte(&mut self) -> Option<u8> {
        if *self.disconnect_rx.borrow() {
            return None;
        }
        let idle = self.idle;
        let peer = self.peer;
        tokio::select! {
            r = with_idle(idle, self.reader.read_byte()) => ended(peer, r),
            _ = self.disconnect_rx.changed() => None,
        }
    }
}

async fn with_idle<T>(
    idle: Option<Duration>,
    fut: impl Future<Output = std::io::Result<Option<T>>>,
) -> std::io::Result<Option<T>> {
    let Some(d) = idle else {
        return fut.await;
    };
    match tokio::time::timeout(d, fut).await {
        Ok(r) => r,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "idle timeout",
        )),
    }
}

// Read errors and EOF both just end the session.
fn ended<T>(peer: SocketAddr, r: std::io::Result<Option<T>>) -> Option<T> {
    match r {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            info!(peer = %peer, "idle timeout");
            None
        }
        Err(e) => {
            debug!(peer = %peer, err = %e, "read failed");
            None
        }
    }
}

// Prompts are only sent in reply to input, so the queue never backs up before chat.
fn say(out: &mpsc::Sender<Bytes>, s: impl Into<String>) {
    let _ = out.try_send(Bytes::from(s.into()));
}

async fn menu<R: AsyncRead + Unpin>(
    conn: &mut Conn<R>,
    hub: &Hub,
    out: &mpsc::Sender<Bytes>,
) -> ConnState {
    let motd = hub.motd().await;
    let mut text = format!("*** MOTD: {motd} ***\r\n");
    text.push_str("========== MENU ==========\r\n");
    for (i, opt) in MENU_OPTIONS.iter().enumerate() {
        text.push_str(&format!("  {}) {opt}\r\n", i + 1));
    }
    text.push_str("==========================\r\nEnter choice: ");

    loop {
        say(out, text.as_str());
        let Some(choice) = conn.line().await else {
            return ConnState::Closed;
        };
        match parse_choice(&choice) {
            Some(1) => {
                debug!(peer = %conn.peer, "menu: login");
                return ConnState::Login;
            }
            Some(2) => {
                debug!(peer = %conn.peer, "menu: register");
                return ConnState::Register;
            }
            _ => say(out, "Invalid option, try again.\r\n"),
        }
    }
}

fn parse_choice(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n = s.parse::<usize>().ok()?;
    (1..=MENU_OPTIONS.len()).contains(&n).then_some(n)
}

/// ASCII letters, digits, `_` and `-`; at most 20 characters.
pub fn valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Run a store call off the async workers; hashing is slow.
async fn auth_call<T, F>(hub: &Arc<Hub>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn AuthStore) -> anyhow::Result<T> + Send + 'static,
{
    let hub = hub.clone();
    tokio::task::spawn_blocking(move || f(hub.auth()))
        .await
        .map_err(|e| anyhow::anyhow!("auth task failed: {e}"))?
}

async fn login<R: AsyncRead + Unpin>(
    conn: &mut Conn<R>,
    hub: &Arc<Hub>,
    out: &mpsc::Sender<Bytes>,
) -> ConnState {
    say(out, LOGIN_BANNER);
    let Some(name) = conn.line().await else {
        return ConnState::Closed;
    };
    say(out, "Password: ");
    let Some(pw) = conn.line().await.map(Zeroizing::new) else {
        return ConnState::Closed;
    };

    let u = name.clone();
    let ok = match auth_call(hub, move |a| a.verify(&u, &pw)).await {
        Ok(ok) => ok,
        Err(e) => {
            error!(peer = %conn.peer, err = %e, "verify failed");
            false
        }
    };
    if !ok {
        info!(peer = %conn.peer, name = %name, "login failed");
        say(out, "Invalid credentials\r\n");
        return ConnState::Closed;
    }

    info!(peer = %conn.peer, name = %name, "login");
    say(out, "Logged in\r\n");
    ConnState::Chatting(name)
}

async fn register<R: AsyncRead + Unpin>(
    conn: &mut Conn<R>,
    hub: &Arc<Hub>,
    out: &mpsc::Sender<Bytes>,
) -> ConnState {
    say(out, REGISTER_BANNER);
    let Some(name) = conn.line().await else {
        return ConnState::Closed;
    };
    say(out, "New Password: ");
    let Some(pw) = conn.line().await.map(Zeroizing::new) else {
        return ConnState::Closed;
    };
    say(out, "Confirm Password: ");
    let Some(confirm) = conn.line().await.map(Zeroizing::new) else {
        return ConnState::Closed;
    };

    if !valid_username(&name) || *pw != *confirm {
        info!(peer = %conn.peer, name = %name, "registration rejected");
        say(out, "Registration error\r\n");
        return ConnState::Closed;
    }

    let u = name.clone();
    let created = auth_call(hub, move |a| {
        if a.exists(&u)? {
            return Ok(false);
        }
        a.create(&u, &pw)
    })
    .await;
    match created {
        Ok(true) => {
            info!(peer = %conn.peer, name = %name, "registered");
            say(out, "Registered, please login\r\n");
        }
        Ok(false) => {
            info!(peer = %conn.peer, name = %name, "registration rejected: name taken");
            say(out, "Registration error\r\n");
        }
        Err(e) => {
            error!(peer = %conn.peer, name = %name, err = %e, "registration failed");
            say(out, "Registration error\r\n");
        }
    }
    ConnState::Closed
}

/// Room membership for one session. `release` leaves the room; dropping without it (a
/// cancelled or panicking task) leaves from a spawned task instead.
struct Membership {
    hub: Arc<Hub>,
    id: SessionId,
    released: bool,
}

impl Membership {
    async fn release(mut self) {
        self.hub.leave(self.id).await;
        self.released = true;
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let hub = self.hub.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(h) => {
                h.spawn(async move {
                    hub.leave(id).await;
                });
            }
            Err(_) => warn!(session = %id, "no runtime; leave skipped"),
        }
    }
}

async fn chat<R: AsyncRead + Unpin>(
    conn: &mut Conn<R>,
    hub: &Arc<Hub>,
    session: SessionId,
    name: String,
    out: &mpsc::Sender<Bytes>,
    disconnect_tx: &watch::Sender<bool>,
) {
    let _ = out.try_send(Bytes::from_static(&EDIT_MODE_REQUEST));

    let client = Arc::new(Client::new(
        session,
        name.clone(),
        out.clone(),
        disconnect_tx.clone(),
    ));
    let membership = Membership {
        hub: hub.clone(),
        id: session,
        released: false,
    };
    hub.join(client.clone()).await;

    let mut editor = LineEditor::new().with_max_len(hub.max_line_len());
    while let Some(b) = conn.byte().await {
        match editor.feed(b) {
            Edit::None => {}
            Edit::Redraw => client.show_input(editor.buffer(), editor.cursor()).await,
            Edit::Cursor => client.move_cursor(editor.cursor()).await,
            Edit::Commit(line) => {
                client.show_input(b"", 0).await;
                if line.starts_with('/') {
                    if hub.run_command(&client, &line).await == Outcome::Quit {
                        break;
                    }
                } else if !line.trim().is_empty() {
                    hub.broadcast(format!("{name}: {line}")).await;
                }
            }
        }
    }

    membership.release().await;
}
