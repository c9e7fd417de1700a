//! The shared room: chat log, MOTD, connected clients and the command table.
//!
//! Lock order is board, then registry, then a client's view. The board lock is held across
//! append and fan-out so every client's queue sees frames in log order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::AuthStore;
use crate::commands::{self, CommandContext, CommandTable, Outcome};
use crate::config::Settings;
use crate::registry::{Client, ClientRegistry, SessionId};
use crate::render;

#[derive(Debug)]
struct Board {
    motd: String,
    /// Append-only.
    lines: Vec<String>,
}

pub struct Hub {
    board: Mutex<Board>,
    clients: ClientRegistry,
    commands: CommandTable,
    admins: Vec<String>,
    auth: Arc<dyn AuthStore>,
    started: Instant,
    idle_timeout: Option<Duration>,
    max_line_len: usize,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("commands", &self.commands)
            .field("admins", &self.admins)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl Hub {
    pub fn new(settings: &Settings, auth: Arc<dyn AuthStore>, commands: CommandTable) -> Self {
        Self {
            board: Mutex::new(Board {
                motd: settings.motd.clone(),
                lines: Vec::new(),
            }),
            clients: ClientRegistry::new(),
            commands,
            admins: settings.admins.clone(),
            auth,
            started: Instant::now(),
            idle_timeout: settings.idle_timeout,
            max_line_len: settings.max_line_len,
        }
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn auth(&self) -> &dyn AuthStore {
        self.auth.as_ref()
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Exact match: account names are case-sensitive, so `ROOT` is not `root`.
    pub fn is_admin(&self, name: &str) -> bool {
        self.admins.iter().any(|a| a == name)
    }

    pub async fn motd(&self) -> String {
        self.board.lock().await.motd.clone()
    }

    pub async fn log_len(&self) -> usize {
        self.board.lock().await.lines.len()
    }

    pub async fn log_snapshot(&self) -> Vec<String> {
        self.board.lock().await.lines.clone()
    }

    /// Append a line to the chat log and repaint every connected client.
    pub async fn broadcast(&self, line: impl Into<String>) {
        let line = line.into();
        let mut board = self.board.lock().await;
        board.lines.push(line);
        self.fan_out(&board).await;
    }

    pub async fn update_motd(&self, motd: String, by: &str) {
        let mut board = self.board.lock().await;
        board.motd = motd;
        board.lines.push(format!("*** MOTD updated by {by} ***"));
        info!(by = %by, motd = %board.motd, "motd updated");
        self.fan_out(&board).await;
    }

    async fn fan_out(&self, board: &Board) {
        for c in self.clients.snapshot().await {
            let v = c.view().await;
            if !c.send(render::screen(&board.motd, &board.lines, &v)) {
                // Its own session notices and cleans up.
                debug!(session = %c.id(), name = %c.name(), "render dropped");
            }
        }
    }

    /// Full repaint for one client.
    pub async fn render_for(&self, client: &Client) {
        let board = self.board.lock().await;
        let v = client.view().await;
        client.send(render::screen(&board.motd, &board.lines, &v));
    }

    /// Hide everything logged so far from this client's screen.
    pub async fn clear_for(&self, client: &Client) {
        let board = self.board.lock().await;
        let mut v = client.view().await;
        v.offset = board.lines.len();
        client.send(render::screen(&board.motd, &board.lines, &v));
    }

    /// Enter the room: register, announce, then paint.
    pub async fn join(&self, client: Arc<Client>) {
        let name = client.name().to_string();
        self.clients.insert(client.clone()).await;
        info!(session = %client.id(), name = %name, "joined");
        self.broadcast(format!("*** {name} joined ***")).await;
        self.render_for(&client).await;
    }

    /// Leave the room. Only the first call for a session announces anything.
    pub async fn leave(&self, id: SessionId) -> Option<Arc<Client>> {
        let client = self.clients.remove(id).await?;
        info!(session = %id, name = %client.name(), "left");
        self.broadcast(format!("*** {} left ***", client.name())).await;
        Some(client)
    }

    /// Disconnect every session logged in as `name`. Returns how many were signalled.
    pub async fn kick(&self, name: &str, by: &str) -> usize {
        let targets = self.clients.find_by_name(name).await;
        for c in &targets {
            c.notice(&[format!("*** kicked by {by} ***")]).await;
            c.disconnect();
        }
        if !targets.is_empty() {
            info!(target_name = %name, by = %by, n = targets.len(), "kick");
        }
        targets.len()
    }

    /// Run one `/command` line for `client`, showing any replies to it alone.
    pub async fn run_command(&self, client: &Client, line: &str) -> Outcome {
        let (name, args) = commands::parse(line);
        let mut ctx = CommandContext::new(self, client);
        let outcome = self.commands.dispatch(&name, &args, &mut ctx).await;
        client.notice(&ctx.take_replies()).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::{mpsc, watch};

    use crate::commands::CommandHandler;
    use crate::registry::OUTBOUND_QUEUE;

    struct NoAuth;

    impl AuthStore for NoAuth {
        fn exists(&self, _: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        fn verify(&self, _: &str, _: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        fn create(&self, _: &str, _: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct Fails;

    #[async_trait]
    impl CommandHandler for Fails {
        async fn run(&self, _: &[String], _: &mut CommandContext<'_>) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn hub_with(commands: CommandTable, admins: &[&str]) -> Hub {
        let settings = Settings {
            motd: "welcome".to_string(),
            admins: admins.iter().map(|a| a.to_string()).collect(),
            ..Settings::default()
        };
        Hub::new(&settings, Arc::new(NoAuth), commands)
    }

    fn hub() -> Hub {
        hub_with(CommandTable::new(), &[])
    }

    fn client(id: u128, name: &str) -> (Arc<Client>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (dtx, _drx) = watch::channel(false);
        (
            Arc::new(Client::new(SessionId(id), name.to_string(), tx, dtx)),
            rx,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<String> {
        let mut v = Vec::new();
        while let Ok(b) = rx.try_recv() {
            v.push(String::from_utf8_lossy(&b).into_owned());
        }
        v
    }

    #[tokio::test]
    async fn broadcasts_arrive_in_log_order() {
        let hub = hub();
        let (a, mut ra) = client(1, "alice");
        let (b, mut rb) = client(2, "bob");
        hub.join(a).await;
        hub.join(b).await;
        drain(&mut ra);
        drain(&mut rb);

        hub.broadcast("m1").await;
        hub.broadcast("m2").await;

        let log = hub.log_snapshot().await;
        assert_eq!(&log[log.len() - 2..], ["m1".to_string(), "m2".to_string()]);
        for rx in [&mut ra, &mut rb] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 2);
            assert!(frames[0].contains("m1") && !frames[0].contains("m2"));
            assert!(frames[1].contains("m1\r\nm2"));
        }
    }

    #[tokio::test]
    async fn clear_moves_offset_to_log_end() {
        let hub = hub();
        let (a, mut ra) = client(1, "alice");
        hub.join(a.clone()).await;
        hub.broadcast("old").await;
        hub.clear_for(&a).await;
        assert_eq!(a.view().await.offset, hub.log_len().await);
        let last = drain(&mut ra).pop().unwrap();
        assert!(!last.contains("old"));

        hub.broadcast("new").await;
        let last = drain(&mut ra).pop().unwrap();
        assert!(last.contains("new"));
        assert!(!last.contains("old"));
    }

    #[tokio::test]
    async fn leave_announces_once() {
        let hub = hub();
        let (a, _ra) = client(1, "alice");
        hub.join(a).await;
        assert!(hub.leave(SessionId(1)).await.is_some());
        assert!(hub.leave(SessionId(1)).await.is_none());
        let log = hub.log_snapshot().await;
        assert_eq!(
            log,
            vec!["*** alice joined ***".to_string(), "*** alice left ***".to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_command_is_local_only() {
        let hub = hub();
        let (a, mut ra) = client(1, "alice");
        hub.join(a.clone()).await;
        drain(&mut ra);
        let before = hub.log_len().await;

        assert_eq!(hub.run_command(&a, "/foo bar").await, Outcome::Continue);
        assert_eq!(hub.log_len().await, before);
        let frames = drain(&mut ra);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("Unknown command: /foo"));
    }

    #[tokio::test]
    async fn motd_shows_and_updates() {
        let hub = hub();
        let (a, mut ra) = client(1, "alice");
        hub.join(a.clone()).await;
        drain(&mut ra);

        hub.run_command(&a, "/motd").await;
        assert!(drain(&mut ra)[0].contains("Current MOTD: welcome"));

        hub.run_command(&a, "/MOTD be   nice").await;
        assert_eq!(hub.motd().await, "be nice");
        let log = hub.log_snapshot().await;
        assert_eq!(log.last().map(String::as_str), Some("*** MOTD updated by alice ***"));
        assert!(drain(&mut ra)[0].contains("*** MOTD: be nice ***"));
    }

    #[tokio::test]
    async fn quit_aliases() {
        let hub = hub();
        let (a, _ra) = client(1, "alice");
        for q in ["/quit", "/exit", "/q", "/Q"] {
            assert_eq!(hub.run_command(&a, q).await, Outcome::Quit);
        }
    }

    #[tokio::test]
    async fn admin_commands_need_admin() {
        let mut t = CommandTable::new();
        t.register("nuke", Arc::new(Fails), true).unwrap();
        let hub = hub_with(t, &["root"]);
        let (a, mut ra) = client(1, "alice");
        let (r, mut rr) = client(2, "root");

        hub.run_command(&a, "/nuke").await;
        assert!(drain(&mut ra)[0].contains("Permission denied: /nuke"));

        hub.run_command(&r, "/nuke").await;
        assert!(drain(&mut rr)[0].contains("/nuke failed"));

        hub.run_command(&a, "/help").await;
        let help = drain(&mut ra).concat();
        assert!(help.contains("/clear"));
        assert!(!help.contains("/nuke"));
    }

    #[tokio::test]
    async fn admin_check_is_case_sensitive() {
        let mut t = CommandTable::new();
        t.register("nuke", Arc::new(Fails), true).unwrap();
        let hub = hub_with(t, &["root"]);
        assert!(hub.is_admin("root"));
        assert!(!hub.is_admin("ROOT"));
        assert!(!hub.is_admin("Root"));

        let (imposter, mut ri) = client(1, "ROOT");
        hub.run_command(&imposter, "/nuke").await;
        assert!(drain(&mut ri)[0].contains("Permission denied: /nuke"));
    }

    #[tokio::test]
    async fn dead_recipient_does_not_stop_fan_out() {
        let hub = hub();
        let (a, mut ra) = client(1, "alice");
        let (b, rb) = client(2, "bob");
        hub.join(a).await;
        hub.join(b).await;
        drain(&mut ra);
        drop(rb);
        let before = hub.log_len().await;

        hub.broadcast("still here").await;

        assert_eq!(hub.log_len().await, before + 1);
        let frames = drain(&mut ra);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("still here"));
        assert_eq!(hub.clients().len().await, 2);
    }

    #[tokio::test]
    async fn kick_signals_disconnect() {
        let hub = hub();
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (dtx, drx) = watch::channel(false);
        let bob = Arc::new(Client::new(SessionId(5), "bob".to_string(), tx, dtx));
        hub.join(bob).await;
        assert_eq!(hub.kick("BOB", "root").await, 1);
        assert!(*drx.borrow());
        assert_eq!(hub.kick("carol", "root").await, 0);
    }
}
