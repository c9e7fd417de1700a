//! Slash commands.
//!
//! Built-ins (`help`, `clear`, `motd`, `quit`/`exit`/`q`) are handled here and cannot be
//! replaced. Everything else comes from a [`CommandLoader`] at startup and is stored in a
//! [`CommandTable`] that is read-only once the server is running.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::hub::Hub;
use crate::registry::Client;

pub const BUILTINS: &[&str] = &["help", "clear", "motd", "quit", "exit", "q"];

/// What the session should do after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Quit,
}

/// A pluggable command. Handlers are trusted: they may broadcast or touch any client.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(&self, args: &[String], ctx: &mut CommandContext<'_>) -> anyhow::Result<()>;
}

/// Handed to every command invocation.
pub struct CommandContext<'a> {
    hub: &'a Hub,
    client: &'a Client,
    replies: Vec<String>,
}

impl<'a> CommandContext<'a> {
    pub fn new(hub: &'a Hub, client: &'a Client) -> Self {
        Self {
            hub,
            client,
            replies: Vec::new(),
        }
    }

    pub fn username(&self) -> &str {
        self.client.name()
    }

    pub fn hub(&self) -> &'a Hub {
        self.hub
    }

    pub fn client(&self) -> &'a Client {
        self.client
    }

    /// Append a line to the shared chat log and repaint everyone.
    pub async fn broadcast(&self, line: impl Into<String> + Send) {
        self.hub.broadcast(line).await;
    }

    /// Queue a line for the invoking user only.
    pub fn reply(&mut self, line: impl Into<String>) {
        self.replies.push(line.into());
    }

    pub fn take_replies(&mut self) -> Vec<String> {
        std::mem::take(&mut self.replies)
    }
}

/// One command produced by a loader.
#[derive(Clone)]
pub struct LoadedCommand {
    pub name: String,
    pub handler: Arc<dyn CommandHandler>,
    pub admin: bool,
}

impl LoadedCommand {
    pub fn new(name: &str, handler: impl CommandHandler + 'static, admin: bool) -> Self {
        Self {
            name: name.to_string(),
            handler: Arc::new(handler),
            admin,
        }
    }
}

/// Discovers pluggable commands at startup.
pub trait CommandLoader {
    fn load_all(&self) -> anyhow::Result<Vec<LoadedCommand>>;
}

#[derive(Clone)]
struct Entry {
    handler: Arc<dyn CommandHandler>,
    admin: bool,
}

#[derive(Clone, Default)]
pub struct CommandTable {
    by_name: BTreeMap<String, Entry>,
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTable")
            .field("names", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        handler: Arc<dyn CommandHandler>,
        admin: bool,
    ) -> anyhow::Result<()> {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '/') {
            anyhow::bail!("bad command name {name:?}");
        }
        if BUILTINS.contains(&name.as_str()) {
            anyhow::bail!("/{name} is built in");
        }
        if self.by_name.contains_key(&name) {
            anyhow::bail!("/{name} registered twice");
        }
        self.by_name.insert(name, Entry { handler, admin });
        Ok(())
    }

    /// Register everything a loader offers, skipping (and logging) rejects.
    pub fn load(&mut self, loader: &dyn CommandLoader) -> anyhow::Result<usize> {
        let mut n = 0usize;
        for c in loader.load_all()? {
            if let Err(e) = self.register(&c.name, c.handler, c.admin) {
                warn!(command = %c.name, err = %e, "skipping command");
                continue;
            }
            n += 1;
        }
        Ok(n)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(&name.to_ascii_lowercase())
    }

    /// Non-admin pluggable command names, sorted.
    pub fn public_names(&self) -> Vec<&str> {
        self.by_name
            .iter()
            .filter(|(_, e)| !e.admin)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub async fn dispatch(
        &self,
        name: &str,
        args: &[String],
        ctx: &mut CommandContext<'_>,
    ) -> Outcome {
        let name = name.to_ascii_lowercase();
        match name.as_str() {
            "quit" | "exit" | "q" => return Outcome::Quit,
            "clear" => {
                ctx.hub.clear_for(ctx.client).await;
                return Outcome::Continue;
            }
            "motd" => {
                if args.is_empty() {
                    let motd = ctx.hub.motd().await;
                    ctx.reply(format!("Current MOTD: {motd}"));
                } else {
                    ctx.hub.update_motd(args.join(" "), ctx.username()).await;
                }
                return Outcome::Continue;
            }
            "help" => {
                ctx.reply("Available commands:");
                for b in ["help", "clear", "motd", "quit"] {
                    ctx.reply(format!("  /{b}"));
                }
                for c in self.public_names() {
                    ctx.reply(format!("  /{c}"));
                }
                return Outcome::Continue;
            }
            _ => {}
        }

        let Some(entry) = self.by_name.get(&name) else {
            ctx.reply(format!("Unknown command: /{name}"));
            return Outcome::Continue;
        };
        if entry.admin && !ctx.hub.is_admin(ctx.username()) {
            ctx.reply(format!("Permission denied: /{name}"));
            return Outcome::Continue;
        }
        if let Err(e) = entry.handler.run(args, ctx).await {
            warn!(command = %name, user = %ctx.username(), err = %e, "command failed");
            ctx.reply(format!("/{name} failed"));
        }
        Outcome::Continue
    }
}

/// Split `/name arg arg` into a lower-cased name and its arguments.
pub fn parse(line: &str) -> (String, Vec<String>) {
    let mut parts = line.trim_start_matches('/').split_whitespace();
    let name = parts.next().unwrap_or("").to_ascii_lowercase();
    (name, parts.map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    #[async_trait]
    impl CommandHandler for Nop {
        async fn run(&self, _args: &[String], _ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Loader;

    impl CommandLoader for Loader {
        fn load_all(&self) -> anyhow::Result<Vec<LoadedCommand>> {
            Ok(vec![
                LoadedCommand::new("Dance", Nop, false),
                LoadedCommand::new("help", Nop, false),
                LoadedCommand::new("nuke", Nop, true),
                LoadedCommand::new("dance", Nop, false),
            ])
        }
    }

    #[test]
    fn parse_splits_and_lowercases() {
        assert_eq!(
            parse("/MOTD  hello   world"),
            ("motd".to_string(), vec!["hello".to_string(), "world".to_string()])
        );
        assert_eq!(parse("//q"), ("q".to_string(), vec![]));
        assert_eq!(parse("/"), (String::new(), vec![]));
    }

    #[test]
    fn builtins_cannot_be_overridden() {
        let mut t = CommandTable::new();
        for b in BUILTINS {
            assert!(t.register(b, Arc::new(Nop), false).is_err());
        }
        assert!(t.register("QUIT", Arc::new(Nop), false).is_err());
        assert!(t.is_empty());
    }

    #[test]
    fn load_skips_rejects_and_hides_admin_commands() {
        let mut t = CommandTable::new();
        assert_eq!(t.load(&Loader).unwrap(), 2);
        assert!(t.contains("DANCE"));
        assert!(t.contains("nuke"));
        assert_eq!(t.public_names(), vec!["dance"]);
    }

    #[test]
    fn bad_names_rejected() {
        let mut t = CommandTable::new();
        assert!(t.register("", Arc::new(Nop), false).is_err());
        assert!(t.register("two words", Arc::new(Nop), false).is_err());
        assert!(t.register("/slash", Arc::new(Nop), false).is_err());
    }
}
