//! Commands shipped with the server binary.

use async_trait::async_trait;

use crate::commands::{CommandContext, CommandHandler, CommandLoader, LoadedCommand};

/// Loader for `/who`, `/me`, `/uptime` and the admin-only `/kick`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StockCommands;

impl CommandLoader for StockCommands {
    fn load_all(&self) -> anyhow::Result<Vec<LoadedCommand>> {
        Ok(vec![
            LoadedCommand::new("who", Who, false),
            LoadedCommand::new("me", Me, false),
            LoadedCommand::new("uptime", Uptime, false),
            LoadedCommand::new("kick", Kick, true),
        ])
    }
}

struct Who;

#[async_trait]
impl CommandHandler for Who {
    async fn run(&self, _args: &[String], ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        let names = ctx.hub().clients().names().await;
        ctx.reply(format!("online ({}): {}", names.len(), names.join(", ")));
        Ok(())
    }
}

struct Me;

#[async_trait]
impl CommandHandler for Me {
    async fn run(&self, args: &[String], ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        if args.is_empty() {
            ctx.reply("usage: /me <action>");
            return Ok(());
        }
        let line = format!("* {} {}", ctx.username(), args.join(" "));
        ctx.broadcast(line).await;
        Ok(())
    }
}

struct Uptime;

#[async_trait]
impl CommandHandler for Uptime {
    async fn run(&self, _args: &[String], ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        let s = ctx.hub().uptime().as_secs();
        ctx.reply(format!(
            "up {}d {:02}:{:02}:{:02}",
            s / 86_400,
            (s / 3600) % 24,
            (s / 60) % 60,
            s % 60
        ));
        Ok(())
    }
}

struct Kick;

#[async_trait]
impl CommandHandler for Kick {
    async fn run(&self, args: &[String], ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        let Some(target) = args.first() else {
            ctx.reply("usage: /kick <name>");
            return Ok(());
        };
        let n = ctx.hub().kick(target, ctx.username()).await;
        if n == 0 {
            ctx.reply(format!("no one named {target} is online"));
        } else {
            ctx.reply(format!("kicked {target} ({n} session(s))"));
        }
        Ok(())
    }
}
