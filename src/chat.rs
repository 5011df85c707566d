//! Terminal chat.
//!
//! `luatthue chat` loads the knowledge base, lists what was loaded and then
//! answers questions read line by line. Replies are printed as the Markdown
//! the model returns. Lines starting with `/` are commands:
//!
//! | Command | Effect |
//! |---------|--------|
//! | `/history` | Print the transcript |
//! | `/reset` | Forget the knowledge base, rebuild it and start a new session |
//! | `/quit` | Leave (also on end of input) |
//!
//! `luatthue ask` runs a single question through the same path.

use anyhow::{bail, Result};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::config::Config;
use crate::error::ChatError;
use crate::knowledge::KnowledgeCache;
use crate::models::{Role, TurnStatus};
use crate::progress::SyncProgressReporter;
use crate::session::ChatSession;
use crate::traits::{ChatModel, DocumentStore};

/// Everything a terminal conversation needs.
pub struct ChatContext<'a> {
    pub config: &'a Config,
    pub knowledge: &'a KnowledgeCache,
    pub store: &'a dyn DocumentStore,
    pub model: &'a dyn ChatModel,
    pub progress: &'a dyn SyncProgressReporter,
    pub stream: bool,
}

/// Run the interactive loop until `/quit` or end of input.
pub async fn run_repl<R, W>(ctx: &ChatContext<'_>, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write + Send,
{
    writeln!(out, "⚖️  Trợ lý Luật Thuế Việt Nam")?;
    let mut session = open_session(ctx, out).await?;
    writeln!(out, "Gõ câu hỏi, hoặc /history, /reset, /quit.")?;

    let mut lines = input.lines();
    loop {
        write!(out, "\n❓ ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => print_history(&session, out)?,
            "/reset" => {
                ctx.knowledge.reset();
                writeln!(out, "🔄 Đang tải lại dữ liệu luật...")?;
                session = open_session(ctx, out).await?;
            }
            question => {
                let _ = answer(ctx, &mut session, question, out).await?;
            }
        }
    }
    Ok(())
}

/// Ask one question in a fresh session and print the reply.
///
/// Fails if the knowledge base cannot be built or the model does not answer.
pub async fn ask<W: Write + Send>(ctx: &ChatContext<'_>, question: &str, out: &mut W) -> Result<()> {
    let outcome = ctx.knowledge.load(ctx.config, ctx.store, ctx.progress).await;
    let kb = match outcome.as_ref() {
        Ok(kb) => kb,
        Err(e) => bail!("knowledge base unavailable: {}", e),
    };

    let mut session = ChatSession::new();
    session.open(kb, &ctx.config.chat, ctx.config.gemini.safety)?;
    if let Err(e) = answer(ctx, &mut session, question, out).await? {
        bail!("{}", e);
    }
    Ok(())
}

/// Load (or reuse) the knowledge base and open a session on it. When nothing
/// could be loaded the session stays unopened and every question is answered
/// with an explanation.
async fn open_session<W: Write>(ctx: &ChatContext<'_>, out: &mut W) -> Result<ChatSession> {
    let outcome = ctx.knowledge.load(ctx.config, ctx.store, ctx.progress).await;
    let mut session = ChatSession::new();

    match outcome.as_ref() {
        Ok(kb) => {
            session.open(kb, &ctx.config.chat, ctx.config.gemini.safety)?;
            writeln!(out, "📚 Đã nạp {} tài liệu:", kb.len())?;
            for name in kb.names() {
                writeln!(out, "  - {}", name)?;
            }
            for skipped in &kb.report.skipped {
                writeln!(out, "  ⚠️ bỏ qua {}: {}", skipped.name, skipped.reason)?;
            }
        }
        Err(e) => {
            writeln!(out, "⚠️ Không nạp được tài liệu nào: {}", e)?;
        }
    }
    Ok(session)
}

/// Send `question` and print the outcome. Terminal I/O errors are returned
/// as `Err`; a failed turn is `Ok(Err(_))` after its explanation is printed.
async fn answer<W: Write + Send>(
    ctx: &ChatContext<'_>,
    session: &mut ChatSession,
    question: &str,
    out: &mut W,
) -> Result<std::result::Result<(), ChatError>> {
    let result = if ctx.stream {
        let mut shown = 0usize;
        write!(out, "🤖 ")?;
        let result = session
            .send_streaming(ctx.model, question, &mut |partial: &str| {
                let _ = write!(out, "{}", &partial[shown..]);
                let _ = out.flush();
                shown = partial.len();
            })
            .await
            .map(|_| ());
        writeln!(out)?;
        result
    } else {
        match session.send(ctx.model, question).await {
            Ok(turn) => {
                writeln!(out, "🤖 {}", turn.text)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    };

    match result {
        Ok(()) => Ok(Ok(())),
        Err(ChatError::EmptyMessage) => Ok(Ok(())),
        Err(e) => {
            writeln!(out, "{}", e.user_message())?;
            Ok(Err(e))
        }
    }
}

fn print_history<W: Write>(session: &ChatSession, out: &mut W) -> Result<()> {
    if session.transcript().is_empty() {
        writeln!(out, "(chưa có câu hỏi nào)")?;
        return Ok(());
    }
    for turn in session.transcript() {
        let who = match turn.role {
            Role::User => "👤",
            Role::Assistant if turn.status == TurnStatus::Failed => "⚠️",
            Role::Assistant => "🤖",
        };
        writeln!(
            out,
            "[{}] {} {}",
            turn.at.format("%H:%M:%S"),
            who,
            turn.text
        )?;
    }
    Ok(())
}
