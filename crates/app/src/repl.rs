use anyhow::Result;
use docqa_core::{
    Answer, ChatModel, ConversationEngine, Embedder, SourceRef, VectorIndex, DEFAULT_SESSION,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub fn format_source(source: &SourceRef) -> String {
    match source.page {
        Some(page) => format!("  - {} (Page {page})", source.source),
        None => format!("  - {}", source.source),
    }
}

fn render_answer(answer: &Answer) -> String {
    let mut out = format!("\nAssistant: {}\n", answer.answer);
    if !answer.sources.is_empty() {
        out.push_str("\nSources:\n");
        for source in &answer.sources {
            out.push_str(&format_source(source));
            out.push('\n');
        }
    }
    out.push('\n');
    out
}

/// Line-mode chat over the default session. Ends on `exit` (any case) or end
/// of input; a failed question is reported and the loop keeps going.
pub async fn run<E, V, L, R, W>(
    engine: &ConversationEngine<E, V, L>,
    input: R,
    mut output: W,
) -> Result<()>
where
    E: Embedder,
    V: VectorIndex,
    L: ChatModel,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output
        .write_all(b"You can now ask questions. Type 'exit' to quit.\n\n")
        .await?;

    let mut lines = input.lines();
    loop {
        output.write_all(b"You: ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            output.write_all(b"\n").await?;
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") {
            output.write_all(b"Goodbye!\n").await?;
            break;
        }
        if question.is_empty() {
            continue;
        }

        let rendered = match engine.ask(DEFAULT_SESSION, question).await {
            Ok(answer) => render_answer(&answer),
            Err(error) => format!("\nError: {error}\n\n"),
        };
        output.write_all(rendered.as_bytes()).await?;
    }

    output.flush().await?;
    Ok(())
}
