use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::agent::AgentRunner;
use crate::error::Error;
use crate::llm::LlmProvider;

/// Question/answer loop over `input` until `q` or end of input.
///
/// Each question is a fresh agent run. Agent failures are printed and the
/// loop continues; only I/O errors on `input`/`output` end it early.
pub async fn run_repl<P, R, W>(
    agent: &AgentRunner<P>,
    input: R,
    output: &mut W,
) -> Result<(), Error>
where
    P: LlmProvider,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        output.write_all(b"You: ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            output.write_all(b"\nGoodbye!\n").await?;
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("q") {
            output.write_all(b"Goodbye!\n").await?;
            break;
        }
        if question.is_empty() {
            continue;
        }

        let reply = match agent.execute(question).await {
            Ok(answer) => format!(
                "\nAgent: {}\n[Tokens: {} in / {} out]\n\n",
                answer.result, answer.tokens_used.input_tokens, answer.tokens_used.output_tokens
            ),
            Err(e) => {
                warn!(agent = %agent.name(), error = %e, "query failed");
                format!("\nError: {e}\n\n")
            }
        };
        output.write_all(reply.as_bytes()).await?;
    }
    output.flush().await?;
    Ok(())
}
