use anyhow::Context;
use llm_core::{CompletionRequest, CompletionStream, LlmClient};
use std::io::Write;
use tokio_util::sync::CancellationToken;

/// One completion, printed whole or as it streams in.
#[tracing::instrument(level = "info", skip_all, fields(model = %request.model, stream = stream))]
pub async fn chat<W: Write>(
    client: &LlmClient,
    request: &CompletionRequest,
    stream: bool,
    cancel: &CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    if stream {
        let mut stream = client
            .complete_stream(request, cancel)
            .await
            .context("streaming request failed")?;
        let result = print_stream(&mut stream, out).await;
        stream.close();
        result?;
        writeln!(out)?;
        return Ok(());
    }

    let resp = client
        .complete(request, cancel)
        .await
        .context("completion request failed")?;
    tracing::debug!(
        model = %resp.model,
        finish_reason = ?resp.finish_reason,
        "completion received"
    );
    writeln!(out, "{}", resp.content)?;
    Ok(())
}

/// Print every content fragment until end of stream. The caller owns `close`.
pub async fn print_stream<W: Write>(
    stream: &mut CompletionStream,
    out: &mut W,
) -> anyhow::Result<()> {
    while let Some(fragment) = stream
        .recv()
        .await
        .context("error receiving stream")?
    {
        if !fragment.content.is_empty() {
            write!(out, "{}", fragment.content)?;
            out.flush()?;
        }
    }
    Ok(())
}
