use std::future::Future;

use clipscout_core::{Dispatcher, Request};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServeSummary {
    pub requests: u64,
    pub interrupted: bool,
}

/// Answers line-delimited JSON requests until the reader hits EOF or
/// `shutdown` resolves. Requests run concurrently; responses are written in
/// completion order, each carrying the caller's `id`. The session is always
/// cleaned up before returning.
pub async fn serve_lines<R, W, S>(
    dispatcher: Dispatcher,
    reader: R,
    writer: &mut W,
    shutdown: S,
) -> Result<ServeSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut lines = reader.lines();
    let mut tasks = JoinSet::new();
    let mut summary = ServeSummary {
        requests: 0,
        interrupted: false,
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                summary.interrupted = true;
                break;
            }
            Some(line) = rx.recv() => write_line(writer, &line).await?,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(err) = joined {
                    warn!(error = %err, "request task failed");
                }
            }
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    summary.requests += 1;
                    let dispatcher = dispatcher.clone();
                    let tx = tx.clone();
                    tasks.spawn(async move {
                        let envelope = dispatcher.dispatch_line(&line).await;
                        // receiver only goes away once every task has finished
                        let _ = tx.send(envelope.to_line());
                    });
                }
                Ok(None) => {
                    debug!("input closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "failed to read request line");
                    break;
                }
            },
        }
    }

    if summary.interrupted {
        info!(in_flight = tasks.len(), "interrupted, aborting in-flight requests");
        tasks.abort_all();
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            if !err.is_cancelled() {
                warn!(error = %err, "request task failed");
            }
        }
    }
    drop(tx);
    while let Some(line) = rx.recv().await {
        write_line(writer, &line).await?;
    }

    dispatcher.dispatch(Request::Cleanup).await;
    info!(
        requests = summary.requests,
        interrupted = summary.interrupted,
        "serve loop finished"
    );
    Ok(summary)
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
