//! Line-delimited front transport
//!
//! One frame per line in, one frame per line out. Requests are handled
//! concurrently; responses are written in completion order.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use relay_core::GatewayError;

use crate::front::{CloseAction, FrontSession};

/// Serve `session` over a reader/writer pair until the reader hits EOF or
/// `shutdown` resolves. Returns what the process should do next.
///
/// On EOF in-flight requests are allowed to finish. On shutdown they are
/// abandoned.
pub async fn serve_stdio<R, W, S>(
    session: Arc<FrontSession>,
    reader: R,
    writer: W,
    shutdown: S,
) -> CloseAction
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(write_frames(session.clone(), writer, rx));

    let mut lines = BufReader::new(reader).lines();
    let mut handlers = JoinSet::new();
    tokio::pin!(shutdown);

    info!(session = %session.id(), "Serving front session on stdio");

    let drain = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let session = session.clone();
                    let tx = tx.clone();
                    handlers.spawn(async move {
                        if let Some(reply) = session.handle_frame(&line).await {
                            let _ = tx.send(reply);
                        }
                    });
                }
                Ok(None) => {
                    debug!(session = %session.id(), "Input closed");
                    break true;
                }
                Err(e) => {
                    session.on_error(&GatewayError::Transport(e.to_string()));
                    break true;
                }
            },
            // reap finished handlers so the set does not grow unbounded
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            _ = &mut shutdown => break false,
        }
    };

    if drain {
        while handlers.join_next().await.is_some() {}
    } else {
        handlers.abort_all();
    }

    drop(tx);
    let _ = writer_task.await;

    session.on_close()
}

async fn write_frames<W>(session: Arc<FrontSession>, mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let written = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            session.on_error(&GatewayError::Transport(e.to_string()));
            break;
        }
    }
}
