//! Interactive chat client: stdin lines out, relay packets in.

use anyhow::{Context, Result};
use capyrelay_client::RelayClient;
use capyrelay_protocol::{Packet, read_packet, write_packet};
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::select;
use tracing::warn;

use crate::cli::ChatArgs;

pub async fn run(args: ChatArgs) -> Result<()> {
    let client = RelayClient::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    let (reader, mut writer) = client.into_parts();

    // Packet reads must never be cancelled mid-packet.
    let mut inbound = tokio::spawn(receive_loop(reader));

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            result = &mut inbound => {
                match result {
                    Ok(Ok(())) => write_stdout("*** server closed the connection").await?,
                    Ok(Err(e)) => write_stderr(&format!("!!! connection lost: {e}")).await?,
                    Err(e) => warn!(error = %e, "receive task failed"),
                }
                return Ok(());
            }
            bytes_read = stdin.read_line(&mut input) => {
                if bytes_read? == 0 {
                    break;
                }
                let text = input.trim_end();
                if text.is_empty() {
                    continue;
                }
                if text.eq_ignore_ascii_case("/quit") {
                    write_stdout("*** leaving chat").await?;
                    break;
                }
                write_packet(&mut writer, &Packet::ChatMessage(text.to_owned())).await?;
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
    inbound.abort();
    Ok(())
}

async fn receive_loop<R: AsyncRead + Unpin>(mut reader: R) -> Result<()> {
    while let Some(packet) = read_packet(&mut reader).await? {
        render(packet).await?;
    }
    Ok(())
}

async fn render(packet: Packet) -> io::Result<()> {
    match packet {
        Packet::ChatMessage(text) => write_stdout(&text).await,
        Packet::ErrorNotice(message) => write_stderr(&format!("!!! {message}")).await,
        other => write_stderr(&format!("!!! unexpected {:?}", other.packet_type())).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
