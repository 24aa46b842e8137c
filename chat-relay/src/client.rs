use std::io::BufRead;

use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{self, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{self, Registration},
};

type ServerLines = FramedRead<OwnedReadHalf, LinesCodec>;
type ServerSink = FramedWrite<OwnedWriteHalf, LinesCodec>;
type StdinLines = mpsc::Receiver<std::io::Result<String>>;

pub const QUIT_HINT: &str = "*** start a line with QUIT (any case) to leave, e.g. 'quit' or 'Quit this'";

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut lines, mut sink) = establish_connection(&args).await?;
    write_stdout(&format!(
        "*** connecting to {}:{} as {} ({})",
        args.server_ip, args.port, args.nickname, args.username
    ))
    .await?;
    write_stdout(QUIT_HINT).await?;

    let registration =
        Registration::new(&args.username, "localhost", &args.server_ip, &args.real_name);
    send_registration(&mut lines, &mut sink, &registration).await?;

    let mut stdin = spawn_stdin_reader();
    run_client_loop(&mut lines, &mut sink, &mut stdin).await?;
    shutdown_connection(&mut sink).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(ServerLines, ServerSink)> {
    let stream = TcpStream::connect((args.server_ip.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.server_ip, args.port))?;

    info!("connected to {}:{}", args.server_ip, args.port);

    let (reader, writer) = stream.into_split();
    Ok((
        FramedRead::new(reader, server_codec()),
        FramedWrite::new(writer, LinesCodec::new()),
    ))
}

/// Relayed lines carry a prefix, so they may exceed the relay's inbound
/// limit; lines from the server are not capped.
fn server_codec() -> LinesCodec {
    LinesCodec::new()
}

/// Read stdin on a plain thread, not the blocking pool: a read left pending
/// there would hold up runtime shutdown until stdin closes.
fn spawn_stdin_reader() -> StdinLines {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let failed = line.is_err();
            if tx.blocking_send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

/// Send `USER` and wait for the relay's verdict.
async fn send_registration(
    lines: &mut ServerLines,
    sink: &mut ServerSink,
    registration: &Registration,
) -> Result<()> {
    sink.send(registration.to_line())
        .await
        .context("failed to send registration")?;

    match lines.next().await {
        Some(Ok(reply)) if protocol::is_registration_error(&reply) => {
            write_stderr(&format!("!!! {reply}")).await?;
            bail!("registration refused: {reply}");
        }
        Some(Ok(reply)) => {
            write_stdout(&reply).await?;
            Ok(())
        }
        Some(Err(err)) => Err(err).context("failed to read registration reply"),
        None => bail!("server closed the connection during registration"),
    }
}

async fn run_client_loop(
    lines: &mut ServerLines,
    sink: &mut ServerSink,
    stdin: &mut StdinLines,
) -> Result<()> {
    let mut stdin_open = true;

    loop {
        select! {
            server_line = lines.next() => {
                if !handle_server_line(server_line).await? {
                    break;
                }
            }
            input = stdin.recv(), if stdin_open => {
                stdin_open = handle_stdin_input(input, sink).await?;
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line(
    line: Option<Result<String, tokio_util::codec::LinesCodecError>>,
) -> Result<bool> {
    match line {
        Some(Ok(line)) => {
            write_stdout(&line).await?;
            Ok(true)
        }
        Some(Err(err)) => Err(err).context("failed to read from server"),
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

/// Forward one stdin line. Returns whether stdin is still open.
///
/// End of input sends a quit so the relay says goodbye and closes.
async fn handle_stdin_input(
    input: Option<std::io::Result<String>>,
    sink: &mut ServerSink,
) -> Result<bool> {
    let Some(input) = input else {
        sink.send("QUIT").await.context("failed to send quit")?;
        return Ok(false);
    };

    let input = input.context("failed to read stdin")?;
    let text = input.trim_end_matches('\r');
    if text.trim().is_empty() {
        return Ok(true);
    }

    sink.send(text).await.context("failed to send message")?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(sink: &mut ServerSink) {
    if let Err(error) = SinkExt::<&str>::close(sink).await {
        warn!(?error, "failed to shutdown client writer cleanly");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_MAX_LINE_LEN;

    #[tokio::test]
    async fn relayed_line_at_the_inbound_limit_still_decodes() {
        let text = "x".repeat(DEFAULT_MAX_LINE_LEN);
        let relayed = protocol::relayed_chat("alice", &text);
        assert!(relayed.len() > DEFAULT_MAX_LINE_LEN);

        let (mut server, client) = tokio::io::duplex(4096);
        server
            .write_all(format!("{relayed}\n").as_bytes())
            .await
            .expect("write relayed line");
        drop(server);

        let mut lines = FramedRead::new(client, server_codec());
        let line = lines.next().await.expect("one line").expect("decodes");
        assert_eq!(line, relayed);
        assert!(lines.next().await.is_none());
    }
}
