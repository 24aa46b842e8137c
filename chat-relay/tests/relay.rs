use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use chat_relay::{config::RelayConfig, protocol, registry::Registry, server::Server};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};

const STEP: Duration = Duration::from_secs(2);

struct TestRelay {
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl TestRelay {
    async fn start() -> Result<Self> {
        Self::start_with(RelayConfig::default()).await
    }

    async fn start_with(config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = Server::new(listener, config.with_listen(addr));
        let registry = server.registry();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = server.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            registry,
            shutdown: Some(shutdown_tx),
            server,
        })
    }

    async fn wait_for_member(&self, nickname: &str, present: bool) -> Result<()> {
        timeout(STEP, async {
            while self.registry.contains(nickname).await != present {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| anyhow!("registry never reported {nickname} present={present}"))
    }

    async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        timeout(STEP, self.server).await??;
        Ok(())
    }
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    async fn register(addr: SocketAddr, nickname: &str) -> Result<Self> {
        let mut client = Self::connect(addr).await?;
        client
            .send(&format!("USER {nickname} host server {nickname} Example"))
            .await?;
        let reply = client.recv().await?;
        if reply.as_deref() != Some(protocol::welcome(nickname).as_str()) {
            return Err(anyhow!("unexpected registration reply: {reply:?}"));
        }
        Ok(client)
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(timeout(STEP, self.lines.next_line()).await??)
    }

    async fn expect(&mut self, expected: &str) -> Result<()> {
        match self.recv().await? {
            Some(line) if line == expected => Ok(()),
            other => Err(anyhow!("expected '{expected}', got {other:?}")),
        }
    }

    async fn expect_closed(&mut self) -> Result<()> {
        match self.recv().await? {
            None => Ok(()),
            Some(line) => Err(anyhow!("expected connection to close, got '{line}'")),
        }
    }
}

#[tokio::test]
async fn duplicate_username_is_rejected() -> Result<()> {
    let relay = TestRelay::start().await?;
    let _alice = Client::register(relay.addr, "alice").await?;

    let mut second = Client::connect(relay.addr).await?;
    second.send("USER alice host server Alice Example").await?;
    second.expect(protocol::ERR_ALREADYREGISTRED).await?;
    second.expect_closed().await?;

    assert!(relay.registry.contains("alice").await);
    assert_eq!(relay.registry.len().await, 1);

    relay.stop().await
}

#[tokio::test]
async fn empty_realname_is_rejected_without_registry_entry() -> Result<()> {
    let relay = TestRelay::start().await?;

    let mut bob = Client::connect(relay.addr).await?;
    bob.send("USER bob host server").await?;
    bob.expect(protocol::ERR_NEEDMOREPARAMS).await?;
    bob.expect_closed().await?;

    assert!(relay.registry.is_empty().await);

    relay.stop().await
}

#[tokio::test]
async fn chat_is_relayed_to_others_only() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = Client::register(relay.addr, "alice").await?;
    let mut carol = Client::register(relay.addr, "carol").await?;
    alice.expect("New client joined: carol").await?;

    alice.send("hello").await?;
    carol.expect("Received from alice: hello").await?;

    carol.send("hi alice").await?;
    alice.expect("Received from carol: hi alice").await?;

    // Alice's next line is the farewell, so her own chat never came back.
    alice.send("QUIT").await?;
    alice.expect(protocol::FAREWELL).await?;
    alice.expect_closed().await?;

    relay.stop().await
}

#[tokio::test]
async fn quit_says_goodbye_and_notifies_peers() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = Client::register(relay.addr, "alice").await?;
    let mut carol = Client::register(relay.addr, "carol").await?;
    alice.expect("New client joined: carol").await?;

    alice.send("QUIT").await?;
    alice.expect(protocol::FAREWELL).await?;
    carol.expect("Client disconnected: alice").await?;

    relay.wait_for_member("alice", false).await?;
    assert!(relay.registry.contains("carol").await);

    relay.stop().await
}

#[tokio::test]
async fn dropped_connection_is_announced_and_nickname_freed() -> Result<()> {
    let relay = TestRelay::start().await?;
    let alice = Client::register(relay.addr, "alice").await?;
    let mut carol = Client::register(relay.addr, "carol").await?;

    drop(alice);
    carol.expect("Client disconnected: alice").await?;
    relay.wait_for_member("alice", false).await?;

    let _again = Client::register(relay.addr, "alice").await?;
    carol.expect("New client joined: alice").await?;

    relay.stop().await
}

#[tokio::test]
async fn per_sender_order_is_preserved() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = Client::register(relay.addr, "alice").await?;
    let mut carol = Client::register(relay.addr, "carol").await?;
    alice.expect("New client joined: carol").await?;

    for n in 0..20 {
        alice.send(&format!("message {n}")).await?;
    }
    for n in 0..20 {
        carol
            .expect(&format!("Received from alice: message {n}"))
            .await?;
    }

    relay.stop().await
}

#[tokio::test]
async fn silent_peer_does_not_stall_others() -> Result<()> {
    let relay = TestRelay::start_with(RelayConfig {
        outbox_capacity: 8,
        shutdown_grace: Duration::from_millis(200),
        ..RelayConfig::default()
    })
    .await?;
    let mut alice = Client::register(relay.addr, "alice").await?;
    // Registers and then never reads again.
    let _silent = Client::register(relay.addr, "silent").await?;
    let mut carol = Client::register(relay.addr, "carol").await?;
    alice.expect("New client joined: silent").await?;
    alice.expect("New client joined: carol").await?;

    let payload = "x".repeat(900);
    let relayed = format!("Received from alice: {payload}");
    for _ in 0..1000 {
        alice.send(&payload).await?;
        carol.expect(&relayed).await?;
    }

    let _dave = Client::register(relay.addr, "dave").await?;
    relay.wait_for_member("dave", true).await?;

    relay.stop().await
}

#[tokio::test]
async fn shutdown_notifies_connected_clients() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = Client::register(relay.addr, "alice").await?;

    relay.stop().await?;

    alice.expect(protocol::SHUTDOWN_NOTICE).await?;
    alice.expect_closed().await?;
    Ok(())
}
