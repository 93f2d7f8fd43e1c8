//! End-to-end test over real sockets: a client and a fake IRC server talk
//! to a running reactor on the loopback interface.

use slbnc::config::{MemoryStorage, ServerConfig};
use slbnc::network::{Reactor, unix_now};
use slbnc::security::hash_password;
use slbnc::state::{Bouncer, keys};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::LocalSet;
use tokio::time::timeout;

/// Line-oriented peer for either side of the bouncer.
struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(format!("{line}\r\n").as_bytes()).await?;
        Ok(())
    }

    async fn recv(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await??;
        if n == 0 {
            anyhow::bail!("connection closed");
        }
        Ok(line.trim_end().to_string())
    }

    /// Read until a line contains `needle`.
    async fn expect(&mut self, needle: &str) -> anyhow::Result<String> {
        loop {
            let line = self.recv().await?;
            if line.contains(needle) {
                return Ok(line);
            }
        }
    }
}

#[tokio::test]
async fn client_and_upstream_over_tcp() {
    let local = LocalSet::new();
    local
        .run_until(async {
            // Fake IRC network
            let network = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let network_port = network.local_addr().unwrap().port();

            let mut bouncer =
                Bouncer::new(ServerConfig::default(), Box::new(MemoryStorage::new()), unix_now()).unwrap();
            let hash = hash_password("hunter22").unwrap();
            bouncer.create_user("bob", &hash).unwrap();
            let user = bouncer.user_mut("bob").unwrap();
            user.set_setting(keys::SERVER, Some("127.0.0.1")).unwrap();
            user.set_setting(keys::PORT, Some(&network_port.to_string())).unwrap();
            bouncer.jump("bob", unix_now()).unwrap();

            let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();
            let reactor = Reactor::bind(bouncer, listen).await.unwrap();
            let addr = reactor.local_addr();
            let shutdown = reactor.shutdown_token();
            let running = tokio::task::spawn_local(reactor.run());

            // The bouncer dials out and registers.
            let (stream, _) = timeout(Duration::from_secs(5), network.accept())
                .await
                .unwrap()
                .unwrap();
            let mut server = Peer::new(stream);
            assert_eq!(server.recv().await.unwrap(), "NICK bob");
            assert!(server.recv().await.unwrap().starts_with("USER bob 0 * :"));
            server.send(":irc.test 001 bob :Welcome bob").await.unwrap();
            server.send(":irc.test 376 bob :End of MOTD").await.unwrap();

            // The user's client logs in.
            let mut client = Peer::new(TcpStream::connect(addr).await.unwrap());
            client.send("PASS hunter22").await.unwrap();
            client.send("NICK bob").await.unwrap();
            client.send("USER bob 0 * :Bob").await.unwrap();
            client.expect(" 001 bob ").await.unwrap();

            // Client to network.
            client.send("PRIVMSG #rust :hello").await.unwrap();
            server.expect("PRIVMSG #rust :hello").await.unwrap();

            // Network to client.
            server.send(":alice!a@h PRIVMSG bob :hi bob").await.unwrap();
            client.expect(":alice!a@h PRIVMSG bob :hi bob").await.unwrap();

            // Local command.
            client.send("SLBNC status").await.unwrap();
            client.expect("Connected to irc.test as bob.").await.unwrap();

            // Orderly shutdown: the network is told we are leaving.
            shutdown.cancel();
            server.expect("QUIT :Bouncer shutting down").await.unwrap();
            timeout(Duration::from_secs(15), running).await.unwrap().unwrap();
        })
        .await;
}

#[tokio::test]
async fn failed_login_is_disconnected() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let bouncer =
                Bouncer::new(ServerConfig::default(), Box::new(MemoryStorage::new()), unix_now()).unwrap();
            let reactor = Reactor::bind(bouncer, "127.0.0.1:0".parse().unwrap()).await.unwrap();
            let addr = reactor.local_addr();
            let shutdown = reactor.shutdown_token();
            let running = tokio::task::spawn_local(reactor.run());

            let mut client = Peer::new(TcpStream::connect(addr).await.unwrap());
            client.send("PASS whatever").await.unwrap();
            client.send("NICK eve").await.unwrap();
            client.send("USER eve 0 * :Eve").await.unwrap();
            client.expect("Unknown user or wrong password.").await.unwrap();
            assert!(client.recv().await.is_err());

            shutdown.cancel();
            timeout(Duration::from_secs(15), running).await.unwrap().unwrap();
        })
        .await;
}
