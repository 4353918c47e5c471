//! End-to-end tests for ircddb-daemon.
//!
//! Runs the real TCP transport, session, lifecycle and sync engine against a
//! scripted IRC server on localhost. Ticks are driven by the test with a
//! short sleep instead of the production intervals.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ircddb_core::{
    ConnectionLifecycle, EngineState, InMemoryStore, Membership, SendQueueSlot, SessionProtocol,
    SyncEngine, TickOutcome,
};
use ircddb_daemon::{Config, ConnectionManager, EngineLoop, TcpTransport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const NICK: &str = "gw-test";

#[derive(Clone, Copy, Default)]
struct Script {
    /// Send QUIT_NOW from an admin after the snapshot
    quit_now: bool,
    /// Drop the first connection after the snapshot
    close_first: bool,
}

/// Scripted IRC server that logs every line it receives.
struct FakeServer {
    port: u16,
    lines: Arc<Mutex<Vec<String>>>,
}

impl FakeServer {
    async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let lines = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&lines);
        tokio::spawn(async move {
            let mut generation = 0;
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                generation += 1;
                let close = script.close_first && generation == 1;
                serve(socket, script, close, Arc::clone(&log)).await;
            }
        });

        Self { port, lines }
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    fn received(&self, line: &str) -> bool {
        self.lines().iter().any(|l| l == line)
    }

    async fn wait_for_line(&self, line: &str) {
        timeout(Duration::from_secs(5), async {
            while !self.received(line) {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("server never received {:?}: {:?}", line, self.lines()));
    }
}

async fn serve(socket: TcpStream, script: Script, close: bool, log: Arc<Mutex<Vec<String>>>) {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        log.lock().unwrap().push(line.clone());

        let mut reply = Vec::new();
        if line.starts_with("USER ") {
            reply.push(format!(":irc.test 001 {NICK} :Welcome"));
            reply.push(format!(":irc.test 004 {NICK} irc.test"));
        } else if line == "JOIN #chat" {
            reply.push(format!(":{NICK}!gw@127.0.0.1 JOIN #chat"));
            reply.push(format!(":irc.test 332 {NICK} #chat :ircDDB test"));
        } else if line == "WHO #chat *" {
            for (nick, flags) in [(NICK, "H"), ("s-alpha", "H@"), ("u-admin", "H@")] {
                reply.push(format!(
                    ":irc.test 352 {NICK} #chat {nick} 10.0.0.1 irc.test {nick} {flags} :0 {nick}"
                ));
            }
        } else if let Some(token) = line.strip_prefix("PING ") {
            reply.push(format!(":irc.test PONG irc.test {}", token));
        } else if line.starts_with("PRIVMSG s-alpha :SENDLIST 1 ") {
            reply.push(format!(
                ":s-alpha!alpha@10.0.0.1 PRIVMSG {NICK} :UPDATE 1 2024-01-01 10:00:00 KEY00001 VALUE001"
            ));
            reply.push(format!(":s-alpha!alpha@10.0.0.1 PRIVMSG {NICK} :LIST_END"));
        } else if line.starts_with("PRIVMSG s-alpha :SENDLIST 2") {
            reply.push(format!(
                ":s-alpha!alpha@10.0.0.1 PRIVMSG {NICK} :UPDATE 2024-01-01 11:00:00 KEY00002 VALUE002"
            ));
            reply.push(format!(":s-alpha!alpha@10.0.0.1 PRIVMSG {NICK} :LIST_END"));
            reply.push(":s-alpha!alpha@10.0.0.1 PRIVMSG #chat :IRCDDB heartbeat".to_string());
            if script.quit_now {
                reply.push(format!(":u-admin!admin@10.0.0.3 PRIVMSG {NICK} :QUIT_NOW"));
            }
        } else if line.starts_with("QUIT") {
            return;
        }

        for r in reply {
            if write.write_all(format!("{}\r\n", r).as_bytes()).await.is_err() {
                return;
            }
        }
        if close && line.starts_with("PRIVMSG s-alpha :SENDLIST 2") {
            return;
        }
    }
}

/// Lifecycle and engine driven by hand.
struct Gateway {
    lifecycle: ConnectionLifecycle<TcpTransport>,
    engine_loop: EngineLoop<InMemoryStore>,
    events: mpsc::UnboundedSender<ircddb_core::SessionEvent>,
    exited: bool,
}

impl Gateway {
    fn new(port: u16) -> Self {
        let config = Config {
            irc_server_name: "127.0.0.1".into(),
            irc_server_port: port,
            irc_nick: NICK.into(),
            ..Config::default()
        };
        let engine_config = config.engine_config().unwrap();
        let membership = Arc::new(Membership::new());
        let slot = SendQueueSlot::new();

        let engine = SyncEngine::new(
            engine_config,
            InMemoryStore::new(2),
            Arc::clone(&membership),
            slot.clone(),
        );
        let session = SessionProtocol::new(
            config.session_config().unwrap(),
            Arc::clone(&membership),
            slot.clone(),
        );
        let transport = TcpTransport::new(ConnectionManager::new("127.0.0.1", port));
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            lifecycle: ConnectionLifecycle::new(transport, session, membership, slot),
            engine_loop: EngineLoop::new(engine, rx, None),
            events: tx,
            exited: false,
        }
    }

    fn engine(&self) -> &SyncEngine<InMemoryStore> {
        self.engine_loop.engine()
    }

    async fn tick(&mut self) {
        for event in self.lifecycle.tick().await {
            self.events.send(event).unwrap();
        }
        if self.engine_loop.step() == TickOutcome::Exit {
            self.exited = true;
        }
    }

    async fn run_until<F: Fn(&Gateway) -> bool>(&mut self, check: F) {
        let result = timeout(Duration::from_secs(20), async {
            while !check(self) {
                self.tick().await;
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            result.is_ok(),
            "condition not reached, engine in {:?} ({})",
            self.engine().state(),
            self.engine().reason()
        );
    }
}

#[tokio::test]
async fn test_login_and_snapshot() {
    let server = FakeServer::start(Script::default()).await;
    let mut gateway = Gateway::new(server.port);

    gateway
        .run_until(|g| g.engine().state() == EngineState::Steady)
        .await;

    let store = gateway.engine().app();
    assert_eq!(store.get(1, "KEY00001").unwrap().value, "VALUE001");
    assert_eq!(store.get(0, "KEY00002").unwrap().value, "VALUE002");
    assert_eq!(store.source(), Some("s-alpha"));
    assert_eq!(gateway.engine().topic(), Some("ircDDB test"));

    let lines = server.lines();
    assert_eq!(lines[0], "PASS secret");
    assert_eq!(lines[1], format!("NICK {}", NICK));
    assert!(lines[2].starts_with(&format!("USER {} 0 * :ircddb:", NICK)));
    assert!(server.received("PRIVMSG s-alpha :SENDLIST 1 2000-01-01 00:00:00"));
    assert!(server.received("PRIVMSG s-alpha :SENDLIST 2000-01-01 00:00:00"));
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("PRIVMSG s-alpha :IRCDDB ") && l.ends_with(" startup"))
    );
}

#[tokio::test]
async fn test_quit_now_exits() {
    let server = FakeServer::start(Script {
        quit_now: true,
        ..Script::default()
    })
    .await;
    let mut gateway = Gateway::new(server.port);

    gateway.run_until(|g| g.exited).await;
    assert_eq!(gateway.engine().reason(), "QUIT_NOW received");
    server.wait_for_line("QUIT :QUIT_NOW sent by u-admin").await;
}

#[tokio::test]
async fn test_reconnect_after_server_drop() {
    let server = FakeServer::start(Script {
        close_first: true,
        ..Script::default()
    })
    .await;
    let mut gateway = Gateway::new(server.port);

    gateway
        .run_until(|g| g.engine().reason() == "connection closed")
        .await;
    assert!(gateway.engine().membership().is_empty());

    gateway
        .run_until(|g| g.engine().state() == EngineState::Steady)
        .await;

    let hellos: Vec<String> = server
        .lines()
        .into_iter()
        .filter(|l| l.starts_with("PRIVMSG s-alpha :IRCDDB "))
        .collect();
    assert_eq!(hellos.len(), 2);
    assert!(hellos[1].ends_with(" connection closed"));
}
