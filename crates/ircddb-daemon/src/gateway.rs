//! The two loops of a running gateway.
//!
//! The driver loop ticks the connection lifecycle every 500 ms and forwards
//! the session events it produces. The engine loop ticks the sync engine
//! every second, delivering pending events first, and periodically dumps
//! the channel membership.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use ircddb_core::{
    ConnectionLifecycle, ExtApp, SessionEvent, SyncEngine, TickOutcome, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DRIVER_TICK: Duration = Duration::from_millis(500);
pub const ENGINE_TICK: Duration = Duration::from_secs(1);

/// Engine ticks before the first membership dump.
pub const DUMP_FIRST_TICKS: u64 = 60;
/// Engine ticks between membership dumps.
pub const DUMP_EVERY_TICKS: u64 = 300;

/// Run the lifecycle forever on its own task.
///
/// Stops when the engine side hangs up.
pub fn spawn_driver<T>(
    mut lifecycle: ConnectionLifecycle<T>,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> JoinHandle<()>
where
    T: Transport + 'static,
{
    tokio::spawn(async move {
        loop {
            for event in lifecycle.tick().await {
                if events.send(event).is_err() {
                    debug!("Engine gone, stopping driver");
                    return;
                }
            }
            tokio::time::sleep(DRIVER_TICK).await;
        }
    })
}

pub struct EngineLoop<A: ExtApp> {
    engine: SyncEngine<A>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    dump_path: Option<PathBuf>,
    ticks: u64,
}

impl<A: ExtApp> EngineLoop<A> {
    pub fn new(
        engine: SyncEngine<A>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        dump_path: Option<PathBuf>,
    ) -> Self {
        Self {
            engine,
            events,
            dump_path,
            ticks: 0,
        }
    }

    pub fn engine(&self) -> &SyncEngine<A> {
        &self.engine
    }

    /// Deliver pending events, then tick the engine once.
    pub fn step(&mut self) -> TickOutcome {
        while let Ok(event) = self.events.try_recv() {
            self.engine.handle_event(event);
        }

        let outcome = self.engine.tick();
        self.ticks += 1;
        if dump_due(self.ticks) {
            self.dump_membership();
        }
        outcome
    }

    /// Tick every [`ENGINE_TICK`] until the engine asks to exit.
    pub async fn run(mut self) -> A {
        loop {
            tokio::time::sleep(ENGINE_TICK).await;
            if self.step() == TickOutcome::Exit {
                info!("Engine requested exit");
                return self.engine.into_app();
            }
        }
    }

    fn dump_membership(&self) {
        let Some(path) = &self.dump_path else {
            return;
        };
        let result = File::create(path).and_then(|file| {
            let mut out = BufWriter::new(file);
            self.engine.membership().dump(&mut out)?;
            out.flush()
        });
        match result {
            Ok(()) => debug!("Wrote membership to {:?}", path),
            Err(e) => warn!("Membership dump to {:?} failed: {}", path, e),
        }
    }
}

fn dump_due(ticks: u64) -> bool {
    ticks >= DUMP_FIRST_TICKS && (ticks - DUMP_FIRST_TICKS) % DUMP_EVERY_TICKS == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ircddb_core::{
        Announcement, EngineConfig, InMemoryStore, Membership, SendQueueSlot, TableSchema,
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    fn engine_loop(
        dump_path: Option<PathBuf>,
    ) -> (
        EngineLoop<InMemoryStore>,
        Arc<Membership>,
        mpsc::UnboundedSender<SessionEvent>,
    ) {
        let config = EngineConfig {
            channel: "#chat".into(),
            debug_channel: None,
            tables: vec![TableSchema::default(); 2],
            tables_to_sync: 2,
            announcement: Announcement::default(),
            properties: Vec::new(),
        };
        let membership = Arc::new(Membership::new());
        let engine = SyncEngine::new(
            config,
            InMemoryStore::new(2),
            Arc::clone(&membership),
            SendQueueSlot::new(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        (EngineLoop::new(engine, rx, dump_path), membership, tx)
    }

    #[test]
    fn test_dump_schedule() {
        assert!(!dump_due(1));
        assert!(!dump_due(59));
        assert!(dump_due(60));
        assert!(!dump_due(61));
        assert!(dump_due(360));
        assert!(dump_due(660));
        assert!(!dump_due(600));
    }

    #[test]
    fn test_events_delivered_before_tick() {
        let (mut engine_loop, _membership, tx) = engine_loop(None);
        tx.send(SessionEvent::NickChosen("gw-1".into())).unwrap();
        tx.send(SessionEvent::TopicChanged("welcome".into())).unwrap();

        assert_eq!(engine_loop.step(), TickOutcome::Continue);
        assert_eq!(engine_loop.engine().nick(), "gw-1");
        assert_eq!(engine_loop.engine().topic(), Some("welcome"));
    }

    #[test]
    fn test_membership_dump_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.txt");
        let (mut engine_loop, membership, _tx) = engine_loop(Some(path.clone()));
        membership.join("s-alpha", "alpha", "10.0.0.1");
        membership.set_operator("s-alpha", true);
        membership.join("gw-1", "gw", "10.0.0.2");

        for _ in 0..DUMP_FIRST_TICKS - 1 {
            engine_loop.step();
        }
        assert!(!path.exists());

        engine_loop.step();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "gw-1 gw 10.0.0.2 false\ns-alpha alpha 10.0.0.1 true\n");
    }

    #[test]
    fn test_dump_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("users.txt");
        let (mut engine_loop, _membership, _tx) = engine_loop(Some(path));
        for _ in 0..DUMP_FIRST_TICKS {
            assert_eq!(engine_loop.step(), TickOutcome::Continue);
        }
    }
}
