use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config, NoTls, Statement};
use tracing::{error, info, warn};

use oee_core::config::StoreConfig;
use oee_core::{ProductionEvent, StatusEvent};
use oee_runtime::metrics::MetricsRegistry;

use crate::store::{EventStore, StoreError};

pub const MIGRATIONS: &str = include_str!("../../../migrations/0001_init.sql");

const INSERT_STATUS: &str =
    "INSERT INTO status_events (time, machine_id, status) VALUES ($1, $2, $3)";
const INSERT_PRODUCTION: &str = "INSERT INTO production_events \
     (time, machine_id, parts_produced, parts_scrapped) VALUES ($1, $2, $3, $4)";

/// Driver config set field by field, so values are passed through unquoted and intact.
pub fn pg_config(cfg: &StoreConfig) -> Config {
    let mut pg = Config::new();
    pg.host(&cfg.host)
        .port(cfg.port)
        .user(&cfg.user)
        .password(&cfg.password)
        .dbname(&cfg.dbname)
        .ssl_mode(SslMode::Disable);
    pg
}

trait Liveness {
    fn is_closed(&self) -> bool;
}

/// Holds the current session and swaps in a fresh one once it reports closed.
struct Reconnecting<S> {
    current: RwLock<Arc<S>>,
    metrics: MetricsRegistry,
}

impl<S: Liveness> Reconnecting<S> {
    fn new(session: S, metrics: MetricsRegistry) -> Self {
        Self { current: RwLock::new(Arc::new(session)), metrics }
    }

    async fn get<F, Fut>(&self, reopen: F) -> Result<Arc<S>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S, StoreError>>,
    {
        {
            let current = self.current.read().await;
            if !current.is_closed() {
                return Ok(current.clone());
            }
        }

        let mut current = self.current.write().await;
        // Another task may have reconnected while this one waited for the lock.
        if current.is_closed() {
            warn!("postgres connection lost, reconnecting");
            *current = Arc::new(reopen().await?);
            self.metrics.inc_store_reconnects(1);
            info!("reconnected to postgres");
        }
        Ok(current.clone())
    }
}

struct Session {
    client: Client,
    insert_status: Statement,
    insert_production: Statement,
    driver: JoinHandle<()>,
}

impl Session {
    async fn open(config: &Config, apply_migrations: bool) -> Result<Self, StoreError> {
        let (client, connection) = config.connect(NoTls).await?;

        // Drive the connection in the background
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection error: {e}");
            }
        });

        if apply_migrations {
            client.batch_execute(MIGRATIONS).await?;
            info!("schema migrations applied");
        }

        let insert_status = client.prepare(INSERT_STATUS).await?;
        let insert_production = client.prepare(INSERT_PRODUCTION).await?;

        Ok(Self { client, insert_status, insert_production, driver })
    }
}

impl Liveness for Session {
    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

pub struct PgStore {
    config: Config,
    session: Reconnecting<Session>,
}

impl PgStore {
    /// Connect, optionally apply the bundled schema, and prepare the insert statements.
    ///
    /// A lost connection is re-established on the next insert.
    pub async fn connect(
        cfg: &StoreConfig,
        apply_migrations: bool,
        metrics: MetricsRegistry,
    ) -> Result<Self, StoreError> {
        let config = pg_config(cfg);
        let session = Session::open(&config, apply_migrations).await?;
        info!(host = %cfg.host, port = cfg.port, dbname = %cfg.dbname, "connected to postgres");
        Ok(Self { config, session: Reconnecting::new(session, metrics) })
    }

    async fn session(&self) -> Result<Arc<Session>, StoreError> {
        self.session.get(|| Session::open(&self.config, false)).await
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn insert_status(&self, event: &StatusEvent) -> Result<(), StoreError> {
        let session = self.session().await?;
        let status = event.status.as_str();
        let params: [&(dyn ToSql + Sync); 3] = [&event.timestamp, &event.machine_id, &status];
        session.client.execute(&session.insert_status, &params).await?;
        Ok(())
    }

    async fn insert_production(&self, event: &ProductionEvent) -> Result<(), StoreError> {
        let session = self.session().await?;
        let params: [&(dyn ToSql + Sync); 4] = [
            &event.timestamp,
            &event.machine_id,
            &event.parts_produced,
            &event.parts_scrapped,
        ];
        session.client.execute(&session.insert_production, &params).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use tokio_postgres::config::Host;

    use super::*;

    struct Fake {
        generation: u32,
        closed: AtomicBool,
    }

    impl Fake {
        fn new(generation: u32) -> Self {
            Self { generation, closed: AtomicBool::new(false) }
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    impl Liveness for Fake {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn config_keeps_values_with_spaces_intact() {
        let cfg = StoreConfig {
            host: "timescaledb".to_string(),
            port: 6543,
            user: "oee writer".to_string(),
            password: "x dbname=other".to_string(),
            dbname: "oee".to_string(),
        };
        let pg = pg_config(&cfg);
        assert_eq!(pg.get_password(), Some(&b"x dbname=other"[..]));
        assert_eq!(pg.get_user(), Some("oee writer"));
        assert_eq!(pg.get_dbname(), Some("oee"));
        assert_eq!(pg.get_ports(), &[6543]);
        assert!(matches!(&pg.get_hosts()[..], [Host::Tcp(h)] if h == "timescaledb"));
        assert_eq!(pg.get_ssl_mode(), SslMode::Disable);

        let cfg = StoreConfig { password: "my secret".to_string(), ..StoreConfig::default() };
        assert_eq!(pg_config(&cfg).get_password(), Some(&b"my secret"[..]));
    }

    #[tokio::test]
    async fn closed_session_is_replaced_once() {
        let metrics = MetricsRegistry::default();
        let cell = Reconnecting::new(Fake::new(0), metrics.clone());
        let opened = AtomicU32::new(0);
        let counter = &opened;
        let reopen = move || async move {
            let generation = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Fake::new(generation))
        };

        let first = cell.get(reopen).await.unwrap();
        assert_eq!(first.generation, 0);
        assert_eq!(opened.load(Ordering::SeqCst), 0);

        first.close();
        let second = cell.get(reopen).await.unwrap();
        assert_eq!(second.generation, 1);
        assert_eq!(cell.get(reopen).await.unwrap().generation, 1);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().store_reconnects, 1);
    }

    #[tokio::test]
    async fn failed_reconnect_is_retried_on_next_use() {
        let metrics = MetricsRegistry::default();
        let stale = Fake::new(0);
        stale.close();
        let cell = Reconnecting::new(stale, metrics.clone());

        let err = cell
            .get(|| async { Err(StoreError::Unavailable("database restarting".to_string())) })
            .await;
        assert!(matches!(err, Err(StoreError::Unavailable(_))));
        assert_eq!(metrics.snapshot().store_reconnects, 0);

        let session = cell.get(|| async { Ok(Fake::new(7)) }).await.unwrap();
        assert_eq!(session.generation, 7);
        assert_eq!(metrics.snapshot().store_reconnects, 1);
    }
}
