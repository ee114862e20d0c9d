use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::Stream;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::{SettingField, Settings};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

/// Durable key/value rows behind the settings store
#[async_trait]
pub trait SettingsBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Load every stored row
    async fn load(&self) -> Result<HashMap<String, String>>;

    /// Upsert rows atomically
    async fn save(&self, rows: &[(String, String)]) -> Result<()>;
}

/// SQLite-backed settings rows
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
}

impl SqliteBackend {
    /// Open (or create) the settings database
    pub async fn open(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            // Single writer task, one spare connection for reads
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(&db_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SettingsBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn save(&self, rows: &[(String, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in rows {
            sqlx::query(
                r#"
                INSERT INTO settings (key, value, updated_at)
                VALUES (?1, ?2, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// In-memory settings rows. Clones share the same rows, which lets a second
/// store instance observe what the first one persisted.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    rows: Arc<parking_lot::Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from pre-existing rows (e.g. a legacy record)
    pub fn with_rows<I, K, V>(rows: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let rows = rows.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self {
            rows: Arc::new(parking_lot::Mutex::new(rows)),
        }
    }

    /// Raw stored value for `key`
    pub fn raw(&self, key: &str) -> Option<String> {
        self.rows.lock().get(key).cloned()
    }
}

#[async_trait]
impl SettingsBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<HashMap<String, String>> {
        Ok(self.rows.lock().clone())
    }

    async fn save(&self, rows: &[(String, String)]) -> Result<()> {
        let mut stored = self.rows.lock();
        for (key, value) in rows {
            stored.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// Pending write for the writer task
struct WriteOp {
    rows: Vec<(String, String)>,
    ack: oneshot::Sender<Result<()>>,
}

/// Completion handle for a settings write.
///
/// Dropping it is fine; the write still happens in order.
#[derive(Debug)]
pub struct WriteAck {
    rx: oneshot::Receiver<Result<()>>,
}

impl WriteAck {
    fn ready(result: Result<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Wait until the write has reached the backend
    pub async fn wait(self) -> Result<()> {
        self.rx
            .await
            .map_err(|_| AppError::Internal("settings writer stopped".to_string()))?
    }
}

/// Settings store with write-through persistence
///
/// Reads are lock-free through `ArcSwap`. Writes update the cache and the
/// snapshot channel immediately, then queue the rows for a single writer
/// task, so writes to the same key reach the backend in call order.
#[derive(Clone)]
pub struct SettingsStore {
    cache: Arc<ArcSwap<Settings>>,
    snapshot_tx: Arc<watch::Sender<Arc<Settings>>>,
    write_tx: mpsc::UnboundedSender<WriteOp>,
    /// Keeps cache updates and queue order in lockstep
    write_lock: Arc<parking_lot::Mutex<()>>,
    events: Option<Arc<EventBus>>,
}

impl SettingsStore {
    /// Open the SQLite settings database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        let backend = SqliteBackend::open(db_path).await?;
        Self::with_backend(Arc::new(backend)).await
    }

    /// Load settings from `backend` and start the writer task
    pub async fn with_backend(backend: Arc<dyn SettingsBackend>) -> Result<Self> {
        let rows = backend.load().await?;
        let (settings, repaired) = Settings::from_rows(&rows);
        info!(
            backend = backend.name(),
            cameras = settings.cameras.len(),
            "Settings loaded"
        );

        let settings = Arc::new(settings);
        let (snapshot_tx, _) = watch::channel(settings.clone());
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(backend, write_rx));

        let store = Self {
            cache: Arc::new(ArcSwap::new(settings)),
            snapshot_tx: Arc::new(snapshot_tx),
            write_tx,
            write_lock: Arc::new(parking_lot::Mutex::new(())),
            events: None,
        };

        if repaired {
            info!("Repaired stored camera list, writing it back");
            let current = store.get();
            store.enqueue(Settings::registry_fields(current.registry()).to_vec());
        }

        Ok(store)
    }

    /// Publish `settings.changed` events on `events`
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Current settings (lock-free)
    pub fn get(&self) -> Arc<Settings> {
        self.cache.load_full()
    }

    /// Alias of [`get`](Self::get) matching the store interface
    pub fn read_all(&self) -> Arc<Settings> {
        self.get()
    }

    /// Receiver that always holds the latest snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.snapshot_tx.subscribe()
    }

    /// Lazy stream of snapshots: the current one first, then one per change.
    ///
    /// Snapshots produced faster than they are consumed are coalesced.
    pub fn live_snapshots(&self) -> impl Stream<Item = Arc<Settings>> {
        let mut rx = self.subscribe();
        async_stream::stream! {
            let first = rx.borrow_and_update().clone();
            yield first;
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                yield next;
            }
        }
    }

    /// Write a single field
    pub fn write_field(&self, field: SettingField) -> WriteAck {
        self.write_fields(vec![field])
    }

    /// Write several fields as one change (one snapshot, one transaction)
    pub fn write_fields(&self, fields: Vec<SettingField>) -> WriteAck {
        if fields.is_empty() {
            return WriteAck::ready(Ok(()));
        }
        self.enqueue(fields)
    }

    /// Replace the whole settings object
    pub fn write_all(&self, settings: Settings) -> WriteAck {
        self.enqueue(settings.fields())
    }

    fn enqueue(&self, mut fields: Vec<SettingField>) -> WriteAck {
        let (ack_tx, ack_rx) = oneshot::channel();
        let keys: Vec<String>;
        {
            let _guard = self.write_lock.lock();

            let mut next = (*self.cache.load_full()).clone();
            for field in &fields {
                field.apply(&mut next);
            }

            // The current index always points into the camera list
            let (_, current) = next.registry().into_parts();
            let current = current as u32;
            if next.current_camera_index != current {
                debug!(
                    requested = next.current_camera_index,
                    repaired = current,
                    "Clamping camera index"
                );
                next.current_camera_index = current;
                fields.retain(|f| !matches!(f, SettingField::CurrentCameraIndex(_)));
                fields.push(SettingField::CurrentCameraIndex(current));
            }

            let rows = match fields.iter().map(SettingField::to_row).collect::<Result<Vec<_>>>() {
                Ok(rows) => rows,
                Err(e) => return WriteAck::ready(Err(e)),
            };
            keys = rows.iter().map(|(k, _)| k.clone()).collect();

            let next = Arc::new(next);
            self.cache.store(next.clone());
            self.snapshot_tx.send_replace(next);

            if self.write_tx.send(WriteOp { rows, ack: ack_tx }).is_err() {
                return WriteAck::ready(Err(AppError::Internal(
                    "settings writer stopped".to_string(),
                )));
            }
        }

        debug!(?keys, "Settings updated");
        if let Some(events) = &self.events {
            events.publish(SystemEvent::SettingsChanged { keys });
        }

        WriteAck { rx: ack_rx }
    }
}

/// Applies queued writes one at a time, in order
async fn run_writer(backend: Arc<dyn SettingsBackend>, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        let result = backend.save(&op.rows).await;
        if let Err(e) = &result {
            warn!(backend = backend.name(), "Failed to persist settings: {}", e);
        }
        let _ = op.ack.send(result);
    }
    debug!("Settings writer stopped");
}
