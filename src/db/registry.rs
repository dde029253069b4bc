//! Connection registry.
//!
//! Maps caller-supplied identifiers to connected adapters. An identifier moves
//! through `Absent -> Connecting -> Connected -> Absent`; the `Connecting`
//! reservation is internal and never returned by lookups.

use crate::config::SystemSchemas;
use crate::db::adapter::DatabaseAdapter;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionDescriptor, ConnectionInfo, DatabaseType};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// A connected adapter and the descriptor it was created from.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub descriptor: ConnectionDescriptor,
    pub adapter: Arc<dyn DatabaseAdapter>,
    pub info: ConnectionInfo,
}

#[derive(Debug)]
enum Slot {
    Connecting,
    Connected(Arc<ConnectionEntry>),
}

type SlotMap = RwLock<HashMap<String, Slot>>;

/// Removes a `Connecting` reservation unless the connection was committed.
///
/// Runs on every exit path of `create_connection`, including cancellation of
/// the future while the connect is in flight.
struct Reservation<'a> {
    slots: &'a SlotMap,
    id: String,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, entry: Arc<ConnectionEntry>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.insert(self.id.clone(), Slot::Connected(entry));
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(slots.get(&self.id), Some(Slot::Connecting)) {
            slots.remove(&self.id);
            debug!(connection_id = %self.id, "Released connection reservation");
        }
    }
}

/// Construct a disconnected adapter for `db_type`.
///
/// Fails with a connection error when the engine's driver was compiled out.
#[cfg_attr(
    not(any(feature = "mysql", feature = "postgres")),
    allow(unused_variables)
)]
pub fn build_adapter(
    db_type: DatabaseType,
    system_schemas: &SystemSchemas,
) -> DbResult<Arc<dyn DatabaseAdapter>> {
    match db_type {
        #[cfg(feature = "mysql")]
        DatabaseType::MySQL => Ok(Arc::new(crate::db::mysql::MySqlAdapter::new(
            system_schemas.mysql.clone(),
        ))),
        #[cfg(feature = "postgres")]
        DatabaseType::PostgreSQL => Ok(Arc::new(crate::db::postgres::PostgresAdapter::new(
            system_schemas.postgres.clone(),
        ))),
        #[cfg(feature = "sqlite")]
        DatabaseType::SQLite => Ok(Arc::new(crate::db::sqlite::SqliteAdapter::new())),
        #[allow(unreachable_patterns)]
        other => Err(DbError::connection(
            format!("{} driver unavailable", other),
            format!("Rebuild with the '{}' feature enabled", feature_name(other)),
        )),
    }
}

fn feature_name(db_type: DatabaseType) -> &'static str {
    match db_type {
        DatabaseType::MySQL => "mysql",
        DatabaseType::PostgreSQL => "postgres",
        DatabaseType::SQLite => "sqlite",
    }
}

/// Thread-safe registry of live connections.
///
/// Cloning is cheap and every clone shares the same map. The map lock is only
/// held for lookups and inserts, never across a driver call.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    slots: Arc<SlotMap>,
    system_schemas: SystemSchemas,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose adapters hide the given system schemas from listings.
    pub fn with_system_schemas(system_schemas: SystemSchemas) -> Self {
        Self {
            slots: Arc::default(),
            system_schemas,
        }
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, id: &str) -> Option<Arc<ConnectionEntry>> {
        match self.read_slots().get(id) {
            Some(Slot::Connected(entry)) => Some(Arc::clone(entry)),
            _ => None,
        }
    }

    fn reserve(&self, id: &str) -> DbResult<Reservation<'_>> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.contains_key(id) {
            return Err(DbError::duplicate_identifier(id));
        }
        slots.insert(id.to_string(), Slot::Connecting);
        Ok(Reservation {
            slots: &self.slots,
            id: id.to_string(),
            committed: false,
        })
    }

    /// Connect an adapter for `descriptor` and register it under `descriptor.id`.
    ///
    /// Fails with `DuplicateIdentifier` when the id is connected or being
    /// connected. A failed connect leaves no entry behind.
    pub async fn create_connection(
        &self,
        descriptor: ConnectionDescriptor,
    ) -> DbResult<ConnectionInfo> {
        descriptor.validate()?;
        let reservation = self.reserve(&descriptor.id)?;

        let adapter = build_adapter(descriptor.db_type, &self.system_schemas)?;
        adapter.connect(&descriptor).await?;

        let server_version = match adapter.server_version().await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(connection_id = %descriptor.id, error = %e, "Failed to get server version");
                None
            }
        };

        let info = ConnectionInfo::new(&descriptor, server_version);
        info!(
            connection_id = %descriptor.id,
            db_type = %descriptor.db_type,
            dsn = %descriptor.masked_dsn(),
            "Connection registered"
        );

        reservation.commit(Arc::new(ConnectionEntry {
            descriptor,
            adapter,
            info: info.clone(),
        }));
        Ok(info)
    }

    /// Adapter registered under `id`, if any.
    pub fn get_connection(&self, id: &str) -> Option<Arc<dyn DatabaseAdapter>> {
        self.entry(id).map(|entry| Arc::clone(&entry.adapter))
    }

    pub fn connection_info(&self, id: &str) -> Option<ConnectionInfo> {
        self.entry(id).map(|entry| entry.info.clone())
    }

    /// Summaries of all connected entries, ordered by id.
    pub fn list_connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .read_slots()
            .values()
            .filter_map(|slot| match slot {
                Slot::Connected(entry) => Some(entry.info.clone()),
                Slot::Connecting => None,
            })
            .collect();
        infos.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        infos
    }

    pub fn connection_count(&self) -> usize {
        self.read_slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Connected(_)))
            .count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entry(id).is_some()
    }

    /// Re-validate the link behind `id`.
    pub async fn connection_status(&self, id: &str) -> DbResult<bool> {
        let adapter = self
            .get_connection(id)
            .ok_or_else(|| DbError::connection_not_found(id))?;
        Ok(adapter.test_connection().await)
    }

    /// Disconnect and remove `id`.
    ///
    /// The entry is removed even when the disconnect reports an error; that
    /// error is then returned.
    pub async fn close_connection(&self, id: &str) -> DbResult<()> {
        let entry = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            match slots.get(id) {
                Some(Slot::Connected(_)) => match slots.remove(id) {
                    Some(Slot::Connected(entry)) => entry,
                    _ => return Err(DbError::connection_not_found(id)),
                },
                _ => return Err(DbError::connection_not_found(id)),
            }
        };

        let result = entry.adapter.disconnect().await;
        match &result {
            Ok(()) => info!(connection_id = %id, "Connection closed"),
            Err(e) => warn!(connection_id = %id, error = %e, "Connection removed with disconnect error"),
        }
        result
    }

    /// Close every connected entry, continuing past failures.
    ///
    /// Returns `CloseAll` listing each id whose disconnect failed.
    pub async fn close_all(&self) -> DbResult<()> {
        let entries: Vec<Arc<ConnectionEntry>> = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<String> = slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Connected(_)))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| match slots.remove(id) {
                    Some(Slot::Connected(entry)) => Some(entry),
                    _ => None,
                })
                .collect()
        };

        let mut failures = Vec::new();
        for entry in entries {
            let id = &entry.descriptor.id;
            if let Err(e) = entry.adapter.disconnect().await {
                warn!(connection_id = %id, error = %e, "Failed to close connection");
                failures.push((id.clone(), e.to_string()));
            }
        }

        if failures.is_empty() {
            info!("All connections closed");
            Ok(())
        } else {
            Err(DbError::CloseAll { failures })
        }
    }

    /// Connect, validate and disconnect without registering anything.
    pub async fn test_descriptor(&self, descriptor: &ConnectionDescriptor) -> DbResult<ConnectionInfo> {
        descriptor.validate()?;
        let adapter = build_adapter(descriptor.db_type, &self.system_schemas)?;
        adapter.connect(descriptor).await?;

        let server_version = adapter.server_version().await.ok();
        if let Err(e) = adapter.disconnect().await {
            warn!(connection_id = %descriptor.id, error = %e, "Failed to close test connection");
        }
        Ok(ConnectionInfo::new(descriptor, server_version))
    }
}
