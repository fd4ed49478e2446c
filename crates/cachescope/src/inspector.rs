//! The Inspector: receives device snapshots and serves the dashboard.
//!
//! Each device gets a mirror [`MemoryCache`] that snapshots are rehydrated
//! into, and a [`CacheView`] holding what the dashboard shows. Storage
//! category toggles act on views only. Dashboard actions act on the mirror
//! and are queued as [`DashboardAction`]s for delivery to the device.

use std::collections::HashMap;
use std::sync::Arc;

use cachescope_core::{
    snapshot_digest, DehydratedMutation, DehydratedQuery, DehydratedState, EnabledCategories,
    QueryHash, StateDigest, StorageCategory,
};
use cachescope_store::{
    dehydrate_query, rehydrate, HydrateReport, MemoryCache, MemoryPreferences, PreferenceStore,
    SqlitePreferences,
};
use cachescope_sync::{
    Device, DeviceAttributes, DeviceRegistry, FrameCodec, InspectorMessage, PersistentDeviceId,
    QueryAction, QueryActionMessage, SocketId, SyncMessage, Transport, TransportEvent,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::config::InspectorConfig;
use crate::error::{InspectorError, Result};
use crate::view::CacheView;

/// A cache action the dashboard issued against one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardAction {
    pub device: PersistentDeviceId,
    /// Session the device was on when the action was issued.
    pub socket: SocketId,
    pub action: QueryAction,
    pub query_hash: QueryHash,
}

impl DashboardAction {
    pub fn to_message(&self) -> InspectorMessage {
        InspectorMessage::QueryAction(QueryActionMessage {
            action: self.action,
            query_hash: self.query_hash.clone(),
            persistent_device_id: self.device.clone(),
        })
    }
}

/// Outcome of ingesting one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The snapshot was rehydrated into the device's mirror.
    Applied {
        device: Device,
        report: HydrateReport,
        /// Entries withheld from the view by the category filter.
        suppressed: usize,
    },
    /// The snapshot matched the last one from this device.
    Unchanged { device: Device },
}

impl IngestOutcome {
    pub fn device(&self) -> &Device {
        match self {
            IngestOutcome::Applied { device, .. } | IngestOutcome::Unchanged { device } => device,
        }
    }
}

/// Mirror and view for one device.
#[derive(Default)]
struct DeviceSession {
    mirror: Arc<MemoryCache>,
    view: CacheView,
    last_digest: Option<StateDigest>,
}

/// The receiving side.
///
/// Each device keeps a mirror cache and a filtered view. Ingesting a
/// snapshot upserts into both and never evicts, so a query that disappears
/// from the device stays mirrored until [`Inspector::remove_query`] drops it.
/// Sessions likewise outlive their socket until [`Inspector::remove_device`]
/// or [`Inspector::prune_disconnected`].
pub struct Inspector {
    config: InspectorConfig,
    registry: DeviceRegistry,
    sessions: RwLock<HashMap<PersistentDeviceId, Arc<Mutex<DeviceSession>>>>,
    categories: RwLock<EnabledCategories>,
    preferences: Arc<dyn PreferenceStore>,
    actions: mpsc::Sender<DashboardAction>,
}

impl Inspector {
    /// Create an inspector with the given preference store.
    ///
    /// Returns the receiving end of the dashboard action channel. If the
    /// preferences cannot be read, every category starts enabled.
    pub async fn new(
        config: InspectorConfig,
        preferences: Arc<dyn PreferenceStore>,
    ) -> (Self, mpsc::Receiver<DashboardAction>) {
        let categories = match preferences.load_categories().await {
            Ok(categories) => categories,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load category preferences, enabling all");
                EnabledCategories::all()
            }
        };
        tracing::debug!(enabled = ?categories, "loaded category preferences");

        let (tx, rx) = mpsc::channel(config.action_buffer.max(1));
        let inspector = Self {
            config,
            registry: DeviceRegistry::new(),
            sessions: RwLock::new(HashMap::new()),
            categories: RwLock::new(categories),
            preferences,
            actions: tx,
        };
        (inspector, rx)
    }

    /// Create an inspector with preferences at `config.preferences_path`,
    /// or in memory if unset.
    ///
    /// A preferences file that cannot be opened is not fatal: the inspector
    /// keeps its preferences in memory for this run, with every category
    /// enabled.
    pub async fn open(config: InspectorConfig) -> (Self, mpsc::Receiver<DashboardAction>) {
        let preferences: Arc<dyn PreferenceStore> = match &config.preferences_path {
            Some(path) => match SqlitePreferences::open(path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "cannot open preferences, keeping them in memory"
                    );
                    Arc::new(MemoryPreferences::new())
                }
            },
            None => Arc::new(MemoryPreferences::new()),
        };
        Self::new(config, preferences).await
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ingest
    // ─────────────────────────────────────────────────────────────────────────

    /// Handle one transport event.
    ///
    /// Returns the ingest outcome for frames.
    pub fn handle_event(&self, event: TransportEvent) -> Result<Option<IngestOutcome>> {
        match event {
            TransportEvent::Connected(socket) => {
                tracing::debug!(%socket, "socket opened");
                Ok(None)
            }
            TransportEvent::Frame(socket, frame) => self.ingest_frame(&socket, &frame).map(Some),
            TransportEvent::Disconnected(socket) => match self.disconnect(&socket) {
                Err(InspectorError::Registry(e)) => {
                    tracing::debug!(%socket, error = %e, "socket closed before registering");
                    Ok(None)
                }
                other => other.map(|_| None),
            },
        }
    }

    /// Decode and ingest a frame received on `socket`.
    pub fn ingest_frame(&self, socket: &SocketId, frame: &[u8]) -> Result<IngestOutcome> {
        let message: SyncMessage = self
            .config
            .frame_codec
            .decode_bounded(frame, self.config.max_frame_bytes)
            .map_err(|e| {
                tracing::warn!(%socket, error = %e, "dropping undecodable frame");
                e
            })?;
        self.ingest(socket, message)
    }

    /// Ingest an envelope received on `socket`.
    ///
    /// A payload that fails to decode drops the whole envelope and leaves
    /// the registry and mirror untouched.
    pub fn ingest(&self, socket: &SocketId, message: SyncMessage) -> Result<IngestOutcome> {
        let SyncMessage::DehydratedState(envelope) = message;
        let id = envelope.persistent_device_id.clone();
        let digest = snapshot_digest(&envelope.state);

        let session = self.session_or_create(&id);
        let mut session = session.lock();

        if session.last_digest == Some(digest) {
            let device = self
                .registry
                .upsert(&id, DeviceAttributes::from_envelope(&envelope, socket.clone()));
            tracing::debug!(device = %id, %digest, "snapshot unchanged");
            return Ok(IngestOutcome::Unchanged { device });
        }

        let state = DehydratedState::from_payload(&envelope.state).map_err(|e| {
            tracing::warn!(device = %id, %socket, error = %e, "dropping envelope with corrupt payload");
            e
        })?;

        let device = self
            .registry
            .upsert(&id, DeviceAttributes::from_envelope(&envelope, socket.clone()));
        let report = rehydrate(&state, &*session.mirror);
        let suppressed = self.refresh_view(&mut session, &state);
        session.last_digest = Some(digest);

        tracing::debug!(
            device = %id,
            %digest,
            queries = state.queries.len(),
            mutations = state.mutations.len(),
            suppressed,
            "applied snapshot"
        );
        Ok(IngestOutcome::Applied {
            device,
            report,
            suppressed,
        })
    }

    /// Offer the entries of a just-applied snapshot to the session's view.
    fn refresh_view(&self, session: &mut DeviceSession, state: &DehydratedState) -> usize {
        let enabled = self.categories.read().clone();
        let mut suppressed = 0;

        for incoming in &state.queries {
            // The mirror holds the merged entry, which is what the view shows.
            let merged = session
                .mirror
                .get_query(&incoming.query_hash)
                .map(|live| dehydrate_query(&live))
                .unwrap_or_else(|| incoming.clone());
            if !session.view.offer_query(merged, &enabled) {
                tracing::trace!(query_hash = %incoming.query_hash, "query hidden by category filter");
                suppressed += 1;
            }
        }
        for mutation in &state.mutations {
            if !session.view.offer_mutation(mutation.clone(), &enabled) {
                suppressed += 1;
            }
        }
        suppressed
    }

    /// Mark the device on `socket` disconnected. Its mirror and view stay.
    pub fn disconnect(&self, socket: &SocketId) -> Result<Option<Device>> {
        Ok(self.registry.mark_disconnected(socket)?)
    }

    fn session_or_create(&self, id: &PersistentDeviceId) -> Arc<Mutex<DeviceSession>> {
        if let Some(session) = self.sessions.read().get(id) {
            return Arc::clone(session);
        }
        Arc::clone(self.sessions.write().entry(id.clone()).or_default())
    }

    fn session(&self, id: &PersistentDeviceId) -> Result<Arc<Mutex<DeviceSession>>> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| cachescope_sync::RegistryError::UnknownDevice(id.to_string()).into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Storage Categories
    // ─────────────────────────────────────────────────────────────────────────

    pub fn enabled_categories(&self) -> EnabledCategories {
        self.categories.read().clone()
    }

    /// Enable or disable a storage category and persist the choice.
    ///
    /// Disabling removes that category's entries from every view. Enabling
    /// restores nothing; entries show up again as devices resend them.
    /// A failure to persist is logged and does not undo the toggle.
    /// Returns true if the setting changed.
    pub async fn set_category_enabled(&self, category: StorageCategory, enabled: bool) -> bool {
        let changed = self.categories.write().set(category, enabled);

        if changed && !enabled {
            let sessions: Vec<_> = self.sessions.read().values().cloned().collect();
            let removed: usize = sessions
                .iter()
                .map(|session| session.lock().view.hide_category(category))
                .sum();
            tracing::info!(%category, removed, "storage category disabled");
        } else if changed {
            tracing::info!(%category, "storage category enabled");
        }

        if let Err(e) = self.preferences.save_category(category, enabled).await {
            tracing::warn!(%category, enabled, error = %e, "failed to persist category preference");
        }
        changed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Views
    // ─────────────────────────────────────────────────────────────────────────

    /// Queries the dashboard shows for `id`, ordered by hash.
    pub fn visible_queries(&self, id: &PersistentDeviceId) -> Result<Vec<DehydratedQuery>> {
        let session = self.session(id)?;
        let session = session.lock();
        Ok(session.view.queries().cloned().collect())
    }

    /// Mutations the dashboard shows for `id`, ordered by id.
    pub fn visible_mutations(&self, id: &PersistentDeviceId) -> Result<Vec<DehydratedMutation>> {
        let session = self.session(id)?;
        let session = session.lock();
        Ok(session.view.mutations().cloned().collect())
    }

    /// The dashboard's view of `id` as a snapshot.
    pub fn visible_state(&self, id: &PersistentDeviceId) -> Result<DehydratedState> {
        let session = self.session(id)?;
        let state = session.lock().view.to_state();
        Ok(state)
    }

    /// Unfiltered mirror of a device's cache.
    pub fn mirror(&self, id: &PersistentDeviceId) -> Option<Arc<MemoryCache>> {
        let session = self.sessions.read().get(id).cloned()?;
        let mirror = Arc::clone(&session.lock().mirror);
        Some(mirror)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────────────

    pub fn devices(&self) -> Vec<Device> {
        self.registry.list_all()
    }

    pub fn connected_devices(&self) -> Vec<Device> {
        self.registry.list_connected()
    }

    pub fn device(&self, id: &PersistentDeviceId) -> Option<Device> {
        self.registry.find_by_persistent_id(id)
    }

    pub fn set_target(&self, id: Option<&PersistentDeviceId>) -> Result<()> {
        Ok(self.registry.set_target(id)?)
    }

    pub fn target(&self) -> Option<Device> {
        self.registry.target()
    }

    /// Forget a device along with its mirror and view.
    pub fn remove_device(&self, id: &PersistentDeviceId) -> Option<Device> {
        self.sessions.write().remove(id);
        self.registry.remove(id)
    }

    /// Forget every disconnected device.
    pub fn prune_disconnected(&self) -> Vec<PersistentDeviceId> {
        let removed = self.registry.prune_disconnected();
        let mut sessions = self.sessions.write();
        for id in &removed {
            sessions.remove(id);
        }
        removed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dashboard Actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark a query stale on the mirror and ask the device to do the same.
    pub async fn invalidate_query(&self, id: &PersistentDeviceId, hash: &QueryHash) -> Result<()> {
        self.dispatch(id, hash, QueryAction::Invalidate).await
    }

    /// Remove a query from the mirror and view and ask the device to drop it.
    pub async fn remove_query(&self, id: &PersistentDeviceId, hash: &QueryHash) -> Result<()> {
        self.dispatch(id, hash, QueryAction::Remove).await
    }

    /// Ask the device to refetch a query. The mirror is updated by the
    /// snapshot the device sends afterwards.
    pub async fn refetch_query(&self, id: &PersistentDeviceId, hash: &QueryHash) -> Result<()> {
        self.dispatch(id, hash, QueryAction::Refetch).await
    }

    async fn dispatch(
        &self,
        id: &PersistentDeviceId,
        hash: &QueryHash,
        action: QueryAction,
    ) -> Result<()> {
        let device = self
            .registry
            .find_by_persistent_id(id)
            .ok_or_else(|| cachescope_sync::RegistryError::UnknownDevice(id.to_string()))?;
        if !device.is_connected {
            return Err(InspectorError::DeviceOffline(id.clone()));
        }

        {
            let session = self.session(id)?;
            let mut session = session.lock();
            if !session.mirror.contains_query(hash) {
                return Err(InspectorError::QueryNotFound {
                    device: id.clone(),
                    query_hash: hash.clone(),
                });
            }
            match action {
                QueryAction::Invalidate => {
                    session.mirror.invalidate(hash);
                    if let Some(query) = session.view.query_mut(hash) {
                        query.state.is_invalidated = true;
                    }
                }
                QueryAction::Remove => {
                    session.mirror.remove_query(hash);
                    session.view.remove_query(hash);
                    // The device's next snapshot may differ only by this query.
                    session.last_digest = None;
                }
                QueryAction::Refetch => {}
            }
        }

        let queued = DashboardAction {
            device: id.clone(),
            socket: device.socket_id,
            action,
            query_hash: hash.clone(),
        };
        tracing::debug!(device = %id, query_hash = %hash, %action, "queued dashboard action");
        self.actions
            .send(queued)
            .await
            .map_err(|_| InspectorError::ActionChannelClosed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event Loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Process transport events until the transport closes.
    ///
    /// A failure on one event is logged and does not stop the loop.
    pub async fn run<T: Transport + ?Sized>(&self, transport: &T) -> Result<()> {
        loop {
            let event = match transport.recv().await {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!(error = %e, "transport closed");
                    return Ok(());
                }
            };
            let socket = event.socket().clone();
            if let Err(e) = self.handle_event(event) {
                tracing::warn!(%socket, error = %e, "failed to handle transport event");
            }
        }
    }
}

/// Deliver queued dashboard actions until the channel closes.
///
/// Returns how many were sent. Actions for closed sockets are logged and
/// dropped.
pub async fn forward_actions<T: Transport + ?Sized>(
    mut actions: mpsc::Receiver<DashboardAction>,
    transport: &T,
    codec: FrameCodec,
) -> usize {
    let mut sent = 0;
    while let Some(action) = actions.recv().await {
        let frame = match codec.encode(&action.to_message()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(device = %action.device, error = %e, "failed to encode action");
                continue;
            }
        };
        match transport.send(&action.socket, frame).await {
            Ok(()) => sent += 1,
            Err(e) => {
                tracing::warn!(device = %action.device, socket = %action.socket, error = %e, "failed to deliver action");
            }
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachescope_core::{QueryKey, QueryState, Value};
    use cachescope_sync::StateEnvelope;

    fn envelope(id: &str, queries: Vec<DehydratedQuery>) -> SyncMessage {
        let state = DehydratedState {
            mutations: Vec::new(),
            queries,
        };
        SyncMessage::DehydratedState(StateEnvelope {
            state: state.to_payload(),
            is_online_manager_online: true,
            persistent_device_id: PersistentDeviceId::from(id),
            device_name: Some("Pixel".into()),
            platform: None,
            extra_device_info: None,
            env_variables: None,
        })
    }

    fn todos(n: i64) -> DehydratedQuery {
        DehydratedQuery::new(
            QueryKey::from(["todos"]),
            QueryState::success(Value::from(n), n),
        )
    }

    async fn inspector() -> (Inspector, mpsc::Receiver<DashboardAction>) {
        Inspector::new(InspectorConfig::default(), Arc::new(MemoryPreferences::new())).await
    }

    #[tokio::test]
    async fn test_duplicate_snapshot_is_unchanged() {
        let (inspector, _rx) = inspector().await;
        let socket = SocketId::new("s1");

        let first = inspector.ingest(&socket, envelope("dev-1", vec![todos(1)])).unwrap();
        assert!(matches!(first, IngestOutcome::Applied { .. }));

        let second = inspector.ingest(&socket, envelope("dev-1", vec![todos(1)])).unwrap();
        assert!(matches!(second, IngestOutcome::Unchanged { .. }));

        let third = inspector.ingest(&socket, envelope("dev-1", vec![todos(2)])).unwrap();
        let IngestOutcome::Applied { report, .. } = third else {
            panic!("expected applied");
        };
        assert_eq!(report.queries_updated, 1);
    }

    #[tokio::test]
    async fn test_corrupt_payload_leaves_registry_untouched() {
        let (inspector, _rx) = inspector().await;
        let mut message = envelope("dev-1", vec![todos(1)]);
        let SyncMessage::DehydratedState(envelope) = &mut message;
        envelope.state.json = serde_json::json!({"queries": "nope"});

        let err = inspector.ingest(&SocketId::new("s1"), message).unwrap_err();
        assert!(matches!(err, InspectorError::Serialization(_)));
        assert!(inspector.devices().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_dropped() {
        let (inspector, _rx) = inspector().await;
        let err = inspector
            .ingest_frame(&SocketId::new("s1"), b"{\"type\":\"nope\"}")
            .unwrap_err();
        assert!(matches!(err, InspectorError::Sync(_)));
    }

    #[tokio::test]
    async fn test_actions_update_mirror_and_queue() {
        let (inspector, mut rx) = inspector().await;
        let socket = SocketId::new("s1");
        let id = PersistentDeviceId::from("dev-1");
        inspector.ingest(&socket, envelope("dev-1", vec![todos(1)])).unwrap();
        let hash = QueryKey::from(["todos"]).hash();

        inspector.invalidate_query(&id, &hash).await.unwrap();
        let mirror = inspector.mirror(&id).unwrap();
        assert!(mirror.query_state(&hash).unwrap().is_invalidated);
        assert!(inspector.visible_queries(&id).unwrap()[0].state.is_invalidated);

        inspector.refetch_query(&id, &hash).await.unwrap();
        inspector.remove_query(&id, &hash).await.unwrap();
        assert!(!mirror.contains_query(&hash));
        assert!(inspector.visible_queries(&id).unwrap().is_empty());

        let actions: Vec<_> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|a| a.action)
        .collect();
        assert_eq!(
            actions,
            vec![QueryAction::Invalidate, QueryAction::Refetch, QueryAction::Remove]
        );

        let err = inspector.remove_query(&id, &hash).await.unwrap_err();
        assert!(matches!(err, InspectorError::QueryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_actions_on_offline_or_unknown_device() {
        let (inspector, _rx) = inspector().await;
        let socket = SocketId::new("s1");
        let id = PersistentDeviceId::from("dev-1");
        let hash = QueryKey::from(["todos"]).hash();

        let err = inspector.invalidate_query(&id, &hash).await.unwrap_err();
        assert!(matches!(err, InspectorError::Registry(_)));

        inspector.ingest(&socket, envelope("dev-1", vec![todos(1)])).unwrap();
        inspector.disconnect(&socket).unwrap();
        let err = inspector.invalidate_query(&id, &hash).await.unwrap_err();
        assert!(matches!(err, InspectorError::DeviceOffline(_)));

        // Last-known state stays visible.
        assert_eq!(inspector.visible_queries(&id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_preferences_enable_everything() {
        struct Broken;

        #[async_trait::async_trait]
        impl PreferenceStore for Broken {
            async fn load_categories(&self) -> cachescope_store::Result<EnabledCategories> {
                Err(cachescope_store::StoreError::Migration("corrupt".into()))
            }

            async fn save_category(
                &self,
                _category: StorageCategory,
                _enabled: bool,
            ) -> cachescope_store::Result<()> {
                Err(cachescope_store::StoreError::Migration("read-only".into()))
            }
        }

        let (inspector, _rx) = Inspector::new(InspectorConfig::default(), Arc::new(Broken)).await;
        assert_eq!(inspector.enabled_categories(), EnabledCategories::all());
        assert!(inspector.set_category_enabled(StorageCategory::Secure, false).await);
        assert!(!inspector
            .enabled_categories()
            .is_enabled(StorageCategory::Secure));
    }

    #[tokio::test]
    async fn test_remove_device_drops_session() {
        let (inspector, _rx) = inspector().await;
        let id = PersistentDeviceId::from("dev-1");
        inspector
            .ingest(&SocketId::new("s1"), envelope("dev-1", vec![todos(1)]))
            .unwrap();

        assert!(inspector.remove_device(&id).is_some());
        assert!(inspector.mirror(&id).is_none());
        assert!(inspector.visible_queries(&id).is_err());
    }
}
