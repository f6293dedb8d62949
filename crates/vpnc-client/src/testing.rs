//! Тестовые двойники внешних зависимостей

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;
use vpnc_core::{
    AccountApi, AlertKind, AlertSink, ApiError, ConnectionConfiguration, ContinuousServerProperties, KeychainError,
    SecretStore, ServerFeature, ServerIp, ServerModel, TunnelError, TunnelManager, TunnelState, VpnCredentials,
    VpnProtocol, VpnSession,
};
use vpnc_probe::SmartProtocol;

pub(crate) fn ip(last: u8, status: i32) -> ServerIp {
    ServerIp {
        id: format!("ip-{}", last),
        entry_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
        exit_ip: IpAddr::V4(Ipv4Addr::new(10, 1, 0, last)),
        domain: format!("node-{}.example.net", last),
        status,
        has_existing_session: false,
    }
}

pub(crate) fn server(id: &str, country: &str, tier: i32, score: f64) -> ServerModel {
    ServerModel {
        id: id.to_string(),
        name: format!("{}#{}", country, id),
        domain: format!("{}.example.net", id),
        load: 10,
        entry_country: country.to_string(),
        exit_country: country.to_string(),
        tier,
        score,
        status: 1,
        feature: ServerFeature::empty(),
        city: None,
        ips: vec![ip(1, 1)],
    }
}

pub(crate) fn credentials(max_tier: i32, max_connect: u32) -> VpnCredentials {
    VpnCredentials {
        username: "user".into(),
        password: "secret".into(),
        max_tier,
        max_connect,
        delinquent: 0,
    }
}

/// Туннель, который переходит в состояния сразу после вызова
pub(crate) struct MockTunnel {
    state: Mutex<TunnelState>,
    events: broadcast::Sender<TunnelState>,
    on_demand: AtomicBool,
    connected_since: Mutex<Option<DateTime<Utc>>>,
    activations: Mutex<Vec<ConnectionConfiguration>>,
    deactivations: AtomicUsize,
    removals: AtomicUsize,
    pub connect_on_activate: AtomicBool,
    pub stuck_on_deactivate: AtomicBool,
    pub fail_activation: AtomicBool,
    pub fail_removal: AtomicBool,
}

impl MockTunnel {
    pub(crate) fn new(initial: TunnelState) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(initial),
            events,
            on_demand: AtomicBool::new(false),
            connected_since: Mutex::new(None),
            activations: Mutex::new(Vec::new()),
            deactivations: AtomicUsize::new(0),
            removals: AtomicUsize::new(0),
            connect_on_activate: AtomicBool::new(true),
            stuck_on_deactivate: AtomicBool::new(false),
            fail_activation: AtomicBool::new(false),
            fail_removal: AtomicBool::new(false),
        }
    }

    /// Сменить состояние и разослать его подписчикам
    pub(crate) fn emit(&self, state: TunnelState) {
        if let TunnelState::Connected(_) = state {
            *self.connected_since.lock().unwrap() = Some(Utc::now());
        }
        *self.state.lock().unwrap() = state.clone();
        let _ = self.events.send(state);
    }

    pub(crate) fn activations(&self) -> Vec<ConnectionConfiguration> {
        self.activations.lock().unwrap().clone()
    }

    pub(crate) fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }

    pub(crate) fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connected_since(&self, at: Option<DateTime<Utc>>) {
        *self.connected_since.lock().unwrap() = at;
    }
}

#[async_trait]
impl TunnelManager for MockTunnel {
    async fn load_configuration(&self) -> Result<(), TunnelError> {
        Ok(())
    }

    async fn activate(&self, configuration: &ConnectionConfiguration) -> Result<(), TunnelError> {
        self.activations.lock().unwrap().push(configuration.clone());
        if self.fail_activation.load(Ordering::SeqCst) {
            return Err(TunnelError::ActivationFailed("mock".into()));
        }

        let descriptor = configuration.descriptor();
        self.emit(TunnelState::Connecting(descriptor));
        if self.connect_on_activate.load(Ordering::SeqCst) {
            self.emit(TunnelState::Connected(descriptor));
        }
        Ok(())
    }

    async fn deactivate(&self) {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        let current = self.status();
        let descriptor = match current {
            TunnelState::Connecting(d) | TunnelState::Connected(d) | TunnelState::Disconnecting(d) => Some(d),
            _ => None,
        };
        // уже отключённый туннель не присылает событий
        let Some(d) = descriptor else {
            return;
        };
        self.emit(TunnelState::Disconnecting(d));
        if !self.stuck_on_deactivate.load(Ordering::SeqCst) {
            self.emit(TunnelState::Disconnected);
        }
    }

    fn status(&self) -> TunnelState {
        self.state.lock().unwrap().clone()
    }

    async fn set_on_demand(&self, enabled: bool) {
        self.on_demand.store(enabled, Ordering::SeqCst);
    }

    fn is_on_demand_enabled(&self) -> bool {
        self.on_demand.load(Ordering::SeqCst)
    }

    fn connected_since(&self) -> Option<DateTime<Utc>> {
        *self.connected_since.lock().unwrap()
    }

    async fn remove_configurations(&self) -> Result<(), TunnelError> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        if self.fail_removal.load(Ordering::SeqCst) {
            return Err(TunnelError::RemovalFailed("mock".into()));
        }
        self.stuck_on_deactivate.store(false, Ordering::SeqCst);
        *self.state.lock().unwrap() = TunnelState::Disconnected;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TunnelState> {
        self.events.subscribe()
    }
}

/// API аккаунта с заранее заданными ответами
pub(crate) struct MockAccountApi {
    credentials: Mutex<Result<VpnCredentials, ApiError>>,
    sessions: Mutex<Result<Vec<VpnSession>, ApiError>>,
    catalog: Mutex<Result<Vec<ServerModel>, ApiError>>,
    loads: Mutex<Result<Vec<ContinuousServerProperties>, ApiError>>,
    location: Mutex<Result<IpAddr, ApiError>>,
    session_fetches: AtomicUsize,
    catalog_fetches: AtomicUsize,
}

impl MockAccountApi {
    pub(crate) fn new(credentials: VpnCredentials) -> Self {
        Self {
            credentials: Mutex::new(Ok(credentials)),
            sessions: Mutex::new(Ok(Vec::new())),
            catalog: Mutex::new(Ok(Vec::new())),
            loads: Mutex::new(Ok(Vec::new())),
            location: Mutex::new(Err(ApiError::Timeout)),
            session_fetches: AtomicUsize::new(0),
            catalog_fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_credentials(&self, result: Result<VpnCredentials, ApiError>) {
        *self.credentials.lock().unwrap() = result;
    }

    pub(crate) fn set_sessions(&self, result: Result<Vec<VpnSession>, ApiError>) {
        *self.sessions.lock().unwrap() = result;
    }

    pub(crate) fn set_catalog(&self, result: Result<Vec<ServerModel>, ApiError>) {
        *self.catalog.lock().unwrap() = result;
    }

    pub(crate) fn set_loads(&self, result: Result<Vec<ContinuousServerProperties>, ApiError>) {
        *self.loads.lock().unwrap() = result;
    }

    pub(crate) fn set_location(&self, result: Result<IpAddr, ApiError>) {
        *self.location.lock().unwrap() = result;
    }

    pub(crate) fn session_fetches(&self) -> usize {
        self.session_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn catalog_fetches(&self) -> usize {
        self.catalog_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountApi for MockAccountApi {
    async fn fetch_credentials(&self) -> Result<VpnCredentials, ApiError> {
        self.credentials.lock().unwrap().clone()
    }

    async fn fetch_active_sessions(&self) -> Result<Vec<VpnSession>, ApiError> {
        self.session_fetches.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().clone()
    }

    async fn fetch_server_catalog(&self, _ip: Option<IpAddr>) -> Result<Vec<ServerModel>, ApiError> {
        self.catalog_fetches.fetch_add(1, Ordering::SeqCst);
        self.catalog.lock().unwrap().clone()
    }

    async fn fetch_server_loads(&self) -> Result<Vec<ContinuousServerProperties>, ApiError> {
        self.loads.lock().unwrap().clone()
    }

    async fn fetch_location(&self) -> Result<IpAddr, ApiError> {
        self.location.lock().unwrap().clone()
    }
}

/// Хранилище секретов в памяти; `None` означает недоступные данные
pub(crate) struct MockSecretStore {
    credentials: Mutex<Option<VpnCredentials>>,
    stored: Mutex<Vec<VpnCredentials>>,
}

impl MockSecretStore {
    pub(crate) fn new(credentials: Option<VpnCredentials>) -> Self {
        Self {
            credentials: Mutex::new(credentials),
            stored: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set(&self, credentials: Option<VpnCredentials>) {
        *self.credentials.lock().unwrap() = credentials;
    }

    pub(crate) fn stored(&self) -> Vec<VpnCredentials> {
        self.stored.lock().unwrap().clone()
    }
}

impl SecretStore for MockSecretStore {
    fn fetch(&self) -> Result<VpnCredentials, KeychainError> {
        self.credentials.lock().unwrap().clone().ok_or(KeychainError::NotFound)
    }

    fn store(&self, credentials: &VpnCredentials) -> Result<(), KeychainError> {
        *self.credentials.lock().unwrap() = Some(credentials.clone());
        self.stored.lock().unwrap().push(credentials.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingAlerts {
    alerts: Mutex<Vec<AlertKind>>,
}

impl RecordingAlerts {
    pub(crate) fn alerts(&self) -> Vec<AlertKind> {
        self.alerts.lock().unwrap().clone()
    }

    pub(crate) fn contains(&self, alert: &AlertKind) -> bool {
        self.alerts.lock().unwrap().contains(alert)
    }
}

impl AlertSink for RecordingAlerts {
    fn present(&self, alert: AlertKind) {
        self.alerts.lock().unwrap().push(alert);
    }
}

/// Выбор протокола без сети
pub(crate) struct FixedSmartProtocol {
    protocol: VpnProtocol,
    ports: Vec<u16>,
}

impl FixedSmartProtocol {
    pub(crate) const FIXED_PORTS: [u16; 2] = [443, 8443];

    pub(crate) fn new(protocol: VpnProtocol, ports: Vec<u16>) -> Self {
        Self { protocol, ports }
    }
}

#[async_trait]
impl SmartProtocol for FixedSmartProtocol {
    async fn determine_best_protocol(&self, _ip: IpAddr) -> (VpnProtocol, Vec<u16>) {
        (self.protocol, self.ports.clone())
    }

    async fn select_ports(&self, _protocol: VpnProtocol, _ip: IpAddr) -> Vec<u16> {
        Self::FIXED_PORTS.to_vec()
    }
}
