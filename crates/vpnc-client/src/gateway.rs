//! Фасад подключения
//!
//! [`VpnGateway`] превращает намерения пользователя (быстрое подключение,
//! страна, сервер, профиль, повтор) в [`ConnectionRequest`] и ведёт
//! попытку через селектор, подготовитель и машину состояний.

use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vpnc_core::{
    AccountApi, AlertKind, AlertSink, ApiError, ConnectionProtocol, ConnectionRequest, ConnectionRequestType,
    ConnectionStatus, CountryConnectionRequestType, FailureCause, NetShieldType, Profile, RequestError,
    SecretStore, ServerCatalog, ServerModel, ServerOffering, ServerType, TunnelManager, TunnelState,
};
use vpnc_probe::smart::FALLBACK_PROTOCOL;
use vpnc_probe::SmartProtocol;

use crate::config::ClientConfig;
use crate::preparer::{PreparationOutcome, VpnConnectionPreparer};
use crate::properties::PropertiesManager;
use crate::selector::{SelectionContext, SelectionOutcome, ServerSelector};
use crate::state_manager::{AppStateManager, StateManagerConfig, StateManagerDeps};
use crate::tier_checker::ServerTierChecker;

/// Tier бесплатного аккаунта
const FREE_TIER: i32 = 0;

/// Внешние зависимости фасада
#[derive(Clone)]
pub struct GatewayDeps {
    /// Системный туннель
    pub tunnel: Arc<dyn TunnelManager>,
    /// API аккаунта
    pub api: Arc<dyn AccountApi>,
    /// Хранилище учётных данных
    pub secrets: Arc<dyn SecretStore>,
    /// Уведомления пользователю
    pub alerts: Arc<dyn AlertSink>,
    /// Сохраняемые настройки
    pub properties: Arc<PropertiesManager>,
    /// Каталог серверов
    pub catalog: Arc<RwLock<ServerCatalog>>,
    /// Выбор протокола
    pub smart_protocol: Arc<dyn SmartProtocol>,
}

/// Параметры фасада
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Параметры машины состояний
    pub state: StateManagerConfig,
    /// Пауза между отключением и подключением при смене протокола
    pub protocol_change_delay: Duration,
    /// Разрешён автоматический выбор протокола
    pub smart_protocol_enabled: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            state: StateManagerConfig::default(),
            protocol_change_delay: Duration::from_secs(2),
            smart_protocol_enabled: true,
        }
    }
}

impl From<&ClientConfig> for GatewaySettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            state: StateManagerConfig::from(config),
            protocol_change_delay: config.protocol_change_delay(),
            smart_protocol_enabled: config.smart_protocol.enabled,
        }
    }
}

struct GatewayInner {
    state_manager: AppStateManager,
    preparer: VpnConnectionPreparer,
    tier_checker: ServerTierChecker,
    deps: GatewayDeps,
    settings: GatewaySettings,
    preparation: Mutex<Option<CancellationToken>>,
    server_type_events: broadcast::Sender<ServerType>,
}

/// Фасад подключения
#[derive(Clone)]
pub struct VpnGateway {
    inner: Arc<GatewayInner>,
}

impl VpnGateway {
    /// Создать фасад и запустить машину состояний
    pub fn new(deps: GatewayDeps, settings: GatewaySettings) -> Self {
        let tier_checker = ServerTierChecker::new(deps.alerts.clone());
        let preparer = VpnConnectionPreparer::new(
            deps.api.clone(),
            deps.secrets.clone(),
            deps.smart_protocol.clone(),
            tier_checker.clone(),
        );
        let state_manager = AppStateManager::spawn(
            StateManagerDeps {
                tunnel: deps.tunnel.clone(),
                api: deps.api.clone(),
                secrets: deps.secrets.clone(),
                alerts: deps.alerts.clone(),
                properties: deps.properties.clone(),
                catalog: deps.catalog.clone(),
            },
            settings.state.clone(),
        );
        let (server_type_events, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(GatewayInner {
                state_manager,
                preparer,
                tier_checker,
                deps,
                settings,
                preparation: Mutex::new(None),
                server_type_events,
            }),
        }
    }

    /// Машина состояний
    pub fn state_manager(&self) -> &AppStateManager {
        &self.inner.state_manager
    }

    /// Отображаемое состояние подключения
    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::for_app_state(&self.inner.state_manager.state())
    }

    /// Tier аккаунта; бесплатный, если учётные данные недоступны
    pub fn user_tier(&self) -> i32 {
        match self.inner.deps.secrets.fetch() {
            Ok(credentials) => credentials.max_tier,
            Err(e) => {
                debug!("Tier недоступен, считаем бесплатным: {}", e);
                FREE_TIER
            }
        }
    }

    /// Тип сервера по переключателю Secure Core
    pub async fn active_server_type(&self) -> ServerType {
        self.inner.deps.properties.snapshot().await.active_server_type()
    }

    /// Переключить активный тип сервера
    pub async fn change_active_server_type(&self, server_type: ServerType) {
        if self.active_server_type().await == server_type {
            return;
        }

        let secure_core = server_type == ServerType::SecureCore;
        self.inner
            .deps
            .properties
            .update(|p| p.secure_core_toggle = secure_core)
            .await;
        let _ = self.inner.server_type_events.send(server_type);
        debug!("Активный тип сервера: {:?}", server_type);
    }

    /// Подписаться на смену активного типа сервера
    pub fn subscribe_server_type(&self) -> broadcast::Receiver<ServerType> {
        self.inner.server_type_events.subscribe()
    }

    /// Автоподключение при запуске
    pub async fn auto_connect(&self) {
        if self.inner.deps.tunnel.is_on_demand_enabled() {
            debug!("Системное переподключение включено, автоподключение пропущено");
            return;
        }

        let properties = self.inner.deps.properties.snapshot().await;
        let profile = properties
            .auto_connect_profile
            .as_deref()
            .and_then(|id| properties.profile(id))
            .cloned();

        match profile {
            Some(profile) => self.connect_to_profile(&profile).await,
            None => self.quick_connect().await,
        }
    }

    /// Быстрое подключение
    pub async fn quick_connect(&self) {
        let request = self.quick_connect_request().await;
        self.connect(request).await;
    }

    /// Запрос быстрого подключения
    pub async fn quick_connect_request(&self) -> ConnectionRequest {
        let properties = self.inner.deps.properties.snapshot().await;
        let profile = properties
            .quick_connect_profile
            .as_deref()
            .and_then(|id| properties.profile(id));

        match profile {
            Some(profile) => profile.connection_request(properties.net_shield_type),
            None => ConnectionRequest::new(
                properties.active_server_type(),
                ConnectionRequestType::Fastest,
                self.global_connection_protocol(properties.connection_protocol),
                properties.net_shield_type,
            ),
        }
    }

    /// Подключиться к самому быстрому серверу страны
    pub async fn connect_to_country(&self, country_code: &str, server_type: ServerType) -> Result<(), RequestError> {
        let connection_type = ConnectionRequestType::country(country_code, CountryConnectionRequestType::Fastest)?;
        let properties = self.inner.deps.properties.snapshot().await;
        let request = ConnectionRequest::new(
            server_type,
            connection_type,
            self.global_connection_protocol(properties.connection_protocol),
            properties.net_shield_type,
        );
        self.connect(request).await;
        Ok(())
    }

    /// Подключиться к конкретному серверу
    pub async fn connect_to_server(&self, server: &ServerModel) -> Result<(), RequestError> {
        if self.inner.tier_checker.server_requires_upgrade(server, self.user_tier()) {
            return Ok(());
        }

        let connection_type = ConnectionRequestType::country(
            server.country_code(),
            CountryConnectionRequestType::Server(server.clone()),
        )?;
        let properties = self.inner.deps.properties.snapshot().await;
        let request = ConnectionRequest::new(
            properties.active_server_type(),
            connection_type,
            self.global_connection_protocol(properties.connection_protocol),
            properties.net_shield_type,
        );
        self.connect(request).await;
        Ok(())
    }

    /// Подключиться по профилю
    pub async fn connect_to_profile(&self, profile: &Profile) {
        if let ServerOffering::Custom(server) = &profile.offering {
            if self.inner.tier_checker.server_requires_upgrade(server, self.user_tier()) {
                return;
            }
        }

        let net_shield_type = self.inner.deps.properties.snapshot().await.net_shield_type;
        self.connect(profile.connection_request(net_shield_type)).await;
    }

    /// Повторить последний запрос
    pub async fn retry_connection(&self) {
        match self.last_connection_request().await {
            Some(request) => self.connect(request).await,
            None => self.quick_connect().await,
        }
    }

    /// Переподключиться с другим уровнем NetShield
    pub async fn reconnect_with_net_shield(&self, net_shield_type: NetShieldType) {
        match self.last_connection_request().await {
            Some(request) => self.connect(request.with_changed_net_shield(net_shield_type)).await,
            None => warn!("Нет запроса для переподключения"),
        }
    }

    /// Переподключиться другим протоколом
    pub async fn reconnect_with_protocol(&self, connection_protocol: ConnectionProtocol) {
        self.disconnect().await;
        tokio::time::sleep(self.inner.settings.protocol_change_delay).await;

        match self.last_connection_request().await {
            Some(request) => self.connect(request.with_changed_protocol(connection_protocol)).await,
            None => warn!("Нет запроса для переподключения"),
        }
    }

    /// Последний запрос подключения
    pub async fn last_connection_request(&self) -> Option<ConnectionRequest> {
        self.inner.deps.properties.snapshot().await.last_connection_request
    }

    /// Начать попытку подключения по запросу
    pub async fn connect(&self, request: ConnectionRequest) {
        if let Some(previous) = self.inner.preparation.lock().await.take() {
            previous.cancel();
        }

        let saved = request.clone();
        self.inner
            .deps
            .properties
            .update(|p| p.last_connection_request = Some(saved))
            .await;

        let catalog = self.inner.deps.catalog.read().await.clone();
        let context = self.selection_context().await;
        match ServerSelector::new(context).select(&request, &catalog, &[]) {
            SelectionOutcome::Selected { server, server_type } => {
                debug!("Предварительно выбран сервер {}", server.name);
                self.change_active_server_type(server_type).await;
            }
            SelectionOutcome::Unavailable {
                reason,
                server_type,
                for_specific_country,
            } => {
                self.inner
                    .tier_checker
                    .notify_resolution_unavailable(for_specific_country, server_type, reason);
                return;
            }
            SelectionOutcome::NoCandidates => {
                warn!("Подходящих серверов нет, подключение не начато");
                return;
            }
        }

        let Some(attempt) = self.inner.state_manager.prepare_to_connect().await else {
            return;
        };

        let token = CancellationToken::new();
        *self.inner.preparation.lock().await = Some(token.clone());

        let gateway = self.clone();
        tokio::spawn(async move {
            gateway.prepare_and_connect(attempt, request, catalog, token).await;
        });
    }

    async fn prepare_and_connect(
        &self,
        attempt: u64,
        request: ConnectionRequest,
        catalog: ServerCatalog,
        token: CancellationToken,
    ) {
        let context = self.selection_context().await;
        let outcome = self.inner.preparer.prepare(&request, &catalog, context, &token).await;
        if token.is_cancelled() {
            debug!("Подготовка попытки {} отменена", attempt);
            return;
        }

        match outcome {
            Ok(PreparationOutcome::Ready(prepared)) => {
                self.change_active_server_type(prepared.server_type).await;
                self.inner
                    .state_manager
                    .connect(attempt, prepared.configuration, prepared.sessions);
            }
            Ok(PreparationOutcome::Unavailable(reason)) => {
                debug!("Подготовка не удалась: {}", reason);
                self.inner.state_manager.abort_connection_attempt(false).await;
            }
            Ok(PreparationOutcome::NoServer) => {
                warn!("Сервер не найден во время подготовки");
                self.inner.state_manager.abort_connection_attempt(false).await;
            }
            Ok(PreparationOutcome::Cancelled) => {
                debug!("Подготовка попытки {} отменена", attempt);
            }
            Err(e) => {
                error!("Не удалось подготовить подключение: {}", e);
                self.inner.deps.alerts.present(AlertKind::CannotAccessVpnCredentials);
                self.inner
                    .state_manager
                    .connection_failed(FailureCause::CredentialsUnavailable);
            }
        }
    }

    /// Прервать текущую попытку
    pub async fn stop_connecting(&self, user_initiated: bool) {
        info!("Подключение остановлено (пользователем: {})", user_initiated);
        if let Some(token) = self.inner.preparation.lock().await.take() {
            token.cancel();
        }
        self.inner.state_manager.abort_connection_attempt(user_initiated).await;
    }

    /// Отключиться и обновить каталог, если сменился публичный адрес
    pub async fn disconnect(&self) {
        self.inner.state_manager.disconnect().await;

        if let Err(e) = self.refresh_server_info_if_ip_changed().await {
            debug!("Каталог не обновлён после отключения: {}", e);
        }
    }

    /// Обновить каталог, если публичный адрес изменился
    ///
    /// Возвращает `true`, если каталог был перезагружен.
    pub async fn refresh_server_info_if_ip_changed(&self) -> Result<bool, ApiError> {
        let last_ip = self.inner.deps.properties.snapshot().await.last_user_ip;
        let ip = self.inner.deps.api.fetch_location().await?;
        if last_ip == Some(ip) {
            return Ok(false);
        }

        let servers = self.inner.deps.api.fetch_server_catalog(Some(ip)).await?;
        let count = servers.len();
        self.inner.deps.catalog.write().await.replace(servers, Utc::now());
        self.inner.deps.properties.update(|p| p.last_user_ip = Some(ip)).await;

        info!("✓ Каталог обновлён: {} серверов", count);
        Ok(true)
    }

    /// Обновить нагрузку серверов
    pub async fn refresh_server_loads(&self) -> Result<usize, ApiError> {
        let loads = self.inner.deps.api.fetch_server_loads().await?;
        self.inner.deps.catalog.write().await.apply_loads(&loads, Utc::now());
        debug!("Обновлена нагрузка {} серверов", loads.len());
        Ok(loads.len())
    }

    fn global_connection_protocol(&self, configured: ConnectionProtocol) -> ConnectionProtocol {
        match configured {
            ConnectionProtocol::SmartProtocol if !self.inner.settings.smart_protocol_enabled => {
                ConnectionProtocol::VpnProtocol(FALLBACK_PROTOCOL)
            }
            other => other,
        }
    }

    fn connected_ip(&self) -> Option<IpAddr> {
        match self.inner.deps.tunnel.status() {
            TunnelState::Connected(descriptor) => Some(descriptor.server_ip),
            _ => None,
        }
    }

    async fn selection_context(&self) -> SelectionContext {
        SelectionContext {
            user_tier: self.user_tier(),
            default_server_type: self.active_server_type().await,
            app_state: self.inner.state_manager.state(),
            connected_ip: self.connected_ip(),
        }
    }
}
