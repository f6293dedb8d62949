//! Машина состояний подключения
//!
//! Состояние [`AppState`] принадлежит одной задаче tokio. Все изменения
//! (команды приложения, события туннеля, тайм-аут попытки, результаты
//! фоновых запросов) применяются в её цикле по очереди. Снаружи доступен
//! только [`AppStateManager`]: он отправляет команды и читает состояние
//! через `watch`.
//!
//! Устаревшие результаты отбрасываются по номеру попытки: каждый
//! `prepare_to_connect`, отмена и тайм-аут увеличивают его.

use chrono::{DateTime, Utc};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use vpnc_core::{
    AccountApi, AlertKind, AlertSink, AppState, ConnectionConfiguration, ConnectionDescriptor, FailureCause,
    SecretStore, ServerCatalog, TunnelManager, TunnelState, VpnCredentials, VpnSession,
};

use crate::config::ClientConfig;
use crate::properties::PropertiesManager;

/// Номер попытки подключения
pub type AttemptId = u64;

/// Тайм-аут попытки подключения по умолчанию
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Внешние зависимости машины состояний
#[derive(Clone)]
pub struct StateManagerDeps {
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
}

/// Параметры машины состояний
#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    /// Тайм-аут попытки подключения
    pub connection_timeout: Duration,
    /// Возраст каталога, после которого пишется предупреждение
    pub stale_catalog_age: chrono::Duration,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            stale_catalog_age: chrono::Duration::hours(2),
        }
    }
}

impl From<&ClientConfig> for StateManagerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connection_timeout: config.connection_timeout(),
            stale_catalog_age: config.stale_catalog_age(),
        }
    }
}

/// Снимок внутренних флагов, для диагностики
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    /// Состояние приложения
    pub state: AppState,
    /// Идёт попытка подключения
    pub attempting: bool,
    /// Тайм-аут попытки взведён
    pub timeout_armed: bool,
    /// Номер текущей попытки
    pub attempt: AttemptId,
    /// Туннель последней попытки
    pub last_attempted: Option<ConnectionDescriptor>,
}

/// Команды для машины состояний
enum StateCommand {
    PrepareToConnect {
        reply: oneshot::Sender<Option<AttemptId>>,
    },
    Connect {
        attempt: AttemptId,
        configuration: Box<ConnectionConfiguration>,
        sessions: Vec<VpnSession>,
    },
    Abort {
        user_initiated: bool,
        reply: oneshot::Sender<()>,
    },
    ConnectionFailed {
        cause: FailureCause,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    ConnectedDate {
        reply: oneshot::Sender<Option<DateTime<Utc>>>,
    },
    ActiveConnection {
        reply: oneshot::Sender<Option<ConnectionConfiguration>>,
    },
    Snapshot {
        reply: oneshot::Sender<StateSnapshot>,
    },
}

/// Результаты фоновых задач
enum WorkerEvent {
    RecoveryFetched {
        attempt: AttemptId,
        previous: VpnCredentials,
        session_count: Option<usize>,
        fresh: Option<VpnCredentials>,
    },
}

/// Handle для взаимодействия с машиной состояний
#[derive(Clone)]
pub struct AppStateManager {
    tx: mpsc::UnboundedSender<StateCommand>,
    state: watch::Receiver<AppState>,
    events: broadcast::Sender<AppState>,
}

impl AppStateManager {
    /// Запустить машину состояний в текущем runtime
    pub fn spawn(deps: StateManagerDeps, config: StateManagerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(AppState::Disconnected);
        let (events, _) = broadcast::channel(64);

        let machine = StateMachine {
            deps,
            config,
            rx,
            workers: JoinSet::new(),
            state_tx,
            events: events.clone(),
            state: AppState::Disconnected,
            tunnel_state: TunnelState::Invalid,
            attempting: false,
            stuck_disconnecting: false,
            reconnecting_after_stuck: false,
            attempt: 0,
            deadline: None,
            last_attempted: None,
            activated: None,
            sessions: Vec::new(),
        };
        tokio::spawn(machine.run());

        Self { tx, state, events }
    }

    /// Текущее состояние
    pub fn state(&self) -> AppState {
        self.state.borrow().clone()
    }

    /// Наблюдать за последним состоянием
    pub fn watch(&self) -> watch::Receiver<AppState> {
        self.state.clone()
    }

    /// Подписаться на все уведомления о смене состояния
    pub fn subscribe(&self) -> broadcast::Receiver<AppState> {
        self.events.subscribe()
    }

    /// Начать попытку подключения
    ///
    /// Возвращает номер попытки, или `None`, если попытка не начата.
    pub async fn prepare_to_connect(&self) -> Option<AttemptId> {
        self.request(|reply| StateCommand::PrepareToConnect { reply }).await.flatten()
    }

    /// Поднять туннель с подготовленной конфигурацией
    ///
    /// Команда игнорируется, если попытка уже устарела.
    pub fn connect(&self, attempt: AttemptId, configuration: ConnectionConfiguration, sessions: Vec<VpnSession>) {
        self.send(StateCommand::Connect {
            attempt,
            configuration: Box::new(configuration),
            sessions,
        });
    }

    /// Отменить попытку по запросу пользователя
    pub async fn cancel_connection_attempt(&self) {
        self.abort_connection_attempt(true).await;
    }

    /// Прервать попытку и разорвать туннель
    pub async fn abort_connection_attempt(&self, user_initiated: bool) {
        self.request(|reply| StateCommand::Abort { user_initiated, reply }).await;
    }

    /// Завершить попытку ошибкой
    pub fn connection_failed(&self, cause: FailureCause) {
        self.send(StateCommand::ConnectionFailed { cause });
    }

    /// Разорвать туннель
    pub async fn disconnect(&self) {
        self.request(|reply| StateCommand::Disconnect { reply }).await;
    }

    /// Время установки текущего подключения
    pub async fn connected_date(&self) -> Option<DateTime<Utc>> {
        self.request(|reply| StateCommand::ConnectedDate { reply }).await.flatten()
    }

    /// Конфигурация, с которой поднят текущий туннель
    pub async fn active_connection(&self) -> Option<ConnectionConfiguration> {
        self.request(|reply| StateCommand::ActiveConnection { reply }).await.flatten()
    }

    /// Снимок внутренних флагов
    pub async fn snapshot(&self) -> Option<StateSnapshot> {
        self.request(|reply| StateCommand::Snapshot { reply }).await
    }

    fn send(&self, command: StateCommand) {
        if self.tx.send(command).is_err() {
            warn!("Машина состояний остановлена, команда отброшена");
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> StateCommand) -> Option<T> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply));
        response.await.ok()
    }
}

struct StateMachine {
    deps: StateManagerDeps,
    config: StateManagerConfig,
    rx: mpsc::UnboundedReceiver<StateCommand>,
    workers: JoinSet<WorkerEvent>,
    state_tx: watch::Sender<AppState>,
    events: broadcast::Sender<AppState>,

    state: AppState,
    tunnel_state: TunnelState,
    attempting: bool,
    stuck_disconnecting: bool,
    reconnecting_after_stuck: bool,
    attempt: AttemptId,
    deadline: Option<Instant>,
    last_attempted: Option<ConnectionConfiguration>,
    activated: Option<ConnectionConfiguration>,
    sessions: Vec<VpnSession>,
}

impl StateMachine {
    async fn run(mut self) {
        let mut tunnel_events = self.deps.tunnel.subscribe();
        let mut tunnel_open = true;

        if let Err(e) = self.deps.tunnel.load_configuration().await {
            warn!("Не удалось загрузить конфигурацию туннеля: {}", e);
        }
        let initial = self.deps.tunnel.status();
        self.vpn_state_changed(initial).await;

        loop {
            let deadline = self.deadline;
            let timeout = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => match joined {
                    Ok(event) => self.handle_worker_event(event).await,
                    Err(e) => error!("Фоновая задача завершилась с ошибкой: {}", e),
                },

                event = tunnel_events.recv(), if tunnel_open => match event {
                    Ok(state) => self.vpn_state_changed(state).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Пропущено {} событий туннеля, перечитываем состояние", skipped);
                        let state = self.deps.tunnel.status();
                        self.vpn_state_changed(state).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Поток событий туннеля закрыт");
                        tunnel_open = false;
                    }
                },

                _ = timeout => self.timeout().await,
            }
        }

        self.workers.abort_all();
        debug!("Машина состояний остановлена");
    }

    async fn handle_command(&mut self, command: StateCommand) {
        match command {
            StateCommand::PrepareToConnect { reply } => {
                let attempt = self.prepare_to_connect().await;
                let _ = reply.send(attempt);
            }
            StateCommand::Connect {
                attempt,
                configuration,
                sessions,
            } => {
                if attempt != self.attempt {
                    debug!("Попытка {} устарела (текущая {}), конфигурация отброшена", attempt, self.attempt);
                    return;
                }
                self.connect_with(*configuration, sessions).await;
            }
            StateCommand::Abort { user_initiated, reply } => {
                self.abort(user_initiated).await;
                let _ = reply.send(());
            }
            StateCommand::ConnectionFailed { cause } => {
                self.attempting = false;
                self.deadline = None;
                self.attempt += 1;
                self.fail(cause);
            }
            StateCommand::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            StateCommand::ConnectedDate { reply } => {
                let date = self.connected_date().await;
                let _ = reply.send(date);
            }
            StateCommand::ActiveConnection { reply } => {
                let _ = reply.send(self.active_connection());
            }
            StateCommand::Snapshot { reply } => {
                let _ = reply.send(StateSnapshot {
                    state: self.state.clone(),
                    attempting: self.attempting,
                    timeout_armed: self.deadline.is_some(),
                    attempt: self.attempt,
                    last_attempted: self.last_attempted.as_ref().map(|c| c.descriptor()),
                });
            }
        }
    }

    async fn prepare_to_connect(&mut self) -> Option<AttemptId> {
        let has_connected = self.deps.properties.snapshot().await.has_connected;
        if !has_connected {
            if let TunnelState::Disconnecting(_) = self.tunnel_state {
                self.vpn_stuck().await;
                return None;
            }
            self.deps.alerts.present(AlertKind::FirstTimeConnecting);
        }

        if let TunnelState::Disconnecting(_) = self.tunnel_state {
            self.stuck_disconnecting = true;
        }

        self.set_state(AppState::PreparingConnection);
        self.attempting = true;
        self.attempt += 1;
        self.deadline = Some(Instant::now() + self.config.connection_timeout);
        self.notify();

        debug!("Попытка подключения {} начата", self.attempt);
        Some(self.attempt)
    }

    async fn abort(&mut self, user_initiated: bool) {
        info!("Попытка подключения отменена");
        self.set_state(AppState::Aborted { user_initiated });
        self.attempting = false;
        self.deadline = None;
        self.attempt += 1;
        self.notify();
        self.disconnect().await;
    }

    async fn timeout(&mut self) {
        warn!("Тайм-аут попытки подключения");
        self.set_state(AppState::Aborted { user_initiated: false });
        self.attempting = false;
        self.deadline = None;
        self.attempt += 1;
        self.notify();
        self.stop_attempting().await;
    }

    /// Возвращает `true`, если исход попытки уже опубликован
    async fn stop_attempting(&mut self) -> bool {
        debug!("Остановка попытки подключения");
        self.deadline = None;
        let tunnel_state = self.tunnel_state.clone();
        let settled = self.handle_vpn_error(&tunnel_state).await;
        self.disconnect().await;
        settled
    }

    async fn disconnect(&mut self) {
        debug!("Отключение");
        self.deps
            .properties
            .update(|p| p.intentionally_disconnected = true)
            .await;
        self.deps.tunnel.deactivate().await;
    }

    async fn connect_with(&mut self, mut configuration: ConnectionConfiguration, sessions: Vec<VpnSession>) {
        if let AppState::Aborted { .. } = self.state {
            debug!("Попытка прервана, подключение не начато");
            return;
        }

        let credentials = match self.deps.secrets.fetch() {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Учётные данные недоступны: {}", e);
                self.fail(FailureCause::CredentialsUnavailable);
                self.deps.alerts.present(AlertKind::CannotAccessVpnCredentials);
                return;
            }
        };
        if self.check_delinquency(&credentials) {
            return;
        }

        if sessions.len() >= credentials.max_connect as usize {
            let previous_ip = self.last_attempted.as_ref().map(|c| c.server_ip.entry_ip);
            if let Some(entry_ip) = previous_ip {
                if !sessions.iter().any(|s| s.exit_ip == entry_ip) {
                    warn!("Лимит сессий исчерпан: {} из {}", sessions.len(), credentials.max_connect);
                    self.deps.alerts.present(AlertKind::MaxSessions {
                        max_connect: credentials.max_connect,
                    });
                    self.fail(FailureCause::SessionLimit);
                    return;
                }
            }
        }

        configuration.credentials = credentials;
        self.last_attempted = Some(configuration.clone());
        self.sessions = sessions;
        self.attempting = true;
        if self.deadline.is_none() {
            // повторные попытки после ошибки тоже ограничены тайм-аутом
            self.deadline = Some(Instant::now() + self.config.connection_timeout);
        }

        let stale = self
            .deps
            .catalog
            .read()
            .await
            .is_stale(Utc::now(), self.config.stale_catalog_age);
        if stale {
            warn!("Подключение с устаревшими оценками серверов");
        }

        info!(
            "Подключение к {} ({})",
            configuration.server.name,
            configuration.descriptor()
        );

        if self.deps.tunnel.status().is_active() {
            debug!("Разрыв текущего туннеля перед подключением");
            self.disconnect().await;
        }

        match self.deps.tunnel.activate(&configuration).await {
            Ok(()) => {
                let server_id = configuration.server.id.clone();
                let exit_ip = configuration.server_ip.exit_ip;
                self.deps
                    .properties
                    .update(|p| {
                        p.last_server_id = Some(server_id);
                        p.last_server_ip = Some(exit_ip);
                    })
                    .await;
                self.activated = Some(configuration);
            }
            Err(e) => {
                error!("Не удалось активировать туннель: {}", e);
                self.attempting = false;
                self.deadline = None;
                self.fail(FailureCause::ConnectionFailed);
            }
        }
    }

    async fn vpn_state_changed(&mut self, new_state: TunnelState) {
        if let TunnelState::Error(_) = new_state {
            if self.tunnel_state == TunnelState::Invalid {
                // первая ошибка после запуска не означает неудачную попытку
                self.tunnel_state = new_state;
                return;
            } else if self.attempting && self.stop_attempting().await {
                self.tunnel_state = new_state;
                return;
            }
        }

        self.tunnel_state = new_state.clone();
        self.handle_vpn_state_change(new_state).await;
    }

    async fn handle_vpn_state_change(&mut self, tunnel_state: TunnelState) {
        if !matches!(tunnel_state, TunnelState::Disconnecting(_)) {
            self.stuck_disconnecting = false;
            self.reconnecting_after_stuck = false;
        }

        match tunnel_state {
            TunnelState::Invalid | TunnelState::Reasserting => return,
            TunnelState::Disconnected => {
                if self.attempting {
                    self.set_state(AppState::PreparingConnection);
                    return;
                }
                self.set_state(AppState::Disconnected);
            }
            TunnelState::Connecting(descriptor) => {
                self.set_state(AppState::Connecting(descriptor));
            }
            TunnelState::Connected(descriptor) => {
                self.attempting = false;
                self.deadline = None;
                self.set_state(AppState::Connected(descriptor));
                self.deps
                    .properties
                    .update(|p| {
                        p.intentionally_disconnected = false;
                        p.has_connected = true;
                    })
                    .await;
                info!("✓ Подключено: {}", descriptor);
            }
            TunnelState::Disconnecting(descriptor) => {
                if self.attempting {
                    if let AppState::Connecting(_) = self.state {
                        self.stop_attempting().await;
                    } else {
                        self.set_state(AppState::PreparingConnection);
                    }
                } else {
                    self.set_state(AppState::Disconnecting(descriptor));
                }
            }
            TunnelState::Error(reason) => {
                self.set_state(AppState::Error(FailureCause::Tunnel(reason)));
            }
        }

        self.notify();
    }

    /// Возвращает `true`, если попытка завершена здесь же
    async fn handle_vpn_error(&mut self, tunnel_state: &TunnelState) -> bool {
        if let TunnelState::Disconnecting(_) = tunnel_state {
            if self.stuck_disconnecting {
                warn!("Туннель не может завершить отключение");
                self.vpn_stuck().await;
                return true;
            }
        }

        self.attempting = false;

        let credentials = match self.deps.secrets.fetch() {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Учётные данные недоступны: {}", e);
                self.fail(FailureCause::CredentialsUnavailable);
                self.deps.alerts.present(AlertKind::CannotAccessVpnCredentials);
                return true;
            }
        };
        if self.check_delinquency(&credentials) {
            return true;
        }

        let api = self.deps.api.clone();
        let attempt = self.attempt;
        self.workers.spawn(async move {
            let (sessions, fresh) = tokio::join!(api.fetch_active_sessions(), api.fetch_credentials());
            if let Err(e) = &sessions {
                debug!("Сессии для восстановления недоступны: {}", e);
            }
            if let Err(e) = &fresh {
                debug!("Свежие учётные данные недоступны: {}", e);
            }
            WorkerEvent::RecoveryFetched {
                attempt,
                previous: credentials,
                session_count: sessions.ok().map(|s| s.len()),
                fresh: fresh.ok(),
            }
        });
        false
    }

    async fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::RecoveryFetched {
                attempt,
                previous,
                session_count,
                fresh,
            } => {
                if attempt != self.attempt {
                    debug!("Результат восстановления попытки {} устарел", attempt);
                    return;
                }
                if !self.state.is_disconnected() {
                    return;
                }

                let max_connect = fresh.as_ref().map_or(previous.max_connect, |c| c.max_connect);
                if session_count.is_some_and(|count| count >= max_connect as usize) {
                    warn!("Лимит сессий исчерпан ({})", max_connect);
                    self.deps.alerts.present(AlertKind::MaxSessions { max_connect });
                    self.fail(FailureCause::SessionLimit);
                    return;
                }

                let Some(fresh) = fresh.filter(|c| c.password != previous.password) else {
                    return;
                };

                info!("Учётные данные обновлены");
                if let Err(e) = self.deps.secrets.store(&fresh) {
                    warn!("Не удалось сохранить учётные данные: {}", e);
                }

                let Some(last) = self.last_attempted.clone() else {
                    return;
                };
                if self.state.is_disconnected() && !self.deps.tunnel.is_on_demand_enabled() {
                    info!("Повторное подключение после ошибки");
                    let sessions = self.sessions.clone();
                    self.connect_with(last, sessions).await;
                }
            }
        }
    }

    async fn vpn_stuck(&mut self) {
        let removed = self.deps.tunnel.remove_configurations().await;
        if let Err(e) = &removed {
            error!("Не удалось удалить конфигурацию туннеля: {}", e);
        }

        let retry = match (&removed, self.reconnecting_after_stuck, self.last_attempted.clone()) {
            (Ok(()), false, Some(last)) => Some(last),
            _ => None,
        };

        match retry {
            Some(last) => {
                info!("Конфигурация туннеля пересоздана, повторное подключение");
                self.reconnecting_after_stuck = true;
                let sessions = self.sessions.clone();
                self.connect_with(last, sessions).await;
            }
            None => {
                self.deps.alerts.present(AlertKind::VpnStuck);
                self.fail(FailureCause::Stuck);
            }
        }
    }

    fn check_delinquency(&mut self, credentials: &VpnCredentials) -> bool {
        if !credentials.is_delinquent() {
            return false;
        }

        warn!("Аккаунт заблокирован из-за неоплаты");
        self.deps.alerts.present(AlertKind::Delinquent);
        self.fail(FailureCause::Delinquent);
        true
    }

    async fn connected_date(&mut self) -> Option<DateTime<Utc>> {
        if !self.state.is_connected() {
            return None;
        }

        let saved = self.deps.properties.snapshot().await.last_connected_at;
        match self.deps.tunnel.connected_since() {
            Some(since) if saved.map_or(true, |saved| since > saved) => {
                self.deps
                    .properties
                    .update(|p| p.last_connected_at = Some(since))
                    .await;
                Some(since)
            }
            _ => saved,
        }
    }

    fn active_connection(&self) -> Option<ConnectionConfiguration> {
        let protocol = self.state.descriptor()?.protocol;
        self.activated
            .as_ref()
            .filter(|c| c.vpn_protocol == protocol)
            .cloned()
    }

    fn fail(&mut self, cause: FailureCause) {
        warn!("Ошибка подключения: {}", cause);
        self.set_state(AppState::Error(cause));
        self.notify();
    }

    fn set_state(&mut self, state: AppState) {
        self.state = state.clone();
        self.state_tx.send_replace(state);
    }

    fn notify(&self) {
        debug!("Состояние: {}", self.state);
        let _ = self.events.send(self.state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::StoredProperties;
    use crate::testing::{credentials, server, MockAccountApi, MockSecretStore, MockTunnel, RecordingAlerts};
    use std::sync::atomic::Ordering;
    use vpnc_core::{NetShieldType, VpnProtocol};

    struct Fixture {
        tunnel: Arc<MockTunnel>,
        api: Arc<MockAccountApi>,
        secrets: Arc<MockSecretStore>,
        alerts: Arc<RecordingAlerts>,
        properties: Arc<PropertiesManager>,
        manager: AppStateManager,
    }

    fn fixture_with(tunnel: MockTunnel, has_connected: bool) -> Fixture {
        let tunnel = Arc::new(tunnel);
        let api = Arc::new(MockAccountApi::new(credentials(2, 5)));
        let secrets = Arc::new(MockSecretStore::new(Some(credentials(2, 5))));
        let alerts = Arc::new(RecordingAlerts::default());
        let properties = Arc::new(PropertiesManager::new(StoredProperties {
            has_connected,
            ..StoredProperties::default()
        }));
        let catalog = Arc::new(RwLock::new(ServerCatalog::new(Vec::new(), Utc::now())));

        let manager = AppStateManager::spawn(
            StateManagerDeps {
                tunnel: tunnel.clone(),
                api: api.clone(),
                secrets: secrets.clone(),
                alerts: alerts.clone(),
                properties: properties.clone(),
                catalog,
            },
            StateManagerConfig::default(),
        );

        Fixture {
            tunnel,
            api,
            secrets,
            alerts,
            properties,
            manager,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockTunnel::new(TunnelState::Disconnected), true)
    }

    fn configuration() -> ConnectionConfiguration {
        let server = server("a", "CH", 0, 1.0);
        ConnectionConfiguration {
            server_ip: server.ips[0].clone(),
            server,
            vpn_protocol: VpnProtocol::Ike,
            net_shield_type: NetShieldType::Off,
            ports: vec![500],
            credentials: credentials(2, 5),
        }
    }

    /// Дать машине состояний обработать все события
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state_follows_tunnel() {
        let f = fixture();
        settle().await;
        assert_eq!(f.manager.state(), AppState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_attempt() {
        let f = fixture();
        settle().await;

        let attempt = f.manager.prepare_to_connect().await;
        assert!(attempt.is_some());
        assert_eq!(f.manager.state(), AppState::PreparingConnection);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(f.manager.state(), AppState::PreparingConnection);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.manager.state(), AppState::Aborted { user_initiated: false });

        let snapshot = f.manager.snapshot().await.unwrap();
        assert!(!snapshot.attempting);
        assert!(!snapshot.timeout_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_cancels_timeout() {
        let f = fixture();
        settle().await;

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        let descriptor = configuration().descriptor();
        assert_eq!(f.manager.state(), AppState::Connected(descriptor));

        let snapshot = f.manager.snapshot().await.unwrap();
        assert!(!snapshot.attempting);
        assert!(!snapshot.timeout_armed);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.manager.state(), AppState::Connected(descriptor));

        let properties = f.properties.snapshot().await;
        assert!(properties.has_connected);
        assert!(!properties.intentionally_disconnected);
        assert_eq!(properties.last_server_id.as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connecting_state_reported() {
        let f = fixture();
        f.tunnel.connect_on_activate.store(false, Ordering::SeqCst);
        settle().await;

        let mut events = f.manager.subscribe();
        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        assert_eq!(events.recv().await.unwrap(), AppState::PreparingConnection);
        assert_eq!(
            events.recv().await.unwrap(),
            AppState::Connecting(configuration().descriptor())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_cancel() {
        let f = fixture();
        f.tunnel.connect_on_activate.store(false, Ordering::SeqCst);
        settle().await;

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        f.manager.cancel_connection_attempt().await;
        assert_eq!(f.tunnel.deactivations(), 1);
        assert!(f.properties.snapshot().await.intentionally_disconnected);

        // поздняя конфигурация той же попытки игнорируется
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;
        assert_eq!(f.tunnel.activations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_attempt_is_discarded() {
        let f = fixture();
        settle().await;

        let first = f.manager.prepare_to_connect().await.unwrap();
        let second = f.manager.prepare_to_connect().await.unwrap();
        assert_ne!(first, second);

        f.manager.connect(first, configuration(), Vec::new());
        settle().await;
        assert!(f.tunnel.activations().is_empty());

        f.manager.connect(second, configuration(), Vec::new());
        settle().await;
        assert_eq!(f.tunnel.activations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_error_after_start_is_suppressed() {
        let f = fixture_with(MockTunnel::new(TunnelState::Invalid), true);
        settle().await;

        f.tunnel.emit(TunnelState::Error("cold start".into()));
        settle().await;
        assert_eq!(f.manager.state(), AppState::Disconnected);

        f.tunnel.emit(TunnelState::Error("real".into()));
        settle().await;
        assert_eq!(
            f.manager.state(),
            AppState::Error(FailureCause::Tunnel("real".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_time_connecting_alert() {
        let f = fixture_with(MockTunnel::new(TunnelState::Disconnected), false);
        settle().await;

        f.manager.prepare_to_connect().await.unwrap();
        assert!(f.alerts.contains(&AlertKind::FirstTimeConnecting));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_connection_while_disconnecting_is_stuck() {
        let descriptor = configuration().descriptor();
        let f = fixture_with(MockTunnel::new(TunnelState::Disconnecting(descriptor)), false);
        settle().await;

        assert_eq!(f.manager.prepare_to_connect().await, None);
        assert_eq!(f.tunnel.removals(), 1);
        assert!(f.alerts.contains(&AlertKind::VpnStuck));
        assert_eq!(f.manager.state(), AppState::Error(FailureCause::Stuck));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_disconnecting_escalates_on_timeout() {
        let descriptor = configuration().descriptor();
        let f = fixture_with(MockTunnel::new(TunnelState::Disconnecting(descriptor)), true);
        settle().await;

        f.manager.prepare_to_connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(f.tunnel.removals(), 1);
        assert!(f.alerts.contains(&AlertKind::VpnStuck));
        assert_eq!(f.manager.state(), AppState::Error(FailureCause::Stuck));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delinquent_account_is_not_connected() {
        let f = fixture();
        let mut delinquent = credentials(2, 5);
        delinquent.delinquent = 3;
        f.secrets.set(Some(delinquent));
        settle().await;

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        assert!(f.tunnel.activations().is_empty());
        assert!(f.alerts.contains(&AlertKind::Delinquent));
        assert_eq!(f.manager.state(), AppState::Error(FailureCause::Delinquent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_sessions_precheck_uses_previous_attempt() {
        let f = fixture();
        settle().await;

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;
        f.manager.disconnect().await;
        settle().await;

        let other_session = VpnSession {
            session_id: "s".into(),
            exit_ip: "192.0.2.9".parse().unwrap(),
            vpn_protocol: VpnProtocol::Ike,
        };
        let sessions = vec![other_session; 5];

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), sessions);
        settle().await;

        assert_eq!(f.tunnel.activations().len(), 1);
        assert!(f.alerts.contains(&AlertKind::MaxSessions { max_connect: 5 }));
        assert_eq!(f.manager.state(), AppState::Error(FailureCause::SessionLimit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_failure() {
        let f = fixture();
        f.tunnel.fail_activation.store(true, Ordering::SeqCst);
        settle().await;

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        assert_eq!(f.manager.state(), AppState::Error(FailureCause::ConnectionFailed));
        assert!(!f.manager.snapshot().await.unwrap().timeout_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_retries_with_rotated_password() {
        let f = fixture();
        f.tunnel.connect_on_activate.store(false, Ordering::SeqCst);
        let mut rotated = credentials(2, 5);
        rotated.password = "rotated".into();
        f.api.set_credentials(Ok(rotated));
        settle().await;

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        f.tunnel.emit(TunnelState::Error("auth failed".into()));
        settle().await;

        assert_eq!(f.secrets.stored().len(), 1);
        let activations = f.tunnel.activations();
        assert_eq!(activations.len(), 2);
        assert_eq!(activations[1].credentials.password, "rotated");
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_reports_session_limit() {
        let f = fixture();
        f.tunnel.connect_on_activate.store(false, Ordering::SeqCst);
        let session = VpnSession {
            session_id: "s".into(),
            exit_ip: "192.0.2.9".parse().unwrap(),
            vpn_protocol: VpnProtocol::Ike,
        };
        f.api.set_sessions(Ok(vec![session; 5]));
        settle().await;

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        f.tunnel.emit(TunnelState::Error("refused".into()));
        settle().await;

        assert!(f.alerts.contains(&AlertKind::MaxSessions { max_connect: 5 }));
        assert_eq!(f.manager.state(), AppState::Error(FailureCause::SessionLimit));
        assert_eq!(f.tunnel.activations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_retry_is_timed_out() {
        let f = fixture();
        f.tunnel.connect_on_activate.store(false, Ordering::SeqCst);
        let mut rotated = credentials(2, 5);
        rotated.password = "rotated".into();
        f.api.set_credentials(Ok(rotated));
        settle().await;

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        let mut events = f.manager.subscribe();
        f.tunnel.emit(TunnelState::Error("auth failed".into()));
        settle().await;

        assert_eq!(f.tunnel.activations().len(), 2);
        let snapshot = f.manager.snapshot().await.unwrap();
        assert!(snapshot.attempting);
        assert!(snapshot.timeout_armed);

        tokio::time::sleep(Duration::from_secs(31)).await;

        let mut published = Vec::new();
        while let Ok(state) = events.try_recv() {
            published.push(state);
        }
        assert!(published.contains(&AppState::Aborted { user_initiated: false }));
        assert!(!f.manager.snapshot().await.unwrap().attempting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tunnel_error_keeps_delinquent_cause() {
        let f = fixture();
        f.tunnel.connect_on_activate.store(false, Ordering::SeqCst);
        settle().await;

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        let mut delinquent = credentials(2, 5);
        delinquent.delinquent = 3;
        f.secrets.set(Some(delinquent));
        f.tunnel.emit(TunnelState::Error("refused".into()));
        settle().await;

        assert!(f.alerts.contains(&AlertKind::Delinquent));
        assert_eq!(f.manager.state(), AppState::Error(FailureCause::Delinquent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnecting_while_connecting_stops_attempt() {
        let f = fixture();
        f.tunnel.connect_on_activate.store(false, Ordering::SeqCst);
        settle().await;

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        let descriptor = configuration().descriptor();
        assert_eq!(f.manager.state(), AppState::Connecting(descriptor));

        f.tunnel.emit(TunnelState::Disconnecting(descriptor));
        settle().await;

        assert_eq!(f.tunnel.deactivations(), 1);
        assert_eq!(f.tunnel.activations().len(), 1);
        assert_eq!(f.manager.state(), AppState::Disconnected);
        let snapshot = f.manager.snapshot().await.unwrap();
        assert!(!snapshot.attempting);
        assert!(!snapshot.timeout_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reasserting_keeps_state() {
        let f = fixture();
        settle().await;

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        let mut events = f.manager.subscribe();
        f.tunnel.emit(TunnelState::Reasserting);
        settle().await;

        assert_eq!(f.manager.state(), AppState::Connected(configuration().descriptor()));
        assert!(events.try_recv().is_err());
    }

    /// Подключиться, затем застрять в отключении
    async fn stuck_after_connection(f: &Fixture) {
        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        f.tunnel.stuck_on_deactivate.store(true, Ordering::SeqCst);
        f.manager.disconnect().await;
        settle().await;
        assert_eq!(
            f.manager.state(),
            AppState::Disconnecting(configuration().descriptor())
        );

        // следующая попытка считается первой
        f.properties.update(|p| p.has_connected = false).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_tunnel_is_recreated_and_retried() {
        let f = fixture();
        settle().await;
        stuck_after_connection(&f).await;

        assert_eq!(f.manager.prepare_to_connect().await, None);
        settle().await;

        assert_eq!(f.tunnel.removals(), 1);
        assert_eq!(f.tunnel.activations().len(), 2);
        assert!(!f.alerts.contains(&AlertKind::VpnStuck));
        assert_eq!(f.manager.state(), AppState::Connected(configuration().descriptor()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_tunnel_retried_only_once() {
        let f = fixture();
        settle().await;
        stuck_after_connection(&f).await;
        f.tunnel.fail_activation.store(true, Ordering::SeqCst);

        assert_eq!(f.manager.prepare_to_connect().await, None);
        settle().await;
        assert_eq!(f.tunnel.activations().len(), 2);
        assert_eq!(f.manager.state(), AppState::Error(FailureCause::ConnectionFailed));

        assert_eq!(f.manager.prepare_to_connect().await, None);
        settle().await;

        assert_eq!(f.tunnel.removals(), 2);
        assert_eq!(f.tunnel.activations().len(), 2);
        assert!(f.alerts.contains(&AlertKind::VpnStuck));
        assert_eq!(f.manager.state(), AppState::Error(FailureCause::Stuck));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_tunnel_removal_failure() {
        let f = fixture();
        settle().await;
        stuck_after_connection(&f).await;
        f.tunnel.fail_removal.store(true, Ordering::SeqCst);

        assert_eq!(f.manager.prepare_to_connect().await, None);
        settle().await;

        assert_eq!(f.tunnel.removals(), 1);
        assert_eq!(f.tunnel.activations().len(), 1);
        assert!(f.alerts.contains(&AlertKind::VpnStuck));
        assert_eq!(f.manager.state(), AppState::Error(FailureCause::Stuck));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_date_prefers_newer_tunnel_time() {
        let f = fixture();
        settle().await;
        assert_eq!(f.manager.connected_date().await, None);

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        let older = Utc::now() - chrono::Duration::hours(1);
        f.properties.update(|p| p.last_connected_at = Some(older)).await;
        let since = f.tunnel.connected_since().unwrap();

        assert_eq!(f.manager.connected_date().await, Some(since));
        assert_eq!(f.properties.snapshot().await.last_connected_at, Some(since));

        f.tunnel.set_connected_since(Some(older));
        assert_eq!(f.manager.connected_date().await, Some(since));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_connection() {
        let f = fixture();
        settle().await;
        assert!(f.manager.active_connection().await.is_none());

        let attempt = f.manager.prepare_to_connect().await.unwrap();
        f.manager.connect(attempt, configuration(), Vec::new());
        settle().await;

        let active = f.manager.active_connection().await.unwrap();
        assert_eq!(active.server.id, "a");
    }
}
