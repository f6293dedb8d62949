//! Внешние зависимости ядра
//!
//! Ядро не обращается к глобальным объектам: туннель, API аккаунта,
//! хранилище секретов и канал уведомлений передаются компонентам
//! явно, через эти трейты.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use tokio::sync::broadcast;

use crate::alert::AlertKind;
use crate::configuration::ConnectionConfiguration;
use crate::credentials::VpnCredentials;
use crate::error::{ApiError, KeychainError, TunnelError};
use crate::server::{ContinuousServerProperties, ServerModel};
use crate::session::VpnSession;
use crate::state::TunnelState;

/// Системный туннель
#[async_trait]
pub trait TunnelManager: Send + Sync {
    /// Загрузить сохранённую конфигурацию туннеля
    async fn load_configuration(&self) -> Result<(), TunnelError>;

    /// Поднять туннель с конфигурацией
    async fn activate(&self, configuration: &ConnectionConfiguration) -> Result<(), TunnelError>;

    /// Разорвать туннель
    async fn deactivate(&self);

    /// Текущее состояние туннеля
    fn status(&self) -> TunnelState;

    /// Включить или выключить системное переподключение
    async fn set_on_demand(&self, enabled: bool);

    /// Включено ли системное переподключение
    fn is_on_demand_enabled(&self) -> bool;

    /// Время установки текущего туннеля
    fn connected_since(&self) -> Option<DateTime<Utc>>;

    /// Удалить все конфигурации туннеля
    async fn remove_configurations(&self) -> Result<(), TunnelError>;

    /// Подписаться на изменения состояния
    fn subscribe(&self) -> broadcast::Receiver<TunnelState>;
}

/// Удалённый API аккаунта
#[async_trait]
pub trait AccountApi: Send + Sync {
    /// Учётные данные VPN
    async fn fetch_credentials(&self) -> Result<VpnCredentials, ApiError>;

    /// Активные сессии аккаунта
    async fn fetch_active_sessions(&self) -> Result<Vec<VpnSession>, ApiError>;

    /// Каталог серверов, опционально с учётом публичного адреса
    async fn fetch_server_catalog(&self, ip: Option<IpAddr>) -> Result<Vec<ServerModel>, ApiError>;

    /// Обновления нагрузки
    async fn fetch_server_loads(&self) -> Result<Vec<ContinuousServerProperties>, ApiError>;

    /// Публичный адрес устройства
    async fn fetch_location(&self) -> Result<IpAddr, ApiError>;
}

/// Локальное хранилище учётных данных
pub trait SecretStore: Send + Sync {
    /// Прочитать учётные данные
    fn fetch(&self) -> Result<VpnCredentials, KeychainError>;

    /// Сохранить учётные данные
    fn store(&self, credentials: &VpnCredentials) -> Result<(), KeychainError>;
}

/// Канал уведомлений пользователю
pub trait AlertSink: Send + Sync {
    /// Показать уведомление
    fn present(&self, alert: AlertKind);
}
