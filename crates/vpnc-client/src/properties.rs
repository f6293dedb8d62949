//! Сохраняемые настройки и состояние клиента
//!
//! Все поля хранятся в одной структуре [`StoredProperties`] с явной
//! версией схемы. Доступ идёт через [`PropertiesManager`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::warn;
use vpnc_core::{ConnectionProtocol, ConnectionRequest, NetShieldType, Profile, ServerType};

/// Текущая версия схемы настроек
pub const PROPERTIES_VERSION: u32 = 1;

/// Сохраняемые настройки
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProperties {
    /// Версия схемы
    pub version: u32,
    /// Переключатель Secure Core
    #[serde(default)]
    pub secure_core_toggle: bool,
    /// Протокол для новых подключений
    #[serde(default = "default_connection_protocol")]
    pub connection_protocol: ConnectionProtocol,
    /// Уровень NetShield для новых подключений
    #[serde(default)]
    pub net_shield_type: NetShieldType,
    /// Последний запрос подключения
    #[serde(default)]
    pub last_connection_request: Option<ConnectionRequest>,
    /// Было ли хотя бы одно успешное подключение
    #[serde(default)]
    pub has_connected: bool,
    /// Пользователь отключился сам
    #[serde(default)]
    pub intentionally_disconnected: bool,
    /// Время последнего подключения
    #[serde(default)]
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Последний известный публичный адрес
    #[serde(default)]
    pub last_user_ip: Option<IpAddr>,
    /// Сервер последнего подключения
    #[serde(default)]
    pub last_server_id: Option<String>,
    /// Адрес последнего подключения
    #[serde(default)]
    pub last_server_ip: Option<IpAddr>,
    /// Профили пользователя
    #[serde(default)]
    pub profiles: Vec<Profile>,
    /// Профиль для автоподключения
    #[serde(default)]
    pub auto_connect_profile: Option<String>,
    /// Профиль быстрого подключения
    #[serde(default)]
    pub quick_connect_profile: Option<String>,
}

fn default_connection_protocol() -> ConnectionProtocol {
    ConnectionProtocol::SmartProtocol
}

impl Default for StoredProperties {
    fn default() -> Self {
        Self {
            version: PROPERTIES_VERSION,
            secure_core_toggle: false,
            connection_protocol: default_connection_protocol(),
            net_shield_type: NetShieldType::default(),
            last_connection_request: None,
            has_connected: false,
            intentionally_disconnected: false,
            last_connected_at: None,
            last_user_ip: None,
            last_server_id: None,
            last_server_ip: None,
            profiles: Vec::new(),
            auto_connect_profile: None,
            quick_connect_profile: None,
        }
    }
}

impl StoredProperties {
    /// Тип сервера, выбранный переключателем
    pub fn active_server_type(&self) -> ServerType {
        if self.secure_core_toggle {
            ServerType::SecureCore
        } else {
            ServerType::Standard
        }
    }

    /// Найти профиль по идентификатору
    pub fn profile(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Разобрать JSON документ настроек
    pub fn from_json(document: &str) -> Result<Self, anyhow::Error> {
        let mut properties: StoredProperties = serde_json::from_str(document)?;
        if properties.version != PROPERTIES_VERSION {
            anyhow::bail!("Неподдерживаемая версия настроек: {}", properties.version);
        }

        let invalid = properties
            .last_connection_request
            .as_ref()
            .map(|r| r.validate().is_err())
            .unwrap_or(false);
        if invalid {
            warn!("Последний запрос подключения повреждён и будет забыт");
            properties.last_connection_request = None;
        }

        Ok(properties)
    }

    /// Сериализовать в JSON
    pub fn to_json(&self) -> Result<String, anyhow::Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Доступ к настройкам
#[derive(Debug, Default)]
pub struct PropertiesManager {
    inner: RwLock<StoredProperties>,
}

impl PropertiesManager {
    /// Создать менеджер с начальными настройками
    pub fn new(properties: StoredProperties) -> Self {
        Self {
            inner: RwLock::new(properties),
        }
    }

    /// Загрузить настройки из файла
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::new(StoredProperties::from_json(&content)?))
    }

    /// Сохранить настройки в файл
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), anyhow::Error> {
        let content = self.inner.read().await.to_json()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Копия текущих настроек
    pub async fn snapshot(&self) -> StoredProperties {
        self.inner.read().await.clone()
    }

    /// Изменить настройки
    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut StoredProperties),
    {
        let mut properties = self.inner.write().await;
        f(&mut properties);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpnc_core::ConnectionRequestType;

    #[test]
    fn test_json_round_trip() {
        let mut properties = StoredProperties::default();
        properties.secure_core_toggle = true;
        properties.last_connection_request = Some(ConnectionRequest::new(
            ServerType::P2p,
            ConnectionRequestType::Random,
            ConnectionProtocol::SmartProtocol,
            NetShieldType::Level2,
        ));

        let back = StoredProperties::from_json(&properties.to_json().unwrap()).unwrap();
        assert_eq!(back, properties);
        assert_eq!(back.active_server_type(), ServerType::SecureCore);
    }

    #[test]
    fn test_unknown_version_rejected() {
        assert!(StoredProperties::from_json(r#"{"version": 99}"#).is_err());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let properties = StoredProperties::from_json(r#"{"version": 1}"#).unwrap();
        assert_eq!(properties, StoredProperties::default());
    }

    #[test]
    fn test_invalid_request_dropped() {
        let doc = r#"{"version":1,"lastConnectionRequest":{"serverType":"standard","connectionType":{"country":{"code":"","selector":"fastest"}},"connectionProtocol":"smartProtocol"}}"#;
        let properties = StoredProperties::from_json(doc).unwrap();
        assert!(properties.last_connection_request.is_none());
    }

    #[tokio::test]
    async fn test_update() {
        let manager = PropertiesManager::default();
        manager.update(|p| p.has_connected = true).await;
        assert!(manager.snapshot().await.has_connected);
    }
}
