//! Запрос подключения и его версионированная сериализация
//!
//! Запрос сохраняется между запусками как JSON конверт
//! `{"version": 1, "request": {...}}`. Документы без поля `version`
//! считаются записанными до появления Smart Protocol и содержат поле
//! `vpnProtocol` вместо `connectionProtocol`.

use serde::{Deserialize, Serialize};

use crate::error::RequestError;
use crate::protocol::{ConnectionProtocol, NetShieldType, VpnProtocol};
use crate::server::{ServerModel, ServerType};

/// Текущая версия схемы
pub const SCHEMA_VERSION: u32 = 1;

/// Выбор сервера внутри страны
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CountryConnectionRequestType {
    /// Лучший по оценке
    Fastest,
    /// Случайный
    Random,
    /// Конкретный сервер
    Server(ServerModel),
}

/// Способ выбора сервера
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionRequestType {
    /// Лучший по оценке среди всех серверов типа
    Fastest,
    /// Случайный среди всех серверов типа
    Random,
    /// Сервер из одной страны
    Country {
        /// Код страны, никогда не пустой
        code: String,
        /// Способ выбора внутри страны
        selector: CountryConnectionRequestType,
    },
}

impl ConnectionRequestType {
    /// Запрос по стране с проверкой кода
    pub fn country(
        code: impl Into<String>,
        selector: CountryConnectionRequestType,
    ) -> Result<Self, RequestError> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(RequestError::EmptyCountryCode);
        }
        Ok(ConnectionRequestType::Country { code, selector })
    }

    /// Закреплённый сервер, если он задан
    pub fn pinned_server(&self) -> Option<&ServerModel> {
        match self {
            ConnectionRequestType::Country {
                selector: CountryConnectionRequestType::Server(server),
                ..
            } => Some(server),
            _ => None,
        }
    }
}

/// Неизменяемый запрос подключения
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    /// Тип сервера
    pub server_type: ServerType,
    /// Способ выбора сервера
    pub connection_type: ConnectionRequestType,
    /// Протокол
    pub connection_protocol: ConnectionProtocol,
    /// Уровень NetShield
    #[serde(default)]
    pub net_shield_type: NetShieldType,
    /// Профиль, из которого построен запрос
    #[serde(default)]
    pub profile_id: Option<String>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    request: &'a ConnectionRequest,
}

#[derive(Deserialize)]
struct Envelope {
    request: ConnectionRequest,
}

/// Формат до появления Smart Protocol
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyConnectionRequest {
    server_type: ServerType,
    connection_type: ConnectionRequestType,
    vpn_protocol: VpnProtocol,
    #[serde(default)]
    net_shield_type: NetShieldType,
    #[serde(default)]
    profile_id: Option<String>,
}

impl From<LegacyConnectionRequest> for ConnectionRequest {
    fn from(legacy: LegacyConnectionRequest) -> Self {
        ConnectionRequest {
            server_type: legacy.server_type,
            connection_type: legacy.connection_type,
            connection_protocol: ConnectionProtocol::VpnProtocol(legacy.vpn_protocol),
            net_shield_type: legacy.net_shield_type,
            profile_id: legacy.profile_id,
        }
    }
}

impl ConnectionRequest {
    /// Создать запрос без привязки к профилю
    pub fn new(
        server_type: ServerType,
        connection_type: ConnectionRequestType,
        connection_protocol: ConnectionProtocol,
        net_shield_type: NetShieldType,
    ) -> Self {
        Self {
            server_type,
            connection_type,
            connection_protocol,
            net_shield_type,
            profile_id: None,
        }
    }

    /// Копия с другим уровнем NetShield
    pub fn with_changed_net_shield(&self, net_shield_type: NetShieldType) -> Self {
        Self {
            net_shield_type,
            ..self.clone()
        }
    }

    /// Копия с другим протоколом
    pub fn with_changed_protocol(&self, connection_protocol: ConnectionProtocol) -> Self {
        Self {
            connection_protocol,
            ..self.clone()
        }
    }

    /// Проверить инварианты запроса
    pub fn validate(&self) -> Result<(), RequestError> {
        match &self.connection_type {
            ConnectionRequestType::Country { code, .. } if code.trim().is_empty() => {
                Err(RequestError::EmptyCountryCode)
            }
            _ => Ok(()),
        }
    }

    /// Сериализовать в версионированный JSON конверт
    pub fn encode(&self) -> Result<String, RequestError> {
        self.validate()?;
        let envelope = EnvelopeRef {
            version: SCHEMA_VERSION,
            request: self,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Разобрать JSON конверт (или документ старого формата)
    pub fn decode(document: &str) -> Result<Self, RequestError> {
        let value: serde_json::Value = serde_json::from_str(document)?;

        let request = match value.get("version") {
            Some(version) => {
                let version = version
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| RequestError::Malformed("поле version не является числом".into()))?;
                if version != SCHEMA_VERSION {
                    return Err(RequestError::UnsupportedVersion(version));
                }
                serde_json::from_value::<Envelope>(value)?.request
            }
            None => serde_json::from_value::<LegacyConnectionRequest>(value)?.into(),
        };

        request.validate()?;
        Ok(request)
    }
}
