//! Сохранённые профили подключения

use serde::{Deserialize, Serialize};

use crate::protocol::{ConnectionProtocol, NetShieldType};
use crate::request::{ConnectionRequest, ConnectionRequestType, CountryConnectionRequestType};
use crate::server::{ServerModel, ServerType};

/// Что предлагает профиль
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerOffering {
    /// Лучший сервер, опционально в стране
    Fastest(Option<String>),
    /// Случайный сервер, опционально в стране
    Random(Option<String>),
    /// Конкретный сервер
    Custom(ServerModel),
}

/// Профиль подключения
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Идентификатор
    pub id: String,
    /// Имя
    pub name: String,
    /// Тип сервера
    pub server_type: ServerType,
    /// Предложение сервера
    pub offering: ServerOffering,
    /// Протокол
    pub connection_protocol: ConnectionProtocol,
}

impl Profile {
    /// Запрос подключения, соответствующий профилю
    pub fn connection_request(&self, net_shield_type: NetShieldType) -> ConnectionRequest {
        let country = |code: &Option<String>, selector| match code {
            Some(code) if !code.trim().is_empty() => ConnectionRequestType::Country {
                code: code.clone(),
                selector,
            },
            _ => match selector {
                CountryConnectionRequestType::Random => ConnectionRequestType::Random,
                _ => ConnectionRequestType::Fastest,
            },
        };

        let connection_type = match &self.offering {
            ServerOffering::Fastest(code) => country(code, CountryConnectionRequestType::Fastest),
            ServerOffering::Random(code) => country(code, CountryConnectionRequestType::Random),
            ServerOffering::Custom(server) => ConnectionRequestType::Country {
                code: server.country_code().to_string(),
                selector: CountryConnectionRequestType::Server(server.clone()),
            },
        };

        ConnectionRequest {
            server_type: self.server_type,
            connection_type,
            connection_protocol: self.connection_protocol,
            net_shield_type,
            profile_id: Some(self.id.clone()),
        }
    }
}
