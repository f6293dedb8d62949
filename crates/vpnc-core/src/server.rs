//! Модель серверов и каталог, сгруппированный по странам
//!
//! Этот модуль отвечает за:
//! - Описание логического сервера ([`ServerModel`]) и его адресов ([`ServerIp`])
//! - Применение обновлений нагрузки ([`ContinuousServerProperties`])
//! - Группировку каталога по типу сервера и коду страны

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::protocol::VpnProtocol;
use crate::session::VpnSession;

/// Значение `status`, означающее техническое обслуживание
pub const STATUS_MAINTENANCE: i32 = 0;

/// Тип сервера (пул маршрутизации)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerType {
    /// Обычные серверы
    Standard,
    /// Secure Core (многоступенчатая маршрутизация)
    SecureCore,
    /// Серверы с поддержкой P2P
    P2p,
    /// Серверы с выходом в Tor
    Tor,
    /// Не указан: используется текущий выбранный тип
    #[default]
    Unspecified,
}

bitflags! {
    /// Возможности сервера
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ServerFeature: u32 {
        /// Secure Core
        const SECURE_CORE = 0b0000_0001;
        /// Выход в Tor
        const TOR         = 0b0000_0010;
        /// P2P трафик
        const P2P         = 0b0000_0100;
    }
}

/// Сериализация [`ServerFeature`] как числа, как это делает API каталога
mod feature_bits {
    use super::ServerFeature;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(feature: &ServerFeature, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(feature.bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ServerFeature, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Ok(ServerFeature::from_bits_truncate(bits))
    }
}

/// Один адрес логического сервера
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerIp {
    /// Идентификатор адреса
    pub id: String,
    /// Адрес входа
    pub entry_ip: IpAddr,
    /// Адрес выхода
    pub exit_ip: IpAddr,
    /// Доменное имя
    pub domain: String,
    /// Статус (0 - обслуживание)
    pub status: i32,
    /// У аккаунта уже есть сессия на этот адрес
    #[serde(skip)]
    pub has_existing_session: bool,
}

impl ServerIp {
    /// Адрес на обслуживании
    pub fn under_maintenance(&self) -> bool {
        self.status == STATUS_MAINTENANCE
    }
}

/// Меняющиеся со временем свойства сервера
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuousServerProperties {
    /// Идентификатор сервера
    pub server_id: String,
    /// Нагрузка в процентах
    pub load: u8,
    /// Оценка (меньше - лучше)
    pub score: f64,
    /// Статус (0 - обслуживание)
    pub status: i32,
}

/// Логический сервер
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerModel {
    /// Идентификатор сервера
    pub id: String,
    /// Отображаемое имя, например `CH#4`
    pub name: String,
    /// Доменное имя
    pub domain: String,
    /// Нагрузка в процентах
    pub load: u8,
    /// Страна входа (для Secure Core отличается от страны выхода)
    pub entry_country: String,
    /// Страна выхода
    pub exit_country: String,
    /// Требуемый уровень доступа
    pub tier: i32,
    /// Оценка (меньше - лучше)
    pub score: f64,
    /// Статус (0 - обслуживание)
    pub status: i32,
    /// Возможности сервера
    #[serde(with = "feature_bits", default)]
    pub feature: ServerFeature,
    /// Город
    #[serde(default)]
    pub city: Option<String>,
    /// Адреса сервера
    pub ips: Vec<ServerIp>,
}

impl ServerModel {
    /// Сервер недоступен: он сам или все его адреса на обслуживании
    pub fn under_maintenance(&self) -> bool {
        self.status == STATUS_MAINTENANCE || self.ips.iter().all(ServerIp::under_maintenance)
    }

    /// Сервер Secure Core
    pub fn is_secure_core(&self) -> bool {
        self.feature.contains(ServerFeature::SECURE_CORE)
    }

    /// Выход в Tor
    pub fn supports_tor(&self) -> bool {
        self.feature.contains(ServerFeature::TOR)
    }

    /// Поддержка P2P
    pub fn supports_p2p(&self) -> bool {
        self.feature.contains(ServerFeature::P2P)
    }

    /// Код страны, по которому сервер группируется
    pub fn country_code(&self) -> &str {
        &self.exit_country
    }

    /// Принадлежит ли сервер пулу указанного типа
    pub fn belongs_to(&self, server_type: ServerType) -> bool {
        match server_type {
            ServerType::Standard => !self.is_secure_core(),
            ServerType::SecureCore => self.is_secure_core(),
            ServerType::P2p => self.supports_p2p(),
            ServerType::Tor => self.supports_tor(),
            ServerType::Unspecified => false,
        }
    }

    /// Тип, к которому сервер приводит переключатель пулов
    pub fn server_type(&self) -> ServerType {
        if self.is_secure_core() {
            ServerType::SecureCore
        } else {
            ServerType::Standard
        }
    }

    /// Применить обновление нагрузки
    pub fn update(&mut self, properties: &ContinuousServerProperties) {
        self.load = properties.load;
        self.score = properties.score;
        self.status = properties.status;
    }

    /// Пометить адреса, на которые у аккаунта уже есть IKEv2 сессии
    ///
    /// Сессии других протоколов конфликтов не создают.
    pub fn mark_sessions(&mut self, sessions: &[VpnSession]) {
        for ip in &mut self.ips {
            ip.has_existing_session = sessions
                .iter()
                .any(|s| s.vpn_protocol == VpnProtocol::Ike && s.exit_ip == ip.exit_ip);
        }
    }

    /// Копия сервера с пометками сессий
    pub fn with_sessions(&self, sessions: &[VpnSession]) -> ServerModel {
        let mut server = self.clone();
        server.mark_sessions(sessions);
        server
    }
}

/// Серверы одной страны
#[derive(Debug, Clone, PartialEq)]
pub struct CountryGroup {
    /// Код страны (ISO 3166-1 alpha-2)
    pub country_code: String,
    /// Серверы страны
    pub servers: Vec<ServerModel>,
}

/// Снимок каталога серверов
#[derive(Debug, Clone, Default)]
pub struct ServerCatalog {
    servers: Vec<ServerModel>,
    fetched_at: Option<DateTime<Utc>>,
}

impl ServerCatalog {
    /// Создать каталог
    pub fn new(servers: Vec<ServerModel>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            servers,
            fetched_at: Some(fetched_at),
        }
    }

    /// Все серверы
    pub fn servers(&self) -> &[ServerModel] {
        &self.servers
    }

    /// Время последней загрузки каталога или оценок
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// Найти сервер по идентификатору
    pub fn server(&self, id: &str) -> Option<&ServerModel> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Заменить список серверов
    pub fn replace(&mut self, servers: Vec<ServerModel>, fetched_at: DateTime<Utc>) {
        self.servers = servers;
        self.fetched_at = Some(fetched_at);
    }

    /// Применить обновления нагрузки к известным серверам
    pub fn apply_loads(&mut self, updates: &[ContinuousServerProperties], fetched_at: DateTime<Utc>) {
        for update in updates {
            if let Some(server) = self.servers.iter_mut().find(|s| s.id == update.server_id) {
                server.update(update);
            }
        }
        self.fetched_at = Some(fetched_at);
    }

    /// Оценки серверов старше `max_age`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        match self.fetched_at {
            Some(at) => now - at > max_age,
            None => true,
        }
    }

    /// Серверы типа `server_type`, сгруппированные по стране и отсортированные по коду
    pub fn grouping(&self, server_type: ServerType) -> Vec<CountryGroup> {
        let mut countries: BTreeMap<&str, Vec<ServerModel>> = BTreeMap::new();
        for server in self.servers.iter().filter(|s| s.belongs_to(server_type)) {
            countries
                .entry(server.country_code())
                .or_default()
                .push(server.clone());
        }

        countries
            .into_iter()
            .map(|(code, servers)| CountryGroup {
                country_code: code.to_string(),
                servers,
            })
            .collect()
    }
}
