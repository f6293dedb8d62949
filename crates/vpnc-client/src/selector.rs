//! Выбор сервера для запроса подключения
//!
//! Порядок фильтров:
//! 1. Серверы с tier выше, чем у аккаунта (причина `upgrade`)
//! 2. Серверы на обслуживании (причина `maintenance`)
//! 3. Серверы, все адреса которых заняты IKEv2 сессиями аккаунта (причина `existingConnection`)
//! 4. Серверы Tor, если они не запрошены явно
//!
//! Закреплённый сервер возвращается после проверки tier без остальных фильтров.

use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::net::IpAddr;
use tracing::{debug, info};
use vpnc_core::{
    AppState, ConnectionRequest, ConnectionRequestType, CountryConnectionRequestType, ResolutionUnavailableReason,
    ServerCatalog, ServerModel, ServerType, VpnSession,
};

/// Данные, от которых зависит выбор
#[derive(Debug, Clone)]
pub struct SelectionContext {
    /// Tier аккаунта
    pub user_tier: i32,
    /// Тип сервера для запросов с `unspecified`
    pub default_server_type: ServerType,
    /// Текущее состояние приложения
    pub app_state: AppState,
    /// Адрес, к которому туннель подключён сейчас
    pub connected_ip: Option<IpAddr>,
}

/// Результат выбора
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    /// Сервер выбран
    Selected {
        /// Выбранный сервер с пометками сессий
        server: ServerModel,
        /// Тип сервера, по которому шёл выбор
        server_type: ServerType,
    },
    /// Кандидаты были, но все отброшены
    Unavailable {
        /// Причина
        reason: ResolutionUnavailableReason,
        /// Тип сервера, по которому шёл выбор
        server_type: ServerType,
        /// Запрос относился к стране
        for_specific_country: bool,
    },
    /// Кандидатов нет вовсе или выбор сейчас невозможен
    NoCandidates,
}

impl SelectionOutcome {
    /// Выбранный сервер
    pub fn server(&self) -> Option<&ServerModel> {
        match self {
            SelectionOutcome::Selected { server, .. } => Some(server),
            SelectionOutcome::Unavailable { .. } | SelectionOutcome::NoCandidates => None,
        }
    }
}

/// Сначала больший tier, при равном tier меньшая оценка
fn compare_candidates(a: &ServerModel, b: &ServerModel) -> Ordering {
    b.tier
        .cmp(&a.tier)
        .then_with(|| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
}

/// Адрес занят сессией и не является текущим подключением
fn is_taken(ip_has_session: bool, entry_ip: IpAddr, connected_ip: Option<IpAddr>) -> bool {
    ip_has_session && Some(entry_ip) != connected_ip
}

/// Выбор сервера
pub struct ServerSelector {
    context: SelectionContext,
}

impl ServerSelector {
    /// Создать селектор
    pub fn new(context: SelectionContext) -> Self {
        Self { context }
    }

    /// Тип сервера с учётом текущего переключателя
    pub fn effective_server_type(&self, request: &ConnectionRequest) -> ServerType {
        match request.server_type {
            ServerType::Unspecified => self.context.default_server_type,
            explicit => explicit,
        }
    }

    /// Выбрать сервер
    pub fn select(&self, request: &ConnectionRequest, catalog: &ServerCatalog, sessions: &[VpnSession]) -> SelectionOutcome {
        let server_type = self.effective_server_type(request);
        let grouping = catalog.grouping(server_type);

        let (pool, for_specific_country) = match &request.connection_type {
            ConnectionRequestType::Fastest | ConnectionRequestType::Random => {
                (grouping.into_iter().flat_map(|g| g.servers).collect::<Vec<_>>(), false)
            }
            ConnectionRequestType::Country { code, .. } => {
                match grouping.into_iter().find(|g| &g.country_code == code) {
                    Some(group) => (group.servers, true),
                    None => {
                        debug!("Страна {} отсутствует среди серверов {:?}", code, server_type);
                        return SelectionOutcome::NoCandidates;
                    }
                }
            }
        };

        let mut pool: Vec<ServerModel> = pool.iter().map(|s| s.with_sessions(sessions)).collect();
        pool.sort_by(compare_candidates);

        let unavailable = |reason| SelectionOutcome::Unavailable {
            reason,
            server_type,
            for_specific_country,
        };

        if pool.is_empty() {
            return SelectionOutcome::NoCandidates;
        }

        let user_tier = self.context.user_tier;
        let lowest_tier = pool.iter().map(|s| s.tier).min().unwrap_or_default();
        pool.retain(|s| s.tier <= user_tier);
        if pool.is_empty() {
            return unavailable(ResolutionUnavailableReason::Upgrade(lowest_tier));
        }

        if let Some(pinned) = request.connection_type.pinned_server() {
            return match pool.iter().find(|s| s.id == pinned.id) {
                Some(_) => self.selected(pinned.with_sessions(sessions), server_type),
                None if pinned.tier > user_tier => unavailable(ResolutionUnavailableReason::Upgrade(pinned.tier)),
                None => SelectionOutcome::NoCandidates,
            };
        }

        pool.retain(|s| !s.under_maintenance());
        if pool.is_empty() {
            return unavailable(ResolutionUnavailableReason::Maintenance);
        }

        if request.connection_protocol.may_use_ike() {
            let connected_ip = self.context.connected_ip;
            pool.retain(|s| {
                !s.ips
                    .iter()
                    .all(|ip| is_taken(ip.has_existing_session, ip.entry_ip, connected_ip))
            });
            if pool.is_empty() {
                return unavailable(ResolutionUnavailableReason::ExistingConnection);
            }
        }

        let without_tor: Vec<ServerModel> = if server_type == ServerType::Tor {
            pool.clone()
        } else {
            pool.iter().filter(|s| !s.supports_tor()).cloned().collect()
        };

        let candidates = if !without_tor.is_empty() {
            if matches!(self.context.app_state, AppState::Connecting(_)) {
                return SelectionOutcome::NoCandidates;
            }
            without_tor
        } else if self.context.app_state == AppState::PreparingConnection {
            pool
        } else {
            return SelectionOutcome::NoCandidates;
        };

        match self.pick(&request.connection_type, candidates) {
            Some(server) => self.selected(server, server_type),
            None => SelectionOutcome::NoCandidates,
        }
    }

    fn pick(&self, connection_type: &ConnectionRequestType, candidates: Vec<ServerModel>) -> Option<ServerModel> {
        let random = matches!(
            connection_type,
            ConnectionRequestType::Random
                | ConnectionRequestType::Country {
                    selector: CountryConnectionRequestType::Random,
                    ..
                }
        );

        if random {
            candidates.choose(&mut rand::thread_rng()).cloned()
        } else {
            candidates.into_iter().next()
        }
    }

    fn selected(&self, server: ServerModel, server_type: ServerType) -> SelectionOutcome {
        info!("Выбран сервер {} (tier {}, оценка {:.2})", server.name, server.tier, server.score);
        SelectionOutcome::Selected { server, server_type }
    }
}
