//! Подготовка конфигурации туннеля
//!
//! Этот модуль отвечает за:
//! - Получение активных сессий аккаунта (без них подключение продолжается)
//! - Выбор сервера и адреса
//! - Выбор протокола и портов
//! - Сборку [`ConnectionConfiguration`] с учётными данными
//!
//! Каждая точка ожидания проверяет токен отмены; отменённая подготовка
//! ничего не возвращает и ничего не меняет.

use rand::seq::SliceRandom;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vpnc_core::{
    AccountApi, ConnectionConfiguration, ConnectionProtocol, ConnectionRequest, ResolutionUnavailableReason,
    SecretStore, ServerCatalog, ServerIp, ServerModel, ServerType, VpnError, VpnSession,
};
use vpnc_probe::SmartProtocol;

use crate::selector::{SelectionContext, SelectionOutcome, ServerSelector};
use crate::tier_checker::ServerTierChecker;

/// Готовое к активации подключение
#[derive(Debug, Clone)]
pub struct PreparedConnection {
    /// Конфигурация туннеля
    pub configuration: ConnectionConfiguration,
    /// Сессии аккаунта на момент подготовки
    pub sessions: Vec<VpnSession>,
    /// Тип сервера, по которому шёл выбор
    pub server_type: ServerType,
}

/// Итог подготовки
#[derive(Debug, Clone)]
pub enum PreparationOutcome {
    /// Конфигурация готова
    Ready(Box<PreparedConnection>),
    /// Сервер не найден, пользователь уже уведомлён
    Unavailable(ResolutionUnavailableReason),
    /// Кандидатов нет
    NoServer,
    /// Подготовка отменена
    Cancelled,
}

/// Подготовитель подключения
pub struct VpnConnectionPreparer {
    api: Arc<dyn AccountApi>,
    secrets: Arc<dyn SecretStore>,
    smart_protocol: Arc<dyn SmartProtocol>,
    tier_checker: ServerTierChecker,
}

/// Адреса сервера, пригодные для подключения
///
/// Адреса на обслуживании отбрасываются всегда. Для IKEv2 также
/// отбрасываются адреса с активной сессией аккаунта, кроме текущего.
pub fn usable_ips(server: &ServerModel, protocol: ConnectionProtocol, connected_ip: Option<IpAddr>) -> Vec<ServerIp> {
    server
        .ips
        .iter()
        .filter(|ip| !ip.under_maintenance())
        .filter(|ip| {
            !(protocol.may_use_ike() && ip.has_existing_session && Some(ip.entry_ip) != connected_ip)
        })
        .cloned()
        .collect()
}

impl VpnConnectionPreparer {
    /// Создать подготовитель
    pub fn new(
        api: Arc<dyn AccountApi>,
        secrets: Arc<dyn SecretStore>,
        smart_protocol: Arc<dyn SmartProtocol>,
        tier_checker: ServerTierChecker,
    ) -> Self {
        Self {
            api,
            secrets,
            smart_protocol,
            tier_checker,
        }
    }

    /// Подготовить конфигурацию для запроса
    ///
    /// Ошибка возвращается только если недоступны учётные данные.
    pub async fn prepare(
        &self,
        request: &ConnectionRequest,
        catalog: &ServerCatalog,
        context: SelectionContext,
        cancel: &CancellationToken,
    ) -> Result<PreparationOutcome, VpnError> {
        let sessions = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PreparationOutcome::Cancelled),
            result = self.api.fetch_active_sessions() => match result {
                Ok(sessions) => sessions,
                Err(e) => {
                    warn!("Не удалось получить активные сессии, продолжаем без них: {}", e);
                    Vec::new()
                }
            },
        };
        debug!("Активных сессий аккаунта: {}", sessions.len());

        let user_tier = context.user_tier;
        let connected_ip = context.connected_ip;
        let selector = ServerSelector::new(context);

        let (server, server_type) = match selector.select(request, catalog, &sessions) {
            SelectionOutcome::Selected { server, server_type } => (server, server_type),
            SelectionOutcome::Unavailable {
                reason,
                server_type,
                for_specific_country,
            } => {
                self.tier_checker
                    .notify_resolution_unavailable(for_specific_country, server_type, reason);
                return Ok(PreparationOutcome::Unavailable(reason));
            }
            SelectionOutcome::NoCandidates => return Ok(PreparationOutcome::NoServer),
        };

        if server.tier > user_tier {
            debug!("Сервер {} требует tier {}", server.name, server.tier);
            return Ok(PreparationOutcome::Unavailable(ResolutionUnavailableReason::Upgrade(server.tier)));
        }

        let ips = usable_ips(&server, request.connection_protocol, connected_ip);
        let Some(server_ip) = ips.choose(&mut rand::thread_rng()).cloned() else {
            let reason = ResolutionUnavailableReason::ExistingConnection;
            self.tier_checker.notify_resolution_unavailable(
                request.connection_type.pinned_server().is_some(),
                server_type,
                reason,
            );
            return Ok(PreparationOutcome::Unavailable(reason));
        };

        let credentials = self.secrets.fetch()?;

        let entry_ip = server_ip.entry_ip;
        let (vpn_protocol, ports) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PreparationOutcome::Cancelled),
            chosen = async {
                match request.connection_protocol {
                    ConnectionProtocol::SmartProtocol => self.smart_protocol.determine_best_protocol(entry_ip).await,
                    ConnectionProtocol::VpnProtocol(protocol) => {
                        (protocol, self.smart_protocol.select_ports(protocol, entry_ip).await)
                    }
                }
            } => chosen,
        };

        if cancel.is_cancelled() {
            return Ok(PreparationOutcome::Cancelled);
        }

        info!(
            "✓ Конфигурация готова: {} ({}), {} порты {:?}",
            server.name, entry_ip, vpn_protocol, ports
        );

        Ok(PreparationOutcome::Ready(Box::new(PreparedConnection {
            configuration: ConnectionConfiguration {
                server,
                server_ip,
                vpn_protocol,
                net_shield_type: request.net_shield_type,
                ports,
                credentials,
            },
            sessions,
            server_type,
        })))
    }
}
