//! Уведомления о недоступности сервера
//!
//! Селектор и подготовитель возвращают причину значением; этот модуль
//! превращает её в уведомление пользователю.

use std::sync::Arc;
use tracing::warn;
use vpnc_core::{AlertKind, AlertSink, ResolutionUnavailableReason, ServerModel, ServerType};

/// Проверка уровня доступа и уведомления о недоступности
#[derive(Clone)]
pub struct ServerTierChecker {
    alerts: Arc<dyn AlertSink>,
}

impl ServerTierChecker {
    /// Создать проверку
    pub fn new(alerts: Arc<dyn AlertSink>) -> Self {
        Self { alerts }
    }

    /// Показать уведомление о недоступности
    pub fn notify_resolution_unavailable(
        &self,
        for_specific_country: bool,
        server_type: ServerType,
        reason: ResolutionUnavailableReason,
    ) {
        warn!("Подходящий сервер не найден: {}", reason);
        self.alerts.present(AlertKind::ResolutionUnavailable {
            for_specific_country,
            server_type,
            reason,
        });
    }

    /// Сервер требует более высокий tier; уведомляет пользователя
    pub fn server_requires_upgrade(&self, server: &ServerModel, user_tier: i32) -> bool {
        if server.tier <= user_tier {
            return false;
        }

        self.notify_resolution_unavailable(
            true,
            server.server_type(),
            ResolutionUnavailableReason::Upgrade(server.tier),
        );
        true
    }
}
