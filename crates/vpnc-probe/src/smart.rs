//! Автоматический выбор протокола (Smart Protocol)
//!
//! Все разрешённые транспорты проверяются параллельно; после того как
//! завершились все проверки, побеждает доступный транспорт с наивысшим
//! приоритетом (IKEv2, затем OpenVPN UDP, затем OpenVPN TCP).

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use vpnc_core::protocol::VpnProtocol;

use crate::checker::{check_availability, default_checkers, first_responding_port, AvailabilityChecker, ProtocolProbeResult};
use crate::config::{ProbeConfig, SmartProtocolConfig};
use crate::error::Result;

/// Протокол, выбираемый когда ни один транспорт не ответил
pub const FALLBACK_PROTOCOL: VpnProtocol = VpnProtocol::Ike;

/// Выбор транспорта и портов для адреса сервера
#[async_trait]
pub trait SmartProtocol: Send + Sync {
    /// Лучший доступный транспорт и его порты в случайном порядке
    ///
    /// Если ни один транспорт не ответил, возвращается `(IKEv2, [])`.
    async fn determine_best_protocol(&self, ip: IpAddr) -> (VpnProtocol, Vec<u16>);

    /// Порты для фиксированного протокола: первым идёт ответивший порт
    async fn select_ports(&self, protocol: VpnProtocol, ip: IpAddr) -> Vec<u16>;
}

/// Реализация [`SmartProtocol`] поверх проверок доступности
pub struct SmartProtocolSelector {
    checkers: Vec<Arc<dyn AvailabilityChecker>>,
    enabled: SmartProtocolConfig,
}

impl SmartProtocolSelector {
    /// Создать выбор из готовых проверок
    pub fn new(checkers: Vec<Arc<dyn AvailabilityChecker>>, enabled: SmartProtocolConfig) -> Self {
        Self { checkers, enabled }
    }

    /// Создать выбор со стандартными проверками
    pub fn from_config(probe: &ProbeConfig, enabled: SmartProtocolConfig) -> Result<Self> {
        Ok(Self::new(default_checkers(probe)?, enabled))
    }

    fn checker(&self, protocol: VpnProtocol) -> Option<&Arc<dyn AvailabilityChecker>> {
        self.checkers.iter().find(|c| c.protocol() == protocol)
    }
}

fn shuffled(ports: &[u16]) -> Vec<u16> {
    let mut ports = ports.to_vec();
    ports.shuffle(&mut rand::thread_rng());
    ports
}

#[async_trait]
impl SmartProtocol for SmartProtocolSelector {
    async fn determine_best_protocol(&self, ip: IpAddr) -> (VpnProtocol, Vec<u16>) {
        let candidates: Vec<_> = self
            .checkers
            .iter()
            .filter(|c| self.enabled.is_enabled(c.protocol()))
            .cloned()
            .collect();

        if candidates.is_empty() {
            error!("Все протоколы отключены для Smart Protocol, используется {}", FALLBACK_PROTOCOL);
            return (FALLBACK_PROTOCOL, Vec::new());
        }

        debug!("Определение лучшего протокола для {}", ip);

        let mut probes = JoinSet::new();
        for checker in candidates {
            probes.spawn(async move {
                let ports = checker.default_ports().to_vec();
                let result = check_availability(Arc::clone(&checker), ip, &ports).await;
                (checker, result)
            });
        }

        let mut available: Vec<Arc<dyn AvailabilityChecker>> = Vec::new();
        while let Some(joined) = probes.join_next().await {
            if let Ok((checker, ProtocolProbeResult::Available(_))) = joined {
                available.push(checker);
            }
        }

        let best = available
            .into_iter()
            .min_by_key(|c| c.protocol().priority())
            .filter(|c| !c.default_ports().is_empty());

        match best {
            Some(checker) => {
                let ports = shuffled(checker.default_ports());
                info!("Лучший протокол для {}: {} (порты {:?})", ip, checker.protocol(), ports);
                (checker.protocol(), ports)
            }
            None => {
                debug!("Лучший протокол не определён, используется {}", FALLBACK_PROTOCOL);
                (FALLBACK_PROTOCOL, Vec::new())
            }
        }
    }

    async fn select_ports(&self, protocol: VpnProtocol, ip: IpAddr) -> Vec<u16> {
        let Some(checker) = self.checker(protocol) else {
            return Vec::new();
        };

        let defaults = checker.default_ports().to_vec();
        match first_responding_port(Arc::clone(checker), ip, &defaults).await {
            Some(port) => {
                let mut ports = vec![port];
                ports.extend(shuffled(&defaults).into_iter().filter(|p| *p != port));
                ports
            }
            None => shuffled(&defaults),
        }
    }
}
