//! Проверка доступности портов
//!
//! Этот модуль отвечает за:
//! - Отправку пакета рукопожатия на порт и ожидание любого ответа
//! - Однократное завершение проверки (тайм-аут и ответ сети гонятся, побеждает один)
//! - Закрытие всех сокетов по завершении проверки
//! - Параллельную проверку списка портов

use async_trait::async_trait;
use bytes::Bytes;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinSet};
use tracing::debug;
use vpnc_core::protocol::{OpenVpnTransport, VpnProtocol};

use crate::config::ProbeConfig;
use crate::error::Result;
use crate::handshake::{ike_sa_init, OpenVpnHandshake};

/// Сколько байт ответа читается
const RESPONSE_BUFFER_LEN: usize = 64;

/// Результат проверки одного транспорта
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolProbeResult {
    /// Ни один порт не ответил
    Unavailable,
    /// Ответившие порты
    Available(Vec<u16>),
}

impl ProtocolProbeResult {
    /// Хотя бы один порт ответил
    pub fn is_available(&self) -> bool {
        matches!(self, ProtocolProbeResult::Available(_))
    }
}

/// Проверка доступности одного транспорта
#[async_trait]
pub trait AvailabilityChecker: Send + Sync {
    /// Проверяемый протокол
    fn protocol(&self) -> VpnProtocol;

    /// Порты по умолчанию
    fn default_ports(&self) -> &[u16];

    /// Проверить один порт
    async fn ping(&self, ip: IpAddr, port: u16) -> bool;
}

/// Однократное завершение проверки порта
///
/// Все копии делят один отправитель: первый вызов [`complete`](Self::complete)
/// доставляет результат, остальные игнорируются.
#[derive(Clone)]
pub struct ProbeCompletion {
    sender: Arc<Mutex<Option<oneshot::Sender<bool>>>>,
}

impl ProbeCompletion {
    /// Создать завершение и приёмник результата
    pub fn channel() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        (completion, rx)
    }

    fn guard(&self) -> MutexGuard<'_, Option<oneshot::Sender<bool>>> {
        self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Завершить проверку; `true`, если этот вызов оказался первым
    pub fn complete(&self, received_response: bool) -> bool {
        match self.guard().take() {
            Some(sender) => {
                let _ = sender.send(received_response);
                true
            }
            None => false,
        }
    }

    /// Проверка уже завершена
    pub fn is_completed(&self) -> bool {
        self.guard().is_none()
    }
}

/// Реестр активных проверок
///
/// Задача с сокетом регистрируется на время проверки и прерывается
/// при её завершении, что закрывает сокет.
#[derive(Default)]
pub struct ProbeRegistry {
    next_id: AtomicU64,
    in_flight: Mutex<HashMap<u64, AbortHandle>>,
}

impl ProbeRegistry {
    /// Создать пустой реестр
    pub fn new() -> Self {
        Self::default()
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<u64, AbortHandle>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, handle: AbortHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections().insert(id, handle);
        id
    }

    fn cancel(&self, id: u64) {
        if let Some(handle) = self.connections().remove(&id) {
            handle.abort();
        }
    }

    /// Число незавершённых проверок
    pub fn in_flight(&self) -> usize {
        self.connections().len()
    }

    /// Выполнить обмен с тайм-аутом
    ///
    /// Успех - обмен вернул `Ok(true)` раньше, чем истёк тайм-аут.
    pub async fn run<F>(&self, timeout: Duration, exchange: F) -> bool
    where
        F: Future<Output = io::Result<bool>> + Send + 'static,
    {
        let (completion, result) = ProbeCompletion::channel();

        let network = {
            let completion = completion.clone();
            tokio::spawn(async move {
                let received = matches!(exchange.await, Ok(true));
                completion.complete(received);
            })
        };
        let id = self.register(network.abort_handle());

        let timer = {
            let completion = completion.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                completion.complete(false);
            })
        };

        // снимает проверку и при досрочном сбросе future
        let _in_flight = InFlightProbe {
            registry: self,
            id,
            timer: timer.abort_handle(),
        };

        result.await.unwrap_or(false)
    }
}

/// Регистрация одной проверки; при сбросе прерывает её задачи
struct InFlightProbe<'a> {
    registry: &'a ProbeRegistry,
    id: u64,
    timer: AbortHandle,
}

impl Drop for InFlightProbe<'_> {
    fn drop(&mut self) {
        self.timer.abort();
        self.registry.cancel(self.id);
    }
}

fn unspecified_for(ip: IpAddr) -> SocketAddr {
    match ip {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

/// Отправить датаграмму и дождаться любой ответной
async fn udp_exchange(target: SocketAddr, packet: Bytes) -> io::Result<bool> {
    let socket = UdpSocket::bind(unspecified_for(target.ip())).await?;
    socket.connect(target).await?;
    socket.send(&packet).await?;

    let mut buf = [0u8; RESPONSE_BUFFER_LEN];
    socket.recv(&mut buf).await?;
    Ok(true)
}

/// Подключиться, отправить пакет и дождаться хотя бы одного байта
async fn tcp_exchange(target: SocketAddr, packet: Bytes) -> io::Result<bool> {
    let mut stream = TcpStream::connect(target).await?;
    stream.write_all(&packet).await?;

    let mut buf = [0u8; RESPONSE_BUFFER_LEN];
    let n = stream.read(&mut buf).await?;
    Ok(n > 0)
}

/// Проверка IKEv2 (UDP 500/4500)
pub struct IkeChecker {
    ports: Vec<u16>,
    timeout: Duration,
    registry: Arc<ProbeRegistry>,
}

impl IkeChecker {
    /// Создать проверку
    pub fn new(ports: Vec<u16>, timeout: Duration, registry: Arc<ProbeRegistry>) -> Self {
        Self {
            ports,
            timeout,
            registry,
        }
    }
}

#[async_trait]
impl AvailabilityChecker for IkeChecker {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::Ike
    }

    fn default_ports(&self) -> &[u16] {
        &self.ports
    }

    async fn ping(&self, ip: IpAddr, port: u16) -> bool {
        debug!("Проверка IKEv2 на {}:{}", ip, port);
        let target = SocketAddr::new(ip, port);
        let received = self
            .registry
            .run(self.timeout, udp_exchange(target, ike_sa_init(port)))
            .await;
        debug!("IKEv2 {}доступен на {}:{}", if received { "" } else { "не" }, ip, port);
        received
    }
}

/// Проверка OpenVPN (UDP или TCP)
pub struct OpenVpnChecker {
    transport: OpenVpnTransport,
    packet: Bytes,
    ports: Vec<u16>,
    timeout: Duration,
    registry: Arc<ProbeRegistry>,
}

impl OpenVpnChecker {
    /// Создать проверку; пакет строится один раз
    pub fn new(
        transport: OpenVpnTransport,
        static_key: &str,
        ports: Vec<u16>,
        timeout: Duration,
        registry: Arc<ProbeRegistry>,
    ) -> Result<Self> {
        let packet = OpenVpnHandshake::from_static_key(static_key)?.packet(transport);
        Ok(Self {
            transport,
            packet,
            ports,
            timeout,
            registry,
        })
    }
}

#[async_trait]
impl AvailabilityChecker for OpenVpnChecker {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::OpenVpn(self.transport)
    }

    fn default_ports(&self) -> &[u16] {
        &self.ports
    }

    async fn ping(&self, ip: IpAddr, port: u16) -> bool {
        let protocol = self.protocol();
        debug!("Проверка {} на {}:{}", protocol, ip, port);

        let target = SocketAddr::new(ip, port);
        let packet = self.packet.clone();
        let received = match self.transport {
            OpenVpnTransport::Udp => self.registry.run(self.timeout, udp_exchange(target, packet)).await,
            OpenVpnTransport::Tcp => self.registry.run(self.timeout, tcp_exchange(target, packet)).await,
        };

        debug!("{} {}доступен на {}:{}", protocol, if received { "" } else { "не" }, ip, port);
        received
    }
}

/// Проверки для всех транспортов с общим реестром
pub fn default_checkers(config: &ProbeConfig) -> Result<Vec<Arc<dyn AvailabilityChecker>>> {
    let registry = Arc::new(ProbeRegistry::new());
    let mut checkers: Vec<Arc<dyn AvailabilityChecker>> = Vec::with_capacity(3);

    checkers.push(Arc::new(IkeChecker::new(
        config.ike_ports.clone(),
        config.timeout,
        Arc::clone(&registry),
    )));

    for transport in [OpenVpnTransport::Udp, OpenVpnTransport::Tcp] {
        let protocol = VpnProtocol::OpenVpn(transport);
        checkers.push(Arc::new(OpenVpnChecker::new(
            transport,
            &config.openvpn_static_key,
            config.ports(protocol).to_vec(),
            config.timeout,
            Arc::clone(&registry),
        )?));
    }

    Ok(checkers)
}

fn shuffled(ports: &[u16]) -> Vec<u16> {
    let mut ports = ports.to_vec();
    ports.shuffle(&mut rand::thread_rng());
    ports
}

/// Проверить все порты параллельно и дождаться всех результатов
pub async fn check_availability(
    checker: Arc<dyn AvailabilityChecker>,
    ip: IpAddr,
    ports: &[u16],
) -> ProtocolProbeResult {
    debug!("Проверка доступности {} для {}", checker.protocol(), ip);

    let mut pings = JoinSet::new();
    for port in shuffled(ports) {
        let checker = Arc::clone(&checker);
        pings.spawn(async move { (port, checker.ping(ip, port).await) });
    }

    let mut available = Vec::new();
    while let Some(joined) = pings.join_next().await {
        if let Ok((port, true)) = joined {
            available.push(port);
        }
    }

    if available.is_empty() {
        ProtocolProbeResult::Unavailable
    } else {
        ProtocolProbeResult::Available(available)
    }
}

/// Первый ответивший порт
///
/// Остальные проверки прерываются, как только найден победитель.
pub async fn first_responding_port(
    checker: Arc<dyn AvailabilityChecker>,
    ip: IpAddr,
    ports: &[u16],
) -> Option<u16> {
    debug!("Поиск рабочего порта {} для {}", checker.protocol(), ip);

    let mut pings = JoinSet::new();
    for port in shuffled(ports) {
        let checker = Arc::clone(&checker);
        pings.spawn(async move { (port, checker.ping(ip, port).await) });
    }

    while let Some(joined) = pings.join_next().await {
        if let Ok((port, true)) = joined {
            debug!("Первым ответил порт {} ({})", port, checker.protocol());
            pings.abort_all();
            return Some(port);
        }
    }

    debug!("Ни один порт {} не ответил для {}", checker.protocol(), ip);
    None
}
