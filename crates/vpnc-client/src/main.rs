//! VPNC Client CLI
//!
//! Диагностика оркестрации подключения: проверка транспортов и
//! офлайн выбор сервера по каталогу.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vpnc_client::{ClientConfig, SelectionContext, SelectionOutcome, ServerSelector};
use vpnc_core::{
    AppState, ConnectionProtocol, ConnectionRequest, ConnectionRequestType, CountryConnectionRequestType,
    NetShieldType, OpenVpnTransport, ServerCatalog, ServerModel, ServerType, VpnProtocol,
};
use vpnc_probe::{SmartProtocol, SmartProtocolSelector};

/// Аргументы командной строки
#[derive(Parser, Debug)]
#[command(name = "vpnc")]
#[command(about = "VPN connection orchestration toolkit", long_about = None)]
struct Args {
    /// Путь к конфигурационному файлу
    #[arg(short, long, default_value = "vpnc.toml")]
    config: PathBuf,

    /// Уровень логирования (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Подкоманды
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Генерация конфигурации по умолчанию
    GenerateConfig {
        /// Путь для сохранения
        #[arg(short, long, default_value = "vpnc.toml")]
        output: PathBuf,
    },

    /// Проверить доступность транспортов на адресе
    Probe {
        /// Адрес сервера
        #[arg(long)]
        host: IpAddr,

        /// Проверить только один протокол
        #[arg(long, value_enum)]
        protocol: Option<ProtocolArg>,
    },

    /// Выбрать сервер по каталогу
    Select {
        /// JSON файл со списком серверов
        #[arg(long)]
        catalog: PathBuf,

        /// Tier аккаунта
        #[arg(long, default_value_t = 0)]
        tier: i32,

        /// Код страны
        #[arg(long)]
        country: Option<String>,

        /// Случайный сервер вместо самого быстрого
        #[arg(long)]
        random: bool,

        /// Тип сервера
        #[arg(long, value_enum, default_value_t = ServerTypeArg::Standard)]
        server_type: ServerTypeArg,

        /// Сохранённый запрос подключения (JSON); заменяет флаги выбора
        #[arg(long)]
        request: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ProtocolArg {
    Ikev2,
    OpenvpnUdp,
    OpenvpnTcp,
}

impl From<ProtocolArg> for VpnProtocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Ikev2 => VpnProtocol::Ike,
            ProtocolArg::OpenvpnUdp => VpnProtocol::OpenVpn(OpenVpnTransport::Udp),
            ProtocolArg::OpenvpnTcp => VpnProtocol::OpenVpn(OpenVpnTransport::Tcp),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ServerTypeArg {
    Standard,
    SecureCore,
    P2p,
    Tor,
}

impl From<ServerTypeArg> for ServerType {
    fn from(arg: ServerTypeArg) -> Self {
        match arg {
            ServerTypeArg::Standard => ServerType::Standard,
            ServerTypeArg::SecureCore => ServerType::SecureCore,
            ServerTypeArg::P2p => ServerType::P2p,
            ServerTypeArg::Tor => ServerType::Tor,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Commands::GenerateConfig { output } = &args.command {
        if let Err(e) = generate_config(output) {
            eprintln!("Ошибка генерации конфигурации: {}", e);
            std::process::exit(1);
        }
        println!("Конфигурация сохранена в: {}", output.display());
        return;
    }

    let config = match load_config(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Ошибка загрузки конфигурации: {:#}", e);
            eprintln!("Проверьте файл: {}", args.config.display());
            std::process::exit(1);
        }
    };

    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    if let Err(e) = init_logging(&level) {
        eprintln!("Не удалось настроить логирование: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args.command, config).await {
        eprintln!("Ошибка: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Загрузить конфигурацию; без файла используются значения по умолчанию
fn load_config(path: &Path) -> anyhow::Result<ClientConfig> {
    if !path.exists() {
        return Ok(ClientConfig::default());
    }

    let config = ClientConfig::from_file(path)?;
    config.validate()?;
    Ok(config)
}

async fn run(command: Commands, config: ClientConfig) -> anyhow::Result<()> {
    match command {
        Commands::GenerateConfig { output } => generate_config(&output),
        Commands::Probe { host, protocol } => probe(&config, host, protocol.map(VpnProtocol::from)).await,
        Commands::Select {
            catalog,
            tier,
            country,
            random,
            server_type,
            request,
        } => {
            let request = match request {
                Some(path) => {
                    let document = std::fs::read_to_string(&path)
                        .with_context(|| format!("не удалось прочитать {}", path.display()))?;
                    ConnectionRequest::decode(&document)?
                }
                None => build_request(country, random, server_type.into(), &config)?,
            };
            select(&catalog, tier, &request)
        }
    }
}

async fn probe(config: &ClientConfig, host: IpAddr, protocol: Option<VpnProtocol>) -> anyhow::Result<()> {
    let selector = SmartProtocolSelector::from_config(&config.probe_config(), config.smart_protocol_config())?;

    info!("Проверка транспортов на {}", host);
    let (protocol, ports) = match protocol {
        Some(protocol) => (protocol, selector.select_ports(protocol, host).await),
        None => selector.determine_best_protocol(host).await,
    };

    if ports.is_empty() {
        warn!("Ни один порт не ответил");
    }
    println!("Протокол: {}", protocol);
    println!("Порты: {:?}", ports);
    Ok(())
}

fn build_request(
    country: Option<String>,
    random: bool,
    server_type: ServerType,
    config: &ClientConfig,
) -> anyhow::Result<ConnectionRequest> {
    let connection_type = match (country, random) {
        (Some(code), true) => ConnectionRequestType::country(code, CountryConnectionRequestType::Random)?,
        (Some(code), false) => ConnectionRequestType::country(code, CountryConnectionRequestType::Fastest)?,
        (None, true) => ConnectionRequestType::Random,
        (None, false) => ConnectionRequestType::Fastest,
    };

    let protocol = if config.smart_protocol.enabled {
        ConnectionProtocol::SmartProtocol
    } else {
        ConnectionProtocol::VpnProtocol(VpnProtocol::Ike)
    };

    Ok(ConnectionRequest::new(server_type, connection_type, protocol, NetShieldType::Off))
}

fn select(catalog_path: &Path, tier: i32, request: &ConnectionRequest) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(catalog_path)
        .with_context(|| format!("не удалось прочитать {}", catalog_path.display()))?;
    let servers: Vec<ServerModel> = serde_json::from_str(&content).context("каталог повреждён")?;
    info!("Загружено серверов: {}", servers.len());

    let catalog = ServerCatalog::new(servers, Utc::now());
    let selector = ServerSelector::new(SelectionContext {
        user_tier: tier,
        default_server_type: ServerType::Standard,
        app_state: AppState::Disconnected,
        connected_ip: None,
    });

    match selector.select(request, &catalog, &[]) {
        SelectionOutcome::Selected { server, server_type } => {
            println!("✓ Сервер: {} ({})", server.name, server.domain);
            println!("  Тип: {:?}, tier {}, оценка {:.2}, нагрузка {}%", server_type, server.tier, server.score, server.load);
        }
        SelectionOutcome::Unavailable { reason, server_type, .. } => {
            println!("Сервер недоступен ({:?}): {}", server_type, reason);
        }
        SelectionOutcome::NoCandidates => {
            println!("Подходящих серверов нет");
        }
    }
    Ok(())
}

/// Генерация конфигурации по умолчанию
fn generate_config(path: &Path) -> anyhow::Result<()> {
    let config = ClientConfig::default();
    config.to_file(path)?;
    Ok(())
}
