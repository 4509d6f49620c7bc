//! Process entry point: binds the SOCKS5 and HTTP CONNECT front-ends on
//! loopback, accepts connections under a concurrency cap, and relays each
//! one through an authenticated tunnel session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use secure_proxy_core::config::Config;
use secure_proxy_core::error::{FrontEndError, TunnelError};
use secure_proxy_core::stats::Stats;
use secure_proxy_core::wsclient::WsDialConfig;
use secure_proxy_core::{httpconnect, relay, session, socks5};
use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const PROXY_ENV_VARS: [&str; 8] = [
    "HTTP_PROXY",
    "http_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "ALL_PROXY",
    "all_proxy",
    "NO_PROXY",
    "no_proxy",
];

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    clear_inherited_proxy_env();
    raise_fd_limit();

    let config = match Config::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let stats = Arc::new(Stats::new());
    spawn_stats_reporter(stats.clone());

    let ws_cfg = Arc::new(WsDialConfig {
        sni_host: config.sni_host.clone(),
        server_port: config.server_port,
        path: config.path.clone(),
        connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
        max_frame_size: config.max_frame_size,
    });

    let socks_addr: SocketAddr = ([127, 0, 0, 1], config.socks_port).into();
    let http_addr: SocketAddr = ([127, 0, 0, 1], config.http_port).into();

    let socks_listener = match bind_listener(socks_addr, config.backlog) {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %socks_addr, error = %e, "failed to bind SOCKS5 listener");
            std::process::exit(1);
        }
    };
    let http_listener = match bind_listener(http_addr, config.backlog) {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %http_addr, error = %e, "failed to bind HTTP CONNECT listener");
            std::process::exit(1);
        }
    };
    info!(%socks_addr, %http_addr, "listening");

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_connections));
    let own_addrs = [socks_addr, http_addr];

    let socks_task = tokio::spawn(accept_loop(
        socks_listener,
        FrontEnd::Socks5,
        config.clone(),
        ws_cfg.clone(),
        semaphore.clone(),
        stats.clone(),
        own_addrs,
    ));
    let http_task = tokio::spawn(accept_loop(
        http_listener,
        FrontEnd::HttpConnect,
        config.clone(),
        ws_cfg.clone(),
        semaphore.clone(),
        stats.clone(),
        own_addrs,
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining connections");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        _ = socks_task => {}
        _ = http_task => {}
    }
}

#[derive(Clone, Copy)]
enum FrontEnd {
    Socks5,
    HttpConnect,
}

async fn accept_loop(
    listener: TcpListener,
    front_end: FrontEnd,
    config: Arc<Config>,
    ws_cfg: Arc<WsDialConfig>,
    semaphore: Arc<Semaphore>,
    stats: Arc<Stats>,
    own_addrs: [SocketAddr; 2],
) {
    loop {
        let (client, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        tune_client_socket(&client);

        // Over-cap accepts wait for a permit rather than being dropped: a
        // momentary burst just queues here instead of losing connections.
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");

        let config = config.clone();
        let ws_cfg = ws_cfg.clone();
        let stats = stats.clone();
        stats.connection_opened();

        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handle_client(client, front_end, &config, &ws_cfg, &own_addrs).await {
                warn!(%peer, error = %e, "connection ended with error");
                stats.record_error();
            }
            stats.connection_closed();
        });
    }
}

async fn handle_client(
    mut client: TcpStream,
    front_end: FrontEnd,
    config: &Config,
    ws_cfg: &WsDialConfig,
    own_addrs: &[SocketAddr; 2],
) -> Result<(), TunnelError> {
    let deadline = Duration::from_millis(config.parse_timeout_ms);

    let target = match front_end {
        FrontEnd::Socks5 => match socks5::negotiate(&mut client, deadline).await {
            Ok(t) => t,
            Err(e) => return Err(front_end_error(e)),
        },
        FrontEnd::HttpConnect => match httpconnect::negotiate(&mut client, deadline).await {
            Ok(t) => t,
            Err(e) => return Err(front_end_error(e)),
        },
    };

    if targets_own_listener(&target, own_addrs) {
        reply_failure(&mut client, front_end).await;
        return Err(TunnelError::LoopRejected);
    }

    let mut sess = match session::open(&config.pre_shared_key, ws_cfg, &target, config.retry_attempts).await {
        Ok(s) => s,
        Err(e) => {
            reply_failure(&mut client, front_end).await;
            return Err(e);
        }
    };

    reply_success(&mut client, front_end).await;
    relay::run(&mut client, &mut sess, config.buffer_size).await;
    Ok(())
}

fn front_end_error(e: FrontEndError) -> TunnelError {
    TunnelError::ProtocolError(e.to_string())
}

async fn reply_success(client: &mut TcpStream, front_end: FrontEnd) {
    let result = match front_end {
        FrontEnd::Socks5 => socks5::write_success(client).await,
        FrontEnd::HttpConnect => httpconnect::write_success(client).await,
    };
    if let Err(e) = result {
        warn!(error = %e, "failed to write success reply");
    }
}

async fn reply_failure(client: &mut TcpStream, front_end: FrontEnd) {
    let result = match front_end {
        FrontEnd::Socks5 => socks5::write_failure(client).await,
        FrontEnd::HttpConnect => httpconnect::write_failure(client).await,
    };
    if let Err(e) = result {
        warn!(error = %e, "failed to write failure reply");
    }
}

fn targets_own_listener(target: &str, own_addrs: &[SocketAddr; 2]) -> bool {
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return own_addrs.contains(&addr);
    }
    // `target` may name the loopback host without an IP literal, e.g.
    // "localhost:1080"; match that against our own ports too.
    let Some((host, port)) = target.rsplit_once(':') else {
        return false;
    };
    let Ok(port) = port.parse::<u16>() else {
        return false;
    };
    let is_loopback_host = host == "localhost" || host == "127.0.0.1" || host == "::1";
    is_loopback_host && own_addrs.iter().any(|a| a.port() == port)
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    TcpListener::from_std(socket.into())
}

fn tune_client_socket(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock_ref = socket2::SockRef::from(stream);
    let _ = sock_ref.set_keepalive(true);
    let _ = sock_ref.set_tcp_keepalive(
        &socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(60))
            .with_interval(Duration::from_secs(10))
            .with_retries(3),
    );
}

/// Drop any proxy environment variables inherited from the parent process
/// before opening the listeners, so this process never routes its own
/// tunnel dial through itself.
fn clear_inherited_proxy_env() {
    for var in PROXY_ENV_VARS {
        if std::env::var_os(var).is_some() {
            warn!(%var, "clearing inherited proxy environment variable");
            std::env::remove_var(var);
        }
    }
}

/// Best-effort attempt to raise the soft file-descriptor limit; a failure
/// here just means fewer concurrent connections are possible, not that
/// startup should abort.
fn raise_fd_limit() {
    match rlimit::increase_nofile_limit(10_240) {
        Ok(limit) => info!(limit, "raised file descriptor limit"),
        Err(e) => warn!(error = %e, "failed to raise file descriptor limit"),
    }
}

fn spawn_stats_reporter(stats: Arc<Stats>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            let snap = stats.snapshot();
            info!(
                active = snap.active_connections,
                total = snap.total_connections,
                bytes_sent = snap.bytes_sent,
                bytes_received = snap.bytes_received,
                errors = snap.errors,
                "stats"
            );
        }
    });
}
