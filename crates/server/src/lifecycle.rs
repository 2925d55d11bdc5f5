//! Server lifecycle: listener selection, signal handling, graceful
//! shutdown, and configuration reload.
//!
//! Listener selection, first match wins:
//! 1. `listen == "systemd"` - inherit the socket from systemd activation.
//! 2. `listen` is an absolute path - a UNIX domain socket, unlinked on
//!    shutdown.
//! 3. Otherwise - a TCP bind, wrapped in TLS when `https` and a
//!    certificate pair are configured.
//!
//! SIGHUP reloads configuration from the environment and drops the request
//! cache without interrupting running connections. SIGINT/SIGTERM/SIGQUIT
//! begin a graceful shutdown bounded by the configured timeout.

use crate::state::AppState;
use axum::Router;
use postbox_core::AppConfig;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, UnixListener};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls;

/// File descriptor passed by systemd socket activation.
const SYSTEMD_FD_START: i32 = 3;

/// The bound listener, by transport.
pub enum BoundListener {
    Tcp(TcpListener),
    Tls(TlsListener),
    Unix(UnixListener, PathBuf),
}

impl BoundListener {
    pub fn describe(&self) -> String {
        match self {
            BoundListener::Tcp(l) => match l.local_addr() {
                Ok(addr) => format!("{addr} [HTTP]"),
                Err(_) => "tcp [HTTP]".to_string(),
            },
            BoundListener::Tls(l) => match l.inner.local_addr() {
                Ok(addr) => format!("{addr} [HTTPS]"),
                Err(_) => "tcp [HTTPS]".to_string(),
            },
            BoundListener::Unix(_, path) => format!("{} [socket]", path.display()),
        }
    }
}

/// Select and bind the listener for the given configuration.
pub async fn bind(config: &AppConfig) -> io::Result<BoundListener> {
    if config.listen == "systemd" {
        let std_listener = systemd_listener()?;
        std_listener.set_nonblocking(true)?;
        return Ok(BoundListener::Tcp(TcpListener::from_std(std_listener)?));
    }
    if config.listen.starts_with('/') {
        let path = PathBuf::from(&config.listen);
        // A stale socket file from a previous run would fail the bind.
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        return Ok(BoundListener::Unix(listener, path));
    }

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("bad listen address: {e}")))?;
    let tcp = TcpListener::bind(addr).await?;

    if config.https {
        if config.tls_ready() {
            let tls_config = load_tls_config(config)?;
            return Ok(BoundListener::Tls(TlsListener {
                inner: tcp,
                acceptor: TlsAcceptor::from(Arc::new(tls_config)),
            }));
        }
        tracing::warn!("HTTPS requested without a certificate pair, serving plain HTTP");
    }
    Ok(BoundListener::Tcp(tcp))
}

/// Adopt the first file descriptor passed by the systemd activation
/// protocol.
fn systemd_listener() -> io::Result<std::net::TcpListener> {
    use std::os::fd::FromRawFd;

    if let Ok(pid) = std::env::var("LISTEN_PID") {
        if pid.parse::<u32>().ok() != Some(std::process::id()) {
            return Err(io::Error::other("LISTEN_PID does not name this process"));
        }
    }
    let fds: i32 = std::env::var("LISTEN_FDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if fds < 1 {
        return Err(io::Error::other("no sockets passed by systemd (LISTEN_FDS)"));
    }
    // SAFETY: under socket activation fd 3 is a listening socket owned by
    // this process and not used anywhere else.
    Ok(unsafe { std::net::TcpListener::from_raw_fd(SYSTEMD_FD_START) })
}

fn load_tls_config(config: &AppConfig) -> io::Result<rustls::ServerConfig> {
    let cert_path = config.cert_path.as_ref().expect("checked by tls_ready");
    let key_path = config.key_path.as_ref().expect("checked by tls_ready");

    let certs = rustls_pemfile::certs(&mut io::BufReader::new(std::fs::File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut io::BufReader::new(std::fs::File::open(key_path)?))?
        .ok_or_else(|| io::Error::other(format!("no private key in {}", key_path.display())))?;

    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::other(format!("bad certificate pair: {e}")))?;
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(tls_config)
}

/// A TCP listener wrapped in TLS. Handshake failures are logged and the
/// accept loop continues.
pub struct TlsListener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
}

impl axum::serve::Listener for TlsListener {
    type Io = tokio_rustls::server::TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok((stream, addr)) => match self.acceptor.accept(stream).await {
                    Ok(tls) => return (tls, addr),
                    Err(e) => {
                        tracing::debug!(peer = %addr, error = %e, "TLS handshake failed");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

/// Run the server on the bound listener until a termination signal,
/// then drain within the configured budget.
pub async fn serve(listener: BoundListener, state: AppState, router: Router) -> io::Result<()> {
    let config = state.config();
    let shutdown_budget = config.time_out();
    tracing::info!(
        listen = %listener.describe(),
        base_url = %config.base_url,
        "started"
    );

    let stop = Arc::new(Notify::new());
    spawn_signal_task(state.clone(), stop.clone());

    let graceful = {
        let stop = stop.clone();
        async move { stop.notified().await }
    };

    let socket_path = match &listener {
        BoundListener::Unix(_, path) => Some(path.clone()),
        _ => None,
    };

    let mut server = tokio::spawn(async move {
        match listener {
            BoundListener::Tcp(l) => {
                axum::serve(l, router.into_make_service())
                    .with_graceful_shutdown(graceful)
                    .await
            }
            BoundListener::Tls(l) => {
                axum::serve(l, router.into_make_service())
                    .with_graceful_shutdown(graceful)
                    .await
            }
            BoundListener::Unix(l, _) => {
                axum::serve(l, router.into_make_service())
                    .with_graceful_shutdown(graceful)
                    .await
            }
        }
    });

    let drain = stop.notified();
    tokio::select! {
        // The server only returns on its own for a fatal accept error.
        result = &mut server => {
            result.map_err(io::Error::other)??;
        }
        _ = drain => {
            // Stop background workers, then drain in-flight requests
            // bounded by the shutdown budget.
            let _ = state.shutdown.send(true);
            match tokio::time::timeout(shutdown_budget, &mut server).await {
                Ok(result) => result.map_err(io::Error::other)??,
                Err(_) => {
                    tracing::warn!(
                        budget_secs = shutdown_budget.as_secs(),
                        "shutdown budget exceeded, force closing"
                    );
                    server.abort();
                }
            }
        }
    }

    if let Some(path) = socket_path {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "could not remove socket file");
        }
    }
    tracing::info!("shutting down");
    Ok(())
}

/// SIGHUP reloads; SIGINT/SIGTERM/SIGQUIT notify the graceful shutdown.
fn spawn_signal_task(state: AppState, stop: Arc<Notify>) {
    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "cannot subscribe to SIGHUP");
                return;
            }
        };
        let mut interrupt = signal(SignalKind::interrupt()).expect("SIGINT subscription");
        let mut terminate = signal(SignalKind::terminate()).expect("SIGTERM subscription");
        let mut quit = signal(SignalKind::quit()).expect("SIGQUIT subscription");
        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    tracing::info!("SIGHUP received, reloading configuration");
                    match AppConfig::load(None) {
                        Ok(config) => state.reload(config),
                        Err(e) => tracing::error!(error = %e, "reload failed, keeping previous configuration"),
                    }
                }
                _ = interrupt.recv() => {
                    tracing::info!("SIGINT received, stopping");
                    break;
                }
                _ = terminate.recv() => {
                    tracing::info!("SIGTERM received, stopping");
                    break;
                }
                _ = quit.recv() => {
                    tracing::info!("SIGQUIT received, stopping");
                    break;
                }
            }
        }
        stop.notify_waiters();
    });
}
