use std::net::SocketAddr;

use color_eyre::{eyre::WrapErr, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::info;

use crate::IngressConfig;

/// Bound ingress sockets. Binding is the only startup-fatal step.
pub struct IngressSockets {
    pub color: TcpListener,
    pub depth: UdpSocket,
}

/// Bind both ingress ports from configuration.
pub async fn bind_ingress(config: &IngressConfig) -> Result<IngressSockets> {
    let color_addr = socket_addr(&config.bind_host, config.color_port)?;
    let depth_addr = socket_addr(&config.bind_host, config.depth_port)?;

    let color = TcpListener::bind(color_addr)
        .await
        .wrap_err_with(|| format!("binding color stream listener on {color_addr}"))?;
    let depth = UdpSocket::bind(depth_addr)
        .await
        .wrap_err_with(|| format!("binding depth datagram socket on {depth_addr}"))?;

    info!("Color stream listening on {}", color.local_addr()?);
    info!("Depth datagrams listening on {}", depth.local_addr()?);
    Ok(IngressSockets { color, depth })
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .wrap_err_with(|| format!("invalid bind address {host}:{port}"))
}

/// Owner side of the stop signal.
pub struct ShutdownTrigger(watch::Sender<bool>);

/// Worker side of the stop signal. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), ShutdownSignal(rx))
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // No receivers left means nobody to stop
        let _ = self.0.send(true);
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once a stop is requested. A dropped trigger never fires.
    pub async fn wait(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
