use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::listen;
use crate::sink::StatsSink;
use crate::wire::parse::LineParser;

/// Agent orchestrates the listeners and the aggregation sink.
pub struct Agent {
    cfg: Config,
    sink: Option<StatsSink>,
    udp_addr: Option<SocketAddr>,
    cancel: CancellationToken,
}

impl Agent {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            sink: None,
            udp_addr: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Binds the sockets, starts the sink task, and spawns the listeners.
    ///
    /// A bind failure is fatal.
    pub async fn start(&mut self) -> Result<()> {
        let udp = UdpSocket::bind(&self.cfg.address)
            .await
            .with_context(|| format!("binding UDP listener on {}", self.cfg.address))?;
        let udp_addr = udp.local_addr().context("reading UDP local address")?;
        info!(address = %udp_addr, "listening for UDP metrics");
        self.udp_addr = Some(udp_addr);

        let tcp = if self.cfg.tcp_address.is_empty() {
            None
        } else {
            let listener = TcpListener::bind(&self.cfg.tcp_address)
                .await
                .with_context(|| format!("binding TCP listener on {}", self.cfg.tcp_address))?;
            info!(address = %self.cfg.tcp_address, "listening for TCP metrics");
            Some(listener)
        };

        let (mut sink, obs_tx) = StatsSink::new(&self.cfg);
        sink.start(self.cancel.child_token())
            .await
            .context("starting stats sink")?;

        let parser = LineParser::new(&self.cfg.prefix, &self.cfg.postfix);

        tokio::spawn(listen::run_udp(
            udp,
            self.cfg.max_udp_packet_size,
            parser.clone(),
            obs_tx.clone(),
            self.cancel.child_token(),
        ));

        if let Some(listener) = tcp {
            tokio::spawn(listen::run_tcp(
                listener,
                parser,
                obs_tx,
                self.cancel.child_token(),
            ));
        }

        self.sink = Some(sink);

        info!("agent fully started");

        Ok(())
    }

    /// Cancels all tasks and waits for the sink's final flush.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(sink) = &self.sink {
            sink.wait_for_shutdown().await;
        }

        info!("agent stopped");

        Ok(())
    }

    /// Local address of the bound UDP socket, once started.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }
}
