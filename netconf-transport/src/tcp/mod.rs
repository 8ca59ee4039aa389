use std::{io, net::SocketAddr, time::Duration};

use tokio::net::TcpStream;

use crate::Transport;

/// The standard NETCONF-over-SSH port. Plain TCP deployments (lab devices, SSH
/// port forwards) commonly reuse it.
pub const DEFAULT_PORT: u16 = 830;

#[derive(Debug, Clone)]
pub struct Config {
    /// Sets `TCP_NODELAY` on new streams.
    pub nodelay: bool,
    /// Gives up connecting after this long. `None` waits for the OS.
    pub connect_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodelay: true,
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// NETCONF over a plain TCP stream.
#[derive(Debug, Default, Clone)]
pub struct Tcp {
    config: Config,
}

impl Tcp {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[async_trait::async_trait]
impl Transport for Tcp {
    type Addr = SocketAddr;
    type Io = TcpStream;
    type Error = io::Error;

    async fn connect(&self, addr: SocketAddr) -> Result<Self::Io, Self::Error> {
        let connect = TcpStream::connect(addr);
        let stream = match self.config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??,
            None => connect.await?,
        };

        stream.set_nodelay(self.config.nodelay)?;
        tracing::debug!(%addr, "Connected");

        Ok(stream)
    }
}
