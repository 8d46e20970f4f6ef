//! Background tasks that keep a link healthy. Both need a tokio runtime.

use crate::domain::device::ConnectionState;
use crate::domain::settings::LinkSettings;
use crate::error::LinkError;
use crate::infrastructure::bluetooth::service::ServoLink;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const CONNECT_TIMEOUT_MESSAGE: &str = "Connection attempt timed out";

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Send a heartbeat every `every` while the link is connected.
///
/// The task keeps only a weak reference and exits once every other owner
/// has dropped `link`. Send failures are logged and the task keeps going.
pub fn spawn_heartbeat(link: Arc<ServoLink>, every: Duration) -> JoinHandle<()> {
    let link = Arc::downgrade(&link);
    let every = every.max(MIN_HEARTBEAT_INTERVAL);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(link) = link.upgrade() else {
                debug!("Link dropped, stopping heartbeat");
                break;
            };
            if link.state() != ConnectionState::Connected {
                continue;
            }
            if let Err(e) = link.send_heartbeat() {
                warn!("Heartbeat failed: {}", e);
            }
        }
    })
}

/// Give up on a connect attempt that is still pending after `after`.
///
/// Resolves to `true` if the attempt was aborted. The link then reports
/// [`ConnectionState::Error`] with [`CONNECT_TIMEOUT_MESSAGE`]. A link that
/// finished connecting in the meantime is left alone.
pub fn spawn_connect_deadline(link: Arc<ServoLink>, after: Duration) -> JoinHandle<bool> {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;

        let aborted = link.manager().abort_connect(CONNECT_TIMEOUT_MESSAGE);
        if aborted {
            warn!("Connection attempt timed out after {:?}", after);
        }
        aborted
    })
}

/// Tasks started by [`start`].
pub struct Keepalive {
    pub heartbeat: JoinHandle<()>,
    pub connect_deadline: Option<JoinHandle<bool>>,
}

impl Keepalive {
    pub fn stop(self) {
        self.heartbeat.abort();
        if let Some(deadline) = self.connect_deadline {
            deadline.abort();
        }
    }
}

/// Apply `settings` to an initialized link.
///
/// Starts the heartbeat at `heartbeat_interval_ms`. If
/// `auto_connect_address` is set, connects to it and bounds the attempt by
/// `connect_timeout_ms`. A refused connect is returned and starts nothing.
pub fn start(link: &Arc<ServoLink>, settings: &LinkSettings) -> Result<Keepalive, LinkError> {
    let connect_deadline = match settings.auto_connect_address.as_deref() {
        Some(address) => {
            info!("Auto-connecting to {}", address);
            link.connect(address)?;
            settings
                .connect_timeout()
                .map(|after| spawn_connect_deadline(link.clone(), after))
        }
        None => None,
    };

    Ok(Keepalive {
        heartbeat: spawn_heartbeat(link.clone(), settings.heartbeat_interval()),
        connect_deadline,
    })
}
