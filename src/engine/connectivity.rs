//! Network attachment and cloud session bring-up
//!
//! Every report and OTA check goes through [`ConnectivityManager::ensure_connected`]
//! first. The sequence is bounded by the retry count so a dead network costs
//! a fixed amount of awake time before the cycle buffers and goes to sleep.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::devices::{CloudClient, NetworkManager};
use crate::settings::{SettingsStore, SettingsUpdate};

pub struct ConnectivityManager {
    network: Arc<dyn NetworkManager>,
    cloud: Arc<dyn CloudClient>,
    settings: Arc<dyn SettingsStore>,
    backoff: Duration,
}

impl ConnectivityManager {
    pub fn new(
        network: Arc<dyn NetworkManager>,
        cloud: Arc<dyn CloudClient>,
        settings: Arc<dyn SettingsStore>,
        backoff: Duration,
    ) -> Self {
        Self {
            network,
            cloud,
            settings,
            backoff,
        }
    }

    /// Bring up the data call and cloud session.
    ///
    /// Returns whether the session is live at the end. Failures are logged,
    /// never raised. At most `max_retries + 1` session connects are attempted.
    pub async fn ensure_connected(&self, max_retries: u32) -> bool {
        if !self.network.is_attached().await {
            debug!("Network not attached, reconnecting");
            self.redial().await;
        }

        if !self.network.sim_ready().await {
            warn!("SIM not ready, skipping connection");
            return false;
        }

        let mut attempt = 0;
        while !self.network.is_attached().await && attempt < max_retries {
            attempt += 1;
            debug!(attempt, "Network reattach");
            self.redial().await;
        }

        if !self.network.is_attached().await {
            warn!(retries = max_retries, "Network attach failed");
            return false;
        }

        if let Err(e) = self.network.sync_clock().await {
            warn!(error = %e, "Network time sync failed");
        }

        self.ensure_session(max_retries).await;
        self.cloud.session_live().await
    }

    async fn redial(&self) {
        if let Err(e) = self.network.reconnect().await {
            warn!(error = %e, "Network reconnect request failed");
        }
        self.network.wait_for_attach().await;
    }

    async fn ensure_session(&self, max_retries: u32) {
        let mut attempt = 0;
        loop {
            if self.cloud.session_live().await {
                return;
            }

            self.cloud.disconnect().await;
            match self.cloud.connect().await {
                Ok(()) => {
                    info!(attempt, "Cloud session connected");
                    self.save_rotated_credentials().await;
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Cloud connect failed");
                }
            }

            if attempt >= max_retries {
                return;
            }
            attempt += 1;
            tokio::time::sleep(self.backoff).await;
        }
    }

    /// Persist credentials the platform handed out during connect, if they changed
    async fn save_rotated_credentials(&self) {
        let Some(credentials) = self.cloud.credentials().await else {
            return;
        };

        let mut server = match self.settings.server() {
            Ok(server) => server,
            Err(e) => {
                warn!(error = %e, "Cannot read server settings, credentials not saved");
                return;
            }
        };
        if server.credentials == credentials {
            return;
        }

        server.credentials = credentials;
        match self.settings.save(SettingsUpdate::server(server)) {
            Ok(()) => info!("Rotated session credentials saved"),
            Err(e) => warn!(error = %e, "Failed to save rotated credentials"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{InMemorySettings, SessionCredentials};
    use crate::simulation::{CloudCall, SimCloud, SimNetwork};

    fn manager(
        network: Arc<SimNetwork>,
        cloud: Arc<SimCloud>,
        settings: Arc<InMemorySettings>,
    ) -> ConnectivityManager {
        ConnectivityManager::new(network, cloud, settings, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_connects_and_syncs_clock() {
        let network = Arc::new(SimNetwork::new(true));
        let cloud = Arc::new(SimCloud::new());
        let conn = manager(network.clone(), cloud.clone(), Arc::default());

        assert!(conn.ensure_connected(2).await);
        assert_eq!(cloud.connect_attempts(), 1);
        assert_eq!(network.clock_sync_count(), 1);
        assert_eq!(network.reconnect_count(), 0);
        assert_eq!(cloud.calls(), vec![CloudCall::Disconnect, CloudCall::Connect]);

        // Live session is reused
        assert!(conn.ensure_connected(2).await);
        assert_eq!(cloud.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_sim_not_ready_fails_without_connecting() {
        let network = Arc::new(SimNetwork::new(false));
        network.set_sim_ready(false);
        let cloud = Arc::new(SimCloud::new());
        let conn = manager(network.clone(), cloud.clone(), Arc::default());

        assert!(!conn.ensure_connected(2).await);
        assert_eq!(network.reconnect_count(), 1);
        assert_eq!(cloud.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_attach_retries_are_bounded() {
        let network = Arc::new(SimNetwork::new(false));
        network.set_attach_on_redial(false);
        let cloud = Arc::new(SimCloud::new());
        let conn = manager(network.clone(), cloud.clone(), Arc::default());

        assert!(!conn.ensure_connected(3).await);
        assert_eq!(network.reconnect_count(), 4);
        assert_eq!(network.clock_sync_count(), 0);
        assert_eq!(cloud.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_session_connect_attempts_bounded() {
        let network = Arc::new(SimNetwork::new(true));
        let cloud = Arc::new(SimCloud::new());
        cloud.set_reachable(false);
        let conn = manager(network, cloud.clone(), Arc::default());

        assert!(!conn.ensure_connected(2).await);
        assert_eq!(cloud.connect_attempts(), 3);

        assert!(!conn.ensure_connected(0).await);
        assert_eq!(cloud.connect_attempts(), 4);
    }

    #[tokio::test]
    async fn test_rotated_credentials_saved_only_when_changed() {
        let network = Arc::new(SimNetwork::new(true));
        let cloud = Arc::new(SimCloud::new());
        let settings = Arc::new(InMemorySettings::default());
        let conn = manager(network, cloud.clone(), settings.clone());

        let rotated = SessionCredentials {
            product_key: "pk".to_string(),
            product_secret: "ps".to_string(),
            device_name: "tracker-01".to_string(),
            device_secret: "fresh-secret".to_string(),
        };
        cloud.issue_credentials(rotated.clone());

        assert!(conn.ensure_connected(2).await);
        assert_eq!(settings.server().unwrap().credentials, rotated);

        // Same credentials again: stored section untouched
        let mut server = settings.server().unwrap();
        server.host = "edited.example".to_string();
        settings.save(SettingsUpdate::server(server)).unwrap();
        cloud.drop_session();
        assert!(conn.ensure_connected(2).await);
        assert_eq!(settings.server().unwrap().host, "edited.example");
    }

    #[tokio::test]
    async fn test_failed_connect_does_not_save_credentials() {
        let network = Arc::new(SimNetwork::new(true));
        let cloud = Arc::new(SimCloud::new());
        cloud.set_reachable(false);
        cloud.issue_credentials(SessionCredentials {
            device_secret: "never-used".to_string(),
            ..Default::default()
        });
        let settings = Arc::new(InMemorySettings::default());
        let conn = manager(network, cloud, settings.clone());

        assert!(!conn.ensure_connected(1).await);
        assert_eq!(settings.server().unwrap().credentials, SessionCredentials::default());
    }
}
