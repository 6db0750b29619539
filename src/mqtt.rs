//! MQTT publisher
//!
//! Thin wrapper over rumqttc. The event loop runs on its own task and owns
//! connection keep-alive; this module only exposes synchronous-feeling
//! publish calls to the monitor loop. The last-will availability message is
//! registered before connecting so an unexpected crash still marks the
//! sensor offline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, Key, LastWill, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tracing::{debug, error, info};

use crate::config::MqttConfig;
use crate::error::{GmcSrvError, Result};
use crate::reading::Reading;

const AVAILABILITY_ONLINE: &str = "online";
const AVAILABILITY_OFFLINE: &str = "offline";

pub struct MqttPublisher {
    config: MqttConfig,
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn qos(&self) -> QoS {
        match self.config.qos {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }

    /// Connect to the broker and wait for the first ConnAck.
    ///
    /// Initial connection failure is surfaced to the caller, which treats it
    /// as fatal; after this point the event loop reconnects on its own.
    pub async fn connect(&mut self) -> Result<()> {
        let mut options = MqttOptions::new(
            &self.config.client_id,
            &self.config.broker,
            self.config.port,
        );

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username, password);
        }

        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        // Register the last will before connecting so a crash is observable
        options.set_last_will(LastWill::new(
            &self.config.availability_topic,
            AVAILABILITY_OFFLINE,
            self.qos(),
            true,
        ));

        if self.config.use_ssl {
            options.set_transport(Transport::Tls(tls_configuration(&self.config)?));
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        // Fail fast on the first connection attempt
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(other) => {
                    debug!("MQTT event before ConnAck: {other:?}");
                }
                Err(e) => {
                    return Err(GmcSrvError::MqttError(format!(
                        "Initial broker connection failed: {e}"
                    )));
                }
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        self.client = Some(client);

        // Hand the event loop its own task for keep-alive and reconnects
        let connected = self.connected.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(notification) => {
                        if matches!(notification, Event::Incoming(Packet::ConnAck(_))) {
                            connected.store(true, Ordering::SeqCst);
                        }
                        debug!("MQTT event: {notification:?}");
                    }
                    Err(e) => {
                        error!("MQTT connection error: {e:?}");
                        connected.store(false, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        info!(
            "Connected to MQTT broker at {}:{}",
            self.config.broker, self.config.port
        );
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn client(&self) -> Result<&AsyncClient> {
        self.client
            .as_ref()
            .ok_or_else(|| GmcSrvError::MqttError("MQTT client not initialized".to_string()))
    }

    /// Publish the retained availability flag
    pub async fn publish_availability(&self, online: bool) -> Result<()> {
        let payload = if online {
            AVAILABILITY_ONLINE
        } else {
            AVAILABILITY_OFFLINE
        };
        self.client()?
            .publish(&self.config.availability_topic, self.qos(), true, payload)
            .await?;
        debug!("Published availability: {payload}");
        Ok(())
    }

    /// Publish the retained state payload for one reading
    pub async fn publish_state(&self, reading: &Reading) -> Result<()> {
        let payload = serde_json::to_string(&reading.state_payload())
            .map_err(|e| GmcSrvError::MqttError(format!("State serialization failed: {e}")))?;
        self.client()?
            .publish(self.config.state_topic(), self.qos(), true, payload)
            .await?;
        debug!("Published state to {}", self.config.state_topic());
        Ok(())
    }

    /// Publish an arbitrary retained JSON document (discovery configs)
    pub async fn publish_retained_json(&self, topic: &str, value: &serde_json::Value) -> Result<()> {
        self.client()?
            .publish(topic, self.qos(), true, value.to_string())
            .await?;
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(client) = &self.client {
            if let Err(e) = client.disconnect().await {
                error!("Error disconnecting from MQTT broker: {e:?}");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        self.client = None;
        Ok(())
    }
}

/// Accepts any server certificate. Only reachable through the `insecure`
/// config flag, intended for test brokers with self-signed certificates.
struct NoVerifier;

impl rustls::client::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

/// Build the TLS transport configuration from the mqtt config section.
///
/// With `insecure` set, certificate and hostname verification are skipped
/// entirely; otherwise a CA certificate is required and client certificates
/// are attached when both cert and key files are configured.
fn tls_configuration(config: &MqttConfig) -> Result<TlsConfiguration> {
    if config.insecure {
        let client_config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();
        return Ok(TlsConfiguration::Rustls(Arc::new(client_config)));
    }

    let Some(ca_path) = &config.ca_cert else {
        return Err(GmcSrvError::MqttError(
            "SSL is enabled but no CA certificate is provided".to_string(),
        ));
    };
    let ca = std::fs::read(ca_path)
        .map_err(|e| GmcSrvError::MqttError(format!("Failed to read CA cert: {e}")))?;

    let client_auth = match (&config.cert_file, &config.key_file) {
        (Some(cert), Some(key)) => {
            let cert = std::fs::read(cert)
                .map_err(|e| GmcSrvError::MqttError(format!("Failed to read client cert: {e}")))?;
            let key = std::fs::read(key)
                .map_err(|e| GmcSrvError::MqttError(format!("Failed to read client key: {e}")))?;
            Some((cert, Key::RSA(key)))
        }
        _ => None,
    };

    Ok(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        let mut config = MqttConfig::default();
        config.qos = 0;
        assert_eq!(MqttPublisher::new(config.clone()).qos(), QoS::AtMostOnce);
        config.qos = 1;
        assert_eq!(MqttPublisher::new(config.clone()).qos(), QoS::AtLeastOnce);
        config.qos = 2;
        assert_eq!(MqttPublisher::new(config.clone()).qos(), QoS::ExactlyOnce);
        // Out-of-range values degrade to QoS 0
        config.qos = 9;
        assert_eq!(MqttPublisher::new(config).qos(), QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        let publisher = MqttPublisher::new(MqttConfig::default());
        assert!(!publisher.is_connected());
        assert!(publisher.publish_availability(true).await.is_err());
    }

    #[test]
    fn test_tls_requires_ca_certificate() {
        let mut config = MqttConfig::default();
        config.use_ssl = true;
        assert!(tls_configuration(&config).is_err());
    }

    #[test]
    fn test_tls_insecure_skips_verification() {
        let mut config = MqttConfig::default();
        config.use_ssl = true;
        config.insecure = true;
        // No CA needed when verification is disabled
        let tls = tls_configuration(&config).unwrap();
        assert!(matches!(tls, TlsConfiguration::Rustls(_)));
    }

    #[test]
    fn test_tls_with_ca_uses_simple_configuration() {
        use std::io::Write;

        let mut ca_file = tempfile::NamedTempFile::new().unwrap();
        ca_file.write_all(b"dummy pem").unwrap();

        let mut config = MqttConfig::default();
        config.use_ssl = true;
        config.ca_cert = Some(ca_file.path().to_string_lossy().into_owned());
        let tls = tls_configuration(&config).unwrap();
        match tls {
            TlsConfiguration::Simple { ca, client_auth, .. } => {
                assert_eq!(ca, b"dummy pem");
                assert!(client_auth.is_none());
            }
            _ => panic!("Expected Simple TLS configuration"),
        }
    }
}
