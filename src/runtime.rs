//! Process-wide runtime state
//!
//! Network sources resolve their protocol handler through a registry keyed by
//! URL scheme. The registry only answers after [`initialize`]; callers must not
//! rely on implicit initialisation on first use.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::source::{HttpMjpegConnector, RtpJpegConnector, StreamConnector};

#[derive(Default)]
struct Runtime {
    initialized: bool,
    connectors: HashMap<String, Arc<dyn StreamConnector>>,
}

impl Runtime {
    fn initialize(&mut self) -> bool {
        if self.initialized {
            return false;
        }
        let http: Arc<dyn StreamConnector> = Arc::new(HttpMjpegConnector);
        for (scheme, connector) in [
            ("http", Arc::clone(&http)),
            ("https", http),
            ("udp", Arc::new(RtpJpegConnector) as Arc<dyn StreamConnector>),
        ] {
            self.connectors.entry(scheme.to_string()).or_insert(connector);
        }
        self.initialized = true;
        true
    }

    fn shutdown(&mut self) -> bool {
        if !self.initialized {
            return false;
        }
        self.connectors.clear();
        self.initialized = false;
        true
    }

    fn register(&mut self, scheme: &str, connector: Arc<dyn StreamConnector>) {
        self.connectors.insert(scheme.to_ascii_lowercase(), connector);
    }

    fn connector_for(&self, url: &str) -> Result<Arc<dyn StreamConnector>> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| Error::Config(format!("not a stream URL: {}", url)))?;
        self.connectors
            .get(&scheme)
            .cloned()
            .ok_or_else(|| Error::Unsupported(format!("no connector for {}://", scheme)))
    }

    fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.connectors.keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

fn runtime() -> &'static Mutex<Runtime> {
    static RUNTIME: OnceLock<Mutex<Runtime>> = OnceLock::new();
    RUNTIME.get_or_init(|| Mutex::new(Runtime::default()))
}

/// Set up process-wide state and register the built-in connectors.
///
/// Idempotent; connectors registered beforehand are kept.
pub fn initialize() {
    let mut rt = runtime().lock();
    if rt.initialize() {
        info!(
            "vidrelay {} initialized, connectors: {}",
            version(),
            rt.schemes().join(", ")
        );
    }
}

/// Tear down process-wide state; a later [`initialize`] starts fresh
pub fn shutdown() {
    if runtime().lock().shutdown() {
        info!("vidrelay runtime shut down");
    }
}

pub fn is_initialized() -> bool {
    runtime().lock().initialized
}

/// Add or replace the connector for a URL scheme (e.g. `rtsp`)
pub fn register_connector(scheme: &str, connector: Arc<dyn StreamConnector>) {
    debug!("Registering connector for {}://", scheme);
    runtime().lock().register(scheme, connector);
}

/// Connector for the scheme of `url`
pub fn connector_for(url: &str) -> Result<Arc<dyn StreamConnector>> {
    runtime().lock().connector_for(url)
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkSourceConfig;
    use crate::source::MediaInput;

    struct Refusing;

    impl StreamConnector for Refusing {
        fn open(&self, config: &NetworkSourceConfig) -> Result<Box<dyn MediaInput>> {
            Err(Error::OpenFailed {
                locator: config.url.clone(),
                reason: "refused".into(),
            })
        }
    }

    #[test]
    fn test_lookup_requires_initialize() {
        let mut rt = Runtime::default();
        assert!(matches!(
            rt.connector_for("http://cam/stream"),
            Err(Error::NotInitialized)
        ));

        assert!(rt.initialize());
        assert!(!rt.initialize());
        assert!(rt.connector_for("HTTP://cam/stream").is_ok());
        assert!(rt.connector_for("udp://0.0.0.0:5004").is_ok());
        assert!(matches!(
            rt.connector_for("rtsp://cam/live"),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            rt.connector_for("/dev/video0"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_custom_connector_survives_initialize() {
        let mut rt = Runtime::default();
        rt.register("rtsp", Arc::new(Refusing));
        rt.register("http", Arc::new(Refusing));
        rt.initialize();

        assert_eq!(rt.schemes(), vec!["http", "https", "rtsp", "udp"]);
        let err = rt
            .connector_for("http://cam/stream")
            .unwrap()
            .open(&NetworkSourceConfig::for_url("http://cam/stream"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_shutdown_then_reinitialize() {
        let mut rt = Runtime::default();
        rt.initialize();
        assert!(rt.shutdown());
        assert!(!rt.shutdown());
        assert!(matches!(
            rt.connector_for("udp://0.0.0.0:5004"),
            Err(Error::NotInitialized)
        ));
        assert!(rt.initialize());
        assert!(rt.connector_for("udp://0.0.0.0:5004").is_ok());
    }

    #[test]
    fn test_version() {
        assert_eq!(version(), env!("CARGO_PKG_VERSION"));
    }
}
