//! Explicit process context.
//!
//! Everything that would otherwise be a module-level singleton — the
//! template catalog, the vendor registry, the credential map, session
//! tunables — is built once here and passed into entry points.

use std::sync::Arc;

use crate::capture::CaptureCatalog;
use crate::credentials::CredentialSource;
use crate::fingerprint::FingerprintEngine;
use crate::platform::VendorRegistry;
use crate::runner::DeviceRunner;
use crate::session::SessionConfig;
use crate::template::TemplateStore;

/// Shared read-only state for one process.
pub struct CoreContext {
    pub templates: Arc<TemplateStore>,
    pub registry: Arc<VendorRegistry>,
    pub engine: Arc<FingerprintEngine>,
    pub credentials: Arc<CredentialSource>,
    pub catalog: CaptureCatalog,
    pub session_config: SessionConfig,
}

impl CoreContext {
    /// Built-in catalogs plus credentials from the environment.
    pub fn bootstrap() -> Self {
        let templates = Arc::new(TemplateStore::builtin());
        let registry = Arc::new(VendorRegistry::builtin());
        let engine = Arc::new(FingerprintEngine::new(templates.clone(), registry.clone()));
        Self {
            templates,
            registry,
            engine,
            credentials: Arc::new(CredentialSource::from_env()),
            catalog: CaptureCatalog::builtin(),
            session_config: SessionConfig::default(),
        }
    }

    /// A device runner borrowing this context's shared state.
    pub fn runner(&self) -> DeviceRunner {
        DeviceRunner::new(
            self.registry.clone(),
            self.engine.clone(),
            self.credentials.clone(),
            self.session_config.clone(),
        )
    }
}
