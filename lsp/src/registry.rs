//! Owner of all server wrappers, keyed by project and content type.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::LspConfig;
use crate::host::{EditorDocument, HostServices, SourceFile};
use crate::transport::{ProcessTransport, Transport};
use crate::wrapper::{LifecycleState, ServerWrapper, WrapperError};

/// Identity of a server session: at most one live wrapper exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    project: PathBuf,
    content_type: String,
}

impl SessionKey {
    pub fn new(project: impl Into<PathBuf>, content_type: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            content_type: content_type.into(),
        }
    }

    #[must_use]
    pub fn project(&self) -> &Path {
        &self.project
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.content_type, self.project.display())
    }
}

/// Builds the transport for a new wrapper.
pub type TransportFactory = Arc<dyn Fn(&SessionKey) -> io::Result<Box<dyn Transport>> + Send + Sync>;

pub struct SessionRegistry {
    config: LspConfig,
    host: HostServices,
    factory: TransportFactory,
    wrappers: HashMap<SessionKey, ServerWrapper>,
}

impl SessionRegistry {
    pub fn new(config: LspConfig, host: HostServices, factory: TransportFactory) -> Self {
        Self {
            config,
            host,
            factory,
            wrappers: HashMap::new(),
        }
    }

    /// A registry that spawns the server configured for each content type.
    pub fn with_process_transports(config: LspConfig, host: HostServices) -> Self {
        let servers = config.servers().clone();
        let factory: TransportFactory = Arc::new(move |key: &SessionKey| {
            let server = servers.get(key.content_type()).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!(
                        "no language server configured for '{}'",
                        key.content_type()
                    ),
                )
            })?;
            let transport = ProcessTransport::new(server, key.project())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            Ok(Box::new(transport) as Box<dyn Transport>)
        });
        Self::new(config, host, factory)
    }

    /// The live wrapper for `key`, creating one if none exists or the
    /// existing one has stopped.
    pub fn get_or_create(&mut self, key: &SessionKey) -> Result<&mut ServerWrapper, WrapperError> {
        if self
            .wrappers
            .get(key)
            .is_some_and(|w| w.state() == LifecycleState::Stopped)
        {
            self.wrappers.remove(key);
        }
        match self.wrappers.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let transport = (self.factory)(key).map_err(WrapperError::Transport)?;
                tracing::debug!(server = %key, "Created server wrapper");
                Ok(entry.insert(ServerWrapper::new(
                    key.clone(),
                    &self.config,
                    transport,
                    self.host.clone(),
                )))
            }
        }
    }

    #[must_use]
    pub fn lookup(&self, key: &SessionKey) -> Option<&ServerWrapper> {
        self.wrappers.get(key)
    }

    pub async fn connect(
        &mut self,
        key: &SessionKey,
        file: &SourceFile,
        document: Arc<dyn EditorDocument>,
    ) -> Result<(), WrapperError> {
        self.get_or_create(key)?.connect(file, document).await
    }

    /// Disconnect `file`; a wrapper that stops as a result is removed.
    pub async fn disconnect(
        &mut self,
        key: &SessionKey,
        file: &SourceFile,
        document: &dyn EditorDocument,
    ) {
        let Some(wrapper) = self.wrappers.get_mut(key) else {
            return;
        };
        wrapper.disconnect(file, document).await;
        if wrapper.state() == LifecycleState::Stopped {
            self.wrappers.remove(key);
        }
    }

    /// Stop and remove the wrapper for `key`. Returns whether one existed.
    pub async fn destroy(&mut self, key: &SessionKey) -> bool {
        match self.wrappers.remove(key) {
            Some(mut wrapper) => {
                wrapper.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Stop every wrapper, one after another.
    pub async fn shutdown_all(&mut self) {
        let wrappers: Vec<_> = self.wrappers.drain().collect();
        for (_, mut wrapper) in wrappers {
            wrapper.shutdown().await;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }
}
