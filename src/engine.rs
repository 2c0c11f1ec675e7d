//! # Engine
//!
//! Owner of everything process-wide: the I/O runtime, the work and dispatch pools,
//! the metrics block, the channel registry and the session factory registry.
//!
//! ## Lifecycle
//! ```rust,no_run
//! use sessionnet::config::{ChannelConfig, NetworkConfig};
//! use sessionnet::engine::Engine;
//!
//! # fn main() -> sessionnet::error::Result<()> {
//! let engine = Engine::new(NetworkConfig::default())?;
//! let channel = engine.create_channel(&ChannelConfig {
//!     name: "main".into(),
//!     max_session_count: 100,
//!     ..ChannelConfig::default()
//! })?;
//! channel.listen("127.0.0.1:10100")?;
//! // ...
//! engine.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! Shutdown closes every channel, stops both worker pools and shuts the runtime
//! down without waiting for in-flight tasks. It runs at most once; dropping the last
//! engine handle triggers it too.

use crate::config::{ChannelConfig, NetworkConfig, DEFAULT_SESSION_FACTORY};
use crate::core::packet::packet_validator;
use crate::error::{ProtocolError, Result};
use crate::transport::channel::{Channel, SessionFactory};
use crate::transport::session::{IoContext, Session};
use crate::transport::udp::{UdpClient, UdpServer};
use crate::utils::metrics::{Metrics, Timer};
use crate::utils::worker::Workers;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tracing::{info, instrument};

struct EngineInner {
    config: NetworkConfig,
    runtime: Mutex<Option<Runtime>>,
    ctx: IoContext,
    channels: RwLock<HashMap<String, Channel>>,
    factories: RwLock<HashMap<String, SessionFactory>>,
    shut_down: AtomicBool,
}

impl EngineInner {
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let _timer = Timer::start("engine_shutdown");

        let channels: Vec<Channel> = self.channels.write().drain().map(|(_, c)| c).collect();
        for channel in &channels {
            channel.close();
        }
        self.ctx.workers.stop();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
        self.ctx.metrics.log_metrics();
        info!(channels = channels.len(), "Engine shut down");
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Start an engine with its own multi-threaded runtime.
    ///
    /// Channels listed in the configuration are created (and started, if they have a
    /// listen port) before this returns.
    #[instrument(skip(config))]
    pub fn new(config: NetworkConfig) -> Result<Self> {
        config.validate_strict()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.workers.io_threads)
            .thread_name("sessionnet-io")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Self::build(config, handle, Some(runtime))
    }

    /// Start an engine on an existing runtime. The runtime is not shut down with the
    /// engine.
    pub fn with_handle(config: NetworkConfig, handle: Handle) -> Result<Self> {
        config.validate_strict()?;
        Self::build(config, handle, None)
    }

    fn build(config: NetworkConfig, handle: Handle, runtime: Option<Runtime>) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let workers = Workers::new(&config.workers, metrics.clone())?;
        let ctx = IoContext::new(handle, workers, metrics, config.session.clone());

        let default_factory: SessionFactory =
            Arc::new(|ctx: &IoContext| Session::with_validator(ctx.clone(), packet_validator()));
        let mut factories = HashMap::new();
        factories.insert(DEFAULT_SESSION_FACTORY.to_string(), default_factory);

        let engine = Self {
            inner: Arc::new(EngineInner {
                config,
                runtime: Mutex::new(runtime),
                ctx,
                channels: RwLock::new(HashMap::new()),
                factories: RwLock::new(factories),
                shut_down: AtomicBool::new(false),
            }),
        };

        for channel in engine.inner.config.channels.clone() {
            engine.create_channel(&channel)?;
        }
        info!(
            work_threads = engine.inner.config.workers.work_threads,
            dispatch_threads = engine.inner.config.workers.dispatch_threads,
            "Engine started"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &IoContext {
        &self.inner.ctx
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.ctx.metrics
    }

    pub fn workers(&self) -> &Workers {
        &self.inner.ctx.workers
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.ctx.handle
    }

    /// Register a session constructor under `name` for use in [`ChannelConfig::session_factory`].
    pub fn register_session_factory<F>(&self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&IoContext) -> Session + Send + Sync + 'static,
    {
        let mut factories = self.inner.factories.write();
        if factories.contains_key(name) {
            return Err(ProtocolError::AlreadyExists(format!("session factory '{name}'")));
        }
        factories.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    fn factory(&self, name: &str) -> Result<SessionFactory> {
        self.inner
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::NotExist(format!("session factory '{name}'")))
    }

    /// Create and register a channel. Starts listening when `listen_port` is non-zero.
    #[instrument(skip(self, config), fields(channel = %config.name))]
    pub fn create_channel(&self, config: &ChannelConfig) -> Result<Channel> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(ProtocolError::ConfigError(problems.join("; ")));
        }
        let factory = self.factory(&config.session_factory)?;

        let channel = {
            let mut channels = self.inner.channels.write();
            if channels.contains_key(&config.name) {
                return Err(ProtocolError::AlreadyExists(format!(
                    "channel '{}'",
                    config.name
                )));
            }
            let channel = Channel::new(config, factory, self.inner.ctx.clone());
            channels.insert(config.name.clone(), channel.clone());
            channel
        };

        if config.listen_port != 0 {
            if let Err(e) = channel.listen(&config.listen_endpoint()) {
                self.inner.channels.write().remove(&config.name);
                return Err(e);
            }
        }
        info!(
            channel = %config.name,
            max_session_count = config.max_session_count,
            "Channel created"
        );
        Ok(channel)
    }

    pub fn channel(&self, name: &str) -> Result<Channel> {
        self.inner
            .channels
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::NotExist(format!("channel '{name}'")))
    }

    /// Unregister and close a channel.
    pub fn remove_channel(&self, name: &str) -> Result<Channel> {
        let channel = self
            .inner
            .channels
            .write()
            .remove(name)
            .ok_or_else(|| ProtocolError::NotExist(format!("channel '{name}'")))?;
        channel.close();
        Ok(channel)
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.inner.channels.read().keys().cloned().collect()
    }

    /// A standalone client session built by the default factory.
    pub fn new_session(&self) -> Result<Session> {
        self.new_session_from(DEFAULT_SESSION_FACTORY)
    }

    /// A standalone client session built by a registered factory.
    pub fn new_session_from(&self, factory: &str) -> Result<Session> {
        let factory = self.factory(factory)?;
        Ok(factory(&self.inner.ctx))
    }

    pub fn udp_server(&self) -> UdpServer {
        UdpServer::new(self.inner.ctx.clone())
    }

    pub fn udp_client(&self) -> UdpClient {
        UdpClient::new(self.inner.ctx.clone())
    }

    /// Run a future to completion on the engine's runtime from a non-async thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.inner.ctx.handle.block_on(future)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Close all channels, stop the worker pools and shut the runtime down. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}
