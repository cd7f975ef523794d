//! The host: everything a sandbox run needs, owned in one place.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use faashost_exchange::ExchangeRegistry;
use faashost_store::{BlobStore, ContentId, KvStore, MemoryKv, Persistence};
use wasmtime::{Config, Engine, Module};

use crate::config::HostConfig;
use crate::context::FunctionExecutionContext;
use crate::core_api::CoreApi;
use crate::engine::{self, Sandbox};
use crate::error::{Result, SandboxError};
use crate::provider::ApiProvider;

/// Content type of guest bytecode blobs.
pub const WASM_CONTENT_TYPE: &str = "application/wasm";

/// Owns the exchange registry, host API providers, blob store and compiled
/// modules shared by every invocation.
///
/// A host is always used through an `Arc`: dynamic links and `call_function`
/// invoke further guests from inside a running one.
///
/// # Example
///
/// ```
/// use faashost_sandbox_runtime::{FunctionExecutionContext, Host, HostConfig};
///
/// let host = Host::in_memory(HostConfig::default()).unwrap();
/// host.register_guest(
///     "adder",
///     br#"(module (func (export "add") (param i32 i32) (result i32)
///            local.get 0 local.get 1 i32.add))"#,
/// ).unwrap();
///
/// let mut context = FunctionExecutionContext::new("adder", "add").with_arguments(vec![3, 4]);
/// host.invoke(&mut context).unwrap();
/// assert_eq!(context.result(), Some(7));
/// ```
pub struct Host {
    config: HostConfig,
    engine: Engine,
    registry: ExchangeRegistry,
    blobs: BlobStore,
    persistence: Persistence,
    providers: RwLock<BTreeMap<String, Arc<dyn ApiProvider>>>,
    modules: Mutex<HashMap<ContentId, Module>>,
    http: OnceLock<reqwest::blocking::Client>,
}

impl Host {
    /// Create a host over `kv`, with the `core` API registered.
    pub fn new(config: HostConfig, kv: Arc<dyn KvStore>) -> Result<Arc<Self>> {
        let mut engine_config = Config::new();
        engine_config.consume_fuel(config.fuel.is_some());
        let engine = Engine::new(&engine_config).map_err(|e| SandboxError::Engine(e.to_string()))?;

        let host = Self {
            config,
            engine,
            registry: ExchangeRegistry::new(),
            blobs: BlobStore::new(kv.clone()),
            persistence: Persistence::new(kv),
            providers: RwLock::new(BTreeMap::new()),
            modules: Mutex::new(HashMap::new()),
            http: OnceLock::new(),
        };
        host.register_provider(crate::core_api::MODULE, CoreApi);
        Ok(Arc::new(host))
    }

    /// A host backed by an in-process key-value store.
    pub fn in_memory(config: HostConfig) -> Result<Arc<Self>> {
        Self::new(config, Arc::new(MemoryKv::new()))
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn registry(&self) -> &ExchangeRegistry {
        &self.registry
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    /// Register a provider, replacing any provider of the same module name.
    pub fn register_provider<P: ApiProvider + 'static>(&self, module: &str, provider: P) {
        tracing::debug!(module, "registered host api provider");
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module.to_string(), Arc::new(provider));
    }

    pub fn provider(&self, module: &str) -> Option<Arc<dyn ApiProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module)
            .cloned()
    }

    /// Store guest bytecode and point `alias` at it.
    pub fn register_guest(&self, alias: &str, bytecode: impl AsRef<[u8]>) -> Result<ContentId> {
        Ok(self
            .blobs
            .register_blob_with_name(alias, WASM_CONTENT_TYPE, bytecode.as_ref())?)
    }

    /// Resolve `alias` and return its compiled module, compiling at most once
    /// per content id.
    pub(crate) fn load_module(&self, alias: &str) -> Result<Module> {
        let id = self.blobs.resolve_reference(alias).map_err(|e| match e {
            faashost_store::StoreError::NotFound(_) => SandboxError::GuestNotFound(alias.to_string()),
            other => SandboxError::Store(other),
        })?;

        if let Some(module) = self.cached(&id) {
            return Ok(module);
        }

        let abstract_ = self.blobs.abstract_of(&id)?;
        if abstract_.content_type != WASM_CONTENT_TYPE {
            return Err(SandboxError::UnsupportedContentType {
                alias: alias.to_string(),
                content_type: abstract_.content_type,
            });
        }

        let bytes = self.blobs.get_bytes(&id)?;
        let module = Module::new(&self.engine, &bytes).map_err(|e| SandboxError::Compile {
            alias: alias.to_string(),
            message: format!("{:#}", e),
        })?;
        tracing::debug!(alias, id = %id, "compiled guest module");

        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, module.clone());
        Ok(module)
    }

    fn cached(&self, id: &ContentId) -> Option<Module> {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Number of compiled modules held in the cache.
    pub fn cached_modules(&self) -> usize {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Load, link and instantiate-ready a guest for `context`.
    pub fn prepare<'c>(
        self: &Arc<Self>,
        context: &'c mut FunctionExecutionContext,
    ) -> Result<Sandbox<'c>> {
        engine::prepare(self, context)
    }

    /// Prepare and run in one step. Used for top-level and nested calls alike.
    pub fn invoke(self: &Arc<Self>, context: &mut FunctionExecutionContext) -> Result<()> {
        self.prepare(context)?.run()
    }

    /// Blocking HTTP client honouring the configured fetch timeout. Built on
    /// first use and shared by every fetch on this host.
    pub(crate) fn http_client(&self) -> reqwest::Result<reqwest::blocking::Client> {
        if let Some(client) = self.http.get() {
            return Ok(client.clone());
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.config.fetch_timeout_secs))
            .build()?;
        Ok(self.http.get_or_init(|| client).clone())
    }
}
