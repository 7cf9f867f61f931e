// Control plane.
//
// `Interceptor` ties the module registry, the task runtime and the shared
// module context together behind the operations a client needs: browse and
// configure modules, start them as tasks, watch and stop those tasks, and
// read back what the store has learned.

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::error::InterceptorError;
use crate::module::{LoadedModule, ModuleContext, ModuleInfo, ModuleRegistry, Network, SystemNetwork};
use crate::net::interface::Interface;
use crate::net::resolver::ArpResolver;
use crate::store::{Credential, Host, HostStore, MemoryStore, Service};
use crate::task::{CancelToken, OutputSink, TaskRuntime, TaskStatus, WorkItem};

pub struct Interceptor {
    registry: ModuleRegistry,
    loaded: Option<LoadedModule>,
    tasks: TaskRuntime,
    context: ModuleContext,
}

impl Interceptor {
    /// Open the configured store and use the host's real network.
    pub fn new(config: RuntimeConfig) -> Result<Self, InterceptorError> {
        let store: Arc<dyn HostStore> = match &config.store_path {
            Some(path) => Arc::new(MemoryStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        let resolver = ArpResolver::with_system_neighbors(Arc::clone(&store));
        Ok(Self::with_parts(
            ModuleRegistry::builtin(),
            config,
            store,
            resolver,
            Arc::new(SystemNetwork),
        ))
    }

    pub fn with_parts(
        registry: ModuleRegistry,
        config: RuntimeConfig,
        store: Arc<dyn HostStore>,
        resolver: ArpResolver,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            registry,
            loaded: None,
            tasks: TaskRuntime::new(),
            context: ModuleContext {
                store,
                resolver: Arc::new(resolver),
                network,
                config,
                cancel: CancelToken::new(),
            },
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.context.config
    }

    // -----------------------------------------------------------------------
    // Modules
    // -----------------------------------------------------------------------

    /// Module names under `category` (empty for all).
    pub fn list_modules(&self, category: &str) -> Vec<&'static str> {
        self.registry.list(category)
    }

    /// Make `name` the current module. Arguments set on a previously
    /// loaded module are discarded.
    pub fn load_module(&mut self, name: &str) -> Result<(), InterceptorError> {
        let module = self.registry.get(name)?;
        log::info!("loaded module {name}");
        self.loaded = Some(LoadedModule::new(module));
        Ok(())
    }

    pub fn loaded_module(&self) -> Option<&'static str> {
        self.loaded.as_ref().map(LoadedModule::name)
    }

    /// Schema and current argument values of the loaded module.
    pub fn module_info(&self) -> Result<ModuleInfo, InterceptorError> {
        Ok(self.loaded()?.info())
    }

    /// Schema of any registered module, loaded or not.
    pub fn describe_module(&self, name: &str) -> Result<ModuleInfo, InterceptorError> {
        self.registry.info(name)
    }

    pub fn set_argument(&mut self, name: &str, value: &str) -> Result<(), InterceptorError> {
        self.loaded_mut()?.set(name, value)
    }

    pub fn clear_argument(&mut self, name: &str) -> Result<(), InterceptorError> {
        self.loaded_mut()?.clear(name)
    }

    /// Run the loaded module as a background task and return the task name.
    ///
    /// Arguments are resolved before the task starts, so a missing required
    /// argument fails here rather than inside the task.
    pub fn start_module(&self) -> Result<String, InterceptorError> {
        let loaded = self.loaded()?;
        let args = loaded.resolve()?;
        let module = Arc::clone(loaded.module());

        let token = CancelToken::new();
        let ctx = self.context.with_cancel(token.clone());
        let stoppable = module.stoppable();
        let name = module.name();

        let run = move |out: OutputSink| module.run(&ctx, &args, &out);
        let item = if stoppable {
            WorkItem::stoppable(token, run)
        } else {
            WorkItem::new(run)
        };
        self.tasks.start(name, item)
    }

    fn loaded(&self) -> Result<&LoadedModule, InterceptorError> {
        self.loaded.as_ref().ok_or(InterceptorError::NoModuleLoaded)
    }

    fn loaded_mut(&mut self) -> Result<&mut LoadedModule, InterceptorError> {
        self.loaded.as_mut().ok_or(InterceptorError::NoModuleLoaded)
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn list_tasks(&self) -> Vec<String> {
        self.tasks.list_tasks()
    }

    pub fn poll_task(&self, name: &str) -> Result<TaskStatus, InterceptorError> {
        self.tasks.poll_status(name)
    }

    pub fn stop_task(&self, name: &str) -> Result<bool, InterceptorError> {
        self.tasks.stop_task(name)
    }

    // -----------------------------------------------------------------------
    // Network and store
    // -----------------------------------------------------------------------

    pub fn interfaces(&self) -> Result<Vec<Interface>, InterceptorError> {
        self.context.network.interfaces()
    }

    pub fn hosts(&self) -> Result<Vec<Host>, InterceptorError> {
        self.context.store.all_hosts()
    }

    pub fn host(&self, id: u64) -> Result<Host, InterceptorError> {
        self.context
            .store
            .get_host(id)?
            .ok_or(InterceptorError::HostNotFound(id))
    }

    pub fn services(&self) -> Result<Vec<Service>, InterceptorError> {
        self.context.store.all_services()
    }

    pub fn service(&self, id: u64) -> Result<Service, InterceptorError> {
        self.context
            .store
            .get_service(id)?
            .ok_or(InterceptorError::ServiceNotFound(id))
    }

    pub fn credentials(&self) -> Result<Vec<Credential>, InterceptorError> {
        self.context.store.all_credentials()
    }

    pub fn credential(&self, id: u64) -> Result<Credential, InterceptorError> {
        self.context
            .store
            .get_credential(id)?
            .ok_or(InterceptorError::CredentialNotFound(id))
    }

    pub fn clear_data(&self) -> Result<(), InterceptorError> {
        log::info!("clearing all stored data");
        self.context.store.clear()
    }
}
