// Module registry and the contract every module implements.
//
// A module is a named, self-describing command: a description, a typed
// parameter schema and a `run` entry point. Stoppable modules watch the
// cancellation token in their context.

pub mod args;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::error::InterceptorError;
use crate::net::addr::Ipv4Address;
use crate::net::interface::{self, Interface};
use crate::net::resolver::ArpResolver;
use crate::net::socket::{LinkSocket, layer1};
use crate::store::HostStore;
use crate::task::{CancelToken, OutputSink};

pub use args::{ArgValue, Arguments, ParamKind, ParamSpec, Requirement};

/// A runnable, schema-described command.
pub trait Module: Send + Sync {
    /// Dotted name, e.g. `discover.arp.scan`.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn params(&self) -> &'static [ParamSpec];

    /// Whether `run` honours `ModuleContext::cancel`.
    fn stoppable(&self) -> bool {
        false
    }

    fn run(
        &self,
        ctx: &ModuleContext,
        args: &Arguments,
        out: &OutputSink,
    ) -> Result<bool, InterceptorError>;
}

// ---------------------------------------------------------------------------
// Network access
// ---------------------------------------------------------------------------

/// How modules find interfaces and open raw links.
pub trait Network: Send + Sync {
    fn interfaces(&self) -> Result<Vec<Interface>, InterceptorError>;

    /// Look up `spec` (name, IPv4 or MAC), or the default-route interface.
    fn interface(&self, spec: Option<&str>) -> Result<Interface, InterceptorError>;

    fn open(&self, iface: &Interface) -> Result<Box<dyn LinkSocket + Send>, InterceptorError>;

    /// Next hop of the default route.
    fn default_gateway(&self) -> Result<Ipv4Address, InterceptorError>;
}

/// The host's real interfaces and AF_PACKET sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNetwork;

impl Network for SystemNetwork {
    fn interfaces(&self) -> Result<Vec<Interface>, InterceptorError> {
        interface::list_interfaces()
    }

    fn interface(&self, spec: Option<&str>) -> Result<Interface, InterceptorError> {
        match spec {
            Some(spec) => Interface::find(spec),
            None => interface::default_interface(),
        }
    }

    fn open(&self, iface: &Interface) -> Result<Box<dyn LinkSocket + Send>, InterceptorError> {
        layer1::open(iface)
    }

    fn default_gateway(&self) -> Result<Ipv4Address, InterceptorError> {
        interface::default_gateway()
    }
}

/// Everything a module run may touch.
#[derive(Clone)]
pub struct ModuleContext {
    pub store: Arc<dyn HostStore>,
    pub resolver: Arc<ArpResolver>,
    pub network: Arc<dyn Network>,
    pub config: RuntimeConfig,
    pub cancel: CancelToken,
}

impl ModuleContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The interface named by the `interface` argument, or the default one.
    pub fn interface(&self, args: &Arguments) -> Result<Interface, InterceptorError> {
        self.network.interface(args.interface("interface"))
    }

    pub fn open(&self, iface: &Interface) -> Result<Box<dyn LinkSocket + Send>, InterceptorError> {
        self.network.open(iface)
    }

    /// The same context with a fresh cancellation token.
    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Info
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamInfo {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<&'static str>,
    pub value: Option<String>,
    pub help: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub stoppable: bool,
    pub args: Vec<ParamInfo>,
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "  {}", self.description)?;
        if self.stoppable {
            writeln!(f, "  (stoppable)")?;
        }
        for arg in &self.args {
            let state = match (&arg.value, arg.default, arg.required) {
                (Some(v), _, _) => format!("= {v}"),
                (None, Some(d), _) => format!("default {d}"),
                (None, None, true) => "required".to_string(),
                (None, None, false) => "optional".to_string(),
            };
            writeln!(
                f,
                "  {:<14} {:<10} {:<20} {}",
                arg.name, arg.kind, state, arg.help
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loaded module
// ---------------------------------------------------------------------------

/// A module together with the arguments set on it so far.
#[derive(Clone)]
pub struct LoadedModule {
    module: Arc<dyn Module>,
    set: HashMap<String, ArgValue>,
}

impl LoadedModule {
    pub fn new(module: Arc<dyn Module>) -> Self {
        Self {
            module,
            set: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.module.name()
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    fn spec(&self, name: &str) -> Result<&'static ParamSpec, InterceptorError> {
        self.module
            .params()
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| InterceptorError::UnknownArgument(name.to_string()))
    }

    /// Coerce and store one argument.
    pub fn set(&mut self, name: &str, raw: &str) -> Result<(), InterceptorError> {
        let spec = self.spec(name)?;
        let value = spec.coerce(raw)?;
        log::debug!("{}: {name} = {value}", self.module.name());
        self.set.insert(spec.name.to_string(), value);
        Ok(())
    }

    pub fn clear(&mut self, name: &str) -> Result<(), InterceptorError> {
        let spec = self.spec(name)?;
        self.set.remove(spec.name);
        Ok(())
    }

    pub fn resolve(&self) -> Result<Arguments, InterceptorError> {
        Arguments::resolve(self.module.params(), &self.set)
    }

    pub fn info(&self) -> ModuleInfo {
        module_info(self.module.as_ref(), &self.set)
    }
}

fn module_info(module: &dyn Module, set: &HashMap<String, ArgValue>) -> ModuleInfo {
    ModuleInfo {
        name: module.name(),
        description: module.description(),
        stoppable: module.stoppable(),
        args: module
            .params()
            .iter()
            .map(|p| ParamInfo {
                name: p.name,
                kind: p.kind,
                required: p.requirement == Requirement::Required,
                default: match p.requirement {
                    Requirement::Default(d) => Some(d),
                    _ => None,
                },
                value: set.get(p.name).map(ArgValue::to_string),
                help: p.help,
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name-keyed table of available modules.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<&'static str, Arc<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in module.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::modules::register_builtin(&mut registry);
        registry
    }

    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name(), module);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Module>, InterceptorError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| InterceptorError::ModuleNotFound(name.to_string()))
    }

    /// Module names, optionally restricted to a dotted category such as
    /// `discover` or `discover.arp`.
    pub fn list(&self, category: &str) -> Vec<&'static str> {
        let category = category.trim_matches('.');
        self.modules
            .keys()
            .copied()
            .filter(|name| {
                category.is_empty()
                    || name
                        .strip_prefix(category)
                        .is_some_and(|rest| rest.starts_with('.'))
            })
            .collect()
    }

    pub fn info(&self, name: &str) -> Result<ModuleInfo, InterceptorError> {
        Ok(module_info(self.get(name)?.as_ref(), &HashMap::new()))
    }
}
