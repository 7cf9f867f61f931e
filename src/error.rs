use crate::net::addr::Ipv4Address;

#[derive(Debug, thiserror::Error)]
pub enum InterceptorError {
    #[error("invalid address literal: {0}")]
    AddressFormat(String),
    #[error("malformed {protocol} data: {detail}")]
    ProtocolFormat {
        protocol: &'static str,
        detail: String,
    },
    #[error("cannot resolve host {0}")]
    HostUnresolved(Ipv4Address),
    #[error("illegal keyword in filter: {0}")]
    IllegalKeyword(String),
    #[error("protocol '{protocol}' has no such field '{field}'")]
    UnknownField { protocol: String, field: String },
    #[error("filter syntax error: {0}")]
    FilterSyntax(String),
    #[error("argument '{argument}': {detail}")]
    ArgumentCoercion { argument: String, detail: String },
    #[error("argument {0} does not exist")]
    UnknownArgument(String),
    #[error("required argument {0} is not set")]
    MissingArgument(String),
    #[error("{0}")]
    SocketPermission(String),
    #[error("socket error on {interface}: {source}")]
    Socket {
        interface: String,
        #[source]
        source: std::io::Error,
    },
    #[error("interface error: {0}")]
    Interface(String),
    #[error("no such task: {0}")]
    TaskNotFound(String),
    #[error("no such module: {0}")]
    ModuleNotFound(String),
    #[error("no module loaded")]
    NoModuleLoaded,
    #[error("no such host: {0}")]
    HostNotFound(u64),
    #[error("no such service: {0}")]
    ServiceNotFound(u64),
    #[error("no such credential: {0}")]
    CredentialNotFound(u64),
    #[error("store error: {0}")]
    Store(String),
    #[error("output error: {0}")]
    Serialization(#[source] std::io::Error),
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Coarse classification used by control-plane callers to pick a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadInput,
    Execution,
}

impl InterceptorError {
    pub(crate) fn protocol(protocol: &'static str, detail: impl Into<String>) -> Self {
        Self::ProtocolFormat {
            protocol,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TaskNotFound(_)
            | Self::ModuleNotFound(_)
            | Self::HostNotFound(_)
            | Self::ServiceNotFound(_)
            | Self::CredentialNotFound(_) => ErrorKind::NotFound,
            Self::AddressFormat(_)
            | Self::IllegalKeyword(_)
            | Self::UnknownField { .. }
            | Self::FilterSyntax(_)
            | Self::ArgumentCoercion { .. }
            | Self::UnknownArgument(_)
            | Self::MissingArgument(_)
            | Self::NoModuleLoaded => ErrorKind::BadInput,
            Self::ProtocolFormat { .. }
            | Self::HostUnresolved(_)
            | Self::SocketPermission(_)
            | Self::Socket { .. }
            | Self::Interface(_)
            | Self::Store(_)
            | Self::Serialization(_)
            | Self::Fatal(_) => ErrorKind::Execution,
        }
    }
}
