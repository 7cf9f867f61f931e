// Manual edits to the host store.

use crate::error::InterceptorError;
use crate::module::{Arguments, Module, ModuleContext, ParamKind, ParamSpec};
use crate::task::OutputSink;

// ---------------------------------------------------------------------------
// db.add_host
// ---------------------------------------------------------------------------

pub struct AddHost;

const ADD_HOST_PARAMS: &[ParamSpec] = &[
    ParamSpec::optional("ipv4_addr", ParamKind::Ipv4, "IPv4 address"),
    ParamSpec::optional("ipv6_addr", ParamKind::Str, "IPv6 address"),
    ParamSpec::optional("mac_addr", ParamKind::Mac, "hardware address"),
];

impl Module for AddHost {
    fn name(&self) -> &'static str {
        "db.add_host"
    }

    fn description(&self) -> &'static str {
        "Add a host to the database"
    }

    fn params(&self) -> &'static [ParamSpec] {
        ADD_HOST_PARAMS
    }

    fn run(
        &self,
        ctx: &ModuleContext,
        args: &Arguments,
        out: &OutputSink,
    ) -> Result<bool, InterceptorError> {
        let id = ctx.store.add_host(
            args.ipv4("ipv4_addr"),
            args.str("ipv6_addr").map(str::to_string),
            args.mac("mac_addr"),
        )?;
        out.line(format_args!("Added host with id {id}"));
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// db.set_host
// ---------------------------------------------------------------------------

pub struct SetHost;

const SET_HOST_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("host_id", ParamKind::Int, "host to update"),
    ParamSpec::optional("ipv4_addr", ParamKind::Ipv4, "new IPv4 address"),
    ParamSpec::optional("ipv6_addr", ParamKind::Str, "new IPv6 address"),
    ParamSpec::optional("mac_addr", ParamKind::Mac, "new hardware address"),
];

impl Module for SetHost {
    fn name(&self) -> &'static str {
        "db.set_host"
    }

    fn description(&self) -> &'static str {
        "Update attributes of a stored host"
    }

    fn params(&self) -> &'static [ParamSpec] {
        SET_HOST_PARAMS
    }

    fn run(
        &self,
        ctx: &ModuleContext,
        args: &Arguments,
        out: &OutputSink,
    ) -> Result<bool, InterceptorError> {
        let id = args.require_id("host_id")?;
        if ctx.store.get_host(id)?.is_none() {
            out.line("No such host.");
            return Ok(false);
        }
        ctx.store.set_host(
            id,
            args.ipv4("ipv4_addr"),
            args.str("ipv6_addr").map(str::to_string),
            args.mac("mac_addr"),
        )?;
        out.line(format_args!("Updated host {id}"));
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// db.add_service
// ---------------------------------------------------------------------------

pub struct AddService;

const ADD_SERVICE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("host_id", ParamKind::Int, "host offering the service"),
    ParamSpec::required("port", ParamKind::Int, "port number"),
    ParamSpec::with_default("transport_protocol", ParamKind::Str, "tcp", "tcp or udp"),
    ParamSpec::with_default("service", ParamKind::Str, "", "service name"),
];

impl Module for AddService {
    fn name(&self) -> &'static str {
        "db.add_service"
    }

    fn description(&self) -> &'static str {
        "Add a service to a stored host"
    }

    fn params(&self) -> &'static [ParamSpec] {
        ADD_SERVICE_PARAMS
    }

    fn run(
        &self,
        ctx: &ModuleContext,
        args: &Arguments,
        out: &OutputSink,
    ) -> Result<bool, InterceptorError> {
        let host_id = args.require_id("host_id")?;
        let raw_port = args.require_int("port")?;
        let port = u16::try_from(raw_port).map_err(|_| InterceptorError::ArgumentCoercion {
            argument: "port".to_string(),
            detail: format!("{raw_port} is not a port number"),
        })?;
        let id = ctx.store.add_service(
            host_id,
            args.require_str("transport_protocol")?,
            port,
            args.require_str("service")?,
        )?;
        out.line(format_args!("Added service with id {id}"));
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// db.add_credential
// ---------------------------------------------------------------------------

pub struct AddCredential;

const ADD_CREDENTIAL_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("service_id", ParamKind::Int, "service the credential is for"),
    ParamSpec::required("login_name", ParamKind::Str, "user name"),
    ParamSpec::required("credential", ParamKind::Str, "password, hash or key"),
];

impl Module for AddCredential {
    fn name(&self) -> &'static str {
        "db.add_credential"
    }

    fn description(&self) -> &'static str {
        "Add a credential to a stored service"
    }

    fn params(&self) -> &'static [ParamSpec] {
        ADD_CREDENTIAL_PARAMS
    }

    fn run(
        &self,
        ctx: &ModuleContext,
        args: &Arguments,
        out: &OutputSink,
    ) -> Result<bool, InterceptorError> {
        let id = ctx.store.add_credential(
            args.require_id("service_id")?,
            args.require_str("login_name")?,
            args.require_str("credential")?,
        )?;
        out.line(format_args!("Added credential with id {id}"));
        Ok(true)
    }
}
