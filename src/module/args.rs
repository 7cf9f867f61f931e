// Typed argument schema and coercion for modules.
//
// Callers set arguments as strings. Each value is coerced against the
// parameter's declared kind when it is set, and defaults are coerced the
// same way when a run resolves its arguments.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::InterceptorError;
use crate::net::addr::{Ipv4Address, MacAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Bool,
    Ipv4,
    Mac,
    /// An interface name, IPv4 or MAC, resolved when the module runs.
    Interface,
    /// Comma-separated integers.
    IntList,
}

impl ParamKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Ipv4 => "ipv4",
            Self::Mac => "mac",
            Self::Interface => "interface",
            Self::IntList => "list[int]",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    /// Used when unset; given in the same text form a caller would set.
    Default(&'static str),
    Optional,
}

/// One declared module parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub requirement: Requirement,
    pub help: &'static str,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind, help: &'static str) -> Self {
        Self {
            name,
            kind,
            requirement: Requirement::Required,
            help,
        }
    }

    pub const fn with_default(
        name: &'static str,
        kind: ParamKind,
        default: &'static str,
        help: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            requirement: Requirement::Default(default),
            help,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, help: &'static str) -> Self {
        Self {
            name,
            kind,
            requirement: Requirement::Optional,
            help,
        }
    }

    pub fn coerce(&self, raw: &str) -> Result<ArgValue, InterceptorError> {
        let raw = raw.trim();
        let fail = |detail: String| InterceptorError::ArgumentCoercion {
            argument: self.name.to_string(),
            detail,
        };
        let value = match self.kind {
            ParamKind::Str => ArgValue::Str(raw.to_string()),
            ParamKind::Int => ArgValue::Int(
                raw.parse()
                    .map_err(|_| fail(format!("'{raw}' is not an integer")))?,
            ),
            ParamKind::Float => {
                let v: f64 = raw
                    .parse()
                    .map_err(|_| fail(format!("'{raw}' is not a number")))?;
                if !v.is_finite() {
                    return Err(fail(format!("'{raw}' is not a finite number")));
                }
                ArgValue::Float(v)
            }
            ParamKind::Bool => ArgValue::Bool(match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => return Err(fail(format!("'{raw}' is not a boolean"))),
            }),
            ParamKind::Ipv4 => ArgValue::Ipv4(raw.parse().map_err(|e| fail(format!("{e}")))?),
            ParamKind::Mac => ArgValue::Mac(raw.parse().map_err(|e| fail(format!("{e}")))?),
            ParamKind::Interface => {
                if raw.is_empty() {
                    return Err(fail("interface must not be empty".to_string()));
                }
                ArgValue::Interface(raw.to_string())
            }
            ParamKind::IntList => ArgValue::IntList(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse()
                            .map_err(|_| fail(format!("list item '{s}' is not an integer")))
                    })
                    .collect::<Result<_, _>>()?,
            ),
        };
        Ok(value)
    }
}

/// A coerced argument value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Ipv4(Ipv4Address),
    Mac(MacAddress),
    Interface(String),
    IntList(Vec<i64>),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) | Self::Interface(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Ipv4(a) => write!(f, "{a}"),
            Self::Mac(m) => write!(f, "{m}"),
            Self::IntList(items) => {
                let joined: Vec<String> = items.iter().map(i64::to_string).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

/// Fully resolved arguments for one run: every required parameter is
/// present and every defaulted one has a value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: HashMap<String, ArgValue>,
}

impl Arguments {
    /// Resolve `set` values against `params`, filling in defaults.
    pub fn resolve(
        params: &[ParamSpec],
        set: &HashMap<String, ArgValue>,
    ) -> Result<Self, InterceptorError> {
        let mut values = HashMap::new();
        for spec in params {
            let value = match (set.get(spec.name), spec.requirement) {
                (Some(v), _) => Some(v.clone()),
                (None, Requirement::Default(raw)) => Some(spec.coerce(raw)?),
                (None, Requirement::Required) => {
                    return Err(InterceptorError::MissingArgument(spec.name.to_string()));
                }
                (None, Requirement::Optional) => None,
            };
            if let Some(v) = value {
                values.insert(spec.name.to_string(), v);
            }
        }
        Ok(Self { values })
    }

    /// Coerce `pairs` of raw strings and resolve them in one go.
    pub fn parse(params: &[ParamSpec], pairs: &[(&str, &str)]) -> Result<Self, InterceptorError> {
        let mut set = HashMap::new();
        for (name, raw) in pairs {
            let spec = params
                .iter()
                .find(|p| p.name == *name)
                .ok_or_else(|| InterceptorError::UnknownArgument((*name).to_string()))?;
            set.insert(spec.name.to_string(), spec.coerce(raw)?);
        }
        Self::resolve(params, &set)
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            ArgValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Unset booleans read as false.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(ArgValue::Bool(true)))
    }

    pub fn ipv4(&self, name: &str) -> Option<Ipv4Address> {
        match self.get(name)? {
            ArgValue::Ipv4(a) => Some(*a),
            _ => None,
        }
    }

    pub fn mac(&self, name: &str) -> Option<MacAddress> {
        match self.get(name)? {
            ArgValue::Mac(m) => Some(*m),
            _ => None,
        }
    }

    pub fn interface(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            ArgValue::Interface(s) => Some(s),
            _ => None,
        }
    }

    pub fn int_list(&self, name: &str) -> Option<&[i64]> {
        match self.get(name)? {
            ArgValue::IntList(items) => Some(items),
            _ => None,
        }
    }

    pub fn require_int(&self, name: &str) -> Result<i64, InterceptorError> {
        self.int(name)
            .ok_or_else(|| InterceptorError::MissingArgument(name.to_string()))
    }

    pub fn require_str(&self, name: &str) -> Result<&str, InterceptorError> {
        self.str(name)
            .ok_or_else(|| InterceptorError::MissingArgument(name.to_string()))
    }

    /// An integer argument that must fit a database id.
    pub fn require_id(&self, name: &str) -> Result<u64, InterceptorError> {
        let v = self.require_int(name)?;
        u64::try_from(v).map_err(|_| InterceptorError::ArgumentCoercion {
            argument: name.to_string(),
            detail: format!("{v} is not a valid id"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &[ParamSpec] = &[
        ParamSpec::required("host_id", ParamKind::Int, "host"),
        ParamSpec::with_default("timeout", ParamKind::Float, "1.0", "seconds"),
        ParamSpec::optional("mac", ParamKind::Mac, "address"),
        ParamSpec::with_default("verbose", ParamKind::Bool, "false", "chatty"),
        ParamSpec::optional("ids", ParamKind::IntList, "ids"),
    ];

    #[test]
    fn ut_defaults_and_optionals() {
        let args = Arguments::parse(PARAMS, &[("host_id", "3")]).unwrap();
        assert_eq!(args.int("host_id"), Some(3));
        assert_eq!(args.float("timeout"), Some(1.0));
        assert!(args.get("mac").is_none());
        assert!(!args.flag("verbose"));
    }

    #[test]
    fn ut_missing_required() {
        assert!(matches!(
            Arguments::parse(PARAMS, &[]),
            Err(InterceptorError::MissingArgument(name)) if name == "host_id"
        ));
    }

    #[test]
    fn ut_coercion_errors_name_the_argument() {
        let err = Arguments::parse(PARAMS, &[("host_id", "three")]).unwrap_err();
        assert!(matches!(err, InterceptorError::ArgumentCoercion { ref argument, .. } if argument == "host_id"));
        let err = PARAMS[2].coerce("zz:zz").unwrap_err();
        assert!(matches!(err, InterceptorError::ArgumentCoercion { ref argument, .. } if argument == "mac"));
        assert!(matches!(
            Arguments::parse(PARAMS, &[("nope", "1")]),
            Err(InterceptorError::UnknownArgument(_))
        ));
    }

    #[test]
    fn ut_list_and_bool_forms() {
        let args =
            Arguments::parse(PARAMS, &[("host_id", "1"), ("ids", "1, 2,3"), ("verbose", "YES")])
                .unwrap();
        assert_eq!(args.int_list("ids"), Some(&[1, 2, 3][..]));
        assert!(args.flag("verbose"));
        assert_eq!(args.get("ids").unwrap().to_string(), "1,2,3");
    }
}
