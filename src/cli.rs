use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::RuntimeConfig;

#[derive(Parser, Debug)]
#[command(
    name = "interceptor",
    version,
    about = "Network interception toolkit: discovery, sniffing and ARP spoofing modules"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// JSON file holding hosts, services and credentials
    #[arg(long, global = true, default_value = "interceptor.json")]
    pub store: PathBuf,

    /// Keep the store in memory only
    #[arg(long, global = true, conflicts_with = "store")]
    pub no_store: bool,

    /// Seconds to wait for ARP replies during next-hop resolution [default: 1.0]
    #[arg(long, global = true, default_value_t = 1.0, value_parser = validate_arp_timeout)]
    pub arp_timeout: f64,

    /// Seconds a single module receive waits for traffic [default: 5.0]
    #[arg(long, global = true, default_value_t = 5.0, value_parser = validate_recv_timeout)]
    pub recv_timeout: f64,

    /// Output format [default: text]
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List modules, optionally under a dotted category
    Modules {
        category: Option<String>,
    },
    /// Show a module's description and arguments
    Info {
        module: String,
    },
    /// Run a module as a task and stream its output (Ctrl-C stops it)
    Run(RunArgs),
    /// List network interfaces
    Interfaces,
    /// List stored hosts
    Hosts,
    /// List stored services
    Services,
    /// List stored credentials
    Credentials,
    /// Delete all stored data
    Clear,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    pub module: String,

    /// Module argument as name=value; may be repeated
    #[arg(short = 's', long = "set", value_parser = parse_assignment)]
    pub set: Vec<(String, String)>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

fn parse_seconds(s: &str, what: &str, min: f64, max: f64) -> Result<f64, String> {
    let val: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if val.is_nan() || val < min {
        Err(format!("{what} must be at least {min} seconds"))
    } else if val > max {
        Err(format!("{what} must be at most {max} seconds"))
    } else {
        Ok(val)
    }
}

fn validate_arp_timeout(s: &str) -> Result<f64, String> {
    parse_seconds(s, "arp-timeout", 0.1, 30.0)
}

fn validate_recv_timeout(s: &str) -> Result<f64, String> {
    parse_seconds(s, "recv-timeout", 0.1, 60.0)
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("'{s}' is not of the form name=value"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("'{s}' has an empty argument name"));
    }
    Ok((name.to_string(), value.to_string()))
}

impl GlobalArgs {
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            store_path: (!self.no_store).then(|| self.store.clone()),
            arp_timeout: Duration::from_secs_f64(self.arp_timeout),
            recv_timeout: Duration::from_secs_f64(self.recv_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_defaults() {
        let cli = Cli::try_parse_from(["interceptor", "hosts"]).unwrap();
        assert!(matches!(cli.command, Command::Hosts));
        let config = cli.global.runtime_config();
        assert_eq!(config.store_path, Some(PathBuf::from("interceptor.json")));
        assert_eq!(config.arp_timeout, Duration::from_secs(1));
        assert_eq!(config.recv_timeout, Duration::from_secs(5));
        assert_eq!(cli.global.format, OutputFormat::Text);
    }

    #[test]
    fn ut_run_with_assignments() {
        let cli = Cli::try_parse_from([
            "interceptor",
            "run",
            "discover.arp.scan",
            "-s",
            "range=10.0.0.0/24",
            "--set",
            "timeout=0.5",
            "--format",
            "json",
            "--no-store",
        ])
        .unwrap();
        let Command::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(run.module, "discover.arp.scan");
        assert_eq!(
            run.set,
            vec![
                ("range".to_string(), "10.0.0.0/24".to_string()),
                ("timeout".to_string(), "0.5".to_string())
            ]
        );
        assert_eq!(cli.global.format, OutputFormat::Json);
        assert_eq!(cli.global.runtime_config().store_path, None);
    }

    #[test]
    fn ut_rejects_bad_values() {
        assert!(Cli::try_parse_from(["interceptor", "--arp-timeout", "0.01", "hosts"]).is_err());
        assert!(Cli::try_parse_from(["interceptor", "--recv-timeout", "61", "hosts"]).is_err());
        assert!(Cli::try_parse_from(["interceptor", "--recv-timeout", "NaN", "hosts"]).is_err());
        assert!(Cli::try_parse_from(["interceptor", "run", "x", "-s", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["interceptor"]).is_err());
    }

    #[test]
    fn ut_modules_category_optional() {
        let cli = Cli::try_parse_from(["interceptor", "modules", "discover"]).unwrap();
        assert!(matches!(cli.command, Command::Modules { category: Some(ref c) } if c == "discover"));
        let cli = Cli::try_parse_from(["interceptor", "modules"]).unwrap();
        assert!(matches!(cli.command, Command::Modules { category: None }));
    }
}
