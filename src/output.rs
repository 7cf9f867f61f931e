use std::fmt::Display;
use std::io::Write;

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::InterceptorError;

/// Write `rows` one per line in text mode, or as a JSON array.
pub fn write_rows<T: Serialize + Display>(
    rows: &[T],
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<(), InterceptorError> {
    match format {
        OutputFormat::Text => {
            for row in rows {
                writeln!(writer, "{row}").map_err(InterceptorError::Serialization)?;
            }
            Ok(())
        }
        OutputFormat::Json => write_json(rows, writer),
    }
}

/// Write a single value with its `Display` form or as JSON.
pub fn write_value<T: Serialize + Display + ?Sized>(
    value: &T,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<(), InterceptorError> {
    match format {
        OutputFormat::Text => {
            write!(writer, "{value}").map_err(InterceptorError::Serialization)?;
            Ok(())
        }
        OutputFormat::Json => write_json(value, writer),
    }
}

pub fn write_json<T: Serialize + ?Sized>(
    value: &T,
    writer: &mut impl Write,
) -> Result<(), InterceptorError> {
    serde_json::to_writer_pretty(&mut *writer, value)
        .map_err(|e| InterceptorError::Serialization(std::io::Error::other(e.to_string())))?;
    writeln!(writer).map_err(InterceptorError::Serialization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::addr::Ipv4Address;
    use crate::store::Host;

    fn hosts() -> Vec<Host> {
        vec![
            Host {
                id: 1,
                ipv4: Some(Ipv4Address::new(10, 0, 0, 1)),
                ipv6: None,
                mac: None,
            },
            Host {
                id: 2,
                ipv4: None,
                ipv6: Some("fe80::2".into()),
                mac: None,
            },
        ]
    }

    #[test]
    fn ut_text_rows() {
        let mut buf = Vec::new();
        write_rows(&hosts(), OutputFormat::Text, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().next().unwrap().contains("10.0.0.1"));
    }

    #[test]
    fn ut_json_rows() {
        let mut buf = Vec::new();
        write_rows(&hosts(), OutputFormat::Json, &mut buf).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed[0]["ipv4"], "10.0.0.1");
        assert_eq!(parsed[1]["ipv6"], "fe80::2");
        assert!(parsed[1]["mac"].is_null());
    }
}
