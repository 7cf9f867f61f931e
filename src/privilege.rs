use crate::error::InterceptorError;

/// Check that raw link-layer sockets can be opened. Root always can;
/// otherwise opening a throwaway socket tells whether CAP_NET_RAW was granted.
pub fn check_capture_access() -> Result<(), InterceptorError> {
    if unsafe { libc::getuid() } == 0 {
        return Ok(());
    }
    try_raw_socket()
}

#[cfg(target_os = "linux")]
fn try_raw_socket() -> Result<(), InterceptorError> {
    crate::net::socket::afpacket::check_raw_access()
}

#[cfg(not(target_os = "linux"))]
fn try_raw_socket() -> Result<(), InterceptorError> {
    Err(InterceptorError::SocketPermission(
        "raw packet sockets are only supported on Linux".to_string(),
    ))
}

/// Modules that never touch the network run without any privilege.
pub fn needs_capture_access(module: &str) -> bool {
    !(module.starts_with("db.") || module.starts_with("util."))
}
