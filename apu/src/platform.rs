//! Host operating system queries

/// Returns (major, minor) version of macOS, or None on other platforms.
#[cfg(target_os = "macos")]
#[must_use]
pub fn macos_version() -> Option<(u32, u32)> {
    let mut buf = [0u8; 32];
    let mut len = buf.len();
    let status = unsafe {
        libc::sysctlbyname(
            c"kern.osproductversion".as_ptr(),
            buf.as_mut_ptr().cast(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if status != 0 {
        return None;
    }
    let version = std::ffi::CStr::from_bytes_until_nul(&buf).ok()?.to_str().ok()?;
    parse_version(version)
}

#[cfg(not(target_os = "macos"))]
#[must_use]
pub fn macos_version() -> Option<(u32, u32)> {
    None
}

/// Whether the host runs macOS 13.`minor` or any later release
#[must_use]
pub fn is_macos_13_or_newer(minor: u32) -> bool {
    is_at_least(macos_version(), minor)
}

fn is_at_least(version: Option<(u32, u32)>, minor: u32) -> bool {
    match version {
        Some((major, _)) if major > 13 => true,
        Some((13, m)) => m >= minor,
        _ => false,
    }
}

fn parse_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |m| m.parse().ok())?;
    Some((major, minor))
}

#[test]
fn version_comparison() {
    assert_eq!(parse_version("13.4.1"), Some((13, 4)));
    assert_eq!(parse_version("14"), Some((14, 0)));
    assert_eq!(parse_version("x.1"), None);
    assert!(is_at_least(Some((13, 3)), 0));
    assert!(is_at_least(Some((13, 3)), 3));
    assert!(!is_at_least(Some((13, 2)), 3));
    assert!(is_at_least(Some((15, 0)), 9));
    assert!(!is_at_least(Some((12, 6)), 0));
    assert!(!is_at_least(None, 0));
}
