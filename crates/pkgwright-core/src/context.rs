//! Per-build state shared by the package drivers.

/// Values computed once per build and threaded through every package write.
///
/// `package_sources` fills in the cookie and source package name; the binary
/// driver only reads them.
#[derive(Clone)]
pub struct BuildContext {
    /// Secret handed to the signature generator.
    pub pass_phrase: Option<String>,
    /// `"<host> <time>"`, shared by the source package and its binaries.
    pub cookie: Option<String>,
    /// Filename of the source package, recorded as `SOURCERPM`.
    pub source_package_name: Option<String>,
    pub build_host: String,
    /// Unix seconds.
    pub build_time: u32,
}

impl BuildContext {
    /// Capture the host name and current time.
    pub fn new() -> Self {
        Self::with_host_and_time(host_name(), now())
    }

    /// A context with fixed provenance, for reproducible output.
    pub fn with_host_and_time(build_host: impl Into<String>, build_time: u32) -> Self {
        Self {
            pass_phrase: None,
            cookie: None,
            source_package_name: None,
            build_host: build_host.into(),
            build_time,
        }
    }

    pub fn with_pass_phrase(mut self, pass_phrase: Option<String>) -> Self {
        self.pass_phrase = pass_phrase;
        self
    }

    /// Create the build cookie and return it.
    pub fn make_cookie(&mut self) -> &str {
        self.cookie
            .insert(format!("{} {}", self.build_host, self.build_time))
            .as_str()
    }
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("pass_phrase", &self.pass_phrase.as_ref().map(|_| "<redacted>"))
            .field("cookie", &self.cookie)
            .field("source_package_name", &self.source_package_name)
            .field("build_host", &self.build_host)
            .field("build_time", &self.build_time)
            .finish()
    }
}

fn now() -> u32 {
    u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX)
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn host_name() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the pointer and length describe `buf`, which outlives the call.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).into_owned();
    if name.is_empty() {
        "localhost".to_string()
    } else {
        name
    }
}

#[cfg(not(unix))]
fn host_name() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_is_host_and_time() {
        let mut ctx = BuildContext::with_host_and_time("builder", 1_700_000_000);
        assert_eq!(ctx.make_cookie(), "builder 1700000000");
        assert_eq!(ctx.cookie.as_deref(), Some("builder 1700000000"));
    }

    #[test]
    fn new_captures_host() {
        let ctx = BuildContext::new();
        assert!(!ctx.build_host.is_empty());
        assert!(ctx.build_time > 0);
    }

    #[test]
    fn debug_hides_pass_phrase() {
        let ctx = BuildContext::with_host_and_time("h", 1).with_pass_phrase(Some("secret".into()));
        let dbg = format!("{ctx:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
