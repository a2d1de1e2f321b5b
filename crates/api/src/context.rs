use certgate_auth::CertificateIdentity;
use uuid::Uuid;

/// Correlation id for one request; echoed in the `x-request-id` header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

/// Transport-level identity of the calling system.
///
/// Taken from the client certificate CN header set by the TLS terminator.
/// That header is only read when configured, because a client could
/// otherwise send it itself. `None` when unconfigured, absent or blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerCertificate(Option<CertificateIdentity>);

impl CallerCertificate {
    pub fn new(common_name: Option<&str>) -> Self {
        Self(
            common_name
                .map(str::trim)
                .filter(|cn| !cn.is_empty())
                .map(CertificateIdentity::new),
        )
    }

    pub fn identity(&self) -> Option<&CertificateIdentity> {
        self.0.as_ref()
    }
}
