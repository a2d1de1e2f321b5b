use serde::Serialize;
use serde_json::{Map, Value};

use certgate_auth::{CallerContext, IdentityReference};
use certgate_core::GatewayError;

// -------------------------
// Request DTOs
// -------------------------

/// Authentication fields carried inside every API payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthEnvelope {
    /// Set by trusted callers acting for a directory user.
    pub identity: Option<IdentityReference>,
    /// Bearer token of arms-length callers.
    pub token: Option<String>,
}

/// A JSON object payload split into its authentication fields and the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedPayload {
    pub auth: AuthEnvelope,
    pub data: Map<String, Value>,
}

impl SignedPayload {
    pub fn parse(body: &[u8]) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::malformed_payload(format!("body is not JSON: {e}")))?;
        let Value::Object(mut data) = value else {
            return Err(GatewayError::malformed_payload("body is not a JSON object"));
        };

        let identity = match data.remove("identity") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<IdentityReference>(raw)
                    .map_err(|e| GatewayError::malformed_payload(format!("identity: {e}")))?,
            ),
        };
        let token = match data.remove("token") {
            None | Some(Value::Null) => None,
            Some(Value::String(token)) => Some(token),
            Some(_) => return Err(GatewayError::malformed_payload("token must be a string")),
        };

        Ok(Self {
            auth: AuthEnvelope { identity, token },
            data,
        })
    }
}

/// Certificate families the issuance backend produces.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CertificateKind {
    Vaccination,
    Test,
    Recovery,
}

impl CertificateKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "vaccination" => Some(Self::Vaccination),
            "test" => Some(Self::Test),
            "recovery" => Some(Self::Recovery),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vaccination => "vaccination",
            Self::Test => "test",
            Self::Recovery => "recovery",
        }
    }

    /// Capability a caller needs to create this kind.
    pub fn capability(self) -> String {
        format!("create-{}-certificate", self.as_str())
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerResponse {
    pub caller: CallerContext,
    pub trusted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_auth_fields_from_data() {
        let payload = SignedPayload::parse(
            br#"{"identity":{"extId":"doc-1","idpSource":"hin"},"name":"Muster","token":null}"#,
        )
        .unwrap();
        assert_eq!(payload.auth.identity.unwrap().ext_id.as_str(), "doc-1");
        assert_eq!(payload.auth.token, None);
        assert_eq!(payload.data.len(), 1);
        assert_eq!(payload.data["name"], "Muster");
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let bodies: [&[u8]; 4] = [b"[1,2]", b"not json", br#"{"identity":"doc-1"}"#, br#"{"token":42}"#];
        for body in bodies {
            let err = SignedPayload::parse(body).unwrap_err();
            assert_eq!(err.code(), certgate_core::ErrorCode::MalformedPayload);
        }
    }

    #[test]
    fn certificate_kinds_map_to_capabilities() {
        assert_eq!(
            CertificateKind::parse("recovery").map(CertificateKind::capability),
            Some("create-recovery-certificate".to_string())
        );
        assert_eq!(CertificateKind::parse("passport"), None);
    }
}
