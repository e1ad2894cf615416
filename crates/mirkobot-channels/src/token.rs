use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use mirkobot_core::{MirkobotError, Result};
use serde_json::{Map, Value};
use tracing::debug;

/// Login credentials carried by the chat-server token.
///
/// The token is a base64-encoded JSON object with at least a `login` field.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub login: String,
    /// The raw token, sent verbatim on join.
    pub token: String,
    /// Any other fields found in the decoded blob.
    pub claims: Map<String, Value>,
}

impl Credentials {
    /// Decode a token. An undecodable token is kept as-is and doubles as the login.
    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        Self::decode(token).unwrap_or_else(|e| {
            debug!(error = %e, "using the raw token as login");
            Self {
                login: token.to_string(),
                token: token.to_string(),
                claims: Map::new(),
            }
        })
    }

    /// Strict variant of [`from_token`](Self::from_token): the token must be
    /// base64 JSON carrying a string `login`.
    pub fn decode(token: &str) -> Result<Self> {
        let token = token.trim();
        let bytes = [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(token).ok())
            .ok_or_else(|| MirkobotError::Token("not base64".into()))?;
        let mut claims = match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(MirkobotError::Token("not a JSON object".into())),
            Err(e) => return Err(MirkobotError::Token(format!("not JSON: {e}"))),
        };
        let login = match claims.remove("login") {
            Some(Value::String(login)) if !login.trim().is_empty() => login,
            _ => return Err(MirkobotError::Token("no login field".into())),
        };
        Ok(Self {
            login,
            token: token.to_string(),
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(v: Value) -> String {
        STANDARD.encode(v.to_string())
    }

    #[test]
    fn decodes_login_and_keeps_claims() {
        let token = encode(json!({"login": "mirkobot", "id": 7}));
        let creds = Credentials::from_token(&token);
        assert_eq!(creds.login, "mirkobot");
        assert_eq!(creds.token, token);
        assert_eq!(creds.claims.get("id"), Some(&json!(7)));
    }

    #[test]
    fn garbage_token_becomes_login() {
        let creds = Credentials::from_token("not-a-token!");
        assert_eq!(creds.login, "not-a-token!");
        assert!(creds.claims.is_empty());
    }

    #[test]
    fn json_without_login_falls_back_to_token() {
        let token = encode(json!({"id": 1}));
        assert_eq!(Credentials::from_token(&token).login, token);
    }

    #[test]
    fn strict_decode_names_the_problem() {
        let reason = |token: &str| match Credentials::decode(token) {
            Err(MirkobotError::Token(reason)) => reason,
            other => panic!("expected a token error, got {other:?}"),
        };
        assert_eq!(reason("not-a-token!"), "not base64");
        assert_eq!(reason(&encode(json!(["login"]))), "not a JSON object");
        assert_eq!(reason(&encode(json!({"login": 5}))), "no login field");
        assert!(reason(&STANDARD.encode("plain text")).starts_with("not JSON"));

        let creds = Credentials::decode(&encode(json!({"login": "mirkobot"}))).unwrap();
        assert_eq!(creds.login, "mirkobot");
    }

    #[test]
    fn non_object_json_is_rejected() {
        let token = encode(json!(["login"]));
        assert_eq!(Credentials::from_token(&token).login, token);
    }
}
