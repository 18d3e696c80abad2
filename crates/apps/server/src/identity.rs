//! Turns a provider access token into an [`IdentityProfile`] by asking the
//! provider who the token belongs to.

use async_trait::async_trait;
use catalog::{IdentityProfile, OAuthProvider};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde_json::Value;

const GOOGLE_TOKENINFO: &str = "https://oauth2.googleapis.com/tokeninfo";
const GITHUB_USER: &str = "https://api.github.com/user";
const GITHUB_EMAILS: &str = "https://api.github.com/user/emails";
const LINKEDIN_USERINFO: &str = "https://api.linkedin.com/v2/userinfo";
const CLIENT_AGENT: &str = "layer-catalog";

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityError(pub String);

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "identity lookup failed: {}", self.0)
    }
}

impl std::error::Error for IdentityError {}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(
        &self,
        provider: OAuthProvider,
        token: &str,
    ) -> Result<IdentityProfile, IdentityError>;
}

/// Talks to the real provider endpoints.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
}

impl HttpIdentityProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn fetch(&self, req: reqwest::RequestBuilder) -> Result<Value, IdentityError> {
        let resp = req
            .header(USER_AGENT, CLIENT_AGENT)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| IdentityError(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(IdentityError(format!("provider answered {status}")));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| IdentityError(e.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify(
        &self,
        provider: OAuthProvider,
        token: &str,
    ) -> Result<IdentityProfile, IdentityError> {
        match provider {
            OAuthProvider::Google => {
                let doc = self
                    .fetch(self.http.get(GOOGLE_TOKENINFO).query(&[("access_token", token)]))
                    .await?;
                profile_from(provider, &doc)
            }
            OAuthProvider::Github => {
                let auth = format!("token {token}");
                let doc = self
                    .fetch(self.http.get(GITHUB_USER).header(AUTHORIZATION, &auth))
                    .await?;
                let mut profile = profile_from(provider, &doc)?;
                if profile.email.is_none() {
                    // Private addresses are only listed by the emails endpoint.
                    let emails = self
                        .fetch(self.http.get(GITHUB_EMAILS).header(AUTHORIZATION, &auth))
                        .await?;
                    profile.email = primary_email(&emails);
                }
                Ok(profile)
            }
            OAuthProvider::Linkedin => {
                let doc = self
                    .fetch(self.http.get(LINKEDIN_USERINFO).bearer_auth(token))
                    .await?;
                profile_from(provider, &doc)
            }
        }
    }
}

/// Map a provider user document onto a profile. Field names differ per
/// provider; the first one present wins.
pub fn profile_from(provider: OAuthProvider, doc: &Value) -> Result<IdentityProfile, IdentityError> {
    let subject = first_text(doc, &["sub", "id", "user_id"])
        .ok_or_else(|| IdentityError("provider did not return a subject".to_string()))?;
    Ok(IdentityProfile {
        provider,
        subject,
        email: first_text(doc, &["email"]),
        username_hint: first_text(doc, &["login", "preferred_username", "given_name"]),
        full_name: first_text(doc, &["name"]),
        avatar_url: first_text(doc, &["picture", "avatar_url"]),
    })
}

/// Pick the address GitHub marks primary and verified, else any verified one.
pub fn primary_email(doc: &Value) -> Option<String> {
    let entries = doc.as_array()?;
    let verified = |e: &&Value| e.get("verified").and_then(Value::as_bool) == Some(true);
    entries
        .iter()
        .filter(verified)
        .find(|e| e.get("primary").and_then(Value::as_bool) == Some(true))
        .or_else(|| entries.iter().find(verified))
        .and_then(|e| e.get("email"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn first_text(doc: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match doc.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn github_numeric_id_becomes_subject() {
        let doc = json!({
            "id": 583231,
            "login": "octocat",
            "name": "The Octocat",
            "email": null,
            "avatar_url": "https://avatars.example/u/583231"
        });
        let p = profile_from(OAuthProvider::Github, &doc).unwrap();
        assert_eq!(p.subject, "583231");
        assert_eq!(p.username_hint.as_deref(), Some("octocat"));
        assert_eq!(p.email, None);
        assert_eq!(p.avatar_url.as_deref(), Some("https://avatars.example/u/583231"));
    }

    #[test]
    fn google_tokeninfo_uses_sub() {
        let doc = json!({"sub": "1099", "email": "ada@example.com", "picture": "p"});
        let p = profile_from(OAuthProvider::Google, &doc).unwrap();
        assert_eq!(p.subject, "1099");
        assert_eq!(p.email.as_deref(), Some("ada@example.com"));
        assert_eq!(p.avatar_url.as_deref(), Some("p"));
    }

    #[test]
    fn missing_subject_is_rejected() {
        assert!(profile_from(OAuthProvider::Linkedin, &json!({"email": "x@y"})).is_err());
    }

    #[test]
    fn primary_verified_email_is_preferred() {
        let doc = json!([
            {"email": "old@example.com", "primary": false, "verified": true},
            {"email": "main@example.com", "primary": true, "verified": true},
            {"email": "spam@example.com", "primary": false, "verified": false}
        ]);
        assert_eq!(primary_email(&doc).as_deref(), Some("main@example.com"));

        let unverified_primary = json!([
            {"email": "a@example.com", "primary": true, "verified": false},
            {"email": "b@example.com", "primary": false, "verified": true}
        ]);
        assert_eq!(
            primary_email(&unverified_primary).as_deref(),
            Some("b@example.com")
        );
        assert_eq!(primary_email(&json!([])), None);
    }
}
