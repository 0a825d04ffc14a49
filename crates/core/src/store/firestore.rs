use crate::config::Settings;
use crate::domain::recipient::StoredRecord;
use crate::error::{FailureKind, RunFailure};
use crate::store::RecordStore;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::time::Duration;

const PROD_BASE_URL: &str = "https://firestore.googleapis.com";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const DEFAULT_DATABASE: &str = "(default)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const PAGE_SIZE: u32 = 300;
const ASSERTION_TTL_SECS: i64 = 3600;

/// Google service account credentials, as serialized in `FIREBASE_SERVICE_ACCOUNT`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccount {
    pub fn parse(raw: &str) -> Result<Self> {
        let account = serde_json::from_str::<ServiceAccount>(raw.trim())
            .context("FIREBASE_SERVICE_ACCOUNT is not valid service account JSON")?;
        anyhow::ensure!(
            !account.client_email.trim().is_empty(),
            "service account client_email must be non-empty"
        );
        anyhow::ensure!(
            !account.private_key.trim().is_empty(),
            "service account private_key must be non-empty"
        );
        Ok(account)
    }
}

#[derive(Debug)]
enum Auth {
    ServiceAccount(ServiceAccount),
    Emulator,
}

#[derive(Debug)]
pub struct FirestoreClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    auth: Auth,

    // Access tokens live ~1h; one run needs at most one.
    token_cache: tokio::sync::Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: AccessToken,
    fetched_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct AccessToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

impl AccessToken {
    fn is_expired_or_stale(&self, fetched_at: chrono::DateTime<chrono::Utc>) -> bool {
        if self.expires_in == 0 {
            return true;
        }
        let exp = fetched_at + chrono::Duration::seconds(self.expires_in as i64);
        chrono::Utc::now() + chrono::Duration::minutes(2) >= exp
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl FirestoreClient {
    /// Builds the client from the serialized service account, or from `FIRESTORE_EMULATOR_HOST`.
    /// Missing or unparseable credentials surface as a `Config` failure.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build firestore http client")?;

        if let Some(host) = settings.firestore_emulator_host.as_deref() {
            let project_id = settings
                .firestore_project_id
                .clone()
                .unwrap_or_else(|| "demo-project".to_string());
            return Ok(Self {
                http,
                base_url: format!("http://{}", host.trim_end_matches('/')),
                project_id,
                auth: Auth::Emulator,
                token_cache: tokio::sync::Mutex::new(None),
            });
        }

        let raw = settings
            .require_firebase_service_account()
            .map_err(|e| RunFailure::new(FailureKind::Config, "store_credentials", e.to_string()))?;
        let account = ServiceAccount::parse(raw).map_err(|e| {
            RunFailure::new(FailureKind::Config, "store_credentials", format!("{e:#}"))
        })?;
        let project_id = settings
            .firestore_project_id
            .clone()
            .unwrap_or_else(|| account.project_id.clone());

        Ok(Self {
            http,
            base_url: PROD_BASE_URL.to_string(),
            project_id,
            auth: Auth::ServiceAccount(account),
            token_cache: tokio::sync::Mutex::new(None),
        })
    }

    fn documents_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/v1/projects/{}/databases/{}/documents",
            self.base_url.trim_end_matches('/'),
            self.project_id,
            DEFAULT_DATABASE
        ))
        .context("invalid firestore base url")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("firestore base url cannot carry path segments"))?
            .extend(segments);
        Ok(url)
    }

    async fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = match &self.auth {
            // The emulator grants full access to the `owner` token.
            Auth::Emulator => "Bearer owner".to_string(),
            Auth::ServiceAccount(account) => {
                format!("Bearer {}", self.access_token_cached(account).await?)
            }
        };
        headers.insert("authorization", HeaderValue::from_str(&bearer)?);
        Ok(headers)
    }

    async fn access_token_cached(&self, account: &ServiceAccount) -> Result<String> {
        let mut guard = self.token_cache.lock().await;
        if let Some(cached) = guard.as_ref() {
            if !cached.token.is_expired_or_stale(cached.fetched_at) {
                return Ok(cached.token.access_token.clone());
            }
        }

        let fetched_at = chrono::Utc::now();
        let token = self.fetch_access_token(account).await?;
        let access_token = token.access_token.clone();
        *guard = Some(CachedToken { token, fetched_at });
        Ok(access_token)
    }

    async fn fetch_access_token(&self, account: &ServiceAccount) -> Result<AccessToken> {
        let token_uri = account.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let iat = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &account.client_email,
            scope: DATASTORE_SCOPE,
            aud: token_uri,
            iat,
            exp: iat + ASSERTION_TTL_SECS,
        };
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .context("service account private_key is not a valid RSA PEM key")?;
        let assertion = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
            &claims,
            &key,
        )
        .context("failed to sign service account assertion")?;

        let res = self
            .http
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .context("google oauth token request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read google oauth token response")?;
        if !status.is_success() {
            anyhow::bail!("google oauth token HTTP {status}: {}", truncate(&text, 200));
        }

        serde_json::from_str::<AccessToken>(&text).context("failed to parse google oauth token")
    }

    async fn list_page(
        &self,
        collection: &str,
        page_token: Option<&str>,
    ) -> Result<ListDocumentsResponse> {
        let mut url = self.documents_url(&[collection])?;
        url.query_pairs_mut()
            .append_pair("pageSize", &PAGE_SIZE.to_string());
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }

        let res = self
            .http
            .get(url)
            .headers(self.headers().await?)
            .send()
            .await
            .context("firestore list request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read firestore list response")?;
        if !status.is_success() {
            anyhow::bail!("firestore list HTTP {status}: {}", truncate(&text, 200));
        }

        serde_json::from_str::<ListDocumentsResponse>(&text)
            .context("failed to parse firestore list response")
    }
}

#[async_trait::async_trait]
impl RecordStore for FirestoreClient {
    fn store_name(&self) -> &'static str {
        "firestore"
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>> {
        let url = self.documents_url(&[collection, id])?;
        let res = self
            .http
            .get(url)
            .headers(self.headers().await?)
            .send()
            .await
            .context("firestore get request failed")?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = res
            .text()
            .await
            .context("failed to read firestore get response")?;
        if !status.is_success() {
            anyhow::bail!("firestore get HTTP {status}: {}", truncate(&text, 200));
        }

        let doc = serde_json::from_str::<FirestoreDocument>(&text)
            .context("failed to parse firestore document")?;
        Ok(Some(doc.into_record()))
    }

    async fn scan(&self, collection: &str) -> Result<Vec<StoredRecord>> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_page(collection, page_token.as_deref()).await?;
            out.extend(page.documents.into_iter().map(FirestoreDocument::into_record));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        tracing::debug!(collection, records = out.len(), "firestore scan complete");
        Ok(out)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<FirestoreDocument>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

impl FirestoreDocument {
    fn into_record(self) -> StoredRecord {
        let id = self
            .name
            .rsplit('/')
            .next()
            .unwrap_or(self.name.as_str())
            .to_string();
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), decode_value(v)))
            .collect();
        StoredRecord::new(id, fields)
    }
}

/// Firestore typed value (`{"stringValue": "x"}`) to plain JSON.
fn decode_value(v: &Value) -> Value {
    let Some(obj) = v.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = obj.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().unwrap_or(false)),
        // int64 travels as a decimal string.
        "integerValue" => match inner {
            Value::String(s) => s
                .parse::<i64>()
                .map(|i| Value::Number(i.into()))
                .unwrap_or_else(|_| Value::String(s.clone())),
            Value::Number(n) => Value::Number(n.clone()),
            _ => Value::Null,
        },
        "doubleValue" => inner
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "mapValue" => {
            let mut out = Map::new();
            if let Some(fields) = inner.get("fields").and_then(Value::as_object) {
                for (k, fv) in fields {
                    out.insert(k.clone(), decode_value(fv));
                }
            }
            Value::Object(out)
        }
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|vs| vs.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        _ => inner.clone(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_typed_document_into_flat_record() {
        let doc: FirestoreDocument = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/users/owner",
            "fields": {
                "telegramChatId": {"stringValue": "12345"},
                "tgChatId": {"integerValue": "-100987"},
                "ratio": {"doubleValue": 0.5},
                "active": {"booleanValue": true},
                "deleted": {"nullValue": null},
                "tags": {"arrayValue": {"values": [{"stringValue": "a"}]}},
                "meta": {"mapValue": {"fields": {"n": {"integerValue": "3"}}}}
            }
        }))
        .unwrap();

        let record = doc.into_record();
        assert_eq!(record.id, "owner");
        assert_eq!(record.fields["telegramChatId"], json!("12345"));
        assert_eq!(record.fields["tgChatId"], json!(-100987));
        assert_eq!(record.fields["ratio"], json!(0.5));
        assert_eq!(record.fields["active"], json!(true));
        assert_eq!(record.fields["deleted"], Value::Null);
        assert_eq!(record.fields["tags"], json!(["a"]));
        assert_eq!(record.fields["meta"], json!({"n": 3}));
    }

    #[test]
    fn list_response_tolerates_empty_collection() {
        let page: ListDocumentsResponse = serde_json::from_value(json!({})).unwrap();
        assert!(page.documents.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn rejects_service_account_without_key() {
        let raw = r#"{"project_id":"p","client_email":"bot@p.iam.gserviceaccount.com","private_key":""}"#;
        assert!(ServiceAccount::parse(raw).is_err());
        assert!(ServiceAccount::parse("not json").is_err());
    }

    #[test]
    fn missing_credentials_are_a_config_failure() {
        let settings = Settings {
            telegram_bot_token: None,
            firebase_service_account: None,
            firestore_project_id: None,
            firestore_emulator_host: None,
            target_user_id: None,
            target_url: None,
            sentry_dsn: None,
        };
        let err = FirestoreClient::from_settings(&settings).unwrap_err();
        assert_eq!(crate::error::classify(&err), Some(FailureKind::Config));
    }

    #[test]
    fn document_url_escapes_ids() {
        let settings = Settings {
            telegram_bot_token: None,
            firebase_service_account: None,
            firestore_project_id: Some("proj".to_string()),
            firestore_emulator_host: Some("localhost:8080".to_string()),
            target_user_id: None,
            target_url: None,
            sentry_dsn: None,
        };
        let client = FirestoreClient::from_settings(&settings).unwrap();
        let url = client.documents_url(&["users", "a b"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1/projects/proj/databases/(default)/documents/users/a%20b"
        );
    }
}
