//! OAuth 2.0 credentials for the Google Photos client.
//!
//! The token file uses the "authorized user" layout that Google's own client
//! libraries write, so an existing `token.json` keeps working. When there is
//! no token file yet, [`authorize`] runs the installed-app consent flow once
//! and persists the result.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::config::AuthConfig;
use crate::logger::Logger;

pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the recorded expiry.
const REFRESH_BUFFER_SECS: i64 = 300;

// Redirect target for the console flow; the browser fails to load it and the
// user copies the address bar back into the terminal.
const CONSOLE_REDIRECT_URI: &str = "http://localhost";

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// Authorized-user credentials, as stored in the token file.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Current access token.
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// When the access token stops being valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Credentials")
            .field("token", &redact(&self.token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl Credentials {
    /// Whether the access token is missing or expires within five minutes.
    /// Credentials without a recorded expiry are taken as valid.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.token.is_none() {
            return true;
        }
        match self.expiry {
            Some(expiry) => now + Duration::seconds(REFRESH_BUFFER_SECS) >= expiry,
            None => false,
        }
    }

    /// Trade the refresh token for a new access token.
    ///
    /// The refresh token is kept when the response does not carry a new one.
    pub async fn refresh(&mut self, http: &Client) -> Result<()> {
        let refresh_token = self
            .refresh_token
            .clone()
            .context("No refresh token available")?;

        let response = post_token(
            http,
            &self.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ],
        )
        .await?;
        self.apply(response);
        Ok(())
    }

    fn apply(&mut self, response: TokenResponse) {
        self.token = Some(response.access_token);
        self.expiry = response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if let Some(scope) = response.scope {
            self.scopes = scope.split_whitespace().map(String::from).collect();
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read token file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse token file {}", path.display()))
    }

    /// Write the credentials to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize credentials")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write token file {}", path.display()))
    }
}

/// OAuth client registration, from the client-secret JSON downloaded from the
/// Google Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    /// Load the `installed` (or `web`) section of a client-secret file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read client secret {}", path.display()))?;
        let file: ClientSecretFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse client secret {}", path.display()))?;
        file.installed.or(file.web).with_context(|| {
            format!(
                "Client secret {} has neither an \"installed\" nor a \"web\" section",
                path.display()
            )
        })
    }

    /// Consent page URL for the given redirect target.
    pub fn authorization_url(&self, redirect_uri: &str, scopes: &[String], state: &str) -> Result<Url> {
        let scope = scopes.join(" ");
        Url::parse_with_params(
            &self.auth_uri,
            [
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
                ("state", state),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .with_context(|| format!("Invalid auth_uri {}", self.auth_uri))
    }

    /// Exchange an authorization code for credentials.
    pub async fn exchange_code(
        &self,
        http: &Client,
        code: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> Result<Credentials> {
        let response = post_token(
            http,
            &self.token_uri,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await?;

        let mut credentials = Credentials {
            token: None,
            refresh_token: None,
            token_uri: self.token_uri.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scopes: scopes.to_vec(),
            expiry: None,
        };
        credentials.apply(response);
        Ok(credentials)
    }
}

async fn post_token(http: &Client, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
    let resp = http
        .post(token_uri)
        .form(form)
        .send()
        .await
        .context("Token request failed")?;

    let status = resp.status();
    let text = resp.text().await.context("Failed to read token response")?;

    if !status.is_success() {
        anyhow::bail!("Token endpoint error ({}): {}", status, text);
    }

    serde_json::from_str(&text).context("Failed to parse token response JSON")
}

/// Obtain credentials: from the token file if there is one, otherwise through
/// the interactive consent flow (saving the token file afterwards).
pub async fn authorize(config: &AuthConfig, http: &Client, log: &Logger) -> Result<Credentials> {
    if config.token_path.exists() {
        let mut credentials = Credentials::load(&config.token_path)?;
        if credentials.scopes.is_empty() {
            credentials.scopes = config.scopes.clone();
        }
        log.info(format_args!("Loaded credentials from token file."));
        return Ok(credentials);
    }

    let secret = ClientSecret::load(&config.client_secret_path)?;
    let credentials = if config.headless {
        let credentials = console_flow(&secret, http, &config.scopes).await?;
        log.info(format_args!("Authentication via console (headless mode)."));
        credentials
    } else {
        let credentials = loopback_flow(&secret, http, &config.scopes).await?;
        log.info(format_args!("Authentication via local server (browser mode)."));
        credentials
    };

    credentials.save(&config.token_path)?;
    log.info(format_args!("Authentication complete. Token saved."));
    Ok(credentials)
}

async fn console_flow(secret: &ClientSecret, http: &Client, scopes: &[String]) -> Result<Credentials> {
    let state = new_state();
    let url = secret.authorization_url(CONSOLE_REDIRECT_URI, scopes, &state)?;

    println!("Please visit this URL to authorize this application:\n\n{url}\n");
    println!("After approving, paste the address your browser was sent to (or just the code):");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read authorization code from stdin")?;

    let code = extract_code(&line, &state)?;
    secret
        .exchange_code(http, &code, CONSOLE_REDIRECT_URI, scopes)
        .await
}

async fn loopback_flow(secret: &ClientSecret, http: &Client, scopes: &[String]) -> Result<Credentials> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("Failed to bind loopback listener")?;
    let port = listener
        .local_addr()
        .context("Failed to read loopback address")?
        .port();
    let redirect_uri = format!("http://127.0.0.1:{port}/");
    let state = new_state();
    let url = secret.authorization_url(&redirect_uri, scopes, &state)?;

    println!("Please visit this URL to authorize this application:\n\n{url}\n");

    let code = wait_for_redirect(&listener, &state).await?;
    secret.exchange_code(http, &code, &redirect_uri, scopes).await
}

/// Serve the loopback listener until the consent redirect arrives.
async fn wait_for_redirect(listener: &TcpListener, state: &str) -> Result<String> {
    loop {
        let (mut stream, _) = listener
            .accept()
            .await
            .context("Loopback listener failed")?;
        let request_line = read_request_line(&mut stream).await?;

        match parse_redirect_request(&request_line, state) {
            Ok(Some(code)) => {
                respond(&mut stream, "200 OK", "Authorization complete. You may close this window.").await;
                return Ok(code);
            }
            // browsers also ask for /favicon.ico and the like
            Ok(None) => respond(&mut stream, "404 Not Found", "Not found").await,
            Err(e) => {
                respond(&mut stream, "400 Bad Request", "Authorization failed.").await;
                return Err(e);
            }
        }
    }
}

/// Read the request head and return its first line.
async fn read_request_line(stream: &mut TcpStream) -> Result<String> {
    let mut buf = vec![0u8; 8192];
    let mut len = 0;
    while len < buf.len() {
        let n = stream
            .read(&mut buf[len..])
            .await
            .context("Failed to read redirect request")?;
        if n == 0 {
            break;
        }
        len += n;
        if buf[..len].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let head = String::from_utf8_lossy(&buf[..len]);
    Ok(head.lines().next().unwrap_or_default().to_string())
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Pull the authorization code out of a redirect's request line
/// (`GET /?code=…&state=… HTTP/1.1`).
///
/// Returns `Ok(None)` for requests that are not the redirect.
fn parse_redirect_request(request_line: &str, expected_state: &str) -> Result<Option<String>> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .context("Malformed redirect request")?;
    let url = Url::parse("http://127.0.0.1/")
        .and_then(|base| base.join(target))
        .context("Malformed redirect target")?;

    let param = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    };

    if let Some(error) = param("error") {
        anyhow::bail!("Authorization was denied: {error}");
    }
    let Some(code) = param("code") else {
        return Ok(None);
    };
    if param("state").as_deref() != Some(expected_state) {
        anyhow::bail!("Authorization redirect carried an unexpected state");
    }
    Ok(Some(code))
}

/// Accept either a bare code or the full redirect address pasted by the user.
/// A pasted address must carry the `state` the consent URL was built with.
fn extract_code(input: &str, expected_state: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        anyhow::bail!("No authorization code entered");
    }
    if !input.starts_with("http://") && !input.starts_with("https://") {
        return Ok(input.to_string());
    }

    let url = Url::parse(input).context("Could not parse the pasted address")?;
    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" => anyhow::bail!("Authorization was denied: {value}"),
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }
    let code = code.context("The pasted address has no code parameter")?;
    if state.as_deref() != Some(expected_state) {
        anyhow::bail!("The pasted address carried an unexpected state");
    }
    Ok(code)
}

/// 16 random bytes, URL-safe base64, echoed back by the consent redirect.
fn new_state() -> String {
    let mut state_bytes = [0u8; 16];
    rand::thread_rng().fill(&mut state_bytes);
    URL_SAFE_NO_PAD.encode(state_bytes)
}
