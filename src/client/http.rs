//! HTTP helpers shared by the Streamable-HTTP and legacy-SSE transports.

use crate::config::McpServer;
use anyhow::Result;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

/// Resolve the endpoint used for Streamable HTTP transport.
pub(crate) fn resolve_streamable_endpoint(server: &McpServer) -> Result<String> {
    server
        .base_url
        .as_ref()
        .map(|url| url.as_str().to_string())
        .ok_or_else(|| anyhow::anyhow!("base_url required for HTTP transport"))
}

/// Resolve the POST endpoint used to send JSON-RPC requests under the legacy
/// SSE transport, falling back to `base_url` when `post_url` is unset.
pub(crate) fn resolve_sse_post_endpoint(server: &McpServer) -> Result<url::Url> {
    server
        .post_url
        .clone()
        .or_else(|| server.base_url.clone())
        .ok_or_else(|| anyhow::anyhow!("base_url (or postUrl) required for SSE transport"))
}

/// Build a reqwest client injecting configured headers and an OAuth bearer
/// token resolved from the OS keyring, if configured.
pub(crate) async fn build_http_client_with_auth(server: &McpServer) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    if let Some(configured) = &server.headers {
        for var in configured {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(var.key.as_str()), HeaderValue::try_from(var.value.as_str())) {
                headers.insert(name, value);
            }
        }
    }

    if let Some(auth) = &server.auth
        && (auth.scheme.eq_ignore_ascii_case("oauth") || auth.scheme.eq_ignore_ascii_case("oauth2"))
        && let Some(token) = load_oauth_token_from_keyring(server).await?.or_else(|| auth.token.clone())
        && let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token))
    {
        headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(server.timeout(std::time::Duration::from_secs(30)))
        .build()?;
    Ok(client)
}

/// Retrieve a bearer token from the OS keyring for the given server's base URL.
async fn load_oauth_token_from_keyring(server: &McpServer) -> Result<Option<String>> {
    let service = "llamagate-mcp-oauth";
    let account = if let Some(url) = &server.base_url {
        format!("{}://{}{}", url.scheme(), url.host_str().unwrap_or(""), url.path())
    } else {
        "stdio".to_string()
    };
    let entry = keyring::Entry::new(service, &account)?;
    match entry.get_password() {
        Ok(p) => Ok(Some(p)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => {
            tracing::warn!("keyring error: {}", e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn resolve_endpoint_returns_string() {
        let url = Url::parse("https://example.com/mcp").unwrap();
        let server = McpServer {
            base_url: Some(url),
            ..Default::default()
        };
        let endpoint = resolve_streamable_endpoint(&server).expect("endpoint resolves");
        assert_eq!(endpoint, "https://example.com/mcp");
    }

    #[test]
    fn resolve_endpoint_errors_without_url() {
        let server = McpServer::default();
        let err = resolve_streamable_endpoint(&server).expect_err("missing endpoint");
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn sse_post_endpoint_prefers_post_url() {
        let server = McpServer {
            base_url: Some(Url::parse("https://example.com/sse").unwrap()),
            post_url: Some(Url::parse("https://example.com/rpc").unwrap()),
            ..Default::default()
        };
        let endpoint = resolve_sse_post_endpoint(&server).expect("endpoint resolves");
        assert_eq!(endpoint.as_str(), "https://example.com/rpc");
    }
}
