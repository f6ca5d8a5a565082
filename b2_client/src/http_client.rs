use std::sync::Arc;

use b2_config::groups::client::ConfigValueGroup as ClientConfig;
use b2_types::ApiErrorResponse;
use bytes::Bytes;
use http::Extensions;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::{AuthManager, Session};
use crate::error::{is_refreshable_auth_code, AuthError, TransportError};

const USER_AGENT: &str = concat!("b2/", env!("CARGO_PKG_VERSION"));

/// Marks a request as authenticated with the session token. The name shows up in logs.
#[derive(Clone, Copy, Debug)]
pub struct Api(pub &'static str);

/// Builds the plain reqwest client with the pool settings from the configuration.
pub fn build_reqwest_client(config: &ClientConfig) -> Result<reqwest::Client, TransportError> {
    Ok(reqwest::Client::builder()
        .pool_idle_timeout(config.idle_connection_timeout)
        .pool_max_idle_per_host(config.max_idle_connections)
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

/// Builds the client used for every API, upload and download request.
pub fn build_auth_http_client(client: reqwest::Client, auth: Arc<AuthManager>) -> ClientWithMiddleware {
    ClientBuilder::new(client).with(AuthMiddleware { auth }).build()
}

/// Adds the session token to requests tagged with [`Api`].
///
/// A 401 carrying `expired_auth_token` or `bad_auth_token` triggers one refresh of the session the
/// request was signed with, followed by exactly one replay. A second rejection becomes
/// [`AuthError::Rejected`].
pub struct AuthMiddleware {
    auth: Arc<AuthManager>,
}

impl AuthMiddleware {
    fn sign(req: &mut Request, session: &Session) -> reqwest_middleware::Result<()> {
        let value = HeaderValue::from_str(&session.authorization_token)
            .map_err(|e| reqwest_middleware::Error::Middleware(AuthError::Malformed(e.to_string()).into()))?;
        req.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let Some(Api(api_name)) = extensions.get::<Api>().copied() else {
            return next.run(req, extensions).await;
        };

        let session = self
            .auth
            .session()
            .await
            .map_err(|e| reqwest_middleware::Error::Middleware(e.into()))?;
        Self::sign(&mut req, &session)?;

        // Bodies streamed from disk can't be replayed; those requests get no second chance.
        let replay = req.try_clone();

        let response = next.clone().run(req, extensions).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let (response, error) = peek_api_error(response).await?;
        let Some(mut replay) = replay.filter(|_| error.as_ref().is_some_and(|e| is_refreshable_auth_code(&e.code)))
        else {
            return Ok(response);
        };

        debug!(api_name, version = session.version, "token rejected; refreshing and replaying");
        let session = self
            .auth
            .refresh(session.version)
            .await
            .map_err(|e| reqwest_middleware::Error::Middleware(e.into()))?;
        Self::sign(&mut replay, &session)?;

        let response = next.run(replay, extensions).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let (_, error) = peek_api_error(response).await?;
        let error = error.unwrap_or_else(|| ApiErrorResponse {
            status: StatusCode::UNAUTHORIZED.as_u16(),
            code: "unauthorized".to_string(),
            message: String::new(),
        });
        warn!(api_name, code = error.code, "request rejected after re-authorization");
        Err(reqwest_middleware::Error::Middleware(
            AuthError::Rejected {
                code: error.code,
                message: error.message,
            }
            .into(),
        ))
    }
}

/// Reads an error body and hands back an equivalent response so the caller can still consume it.
async fn peek_api_error(response: Response) -> reqwest_middleware::Result<(Response, Option<ApiErrorResponse>)> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    let parsed = serde_json::from_slice::<ApiErrorResponse>(&body).ok();

    let mut rebuilt = http::Response::new(body);
    *rebuilt.status_mut() = status;
    *rebuilt.headers_mut() = headers;
    Ok((Response::from(rebuilt), parsed))
}

/// The shared HTTP layer of the client: one connection pool, the auth middleware and helpers that
/// turn non-success responses into [`TransportError`]s.
#[derive(Clone)]
pub struct Transport {
    client: ClientWithMiddleware,
    auth: Arc<AuthManager>,
}

impl Transport {
    pub fn new(config: &ClientConfig, auth: Arc<AuthManager>) -> Result<Self, TransportError> {
        let client = build_reqwest_client(config)?;
        Ok(Self::from_client(client, auth))
    }

    pub fn from_client(client: reqwest::Client, auth: Arc<AuthManager>) -> Self {
        Self {
            client: build_auth_http_client(client, auth.clone()),
            auth,
        }
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub async fn session(&self) -> Result<Arc<Session>, TransportError> {
        Ok(self.auth.session().await?)
    }

    pub fn client(&self) -> &ClientWithMiddleware {
        &self.client
    }

    /// Sends a request and fails on any non-success status.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request.send().await?;
        check_response(response).await
    }

    /// POSTs `body` as JSON to the named API operation of the current session.
    pub async fn call_api<Req, Resp>(&self, api_name: &'static str, body: &Req) -> Result<Resp, TransportError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let session = self.session().await?;
        let url = session.api_endpoint(api_name);
        debug!(api_name, "calling API");

        let request = self.client.post(url).with_extension(Api(api_name)).json(body);
        let response = self.send(request).await?;
        let body: Bytes = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::InvalidResponse(format!("{api_name}: {e}")))
    }
}

/// Passes success responses through; otherwise decodes the error body.
pub async fn check_response(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    Err(TransportError::from_api_error(status, &body))
}
