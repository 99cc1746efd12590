//! Warp API client constants
//!
//! Public endpoint URLs and client-identification headers. These values
//! are not secrets — they identify the client application to the upstream
//! proxy. The actual secrets (access/refresh/identity tokens) live in the
//! Secrets Store.

/// Token endpoint used for both anonymous-acquisition exchange and
/// ongoing refresh-token refresh. The `key` query parameter is a
/// deployment-specific Identity Toolkit API key; the placeholder below is
/// not a real credential and any real deployment must supply its own via
/// configuration.
pub const PROXY_TOKEN_ENDPOINT: &str =
    "https://app.warp.dev/proxy/token?key=REPLACE_WITH_DEPLOYMENT_API_KEY";

/// Identity Toolkit custom-token sign-in endpoint. The `key` query
/// parameter is normally parsed out of `PROXY_TOKEN_ENDPOINT`; this
/// constant is the path portion only.
pub const IDENTITY_SIGNIN_ENDPOINT: &str =
    "https://www.googleapis.com/identitytoolkit/v3/relyingparty/verifyCustomToken";

/// GraphQL endpoint for `CreateAnonymousUser` and `GetRequestLimitInfo`.
pub const GRAPHQL_ENDPOINT: &str = "https://app.warp.dev/graphql/v2?op=CreateAnonymousUser";

/// Fallback Identity Toolkit API key used only if `PROXY_TOKEN_ENDPOINT`'s
/// `key` query parameter cannot be parsed. Deliberately not a real key —
/// any deployment that reaches this fallback is misconfigured and will
/// fail at the identity sign-in step, loudly, rather than silently
/// succeeding against someone else's quota.
pub const DEFAULT_IDENTITY_API_KEY_PLACEHOLDER: &str = "REPLACE_WITH_DEPLOYMENT_API_KEY";

pub const CLIENT_VERSION: &str = "v0.2025.07.09.08.11.stable_02";
pub const OS_CATEGORY: &str = "Linux";
pub const OS_NAME: &str = "Linux";
pub const OS_VERSION: &str = "6.5.0";

/// `is_expired` buffer used by the Refresh Coordinator's step 3 check.
pub const ACCESS_TOKEN_EXPIRY_BUFFER_SECS: i64 = 15 * 60;

/// Baked-in refresh token used only when the Secrets Store has no
/// `WARP_REFRESH_TOKEN` of its own — mirrors the upstream client's
/// `REFRESH_TOKEN_B64` fallback. Deliberately not a real credential; any
/// deployment that reaches this fallback is missing its own refresh token
/// and will fail at the proxy token endpoint, loudly, rather than silently
/// succeeding against someone else's account.
pub const DEFAULT_REFRESH_TOKEN_PLACEHOLDER: &str = "REPLACE_WITH_DEPLOYMENT_REFRESH_TOKEN";
