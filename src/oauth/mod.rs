//! OAuth 2.0 authorization-code flow with PKCE.
//!
//! 1. `POST /integrations/:provider/connect` saves a one-time state bound to
//!    the user and a PKCE verifier, and returns the provider's consent URL
//! 2. The user consents on the provider's site
//! 3. `GET /integrations/:provider/callback` consumes the state, exchanges the
//!    code plus verifier for tokens, and stores the encrypted refresh token

pub mod exchange;
pub mod pkce;
pub mod provider;
pub mod state_store;

pub use exchange::{ExchangeError, OAuthClient, TokenGrant};
pub use pkce::{generate_state, PkcePair};
pub use provider::{is_supported_provider, ProviderConfig, GOOGLE};
pub use state_store::{run_state_cleanup, ConsumedState, OAuthStateStore, StateError};
