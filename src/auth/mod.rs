//! Authentication: session tokens, PKCE login, allow list, bootstrap code

pub mod allow_list;
pub mod bootstrap;
pub mod flow;
pub mod origin;
pub mod pending;
pub mod pkce;
pub mod provider;
pub mod token;
pub mod turnstile;

pub use allow_list::AllowList;
pub use bootstrap::{BootstrapError, BootstrapLogin};
pub use flow::{CallbackParams, ClientSettings, IdentityInfo, LoginSuccess, PkceAuthenticator};
pub use origin::ExternalOrigin;
pub use pending::{PendingFlow, PendingFlowStore};
pub use provider::{HttpIdentityProvider, IdentityClaims, IdentityProvider, ProviderError, TokenSet};
pub use token::{CredentialIssuer, SessionClaims};
pub use turnstile::TurnstileVerifier;
