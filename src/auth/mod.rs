mod claims;
mod oauth;

pub use claims::{decode_identity_claims, IdentityClaims};
pub use oauth::{
    build_authorize_url, generate_pkce_verifier, pkce_challenge_s256, TokenBundle, TokenService,
};
