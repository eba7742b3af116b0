/// Authentication primitives
///
/// Access token minting/validation, password verification and refresh
/// token generation. Session state lives in `crate::session`.

mod claims;
mod jwt;
mod password;
mod refresh_token;

pub use claims::Claims;
pub use jwt::AccessTokenMinter;
pub use password::{verify_against_dummy, verify_password};
pub use refresh_token::{
    generate_refresh_token, hash_token, is_well_formed_refresh_token, GeneratedRefreshToken,
    RefreshSecret,
};
