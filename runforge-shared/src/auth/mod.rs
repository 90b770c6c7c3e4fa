/// Authentication primitives
///
/// - `jwt`: HS256 token creation and validation
/// - `password`: Argon2id hashing and verification
/// - `middleware`: the authenticated request context

pub mod jwt;
pub mod middleware;
pub mod password;
