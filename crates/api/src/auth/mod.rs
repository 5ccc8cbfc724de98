//! Authentication: JWT issuing and validation

pub mod jwt;

pub use jwt::{Claims, JwtError, JwtManager, TokenType};
