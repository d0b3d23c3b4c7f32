pub mod absdiff;
pub mod traits;
