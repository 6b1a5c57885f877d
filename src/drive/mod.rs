pub mod client;
pub mod multipart;
pub mod provider;

#[cfg(test)]
pub mod memory;

pub use client::{check_response, GoogleDrive};
pub use multipart::MultipartBody;
pub use provider::*;
