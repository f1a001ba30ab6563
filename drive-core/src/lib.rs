mod client;
mod oauth;

pub use client::{ApiErrorClass, DriveClient, DriveError, DriveFile, FileList};
pub use oauth::{OAuthClient, OAuthError, OAuthToken};
