mod credential;
mod credential_provider;
mod credential_refresher;
mod http_credential_provider;
mod token_store;

pub use credential::*;
pub use credential_provider::*;
pub use credential_refresher::*;
pub use http_credential_provider::*;
pub use token_store::*;
