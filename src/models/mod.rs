pub mod project;
pub mod token;

pub use project::{ProjectForm, ProjectInput};
pub use token::{Provider, ProviderMetadata, TokenPayload, TokenRecord, TokenStatus};
