pub mod projects;
pub mod upstream;

pub use projects::ProjectsProxy;
pub use upstream::{http_client, ProjectsRequest, UpstreamClient};
