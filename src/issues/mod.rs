pub mod controller;
pub mod domain;
pub mod export;
pub mod filter;
pub mod gateway;
pub mod invalidation;
pub mod optimistic;

pub use controller::{ControllerError, ListController, ListSpec};
pub use domain::{Issue, IssueId, IssueStatus, UserId};
pub use gateway::{GatewayError, IssueGateway, SqliteIssueGateway};
