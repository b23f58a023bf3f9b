//! Client library for connecting to manifoldd.
//!
//! Provides [`ServiceClient`], which implements [`RepoGateway`](crate::RepoGateway)
//! by forwarding calls to a remote manifoldd instance over gRPC.

mod service_client;

pub use service_client::ServiceClient;
