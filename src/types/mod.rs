//! Public types for the Manifold API.

mod request;
mod response;

pub use request::{GenerationRequest, HelmOverrides, KustomizeOverrides, PluginOverrides};
pub use response::{
    AppDetails, AppList, InvalidationSignal, ManifestResponse, RevisionMetadata, SourceType,
};
