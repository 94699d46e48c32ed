//! gtctl-core: shared types for the gtctl cluster manager.
//!
//! Holds everything the deployer backends agree on: the validated cluster
//! configuration, artifact specs, replica address derivation, the on-disk
//! runtime layout and cluster metadata file, and the backend-agnostic
//! [`Deployer`] trait.

pub mod addr;
pub mod config;
pub mod deployer;
pub mod error;
pub mod layout;
pub mod metadata;
pub mod types;

pub use config::{
    ArtifactConfig, BareMetalClusterConfig, ConfigLoadError, DatanodeConfig, EtcdConfig,
    FrontendConfig, GreptimeClusterConfig, MetaSrvConfig,
};
pub use deployer::{
    ClusterInfo, ComponentStatus, CreateClusterOptions, DeleteClusterOptions, Deployer,
    ReplicaStatus,
};
pub use error::{MetadataError, ValidationError};
pub use layout::{ReplicaDirs, RuntimeLayout};
pub use metadata::ClusterMetadata;
pub use types::*;
