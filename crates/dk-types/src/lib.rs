pub mod component;
pub mod error;
pub mod image;
pub mod job;
pub mod log;
pub mod manifest;
pub mod mapping;
pub mod run;
pub mod workspace;

// Re-exports for convenience
pub use component::{
    BuildDefinition, BuildParameter, BuildRepository, ComponentDefinition, ComponentFlag,
    DataFormat, ImageDefinition, ImageType, NetworkMode, RepositoryDefinition, StagingMode,
    StagingStorage, WorkspaceBackend,
};
pub use error::{DockyardError, ErrorClass, Result};
pub use image::{AuthStrategy, BuildPlan, ImageSpecification, ProviderKind, PulledImage, RegistryLogin};
pub use job::{
    ActionRequest, AuthorizationBlock, ConfigurationPayload, ConfigurationRow,
    ConfigurationSource, JobDefinition, JobMode, JobRequest, OAuthApi, OAuthCredentials,
    ProjectContext, StorageToken, StoredConfiguration,
};
pub use log::{LogLevel, LogRecord};
pub use manifest::{
    CloudLocation, FileInfo, FileUpload, InputTableManifest, MetadataEntry, OutputFileManifest,
    OutputTableManifest, TableInfo, TableUpload,
};
pub use mapping::{
    InputFileMapping, InputFileStateList, InputMapping, InputTableMapping, InputTableStateList,
    OutputFileMapping, OutputMapping, OutputTableMapping, StorageMapping, WhereOperator,
};
pub use run::{ContainerRunResult, JobResult, JobStatus, Output, RowOutcome};
pub use workspace::{WorkspaceCredentials, WorkspaceOptions};
