pub mod logging;
pub mod output_filter;
pub mod secrets;
pub mod security;
pub mod sink;
pub mod utils;

// Execution pipeline
pub mod container;
pub mod image;
pub mod job;
pub mod mounts;
pub mod process;
pub mod staging;

pub use logging::init_logging;
pub use output_filter::OutputFilter;
pub use secrets::{Encryptor, EncryptorError, KeyScope, SecretResolver, WrapperKind};
pub use security::{docker_name, render_command, sanitize_filename, shell_escape, validate_env_name};
pub use sink::{LogSink, TracingSink};
pub use utils::{with_retry, CancellationSignal, RetryConfig};

pub use container::{build_run_args, ContainerLauncher, ContainerOptions, JOB_LABEL, ROW_LABEL};
pub use image::{
    AwsCliTokenProvider, ImageBuilder, ImagePuller, ImageResolver, RegistryTokenProvider,
    ResolveOptions,
};
pub use job::{build_definitions, JobExecutor};
pub use mounts::{MountMode, MountSpec, WorkingDirectory};
pub use process::{ProcessOutput, ProcessRunner, ProcessSpec, StreamKind, TokioProcessRunner};
pub use staging::{
    DataLoader, FileQuery, InputResult, LocalStorage, OutputResult, StorageClient, TableSource,
    WorkspaceManager, WorkspaceProvider,
};
