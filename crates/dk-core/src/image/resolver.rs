use dk_config::RunnerConfig;
use dk_types::{
    AuthStrategy, BuildDefinition, BuildPlan, ComponentDefinition, DockyardError, ImageDefinition,
    ImageSpecification, ImageType, ProviderKind, RegistryLogin, RepositoryDefinition, Result,
};
use serde_json::{Map, Value};
use tracing::debug;

use super::RegistryTokenProvider;
use crate::security::{docker_name, shell_escape};

/// Per-job inputs of image resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub job_id: String,
    /// Tag overriding the component's tag (and digest).
    pub tag_override: Option<String>,
    /// Configuration parameters, read by `builder` images.
    pub parameters: Map<String, Value>,
}

/// How a provider authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginRule {
    Anonymous,
    Basic,
    IamToken,
}

/// Static description of one provider kind.
#[derive(Debug, Clone, Copy)]
struct ProviderRule {
    registry_prefix: Option<&'static str>,
    login: LoginRule,
}

fn rule(kind: ProviderKind) -> ProviderRule {
    match kind {
        ProviderKind::DockerHub => ProviderRule {
            registry_prefix: None,
            login: LoginRule::Anonymous,
        },
        ProviderKind::DockerHubPrivate => ProviderRule {
            registry_prefix: None,
            login: LoginRule::Basic,
        },
        ProviderKind::QuayIo => ProviderRule {
            registry_prefix: Some("quay.io/"),
            login: LoginRule::Anonymous,
        },
        ProviderKind::QuayIoPrivate => ProviderRule {
            registry_prefix: Some("quay.io/"),
            login: LoginRule::Basic,
        },
        ProviderKind::AwsEcr => ProviderRule {
            registry_prefix: None,
            login: LoginRule::IamToken,
        },
        // The built image itself is local; its parent is resolved separately.
        ProviderKind::Builder => ProviderRule {
            registry_prefix: None,
            login: LoginRule::Anonymous,
        },
    }
}

/// Turns a component's image section into an [`ImageSpecification`].
pub struct ImageResolver<'a> {
    config: &'a RunnerConfig,
    tokens: &'a dyn RegistryTokenProvider,
}

impl<'a> ImageResolver<'a> {
    pub fn new(config: &'a RunnerConfig, tokens: &'a dyn RegistryTokenProvider) -> Self {
        Self { config, tokens }
    }

    /// Resolve `component`. Its repository block must already be decrypted.
    pub async fn resolve(
        &self,
        component: &ComponentDefinition,
        options: &ResolveOptions,
    ) -> Result<ImageSpecification> {
        let image = &component.image;
        let spec = match image.image_type {
            ImageType::Builder => self.resolve_builder(component, options).await?,
            image_type => {
                self.resolve_registry(
                    image_type,
                    &image.uri,
                    &reference_suffix(image, options.tag_override.as_deref()),
                    image.repository.as_ref(),
                )
                .await?
            }
        };
        debug!(
            component = %component.id,
            kind = ?spec.kind,
            reference = %spec.reference,
            "Image resolved"
        );
        Ok(spec)
    }

    async fn resolve_registry(
        &self,
        image_type: ImageType,
        uri: &str,
        suffix: &str,
        repository: Option<&RepositoryDefinition>,
    ) -> Result<ImageSpecification> {
        let kind = ProviderKind::from(image_type);
        let rule = rule(kind);

        let base = match rule.registry_prefix {
            Some(prefix) if !uri.starts_with(prefix) => format!("{prefix}{uri}"),
            _ => uri.to_string(),
        };
        let reference = format!("{base}{suffix}");

        let auth = match rule.login {
            LoginRule::Anonymous => AuthStrategy::None,
            LoginRule::Basic => AuthStrategy::Basic(self.basic_login(kind, uri, repository)?),
            LoginRule::IamToken => self.iam_login(uri, repository).await?,
        };

        Ok(ImageSpecification {
            kind,
            reference,
            auth,
            build: None,
        })
    }

    fn basic_login(
        &self,
        kind: ProviderKind,
        uri: &str,
        repository: Option<&RepositoryDefinition>,
    ) -> Result<RegistryLogin> {
        let repo = repository.cloned().unwrap_or_default();
        let (Some(username), Some(password)) = (repo.username, repo.password) else {
            return Err(DockyardError::LoginFailed(format!(
                "Missing credentials for private image {uri}"
            )));
        };
        let server = repo.server.unwrap_or_else(|| match kind {
            ProviderKind::QuayIoPrivate => self.config.quay_server.clone(),
            _ => self.config.dockerhub_server.clone(),
        });
        Ok(RegistryLogin {
            username,
            password,
            server,
        })
    }

    async fn iam_login(
        &self,
        uri: &str,
        repository: Option<&RepositoryDefinition>,
    ) -> Result<AuthStrategy> {
        let account_id = uri.split('.').next().unwrap_or_default().to_string();
        let server = uri.split('/').next().unwrap_or_default().to_string();
        if account_id.is_empty() || server.is_empty() {
            return Err(DockyardError::User(format!("Invalid ECR image URI {uri}")));
        }
        let region = repository
            .and_then(|r| r.region.clone())
            .unwrap_or_else(|| self.config.default_ecr_region.clone());

        let login = self.tokens.login(&region, &account_id, &server).await?;
        Ok(AuthStrategy::IamToken {
            region,
            account_id,
            login,
        })
    }

    async fn resolve_builder(
        &self,
        component: &ComponentDefinition,
        options: &ResolveOptions,
    ) -> Result<ImageSpecification> {
        let image = &component.image;
        let build = image.build.as_ref().ok_or_else(|| {
            DockyardError::User(format!(
                "Component {} uses a builder image without a build definition",
                component.id
            ))
        })?;
        if build.parent_type == ImageType::Builder {
            return Err(DockyardError::User(
                "Builder image cannot use another builder image as parent".to_string(),
            ));
        }

        let parent = self
            .resolve_registry(
                build.parent_type,
                &image.uri,
                &reference_suffix(image, None),
                image.repository.as_ref(),
            )
            .await?;

        let repository_login = match (&build.repository.username, &build.repository.password) {
            (Some(username), Some(password)) => Some(RegistryLogin {
                username: username.clone(),
                password: password.clone(),
                server: repository_host(&build.repository.uri),
            }),
            (None, None) => None,
            _ => {
                return Err(DockyardError::LoginFailed(format!(
                    "Incomplete credentials for repository {}",
                    build.repository.uri
                )))
            }
        };

        let commands = substitute_commands(build, &options.parameters)?;
        let target_tag = format!(
            "dockyard-build/{}:{}",
            docker_name(&component.id),
            docker_name(&options.job_id)
        );

        Ok(ImageSpecification {
            kind: ProviderKind::Builder,
            reference: target_tag.clone(),
            auth: AuthStrategy::None,
            build: Some(BuildPlan {
                parent: Box::new(parent),
                repository_uri: build.repository.uri.clone(),
                repository_login,
                commands,
                entry_point: build.entry_point.clone(),
                target_tag,
            }),
        })
    }
}

/// `:<tag>`, or `@<digest>` when pinned. A tag override wins over both.
fn reference_suffix(image: &ImageDefinition, tag_override: Option<&str>) -> String {
    match (tag_override, image.digest.as_deref()) {
        (Some(tag), _) => format!(":{tag}"),
        (None, Some(digest)) => format!("@{digest}"),
        (None, None) => format!(":{}", image.tag),
    }
}

/// Replace `{{name}}` placeholders with shell-escaped parameter values.
fn substitute_commands(build: &BuildDefinition, parameters: &Map<String, Value>) -> Result<Vec<String>> {
    let mut values = Vec::with_capacity(build.parameters.len());
    for param in &build.parameters {
        let value = match parameters.get(&param.name) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            Some(Value::Null) | None => param.default_value.clone(),
            Some(other) => {
                return Err(DockyardError::User(format!(
                    "Build parameter {} must be a scalar, got {other}",
                    param.name
                )))
            }
        };
        match value {
            Some(v) => values.push((format!("{{{{{}}}}}", param.name), shell_escape(&v))),
            None if param.required => {
                return Err(DockyardError::User(format!(
                    "Build parameter {} is required",
                    param.name
                )))
            }
            None => values.push((format!("{{{{{}}}}}", param.name), "''".to_string())),
        }
    }

    Ok(build
        .commands
        .iter()
        .map(|cmd| {
            values
                .iter()
                .fold(cmd.clone(), |acc, (placeholder, value)| acc.replace(placeholder, value))
        })
        .collect())
}

fn repository_host(uri: &str) -> String {
    let without_scheme = uri.split_once("://").map(|(_, rest)| rest).unwrap_or(uri);
    without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .rsplit('@')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use dk_types::{BuildParameter, BuildRepository};
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct FakeTokens {
        requests: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl RegistryTokenProvider for FakeTokens {
        async fn login(&self, region: &str, account_id: &str, server: &str) -> Result<RegistryLogin> {
            self.requests.lock().unwrap().push((
                region.to_string(),
                account_id.to_string(),
                server.to_string(),
            ));
            Ok(RegistryLogin {
                username: "AWS".to_string(),
                password: "ecr-token".to_string(),
                server: server.to_string(),
            })
        }
    }

    fn component(image_type: ImageType, uri: &str) -> ComponentDefinition {
        serde_json::from_value(json!({
            "id": "keboola.ex-http",
            "image": {"type": image_type, "uri": uri, "tag": "1.2.0"}
        }))
        .unwrap()
    }

    fn options() -> ResolveOptions {
        ResolveOptions {
            job_id: "job-1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn dockerhub_public() {
        let config = RunnerConfig::default();
        let tokens = FakeTokens::default();
        let resolver = ImageResolver::new(&config, &tokens);

        let spec = resolver
            .resolve(&component(ImageType::DockerHub, "keboola/ex-http"), &options())
            .await
            .unwrap();
        assert_eq!(spec.kind, ProviderKind::DockerHub);
        assert_eq!(spec.reference, "keboola/ex-http:1.2.0");
        assert_eq!(spec.auth, AuthStrategy::None);
    }

    #[tokio::test]
    async fn digest_and_tag_override() {
        let config = RunnerConfig::default();
        let tokens = FakeTokens::default();
        let resolver = ImageResolver::new(&config, &tokens);

        let mut comp = component(ImageType::DockerHub, "keboola/ex-http");
        comp.image.digest = Some("sha256:abc".to_string());
        let spec = resolver.resolve(&comp, &options()).await.unwrap();
        assert_eq!(spec.reference, "keboola/ex-http@sha256:abc");

        let opts = ResolveOptions {
            tag_override: Some("dev".to_string()),
            ..options()
        };
        let spec = resolver.resolve(&comp, &opts).await.unwrap();
        assert_eq!(spec.reference, "keboola/ex-http:dev");
    }

    #[tokio::test]
    async fn quay_prefix_and_private_defaults() {
        let config = RunnerConfig::default();
        let tokens = FakeTokens::default();
        let resolver = ImageResolver::new(&config, &tokens);

        let spec = resolver
            .resolve(&component(ImageType::QuayIo, "keboola/ex-http"), &options())
            .await
            .unwrap();
        assert_eq!(spec.reference, "quay.io/keboola/ex-http:1.2.0");

        let mut comp = component(ImageType::QuayIoPrivate, "keboola/private");
        comp.image.repository = Some(RepositoryDefinition {
            username: Some("robot".to_string()),
            password: Some("pw".to_string()),
            server: None,
            region: None,
        });
        let spec = resolver.resolve(&comp, &options()).await.unwrap();
        let login = spec.auth.login().unwrap();
        assert_eq!(login.server, "quay.io");
        assert_eq!(login.username, "robot");
    }

    #[tokio::test]
    async fn private_without_credentials_is_login_failure() {
        let config = RunnerConfig::default();
        let tokens = FakeTokens::default();
        let resolver = ImageResolver::new(&config, &tokens);

        let err = resolver
            .resolve(&component(ImageType::DockerHubPrivate, "keboola/private"), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, DockyardError::LoginFailed(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn dockerhub_private_default_server() {
        let config = RunnerConfig::default();
        let tokens = FakeTokens::default();
        let resolver = ImageResolver::new(&config, &tokens);

        let mut comp = component(ImageType::DockerHubPrivate, "keboola/private");
        comp.image.repository = Some(RepositoryDefinition {
            username: Some("u".to_string()),
            password: Some("p".to_string()),
            ..Default::default()
        });
        let spec = resolver.resolve(&comp, &options()).await.unwrap();
        assert_eq!(
            spec.auth.login().unwrap().server,
            "https://index.docker.io/v1/"
        );
    }

    #[tokio::test]
    async fn ecr_region_default_and_override() {
        let config = RunnerConfig::default();
        let tokens = FakeTokens::default();
        let resolver = ImageResolver::new(&config, &tokens);
        let uri = "147946154733.dkr.ecr.us-east-1.amazonaws.com/keboola/ex-http";

        let spec = resolver
            .resolve(&component(ImageType::AwsEcr, uri), &options())
            .await
            .unwrap();
        match &spec.auth {
            AuthStrategy::IamToken {
                region,
                account_id,
                login,
            } => {
                assert_eq!(region, "us-east-1");
                assert_eq!(account_id, "147946154733");
                assert_eq!(login.server, "147946154733.dkr.ecr.us-east-1.amazonaws.com");
            }
            other => panic!("unexpected auth {other:?}"),
        }

        let mut comp = component(ImageType::AwsEcr, uri);
        comp.image.repository = Some(RepositoryDefinition {
            region: Some("eu-central-1".to_string()),
            ..Default::default()
        });
        resolver.resolve(&comp, &options()).await.unwrap();

        let requests = tokens.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, "us-east-1");
        assert_eq!(requests[1].0, "eu-central-1");
        assert_eq!(requests[1].1, "147946154733");
    }

    #[tokio::test]
    async fn builder_plan() {
        let config = RunnerConfig::default();
        let tokens = FakeTokens::default();
        let resolver = ImageResolver::new(&config, &tokens);

        let mut comp = component(ImageType::Builder, "keboola/base-python");
        comp.image.build = Some(BuildDefinition {
            parent_type: ImageType::DockerHub,
            repository: BuildRepository {
                uri: "https://github.com/keboola/app.git".to_string(),
                repository_type: "git".to_string(),
                username: Some("git-user".to_string()),
                password: Some("git-pass".to_string()),
            },
            commands: vec!["pip install {{package}}".to_string(), "echo {{mode}}".to_string()],
            entry_point: Some("python /home/main.py".to_string()),
            parameters: vec![
                BuildParameter {
                    name: "package".to_string(),
                    required: true,
                    default_value: None,
                },
                BuildParameter {
                    name: "mode".to_string(),
                    required: false,
                    default_value: Some("fast".to_string()),
                },
            ],
        });

        let mut opts = options();
        opts.parameters = json!({"package": "requests; rm -rf /"})
            .as_object()
            .unwrap()
            .clone();

        let spec = resolver.resolve(&comp, &opts).await.unwrap();
        assert_eq!(spec.kind, ProviderKind::Builder);
        let plan = spec.build.unwrap();
        assert_eq!(plan.parent.reference, "keboola/base-python:1.2.0");
        assert_eq!(plan.commands[0], "pip install 'requests; rm -rf /'");
        assert_eq!(plan.commands[1], "echo fast");
        assert_eq!(plan.target_tag, "dockyard-build/keboola.ex-http:job-1");
        let login = plan.repository_login.unwrap();
        assert_eq!(login.server, "github.com");
        assert_eq!(login.password, "git-pass");
    }

    #[tokio::test]
    async fn builder_missing_required_parameter() {
        let config = RunnerConfig::default();
        let tokens = FakeTokens::default();
        let resolver = ImageResolver::new(&config, &tokens);

        let mut comp = component(ImageType::Builder, "keboola/base");
        comp.image.build = Some(BuildDefinition {
            parent_type: ImageType::DockerHub,
            repository: BuildRepository {
                uri: "https://github.com/keboola/app.git".to_string(),
                repository_type: "git".to_string(),
                username: None,
                password: None,
            },
            commands: vec!["make {{target}}".to_string()],
            entry_point: None,
            parameters: vec![BuildParameter {
                name: "target".to_string(),
                required: true,
                default_value: None,
            }],
        });

        let err = resolver.resolve(&comp, &options()).await.unwrap_err();
        assert!(matches!(err, DockyardError::User(_)));
    }
}
