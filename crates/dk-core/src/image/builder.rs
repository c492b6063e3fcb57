use std::path::Path;

use dk_types::{BuildPlan, DockyardError, PulledImage, RegistryLogin, Result};
use tracing::info;

use super::puller::ImagePuller;
use crate::container::JOB_LABEL;
use crate::output_filter::OutputFilter;
use crate::process::{run_captured, ProcessSpec};
use crate::security::shell_escape;

/// BuildKit secret id the clone step reads credentials from.
pub const GIT_SECRET_ID: &str = "git-credentials";

/// Builds a throw-away image for one job from a parent image and a git repository.
pub struct ImageBuilder<'a> {
    puller: &'a ImagePuller,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(puller: &'a ImagePuller) -> Self {
        Self { puller }
    }

    pub async fn build(
        &self,
        plan: &BuildPlan,
        job_id: &str,
        filter: &OutputFilter,
    ) -> Result<PulledImage> {
        let parent = self.puller.pull(&plan.parent, filter).await?;

        // Credentials live outside the build context, so they can never end up in a layer.
        let context = tempfile::tempdir()?;
        let secrets = tempfile::tempdir()?;
        let dockerfile = generate_dockerfile(plan, &parent.reference);
        tokio::fs::write(context.path().join("Dockerfile"), dockerfile).await?;

        let credentials_file = secrets.path().join(GIT_SECRET_ID);
        let credentials = plan
            .repository_login
            .as_ref()
            .map(|login| git_credentials(&plan.repository_uri, login))
            .unwrap_or_default();
        write_private(&credentials_file, &credentials).await?;

        let spec = ProcessSpec::new(self.puller.docker())
            .args(["build", "--no-cache", "--tag", &plan.target_tag, "--label"])
            .arg(format!("{JOB_LABEL}={job_id}"))
            .arg("--secret")
            .arg(format!(
                "id={GIT_SECRET_ID},src={}",
                credentials_file.to_string_lossy()
            ))
            .arg(context.path().to_string_lossy().to_string())
            .env("DOCKER_BUILDKIT", "1")
            .timeout(self.puller.attempt_timeout());

        info!(
            image = %plan.target_tag,
            parent = %parent.reference,
            "Building image"
        );
        let out = run_captured(self.puller.runner(), &spec).await?;
        if !out.success() {
            return Err(DockyardError::User(format!(
                "Build of image {} failed: {}",
                plan.target_tag,
                filter.filter(&out.combined())
            )));
        }

        let built = self.puller.inspect(&plan.target_tag).await;
        info!(
            image = %plan.target_tag,
            image_id = built.image_id.as_deref().unwrap_or("unknown"),
            "Image built"
        );
        Ok(built)
    }
}

/// Dockerfile cloning the repository on top of `parent` and running the build commands.
pub fn generate_dockerfile(plan: &BuildPlan, parent: &str) -> String {
    let mut lines = vec![
        "# syntax=docker/dockerfile:1".to_string(),
        format!("FROM {parent}"),
        "WORKDIR /home".to_string(),
    ];

    let repo = shell_escape(&plan.repository_uri);
    if plan.repository_login.is_some() {
        lines.push(format!(
            "RUN --mount=type=secret,id={GIT_SECRET_ID} \
             git -c credential.helper='store --file=/run/secrets/{GIT_SECRET_ID}' \
             clone --depth 1 {repo} /home/"
        ));
    } else {
        lines.push(format!("RUN git clone --depth 1 {repo} /home/"));
    }

    for command in &plan.commands {
        lines.push(format!("RUN {command}"));
    }
    if let Some(ref entry_point) = plan.entry_point {
        lines.push(format!("ENTRYPOINT {entry_point}"));
    }

    lines.join("\n") + "\n"
}

/// Line for git's `store` credential helper.
fn git_credentials(repository_uri: &str, login: &RegistryLogin) -> String {
    let scheme = repository_uri
        .split_once("://")
        .map(|(s, _)| s)
        .unwrap_or("https");
    format!(
        "{scheme}://{}:{}@{}\n",
        percent_encode(&login.username),
        percent_encode(&login.password),
        login.server
    )
}

fn percent_encode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

async fn write_private(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}
