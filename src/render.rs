//! Rendering of zone definition and profile artifacts from Tera templates.

use std::error::Error as _;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tera::{Context, Tera};
use thiserror::Error;
use tracing::debug;

use crate::files;

/// Errors raised while rendering an artifact.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RenderError {
    /// The template does not exist under the template root.
    #[error("template {path} not found")]
    TemplateNotFound {
        /// Resolved template path.
        path: Utf8PathBuf,
    },
    /// The template is malformed or references a missing value.
    #[error("failed to render template {template}: {message}")]
    Template {
        /// Resolved template path.
        template: Utf8PathBuf,
        /// Engine error, including its causes.
        message: String,
    },
    /// Reading the template or writing the output failed.
    #[error("I/O error for {path}: {message}")]
    Io {
        /// File being accessed.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

/// Renders templates found under a root directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigRenderer {
    root: Utf8PathBuf,
}

impl ConfigRenderer {
    /// Creates a renderer resolving template names against `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Renders `template` with `context` and writes the result to `output`.
    ///
    /// Lines containing only whitespace are removed from the rendered text,
    /// which is then written byte for byte.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TemplateNotFound`] when the template is absent,
    /// [`RenderError::Template`] when the engine rejects it, or
    /// [`RenderError::Io`] when a file cannot be read or written.
    pub fn render(
        &self,
        template: &str,
        output: &Utf8Path,
        context: &Context,
    ) -> Result<(), RenderError> {
        let path = self.root.join(template);
        let source = files::read_optional(&path)
            .map_err(|err| io_error(&path, &err))?
            .ok_or_else(|| RenderError::TemplateNotFound { path: path.clone() })?;

        let rendered =
            Tera::one_off(&source, context, false).map_err(|err| RenderError::Template {
                template: path.clone(),
                message: error_chain(&err),
            })?;
        let normalised = strip_blank_lines(&rendered);

        files::write_atomic(output, normalised.as_bytes(), None)
            .map_err(|err| io_error(output, &err))?;
        debug!(template = %path, %output, "rendered artifact");
        Ok(())
    }
}

/// Removes every line that is empty or contains only whitespace.
///
/// Remaining lines keep their order, content and line terminators.
///
/// # Examples
///
/// ```
/// use zonewright::render::strip_blank_lines;
///
/// assert_eq!(strip_blank_lines("a\n\n  \nb\n"), "a\nb\n");
/// ```
#[must_use]
pub fn strip_blank_lines(text: &str) -> String {
    text.split_inclusive('\n')
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// Deletes a rendered artifact, ignoring files that are already gone.
///
/// # Errors
///
/// Returns [`RenderError::Io`] when the file exists but cannot be removed.
pub fn discard_artifact(path: &Utf8Path) -> Result<(), RenderError> {
    files::remove_if_exists(path).map_err(|err| io_error(path, &err))
}

fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = inner.source();
    }
    message
}

fn io_error(path: &Utf8Path, err: &io::Error) -> RenderError {
    RenderError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Workspace {
        _temp: TempDir,
        root: Utf8PathBuf,
    }

    #[fixture]
    fn workspace() -> Workspace {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf-8 temp dir");
        Workspace { _temp: temp, root }
    }

    fn write_template(workspace: &Workspace, name: &str, body: &str) {
        std::fs::write(workspace.root.join(name), body).expect("write template");
    }

    #[rstest]
    #[case::empty("", "")]
    #[case::no_blanks("a\nb\n", "a\nb\n")]
    #[case::interleaved("\na\n\n \t\nb\n\n", "a\nb\n")]
    #[case::unterminated_tail("a\n   ", "a\n")]
    #[case::keeps_indentation("create -b\n\n  set zonepath=/z\n", "create -b\n  set zonepath=/z\n")]
    #[case::crlf("a\r\n\r\nb\r\n", "a\r\nb\r\n")]
    fn blank_lines_are_removed(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(strip_blank_lines(input), expected);
    }

    #[rstest]
    fn renders_context_into_output_without_blank_lines(workspace: Workspace) {
        write_template(
            &workspace,
            "zone.cfg.tera",
            "create -b\n\nset zonename={{ zone_name }}\n{% if zone_ip %}\nadd net\n{% endif %}\n\nend\n",
        );
        let mut context = Context::new();
        context.insert("zone_name", "build-01");
        context.insert("zone_ip", "10.0.0.5");
        let output = workspace.root.join("out/build-01.cfg");

        ConfigRenderer::new(workspace.root.clone())
            .render("zone.cfg.tera", &output, &context)
            .expect("render should succeed");

        let rendered = std::fs::read_to_string(&output).expect("read output");
        assert_eq!(rendered, "create -b\nset zonename=build-01\nadd net\nend\n");
    }

    #[rstest]
    fn shipped_templates_render(workspace: Workspace) {
        let mut context = Context::new();
        context.insert("zone_name", "build-01");
        context.insert("zone_ip", "10.0.0.5");
        context.insert("username", "zonewright");
        context.insert("public_key", "ssh-rsa AAAAB3NzaC1yc2E zonewright");
        let renderer = ConfigRenderer::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates"));

        let cfg_path = workspace.root.join("build-01.cfg");
        renderer
            .render("zone.cfg.tera", &cfg_path, &context)
            .expect("zone template renders");
        let cfg = std::fs::read_to_string(&cfg_path).expect("read cfg");
        assert!(cfg.starts_with("create -b\nset zonename=build-01\n"));
        assert!(cfg.contains("set allowed-address=10.0.0.5/24\n"));
        assert!(cfg.contains("set defrouter=10.0.0.1\n"));

        let xml_path = workspace.root.join("build-01.xml");
        renderer
            .render("profile.xml.tera", &xml_path, &context)
            .expect("profile template renders");
        let xml = std::fs::read_to_string(&xml_path).expect("read xml");
        assert!(xml.contains("value=\"ssh-rsa AAAAB3NzaC1yc2E zonewright\""));
        assert!(xml.contains("name=\"login\" value=\"zonewright\""));
    }

    #[rstest]
    fn missing_template_is_not_found(workspace: Workspace) {
        let err = ConfigRenderer::new(workspace.root.clone())
            .render("absent.tera", &workspace.root.join("out"), &Context::new())
            .expect_err("render should fail");
        assert_eq!(
            err,
            RenderError::TemplateNotFound {
                path: workspace.root.join("absent.tera"),
            }
        );
    }

    #[rstest]
    fn undefined_variables_fail_with_template_error(workspace: Workspace) {
        write_template(&workspace, "bad.tera", "{{ missing_value }}\n");
        let output = workspace.root.join("bad.out");

        let err = ConfigRenderer::new(workspace.root.clone())
            .render("bad.tera", &output, &Context::new())
            .expect_err("render should fail");

        let RenderError::Template { message, .. } = err else {
            panic!("expected Template error, got {err:?}");
        };
        assert!(message.contains("missing_value"), "{message}");
        assert!(!output.exists(), "no output on failure");
    }

    #[rstest]
    fn discarding_missing_artifact_succeeds(workspace: Workspace) {
        discard_artifact(&workspace.root.join("gone.xml")).expect("discard");
    }
}
