//! Boot script rendering.

use std::path::{Path, PathBuf};

use crate::error::RenderError;

const PLACEHOLDERS: [&str; 2] = ["{{ group_name }}", "{{group_name}}"];

/// Produces the user-data script a branch boots with. Pure.
pub trait BootScriptRenderer: Send + Sync {
    fn render(&self, group: &str) -> Result<Vec<u8>, RenderError>;
}

/// Substitutes the group name into a template loaded once at startup.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    template: String,
}

impl TemplateRenderer {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, RenderError> {
        let template = std::fs::read_to_string(path).map_err(|source| RenderError::Template {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(template))
    }
}

impl BootScriptRenderer for TemplateRenderer {
    fn render(&self, group: &str) -> Result<Vec<u8>, RenderError> {
        if !is_safe_group_name(group) {
            return Err(RenderError::InvalidGroup(group.to_string()));
        }
        let script = PLACEHOLDERS
            .iter()
            .fold(self.template.clone(), |acc, placeholder| {
                acc.replace(placeholder, group)
            });
        Ok(script.into_bytes())
    }
}

/// Reads the template from disk at render time, so only callers that
/// render need the file to exist.
#[derive(Debug, Clone)]
pub struct TemplateFile {
    path: PathBuf,
}

impl TemplateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BootScriptRenderer for TemplateFile {
    fn render(&self, group: &str) -> Result<Vec<u8>, RenderError> {
        TemplateRenderer::from_file(&self.path)?.render(group)
    }
}

/// Unix group names: ASCII letters, digits, `.`, `_`, `-`, not starting with `-`.
fn is_safe_group_name(group: &str) -> bool {
    !group.is_empty()
        && !group.starts_with('-')
        && group
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_both_placeholder_spellings() {
        let renderer =
            TemplateRenderer::new("#!/bin/sh\nserve {{ group_name }} --tag {{group_name}}\n");
        let script = renderer.render("hgi").unwrap();
        assert_eq!(
            String::from_utf8(script).unwrap(),
            "#!/bin/sh\nserve hgi --tag hgi\n"
        );
    }

    #[test]
    fn rejects_shell_metacharacters() {
        let renderer = TemplateRenderer::new("{{ group_name }}");
        assert!(matches!(
            renderer.render("x; rm -rf /"),
            Err(RenderError::InvalidGroup(_))
        ));
        assert!(renderer.render("-flag").is_err());
        assert!(renderer.render("").is_err());
    }

    #[test]
    fn loads_template_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.sh");
        std::fs::write(&path, "echo {{ group_name }}").unwrap();

        let renderer = TemplateRenderer::from_file(&path).unwrap();
        assert_eq!(renderer.render("team_a").unwrap(), b"echo team_a");
    }

    #[test]
    fn missing_template_is_reported() {
        let result = TemplateRenderer::from_file(Path::new("/nonexistent/user.sh"));
        assert!(matches!(result, Err(RenderError::Template { .. })));
    }

    #[test]
    fn template_file_is_read_when_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.sh");
        let renderer = TemplateFile::new(&path);

        assert!(matches!(
            renderer.render("hgi"),
            Err(RenderError::Template { .. })
        ));

        std::fs::write(&path, "serve {{ group_name }}").unwrap();
        assert_eq!(renderer.render("hgi").unwrap(), b"serve hgi");
    }
}
