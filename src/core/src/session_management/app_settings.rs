use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error_handling::types::TemplateError;

const SETTINGS_FILE: &str = "appsettings.json";

/// Rewrites an executable's configuration before it is launched.
pub trait ConfigTemplater: Send + Sync {
    /// Applies `template` next to `target_exe`, returning how many files changed.
    fn replace_config(&self, target_exe: &Path, template: &Path) -> Result<usize, TemplateError>;
}

/// Overwrites every `appsettings.json` under the executable's directory
/// with the template, so a submission always runs with reviewer-controlled
/// settings (connection strings, ports, ...).
#[derive(Debug, Default, Clone, Copy)]
pub struct AppSettingsReplacer;

impl AppSettingsReplacer {
    fn collect(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), TemplateError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            // Symlinked directories are not followed.
            if entry.file_type()?.is_dir() {
                Self::collect(&path, found)?;
            } else if path.file_name().is_some_and(|n| n == SETTINGS_FILE) {
                found.push(path);
            }
        }
        Ok(())
    }
}

impl ConfigTemplater for AppSettingsReplacer {
    fn replace_config(&self, target_exe: &Path, template: &Path) -> Result<usize, TemplateError> {
        if !target_exe.is_file() {
            return Err(TemplateError::ExecutableNotFound(
                target_exe.display().to_string(),
            ));
        }
        if !template.is_file() {
            return Err(TemplateError::TemplateNotFound(template.display().to_string()));
        }
        let dir = target_exe
            .parent()
            .map(|d| if d.as_os_str().is_empty() { Path::new(".") } else { d })
            .filter(|d| d.is_dir())
            .ok_or_else(|| TemplateError::DirectoryNotFound(target_exe.display().to_string()))?;

        let mut targets = Vec::new();
        Self::collect(dir, &mut targets)?;
        let template_real = fs::canonicalize(template)?;
        targets.retain(|t| fs::canonicalize(t).map_or(true, |real| real != template_real));

        let mut replaced = 0;
        for target in &targets {
            debug!("Replacing {}", target.display());
            match fs::copy(template, target) {
                Ok(_) => replaced += 1,
                Err(e) => warn!("Failed to replace {}: {}", target.display(), e),
            }
        }
        info!(
            "Replaced {} of {} {} file(s) under {}",
            replaced,
            targets.len(),
            SETTINGS_FILE,
            dir.display()
        );
        Ok(replaced)
    }
}
