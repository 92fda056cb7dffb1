use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use tempfile::NamedTempFile;
use tracing::info;

use super::OutputError;
use super::Outputer;
use crate::label::Labels;

/// Writes labels as `key=value` lines to a features file.
///
/// The file is replaced atomically on every write so the reader never sees a
/// partially written label set.
#[derive(Debug, Clone)]
pub struct FileOutputer {
    path: PathBuf,
}

impl FileOutputer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_failed(&self) -> OutputError {
        OutputError::WriteFailed {
            path: self.path.display().to_string(),
        }
    }
}

/// Renders labels in the format read by the node-feature-discovery worker.
pub fn render(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}\n"))
        .collect()
}

fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}

#[async_trait]
impl Outputer for FileOutputer {
    async fn output(&self, labels: &Labels) -> Result<(), Report<OutputError>> {
        let path = self.path.clone();
        let contents = render(labels);

        tokio::task::spawn_blocking(move || write_atomically(&path, &contents))
            .await
            .change_context_lazy(|| self.write_failed())?
            .change_context_lazy(|| self.write_failed())?;

        info!("Wrote {} labels to {}", labels.len(), self.path.display());
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), Report<OutputError>> {
        let remove_failed = || OutputError::RemoveFailed {
            path: self.path.display().to_string(),
        };
        let path = std::path::absolute(&self.path).change_context_lazy(remove_failed)?;

        tokio::fs::remove_file(&path)
            .await
            .change_context_lazy(remove_failed)?;
        info!("Removed output file {}", path.display());
        Ok(())
    }
}
