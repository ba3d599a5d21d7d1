use std::path::Path;

use research_types::Result;

/// Task research notes are written to disk under the session's working
/// directory (`file_path` on the task row) as well as being summarized into
/// the store, so a crash mid-run leaves a readable trail even for tasks the
/// scheduler never got to mark complete.
pub async fn write_task_notes(base_dir: &Path, file_path: &str, content: &str) -> Result<()> {
    let full_path = base_dir.join(file_path);
    if let Some(parent) = full_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(full_path, content).await?;
    Ok(())
}

pub async fn read_task_notes(base_dir: &Path, file_path: &str) -> Result<Option<String>> {
    let full_path = base_dir.join(file_path);
    match tokio::fs::read_to_string(full_path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_notes_through_nested_paths() {
        let dir = tempfile::tempdir().unwrap();
        write_task_notes(dir.path(), "tasks/one.md", "hello").await.unwrap();
        let read = read_task_notes(dir.path(), "tasks/one.md").await.unwrap();
        assert_eq!(read.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn missing_notes_are_none_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let read = read_task_notes(dir.path(), "missing.md").await.unwrap();
        assert_eq!(read, None);
    }
}
