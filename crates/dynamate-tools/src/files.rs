use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::call::{EditFileArgs, ListFilesArgs, ReadFileArgs};
use crate::error::ToolFault;
use crate::sandbox::ToolContext;

/// Structure files in `dir`, sorted by name.
pub fn structure_files(dir: &Path) -> Vec<PathBuf> {
    let pattern = format!("{}/*.pdb", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut files: Vec<PathBuf> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

/// Read a tool input. `Err` carries the narration for a missing or unreadable file.
pub(crate) async fn read_input(path: &Path) -> Result<String, String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(format!("File not found: {}", path.display())),
        Err(e) => Err(format!("Could not read {}: {e}", path.display())),
    }
}

/// Write a file the tool produces. Failure here is an infrastructure fault.
pub(crate) async fn write_output(path: &Path, contents: &str) -> Result<(), ToolFault> {
    tokio::fs::write(path, contents)
        .await
        .map_err(ToolFault::io(path))?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote tool output");
    Ok(())
}

pub async fn find_input(ctx: &ToolContext) -> Result<String, ToolFault> {
    let dir = ctx.sandbox.display();
    let files = structure_files(&ctx.sandbox);
    if files.is_empty() {
        return Ok(format!("Empty directory: {dir}. You forgot to upload your PDB file"));
    }
    let listing = files
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    Ok(format!("User uploads to {dir}:\n{listing}"))
}

pub async fn read_file(ctx: &ToolContext, args: &ReadFileArgs) -> Result<String, ToolFault> {
    let path = or_narrate!(ctx.resolve(&args.path));
    let text = or_narrate!(read_input(&path).await);
    Ok(format!("File contents of {}:\n{text}", args.path))
}

pub async fn list_files(ctx: &ToolContext, args: &ListFilesArgs) -> Result<String, ToolFault> {
    let dir = match args.path.as_deref() {
        Some(raw) => or_narrate!(ctx.resolve(raw)),
        None => ctx.sandbox.clone(),
    };

    let mut reader = match tokio::fs::read_dir(&dir).await {
        Ok(r) => r,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(format!("Path not found: {}", dir.display()))
        }
        Err(e) => return Ok(format!("Error listing files: {e}")),
    };

    let mut entries = Vec::new();
    loop {
        match reader.next_entry().await {
            Ok(Some(entry)) => {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                entries.push((name, is_dir));
            }
            Ok(None) => break,
            Err(e) => return Ok(format!("Error listing files: {e}")),
        }
    }
    entries.sort();

    if entries.is_empty() {
        return Ok(format!("Empty directory: {}", dir.display()));
    }
    let items = entries
        .into_iter()
        .map(|(name, is_dir)| {
            if is_dir {
                format!("[DIR]  {name}/")
            } else {
                format!("[FILE] {name}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    Ok(format!("Contents of {}:\n{items}", dir.display()))
}

/// Replace every occurrence of `old_text`, or create the file when it does not
/// exist or `old_text` is empty.
pub async fn edit_file(ctx: &ToolContext, args: &EditFileArgs) -> Result<String, ToolFault> {
    let path = or_narrate!(ctx.resolve(&args.path));
    let shown = path.display();

    let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
    if exists && !args.old_text.is_empty() {
        let content = match read_input(&path).await {
            Ok(c) => c,
            Err(narration) => return Ok(format!("Error editing file: {narration}")),
        };
        if !content.contains(&args.old_text) {
            return Ok(format!("Text not found in file: {}", args.old_text));
        }
        let updated = content.replace(&args.old_text, &args.new_text);
        if let Err(e) = tokio::fs::write(&path, updated).await {
            return Ok(format!("Error editing file: {e}"));
        }
        return Ok(format!("Successfully edited {shown}"));
    }

    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return Ok(format!("Error editing file: {e}"));
        }
    }
    if let Err(e) = tokio::fs::write(&path, &args.new_text).await {
        return Ok(format!("Error editing file: {e}"));
    }
    Ok(format!("Successfully created {shown}"))
}
