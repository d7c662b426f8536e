use crate::error::{ProcessError, Result};
use crate::models::{ChunkingOptions, Document, FileType};
use crate::store::DocumentStore;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

pub fn discover_supported_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| FileType::from_extension(ext).is_some());

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn file_type_for(path: &Path) -> Result<FileType> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(FileType::from_extension)
        .ok_or_else(|| {
            ProcessError::UnsupportedFileType(format!("{}", path.display()))
        })
}

/// Fingerprints a local file and registers it as a `Pending` document.
pub async fn register_file<S: DocumentStore>(
    store: &S,
    knowledge_base_id: Uuid,
    path: &Path,
    chunking: ChunkingOptions,
) -> Result<Document> {
    let file_type = file_type_for(path)?;
    let checksum = digest_file(path)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            ProcessError::InvalidArgument(format!("path missing filename: {}", path.display()))
        })?;

    let document = Document::new(
        knowledge_base_id,
        file_name,
        file_type,
        path.to_string_lossy().to_string(),
        checksum,
    )
    .with_chunking(chunking);

    store.insert_document(document.clone()).await?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, KnowledgeBase};
    use crate::store::MemoryStore;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_recursive_and_skips_unsupported_files() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.md")).and_then(|mut file| file.write_all(b"# a"))?;
        File::create(nested.join("b.csv")).and_then(|mut file| file.write_all(b"x,y"))?;
        File::create(nested.join("ignore.bin")).and_then(|mut file| file.write_all(b"\x00"))?;

        let files = discover_supported_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.txt");
        fs::write(&file_path, b"abc")?;

        let first = digest_file(&file_path)?;
        let second = digest_file(&file_path)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn registered_file_lands_pending_with_its_fingerprint() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("faq.md");
        fs::write(&file_path, b"# FAQ\n\nanswers").unwrap();

        let store = MemoryStore::new();
        let kb = KnowledgeBase::new("kb");
        let kb_id = kb.id;
        store.insert_knowledge_base(kb).await.unwrap();

        let document = register_file(&store, kb_id, &file_path, ChunkingOptions::default())
            .await
            .unwrap();

        assert_eq!(document.file_type, FileType::Markdown);
        assert_eq!(document.status, DocumentStatus::Pending);
        assert_eq!(document.checksum.len(), 64);

        let stored = store.fetch_document(document.id).await.unwrap();
        assert_eq!(stored.file_name, "faq.md");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let result = file_type_for(Path::new("/tmp/archive.zip"));
        assert!(matches!(result, Err(ProcessError::UnsupportedFileType(_))));
    }
}
