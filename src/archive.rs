use std::fs;
use std::path::{Component, Path};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;

/// Extract a gzipped tar archive of a repository into `target`.
///
/// Members that would land outside the target directory (absolute paths or
/// parent-directory components) abort the extraction.
pub fn extract_archive(archive_path: &Path, target: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)
        .with_context(|| format!("could not open repository archive {}", archive_path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let member = entry.path()?.into_owned();
        if !is_safe_member(&member) {
            bail!(
                "attempted path traversal in repository archive: {}",
                member.display()
            );
        }
        let destination = target.join(&member);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&destination)?;
    }
    Ok(())
}

fn is_safe_member(member: &Path) -> bool {
    !member.as_os_str().is_empty()
        && member
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// The directory name a repository archive unpacks to, derived from the
/// clone url: the last path segment with any extension stripped.
pub fn repository_name(url: &str) -> &str {
    let segment = url.rsplit('/').next().unwrap_or(url);
    segment.split('.').next().unwrap_or(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn members_with_parent_components_are_rejected() {
        assert!(!is_safe_member(&PathBuf::from("../evil.txt")));
        assert!(!is_safe_member(&PathBuf::from("repo/../../evil.txt")));
        assert!(!is_safe_member(&PathBuf::from("/etc/passwd")));
        assert!(!is_safe_member(&PathBuf::from("")));
        assert!(is_safe_member(&PathBuf::from("repo/src/main.rs")));
        assert!(is_safe_member(&PathBuf::from("./repo/file")));
    }

    #[test]
    fn archives_extract_into_the_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("sample.tar.gz");

        let mut raw = Vec::new();
        {
            let encoder =
                flate2::write::GzEncoder::new(&mut raw, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let content = b"hello";
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "sample/file.txt", content.as_slice())
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        fs::File::create(&archive_path)
            .unwrap()
            .write_all(&raw)
            .unwrap();

        let target = dir.path().join("out");
        fs::create_dir_all(&target).unwrap();
        extract_archive(&archive_path, &target).unwrap();

        let extracted = fs::read_to_string(target.join("sample/file.txt")).unwrap();
        assert_eq!(extracted, "hello");
    }

    #[test]
    fn repository_names_come_from_the_clone_url() {
        assert_eq!(
            repository_name("https://github.com/example/sample.git"),
            "sample"
        );
        assert_eq!(repository_name("https://example.com/repo"), "repo");
    }
}
