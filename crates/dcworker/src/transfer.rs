// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Presigned-URL transfers and archive handling.
//!
//! Archives are packed and unpacked with the system `tar`.

use std::path::{Component, Path};

use dcworker_master::PresignedPost;
use reqwest::multipart::{Form, Part};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::task::DownloadPair;

/// GET a presigned URL into a file.
pub async fn download_to_file(http: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    let mut response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(Error::Transfer(format!(
            "GET {} returned {}",
            url,
            response.status()
        )));
    }

    let mut file = tokio::fs::File::create(dest).await?;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Download every `(hint, url)` pair into `dir/hint`.
///
/// Stops at the first failure.
pub async fn download_presigned(
    http: &reqwest::Client,
    dir: &Path,
    pairs: &[DownloadPair],
) -> Result<()> {
    for (hint, url) in pairs {
        let relative = Path::new(hint);
        if hint.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::Transfer(format!("invalid download hint '{}'", hint)));
        }

        let dest = dir.join(relative);
        download_to_file(http, url, &dest).await?;

        if !tokio::fs::metadata(&dest).await.is_ok_and(|m| m.is_file()) {
            return Err(Error::Transfer(format!(
                "downloaded file missing at {}",
                dest.display()
            )));
        }
        info!(stage = "download", file = %dest.display(), "Downloaded");
    }
    Ok(())
}

fn archive_flags(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Some("-xzf")
    } else if lower.ends_with(".tar") {
        Some("-xf")
    } else {
        None
    }
}

/// Extract every archive directly inside `dir` into `dir`, deleting each
/// archive afterwards. Nested archives are left alone.
pub async fn extract_archives_in_dir(dir: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut archives = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(flags) = archive_flags(&name) {
            archives.push((entry.path(), flags));
        }
    }

    for (archive, flags) in archives {
        run_tar(&[flags, &archive.to_string_lossy(), "-C", &dir.to_string_lossy()]).await?;
        tokio::fs::remove_file(&archive).await?;
        debug!(archive = %archive.display(), "Extracted archive");
    }
    Ok(())
}

/// Extract one gzip tarball into `dest`.
pub async fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    run_tar(&["-xzf", &archive.to_string_lossy(), "-C", &dest.to_string_lossy()]).await
}

/// Pack `source_dir` into a gzip tarball whose single top-level entry is the
/// directory's own name.
pub async fn create_tar_gz(source_dir: &Path, archive: &Path) -> Result<()> {
    let parent = source_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = source_dir
        .file_name()
        .ok_or_else(|| Error::Transfer(format!("cannot archive {}", source_dir.display())))?;

    run_tar(&[
        "-czf",
        &archive.to_string_lossy(),
        "-C",
        &parent.to_string_lossy(),
        &name.to_string_lossy(),
    ])
    .await?;

    if !tokio::fs::metadata(archive).await.is_ok_and(|m| m.is_file()) {
        return Err(Error::Transfer(format!(
            "failed to tar {} at {}",
            source_dir.display(),
            archive.display()
        )));
    }
    Ok(())
}

async fn run_tar(args: &[&str]) -> Result<()> {
    let output = Command::new("tar").args(args).output().await?;
    if !output.status.success() {
        return Err(Error::Transfer(format!(
            "tar {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Multipart POST of a file to a presigned target.
///
/// The server-supplied form fields go first, the file part is named `file`.
pub async fn upload_presigned(
    http: &reqwest::Client,
    target: &PresignedPost,
    file: &Path,
    upload_name: &str,
) -> Result<()> {
    let bytes = tokio::fs::read(file).await?;

    let mut form = Form::new();
    for (key, value) in &target.fields {
        form = form.text(key.clone(), value.clone());
    }
    form = form.part("file", Part::bytes(bytes).file_name(upload_name.to_string()));

    let response = http.post(&target.url).multipart(form).send().await?;
    if !response.status().is_success() {
        return Err(Error::Transfer(format!(
            "upload of {} to {} returned {}",
            file.display(),
            target.url,
            response.status()
        )));
    }
    Ok(())
}

/// Copy a directory tree.
pub async fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}
