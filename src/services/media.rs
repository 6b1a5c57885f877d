use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use std::collections::{HashSet, VecDeque};
use std::io::{Cursor, Write};
use std::sync::mpsc;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::Config;
use crate::db::Database;
use crate::drive::DriveApi;
use crate::error::{AppError, Result};
use crate::models::DriveFile;
use crate::services::{AccessContext, AccessService};

pub const DEFAULT_THUMBNAIL_SIZE: u32 = 320;
const MIN_THUMBNAIL_SIZE: u32 = 32;
const MAX_THUMBNAIL_SIZE: u32 = 1024;
const MAX_SOURCE_IMAGE_BYTES: u64 = 25 * 1024 * 1024;
const ARCHIVE_PAGE_SIZE: u32 = 1000;

/// Thumbnails and folder archives
pub struct MediaService;

impl MediaService {
    pub fn thumbnail_size(requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(DEFAULT_THUMBNAIL_SIZE)
            .clamp(MIN_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE)
    }

    /// JPEG thumbnail fitting in a `size` square
    pub async fn thumbnail(drive: &dyn DriveApi, file: &DriveFile, size: u32) -> Result<Vec<u8>> {
        if !file.is_image() {
            return Err(AppError::BadRequest("File is not an image".to_string()));
        }

        let data = drive
            .download(&file.id)
            .await?
            .into_bytes(MAX_SOURCE_IMAGE_BYTES)
            .await?;

        tokio::task::spawn_blocking(move || render_thumbnail(&data, size))
            .await
            .map_err(|e| AppError::Internal(format!("Thumbnail task failed: {}", e)))?
    }

    /// Zip a folder tree breadth first
    ///
    /// Google documents have no binary content and are left out, so are
    /// protected subfolders the visitor has not unlocked. Each file is
    /// compressed on a blocking thread as soon as it is downloaded, only the
    /// finished archive is held in memory since `ZipWriter` needs to seek.
    pub async fn archive(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        ctx: &AccessContext,
        folder: &DriveFile,
    ) -> Result<Vec<u8>> {
        if !folder.is_folder() {
            return Err(AppError::BadRequest("Only folders can be archived".to_string()));
        }

        let protected = AccessService::protected_ids(db).await?;
        let max_bytes = config.archive.max_total_mb * 1024 * 1024;
        let mut queue = VecDeque::from([(folder.id.clone(), String::new())]);
        let (entries, received) = mpsc::channel::<(String, Bytes)>();
        let writer = tokio::task::spawn_blocking(move || write_zip(received));
        let mut file_count = 0usize;
        let mut total_bytes = 0u64;
        let mut skipped = 0usize;

        while let Some((folder_id, prefix)) = queue.pop_front() {
            let mut taken = HashSet::new();
            let mut page_token: Option<String> = None;

            loop {
                let page = drive
                    .list_children(&folder_id, page_token.as_deref(), ARCHIVE_PAGE_SIZE)
                    .await?;

                for child in page.files {
                    let path = format!("{}{}", prefix, unique_name(&mut taken, &child.name));

                    if child.is_folder() {
                        if AccessService::can_enter(config, ctx, &protected, &child.id) {
                            queue.push_back((child.id, format!("{}/", path)));
                        } else {
                            skipped += 1;
                        }
                        continue;
                    }
                    if child.is_google_native() {
                        skipped += 1;
                        continue;
                    }

                    if file_count >= config.archive.max_files {
                        return Err(AppError::BadRequest(format!(
                            "Folder has more than {} files to archive",
                            config.archive.max_files
                        )));
                    }
                    let too_large = || {
                        AppError::BadRequest(format!(
                            "Folder is larger than {} MB",
                            config.archive.max_total_mb
                        ))
                    };
                    let remaining = max_bytes - total_bytes;
                    if child.size.is_some_and(|s| s > remaining) {
                        return Err(too_large());
                    }

                    let data = drive
                        .download(&child.id)
                        .await?
                        .into_bytes(remaining)
                        .await
                        .map_err(|e| match e {
                            AppError::BadRequest(_) => too_large(),
                            other => other,
                        })?;
                    total_bytes += data.len() as u64;
                    file_count += 1;
                    entries.send((path, data)).map_err(|_| {
                        AppError::Internal("Archive writer stopped".to_string())
                    })?;
                }

                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
        }

        tracing::info!(
            "Archiving {} ({} files, {} bytes, {} skipped)",
            folder.name,
            file_count,
            total_bytes,
            skipped
        );

        drop(entries);
        writer
            .await
            .map_err(|e| AppError::Internal(format!("Archive task failed: {}", e)))?
    }
}

fn render_thumbnail(data: &[u8], size: u32) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)
        .map_err(|e| AppError::BadRequest(format!("Unsupported image: {}", e)))?;

    // Never upscale
    let thumb = if img.width() <= size && img.height() <= size {
        img
    } else {
        img.thumbnail(size, size)
    };

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(thumb.to_rgb8())
        .write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|e| AppError::Internal(format!("Thumbnail encoding failed: {}", e)))?;
    Ok(out.into_inner())
}

/// Compress entries in arrival order until the sender hangs up
fn write_zip(entries: mpsc::Receiver<(String, Bytes)>) -> Result<Vec<u8>> {
    let zip_err = |e: zip::result::ZipError| AppError::Internal(format!("Archive failed: {}", e));

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (path, data) in entries {
        zip.start_file(path, options).map_err(zip_err)?;
        zip.write_all(&data)?;
    }
    Ok(zip.finish().map_err(zip_err)?.into_inner())
}

/// Entry name unique within its folder, `a.txt` then `a (1).txt`
fn unique_name(taken: &mut HashSet<String>, name: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let clean = if clean.trim().is_empty() {
        "untitled".to_string()
    } else {
        clean
    };

    let (stem, ext) = match clean.rfind('.') {
        Some(pos) if pos > 0 => (&clean[..pos], &clean[pos..]),
        _ => (clean.as_str(), ""),
    };
    let mut candidate = clean.clone();
    let mut n = 1;
    while taken.contains(&candidate) {
        candidate = format!("{} ({}){}", stem, n, ext);
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::memory::MemoryDrive;
    use crate::models::{CurrentUser, UserRole};
    use crate::services::auth::tests::test_config;
    use image::{GenericImageView, Rgb, RgbImage};
    use std::io::Read;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn visitor() -> AccessContext {
        AccessContext {
            user: Some(CurrentUser {
                id: "u1".to_string(),
                email: "u1@example.com".to_string(),
                role: UserRole::User,
            }),
            ..Default::default()
        }
    }

    fn archive_names(bytes: Vec<u8>) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        let mut first = archive.by_name(&names[0]).unwrap();
        let mut content = String::new();
        first.read_to_string(&mut content).unwrap();
        assert!(!content.is_empty());
        names
    }

    #[test]
    fn test_thumbnail_size_is_clamped() {
        assert_eq!(MediaService::thumbnail_size(None), 320);
        assert_eq!(MediaService::thumbnail_size(Some(8)), 32);
        assert_eq!(MediaService::thumbnail_size(Some(5000)), 1024);
    }

    #[test]
    fn test_unique_names() {
        let mut taken = HashSet::new();
        assert_eq!(unique_name(&mut taken, "a.txt"), "a.txt");
        assert_eq!(unique_name(&mut taken, "a.txt"), "a (1).txt");
        assert_eq!(unique_name(&mut taken, "a.txt"), "a (2).txt");
        assert_eq!(unique_name(&mut taken, "x/y"), "x_y");
        assert_eq!(unique_name(&mut taken, ".env"), ".env");
        assert_eq!(unique_name(&mut taken, "  "), "untitled");
    }

    #[tokio::test]
    async fn test_thumbnail_keeps_aspect_ratio() {
        let drive = MemoryDrive::new("root");
        drive.add_file("big", "big.png", "root", "image/png", &png(200, 100));
        drive.add_file("small", "small.png", "root", "image/png", &png(20, 10));
        drive.add_file("doc", "doc.txt", "root", "text/plain", b"hi");

        let big = drive.snapshot("big").unwrap();
        let jpeg = MediaService::thumbnail(&drive, &big, 50).await.unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        assert_eq!(image::load_from_memory(&jpeg).unwrap().dimensions(), (50, 25));

        let small = drive.snapshot("small").unwrap();
        let jpeg = MediaService::thumbnail(&drive, &small, 320).await.unwrap();
        assert_eq!(image::load_from_memory(&jpeg).unwrap().dimensions(), (20, 10));

        let doc = drive.snapshot("doc").unwrap();
        assert!(matches!(
            MediaService::thumbnail(&drive, &doc, 320).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_archive_skips_native_and_locked_content() {
        let db = Database::in_memory().await;
        let config = test_config();
        let drive = MemoryDrive::new("root");
        drive.add_folder("docs", "Docs", "root");
        drive.add_file("a", "a.txt", "docs", "text/plain", b"alpha");
        drive.add_file("a2", "a.txt", "docs", "text/plain", b"alpha again");
        drive.add_file("g", "Plan", "docs", "application/vnd.google-apps.document", b"");
        drive.add_folder("sub", "Sub", "docs");
        drive.add_file("c", "c.txt", "sub", "text/plain", b"gamma");
        drive.add_folder("locked", "Locked", "docs");
        drive.add_file("d", "d.txt", "locked", "text/plain", b"delta");
        AccessService::protect_folder(&db, "locked", "team", "hunter2")
            .await
            .unwrap();

        let folder = drive.snapshot("docs").unwrap();
        let bytes = MediaService::archive(&db, &config, &drive, &visitor(), &folder)
            .await
            .unwrap();
        assert_eq!(
            archive_names(bytes),
            vec!["Sub/c.txt", "a (1).txt", "a.txt"]
        );

        let unlocked = AccessContext {
            folder_tokens: vec![AccessService::issue_folder_token(&config, "locked").unwrap().token],
            ..visitor()
        };
        let bytes = MediaService::archive(&db, &config, &drive, &unlocked, &folder)
            .await
            .unwrap();
        assert!(archive_names(bytes).contains(&"Locked/d.txt".to_string()));
    }

    #[tokio::test]
    async fn test_zip_writer_consumes_entries_as_sent() {
        let (entries, received) = mpsc::channel();
        let writer = tokio::task::spawn_blocking(move || write_zip(received));
        entries
            .send(("b.txt".to_string(), Bytes::from_static(b"beta")))
            .unwrap();
        entries
            .send(("dir/a.txt".to_string(), Bytes::from_static(b"alpha")))
            .unwrap();
        drop(entries);

        let bytes = writer.await.unwrap().unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(
            archive.file_names().collect::<HashSet<_>>(),
            HashSet::from(["b.txt", "dir/a.txt"])
        );
    }

    #[tokio::test]
    async fn test_archive_limits() {
        let db = Database::in_memory().await;
        let mut config = test_config();
        let drive = MemoryDrive::new("root");
        drive.add_folder("docs", "Docs", "root");
        drive.add_file("a", "a.txt", "docs", "text/plain", b"alpha");
        drive.add_file("b", "b.txt", "docs", "text/plain", b"beta");
        let folder = drive.snapshot("docs").unwrap();

        config.archive.max_files = 1;
        let err = MediaService::archive(&db, &config, &drive, &visitor(), &folder)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("more than 1 files")));

        config.archive.max_files = 10;
        config.archive.max_total_mb = 0;
        let err = MediaService::archive(&db, &config, &drive, &visitor(), &folder)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("larger than")));

        let file = drive.snapshot("a").unwrap();
        assert!(MediaService::archive(&db, &config, &drive, &visitor(), &file)
            .await
            .is_err());
    }
}
