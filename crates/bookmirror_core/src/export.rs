use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{info, warn};
use regex::Regex;

use crate::api::{ApiError, ContentApi};
use crate::catalog::Catalog;
use crate::config::{ExportFormat, ExportLevel};
use crate::hierarchy::NodeId;
use crate::runtime::{ResolvedPaths, ensure_dir, normalize_for_display};
use crate::staleness::StalenessDecider;

/// Path prefix under which the wiki serves gallery images.
pub const IMAGE_URL_PATH: &str = "/uploads/images/";

static SCALED_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/scaled-\d+-/").expect("valid scaled segment pattern"));

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub formats: Vec<ExportFormat>,
    pub levels: Vec<ExportLevel>,
    pub force: bool,
    pub attachments: bool,
    pub images: bool,
    pub external_attachments: bool,
    pub skip_broken_links: bool,
    pub markdown_images: bool,
    pub host: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            formats: vec![ExportFormat::Markdown],
            levels: vec![ExportLevel::Pages],
            force: false,
            attachments: false,
            images: false,
            external_attachments: true,
            skip_broken_links: false,
            markdown_images: false,
            host: crate::config::DEFAULT_HOST.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub written: usize,
    pub skipped: usize,
    pub created_dirs: usize,
    pub attachments_written: usize,
    pub images_written: usize,
    pub skipped_external: usize,
    pub broken_links: Vec<String>,
    pub request_count: usize,
}

struct ExportRun<'a, A: ContentApi> {
    api: &'a mut A,
    catalog: &'a Catalog,
    paths: &'a ResolvedPaths,
    options: &'a ExportOptions,
    decider: StalenessDecider,
    report: ExportReport,
}

/// Mirror the catalog to disk: the requested levels first, then attachments
/// and images when enabled.
pub fn run_export<A: ContentApi>(
    api: &mut A,
    catalog: &Catalog,
    paths: &ResolvedPaths,
    options: &ExportOptions,
) -> Result<ExportReport> {
    let mut run = ExportRun {
        api,
        catalog,
        paths,
        options,
        decider: StalenessDecider::new(options.force),
        report: ExportReport::default(),
    };

    for level in &options.levels {
        let nodes: Vec<NodeId> = match level {
            ExportLevel::Pages => catalog.pages.values().copied().collect(),
            ExportLevel::Chapters => catalog.chapters.values().copied().collect(),
            ExportLevel::Books => catalog.books.values().copied().collect(),
        };
        info!("Exporting {}...", level.as_str());
        run.export_documents(&nodes, *level)?;
    }

    if options.levels.contains(&ExportLevel::Chapters)
        && !options.levels.contains(&ExportLevel::Pages)
    {
        info!("Exporting pages that are not in chapter...");
        let nodes: Vec<NodeId> = catalog.pages_not_in_chapter.values().copied().collect();
        run.export_documents(&nodes, ExportLevel::Pages)?;
    }

    if options.attachments {
        info!("Exporting attachments...");
        run.export_attachments()?;
    }

    if options.images {
        info!("Exporting images...");
        run.export_images()?;
    }

    run.report.request_count = run.api.request_count();
    Ok(run.report)
}

impl<A: ContentApi> ExportRun<'_, A> {
    fn export_documents(&mut self, nodes: &[NodeId], level: ExportLevel) -> Result<()> {
        let catalog = self.catalog;
        let tree = &catalog.hierarchy;
        for node_id in nodes {
            let node = tree.node(*node_id);
            let relative_dir = tree.relative_dir(*node_id);
            let dir = self.paths.output_root.join(&relative_dir);
            if ensure_dir(&dir)? {
                self.report.created_dirs += 1;
            }

            for format in &self.options.formats {
                let file_path = dir.join(format!("{}.{}", node.name, format.file_extension()));
                if !self.decider.needs_update(&file_path, tree, *node_id)? {
                    self.report.skipped += 1;
                    continue;
                }

                let mut data = self.api.export(level, node.id, *format)?;
                match format {
                    ExportFormat::Zip => validate_bundle(&data).with_context(|| {
                        format!(
                            "{}/{}/export/zip did not return a readable zip archive",
                            level.as_str(),
                            node.id
                        )
                    })?,
                    ExportFormat::Markdown if self.options.markdown_images => {
                        let prefix = images_link_prefix(self.paths, tree.depth(*node_id));
                        data = rewrite_markdown_image_links(&data, &self.options.host, &prefix);
                    }
                    _ => {}
                }
                write_file(&file_path, &data)?;
                self.report.written += 1;
            }
        }
        Ok(())
    }

    fn export_attachments(&mut self) -> Result<()> {
        let catalog = self.catalog;
        let tree = &catalog.hierarchy;
        for attachment_id in catalog.attachments.values() {
            let node = tree.node(*attachment_id);
            let dir = if node.is_root() {
                self.paths.orphaned_attachments_dir.clone()
            } else {
                self.paths.output_root.join(tree.relative_dir(*attachment_id))
            };
            if ensure_dir(&dir)? {
                self.report.created_dirs += 1;
            }

            let file_path = dir.join(&node.name);
            if !self.decider.needs_update(&file_path, tree, *attachment_id)? {
                self.report.skipped += 1;
                continue;
            }

            let content = self.api.attachment_content(node.id)?;
            let data = if content.external {
                let url = content.content.trim();
                if !self.options.external_attachments {
                    info!(
                        "Skipping external attachment \"{}\" linking to {url}",
                        node.name
                    );
                    self.report.skipped_external += 1;
                    continue;
                }
                match self.api.download(url, false) {
                    Ok(data) => data,
                    Err(error) => {
                        self.tolerate_broken_link(url, error)?;
                        continue;
                    }
                }
            } else {
                BASE64.decode(content.content.trim()).with_context(|| {
                    format!("attachment {} has invalid base64 content", node.id)
                })?
            };

            write_file(&file_path, &data)?;
            self.report.attachments_written += 1;
        }
        Ok(())
    }

    fn export_images(&mut self) -> Result<()> {
        let catalog = self.catalog;
        let tree = &catalog.hierarchy;
        for image_id in catalog.images.values() {
            let node = tree.node(*image_id);
            let Some(file) = node.file.as_ref() else {
                continue;
            };
            let file_path = join_scoped(&self.paths.images_dir, &file.storage_path)?;
            if let Some(parent) = file_path.parent() {
                if ensure_dir(parent)? {
                    self.report.created_dirs += 1;
                }
            }

            if !self.decider.needs_update(&file_path, tree, *image_id)? {
                self.report.skipped += 1;
                continue;
            }

            match self.api.download(&file.url, true) {
                Ok(data) => {
                    write_file(&file_path, &data)?;
                    self.report.images_written += 1;
                }
                Err(error) => self.tolerate_broken_link(&file.url, error)?,
            }
        }
        Ok(())
    }

    fn tolerate_broken_link(&mut self, url: &str, error: anyhow::Error) -> Result<()> {
        if matches!(
            error.downcast_ref::<ApiError>(),
            Some(ApiError::Forbidden { .. })
        ) {
            return Err(error);
        }
        if !self.options.skip_broken_links {
            return Err(error.context(format!(
                "failed to download {url} (use --skip-broken-links to continue past broken links)"
            )));
        }
        warn!("Skipping broken link {url}: {error:#}");
        self.report.broken_links.push(url.to_string());
        Ok(())
    }
}

/// Point markdown image links at the local images directory.
///
/// Links of the form `](<host>/uploads/images/...` get the host replaced by
/// `images_prefix`, and `/scaled-<digits>-/` thumbnail segments collapse to
/// `/` so the full-size local copy is referenced. Non UTF-8 input is returned
/// unchanged.
pub fn rewrite_markdown_image_links(markdown: &[u8], host: &str, images_prefix: &str) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(markdown) else {
        return markdown.to_vec();
    };
    let needle = format!("]({}{IMAGE_URL_PATH}", host.trim_end_matches('/'));
    let replacement = format!("]({}{IMAGE_URL_PATH}", images_prefix.trim_end_matches('/'));
    let rewritten = text.replace(&needle, &replacement);
    SCALED_SEGMENT
        .replace_all(&rewritten, "/")
        .into_owned()
        .into_bytes()
}

/// Relative link from a document `depth` directories below the export root to
/// the images directory.
fn images_link_prefix(paths: &ResolvedPaths, depth: usize) -> String {
    let images = paths
        .images_dir
        .strip_prefix(&paths.output_root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| paths.images_dir.clone());
    if images.is_absolute() {
        return normalize_for_display(&images);
    }
    format!("{}{}", "../".repeat(depth), normalize_for_display(&images))
}

/// Join an API-reported path below `base`, refusing segments that would
/// escape it.
fn join_scoped(base: &Path, relative: &str) -> Result<PathBuf> {
    let mut output = base.to_path_buf();
    for segment in relative.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => bail!("path escapes the images directory: {relative}"),
            _ => output.push(segment),
        }
    }
    if output == base {
        bail!("empty storage path for image");
    }
    Ok(output)
}

fn validate_bundle(data: &[u8]) -> Result<()> {
    let archive = zip::ZipArchive::new(Cursor::new(data)).context("invalid zip archive")?;
    if archive.is_empty() {
        bail!("zip archive has no entries");
    }
    Ok(())
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    info!("Saving {}", normalize_for_display(path));
    fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::io::{Cursor, Write};
    use std::path::Path;
    use std::time::SystemTime;

    use chrono::{DateTime, Utc};
    use tempfile::tempdir;

    use super::{ExportOptions, join_scoped, rewrite_markdown_image_links, run_export};
    use crate::api::ApiError;
    use crate::catalog::{CatalogOptions, build_catalog};
    use crate::config::{ExportFormat, ExportLevel};
    use crate::hierarchy::Hierarchy;
    use crate::runtime::{ORPHANED_ATTACHMENTS_DIR, ResolvedPaths};
    use crate::test_support::{MockApi, at};

    fn scenario_api() -> MockApi {
        let mut api = MockApi::default();
        api.add_shelf(1, "Shelf", at(0), &[(10, "Book", at(0))]);
        api.add_book(10, "Book", at(0));
        api.add_chapter(100, 10, "Chapter", at(0));
        api.add_page(1000, 10, Some(100), "Page", at(0));
        api
    }

    fn all_options() -> CatalogOptions {
        CatalogOptions {
            include_attachments: true,
            include_images: true,
        }
    }

    fn set_mtime(path: &Path, modified: DateTime<Utc>) {
        let file = File::options().write(true).open(path).expect("open file");
        file.set_modified(SystemTime::from(modified))
            .expect("set mtime");
    }

    #[test]
    fn exports_page_into_mirrored_directory() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        let catalog =
            build_catalog(&mut api, Hierarchy::default(), &CatalogOptions::default()).expect("build");

        let report = run_export(&mut api, &catalog, &paths, &ExportOptions::default())
            .expect("export");

        let file = temp
            .path()
            .join("Shelf")
            .join("Book")
            .join("Chapter")
            .join("Page.md");
        assert_eq!(
            fs::read_to_string(&file).expect("read export"),
            "pages/1000/export/markdown"
        );
        assert_eq!(api.export_requests, vec!["pages/1000/export/markdown"]);
        assert_eq!(report.written, 1);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn second_run_skips_fresh_files_until_a_descendant_changes() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let options = ExportOptions {
            levels: vec![ExportLevel::Books],
            formats: vec![ExportFormat::Html],
            ..ExportOptions::default()
        };

        let mut api = scenario_api();
        let catalog =
            build_catalog(&mut api, Hierarchy::default(), &CatalogOptions::default()).expect("build");
        run_export(&mut api, &catalog, &paths, &options).expect("first export");
        let file = temp.path().join("Shelf").join("Book.html");
        set_mtime(&file, at(10));

        let report = run_export(&mut api, &catalog, &paths, &options).expect("second export");
        assert_eq!(report.written, 0);
        assert_eq!(report.skipped, 1);

        let mut changed = scenario_api();
        changed.pages[0].updated_at = at(11);
        let catalog = build_catalog(&mut changed, Hierarchy::default(), &CatalogOptions::default())
            .expect("build");
        let report = run_export(&mut changed, &catalog, &paths, &options).expect("third export");
        assert_eq!(report.written, 1);
        assert_eq!(changed.export_requests, vec!["books/10/export/html"]);
    }

    #[test]
    fn force_rewrites_fresh_files() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        let catalog =
            build_catalog(&mut api, Hierarchy::default(), &CatalogOptions::default()).expect("build");
        run_export(&mut api, &catalog, &paths, &ExportOptions::default()).expect("first export");

        let forced = ExportOptions {
            force: true,
            ..ExportOptions::default()
        };
        let report = run_export(&mut api, &catalog, &paths, &forced).expect("forced export");
        assert_eq!(report.written, 1);
        assert_eq!(api.export_requests.len(), 2);
    }

    #[test]
    fn chapters_level_also_exports_pages_outside_chapters() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        api.add_page(1001, 10, Some(4242), "Loose", at(0));
        let catalog =
            build_catalog(&mut api, Hierarchy::default(), &CatalogOptions::default()).expect("build");

        let options = ExportOptions {
            levels: vec![ExportLevel::Chapters],
            ..ExportOptions::default()
        };
        run_export(&mut api, &catalog, &paths, &options).expect("export");

        assert_eq!(
            api.export_requests,
            vec![
                "chapters/100/export/markdown",
                "pages/1001/export/markdown"
            ]
        );
        assert!(temp.path().join("Shelf").join("Book").join("Chapter.md").exists());
        assert!(temp.path().join("Shelf").join("Book").join("Loose.md").exists());
    }

    #[test]
    fn pages_and_chapters_together_do_not_export_loose_pages_twice() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        api.add_page(1001, 10, None, "Loose", at(0));
        let catalog =
            build_catalog(&mut api, Hierarchy::default(), &CatalogOptions::default()).expect("build");

        let options = ExportOptions {
            levels: vec![ExportLevel::Pages, ExportLevel::Chapters],
            force: true,
            ..ExportOptions::default()
        };
        run_export(&mut api, &catalog, &paths, &options).expect("export");
        let loose_requests = api
            .export_requests
            .iter()
            .filter(|endpoint| endpoint.as_str() == "pages/1001/export/markdown")
            .count();
        assert_eq!(loose_requests, 1);
    }

    #[test]
    fn attachment_of_deleted_page_goes_to_orphan_directory() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        api.add_attachment(1, 1000, "Notes", "txt", at(0), false, "aGVsbG8=");
        api.add_attachment(2, 5555, "Lost", "txt", at(0), false, "b3JwaGFu");
        let catalog = build_catalog(&mut api, Hierarchy::default(), &all_options()).expect("build");

        let options = ExportOptions {
            attachments: true,
            ..ExportOptions::default()
        };
        let report = run_export(&mut api, &catalog, &paths, &options).expect("export");

        let attached = temp
            .path()
            .join("Shelf")
            .join("Book")
            .join("Chapter")
            .join("Page")
            .join("Notes.txt");
        assert_eq!(fs::read_to_string(attached).expect("read"), "hello");
        let orphan = temp.path().join(ORPHANED_ATTACHMENTS_DIR).join("Lost.txt");
        assert_eq!(fs::read_to_string(orphan).expect("read"), "orphan");
        assert_eq!(report.attachments_written, 2);
    }

    #[test]
    fn external_attachments_are_downloaded_without_credentials() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        let url = "https://files.example.net/manual.pdf";
        api.add_attachment(3, 1000, "Manual", "pdf", at(0), true, url);
        api.downloads.insert(url.to_string(), b"%PDF".to_vec());
        let catalog = build_catalog(&mut api, Hierarchy::default(), &all_options()).expect("build");

        let options = ExportOptions {
            attachments: true,
            levels: Vec::new(),
            ..ExportOptions::default()
        };
        run_export(&mut api, &catalog, &paths, &options).expect("export");

        assert_eq!(api.download_requests, vec![(url.to_string(), false)]);
        let file = temp
            .path()
            .join("Shelf")
            .join("Book")
            .join("Chapter")
            .join("Page")
            .join("Manual.pdf");
        assert_eq!(fs::read(file).expect("read"), b"%PDF");
    }

    #[test]
    fn external_attachments_can_be_disabled() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        api.add_attachment(3, 1000, "Manual", "pdf", at(0), true, "https://x.example/m.pdf");
        let catalog = build_catalog(&mut api, Hierarchy::default(), &all_options()).expect("build");

        let options = ExportOptions {
            attachments: true,
            external_attachments: false,
            levels: Vec::new(),
            ..ExportOptions::default()
        };
        let report = run_export(&mut api, &catalog, &paths, &options).expect("export");
        assert!(api.download_requests.is_empty());
        assert_eq!(report.skipped_external, 1);
    }

    #[test]
    fn broken_links_abort_unless_tolerated() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        let url = "https://gone.example.net/file.zip";
        api.add_attachment(4, 1000, "Gone", "zip", at(0), true, url);
        let catalog = build_catalog(&mut api, Hierarchy::default(), &all_options()).expect("build");

        let strict = ExportOptions {
            attachments: true,
            levels: Vec::new(),
            ..ExportOptions::default()
        };
        let error = run_export(&mut api, &catalog, &paths, &strict).expect_err("must fail");
        assert!(error.to_string().contains(url));
        assert!(matches!(
            error.downcast_ref::<ApiError>(),
            Some(ApiError::HttpStatus { status: 404, .. })
        ));

        let tolerant = ExportOptions {
            skip_broken_links: true,
            ..strict
        };
        let report = run_export(&mut api, &catalog, &paths, &tolerant).expect("export");
        assert_eq!(report.broken_links, vec![url.to_string()]);
        assert_eq!(report.attachments_written, 0);
    }

    #[test]
    fn images_are_placed_by_storage_path() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        api.add_image(7, "Diagram", "/uploads/images/gallery/2024-01/diagram.png", at(0));
        api.add_image(8, "Missing", "/uploads/images/gallery/2024-01/missing.png", at(0));
        api.downloads
            .remove("https://wiki.example.org/uploads/images/gallery/2024-01/missing.png");
        let catalog = build_catalog(&mut api, Hierarchy::default(), &all_options()).expect("build");

        let options = ExportOptions {
            images: true,
            skip_broken_links: true,
            levels: Vec::new(),
            ..ExportOptions::default()
        };
        let report = run_export(&mut api, &catalog, &paths, &options).expect("export");

        let image = temp
            .path()
            .join("images")
            .join("uploads")
            .join("images")
            .join("gallery")
            .join("2024-01")
            .join("diagram.png");
        assert_eq!(fs::read_to_string(image).expect("read"), "image 7");
        assert_eq!(report.images_written, 1);
        assert_eq!(report.broken_links.len(), 1);
        assert!(api.download_requests.iter().all(|(_, authenticated)| *authenticated));
    }

    #[test]
    fn markdown_image_links_point_at_local_images() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        api.exports.insert(
            "pages/1000/export/markdown".to_string(),
            b"![a](https://wiki.example.org/uploads/images/gallery/2024-01/scaled-1680-/a.png)"
                .to_vec(),
        );
        let catalog =
            build_catalog(&mut api, Hierarchy::default(), &CatalogOptions::default()).expect("build");

        let options = ExportOptions {
            markdown_images: true,
            host: "https://wiki.example.org".to_string(),
            ..ExportOptions::default()
        };
        run_export(&mut api, &catalog, &paths, &options).expect("export");

        let file = temp
            .path()
            .join("Shelf")
            .join("Book")
            .join("Chapter")
            .join("Page.md");
        assert_eq!(
            fs::read_to_string(file).expect("read"),
            "![a](../../../images/uploads/images/gallery/2024-01/a.png)"
        );
    }

    #[test]
    fn rewrite_leaves_foreign_links_alone() {
        let input = b"![x](https://other.example/uploads/images/x.png) [doc](https://wiki.example.org/books/a)";
        let output = rewrite_markdown_image_links(input, "https://wiki.example.org/", "images");
        assert_eq!(output, input.to_vec());

        let binary = [0xff, 0xfe, 0x00];
        assert_eq!(
            rewrite_markdown_image_links(&binary, "https://wiki.example.org", "images"),
            binary.to_vec()
        );
    }

    #[test]
    fn zip_exports_must_be_readable_archives() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        api.exports
            .insert("pages/1000/export/zip".to_string(), b"not a zip".to_vec());
        let catalog =
            build_catalog(&mut api, Hierarchy::default(), &CatalogOptions::default()).expect("build");
        let options = ExportOptions {
            formats: vec![ExportFormat::Zip],
            ..ExportOptions::default()
        };

        let error = run_export(&mut api, &catalog, &paths, &options).expect_err("must fail");
        assert!(error.to_string().contains("readable zip archive"));

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("page.html", zip::write::FileOptions::default())
            .expect("start entry");
        writer.write_all(b"<p>hi</p>").expect("write entry");
        let archive = writer.finish().expect("finish zip").into_inner();
        api.exports
            .insert("pages/1000/export/zip".to_string(), archive.clone());

        let report = run_export(&mut api, &catalog, &paths, &options).expect("export");
        assert_eq!(report.written, 1);
        let file = temp
            .path()
            .join("Shelf")
            .join("Book")
            .join("Chapter")
            .join("Page.zip");
        assert_eq!(fs::read(file).expect("read"), archive);
    }

    #[test]
    fn forbidden_response_is_surfaced() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        let catalog =
            build_catalog(&mut api, Hierarchy::default(), &CatalogOptions::default()).expect("build");
        api.forbidden = true;

        let error =
            run_export(&mut api, &catalog, &paths, &ExportOptions::default()).expect_err("403");
        assert!(matches!(
            error.downcast_ref::<ApiError>(),
            Some(ApiError::Forbidden { status: 403, .. })
        ));
    }

    #[test]
    fn forbidden_image_download_stops_even_when_skipping_broken_links() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_output_root(temp.path(), "images");
        let mut api = scenario_api();
        api.add_image(7, "Diagram", "/uploads/images/gallery/2024-01/diagram.png", at(0));
        let catalog = build_catalog(&mut api, Hierarchy::default(), &all_options()).expect("build");
        api.forbidden = true;

        let options = ExportOptions {
            images: true,
            skip_broken_links: true,
            levels: Vec::new(),
            ..ExportOptions::default()
        };
        let error = run_export(&mut api, &catalog, &paths, &options).expect_err("403");
        assert!(matches!(
            error.downcast_ref::<ApiError>(),
            Some(ApiError::Forbidden { status: 403, .. })
        ));
        assert_eq!(api.download_requests.len(), 1);
    }

    #[test]
    fn remote_names_with_separators_stay_inside_export_root() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("mirror");
        let paths = ResolvedPaths::for_output_root(&root, "images");
        let mut api = MockApi::default();
        api.add_book(10, "../../escaped", at(0));
        api.add_page(1000, 10, None, "Page", at(0));
        let catalog =
            build_catalog(&mut api, Hierarchy::new(&['#']), &CatalogOptions::default()).expect("build");

        run_export(&mut api, &catalog, &paths, &ExportOptions::default()).expect("export");

        assert!(!temp.path().join("escaped").join("Page.md").exists());
        assert!(root.join(".._.._escaped").join("Page.md").exists());
    }

    #[test]
    fn join_scoped_rejects_parent_segments() {
        let base = Path::new("/mirror/images");
        assert_eq!(
            join_scoped(base, "/uploads/images/a.png").expect("join"),
            base.join("uploads").join("images").join("a.png")
        );
        assert!(join_scoped(base, "/uploads/../../etc/passwd").is_err());
        assert!(join_scoped(base, "/").is_err());
    }
}
