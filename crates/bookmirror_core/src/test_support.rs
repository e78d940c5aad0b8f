use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};

use crate::api::{
    ApiError, AttachmentContent, AttachmentItem, BookItem, ChapterItem, ContentApi, ImageItem,
    PageItem, ShelfItem,
};
use crate::config::{ExportFormat, ExportLevel};

pub const BASE_UNIX_SECONDS: i64 = 1_700_000_000;

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE_UNIX_SECONDS + seconds, 0)
        .single()
        .expect("valid timestamp")
}

#[derive(Default)]
pub struct MockApi {
    pub shelves: Vec<ShelfItem>,
    pub shelf_books: BTreeMap<i64, Vec<BookItem>>,
    pub books: Vec<BookItem>,
    pub chapters: Vec<ChapterItem>,
    pub pages: Vec<PageItem>,
    pub attachments: Vec<AttachmentItem>,
    pub attachment_contents: BTreeMap<i64, AttachmentContent>,
    pub images: Vec<ImageItem>,
    pub exports: BTreeMap<String, Vec<u8>>,
    pub downloads: BTreeMap<String, Vec<u8>>,
    pub forbidden: bool,
    pub export_requests: Vec<String>,
    pub download_requests: Vec<(String, bool)>,
    pub request_count: usize,
}

impl MockApi {
    pub fn add_shelf(
        &mut self,
        id: i64,
        name: &str,
        updated_at: DateTime<Utc>,
        books: &[(i64, &str, DateTime<Utc>)],
    ) {
        self.shelves.push(ShelfItem {
            id,
            name: name.to_string(),
            updated_at,
        });
        self.shelf_books.insert(
            id,
            books
                .iter()
                .map(|(id, name, updated_at)| BookItem {
                    id: *id,
                    name: name.to_string(),
                    updated_at: *updated_at,
                })
                .collect(),
        );
    }

    pub fn add_book(&mut self, id: i64, name: &str, updated_at: DateTime<Utc>) {
        self.books.push(BookItem {
            id,
            name: name.to_string(),
            updated_at,
        });
    }

    pub fn add_chapter(&mut self, id: i64, book_id: i64, name: &str, updated_at: DateTime<Utc>) {
        self.chapters.push(ChapterItem {
            id,
            name: name.to_string(),
            book_id,
            updated_at,
        });
    }

    pub fn add_page(
        &mut self,
        id: i64,
        book_id: i64,
        chapter_id: Option<i64>,
        name: &str,
        updated_at: DateTime<Utc>,
    ) {
        self.pages.push(PageItem {
            id,
            name: name.to_string(),
            book_id,
            chapter_id,
            updated_at,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_attachment(
        &mut self,
        id: i64,
        uploaded_to: i64,
        name: &str,
        extension: &str,
        updated_at: DateTime<Utc>,
        external: bool,
        content: &str,
    ) {
        self.attachments.push(AttachmentItem {
            id,
            name: name.to_string(),
            extension: extension.to_string(),
            uploaded_to,
            updated_at,
        });
        self.attachment_contents.insert(
            id,
            AttachmentContent {
                external,
                content: content.to_string(),
            },
        );
    }

    pub fn add_image(&mut self, id: i64, name: &str, path: &str, updated_at: DateTime<Utc>) {
        let url = format!("https://wiki.example.org{path}");
        self.images.push(ImageItem {
            id,
            name: name.to_string(),
            url: url.clone(),
            path: path.to_string(),
            updated_at,
        });
        self.downloads.insert(url, format!("image {id}").into_bytes());
    }

    fn check_access(&mut self, url: &str) -> Result<()> {
        self.request_count += 1;
        if self.forbidden {
            return Err(ApiError::Forbidden {
                status: 403,
                url: url.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl ContentApi for MockApi {
    fn list_shelves(&mut self) -> Result<Vec<ShelfItem>> {
        self.check_access("shelves")?;
        Ok(self.shelves.clone())
    }

    fn shelf_books(&mut self, shelf_id: i64) -> Result<Vec<BookItem>> {
        self.check_access(&format!("shelves/{shelf_id}"))?;
        Ok(self.shelf_books.get(&shelf_id).cloned().unwrap_or_default())
    }

    fn list_books(&mut self) -> Result<Vec<BookItem>> {
        self.check_access("books")?;
        Ok(self.books.clone())
    }

    fn list_chapters(&mut self) -> Result<Vec<ChapterItem>> {
        self.check_access("chapters")?;
        Ok(self.chapters.clone())
    }

    fn list_pages(&mut self) -> Result<Vec<PageItem>> {
        self.check_access("pages")?;
        Ok(self.pages.clone())
    }

    fn list_attachments(&mut self) -> Result<Vec<AttachmentItem>> {
        self.check_access("attachments")?;
        Ok(self.attachments.clone())
    }

    fn list_images(&mut self) -> Result<Vec<ImageItem>> {
        self.check_access("image-gallery")?;
        Ok(self.images.clone())
    }

    fn attachment_content(&mut self, attachment_id: i64) -> Result<AttachmentContent> {
        self.check_access(&format!("attachments/{attachment_id}"))?;
        self.attachment_contents
            .get(&attachment_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("attachment {attachment_id} not found"))
    }

    fn export(&mut self, level: ExportLevel, id: i64, format: ExportFormat) -> Result<Vec<u8>> {
        let endpoint = format!("{}/{id}/export/{}", level.as_str(), format.as_str());
        self.check_access(&endpoint)?;
        self.export_requests.push(endpoint.clone());
        Ok(self
            .exports
            .get(&endpoint)
            .cloned()
            .unwrap_or_else(|| endpoint.into_bytes()))
    }

    fn download(&mut self, url: &str, authenticated: bool) -> Result<Vec<u8>> {
        self.download_requests.push((url.to_string(), authenticated));
        self.check_access(url)?;
        self.downloads.get(url).cloned().ok_or_else(|| {
            ApiError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }
            .into()
        })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
