use std::collections::BTreeMap;

use anyhow::{Result, bail};
use log::{debug, info, warn};

use crate::api::ContentApi;
use crate::hierarchy::{FileRef, Hierarchy, NewNode, NodeId, NodeKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogOptions {
    pub include_attachments: bool,
    pub include_images: bool,
}

/// Every remote item of one run, keyed by remote id, with the nodes living in
/// `hierarchy`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub hierarchy: Hierarchy,
    pub shelves: BTreeMap<i64, NodeId>,
    pub books: BTreeMap<i64, NodeId>,
    pub chapters: BTreeMap<i64, NodeId>,
    pub pages: BTreeMap<i64, NodeId>,
    pub pages_not_in_chapter: BTreeMap<i64, NodeId>,
    pub attachments: BTreeMap<i64, NodeId>,
    pub images: BTreeMap<i64, NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub shelves: usize,
    pub books: usize,
    pub orphan_books: usize,
    pub chapters: usize,
    pub pages: usize,
    pub pages_not_in_chapter: usize,
    pub attachments: usize,
    pub orphaned_attachments: usize,
    pub images: usize,
}

impl Catalog {
    pub fn new(hierarchy: Hierarchy) -> Self {
        Self {
            hierarchy,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> CatalogStats {
        let tree = &self.hierarchy;
        CatalogStats {
            shelves: self.shelves.len(),
            books: self.books.len(),
            orphan_books: self
                .books
                .values()
                .filter(|node| tree.node(**node).is_root())
                .count(),
            chapters: self.chapters.len(),
            pages: self.pages.len(),
            pages_not_in_chapter: self.pages_not_in_chapter.len(),
            attachments: self.attachments.len(),
            orphaned_attachments: self
                .attachments
                .values()
                .filter(|node| tree.node(**node).is_root())
                .count(),
            images: self.images.len(),
        }
    }

    /// Indented outline of the content tree, one node per line, followed by
    /// the flat image gallery.
    pub fn outline(&self) -> Vec<String> {
        let tree = &self.hierarchy;
        let mut roots: Vec<NodeId> = self
            .shelves
            .values()
            .chain(self.books.values())
            .chain(self.pages.values())
            .chain(self.attachments.values())
            .copied()
            .filter(|node| tree.node(*node).is_root())
            .collect();
        roots.sort();
        roots.dedup();

        let mut lines = Vec::new();
        for root in roots {
            self.outline_node(root, 0, &mut lines);
        }
        for image in self.images.values() {
            let node = tree.node(*image);
            let storage_path = node
                .file
                .as_ref()
                .map(|file| file.storage_path.as_str())
                .unwrap_or("");
            lines.push(format!(
                "image {} \"{}\" {} ({})",
                node.id,
                node.name,
                storage_path,
                node.last_edit.to_rfc3339()
            ));
        }
        lines
    }

    fn outline_node(&self, id: NodeId, depth: usize, lines: &mut Vec<String>) {
        let node = self.hierarchy.node(id);
        lines.push(format!(
            "{}{} {} \"{}\" ({})",
            "  ".repeat(depth),
            node.kind.as_str(),
            node.id,
            node.name,
            node.last_edit.to_rfc3339()
        ));
        for child in node.children() {
            self.outline_node(*child, depth + 1, lines);
        }
    }
}

/// Assemble the catalog from the remote listings. Parents are always loaded
/// before the items that reference them.
pub fn build_catalog<A: ContentApi>(
    api: &mut A,
    hierarchy: Hierarchy,
    options: &CatalogOptions,
) -> Result<Catalog> {
    let mut catalog = Catalog::new(hierarchy);

    info!("Getting info about Shelves and their Books");
    load_shelves(api, &mut catalog)?;

    info!("Getting info about Books not belonging to any shelf");
    load_orphan_books(api, &mut catalog)?;

    info!("Getting info about Chapters");
    load_chapters(api, &mut catalog)?;

    info!("Getting info about Pages");
    load_pages(api, &mut catalog)?;

    if options.include_attachments {
        info!("Getting info about Attachments");
        load_attachments(api, &mut catalog)?;
    }

    if options.include_images {
        info!("Getting info about Images");
        load_images(api, &mut catalog)?;
    }

    Ok(catalog)
}

fn load_shelves<A: ContentApi>(api: &mut A, catalog: &mut Catalog) -> Result<()> {
    for shelf_data in api.list_shelves()? {
        if catalog.shelves.contains_key(&shelf_data.id) {
            continue;
        }
        let shelf = catalog.hierarchy.insert(
            NewNode {
                kind: NodeKind::Shelf,
                id: shelf_data.id,
                name: &shelf_data.name,
                last_edit: shelf_data.updated_at,
            },
            None,
        );
        debug!(
            "Shelf: \"{}\", ID: {}",
            catalog.hierarchy.node(shelf).name,
            shelf_data.id
        );
        catalog.shelves.insert(shelf_data.id, shelf);

        for book_data in api.shelf_books(shelf_data.id)? {
            if let Some(existing) = catalog.books.get(&book_data.id) {
                let owner = catalog.hierarchy.parent(*existing);
                info!(
                    "Book \"{}\" is on several shelves, keeping it under shelf {}",
                    book_data.name,
                    owner
                        .map(|node| catalog.hierarchy.node(node).id.to_string())
                        .unwrap_or_else(|| "<none>".to_string())
                );
                continue;
            }
            let book = catalog.hierarchy.insert(
                NewNode {
                    kind: NodeKind::Book,
                    id: book_data.id,
                    name: &book_data.name,
                    last_edit: book_data.updated_at,
                },
                Some(shelf),
            );
            debug!(
                "Book: \"{}\", ID: {}",
                catalog.hierarchy.node(book).name,
                book_data.id
            );
            catalog.books.insert(book_data.id, book);
        }
    }
    Ok(())
}

fn load_orphan_books<A: ContentApi>(api: &mut A, catalog: &mut Catalog) -> Result<()> {
    for book_data in api.list_books()? {
        if catalog.books.contains_key(&book_data.id) {
            continue;
        }
        let book = catalog.hierarchy.insert(
            NewNode {
                kind: NodeKind::Book,
                id: book_data.id,
                name: &book_data.name,
                last_edit: book_data.updated_at,
            },
            None,
        );
        debug!(
            "Book: \"{}\", ID: {}, last edit: {}",
            catalog.hierarchy.node(book).name,
            book_data.id,
            book_data.updated_at
        );
        info!("Book \"{}\" has no shelf assigned.", book_data.name);
        catalog.books.insert(book_data.id, book);
    }
    Ok(())
}

fn load_chapters<A: ContentApi>(api: &mut A, catalog: &mut Catalog) -> Result<()> {
    for chapter_data in api.list_chapters()? {
        if catalog.chapters.contains_key(&chapter_data.id) {
            continue;
        }
        let Some(book) = catalog.books.get(&chapter_data.book_id).copied() else {
            bail!(
                "chapter \"{}\" (ID {}) references book {} which is not in the catalog",
                chapter_data.name,
                chapter_data.id,
                chapter_data.book_id
            );
        };
        let chapter = catalog.hierarchy.insert(
            NewNode {
                kind: NodeKind::Chapter,
                id: chapter_data.id,
                name: &chapter_data.name,
                last_edit: chapter_data.updated_at,
            },
            Some(book),
        );
        debug!(
            "Chapter: \"{}\", ID: {}, last edit: {}",
            catalog.hierarchy.node(chapter).name,
            chapter_data.id,
            chapter_data.updated_at
        );
        catalog.chapters.insert(chapter_data.id, chapter);
    }
    Ok(())
}

fn load_pages<A: ContentApi>(api: &mut A, catalog: &mut Catalog) -> Result<()> {
    for page_data in api.list_pages()? {
        if catalog.pages.contains_key(&page_data.id) {
            continue;
        }
        let chapter = page_data
            .chapter_id
            .and_then(|chapter_id| catalog.chapters.get(&chapter_id).copied());
        let new = NewNode {
            kind: NodeKind::Page,
            id: page_data.id,
            name: &page_data.name,
            last_edit: page_data.updated_at,
        };

        let page = match chapter {
            Some(chapter) => catalog.hierarchy.insert(new, Some(chapter)),
            None => {
                let book = catalog.books.get(&page_data.book_id).copied();
                let page = catalog.hierarchy.insert(new, book);
                match book {
                    Some(book) => info!(
                        "Page \"{}\" is not in any chapter, using Book \"{}\" as a parent.",
                        page_data.name,
                        catalog.hierarchy.node(book).name
                    ),
                    None => warn!(
                        "Page \"{}\" (ID {}) references missing book {}, exporting it at the root.",
                        page_data.name, page_data.id, page_data.book_id
                    ),
                }
                catalog.pages_not_in_chapter.insert(page_data.id, page);
                page
            }
        };
        debug!(
            "Page: \"{}\", ID: {}, last edit: {}",
            catalog.hierarchy.node(page).name,
            page_data.id,
            page_data.updated_at
        );
        catalog.pages.insert(page_data.id, page);
    }
    Ok(())
}

fn load_attachments<A: ContentApi>(api: &mut A, catalog: &mut Catalog) -> Result<()> {
    for attachment_data in api.list_attachments()? {
        if catalog.attachments.contains_key(&attachment_data.id) {
            continue;
        }
        let page = catalog.pages.get(&attachment_data.uploaded_to).copied();
        if page.is_none() {
            info!(
                "Attachment \"{}\" belongs to missing page {}, it will be stored with orphaned attachments.",
                attachment_data.name, attachment_data.uploaded_to
            );
        }
        let attachment = catalog.hierarchy.insert(
            NewNode {
                kind: NodeKind::Attachment,
                id: attachment_data.id,
                name: &attachment_file_name(&attachment_data.name, &attachment_data.extension),
                last_edit: attachment_data.updated_at,
            },
            page,
        );
        debug!(
            "Attachment: \"{}\", ID: {}, last edit: {}",
            catalog.hierarchy.node(attachment).name,
            attachment_data.id,
            attachment_data.updated_at
        );
        catalog.attachments.insert(attachment_data.id, attachment);
    }
    Ok(())
}

fn load_images<A: ContentApi>(api: &mut A, catalog: &mut Catalog) -> Result<()> {
    for image_data in api.list_images()? {
        if catalog.images.contains_key(&image_data.id) {
            continue;
        }
        let image = catalog.hierarchy.insert_file(
            NewNode {
                kind: NodeKind::Image,
                id: image_data.id,
                name: &image_data.name,
                last_edit: image_data.updated_at,
            },
            FileRef {
                url: image_data.url.clone(),
                storage_path: image_data.path.clone(),
            },
        );
        debug!(
            "Image: \"{}\", ID: {}, path: {}",
            catalog.hierarchy.node(image).name,
            image_data.id,
            image_data.path
        );
        catalog.images.insert(image_data.id, image);
    }
    Ok(())
}

/// Attachment names come without their extension; append it unless the name
/// already ends with it.
fn attachment_file_name(name: &str, extension: &str) -> String {
    let extension = extension.trim().trim_start_matches('.');
    if extension.is_empty()
        || name
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", extension.to_ascii_lowercase()))
    {
        name.to_string()
    } else {
        format!("{name}.{extension}")
    }
}
