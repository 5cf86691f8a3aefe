//! HTML directory listing for a package repository.

use askama::Template;
use larder_core::PackageIndex;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use time::OffsetDateTime;
use time::macros::format_description;

/// Characters escaped when a path segment is placed in an `href`.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One row of the listing table.
#[derive(Debug, Clone)]
pub struct ListingEntry {
    pub name: String,
    pub href: String,
    pub modified: String,
    pub size: u64,
    pub description: String,
    /// Raw control stanza, shown as the description's tooltip.
    pub control: String,
    pub control_href: Option<String>,
}

/// View model for a repository listing page.
#[derive(Template)]
#[template(path = "listing.html")]
pub struct ListingPage {
    pub title: String,
    pub package_count: usize,
    pub total_size: u64,
    pub entries: Vec<ListingEntry>,
    pub version: &'static str,
    pub generated: String,
}

impl ListingPage {
    /// Build the listing for `index` served at `mount`.
    ///
    /// `documents` are the generated index documents as `(name, size)`; they
    /// are listed first and stamped with `generated`.
    pub fn new(
        mount: &str,
        index: &PackageIndex,
        documents: &[(&str, usize)],
        generated: OffsetDateTime,
    ) -> Self {
        let base = base_href(mount);
        let generated_text = format_timestamp(generated);

        let mut entries: Vec<ListingEntry> = documents
            .iter()
            .map(|(name, size)| ListingEntry {
                name: name.to_string(),
                href: format!("{base}{}", encode_segment(name)),
                modified: generated_text.clone(),
                size: *size as u64,
                description: String::new(),
                control: String::new(),
                control_href: None,
            })
            .collect();

        entries.extend(index.records().map(|record| {
            let href = format!("{base}{}", encode_segment(&record.filename));
            ListingEntry {
                name: record.filename.clone(),
                control_href: Some(format!("{href}.control")),
                href,
                modified: format_timestamp(record.modified),
                size: record.size,
                description: record.description.clone(),
                control: record.control.clone(),
            }
        }));

        Self {
            title: format!("{mount} - larder"),
            package_count: index.len(),
            total_size: index.total_size(),
            entries,
            version: env!("CARGO_PKG_VERSION"),
            generated: generated_text,
        }
    }
}

/// Absolute, encoded URL prefix for links below `mount`, ending in `/`.
fn base_href(mount: &str) -> String {
    let mut base = String::from("/");
    for segment in mount.split('/').filter(|s| !s.is_empty()) {
        base.push_str(&encode_segment(segment));
        base.push('/');
    }
    base
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

fn format_timestamp(at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    at.to_offset(time::UtcOffset::UTC)
        .format(format)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::testing::{Container, build_ipk, control_for};
    use larder_core::{ChecksumSelection, PackageRecord};
    use time::macros::datetime;

    fn index() -> PackageIndex {
        let records = ["zlib", "busybox"].map(|name| {
            let data = build_ipk(&control_for(name, "1.0"), Container::Ar);
            PackageRecord::from_bytes(&format!("{name}_1.0.ipk"), &data, ChecksumSelection::none())
                .unwrap()
        });
        PackageIndex::from_records(records)
    }

    #[test]
    fn test_documents_come_first() {
        let page = ListingPage::new(
            "/armv7/base",
            &index(),
            &[("Packages", 10), ("Packages.gz", 5), ("Packages.stamps", 3)],
            datetime!(2024-05-01 12:30:00 UTC),
        );

        let names: Vec<_> = page.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Packages",
                "Packages.gz",
                "Packages.stamps",
                "busybox_1.0.ipk",
                "zlib_1.0.ipk"
            ]
        );
        assert_eq!(page.entries[0].href, "/armv7/base/Packages");
        assert_eq!(page.entries[0].modified, "2024-05-01T12:30:00Z");
        assert!(page.entries[0].control_href.is_none());
        assert_eq!(
            page.entries[3].control_href.as_deref(),
            Some("/armv7/base/busybox_1.0.ipk.control")
        );
        assert_eq!(page.package_count, 2);
    }

    #[test]
    fn test_render_escapes_control_text() {
        let data = build_ipk(
            "Package: evil\nDescription: <script>alert(1)</script>\n",
            Container::Ar,
        );
        let record =
            PackageRecord::from_bytes("evil_1.ipk", &data, ChecksumSelection::none()).unwrap();
        let index = PackageIndex::from_records([record]);

        let html = ListingPage::new("/", &index, &[], OffsetDateTime::UNIX_EPOCH)
            .render()
            .unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("evil_1.ipk.control"));
        assert!(html.contains("- larder</title>"));
    }

    #[test]
    fn test_base_href_encodes_segments() {
        assert_eq!(base_href("/"), "/");
        assert_eq!(base_href("/a b/c"), "/a%20b/c/");
    }
}
