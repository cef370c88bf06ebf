//! Directory index page generation

use std::path::Path;
use tokio::fs;

use crate::http::response::html_escape;

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListingEntry {
    name: String,
    is_dir: bool,
    is_symlink: bool,
}

impl ListingEntry {
    /// Link target, percent-encoded, with a slash for directories
    fn href(&self) -> String {
        let encoded = urlencoding::encode(&self.name);
        if self.is_dir {
            format!("{encoded}/")
        } else {
            encoded.into_owned()
        }
    }

    /// Text shown to the user: `/` marks directories, `@` symlinks
    fn label(&self) -> String {
        if self.is_symlink {
            format!("{}@", self.name)
        } else if self.is_dir {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// Render the HTML listing for `dir`, titled with the decoded request path
pub async fn render_listing(dir: &Path, display_path: &str) -> std::io::Result<String> {
    let mut entries = read_entries(dir).await?;
    entries.sort_by_cached_key(|e| e.name.to_lowercase());

    let title = format!("Directory listing for {}", html_escape(display_path));
    let mut html = format!(
        "<!DOCTYPE HTML>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>{title}</title>\n\
         </head>\n\
         <body>\n\
         <h1>{title}</h1>\n\
         <hr>\n\
         <ul>\n"
    );
    for entry in &entries {
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            entry.href(),
            html_escape(&entry.label())
        ));
    }
    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");

    Ok(html)
}

async fn read_entries(dir: &Path) -> std::io::Result<Vec<ListingEntry>> {
    let mut reader = fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        let is_symlink = fs::symlink_metadata(&path)
            .await
            .is_ok_and(|m| m.file_type().is_symlink());
        // Follows symlinks, so a link to a directory is listed as one
        let is_dir = fs::metadata(&path).await.is_ok_and(|m| m.is_dir());

        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
            is_symlink,
        });
    }

    Ok(entries)
}
