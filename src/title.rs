use reqwest::Url;

use crate::error::Error;

const MANGADEX_HOST: &str = "mangadex.org";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleRef {
    pub manga_id: String,
    pub name: Option<String>,
}

/// Extracts the manga id and a display name from a title page link such as
/// `https://mangadex.org/title/<id>/<slug-with-hyphens>`.
pub fn parse_title_url(link: &str) -> Result<TitleRef, Error> {
    let invalid = || Error::InvalidUrl(link.to_string());

    let url = Url::parse(link).map_err(|_| invalid())?;
    let host = url.host_str().ok_or_else(invalid)?;
    if host != MANGADEX_HOST && host != format!("www.{}", MANGADEX_HOST) {
        return Err(invalid());
    }

    let mut segments = url.path_segments().ok_or_else(invalid)?;
    if segments.next() != Some("title") {
        return Err(invalid());
    }

    let manga_id = match segments.next() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(invalid()),
    };

    let name = segments
        .next()
        .filter(|slug| !slug.is_empty())
        .map(display_name);

    Ok(TitleRef { manga_id, name })
}

fn display_name(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
