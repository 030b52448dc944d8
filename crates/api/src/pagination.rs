//! Cursor pagination: the server puts an opaque `cursor` in the `next` link
//! of every page except the last.

use {
    serde::{Deserialize, de::DeserializeOwned},
    url::Url,
};

/// A page of results that may link to the next one.
pub trait CursorPage: DeserializeOwned {
    type Item;

    fn next_link(&self) -> Option<&str>;

    fn into_items(self) -> Vec<Self::Item>;
}

/// The common `{"results": [...], "_links": {"next": "..."}}` page shape.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default, rename = "_links")]
    pub links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

impl<T: DeserializeOwned> CursorPage for Page<T> {
    type Item = T;

    fn next_link(&self) -> Option<&str> {
        self.links.next.as_deref()
    }

    fn into_items(self) -> Vec<T> {
        self.results
    }
}

/// Extract the `cursor` query parameter from an absolute or relative link.
pub fn cursor_from_link(link: &str) -> Option<String> {
    let url = match Url::parse(link) {
        Ok(u) => u,
        Err(_) => Url::parse("http://localhost").ok()?.join(link).ok()?,
    };
    url.query_pairs()
        .find(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned())
        .filter(|cursor| !cursor.is_empty())
}
