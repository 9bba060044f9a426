//! ListObjectsV2 response parsing.

use chrono::{DateTime, Utc};
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, Event};
use quick_xml::Reader;

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    pub next_continuation_token: Option<String>,
}

#[derive(Default)]
struct PendingObject {
    key: Option<String>,
    last_modified: Option<String>,
}

pub fn parse_list_page(xml: &str) -> Result<ListPage, StorageError> {
    // Keys are taken verbatim, so surrounding whitespace is not trimmed
    let mut reader = Reader::from_str(xml);

    let mut page = ListPage::default();
    let mut current: Option<PendingObject> = None;
    let mut element: Vec<u8> = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let local_name = e.local_name();
                if local_name.as_ref() == b"Contents" {
                    current = Some(PendingObject::default());
                }
                element = local_name.as_ref().to_vec();
                text.clear();
            }
            Ok(Event::Text(e)) => {
                let decoded = e
                    .decode()
                    .map_err(|e| StorageError::Listing(e.to_string()))?;
                text.push_str(&decoded);
            }
            Ok(Event::GeneralRef(e)) => {
                push_entity(&mut text, &e)?;
            }
            Ok(Event::End(ref e)) => {
                let local_name = e.local_name();
                match local_name.as_ref() {
                    b"Contents" => {
                        if let Some(pending) = current.take() {
                            page.objects.push(finish_object(pending)?);
                        }
                    }
                    b"Key" if element == b"Key" => {
                        if let Some(pending) = current.as_mut() {
                            pending.key = Some(std::mem::take(&mut text));
                        }
                    }
                    b"LastModified" if element == b"LastModified" => {
                        if let Some(pending) = current.as_mut() {
                            pending.last_modified = Some(std::mem::take(&mut text));
                        }
                    }
                    b"NextContinuationToken" => {
                        let token = std::mem::take(&mut text);
                        if !token.is_empty() {
                            page.next_continuation_token = Some(token);
                        }
                    }
                    _ => {}
                }
                element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(StorageError::Listing(format!("XML parsing error: {}", e)));
            }
            _ => {}
        }
    }

    Ok(page)
}

/// Appends the text an entity reference such as `&amp;` or `&#38;` stands for.
fn push_entity(text: &mut String, entity: &BytesRef<'_>) -> Result<(), StorageError> {
    if let Some(ch) = entity
        .resolve_char_ref()
        .map_err(|e| StorageError::Listing(e.to_string()))?
    {
        text.push(ch);
        return Ok(());
    }

    let name = entity
        .decode()
        .map_err(|e| StorageError::Listing(e.to_string()))?;
    match resolve_predefined_entity(&name) {
        Some(resolved) => {
            text.push_str(resolved);
            Ok(())
        }
        None => Err(StorageError::Listing(format!(
            "unknown entity '&{};' in listing",
            name
        ))),
    }
}

fn finish_object(pending: PendingObject) -> Result<ListedObject, StorageError> {
    let key = pending
        .key
        .ok_or_else(|| StorageError::Listing("object entry without Key".to_string()))?;
    let raw = pending.last_modified.ok_or_else(|| {
        StorageError::Listing(format!("object '{}' has no LastModified", key))
    })?;
    let last_modified = DateTime::parse_from_rfc3339(&raw)
        .map_err(|e| StorageError::Listing(format!("bad LastModified '{}': {}", raw, e)))?
        .with_timezone(&Utc);

    Ok(ListedObject { key, last_modified })
}
