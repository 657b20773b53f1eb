use chrono::{DateTime, FixedOffset};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// `pubDate` layout after the weekday, e.g. `02 Jan 2006 15:04:05 -0700`
const PUB_DATE_FORMAT: &str = "%d %b %Y %H:%M:%S %z";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed feed document: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Malformed feed document: {0} not closed")]
    Unclosed(String),
    #[error("Not an RSS document: no rss > channel element")]
    MissingChannel,
    #[error("Invalid publish date {value:?}: {source}")]
    Date {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// One `<item>` of a fetched RSS document, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedItem {
    pub title: String,
    pub link: String,
    /// Raw `pubDate` text, parsed later by the ingest worker
    pub pub_date: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    PubDate,
    Description,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"title" => Some(Field::Title),
            b"link" => Some(Field::Link),
            b"pubDate" => Some(Field::PubDate),
            b"description" => Some(Field::Description),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct ItemBuilder {
    title: String,
    link: String,
    pub_date: String,
    description: Option<String>,
}

impl ItemBuilder {
    fn start(&mut self, field: Field) {
        match field {
            Field::Title => self.title.clear(),
            Field::Link => self.link.clear(),
            Field::PubDate => self.pub_date.clear(),
            Field::Description => self.description = Some(String::new()),
        }
    }

    fn push(&mut self, field: Field, text: &str) {
        let target = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::PubDate => &mut self.pub_date,
            Field::Description => self.description.get_or_insert_with(String::new),
        };
        target.push_str(text);
    }

    fn finish(self) -> FetchedItem {
        FetchedItem {
            title: self.title.trim().to_string(),
            link: self.link.trim().to_string(),
            pub_date: self.pub_date.trim().to_string(),
            description: self.description.map(|d| d.trim().to_string()),
        }
    }
}

/// Decode an RSS 2.0 document into its items, in document order.
///
/// Channel metadata is ignored. A channel without items is an empty list.
/// Markup nested inside an item field (`<b>`, `<br/>`, ...) is flattened to
/// its text, and unknown elements are skipped.
///
/// # Errors
///
/// Returns [`ParseError::Xml`] or [`ParseError::Unclosed`] if the bytes are
/// not well-formed XML, and [`ParseError::MissingChannel`] if the root has no
/// `channel` element.
pub fn parse_rss(bytes: &[u8]) -> Result<Vec<FetchedItem>, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();

    // Open element names, root first
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut saw_channel = false;
    let mut item: Option<ItemBuilder> = None;
    let mut field: Option<Field> = None;
    let mut items = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match path.len() {
                    1 if name == b"channel" => saw_channel = true,
                    2 if name == b"item" && path[1] == b"channel" => {
                        item = Some(ItemBuilder::default());
                    }
                    3 => {
                        if let Some(item) = item.as_mut() {
                            field = Field::from_tag(&name);
                            if let Some(f) = field {
                                item.start(f);
                            }
                        }
                    }
                    _ => {}
                }
                path.push(name);
            }
            Event::Empty(e) => {
                let name = e.name();
                match path.len() {
                    1 if name.as_ref() == b"channel" => saw_channel = true,
                    2 if name.as_ref() == b"item" && path[1] == b"channel" => {
                        items.push(ItemBuilder::default().finish());
                    }
                    3 => {
                        if let (Some(item), Some(f)) =
                            (item.as_mut(), Field::from_tag(name.as_ref()))
                        {
                            item.start(f);
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if let (Some(item), Some(f)) = (item.as_mut(), field) {
                    match e.unescape() {
                        Ok(text) => item.push(f, &text),
                        // Undeclared entities such as `&nbsp;` are kept verbatim
                        Err(_) => item.push(f, &String::from_utf8_lossy(&e)),
                    }
                }
            }
            Event::CData(e) => {
                if let (Some(item), Some(f)) = (item.as_mut(), field) {
                    item.push(f, &String::from_utf8_lossy(&e));
                }
            }
            Event::End(_) => {
                path.pop();
                match path.len() {
                    3 => field = None,
                    2 => {
                        if let Some(done) = item.take() {
                            items.push(done.finish());
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = path.last() {
        return Err(ParseError::Unclosed(
            String::from_utf8_lossy(open).into_owned(),
        ));
    }
    if !saw_channel {
        return Err(ParseError::MissingChannel);
    }

    Ok(items)
}

/// Parse an RSS `pubDate` value.
///
/// A leading weekday (`Mon, `) is ignored: feeds often carry one that does
/// not match the date, and the date itself is unambiguous without it.
pub fn parse_pub_date(raw: &str) -> Result<DateTime<FixedOffset>, ParseError> {
    let trimmed = raw.trim();
    let without_weekday = match trimmed.split_once(',') {
        Some((_, rest)) => rest.trim_start(),
        None => trimmed,
    };
    DateTime::parse_from_str(without_weekday, PUB_DATE_FORMAT).map_err(|source| {
        ParseError::Date {
            value: trimmed.to_string(),
            source,
        }
    })
}
