//! Book similarity relations (kind 1729).
//!
//! A similarity event links two books with a strength score:
//!
//! ```json
//! {
//!   "kind": 1729,
//!   "tags": [
//!     ["i", "isbn:9781729527085"],
//!     ["i", "isbn:1639940251"],
//!     ["k", "isbn"],
//!     ["k", "isbn"],
//!     ["score", "0.92"]
//!   ],
//!   "content": "Both are slow-burn space operas."
//! }
//! ```
//!
//! Events are validated by tag shape first: exactly two `i` tags, exactly two
//! `k` tags both equal to `isbn`, exactly one `score` tag. Only then is the
//! score parsed. Anything that doesn't fit is not a similarity relation and is
//! filtered out by [`parse_similarity`].

use crate::nip01::{Event, EventTemplate};
use thiserror::Error;

/// Event kind carrying a similarity relation.
pub const KIND_BOOK_SIMILARITY: u16 = 1729;

/// Tag naming an external item (NIP-73 style).
pub const ITEM_TAG: &str = "i";
/// Tag naming the item type of the `i` tags.
pub const ITEM_KIND_TAG: &str = "k";
/// Tag carrying the relation strength.
pub const SCORE_TAG: &str = "score";
/// Item type discriminator for books.
pub const ISBN_KIND: &str = "isbn";

const ISBN_PREFIX: &str = "isbn:";

/// Reasons an event is not a valid similarity relation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("expected 2 `i` tags, found {0}")]
    ItemTagCount(usize),

    #[error("expected 2 `k` tags, found {0}")]
    KindTagCount(usize),

    #[error("expected 1 `score` tag, found {0}")]
    ScoreTagCount(usize),

    #[error("tag `{0}` has no value")]
    MissingValue(&'static str),

    #[error("item kind `{0}` is not `isbn`")]
    WrongItemKind(String),

    #[error("score `{0}` is not a number")]
    InvalidScore(String),

    #[error("score {0} outside [0, 1]")]
    ScoreOutOfRange(f64),
}

/// Reference to a book, with any `isbn:` prefix removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemRef {
    pub isbn: String,
}

impl ItemRef {
    pub fn new(isbn: impl Into<String>) -> Self {
        Self::from_tag_value(&isbn.into())
    }

    /// Build from an `i` tag value, accepting both `isbn:123` and bare `123`.
    pub fn from_tag_value(value: &str) -> Self {
        let value = value.trim();
        let isbn = value.strip_prefix(ISBN_PREFIX).unwrap_or(value);
        Self {
            isbn: isbn.to_string(),
        }
    }

    /// Value used in `i` tags and `#i` filters.
    pub fn tag_value(&self) -> String {
        format!("{ISBN_PREFIX}{}", self.isbn)
    }
}

impl std::fmt::Display for ItemRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.isbn)
    }
}

/// A validated similarity relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Similarity {
    pub id: String,
    pub author: String,
    pub created_at: u64,
    pub content: String,
    pub item_a: ItemRef,
    pub item_b: ItemRef,
    pub score: f64,
}

impl Similarity {
    /// Validate and convert a raw event.
    pub fn try_from_event(event: &Event) -> Result<Self, SimilarityError> {
        let items: Vec<&Vec<String>> = event.tags_named(ITEM_TAG).collect();
        let kinds: Vec<&Vec<String>> = event.tags_named(ITEM_KIND_TAG).collect();
        let scores: Vec<&Vec<String>> = event.tags_named(SCORE_TAG).collect();

        if items.len() != 2 {
            return Err(SimilarityError::ItemTagCount(items.len()));
        }
        if kinds.len() != 2 {
            return Err(SimilarityError::KindTagCount(kinds.len()));
        }
        if scores.len() != 1 {
            return Err(SimilarityError::ScoreTagCount(scores.len()));
        }

        for kind in &kinds {
            let value = tag_value(kind, ITEM_KIND_TAG)?;
            if value != ISBN_KIND {
                return Err(SimilarityError::WrongItemKind(value.to_string()));
            }
        }

        let item_a = ItemRef::from_tag_value(tag_value(items[0], ITEM_TAG)?);
        let item_b = ItemRef::from_tag_value(tag_value(items[1], ITEM_TAG)?);

        let raw_score = tag_value(scores[0], SCORE_TAG)?;
        let score: f64 = raw_score
            .trim()
            .parse()
            .map_err(|_| SimilarityError::InvalidScore(raw_score.to_string()))?;
        if score.is_nan() {
            return Err(SimilarityError::InvalidScore(raw_score.to_string()));
        }
        if !(0.0..=1.0).contains(&score) {
            return Err(SimilarityError::ScoreOutOfRange(score));
        }

        Ok(Self {
            id: event.id.clone(),
            author: event.pubkey.clone(),
            created_at: event.created_at,
            content: event.content.clone(),
            item_a,
            item_b,
            score,
        })
    }

    /// Whether this relation mentions `item` on either side.
    pub fn involves(&self, item: &ItemRef) -> bool {
        &self.item_a == item || &self.item_b == item
    }

    /// The side of the relation that isn't `item`.
    pub fn other(&self, item: &ItemRef) -> Option<&ItemRef> {
        if &self.item_a == item {
            Some(&self.item_b)
        } else if &self.item_b == item {
            Some(&self.item_a)
        } else {
            None
        }
    }
}

fn tag_value<'a>(tag: &'a [String], name: &'static str) -> Result<&'a str, SimilarityError> {
    tag.get(1)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or(SimilarityError::MissingValue(name))
}

/// Parse a raw event into a similarity relation; `None` if it doesn't fit.
pub fn parse_similarity(event: &Event) -> Option<Similarity> {
    Similarity::try_from_event(event).ok()
}

/// Build an unsigned similarity event.
pub fn similarity_template(
    item_a: &ItemRef,
    item_b: &ItemRef,
    score: f64,
    content: impl Into<String>,
    created_at: u64,
) -> Result<EventTemplate, SimilarityError> {
    if score.is_nan() {
        return Err(SimilarityError::InvalidScore(score.to_string()));
    }
    if !(0.0..=1.0).contains(&score) {
        return Err(SimilarityError::ScoreOutOfRange(score));
    }

    Ok(EventTemplate {
        created_at,
        kind: KIND_BOOK_SIMILARITY,
        tags: vec![
            vec![ITEM_TAG.to_string(), item_a.tag_value()],
            vec![ITEM_TAG.to_string(), item_b.tag_value()],
            vec![ITEM_KIND_TAG.to_string(), ISBN_KIND.to_string()],
            vec![ITEM_KIND_TAG.to_string(), ISBN_KIND.to_string()],
            vec![SCORE_TAG.to_string(), score.to_string()],
        ],
        content: content.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tag(name: &str, value: &str) -> Vec<String> {
        vec![name.to_string(), value.to_string()]
    }

    fn similarity_event(tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "sim1".to_string(),
            pubkey: "c".repeat(64),
            created_at: 1_700_000_000,
            kind: KIND_BOOK_SIMILARITY,
            tags,
            content: "Both are slow-burn space operas.".to_string(),
            sig: "sig".to_string(),
        }
    }

    fn example_tags() -> Vec<Vec<String>> {
        vec![
            tag("i", "isbn:9781729527085"),
            tag("i", "1639940251"),
            tag("k", "isbn"),
            tag("k", "isbn"),
            tag("score", "0.92"),
        ]
    }

    #[test]
    fn test_parse_example_event() {
        let similarity = parse_similarity(&similarity_event(example_tags())).unwrap();
        assert_eq!(similarity.score, 0.92);
        assert_eq!(similarity.item_a, ItemRef { isbn: "9781729527085".to_string() });
        assert_eq!(similarity.item_b, ItemRef { isbn: "1639940251".to_string() });
        assert_eq!(similarity.id, "sim1");
        assert_eq!(similarity.author, "c".repeat(64));
        assert_eq!(similarity.content, "Both are slow-burn space operas.");
    }

    #[test]
    fn test_rejects_single_item_tag() {
        let tags = vec![
            tag("i", "isbn:9781729527085"),
            tag("k", "isbn"),
            tag("k", "isbn"),
            tag("score", "0.92"),
        ];
        let event = similarity_event(tags);
        assert_eq!(
            Similarity::try_from_event(&event),
            Err(SimilarityError::ItemTagCount(1))
        );
        assert!(parse_similarity(&event).is_none());
    }

    #[test]
    fn test_rejects_non_numeric_score() {
        let mut tags = example_tags();
        tags[4] = tag("score", "very similar");
        assert!(matches!(
            Similarity::try_from_event(&similarity_event(tags)),
            Err(SimilarityError::InvalidScore(_))
        ));
    }

    #[test]
    fn test_rejects_nan_score() {
        let mut tags = example_tags();
        tags[4] = tag("score", "NaN");
        assert!(matches!(
            Similarity::try_from_event(&similarity_event(tags)),
            Err(SimilarityError::InvalidScore(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_score() {
        let mut tags = example_tags();
        tags[4] = tag("score", "1.5");
        assert_eq!(
            Similarity::try_from_event(&similarity_event(tags)),
            Err(SimilarityError::ScoreOutOfRange(1.5))
        );

        let mut tags = example_tags();
        tags[4] = tag("score", "inf");
        assert!(parse_similarity(&similarity_event(tags)).is_none());
    }

    #[test]
    fn test_rejects_missing_score() {
        let mut tags = example_tags();
        tags.pop();
        assert_eq!(
            Similarity::try_from_event(&similarity_event(tags)),
            Err(SimilarityError::ScoreTagCount(0))
        );
    }

    #[test]
    fn test_rejects_wrong_discriminator() {
        let mut tags = example_tags();
        tags[3] = tag("k", "doi");
        assert_eq!(
            Similarity::try_from_event(&similarity_event(tags)),
            Err(SimilarityError::WrongItemKind("doi".to_string()))
        );
    }

    #[test]
    fn test_rejects_extra_kind_tag() {
        let mut tags = example_tags();
        tags.push(tag("k", "isbn"));
        assert_eq!(
            Similarity::try_from_event(&similarity_event(tags)),
            Err(SimilarityError::KindTagCount(3))
        );
    }

    #[test]
    fn test_shape_checked_before_score() {
        // Bad score and bad shape together report the shape problem.
        let tags = vec![tag("i", "isbn:1"), tag("score", "abc")];
        assert_eq!(
            Similarity::try_from_event(&similarity_event(tags)),
            Err(SimilarityError::ItemTagCount(1))
        );
    }

    #[test]
    fn test_rejects_valueless_tag() {
        let mut tags = example_tags();
        tags[0] = vec!["i".to_string()];
        assert_eq!(
            Similarity::try_from_event(&similarity_event(tags)),
            Err(SimilarityError::MissingValue(ITEM_TAG))
        );
    }

    #[test]
    fn test_unrelated_tags_ignored() {
        let mut tags = example_tags();
        tags.push(tag("t", "scifi"));
        tags.push(tag("client", "bookstr"));
        assert!(parse_similarity(&similarity_event(tags)).is_some());
    }

    #[test]
    fn test_template_roundtrips_through_parser() {
        let a = ItemRef::new("isbn:9781729527085");
        let b = ItemRef::new("1639940251");
        let template = similarity_template(&a, &b, 0.5, "note", 42).unwrap();
        assert_eq!(template.kind, KIND_BOOK_SIMILARITY);

        let event = Event {
            id: "x".to_string(),
            pubkey: "d".repeat(64),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: String::new(),
        };
        let similarity = parse_similarity(&event).unwrap();
        assert_eq!(similarity.item_a, a);
        assert_eq!(similarity.item_b, b);
        assert_eq!(similarity.score, 0.5);
        assert_eq!(similarity.other(&a), Some(&b));
        assert!(similarity.involves(&b));
    }

    #[test]
    fn test_template_rejects_bad_score() {
        let a = ItemRef::new("1");
        let b = ItemRef::new("2");
        assert!(similarity_template(&a, &b, -0.1, "", 0).is_err());
        assert!(similarity_template(&a, &b, f64::NAN, "", 0).is_err());
    }
}
