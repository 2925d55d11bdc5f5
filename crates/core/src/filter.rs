//! Load filters: the predicate language built from an HTTP request.
//!
//! A filter takes the request path as its IRI and the query parameters as
//! predicates. A filter is *item-scoped* when it resolves to a single IRI,
//! *collection-scoped* when its IRI names a collection.

use crate::error::{Error, Result};
use crate::iri::Iri;
use crate::item::{Item, Kind};

/// Default page size for collection loads.
pub const MAX_ITEMS_DEFAULT: usize = 100;

/// Hard ceiling on the page size.
pub const MAX_ITEMS_CEILING: usize = 1000;

/// The well-known collection suffixes addressable under an item IRI, plus
/// the three top-level storage collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionPath {
    // Top-level storage collections
    Actors,
    Activities,
    Objects,
    // Actor-owned collections
    Inbox,
    Outbox,
    Followers,
    Following,
    Liked,
    // Object-owned collections
    Replies,
    Likes,
    Shares,
    // Hidden collections: never served, permitted to be absent
    Blocked,
}

impl CollectionPath {
    pub fn from_segment(seg: &str) -> Option<Self> {
        match seg {
            "actors" => Some(Self::Actors),
            "activities" => Some(Self::Activities),
            "objects" => Some(Self::Objects),
            "inbox" => Some(Self::Inbox),
            "outbox" => Some(Self::Outbox),
            "followers" => Some(Self::Followers),
            "following" => Some(Self::Following),
            "liked" => Some(Self::Liked),
            "replies" => Some(Self::Replies),
            "likes" => Some(Self::Likes),
            "shares" => Some(Self::Shares),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Actors => "actors",
            Self::Activities => "activities",
            Self::Objects => "objects",
            Self::Inbox => "inbox",
            Self::Outbox => "outbox",
            Self::Followers => "followers",
            Self::Following => "following",
            Self::Liked => "liked",
            Self::Replies => "replies",
            Self::Likes => "likes",
            Self::Shares => "shares",
            Self::Blocked => "blocked",
        }
    }

    /// Top-level storage collections iterate child buckets rather than an
    /// IRI membership array.
    pub fn is_top_level(&self) -> bool {
        matches!(self, Self::Actors | Self::Activities | Self::Objects)
    }

    pub fn is_actor_owned(&self) -> bool {
        matches!(
            self,
            Self::Inbox | Self::Outbox | Self::Followers | Self::Following | Self::Liked
        )
    }

    pub fn is_object_owned(&self) -> bool {
        matches!(self, Self::Replies | Self::Likes | Self::Shares)
    }

    /// Hidden collections are storage-only; they may be absent without the
    /// owning bucket being treated as missing.
    pub fn is_hidden(&self) -> bool {
        matches!(self, Self::Blocked)
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A predicate record scoping a load.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    /// The target: an item IRI or a collection IRI.
    pub iri: Iri,
    /// Restrict to specific item IRIs (the `iri` query parameter).
    pub item_iris: Vec<Iri>,
    /// Restrict by `type`.
    pub types: Vec<Kind>,
    /// Restrict by `attributedTo`.
    pub attributed_to: Vec<Iri>,
    /// Restrict by `inReplyTo`.
    pub in_reply_to: Vec<Iri>,
    /// Sub-filter applied to an activity's `actor` during load.
    pub actor: Option<Box<Filter>>,
    /// Sub-filter applied to an activity's `object` during load.
    pub object: Option<Box<Filter>>,
    /// Sub-filter applied to an activity's `target` during load.
    pub target: Option<Box<Filter>>,
    /// Page size; clamped to [`MAX_ITEMS_CEILING`].
    pub max_items: usize,
    /// Cursor: return members after this IRI (exclusive).
    pub after: Option<Iri>,
    /// Cursor: return members before this IRI (exclusive).
    pub before: Option<Iri>,
}

impl Filter {
    /// A filter matching exactly one item.
    pub fn item(iri: Iri) -> Self {
        Filter {
            iri,
            max_items: 1,
            ..Filter::default()
        }
    }

    /// Build a filter from an IRI, taking the query string as predicates.
    pub fn from_iri(iri: &Iri) -> Result<Self> {
        let url = iri.url()?;
        let base = Iri::new(iri.as_str().split(['?', '#']).next().unwrap_or_default());
        let mut f = Filter {
            iri: base,
            max_items: MAX_ITEMS_DEFAULT,
            ..Filter::default()
        };
        let mut actor = Filter::default();
        let mut object = Filter::default();
        let mut target = Filter::default();
        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "type" => f.types.push(Kind::from(value.as_str())),
                "iri" => f.item_iris.push(Iri::new(value)),
                "attributedTo" => f.attributed_to.push(Iri::new(value)),
                "inReplyTo" => f.in_reply_to.push(Iri::new(value)),
                "actor.iri" => actor.item_iris.push(Iri::new(value)),
                "actor.type" => actor.types.push(Kind::from(value.as_str())),
                "object.iri" => object.item_iris.push(Iri::new(value)),
                "object.type" => object.types.push(Kind::from(value.as_str())),
                "target.iri" => target.item_iris.push(Iri::new(value)),
                "target.type" => target.types.push(Kind::from(value.as_str())),
                "maxItems" => {
                    f.max_items = value
                        .parse::<usize>()
                        .map_err(|_| Error::InvalidFilter(format!("bad maxItems: {value}")))?;
                }
                "after" => f.after = Some(Iri::new(value)),
                "before" => f.before = Some(Iri::new(value)),
                // Unknown predicates are ignored rather than rejected.
                _ => {}
            }
        }
        if actor != Filter::default() {
            f.actor = Some(Box::new(actor));
        }
        if object != Filter::default() {
            f.object = Some(Box::new(object));
        }
        if target != Filter::default() {
            f.target = Some(Box::new(target));
        }
        f.max_items = f.max_items.clamp(1, MAX_ITEMS_CEILING);
        Ok(f)
    }

    /// Serialize the predicates (not the cursors) back into a query
    /// string, the inverse of [`Filter::from_iri`]. Used to rebuild
    /// paging links that keep the active filter.
    pub fn predicate_query(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for kind in &self.types {
            query.append_pair("type", kind.as_str());
        }
        for iri in &self.item_iris {
            query.append_pair("iri", iri.as_str());
        }
        for iri in &self.attributed_to {
            query.append_pair("attributedTo", iri.as_str());
        }
        for iri in &self.in_reply_to {
            query.append_pair("inReplyTo", iri.as_str());
        }
        for (prefix, sub) in [
            ("actor", self.actor.as_deref()),
            ("object", self.object.as_deref()),
            ("target", self.target.as_deref()),
        ] {
            let Some(sub) = sub else { continue };
            for iri in &sub.item_iris {
                query.append_pair(&format!("{prefix}.iri"), iri.as_str());
            }
            for kind in &sub.types {
                query.append_pair(&format!("{prefix}.type"), kind.as_str());
            }
        }
        query.append_pair("maxItems", &self.max_items.max(1).to_string());
        query.finish()
    }

    /// The collection named by the filter's IRI, if any.
    pub fn collection(&self) -> Option<CollectionPath> {
        self.iri.last_segment().and_then(CollectionPath::from_segment)
    }

    /// Whether the filter resolves to a single item IRI.
    pub fn is_item_scoped(&self) -> bool {
        self.collection().is_none()
    }

    /// The sub-filter for an activity's `object` reference.
    pub fn object_filter(&self) -> Option<&Filter> {
        self.object.as_deref()
    }

    /// The sub-filter for an activity's `actor` reference.
    pub fn actor_filter(&self) -> Option<&Filter> {
        self.actor.as_deref()
    }

    /// The sub-filter for an activity's `target` reference.
    pub fn target_filter(&self) -> Option<&Filter> {
        self.target.as_deref()
    }

    /// Apply the predicates (not the IRI scope) to an item.
    pub fn matches(&self, item: &Item) -> bool {
        if !self.types.is_empty() {
            match item.kind() {
                Some(k) if self.types.contains(k) => {}
                _ => return false,
            }
        }
        if !self.item_iris.is_empty() {
            match item.iri() {
                Some(id) if self.item_iris.iter().any(|i| i.equals(&id, false)) => {}
                _ => return false,
            }
        }
        if !self.attributed_to.is_empty() {
            match item.object_base().and_then(|b| b.attributed_to.as_ref()) {
                Some(at) if self.attributed_to.iter().any(|i| i.equals(at, false)) => {}
                _ => return false,
            }
        }
        if !self.in_reply_to.is_empty() {
            match item.object_base().and_then(|b| b.in_reply_to.as_ref()) {
                Some(irt) if self.in_reply_to.iter().any(|i| i.equals(irt, false)) => {}
                _ => return false,
            }
        }
        if let Some(activity) = item.as_activity() {
            for (sub, prop) in [
                (self.actor_filter(), activity.actor.as_deref()),
                (self.object_filter(), activity.object.as_deref()),
                (self.target_filter(), activity.target.as_deref()),
            ] {
                if let Some(sub) = sub {
                    match prop {
                        Some(prop) if sub.matches(prop) => {}
                        _ => return false,
                    }
                }
            }
        }
        true
    }
}
