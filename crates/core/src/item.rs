//! The polymorphic ActivityStreams item model.
//!
//! Every entity is an [`Item`]: a tagged union over bare IRI references,
//! objects, actors, activities, and collections. Dispatch happens on the
//! `type` tag, never on inheritance; the fields shared by all concrete
//! variants factor into [`Object`].
//!
//! Cross-object relations are stored as IRIs, never as embedded owned
//! values; dereferencing is explicit and depth-limited in the storage layer.

use crate::iri::Iri;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;

/// The `type` tag of an item.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    // Objects
    Object,
    Article,
    Audio,
    Document,
    Event,
    Image,
    Note,
    Page,
    Place,
    Profile,
    Tombstone,
    Video,
    // Actors
    Application,
    Group,
    Organization,
    Person,
    Service,
    // Activities
    Accept,
    Add,
    Announce,
    Block,
    Create,
    Delete,
    Dislike,
    Flag,
    Follow,
    Ignore,
    Invite,
    Join,
    Leave,
    Like,
    Listen,
    Move,
    Offer,
    Read,
    Reject,
    Remove,
    TentativeAccept,
    TentativeReject,
    Undo,
    Update,
    View,
    // Intransitive activities
    Arrive,
    Question,
    Travel,
    // Collections
    Collection,
    OrderedCollection,
    CollectionPage,
    OrderedCollectionPage,
    // Anything from an extension vocabulary
    Other(String),
}

impl Kind {
    pub fn as_str(&self) -> &str {
        match self {
            Kind::Object => "Object",
            Kind::Article => "Article",
            Kind::Audio => "Audio",
            Kind::Document => "Document",
            Kind::Event => "Event",
            Kind::Image => "Image",
            Kind::Note => "Note",
            Kind::Page => "Page",
            Kind::Place => "Place",
            Kind::Profile => "Profile",
            Kind::Tombstone => "Tombstone",
            Kind::Video => "Video",
            Kind::Application => "Application",
            Kind::Group => "Group",
            Kind::Organization => "Organization",
            Kind::Person => "Person",
            Kind::Service => "Service",
            Kind::Accept => "Accept",
            Kind::Add => "Add",
            Kind::Announce => "Announce",
            Kind::Block => "Block",
            Kind::Create => "Create",
            Kind::Delete => "Delete",
            Kind::Dislike => "Dislike",
            Kind::Flag => "Flag",
            Kind::Follow => "Follow",
            Kind::Ignore => "Ignore",
            Kind::Invite => "Invite",
            Kind::Join => "Join",
            Kind::Leave => "Leave",
            Kind::Like => "Like",
            Kind::Listen => "Listen",
            Kind::Move => "Move",
            Kind::Offer => "Offer",
            Kind::Read => "Read",
            Kind::Reject => "Reject",
            Kind::Remove => "Remove",
            Kind::TentativeAccept => "TentativeAccept",
            Kind::TentativeReject => "TentativeReject",
            Kind::Undo => "Undo",
            Kind::Update => "Update",
            Kind::View => "View",
            Kind::Arrive => "Arrive",
            Kind::Question => "Question",
            Kind::Travel => "Travel",
            Kind::Collection => "Collection",
            Kind::OrderedCollection => "OrderedCollection",
            Kind::CollectionPage => "CollectionPage",
            Kind::OrderedCollectionPage => "OrderedCollectionPage",
            Kind::Other(s) => s,
        }
    }

    pub fn is_actor(&self) -> bool {
        matches!(
            self,
            Kind::Application | Kind::Group | Kind::Organization | Kind::Person | Kind::Service
        )
    }

    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            Kind::Accept
                | Kind::Add
                | Kind::Announce
                | Kind::Block
                | Kind::Create
                | Kind::Delete
                | Kind::Dislike
                | Kind::Flag
                | Kind::Follow
                | Kind::Ignore
                | Kind::Invite
                | Kind::Join
                | Kind::Leave
                | Kind::Like
                | Kind::Listen
                | Kind::Move
                | Kind::Offer
                | Kind::Read
                | Kind::Reject
                | Kind::Remove
                | Kind::TentativeAccept
                | Kind::TentativeReject
                | Kind::Undo
                | Kind::Update
                | Kind::View
        ) || self.is_intransitive()
    }

    /// Activities with no `object` property.
    pub fn is_intransitive(&self) -> bool {
        matches!(self, Kind::Arrive | Kind::Question | Kind::Travel)
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Kind::Collection
                | Kind::OrderedCollection
                | Kind::CollectionPage
                | Kind::OrderedCollectionPage
        )
    }
}

impl Default for Kind {
    fn default() -> Self {
        Kind::Object
    }
}

impl From<&str> for Kind {
    fn from(s: &str) -> Self {
        match s {
            "Object" => Kind::Object,
            "Article" => Kind::Article,
            "Audio" => Kind::Audio,
            "Document" => Kind::Document,
            "Event" => Kind::Event,
            "Image" => Kind::Image,
            "Note" => Kind::Note,
            "Page" => Kind::Page,
            "Place" => Kind::Place,
            "Profile" => Kind::Profile,
            "Tombstone" => Kind::Tombstone,
            "Video" => Kind::Video,
            "Application" => Kind::Application,
            "Group" => Kind::Group,
            "Organization" => Kind::Organization,
            "Person" => Kind::Person,
            "Service" => Kind::Service,
            "Accept" => Kind::Accept,
            "Add" => Kind::Add,
            "Announce" => Kind::Announce,
            "Block" => Kind::Block,
            "Create" => Kind::Create,
            "Delete" => Kind::Delete,
            "Dislike" => Kind::Dislike,
            "Flag" => Kind::Flag,
            "Follow" => Kind::Follow,
            "Ignore" => Kind::Ignore,
            "Invite" => Kind::Invite,
            "Join" => Kind::Join,
            "Leave" => Kind::Leave,
            "Like" => Kind::Like,
            "Listen" => Kind::Listen,
            "Move" => Kind::Move,
            "Offer" => Kind::Offer,
            "Read" => Kind::Read,
            "Reject" => Kind::Reject,
            "Remove" => Kind::Remove,
            "TentativeAccept" => Kind::TentativeAccept,
            "TentativeReject" => Kind::TentativeReject,
            "Undo" => Kind::Undo,
            "Update" => Kind::Update,
            "View" => Kind::View,
            "Arrive" => Kind::Arrive,
            "Question" => Kind::Question,
            "Travel" => Kind::Travel,
            "Collection" => Kind::Collection,
            "OrderedCollection" => Kind::OrderedCollection,
            "CollectionPage" => Kind::CollectionPage,
            "OrderedCollectionPage" => Kind::OrderedCollectionPage,
            other => Kind::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Kind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Kind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Kind::from(s.as_str()))
    }
}

/// The record shared by every concrete item variant.
///
/// Also serves as the representation of bare objects (notes, articles, ...)
/// and tombstones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Object {
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none", default)]
    pub context: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<Iri>,

    #[serde(rename = "type", default)]
    pub kind: Kind,

    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub published: Option<OffsetDateTime>,

    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub updated: Option<OffsetDateTime>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub summary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content: Option<String>,

    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none", default)]
    pub media_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<Iri>,

    // Audience. `bto` and `bcc` participate in delivery fan-out and are
    // stripped before an item is served.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub to: Vec<Iri>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cc: Vec<Iri>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub bto: Vec<Iri>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub bcc: Vec<Iri>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub audience: Vec<Iri>,

    #[serde(
        rename = "attributedTo",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub attributed_to: Option<Iri>,

    #[serde(rename = "inReplyTo", skip_serializing_if = "Option::is_none", default)]
    pub in_reply_to: Option<Iri>,

    /// Tags hold either embedded items or IRI references, resolved on demand.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tag: Vec<Item>,

    // Owned collections. Missing is indistinguishable from empty.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub replies: Option<Iri>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub likes: Option<Iri>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub shares: Option<Iri>,

    // Tombstone fields.
    #[serde(rename = "formerType", skip_serializing_if = "Option::is_none", default)]
    pub former_type: Option<Kind>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub deleted: Option<OffsetDateTime>,
}

impl Object {
    pub fn new(kind: Kind) -> Self {
        Object {
            kind,
            ..Object::default()
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind == Kind::Tombstone
    }

    /// The tombstone replacing this object, preserving IRI and publish time.
    pub fn tombstone(&self, deleted: OffsetDateTime) -> Object {
        Object {
            id: self.id.clone(),
            kind: Kind::Tombstone,
            former_type: Some(self.kind.clone()),
            published: self.published,
            deleted: Some(deleted),
            ..Object::default()
        }
    }
}

/// An actor's public key, served inline on the actor document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublicKey {
    pub id: Iri,
    pub owner: Iri,
    #[serde(rename = "publicKeyPem")]
    pub public_key_pem: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(rename = "sharedInbox", skip_serializing_if = "Option::is_none", default)]
    pub shared_inbox: Option<Iri>,
}

/// An entity capable of performing activities.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(flatten)]
    pub base: Object,

    #[serde(
        rename = "preferredUsername",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub preferred_username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub inbox: Option<Iri>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub outbox: Option<Iri>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub followers: Option<Iri>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub following: Option<Iri>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub liked: Option<Iri>,

    #[serde(rename = "publicKey", skip_serializing_if = "Option::is_none", default)]
    pub public_key: Option<PublicKey>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub endpoints: Option<Endpoints>,
}

impl Actor {
    pub fn new(kind: Kind, id: Iri) -> Self {
        let mut base = Object::new(kind);
        base.id = Some(id);
        Actor {
            base,
            ..Actor::default()
        }
    }

    pub fn id(&self) -> Option<&Iri> {
        self.base.id.as_ref()
    }

    /// Set the five owned collection references derived from the actor IRI.
    pub fn with_collections(mut self) -> Self {
        if let Some(id) = self.base.id.clone() {
            self.inbox = Some(id.add_path("inbox"));
            self.outbox = Some(id.add_path("outbox"));
            self.followers = Some(id.add_path("followers"));
            self.following = Some(id.add_path("following"));
            self.liked = Some(id.add_path("liked"));
        }
        self
    }
}

/// A transitive or intransitive activity.
///
/// Intransitive activities simply carry no `object`; dispatch stays on the
/// `type` tag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(flatten)]
    pub base: Object,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub actor: Option<Box<Item>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub object: Option<Box<Item>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<Box<Item>>,
}

impl Activity {
    pub fn new(kind: Kind) -> Self {
        Activity {
            base: Object::new(kind),
            ..Activity::default()
        }
    }

    pub fn id(&self) -> Option<&Iri> {
        self.base.id.as_ref()
    }

    pub fn actor_iri(&self) -> Option<Iri> {
        self.actor.as_ref().and_then(|it| it.iri())
    }

    pub fn object_iri(&self) -> Option<Iri> {
        self.object.as_ref().and_then(|it| it.iri())
    }

    pub fn target_iri(&self) -> Option<Iri> {
        self.target.as_ref().and_then(|it| it.iri())
    }
}

/// An ordered or unordered sequence of item references.
///
/// Collections are persisted as IRI arrays and served ordered; membership is
/// a set (no IRI appears twice).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(flatten)]
    pub base: Object,

    #[serde(rename = "totalItems", default)]
    pub total_items: u64,

    #[serde(
        rename = "orderedItems",
        alias = "items",
        skip_serializing_if = "Vec::is_empty",
        default
    )]
    pub items: Vec<Item>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub first: Option<Iri>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next: Option<Iri>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prev: Option<Iri>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last: Option<Iri>,
}

impl Collection {
    pub fn ordered(id: Iri) -> Self {
        let mut base = Object::new(Kind::OrderedCollection);
        base.id = Some(id);
        Collection {
            base,
            ..Collection::default()
        }
    }
}

/// The polymorphic item: a bare IRI reference or a concrete entity.
#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Iri(Iri),
    Object(Box<Object>),
    Actor(Box<Actor>),
    Activity(Box<Activity>),
    Collection(Box<Collection>),
}

impl Item {
    /// The identity of this item: its `id` for concrete variants, the
    /// reference itself for [`Item::Iri`].
    pub fn iri(&self) -> Option<Iri> {
        match self {
            Item::Iri(i) => Some(i.clone()),
            Item::Object(o) => o.id.clone(),
            Item::Actor(a) => a.base.id.clone(),
            Item::Activity(a) => a.base.id.clone(),
            Item::Collection(c) => c.base.id.clone(),
        }
    }

    /// The `type` tag; `None` for bare references.
    pub fn kind(&self) -> Option<&Kind> {
        match self {
            Item::Iri(_) => None,
            Item::Object(o) => Some(&o.kind),
            Item::Actor(a) => Some(&a.base.kind),
            Item::Activity(a) => Some(&a.base.kind),
            Item::Collection(c) => Some(&c.base.kind),
        }
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Item::Iri(_))
    }

    pub fn as_actor(&self) -> Option<&Actor> {
        match self {
            Item::Actor(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_activity(&self) -> Option<&Activity> {
        match self {
            Item::Activity(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Item::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Item::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// A view of the shared record, for any concrete variant.
    pub fn object_base(&self) -> Option<&Object> {
        match self {
            Item::Iri(_) => None,
            Item::Object(o) => Some(o),
            Item::Actor(a) => Some(&a.base),
            Item::Activity(a) => Some(&a.base),
            Item::Collection(c) => Some(&c.base),
        }
    }

    /// Mutable view of the shared record.
    pub fn object_base_mut(&mut self) -> Option<&mut Object> {
        match self {
            Item::Iri(_) => None,
            Item::Object(o) => Some(o),
            Item::Actor(a) => Some(&mut a.base),
            Item::Activity(a) => Some(&mut a.base),
            Item::Collection(c) => Some(&mut c.base),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind() == Some(&Kind::Tombstone)
    }

    /// Remove the blind audience fields before serving.
    pub fn strip_blind_audience(&mut self) {
        if let Some(base) = self.object_base_mut() {
            base.bto.clear();
            base.bcc.clear();
        }
    }
}

impl From<Iri> for Item {
    fn from(i: Iri) -> Self {
        Item::Iri(i)
    }
}

impl From<Object> for Item {
    fn from(o: Object) -> Self {
        Item::Object(Box::new(o))
    }
}

impl From<Actor> for Item {
    fn from(a: Actor) -> Self {
        Item::Actor(Box::new(a))
    }
}

impl From<Activity> for Item {
    fn from(a: Activity) -> Self {
        Item::Activity(Box::new(a))
    }
}

impl From<Collection> for Item {
    fn from(c: Collection) -> Self {
        Item::Collection(Box::new(c))
    }
}

impl Serialize for Item {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Item::Iri(i) => i.serialize(serializer),
            Item::Object(o) => o.serialize(serializer),
            Item::Actor(a) => a.serialize(serializer),
            Item::Activity(a) => a.serialize(serializer),
            Item::Collection(c) => c.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Item {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        if let Some(iri) = value.as_str() {
            return Ok(Item::Iri(Iri::new(iri)));
        }
        if !value.is_object() {
            return Err(D::Error::custom("item must be an IRI string or an object"));
        }
        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .map(Kind::from)
            .unwrap_or_default();
        let item = if kind.is_actor() {
            serde_json::from_value::<Actor>(value).map(Item::from)
        } else if kind.is_activity() {
            serde_json::from_value::<Activity>(value).map(Item::from)
        } else if kind.is_collection() {
            serde_json::from_value::<Collection>(value).map(Item::from)
        } else {
            serde_json::from_value::<Object>(value).map(Item::from)
        };
        item.map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn item_deserializes_by_type_tag() {
        let person: Item = serde_json::from_value(json!({
            "type": "Person",
            "id": "https://postbox.test/actors/alice",
            "preferredUsername": "alice",
        }))
        .unwrap();
        assert!(person.as_actor().is_some());

        let follow: Item = serde_json::from_value(json!({
            "type": "Follow",
            "actor": "https://postbox.test/actors/alice",
            "object": "https://postbox.test/actors/bob",
        }))
        .unwrap();
        let follow = follow.as_activity().unwrap();
        assert_eq!(
            follow.actor_iri().unwrap().as_str(),
            "https://postbox.test/actors/alice"
        );

        let reference: Item =
            serde_json::from_value(json!("https://postbox.test/objects/1")).unwrap();
        assert!(reference.is_iri());
    }

    #[test]
    fn unknown_type_falls_back_to_object() {
        let it: Item = serde_json::from_value(json!({
            "type": "ChatMessage",
            "content": "hi",
        }))
        .unwrap();
        assert_eq!(it.kind(), Some(&Kind::Other("ChatMessage".to_string())));
        assert!(it.as_object().is_some());
    }

    #[test]
    fn collection_accepts_items_alias() {
        let col: Item = serde_json::from_value(json!({
            "type": "Collection",
            "items": ["https://postbox.test/objects/1"],
        }))
        .unwrap();
        assert_eq!(col.as_collection().unwrap().items.len(), 1);
    }

    #[test]
    fn tombstone_preserves_identity() {
        let mut note = Object::new(Kind::Note);
        note.id = Some(Iri::new("https://postbox.test/objects/1"));
        note.published = Some(OffsetDateTime::UNIX_EPOCH);
        let ts = note.tombstone(OffsetDateTime::UNIX_EPOCH);
        assert_eq!(ts.id, note.id);
        assert_eq!(ts.former_type, Some(Kind::Note));
        assert!(ts.deleted.is_some());
        assert_eq!(ts.published, note.published);
    }

    #[test]
    fn blind_audience_is_strippable() {
        let mut act = Activity::new(Kind::Create);
        act.base.bcc = vec![Iri::new("https://postbox.test/actors/carol")];
        let mut item = Item::from(act);
        item.strip_blind_audience();
        assert!(item.object_base().unwrap().bcc.is_empty());
    }

    #[test]
    fn serializes_without_empty_fields() {
        let note = Object::new(Kind::Note);
        let v = serde_json::to_value(Item::from(note)).unwrap();
        assert_eq!(v, json!({"type": "Note"}));
    }
}
