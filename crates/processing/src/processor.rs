//! Validation and side-effect application for activities.
//!
//! The processor is dispatched by activity type. Every activity and every
//! embedded object without an ID receives one before persistence; audience
//! expansion deduplicates recipients, short-circuits the public collection,
//! and expands local followers/following collections to their members at
//! delivery time.

use crate::delivery::Deliver;
use crate::error::{ProcessingError, ProcessingResult};
use postbox_core::filter::MAX_ITEMS_CEILING;
use postbox_core::{Activity, Actor, Filter, Iri, Item, Kind, PUBLIC_AUDIENCE, PublicKey};
use postbox_keys::PrivateKey;
use postbox_storage::{CredentialStore, FullStore, Loaded, StorageError, Store, load_retrying};
use std::sync::Arc;
use time::OffsetDateTime;

/// A fresh IRI under the given parent collection.
pub fn generate_id(parent: &Iri) -> Iri {
    parent.add_path(&uuid::Uuid::new_v4().to_string())
}

/// Generate and persist a key pair for a locally created actor, when the
/// backend knows which algorithm to use. The private key lives only in
/// item metadata; the public key is set on the served actor document.
/// Returns `None` when the backend exposes no metadata typer.
pub async fn provision_actor_keys(
    store: &Arc<dyn FullStore>,
    mut actor: Actor,
) -> ProcessingResult<Option<Actor>> {
    let Some(typer) = store.as_metadata_typer() else {
        return Ok(None);
    };
    let Some(id) = actor.id().cloned() else {
        return Ok(None);
    };
    let key_type = typer.key_type();
    // RSA generation in particular is CPU-heavy.
    let key = tokio::task::spawn_blocking(move || PrivateKey::generate(key_type))
        .await
        .map_err(|e| ProcessingError::Storage(StorageError::Internal(e.to_string())))?
        .map_err(|e| {
            ProcessingError::Storage(StorageError::Internal(format!(
                "key generation failed: {e}"
            )))
        })?;
    let private_pem = key
        .to_pkcs8_pem()
        .map_err(|e| ProcessingError::Storage(StorageError::Internal(e.to_string())))?;
    let public_pem = key
        .public_key()
        .to_public_key_pem()
        .map_err(|e| ProcessingError::Storage(StorageError::Internal(e.to_string())))?;

    let mut metadata = match store.load_metadata(&id).await {
        Ok(m) => m,
        Err(StorageError::NotFound(_)) => postbox_storage::Metadata::default(),
        Err(e) => return Err(e.into()),
    };
    metadata.private_key = Some(private_pem);
    metadata.key_type = Some(key_type);
    store.save_metadata(&id, metadata).await?;

    actor.public_key = Some(PublicKey {
        id: Iri::new(format!("{id}#main-key")),
        owner: id.clone(),
        public_key_pem: public_pem,
    });
    match store.save(Item::from(actor)).await? {
        Item::Actor(actor) => Ok(Some(*actor)),
        _ => Err(ProcessingError::Storage(StorageError::Internal(
            "actor did not round-trip".to_string(),
        ))),
    }
}

/// Where an activity entered the instance.
enum Direction {
    /// Client-to-server, via the author's outbox.
    Outbox { author: Iri },
    /// Server-to-server, via the recipient's inbox.
    Inbox { recipient: Iri },
}

/// The result of processing one activity.
#[derive(Debug)]
pub struct Outcome {
    /// The processed activity: IDs assigned, references flattened, blind
    /// audience stripped.
    pub activity: Activity,
    /// False when the activity requires out-of-band completion (Follow).
    pub completed: bool,
    /// The IRI to advertise in the `Location` header: the created object
    /// for Create, the activity itself otherwise.
    pub location: Iri,
    /// Every IRI written while applying the activity, for cache
    /// invalidation.
    pub touched: Vec<Iri>,
}

/// The activity pipeline. Constructed explicitly with its collaborators;
/// there is no process-wide state.
pub struct Processor {
    store: Arc<dyn FullStore>,
    base: Iri,
    delivery: Arc<dyn Deliver>,
}

impl Processor {
    pub fn new(store: Arc<dyn FullStore>, base: Iri, delivery: Arc<dyn Deliver>) -> Self {
        Processor {
            store,
            base,
            delivery,
        }
    }

    /// Process a client-to-server activity posted to `author`'s outbox.
    pub async fn process_outbox(
        &self,
        author: &Actor,
        mut activity: Activity,
    ) -> ProcessingResult<Outcome> {
        let author_iri = author
            .id()
            .cloned()
            .ok_or_else(|| ProcessingError::InvalidActivity("author without an id".to_string()))?;
        match activity.actor_iri() {
            None => activity.actor = Some(Box::new(Item::Iri(author_iri.clone()))),
            Some(actor) if actor.equals(&author_iri, false) => {}
            Some(_) => {
                return Err(ProcessingError::Forbidden(
                    "activity actor does not match the authenticated actor".to_string(),
                ));
            }
        }
        self.run(activity, Direction::Outbox { author: author_iri })
            .await
    }

    /// Process a server-to-server activity delivered to `recipient`'s
    /// inbox.
    pub async fn process_inbox(
        &self,
        recipient: &Actor,
        activity: Activity,
    ) -> ProcessingResult<Outcome> {
        let recipient_iri = recipient
            .id()
            .cloned()
            .ok_or_else(|| ProcessingError::InvalidActivity("recipient without an id".to_string()))?;
        let actor_iri = activity.actor_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("inbound activity without an actor".to_string())
        })?;
        if self.is_blocked(&recipient_iri, &actor_iri).await? {
            return Err(ProcessingError::Forbidden(format!(
                "{actor_iri} is blocked by {recipient_iri}"
            )));
        }
        self.run(
            activity,
            Direction::Inbox {
                recipient: recipient_iri,
            },
        )
        .await
    }

    async fn run(&self, mut act: Activity, direction: Direction) -> ProcessingResult<Outcome> {
        let kind = act.base.kind.clone();
        if !kind.is_activity() {
            return Err(ProcessingError::InvalidActivity(format!(
                "{kind} is not an activity type"
            )));
        }
        if act.id().is_none() {
            act.base.id = Some(generate_id(&self.base.add_path("activities")));
        }
        if act.base.published.is_none() {
            act.base.published = Some(OffsetDateTime::now_utc());
        }
        let act_iri = act.id().cloned().expect("id was just assigned");
        let actor_iri = act.actor_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("activity without an actor".to_string())
        })?;

        let mut touched = vec![act_iri.clone()];
        let mut extra_recipients = Vec::new();
        let mut completed = true;
        let mut location = act_iri.clone();

        match kind {
            Kind::Create => {
                location = self.create(&mut act, &actor_iri, &mut touched).await?;
            }
            Kind::Update => self.update(&act, &actor_iri, &mut touched).await?,
            Kind::Delete => self.delete(&act, &actor_iri, &mut touched).await?,
            Kind::Follow => {
                let followed = act.object_iri().ok_or_else(|| {
                    ProcessingError::InvalidActivity("Follow without an object".to_string())
                })?;
                // Finalized out-of-band by the target's Accept or Reject.
                completed = false;
                extra_recipients.push(followed);
            }
            Kind::Accept | Kind::Reject => {
                let follower = self
                    .finalize_follow(&act, &actor_iri, kind == Kind::Accept, &mut touched)
                    .await?;
                extra_recipients.push(follower);
            }
            Kind::Like | Kind::Dislike => self.like(&act, &actor_iri, &mut touched).await?,
            Kind::Announce => self.announce(&act, &mut touched).await?,
            Kind::Undo => self.undo(&act, &actor_iri, &mut touched).await?,
            Kind::Block => self.block(&act, &actor_iri, &mut touched).await?,
            // Activities with no side-effect contract are persisted and
            // fanned out untouched.
            _ => {}
        }

        // The recipient set is computed before the blind audience is
        // stripped.
        let recipients = self.expand_recipients(&act, &extra_recipients).await?;

        flatten_references(&mut act);
        act.base.bto.clear();
        act.base.bcc.clear();
        self.store.save(Item::from(act.clone())).await?;

        match &direction {
            Direction::Outbox { author } => {
                let outbox = author.add_path("outbox");
                self.store.add_to(&outbox, &act_iri).await?;
                touched.push(outbox);
            }
            Direction::Inbox { recipient } => {
                let inbox = recipient.add_path("inbox");
                self.store.add_to(&inbox, &act_iri).await?;
                touched.push(inbox);
            }
        }

        // Local fan-out and remote delivery happen only on the outbox
        // path; an inbound activity was already fanned out by its origin.
        if let Direction::Outbox { author } = &direction {
            for recipient in recipients {
                if recipient.equals(author, false) {
                    continue;
                }
                if self.store.is_local_iri(&recipient) {
                    if self.is_blocked(&recipient, author).await? {
                        tracing::debug!(recipient = %recipient, "skipping blocked recipient");
                        continue;
                    }
                    if self.is_local_actor(&recipient).await? {
                        let inbox = recipient.add_path("inbox");
                        self.store.add_to(&inbox, &act_iri).await?;
                        touched.push(inbox);
                    }
                } else if let Err(e) = self
                    .delivery
                    .deliver(act.clone(), recipient.add_path("inbox"))
                    .await
                {
                    tracing::warn!(recipient = %recipient, error = %e, "could not enqueue delivery");
                }
            }
        }

        Ok(Outcome {
            activity: act,
            completed,
            location,
            touched,
        })
    }

    /// Create: copy audience onto the object, assign a fresh IRI under
    /// `/objects` (or `/actors` for actor objects), save, and leave an IRI
    /// reference in the activity.
    async fn create(
        &self,
        act: &mut Activity,
        author: &Iri,
        touched: &mut Vec<Iri>,
    ) -> ProcessingResult<Iri> {
        let Some(boxed) = act.object.as_mut() else {
            return Err(ProcessingError::InvalidActivity(
                "Create without an object".to_string(),
            ));
        };
        let mut item = (**boxed).clone();
        if item.is_iri() {
            return Err(ProcessingError::InvalidActivity(
                "Create requires an embedded object".to_string(),
            ));
        }
        let is_actor = item.kind().map(Kind::is_actor).unwrap_or(false);
        let activity_base = act.base.clone();
        let base = item
            .object_base_mut()
            .expect("embedded objects have a base record");
        copy_audience(&activity_base, base);
        base.attributed_to = Some(author.clone());
        if base.published.is_none() {
            base.published = activity_base.published;
        }
        if base.id.is_none() {
            let parent = if is_actor { "actors" } else { "objects" };
            base.id = Some(generate_id(&self.base.add_path(parent)));
        }
        base.bto.clear();
        base.bcc.clear();

        let saved = self.store.save(item).await?;
        // Locally created actors carry a key pair from birth.
        if let Item::Actor(actor) = &saved {
            provision_actor_keys(&self.store, (**actor).clone()).await?;
        }
        let object_iri = saved.iri().expect("saved items keep their id");
        touched.push(object_iri.clone());
        *boxed = Box::new(Item::Iri(object_iri.clone()));
        Ok(object_iri)
    }

    /// Update: authorize, merge field-wise over the stored item, save.
    async fn update(
        &self,
        act: &Activity,
        author: &Iri,
        touched: &mut Vec<Iri>,
    ) -> ProcessingResult<()> {
        let Some(update) = act.object.as_deref() else {
            return Err(ProcessingError::InvalidActivity(
                "Update without an object".to_string(),
            ));
        };
        let target = update.iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("Update object without an id".to_string())
        })?;
        let existing = self.load_item(&target).await?;
        if existing.is_tombstone() {
            return Err(StorageError::Conflict(format!("{target} is deleted")).into());
        }
        authorize(&existing, author, &target)?;
        if update.is_iri() {
            // Nothing to merge.
            return Ok(());
        }
        let merged = merge_items(&existing, update)?;
        self.store.save(merged).await?;
        touched.push(target);
        Ok(())
    }

    /// Delete: authorize as Update, replace the object with a tombstone.
    async fn delete(
        &self,
        act: &Activity,
        author: &Iri,
        touched: &mut Vec<Iri>,
    ) -> ProcessingResult<()> {
        let target = act.object_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("Delete without an object".to_string())
        })?;
        let existing = self.load_item(&target).await?;
        authorize(&existing, author, &target)?;
        self.store.delete(&target).await?;
        touched.push(target);
        Ok(())
    }

    /// Accept/Reject: look up the referenced Follow and apply (or skip)
    /// the membership change. Returns the follower so it learns the
    /// outcome.
    async fn finalize_follow(
        &self,
        act: &Activity,
        author: &Iri,
        accepted: bool,
        touched: &mut Vec<Iri>,
    ) -> ProcessingResult<Iri> {
        let follow_iri = act.object_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("Accept/Reject without an object".to_string())
        })?;
        let follow_item = self.load_item(&follow_iri).await?;
        let follow = follow_item
            .as_activity()
            .filter(|a| a.base.kind == Kind::Follow)
            .ok_or_else(|| {
                ProcessingError::InvalidActivity(format!("{follow_iri} is not a Follow"))
            })?;
        let follower = follow.actor_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("Follow without an actor".to_string())
        })?;
        let followed = follow.object_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("Follow without an object".to_string())
        })?;
        if !followed.equals(author, false) {
            return Err(ProcessingError::Forbidden(
                "only the followed actor may finalize a Follow".to_string(),
            ));
        }
        if accepted {
            let followers = followed.add_path("followers");
            self.store.add_to(&followers, &follower).await?;
            touched.push(followers);
            if self.store.is_local_iri(&follower) {
                let following = follower.add_path("following");
                self.store.add_to(&following, &followed).await?;
                touched.push(following);
            }
        }
        Ok(follower)
    }

    /// Like/Dislike: append to the actor's liked and, for local objects,
    /// to the object's likes.
    async fn like(
        &self,
        act: &Activity,
        author: &Iri,
        touched: &mut Vec<Iri>,
    ) -> ProcessingResult<()> {
        let object = act.object_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("Like without an object".to_string())
        })?;
        let act_iri = act.id().cloned().expect("activity id assigned");
        let liked = author.add_path("liked");
        self.store.add_to(&liked, &object).await?;
        touched.push(liked);
        if self.store.is_local_iri(&object) {
            let likes = object.add_path("likes");
            self.store.add_to(&likes, &act_iri).await?;
            touched.push(likes);
        }
        Ok(())
    }

    /// Announce: append to the local object's shares.
    async fn announce(&self, act: &Activity, touched: &mut Vec<Iri>) -> ProcessingResult<()> {
        let object = act.object_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("Announce without an object".to_string())
        })?;
        let act_iri = act.id().cloned().expect("activity id assigned");
        if self.store.is_local_iri(&object) {
            let shares = object.add_path("shares");
            self.store.add_to(&shares, &act_iri).await?;
            touched.push(shares);
        }
        Ok(())
    }

    /// Undo: invert a prior Like/Follow/Announce/Block by the same actor,
    /// then tombstone the undone activity.
    async fn undo(
        &self,
        act: &Activity,
        author: &Iri,
        touched: &mut Vec<Iri>,
    ) -> ProcessingResult<()> {
        let prior_iri = act.object_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("Undo without an object".to_string())
        })?;
        let prior_item = self.load_item(&prior_iri).await?;
        let prior = prior_item.as_activity().ok_or_else(|| {
            ProcessingError::InvalidActivity(format!("{prior_iri} is not an activity"))
        })?;
        let prior_actor = prior.actor_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("prior activity without an actor".to_string())
        })?;
        if !prior_actor.equals(author, false) {
            return Err(ProcessingError::Forbidden(
                "only the original actor may undo an activity".to_string(),
            ));
        }
        let prior_object = prior.object_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("prior activity without an object".to_string())
        })?;

        match prior.base.kind {
            Kind::Like | Kind::Dislike => {
                let liked = author.add_path("liked");
                self.store.remove_from(&liked, &prior_object).await?;
                touched.push(liked);
                if self.store.is_local_iri(&prior_object) {
                    let likes = prior_object.add_path("likes");
                    self.store.remove_from(&likes, &prior_iri).await?;
                    touched.push(likes);
                }
            }
            Kind::Follow => {
                let followers = prior_object.add_path("followers");
                self.store.remove_from(&followers, &prior_actor).await?;
                touched.push(followers);
                let following = prior_actor.add_path("following");
                self.store.remove_from(&following, &prior_object).await?;
                touched.push(following);
            }
            Kind::Announce => {
                if self.store.is_local_iri(&prior_object) {
                    let shares = prior_object.add_path("shares");
                    self.store.remove_from(&shares, &prior_iri).await?;
                    touched.push(shares);
                }
            }
            Kind::Block => {
                let blocked = author.add_path("blocked");
                self.store.remove_from(&blocked, &prior_object).await?;
                touched.push(blocked);
            }
            ref other => {
                return Err(ProcessingError::Unsupported(format!(
                    "cannot undo a {other} activity"
                )));
            }
        }
        // The undone activity's IRI resolves to a tombstone from now on.
        self.store.delete(&prior_iri).await?;
        touched.push(prior_iri);
        Ok(())
    }

    /// Block: record the blocked actor in the blocker's hidden collection.
    /// Prior interactions are left intact; only future activities between
    /// the pair are rejected.
    async fn block(
        &self,
        act: &Activity,
        author: &Iri,
        touched: &mut Vec<Iri>,
    ) -> ProcessingResult<()> {
        let target = act.object_iri().ok_or_else(|| {
            ProcessingError::InvalidActivity("Block without an object".to_string())
        })?;
        let blocked = author.add_path("blocked");
        self.store.add_to(&blocked, &target).await?;
        touched.push(blocked);
        Ok(())
    }

    /// The final recipient set: explicit audience plus side-effect
    /// recipients, public short-circuited, local followers/following
    /// expanded to members, deduplicated.
    async fn expand_recipients(
        &self,
        act: &Activity,
        extra: &[Iri],
    ) -> ProcessingResult<Vec<Iri>> {
        let base = &act.base;
        let direct = base
            .to
            .iter()
            .chain(base.cc.iter())
            .chain(base.bto.iter())
            .chain(base.bcc.iter())
            .chain(base.audience.iter())
            .chain(extra.iter());

        let mut out: Vec<Iri> = Vec::new();
        for recipient in direct {
            if recipient.as_str() == PUBLIC_AUDIENCE {
                continue;
            }
            let is_member_collection = matches!(
                recipient.last_segment(),
                Some("followers") | Some("following")
            );
            if is_member_collection && self.store.is_local_iri(recipient) {
                for member in self.collection_members(recipient).await? {
                    push_unique(&mut out, member);
                }
            } else {
                push_unique(&mut out, recipient.clone());
            }
        }
        Ok(out)
    }

    async fn collection_members(&self, collection: &Iri) -> ProcessingResult<Vec<Iri>> {
        let filter = Filter {
            iri: collection.clone(),
            max_items: MAX_ITEMS_CEILING,
            ..Filter::default()
        };
        match load_retrying(self.store.as_ref(), &filter).await {
            Ok(Loaded::Page { items, .. }) => {
                Ok(items.into_iter().filter_map(|it| it.iri()).collect())
            }
            Ok(Loaded::Item(_)) => Ok(Vec::new()),
            Err(StorageError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_blocked(&self, owner: &Iri, candidate: &Iri) -> ProcessingResult<bool> {
        let members = self.collection_members(&owner.add_path("blocked")).await?;
        Ok(members.iter().any(|m| m.equals(candidate, false)))
    }

    async fn is_local_actor(&self, iri: &Iri) -> ProcessingResult<bool> {
        match self.load_item(iri).await {
            Ok(item) => Ok(item.kind().map(Kind::is_actor).unwrap_or(false)),
            Err(ProcessingError::Storage(StorageError::NotFound(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn load_item(&self, iri: &Iri) -> ProcessingResult<Item> {
        let filter = Filter::item(iri.clone());
        match load_retrying(self.store.as_ref(), &filter).await? {
            Loaded::Item(item) => Ok(item),
            Loaded::Page { .. } => Err(ProcessingError::InvalidActivity(format!(
                "{iri} names a collection, not an item"
            ))),
        }
    }
}

fn push_unique(out: &mut Vec<Iri>, iri: Iri) {
    if !out.iter().any(|existing| existing.equals(&iri, false)) {
        out.push(iri);
    }
}

/// Authorization rule shared by Update and Delete: the activity's actor
/// must be the target's attributed actor, or the target itself.
fn authorize(existing: &Item, author: &Iri, target: &Iri) -> ProcessingResult<()> {
    if author.equals(target, false) {
        return Ok(());
    }
    let attributed = existing.object_base().and_then(|b| b.attributed_to.as_ref());
    match attributed {
        Some(owner) if owner.equals(author, false) => Ok(()),
        _ => Err(ProcessingError::Forbidden(format!(
            "{author} is not permitted to modify {target}"
        ))),
    }
}

/// Copy the activity's audience onto its object.
fn copy_audience(from: &postbox_core::Object, to: &mut postbox_core::Object) {
    for (source, dest) in [
        (&from.to, &mut to.to),
        (&from.cc, &mut to.cc),
        (&from.bto, &mut to.bto),
        (&from.bcc, &mut to.bcc),
        (&from.audience, &mut to.audience),
    ] {
        for iri in source {
            if !dest.iter().any(|d| d.equals(iri, false)) {
                dest.push(iri.clone());
            }
        }
    }
}

/// Replace embedded actor/object/target values with IRI references before
/// persistence; cross-object relations are stored as IRIs, never as
/// embedded owned values.
fn flatten_references(act: &mut Activity) {
    for prop in [&mut act.actor, &mut act.object, &mut act.target] {
        if let Some(boxed) = prop {
            if !boxed.is_iri() {
                if let Some(iri) = boxed.iri() {
                    **boxed = Item::Iri(iri);
                }
            }
        }
    }
}

/// Field-wise merge: non-absent fields of the update replace the stored
/// ones; identity and type are immutable.
fn merge_items(existing: &Item, update: &Item) -> ProcessingResult<Item> {
    let mut merged = serde_json::to_value(existing).map_err(StorageError::from)?;
    let patch = serde_json::to_value(update).map_err(StorageError::from)?;
    if let (serde_json::Value::Object(base), serde_json::Value::Object(patch)) =
        (&mut merged, patch)
    {
        let keep_id = base.get("id").cloned();
        let keep_type = base.get("type").cloned();
        for (key, value) in patch {
            if !value.is_null() {
                base.insert(key, value);
            }
        }
        if let Some(id) = keep_id {
            base.insert("id".to_string(), id);
        }
        if let Some(kind) = keep_type {
            base.insert("type".to_string(), kind);
        }
    }
    Ok(serde_json::from_value(merged).map_err(StorageError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::NullDelivery;
    use postbox_core::Object;
    use postbox_keys::KeyType;
    use postbox_storage::KvStore;
    use tempfile::tempdir;

    const BASE: &str = "https://postbox.test";

    fn processor() -> (tempfile::TempDir, Processor, Arc<dyn FullStore>) {
        let dir = tempdir().unwrap();
        let store: Arc<dyn FullStore> = Arc::new(
            KvStore::open(dir.path(), ":", Iri::new(BASE), KeyType::Ed25519).unwrap(),
        );
        let processor = Processor::new(store.clone(), Iri::new(BASE), Arc::new(NullDelivery));
        (dir, processor, store)
    }

    async fn make_actor(store: &Arc<dyn FullStore>, name: &str) -> Actor {
        let iri = Iri::new(format!("{BASE}/actors/{name}"));
        let mut actor = Actor::new(Kind::Person, iri).with_collections();
        actor.preferred_username = Some(name.to_string());
        let saved = store.save(Item::from(actor)).await.unwrap();
        match saved {
            Item::Actor(a) => *a,
            _ => unreachable!(),
        }
    }

    fn activity(kind: Kind, actor: &Actor, object: Item) -> Activity {
        let mut act = Activity::new(kind);
        act.actor = Some(Box::new(Item::Iri(actor.id().unwrap().clone())));
        act.object = Some(Box::new(object));
        act
    }

    async fn members(store: &Arc<dyn FullStore>, collection: &str) -> Vec<String> {
        let filter = Filter {
            iri: Iri::new(collection),
            max_items: MAX_ITEMS_CEILING,
            ..Filter::default()
        };
        match store.load(&filter).await.unwrap() {
            Loaded::Page { items, .. } => items
                .into_iter()
                .filter_map(|it| it.iri())
                .map(|i| i.to_string())
                .collect(),
            Loaded::Item(_) => panic!("expected a collection"),
        }
    }

    #[tokio::test]
    async fn create_assigns_iri_and_fans_out() {
        let (_dir, processor, store) = processor();
        let alice = make_actor(&store, "alice").await;
        let bob = make_actor(&store, "bob").await;

        let mut act = activity(Kind::Create, &alice, Item::from(Object::new(Kind::Note)));
        act.base.to = vec![bob.id().unwrap().clone()];

        let outcome = processor.process_outbox(&alice, act).await.unwrap();
        assert!(outcome.completed);
        assert!(outcome.location.as_str().starts_with(&format!("{BASE}/objects/")));

        // The note exists, attributed to alice, with the copied audience.
        let note = match store.load(&Filter::item(outcome.location.clone())).await.unwrap() {
            Loaded::Item(it) => it,
            _ => panic!(),
        };
        let note_base = note.object_base().unwrap();
        assert_eq!(
            note_base.attributed_to.as_ref().unwrap().as_str(),
            format!("{BASE}/actors/alice")
        );
        assert_eq!(note_base.to.len(), 1);

        // Activity appended to alice's outbox and bob's inbox.
        let act_iri = outcome.activity.id().unwrap().to_string();
        assert!(members(&store, &format!("{BASE}/actors/alice/outbox")).await.contains(&act_iri));
        assert!(members(&store, &format!("{BASE}/actors/bob/inbox")).await.contains(&act_iri));
    }

    #[tokio::test]
    async fn follow_accept_updates_membership() {
        let (_dir, processor, store) = processor();
        let alice = make_actor(&store, "alice").await;
        let bob = make_actor(&store, "bob").await;

        let follow = activity(
            Kind::Follow,
            &alice,
            Item::Iri(bob.id().unwrap().clone()),
        );
        let outcome = processor.process_outbox(&alice, follow).await.unwrap();
        assert!(!outcome.completed);
        let follow_iri = outcome.activity.id().unwrap().clone();

        // The follow reached bob's inbox but membership is still pending.
        assert!(members(&store, &format!("{BASE}/actors/bob/inbox"))
            .await
            .contains(&follow_iri.to_string()));
        assert!(members(&store, &format!("{BASE}/actors/bob/followers")).await.is_empty());

        let accept = activity(Kind::Accept, &bob, Item::Iri(follow_iri));
        let outcome = processor.process_outbox(&bob, accept).await.unwrap();
        assert!(outcome.completed);

        assert_eq!(
            members(&store, &format!("{BASE}/actors/bob/followers")).await,
            vec![format!("{BASE}/actors/alice")]
        );
        assert_eq!(
            members(&store, &format!("{BASE}/actors/alice/following")).await,
            vec![format!("{BASE}/actors/bob")]
        );
    }

    #[tokio::test]
    async fn accept_by_wrong_actor_is_forbidden() {
        let (_dir, processor, store) = processor();
        let alice = make_actor(&store, "alice").await;
        let bob = make_actor(&store, "bob").await;
        let carol = make_actor(&store, "carol").await;

        let follow = activity(Kind::Follow, &alice, Item::Iri(bob.id().unwrap().clone()));
        let outcome = processor.process_outbox(&alice, follow).await.unwrap();

        let accept = activity(
            Kind::Accept,
            &carol,
            Item::Iri(outcome.activity.id().unwrap().clone()),
        );
        let err = processor.process_outbox(&carol, accept).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Forbidden(_)));
    }

    #[tokio::test]
    async fn like_then_undo_clears_both_collections() {
        let (_dir, processor, store) = processor();
        let alice = make_actor(&store, "alice").await;

        let create = activity(Kind::Create, &alice, Item::from(Object::new(Kind::Note)));
        let note_iri = processor.process_outbox(&alice, create).await.unwrap().location;

        let like = activity(Kind::Like, &alice, Item::Iri(note_iri.clone()));
        let like_iri = processor
            .process_outbox(&alice, like)
            .await
            .unwrap()
            .activity
            .id()
            .unwrap()
            .clone();

        assert_eq!(
            members(&store, &format!("{BASE}/actors/alice/liked")).await,
            vec![note_iri.to_string()]
        );
        assert_eq!(
            members(&store, &format!("{}/likes", note_iri)).await,
            vec![like_iri.to_string()]
        );

        let undo = activity(Kind::Undo, &alice, Item::Iri(like_iri.clone()));
        processor.process_outbox(&alice, undo).await.unwrap();

        assert!(members(&store, &format!("{BASE}/actors/alice/liked")).await.is_empty());
        assert!(members(&store, &format!("{}/likes", note_iri)).await.is_empty());

        // The undone Like resolves to a tombstone.
        let like_now = match store.load(&Filter::item(like_iri)).await.unwrap() {
            Loaded::Item(it) => it,
            _ => panic!(),
        };
        assert!(like_now.is_tombstone());
    }

    #[tokio::test]
    async fn update_requires_authorization() {
        let (_dir, processor, store) = processor();
        let alice = make_actor(&store, "alice").await;
        let mallory = make_actor(&store, "mallory").await;

        let create = activity(Kind::Create, &alice, Item::from(Object::new(Kind::Note)));
        let note_iri = processor.process_outbox(&alice, create).await.unwrap().location;

        let mut patch = Object::new(Kind::Note);
        patch.id = Some(note_iri.clone());
        patch.content = Some("defaced".to_string());
        let update = activity(Kind::Update, &mallory, Item::from(patch));
        let err = processor.process_outbox(&mallory, update).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Forbidden(_)));
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let (_dir, processor, store) = processor();
        let alice = make_actor(&store, "alice").await;

        let mut note = Object::new(Kind::Note);
        note.content = Some("first".to_string());
        note.name = Some("title".to_string());
        let create = activity(Kind::Create, &alice, Item::from(note));
        let note_iri = processor.process_outbox(&alice, create).await.unwrap().location;

        let mut patch = Object::new(Kind::Note);
        patch.id = Some(note_iri.clone());
        patch.content = Some("second".to_string());
        let update = activity(Kind::Update, &alice, Item::from(patch));
        processor.process_outbox(&alice, update).await.unwrap();

        let merged = match store.load(&Filter::item(note_iri)).await.unwrap() {
            Loaded::Item(it) => it,
            _ => panic!(),
        };
        let base = merged.object_base().unwrap();
        assert_eq!(base.content.as_deref(), Some("second"));
        assert_eq!(base.name.as_deref(), Some("title"));
    }

    #[tokio::test]
    async fn block_rejects_future_inbound() {
        let (_dir, processor, store) = processor();
        let alice = make_actor(&store, "alice").await;
        let bob = make_actor(&store, "bob").await;

        let block = activity(Kind::Block, &alice, Item::Iri(bob.id().unwrap().clone()));
        processor.process_outbox(&alice, block).await.unwrap();

        let mut note = Activity::new(Kind::Create);
        note.actor = Some(Box::new(Item::Iri(bob.id().unwrap().clone())));
        note.object = Some(Box::new(Item::from(Object::new(Kind::Note))));
        let err = processor.process_inbox(&alice, note).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Forbidden(_)));

        // Outbox fan-out silently skips recipients who blocked the author.
        let mut greeting = activity(Kind::Create, &bob, Item::from(Object::new(Kind::Note)));
        greeting.base.to = vec![alice.id().unwrap().clone()];
        processor.process_outbox(&bob, greeting).await.unwrap();
        assert!(members(&store, &format!("{BASE}/actors/alice/inbox")).await.is_empty());
    }

    #[tokio::test]
    async fn followers_collection_expands_at_delivery() {
        let (_dir, processor, store) = processor();
        let alice = make_actor(&store, "alice").await;
        let bob = make_actor(&store, "bob").await;

        // bob follows alice, alice accepts.
        let follow = activity(Kind::Follow, &bob, Item::Iri(alice.id().unwrap().clone()));
        let follow_iri = processor
            .process_outbox(&bob, follow)
            .await
            .unwrap()
            .activity
            .id()
            .unwrap()
            .clone();
        let accept = activity(Kind::Accept, &alice, Item::Iri(follow_iri));
        processor.process_outbox(&alice, accept).await.unwrap();

        // A note addressed to alice's followers lands in bob's inbox.
        let mut note = activity(Kind::Create, &alice, Item::from(Object::new(Kind::Note)));
        note.base.to = vec![alice.id().unwrap().add_path("followers")];
        let outcome = processor.process_outbox(&alice, note).await.unwrap();

        assert!(members(&store, &format!("{BASE}/actors/bob/inbox"))
            .await
            .contains(&outcome.activity.id().unwrap().to_string()));
    }

    #[tokio::test]
    async fn rejected_follow_leaves_no_membership() {
        let (_dir, processor, store) = processor();
        let alice = make_actor(&store, "alice").await;
        let bob = make_actor(&store, "bob").await;

        let follow = activity(Kind::Follow, &alice, Item::Iri(bob.id().unwrap().clone()));
        let follow_iri = processor
            .process_outbox(&alice, follow)
            .await
            .unwrap()
            .activity
            .id()
            .unwrap()
            .clone();
        let reject = activity(Kind::Reject, &bob, Item::Iri(follow_iri));
        processor.process_outbox(&bob, reject).await.unwrap();

        assert!(members(&store, &format!("{BASE}/actors/bob/followers")).await.is_empty());
        assert!(members(&store, &format!("{BASE}/actors/alice/following")).await.is_empty());
    }

    #[tokio::test]
    async fn non_activity_kind_is_rejected() {
        let (_dir, processor, store) = processor();
        let alice = make_actor(&store, "alice").await;
        let mut bogus = Activity::new(Kind::Note);
        bogus.actor = Some(Box::new(Item::Iri(alice.id().unwrap().clone())));
        let err = processor.process_outbox(&alice, bogus).await.unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidActivity(_)));
    }
}
