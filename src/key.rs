// used to share registries and the id generator between threads
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use core::hash::{BuildHasherDefault, Hash, Hasher};
use std::any::TypeId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::marker::PhantomData;
use seahash::SeaHasher;

// custom made ordering for keys
use std::cmp::Ordering;

// used to print out readable forms of a key
use std::fmt;

use tracing::trace;

use crate::settings::{IdSpace, Settings};

// ------------- Id -------------
pub type KeyId = u64;

pub type KeyHasher = BuildHasherDefault<SeaHasher>;

pub const GENESIS: KeyId = 0;

// Poisoning only means another thread panicked mid-insert. The maps stay
// consistent because every insert is a single call, so keep going.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct IdGenerator {
    lower_bound: KeyId,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { lower_bound: GENESIS }
    }
    pub fn shared() -> SharedGenerator {
        Arc::new(Mutex::new(Self::new()))
    }
    // Ids are never released, a key lives as long as its registry.
    pub fn generate(&mut self) -> KeyId {
        self.lower_bound += 1;
        self.lower_bound
    }
    pub fn lower_bound(&self) -> KeyId {
        self.lower_bound
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedGenerator = Arc<Mutex<IdGenerator>>;

// ------------- Kinds -------------
/// Discriminates the registries. Keys of different kinds are different types,
/// so comparing them does not even compile; [`AnyKey`] covers the mixed case.
pub trait KeyKind: Send + Sync + 'static {
    const NAME: &'static str;
}

#[derive(Debug)]
pub enum TagKind {}
impl KeyKind for TagKind {
    const NAME: &'static str = "tag";
}

#[derive(Debug)]
pub enum PluginKind {}
impl KeyKind for PluginKind {
    const NAME: &'static str = "plugin";
}

#[derive(Debug)]
pub enum TriggerKind {}
impl KeyKind for TriggerKind {
    const NAME: &'static str = "trigger";
}

pub type TagKey = Key<TagKind>;
pub type PluginKey = Key<PluginKind>;
pub type TriggerKey = Key<TriggerKind>;

// ------------- Key -------------
#[derive(Debug)]
struct Interned {
    id: KeyId,
    name: String,
}

/// An interned name. Cloning is a reference count bump; equality and hashing
/// only look at the id.
pub struct Key<K: KeyKind> {
    interned: Arc<Interned>,
    kind: PhantomData<fn() -> K>,
}

impl<K: KeyKind> Key<K> {
    fn new(id: KeyId, name: String) -> Self {
        Self {
            interned: Arc::new(Interned { id, name }),
            kind: PhantomData,
        }
    }
    pub fn id(&self) -> KeyId {
        self.interned.id
    }
    // The name as spelled on first lookup.
    pub fn name(&self) -> &str {
        &self.interned.name
    }
    pub fn kind(&self) -> &'static str {
        K::NAME
    }
    /// True if both handles point at the very same interned object.
    pub fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.interned, &other.interned)
    }
    pub fn erase(&self) -> AnyKey {
        AnyKey::from(self)
    }
}

impl<K: KeyKind> Clone for Key<K> {
    fn clone(&self) -> Self {
        Self {
            interned: Arc::clone(&self.interned),
            kind: PhantomData,
        }
    }
}
impl<K: KeyKind> PartialEq for Key<K> {
    fn eq(&self, other: &Self) -> bool {
        self.interned.id == other.interned.id
    }
}
impl<K: KeyKind> Eq for Key<K> {}
impl<K: KeyKind> Hash for Key<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.interned.id.hash(state);
    }
}
impl<K: KeyKind> Ord for Key<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.interned.id.cmp(&other.interned.id)
    }
}
impl<K: KeyKind> PartialOrd for Key<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<K: KeyKind> PartialEq<AnyKey> for Key<K> {
    fn eq(&self, other: &AnyKey) -> bool {
        self.erase() == *other
    }
}
impl<K: KeyKind> fmt::Debug for Key<K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}({:?})", K::NAME, self.interned.id, self.interned.name)
    }
}
impl<K: KeyKind> fmt::Display for Key<K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.interned.name)
    }
}

// ------------- AnyKey -------------
/// A key with its kind erased, for tables that mix kinds.
#[derive(Clone, Copy, Debug)]
pub struct AnyKey {
    kind: TypeId,
    kind_name: &'static str,
    id: KeyId,
}
impl AnyKey {
    pub fn id(&self) -> KeyId {
        self.id
    }
    pub fn kind(&self) -> &'static str {
        self.kind_name
    }
    pub fn is<K: KeyKind>(&self) -> bool {
        self.kind == TypeId::of::<K>()
    }
}
impl<K: KeyKind> From<&Key<K>> for AnyKey {
    fn from(key: &Key<K>) -> Self {
        Self {
            kind: TypeId::of::<K>(),
            kind_name: K::NAME,
            id: key.id(),
        }
    }
}
impl PartialEq for AnyKey {
    fn eq(&self, other: &Self) -> bool {
        // kind first, ids of different registries may coincide
        self.kind == other.kind && self.id == other.id
    }
}
impl Eq for AnyKey {}
impl Hash for AnyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.id.hash(state);
    }
}
impl fmt::Display for AnyKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.kind_name, self.id)
    }
}

// ------------- Registry -------------
/// Case-insensitive name to key table, at most one key per name.
#[derive(Debug)]
pub struct KeyRegistry<K: KeyKind> {
    kept: Mutex<HashMap<String, Key<K>, KeyHasher>>,
    generator: SharedGenerator,
}

impl<K: KeyKind> KeyRegistry<K> {
    pub fn new() -> Self {
        Self::with_generator(IdGenerator::shared())
    }
    pub fn with_generator(generator: SharedGenerator) -> Self {
        Self {
            kept: Mutex::new(HashMap::default()),
            generator,
        }
    }
    /// Lookup form of a name. Trailing whitespace is never part of a key.
    pub fn normalize(name: &str) -> String {
        name.trim_end().to_lowercase()
    }
    pub fn keep(&self, name: &str) -> (Key<K>, bool) {
        let name = name.trim_end();
        let mut kept = lock(&self.kept);
        match kept.entry(Self::normalize(name)) {
            Entry::Occupied(e) => (e.get().clone(), true),
            Entry::Vacant(e) => {
                let id = lock(&self.generator).generate();
                trace!(kind = K::NAME, id, name, "interned key");
                (e.insert(Key::new(id, name.to_owned())).clone(), false)
            }
        }
    }
    pub fn get_or_create(&self, name: &str) -> Key<K> {
        self.keep(name).0
    }
    pub fn get(&self, name: &str) -> Option<Key<K>> {
        lock(&self.kept).get(&Self::normalize(name)).cloned()
    }
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.kept).contains_key(&Self::normalize(name))
    }
    pub fn generator(&self) -> SharedGenerator {
        Arc::clone(&self.generator)
    }
    // Snapshot, sorted by id so the order is creation order.
    pub fn keys(&self) -> Vec<Key<K>> {
        let mut keys: Vec<_> = lock(&self.kept).values().cloned().collect();
        keys.sort_unstable();
        keys
    }
    pub fn len(&self) -> usize {
        lock(&self.kept).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: KeyKind> Default for KeyRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- KeySpace -------------
// Well-known triggers delivered by holders on their own.
pub const ASSIGN: &str = "assign";
pub const UNASSIGN: &str = "unassign";
pub const DESTROY: &str = "destroy";

/// The registries of every key kind, wired to one or several id generators.
pub struct KeySpace {
    id_space: IdSpace,
    tags: KeyRegistry<TagKind>,
    plugins: KeyRegistry<PluginKind>,
    triggers: KeyRegistry<TriggerKind>,
    assign: TriggerKey,
    unassign: TriggerKey,
    destroy: TriggerKey,
}

impl KeySpace {
    pub fn new(id_space: IdSpace) -> Self {
        let (tags, plugins, triggers) = match id_space {
            IdSpace::Shared => {
                let generator = IdGenerator::shared();
                (
                    KeyRegistry::with_generator(Arc::clone(&generator)),
                    KeyRegistry::with_generator(Arc::clone(&generator)),
                    KeyRegistry::with_generator(generator),
                )
            }
            IdSpace::PerKind => (KeyRegistry::new(), KeyRegistry::new(), KeyRegistry::new()),
        };
        let assign = triggers.get_or_create(ASSIGN);
        let unassign = triggers.get_or_create(UNASSIGN);
        let destroy = triggers.get_or_create(DESTROY);
        Self {
            id_space,
            tags,
            plugins,
            triggers,
            assign,
            unassign,
            destroy,
        }
    }
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.id_space)
    }
    pub fn id_space(&self) -> IdSpace {
        self.id_space
    }
    pub fn tags(&self) -> &KeyRegistry<TagKind> {
        &self.tags
    }
    pub fn plugins(&self) -> &KeyRegistry<PluginKind> {
        &self.plugins
    }
    pub fn triggers(&self) -> &KeyRegistry<TriggerKind> {
        &self.triggers
    }
    pub fn tag(&self, name: &str) -> TagKey {
        self.tags.get_or_create(name)
    }
    pub fn plugin(&self, name: &str) -> PluginKey {
        self.plugins.get_or_create(name)
    }
    pub fn trigger(&self, name: &str) -> TriggerKey {
        self.triggers.get_or_create(name)
    }
    pub fn assign(&self) -> &TriggerKey {
        &self.assign
    }
    pub fn unassign(&self) -> &TriggerKey {
        &self.unassign
    }
    pub fn destroy(&self) -> &TriggerKey {
        &self.destroy
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(IdSpace::default())
    }
}

impl fmt::Debug for KeySpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeySpace")
            .field("id_space", &self.id_space)
            .field("tags", &self.tags.len())
            .field("plugins", &self.plugins.len())
            .field("triggers", &self.triggers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_counts_up_from_genesis() {
        let mut generator = IdGenerator::new();
        assert_eq!(generator.lower_bound(), GENESIS);
        assert_eq!(generator.generate(), 1);
        assert_eq!(generator.generate(), 2);
        assert_eq!(generator.lower_bound(), 2);
    }

    #[test]
    fn keep_reports_previously_kept() {
        let registry = KeyRegistry::<TagKind>::new();
        let (first, previously_kept) = registry.keep("Color");
        assert!(!previously_kept);
        let (second, previously_kept) = registry.keep("COLOR");
        assert!(previously_kept);
        assert!(first.is_same(&second));
        assert_eq!(second.name(), "Color");
    }

    #[test]
    fn trailing_whitespace_is_not_part_of_the_name() {
        let registry = KeyRegistry::<PluginKind>::new();
        let (padded, _) = registry.keep("Foo \t");
        assert_eq!(padded.name(), "Foo");
        let (bare, previously_kept) = registry.keep("foo");
        assert!(previously_kept);
        assert!(padded.is_same(&bare));
        assert!(registry.contains("FOO  "));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn erased_keys_compare_kind_before_id() {
        let tags = KeyRegistry::<TagKind>::new();
        let plugins = KeyRegistry::<PluginKind>::new();
        let tag = tags.get_or_create("same");
        let plugin = plugins.get_or_create("same");
        assert_eq!(tag.id(), plugin.id());
        assert_ne!(tag.erase(), plugin.erase());
        assert!(tag != plugin.erase());
        assert!(tag.erase().is::<TagKind>());
        assert!(!tag.erase().is::<PluginKind>());
    }
}
