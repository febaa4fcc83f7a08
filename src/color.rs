//! Deterministic identity colors for segmentation masks.
//!
//! Every drawable object carries an [`ObjectIdentity`]: a [`ClassKey`] naming
//! its semantic category (shared by all instances of that category) and an
//! [`InstanceKey`] unique to the live instance. The [`ColorAssigner`] turns
//! either key into a flat [`Rgb`] color that the override passes paint the
//! object with.
//!
//! # Color scheme
//!
//! 1. Class keys are looked up in a curated override table first.
//! 2. Otherwise the key's stable textual form is hashed with 64-bit FNV-1a.
//! 3. Instance keys XOR a salt into the hash so the two tag spaces do not
//!    line up bit-for-bit.
//! 4. The hash is avalanched and three 8-bit fields are sliced out:
//!
//! | Space    | r bits | g bits | b bits |
//! |----------|--------|--------|--------|
//! | class    | 16..24 | 8..16  | 0..8   |
//! | instance | 8..16  | 16..24 | 32..40 |
//!
//! 5. Each channel is compressed into `[MIN_BRIGHTNESS, 255]` so nothing maps
//!    to near-black, which is reserved for background.
//!
//! # Example
//!
//! ```
//! use segcap::{ColorAssigner, ObjectKey};
//!
//! let mut colors = ColorAssigner::new();
//! let stone = colors.color_for(&ObjectKey::class("minecraft:stone"));
//! assert_eq!(stone, colors.color_for(&ObjectKey::class("minecraft:stone")));
//! assert!(stone.r >= segcap::MIN_BRIGHTNESS);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Lowest value any channel of an object color may take.
pub const MIN_BRIGHTNESS: u8 = 30;

/// Default salt mixed into instance-key hashes.
pub const INSTANCE_SALT: u64 = 0x7F3A_92C1;

/// An 8-bit RGB triple.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Reserved for pixels where no geometry was drawn.
    pub const BACKGROUND: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Packed `0xRRGGBB`.
    pub fn packed(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// Opaque RGBA bytes, the form vertex colors are emitted in.
    pub fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, 255]
    }

    /// Raises every channel to at least `floor`.
    pub fn lifted(self, floor: u8) -> Self {
        Self::new(self.r.max(floor), self.g.max(floor), self.b.max(floor))
    }
}

impl From<[u8; 3]> for Rgb {
    fn from(v: [u8; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.packed())
    }
}

/// Identifier of a semantic category, e.g. `"minecraft:stone"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassKey(Arc<str>);

impl ClassKey {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier unique to one live object instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey(pub u64);

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance:{}", self.0)
    }
}

/// Which key space a color is drawn from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagSpace {
    Class,
    Instance,
}

/// What a piece of geometry represents, in one of the two tag spaces.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    Class(ClassKey),
    Instance(InstanceKey),
}

impl ObjectKey {
    pub fn class(id: impl AsRef<str>) -> Self {
        ObjectKey::Class(ClassKey::new(id))
    }

    pub fn instance(id: u64) -> Self {
        ObjectKey::Instance(InstanceKey(id))
    }

    pub fn tag_space(&self) -> TagSpace {
        match self {
            ObjectKey::Class(_) => TagSpace::Class,
            ObjectKey::Instance(_) => TagSpace::Instance,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKey::Class(k) => k.fmt(f),
            ObjectKey::Instance(k) => k.fmt(f),
        }
    }
}

/// Both keys of a drawable object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
    pub class: ClassKey,
    pub instance: InstanceKey,
}

impl ObjectIdentity {
    pub fn new(class: impl AsRef<str>, instance: u64) -> Self {
        Self {
            class: ClassKey::new(class),
            instance: InstanceKey(instance),
        }
    }

    /// The key this object is painted by in the given tag space.
    pub fn key_for(&self, space: TagSpace) -> ObjectKey {
        match space {
            TagSpace::Class => ObjectKey::Class(self.class.clone()),
            TagSpace::Instance => ObjectKey::Instance(self.instance),
        }
    }
}

/// Memoizing key → color service.
///
/// The cache only grows; call [`reset_cache`](Self::reset_cache) when the
/// identity universe changes (new world, new session). Curated class
/// overrides survive a reset.
#[derive(Debug, Clone)]
pub struct ColorAssigner {
    cache: HashMap<(ObjectKey, u64), Rgb>,
    overrides: HashMap<ClassKey, Rgb>,
    instance_salt: u64,
}

impl Default for ColorAssigner {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorAssigner {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            overrides: HashMap::new(),
            instance_salt: INSTANCE_SALT,
        }
    }

    /// Pins a class to a hand-picked color. The color is lifted to the
    /// brightness floor so it can never read as background.
    pub fn with_override(mut self, class: impl AsRef<str>, color: Rgb) -> Self {
        self.set_override(ClassKey::new(class), color);
        self
    }

    pub fn set_override(&mut self, class: ClassKey, color: Rgb) {
        let color = color.lifted(MIN_BRIGHTNESS);
        self.cache
            .retain(|(key, _), _| !matches!(key, ObjectKey::Class(c) if *c == class));
        self.overrides.insert(class, color);
    }

    pub fn with_instance_salt(mut self, salt: u64) -> Self {
        self.instance_salt = salt;
        self.cache.clear();
        self
    }

    /// Color for `key` using the configured salt.
    pub fn color_for(&mut self, key: &ObjectKey) -> Rgb {
        let salt = match key.tag_space() {
            TagSpace::Class => 0,
            TagSpace::Instance => self.instance_salt,
        };
        self.color_for_salted(key, salt)
    }

    /// Color for `key` with an explicit salt.
    pub fn color_for_salted(&mut self, key: &ObjectKey, salt: u64) -> Rgb {
        if let Some(color) = self.cache.get(&(key.clone(), salt)) {
            return *color;
        }

        let color = match key {
            ObjectKey::Class(class) => self
                .overrides
                .get(class)
                .copied()
                .unwrap_or_else(|| hashed_color(key, salt)),
            ObjectKey::Instance(_) => hashed_color(key, salt),
        };

        self.cache.insert((key.clone(), salt), color);
        color
    }

    /// Number of memoized assignments.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Forgets every memoized assignment.
    pub fn reset_cache(&mut self) {
        tracing::debug!(entries = self.cache.len(), "identity color cache reset");
        self.cache.clear();
    }
}

/// Uncached hash-slice color. Pure function of `(key, salt)`.
pub fn hashed_color(key: &ObjectKey, salt: u64) -> Rgb {
    let text = key.to_string();
    let mut hash = fnv1a64(text.as_bytes());
    match key.tag_space() {
        TagSpace::Class => {
            hash = avalanche(hash ^ salt);
            Rgb::new(
                floor_channel((hash >> 16) as u8),
                floor_channel((hash >> 8) as u8),
                floor_channel(hash as u8),
            )
        }
        TagSpace::Instance => {
            hash = avalanche(hash ^ salt);
            Rgb::new(
                floor_channel((hash >> 8) as u8),
                floor_channel((hash >> 16) as u8),
                floor_channel((hash >> 32) as u8),
            )
        }
    }
}

/// Compresses `[0, 255]` into `[MIN_BRIGHTNESS, 255]`.
fn floor_channel(v: u8) -> u8 {
    let span = 256 - MIN_BRIGHTNESS as u32;
    (MIN_BRIGHTNESS as u32 + (v as u32 * span) / 256) as u8
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(PRIME))
}

// splitmix64 finalizer
fn avalanche(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
