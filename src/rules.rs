//! Rule catalogue: the static, immutable tables every other module reads.
//!
//! The catalogue covers the sixteen cell types, per-tier room values, the
//! symmetric adjacency-compatibility relation, forbidden length-3 chain
//! patterns, per-type adjacency-count caps, the rooms that must touch a
//! path, the rooms that may never self-adjoin, the rooms that must be
//! unique, and the directional pair checked after solving.
//!
//! ## Contract
//!
//! - `compat(Path, t) == compat(t, Path) == (t != Empty)`
//! - `compat(Empty, _) == false`
//! - `compat` is symmetric; the colocated tests assert this over all pairs.
//! - Consumers read only; nothing here mutates at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// The sixteen cell types. `Empty` and `Path` are pseudo-rooms; the
/// remaining fourteen are typed rooms with tiers 1..3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RoomType {
    Empty = 0,
    Path = 1,
    Spymaster = 2,
    Garrison = 3,
    LegionBarracks = 4,
    Commander = 5,
    Armoury = 6,
    CorruptionChamber = 7,
    Thaumaturge = 8,
    SacrificialChamber = 9,
    AlchemyLab = 10,
    GolemWorks = 11,
    Smithy = 12,
    Generator = 13,
    FleshSurgeon = 14,
    Synthflesh = 15,
}

/// Number of distinct cell types (including `Empty` and `Path`).
pub const NUM_TYPES: usize = 16;

/// Every cell type, indexable by `RoomType as usize`.
pub const ALL_TYPES: [RoomType; NUM_TYPES] = [
    RoomType::Empty,
    RoomType::Path,
    RoomType::Spymaster,
    RoomType::Garrison,
    RoomType::LegionBarracks,
    RoomType::Commander,
    RoomType::Armoury,
    RoomType::CorruptionChamber,
    RoomType::Thaumaturge,
    RoomType::SacrificialChamber,
    RoomType::AlchemyLab,
    RoomType::GolemWorks,
    RoomType::Smithy,
    RoomType::Generator,
    RoomType::FleshSurgeon,
    RoomType::Synthflesh,
];

/// The fourteen typed rooms (everything except `Empty` and `Path`).
pub const ROOM_TYPES: [RoomType; 14] = [
    RoomType::Spymaster,
    RoomType::Garrison,
    RoomType::LegionBarracks,
    RoomType::Commander,
    RoomType::Armoury,
    RoomType::CorruptionChamber,
    RoomType::Thaumaturge,
    RoomType::SacrificialChamber,
    RoomType::AlchemyLab,
    RoomType::GolemWorks,
    RoomType::Smithy,
    RoomType::Generator,
    RoomType::FleshSurgeon,
    RoomType::Synthflesh,
];

impl RoomType {
    /// Numeric index used by the solver's integer domains.
    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Inverse of [`RoomType::index`].
    #[inline]
    pub fn from_index(i: u8) -> Option<RoomType> {
        ALL_TYPES.get(i as usize).copied()
    }

    /// True for the fourteen typed rooms (not `Empty`, not `Path`).
    #[inline]
    pub fn is_room(self) -> bool {
        !matches!(self, RoomType::Empty | RoomType::Path)
    }

    /// Canonical wire spelling (PascalCase).
    pub fn name(self) -> &'static str {
        match self {
            RoomType::Empty => "Empty",
            RoomType::Path => "Path",
            RoomType::Spymaster => "Spymaster",
            RoomType::Garrison => "Garrison",
            RoomType::LegionBarracks => "LegionBarracks",
            RoomType::Commander => "Commander",
            RoomType::Armoury => "Armoury",
            RoomType::CorruptionChamber => "CorruptionChamber",
            RoomType::Thaumaturge => "Thaumaturge",
            RoomType::SacrificialChamber => "SacrificialChamber",
            RoomType::AlchemyLab => "AlchemyLab",
            RoomType::GolemWorks => "GolemWorks",
            RoomType::Smithy => "Smithy",
            RoomType::Generator => "Generator",
            RoomType::FleshSurgeon => "FleshSurgeon",
            RoomType::Synthflesh => "Synthflesh",
        }
    }
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RoomType {
    type Err = String;

    /// Accepts both `LegionBarracks` and `LEGION_BARRACKS` spellings
    /// (case-insensitive, separators ignored).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let t = match norm.as_str() {
            "empty" => RoomType::Empty,
            "path" => RoomType::Path,
            "spymaster" => RoomType::Spymaster,
            "garrison" => RoomType::Garrison,
            "legionbarracks" => RoomType::LegionBarracks,
            "commander" => RoomType::Commander,
            "armoury" | "armory" => RoomType::Armoury,
            "corruptionchamber" => RoomType::CorruptionChamber,
            "thaumaturge" => RoomType::Thaumaturge,
            "sacrificialchamber" => RoomType::SacrificialChamber,
            "alchemylab" => RoomType::AlchemyLab,
            "golemworks" => RoomType::GolemWorks,
            "smithy" => RoomType::Smithy,
            "generator" => RoomType::Generator,
            "fleshsurgeon" => RoomType::FleshSurgeon,
            "synthflesh" => RoomType::Synthflesh,
            _ => return Err(format!("unknown room type: {s}")),
        };
        Ok(t)
    }
}

impl Serialize for RoomType {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for RoomType {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ============================================================================
// Tier values
// ============================================================================

/// Per-tier base values for the fourteen typed rooms, indexed by
/// `RoomType::index() - 2` and `tier - 1`. A path tile is worth
/// [`PATH_VALUE`]; empty cells are worth nothing.
pub const TIER_VALUES: [[i64; 3]; 14] = [
    [12, 18, 25], // Spymaster
    [8, 12, 17],  // Garrison
    [8, 12, 17],  // LegionBarracks
    [15, 22, 30], // Commander
    [9, 14, 19],  // Armoury
    [12, 18, 25], // CorruptionChamber
    [14, 20, 28], // Thaumaturge
    [11, 16, 22], // SacrificialChamber
    [10, 15, 21], // AlchemyLab
    [10, 15, 21], // GolemWorks
    [8, 12, 16],  // Smithy
    [9, 13, 18],  // Generator
    [11, 16, 22], // FleshSurgeon
    [10, 14, 20], // Synthflesh
];

/// Value of a single path tile in the objective.
pub const PATH_VALUE: i64 = 1;

/// Value of a cell with the given type and tier. Out-of-range tiers
/// contribute nothing.
pub fn tier_value(t: RoomType, tier: u8) -> i64 {
    match t {
        RoomType::Empty => 0,
        RoomType::Path => {
            if tier == 1 {
                PATH_VALUE
            } else {
                0
            }
        }
        room => {
            if (1..=3).contains(&tier) {
                TIER_VALUES[room.index() as usize - 2][tier as usize - 1]
            } else {
                0
            }
        }
    }
}

// ============================================================================
// Compatibility relation
// ============================================================================

/// Typed-room neighbor lists. Symmetric by construction; the tests walk
/// every pair to prove it. Self-entries appear only for rooms outside the
/// no-self-adjacency set.
fn typed_neighbors(t: RoomType) -> &'static [RoomType] {
    use RoomType::*;
    match t {
        Spymaster => &[Garrison, LegionBarracks],
        Garrison => &[Spymaster, LegionBarracks, Commander, Armoury],
        LegionBarracks => &[Spymaster, Garrison, Commander, Armoury, LegionBarracks],
        Commander => &[Garrison, LegionBarracks, Armoury],
        Armoury => &[Garrison, LegionBarracks, Commander, Smithy],
        Smithy => &[Armoury, GolemWorks, Generator, Smithy],
        GolemWorks => &[Smithy, Generator, Synthflesh],
        Generator => &[Smithy, GolemWorks, Thaumaturge, AlchemyLab],
        Thaumaturge => &[Generator, AlchemyLab, CorruptionChamber, SacrificialChamber],
        AlchemyLab => &[Generator, Thaumaturge, CorruptionChamber, FleshSurgeon, AlchemyLab],
        CorruptionChamber => &[
            Thaumaturge,
            AlchemyLab,
            SacrificialChamber,
            Synthflesh,
            CorruptionChamber,
        ],
        SacrificialChamber => &[Thaumaturge, CorruptionChamber, FleshSurgeon],
        FleshSurgeon => &[SacrificialChamber, AlchemyLab, Synthflesh],
        Synthflesh => &[FleshSurgeon, GolemWorks, CorruptionChamber, Synthflesh],
        Empty | Path => &[],
    }
}

/// The adjacency-compatibility relation. An edge exists between two
/// in-temple grid neighbors iff their types are compatible; there is no
/// separate "build" step.
pub fn compat(a: RoomType, b: RoomType) -> bool {
    use RoomType::*;
    match (a, b) {
        (Empty, _) | (_, Empty) => false,
        (Path, _) | (_, Path) => true,
        _ => typed_neighbors(a).contains(&b),
    }
}

// ============================================================================
// Structural rule sets
// ============================================================================

/// Forbidden length-3 chain patterns `(A, B, C)`: no cell of type `B` may
/// have connected neighbors of types `A` and `C` simultaneously. Patterns
/// with `A != C` also forbid the mirrored `(C, B, A)` occurrence.
pub const FORBIDDEN_CHAINS: [(RoomType, RoomType, RoomType); 6] = [
    (RoomType::Garrison, RoomType::LegionBarracks, RoomType::Garrison),
    (RoomType::Smithy, RoomType::Armoury, RoomType::Commander),
    (RoomType::Generator, RoomType::Smithy, RoomType::Armoury),
    (
        RoomType::CorruptionChamber,
        RoomType::Thaumaturge,
        RoomType::SacrificialChamber,
    ),
    (RoomType::Spymaster, RoomType::Garrison, RoomType::Commander),
    (RoomType::Spymaster, RoomType::LegionBarracks, RoomType::Commander),
];

/// Per-type adjacency caps `(parent, child, cap)`: a cell of `parent` type
/// may have at most `cap` neighbors of `child` type. Directional on
/// purpose (an Armoury tolerates one Smithy; a Smithy tolerates two
/// Armouries).
pub const ADJACENCY_CAPS: [(RoomType, RoomType, u8); 3] = [
    (RoomType::Armoury, RoomType::Smithy, 1),
    (RoomType::Smithy, RoomType::Armoury, 2),
    (RoomType::CorruptionChamber, RoomType::Synthflesh, 2),
];

/// Rooms that require at least one path-typed neighbor (the foyer and the
/// architect count: both are path tiles).
pub const REQUIRES_PATH_NEIGHBOR: [RoomType; 2] = [RoomType::Generator, RoomType::GolemWorks];

/// Rooms that may never be grid-adjacent to another room of the same type.
pub const NO_SELF_ADJACENCY: [RoomType; 9] = [
    RoomType::Spymaster,
    RoomType::Garrison,
    RoomType::Commander,
    RoomType::Armoury,
    RoomType::Thaumaturge,
    RoomType::SacrificialChamber,
    RoomType::GolemWorks,
    RoomType::Generator,
    RoomType::FleshSurgeon,
];

/// Rooms that may occur at most once in a layout.
pub const UNIQUE_TYPES: [RoomType; 3] = [
    RoomType::Commander,
    RoomType::Thaumaturge,
    RoomType::SacrificialChamber,
];

/// The special pair for the post-solve directional check: no
/// `Commander -> ... -> Spymaster` linear chain leading away from the
/// foyer. The pair is also forbidden from direct adjacency.
pub const DIRECTIONAL_PAIR: (RoomType, RoomType) = (RoomType::Spymaster, RoomType::Commander);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compat_is_symmetric() {
        for &a in ALL_TYPES.iter() {
            for &b in ALL_TYPES.iter() {
                assert_eq!(compat(a, b), compat(b, a), "asymmetric: {a} / {b}");
            }
        }
    }

    #[test]
    fn path_connects_to_everything_but_empty() {
        for &t in ALL_TYPES.iter() {
            assert_eq!(compat(RoomType::Path, t), t != RoomType::Empty);
        }
    }

    #[test]
    fn empty_connects_to_nothing() {
        for &t in ALL_TYPES.iter() {
            assert!(!compat(RoomType::Empty, t));
        }
    }

    #[test]
    fn no_self_adjacency_types_are_self_incompatible() {
        for &t in NO_SELF_ADJACENCY.iter() {
            assert!(!compat(t, t), "{t} should not be self-compatible");
        }
    }

    #[test]
    fn directional_pair_is_incompatible() {
        let (spy, cmd) = DIRECTIONAL_PAIR;
        assert!(!compat(spy, cmd));
        assert!(!compat(cmd, spy));
    }

    #[test]
    fn forbidden_chain_patterns_are_reachable() {
        // A pattern is meaningful only if B connects to both A and C;
        // otherwise the table constraint on edges already rules it out.
        for &(a, b, c) in FORBIDDEN_CHAINS.iter() {
            assert!(compat(a, b), "({a},{b},{c}): A-B not compatible");
            assert!(compat(b, c), "({a},{b},{c}): B-C not compatible");
        }
    }

    #[test]
    fn adjacency_caps_refer_to_compatible_pairs() {
        for &(p, c, cap) in ADJACENCY_CAPS.iter() {
            assert!(compat(p, c), "cap on incompatible pair {p}/{c}");
            assert!(cap >= 1 && cap < 4);
        }
    }

    #[test]
    fn tier_values_cover_all_rooms() {
        for &t in ROOM_TYPES.iter() {
            for tier in 1..=3u8 {
                assert!(tier_value(t, tier) > 0);
            }
            assert_eq!(tier_value(t, 0), 0);
        }
        assert_eq!(tier_value(RoomType::Path, 1), PATH_VALUE);
        assert_eq!(tier_value(RoomType::Empty, 0), 0);
    }

    #[test]
    fn round_trip_names() {
        for &t in ALL_TYPES.iter() {
            assert_eq!(t.name().parse::<RoomType>().unwrap(), t);
            assert_eq!(RoomType::from_index(t.index()), Some(t));
        }
        // Screaming-snake spellings from the sharing ecosystem.
        assert_eq!(
            "LEGION_BARRACKS".parse::<RoomType>().unwrap(),
            RoomType::LegionBarracks
        );
        assert_eq!(
            "CORRUPTION_CHAMBER".parse::<RoomType>().unwrap(),
            RoomType::CorruptionChamber
        );
    }
}
