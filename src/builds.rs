use serde::Serialize;
use strum::{AsRefStr, Display};

/// Target platform bias for detection. Derived from the cooked folder name
/// when the caller leaves it undetermined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
pub enum Platform {
    #[default]
    Undetermined,
    PC,
    Console,
}

impl Platform {
    pub fn from_folder_name(folder: &str) -> Platform {
        match folder {
            "CookedPC" | "CookedPCServer" => Platform::PC,
            "CookedPCConsole" | "CookedXenon" | "CookedIPhone" => Platform::Console,
            _ => Platform::Undetermined,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Display, AsRefStr, Serialize)]
pub enum BuildGeneration {
    UE1,
    UE2,
    /// The 2.5-era console/licensee lineage.
    UE2X,
    #[default]
    UE3,
    UE4,
}

/// Identified engine+game revision. `Default` is a generic engine build with
/// licensee 0; `Unknown` is an unmatched licensee fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, AsRefStr, Serialize)]
pub enum BuildName {
    Unknown,
    #[default]
    Default,
    Unreal1,
    UnrealTournament,
    SplinterCell,
    Conviction,
    UT2004,
    UT2003,
    AmericasArmy2,
    DukeNukemForever,
    RainbowSixVegas,
    Huxley,
    MassEffect,
    APB,
    Batman,
    Tera,
    DCUniverseOnline,
    Hawken,
    RocketLeague,
    UE4,
}

/// Key selecting the rules object for a build (one per licensee family).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
pub enum BranchKind {
    #[default]
    Default,
    UE4,
    AA2,
    DNF,
    SFX,
    APB,
    RSS,
    RL,
    SCX,
    Lead,
    HMS,
    Huxley,
    R6Vegas,
    DCUO,
    Tera,
}

/// Inclusive version/licensee window, optionally gated on platform.
#[derive(Debug, Clone, Copy)]
pub struct VersionRange {
    pub versions: (u32, u32),
    pub licensees: (u16, u16),
    pub platform: Option<Platform>,
}

impl VersionRange {
    const fn range(versions: (u32, u32), licensees: (u16, u16)) -> Self {
        Self { versions, licensees, platform: None }
    }
    const fn exact(version: u32, licensee: u16) -> Self {
        Self { versions: (version, version), licensees: (licensee, licensee), platform: None }
    }
    const fn on(self, platform: Platform) -> Self {
        Self { platform: Some(platform), ..self }
    }

    fn accepts(&self, version: u32, licensee: u16, platform: Platform) -> bool {
        if let Some(gate) = self.platform
            && gate != platform
        {
            return false;
        }
        (self.versions.0..=self.versions.1).contains(&version) && (self.licensees.0..=self.licensees.1).contains(&licensee)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BuildDescriptor {
    pub name: BuildName,
    pub generation: BuildGeneration,
    pub branch: BranchKind,
    pub matches: &'static [VersionRange],
    /// Applied to the summary after detection, for builds whose headers lie
    /// about their serialization rules.
    pub override_version: Option<u32>,
    pub override_licensee: Option<u16>,
}

impl BuildDescriptor {
    const fn new(name: BuildName, generation: BuildGeneration, branch: BranchKind, matches: &'static [VersionRange]) -> Self {
        Self { name, generation, branch, matches, override_version: None, override_licensee: None }
    }
}

/// Declaration order is detection order and intentionally encodes precedence
/// for overlapping families: UT2004 must be listed ahead of UT2003 so the
/// shared 128/25 pair resolves to UT2004.
pub static BUILDS: &[BuildDescriptor] = &[
    BuildDescriptor::new(BuildName::Unreal1, BuildGeneration::UE1, BranchKind::Default, &[VersionRange::range((61, 68), (0, 0))]),
    BuildDescriptor::new(BuildName::UnrealTournament, BuildGeneration::UE1, BranchKind::Default, &[VersionRange::range((68, 69), (0, 2))]),
    BuildDescriptor::new(BuildName::SplinterCell, BuildGeneration::UE2, BranchKind::SCX, &[VersionRange::range((100, 102), (29, 30))]),
    BuildDescriptor::new(BuildName::UT2004, BuildGeneration::UE2, BranchKind::Default, &[VersionRange::range((128, 129), (25, 29))]),
    BuildDescriptor::new(BuildName::UT2003, BuildGeneration::UE2, BranchKind::Default, &[VersionRange::range((119, 128), (25, 29))]),
    BuildDescriptor::new(BuildName::AmericasArmy2, BuildGeneration::UE2X, BranchKind::AA2, &[VersionRange::range((128, 129), (32, 33))]),
    BuildDescriptor::new(BuildName::DukeNukemForever, BuildGeneration::UE2, BranchKind::DNF, &[VersionRange::exact(156, 36)]),
    BuildDescriptor::new(BuildName::RainbowSixVegas, BuildGeneration::UE3, BranchKind::R6Vegas, &[VersionRange::range((241, 241), (66, 71))]),
    BuildDescriptor::new(BuildName::Conviction, BuildGeneration::UE2X, BranchKind::Lead, &[VersionRange::range((576, 587), (100, 121))]),
    BuildDescriptor::new(BuildName::Huxley, BuildGeneration::UE3, BranchKind::Huxley, &[VersionRange::range((496, 496), (16, 23))]),
    BuildDescriptor::new(BuildName::MassEffect, BuildGeneration::UE3, BranchKind::SFX, &[VersionRange::range((491, 684), (112, 194))]),
    BuildDescriptor::new(BuildName::APB, BuildGeneration::UE3, BranchKind::APB, &[VersionRange::range((547, 549), (32, 34))]),
    BuildDescriptor::new(BuildName::Tera, BuildGeneration::UE3, BranchKind::Tera, &[VersionRange::range((610, 611), (13, 14))]),
    BuildDescriptor::new(BuildName::DCUniverseOnline, BuildGeneration::UE3, BranchKind::DCUO, &[VersionRange::range((648, 649), (6405, 6405))]),
    BuildDescriptor::new(
        BuildName::Batman,
        BuildGeneration::UE3,
        BranchKind::RSS,
        &[VersionRange::range((805, 807), (101, 143)), VersionRange::range((805, 807), (144, 144)).on(Platform::Console)],
    ),
    BuildDescriptor::new(BuildName::Hawken, BuildGeneration::UE3, BranchKind::HMS, &[VersionRange::range((860, 861), (2, 4))]),
    BuildDescriptor::new(BuildName::RocketLeague, BuildGeneration::UE3, BranchKind::RL, &[VersionRange::range((867, 868), (21, 32))]),
];

/// Detected build with the effective (possibly overridden) versions.
#[derive(Debug, Clone, Serialize)]
pub struct Build {
    pub name: BuildName,
    pub generation: BuildGeneration,
    pub branch: BranchKind,
    pub version: u32,
    pub licensee: u16,
    pub platform: Platform,
}

impl Default for Build {
    fn default() -> Self {
        Self {
            name: BuildName::Default,
            generation: BuildGeneration::UE3,
            branch: BranchKind::Default,
            version: 0,
            licensee: 0,
            platform: Platform::Undetermined,
        }
    }
}

fn generation_for_version(version: u32) -> BuildGeneration {
    if version <= 69 {
        BuildGeneration::UE1
    } else if version < 180 {
        BuildGeneration::UE2
    } else {
        BuildGeneration::UE3
    }
}

/// First-match scan over `table`; ties are resolved by declaration order.
pub fn detect_in(table: &[BuildDescriptor], version: u32, licensee: u16, platform: Platform) -> Build {
    for descriptor in table {
        if descriptor.matches.iter().any(|m| m.accepts(version, licensee, platform)) {
            return Build {
                name: descriptor.name,
                generation: descriptor.generation,
                branch: descriptor.branch,
                version: descriptor.override_version.unwrap_or(version),
                licensee: descriptor.override_licensee.unwrap_or(licensee),
                platform,
            };
        }
    }
    Build {
        name: if licensee == 0 { BuildName::Default } else { BuildName::Unknown },
        generation: generation_for_version(version),
        branch: BranchKind::Default,
        version,
        licensee,
        platform,
    }
}

pub fn detect(version: u32, licensee: u16, platform: Platform, is_ue4: bool) -> Build {
    if is_ue4 {
        return Build {
            name: BuildName::UE4,
            generation: BuildGeneration::UE4,
            branch: BranchKind::UE4,
            version,
            licensee,
            platform,
        };
    }
    detect_in(BUILDS, version, licensee, platform)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ut2004_wins_shared_128_25() {
        let build = detect(128, 25, Platform::Undetermined, false);
        assert_eq!(build.name, BuildName::UT2004);
    }

    #[test]
    fn test_ut2003_still_reachable_below_the_tie() {
        let build = detect(120, 25, Platform::Undetermined, false);
        assert_eq!(build.name, BuildName::UT2003);
    }

    #[test]
    fn test_unmatched_licensee_zero_is_default() {
        let build = detect(490, 0, Platform::Undetermined, false);
        assert_eq!(build.name, BuildName::Default);
        assert_eq!(build.generation, BuildGeneration::UE3);
    }

    #[test]
    fn test_unmatched_nonzero_licensee_is_unknown() {
        let build = detect(490, 9999, Platform::Undetermined, false);
        assert_eq!(build.name, BuildName::Unknown);
    }

    #[test]
    fn test_platform_gated_predicate() {
        assert_eq!(detect(805, 144, Platform::Console, false).name, BuildName::Batman);
        assert_eq!(detect(805, 144, Platform::PC, false).name, BuildName::Unknown);
    }

    #[test]
    fn test_folder_name_heuristics() {
        assert_eq!(Platform::from_folder_name("CookedPC"), Platform::PC);
        assert_eq!(Platform::from_folder_name("CookedPCConsole"), Platform::Console);
        assert_eq!(Platform::from_folder_name("CookedXenon"), Platform::Console);
        assert_eq!(Platform::from_folder_name("Content"), Platform::Undetermined);
    }

    #[test]
    fn test_descriptor_overrides_apply_after_detection() {
        static TABLE: &[BuildDescriptor] = &[BuildDescriptor {
            name: BuildName::Unknown,
            generation: BuildGeneration::UE2,
            branch: BranchKind::Default,
            matches: &[VersionRange::exact(95, 4)],
            override_version: Some(92),
            override_licensee: Some(0),
        }];
        let build = detect_in(TABLE, 95, 4, Platform::Undetermined);
        assert_eq!((build.version, build.licensee), (92, 0));
    }

    #[test]
    fn test_ue4_short_circuits_the_table() {
        let build = detect(128, 25, Platform::Undetermined, true);
        assert_eq!(build.name, BuildName::UE4);
        assert_eq!(build.generation, BuildGeneration::UE4);
    }
}
